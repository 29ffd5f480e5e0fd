//! `$__` macro expansion.
//!
//! | Token | Expansion |
//! |---|---|
//! | `$__timeField` | time column name |
//! | `$__timeFrom` / `$__timeTo` | resolved bound, formatted for the column |
//! | `$__timeFilter` | `<field> >= <from> AND <field> <= <to>` |
//! | `$__interval` | auto bucket as an `INTERVAL '…'` literal |
//! | `$__interval_ms` | auto bucket in milliseconds |
//!
//! Tokens are matched left to right in one pass, only outside literals and comments.
//! Expansion output is never rescanned.

pub mod fallback;

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration as StdDuration;

use regex::{Captures, Regex};
use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};

use crate::error::{MacroError, MacroExpansionError};
use crate::sql::spans::{rewrite_code_spans, split_spans};
use crate::time_range::{
    ColumnFormat, ResolvedRange, TimeColumnDescriptor, TimeRange, column_format,
    compute_auto_interval, format_bound, format_interval_literal, format_interval_short, resolve,
};
use crate::utils::time::parse_utc_offset;

pub const DEFAULT_TIME_COLUMN: &str = "greptime_timestamp";
pub const DEFAULT_MAX_DATA_POINTS: u32 = 1_000;
pub const DEFAULT_TIME_ZONE: &str = "UTC";

/// Variable recording which column the fallback path picked.
pub const FALLBACK_VARIABLE: &str = "__time_field_fallback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Macro {
    TimeField,
    TimeFrom,
    TimeTo,
    TimeFilter,
    Interval,
    IntervalMs,
}

impl Macro {
    pub const ALL: [Self; 6] = [
        Self::TimeField,
        Self::TimeFrom,
        Self::TimeTo,
        Self::TimeFilter,
        Self::Interval,
        Self::IntervalMs,
    ];

    /// Parses the part after `$`, e.g. `__timeFilter`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.name() == name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TimeField => "__timeField",
            Self::TimeFrom => "__timeFrom",
            Self::TimeTo => "__timeTo",
            Self::TimeFilter => "__timeFilter",
            Self::Interval => "__interval",
            Self::IntervalMs => "__interval_ms",
        }
    }

    #[must_use]
    pub fn token(self) -> String {
        format!("${}", self.name())
    }
}

/// Everything one expansion needs. Built once per call and never mutated by expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroContext {
    pub database: String,
    pub time_range: TimeRange,
    pub time_column: Option<TimeColumnDescriptor>,
    pub time_zone: String,
    pub max_data_points: u32,

    /// Guess a time column when none is configured instead of failing.
    pub allow_time_column_fallback: bool,

    /// Reference instant for relative ranges; the wall clock when unset.
    pub now: Option<OffsetDateTime>,
}

impl MacroContext {
    #[must_use]
    pub fn new(database: impl Into<String>, time_range: TimeRange) -> Self {
        Self {
            database: database.into(),
            time_range,
            time_column: None,
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            max_data_points: DEFAULT_MAX_DATA_POINTS,
            allow_time_column_fallback: true,
            now: None,
        }
    }

    #[must_use]
    pub fn with_time_column(mut self, time_column: TimeColumnDescriptor) -> Self {
        self.time_column = Some(time_column);
        self
    }

    #[must_use]
    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = time_zone.into();
        self
    }

    #[must_use]
    pub fn with_max_data_points(mut self, max_data_points: u32) -> Self {
        self.max_data_points = max_data_points;
        self
    }

    #[must_use]
    pub fn with_time_column_fallback(mut self, allow: bool) -> Self {
        self.allow_time_column_fallback = allow;
        self
    }

    #[must_use]
    pub fn with_now(mut self, now: OffsetDateTime) -> Self {
        self.now = Some(now);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpansionResult {
    pub final_query: String,
    pub interpolated_variables: BTreeMap<String, String>,
    pub errors: Vec<MacroError>,
    pub warnings: Vec<String>,
}

impl ExpansionResult {
    /// `false` whenever any macro failed; the query must not be sent.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_executable(self) -> Result<Self, MacroExpansionError> {
        if self.is_executable() {
            Ok(self)
        } else {
            Err(MacroExpansionError {
                errors: self.errors,
                partial_query: self.final_query,
            })
        }
    }
}

/// Expands every recognised macro in `sql`.
///
/// Never fails as a whole: macro-specific failures are collected in
/// [`ExpansionResult::errors`] and the failing tokens stay verbatim in the output.
#[must_use]
pub fn expand(sql: &str, context: &MacroContext) -> ExpansionResult {
    let has_candidates = split_spans(sql)
        .iter()
        .any(|span| span.is_code() && span.text.contains("$__"));
    if !has_candidates {
        return ExpansionResult {
            final_query: sql.to_string(),
            ..ExpansionResult::default()
        };
    }

    let mut expander = Expander::new(sql, context);
    let final_query = rewrite_code_spans(sql, |code| {
        macro_regex().replace_all(code, |captures: &Captures<'_>| expander.expand_token(captures))
    })
    .into_owned();

    tracing::debug!(
        variables = expander.variables.len(),
        errors = expander.errors.len(),
        "macro expansion finished"
    );

    ExpansionResult {
        final_query,
        interpolated_variables: expander.variables,
        errors: expander.errors,
        warnings: expander.warnings,
    }
}

#[derive(Debug, Clone)]
struct ResolvedColumn {
    name: String,
    format: ColumnFormat,
}

struct Expander<'a> {
    sql: &'a str,
    context: &'a MacroContext,
    now: OffsetDateTime,
    range: Option<Result<ResolvedRange, MacroError>>,
    column: Option<Result<ResolvedColumn, MacroError>>,
    interval: Option<Result<StdDuration, MacroError>>,
    offset: Option<UtcOffset>,
    variables: BTreeMap<String, String>,
    errors: Vec<MacroError>,
    warnings: Vec<String>,
}

impl<'a> Expander<'a> {
    fn new(sql: &'a str, context: &'a MacroContext) -> Self {
        Self {
            sql,
            context,
            now: context.now.unwrap_or_else(OffsetDateTime::now_utc),
            range: None,
            column: None,
            interval: None,
            offset: None,
            variables: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn expand_token(&mut self, captures: &Captures<'_>) -> String {
        let token = &captures[0];
        let Some(kind) = Macro::from_name(&token[1..]) else {
            self.warn(format!("unknown macro `{token}` left unexpanded"));
            return token.to_string();
        };

        match self.render(kind) {
            Ok(expansion) => {
                self.variables
                    .insert(kind.name().to_string(), expansion.clone());
                expansion
            }
            Err(error) => {
                if !self.errors.contains(&error) {
                    self.errors.push(error);
                }
                token.to_string()
            }
        }
    }

    fn render(&mut self, kind: Macro) -> Result<String, MacroError> {
        match kind {
            Macro::TimeField => Ok(self.column(kind)?.name),
            Macro::TimeFrom => {
                let column = self.column(kind)?;
                let range = self.range()?;
                Ok(self.bound(range.start, column.format))
            }
            Macro::TimeTo => {
                let column = self.column(kind)?;
                let range = self.range()?;
                Ok(self.bound(range.end, column.format))
            }
            Macro::TimeFilter => {
                let column = self.column(kind)?;
                let range = self.range()?;
                let from = self.bound(range.start, column.format);
                let to = self.bound(range.end, column.format);
                Ok(format!(
                    "{name} >= {from} AND {name} <= {to}",
                    name = column.name
                ))
            }
            Macro::Interval => Ok(format_interval_literal(self.interval()?)),
            Macro::IntervalMs => Ok(self.interval()?.as_millis().to_string()),
        }
    }

    fn range(&mut self) -> Result<ResolvedRange, MacroError> {
        if let Some(cached) = &self.range {
            return cached.clone();
        }

        let resolved = resolve(&self.context.time_range, self.now).map_err(MacroError::from);
        if let Ok(range) = &resolved
            && range.swapped
        {
            self.warn("time range `from` was after `to`; bounds were swapped".to_string());
        }
        self.range = Some(resolved.clone());
        resolved
    }

    fn column(&mut self, kind: Macro) -> Result<ResolvedColumn, MacroError> {
        if let Some(cached) = &self.column {
            return cached.clone();
        }

        let context = self.context;
        let resolved = match &context.time_column {
            Some(descriptor) => Ok(ResolvedColumn {
                name: descriptor.name.clone(),
                format: column_format(descriptor, self.now),
            }),
            None if context.allow_time_column_fallback => {
                let fallback = fallback::fallback_time_field(self.sql);
                tracing::warn!(
                    column = %fallback.name,
                    source = fallback.source.as_str(),
                    "no time column configured; using fallback time field"
                );
                self.warn(format!(
                    "no time column configured; using `{}` ({})",
                    fallback.name,
                    fallback.source.as_str()
                ));
                self.variables
                    .insert(FALLBACK_VARIABLE.to_string(), fallback.name.clone());
                Ok(ResolvedColumn {
                    name: fallback.name,
                    format: ColumnFormat::Native,
                })
            }
            None => Err(MacroError::MissingTimeColumn {
                macro_token: kind.token(),
            }),
        };

        self.column = Some(resolved.clone());
        resolved
    }

    fn interval(&mut self) -> Result<StdDuration, MacroError> {
        if let Some(cached) = &self.interval {
            return cached.clone();
        }

        let computed = self.range().and_then(|range| {
            compute_auto_interval(range.start, range.end, self.context.max_data_points)
                .map_err(MacroError::from)
        });
        if let Ok(interval) = &computed {
            self.variables
                .insert("__interval_short".to_string(), format_interval_short(*interval));
        }
        self.interval = Some(computed.clone());
        computed
    }

    fn bound(&mut self, instant: OffsetDateTime, format: ColumnFormat) -> String {
        let offset = match format {
            ColumnFormat::Native => self.offset(),
            ColumnFormat::Epoch(_) => UtcOffset::UTC,
        };
        format_bound(instant, format, offset)
    }

    fn offset(&mut self) -> UtcOffset {
        if let Some(offset) = self.offset {
            return offset;
        }

        let context = self.context;
        let time_zone = context.time_zone.as_str();
        let offset = match parse_utc_offset(time_zone) {
            Some(offset) => offset,
            None => {
                tracing::warn!(time_zone, "unknown time zone; using UTC");
                self.warn(format!(
                    "unknown time zone `{time_zone}`; timestamps rendered in UTC"
                ));
                UtcOffset::UTC
            }
        };
        self.offset = Some(offset);
        offset
    }

    fn warn(&mut self, message: String) {
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }
}

fn macro_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\$__([A-Za-z][A-Za-z0-9_]*)").expect("macro regex must compile")
    })
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{FALLBACK_VARIABLE, MacroContext, expand};
    use crate::error::MacroError;
    use crate::time_range::{TimeColumnDescriptor, TimeRange, TimeUnit};

    fn context() -> MacroContext {
        MacroContext::new("public", TimeRange::last("now-1h"))
            .with_now(datetime!(2026-02-05 07:00:00 UTC))
    }

    #[test]
    fn macro_free_queries_pass_through() {
        let sql = "SELECT host, avg(cpu) FROM metrics GROUP BY host";
        let result = expand(sql, &context().with_time_column_fallback(false));
        assert_eq!(result.final_query, sql);
        assert!(result.interpolated_variables.is_empty());
        assert!(result.is_executable());
    }

    #[test]
    fn time_filter_on_millisecond_column() {
        let ctx = context().with_time_column(TimeColumnDescriptor::new(
            "ts",
            "BIGINT",
            TimeUnit::Milliseconds,
        ));
        let result = expand("SELECT * FROM m WHERE $__timeFilter", &ctx);

        insta::assert_snapshot!(
            result.final_query,
            @"SELECT * FROM m WHERE ts >= 1770271200000 AND ts <= 1770274800000"
        );
        assert!(result.errors.is_empty());
    }

    #[test]
    fn native_column_renders_quoted_timestamps_in_context_zone() {
        let ctx = context()
            .with_time_column(TimeColumnDescriptor::new(
                "greptime_timestamp",
                "TimestampMillisecond",
                TimeUnit::Auto,
            ))
            .with_time_zone("+08:00");
        let result = expand("SELECT $__timeFrom AS a, $__timeTo AS b", &ctx);

        insta::assert_snapshot!(
            result.final_query,
            @"SELECT '2026-02-05T14:00:00.000+08:00' AS a, '2026-02-05T15:00:00.000+08:00' AS b"
        );
    }

    #[test]
    fn interval_uses_auto_bucket() {
        let result = expand(
            "SELECT date_bin($__interval, ts) FROM m",
            &context().with_max_data_points(120),
        );
        assert_eq!(
            result.final_query,
            "SELECT date_bin(INTERVAL '30 seconds', ts) FROM m"
        );
        assert_eq!(
            result.interpolated_variables.get("__interval_short"),
            Some(&"30s".to_string())
        );
    }

    #[test]
    fn missing_time_column_is_reported_once() {
        let ctx = context().with_time_column_fallback(false);
        let result = expand(
            "SELECT $__timeField FROM m WHERE $__timeFilter AND $__timeField > 0",
            &ctx,
        );

        assert!(!result.is_executable());
        assert_eq!(
            result.errors,
            vec![MacroError::MissingTimeColumn {
                macro_token: "$__timeField".to_string()
            }]
        );
        assert_eq!(
            result.final_query,
            "SELECT $__timeField FROM m WHERE $__timeFilter AND $__timeField > 0"
        );
    }

    #[test]
    fn fallback_is_explicit_and_reported() {
        let result = expand("SELECT * FROM m WHERE $__timeFilter", &context());

        assert!(result.is_executable());
        assert_eq!(
            result.interpolated_variables.get(FALLBACK_VARIABLE),
            Some(&"greptime_timestamp".to_string())
        );
        assert!(
            result
                .warnings
                .iter()
                .any(|warning| warning.contains("greptime_timestamp"))
        );
        assert!(result.final_query.starts_with(
            "SELECT * FROM m WHERE greptime_timestamp >= '2026-02-05T06:00:00.000Z'"
        ));
    }

    #[test]
    fn errors_accumulate_and_other_macros_still_expand() {
        let ctx = MacroContext::new("public", TimeRange::last("now-1y"))
            .with_time_column(TimeColumnDescriptor::new("ts", "BIGINT", TimeUnit::Seconds))
            .with_max_data_points(0);
        let result = expand("SELECT $__timeField, $__timeFrom, $__interval FROM m", &ctx);

        assert_eq!(result.errors.len(), 1);
        assert!(matches!(
            result.errors[0],
            MacroError::InvalidDuration { .. }
        ));
        assert_eq!(result.final_query, "SELECT ts, $__timeFrom, $__interval FROM m");
    }

    #[test]
    fn zero_data_points_fail_only_interval() {
        let ctx = context()
            .with_time_column(TimeColumnDescriptor::new("ts", "BIGINT", TimeUnit::Seconds))
            .with_max_data_points(0);
        let result = expand("SELECT $__timeFrom, $__interval FROM m", &ctx);

        assert_eq!(result.final_query, "SELECT 1770271200, $__interval FROM m");
        assert!(matches!(
            result.errors.as_slice(),
            [MacroError::InvalidConfiguration { .. }]
        ));
    }

    #[test]
    fn literals_comments_and_unknown_tokens_are_untouched() {
        let ctx = context().with_time_column(TimeColumnDescriptor::new(
            "ts",
            "BIGINT",
            TimeUnit::Seconds,
        ));
        let result = expand(
            "SELECT '$__timeFilter' AS s, $__unknown -- $__timeTo\nFROM m",
            &ctx,
        );

        assert_eq!(
            result.final_query,
            "SELECT '$__timeFilter' AS s, $__unknown -- $__timeTo\nFROM m"
        );
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("$__unknown"));
    }

    #[test]
    fn unknown_time_zone_falls_back_to_utc() {
        let ctx = context()
            .with_time_column(TimeColumnDescriptor::new("ts", "timestamp", TimeUnit::Auto))
            .with_time_zone("Mars/Olympus");
        let result = expand("SELECT $__timeTo", &ctx);

        assert_eq!(result.final_query, "SELECT '2026-02-05T07:00:00.000Z'");
        assert!(
            result
                .warnings
                .iter()
                .any(|warning| warning.contains("Mars/Olympus"))
        );
    }
}
