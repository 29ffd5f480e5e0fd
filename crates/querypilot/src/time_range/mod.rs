//! Resolution of relative and absolute time windows into concrete bounds.
//!
//! Also hosts the column-unit conversion used when bounds are rendered into SQL and the
//! auto-interval ladder used for downsampling.

use std::sync::OnceLock;
use std::time::Duration as StdDuration;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::error::ResolveError;
use crate::utils::time::{
    EpochUnit, format_rfc3339_millis, infer_epoch_unit, parse_instant, to_epoch,
};

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Bucket widths offered by the auto interval, narrowest first.
pub const INTERVAL_LADDER_MS: &[u64] = &[
    SECOND_MS,
    5 * SECOND_MS,
    10 * SECOND_MS,
    15 * SECOND_MS,
    30 * SECOND_MS,
    MINUTE_MS,
    5 * MINUTE_MS,
    10 * MINUTE_MS,
    15 * MINUTE_MS,
    30 * MINUTE_MS,
    HOUR_MS,
    3 * HOUR_MS,
    6 * HOUR_MS,
    12 * HOUR_MS,
    DAY_MS,
    7 * DAY_MS,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeRange {
    /// Offsets from "now" such as `now-1h`, `30m` or `now`.
    Relative { from: String, to: String },
    Absolute {
        from: OffsetDateTime,
        to: OffsetDateTime,
    },
}

impl TimeRange {
    /// `now-<duration>` to `now`.
    #[must_use]
    pub fn last(duration: &str) -> Self {
        Self::Relative {
            from: duration.to_string(),
            to: "now".to_string(),
        }
    }

    /// Builds a range from user-facing strings.
    ///
    /// Both ends relative gives [`TimeRange::Relative`]; otherwise both must be instants.
    pub fn from_inputs(from: &str, to: &str) -> Result<Self, ResolveError> {
        if is_relative_expression(from) && is_relative_expression(to) {
            return Ok(Self::Relative {
                from: from.trim().to_string(),
                to: to.trim().to_string(),
            });
        }

        let from_instant = parse_instant(from)
            .map_err(|error| ResolveError::invalid_duration(from, format!("{error:#}")))?;
        let to_instant = parse_instant(to)
            .map_err(|error| ResolveError::invalid_duration(to, format!("{error:#}")))?;
        Ok(Self::Absolute {
            from: from_instant,
            to: to_instant,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,

    /// The input had `from > to` and the bounds were swapped.
    pub swapped: bool,
}

impl ResolvedRange {
    #[must_use]
    pub fn span(&self) -> Duration {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    #[serde(alias = "s")]
    Seconds,
    #[serde(alias = "ms")]
    Milliseconds,
    #[serde(alias = "us")]
    Microseconds,
    #[serde(alias = "ns")]
    Nanoseconds,
    #[default]
    Auto,
}

impl TimeUnit {
    #[must_use]
    pub const fn epoch_unit(self) -> Option<EpochUnit> {
        match self {
            Self::Seconds => Some(EpochUnit::Seconds),
            Self::Milliseconds => Some(EpochUnit::Milliseconds),
            Self::Microseconds => Some(EpochUnit::Microseconds),
            Self::Nanoseconds => Some(EpochUnit::Nanoseconds),
            Self::Auto => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimeColumnDescriptor {
    pub name: String,

    #[serde(default)]
    pub data_type: String,

    #[serde(default)]
    pub time_unit: TimeUnit,

    /// One observed value, when the caller has it; sharpens the `auto` heuristic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_value: Option<i64>,
}

impl TimeColumnDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, time_unit: TimeUnit) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            time_unit,
            sample_value: None,
        }
    }

    #[must_use]
    pub fn with_sample_value(mut self, sample_value: i64) -> Self {
        self.sample_value = Some(sample_value);
        self
    }
}

/// How a bound is rendered for a specific column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFormat {
    Epoch(EpochUnit),
    /// Native timestamp/date column; bounds are emitted as quoted RFC 3339 literals.
    Native,
}

impl ColumnFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Epoch(unit) => unit.as_str(),
            Self::Native => "native",
        }
    }
}

pub fn resolve(range: &TimeRange, now: OffsetDateTime) -> Result<ResolvedRange, ResolveError> {
    let (start, end) = match range {
        TimeRange::Relative { from, to } => {
            let from_offset = parse_relative_offset(from, Bound::From)?;
            let to_offset = parse_relative_offset(to, Bound::To)?;
            (
                offset_from(now, from_offset, from)?,
                offset_from(now, to_offset, to)?,
            )
        }
        TimeRange::Absolute { from, to } => (*from, *to),
    };

    if start > end {
        tracing::warn!(%start, %end, "time range resolved with from > to; swapping bounds");
        return Ok(ResolvedRange {
            start: end,
            end: start,
            swapped: true,
        });
    }

    Ok(ResolvedRange {
        start,
        end,
        swapped: false,
    })
}

/// Epoch value of `instant` in the given column unit.
#[must_use]
pub fn to_column_unit(instant: OffsetDateTime, unit: EpochUnit) -> i128 {
    to_epoch(instant, unit)
}

/// Decides how bounds are rendered for `column`.
///
/// Explicit units win. For `auto` this is a best-effort heuristic, because raw integer
/// timestamp columns carry no unit metadata:
/// - timestamp/date/datetime type names are native and never numerically converted;
/// - integer type names use the sample magnitude when one is known, otherwise a 64-bit
///   type that can hold a nanosecond epoch for the current year is read as nanoseconds
///   and anything narrower as seconds;
/// - unknown type names are treated as native.
#[must_use]
pub fn column_format(column: &TimeColumnDescriptor, now: OffsetDateTime) -> ColumnFormat {
    if let Some(unit) = column.time_unit.epoch_unit() {
        return ColumnFormat::Epoch(unit);
    }

    let data_type = column.data_type.trim().to_ascii_lowercase();
    if is_native_time_type(&data_type) {
        return ColumnFormat::Native;
    }
    if !is_integer_type(&data_type) {
        return ColumnFormat::Native;
    }

    if let Some(sample) = column.sample_value {
        return ColumnFormat::Epoch(infer_epoch_unit(i128::from(sample)));
    }

    if holds_current_year_nanos(&data_type, now) {
        ColumnFormat::Epoch(EpochUnit::Nanoseconds)
    } else {
        ColumnFormat::Epoch(EpochUnit::Seconds)
    }
}

/// SQL fragment for one bound.
#[must_use]
pub fn format_bound(instant: OffsetDateTime, format: ColumnFormat, offset: UtcOffset) -> String {
    match format {
        ColumnFormat::Epoch(unit) => to_column_unit(instant, unit).to_string(),
        ColumnFormat::Native => format!("'{}'", format_rfc3339_millis(instant, offset)),
    }
}

/// Smallest ladder bucket that keeps the range within `max_data_points` buckets.
///
/// Ranges wider than the ladder round the raw quotient up to whole days.
pub fn compute_auto_interval(
    start: OffsetDateTime,
    end: OffsetDateTime,
    max_data_points: u32,
) -> Result<StdDuration, ResolveError> {
    if max_data_points == 0 {
        return Err(ResolveError::invalid_configuration(
            "max_data_points must be greater than zero",
        ));
    }

    let span_ms = u128::try_from((end - start).whole_milliseconds()).unwrap_or(0);
    let raw_ms = span_ms.div_ceil(u128::from(max_data_points));

    let bucket_ms = INTERVAL_LADDER_MS
        .iter()
        .copied()
        .find(|step| u128::from(*step) >= raw_ms)
        .map_or_else(
            || {
                let days = raw_ms.div_ceil(u128::from(DAY_MS));
                u64::try_from(days.saturating_mul(u128::from(DAY_MS))).unwrap_or(u64::MAX)
            },
            |step| step,
        );

    Ok(StdDuration::from_millis(bucket_ms))
}

/// `INTERVAL '5 minutes'` style literal using the largest unit that divides evenly.
#[must_use]
pub fn format_interval_literal(interval: StdDuration) -> String {
    let total_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    let (amount, unit) = [
        (DAY_MS, "day"),
        (HOUR_MS, "hour"),
        (MINUTE_MS, "minute"),
        (SECOND_MS, "second"),
    ]
    .iter()
    .find(|(unit_ms, _)| total_ms >= *unit_ms && total_ms % unit_ms == 0)
    .map_or((total_ms, "millisecond"), |(unit_ms, name)| {
        (total_ms / unit_ms, *name)
    });

    let plural = if amount == 1 { "" } else { "s" };
    format!("INTERVAL '{amount} {unit}{plural}'")
}

/// Compact form used in diagnostics, e.g. `5m`, `1h`, `1d`.
#[must_use]
pub fn format_interval_short(interval: StdDuration) -> String {
    let total_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    for (unit_ms, suffix) in [(DAY_MS, "d"), (HOUR_MS, "h"), (MINUTE_MS, "m"), (SECOND_MS, "s")] {
        if total_ms >= unit_ms && total_ms % unit_ms == 0 {
            return format!("{}{suffix}", total_ms / unit_ms);
        }
    }
    format!("{total_ms}ms")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    From,
    To,
}

const RELATIVE_GRAMMAR: &str =
    "expected `now`, `now-<n><unit>` or `<n><unit>` with unit one of s, m, h, d, w";

fn parse_relative_offset(expression: &str, bound: Bound) -> Result<Duration, ResolveError> {
    let trimmed = expression.trim();
    if trimmed == "now" {
        return Ok(Duration::ZERO);
    }

    let body = match trimmed.strip_prefix("now") {
        Some(rest) => rest
            .trim_start()
            .strip_prefix('-')
            .ok_or_else(|| ResolveError::invalid_duration(expression, RELATIVE_GRAMMAR))?
            .trim_start(),
        None => trimmed,
    };
    let Some(captures) = duration_regex().captures(body) else {
        return Err(ResolveError::invalid_duration(expression, RELATIVE_GRAMMAR));
    };

    let amount = captures[1].parse::<i64>().map_err(|error| {
        ResolveError::invalid_duration(expression, format!("invalid amount: {error}"))
    })?;
    let unit_seconds: i64 = match &captures[2] {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        other => {
            return Err(ResolveError::invalid_duration(
                expression,
                format!("unrecognized unit `{other}`"),
            ));
        }
    };

    if bound == Bound::From && amount == 0 {
        return Err(ResolveError::invalid_duration(
            expression,
            "`from` offset must be positive",
        ));
    }

    let seconds = amount
        .checked_mul(unit_seconds)
        .ok_or_else(|| ResolveError::invalid_duration(expression, "duration overflow"))?;
    Ok(Duration::seconds(seconds))
}

fn offset_from(
    now: OffsetDateTime,
    offset: Duration,
    expression: &str,
) -> Result<OffsetDateTime, ResolveError> {
    now.checked_sub(offset).ok_or_else(|| {
        ResolveError::invalid_duration(expression, "offset reaches past the supported date range")
    })
}

fn is_relative_expression(expression: &str) -> bool {
    let trimmed = expression.trim();
    trimmed.starts_with("now") || duration_regex().is_match(trimmed)
}

fn duration_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^(\d+)\s*([A-Za-z]+)$").expect("duration regex must compile")
    })
}

fn is_native_time_type(data_type: &str) -> bool {
    ["timestamp", "datetime", "date", "time"]
        .iter()
        .any(|marker| data_type.contains(marker))
}

/// Whole-token match, so `interval` or `point` never count as integers.
fn is_integer_type(data_type: &str) -> bool {
    data_type
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .any(|token| {
            matches!(
                token,
                "bigint"
                    | "smallint"
                    | "tinyint"
                    | "mediumint"
                    | "integer"
                    | "int"
                    | "uint"
                    | "long"
                    | "serial"
                    | "bigserial"
                    | "smallserial"
            ) || ["int", "uint"].iter().any(|prefix| {
                token.strip_prefix(prefix).is_some_and(|width| {
                    !width.is_empty() && width.bytes().all(|byte| byte.is_ascii_digit())
                })
            })
        })
}

fn holds_current_year_nanos(data_type: &str, now: OffsetDateTime) -> bool {
    let is_wide = data_type.contains("64")
        || data_type.contains("bigint")
        || data_type.contains("int8")
        || data_type.contains("long")
        || data_type.contains("bigserial");
    if !is_wide {
        return false;
    }

    let unsigned = data_type.contains("uint") || data_type.contains("unsigned");
    let limit = if unsigned {
        i128::from(u64::MAX)
    } else {
        i128::from(i64::MAX)
    };
    let year_end = now
        .replace_date(
            time::Date::from_calendar_date(now.year() + 1, time::Month::January, 1)
                .unwrap_or(now.date()),
        )
        .replace_time(time::Time::MIDNIGHT);
    to_epoch(year_end, EpochUnit::Nanoseconds) <= limit
}
