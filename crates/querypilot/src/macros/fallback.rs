//! Time column guessing for queries whose context names no time column.
//!
//! This path is only taken when the caller allows it, and every use is reported back
//! through the expansion result so the guess never goes unnoticed.

use std::sync::OnceLock;

use regex::Regex;

use crate::sql::spans::code_text;

use super::DEFAULT_TIME_COLUMN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackSource {
    /// Second argument of `date_bin`, `date_trunc` or `time_bucket`.
    BucketFunction,
    /// Operand of a range comparison.
    Comparison,
    OrderBy,
    Default,
}

impl FallbackSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BucketFunction => "bucket_function",
            Self::Comparison => "comparison",
            Self::OrderBy => "order_by",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeFieldFallback {
    pub name: String,
    pub source: FallbackSource,
}

/// Scans code spans for an identifier that looks like the time column.
#[must_use]
pub fn guess_time_field(sql: &str) -> Option<TimeFieldFallback> {
    let code = code_text(sql);

    if let Some(name) = bucket_function_regex()
        .captures_iter(&code)
        .map(|captures| captures[1].to_string())
        .next()
    {
        return Some(TimeFieldFallback {
            name,
            source: FallbackSource::BucketFunction,
        });
    }

    let time_like = |regex: &Regex| {
        regex
            .captures_iter(&code)
            .map(|captures| captures[1].to_string())
            .find(|identifier| is_time_like(identifier))
    };

    if let Some(name) = time_like(comparison_regex()) {
        return Some(TimeFieldFallback {
            name,
            source: FallbackSource::Comparison,
        });
    }

    time_like(order_by_regex()).map(|name| TimeFieldFallback {
        name,
        source: FallbackSource::OrderBy,
    })
}

/// The guessed column, or the backend's conventional default.
#[must_use]
pub fn fallback_time_field(sql: &str) -> TimeFieldFallback {
    guess_time_field(sql).unwrap_or_else(|| TimeFieldFallback {
        name: DEFAULT_TIME_COLUMN.to_string(),
        source: FallbackSource::Default,
    })
}

fn is_time_like(identifier: &str) -> bool {
    let column = identifier
        .rsplit('.')
        .next()
        .unwrap_or(identifier)
        .to_ascii_lowercase();

    column == "ts"
        || column.contains("time")
        || column.contains("date")
        || column.ends_with("_at")
        || column.ends_with("_ts")
        || column.starts_with("ts_")
}

fn bucket_function_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:date_bin|date_trunc|time_bucket)\s*\(\s*[^,()]*,\s*([A-Za-z_][A-Za-z0-9_.]*)",
        )
        .expect("bucket function regex must compile")
    })
}

fn comparison_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)\b([A-Za-z_][A-Za-z0-9_.]*)\s*(?:>=|<=|>|<|\bBETWEEN\b)")
            .expect("comparison regex must compile")
    })
}

fn order_by_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)\border\s+by\s+([A-Za-z_][A-Za-z0-9_.]*)")
            .expect("order by regex must compile")
    })
}

#[cfg(test)]
mod tests {
    use super::{FallbackSource, fallback_time_field, guess_time_field};

    #[test]
    fn prefers_bucket_function_argument() {
        let guess = guess_time_field(
            "SELECT date_bin(INTERVAL '1 minute', ts) AS t, avg(v) FROM m \
             WHERE created_at > now() - INTERVAL '1 hour' GROUP BY t",
        )
        .expect("bucket argument should be found");
        assert_eq!(guess.name, "ts");
        assert_eq!(guess.source, FallbackSource::BucketFunction);
    }

    #[test]
    fn falls_back_to_time_like_comparison_operand() {
        let guess = guess_time_field("SELECT * FROM m WHERE v > 3 AND m.event_time >= $__timeFrom")
            .expect("comparison operand should be found");
        assert_eq!(guess.name, "m.event_time");
        assert_eq!(guess.source, FallbackSource::Comparison);
    }

    #[test]
    fn uses_order_by_column_last() {
        let guess = guess_time_field("SELECT host, cpu FROM m ORDER BY collected_at DESC")
            .expect("order by column should be found");
        assert_eq!(guess.name, "collected_at");
        assert_eq!(guess.source, FallbackSource::OrderBy);
    }

    #[test]
    fn ignores_identifiers_inside_literals() {
        assert_eq!(
            guess_time_field("SELECT 'ORDER BY updated_at' FROM m WHERE $__timeFilter"),
            None
        );
    }

    #[test]
    fn default_applies_when_nothing_matches() {
        let fallback = fallback_time_field("SELECT * FROM m WHERE $__timeFilter");
        assert_eq!(fallback.name, "greptime_timestamp");
        assert_eq!(fallback.source, FallbackSource::Default);
    }
}
