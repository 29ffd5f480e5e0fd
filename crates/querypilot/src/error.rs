use serde::Serialize;
use thiserror::Error;

use crate::models::ErrorKind;

/// Failures raised while turning a time range or bucket request into concrete values.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ResolveError {
    #[error("invalid duration `{input}`: {reason}")]
    InvalidDuration { input: String, reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

impl ResolveError {
    pub(crate) fn invalid_duration(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

/// A single macro-specific failure. Expansion collects these instead of stopping at the first.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum MacroError {
    #[error("invalid duration `{input}`: {reason}")]
    InvalidDuration { input: String, reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("macro `{macro_token}` requires a time column but none is configured")]
    MissingTimeColumn { macro_token: String },
}

impl From<ResolveError> for MacroError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::InvalidDuration { input, reason } => {
                Self::InvalidDuration { input, reason }
            }
            ResolveError::InvalidConfiguration { reason } => Self::InvalidConfiguration { reason },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("macro expansion failed with {} error(s): {}", .errors.len(), join_messages(.errors))]
pub struct MacroExpansionError {
    pub errors: Vec<MacroError>,

    /// Query text with every macro that could be expanded already substituted.
    pub partial_query: String,
}

/// Outward-facing failures of one execution attempt.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("query rejected before execution: {reason}")]
    InvalidQuery { reason: String },

    #[error(transparent)]
    MacroExpansion(#[from] MacroExpansionError),

    #[error("backend rejected the query with HTTP {status}: {message}")]
    Backend {
        status: u16,
        message: String,
        final_query: String,
    },

    #[error("transport failure: {message}")]
    Transport { message: String, final_query: String },

    #[error("query timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64, final_query: String },

    #[error("query execution was cancelled")]
    Cancelled { final_query: String },
}

impl ExecutionError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidQuery { .. } => ErrorKind::InvalidQuery,
            Self::MacroExpansion(_) => ErrorKind::MacroExpansion,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// SQL that was sent, or would have been sent, to the backend.
    ///
    /// For a macro failure this is the partially expanded text. `None` when the
    /// query was rejected before expansion.
    #[must_use]
    pub fn final_query(&self) -> Option<&str> {
        match self {
            Self::InvalidQuery { .. } => None,
            Self::MacroExpansion(error) => Some(error.partial_query.as_str()),
            Self::Backend { final_query, .. }
            | Self::Transport { final_query, .. }
            | Self::Timeout { final_query, .. }
            | Self::Cancelled { final_query } => Some(final_query.as_str()),
        }
    }
}

fn join_messages(errors: &[MacroError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::{ExecutionError, MacroError, MacroExpansionError, ResolveError};
    use crate::models::ErrorKind;

    #[test]
    fn resolve_errors_convert_into_macro_errors() {
        let converted = MacroError::from(ResolveError::invalid_duration("now-1x", "unknown unit"));
        assert_eq!(
            converted,
            MacroError::InvalidDuration {
                input: "now-1x".to_string(),
                reason: "unknown unit".to_string(),
            }
        );
    }

    #[test]
    fn aggregate_error_lists_every_message() {
        let error = MacroExpansionError {
            errors: vec![
                MacroError::MissingTimeColumn {
                    macro_token: "$__timeFilter".to_string(),
                },
                ResolveError::invalid_configuration("max_data_points must be > 0").into(),
            ],
            partial_query: "SELECT 1".to_string(),
        };

        let rendered = error.to_string();
        assert!(rendered.starts_with("macro expansion failed with 2 error(s)"));
        assert!(rendered.contains("$__timeFilter"));
        assert!(rendered.contains("max_data_points must be > 0"));
    }

    #[test]
    fn macro_errors_serialize_with_code_tag() {
        let encoded = serde_json::to_value(MacroError::MissingTimeColumn {
            macro_token: "$__timeField".to_string(),
        })
        .expect("macro error should serialize");
        assert_eq!(
            encoded.get("code").and_then(|value| value.as_str()),
            Some("missing_time_column")
        );
    }

    #[test]
    fn execution_errors_map_to_kinds() {
        let sent = || "SELECT 1".to_string();
        assert_eq!(
            ExecutionError::Cancelled { final_query: sent() }.kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            ExecutionError::Timeout {
                timeout_ms: 10,
                final_query: sent()
            }
            .kind(),
            ErrorKind::Timeout
        );
        let backend = ExecutionError::Backend {
            status: 400,
            message: "syntax".to_string(),
            final_query: sent(),
        };
        assert_eq!(backend.kind(), ErrorKind::Backend);
        assert_eq!(backend.final_query(), Some("SELECT 1"));
        assert_eq!(
            ExecutionError::InvalidQuery {
                reason: "empty".to_string()
            }
            .final_query(),
            None
        );
    }
}
