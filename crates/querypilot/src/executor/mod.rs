//! Sanitize, expand, send, parse: one query execution end to end.

pub mod transport;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;
use crate::macros::{ExpansionResult, MacroContext, expand};
use crate::ndjson::{ParseOptions, ParseOutcome, StreamingRecordParser};
use crate::sql::sanitize::sanitize;
use crate::utils::content::{derive_excerpt, extract_error_message};

pub use transport::{
    BufferedBody, HttpTransport, QueryTransport, ResponseBody, TransportFailure,
    TransportRequest, TransportResponse,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const BACKEND_MESSAGE_MAX_CHARS: usize = 500;
const BACKEND_BODY_MAX_BYTES: usize = 64 * 1024;

/// A successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRun {
    pub final_query: String,
    pub interpolated_variables: BTreeMap<String, String>,
    pub warnings: Vec<String>,
    pub outcome: ParseOutcome,
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct QueryExecutor {
    transport: Arc<dyn QueryTransport>,
    timeout: Duration,
    parse_options: ParseOptions,
}

impl QueryExecutor {
    #[must_use]
    pub fn new(transport: Arc<dyn QueryTransport>) -> Self {
        Self {
            transport,
            timeout: DEFAULT_TIMEOUT,
            parse_options: ParseOptions::default(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_parse_options(mut self, parse_options: ParseOptions) -> Self {
        self.parse_options = parse_options;
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The pure stage of a run: sanitize, then expand. Nothing is sent.
    ///
    /// `run` starts with this, so previews share its validation.
    pub fn prepare(sql: &str, context: &MacroContext) -> Result<ExpansionResult, ExecutionError> {
        if sql.trim().is_empty() {
            return Err(ExecutionError::InvalidQuery {
                reason: "query text is empty".to_string(),
            });
        }
        if context.database.trim().is_empty() {
            return Err(ExecutionError::InvalidQuery {
                reason: "database name is empty".to_string(),
            });
        }

        let sanitized = sanitize(sql);
        if sanitized != sql {
            tracing::debug!("query sanitized before expansion");
        }
        Ok(expand(&sanitized, context))
    }

    /// Executes `sql` against `context.database`.
    ///
    /// The response body is parsed as it streams in; reading stops once the record cap is
    /// hit. Cancelling `cancel` aborts the in-flight request and discards anything parsed
    /// so far.
    pub async fn run(
        &self,
        sql: &str,
        context: &MacroContext,
        cancel: &CancellationToken,
    ) -> Result<QueryRun, ExecutionError> {
        let started = Instant::now();
        let expansion = Self::prepare(sql, context)?.into_executable()?;
        let final_query = expansion.final_query.clone();

        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled { final_query });
        }

        let request = TransportRequest {
            database: context.database.clone(),
            sql: final_query.clone(),
            timeout: self.timeout,
        };
        tracing::debug!(database = %request.database, "sending query to backend");

        let exchanged = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ExecutionError::Cancelled { final_query }),
            exchanged = tokio::time::timeout(self.timeout, self.exchange(request)) => exchanged,
        };

        let outcome = match exchanged {
            Err(_) | Ok(Err(Exchange::Failed(TransportFailure::Timeout))) => {
                return Err(ExecutionError::Timeout {
                    timeout_ms: duration_ms(self.timeout),
                    final_query,
                });
            }
            Ok(Err(Exchange::Failed(TransportFailure::Connection(message)))) => {
                return Err(ExecutionError::Transport {
                    message,
                    final_query,
                });
            }
            Ok(Err(Exchange::Rejected { status, body })) => {
                return Err(backend_error(status, &body, final_query));
            }
            Ok(Ok(outcome)) => outcome,
        };

        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled { final_query });
        }

        let elapsed_ms = duration_ms(started.elapsed());
        tracing::info!(
            rows = outcome.records.len(),
            malformed = outcome.metadata.error_lines,
            truncated = outcome.metadata.truncated,
            duration_ms = elapsed_ms,
            "query executed"
        );

        Ok(QueryRun {
            final_query: expansion.final_query,
            interpolated_variables: expansion.interpolated_variables,
            warnings: expansion.warnings,
            outcome,
            duration_ms: elapsed_ms,
        })
    }

    async fn exchange(&self, request: TransportRequest) -> Result<ParseOutcome, Exchange> {
        let mut response = self.transport.send(request).await.map_err(Exchange::Failed)?;

        if !response.is_success() {
            let body = response
                .read_text(BACKEND_BODY_MAX_BYTES)
                .await
                .map_err(Exchange::Failed)?;
            return Err(Exchange::Rejected {
                status: response.status,
                body,
            });
        }

        let mut parser = StreamingRecordParser::new(self.parse_options);
        while !parser.is_done() {
            let Some(chunk) = response.body.next_chunk().await.map_err(Exchange::Failed)? else {
                break;
            };
            parser.push_bytes(&chunk);
        }
        if parser.is_done() {
            tracing::debug!("record cap reached; response body left unread");
        }
        Ok(parser.finish())
    }
}

enum Exchange {
    Failed(TransportFailure),
    Rejected { status: u16, body: String },
}

fn backend_error(status: u16, body: &str, final_query: String) -> ExecutionError {
    let message = extract_error_message(body)
        .and_then(|text| derive_excerpt(&text, BACKEND_MESSAGE_MAX_CHARS))
        .unwrap_or_else(|| format!("HTTP {status} with empty body"));
    ExecutionError::Backend {
        status,
        message,
        final_query,
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{QueryExecutor, backend_error};
    use crate::error::ExecutionError;
    use crate::macros::MacroContext;
    use crate::time_range::TimeRange;

    #[test]
    fn prepare_rejects_blank_queries_and_databases() {
        let context = MacroContext::new("public", TimeRange::last("now-1h"));

        let error = QueryExecutor::prepare("   ", &context).expect_err("blank query must fail");
        assert!(matches!(error, ExecutionError::InvalidQuery { .. }));

        let error =
            QueryExecutor::prepare("SELECT 1", &MacroContext::new(" ", TimeRange::last("now-1h")))
                .expect_err("blank database must fail");
        assert!(error.to_string().contains("database name is empty"));
    }

    #[test]
    fn prepare_sanitizes_before_expanding() {
        let context = MacroContext::new("public", TimeRange::last("now-1h"));

        let prepared = QueryExecutor::prepare("SELECT * FROM @public.cpu", &context)
            .expect("query should prepare");
        assert_eq!(prepared.final_query, "SELECT * FROM public.cpu");
    }

    #[test]
    fn backend_errors_carry_extracted_message_and_query() {
        let error = backend_error(
            400,
            r#"{"error":"Column not found: cpu_usage"}"#,
            "SELECT cpu_usage FROM cpu".to_string(),
        );
        assert_eq!(
            error.to_string(),
            "backend rejected the query with HTTP 400: Column not found: cpu_usage"
        );
        assert_eq!(error.final_query(), Some("SELECT cpu_usage FROM cpu"));

        let empty = backend_error(502, "", "SELECT 1".to_string());
        assert!(empty.to_string().contains("HTTP 502 with empty body"));
    }
}
