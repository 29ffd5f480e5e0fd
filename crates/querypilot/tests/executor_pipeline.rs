use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use querypilot::engine::AutoExecutionEngine;
use querypilot::error::ExecutionError;
use querypilot::executor::{
    QueryExecutor, QueryTransport, ResponseBody, TransportFailure, TransportRequest,
    TransportResponse,
};
use querypilot::macros::MacroContext;
use querypilot::models::{ErrorKind, ExecutionProposal};
use querypilot::ndjson::ParseOptions;
use querypilot::time_range::{TimeColumnDescriptor, TimeRange, TimeUnit};
use serde_json::json;
use time::macros::datetime;
use tokio_util::sync::CancellationToken;

/// Hands out pre-split chunks and counts how many were pulled.
struct ChunkedBody {
    chunks: VecDeque<Vec<u8>>,
    pulled: Arc<AtomicUsize>,
}

#[async_trait]
impl ResponseBody for ChunkedBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportFailure> {
        let chunk = self.chunks.pop_front();
        if chunk.is_some() {
            self.pulled.fetch_add(1, Ordering::SeqCst);
        }
        Ok(chunk)
    }
}

struct FakeTransport {
    reply: Result<(u16, Vec<Vec<u8>>), TransportFailure>,
    delay: Duration,
    requests: Mutex<Vec<TransportRequest>>,
    pulled: Arc<AtomicUsize>,
}

impl FakeTransport {
    fn ok(body: &str) -> Arc<Self> {
        Self::with_status(200, body)
    }

    fn with_status(status: u16, body: &str) -> Arc<Self> {
        Self::with_reply(Ok((status, vec![body.as_bytes().to_vec()])))
    }

    fn chunked(chunks: Vec<Vec<u8>>) -> Arc<Self> {
        Self::with_reply(Ok((200, chunks)))
    }

    fn failing(failure: TransportFailure) -> Arc<Self> {
        Self::with_reply(Err(failure))
    }

    fn with_reply(reply: Result<(u16, Vec<Vec<u8>>), TransportFailure>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            pulled: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok((200, vec![b"{\"a\":1}".to_vec()])),
            delay,
            requests: Mutex::new(Vec::new()),
            pulled: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("request log lock").clone()
    }

    fn chunks_pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryTransport for FakeTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure> {
        self.requests.lock().expect("request log lock").push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let (status, chunks) = self.reply.clone()?;
        Ok(TransportResponse {
            status,
            body: Box::new(ChunkedBody {
                chunks: chunks.into(),
                pulled: Arc::clone(&self.pulled),
            }),
        })
    }
}

fn context() -> MacroContext {
    MacroContext::new("metrics", TimeRange::last("now-1h"))
        .with_now(datetime!(2026-02-05 07:00:00 UTC))
        .with_time_column(TimeColumnDescriptor::new("ts", "BIGINT", TimeUnit::Milliseconds))
}

#[tokio::test]
async fn sends_expanded_sql_once_and_parses_rows() {
    let transport = FakeTransport::ok("{\"ts\":1,\"v\":2}\n{\"ts\":2,\"v\":3}\noops\n");
    let executor = QueryExecutor::new(transport.clone());

    let run = executor
        .run(
            "SELECT * FROM @metrics.cpu WHERE $__timeFilter(ts)",
            &context(),
            &CancellationToken::new(),
        )
        .await
        .expect("run should succeed");

    assert_eq!(
        run.final_query,
        "SELECT * FROM metrics.cpu WHERE ts >= 1770271200000 AND ts <= 1770274800000"
    );
    assert_eq!(run.outcome.records.len(), 2);
    assert_eq!(run.outcome.metadata.error_lines, 1);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].database, "metrics");
    assert_eq!(requests[0].sql, run.final_query);
    assert_eq!(requests[0].timeout, Duration::from_secs(30));
}

#[tokio::test]
async fn macro_errors_stop_before_the_network() {
    let transport = FakeTransport::ok("{}");
    let executor = QueryExecutor::new(transport.clone());
    let ctx = MacroContext::new("metrics", TimeRange::last("now-1h")).with_time_column_fallback(false);

    let error = executor
        .run("SELECT $__timeFilter", &ctx, &CancellationToken::new())
        .await
        .expect_err("missing time column must fail");

    assert!(matches!(error, ExecutionError::MacroExpansion(_)));
    assert_eq!(error.final_query(), Some("SELECT $__timeFilter"));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn non_success_status_becomes_backend_error() {
    let transport =
        FakeTransport::with_status(400, "{\"code\":1004,\"error\":\"Table not found: cpu\"}");
    let executor = QueryExecutor::new(transport);

    let error = executor
        .run("SELECT * FROM @metrics.cpu", &context(), &CancellationToken::new())
        .await
        .expect_err("400 must fail");

    match error {
        ExecutionError::Backend {
            status,
            message,
            final_query,
        } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Table not found: cpu");
            assert_eq!(final_query, "SELECT * FROM metrics.cpu");
        }
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn transport_failures_keep_their_kind() {
    let refused = QueryExecutor::new(FakeTransport::failing(TransportFailure::Connection(
        "connection refused".to_string(),
    )));
    let error = refused
        .run("SELECT 1", &context(), &CancellationToken::new())
        .await
        .expect_err("connection failure must fail");
    assert!(matches!(error, ExecutionError::Transport { .. }));
    assert_eq!(error.final_query(), Some("SELECT 1"));

    let timed_out = QueryExecutor::new(FakeTransport::failing(TransportFailure::Timeout));
    let error = timed_out
        .run("SELECT 1", &context(), &CancellationToken::new())
        .await
        .expect_err("transport timeout must fail");
    assert!(matches!(error, ExecutionError::Timeout { timeout_ms: 30_000, .. }));
}

#[tokio::test]
async fn slow_backend_times_out() {
    let executor = QueryExecutor::new(FakeTransport::slow(Duration::from_secs(5)))
        .with_timeout(Duration::from_millis(20));

    let error = executor
        .run("SELECT 1", &context(), &CancellationToken::new())
        .await
        .expect_err("slow backend must time out");

    assert!(matches!(error, ExecutionError::Timeout { timeout_ms: 20, .. }));
    assert_eq!(error.final_query(), Some("SELECT 1"));
}

#[tokio::test]
async fn cancellation_is_distinct_from_timeout() {
    let executor = QueryExecutor::new(FakeTransport::slow(Duration::from_secs(5)));
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let error = executor
        .run("SELECT 1", &context(), &cancel)
        .await
        .expect_err("cancelled run must fail");
    assert!(matches!(error, ExecutionError::Cancelled { .. }));
    assert_eq!(error.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn pre_cancelled_token_never_sends() {
    let transport = FakeTransport::ok("{}");
    let executor = QueryExecutor::new(transport.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = executor
        .run("SELECT 1", &context(), &cancel)
        .await
        .expect_err("cancelled run must fail");
    assert!(matches!(error, ExecutionError::Cancelled { .. }));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn record_cap_marks_truncation() {
    let executor = QueryExecutor::new(FakeTransport::ok("{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n"))
        .with_parse_options(ParseOptions::with_max_records(2));

    let run = executor
        .run("SELECT 1", &context(), &CancellationToken::new())
        .await
        .expect("run should succeed");
    assert_eq!(run.outcome.records.len(), 2);
    assert!(run.outcome.metadata.truncated);
}

#[tokio::test]
async fn engine_classifies_failures_without_erroring() {
    let engine = AutoExecutionEngine::new(QueryExecutor::new(FakeTransport::with_status(
        500,
        "internal error",
    )));
    let proposal = ExecutionProposal::new("SELECT * FROM cpu", "metrics");

    let result = engine
        .execute_proposal(&proposal, &context(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Backend));
    assert_eq!(result.row_count, 0);
    assert!(result.data.is_empty());
    assert!(
        result
            .error
            .as_deref()
            .is_some_and(|message| message.contains("internal error"))
    );
    assert!(
        result
            .error_detail
            .as_deref()
            .is_some_and(|detail| detail.contains("HTTP 500"))
    );
    assert_eq!(result.final_query.as_deref(), Some("SELECT * FROM cpu"));
}

#[tokio::test]
async fn engine_uses_proposal_database_and_reports_success() {
    let transport = FakeTransport::ok("{\"host\":\"a\",\"cpu\":10}\n{\"host\":\"b\",\"cpu\":20}\n");
    let engine = AutoExecutionEngine::new(QueryExecutor::new(transport.clone()));
    let proposal = ExecutionProposal::new("SELECT host, cpu FROM cpu WHERE $__timeFilter", "ops");

    let (result, feedback) = engine
        .execute_with_feedback(&proposal, &context(), &CancellationToken::new())
        .await;

    assert!(result.success);
    assert_eq!(result.row_count, 2);
    assert_eq!(result.data[1].get("cpu"), Some(&json!(20)));
    assert_eq!(
        result.interpolated_variables.get("__timeFilter").map(String::as_str),
        Some("ts >= 1770271200000 AND ts <= 1770274800000")
    );
    assert_eq!(transport.requests()[0].database, "ops");
    assert!(feedback.summary.starts_with("Query returned 2 row(s)"));
}

#[tokio::test]
async fn engine_reports_macro_failures_with_partial_query() {
    let engine = AutoExecutionEngine::new(QueryExecutor::new(FakeTransport::ok("{}")));
    let proposal = ExecutionProposal::new("SELECT $__timeFrom FROM t", "metrics");
    let ctx = MacroContext::new("metrics", TimeRange::last("now-3y"));

    let result = engine
        .execute_proposal(&proposal, &ctx, &CancellationToken::new())
        .await;

    assert_eq!(result.error_kind, Some(ErrorKind::MacroExpansion));
    assert_eq!(result.final_query.as_deref(), Some("SELECT $__timeFrom FROM t"));
}

#[tokio::test]
async fn streamed_chunks_may_split_lines_and_characters() {
    let body = "{\"city\":\"Zürich\"}\n{\"city\":\"Köln\"}\n".as_bytes();
    let split = body
        .iter()
        .position(|byte| *byte >= 0x80)
        .expect("body has a multibyte character")
        + 1;
    let transport = FakeTransport::chunked(vec![body[..split].to_vec(), body[split..].to_vec()]);

    let run = QueryExecutor::new(transport)
        .run("SELECT city FROM t", &context(), &CancellationToken::new())
        .await
        .expect("run should succeed");

    assert_eq!(run.outcome.metadata.error_lines, 0);
    assert_eq!(run.outcome.records[0].get("city"), Some(&json!("Zürich")));
    assert_eq!(run.outcome.records[1].get("city"), Some(&json!("Köln")));
}

#[tokio::test]
async fn record_cap_stops_reading_the_body() {
    let chunks = (0..10)
        .map(|index| format!("{{\"a\":{index}}}\n").into_bytes())
        .collect();
    let transport = FakeTransport::chunked(chunks);
    let executor = QueryExecutor::new(transport.clone())
        .with_parse_options(ParseOptions::with_max_records(2));

    let run = executor
        .run("SELECT a FROM t", &context(), &CancellationToken::new())
        .await
        .expect("run should succeed");

    assert_eq!(run.outcome.records.len(), 2);
    assert!(run.outcome.metadata.truncated);
    assert_eq!(transport.chunks_pulled(), 3);
}
