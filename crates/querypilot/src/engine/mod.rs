pub mod feedback;

use std::time::Instant;

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;
use crate::executor::{QueryExecutor, duration_ms};
use crate::macros::MacroContext;
use crate::models::{ExecutionProposal, ExecutionResult, Feedback};
use crate::utils::time::format_utc;

pub use feedback::generate_feedback;

/// Runs AI-proposed queries and turns every outcome into an [`ExecutionResult`].
#[derive(Clone)]
pub struct AutoExecutionEngine {
    executor: QueryExecutor,
}

impl AutoExecutionEngine {
    #[must_use]
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// Never fails: errors are classified into the result instead.
    ///
    /// The proposal's database replaces the one in `context`.
    pub async fn execute_proposal(
        &self,
        proposal: &ExecutionProposal,
        context: &MacroContext,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut context = context.clone();
        context.database.clone_from(&proposal.database);

        match self.executor.run(&proposal.query, &context, cancel).await {
            Ok(run) => ExecutionResult {
                success: true,
                row_count: run.outcome.records.len(),
                malformed_lines: run.outcome.metadata.error_lines,
                data: run.outcome.records,
                execution_time_ms: run.duration_ms,
                error: None,
                error_kind: None,
                error_detail: None,
                final_query: Some(run.final_query),
                interpolated_variables: run.interpolated_variables,
                timestamp: format_utc(OffsetDateTime::now_utc()),
            },
            Err(error) => {
                tracing::warn!(kind = error.kind().as_str(), %error, "proposal execution failed");
                ExecutionResult {
                    success: false,
                    data: Vec::new(),
                    row_count: 0,
                    execution_time_ms: duration_ms(started.elapsed()),
                    error: Some(user_message(&error)),
                    error_kind: Some(error.kind()),
                    error_detail: Some(error.to_string()),
                    final_query: error.final_query().map(str::to_string),
                    malformed_lines: 0,
                    interpolated_variables: Default::default(),
                    timestamp: format_utc(OffsetDateTime::now_utc()),
                }
            }
        }
    }

    pub async fn execute_with_feedback(
        &self,
        proposal: &ExecutionProposal,
        context: &MacroContext,
        cancel: &CancellationToken,
    ) -> (ExecutionResult, Feedback) {
        let result = self.execute_proposal(proposal, context, cancel).await;
        let feedback = generate_feedback(&result, proposal);
        (result, feedback)
    }
}

fn user_message(error: &ExecutionError) -> String {
    match error {
        ExecutionError::InvalidQuery { reason } => format!("The query was rejected: {reason}."),
        ExecutionError::MacroExpansion(expansion) => format!(
            "The query's time macros could not be expanded ({} problem(s)).",
            expansion.errors.len()
        ),
        ExecutionError::Backend { message, .. } => {
            format!("The database rejected the query: {message}")
        }
        ExecutionError::Transport { .. } => "The database could not be reached.".to_string(),
        ExecutionError::Timeout { timeout_ms, .. } => {
            format!("The query timed out after {timeout_ms} ms.")
        }
        ExecutionError::Cancelled { .. } => "The query was cancelled.".to_string(),
    }
}
