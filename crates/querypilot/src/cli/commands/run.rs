use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::engine::AutoExecutionEngine;
use crate::executor::{HttpTransport, QueryExecutor};
use crate::models::{ChartType, Envelope, ErrorKind, ExecutionProposal, FailureKind};
use crate::ndjson::ParseOptions;

use super::expand::QueryArgs;
use super::print_envelope;

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    #[arg(long, value_name = "TYPE", value_parser = parse_chart_type)]
    pub chart_type: Option<ChartType>,

    #[arg(long, value_name = "FIELD")]
    pub x_axis: Option<String>,

    #[arg(long = "y-axis", value_name = "FIELD")]
    pub y_axes: Vec<String>,

    /// Also print the feedback as plain text on stderr.
    #[arg(long, default_value_t = false)]
    pub text: bool,
}

impl RunArgs {
    pub fn proposal(&self) -> Result<ExecutionProposal> {
        Ok(ExecutionProposal {
            query: self.query.sql_text()?,
            database: self.query.database.clone(),
            chart_type: self.chart_type,
            x_axis: self.x_axis.clone(),
            y_axes: self.y_axes.clone(),
        })
    }
}

pub fn run(args: &RunArgs, config: &RuntimeConfig) -> Result<()> {
    let proposal = args.proposal()?;
    let context = args.query.macro_context(config)?;

    let transport = HttpTransport::new(&config.endpoint, config.auth_header.clone())
        .context("failed to build http transport")?;
    let executor = QueryExecutor::new(Arc::new(transport))
        .with_timeout(config.timeout)
        .with_parse_options(ParseOptions {
            max_records: config.max_records,
        });
    let engine = AutoExecutionEngine::new(executor);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let cancel = CancellationToken::new();
    let (result, feedback) = runtime.block_on(async {
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; cancelling query");
                interrupt.cancel();
            }
        });
        engine
            .execute_with_feedback(&proposal, &context, &cancel)
            .await
    });

    if args.text {
        eprintln!("{}", feedback.render_text());
    }

    let data = json!({
        "result": serde_json::to_value(&result).context("failed to encode execution result")?,
        "feedback": serde_json::to_value(&feedback).context("failed to encode feedback")?,
    });

    if !result.success {
        let kind = result.error_kind.unwrap_or(ErrorKind::Transport);
        let envelope = Envelope::failure(
            "run",
            kind.as_str(),
            result.error.clone().unwrap_or_default(),
        )
        .with_data(data)
        .with_meta("duration_ms", json!(result.execution_time_ms))
        .with_error_details(json!({ "detail": result.error_detail }));
        return Err(envelope.into_error(FailureKind::from(kind)));
    }

    let envelope = Envelope::success("run", data)
        .with_meta("row_count", json!(result.row_count))
        .with_meta("duration_ms", json!(result.execution_time_ms))
        .with_meta("malformed_lines", json!(result.malformed_lines));
    print_envelope(&envelope)
}

pub(crate) fn parse_chart_type(raw: &str) -> Result<ChartType, String> {
    let chart_type: ChartType =
        serde_json::from_value(Value::String(raw.trim().to_ascii_lowercase()))
            .map_err(|error| error.to_string())?;
    if chart_type == ChartType::Other {
        return Err(format!(
            "unknown chart type `{raw}` (expected line, bar, area, scatter, pie or table)"
        ));
    }
    Ok(chart_type)
}
