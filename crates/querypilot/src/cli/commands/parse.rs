use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use crate::config::RuntimeConfig;
use crate::models::Envelope;
use crate::ndjson::{ParseOptions, parse_ndjson};

use super::{print_envelope, read_input};

#[derive(Debug, Clone, Args)]
pub struct ParseArgs {
    /// NDJSON document, `-` for stdin.
    #[arg(value_name = "PATH", default_value = "-")]
    pub input: PathBuf,
}

pub fn run(args: &ParseArgs, config: &RuntimeConfig) -> Result<()> {
    let text = read_input(&args.input)?;
    let outcome = parse_ndjson(
        &text,
        ParseOptions {
            max_records: config.max_records,
        },
    );

    let mut envelope = Envelope::success(
        "parse",
        serde_json::to_value(&outcome).context("failed to encode parse outcome")?,
    )
    .with_meta("record_count", json!(outcome.records.len()))
    .with_meta("error_lines", json!(outcome.metadata.error_lines));
    if outcome.metadata.error_lines > 0 {
        let line_numbers: Vec<usize> = outcome
            .errors
            .iter()
            .map(|error| error.line_number)
            .collect();
        envelope = envelope.with_detailed_warning(
            "malformed_lines",
            format!(
                "{} line(s) could not be parsed",
                outcome.metadata.error_lines
            ),
            json!({ "line_numbers": line_numbers }),
        );
    }
    if let Some(note) = &outcome.metadata.truncation_note {
        envelope = envelope.with_warning("result_truncated", note);
    }

    print_envelope(&envelope)
}
