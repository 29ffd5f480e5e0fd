use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::engine::generate_feedback;
use crate::models::{Envelope, ExecutionProposal, ExecutionResult};

use super::{print_envelope, read_input};

#[derive(Debug, Clone, Args)]
pub struct FeedbackArgs {
    /// Saved `ExecutionResult` JSON, `-` for stdin.
    #[arg(value_name = "RESULT")]
    pub result: PathBuf,

    /// `ExecutionProposal` JSON the result came from.
    #[arg(long, value_name = "PATH")]
    pub proposal: Option<PathBuf>,

    /// Print plain text instead of a JSON envelope.
    #[arg(long, default_value_t = false)]
    pub text: bool,
}

pub fn run(args: &FeedbackArgs) -> Result<()> {
    let raw_result = read_input(&args.result)?;
    let result: ExecutionResult = serde_json::from_str(&raw_result)
        .with_context(|| format!("invalid execution result: {}", args.result.display()))?;

    let proposal = match &args.proposal {
        Some(path) => {
            let raw = read_input(path)?;
            serde_json::from_str::<ExecutionProposal>(&raw)
                .with_context(|| format!("invalid execution proposal: {}", path.display()))?
        }
        None => ExecutionProposal::new(
            result.final_query.clone().unwrap_or_default(),
            String::new(),
        ),
    };

    let feedback = generate_feedback(&result, &proposal);
    if args.text {
        println!("{}", feedback.render_text());
        return Ok(());
    }

    print_envelope(&Envelope::success(
        "feedback",
        serde_json::to_value(&feedback).context("failed to encode feedback")?,
    ))
}
