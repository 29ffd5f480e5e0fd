use clap::{Args, Parser, Subcommand};

use super::commands::{
    expand::ExpandArgs, feedback::FeedbackArgs, parse::ParseArgs, run::RunArgs,
    schema::SchemaArgs,
};
use crate::config::RuntimeOverrides;

#[derive(Debug, Parser)]
#[command(
    name = "querypilot",
    version,
    about = "Time-series SQL templating and result ingestion"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    /// SQL endpoint; falls back to QUERYPILOT_ENDPOINT.
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Request timeout; falls back to QUERYPILOT_TIMEOUT_MS.
    #[arg(long, global = true, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Authorization header value or bare token; falls back to QUERYPILOT_AUTH.
    #[arg(long, global = true, value_name = "CREDENTIAL")]
    pub auth: Option<String>,

    #[arg(long, global = true, value_name = "N")]
    pub max_data_points: Option<u32>,

    #[arg(long, global = true, value_name = "N")]
    pub max_records: Option<usize>,
}

impl RuntimeArgs {
    #[must_use]
    pub fn overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            endpoint: self.endpoint.clone(),
            timeout_ms: self.timeout_ms,
            max_data_points: self.max_data_points,
            max_records: self.max_records,
            auth: self.auth.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sanitize and expand macros without contacting the backend.
    Expand(ExpandArgs),
    /// Parse an NDJSON result document.
    Parse(ParseArgs),
    /// Execute a query and summarize the outcome.
    Run(RunArgs),
    /// Derive feedback from a saved execution result.
    Feedback(FeedbackArgs),
    /// Print the JSON Schemas of the structured outputs.
    Schema(SchemaArgs),
}

impl Command {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Expand(_) => "expand",
            Self::Parse(_) => "parse",
            Self::Run(_) => "run",
            Self::Feedback(_) => "feedback",
            Self::Schema(_) => "schema",
        }
    }
}
