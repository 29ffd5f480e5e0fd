#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use querypilot::cli::app::{Cli, Command, RuntimeArgs};
use querypilot::cli::commands;
use querypilot::config::{RuntimeConfig, resolve_runtime_config};
use querypilot::models::{CommandFailure, FailureKind};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_QUERY_FAILURE: i32 = 2;
const EXIT_USAGE_ERROR: i32 = 64;

const LOG_FILTER_ENV: &str = "QUERYPILOT_LOG";

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    init_tracing();

    let command_name = cli.command.name();
    tracing::info!(command = command_name, "starting");

    match execute(cli) {
        Ok(()) => {
            tracing::info!(command = command_name, exit_code = EXIT_SUCCESS, "completed");
            EXIT_SUCCESS
        }
        Err(error) => {
            let exit_code = classify_runtime_error(&error);
            tracing::error!(command = command_name, exit_code, "failed");
            eprintln!("{error:#}");
            exit_code
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn execute(cli: Cli) -> Result<()> {
    let Cli { runtime, command } = cli;
    match command {
        Command::Expand(args) => commands::expand::run(&args, &runtime_config(&runtime)?),
        Command::Parse(args) => commands::parse::run(&args, &runtime_config(&runtime)?),
        Command::Run(args) => commands::run::run(&args, &runtime_config(&runtime)?),
        Command::Feedback(args) => commands::feedback::run(&args),
        Command::Schema(args) => commands::schema::run(&args),
    }
}

fn runtime_config(runtime: &RuntimeArgs) -> Result<RuntimeConfig> {
    resolve_runtime_config(&runtime.overrides(), |key| std::env::var(key).ok())
}

fn classify_runtime_error(error: &anyhow::Error) -> i32 {
    match error
        .downcast_ref::<CommandFailure>()
        .map(CommandFailure::kind)
    {
        Some(FailureKind::QueryContent) => EXIT_QUERY_FAILURE,
        Some(FailureKind::Runtime) | None => EXIT_RUNTIME_FAILURE,
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}
