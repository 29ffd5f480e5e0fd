#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod macros;
pub mod models;
pub mod ndjson;
pub mod sql;
pub mod time_range;
pub mod utils;

pub use cli::app::{Cli, Command};
pub use engine::{AutoExecutionEngine, generate_feedback};
pub use error::{ExecutionError, MacroError, MacroExpansionError, ResolveError};
pub use executor::{QueryExecutor, QueryRun, QueryTransport};
pub use macros::{ExpansionResult, MacroContext, expand};
pub use ndjson::{ParseOptions, ParseOutcome, StreamingRecordParser, parse_ndjson};
pub use time_range::{TimeColumnDescriptor, TimeRange, TimeUnit};
