pub mod envelope;
pub mod execution;

use serde_json::{Value, json};

pub use execution::{
    ChartType, EXECUTION_RESULT_SCHEMA_VERSION, ErrorKind, ExecutionProposal, ExecutionResult,
    Feedback,
};
pub use envelope::{
    CommandFailure, ENVELOPE_SCHEMA_VERSION, Envelope, FailureKind, Notice,
};

use crate::ndjson::ParseOutcome;

/// JSON Schemas of every structured output, keyed by type name.
#[must_use]
pub fn output_json_schema() -> Value {
    json!({
        "Envelope": schema_value(schemars::schema_for!(Envelope)),
        "ExecutionProposal": schema_value(schemars::schema_for!(ExecutionProposal)),
        "ExecutionResult": schema_value(schemars::schema_for!(ExecutionResult)),
        "Feedback": schema_value(schemars::schema_for!(Feedback)),
        "ParseOutcome": schema_value(schemars::schema_for!(ParseOutcome)),
    })
}

fn schema_value(schema: schemars::Schema) -> Value {
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(error) => {
            panic!("failed to serialize generated output schema: {error}");
        }
    }
}
