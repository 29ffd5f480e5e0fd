use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;

use super::execution::ErrorKind;
use crate::utils::time::format_utc;

pub const ENVELOPE_SCHEMA_VERSION: &str = "querypilot.envelope.v1";

/// A coded message attached to an envelope, used for both warnings and the failure cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Notice {
    pub code: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Notice {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}

/// JSON document every CLI command prints, on stdout when it succeeds and on stderr when it fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Envelope {
    pub ok: bool,
    pub command: String,
    pub generated_at_utc: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    pub meta: BTreeMap<String, Value>,

    #[serde(default)]
    pub warnings: Vec<Notice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Notice>,
}

impl Envelope {
    #[must_use]
    pub fn success(command: impl Into<String>, data: Value) -> Self {
        let mut envelope = Self::stamped(command.into(), true);
        envelope.data = Some(data);
        envelope
    }

    #[must_use]
    pub fn failure(
        command: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut envelope = Self::stamped(command.into(), false);
        envelope.error = Some(Notice::new(code, message));
        envelope
    }

    fn stamped(command: String, ok: bool) -> Self {
        Self {
            ok,
            command,
            generated_at_utc: format_utc(OffsetDateTime::now_utc()),
            data: None,
            meta: BTreeMap::from([("schema_version".to_string(), json!(ENVELOPE_SCHEMA_VERSION))]),
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Failure envelopes keep whatever partial data the command produced.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_warning(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.warnings.push(Notice::new(code, message));
        self
    }

    #[must_use]
    pub fn with_detailed_warning(
        mut self,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        let mut notice = Notice::new(code, message);
        notice.details = Some(details);
        self.warnings.push(notice);
        self
    }

    /// No-op on a successful envelope.
    #[must_use]
    pub fn with_error_details(mut self, details: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.details = Some(details);
        }
        self
    }

    /// Wraps a failed envelope so the binary can print it and pick an exit code.
    #[must_use]
    pub fn into_error(self, kind: FailureKind) -> anyhow::Error {
        anyhow::Error::new(CommandFailure {
            envelope: self,
            kind,
        })
    }
}

/// Whether a failed command was let down by the query text or by its environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    QueryContent,
    Runtime,
}

impl From<ErrorKind> for FailureKind {
    fn from(kind: ErrorKind) -> Self {
        if kind.is_query_content() {
            Self::QueryContent
        } else {
            Self::Runtime
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandFailure {
    envelope: Envelope,
    kind: FailureKind,
}

impl CommandFailure {
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.kind
    }
}

impl Display for CommandFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.envelope) {
            Ok(encoded) => f.write_str(&encoded),
            Err(_) => f.write_str("envelope serialization failure"),
        }
    }
}

impl std::error::Error for CommandFailure {}
