//! Newline-delimited JSON result parsing with per-line fault isolation.

use std::mem;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::content::derive_excerpt;

pub const ERROR_EXCERPT_MAX_CHARS: usize = 120;

/// One result row. Values are always scalars; nested arrays and objects are kept as
/// their compact JSON text.
pub type ParsedRecord = Map<String, Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Stop after this many records and mark the outcome truncated.
    pub max_records: Option<usize>,
}

impl ParseOptions {
    #[must_use]
    pub const fn with_max_records(max_records: usize) -> Self {
        Self {
            max_records: Some(max_records),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ParseLineError {
    /// 1-based, counting blank lines.
    pub line_number: usize,
    pub message: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ParseMetadata {
    pub total_lines: usize,
    pub success_lines: usize,
    pub error_lines: usize,
    pub skipped_lines: usize,
    pub truncated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParseOutcome {
    pub records: Vec<ParsedRecord>,
    pub errors: Vec<ParseLineError>,
    pub metadata: ParseMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    ReadingLine,
    Done,
}

/// Incremental NDJSON parser.
///
/// Feed response chunks with [`push_chunk`](Self::push_chunk) or
/// [`push_bytes`](Self::push_bytes) as they arrive; chunk boundaries may fall anywhere,
/// including inside a line or a UTF-8 sequence. [`finish`](Self::finish) flushes the
/// final unterminated line and returns the outcome.
///
/// Each byte is scanned once; only the unterminated tail of the input is buffered.
#[derive(Debug)]
pub struct StreamingRecordParser {
    options: ParseOptions,
    state: ParserState,
    pending: String,
    utf8_tail: Vec<u8>,
    outcome: ParseOutcome,
}

impl StreamingRecordParser {
    #[must_use]
    pub fn new(options: ParseOptions) -> Self {
        Self {
            options,
            state: ParserState::ReadingLine,
            pending: String::new(),
            utf8_tail: Vec::new(),
            outcome: ParseOutcome::default(),
        }
    }

    pub fn push_chunk(&mut self, chunk: &str) {
        if self.state == ParserState::Done {
            return;
        }

        let mut rest = chunk;
        while self.state == ParserState::ReadingLine {
            let Some(newline) = rest.find('\n') else {
                break;
            };
            let (line, tail) = (&rest[..newline], &rest[newline + 1..]);
            if self.pending.is_empty() {
                self.consume_line(line);
            } else {
                self.pending.push_str(line);
                let joined = mem::take(&mut self.pending);
                self.consume_line(&joined);
            }
            rest = tail;
        }

        if self.state == ParserState::ReadingLine {
            self.pending.push_str(rest);
        }
    }

    /// Raw-byte variant of [`push_chunk`](Self::push_chunk).
    ///
    /// An incomplete UTF-8 sequence at the end of `bytes` is held until the next call.
    /// Invalid sequences become U+FFFD, which then fails that line's JSON decode.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        if self.state == ParserState::Done {
            return;
        }

        let mut buffer = mem::take(&mut self.utf8_tail);
        buffer.extend_from_slice(bytes);
        let mut rest = buffer.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.push_chunk(text);
                    break;
                }
                Err(error) => {
                    let (valid, after) = rest.split_at(error.valid_up_to());
                    self.push_chunk(std::str::from_utf8(valid).unwrap_or_default());
                    match error.error_len() {
                        Some(invalid_len) => {
                            self.push_chunk("\u{FFFD}");
                            rest = &after[invalid_len..];
                        }
                        None => {
                            if self.state == ParserState::ReadingLine {
                                self.utf8_tail = after.to_vec();
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn finish(mut self) -> ParseOutcome {
        if !self.utf8_tail.is_empty() {
            let tail = mem::take(&mut self.utf8_tail);
            self.push_chunk(&String::from_utf8_lossy(&tail));
        }
        if self.state == ParserState::ReadingLine && !self.pending.is_empty() {
            let rest = mem::take(&mut self.pending);
            self.consume_line(&rest);
        }
        self.state = ParserState::Done;
        self.outcome
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == ParserState::Done
    }

    fn consume_line(&mut self, raw_line: &str) {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            self.outcome.metadata.total_lines += 1;
            self.outcome.metadata.skipped_lines += 1;
            return;
        }

        if let Some(max_records) = self.options.max_records
            && self.outcome.records.len() >= max_records
        {
            tracing::warn!(max_records, "record cap reached; remaining input dropped");
            self.outcome.metadata.truncated = true;
            self.outcome.metadata.truncation_note = Some(format!(
                "stopped after {max_records} record(s); remaining input was not parsed"
            ));
            self.pending.clear();
            self.state = ParserState::Done;
            return;
        }

        self.outcome.metadata.total_lines += 1;
        let line_number = self.outcome.metadata.total_lines;

        let parsed = match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => value,
            Err(error) => {
                self.record_error(
                    line_number,
                    format!("invalid JSON payload ({error})"),
                    trimmed,
                );
                return;
            }
        };

        let Value::Object(object) = parsed else {
            self.record_error(line_number, "JSON root must be an object".to_string(), trimmed);
            return;
        };

        self.outcome.records.push(flatten_record(object));
        self.outcome.metadata.success_lines += 1;
    }

    fn record_error(&mut self, line_number: usize, message: String, line: &str) {
        tracing::debug!(line_number, %message, "skipping malformed result line");
        self.outcome.errors.push(ParseLineError {
            line_number,
            message,
            excerpt: derive_excerpt(line, ERROR_EXCERPT_MAX_CHARS).unwrap_or_default(),
        });
        self.outcome.metadata.error_lines += 1;
    }
}

/// Parses a complete NDJSON document in one call.
#[must_use]
pub fn parse_ndjson(text: &str, options: ParseOptions) -> ParseOutcome {
    let mut parser = StreamingRecordParser::new(options);
    parser.push_chunk(text);
    parser.finish()
}

fn flatten_record(object: Map<String, Value>) -> ParsedRecord {
    object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                nested @ (Value::Array(_) | Value::Object(_)) => Value::String(nested.to_string()),
                scalar => scalar,
            };
            (key, value)
        })
        .collect()
}
