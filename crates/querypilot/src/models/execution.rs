use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ndjson::ParsedRecord;

pub const EXECUTION_RESULT_SCHEMA_VERSION: &str = "querypilot.execution-result.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Bar,
    Area,
    Scatter,
    Pie,
    Table,
    #[serde(other)]
    Other,
}

impl ChartType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Bar => "bar",
            Self::Area => "area",
            Self::Scatter => "scatter",
            Self::Pie => "pie",
            Self::Table => "table",
            Self::Other => "other",
        }
    }

    /// Chart types that plot values along a time or category axis.
    #[must_use]
    pub const fn needs_x_axis(self) -> bool {
        matches!(self, Self::Line | Self::Area | Self::Scatter)
    }
}

/// An AI-proposed query plus the chart it is meant to feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionProposal {
    pub query: String,
    pub database: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<ChartType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_axis: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub y_axes: Vec<String>,
}

impl ExecutionProposal {
    #[must_use]
    pub fn new(query: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            database: database.into(),
            chart_type: None,
            x_axis: None,
            y_axes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_chart(
        mut self,
        chart_type: ChartType,
        x_axis: Option<&str>,
        y_axes: &[&str],
    ) -> Self {
        self.chart_type = Some(chart_type);
        self.x_axis = x_axis.map(str::to_string);
        self.y_axes = y_axes.iter().map(|axis| (*axis).to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidQuery,
    MacroExpansion,
    Backend,
    Transport,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidQuery => "invalid_query",
            Self::MacroExpansion => "macro_expansion",
            Self::Backend => "backend",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// The query text itself is at fault, as opposed to the environment it ran in.
    #[must_use]
    pub const fn is_query_content(self) -> bool {
        matches!(
            self,
            Self::InvalidQuery | Self::MacroExpansion | Self::Backend
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Vec<ParsedRecord>,
    pub row_count: usize,
    pub execution_time_ms: u64,

    /// Short message suitable for end users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Technical detail for debug views.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    /// SQL that was (or would have been) sent to the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_query: Option<String>,

    #[serde(default)]
    pub malformed_lines: usize,

    #[serde(default)]
    pub interpolated_variables: BTreeMap<String, String>,

    pub timestamp: String,
}

impl ExecutionResult {
    #[must_use]
    pub fn numeric_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for record in &self.data {
            for (key, value) in record {
                if value.is_number() && !columns.contains(&key.as_str()) {
                    columns.push(key.as_str());
                }
            }
        }
        columns
    }

    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.data.iter().any(|record| record.contains_key(field))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Feedback {
    pub summary: String,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub follow_up_questions: Vec<String>,
}
