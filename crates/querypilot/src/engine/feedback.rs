//! Deterministic feedback derived from the shape of an execution result.

use std::fmt::Write as _;

use serde_json::Value;

use crate::models::{ChartType, ErrorKind, ExecutionProposal, ExecutionResult, Feedback};

/// Results above this row count get sampling or aggregation advice.
pub const LARGE_RESULT_ROWS: usize = 1_000;

/// First-to-last change within this percentage reads as stable.
pub const STABLE_TREND_PCT: f64 = 5.0;

pub const PIE_MAX_SLICES: usize = 12;

#[must_use]
pub fn generate_feedback(result: &ExecutionResult, proposal: &ExecutionProposal) -> Feedback {
    if !result.success {
        return failure_feedback(result);
    }

    let mut feedback = Feedback {
        summary: if result.row_count == 0 {
            "Query succeeded but returned no rows.".to_string()
        } else {
            format!(
                "Query returned {} row(s) in {} ms.",
                result.row_count, result.execution_time_ms
            )
        },
        ..Feedback::default()
    };

    if result.row_count == 0 {
        feedback
            .insights
            .push("No data returned for the selected time range and filters.".to_string());
        feedback
            .recommendations
            .push("Widen the time range or relax the WHERE filters.".to_string());
        feedback
            .follow_up_questions
            .push("Should I retry with a wider time range?".to_string());
    }

    if result.row_count > LARGE_RESULT_ROWS {
        feedback.insights.push(format!(
            "Large result set: {} rows exceeds the {LARGE_RESULT_ROWS}-row display budget.",
            result.row_count
        ));
        feedback.recommendations.push(
            "Aggregate into `$__interval` buckets or add a LIMIT to sample the result.".to_string(),
        );
    }

    if let Some(column) = designated_numeric_column(result, proposal) {
        describe_numeric_column(result, column, &mut feedback);
    }

    if result.row_count > 0 {
        check_axis_fields(result, proposal, &mut feedback);
        feedback
            .follow_up_questions
            .push("Would you like to break this down by another dimension?".to_string());
    }

    if result.malformed_lines > 0 {
        feedback.insights.push(format!(
            "{} malformed result line(s) were skipped while parsing.",
            result.malformed_lines
        ));
        feedback.recommendations.push(
            "Inspect the raw backend response for truncated or non-JSON rows.".to_string(),
        );
    }

    check_chart_fit(result, proposal, &mut feedback);
    feedback
}

impl Feedback {
    /// Plain-text rendering for terminals and logs. Empty sections are omitted.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut rendered = self.summary.clone();
        for (title, items) in [
            ("Insights", &self.insights),
            ("Recommendations", &self.recommendations),
            ("Follow-up questions", &self.follow_up_questions),
        ] {
            if items.is_empty() {
                continue;
            }
            let _ = write!(rendered, "\n\n{title}:");
            for item in items {
                let _ = write!(rendered, "\n- {item}");
            }
        }
        rendered
    }
}

fn failure_feedback(result: &ExecutionResult) -> Feedback {
    let kind = result.error_kind;
    let message = result.error.as_deref().unwrap_or("unknown error");
    let summary = match kind {
        Some(kind) => format!("Query failed ({}): {message}", kind.as_str()),
        None => format!("Query failed: {message}"),
    };

    let (recommendations, follow_up_questions): (&[&str], &[&str]) = match kind {
        Some(ErrorKind::InvalidQuery) => (
            &["Provide a non-empty query and a database name."],
            &["Would you like me to draft the query again?"],
        ),
        Some(ErrorKind::MacroExpansion) => (
            &[
                "Configure a time column for this table or remove the time macros.",
                "Check the time range expression, e.g. `now-1h`.",
            ],
            &["Which column holds the timestamp for this table?"],
        ),
        Some(ErrorKind::Backend) => (
            &[
                "Check table and column names against the database schema.",
                "Simplify the query and re-run it to isolate the failing clause.",
            ],
            &["Would you like me to rewrite the query?"],
        ),
        Some(ErrorKind::Transport) => (
            &["Verify the database endpoint is reachable, then retry."],
            &["Should I retry the query?"],
        ),
        Some(ErrorKind::Timeout) => (
            &[
                "Narrow the time range or aggregate with `$__interval` to reduce the work per query.",
            ],
            &["Should I retry with a shorter time range?"],
        ),
        Some(ErrorKind::Cancelled) => (&["Re-run the query when ready."], &[]),
        None => (&["Retry the query."], &[]),
    };

    let mut insights = Vec::new();
    if let Some(detail) = &result.error_detail
        && detail != message
    {
        insights.push(format!("Technical detail: {detail}"));
    }

    Feedback {
        summary,
        insights,
        recommendations: recommendations.iter().map(ToString::to_string).collect(),
        follow_up_questions: follow_up_questions.iter().map(ToString::to_string).collect(),
    }
}

/// First numeric y axis, else the first numeric column that is not the x axis.
fn designated_numeric_column<'a>(
    result: &'a ExecutionResult,
    proposal: &'a ExecutionProposal,
) -> Option<&'a str> {
    let numeric = result.numeric_columns();
    if let Some(axis) = proposal
        .y_axes
        .iter()
        .find(|axis| numeric.contains(&axis.as_str()))
    {
        return Some(axis.as_str());
    }

    numeric
        .into_iter()
        .find(|column| proposal.x_axis.as_deref() != Some(*column))
}

fn describe_numeric_column(result: &ExecutionResult, column: &str, feedback: &mut Feedback) {
    let values: Vec<f64> = result
        .data
        .iter()
        .filter_map(|record| record.get(column).and_then(Value::as_f64))
        .collect();
    let (Some(first), Some(last)) = (values.first().copied(), values.last().copied()) else {
        return;
    };

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let average = values.iter().sum::<f64>() / values.len() as f64;
    feedback.insights.push(format!(
        "`{column}` ranges from {} to {} (average {}).",
        format_number(min),
        format_number(max),
        format_number(average)
    ));

    if values.len() < 2 {
        return;
    }

    let trend = if first == 0.0 {
        if last == 0.0 {
            format!("`{column}` stayed flat at 0 from first to last value.")
        } else if last > 0.0 {
            format!("`{column}` rose from 0 to {}.", format_number(last))
        } else {
            format!("`{column}` fell from 0 to {}.", format_number(last))
        }
    } else {
        let change_pct = (last - first) / first.abs() * 100.0;
        if change_pct.abs() <= STABLE_TREND_PCT {
            format!("`{column}` stayed stable ({change_pct:+.1}% from first to last value).")
        } else if change_pct > 0.0 {
            format!("`{column}` increased by {change_pct:.1}% from first to last value.")
        } else {
            format!(
                "`{column}` decreased by {:.1}% from first to last value.",
                change_pct.abs()
            )
        }
    };
    feedback.insights.push(trend);
    feedback
        .follow_up_questions
        .push(format!("Do you want to compare `{column}` with the previous period?"));
}

fn check_axis_fields(
    result: &ExecutionResult,
    proposal: &ExecutionProposal,
    feedback: &mut Feedback,
) {
    let missing: Vec<&str> = proposal
        .x_axis
        .iter()
        .chain(proposal.y_axes.iter())
        .map(String::as_str)
        .filter(|field| !result.has_field(field))
        .collect();
    if missing.is_empty() {
        return;
    }

    feedback.recommendations.push(format!(
        "Chart fields missing from the result: {}. Revisit the field mapping or alias the columns in SELECT.",
        missing.join(", ")
    ));
}

fn check_chart_fit(
    result: &ExecutionResult,
    proposal: &ExecutionProposal,
    feedback: &mut Feedback,
) {
    let Some(chart_type) = proposal.chart_type else {
        return;
    };

    if chart_type == ChartType::Pie && result.row_count > PIE_MAX_SLICES {
        feedback.recommendations.push(format!(
            "A pie chart with {} slices is hard to read; use a bar chart or group the smallest slices.",
            result.row_count
        ));
    }

    if chart_type.needs_x_axis() && proposal.x_axis.is_none() {
        feedback.recommendations.push(format!(
            "A {} chart needs an x axis; set one, usually the time column.",
            chart_type.as_str()
        ));
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}
