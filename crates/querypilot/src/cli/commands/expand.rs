use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::json;

use crate::config::RuntimeConfig;
use crate::executor::QueryExecutor;
use crate::macros::{DEFAULT_TIME_ZONE, MacroContext};
use crate::models::{Envelope, FailureKind};
use crate::sql::sanitize::sanitize;
use crate::time_range::{TimeColumnDescriptor, TimeRange, TimeUnit};
use crate::utils::time::parse_instant;

use super::{print_envelope, read_sql};

/// Query text plus everything the macro context is built from.
#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    #[arg(value_name = "SQL")]
    pub sql: Option<String>,

    #[arg(long, value_name = "PATH", conflicts_with = "sql")]
    pub file: Option<PathBuf>,

    #[arg(long, default_value = "public")]
    pub database: String,

    #[arg(long, default_value = "now-1h", allow_hyphen_values = true)]
    pub from: String,

    #[arg(long, default_value = "now", allow_hyphen_values = true)]
    pub to: String,

    #[arg(long, value_name = "NAME")]
    pub time_column: Option<String>,

    #[arg(long, value_name = "TYPE", default_value = "")]
    pub column_type: String,

    #[arg(long, value_name = "UNIT", value_parser = parse_time_unit, default_value = "auto")]
    pub time_unit: TimeUnit,

    /// One observed column value, used when the unit is `auto`.
    #[arg(long, value_name = "VALUE", allow_hyphen_values = true)]
    pub sample_value: Option<i64>,

    #[arg(long, default_value = DEFAULT_TIME_ZONE)]
    pub time_zone: String,

    /// Fail instead of guessing a time column when none is given.
    #[arg(long, default_value_t = false)]
    pub no_fallback: bool,

    /// Reference instant for relative ranges (RFC 3339 or epoch).
    #[arg(long, value_name = "INSTANT")]
    pub now: Option<String>,
}

impl QueryArgs {
    pub fn sql_text(&self) -> Result<String> {
        read_sql(self.sql.as_deref(), self.file.as_deref())
    }

    pub fn macro_context(&self, config: &RuntimeConfig) -> Result<MacroContext> {
        let time_range = TimeRange::from_inputs(&self.from, &self.to)
            .with_context(|| format!("invalid time range `{}`..`{}`", self.from, self.to))?;

        let mut context = MacroContext::new(self.database.clone(), time_range)
            .with_time_zone(self.time_zone.clone())
            .with_max_data_points(config.max_data_points)
            .with_time_column_fallback(!self.no_fallback);

        if let Some(name) = &self.time_column {
            let mut column =
                TimeColumnDescriptor::new(name.clone(), self.column_type.clone(), self.time_unit);
            column.sample_value = self.sample_value;
            context = context.with_time_column(column);
        } else if self.sample_value.is_some() {
            bail!("--sample-value requires --time-column");
        }

        if let Some(now) = &self.now {
            let instant = parse_instant(now).with_context(|| format!("invalid --now `{now}`"))?;
            context = context.with_now(instant);
        }

        Ok(context)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ExpandArgs {
    #[command(flatten)]
    pub query: QueryArgs,
}

pub fn run(args: &ExpandArgs, config: &RuntimeConfig) -> Result<()> {
    let sql = args.query.sql_text()?;
    let context = args.query.macro_context(config)?;

    let sanitized = sanitize(&sql) != sql;
    let expansion = match QueryExecutor::prepare(&sql, &context) {
        Ok(expansion) => expansion,
        Err(error) => {
            let kind = error.kind();
            let envelope = Envelope::failure("expand", kind.as_str(), error.to_string());
            return Err(envelope.into_error(FailureKind::from(kind)));
        }
    };
    let data = serde_json::to_value(&expansion).context("failed to encode expansion")?;

    if !expansion.is_executable() {
        let envelope = Envelope::failure(
            "expand",
            "macro_expansion",
            format!("{} macro error(s)", expansion.errors.len()),
        )
        .with_data(data)
        .with_meta("sanitized", json!(sanitized))
        .with_error_details(json!({ "errors": expansion.errors }));
        return Err(envelope.into_error(FailureKind::QueryContent));
    }

    let mut envelope = Envelope::success("expand", data).with_meta("sanitized", json!(sanitized));
    for warning in &expansion.warnings {
        envelope = envelope.with_warning("macro_warning", warning);
    }
    print_envelope(&envelope)
}

pub(crate) fn parse_time_unit(raw: &str) -> Result<TimeUnit, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "s" | "seconds" => Ok(TimeUnit::Seconds),
        "ms" | "milliseconds" => Ok(TimeUnit::Milliseconds),
        "us" | "microseconds" => Ok(TimeUnit::Microseconds),
        "ns" | "nanoseconds" => Ok(TimeUnit::Nanoseconds),
        "auto" => Ok(TimeUnit::Auto),
        other => Err(format!(
            "unknown time unit `{other}` (expected s, ms, us, ns or auto)"
        )),
    }
}
