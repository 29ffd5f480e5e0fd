use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;

use crate::executor::DEFAULT_TIMEOUT;
use crate::macros::DEFAULT_MAX_DATA_POINTS;

pub const ENDPOINT_ENV: &str = "QUERYPILOT_ENDPOINT";
pub const TIMEOUT_ENV: &str = "QUERYPILOT_TIMEOUT_MS";
pub const AUTH_ENV: &str = "QUERYPILOT_AUTH";

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4000/v1/sql";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub max_data_points: u32,
    pub max_records: Option<usize>,

    /// Full `Authorization` header value.
    pub auth_header: Option<String>,
}

/// Values given on the command line; each one beats its environment variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOverrides {
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_data_points: Option<u32>,
    pub max_records: Option<usize>,
    pub auth: Option<String>,
}

pub fn resolve_runtime_config<F>(overrides: &RuntimeOverrides, env_lookup: F) -> Result<RuntimeConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let endpoint = overrides
        .endpoint
        .clone()
        .or_else(|| env_lookup(ENDPOINT_ENV))
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    let endpoint = endpoint.trim().to_string();
    validate_endpoint(&endpoint)?;

    let timeout_ms = match overrides.timeout_ms {
        Some(timeout_ms) => timeout_ms,
        None => match env_lookup(TIMEOUT_ENV) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{TIMEOUT_ENV} must be an integer, got `{raw}`"))?,
            None => u64::try_from(DEFAULT_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
        },
    };
    if timeout_ms == 0 {
        bail!("timeout must be greater than zero");
    }

    let max_data_points = overrides.max_data_points.unwrap_or(DEFAULT_MAX_DATA_POINTS);
    if max_data_points == 0 {
        bail!("max_data_points must be greater than zero");
    }

    if overrides.max_records == Some(0) {
        bail!("max_records must be greater than zero when set");
    }

    let auth_header = overrides
        .auth
        .clone()
        .or_else(|| env_lookup(AUTH_ENV))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| authorization_header(&value));

    Ok(RuntimeConfig {
        endpoint,
        timeout: Duration::from_millis(timeout_ms),
        max_data_points,
        max_records: overrides.max_records,
        auth_header,
    })
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let url = Url::parse(endpoint)
        .with_context(|| format!("endpoint must be an absolute http(s) URL: {endpoint}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("endpoint must be an absolute http(s) URL: {endpoint}");
    }
    if url.host_str().is_none_or(str::is_empty) {
        bail!("endpoint is missing a host: {endpoint}");
    }
    Ok(())
}

/// A bare token becomes a bearer credential; `Scheme value` is used as given.
fn authorization_header(value: &str) -> String {
    if value.contains(' ') {
        value.to_string()
    } else {
        format!("Bearer {value}")
    }
}
