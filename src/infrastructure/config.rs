use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

const APP_JSON: &str = "app.json";
const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";
const DEFAULT_AUTH_POLL_SECONDS: u64 = 2;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;
pub const API_URL_ENV_KEYS: &[&str] = &["POMOTASK_API_URL", "NEXT_PUBLIC_API_URL"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_name: String,
    pub api_base_url: Url,
    pub auth_poll_interval: Duration,
    pub request_timeout: Duration,
}

fn default_app_config() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "appName": "Pomotask",
        "apiBaseUrl": DEFAULT_API_BASE_URL,
        "authPollSeconds": DEFAULT_AUTH_POLL_SECONDS,
        "requestTimeoutSeconds": DEFAULT_REQUEST_TIMEOUT_SECONDS
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_config())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    load_app_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_app_config_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<AppConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let app = read_config(&config_dir.join(APP_JSON))?;

    let app_name = app
        .get("appName")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("Pomotask")
        .to_string();

    let configured_url = app
        .get("apiBaseUrl")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);
    let raw_url = API_URL_ENV_KEYS
        .iter()
        .find_map(|key| lookup(key).map(|value| value.trim().to_string()))
        .filter(|value| !value.is_empty())
        .or(configured_url)
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

    Ok(AppConfig {
        app_name,
        api_base_url: parse_base_url(&raw_url)?,
        auth_poll_interval: Duration::from_secs(read_positive_seconds(
            &app,
            "authPollSeconds",
            DEFAULT_AUTH_POLL_SECONDS,
        )?),
        request_timeout: Duration::from_secs(read_positive_seconds(
            &app,
            "requestTimeoutSeconds",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?),
    })
}

/// Normalizes the base so joining relative paths keeps its last segment.
pub fn parse_base_url(raw: &str) -> Result<Url, InfraError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid apiBaseUrl '{trimmed}': {error}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(InfraError::InvalidConfig(format!(
            "apiBaseUrl must be an http(s) URL: {trimmed}"
        )));
    }
    Ok(url)
}

fn read_positive_seconds(
    app: &serde_json::Value,
    key: &str,
    default: u64,
) -> Result<u64, InfraError> {
    match app.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .filter(|seconds| *seconds > 0)
            .ok_or_else(|| InfraError::InvalidConfig(format!("{key} must be a positive integer"))),
    }
}
