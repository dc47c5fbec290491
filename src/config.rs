//! Configuration loader for the `gym-crowdmeter` job.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). The resulting [`Config`] is built once at process
//! start and passed by reference; nothing reads `env::var` after that.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::error::{PipelineError, Result};
use crate::store::DuplicatePolicy;

pub const DEFAULT_DATA_PATH: &str = "./NTU_GYM_Counter.csv";
pub const DEFAULT_COUNTER_URL: &str = "https://ntusportscenter.ntu.edu.tw/counter.txt";
pub const DEFAULT_TIMEZONE: &str = "Asia/Taipei";

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<u64>())
            .transpose()
            .map_err(|e| PipelineError::Config(format!("Invalid {}: {}", $var_name, e)))?
            .unwrap_or($default)
    };
}

/// Read an optional, non-blank string environment variable.
macro_rules! optional_env {
    ($var_name:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
}

/// Strongly typed job configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the run.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Dataset CSV file.
    pub data_path: PathBuf,

    /// Structured counter feed URL.
    pub counter_url: String,

    /// Current-weather URL; `None` skips weather.
    pub weather_url: Option<String>,

    /// Zone in which readings are stamped and bucketed.
    pub timezone: Tz,

    /// How `append` treats repeated timestamps.
    pub duplicate_policy: DuplicatePolicy,

    /// Per-request timeout for every HTTP collaborator.
    pub http_timeout: Duration,

    /// Notification webhook; `None` logs the report instead.
    pub notify_webhook_url: Option<String>,

    /// Only report on runs that fall on the full hour.
    pub notify_on_hour_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            counter_url: DEFAULT_COUNTER_URL.to_string(),
            weather_url: None,
            timezone: chrono_tz::Asia::Taipei,
            duplicate_policy: DuplicatePolicy::KeepAll,
            http_timeout: Duration::from_secs(20),
            notify_webhook_url: None,
            notify_on_hour_only: true,
        }
    }
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `GYM_DATA_PATH` – dataset file (default: `./NTU_GYM_Counter.csv`)
/// - `GYM_COUNTER_URL` – counter feed (default: NTU sports center)
/// - `WEATHER_URL` – OpenWeather current-weather URL (default: unset, no weather)
/// - `GYM_TIMEZONE` – IANA zone (default: `Asia/Taipei`)
/// - `GYM_DUPLICATE_POLICY` – `keep` or `last_write_wins` (default: `keep`)
/// - `HTTP_TIMEOUT_SECS` – request timeout (default: 20)
/// - `NOTIFY_WEBHOOK_URL` – notification endpoint (default: unset, log only)
/// - `NOTIFY_ON_HOUR_ONLY` – `true`/`false` (default: `true`)
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let defaults = Config::default();

    let data_path = optional_env!("GYM_DATA_PATH")
        .map(PathBuf::from)
        .unwrap_or(defaults.data_path);
    let counter_url = optional_env!("GYM_COUNTER_URL").unwrap_or(defaults.counter_url);
    let weather_url = optional_env!("WEATHER_URL");
    let notify_webhook_url = optional_env!("NOTIFY_WEBHOOK_URL");

    let timezone = match optional_env!("GYM_TIMEZONE") {
        Some(name) => parse_timezone(&name)?,
        None => defaults.timezone,
    };
    let duplicate_policy = match optional_env!("GYM_DUPLICATE_POLICY") {
        Some(raw) => raw
            .parse::<DuplicatePolicy>()
            .map_err(|e| PipelineError::Config(format!("Invalid GYM_DUPLICATE_POLICY: {e}")))?,
        None => defaults.duplicate_policy,
    };
    let notify_on_hour_only = match optional_env!("NOTIFY_ON_HOUR_ONLY") {
        Some(raw) => parse_bool("NOTIFY_ON_HOUR_ONLY", &raw)?,
        None => defaults.notify_on_hour_only,
    };

    let timeout_secs = parse_env_u64!("HTTP_TIMEOUT_SECS", defaults.http_timeout.as_secs());
    if timeout_secs == 0 {
        return Err(PipelineError::Config(
            "HTTP_TIMEOUT_SECS must be greater than zero".to_string(),
        ));
    }

    Ok(Config {
        data_path,
        counter_url,
        weather_url,
        timezone,
        duplicate_policy,
        http_timeout: Duration::from_secs(timeout_secs),
        notify_webhook_url,
        notify_on_hour_only,
    })
}

/// Parse an IANA timezone name such as `Asia/Taipei`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| PipelineError::Config(format!("Unknown timezone '{name}'")))
}

fn parse_bool(var_name: &str, raw: &str) -> Result<bool> {
    // ---
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(PipelineError::Config(format!(
            "Invalid {var_name}: '{other}' is not a boolean"
        ))),
    }
}

impl Config {
    /// Shared HTTP client honoring the configured timeout.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {e}")))
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the API key carried in the weather URL query string.
    pub fn log_config(&self) {
        // ---
        let weather = self
            .weather_url
            .as_deref()
            .map(mask_query_secrets)
            .unwrap_or_else(|| "(disabled)".to_string());
        let webhook = self
            .notify_webhook_url
            .as_deref()
            .map(mask_query_secrets)
            .unwrap_or_else(|| "(log only)".to_string());

        tracing::info!("Configuration loaded:");
        tracing::info!("  GYM_DATA_PATH        : {}", self.data_path.display());
        tracing::info!("  GYM_COUNTER_URL      : {}", self.counter_url);
        tracing::info!("  WEATHER_URL          : {}", weather);
        tracing::info!("  GYM_TIMEZONE         : {}", self.timezone.name());
        tracing::info!("  GYM_DUPLICATE_POLICY : {:?}", self.duplicate_policy);
        tracing::info!("  HTTP_TIMEOUT_SECS    : {}", self.http_timeout.as_secs());
        tracing::info!("  NOTIFY_WEBHOOK_URL   : {}", webhook);
        tracing::info!("  NOTIFY_ON_HOUR_ONLY  : {}", self.notify_on_hour_only);
    }
}

/// Replace the values of key-like query parameters (`appid`, `key`, `token`...)
/// and any userinfo password with `****`.
///
/// Keys are compared after percent-decoding, so `app%69d=...` is masked too.
fn mask_query_secrets(url: &str) -> String {
    // ---
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return "<unparsable url>".to_string();
    };
    if parsed.password().is_some() {
        // only fails for cannot-be-a-base URLs, which carry no password
        let _ = parsed.set_password(Some("****"));
    }
    if parsed.query().is_none() {
        return parsed.to_string();
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let v = if is_secret_key(&k) { "****".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.to_string()
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ["appid", "key", "token", "secret"]
        .iter()
        .any(|s| key.contains(s))
}
