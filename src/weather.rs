//! Ambient weather, merged into each reading as auxiliary fields.

use std::collections::BTreeMap;
use std::future::Future;

use serde_json::Value;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// `(field in the "main" object, column name)` pairs read from OpenWeather.
const WEATHER_FIELDS: [(&str, &str); 6] = [
    ("temp", "temp"),
    ("feels_like", "temp_feel"),
    ("temp_min", "temp_min"),
    ("temp_max", "temp_max"),
    ("pressure", "pressure"),
    ("humidity", "humidity"),
];

// ---

/// Source of current weather values keyed by column name.
pub trait WeatherProvider {
    fn fetch_weather(&self) -> impl Future<Output = Result<BTreeMap<String, Value>>> + Send;
}

/// OpenWeather "current weather" endpoint (URL carries location and API key).
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    client: reqwest::Client,
    url: String,
}

impl OpenWeatherProvider {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        OpenWeatherProvider {
            client,
            url: url.into(),
        }
    }
}

impl WeatherProvider for OpenWeatherProvider {
    async fn fetch_weather(&self) -> Result<BTreeMap<String, Value>> {
        // ---
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::Weather(format!("request failed: {}", e.without_url())))?
            .json()
            .await
            .map_err(|e| PipelineError::Weather(format!("response is not JSON: {e}")))?;

        let fields = parse_weather(&body)?;
        debug!("Weather fields: {:?}", fields);
        Ok(fields)
    }
}

/// Pick the known fields out of a current-weather response.
pub fn parse_weather(body: &Value) -> Result<BTreeMap<String, Value>> {
    // ---
    let main = body
        .get("main")
        .and_then(Value::as_object)
        .ok_or_else(|| PipelineError::Weather("response has no 'main' object".to_string()))?;

    Ok(WEATHER_FIELDS
        .iter()
        .filter_map(|(src, column)| main.get(*src).map(|v| (column.to_string(), v.clone())))
        .collect())
}
