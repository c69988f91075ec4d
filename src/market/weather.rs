//! Ensemble weather forecast retrieval (spec §4.11, §6.1 `WeatherClient`).
//!
//! Grounded in `original_source/data/weather_client.py`'s `OpenMeteoClient`.
//! Only I/O and response parsing live here — the exceedance-probability
//! and model-agreement math already live in `engine::edge` and are not
//! duplicated.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;

use crate::error::{AgentError, AgentResult};
use crate::types::EnsembleForecast;

/// Latitude/longitude for every location this crate can discover
/// markets for, keyed the same way as `GeographicClusters`.
fn coordinates(location: &str) -> Option<(f64, f64)> {
    let coords = match location {
        "NYC_LAGUARDIA" => (40.7769, -73.8740),
        "BOSTON_LOGAN" => (42.3656, -71.0096),
        "PHILADELPHIA_INTL" => (39.8744, -75.2424),
        "WASHINGTON_DULLES" => (38.9531, -77.4565),
        "MIAMI_INTL" => (25.7959, -80.2870),
        "ATLANTA_HARTSFIELD" => (33.6407, -84.4277),
        "HOUSTON_HOBBY" => (29.6454, -95.2789),
        "NEW_ORLEANS_ARMSTRONG" => (29.9934, -90.2580),
        "LOS_ANGELES_INTL" => (33.9425, -118.4081),
        "SAN_FRANCISCO_INTL" => (37.6213, -122.3790),
        "SEATTLE_TACOMA" => (47.4502, -122.3088),
        "PHOENIX_SKY" => (33.4352, -112.0101),
        "LONDON_CITY" => (51.5053, 0.0553),
        "PARIS_CDG" => (49.0097, 2.5479),
        "AMSTERDAM_SCHIPHOL" => (52.3105, 4.7683),
        "FRANKFURT_MAIN" => (50.0379, 8.5622),
        _ => return None,
    };
    Some(coords)
}

/// Source of multi-model ensemble forecasts for a location/date.
#[async_trait]
pub trait WeatherClient: Send + Sync {
    async fn fetch_ensemble(
        &self,
        location: &str,
        target_date: DateTime<Utc>,
        variable: &str,
        models: &[String],
    ) -> AgentResult<EnsembleForecast>;
}

pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(base_url: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build open-meteo http client");
        Self { client, base_url }
    }
}

#[derive(Debug, serde::Deserialize)]
struct EnsembleResponse {
    #[serde(default)]
    hourly: HashMap<String, serde_json::Value>,
}

#[async_trait]
impl WeatherClient for OpenMeteoClient {
    async fn fetch_ensemble(
        &self,
        location: &str,
        target_date: DateTime<Utc>,
        variable: &str,
        models: &[String],
    ) -> AgentResult<EnsembleForecast> {
        let (lat, lon) = coordinates(location).ok_or_else(|| AgentError::ParseFailure {
            what: "location coordinates",
            reason: format!("no coordinates known for location {location}"),
        })?;

        let days_ahead = (target_date.date_naive() - Utc::now().date_naive()).num_days();
        let forecast_days = days_ahead.clamp(1, 16);

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("hourly", variable.to_string()),
                ("models", models.join(",")),
                ("forecast_days", forecast_days.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AgentError::UpstreamIo {
                collaborator: "open_meteo",
                source: e.into(),
            })?
            .error_for_status()
            .map_err(|e| AgentError::UpstreamIo {
                collaborator: "open_meteo",
                source: e.into(),
            })?;

        let body: EnsembleResponse = response.json().await.map_err(|e| AgentError::ParseFailure {
            what: "open_meteo ensemble response",
            reason: e.to_string(),
        })?;

        Ok(parse_ensemble_response(&body, location, target_date, variable, models))
    }
}

/// Pull out every ensemble member's day-aggregated value (max for
/// temperature, sum for precipitation) for each requested model.
fn parse_ensemble_response(
    body: &EnsembleResponse,
    location: &str,
    target_date: DateTime<Utc>,
    variable: &str,
    models: &[String],
) -> EnsembleForecast {
    let times: Vec<String> = body
        .hourly
        .get("time")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    let target_date_str = format!(
        "{:04}-{:02}-{:02}",
        target_date.year(),
        target_date.month(),
        target_date.day()
    );
    let target_indices: Vec<usize> = times
        .iter()
        .enumerate()
        .filter(|(_, t)| t.starts_with(&target_date_str))
        .map(|(i, _)| i)
        .collect();

    let is_temperature = variable.contains("temperature");
    let mut model_values: HashMap<String, Vec<f64>> = HashMap::new();

    for model in models {
        let prefix = format!("{variable}_{model}_member");
        let mut per_member_daily: Vec<f64> = Vec::new();

        for (key, values) in &body.hourly {
            if !key.starts_with(&prefix) {
                continue;
            }
            let Some(values) = values.as_array() else { continue };
            let day_values: Vec<f64> = target_indices
                .iter()
                .filter_map(|&i| values.get(i).and_then(|v| v.as_f64()))
                .collect();
            if day_values.is_empty() {
                continue;
            }
            let aggregated = if is_temperature {
                day_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
            } else {
                day_values.iter().sum()
            };
            per_member_daily.push(aggregated);
        }

        if !per_member_daily.is_empty() {
            model_values.insert(model.clone(), per_member_daily);
        }
    }

    EnsembleForecast {
        location: location.to_string(),
        target_date,
        models: model_values,
        native_unit: if is_temperature { "celsius".into() } else { "mm".into() },
    }
}
