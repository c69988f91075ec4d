//! Weather-market discovery against the Polymarket Gamma API (spec
//! §4.10, §6.1 `MarketDiscovery`/`MarketParser`).
//!
//! Grounded in the teacher's original `market/discovery.rs` (the HTTP
//! client shape: `reqwest::Client`, a base URL, query params, JSON
//! decode, `tracing` on failure) and
//! `original_source/data/market_client.py`'s `GammaAPIClient` +
//! `parse_market_criteria`. The original's regex-based question parser
//! is reimplemented with plain string scanning — simpler, and matches
//! the rest of this crate's dependency footprint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::GeographicClusters;
use crate::error::{AgentError, AgentResult};
use crate::types::{Comparison, MarketSpec, Variable};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawToken {
    pub token_id: String,
    #[serde(default)]
    pub outcome: String,
}

/// The as-received Gamma API market payload, before question parsing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMarket {
    pub id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub tokens: Vec<RawToken>,
    #[serde(default)]
    pub liquidity: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub end_date_iso: Option<String>,
    #[serde(default)]
    pub outcome_prices: Vec<String>,
}

/// Source of active weather markets. A real implementation hits the
/// Gamma API; tests can substitute a fixture-backed implementation.
#[async_trait]
pub trait MarketDiscovery: Send + Sync {
    async fn list_active(&self, limit: u32, tag: Option<&str>) -> AgentResult<Vec<RawMarket>>;
}

pub struct GammaMarketDiscovery {
    client: reqwest::Client,
    base_url: String,
}

impl GammaMarketDiscovery {
    pub fn new(base_url: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build gamma API http client");
        Self { client, base_url }
    }
}

#[async_trait]
impl MarketDiscovery for GammaMarketDiscovery {
    async fn list_active(&self, limit: u32, tag: Option<&str>) -> AgentResult<Vec<RawMarket>> {
        let mut query = vec![("active".to_string(), "true".to_string()), ("limit".to_string(), limit.to_string())];
        if let Some(tag) = tag {
            query.push(("tag".to_string(), tag.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/markets", self.base_url))
            .query(&query)
            .send()
            .await
            .map_err(|e| AgentError::UpstreamIo {
                collaborator: "gamma_api",
                source: e.into(),
            })?;

        let response = response.error_for_status().map_err(|e| AgentError::UpstreamIo {
            collaborator: "gamma_api",
            source: e.into(),
        })?;

        response.json::<Vec<RawMarket>>().await.map_err(|e| AgentError::ParseFailure {
            what: "gamma_api markets response",
            reason: e.to_string(),
        })
    }
}

const LOCATIONS: &[&str] = &[
    "NYC_LAGUARDIA",
    "BOSTON_LOGAN",
    "PHILADELPHIA_INTL",
    "WASHINGTON_DULLES",
    "MIAMI_INTL",
    "ATLANTA_HARTSFIELD",
    "HOUSTON_HOBBY",
    "NEW_ORLEANS_ARMSTRONG",
    "LOS_ANGELES_INTL",
    "SAN_FRANCISCO_INTL",
    "SEATTLE_TACOMA",
    "PHOENIX_SKY",
    "LONDON_CITY",
    "PARIS_CDG",
    "AMSTERDAM_SCHIPHOL",
    "FRANKFURT_MAIN",
];

fn location_display_name(location: &str) -> String {
    location.replace('_', " ").to_lowercase()
}

fn find_location(question: &str) -> Option<String> {
    let q = question.to_lowercase();
    LOCATIONS
        .iter()
        .find(|loc| q.contains(&location_display_name(loc)))
        .map(|loc| loc.to_string())
}

/// Extract a leading run of digits (and at most one `.`) starting at
/// `start`, returning the parsed value and the byte index just past it.
fn parse_number_at(s: &str, start: usize) -> Option<(f64, usize)> {
    let bytes = s.as_bytes();
    let mut end = start;
    let mut seen_dot = false;
    while end < bytes.len() {
        let c = bytes[end];
        if c.is_ascii_digit() {
            end += 1;
        } else if c == b'.' && !seen_dot {
            seen_dot = true;
            end += 1;
        } else {
            break;
        }
    }
    if end == start {
        return None;
    }
    s[start..end].parse().ok().map(|v| (v, end))
}

fn number_before(text: &str, marker_idx: usize) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut end = marker_idx;
    while end > 0 && !bytes[end - 1].is_ascii_digit() {
        end -= 1;
        if end == 0 || marker_idx - end > 2 {
            break;
        }
    }
    let mut start = end;
    while start > 0 && (bytes[start - 1].is_ascii_digit() || bytes[start - 1] == b'.') {
        start -= 1;
    }
    if start == end {
        return None;
    }
    text[start..end].parse().ok()
}

/// Extract `(threshold, threshold_upper, comparison)` from a set of
/// outcome strings, matching the phrasing the Gamma API uses for
/// weather markets ("85F or higher", "Above 85F", "84-86F", ...).
fn extract_threshold(outcomes: &[String]) -> Option<(f64, Option<f64>, Comparison)> {
    for outcome in outcomes {
        if let Some(idx) = outcome.find("or higher") {
            if let Some(t) = number_before(outcome, idx) {
                return Some((t, None, Comparison::Ge));
            }
        }
        if let Some(idx) = outcome.find("or lower") {
            if let Some(t) = number_before(outcome, idx) {
                return Some((t, None, Comparison::Le));
            }
        }
        if let Some(idx) = outcome.to_lowercase().find("above") {
            if let Some((t, _)) = parse_number_at(outcome, skip_to_digit(outcome, idx)) {
                return Some((t, None, Comparison::Gt));
            }
        }
        if let Some(idx) = outcome.to_lowercase().find("below") {
            if let Some((t, _)) = parse_number_at(outcome, skip_to_digit(outcome, idx)) {
                return Some((t, None, Comparison::Lt));
            }
        }
        if let Some(dash_idx) = outcome.find('-') {
            if let Some(low) = number_before(outcome, dash_idx) {
                if let Some((high, _)) = parse_number_at(outcome, dash_idx + 1) {
                    return Some((low, Some(high), Comparison::Bracket));
                }
            }
        }
    }
    None
}

fn skip_to_digit(s: &str, from: usize) -> usize {
    let bytes = s.as_bytes();
    let mut i = from;
    while i < bytes.len() && !bytes[i].is_ascii_digit() {
        i += 1;
    }
    i
}

fn is_precipitation_market(question: &str) -> bool {
    let q = question.to_lowercase();
    q.contains("rain") || q.contains("precipitation") || q.contains("snow")
}

/// Pure transform: Gamma API raw payload -> structured `MarketSpec`.
/// Returns `None` if the question can't be parsed into tradeable
/// weather criteria (spec §4.10 failure mode — discard, don't error).
pub fn parse_market(raw: &RawMarket, clusters: &GeographicClusters) -> Option<MarketSpec> {
    let location = find_location(&raw.question)?;
    let resolution_time = raw
        .end_date_iso
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))?;

    let token_yes = raw.tokens.first()?.token_id.clone();
    let token_no = raw.tokens.get(1)?.token_id.clone();

    let (variable, threshold, threshold_upper, comparison, unit) = if is_precipitation_market(&raw.question) {
        (Variable::Precip, 0.01, None, Comparison::Gt, "inches".to_string())
    } else {
        let (threshold, threshold_upper, comparison) = extract_threshold(&raw.outcomes)?;
        let variable = if threshold_upper.is_some() {
            Variable::Bracket
        } else {
            Variable::TempMax
        };
        (variable, threshold, threshold_upper, comparison, "fahrenheit".to_string())
    };

    let yes_price = raw
        .outcome_prices
        .first()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.5);

    Some(MarketSpec {
        market_id: raw.id.clone(),
        token_yes,
        token_no,
        location: location.clone(),
        cluster: clusters.cluster_for(&location),
        resolution_time,
        variable,
        threshold,
        threshold_upper,
        comparison,
        unit,
        liquidity: raw.liquidity,
        yes_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(question: &str, outcomes: &[&str]) -> RawMarket {
        RawMarket {
            id: "m1".into(),
            question: question.to_string(),
            description: String::new(),
            outcomes: outcomes.iter().map(|s| s.to_string()).collect(),
            tokens: vec![
                RawToken { token_id: "tok-yes".into(), outcome: "Yes".into() },
                RawToken { token_id: "tok-no".into(), outcome: "No".into() },
            ],
            liquidity: 5000.0,
            volume: 1000.0,
            end_date_iso: Some("2026-02-01T00:00:00Z".into()),
            outcome_prices: vec!["0.40".into(), "0.60".into()],
        }
    }

    /// Scenario: a "highest temperature ... or higher" question.
    /// Expected: parses as TempMax/Ge with the location and threshold.
    #[test]
    fn test_parse_exceedance_market() {
        let clusters = GeographicClusters::default_table();
        let raw = raw("Highest temperature at NYC Laguardia on February 1?", &["85F or higher", "84F or lower"]);
        let spec = parse_market(&raw, &clusters).unwrap();
        assert_eq!(spec.location, "NYC_LAGUARDIA");
        assert_eq!(spec.comparison, Comparison::Ge);
        assert!((spec.threshold - 85.0).abs() < 1e-9);
        assert_eq!(spec.cluster, Some("US_NORTHEAST".to_string()));
    }

    /// Scenario: a bracket-style outcome ("84-86F").
    /// Expected: parses as a Bracket comparison with both bounds.
    #[test]
    fn test_parse_bracket_market() {
        let clusters = GeographicClusters::default_table();
        let raw = raw("Temperature in Miami Intl on February 1", &["84-86F", "Other"]);
        let spec = parse_market(&raw, &clusters).unwrap();
        assert_eq!(spec.comparison, Comparison::Bracket);
        assert!((spec.threshold - 84.0).abs() < 1e-9);
        assert!((spec.threshold_upper.unwrap() - 86.0).abs() < 1e-9);
    }

    /// Scenario: a precipitation question.
    /// Expected: parses as Precip/Gt with the fixed 0.01" threshold.
    #[test]
    fn test_parse_precipitation_market() {
        let clusters = GeographicClusters::default_table();
        let raw = raw("Will it rain at Seattle Tacoma on February 1?", &["Yes", "No"]);
        let spec = parse_market(&raw, &clusters).unwrap();
        assert_eq!(spec.variable, Variable::Precip);
        assert_eq!(spec.comparison, Comparison::Gt);
    }

    /// Scenario: a question mentioning no known location.
    /// Expected: parsing fails gracefully (None), not a panic.
    #[test]
    fn test_unknown_location_returns_none() {
        let clusters = GeographicClusters::default_table();
        let raw = raw("Highest temperature in Timbuktu on February 1?", &["85F or higher"]);
        assert!(parse_market(&raw, &clusters).is_none());
    }
}
