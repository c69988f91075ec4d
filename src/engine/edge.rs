//! Probabilistic-edge calculator over multi-model ensembles (spec §4.3).
//!
//! Grounded in `original_source/strategy/edge_calculator.py` and
//! `original_source/data/weather_client.py`'s exceedance-probability
//! helper, reworked into pure Rust functions over `EnsembleForecast`.

use std::collections::HashMap;

use crate::config::StrategyConfig;
use crate::types::{Comparison, ConfidenceLevel, EnsembleForecast, Opportunity, Side};

/// Laplace-smoothed exceedance probability for one model's ensemble:
/// `p = (k+1)/(n+2)` where `k` is the count of members satisfying the
/// comparison against `threshold`. Strictly in (0,1) for any n >= 1 (P1).
pub fn calculate_exceedance_probability(
    members: &[f64],
    threshold: f64,
    threshold_upper: Option<f64>,
    comparison: Comparison,
) -> f64 {
    if members.is_empty() {
        return 0.5;
    }
    let n = members.len() as f64;
    let k = match comparison {
        Comparison::Ge => members.iter().filter(|&&v| v >= threshold).count(),
        Comparison::Gt => members.iter().filter(|&&v| v > threshold).count(),
        Comparison::Le => members.iter().filter(|&&v| v <= threshold).count(),
        Comparison::Lt => members.iter().filter(|&&v| v < threshold).count(),
        Comparison::Bracket => {
            let upper = threshold_upper.unwrap_or(threshold);
            members
                .iter()
                .filter(|&&v| v >= threshold && v < upper)
                .count()
        }
    } as f64;

    (k + 1.0) / (n + 2.0)
}

/// Aggregate per-model probabilities into a single probability and an
/// agreement score: `agreement = max(0, 1 - 2*stdev(probs))`; with one
/// model, agreement = 1.
pub fn aggregate_model_probabilities(
    model_probabilities: &HashMap<String, f64>,
    model_weights: Option<&HashMap<String, f64>>,
) -> (f64, f64) {
    if model_probabilities.is_empty() {
        return (0.5, 0.0);
    }

    let (weighted_sum, weight_total) = model_probabilities.iter().fold(
        (0.0, 0.0),
        |(sum, wsum), (model, prob)| {
            let w = model_weights.and_then(|m| m.get(model)).copied().unwrap_or(1.0);
            (sum + w * prob, wsum + w)
        },
    );
    let p_agg = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        0.5
    };

    let agreement = if model_probabilities.len() == 1 {
        1.0
    } else {
        let values: Vec<f64> = model_probabilities.values().copied().collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        let stdev = variance.sqrt();
        (1.0 - 2.0 * stdev).max(0.0)
    };

    (p_agg, agreement)
}

/// Converts a threshold expressed in `target_unit` into the ensemble's
/// native unit. Only Fahrenheit<->Celsius conversion is needed in
/// practice (Open-Meteo ensembles are native Celsius).
pub fn convert_threshold(threshold: f64, target_unit: &str, native_unit: &str) -> f64 {
    match (target_unit, native_unit) {
        ("fahrenheit", "celsius") => (threshold - 32.0) * 5.0 / 9.0,
        ("celsius", "fahrenheit") => threshold * 9.0 / 5.0 + 32.0,
        _ => threshold,
    }
}

pub struct EdgeCalculator {
    config: StrategyConfig,
}

impl EdgeCalculator {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// Calculate the aggregated forecast probability across every model in
    /// an ensemble. Returns `(probability, agreement, per_model_probs)`.
    /// An ensemble with no models at all returns the `(0.5, 0.0, {})`
    /// sentinel (spec §4.3 failure mode), not tradeable by construction.
    pub fn calculate_forecast_probability(
        &self,
        ensemble: &EnsembleForecast,
        threshold: f64,
        threshold_upper: Option<f64>,
        comparison: Comparison,
        target_unit: &str,
    ) -> (f64, f64, HashMap<String, f64>) {
        let mut model_probabilities = HashMap::new();

        for (model_name, members) in &ensemble.models {
            if members.is_empty() {
                continue;
            }
            let adjusted_threshold =
                convert_threshold(threshold, target_unit, &ensemble.native_unit);
            let adjusted_upper = threshold_upper
                .map(|u| convert_threshold(u, target_unit, &ensemble.native_unit));
            let prob = calculate_exceedance_probability(
                members,
                adjusted_threshold,
                adjusted_upper,
                comparison,
            );
            model_probabilities.insert(model_name.clone(), prob);
        }

        if model_probabilities.is_empty() {
            return (0.5, 0.0, HashMap::new());
        }

        let (p_agg, agreement) = aggregate_model_probabilities(&model_probabilities, None);
        (p_agg, agreement, model_probabilities)
    }

    /// Compute the edge on both sides, the recommended side, expected
    /// value, and confidence level (spec §4.3).
    pub fn calculate_edge(
        &self,
        market_id: &str,
        forecast_prob: f64,
        market_price: f64,
        model_agreement: f64,
        model_probabilities: HashMap<String, f64>,
    ) -> Opportunity {
        let market_price = market_price.clamp(0.01, 0.99);
        let forecast_prob = forecast_prob.clamp(0.01, 0.99);

        let edge_yes = forecast_prob / market_price - 1.0;
        let no_market_price = 1.0 - market_price;
        let no_forecast_prob = 1.0 - forecast_prob;
        let edge_no = no_forecast_prob / no_market_price - 1.0;

        let (recommended_side, edge, expected_value) = if edge_yes > edge_no && edge_yes > 0.0 {
            let decimal_odds = 1.0 / market_price;
            (Some(Side::Yes), edge_yes, forecast_prob * decimal_odds - 1.0)
        } else if edge_no > 0.0 {
            let decimal_odds = 1.0 / no_market_price;
            (Some(Side::No), edge_no, no_forecast_prob * decimal_odds - 1.0)
        } else {
            (None, edge_yes.max(edge_no), 0.0)
        };

        let confidence = self.confidence_level(edge, model_agreement);

        Opportunity {
            market_id: market_id.to_string(),
            forecast_prob,
            market_prob: market_price,
            edge,
            edge_yes,
            edge_no,
            expected_value,
            model_agreement,
            recommended_side,
            confidence,
            model_probabilities,
        }
    }

    fn confidence_level(&self, edge: f64, agreement: f64) -> ConfidenceLevel {
        if agreement >= 0.8 && edge >= 0.15 {
            ConfidenceLevel::High
        } else if agreement >= 0.6 && edge >= 0.08 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn is_tradeable(&self, opp: &Opportunity) -> bool {
        opp.is_tradeable(
            self.config.min_edge,
            self.config.max_edge,
            self.config.min_model_agreement,
        )
    }
}
