//! Portfolio-aware exposure gating (spec §4.6), grounded in
//! `original_source/strategy/diversification.py`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::config::DiversificationConfig;
use crate::types::Position;

/// A candidate trade awaiting diversification approval.
#[derive(Debug, Clone)]
pub struct TradeCandidate {
    pub market_id: String,
    pub size: f64,
    pub cluster: Option<String>,
    pub resolution_date: DateTime<Utc>,
}

/// Aggregated, portfolio-wide exposure accounting used only for
/// diversification checks (not P&L).
#[derive(Debug, Clone, Default)]
pub struct PortfolioState {
    pub total_exposure: f64,
    pub cluster_exposure: HashMap<String, f64>,
    pub resolution_date_exposure: HashMap<String, f64>,
}

impl PortfolioState {
    pub fn from_positions(positions: &[Position]) -> Self {
        let mut state = PortfolioState::default();
        for p in positions {
            state.total_exposure += p.size_usd;
            if let Some(cluster) = &p.cluster {
                *state.cluster_exposure.entry(cluster.clone()).or_insert(0.0) += p.size_usd;
            }
            let date_key = p.resolution_time.format("%Y-%m-%d").to_string();
            *state
                .resolution_date_exposure
                .entry(date_key)
                .or_insert(0.0) += p.size_usd;
        }
        state
    }

    pub fn unique_clusters(&self) -> HashSet<&str> {
        self.cluster_exposure.keys().map(|s| s.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct DiversificationResult {
    pub allowed: bool,
    pub max_allowed_size: f64,
    pub reasons: Vec<&'static str>,
}

pub struct DiversificationFilter {
    config: DiversificationConfig,
}

impl DiversificationFilter {
    pub fn new(config: DiversificationConfig) -> Self {
        Self { config }
    }

    /// Run the four ordered checks of spec §4.6, each of which may only
    /// lower `max_allowed_size`.
    pub fn check(
        &self,
        candidate: &TradeCandidate,
        portfolio: &PortfolioState,
        bankroll: f64,
    ) -> DiversificationResult {
        let mut reasons = Vec::new();
        let max_total = bankroll * self.config.max_total_exposure_pct;
        let mut max_allowed = candidate.size;

        // 1. Total exposure.
        let remaining_total = max_total - portfolio.total_exposure;
        if remaining_total <= 0.0 {
            return DiversificationResult {
                allowed: false,
                max_allowed_size: 0.0,
                reasons: vec!["total_exposure"],
            };
        }
        if max_allowed > remaining_total {
            max_allowed = remaining_total;
            reasons.push("total_exposure");
        }

        // 2. Cluster cap — only evaluated once the portfolio has any
        // exposure at all (spec Open Question resolution).
        if let Some(cluster) = &candidate.cluster {
            if portfolio.total_exposure > 0.0 {
                let cluster_limit = portfolio.total_exposure * self.config.max_cluster_exposure_pct;
                let current_cluster_exposure =
                    portfolio.cluster_exposure.get(cluster).copied().unwrap_or(0.0);
                let cluster_remaining = cluster_limit - current_cluster_exposure;
                if cluster_remaining <= 0.0 {
                    return DiversificationResult {
                        allowed: false,
                        max_allowed_size: 0.0,
                        reasons: vec!["cluster_limit"],
                    };
                }
                if max_allowed > cluster_remaining {
                    max_allowed = cluster_remaining;
                    reasons.push("cluster_limit");
                }
            }
        }

        // 3. Same-day resolution cap.
        if portfolio.total_exposure > 0.0 {
            let date_key = candidate.resolution_date.format("%Y-%m-%d").to_string();
            let same_day_limit = portfolio.total_exposure * self.config.max_same_day_resolution_pct;
            let current_same_day = portfolio
                .resolution_date_exposure
                .get(&date_key)
                .copied()
                .unwrap_or(0.0);
            let same_day_remaining = same_day_limit - current_same_day;
            if same_day_remaining <= 0.0 {
                return DiversificationResult {
                    allowed: false,
                    max_allowed_size: 0.0,
                    reasons: vec!["same_day_limit"],
                };
            }
            if max_allowed > same_day_remaining {
                max_allowed = same_day_remaining;
                reasons.push("same_day_limit");
            }
        }

        // 4. Cluster-diversity deployment floors.
        let current_clusters = portfolio.unique_clusters();
        let n_clusters = current_clusters.len();
        let adds_new_cluster = candidate
            .cluster
            .as_deref()
            .map(|c| !current_clusters.contains(c))
            .unwrap_or(false);

        let new_exposure_pct = (portfolio.total_exposure + max_allowed) / max_total;

        if new_exposure_pct > 0.50 && n_clusters < self.config.min_positions_for_50_pct {
            // First position in a brand-new cluster is exempt from this floor.
            if !adds_new_cluster {
                let cap = max_total * 0.50 - portfolio.total_exposure;
                if cap <= 0.0 {
                    return DiversificationResult {
                        allowed: false,
                        max_allowed_size: 0.0,
                        reasons: vec!["cluster_diversity_50"],
                    };
                }
                if max_allowed > cap {
                    max_allowed = cap;
                    reasons.push("cluster_diversity_50");
                }
            }
        }

        if new_exposure_pct > 0.75 && n_clusters < self.config.min_positions_for_75_pct {
            // Unlike the 50% floor, this one applies unconditionally —
            // even to the first position in a new cluster.
            let cap = max_total * 0.75 - portfolio.total_exposure;
            if cap <= 0.0 {
                return DiversificationResult {
                    allowed: false,
                    max_allowed_size: 0.0,
                    reasons: vec!["cluster_diversity_75"],
                };
            }
            if max_allowed > cap {
                max_allowed = cap;
                reasons.push("cluster_diversity_75");
            }
        }

        // 5. Minimum remaining.
        if max_allowed < 1.0 {
            return DiversificationResult {
                allowed: false,
                max_allowed_size: 0.0,
                reasons: vec!["below_minimum_remaining"],
            };
        }

        DiversificationResult {
            allowed: true,
            max_allowed_size: max_allowed,
            reasons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    /// Scenario: the literal inputs from spec S4 — bankroll 1000, 75%
    /// total exposure cap, one existing 300 USD position in cluster A,
    /// candidate 100 USD also in cluster A (not a new cluster).
    /// Expected: capped to 75 USD, tagged cluster_diversity_50.
    #[test]
    fn test_s4_cluster_diversity_floor() {
        let config = DiversificationConfig {
            max_total_exposure_pct: 0.75,
            max_cluster_exposure_pct: 1.0,
            max_same_day_resolution_pct: 1.0,
            min_positions_for_50_pct: 2,
            min_positions_for_75_pct: 3,
        };
        let filter = DiversificationFilter::new(config);

        let mut cluster_exposure = HashMap::new();
        cluster_exposure.insert("A".to_string(), 300.0);
        let portfolio = PortfolioState {
            total_exposure: 300.0,
            cluster_exposure,
            resolution_date_exposure: HashMap::new(),
        };

        let candidate = TradeCandidate {
            market_id: "m".into(),
            size: 100.0,
            cluster: Some("A".into()),
            resolution_date: date(2026, 2, 1),
        };

        let result = filter.check(&candidate, &portfolio, 1000.0);
        assert!(result.allowed);
        assert!((result.max_allowed_size - 75.0).abs() < 1e-9);
        assert!(result.reasons.contains(&"cluster_diversity_50"));
    }

    /// Scenario: a candidate opening a brand-new cluster, which would push
    /// exposure above the 50% floor.
    /// Expected: the 50% floor does not apply (first-position exemption).
    #[test]
    fn test_new_cluster_exempt_from_50_pct_floor() {
        let config = DiversificationConfig {
            max_total_exposure_pct: 0.75,
            max_cluster_exposure_pct: 1.0,
            max_same_day_resolution_pct: 1.0,
            min_positions_for_50_pct: 2,
            min_positions_for_75_pct: 3,
        };
        let filter = DiversificationFilter::new(config);

        let mut cluster_exposure = HashMap::new();
        cluster_exposure.insert("A".to_string(), 300.0);
        let portfolio = PortfolioState {
            total_exposure: 300.0,
            cluster_exposure,
            resolution_date_exposure: HashMap::new(),
        };

        let candidate = TradeCandidate {
            market_id: "m".into(),
            size: 100.0,
            cluster: Some("B".into()),
            resolution_date: date(2026, 2, 1),
        };

        let result = filter.check(&candidate, &portfolio, 1000.0);
        assert!(result.allowed);
        assert!((result.max_allowed_size - 100.0).abs() < 1e-9);
        assert!(!result.reasons.contains(&"cluster_diversity_50"));
    }

    /// Scenario: the 75% floor, which unlike the 50% floor has no
    /// new-cluster exemption.
    /// Expected: capped even when the candidate opens a new cluster.
    #[test]
    fn test_75_pct_floor_applies_unconditionally() {
        let config = DiversificationConfig {
            max_total_exposure_pct: 0.75,
            max_cluster_exposure_pct: 1.0,
            max_same_day_resolution_pct: 1.0,
            min_positions_for_50_pct: 1,
            min_positions_for_75_pct: 3,
        };
        let filter = DiversificationFilter::new(config);

        let mut cluster_exposure = HashMap::new();
        cluster_exposure.insert("A".to_string(), 500.0);
        let portfolio = PortfolioState {
            total_exposure: 500.0,
            cluster_exposure,
            resolution_date_exposure: HashMap::new(),
        };

        let candidate = TradeCandidate {
            market_id: "m".into(),
            size: 100.0,
            cluster: Some("B".into()),
            resolution_date: date(2026, 2, 1),
        };

        // max_total = 750; new_exposure_pct would be (500+100)/750 = 0.80 > 0.75
        let result = filter.check(&candidate, &portfolio, 1000.0);
        assert!(result.reasons.contains(&"cluster_diversity_75"));
    }

    /// Scenario: total exposure already at or beyond the global cap.
    /// Expected: unconditional rejection with reason total_exposure.
    #[test]
    fn test_total_exposure_exhausted() {
        let filter = DiversificationFilter::new(DiversificationConfig::from_env());
        let portfolio = PortfolioState {
            total_exposure: 750.0,
            ..Default::default()
        };
        let candidate = TradeCandidate {
            market_id: "m".into(),
            size: 10.0,
            cluster: None,
            resolution_date: date(2026, 2, 1),
        };
        let result = filter.check(&candidate, &portfolio, 1000.0);
        assert!(!result.allowed);
        assert_eq!(result.reasons, vec!["total_exposure"]);
    }

    /// Scenario: an empty portfolio (total_exposure == 0).
    /// Expected: cluster and same-day checks are skipped entirely.
    #[test]
    fn test_empty_portfolio_skips_cluster_and_same_day_checks() {
        let filter = DiversificationFilter::new(DiversificationConfig::from_env());
        let portfolio = PortfolioState::default();
        let candidate = TradeCandidate {
            market_id: "m".into(),
            size: 5.0,
            cluster: Some("A".into()),
            resolution_date: date(2026, 2, 1),
        };
        let result = filter.check(&candidate, &portfolio, 1000.0);
        assert!(result.allowed);
        assert_eq!(result.max_allowed_size, 5.0);
        assert!(result.reasons.is_empty());
    }
}
