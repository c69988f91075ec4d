//! Fractional-Kelly position sizing (spec §4.5), grounded in
//! `original_source/strategy/position_sizer.py`.

use crate::config::PositionSizingConfig;
use crate::types::{Opportunity, Side};

#[derive(Debug, Clone, PartialEq)]
pub struct PositionSize {
    pub size: f64,
    pub kelly_fraction_used: f64,
    pub full_kelly_size: f64,
    pub max_allowed: f64,
    pub constrained_by: Option<&'static str>,
}

impl PositionSize {
    fn zero(config: &PositionSizingConfig, max_allowed: f64, reason: &'static str) -> Self {
        Self {
            size: 0.0,
            kelly_fraction_used: config.kelly_fraction,
            full_kelly_size: 0.0,
            max_allowed,
            constrained_by: Some(reason),
        }
    }
}

pub struct PositionSizer {
    config: PositionSizingConfig,
}

impl PositionSizer {
    pub fn new(config: PositionSizingConfig) -> Self {
        Self { config }
    }

    /// Full Kelly fraction `f* = (b*p - (1-p))/b`. Zero if `p` is outside
    /// (0,1) or the net odds `b` are non-positive.
    pub fn calculate_kelly_fraction(&self, probability: f64, odds: f64) -> f64 {
        if probability <= 0.0 || probability >= 1.0 || odds <= 0.0 {
            return 0.0;
        }
        let q = 1.0 - probability;
        (odds * probability - q) / odds
    }

    /// Calculate a dollar position size for `side` given a forecast
    /// probability and market price, clamped by min/max/exposure limits.
    pub fn calculate_position_size(
        &self,
        bankroll: f64,
        forecast_prob: f64,
        market_price: f64,
        side: Side,
        current_exposure: f64,
        max_exposure_pct: Option<f64>,
    ) -> PositionSize {
        let kelly_fraction = self.config.kelly_fraction;
        let max_position_pct = self.config.max_position_pct;
        let min_position = self.config.min_position;
        let max_position = self.config.max_position;

        let (prob, price) = match side {
            Side::Yes => (forecast_prob, market_price),
            Side::No => (1.0 - forecast_prob, 1.0 - market_price),
        };

        if price <= 0.0 || price >= 1.0 {
            return PositionSize::zero(&self.config, 0.0, "invalid_price");
        }

        let net_odds = (1.0 - price) / price;
        let full_kelly = self.calculate_kelly_fraction(prob, net_odds);

        if full_kelly <= 0.0 {
            return PositionSize::zero(&self.config, max_position, "negative_kelly");
        }

        let position_pct = (full_kelly * kelly_fraction).min(max_position_pct);
        let mut position = bankroll * position_pct;
        let full_kelly_position = bankroll * full_kelly;

        let mut constrained_by = None;

        if position < min_position {
            if full_kelly_position >= min_position {
                position = min_position;
                constrained_by = Some("min_position");
            } else {
                return PositionSize::zero(&self.config, max_position, "below_minimum").with_full_kelly(full_kelly_position);
            }
        }

        if position > max_position {
            position = max_position;
            constrained_by = Some("max_position");
        }

        let max_total_exposure = bankroll * max_exposure_pct.unwrap_or(0.75);
        let remaining_exposure = max_total_exposure - current_exposure;

        if remaining_exposure <= 0.0 {
            return PositionSize {
                size: 0.0,
                kelly_fraction_used: kelly_fraction,
                full_kelly_size: full_kelly_position,
                max_allowed: 0.0,
                constrained_by: Some("exposure_limit"),
            };
        }

        if position > remaining_exposure {
            position = remaining_exposure;
            constrained_by = Some("exposure_limit");
        }

        PositionSize {
            size: (position * 100.0).round() / 100.0,
            kelly_fraction_used: kelly_fraction,
            full_kelly_size: (full_kelly_position * 100.0).round() / 100.0,
            max_allowed: max_position.min(remaining_exposure),
            constrained_by,
        }
    }

    /// Size directly from an `Opportunity`; `no_edge` if no side is
    /// recommended.
    pub fn calculate_for_opportunity(
        &self,
        bankroll: f64,
        opportunity: &Opportunity,
        current_exposure: f64,
    ) -> PositionSize {
        match opportunity.recommended_side {
            None => PositionSize::zero(&self.config, self.config.max_position, "no_edge"),
            Some(side) => self.calculate_position_size(
                bankroll,
                opportunity.forecast_prob,
                opportunity.market_prob,
                side,
                current_exposure,
                None,
            ),
        }
    }
}

impl PositionSize {
    fn with_full_kelly(mut self, full_kelly_size: f64) -> Self {
        self.full_kelly_size = full_kelly_size;
        self
    }
}
