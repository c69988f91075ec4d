//! Open-position bookkeeping (spec §4.8), grounded in
//! `original_source/execution/position_tracker.py`'s `PositionTracker`.
//!
//! Indexes open positions by position id, market, token, and location
//! so the diversification filter and status broadcasts can query them
//! cheaply. Detects resolution by price heuristic (a token trading at
//! or above 0.95 has resolved YES; at or below 0.05, resolved NO) and
//! flows realized P&L back into the risk manager exactly once per
//! closed position.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::engine::risk::RiskManager;
use crate::types::{Order, Position, PositionStatus, Side};

const RESOLUTION_HIGH: f64 = 0.95;
const RESOLUTION_LOW: f64 = 0.05;

pub struct PositionTracker {
    positions: HashMap<String, Position>,
    by_token: HashMap<String, String>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
            by_token: HashMap::new(),
        }
    }

    /// Register a filled order as a new position, or merge it into an
    /// already-open position on the same token (a size-weighted average
    /// entry price, per spec §4.8 merge semantics).
    pub fn open_or_merge(
        &mut self,
        order: &Order,
        location: Option<String>,
        cluster: Option<String>,
        resolution_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> String {
        let side = match order.side {
            crate::types::OrderSide::Buy => Side::Yes,
            crate::types::OrderSide::Sell => Side::No,
        };

        if let Some(existing_id) = self.by_token.get(&order.token_id).cloned() {
            if let Some(pos) = self.positions.get_mut(&existing_id) {
                if pos.status == PositionStatus::Open {
                    let total_qty = pos.quantity + order.filled_qty;
                    let total_size = pos.size_usd + order.filled_size;
                    pos.entry_price = if total_qty > 0.0 {
                        (pos.entry_price * pos.quantity + order.avg_fill_price * order.filled_qty) / total_qty
                    } else {
                        pos.entry_price
                    };
                    pos.quantity = total_qty;
                    pos.size_usd = total_size;
                    pos.current_price = order.avg_fill_price;
                    pos.unrealized_pnl = pos.unrealized_pnl_for(pos.current_price);
                    pos.unrealized_pnl_pct = if pos.size_usd > 0.0 {
                        pos.unrealized_pnl / pos.size_usd
                    } else {
                        0.0
                    };
                    return existing_id;
                }
            }
        }

        let position_id = Uuid::new_v4().to_string();
        let position = Position {
            position_id: position_id.clone(),
            market_id: order.market_id.clone(),
            token_id: order.token_id.clone(),
            side,
            entry_price: order.avg_fill_price,
            quantity: order.filled_qty,
            size_usd: order.filled_size,
            current_price: order.avg_fill_price,
            unrealized_pnl: 0.0,
            unrealized_pnl_pct: 0.0,
            realized_pnl: 0.0,
            status: PositionStatus::Open,
            resolution_time,
            location,
            cluster,
            entry_time: now,
            resolution_outcome: None,
        };

        self.by_token.insert(order.token_id.clone(), position_id.clone());
        self.positions.insert(position_id.clone(), position);
        position_id
    }

    /// Update the mark price for every open position on `token_id`,
    /// recomputing unrealized P&L. Returns the position id if the new
    /// price crosses a resolution threshold and the caller should close
    /// it via `resolve`.
    pub fn update_price(&mut self, token_id: &str, price: f64) -> Option<String> {
        let position_id = self.by_token.get(token_id)?.clone();
        let pos = self.positions.get_mut(&position_id)?;
        if pos.status != PositionStatus::Open {
            return None;
        }

        pos.current_price = price;
        pos.unrealized_pnl = pos.unrealized_pnl_for(price);
        pos.unrealized_pnl_pct = if pos.size_usd > 0.0 {
            pos.unrealized_pnl / pos.size_usd
        } else {
            0.0
        };

        if price >= RESOLUTION_HIGH || price <= RESOLUTION_LOW {
            Some(position_id)
        } else {
            None
        }
    }

    /// Close a position as resolved, inferring the winning side from the
    /// final price heuristic, and flow the realized P&L into `risk`.
    ///
    /// Settlement is the fixed $1/$0 payout a resolved binary market
    /// actually pays, not a mark-to-market exit at `final_price`:
    /// `(1 - entry_price) * quantity` if the position's side won,
    /// `-size_usd` if it lost. Distinct from `manual_close`'s
    /// mark-to-market formula, matching
    /// `original_source/execution/position_tracker.py`'s
    /// `_handle_resolution` vs. `close_position`.
    pub fn resolve(
        &mut self,
        position_id: &str,
        final_price: f64,
        now: DateTime<Utc>,
        risk: &mut RiskManager,
    ) -> Option<f64> {
        let outcome = if final_price >= RESOLUTION_HIGH {
            Side::Yes
        } else {
            Side::No
        };

        let pos = self.positions.get(position_id)?;
        if pos.status != PositionStatus::Open {
            return None;
        }
        let realized = if pos.side == outcome {
            (1.0 - pos.entry_price) * pos.quantity
        } else {
            -pos.size_usd
        };

        self.close_internal(position_id, final_price, Some(outcome), realized, now, risk)
    }

    /// Close a position on operator request (§6.3 `close_position`
    /// control command), without inferring a resolution outcome. Unlike
    /// `resolve`, this is a real mark-to-market exit at `exit_price`.
    pub fn manual_close(
        &mut self,
        position_id: &str,
        exit_price: f64,
        now: DateTime<Utc>,
        risk: &mut RiskManager,
    ) -> Option<f64> {
        let pos = self.positions.get(position_id)?;
        if pos.status != PositionStatus::Open {
            return None;
        }
        let realized = pos.unrealized_pnl_for(exit_price);
        self.close_internal(position_id, exit_price, None, realized, now, risk)
    }

    fn close_internal(
        &mut self,
        position_id: &str,
        exit_price: f64,
        outcome: Option<Side>,
        realized: f64,
        now: DateTime<Utc>,
        risk: &mut RiskManager,
    ) -> Option<f64> {
        let pos = self.positions.get_mut(position_id)?;
        if pos.status != PositionStatus::Open {
            return None;
        }

        pos.current_price = exit_price;
        pos.realized_pnl = realized;
        pos.unrealized_pnl = 0.0;
        pos.unrealized_pnl_pct = 0.0;
        pos.status = PositionStatus::Closed;
        pos.resolution_outcome = outcome;

        self.by_token.remove(&pos.token_id);
        risk.update_pnl(realized, now);

        tracing::info!(
            position_id = %position_id,
            realized_pnl = realized,
            outcome = ?outcome,
            "position closed"
        );

        Some(realized)
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .collect()
    }

    pub fn get(&self, position_id: &str) -> Option<&Position> {
        self.positions.get(position_id)
    }

    pub fn all(&self) -> Vec<&Position> {
        self.positions.values().collect()
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskLimits;
    use crate::types::{OrderSide, OrderStatus};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn filled_order(token_id: &str, price: f64, size: f64, qty: f64) -> Order {
        Order {
            order_id: Uuid::new_v4().to_string(),
            market_id: "m1".into(),
            token_id: token_id.into(),
            side: OrderSide::Buy,
            price,
            size_usd: size,
            quantity: qty,
            status: OrderStatus::Filled,
            filled_size: size,
            filled_qty: qty,
            avg_fill_price: price,
            created_at: now(),
            expires_at: None,
            edge_at_entry: 0.2,
            forecast_prob: 0.6,
            is_manual: false,
        }
    }

    /// Scenario: a price update crossing above 0.95 on an open position.
    /// Expected: the tracker flags it for resolution; resolving flows the
    /// realized gain into the risk manager exactly once (spec S6).
    #[test]
    fn test_resolution_heuristic_and_pnl_flowback() {
        let mut tracker = PositionTracker::new();
        let mut risk = RiskManager::new(100.0, RiskLimits::from_env(), now());

        let order = filled_order("tok-yes", 0.40, 5.0, 12.5);
        let id = tracker.open_or_merge(&order, Some("NYC_LAGUARDIA".into()), Some("US_NORTHEAST".into()), now() + Duration::days(2), now());

        assert!(tracker.update_price("tok-yes", 0.70).is_none());
        let resolved = tracker.update_price("tok-yes", 0.97);
        assert_eq!(resolved, Some(id.clone()));

        let realized = tracker.resolve(&id, 0.97, now() + Duration::days(2), &mut risk).unwrap();
        assert!((realized - (1.0 - 0.40) * 12.5).abs() < 1e-9);
        assert_eq!(risk.metrics().total_pnl, realized);

        let pos = tracker.get(&id).unwrap();
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.resolution_outcome, Some(Side::Yes));
        assert!(tracker.open_positions().is_empty());
    }

    /// Scenario: two fills land on the same token before resolution.
    /// Expected: they merge into one position with a size-weighted
    /// average entry price.
    #[test]
    fn test_merge_additional_fills_weighted_average() {
        let mut tracker = PositionTracker::new();
        let order1 = filled_order("tok-yes", 0.40, 4.0, 10.0);
        let id = tracker.open_or_merge(&order1, None, None, now() + Duration::days(1), now());

        let order2 = filled_order("tok-yes", 0.50, 5.0, 10.0);
        let id2 = tracker.open_or_merge(&order2, None, None, now() + Duration::days(1), now());

        assert_eq!(id, id2);
        let pos = tracker.get(&id).unwrap();
        assert!((pos.quantity - 20.0).abs() < 1e-9);
        assert!((pos.size_usd - 9.0).abs() < 1e-9);
        assert!((pos.entry_price - 0.45).abs() < 1e-9);
    }

    /// Scenario: a manual close at an arbitrary market price.
    /// Expected: realized P&L flows to the risk manager with no inferred
    /// resolution outcome.
    #[test]
    fn test_manual_close_has_no_resolution_outcome() {
        let mut tracker = PositionTracker::new();
        let mut risk = RiskManager::new(100.0, RiskLimits::from_env(), now());
        let order = filled_order("tok-yes", 0.40, 5.0, 12.5);
        let id = tracker.open_or_merge(&order, None, None, now() + Duration::days(1), now());

        let realized = tracker.manual_close(&id, 0.35, now(), &mut risk).unwrap();
        assert!(realized < 0.0);
        assert_eq!(tracker.get(&id).unwrap().resolution_outcome, None);
    }
}
