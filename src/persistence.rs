//! Persisted state (spec §6.4), grounded in
//! `Zuytan-rustrade`'s `InMemoryTradeRepository`/`InMemoryPortfolioRepository`
//! repository pattern: a trait per concern, one `Arc<RwLock<...>>`-backed
//! in-memory implementation shipped here. A real deployment swaps in a
//! database-backed implementation of the same traits without touching
//! the engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::AgentResult;
use crate::types::{HaltCause, Order, Position};

/// One completed (closed/expired/cancelled) trade record, as persisted
/// for history/reporting. Distinct from `Order` — it is the
/// point-in-time record, not a mutable tracked object.
#[derive(Debug, Clone)]
pub struct CompletedTrade {
    pub order: Order,
    pub realized_pnl: Option<f64>,
    pub closed_at: DateTime<Utc>,
}

/// Filters accepted by `TradeStore::find`. Every field is optional;
/// an unset field matches everything.
#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub market_id: Option<String>,
    pub winning_only: Option<bool>,
}

impl TradeFilter {
    fn matches(&self, trade: &CompletedTrade) -> bool {
        if let Some(since) = self.since {
            if trade.closed_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if trade.closed_at > until {
                return false;
            }
        }
        if let Some(market_id) = &self.market_id {
            if &trade.order.market_id != market_id {
                return false;
            }
        }
        if let Some(winning_only) = self.winning_only {
            let is_win = trade.realized_pnl.unwrap_or(0.0) > 0.0;
            if is_win != winning_only {
                return false;
            }
        }
        true
    }
}

/// A snapshot of risk state suitable for rebuilding a `RiskManager` on
/// restart (spec §6.4 "rebuild risk state from persistence").
#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub daily_pnl: f64,
    pub weekly_pnl: f64,
    pub monthly_pnl: f64,
    pub total_pnl: f64,
    pub is_halted: bool,
    pub halt_cause: HaltCause,
    pub snapshot_time: DateTime<Utc>,
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn record(&self, trade: CompletedTrade) -> AgentResult<()>;
    async fn find(&self, filter: &TradeFilter, limit: usize, offset: usize) -> AgentResult<Vec<CompletedTrade>>;
    async fn count(&self, filter: &TradeFilter) -> AgentResult<usize>;
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn save_open_positions(&self, positions: Vec<Position>) -> AgentResult<()>;
    async fn load_open_positions(&self) -> AgentResult<Vec<Position>>;
}

#[async_trait]
pub trait RiskStore: Send + Sync {
    async fn save_snapshot(&self, snapshot: RiskSnapshot) -> AgentResult<()>;
    async fn load_snapshot(&self) -> AgentResult<Option<RiskSnapshot>>;
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> AgentResult<Option<String>>;
    async fn set(&self, key: &str, value: String) -> AgentResult<()>;
}

/// In-memory implementation of every persisted-state concern. Data is
/// lost on process restart — adequate for dry-run operation and
/// tests; a durable implementation would back each trait with a real
/// database behind the same interfaces.
pub struct InMemoryStore {
    trades: Arc<RwLock<Vec<CompletedTrade>>>,
    positions: Arc<RwLock<Vec<Position>>>,
    risk_snapshot: Arc<RwLock<Option<RiskSnapshot>>>,
    config: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            trades: Arc::new(RwLock::new(Vec::new())),
            positions: Arc::new(RwLock::new(Vec::new())),
            risk_snapshot: Arc::new(RwLock::new(None)),
            config: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradeStore for InMemoryStore {
    async fn record(&self, trade: CompletedTrade) -> AgentResult<()> {
        self.trades.write().await.push(trade);
        Ok(())
    }

    async fn find(&self, filter: &TradeFilter, limit: usize, offset: usize) -> AgentResult<Vec<CompletedTrade>> {
        let trades = self.trades.read().await;
        Ok(trades
            .iter()
            .rev()
            .filter(|t| filter.matches(t))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &TradeFilter) -> AgentResult<usize> {
        let trades = self.trades.read().await;
        Ok(trades.iter().filter(|t| filter.matches(t)).count())
    }
}

#[async_trait]
impl PositionStore for InMemoryStore {
    async fn save_open_positions(&self, positions: Vec<Position>) -> AgentResult<()> {
        *self.positions.write().await = positions;
        Ok(())
    }

    async fn load_open_positions(&self) -> AgentResult<Vec<Position>> {
        Ok(self.positions.read().await.clone())
    }
}

#[async_trait]
impl RiskStore for InMemoryStore {
    async fn save_snapshot(&self, snapshot: RiskSnapshot) -> AgentResult<()> {
        *self.risk_snapshot.write().await = Some(snapshot);
        Ok(())
    }

    async fn load_snapshot(&self) -> AgentResult<Option<RiskSnapshot>> {
        Ok(self.risk_snapshot.read().await.clone())
    }
}

#[async_trait]
impl ConfigStore for InMemoryStore {
    async fn get(&self, key: &str) -> AgentResult<Option<String>> {
        Ok(self.config.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> AgentResult<()> {
        self.config.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

impl Clone for CompletedTrade {
    fn clone(&self) -> Self {
        Self {
            order: self.order.clone(),
            realized_pnl: self.realized_pnl,
            closed_at: self.closed_at,
        }
    }
}

impl Clone for RiskSnapshot {
    fn clone(&self) -> Self {
        Self {
            daily_pnl: self.daily_pnl,
            weekly_pnl: self.weekly_pnl,
            monthly_pnl: self.monthly_pnl,
            total_pnl: self.total_pnl,
            is_halted: self.is_halted,
            halt_cause: self.halt_cause,
            snapshot_time: self.snapshot_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderSide, OrderStatus};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn trade(market_id: &str, pnl: f64, closed_at: DateTime<Utc>) -> CompletedTrade {
        CompletedTrade {
            order: Order {
                order_id: "o1".into(),
                market_id: market_id.into(),
                token_id: "tok".into(),
                side: OrderSide::Buy,
                price: 0.4,
                size_usd: 5.0,
                quantity: 12.5,
                status: OrderStatus::Filled,
                filled_size: 5.0,
                filled_qty: 12.5,
                avg_fill_price: 0.4,
                created_at: now(),
                expires_at: None,
                edge_at_entry: 0.2,
                forecast_prob: 0.6,
                is_manual: false,
            },
            realized_pnl: Some(pnl),
            closed_at,
        }
    }

    /// Scenario: three trades across two markets, one a loss.
    /// Expected: filtering by market_id and by winning_only each narrow
    /// correctly, and pagination returns newest-first.
    #[tokio::test]
    async fn test_find_filters_and_paginates() {
        let store = InMemoryStore::new();
        store.record(trade("m1", 2.0, now())).await.unwrap();
        store.record(trade("m1", -1.0, now() + chrono::Duration::hours(1))).await.unwrap();
        store.record(trade("m2", 3.0, now() + chrono::Duration::hours(2))).await.unwrap();

        let all = store.find(&TradeFilter::default(), 10, 0).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].order.market_id, "m2");

        let m1_only = store
            .find(&TradeFilter { market_id: Some("m1".into()), ..Default::default() }, 10, 0)
            .await
            .unwrap();
        assert_eq!(m1_only.len(), 2);

        let wins_only = store
            .find(&TradeFilter { winning_only: Some(true), ..Default::default() }, 10, 0)
            .await
            .unwrap();
        assert_eq!(wins_only.len(), 2);
    }

    /// Scenario: save then load a risk snapshot.
    /// Expected: round-trips exactly, supporting restart rebuild.
    #[tokio::test]
    async fn test_risk_snapshot_round_trip() {
        let store = InMemoryStore::new();
        assert!(store.load_snapshot().await.unwrap().is_none());

        store
            .save_snapshot(RiskSnapshot {
                daily_pnl: -2.0,
                weekly_pnl: -2.0,
                monthly_pnl: -2.0,
                total_pnl: -2.0,
                is_halted: false,
                halt_cause: HaltCause::None,
                snapshot_time: now(),
            })
            .await
            .unwrap();

        let loaded = store.load_snapshot().await.unwrap().unwrap();
        assert_eq!(loaded.daily_pnl, -2.0);
    }

    /// Scenario: config key/value store round trip.
    #[tokio::test]
    async fn test_config_store_round_trip() {
        let store = InMemoryStore::new();
        assert!(store.get("dry_run").await.unwrap().is_none());
        store.set("dry_run", "true".into()).await.unwrap();
        assert_eq!(store.get("dry_run").await.unwrap(), Some("true".into()));
    }
}
