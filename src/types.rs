use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which side of a binary market an order/position/opportunity concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The forecast variable a market resolves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variable {
    TempMax,
    TempMin,
    Precip,
    Bracket,
    Binary,
}

/// Comparison operator used to evaluate ensemble members against a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Ge,
    Gt,
    Le,
    Lt,
    /// Inclusive-lower, exclusive-upper bracket: `[a, b)`.
    Bracket,
}

/// A parsed, immutable market description. Produced once by the
/// (out-of-scope) market-question parser and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSpec {
    pub market_id: String,
    pub token_yes: String,
    pub token_no: String,
    pub location: String,
    pub cluster: Option<String>,
    pub resolution_time: DateTime<Utc>,
    pub variable: Variable,
    pub threshold: f64,
    /// Upper bound of the bracket, only meaningful when `comparison == Bracket`.
    pub threshold_upper: Option<f64>,
    pub comparison: Comparison,
    pub unit: String,
    pub liquidity: f64,
    pub yes_price: f64,
}

/// One model's ensemble for a single `(location, target_date)` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleForecast {
    pub location: String,
    pub target_date: DateTime<Utc>,
    /// model_id -> ordered member values, in the model's native unit.
    pub models: HashMap<String, Vec<f64>>,
    pub native_unit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

/// A transient, one-cycle derived comparison of forecast vs. market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub market_id: String,
    pub forecast_prob: f64,
    pub market_prob: f64,
    pub edge: f64,
    pub edge_yes: f64,
    pub edge_no: f64,
    pub expected_value: f64,
    pub model_agreement: f64,
    pub recommended_side: Option<Side>,
    pub confidence: ConfidenceLevel,
    pub model_probabilities: HashMap<String, f64>,
}

impl Opportunity {
    pub fn is_tradeable(&self, min_edge: f64, max_edge: f64, min_agreement: f64) -> bool {
        self.recommended_side.is_some()
            && self.edge >= min_edge
            && self.edge <= max_edge
            && self.model_agreement >= min_agreement
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    Partial,
    Filled,
    Cancelled,
    Expired,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub market_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size_usd: f64,
    pub quantity: f64,
    pub status: OrderStatus,
    pub filled_size: f64,
    pub filled_qty: f64,
    pub avg_fill_price: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub edge_at_entry: f64,
    pub forecast_prob: f64,
    pub is_manual: bool,
}

impl Order {
    pub fn remaining_size(&self) -> f64 {
        self.size_usd - self.filled_size
    }

    pub fn fill_percentage(&self) -> f64 {
        if self.size_usd > 0.0 {
            self.filled_size / self.size_usd
        } else {
            0.0
        }
    }
}

/// One detected fill, delivered to `on_fill` exactly once per fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_id: String,
    pub fill_id: String,
    pub price: f64,
    pub quantity: f64,
    pub size: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub size_usd: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
    pub realized_pnl: f64,
    pub status: PositionStatus,
    pub resolution_time: DateTime<Utc>,
    pub location: Option<String>,
    pub cluster: Option<String>,
    pub entry_time: DateTime<Utc>,
    pub resolution_outcome: Option<Side>,
}

impl Position {
    pub fn unrealized_pnl_for(&self, current_price: f64) -> f64 {
        match self.side {
            Side::Yes => (current_price - self.entry_price) * self.quantity,
            Side::No => (self.entry_price - current_price) * self.quantity,
        }
    }

    pub fn market_value(&self) -> f64 {
        self.current_price * self.quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltCause {
    None,
    DailyLoss,
    WeeklyLoss,
    MonthlyLoss,
    Manual,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_pnl: f64,
    pub weekly_pnl: f64,
    pub monthly_pnl: f64,
    pub total_pnl: f64,
    pub daily_start: DateTime<Utc>,
    pub weekly_start: DateTime<Utc>,
    pub monthly_start: DateTime<Utc>,
    pub is_halted: bool,
    pub halt_cause: HaltCause,
    pub halt_reason_text: Option<String>,
    pub halt_time: Option<DateTime<Utc>>,
    pub last_loss_time: Option<DateTime<Utc>>,
    pub consecutive_losses: u32,
    pub daily_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Active,
    Paused,
}
