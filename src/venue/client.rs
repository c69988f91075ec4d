//! Order execution against a trading venue (spec §4.12, §6.1
//! `VenueClient`).
//!
//! Grounded in the teacher's `gateway/order.rs` dry_run/live branch and
//! `original_source/execution/clob_client.py`'s `PolymarketCLOBClient`.
//! The live CLOB path is out of scope (spec Non-goals exclude
//! order-routing/execution-quality concerns beyond simple limit
//! orders) — `DryRunVenueClient` is the one execution backend shipped
//! here, simulating immediate fills the way the teacher's dry_run
//! branch does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};
use crate::types::{Order, OrderSide, OrderStatus};

/// A request to open a position, built by the trading engine from a
/// sized `Opportunity`.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub market_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size_usd: f64,
    pub edge_at_entry: f64,
    pub forecast_prob: f64,
    pub is_manual: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A point-in-time order status snapshot, as returned by a venue's
/// polling endpoint.
#[derive(Debug, Clone, Copy)]
pub struct VenueOrderStatus {
    pub status: OrderStatus,
    pub filled_size: f64,
    pub filled_qty: f64,
    pub avg_fill_price: f64,
}

/// Minimal venue surface the engine needs: place, poll, cancel. A real
/// implementation (e.g. the Polymarket CLOB) would sign and submit
/// orders over HTTP; the wire format is out of scope here.
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn place_order(&self, req: PlaceOrderRequest, now: DateTime<Utc>) -> AgentResult<Order>;

    async fn get_order_status(&self, order_id: &str) -> AgentResult<VenueOrderStatus>;

    async fn cancel_order(&self, order_id: &str) -> AgentResult<()>;
}

/// Paper-trading venue: every order fills immediately and completely
/// at its requested price, the way the teacher's `dry_run` branch
/// does. No network calls, no credentials.
pub struct DryRunVenueClient {
    filled: std::sync::Mutex<std::collections::HashMap<String, Order>>,
}

impl DryRunVenueClient {
    pub fn new() -> Self {
        Self {
            filled: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for DryRunVenueClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueClient for DryRunVenueClient {
    async fn place_order(&self, req: PlaceOrderRequest, now: DateTime<Utc>) -> AgentResult<Order> {
        let order_id = Uuid::new_v4().to_string();
        let quantity = if req.price > 0.0 {
            req.size_usd / req.price
        } else {
            0.0
        };

        let order = Order {
            order_id: order_id.clone(),
            market_id: req.market_id,
            token_id: req.token_id,
            side: req.side,
            price: req.price,
            size_usd: req.size_usd,
            quantity,
            status: OrderStatus::Filled,
            filled_size: req.size_usd,
            filled_qty: quantity,
            avg_fill_price: req.price,
            created_at: now,
            expires_at: req.expires_at,
            edge_at_entry: req.edge_at_entry,
            forecast_prob: req.forecast_prob,
            is_manual: req.is_manual,
        };

        tracing::info!(
            order_id = %order.order_id,
            market_id = %order.market_id,
            side = ?order.side,
            price = order.price,
            size_usd = order.size_usd,
            "dry-run order filled"
        );

        self.filled.lock().unwrap().insert(order_id, order.clone());
        Ok(order)
    }

    async fn get_order_status(&self, order_id: &str) -> AgentResult<VenueOrderStatus> {
        let guard = self.filled.lock().unwrap();
        let order = guard.get(order_id).ok_or_else(|| AgentError::Fatal(format!(
            "dry-run venue has no record of order {order_id}"
        )))?;
        Ok(VenueOrderStatus {
            status: order.status,
            filled_size: order.filled_size,
            filled_qty: order.filled_qty,
            avg_fill_price: order.avg_fill_price,
        })
    }

    async fn cancel_order(&self, _order_id: &str) -> AgentResult<()> {
        // Dry-run orders fill synchronously at placement time, so by
        // the time a caller could cancel, there is nothing left open.
        Ok(())
    }
}
