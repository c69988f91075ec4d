//! Order lifecycle monitoring (spec §4.7), grounded in
//! `original_source/execution/order_monitor.py`'s `OrderMonitor`.
//!
//! Polls a `VenueClient` for every tracked order, detects incremental
//! fills, and cancels/expires orders past their deadline. `on_fill` and
//! `on_complete` callbacks are each delivered exactly once per fill and
//! exactly once per order reaching a terminal status.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AgentResult;
use crate::types::{FillEvent, Order, OrderStatus};
use crate::venue::VenueClient;

struct Tracked {
    order: Order,
    notified_complete: bool,
}

type FillCallback = Box<dyn Fn(&Order, &FillEvent) + Send + Sync>;
type CompleteCallback = Box<dyn Fn(&Order) + Send + Sync>;

pub struct OrderMonitor {
    venue: Arc<dyn VenueClient>,
    clock: Arc<dyn Clock>,
    default_timeout: Duration,
    active: HashMap<String, Tracked>,
    on_fill: Vec<FillCallback>,
    on_complete: Vec<CompleteCallback>,
}

impl OrderMonitor {
    pub fn new(venue: Arc<dyn VenueClient>, clock: Arc<dyn Clock>, default_timeout_minutes: i64) -> Self {
        Self {
            venue,
            clock,
            default_timeout: Duration::minutes(default_timeout_minutes),
            active: HashMap::new(),
            on_fill: Vec::new(),
            on_complete: Vec::new(),
        }
    }

    pub fn on_fill(&mut self, callback: impl Fn(&Order, &FillEvent) + Send + Sync + 'static) {
        self.on_fill.push(Box::new(callback));
    }

    pub fn on_complete(&mut self, callback: impl Fn(&Order) + Send + Sync + 'static) {
        self.on_complete.push(Box::new(callback));
    }

    /// Begin monitoring a freshly placed order. Orders that are already
    /// terminal (e.g. the dry-run venue's immediate fills) still run
    /// through one poll so `on_fill`/`on_complete` fire consistently.
    pub fn track(&mut self, order: Order) {
        self.active.insert(
            order.order_id.clone(),
            Tracked {
                order,
                notified_complete: false,
            },
        );
    }

    pub fn active_orders(&self) -> Vec<&Order> {
        self.active.values().map(|t| &t.order).collect()
    }

    fn deadline(&self, order: &Order) -> DateTime<Utc> {
        order.expires_at.unwrap_or(order.created_at + self.default_timeout)
    }

    /// Poll every actively-monitored order once. Terminal orders are
    /// removed from tracking after their callbacks fire.
    pub async fn poll_once(&mut self) -> AgentResult<()> {
        let now = self.clock.now();
        let order_ids: Vec<String> = self.active.keys().cloned().collect();

        for order_id in order_ids {
            let deadline = {
                let tracked = &self.active[&order_id];
                self.deadline(&tracked.order)
            };

            if now >= deadline {
                let still_open = {
                    let tracked = &self.active[&order_id];
                    !tracked.order.status.is_terminal()
                };
                if still_open {
                    let _ = self.venue.cancel_order(&order_id).await;
                    if let Some(tracked) = self.active.get_mut(&order_id) {
                        tracked.order.status = OrderStatus::Expired;
                    }
                    tracing::warn!(order_id = %order_id, "order expired, cancelled at venue");
                }
                self.complete_and_remove(&order_id);
                continue;
            }

            let status = match self.venue.get_order_status(&order_id).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(order_id = %order_id, error = %e, "order status poll failed");
                    continue;
                }
            };

            let fill_delta = {
                let tracked = &self.active[&order_id];
                status.filled_size - tracked.order.filled_size
            };

            if fill_delta > 1e-9 {
                let fill_qty_delta = {
                    let tracked = &self.active[&order_id];
                    status.filled_qty - tracked.order.filled_qty
                };
                let fill = FillEvent {
                    order_id: order_id.clone(),
                    fill_id: Uuid::new_v4().to_string(),
                    price: status.avg_fill_price,
                    quantity: fill_qty_delta,
                    size: fill_delta,
                    timestamp: now,
                };

                if let Some(tracked) = self.active.get_mut(&order_id) {
                    tracked.order.filled_size = status.filled_size;
                    tracked.order.filled_qty = status.filled_qty;
                    tracked.order.avg_fill_price = status.avg_fill_price;
                    tracked.order.status = status.status;
                }

                let order_snapshot = self.active[&order_id].order.clone();
                for cb in &self.on_fill {
                    cb(&order_snapshot, &fill);
                }
            } else if let Some(tracked) = self.active.get_mut(&order_id) {
                tracked.order.status = status.status;
            }

            if status.status.is_terminal() {
                self.complete_and_remove(&order_id);
            }
        }

        Ok(())
    }

    fn complete_and_remove(&mut self, order_id: &str) {
        if let Some(mut tracked) = self.active.remove(order_id) {
            if !tracked.notified_complete {
                tracked.notified_complete = true;
                for cb in &self.on_complete {
                    cb(&tracked.order);
                }
            }
        }
    }

    pub async fn cancel(&mut self, order_id: &str) -> AgentResult<()> {
        self.venue.cancel_order(order_id).await?;
        if let Some(tracked) = self.active.get_mut(order_id) {
            tracked.order.status = OrderStatus::Cancelled;
        }
        self.complete_and_remove(order_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::venue::{PlaceOrderRequest, VenueOrderStatus};
    use crate::types::OrderSide;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockVenue {
        statuses: Mutex<HashMap<String, VenueOrderStatus>>,
    }

    #[async_trait]
    impl VenueClient for MockVenue {
        async fn place_order(&self, _req: PlaceOrderRequest, _now: DateTime<Utc>) -> AgentResult<Order> {
            unimplemented!("not exercised by these tests")
        }

        async fn get_order_status(&self, order_id: &str) -> AgentResult<VenueOrderStatus> {
            Ok(self.statuses.lock().unwrap()[order_id].clone())
        }

        async fn cancel_order(&self, _order_id: &str) -> AgentResult<()> {
            Ok(())
        }
    }

    fn order(id: &str, now: DateTime<Utc>) -> Order {
        Order {
            order_id: id.into(),
            market_id: "m".into(),
            token_id: "tok".into(),
            side: OrderSide::Buy,
            price: 0.40,
            size_usd: 5.0,
            quantity: 12.5,
            status: OrderStatus::Pending,
            filled_size: 0.0,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            created_at: now,
            expires_at: None,
            edge_at_entry: 0.1,
            forecast_prob: 0.6,
            is_manual: false,
        }
    }

    /// Scenario: an order that fills partially, then fully, across two polls.
    /// Expected: on_fill fires twice with the incremental delta each time;
    /// on_complete fires exactly once when the order reaches Filled.
    #[tokio::test]
    async fn test_incremental_fills_and_single_completion() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(TestClock::new(now));
        let venue = Arc::new(MockVenue {
            statuses: Mutex::new(HashMap::new()),
        });
        venue.statuses.lock().unwrap().insert(
            "o1".into(),
            VenueOrderStatus {
                status: OrderStatus::Partial,
                filled_size: 2.0,
                filled_qty: 5.0,
                avg_fill_price: 0.40,
            },
        );

        let mut monitor = OrderMonitor::new(venue.clone(), clock.clone(), 60);

        let fill_count = Arc::new(AtomicUsize::new(0));
        let complete_count = Arc::new(AtomicUsize::new(0));
        let fc = fill_count.clone();
        monitor.on_fill(move |_order, _fill| {
            fc.fetch_add(1, Ordering::SeqCst);
        });
        let cc = complete_count.clone();
        monitor.on_complete(move |_order| {
            cc.fetch_add(1, Ordering::SeqCst);
        });

        monitor.track(order("o1", now));
        monitor.poll_once().await.unwrap();
        assert_eq!(fill_count.load(Ordering::SeqCst), 1);
        assert_eq!(complete_count.load(Ordering::SeqCst), 0);

        venue.statuses.lock().unwrap().insert(
            "o1".into(),
            VenueOrderStatus {
                status: OrderStatus::Filled,
                filled_size: 5.0,
                filled_qty: 12.5,
                avg_fill_price: 0.40,
            },
        );
        monitor.poll_once().await.unwrap();
        assert_eq!(fill_count.load(Ordering::SeqCst), 2);
        assert_eq!(complete_count.load(Ordering::SeqCst), 1);

        // A further poll must not re-fire on_complete: the order is no
        // longer tracked.
        monitor.poll_once().await.unwrap();
        assert_eq!(complete_count.load(Ordering::SeqCst), 1);
    }

    /// Scenario: an order past its deadline, still open at the venue.
    /// Expected: cancelled, marked Expired, on_complete fires once.
    #[tokio::test]
    async fn test_expired_order_is_cancelled() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(TestClock::new(now));
        let venue = Arc::new(MockVenue {
            statuses: Mutex::new(HashMap::new()),
        });
        venue.statuses.lock().unwrap().insert(
            "o1".into(),
            VenueOrderStatus {
                status: OrderStatus::Open,
                filled_size: 0.0,
                filled_qty: 0.0,
                avg_fill_price: 0.0,
            },
        );

        let mut monitor = OrderMonitor::new(venue, clock.clone(), 60);
        let complete_count = Arc::new(AtomicUsize::new(0));
        let cc = complete_count.clone();
        monitor.on_complete(move |order| {
            assert_eq!(order.status, OrderStatus::Expired);
            cc.fetch_add(1, Ordering::SeqCst);
        });

        monitor.track(order("o1", now));
        clock.advance(Duration::minutes(61));
        monitor.poll_once().await.unwrap();
        assert_eq!(complete_count.load(Ordering::SeqCst), 1);
        assert!(monitor.active_orders().is_empty());
    }
}
