//! Outbound event bus (spec §6.2), grounded in the teacher's
//! `telemetry/writer.rs` single-consumer-task pattern, generalized from
//! a CSV sink to an in-process typed pub/sub broadcast so any number of
//! subscribers (an HTTP status surface, a log sink, tests) can tap the
//! same stream.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::types::HaltCause;

/// One published fact. Each variant corresponds to one row of the
/// channel table; `channel_name()` recovers which channel it belongs
/// on (subscribers may also filter by channel string directly).
#[derive(Debug, Clone)]
pub enum AgentEvent {
    PriceUpdate {
        market_id: String,
        token_id: String,
        price: f64,
        side: String,
    },
    PositionUpdate {
        position_id: String,
        current_price: f64,
        unrealized_pnl: f64,
    },
    TradeExecuted {
        trade_id: String,
        market: String,
        side: String,
        size: f64,
        price: f64,
    },
    TradeResolved {
        trade_id: String,
        result: String,
        pnl: f64,
    },
    EdgeAlert {
        market_id: String,
        edge: f64,
        forecast_probability: f64,
        market_probability: f64,
    },
    RiskAlert {
        alert_type: String,
        current_value: f64,
        limit_value: f64,
    },
    SystemStatus {
        status: String,
        message: String,
    },
    HaltTriggered {
        reason: HaltCause,
        can_auto_recover: bool,
    },
}

impl AgentEvent {
    pub fn channel_name(&self) -> &'static str {
        match self {
            AgentEvent::PriceUpdate { .. } => "prices",
            AgentEvent::PositionUpdate { .. } => "positions",
            AgentEvent::TradeExecuted { .. } | AgentEvent::TradeResolved { .. } => "trades",
            AgentEvent::EdgeAlert { .. } | AgentEvent::RiskAlert { .. } => "alerts",
            AgentEvent::SystemStatus { .. } | AgentEvent::HaltTriggered { .. } => "system",
        }
    }
}

/// A published event, timestamped and tagged with its channel, the
/// shape every subscriber actually receives.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel: &'static str,
    pub timestamp: DateTime<Utc>,
    pub event: AgentEvent,
}

/// Thin broadcast wrapper. Every subscriber sees every event;
/// `"all"` as a channel name in consumer code is the wildcard —
/// filtering happens by the subscriber comparing `envelope.channel`,
/// never at publish time.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: AgentEvent, now: DateTime<Utc>) {
        let envelope = Envelope {
            channel: event.channel_name(),
            timestamp: now,
            event,
        };
        // No subscribers is not an error: events fire whether or not
        // anything is listening yet.
        let _ = self.sender.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    /// Scenario: a trade_executed event published with no prior
    /// subscribers, then a fresh subscriber joins and a second event
    /// publishes.
    /// Expected: the late subscriber receives only the event published
    /// after it joined, correctly tagged with the "trades" channel.
    #[tokio::test]
    async fn test_late_subscriber_sees_only_events_after_joining() {
        let bus = EventBus::default();
        bus.publish(
            AgentEvent::TradeExecuted {
                trade_id: "t1".into(),
                market: "m1".into(),
                side: "YES".into(),
                size: 5.0,
                price: 0.40,
            },
            now(),
        );

        let mut rx = bus.subscribe();
        bus.publish(
            AgentEvent::TradeResolved {
                trade_id: "t1".into(),
                result: "WIN".into(),
                pnl: 1.5,
            },
            now(),
        );

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.channel, "trades");
        assert!(matches!(envelope.event, AgentEvent::TradeResolved { .. }));
    }

    /// Scenario: every event variant.
    /// Expected: each maps to exactly the channel spec §6.2 assigns it.
    #[test]
    fn test_channel_routing_matches_the_table() {
        assert_eq!(
            AgentEvent::PriceUpdate {
                market_id: "m".into(),
                token_id: "t".into(),
                price: 0.5,
                side: "YES".into()
            }
            .channel_name(),
            "prices"
        );
        assert_eq!(
            AgentEvent::HaltTriggered {
                reason: HaltCause::DailyLoss,
                can_auto_recover: true
            }
            .channel_name(),
            "system"
        );
        assert_eq!(
            AgentEvent::EdgeAlert {
                market_id: "m".into(),
                edge: 0.1,
                forecast_probability: 0.6,
                market_probability: 0.5
            }
            .channel_name(),
            "alerts"
        );
    }
}
