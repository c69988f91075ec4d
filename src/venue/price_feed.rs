//! Real-time order-book price feed (spec §4.13, §6.1), grounded in the
//! teacher's `feeds/polymarket.rs` WebSocket consumer and
//! `original_source/execution/price_feed.py`'s `PriceFeed`.
//!
//! Reconnect contract (spec §6.1): exponential backoff starting at 1s,
//! doubling each failed attempt, capped at `reconnect_max_backoff_secs`
//! (default 60s); gives up after `reconnect_max_attempts` (default 10)
//! consecutive failures. On every successful reconnect, every
//! previously-subscribed token is resubscribed before normal operation
//! resumes.

use std::collections::{HashMap, HashSet};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// One price observation for a single outcome token.
#[derive(Debug, Clone)]
pub struct PriceTick {
    pub token_id: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub mid: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

/// Cheap, cloneable front for a running `PriceFeed` task: subscribe to
/// tokens and tap the outgoing tick stream.
#[derive(Clone)]
pub struct PriceFeedHandle {
    commands: mpsc::Sender<Command>,
    ticks: broadcast::Sender<PriceTick>,
}

impl PriceFeedHandle {
    pub fn subscribe_token(&self, token_id: impl Into<String>) {
        let _ = self.commands.try_send(Command::Subscribe(token_id.into()));
    }

    pub fn unsubscribe_token(&self, token_id: impl Into<String>) {
        let _ = self.commands.try_send(Command::Unsubscribe(token_id.into()));
    }

    pub fn ticks(&self) -> broadcast::Receiver<PriceTick> {
        self.ticks.subscribe()
    }
}

/// The reconnecting WebSocket task itself. Construct with `PriceFeed::new`,
/// obtain a `PriceFeedHandle` to drive it, then `tokio::spawn(feed.run())`.
pub struct PriceFeed {
    ws_url: String,
    reconnect_max_attempts: u32,
    reconnect_max_backoff_secs: u64,
    commands: mpsc::Receiver<Command>,
    ticks: broadcast::Sender<PriceTick>,
}

impl PriceFeed {
    pub fn new(
        ws_url: String,
        reconnect_max_attempts: u32,
        reconnect_max_backoff_secs: u64,
    ) -> (Self, PriceFeedHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (tick_tx, _) = broadcast::channel(4096);
        let handle = PriceFeedHandle {
            commands: cmd_tx,
            ticks: tick_tx.clone(),
        };
        (
            Self {
                ws_url,
                reconnect_max_attempts,
                reconnect_max_backoff_secs,
                commands: cmd_rx,
                ticks: tick_tx,
            },
            handle,
        )
    }

    /// Drive the feed until the command channel closes (i.e. every
    /// `PriceFeedHandle` has been dropped) or reconnection attempts are
    /// exhausted.
    pub async fn run(mut self) {
        let mut subscribed: HashSet<String> = HashSet::new();
        let mut consecutive_failures: u32 = 0;

        'reconnect: loop {
            if consecutive_failures >= self.reconnect_max_attempts {
                tracing::error!(
                    attempts = consecutive_failures,
                    "price feed giving up after exhausting reconnect attempts"
                );
                return;
            }

            tracing::info!(url = %self.ws_url, "price feed connecting");
            let ws = match connect_async(&self.ws_url).await {
                Ok((ws, _)) => ws,
                Err(e) => {
                    let backoff = self.backoff_for(consecutive_failures);
                    tracing::warn!(error = %e, backoff_secs = backoff.as_secs(), "price feed connect failed");
                    consecutive_failures += 1;
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };
            consecutive_failures = 0;
            tracing::info!("price feed connected");

            let (mut write, mut read) = ws.split();

            for token in &subscribed {
                let _ = write.send(Message::Text(subscribe_message(token))).await;
            }

            let mut ping_interval = tokio::time::interval(StdDuration::from_secs(10));

            loop {
                tokio::select! {
                    cmd = self.commands.recv() => {
                        match cmd {
                            Some(Command::Subscribe(token)) => {
                                if subscribed.insert(token.clone()) {
                                    let _ = write.send(Message::Text(subscribe_message(&token))).await;
                                }
                            }
                            Some(Command::Unsubscribe(token)) => {
                                if subscribed.remove(&token) {
                                    let _ = write.send(Message::Text(unsubscribe_message(&token))).await;
                                }
                            }
                            None => {
                                tracing::info!("price feed handle dropped, stopping");
                                return;
                            }
                        }
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                for tick in parse_market_message(&text) {
                                    let _ = self.ticks.send(tick);
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "price feed ws error, reconnecting");
                                consecutive_failures += 1;
                                continue 'reconnect;
                            }
                            None => {
                                tracing::warn!("price feed stream ended, reconnecting");
                                consecutive_failures += 1;
                                continue 'reconnect;
                            }
                        }
                    }
                    _ = ping_interval.tick() => {
                        let _ = write.send(Message::Ping(Vec::new())).await;
                    }
                }
            }
        }
    }

    fn backoff_for(&self, failures: u32) -> StdDuration {
        let secs = 1u64.saturating_shl(failures.min(31)).min(self.reconnect_max_backoff_secs);
        StdDuration::from_secs(secs.max(1))
    }
}

fn subscribe_message(token_id: &str) -> String {
    serde_json::json!({
        "type": "subscribe",
        "channel": "price",
        "assets_ids": [token_id],
    })
    .to_string()
}

fn unsubscribe_message(token_id: &str) -> String {
    serde_json::json!({
        "type": "unsubscribe",
        "channel": "price",
        "assets_ids": [token_id],
    })
    .to_string()
}

/// Parse one or more outcome-token ticks out of a raw CLOB WS message.
/// Handles both single-object and batched-array payloads.
fn parse_market_message(text: &str) -> Vec<PriceTick> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return Vec::new();
    };

    let events: Vec<serde_json::Value> = if value.is_array() {
        value.as_array().cloned().unwrap_or_default()
    } else if value.is_object() {
        vec![value]
    } else {
        return Vec::new();
    };

    let mut by_token: HashMap<String, (Option<f64>, Option<f64>, i64)> = HashMap::new();

    for event in events {
        let event_type = event.get("event_type").and_then(|v| v.as_str()).unwrap_or("");
        if !matches!(event_type, "best_bid_ask" | "price_change" | "book") {
            continue;
        }
        let Some(asset_id) = event.get("asset_id").and_then(|v| v.as_str()) else {
            continue;
        };

        let bid = numeric_field(&event, "best_bid").or_else(|| numeric_field(&event, "price"));
        let ask = numeric_field(&event, "best_ask");
        let ts_ms = event
            .get("timestamp")
            .and_then(|v| v.as_i64())
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let entry = by_token.entry(asset_id.to_string()).or_insert((None, None, ts_ms));
        if bid.is_some() {
            entry.0 = bid;
        }
        if ask.is_some() {
            entry.1 = ask;
        }
        entry.2 = ts_ms;
    }

    by_token
        .into_iter()
        .map(|(token_id, (bid, ask, ts_ms))| {
            let mid = match (bid, ask) {
                (Some(b), Some(a)) => Some((b + a) / 2.0),
                _ => None,
            };
            PriceTick {
                token_id,
                bid,
                ask,
                mid,
                timestamp: DateTime::from_timestamp_millis(ts_ms).unwrap_or_else(Utc::now),
            }
        })
        .collect()
}

fn numeric_field(value: &serde_json::Value, key: &str) -> Option<f64> {
    let field = value.get(key)?;
    field.as_f64().or_else(|| field.as_str().and_then(|s| s.parse().ok()))
}
