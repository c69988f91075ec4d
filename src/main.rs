//! Composition root. Wires every trait implementation together, registers
//! the default scheduled tasks (spec §4.2) on the `TaskScheduler`, and
//! exposes the control surface (spec §6.3) as a line-oriented stdin
//! command reader — there being no HTTP/gRPC framework in this crate's
//! dependency stack, stdin is the simplest transport that still keeps
//! command handling decoupled from any particular protocol.

use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::Mutex;

use weather_trader::clock::{Clock, SystemClock};
use weather_trader::config::Config;
use weather_trader::engine::{TaskScheduler, TradingEngine};
use weather_trader::events::EventBus;
use weather_trader::market::{GammaMarketDiscovery, OpenMeteoClient};
use weather_trader::types::{Side, TaskPriority};
use weather_trader::venue::{DryRunVenueClient, PriceFeed};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    tracing::info!(
        bankroll = config.initial_bankroll,
        dry_run = config.dry_run,
        "weather trading agent starting"
    );
    if !config.dry_run {
        tracing::warn!("DRY_RUN=false but no live venue signer is wired in this build; orders still execute as dry-run fills");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let market_discovery = Arc::new(GammaMarketDiscovery::new(config.gamma_api_url.clone(), config.venue_call_timeout_secs));
    let weather = Arc::new(OpenMeteoClient::new(config.weather_api_url.clone(), config.venue_call_timeout_secs));
    let venue = Arc::new(DryRunVenueClient::new());
    let events = EventBus::default();

    let (price_feed, price_feed_handle) = PriceFeed::new(
        config.polymarket_clob_ws.clone(),
        config.reconnect_max_attempts,
        config.reconnect_max_backoff_secs,
    );
    tokio::spawn(async move {
        price_feed.run().await;
    });

    let engine = Arc::new(Mutex::new(TradingEngine::new(
        &config,
        clock.clone(),
        market_discovery,
        weather,
        venue,
        price_feed_handle,
        events.clone(),
    )));

    {
        let mut guard = engine.lock().await;
        guard.start();
    }

    let mut scheduler = TaskScheduler::new(clock.clone(), config.scheduler.tick_secs);
    let sc = &config.scheduler;
    let retries = sc.default_max_retries;
    let retry_delay = sc.default_retry_delay_secs;

    {
        let e = engine.clone();
        scheduler.register("risk_check", sc.risk_check_secs, TaskPriority::Critical, retries, retry_delay, move || {
            let e = e.clone();
            async move { e.lock().await.risk_check().await.map_err(Into::into) }
        });
    }
    {
        let e = engine.clone();
        scheduler.register("price_update", sc.price_update_secs, TaskPriority::High, retries, retry_delay, move || {
            let e = e.clone();
            async move { e.lock().await.process_price_ticks().await.map_err(Into::into) }
        });
    }
    {
        let e = engine.clone();
        scheduler.register("order_monitor", sc.order_monitor_secs, TaskPriority::High, retries, retry_delay, move || {
            let e = e.clone();
            async move { e.lock().await.poll_orders().await.map_err(Into::into) }
        });
    }
    {
        let e = engine.clone();
        scheduler.register("market_scan", sc.market_scan_secs, TaskPriority::Normal, retries, retry_delay, move || {
            let e = e.clone();
            async move { e.lock().await.scan_markets().await.map_err(Into::into) }
        });
    }
    {
        let e = engine.clone();
        scheduler.register("forecast_update", sc.forecast_update_secs, TaskPriority::Normal, retries, retry_delay, move || {
            let e = e.clone();
            async move { e.lock().await.update_forecasts().await.map_err(Into::into) }
        });
    }
    {
        let e = engine.clone();
        scheduler.register("trading_cycle", sc.trading_cycle_secs, TaskPriority::Normal, retries, retry_delay, move || {
            let e = e.clone();
            async move { e.lock().await.run_trading_cycle().await.map_err(Into::into) }
        });
    }
    {
        let e = engine.clone();
        scheduler.register("status_broadcast", sc.status_broadcast_secs, TaskPriority::Low, retries, retry_delay, move || {
            let e = e.clone();
            async move { e.lock().await.broadcast_status().await.map_err(Into::into) }
        });
    }
    {
        let e = engine.clone();
        scheduler.register("metrics_log", sc.metrics_log_secs, TaskPriority::Low, retries, retry_delay, move || {
            let e = e.clone();
            async move {
                let metrics = e.lock().await.risk_metrics();
                tracing::info!(
                    daily_pnl = metrics.daily_pnl,
                    weekly_pnl = metrics.weekly_pnl,
                    monthly_pnl = metrics.monthly_pnl,
                    is_halted = metrics.is_halted,
                    "risk metrics"
                );
                Ok(())
            }
        });
    }

    tokio::spawn(run_control_surface(engine.clone()));

    scheduler.run().await;
}

/// Reads one command per line from stdin and dispatches it against the
/// engine (spec §6.3: start, pause, resume, stop, reset_daily_pnl,
/// clear_halt, close_position, place_manual_trade).
async fn run_control_surface(engine: Arc<Mutex<TradingEngine>>) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = rx.recv().await {
        let parts: Vec<&str> = line.trim().split_whitespace().collect();
        let Some(&cmd) = parts.first() else { continue };
        let mut guard = engine.lock().await;

        match cmd {
            "start" => guard.start(),
            "pause" => guard.pause(),
            "resume" => guard.resume(),
            "stop" => guard.stop(),
            "reset_daily_pnl" => guard.reset_daily_pnl(),
            "clear_halt" => {
                let force = parts.get(1).map(|s| *s == "force").unwrap_or(false);
                match guard.clear_halt(force) {
                    Ok(()) => tracing::info!("halt cleared"),
                    Err(reason) => tracing::warn!(reason, "clear_halt rejected"),
                }
            }
            "close_position" => {
                let Some(position_id) = parts.get(1) else {
                    tracing::warn!("close_position requires <position_id> <exit_price>");
                    continue;
                };
                let Some(price) = parts.get(2).and_then(|s| s.parse::<f64>().ok()) else {
                    tracing::warn!("close_position requires a numeric exit_price");
                    continue;
                };
                match guard.close_position(position_id, price).await {
                    Ok(pnl) => tracing::info!(?pnl, "position closed"),
                    Err(e) => tracing::warn!(error = %e, "close_position failed"),
                }
            }
            "trade" => {
                let (Some(market_id), Some(side_str), Some(size)) = (
                    parts.get(1),
                    parts.get(2),
                    parts.get(3).and_then(|s| s.parse::<f64>().ok()),
                ) else {
                    tracing::warn!("trade requires <market_id> <yes|no> <size> [price]");
                    continue;
                };
                let side = match side_str.to_lowercase().as_str() {
                    "yes" => Side::Yes,
                    "no" => Side::No,
                    _ => {
                        tracing::warn!(side = %side_str, "unrecognized side, expected yes/no");
                        continue;
                    }
                };
                let price = parts.get(4).and_then(|s| s.parse::<f64>().ok());
                match guard.place_manual_trade(market_id, side, size, price).await {
                    Ok(order) => tracing::info!(order_id = %order.order_id, "manual trade submitted"),
                    Err(e) => tracing::warn!(error = %e, "manual trade failed"),
                }
            }
            other => tracing::warn!(command = other, "unrecognized control command"),
        }
    }
}
