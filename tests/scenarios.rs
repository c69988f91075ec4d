//! End-to-end reproductions of the six literal numeric walkthroughs.
//! S4 (cluster diversity floor) is exercised with its literal inputs
//! directly in `engine::diversification`'s own test module; the other
//! five are reproduced here across the components they actually cross.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use weather_trader::clock::TestClock;
use weather_trader::config::{DiversificationConfig, PositionSizingConfig, RiskLimits, StrategyConfig};
use weather_trader::engine::diversification::{DiversificationFilter, PortfolioState, TradeCandidate};
use weather_trader::engine::edge::EdgeCalculator;
use weather_trader::engine::order_monitor::OrderMonitor;
use weather_trader::engine::position_tracker::PositionTracker;
use weather_trader::engine::risk::RiskManager;
use weather_trader::engine::sizer::PositionSizer;
use weather_trader::error::AgentResult;
use weather_trader::types::{Comparison, EnsembleForecast, HaltCause, Order, OrderSide, OrderStatus, Side};
use weather_trader::venue::{PlaceOrderRequest, VenueClient, VenueOrderStatus};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn ensemble(models: &[(&str, &[f64])]) -> EnsembleForecast {
    let mut map = HashMap::new();
    for (name, values) in models {
        map.insert(name.to_string(), values.to_vec());
    }
    EnsembleForecast {
        location: "NYC_LAGUARDIA".into(),
        target_date: now() + Duration::days(3),
        models: map,
        native_unit: "celsius".into(),
    }
}

/// S1 — edge, size, diversification, and the resulting order all run
/// end to end on the spec's literal market M1: bankroll 100, YES 0.40,
/// GFS {15..19}, ECMWF {14,17,20}, threshold 17C >=.
#[test]
fn s1_edge_size_and_emit() {
    let edge_calc = EdgeCalculator::new(StrategyConfig::from_env());
    let sizer = PositionSizer::new(PositionSizingConfig::from_env());
    let diversification = DiversificationFilter::new(DiversificationConfig::from_env());

    let ens = ensemble(&[
        ("gfs_seamless", &[15.0, 16.0, 17.0, 18.0, 19.0]),
        ("ecmwf_ifs025", &[14.0, 17.0, 20.0]),
    ]);
    let (forecast_prob, agreement, per_model) =
        edge_calc.calculate_forecast_probability(&ens, 17.0, None, Comparison::Ge, "celsius");
    assert!((forecast_prob - 0.585714).abs() < 1e-4);

    let opportunity = edge_calc.calculate_edge("M1", forecast_prob, 0.40, agreement, per_model);
    assert_eq!(opportunity.recommended_side, Some(Side::Yes));
    assert!((opportunity.edge - 0.4643).abs() < 1e-3);
    assert!(edge_calc.is_tradeable(&opportunity));

    let size = sizer.calculate_for_opportunity(100.0, &opportunity, 0.0);
    assert!((size.size - 5.0).abs() < 1e-6);

    let candidate = TradeCandidate {
        market_id: "M1".into(),
        size: size.size,
        cluster: Some("US_NORTHEAST".into()),
        resolution_date: now() + Duration::days(3),
    };
    let result = diversification.check(&candidate, &PortfolioState::default(), 100.0);
    assert!(result.allowed);
    assert!((result.max_allowed_size - 5.0).abs() < 1e-9);
}

/// S2 — three realized losses on the same day breach the 10% daily
/// loss limit on the third, halting the engine until UTC midnight.
#[test]
fn s2_halt_on_daily_breach() {
    let mut risk = RiskManager::new(100.0, RiskLimits::from_env(), now());
    risk.update_pnl(-3.0, now());
    risk.update_pnl(-3.0, now());
    assert!(risk.can_trade(now()).0);

    risk.update_pnl(-5.0, now());
    assert_eq!(risk.halt_cause(), HaltCause::DailyLoss);
    assert!(!risk.can_trade(now()).0);

    let next_midnight = now() + Duration::days(1) + Duration::minutes(1);
    let (ok, _) = risk.can_trade(next_midnight);
    assert!(ok);
    assert_eq!(risk.halt_cause(), HaltCause::None);
}

/// S3 — a 40% monthly drawdown halts the engine; daily and weekly
/// rollovers pass without clearing it; only a forced clear does.
#[test]
fn s3_monthly_halt_is_sticky() {
    let day5 = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
    let mut risk = RiskManager::new(100.0, RiskLimits::from_env(), day5);
    risk.update_pnl(-40.0, day5);
    assert_eq!(risk.halt_cause(), HaltCause::MonthlyLoss);

    risk.can_trade(day5 + Duration::days(1));
    assert_eq!(risk.halt_cause(), HaltCause::MonthlyLoss);
    risk.can_trade(day5 + Duration::days(7));
    assert_eq!(risk.halt_cause(), HaltCause::MonthlyLoss);

    assert!(risk.clear_halt(false).is_err());
    assert!(risk.clear_halt(true).is_ok());
    assert!(!risk.is_halted());
}

struct ScriptedVenue {
    reports: StdMutex<Vec<VenueOrderStatus>>,
}

#[async_trait]
impl VenueClient for ScriptedVenue {
    async fn place_order(&self, _req: PlaceOrderRequest, _now: DateTime<Utc>) -> AgentResult<Order> {
        unimplemented!("orders are seeded directly in this scenario")
    }

    async fn get_order_status(&self, _order_id: &str) -> AgentResult<VenueOrderStatus> {
        let mut reports = self.reports.lock().unwrap();
        Ok(if reports.len() > 1 { reports.remove(0) } else { reports[0].clone() })
    }

    async fn cancel_order(&self, _order_id: &str) -> AgentResult<()> {
        Ok(())
    }
}

/// S5 — an order fills partially (2.50 of 5.00 at 0.40) then fully
/// (5.00 at avg 0.405). `on_fill` fires once per poll with the
/// incremental delta; `on_complete` fires exactly once; the resulting
/// position carries the fully filled quantity and size.
#[tokio::test]
async fn s5_order_fill_lifecycle() {
    let clock = Arc::new(TestClock::new(now()));
    let venue = Arc::new(ScriptedVenue {
        reports: StdMutex::new(vec![
            VenueOrderStatus {
                status: OrderStatus::Partial,
                filled_size: 2.50,
                filled_qty: 6.25,
                avg_fill_price: 0.40,
            },
            VenueOrderStatus {
                status: OrderStatus::Filled,
                filled_size: 5.00,
                filled_qty: 12.348,
                avg_fill_price: 0.405,
            },
        ]),
    });

    let fills = Arc::new(StdMutex::new(Vec::<(f64, f64)>::new()));
    let completions = Arc::new(StdMutex::new(0u32));
    let final_order = Arc::new(StdMutex::new(None::<Order>));

    let mut monitor = OrderMonitor::new(venue, clock.clone(), 60);
    let f = fills.clone();
    monitor.on_fill(move |_order, fill| {
        f.lock().unwrap().push((fill.size, fill.quantity));
    });
    let c = completions.clone();
    let fo = final_order.clone();
    monitor.on_complete(move |order| {
        *c.lock().unwrap() += 1;
        *fo.lock().unwrap() = Some(order.clone());
    });

    let seed = Order {
        order_id: "o1".into(),
        market_id: "M1".into(),
        token_id: "tok-yes".into(),
        side: OrderSide::Buy,
        price: 0.40,
        size_usd: 5.0,
        quantity: 12.5,
        status: OrderStatus::Pending,
        filled_size: 0.0,
        filled_qty: 0.0,
        avg_fill_price: 0.0,
        created_at: now(),
        expires_at: None,
        edge_at_entry: 0.4643,
        forecast_prob: 0.585714,
        is_manual: false,
    };
    monitor.track(seed);

    monitor.poll_once().await.unwrap();
    assert_eq!(fills.lock().unwrap().len(), 1);
    assert_eq!(*completions.lock().unwrap(), 0);
    let (size0, qty0) = fills.lock().unwrap()[0];
    assert!((size0 - 2.50).abs() < 1e-9);
    assert!((qty0 - 6.25).abs() < 1e-9);

    monitor.poll_once().await.unwrap();
    assert_eq!(fills.lock().unwrap().len(), 2);
    assert_eq!(*completions.lock().unwrap(), 1);
    let (size1, qty1) = fills.lock().unwrap()[1];
    assert!((size1 - 2.50).abs() < 1e-9);
    assert!((qty1 - 6.098).abs() < 1e-6);

    let completed = final_order.lock().unwrap().clone().unwrap();
    let mut tracker = PositionTracker::new();
    let id = tracker.open_or_merge(&completed, None, None, now() + Duration::days(3), now());
    let pos = tracker.get(&id).unwrap();
    assert!((pos.quantity - 12.348).abs() < 1e-6);
    assert!((pos.entry_price - 0.405).abs() < 1e-9);
    assert!((pos.size_usd - 5.00).abs() < 1e-9);
}

/// S6 — a YES position (qty 10, entry 0.60, size 6.00) resolves when
/// price crosses 0.95; realized P&L of 4.00 flows into the risk
/// manager, which resets `consecutive_losses`.
#[test]
fn s6_resolution_accounting() {
    let mut tracker = PositionTracker::new();
    let mut risk = RiskManager::new(100.0, RiskLimits::from_env(), now());
    risk.update_pnl(-1.0, now());
    assert_eq!(risk.metrics().consecutive_losses, 1);

    let order = Order {
        order_id: Uuid::new_v4().to_string(),
        market_id: "M1".into(),
        token_id: "tok-yes".into(),
        side: OrderSide::Buy,
        price: 0.60,
        size_usd: 6.0,
        quantity: 10.0,
        status: OrderStatus::Filled,
        filled_size: 6.0,
        filled_qty: 10.0,
        avg_fill_price: 0.60,
        created_at: now(),
        expires_at: None,
        edge_at_entry: 0.2,
        forecast_prob: 0.7,
        is_manual: false,
    };
    let id = tracker.open_or_merge(&order, None, None, now() + Duration::days(1), now());

    let resolved = tracker.update_price("tok-yes", 0.97);
    assert_eq!(resolved, Some(id.clone()));

    let realized = tracker.resolve(&id, 0.97, now() + Duration::days(1), &mut risk).unwrap();
    assert!((realized - 4.00).abs() < 1e-9);
    assert_eq!(risk.metrics().consecutive_losses, 0);
}
