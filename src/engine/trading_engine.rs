//! The orchestrator (spec §4.9), grounded in
//! `original_source/app/services/trading_engine.py`'s `TradingEngine`.
//!
//! Ties `EdgeCalculator` -> `PositionSizer` -> `DiversificationFilter` ->
//! `RiskManager` -> `VenueClient` -> `OrderMonitor` -> `PositionTracker`
//! into one trading cycle, plus the engine state machine and the
//! control-surface operations of spec §6.3.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::{Config, GeographicClusters};
use crate::engine::diversification::{DiversificationFilter, PortfolioState, TradeCandidate};
use crate::engine::edge::EdgeCalculator;
use crate::engine::order_monitor::OrderMonitor;
use crate::engine::position_tracker::PositionTracker;
use crate::engine::risk::{RiskManager, TradeValidation};
use crate::engine::sizer::PositionSizer;
use crate::error::{AgentError, AgentResult};
use crate::events::{AgentEvent, EventBus};
use crate::market::discovery::{parse_market, MarketDiscovery};
use crate::market::weather::WeatherClient;
use crate::types::{
    EngineState, EnsembleForecast, MarketSpec, Order, OrderSide, OrderStatus, Side, Variable,
};
use crate::venue::{PlaceOrderRequest, PriceFeedHandle, PriceTick, VenueClient};

fn variable_param(variable: Variable) -> &'static str {
    match variable {
        Variable::Precip => "precipitation",
        Variable::TempMax | Variable::TempMin | Variable::Bracket | Variable::Binary => "temperature_2m",
    }
}

pub struct TradingEngine {
    clock: Arc<dyn Clock>,
    clusters: GeographicClusters,
    forecast_models: Vec<String>,
    bankroll0: f64,

    market_discovery: Arc<dyn MarketDiscovery>,
    weather: Arc<dyn WeatherClient>,
    venue: Arc<dyn VenueClient>,
    price_feed: PriceFeedHandle,
    price_ticks: tokio::sync::broadcast::Receiver<PriceTick>,
    events: EventBus,

    edge: EdgeCalculator,
    sizer: PositionSizer,
    diversification: DiversificationFilter,

    risk: Arc<Mutex<RiskManager>>,
    positions: Arc<Mutex<PositionTracker>>,
    order_monitor: OrderMonitor,

    markets: Arc<Mutex<HashMap<String, MarketSpec>>>,
    forecasts: Mutex<HashMap<String, EnsembleForecast>>,

    state: EngineState,
}

impl TradingEngine {
    pub fn new(
        config: &Config,
        clock: Arc<dyn Clock>,
        market_discovery: Arc<dyn MarketDiscovery>,
        weather: Arc<dyn WeatherClient>,
        venue: Arc<dyn VenueClient>,
        price_feed: PriceFeedHandle,
        events: EventBus,
    ) -> Self {
        let risk = Arc::new(Mutex::new(RiskManager::new(
            config.initial_bankroll,
            config.risk_limits.clone(),
            clock.now(),
        )));
        let positions = Arc::new(Mutex::new(PositionTracker::new()));
        let markets: Arc<Mutex<HashMap<String, MarketSpec>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut order_monitor = OrderMonitor::new(venue.clone(), clock.clone(), config.order_timeout_minutes);
        Self::wire_order_monitor(&mut order_monitor, positions.clone(), markets.clone(), events.clone(), clock.clone());

        let price_ticks = price_feed.ticks();

        Self {
            clusters: config.clusters.clone(),
            forecast_models: config.forecast_models.clone(),
            bankroll0: config.initial_bankroll,
            market_discovery,
            weather,
            venue,
            price_feed,
            price_ticks,
            events,
            edge: EdgeCalculator::new(config.strategy.clone()),
            sizer: PositionSizer::new(config.position_sizing.clone()),
            diversification: DiversificationFilter::new(config.diversification.clone()),
            risk,
            positions,
            order_monitor,
            markets,
            forecasts: Mutex::new(HashMap::new()),
            state: EngineState::Stopped,
            clock,
        }
    }

    /// Fill-before-position (spec §5): the callback that receives a fill
    /// opens/merges the position in the same synchronous call, before
    /// any other task runs.
    fn wire_order_monitor(
        order_monitor: &mut OrderMonitor,
        positions: Arc<Mutex<PositionTracker>>,
        markets: Arc<Mutex<HashMap<String, MarketSpec>>>,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) {
        order_monitor.on_fill(move |order, _fill| {
            let now = clock.now();
            let market = markets.lock().unwrap().get(&order.market_id).cloned();
            let (location, cluster, resolution_time) = match &market {
                Some(m) => (Some(m.location.clone()), m.cluster.clone(), m.resolution_time),
                None => (None, None, now),
            };
            positions
                .lock()
                .unwrap()
                .open_or_merge(order, location, cluster, resolution_time, now);

            events.publish(
                AgentEvent::TradeExecuted {
                    trade_id: order.order_id.clone(),
                    market: order.market_id.clone(),
                    side: format!("{:?}", order.side),
                    size: order.filled_size,
                    price: order.avg_fill_price,
                },
                now,
            );
        });
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    fn transition(&mut self, to: EngineState) {
        self.state = to;
        let now = self.clock.now();
        self.events.publish(
            AgentEvent::SystemStatus {
                status: format!("{:?}", to),
                message: "engine state changed".into(),
            },
            now,
        );
    }

    pub fn start(&mut self) {
        if self.state == EngineState::Stopped {
            self.transition(EngineState::Active);
        }
    }

    pub fn pause(&mut self) {
        if self.state == EngineState::Active {
            self.transition(EngineState::Paused);
        }
    }

    pub fn resume(&mut self) {
        if self.state == EngineState::Paused {
            self.transition(EngineState::Active);
        }
    }

    pub fn stop(&mut self) {
        self.transition(EngineState::Stopped);
    }

    /// `market_scan` scheduled task: discover active markets, parse
    /// them, and subscribe the price feed to every new YES token.
    pub async fn scan_markets(&self) -> AgentResult<()> {
        let raws = self.market_discovery.list_active(100, Some("weather")).await?;
        let mut markets = self.markets.lock().unwrap();
        for raw in &raws {
            if let Some(spec) = parse_market(raw, &self.clusters) {
                if !markets.contains_key(&spec.market_id) {
                    self.price_feed.subscribe_token(spec.token_yes.clone());
                }
                markets.insert(spec.market_id.clone(), spec);
            }
        }
        Ok(())
    }

    /// `forecast_update` scheduled task: refresh the ensemble forecast
    /// cache for every currently known market. One market's upstream
    /// failure does not abort the others (spec §7 retry-locally policy).
    pub async fn update_forecasts(&self) -> AgentResult<()> {
        let markets_snapshot: Vec<MarketSpec> = self.markets.lock().unwrap().values().cloned().collect();
        for market in markets_snapshot {
            let variable = variable_param(market.variable);
            match self
                .weather
                .fetch_ensemble(&market.location, market.resolution_time, variable, &self.forecast_models)
                .await
            {
                Ok(forecast) => {
                    self.forecasts.lock().unwrap().insert(market.market_id.clone(), forecast);
                }
                Err(e) => {
                    tracing::warn!(market_id = %market.market_id, error = %e, "forecast update failed, keeping stale cache");
                }
            }
        }
        Ok(())
    }

    /// `order_monitor` scheduled task.
    pub async fn poll_orders(&mut self) -> AgentResult<()> {
        self.order_monitor.poll_once().await
    }

    /// `risk_check` scheduled task (CRITICAL priority — spec §4.2, P7):
    /// surfaces a risk alert the instant `canTrade` would reject a trade.
    pub async fn risk_check(&self) -> AgentResult<()> {
        let now = self.clock.now();
        let (ok, reason) = self.risk.lock().unwrap().can_trade(now);
        if !ok {
            if let Some(reason) = reason {
                self.events.publish(
                    AgentEvent::RiskAlert {
                        alert_type: reason,
                        current_value: 0.0,
                        limit_value: 0.0,
                    },
                    now,
                );
            }
        }
        Ok(())
    }

    /// `price_update` scheduled task: drain every price tick buffered
    /// since the last poll, updating position marks and detecting
    /// resolution-by-price (spec §4.8). Resolution-before-risk (spec
    /// §5): realized P&L lands in `RiskManager` before the
    /// `trade_resolved` event publishes.
    pub async fn process_price_ticks(&mut self) -> AgentResult<()> {
        loop {
            let tick = match self.price_ticks.try_recv() {
                Ok(tick) => tick,
                Err(tokio::sync::broadcast::error::TryRecvError::Empty) => break,
                Err(tokio::sync::broadcast::error::TryRecvError::Closed) => break,
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "price feed receiver lagged, dropped ticks");
                    continue;
                }
            };

            let Some(price) = tick.mid.or(tick.bid).or(tick.ask) else {
                continue;
            };

            self.events.publish(
                AgentEvent::PriceUpdate {
                    market_id: String::new(),
                    token_id: tick.token_id.clone(),
                    price,
                    side: "YES".into(),
                },
                tick.timestamp,
            );

            let resolved = self.positions.lock().unwrap().update_price(&tick.token_id, price);
            if let Some(position_id) = resolved {
                let now = self.clock.now();
                let mut risk_guard = self.risk.lock().unwrap();
                let mut positions_guard = self.positions.lock().unwrap();
                let realized = positions_guard.resolve(&position_id, price, now, &mut risk_guard);
                drop(positions_guard);
                drop(risk_guard);
                if let Some(pnl) = realized {
                    self.events.publish(
                        AgentEvent::TradeResolved {
                            trade_id: position_id,
                            result: if pnl >= 0.0 { "WIN".into() } else { "LOSS".into() },
                            pnl,
                        },
                        now,
                    );
                }
            }
        }
        Ok(())
    }

    /// `status_broadcast` scheduled task.
    pub async fn broadcast_status(&self) -> AgentResult<()> {
        let now = self.clock.now();
        let metrics = self.risk.lock().unwrap().metrics();
        self.events.publish(
            AgentEvent::SystemStatus {
                status: format!("{:?}", self.state),
                message: format!(
                    "daily_pnl={:.2} halted={} consecutive_losses={}",
                    metrics.daily_pnl, metrics.is_halted, metrics.consecutive_losses
                ),
            },
            now,
        );
        Ok(())
    }

    /// `trading_cycle` scheduled task — the one-cycle logic of spec §4.9.
    pub async fn run_trading_cycle(&mut self) -> AgentResult<()> {
        let now = self.clock.now();

        let (can_trade, _reason) = self.risk.lock().unwrap().can_trade(now);
        if !can_trade {
            return Ok(());
        }
        if self.state != EngineState::Active {
            return Ok(());
        }

        let markets_snapshot: Vec<MarketSpec> = self.markets.lock().unwrap().values().cloned().collect();
        let forecasts_snapshot = self.forecasts.lock().unwrap().clone();

        for market in &markets_snapshot {
            let Some(forecast) = forecasts_snapshot.get(&market.market_id) else {
                continue;
            };

            let (forecast_prob, agreement, model_probs) = self.edge.calculate_forecast_probability(
                forecast,
                market.threshold,
                market.threshold_upper,
                market.comparison,
                &market.unit,
            );
            let opportunity =
                self.edge
                    .calculate_edge(&market.market_id, forecast_prob, market.yes_price, agreement, model_probs);

            if !self.edge.is_tradeable(&opportunity) {
                continue;
            }

            self.events.publish(
                AgentEvent::EdgeAlert {
                    market_id: market.market_id.clone(),
                    edge: opportunity.edge,
                    forecast_probability: opportunity.forecast_prob,
                    market_probability: opportunity.market_prob,
                },
                now,
            );

            let open_positions: Vec<crate::types::Position> =
                self.positions.lock().unwrap().all().into_iter().cloned().collect();
            let portfolio = PortfolioState::from_positions(&open_positions);

            let sized = self.sizer.calculate_for_opportunity(self.bankroll0, &opportunity, portfolio.total_exposure);
            if sized.size <= 0.0 {
                continue;
            }

            let candidate = TradeCandidate {
                market_id: market.market_id.clone(),
                size: sized.size,
                cluster: market.cluster.clone(),
                resolution_date: market.resolution_time,
            };
            let diversification_result = self.diversification.check(&candidate, &portfolio, self.bankroll0);
            if !diversification_result.allowed {
                continue;
            }
            let final_size = sized.size.min(diversification_result.max_allowed_size);
            if final_size <= 0.0 {
                continue;
            }

            let validation = {
                let mut risk = self.risk.lock().unwrap();
                risk.validate_trade(final_size, market.resolution_time, now)
            };
            if !matches!(validation, TradeValidation::Ok) {
                continue;
            }

            // REDESIGN FLAG (spec §9): edge_at_entry is populated on
            // every emitted order, not only manual ones.
            let side = opportunity
                .recommended_side
                .expect("is_tradeable() guarantees a recommended side");
            self.submit_order(market, side, final_size, market.yes_price, opportunity.edge, opportunity.forecast_prob, false, now)
                .await?;
        }

        Ok(())
    }

    /// Build and submit a `PlaceOrderRequest`, then register the order
    /// for monitoring. `price` is always passed in as the YES-side
    /// probability (what `sizer`/`edge` reason about); for `Side::No`
    /// this is inverted to the NO token's own price and the order is
    /// routed against `token_no` rather than `token_yes`, mirroring the
    /// `(1-forecast_prob, 1-market_price)` substitution `sizer.rs`
    /// already performs for sizing.
    #[allow(clippy::too_many_arguments)]
    async fn submit_order(
        &mut self,
        market: &MarketSpec,
        side: Side,
        size_usd: f64,
        price: f64,
        edge_at_entry: f64,
        forecast_prob: f64,
        is_manual: bool,
        now: DateTime<Utc>,
    ) -> AgentResult<Order> {
        let (order_side, token_id, price) = match side {
            Side::Yes => (OrderSide::Buy, market.token_yes.clone(), price),
            Side::No => (OrderSide::Sell, market.token_no.clone(), 1.0 - price),
        };

        let request = PlaceOrderRequest {
            market_id: market.market_id.clone(),
            token_id,
            side: order_side,
            price,
            size_usd,
            edge_at_entry,
            forecast_prob,
            is_manual,
            expires_at: None,
        };

        let placed = self.venue.place_order(request, now).await?;

        // Track a zero-filled view so the next order_monitor poll
        // detects the full delta and fires on_fill/on_complete through
        // the normal path, even though a dry-run venue fills synchronously.
        let seed = Order {
            status: OrderStatus::Pending,
            filled_size: 0.0,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            ..placed.clone()
        };
        self.order_monitor.track(seed);

        Ok(placed)
    }

    /// `place_manual_trade` control command (spec §6.3).
    pub async fn place_manual_trade(
        &mut self,
        market_id: &str,
        side: Side,
        size: f64,
        price: Option<f64>,
    ) -> AgentResult<Order> {
        let now = self.clock.now();
        let market = self
            .markets
            .lock()
            .unwrap()
            .get(market_id)
            .cloned()
            .ok_or_else(|| AgentError::Fatal(format!("unknown market {market_id}")))?;
        let price = price.unwrap_or(market.yes_price);
        self.submit_order(&market, side, size, price, 0.0, 0.5, true, now).await
    }

    /// `close_position` control command (spec §6.3).
    pub async fn close_position(&mut self, position_id: &str, exit_price: f64) -> AgentResult<Option<f64>> {
        let now = self.clock.now();
        let realized = {
            let mut risk_guard = self.risk.lock().unwrap();
            let mut positions_guard = self.positions.lock().unwrap();
            positions_guard.manual_close(position_id, exit_price, now, &mut risk_guard)
        };
        if let Some(pnl) = realized {
            self.events.publish(
                AgentEvent::TradeResolved {
                    trade_id: position_id.to_string(),
                    result: "MANUAL_CLOSE".into(),
                    pnl,
                },
                now,
            );
        }
        Ok(realized)
    }

    /// `reset_daily_pnl` control command (spec §6.3).
    pub fn reset_daily_pnl(&mut self) {
        let now = self.clock.now();
        self.risk.lock().unwrap().reset_daily_pnl(now);
    }

    /// `clear_halt(force)` control command (spec §6.3).
    pub fn clear_halt(&mut self, force: bool) -> Result<(), &'static str> {
        self.risk.lock().unwrap().clear_halt(force)
    }

    pub fn open_positions(&self) -> Vec<crate::types::Position> {
        self.positions.lock().unwrap().open_positions().into_iter().cloned().collect()
    }

    pub fn risk_metrics(&self) -> crate::engine::risk::RiskMetrics {
        self.risk.lock().unwrap().metrics()
    }
}
