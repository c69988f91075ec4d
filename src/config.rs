use std::collections::HashMap;

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(default)
}

/// Forecast-vs-market edge thresholds (spec §4.3).
#[derive(Clone, Debug)]
pub struct StrategyConfig {
    pub min_edge: f64,
    pub max_edge: f64,
    pub min_model_agreement: f64,
    pub min_liquidity: f64,
    pub min_days_to_resolution: f64,
    pub max_days_to_resolution: f64,
}

impl StrategyConfig {
    pub fn from_env() -> Self {
        Self {
            min_edge: env_f64("STRATEGY_MIN_EDGE", 0.05),
            max_edge: env_f64("STRATEGY_MAX_EDGE", 0.50),
            min_model_agreement: env_f64("STRATEGY_MIN_MODEL_AGREEMENT", 0.60),
            min_liquidity: env_f64("STRATEGY_MIN_LIQUIDITY", 1000.0),
            min_days_to_resolution: env_f64("STRATEGY_MIN_DAYS_TO_RESOLUTION", 0.5),
            max_days_to_resolution: env_f64("STRATEGY_MAX_DAYS_TO_RESOLUTION", 7.0),
        }
    }
}

/// Fractional-Kelly position sizing parameters (spec §4.5).
#[derive(Clone, Debug)]
pub struct PositionSizingConfig {
    pub kelly_fraction: f64,
    pub max_position_pct: f64,
    pub min_position: f64,
    pub max_position: f64,
}

impl PositionSizingConfig {
    pub fn from_env() -> Self {
        Self {
            kelly_fraction: env_f64("POSITION_KELLY_FRACTION", 0.25),
            max_position_pct: env_f64("POSITION_MAX_PCT", 0.05),
            min_position: env_f64("POSITION_MIN_USD", 1.0),
            max_position: env_f64("POSITION_MAX_USD", 10.0),
        }
    }
}

/// Portfolio-level exposure gating parameters (spec §4.6).
#[derive(Clone, Debug)]
pub struct DiversificationConfig {
    pub max_total_exposure_pct: f64,
    pub max_cluster_exposure_pct: f64,
    pub max_same_day_resolution_pct: f64,
    pub min_positions_for_50_pct: usize,
    pub min_positions_for_75_pct: usize,
}

impl DiversificationConfig {
    pub fn from_env() -> Self {
        Self {
            max_total_exposure_pct: env_f64("DIVERSIFICATION_MAX_TOTAL_EXPOSURE_PCT", 0.75),
            max_cluster_exposure_pct: env_f64("DIVERSIFICATION_MAX_CLUSTER_EXPOSURE_PCT", 0.30),
            max_same_day_resolution_pct: env_f64(
                "DIVERSIFICATION_MAX_SAME_DAY_RESOLUTION_PCT",
                0.40,
            ),
            min_positions_for_50_pct: env_u32("DIVERSIFICATION_MIN_POSITIONS_FOR_50_PCT", 2) as usize,
            min_positions_for_75_pct: env_u32("DIVERSIFICATION_MIN_POSITIONS_FOR_75_PCT", 3) as usize,
        }
    }
}

/// Multi-horizon drawdown limits (spec §4.4).
#[derive(Clone, Debug)]
pub struct RiskLimits {
    pub max_daily_loss_pct: f64,
    pub max_weekly_loss_pct: f64,
    pub max_monthly_loss_pct: f64,
    pub max_single_trade: f64,
    pub min_single_trade: f64,
    pub min_hours_before_resolution: f64,
    pub cooldown_after_loss_minutes: i64,
}

impl RiskLimits {
    pub fn from_env() -> Self {
        Self {
            max_daily_loss_pct: env_f64("RISK_MAX_DAILY_LOSS_PCT", 0.10),
            max_weekly_loss_pct: env_f64("RISK_MAX_WEEKLY_LOSS_PCT", 0.25),
            max_monthly_loss_pct: env_f64("RISK_MAX_MONTHLY_LOSS_PCT", 0.40),
            max_single_trade: env_f64("RISK_MAX_SINGLE_TRADE", 10.0),
            min_single_trade: env_f64("RISK_MIN_SINGLE_TRADE", 1.0),
            min_hours_before_resolution: env_f64("RISK_MIN_HOURS_BEFORE_RESOLUTION", 12.0),
            cooldown_after_loss_minutes: env_u64("RISK_COOLDOWN_AFTER_LOSS_MINUTES", 30) as i64,
        }
    }
}

/// Scheduler task default registration (spec §4.2). Intervals are expressed
/// in seconds and can be overridden individually for testing.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub risk_check_secs: u64,
    pub price_update_secs: u64,
    pub order_monitor_secs: u64,
    pub market_scan_secs: u64,
    pub forecast_update_secs: u64,
    pub trading_cycle_secs: u64,
    pub status_broadcast_secs: u64,
    pub metrics_log_secs: u64,
    pub default_max_retries: u32,
    pub default_retry_delay_secs: u64,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            tick_secs: env_u64("SCHEDULER_TICK_SECS", 1),
            risk_check_secs: env_u64("SCHEDULER_RISK_CHECK_SECS", 10),
            price_update_secs: env_u64("SCHEDULER_PRICE_UPDATE_SECS", 30),
            order_monitor_secs: env_u64("SCHEDULER_ORDER_MONITOR_SECS", 15),
            market_scan_secs: env_u64("SCHEDULER_MARKET_SCAN_SECS", 300),
            forecast_update_secs: env_u64("SCHEDULER_FORECAST_UPDATE_SECS", 900),
            trading_cycle_secs: env_u64("SCHEDULER_TRADING_CYCLE_SECS", 120),
            status_broadcast_secs: env_u64("SCHEDULER_STATUS_BROADCAST_SECS", 5),
            metrics_log_secs: env_u64("SCHEDULER_METRICS_LOG_SECS", 60),
            default_max_retries: env_u32("SCHEDULER_DEFAULT_MAX_RETRIES", 3),
            default_retry_delay_secs: env_u64("SCHEDULER_DEFAULT_RETRY_DELAY_SECS", 5),
        }
    }
}

/// A geographic (or other correlated-risk) cluster used only for
/// diversification accounting — never for pricing.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    pub locations: Vec<String>,
    pub correlation_coefficient: f64,
}

/// Opaque location -> cluster lookup table.
#[derive(Clone, Debug)]
pub struct GeographicClusters {
    clusters: HashMap<String, ClusterInfo>,
    location_to_cluster: HashMap<String, String>,
}

impl GeographicClusters {
    pub fn default_table() -> Self {
        let mut clusters = HashMap::new();
        clusters.insert(
            "US_NORTHEAST".to_string(),
            ClusterInfo {
                locations: vec![
                    "NYC_LAGUARDIA".into(),
                    "BOSTON_LOGAN".into(),
                    "PHILADELPHIA_INTL".into(),
                    "WASHINGTON_DULLES".into(),
                ],
                correlation_coefficient: 0.75,
            },
        );
        clusters.insert(
            "US_SOUTHEAST".to_string(),
            ClusterInfo {
                locations: vec![
                    "MIAMI_INTL".into(),
                    "ATLANTA_HARTSFIELD".into(),
                    "HOUSTON_HOBBY".into(),
                    "NEW_ORLEANS_ARMSTRONG".into(),
                ],
                correlation_coefficient: 0.70,
            },
        );
        clusters.insert(
            "US_WEST_COAST".to_string(),
            ClusterInfo {
                locations: vec![
                    "LOS_ANGELES_INTL".into(),
                    "SAN_FRANCISCO_INTL".into(),
                    "SEATTLE_TACOMA".into(),
                    "PHOENIX_SKY".into(),
                ],
                correlation_coefficient: 0.60,
            },
        );
        clusters.insert(
            "WESTERN_EUROPE".to_string(),
            ClusterInfo {
                locations: vec![
                    "LONDON_CITY".into(),
                    "PARIS_CDG".into(),
                    "AMSTERDAM_SCHIPHOL".into(),
                    "FRANKFURT_MAIN".into(),
                ],
                correlation_coefficient: 0.70,
            },
        );

        let mut location_to_cluster = HashMap::new();
        for (cluster_name, info) in &clusters {
            for loc in &info.locations {
                location_to_cluster.insert(loc.clone(), cluster_name.clone());
            }
        }

        Self {
            clusters,
            location_to_cluster,
        }
    }

    /// Resolve a location to its cluster. Unknown locations return `None`
    /// — they still participate in total/same-day exposure checks but not
    /// cluster checks (spec §4.6).
    pub fn cluster_for(&self, location: &str) -> Option<String> {
        self.location_to_cluster.get(location).cloned()
    }

    pub fn info(&self, cluster: &str) -> Option<&ClusterInfo> {
        self.clusters.get(cluster)
    }
}

/// Top-level application configuration loaded from the environment,
/// following the teacher's `env::var(...).unwrap_or_else(...)` idiom.
#[derive(Clone)]
pub struct Config {
    pub initial_bankroll: f64,
    pub gamma_api_url: String,
    pub weather_api_url: String,
    pub polymarket_clob_ws: String,
    pub dry_run: bool,
    pub venue_call_timeout_secs: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_max_backoff_secs: u64,
    pub order_timeout_minutes: i64,
    pub forecast_models: Vec<String>,
    pub strategy: StrategyConfig,
    pub position_sizing: PositionSizingConfig,
    pub diversification: DiversificationConfig,
    pub risk_limits: RiskLimits,
    pub scheduler: SchedulerConfig,
    pub clusters: GeographicClusters,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            initial_bankroll: env_f64("INITIAL_BANKROLL", 100.0),
            gamma_api_url: env_string("GAMMA_API_URL", "https://gamma-api.polymarket.com"),
            weather_api_url: env_string("WEATHER_API_URL", "https://ensemble-api.open-meteo.com/v1/ensemble"),
            polymarket_clob_ws: env_string(
                "PM_CLOB_WS",
                "wss://ws-subscriptions-clob.polymarket.com/ws/market",
            ),
            dry_run: env_bool("DRY_RUN", true),
            venue_call_timeout_secs: env_u64("VENUE_CALL_TIMEOUT_SECS", 30),
            reconnect_max_attempts: env_u32("RECONNECT_MAX_ATTEMPTS", 10),
            reconnect_max_backoff_secs: env_u64("RECONNECT_MAX_BACKOFF_SECS", 60),
            order_timeout_minutes: env_u64("ORDER_TIMEOUT_MINUTES", 60) as i64,
            forecast_models: env_string("FORECAST_MODELS", "gfs_seamless,ecmwf_ifs025,icon_seamless")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            strategy: StrategyConfig::from_env(),
            position_sizing: PositionSizingConfig::from_env(),
            diversification: DiversificationConfig::from_env(),
            risk_limits: RiskLimits::from_env(),
            scheduler: SchedulerConfig::from_env(),
            clusters: GeographicClusters::default_table(),
        }
    }
}
