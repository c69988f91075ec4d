//! Multi-horizon drawdown risk management (spec §4.4).
//!
//! Period boundaries: day = UTC midnight->midnight, week = UTC
//! Monday 00:00->next Monday, month = UTC 1st 00:00->1st of next month.
//! Every mutator rolls over periods first, then mutates, matching
//! `original_source/risk/risk_manager.py`.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};

use crate::config::RiskLimits;
use crate::types::HaltCause;

/// Outcome of a trade-size/timing validation check.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeValidation {
    Ok,
    Rejected {
        reason: &'static str,
        suggested_size: Option<f64>,
    },
}

fn day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc()
}

fn week_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let days_since_monday = at.weekday().num_days_from_monday() as i64;
    day_start(at) - Duration::days(days_since_monday)
}

fn month_start(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
        .unwrap()
}

/// RiskManager. Bankroll is fixed at construction time: §4.4 requires all
/// drawdown limits use the *initial* bankroll, never the current one.
pub struct RiskManager {
    bankroll0: f64,
    limits: RiskLimits,

    daily_pnl: f64,
    weekly_pnl: f64,
    monthly_pnl: f64,
    total_pnl: f64,

    daily_start: DateTime<Utc>,
    weekly_start: DateTime<Utc>,
    monthly_start: DateTime<Utc>,

    is_halted: bool,
    halt_cause: HaltCause,
    halt_reason_text: Option<String>,
    halt_time: Option<DateTime<Utc>>,

    last_loss_time: Option<DateTime<Utc>>,
    consecutive_losses: u32,

    daily_trades: u32,
    winning_trades: u32,
    losing_trades: u32,
}

/// Read-only diagnostic snapshot, grounded in
/// `risk_manager.py::get_risk_metrics` / `get_halt_conditions_status`.
#[derive(Debug, Clone)]
pub struct RiskMetrics {
    pub daily_pnl: f64,
    pub weekly_pnl: f64,
    pub monthly_pnl: f64,
    pub total_pnl: f64,
    pub is_halted: bool,
    pub halt_cause: HaltCause,
    pub consecutive_losses: u32,
    pub daily_trades: u32,
}

impl RiskManager {
    pub fn new(initial_bankroll: f64, limits: RiskLimits, now: DateTime<Utc>) -> Self {
        Self {
            bankroll0: initial_bankroll,
            limits,
            daily_pnl: 0.0,
            weekly_pnl: 0.0,
            monthly_pnl: 0.0,
            total_pnl: 0.0,
            daily_start: day_start(now),
            weekly_start: week_start(now),
            monthly_start: month_start(now),
            is_halted: false,
            halt_cause: HaltCause::None,
            halt_reason_text: None,
            halt_time: None,
            last_loss_time: None,
            consecutive_losses: 0,
            daily_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
        }
    }

    /// Rollover check: zero a period's P&L and advance its start once `now`
    /// crosses the boundary. Rollover clears a halt whose cause is that same
    /// period, except MONTHLY_LOSS, which never auto-clears (spec §4.4).
    fn check_rollovers(&mut self, now: DateTime<Utc>) {
        let today = day_start(now);
        if today > self.daily_start {
            self.daily_pnl = 0.0;
            self.daily_trades = 0;
            self.daily_start = today;
            if self.halt_cause == HaltCause::DailyLoss {
                self.clear_halt_internal();
            }
        }

        let this_week = week_start(now);
        if this_week > self.weekly_start {
            self.weekly_pnl = 0.0;
            self.weekly_start = this_week;
            if self.halt_cause == HaltCause::WeeklyLoss {
                self.clear_halt_internal();
            }
        }

        let this_month = month_start(now);
        if this_month > self.monthly_start {
            self.monthly_pnl = 0.0;
            self.monthly_start = this_month;
            // MONTHLY_LOSS is sticky: rollover resets the period P&L but
            // does not clear the halt (spec §4.4, S3).
        }
    }

    fn clear_halt_internal(&mut self) {
        self.is_halted = false;
        self.halt_cause = HaltCause::None;
        self.halt_reason_text = None;
        self.halt_time = None;
    }

    fn check_halt_conditions(&mut self, now: DateTime<Utc>) {
        if self.is_halted {
            // Do not re-evaluate or escalate while already halted.
            return;
        }

        let cause = if self.daily_pnl <= -self.bankroll0 * self.limits.max_daily_loss_pct {
            Some((HaltCause::DailyLoss, "daily loss limit breached"))
        } else if self.weekly_pnl <= -self.bankroll0 * self.limits.max_weekly_loss_pct {
            Some((HaltCause::WeeklyLoss, "weekly loss limit breached"))
        } else if self.monthly_pnl <= -self.bankroll0 * self.limits.max_monthly_loss_pct {
            Some((HaltCause::MonthlyLoss, "monthly loss limit breached"))
        } else {
            None
        };

        if let Some((cause, reason)) = cause {
            self.is_halted = true;
            self.halt_cause = cause;
            self.halt_reason_text = Some(reason.to_string());
            self.halt_time = Some(now);
            tracing::warn!(?cause, "risk halt triggered");
        }
    }

    /// Apply a realized P&L delta at `at`. Rolls over first, then mutates,
    /// then re-checks halt conditions (spec §4.4).
    pub fn update_pnl(&mut self, delta: f64, at: DateTime<Utc>) {
        self.check_rollovers(at);

        self.daily_pnl += delta;
        self.weekly_pnl += delta;
        self.monthly_pnl += delta;
        self.total_pnl += delta;
        self.daily_trades += 1;

        if delta < 0.0 {
            self.last_loss_time = Some(at);
            self.consecutive_losses += 1;
            self.losing_trades += 1;
        } else {
            self.consecutive_losses = 0;
            self.winning_trades += 1;
        }

        self.check_halt_conditions(at);
    }

    /// `canTrade(now) -> (bool, reason)`.
    pub fn can_trade(&mut self, now: DateTime<Utc>) -> (bool, Option<String>) {
        self.check_rollovers(now);

        if self.is_halted {
            return (
                false,
                Some(format!("halted: {:?}", self.halt_cause)),
            );
        }

        if let Some(last_loss) = self.last_loss_time {
            let cooldown = Duration::minutes(self.limits.cooldown_after_loss_minutes);
            let elapsed = now - last_loss;
            if elapsed < cooldown {
                let remaining = cooldown - elapsed;
                return (
                    false,
                    Some(format!(
                        "cooldown active, {} minutes remaining",
                        remaining.num_minutes().max(0) + 1
                    )),
                );
            }
        }

        (true, None)
    }

    pub fn validate_trade(
        &mut self,
        size: f64,
        resolution_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TradeValidation {
        let (ok, reason) = self.can_trade(now);
        if !ok {
            if let Some(r) = reason {
                tracing::debug!(%r, "trade rejected: cannot trade");
            }
            return TradeValidation::Rejected {
                reason: "cannot_trade",
                suggested_size: None,
            };
        }

        if size > self.limits.max_single_trade {
            return TradeValidation::Rejected {
                reason: "max_single_trade",
                suggested_size: Some(self.limits.max_single_trade),
            };
        }

        if size < self.limits.min_single_trade {
            return TradeValidation::Rejected {
                reason: "min_single_trade",
                suggested_size: None,
            };
        }

        let hours_to_resolution = (resolution_time - now).num_seconds() as f64 / 3600.0;
        if hours_to_resolution < self.limits.min_hours_before_resolution {
            return TradeValidation::Rejected {
                reason: "min_hours_before_resolution",
                suggested_size: None,
            };
        }

        TradeValidation::Ok
    }

    pub fn trigger_manual_halt(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.is_halted = true;
        self.halt_cause = HaltCause::Manual;
        self.halt_reason_text = Some(reason.into());
        self.halt_time = Some(now);
    }

    /// Trigger a SYSTEM halt, e.g. on a fatal internal error (spec §7).
    pub fn trigger_system_halt(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.is_halted = true;
        self.halt_cause = HaltCause::System;
        self.halt_reason_text = Some(reason.into());
        self.halt_time = Some(now);
    }

    /// `clearHalt(force)`. MONTHLY_LOSS requires `force == true`.
    pub fn clear_halt(&mut self, force: bool) -> Result<(), &'static str> {
        if !self.is_halted {
            return Ok(());
        }
        if self.halt_cause == HaltCause::MonthlyLoss && !force {
            return Err("monthly loss halt requires force=true to clear");
        }
        self.clear_halt_internal();
        Ok(())
    }

    /// `resetDaily()`: zero daily P&L/trades and clear DAILY_LOSS if set.
    pub fn reset_daily_pnl(&mut self, now: DateTime<Utc>) {
        self.daily_pnl = 0.0;
        self.daily_trades = 0;
        self.daily_start = day_start(now);
        if self.halt_cause == HaltCause::DailyLoss {
            self.clear_halt_internal();
        }
    }

    pub fn is_halted(&self) -> bool {
        self.is_halted
    }

    pub fn halt_cause(&self) -> HaltCause {
        self.halt_cause
    }

    pub fn metrics(&self) -> RiskMetrics {
        RiskMetrics {
            daily_pnl: self.daily_pnl,
            weekly_pnl: self.weekly_pnl,
            monthly_pnl: self.monthly_pnl,
            total_pnl: self.total_pnl,
            is_halted: self.is_halted,
            halt_cause: self.halt_cause,
            consecutive_losses: self.consecutive_losses,
            daily_trades: self.daily_trades,
        }
    }
}
