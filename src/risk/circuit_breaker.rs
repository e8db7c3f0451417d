use chrono::{DateTime, Duration, Utc};

use crate::config::BreakerConfig;
use crate::models::{
    AccountSnapshot, CircuitState, CircuitStatus, MarketSnapshot, SystemStatus, TripReason,
};

/// Circuit breaker halting new entries when risk thresholds are breached
///
/// `check` is a pure function of its snapshot inputs; trip bookkeeping lives
/// in the `CircuitState` owned by the engine.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config }
    }

    /// Evaluate all trip conditions in fixed order; first hit wins
    pub fn check(
        &self,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
        system: &SystemStatus,
    ) -> Option<TripReason> {
        if market.window_range_pct() >= self.config.price_crash_threshold {
            return Some(TripReason::PriceCrash);
        }

        if account.daily_start_equity > 0.0 {
            let daily_loss = -account.daily_pnl / account.daily_start_equity;
            if daily_loss >= self.config.daily_loss_threshold {
                return Some(TripReason::DailyLoss);
            }
        }

        if account.consecutive_losses >= self.config.max_consecutive_losses {
            return Some(TripReason::ConsecutiveLosses);
        }

        if account.drawdown() >= self.config.max_drawdown {
            return Some(TripReason::Drawdown);
        }

        if health_score(system) < self.config.min_health_score {
            return Some(TripReason::SystemHealth);
        }

        None
    }

    /// Apply a check result to the circuit state
    ///
    /// Trips on the first offending condition; re-arms only once the
    /// cool-down has elapsed AND a fresh check comes back clean.
    pub fn update_state(
        &self,
        state: &mut CircuitState,
        trip: Option<TripReason>,
        now: DateTime<Utc>,
    ) {
        match (state.status, trip) {
            (CircuitStatus::Normal, Some(reason)) => {
                let cool_down = cool_down_minutes(reason);
                *state = CircuitState {
                    status: CircuitStatus::Tripped,
                    reason: Some(reason),
                    tripped_at: Some(now),
                    cool_down_until: Some(now + Duration::minutes(cool_down)),
                };
                tracing::warn!(
                    reason = reason.as_str(),
                    cool_down_minutes = cool_down,
                    "circuit breaker tripped, new entries suspended"
                );
            }
            (CircuitStatus::Tripped, None) => {
                let cooled = state.cool_down_until.map(|t| now >= t).unwrap_or(true);
                if cooled {
                    let reason = state.reason.map(|r| r.as_str()).unwrap_or("unknown");
                    tracing::info!(reason, "circuit breaker re-armed");
                    *state = CircuitState::default();
                }
            }
            // Still tripped with a condition holding, or normal and clean
            _ => {}
        }
    }
}

/// Health score from adapter failure counters, 0-100
pub fn health_score(system: &SystemStatus) -> f64 {
    let penalty = system.api_failures as f64 * 10.0 + system.error_count as f64 * 5.0;
    (100.0 - penalty).max(0.0)
}

/// Cool-down scaled to how severe the trip condition is
fn cool_down_minutes(reason: TripReason) -> i64 {
    match reason {
        TripReason::PriceCrash => 120,
        TripReason::DailyLoss => 60,
        TripReason::Drawdown => 60,
        TripReason::ConsecutiveLosses => 30,
        TripReason::SystemHealth => 30,
    }
}
