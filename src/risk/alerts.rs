use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::config::AlertConfig;
use crate::models::{AccountSnapshot, MarketSnapshot, SystemStatus};

/// Advisory risk conditions; none of these block trading on their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    VolatilityExcursion,
    VolumeContraction,
    ConcentrationRisk,
    DrawdownWarning,
    SystemErrors,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::VolatilityExcursion => "volatility_excursion",
            AlertKind::VolumeContraction => "volume_contraction",
            AlertKind::ConcentrationRisk => "concentration_risk",
            AlertKind::DrawdownWarning => "drawdown_warning",
            AlertKind::SystemErrors => "system_errors",
        }
    }
}

/// Raise/clear transition emitted by a scan
#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    pub active: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Edge-triggered monitor: a condition is reported once when it starts
/// holding and once when it stops, never on every cycle in between.
#[derive(Debug, Clone)]
pub struct RiskAlertMonitor {
    config: AlertConfig,
    active: HashSet<AlertKind>,
}

impl RiskAlertMonitor {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            active: HashSet::new(),
        }
    }

    pub fn is_active(&self, kind: AlertKind) -> bool {
        self.active.contains(&kind)
    }

    pub fn active_alerts(&self) -> Vec<AlertKind> {
        self.active.iter().copied().collect()
    }

    /// Evaluate every condition and return the transitions since last scan
    pub fn scan(
        &mut self,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
        system: &SystemStatus,
    ) -> Vec<Alert> {
        let volume_ratio = if market.avg_volume_24h > 0.0 {
            market.volume_24h / market.avg_volume_24h
        } else {
            1.0
        };
        let exposure_ratio = if account.equity > 0.0 {
            (account.equity - account.available_margin) / account.equity
        } else {
            0.0
        };

        let conditions = [
            (
                AlertKind::VolatilityExcursion,
                market.volatility_24h >= self.config.volatility_warning,
                format!("24h volatility at {:.1}%", market.volatility_24h * 100.0),
            ),
            (
                AlertKind::VolumeContraction,
                volume_ratio < self.config.volume_contraction_ratio,
                format!("volume at {:.0}% of 24h average", volume_ratio * 100.0),
            ),
            (
                AlertKind::ConcentrationRisk,
                exposure_ratio >= self.config.concentration_ratio,
                format!("{:.0}% of equity committed as margin", exposure_ratio * 100.0),
            ),
            (
                AlertKind::DrawdownWarning,
                account.drawdown() >= self.config.drawdown_warning,
                format!("drawdown at {:.1}%", account.drawdown() * 100.0),
            ),
            (
                AlertKind::SystemErrors,
                system.error_count >= self.config.error_count_warning,
                format!("{} errors since last reset", system.error_count),
            ),
        ];

        let now = Utc::now();
        let mut transitions = Vec::new();
        for (kind, holding, message) in conditions {
            let was_active = self.active.contains(&kind);
            if holding && !was_active {
                self.active.insert(kind);
                tracing::warn!(alert = kind.as_str(), %message, "risk alert raised");
                transitions.push(Alert {
                    kind,
                    active: true,
                    message,
                    timestamp: now,
                });
            } else if !holding && was_active {
                self.active.remove(&kind);
                tracing::info!(alert = kind.as_str(), "risk alert cleared");
                transitions.push(Alert {
                    kind,
                    active: false,
                    message,
                    timestamp: now,
                });
            }
        }
        transitions
    }
}
