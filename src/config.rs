use serde::{Deserialize, Serialize};

/// Top-level configuration, one section per guardrail
///
/// Defaults match the values the engine was tuned with; everything is
/// overridable from a config file or `PERPBOT_`-prefixed environment
/// variables (e.g. `PERPBOT_BREAKER__DAILY_LOSS_THRESHOLD=0.04`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    pub symbol: String,
    pub cycle_interval_secs: u64,
    pub breaker: BreakerConfig,
    pub short_gate: ShortGateConfig,
    pub sizer: SizerConfig,
    pub trailing: TrailingConfig,
    pub alerts: AlertConfig,
    pub recovery: RecoveryConfig,
    pub checkpoint: CheckpointConfig,
    pub order: OrderConfig,
    pub max_trade_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    pub price_crash_threshold: f64,
    pub daily_loss_threshold: f64,
    pub max_consecutive_losses: u32,
    pub max_drawdown: f64,
    pub min_health_score: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            price_crash_threshold: 0.03, // 3% move in the lookback window
            daily_loss_threshold: 0.05,  // -5% of daily starting equity
            max_consecutive_losses: 3,
            max_drawdown: 0.15, // -15% from the high-water mark
            min_health_score: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShortGateConfig {
    pub min_volume_ratio: f64,
    pub max_spread_pct: f64,
    pub min_liquidity_usd: f64,
    pub min_available_margin: f64,
    pub min_account_leverage: f64,
    pub max_short_positions: u32,
    pub max_short_ratio: f64,
    pub min_confidence: crate::models::ConfidenceTier,
    pub min_volatility: f64,
    pub max_volatility: f64,
    pub max_hold_time_hours: f64,
    pub max_consecutive_losses: u32,
    pub max_rally_pct: f64,
    pub max_target_deviation: f64,
}

impl Default for ShortGateConfig {
    fn default() -> Self {
        Self {
            min_volume_ratio: 0.8,
            max_spread_pct: 0.005,
            min_liquidity_usd: 100_000.0,
            min_available_margin: 1000.0,
            min_account_leverage: 2.0,
            max_short_positions: 3,
            max_short_ratio: 0.3, // short exposure <= 30% of equity
            min_confidence: crate::models::ConfidenceTier::Medium,
            min_volatility: 0.01,
            max_volatility: 0.08,
            max_hold_time_hours: 48.0,
            max_consecutive_losses: 2, // local cutoff, stricter than the breaker's
            max_rally_pct: 0.02,
            max_target_deviation: 0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SizerConfig {
    pub per_trade_budget_pct: f64,
    pub max_position_pct: f64,
    pub max_loss_pct: f64,
    pub max_open_positions: u32,
    pub max_exposure_ratio: f64,
    pub base_stop_pct: f64,
    pub reward_risk_ratio: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            per_trade_budget_pct: 0.10,
            max_position_pct: 0.20,
            max_loss_pct: 0.01, // worst-case loss per trade <= 1% of equity
            max_open_positions: 5,
            max_exposure_ratio: 0.8,
            base_stop_pct: 0.02,
            reward_risk_ratio: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrailingConfig {
    pub breakeven_at: f64,
    pub lock70_at: f64,
    pub lock80_at: f64,
    pub trailing_distance: f64,
    pub tight_trailing_factor: f64,
    pub consolidation_range_pct: f64,
    pub consolidation_lock_fraction: f64,
    pub crash_guard_pct: f64,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            breakeven_at: 0.01,  // 1% profit moves the stop to entry
            lock70_at: 0.03,     // 3% profit locks 70%
            lock80_at: 0.05,     // 5% profit locks 80%
            trailing_distance: 0.015,
            tight_trailing_factor: 0.8, // trail narrows past lock80
            consolidation_range_pct: 0.02,
            consolidation_lock_fraction: 0.8,
            crash_guard_pct: 0.03,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub volatility_warning: f64,
    pub volume_contraction_ratio: f64,
    pub concentration_ratio: f64,
    pub drawdown_warning: f64,
    pub error_count_warning: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            volatility_warning: 0.05,
            volume_contraction_ratio: 0.5,
            concentration_ratio: 0.8,
            drawdown_warning: 0.10, // softer than the breaker's hard 15%
            error_count_warning: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointConfig {
    pub dir: String,
    pub interval_secs: u64,
    pub max_checkpoints: usize,
    pub compress: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: "checkpoints".to_string(),
            interval_secs: 300,
            max_checkpoints: 50,
            compress: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrderConfig {
    pub timeout_secs: u64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl BotConfig {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("PERPBOT").separator("__"))
            .build()?;
        let mut cfg: BotConfig = settings.try_deserialize()?;
        if cfg.symbol.is_empty() {
            cfg.symbol = "BTCUSDT".to_string();
        }
        if cfg.cycle_interval_secs == 0 {
            cfg.cycle_interval_secs = 60;
        }
        if cfg.max_trade_history == 0 {
            cfg.max_trade_history = 500;
        }
        Ok(cfg)
    }

    /// Defaults with the symbol filled in; used by tests and fresh starts
    pub fn for_symbol(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            cycle_interval_secs: 60,
            max_trade_history: 500,
            ..Default::default()
        }
    }
}
