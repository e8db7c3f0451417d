use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Directional recommendation from the external signal producer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
    Hold,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

/// One signal per cycle; never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub confidence: ConfidenceTier,
    pub target_price: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrendDirection {
    Up,
    Down,
}

/// Immutable per-cycle market input
///
/// The window_* fields describe the recent lookback window the exchange layer
/// maintains (crash detection, rally rejection, consolidation detection all
/// read from it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: f64,
    pub volume_24h: f64,
    pub avg_volume_24h: f64,
    pub spread_pct: f64,
    pub volatility_24h: f64,
    pub orderbook_depth_usd: f64,
    /// None means the trend is unconfirmed; gates refuse undecided markets
    pub trend: Option<TrendDirection>,
    /// Trend strength in [0, 1]
    pub trend_strength: f64,
    pub window_open: f64,
    pub window_high: f64,
    pub window_low: f64,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Peak-to-trough range of the lookback window, as a fraction of the high
    pub fn window_range_pct(&self) -> f64 {
        if self.window_high <= 0.0 {
            return 0.0;
        }
        (self.window_high - self.window_low) / self.window_high
    }

    /// Signed price change across the lookback window
    pub fn window_change_pct(&self) -> f64 {
        if self.window_open <= 0.0 {
            return 0.0;
        }
        (self.price - self.window_open) / self.window_open
    }
}

/// Immutable per-cycle account input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub available_margin: f64,
    pub max_leverage: f64,
    /// Realized + unrealized P&L since the daily reset, signed
    pub daily_pnl: f64,
    pub daily_start_equity: f64,
    pub equity_high_water: f64,
    pub consecutive_losses: u32,
    pub open_positions: u32,
    pub short_exposure: f64,
    pub avg_hold_time_hours: f64,
}

impl AccountSnapshot {
    /// Drawdown from the equity high-water mark, as a fraction
    pub fn drawdown(&self) -> f64 {
        if self.equity_high_water <= 0.0 {
            return 0.0;
        }
        ((self.equity_high_water - self.equity) / self.equity_high_water).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

/// Profit-lock stage of a position's protective stop
///
/// Advances monotonically in declaration order; never regresses except via
/// terminal close.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProfitStage {
    None,
    Breakeven,
    Lock70,
    Lock80,
    Trailing,
    ConsolidationLock,
}

impl ProfitStage {
    pub fn rank(&self) -> u8 {
        match self {
            ProfitStage::None => 0,
            ProfitStage::Breakeven => 1,
            ProfitStage::Lock70 => 2,
            ProfitStage::Lock80 => 3,
            ProfitStage::Trailing => 4,
            ProfitStage::ConsolidationLock => 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    /// Margin committed to the position, in quote currency
    pub size: f64,
    pub leverage: f64,
    pub opened_at: DateTime<Utc>,
    pub stop_price: f64,
    pub target_price: f64,
    pub stage: ProfitStage,
}

impl Position {
    /// Unrealized profit as a fraction of entry price (positive = in favor)
    pub fn unrealized_pnl_pct(&self, current_price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        match self.side {
            PositionSide::Long => (current_price - self.entry_price) / self.entry_price,
            PositionSide::Short => (self.entry_price - current_price) / self.entry_price,
        }
    }

    /// Unrealized P&L in quote currency (margin x leverage x move)
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        self.size * self.leverage * self.unrealized_pnl_pct(current_price)
    }

    /// True when the price has crossed the protective stop
    pub fn stop_hit(&self, current_price: f64) -> bool {
        match self.side {
            PositionSide::Long => current_price <= self.stop_price,
            PositionSide::Short => current_price >= self.stop_price,
        }
    }

    /// True when the price has reached the profit target
    pub fn target_hit(&self, current_price: f64) -> bool {
        match self.side {
            PositionSide::Long => current_price >= self.target_price,
            PositionSide::Short => current_price <= self.target_price,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    StopHit,
    TargetHit,
    Manual,
}

/// Archived closed trade; lives in the bounded trade-history log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub leverage: f64,
    pub pnl: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub reason: ExitReason,
}

/// Discrete risk classification used for sizing; recomputed every cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskTier {
    Critical,
    High,
    Medium,
    Low,
    Safe,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Critical => "CRITICAL",
            RiskTier::High => "HIGH",
            RiskTier::Medium => "MEDIUM",
            RiskTier::Low => "LOW",
            RiskTier::Safe => "SAFE",
        }
    }
}

/// Why the circuit breaker tripped
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TripReason {
    PriceCrash,
    DailyLoss,
    ConsecutiveLosses,
    Drawdown,
    SystemHealth,
}

impl TripReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripReason::PriceCrash => "price_crash",
            TripReason::DailyLoss => "daily_loss",
            TripReason::ConsecutiveLosses => "consecutive_losses",
            TripReason::Drawdown => "drawdown",
            TripReason::SystemHealth => "system_health",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CircuitStatus {
    Normal,
    Tripped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub reason: Option<TripReason>,
    pub tripped_at: Option<DateTime<Utc>>,
    pub cool_down_until: Option<DateTime<Utc>>,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            status: CircuitStatus::Normal,
            reason: None,
            tripped_at: None,
            cool_down_until: None,
        }
    }
}

impl CircuitState {
    pub fn is_tripped(&self) -> bool {
        self.status == CircuitStatus::Tripped
    }
}

/// Health counters maintained by the scheduler / adapters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    pub api_failures: u32,
    pub error_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub total_pnl: f64,
}

impl PerformanceStats {
    pub fn record_trade(&mut self, pnl: f64) {
        self.total_trades += 1;
        if pnl > 0.0 {
            self.winning_trades += 1;
        }
        self.total_pnl += pnl;
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.total_trades as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_at(entry: f64) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Short,
            entry_price: entry,
            size: 1000.0,
            leverage: 2.0,
            opened_at: Utc::now(),
            stop_price: entry * 1.02,
            target_price: entry * 0.95,
            stage: ProfitStage::None,
        }
    }

    #[test]
    fn test_stage_order_is_monotonic() {
        let stages = [
            ProfitStage::None,
            ProfitStage::Breakeven,
            ProfitStage::Lock70,
            ProfitStage::Lock80,
            ProfitStage::Trailing,
            ProfitStage::ConsolidationLock,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn test_short_pnl_sign() {
        let position = short_at(100.0);
        assert!(position.unrealized_pnl_pct(95.0) > 0.0);
        assert!(position.unrealized_pnl_pct(105.0) < 0.0);
        // 5% favorable move on 1000 margin at 2x = +100
        assert!((position.unrealized_pnl(95.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_stop_and_target() {
        let position = short_at(100.0);
        assert!(position.stop_hit(102.0));
        assert!(!position.stop_hit(101.0));
        assert!(position.target_hit(95.0));
        assert!(!position.target_hit(96.0));
    }

    #[test]
    fn test_drawdown_clamped_at_zero() {
        let account = AccountSnapshot {
            equity: 12000.0,
            available_margin: 12000.0,
            max_leverage: 10.0,
            daily_pnl: 0.0,
            daily_start_equity: 12000.0,
            equity_high_water: 10000.0,
            consecutive_losses: 0,
            open_positions: 0,
            short_exposure: 0.0,
            avg_hold_time_hours: 0.0,
        };
        assert_eq!(account.drawdown(), 0.0);
    }
}
