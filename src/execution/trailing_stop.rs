use crate::config::TrailingConfig;
use crate::models::{ExitReason, MarketSnapshot, Position, PositionSide, ProfitStage};

/// Outcome of one trailing-stop evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum StopUpdate {
    /// Price crossed the stop or target; position must be closed
    Exit(ExitReason),
    /// Stop tightened, possibly advancing the profit stage
    Adjusted {
        stage: ProfitStage,
        old_stop: f64,
        new_stop: f64,
    },
    /// Crash guard active, stop left untouched
    Frozen,
    Unchanged,
}

/// Profit-protection state machine over a position's stop price
///
/// Stops only ever tighten. Stage transitions follow realized profit
/// thresholds; a consolidating market can pull the lock forward early.
#[derive(Debug, Clone)]
pub struct TrailingStopEngine {
    config: TrailingConfig,
}

impl TrailingStopEngine {
    pub fn new(config: TrailingConfig) -> Self {
        Self { config }
    }

    pub fn update(&self, position: &mut Position, market: &MarketSnapshot) -> StopUpdate {
        let price = market.price;

        // Terminal checks come before any adjustment
        if position.stop_hit(price) {
            return StopUpdate::Exit(ExitReason::StopHit);
        }
        if position.target_hit(price) {
            return StopUpdate::Exit(ExitReason::TargetHit);
        }

        // A violent adverse window move freezes adjustments; the existing
        // stop still protects, and reacting mid-crash whipsaws the position
        let adverse_move = match position.side {
            PositionSide::Long => -market.window_change_pct(),
            PositionSide::Short => market.window_change_pct(),
        };
        if adverse_move >= self.config.crash_guard_pct {
            tracing::warn!(
                position = %position.id,
                adverse_move_pct = adverse_move * 100.0,
                "crash guard active, stop frozen"
            );
            return StopUpdate::Frozen;
        }

        let pnl = position.unrealized_pnl_pct(price);
        let Some((stage, candidate)) = self.best_candidate(position, market, pnl) else {
            return StopUpdate::Unchanged;
        };

        // Monotonic: only accept a stop strictly tighter than the current one
        let tighter = match position.side {
            PositionSide::Long => candidate > position.stop_price,
            PositionSide::Short => candidate < position.stop_price,
        };
        if !tighter {
            return StopUpdate::Unchanged;
        }

        let old_stop = position.stop_price;
        position.stop_price = candidate;
        if stage.rank() > position.stage.rank() {
            position.stage = stage;
        }
        tracing::info!(
            position = %position.id,
            stage = ?position.stage,
            old_stop,
            new_stop = candidate,
            "protective stop tightened"
        );
        StopUpdate::Adjusted {
            stage: position.stage,
            old_stop,
            new_stop: candidate,
        }
    }

    /// Most protective applicable stop, with the stage that produced it
    fn best_candidate(
        &self,
        position: &Position,
        market: &MarketSnapshot,
        pnl: f64,
    ) -> Option<(ProfitStage, f64)> {
        let entry = position.entry_price;
        let price = market.price;
        let cfg = &self.config;

        let locked = |fraction: f64| match position.side {
            PositionSide::Long => entry * (1.0 + fraction * pnl),
            PositionSide::Short => entry * (1.0 - fraction * pnl),
        };

        let mut candidates: Vec<(ProfitStage, f64)> = Vec::new();
        if pnl >= cfg.breakeven_at {
            candidates.push((ProfitStage::Breakeven, entry));
        }
        if pnl >= cfg.lock70_at {
            candidates.push((ProfitStage::Lock70, locked(0.70)));
        }
        if pnl >= cfg.lock80_at {
            candidates.push((ProfitStage::Lock80, locked(0.80)));
            let distance = cfg.trailing_distance * cfg.tight_trailing_factor;
            let trail = match position.side {
                PositionSide::Long => price * (1.0 - distance),
                PositionSide::Short => price * (1.0 + distance),
            };
            candidates.push((ProfitStage::Trailing, trail));
        }
        // Range compression with profit on the table: lock most of it in
        // rather than waiting for the breakout direction
        if pnl >= cfg.breakeven_at && self.is_consolidating(market) {
            candidates.push((
                ProfitStage::ConsolidationLock,
                locked(cfg.consolidation_lock_fraction),
            ));
        }

        match position.side {
            PositionSide::Long => candidates
                .into_iter()
                .max_by(|a, b| a.1.total_cmp(&b.1)),
            PositionSide::Short => candidates
                .into_iter()
                .min_by(|a, b| a.1.total_cmp(&b.1)),
        }
    }

    fn is_consolidating(&self, market: &MarketSnapshot) -> bool {
        let threshold = self
            .config
            .consolidation_range_pct
            .min(market.volatility_24h * 1.5);
        market.window_range_pct() < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn long_at(entry: f64) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: entry,
            size: 1000.0,
            leverage: 2.0,
            opened_at: Utc::now(),
            stop_price: entry * 0.98,
            target_price: entry * 1.10,
            stage: ProfitStage::None,
        }
    }

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
            target_price: entry * 0.90,
            stage: ProfitStage::None,
        }
    }

    fn market_at(price: f64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            price,
            volume_24h: 1_000_000.0,
            avg_volume_24h: 1_000_000.0,
            spread_pct: 0.001,
            volatility_24h: 0.02,
            orderbook_depth_usd: 500_000.0,
            trend: None,
            trend_strength: 0.5,
            window_open: price,
            window_high: price * 1.015,
            window_low: price * 0.985,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_breakeven_at_one_percent() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = long_at(100.0);

        let update = engine.update(&mut position, &market_at(101.2));
        assert_eq!(position.stage, ProfitStage::Breakeven);
        assert_eq!(position.stop_price, 100.0);
        match update {
            StopUpdate::Adjusted { new_stop, .. } => assert_eq!(new_stop, 100.0),
            other => panic!("expected adjustment, got {:?}", other),
        }
    }

    #[test]
    fn test_lock70_at_three_percent() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = long_at(100.0);

        engine.update(&mut position, &market_at(103.4));
        assert_eq!(position.stage, ProfitStage::Lock70);
        // 100 x (1 + 0.70 x 0.034) = 102.38
        assert!((position.stop_price - 102.38).abs() < 1e-9);
    }

    #[test]
    fn test_lock80_at_five_percent() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = long_at(100.0);

        engine.update(&mut position, &market_at(106.0));
        assert_eq!(position.stage, ProfitStage::Lock80);
        // locked 80% of 6% beats the 1.2% trail from 106
        assert!((position.stop_price - 104.8).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_overtakes_lock80_on_extended_run() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = long_at(100.0);
        position.target_price = 130.0;

        engine.update(&mut position, &market_at(115.0));
        assert_eq!(position.stage, ProfitStage::Trailing);
        // 115 x (1 - 0.015 x 0.8) = 113.62
        assert!((position.stop_price - 113.62).abs() < 1e-9);
    }

    #[test]
    fn test_update_idempotent_at_unchanged_price() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = long_at(100.0);
        let market = market_at(103.4);

        engine.update(&mut position, &market);
        let stop = position.stop_price;
        let update = engine.update(&mut position, &market);

        assert_eq!(update, StopUpdate::Unchanged);
        assert_eq!(position.stop_price, stop);
    }

    #[test]
    fn test_stop_never_loosens() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = long_at(100.0);

        engine.update(&mut position, &market_at(103.4));
        let locked = position.stop_price;

        // Price retreats but stays above the stop; stop holds
        let update = engine.update(&mut position, &market_at(102.6));
        assert_eq!(update, StopUpdate::Unchanged);
        assert_eq!(position.stop_price, locked);
        assert_eq!(position.stage, ProfitStage::Lock70);
    }

    #[test]
    fn test_stage_never_regresses() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = long_at(100.0);

        engine.update(&mut position, &market_at(106.0));
        assert_eq!(position.stage, ProfitStage::Lock80);

        engine.update(&mut position, &market_at(105.2));
        assert_eq!(position.stage, ProfitStage::Lock80);
    }

    #[test]
    fn test_stop_hit_is_terminal() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = long_at(100.0);

        let update = engine.update(&mut position, &market_at(97.5));
        assert_eq!(update, StopUpdate::Exit(ExitReason::StopHit));
    }

    #[test]
    fn test_target_hit_is_terminal() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = long_at(100.0);

        let update = engine.update(&mut position, &market_at(110.5));
        assert_eq!(update, StopUpdate::Exit(ExitReason::TargetHit));
    }

    #[test]
    fn test_crash_guard_freezes_stop() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = long_at(100.0);
        engine.update(&mut position, &market_at(103.4));
        let locked = position.stop_price;

        // Window shows a 4% drop; price still above the stop
        let mut crash = market_at(102.6);
        crash.window_open = 106.9;
        let update = engine.update(&mut position, &crash);
        assert_eq!(update, StopUpdate::Frozen);
        assert_eq!(position.stop_price, locked);
    }

    #[test]
    fn test_consolidation_locks_extra_profit() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = long_at(100.0);

        // 4% profit inside a 0.2% window, well under 1.5x volatility
        let mut quiet = market_at(104.0);
        quiet.window_high = 104.1;
        quiet.window_low = 103.9;
        engine.update(&mut position, &quiet);

        assert_eq!(position.stage, ProfitStage::ConsolidationLock);
        // 80% lock beats the 70% stage lock
        assert!((position.stop_price - 103.2).abs() < 1e-9);
    }

    #[test]
    fn test_short_side_mirrors() {
        let engine = TrailingStopEngine::new(TrailingConfig::default());
        let mut position = short_at(100.0);

        engine.update(&mut position, &market_at(96.6)); // 3.4% in favor
        assert_eq!(position.stage, ProfitStage::Lock70);
        // 100 x (1 - 0.70 x 0.034) = 97.62
        assert!((position.stop_price - 97.62).abs() < 1e-9);
    }
}
