use crate::config::SizerConfig;
use crate::models::{
    AccountSnapshot, ConfidenceTier, Direction, MarketSnapshot, RiskTier, Signal,
};

/// Sizing decision for an admitted signal
#[derive(Debug, Clone)]
pub struct SizedPosition {
    pub risk_tier: RiskTier,
    /// Margin to commit, in quote currency; 0 means do not enter
    pub size: f64,
    pub leverage: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub reasoning: String,
}

impl SizedPosition {
    fn empty(risk_tier: RiskTier, reasoning: String) -> Self {
        Self {
            risk_tier,
            size: 0.0,
            leverage: 0.0,
            stop_price: 0.0,
            target_price: 0.0,
            reasoning,
        }
    }
}

/// Converts an admitted signal into size, leverage, and protective levels
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizerConfig,
}

/// Per-tier sizing limits
struct TierLimits {
    max_position: f64,
    max_leverage: f64,
    stop_multiplier: f64,
}

fn tier_limits(tier: RiskTier) -> TierLimits {
    match tier {
        RiskTier::Critical => TierLimits { max_position: 0.0, max_leverage: 0.0, stop_multiplier: 0.5 },
        RiskTier::High => TierLimits { max_position: 0.1, max_leverage: 1.0, stop_multiplier: 0.7 },
        RiskTier::Medium => TierLimits { max_position: 0.3, max_leverage: 3.0, stop_multiplier: 0.9 },
        RiskTier::Low => TierLimits { max_position: 0.5, max_leverage: 5.0, stop_multiplier: 1.0 },
        RiskTier::Safe => TierLimits { max_position: 0.8, max_leverage: 10.0, stop_multiplier: 1.2 },
    }
}

impl PositionSizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    /// Weighted risk classification from signal, market, and account state
    ///
    /// Recomputed on every call; never cached across cycles.
    pub fn classify_risk_tier(
        &self,
        signal: &Signal,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
    ) -> RiskTier {
        let mut score = 0u32;

        // Market volatility (0-3)
        let volatility = market.volatility_24h;
        if volatility > 0.08 {
            score += 3;
        } else if volatility > 0.05 {
            score += 2;
        } else if volatility > 0.03 {
            score += 1;
        }

        // Signal confidence (0-2)
        match signal.confidence {
            ConfidenceTier::Low => score += 2,
            ConfidenceTier::Medium => score += 1,
            ConfidenceTier::High => {}
        }

        // Drawdown proximity to the breaker's hard limit (0-3)
        let drawdown = account.drawdown();
        if drawdown > 0.10 {
            score += 3;
        } else if drawdown > 0.05 {
            score += 2;
        } else if drawdown > 0.02 {
            score += 1;
        }

        // Consecutive losses (0-2)
        if account.consecutive_losses >= 3 {
            score += 2;
        } else if account.consecutive_losses >= 1 {
            score += 1;
        }

        match score {
            8.. => RiskTier::Critical,
            6..=7 => RiskTier::High,
            4..=5 => RiskTier::Medium,
            2..=3 => RiskTier::Low,
            _ => RiskTier::Safe,
        }
    }

    pub fn compute_optimal_position(
        &self,
        signal: &Signal,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
    ) -> SizedPosition {
        let risk_tier = self.classify_risk_tier(signal, market, account);
        let limits = tier_limits(risk_tier);

        if risk_tier == RiskTier::Critical {
            return SizedPosition::empty(
                risk_tier,
                "risk tier CRITICAL forces zero size".to_string(),
            );
        }

        // Defensive re-validation of caps the gate already checked
        if account.open_positions >= self.config.max_open_positions {
            return SizedPosition::empty(
                risk_tier,
                format!(
                    "position count {} at cap {}",
                    account.open_positions, self.config.max_open_positions
                ),
            );
        }
        let exposure_ratio = if account.equity > 0.0 {
            (account.equity - account.available_margin) / account.equity
        } else {
            1.0
        };
        if exposure_ratio >= self.config.max_exposure_ratio {
            return SizedPosition::empty(
                risk_tier,
                format!(
                    "exposure ratio {:.2} at cap {:.2}",
                    exposure_ratio, self.config.max_exposure_ratio
                ),
            );
        }

        // Base size: per-trade budget scaled by confidence and trend strength
        let confidence_multiplier = match signal.confidence {
            ConfidenceTier::High => 1.5,
            ConfidenceTier::Medium => 1.0,
            ConfidenceTier::Low => 0.5,
        };
        let trend_multiplier = (0.5 + market.trend_strength * 0.7).min(1.2);

        let budget = account.equity * self.config.per_trade_budget_pct;
        let mut size = budget * confidence_multiplier * trend_multiplier;

        let tier_cap = account.equity * limits.max_position;
        let hard_cap = account.equity * self.config.max_position_pct;
        size = size.min(tier_cap).min(hard_cap).min(account.available_margin);

        // Volatility-adaptive stop band, wider when volatile
        let stop_distance =
            (market.volatility_24h * 2.0).max(self.config.base_stop_pct) * limits.stop_multiplier;
        let target_distance = stop_distance * self.config.reward_risk_ratio;

        // Worst-case loss (size x stop distance x leverage) must stay under
        // the configured equity fraction. When the bound lands below 1x, the
        // position shrinks instead of the bound being floored away.
        let max_loss = account.equity * self.config.max_loss_pct;
        let loss_bound = if size > 0.0 && stop_distance > 0.0 {
            max_loss / (size * stop_distance)
        } else {
            1.0
        };
        let leverage = if loss_bound < 1.0 {
            size = max_loss / stop_distance;
            1.0
        } else {
            loss_bound.min(limits.max_leverage).min(account.max_leverage)
        };

        let (stop_price, target_price) = match signal.direction {
            Direction::Short => (
                market.price * (1.0 + stop_distance),
                market.price * (1.0 - target_distance),
            ),
            _ => (
                market.price * (1.0 - stop_distance),
                market.price * (1.0 + target_distance),
            ),
        };

        SizedPosition {
            risk_tier,
            size,
            leverage,
            stop_price,
            target_price,
            reasoning: format!(
                "tier={} confidence_x={:.1} trend_x={:.2} stop={:.2}%",
                risk_tier.as_str(),
                confidence_multiplier,
                trend_multiplier,
                stop_distance * 100.0
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrendDirection;
    use chrono::Utc;

    fn signal(confidence: ConfidenceTier) -> Signal {
        Signal {
            direction: Direction::Short,
            confidence,
            target_price: None,
            timestamp: Utc::now(),
        }
    }

    fn market() -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            price: 100.0,
            volume_24h: 1_000_000.0,
            avg_volume_24h: 1_000_000.0,
            spread_pct: 0.001,
            volatility_24h: 0.02,
            orderbook_depth_usd: 500_000.0,
            trend: Some(TrendDirection::Down),
            trend_strength: 0.7,
            window_open: 100.2,
            window_high: 100.5,
            window_low: 99.5,
            timestamp: Utc::now(),
        }
    }

    fn account() -> AccountSnapshot {
        AccountSnapshot {
            equity: 10000.0,
            available_margin: 9000.0,
            max_leverage: 10.0,
            daily_pnl: 0.0,
            daily_start_equity: 10000.0,
            equity_high_water: 10000.0,
            consecutive_losses: 0,
            open_positions: 0,
            short_exposure: 0.0,
            avg_hold_time_hours: 4.0,
        }
    }

    #[test]
    fn test_safe_tier_for_healthy_inputs() {
        let sizer = PositionSizer::new(SizerConfig::default());
        let tier = sizer.classify_risk_tier(&signal(ConfidenceTier::High), &market(), &account());
        assert_eq!(tier, RiskTier::Safe);
    }

    #[test]
    fn test_critical_tier_forces_zero_size() {
        let sizer = PositionSizer::new(SizerConfig::default());
        let mut market = market();
        market.volatility_24h = 0.10; // +3
        let mut account = account();
        account.equity_high_water = 11500.0;
        account.equity = 10000.0; // ~13% drawdown, +3
        account.consecutive_losses = 1; // +1

        let sized =
            sizer.compute_optimal_position(&signal(ConfidenceTier::Low), &market, &account);
        assert_eq!(sized.risk_tier, RiskTier::Critical);
        assert_eq!(sized.size, 0.0);
        assert!(sized.reasoning.contains("CRITICAL"));
    }

    #[test]
    fn test_confidence_scales_size() {
        let sizer = PositionSizer::new(SizerConfig::default());
        let high =
            sizer.compute_optimal_position(&signal(ConfidenceTier::High), &market(), &account());
        let medium =
            sizer.compute_optimal_position(&signal(ConfidenceTier::Medium), &market(), &account());

        assert!(high.size > medium.size);
        // budget 1000 x 1.5 x trend 0.99 = 1485, under every cap
        assert!((high.size - 1485.0).abs() < 1.0);
    }

    #[test]
    fn test_size_capped_at_max_position_pct() {
        let mut config = SizerConfig::default();
        config.per_trade_budget_pct = 0.5;
        let sizer = PositionSizer::new(config);

        let sized =
            sizer.compute_optimal_position(&signal(ConfidenceTier::High), &market(), &account());
        // hard cap at 20% of 10000
        assert!(sized.size <= 2000.0 + 1e-9);
    }

    #[test]
    fn test_leverage_bounded_by_worst_case_loss() {
        let sizer = PositionSizer::new(SizerConfig::default());
        let sized =
            sizer.compute_optimal_position(&signal(ConfidenceTier::High), &market(), &account());

        // worst-case loss = size x stop distance x leverage <= 1% of equity
        let stop_distance = (sized.stop_price - 100.0) / 100.0;
        let worst_case = sized.size * stop_distance * sized.leverage;
        assert!(worst_case <= 10000.0 * 0.01 + 1e-6);
        assert!(sized.leverage >= 1.0);
    }

    #[test]
    fn test_sub_unit_loss_bound_shrinks_size_instead_of_flooring_leverage() {
        let mut config = SizerConfig::default();
        config.max_loss_pct = 0.001; // 10 on a 10000 account
        let sizer = PositionSizer::new(config);

        let sized =
            sizer.compute_optimal_position(&signal(ConfidenceTier::High), &market(), &account());

        assert_eq!(sized.leverage, 1.0);
        assert!(sized.size > 0.0);
        let stop_distance = (sized.stop_price - 100.0) / 100.0;
        let worst_case = sized.size * stop_distance * sized.leverage;
        assert!(worst_case <= 10.0 + 1e-6);
    }

    #[test]
    fn test_stop_widens_with_volatility() {
        let sizer = PositionSizer::new(SizerConfig::default());
        let calm =
            sizer.compute_optimal_position(&signal(ConfidenceTier::High), &market(), &account());

        let mut volatile = market();
        volatile.volatility_24h = 0.04;
        let wide =
            sizer.compute_optimal_position(&signal(ConfidenceTier::High), &volatile, &account());

        assert!(wide.stop_price > calm.stop_price);
    }

    #[test]
    fn test_position_cap_revalidated() {
        let sizer = PositionSizer::new(SizerConfig::default());
        let mut account = account();
        account.open_positions = 5;

        let sized =
            sizer.compute_optimal_position(&signal(ConfidenceTier::High), &market(), &account);
        assert_eq!(sized.size, 0.0);
        assert!(sized.reasoning.contains("position count"));
    }

    #[test]
    fn test_exposure_cap_revalidated() {
        let sizer = PositionSizer::new(SizerConfig::default());
        let mut account = account();
        account.available_margin = 1000.0; // 90% of equity already committed

        let sized =
            sizer.compute_optimal_position(&signal(ConfidenceTier::High), &market(), &account);
        assert_eq!(sized.size, 0.0);
        assert!(sized.reasoning.contains("exposure"));
    }

    #[test]
    fn test_short_stop_above_target_below() {
        let sizer = PositionSizer::new(SizerConfig::default());
        let sized =
            sizer.compute_optimal_position(&signal(ConfidenceTier::High), &market(), &account());
        assert!(sized.stop_price > 100.0);
        assert!(sized.target_price < 100.0);
    }
}
