use crate::config::ShortGateConfig;
use crate::models::{
    AccountSnapshot, Direction, MarketSnapshot, Signal, TrendDirection,
};

/// Outcome of the short admission check
#[derive(Debug, Clone)]
pub struct ShortDecision {
    pub can_short: bool,
    pub reasons: Vec<String>,
    /// Minimum approval factor across the gates, applied to the sized entry
    pub size_factor: f64,
    pub stop_price: f64,
    pub target_price: f64,
}

impl ShortDecision {
    fn rejected(reason: String) -> Self {
        Self {
            can_short: false,
            reasons: vec![reason],
            size_factor: 0.0,
            stop_price: 0.0,
            target_price: 0.0,
        }
    }
}

/// Admission control for short positions
///
/// Four independent gates, each a hard veto: market environment, account
/// constraints, risk posture, and signal sanity. Any single failure closes
/// the gate regardless of the others.
#[derive(Debug, Clone)]
pub struct ShortEligibilityGate {
    config: ShortGateConfig,
}

impl ShortEligibilityGate {
    pub fn new(config: ShortGateConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        signal: &Signal,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
    ) -> ShortDecision {
        if signal.direction != Direction::Short {
            return ShortDecision::rejected("signal is not a short signal".to_string());
        }

        let gates = [
            self.market_gate(market),
            self.account_gate(account),
            self.risk_gate(signal, market, account),
            self.signal_gate(signal, market),
        ];

        let mut min_factor = f64::INFINITY;
        for gate in &gates {
            match gate {
                Ok(factor) => min_factor = min_factor.min(*factor),
                Err(reason) => return ShortDecision::rejected(reason.clone()),
            }
        }

        let volatility = market.volatility_24h;
        let stop_distance = (volatility * 2.0).max(0.02);
        let confidence = match signal.confidence {
            crate::models::ConfidenceTier::High => 1.0,
            crate::models::ConfidenceTier::Medium => 0.7,
            crate::models::ConfidenceTier::Low => 0.5,
        };
        let target_distance = 0.03 + confidence * 0.02;

        ShortDecision {
            can_short: true,
            reasons: vec!["all gates passed".to_string()],
            size_factor: min_factor,
            stop_price: market.price * (1.0 + stop_distance),
            target_price: market.price * (1.0 - target_distance),
        }
    }

    /// Gate 1: liquidity, spread, and an explicitly confirmed downtrend
    fn market_gate(&self, market: &MarketSnapshot) -> Result<f64, String> {
        let volume_ratio = if market.avg_volume_24h > 0.0 {
            market.volume_24h / market.avg_volume_24h
        } else {
            1.0
        };
        if volume_ratio < self.config.min_volume_ratio {
            return Err(format!(
                "market gate: volume ratio {:.2} below minimum {:.2}",
                volume_ratio, self.config.min_volume_ratio
            ));
        }

        if market.spread_pct > self.config.max_spread_pct {
            return Err(format!(
                "market gate: spread {:.4} above maximum {:.4}",
                market.spread_pct, self.config.max_spread_pct
            ));
        }

        if market.orderbook_depth_usd < self.config.min_liquidity_usd {
            return Err(format!(
                "market gate: liquidity ${:.0} below minimum ${:.0}",
                market.orderbook_depth_usd, self.config.min_liquidity_usd
            ));
        }

        // Undecided markets are refused outright
        match market.trend {
            Some(TrendDirection::Down) => {}
            Some(TrendDirection::Up) => {
                return Err("market gate: trend confirmed up, not shortable".to_string())
            }
            None => return Err("market gate: trend unconfirmed".to_string()),
        }

        // Thin-but-passing volume scales the entry down
        Ok(volume_ratio.min(1.0))
    }

    /// Gate 2: margin floor, leverage cap, position count, short exposure
    fn account_gate(&self, account: &AccountSnapshot) -> Result<f64, String> {
        if account.available_margin < self.config.min_available_margin {
            return Err(format!(
                "account gate: available margin {:.2} below floor {:.2}",
                account.available_margin, self.config.min_available_margin
            ));
        }

        if account.max_leverage < self.config.min_account_leverage {
            return Err(format!(
                "account gate: account leverage cap {:.1} below required {:.1}",
                account.max_leverage, self.config.min_account_leverage
            ));
        }

        if account.open_positions >= self.config.max_short_positions {
            return Err(format!(
                "account gate: {} open positions at cap {}",
                account.open_positions, self.config.max_short_positions
            ));
        }

        let short_ratio = if account.equity > 0.0 {
            account.short_exposure / account.equity
        } else {
            1.0
        };
        if short_ratio >= self.config.max_short_ratio {
            return Err(format!(
                "account gate: short exposure ratio {:.2} at or above maximum {:.2}",
                short_ratio, self.config.max_short_ratio
            ));
        }

        // Remaining headroom under the exposure cap scales the entry
        let headroom = (self.config.max_short_ratio - short_ratio) / self.config.max_short_ratio;
        Ok(headroom.clamp(0.0, 1.0))
    }

    /// Gate 3: signal strength, volatility band, hold time, local loss cutoff
    fn risk_gate(
        &self,
        signal: &Signal,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
    ) -> Result<f64, String> {
        if signal.confidence < self.config.min_confidence {
            return Err(format!(
                "risk gate: confidence {:?} below minimum {:?}",
                signal.confidence, self.config.min_confidence
            ));
        }

        let volatility = market.volatility_24h;
        if volatility < self.config.min_volatility || volatility > self.config.max_volatility {
            return Err(format!(
                "risk gate: volatility {:.3} outside [{:.3}, {:.3}]",
                volatility, self.config.min_volatility, self.config.max_volatility
            ));
        }

        if account.avg_hold_time_hours > self.config.max_hold_time_hours {
            return Err(format!(
                "risk gate: average hold time {:.1}h above limit {:.1}h",
                account.avg_hold_time_hours, self.config.max_hold_time_hours
            ));
        }

        if account.consecutive_losses >= self.config.max_consecutive_losses {
            return Err(format!(
                "risk gate: {} consecutive losses at local cutoff {}",
                account.consecutive_losses, self.config.max_consecutive_losses
            ));
        }

        let factor = match signal.confidence {
            crate::models::ConfidenceTier::High => 1.0,
            crate::models::ConfidenceTier::Medium => 0.8,
            crate::models::ConfidenceTier::Low => 0.5,
        };
        Ok(factor)
    }

    /// Gate 4: no shorting straight into a rally; target near the market
    fn signal_gate(&self, signal: &Signal, market: &MarketSnapshot) -> Result<f64, String> {
        let window_change = market.window_change_pct();
        if window_change >= self.config.max_rally_pct {
            return Err(format!(
                "signal gate: short rejected after {:.2}% rally",
                window_change * 100.0
            ));
        }

        if let Some(target) = signal.target_price {
            if market.price > 0.0 {
                let deviation = (target - market.price).abs() / market.price;
                if deviation > self.config.max_target_deviation {
                    return Err(format!(
                        "signal gate: target {:.2} deviates {:.2}% from market {:.2}",
                        target,
                        deviation * 100.0,
                        market.price
                    ));
                }
            }
        }

        Ok(1.0)
    }
}

/// Counterpart check for long entries: true after a sharp window drop,
/// which admits a contrarian long even without a confirmed uptrend.
///
/// Kept next to the short gate because it shares the same window semantics.
pub fn long_after_crash(market: &MarketSnapshot, max_drop_pct: f64) -> bool {
    market.window_change_pct() <= -max_drop_pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfidenceTier;
    use chrono::Utc;

    fn short_signal() -> Signal {
        Signal {
            direction: Direction::Short,
            confidence: ConfidenceTier::High,
            target_price: None,
            timestamp: Utc::now(),
        }
    }

    fn shortable_market() -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            price: 100.0,
            volume_24h: 1_000_000.0,
            avg_volume_24h: 1_000_000.0,
            spread_pct: 0.001,
            volatility_24h: 0.03,
            orderbook_depth_usd: 500_000.0,
            trend: Some(TrendDirection::Down),
            trend_strength: 0.7,
            window_open: 100.5,
            window_high: 100.8,
            window_low: 99.5,
            timestamp: Utc::now(),
        }
    }

    fn healthy_account() -> AccountSnapshot {
        AccountSnapshot {
            equity: 10000.0,
            available_margin: 8000.0,
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
    fn test_all_gates_pass() {
        let gate = ShortEligibilityGate::new(ShortGateConfig::default());
        let decision = gate.evaluate(&short_signal(), &shortable_market(), &healthy_account());

        assert!(decision.can_short);
        assert!(decision.size_factor > 0.0 && decision.size_factor <= 1.0);
        assert!(decision.stop_price > 100.0);
        assert!(decision.target_price < 100.0);
    }

    #[test]
    fn test_unconfirmed_trend_vetoes() {
        let gate = ShortEligibilityGate::new(ShortGateConfig::default());
        let mut market = shortable_market();
        market.trend = None;

        let decision = gate.evaluate(&short_signal(), &market, &healthy_account());
        assert!(!decision.can_short);
        assert!(decision.reasons[0].contains("trend unconfirmed"));
    }

    #[test]
    fn test_margin_floor_vetoes() {
        let gate = ShortEligibilityGate::new(ShortGateConfig::default());
        let mut account = healthy_account();
        account.available_margin = 500.0;

        let decision = gate.evaluate(&short_signal(), &shortable_market(), &account);
        assert!(!decision.can_short);
        assert!(decision.reasons[0].contains("margin"));
    }

    #[test]
    fn test_exposure_cap_vetoes() {
        let gate = ShortEligibilityGate::new(ShortGateConfig::default());
        let mut account = healthy_account();
        account.short_exposure = 3500.0; // 35% of equity

        let decision = gate.evaluate(&short_signal(), &shortable_market(), &account);
        assert!(!decision.can_short);
        assert!(decision.reasons[0].contains("short exposure"));
    }

    #[test]
    fn test_local_loss_cutoff_vetoes_before_breaker() {
        let gate = ShortEligibilityGate::new(ShortGateConfig::default());
        let mut account = healthy_account();
        account.consecutive_losses = 2; // below the breaker's 3

        let decision = gate.evaluate(&short_signal(), &shortable_market(), &account);
        assert!(!decision.can_short);
        assert!(decision.reasons[0].contains("consecutive losses"));
    }

    #[test]
    fn test_rally_rejection() {
        let gate = ShortEligibilityGate::new(ShortGateConfig::default());
        let mut market = shortable_market();
        market.window_open = 97.0; // ~3.1% rally into the signal

        let decision = gate.evaluate(&short_signal(), &market, &healthy_account());
        assert!(!decision.can_short);
        assert!(decision.reasons[0].contains("rally"));
    }

    #[test]
    fn test_target_deviation_rejection() {
        let gate = ShortEligibilityGate::new(ShortGateConfig::default());
        let mut signal = short_signal();
        signal.target_price = Some(90.0); // 10% away from market

        let decision = gate.evaluate(&signal, &shortable_market(), &healthy_account());
        assert!(!decision.can_short);
        assert!(decision.reasons[0].contains("target"));
    }

    #[test]
    fn test_any_single_gate_failure_closes() {
        let gate = ShortEligibilityGate::new(ShortGateConfig::default());

        // One failing input per gate, everything else healthy
        let mut thin_market = shortable_market();
        thin_market.volume_24h = 100_000.0;

        let mut poor_account = healthy_account();
        poor_account.available_margin = 0.0;

        let mut weak_signal = short_signal();
        weak_signal.confidence = ConfidenceTier::Low;

        let mut rallying = shortable_market();
        rallying.window_open = 95.0;

        assert!(!gate.evaluate(&short_signal(), &thin_market, &healthy_account()).can_short);
        assert!(!gate.evaluate(&short_signal(), &shortable_market(), &poor_account).can_short);
        assert!(!gate.evaluate(&weak_signal, &shortable_market(), &healthy_account()).can_short);
        assert!(!gate.evaluate(&short_signal(), &rallying, &healthy_account()).can_short);
    }

    #[test]
    fn test_size_factor_is_minimum_across_gates() {
        let gate = ShortEligibilityGate::new(ShortGateConfig::default());
        let mut signal = short_signal();
        signal.confidence = ConfidenceTier::Medium; // risk gate factor 0.8

        let mut account = healthy_account();
        account.short_exposure = 1500.0; // headroom factor (0.3-0.15)/0.3 = 0.5

        let decision = gate.evaluate(&signal, &shortable_market(), &account);
        assert!(decision.can_short);
        assert!((decision.size_factor - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_long_after_crash_counterpart() {
        let mut market = shortable_market();
        market.window_open = 103.0; // ~2.9% drop
        assert!(long_after_crash(&market, 0.02));
        market.window_open = 100.5;
        assert!(!long_after_crash(&market, 0.02));
    }
}
