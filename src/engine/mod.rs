use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::api::{ExchangeClient, OrderRequest, OrderState, OrderType, SignalClient};
use crate::checkpoint::CheckpointStore;
use crate::config::BotConfig;
use crate::execution::{spawn_order_watcher, CorrectionAction, StopUpdate, TrailingStopEngine};
use crate::models::{
    AccountSnapshot, CircuitState, ConfidenceTier, Direction, ExitReason, MarketSnapshot,
    PerformanceStats, Position, PositionSide, ProfitStage, RiskTier, Signal, SystemStatus,
    TradeRecord, TrendDirection,
};
use crate::recovery::{BotError, RecoveryExecutor, RecoveryOutcome};
use crate::risk::{short_gate, CircuitBreaker, PositionSizer, RiskAlertMonitor, ShortEligibilityGate};

/// Engine-owned state that survives restarts via checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub positions: Vec<Position>,
    pub trade_history: VecDeque<TradeRecord>,
    /// Unfilled order ids mapped to the positions opened for them
    pub pending_orders: HashMap<String, Uuid>,
    pub circuit: CircuitState,
    pub equity_high_water: f64,
    pub daily_start_equity: f64,
    pub daily_anchor: DateTime<Utc>,
    pub consecutive_losses: u32,
    /// Tier from the most recent sizing pass; None until a signal is sized
    #[serde(default)]
    pub last_risk_tier: Option<RiskTier>,
    pub stats: PerformanceStats,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            positions: Vec::new(),
            trade_history: VecDeque::new(),
            pending_orders: HashMap::new(),
            circuit: CircuitState::default(),
            equity_high_water: 0.0,
            daily_start_equity: 0.0,
            daily_anchor: Utc::now(),
            consecutive_losses: 0,
            last_risk_tier: None,
            stats: PerformanceStats::default(),
            last_checkpoint_at: None,
        }
    }
}

/// What one cycle did, for logging and tests
#[derive(Debug, Default)]
pub struct CycleReport {
    pub entered: Option<Uuid>,
    pub exits: Vec<(Uuid, ExitReason)>,
    pub stops_adjusted: u32,
    pub circuit_tripped: bool,
    pub alerts_raised: usize,
    pub skipped: bool,
}

/// Read-only status surface for the CLI and logs
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub symbol: String,
    pub open_positions: Vec<(Uuid, ProfitStage)>,
    pub circuit_tripped: bool,
    pub active_alerts: Vec<&'static str>,
    pub equity_high_water: f64,
    pub consecutive_losses: u32,
    pub risk_tier: Option<RiskTier>,
    pub total_trades: u32,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
}

/// Single-writer decision loop
///
/// One cycle reads fresh snapshots, runs the risk pipeline, and applies
/// all state mutations sequentially. Background order watchers report back
/// through the correction queue instead of touching state directly.
pub struct TradingEngine {
    config: BotConfig,
    exchange: ExchangeClient,
    signals: SignalClient,
    breaker: CircuitBreaker,
    short_gate: ShortEligibilityGate,
    sizer: PositionSizer,
    trailing: TrailingStopEngine,
    alerts: RiskAlertMonitor,
    recovery: RecoveryExecutor,
    checkpoints: CheckpointStore,
    state: EngineState,
    system: SystemStatus,
    last_good_market: Option<MarketSnapshot>,
    corrections_tx: mpsc::UnboundedSender<CorrectionAction>,
    corrections_rx: mpsc::UnboundedReceiver<CorrectionAction>,
}

impl TradingEngine {
    pub fn new(
        config: BotConfig,
        exchange: ExchangeClient,
        signals: SignalClient,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (corrections_tx, corrections_rx) = mpsc::unbounded_channel();
        Self {
            breaker: CircuitBreaker::new(config.breaker.clone()),
            short_gate: ShortEligibilityGate::new(config.short_gate.clone()),
            sizer: PositionSizer::new(config.sizer.clone()),
            trailing: TrailingStopEngine::new(config.trailing.clone()),
            alerts: RiskAlertMonitor::new(config.alerts.clone()),
            recovery: RecoveryExecutor::new(config.recovery.clone(), shutdown),
            checkpoints: CheckpointStore::new(config.checkpoint.clone()),
            state: EngineState::default(),
            system: SystemStatus::default(),
            last_good_market: None,
            corrections_tx,
            corrections_rx,
            exchange,
            signals,
            config,
        }
    }

    /// Resume from a checkpointed state instead of a cold start
    pub fn with_state(mut self, state: EngineState) -> Self {
        self.state = state;
        self
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            symbol: self.config.symbol.clone(),
            open_positions: self
                .state
                .positions
                .iter()
                .map(|p| (p.id, p.stage))
                .collect(),
            circuit_tripped: self.state.circuit.is_tripped(),
            active_alerts: self
                .alerts
                .active_alerts()
                .into_iter()
                .map(|kind| kind.as_str())
                .collect(),
            equity_high_water: self.state.equity_high_water,
            consecutive_losses: self.state.consecutive_losses,
            risk_tier: self.state.last_risk_tier,
            total_trades: self.state.stats.total_trades,
            win_rate: self.state.stats.win_rate(),
            total_pnl: self.state.stats.total_pnl,
            last_checkpoint_at: self.state.last_checkpoint_at,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Tick until shutdown; each tick runs one full decision cycle
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.cycle_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) if report.skipped => {
                            tracing::warn!("cycle skipped, stale or missing data");
                        }
                        Ok(report) => {
                            tracing::debug!(
                                entered = ?report.entered,
                                exits = report.exits.len(),
                                stops_adjusted = report.stops_adjusted,
                                "cycle complete"
                            );
                        }
                        Err(error) => {
                            self.system.error_count += 1;
                            tracing::error!(%error, "cycle failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("shutdown requested, saving final checkpoint");
                        if let Err(error) = self.checkpoints.save(&self.state, "shutdown") {
                            tracing::error!(%error, "final checkpoint failed");
                        }
                        return;
                    }
                }
            }
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport, BotError> {
        let mut report = CycleReport::default();
        let now = Utc::now();

        self.drain_corrections().await;

        // Snapshots first; no market data at all means no decisions
        let Some(market) = self.fetch_market().await else {
            report.skipped = true;
            return Ok(report);
        };
        let Some(account) = self.fetch_account().await else {
            report.skipped = true;
            return Ok(report);
        };
        let account = self.merge_account(account, now);

        // Breaker before anything else; a trip suspends entries only
        let trip = self.breaker.check(&market, &account, &self.system);
        self.breaker.update_state(&mut self.state.circuit, trip, now);
        report.circuit_tripped = self.state.circuit.is_tripped();

        report.alerts_raised = self
            .alerts
            .scan(&market, &account, &self.system)
            .iter()
            .filter(|a| a.active)
            .count();

        if !report.circuit_tripped {
            report.entered = self.try_enter(&market, &account).await;
        }

        self.manage_positions(&market, &mut report).await;

        if self.checkpoints.due(self.state.last_checkpoint_at, now) {
            match self.checkpoints.save(&self.state, "cycle") {
                Ok(_) => self.state.last_checkpoint_at = Some(now),
                Err(error) => {
                    self.system.error_count += 1;
                    tracing::error!(%error, "checkpoint save failed");
                }
            }
        }

        self.last_good_market = Some(market);
        Ok(report)
    }

    /// Apply results reported by background order watchers
    async fn drain_corrections(&mut self) {
        while let Ok(action) = self.corrections_rx.try_recv() {
            match action {
                CorrectionAction::Confirmed { order_id } => {
                    self.state.pending_orders.remove(&order_id);
                    tracing::info!(order_id, "pending order filled");
                }
                CorrectionAction::CancelAndResubmit { order_id, request } => {
                    let Some(position_id) = self.state.pending_orders.remove(&order_id) else {
                        continue;
                    };
                    self.resubmit_at_market(position_id, order_id, request).await;
                }
            }
        }
    }

    /// Chase a cancelled limit entry with a market order, keeping the
    /// original stop and target
    async fn resubmit_at_market(
        &mut self,
        position_id: Uuid,
        cancelled_order_id: String,
        mut request: OrderRequest,
    ) {
        request.order_type = OrderType::Market;
        tracing::warn!(
            order_id = cancelled_order_id,
            symbol = request.symbol,
            "unfilled order cancelled, resubmitting at market"
        );

        let exchange = self.exchange.clone();
        let outcome = self
            .recovery
            .run("resubmit_order", || {
                let exchange = exchange.clone();
                let request = request.clone();
                async move { exchange.place_order(&request).await }
            })
            .await;

        let ack = match outcome {
            RecoveryOutcome::Recovered { value, .. } => value,
            _ => {
                self.system.api_failures += 1;
                self.state.positions.retain(|p| p.id != position_id);
                tracing::error!(
                    order_id = cancelled_order_id,
                    "market resubmission failed, entry dropped"
                );
                return;
            }
        };

        if ack.status == OrderState::Rejected {
            self.state.positions.retain(|p| p.id != position_id);
            tracing::warn!(order_id = ack.order_id, "market resubmission rejected, entry dropped");
            return;
        }

        // A market order normally fills on ack, but a venue that still
        // reports it open gets another watcher
        if ack.status == OrderState::Open {
            self.state
                .pending_orders
                .insert(ack.order_id.clone(), position_id);
            spawn_order_watcher(
                self.exchange.clone(),
                ack.order_id.clone(),
                request,
                Duration::from_secs(self.config.order.timeout_secs),
                self.corrections_tx.clone(),
            );
        }
        tracing::info!(position = %position_id, order_id = ack.order_id, "entry resubmitted at market");
    }

    async fn fetch_market(&mut self) -> Option<MarketSnapshot> {
        let exchange = self.exchange.clone();
        let symbol = self.config.symbol.clone();
        // Manage existing positions off the last good snapshot rather than
        // going completely blind
        let outcome = self
            .recovery
            .run_with_fallback(
                "fetch_market",
                || {
                    let exchange = exchange.clone();
                    let symbol = symbol.clone();
                    async move { exchange.get_market(&symbol).await }
                },
                self.last_good_market.clone(),
            )
            .await;
        match outcome {
            RecoveryOutcome::Recovered { value, .. } => Some(value),
            RecoveryOutcome::Degraded { value, .. } => {
                self.system.api_failures += 1;
                Some(value)
            }
            RecoveryOutcome::GaveUp { .. } => {
                self.system.api_failures += 1;
                None
            }
            RecoveryOutcome::Aborted => None,
        }
    }

    async fn fetch_account(&mut self) -> Option<AccountSnapshot> {
        let exchange = self.exchange.clone();
        let outcome = self
            .recovery
            .run("fetch_account", || {
                let exchange = exchange.clone();
                async move { exchange.get_account().await }
            })
            .await;
        match outcome {
            RecoveryOutcome::Recovered { value, .. } => Some(value),
            RecoveryOutcome::GaveUp { .. } => {
                self.system.api_failures += 1;
                None
            }
            _ => None,
        }
    }

    /// Overlay engine-tracked risk counters onto the raw account snapshot
    fn merge_account(&mut self, raw: AccountSnapshot, now: DateTime<Utc>) -> AccountSnapshot {
        if now.date_naive() != self.state.daily_anchor.date_naive()
            || self.state.daily_start_equity <= 0.0
        {
            // Prefer the venue's own daily anchor so a restart mid-day does
            // not erase realized losses
            self.state.daily_start_equity = if raw.daily_start_equity > 0.0 {
                raw.daily_start_equity
            } else {
                raw.equity
            };
            self.state.daily_anchor = now;
            tracing::info!(
                daily_start = self.state.daily_start_equity,
                "daily risk counters reset"
            );
        }
        self.state.equity_high_water = self
            .state
            .equity_high_water
            .max(raw.equity_high_water)
            .max(raw.equity);

        let short_exposure: f64 = self
            .state
            .positions
            .iter()
            .filter(|p| p.side == PositionSide::Short)
            .map(|p| p.size)
            .sum();

        AccountSnapshot {
            daily_pnl: raw.equity - self.state.daily_start_equity,
            daily_start_equity: self.state.daily_start_equity,
            equity_high_water: self.state.equity_high_water,
            consecutive_losses: self.state.consecutive_losses,
            open_positions: self.state.positions.len() as u32,
            short_exposure,
            ..raw
        }
    }

    /// Signal -> gate -> sizer -> order; returns the new position id
    async fn try_enter(&mut self, market: &MarketSnapshot, account: &AccountSnapshot) -> Option<Uuid> {
        let signal = match self.fetch_signal().await {
            Some(signal) => signal,
            None => return None,
        };

        let (side, size_factor) = match signal.direction {
            Direction::Hold => return None,
            Direction::Short => {
                let decision = self.short_gate.evaluate(&signal, market, account);
                if !decision.can_short {
                    tracing::debug!(reasons = ?decision.reasons, "short entry vetoed");
                    return None;
                }
                (PositionSide::Short, decision.size_factor)
            }
            Direction::Long => {
                if !self.long_admissible(&signal, market) {
                    tracing::debug!("long entry vetoed, trend not supportive");
                    return None;
                }
                (PositionSide::Long, 1.0)
            }
        };

        // The sizer's stop and target are final; its leverage bound was
        // derived against that stop distance
        let sized = self.sizer.compute_optimal_position(&signal, market, account);
        self.state.last_risk_tier = Some(sized.risk_tier);
        if sized.size <= 0.0 {
            tracing::info!(
                tier = sized.risk_tier.as_str(),
                reason = sized.reasoning,
                "entry sized to zero"
            );
            return None;
        }

        let request = OrderRequest {
            symbol: self.config.symbol.clone(),
            side,
            order_type: OrderType::Limit,
            size: sized.size * size_factor,
            leverage: sized.leverage,
            stop_price: sized.stop_price,
            target_price: sized.target_price,
        };

        let exchange = self.exchange.clone();
        let outcome = self
            .recovery
            .run("place_order", || {
                let exchange = exchange.clone();
                let request = request.clone();
                async move { exchange.place_order(&request).await }
            })
            .await;

        let ack = match outcome {
            RecoveryOutcome::Recovered { value, .. } => value,
            RecoveryOutcome::GaveUp { error, .. } => {
                self.system.api_failures += 1;
                tracing::error!(%error, "order placement failed");
                return None;
            }
            _ => return None,
        };

        if ack.status == OrderState::Rejected {
            tracing::warn!(order_id = ack.order_id, "order rejected by exchange");
            return None;
        }

        let position = Position {
            id: Uuid::new_v4(),
            symbol: self.config.symbol.clone(),
            side,
            entry_price: market.price,
            size: request.size,
            leverage: request.leverage,
            opened_at: Utc::now(),
            stop_price: request.stop_price,
            target_price: request.target_price,
            stage: ProfitStage::None,
        };
        let position_id = position.id;
        tracing::info!(
            position = %position_id,
            ?side,
            size = position.size,
            leverage = position.leverage,
            stop = position.stop_price,
            target = position.target_price,
            tier = sized.risk_tier.as_str(),
            "position opened"
        );

        if ack.status == OrderState::Open {
            self.state
                .pending_orders
                .insert(ack.order_id.clone(), position_id);
            spawn_order_watcher(
                self.exchange.clone(),
                ack.order_id,
                request,
                Duration::from_secs(self.config.order.timeout_secs),
                self.corrections_tx.clone(),
            );
        }
        self.state.positions.push(position);
        Some(position_id)
    }

    fn long_admissible(&self, signal: &Signal, market: &MarketSnapshot) -> bool {
        let trending_up = market.trend == Some(TrendDirection::Up)
            && signal.confidence >= ConfidenceTier::Medium;
        trending_up || short_gate::long_after_crash(market, self.config.breaker.price_crash_threshold)
    }

    async fn fetch_signal(&mut self) -> Option<Signal> {
        let signals = self.signals.clone();
        let symbol = self.config.symbol.clone();
        let outcome = self
            .recovery
            .run("fetch_signal", || {
                let signals = signals.clone();
                let symbol = symbol.clone();
                async move { signals.fetch_latest(&symbol).await }
            })
            .await;
        match outcome {
            RecoveryOutcome::Recovered { value, .. } => Some(value),
            RecoveryOutcome::GaveUp { error, .. } => {
                // No signal just means no entry this cycle
                tracing::warn!(%error, "signal unavailable");
                None
            }
            _ => None,
        }
    }

    /// Trailing-stop pass over every open position
    async fn manage_positions(&mut self, market: &MarketSnapshot, report: &mut CycleReport) {
        let mut closed: Vec<(Uuid, ExitReason)> = Vec::new();
        let mut amendments: Vec<(Uuid, f64)> = Vec::new();

        for position in &mut self.state.positions {
            match self.trailing.update(position, market) {
                StopUpdate::Exit(reason) => closed.push((position.id, reason)),
                StopUpdate::Adjusted { new_stop, .. } => {
                    amendments.push((position.id, new_stop));
                    report.stops_adjusted += 1;
                }
                StopUpdate::Frozen | StopUpdate::Unchanged => {}
            }
        }

        for (position_id, new_stop) in amendments {
            let exchange = self.exchange.clone();
            let id = position_id.to_string();
            let outcome = self
                .recovery
                .run("amend_stop", || {
                    let exchange = exchange.clone();
                    let id = id.clone();
                    async move { exchange.amend_stop(&id, new_stop).await }
                })
                .await;
            if let RecoveryOutcome::GaveUp { error, .. } = outcome {
                // Local stop still enforced next cycle even if the venue copy lags
                self.system.error_count += 1;
                tracing::error!(position = %position_id, %error, "stop amendment failed");
            }
        }

        for (position_id, reason) in closed {
            self.close_position(position_id, reason, market.price).await;
            report.exits.push((position_id, reason));
        }
    }

    async fn close_position(&mut self, position_id: Uuid, reason: ExitReason, mark_price: f64) {
        let Some(index) = self.state.positions.iter().position(|p| p.id == position_id) else {
            return;
        };
        let position = self.state.positions.remove(index);

        let exchange = self.exchange.clone();
        let id = position_id.to_string();
        let outcome = self
            .recovery
            .run("close_position", || {
                let exchange = exchange.clone();
                let id = id.clone();
                async move { exchange.close_position(&id).await }
            })
            .await;
        let fill_price = match outcome {
            RecoveryOutcome::Recovered { value, .. } => value,
            _ => {
                // Book the exit at the mark; reconciliation happens against the
                // next account snapshot
                self.system.error_count += 1;
                tracing::error!(position = %position_id, "close failed, booking at mark price");
                mark_price
            }
        };

        let pnl = position.unrealized_pnl(fill_price);
        if pnl < 0.0 {
            self.state.consecutive_losses += 1;
        } else {
            self.state.consecutive_losses = 0;
        }
        self.state.stats.record_trade(pnl);

        let record = TradeRecord {
            id: position.id,
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price: fill_price,
            size: position.size,
            leverage: position.leverage,
            pnl,
            opened_at: position.opened_at,
            closed_at: Utc::now(),
            reason,
        };
        self.state.trade_history.push_back(record);
        while self.state.trade_history.len() > self.config.max_trade_history {
            self.state.trade_history.pop_front();
        }

        tracing::info!(
            position = %position_id,
            ?reason,
            pnl,
            consecutive_losses = self.state.consecutive_losses,
            "position closed"
        );
    }
}
