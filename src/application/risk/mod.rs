//! Risk engine: the pre-trade gate plus the RUNNING / PAUSED / HALTED state
//! machine. Single writer of `RiskState`; counters mutate only on confirmed
//! fills, never at signal admission, so rejected retries and cancelled
//! orders do not pollute them. Readers observe atomic snapshots through a
//! watch channel.

pub mod gate;

pub use gate::GateContext;

use crate::application::clock::SharedClock;
use crate::config::RiskLimits;
use crate::domain::events::EngineEvent;
use crate::domain::repositories::PerformanceStore;
use crate::domain::risk::{EngineStatus, GateDecision, RiskState};
use crate::domain::signal::Signal;
use crate::infrastructure::event_bus::EventBus;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};

pub struct RiskEngine {
    limits: RiskLimits,
    clock: SharedClock,
    tz: Tz,
    tradable: HashSet<String>,
    state: RwLock<RiskState>,
    snapshot_tx: watch::Sender<RiskState>,
    store: Arc<dyn PerformanceStore>,
    events: EventBus,
}

impl RiskEngine {
    pub fn new(
        limits: RiskLimits,
        clock: SharedClock,
        tz: Tz,
        tradable: HashSet<String>,
        initial_state: RiskState,
        store: Arc<dyn PerformanceStore>,
        events: EventBus,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(initial_state.clone());
        Self {
            limits,
            clock,
            tz,
            tradable,
            state: RwLock::new(initial_state),
            snapshot_tx,
            store,
            events,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn is_tradable(&self, symbol: &str) -> bool {
        self.tradable.contains(symbol)
    }

    /// Current state, cloned. Cheap enough for per-signal use.
    pub async fn snapshot(&self) -> RiskState {
        self.state.read().await.clone()
    }

    /// Watch subscription for components that only need to observe.
    pub fn subscribe(&self) -> watch::Receiver<RiskState> {
        self.snapshot_tx.subscribe()
    }

    async fn publish_state(&self, state: &RiskState) {
        let _ = self.snapshot_tx.send(state.clone());
    }

    async fn journal_state(&self, state: &RiskState) {
        if let Err(e) = self.store.record_risk_snapshot(state).await {
            error!("RiskEngine: failed to journal risk snapshot: {}", e);
            self.events
                .publish(EngineEvent::SystemError {
                    context: format!("risk snapshot journal: {}", e),
                })
                .await;
        }
    }

    /// First valuation after startup. A state restored from persistence
    /// keeps its references; a fresh one anchors them to the current value.
    pub async fn initialize_session(&self, total_value: Decimal) {
        let mut state = self.state.write().await;
        if state.start_of_day_value <= Decimal::ZERO {
            state.start_of_day_value = total_value;
        }
        if state.peak_value <= Decimal::ZERO {
            state.peak_value = total_value;
        }
        state.updated_at = self.clock.now();
        info!(
            "RiskEngine: session initialized (value {}, day start {}, peak {})",
            total_value, state.start_of_day_value, state.peak_value
        );
        self.publish_state(&state).await;
    }

    /// Roll the daily counters when the local date changed.
    async fn maybe_roll_day(&self, state: &mut RiskState, current_value: Decimal) {
        let now = self.clock.now();
        let today = now.with_timezone(&self.tz).date_naive();
        if today != state.reference_date {
            info!(
                "RiskEngine: daily reset {} -> {} (value {})",
                state.reference_date, today, current_value
            );
            state.roll_day(today, current_value, now);
        }
    }

    async fn halt_locked(&self, state: &mut RiskState, reason: String) {
        if state.status == EngineStatus::Halted {
            return;
        }
        warn!("RiskEngine: HALT - {}", reason);
        state.status = EngineStatus::Halted;
        state.halt_reason = Some(reason.clone());
        state.updated_at = self.clock.now();
        self.publish_state(state).await;
        self.journal_state(state).await;
        self.events.publish(EngineEvent::RiskHalt { reason }).await;
    }

    /// Evaluate one signal against the gate. May transition to HALTED as a
    /// side effect when a breach is discovered during evaluation.
    pub async fn gate(&self, signal: &Signal, ctx: &GateContext) -> GateDecision {
        let mut state = self.state.write().await;
        self.maybe_roll_day(&mut state, ctx.total_value).await;

        let outcome = gate::evaluate(signal, &self.limits, &state, ctx);
        if let Some(reason) = outcome.halt {
            self.halt_locked(&mut state, reason).await;
        } else {
            self.publish_state(&state).await;
        }
        outcome.decision
    }

    /// A fill was confirmed: count it. Exactly one increment per fill.
    pub async fn on_fill(&self) {
        let mut state = self.state.write().await;
        state.daily_trades += 1;
        state.updated_at = self.clock.now();
        self.publish_state(&state).await;
    }

    /// A position was closed with realized pnl. Updates daily pnl and the
    /// loss streak, then re-checks breach thresholds: three losing trades
    /// in a row can cross the daily cap without any new signal arriving.
    pub async fn on_trade_closed(&self, pnl: Decimal) {
        let mut state = self.state.write().await;
        state.daily_pnl += pnl;
        if pnl < Decimal::ZERO {
            state.consecutive_losses += 1;
        } else {
            state.consecutive_losses = 0;
        }
        state.updated_at = self.clock.now();

        self.check_breaches(&mut state).await;
        self.publish_state(&state).await;
    }

    /// Periodic mark-to-market from the monitor: rolls the day, updates the
    /// drawdown against the peak, re-checks breaches.
    pub async fn mark(&self, total_value: Decimal) {
        let mut state = self.state.write().await;
        self.maybe_roll_day(&mut state, total_value).await;
        state.mark_value(total_value, self.clock.now());
        self.check_breaches(&mut state).await;
        self.publish_state(&state).await;
    }

    async fn check_breaches(&self, state: &mut RiskState) {
        if state.status == EngineStatus::Halted {
            return;
        }
        if state.start_of_day_value > Decimal::ZERO {
            let daily_floor = -self.limits.max_daily_loss_pct * state.start_of_day_value;
            let rollback_floor = -self.limits.rollback_daily_loss_pct * state.start_of_day_value;

            if state.daily_pnl <= rollback_floor && !state.rollback_pending {
                // The orchestrator restores the previous strategy version on
                // its next cycle; the engine only raises the flag.
                state.rollback_pending = true;
                let daily_pnl_pct = state.daily_pnl / state.start_of_day_value;
                warn!(
                    "RiskEngine: rollback threshold crossed (daily pnl {})",
                    state.daily_pnl
                );
                self.events
                    .publish(EngineEvent::StrategyRollback { daily_pnl_pct })
                    .await;
                self.halt_locked(
                    state,
                    format!("rollback threshold: daily pnl {} <= {}", state.daily_pnl, rollback_floor),
                )
                .await;
                return;
            }
            if state.daily_pnl <= daily_floor {
                let reason = format!(
                    "daily loss cap: pnl {} <= {}",
                    state.daily_pnl, daily_floor
                );
                self.halt_locked(state, reason).await;
                return;
            }
        }
        if state.drawdown_pct >= self.limits.max_drawdown_pct {
            let reason = format!(
                "drawdown cap: {} >= {}",
                state.drawdown_pct, self.limits.max_drawdown_pct
            );
            self.halt_locked(state, reason).await;
            return;
        }
        if let Some(limit) = self.limits.consecutive_losses_disable
            && state.consecutive_losses >= limit
            && state.status == EngineStatus::Running
        {
            warn!(
                "RiskEngine: {} consecutive losses, pausing",
                state.consecutive_losses
            );
            state.status = EngineStatus::Paused;
            state.updated_at = self.clock.now();
            self.journal_state(state).await;
        }
    }

    /// Operator pause. Reversible via `resume`.
    pub async fn pause(&self) {
        let mut state = self.state.write().await;
        if state.status == EngineStatus::Running {
            info!("RiskEngine: paused by operator");
            state.status = EngineStatus::Paused;
            state.updated_at = self.clock.now();
            self.publish_state(&state).await;
            self.journal_state(&state).await;
        }
    }

    /// Operator kill switch: immediate halt.
    pub async fn kill(&self, reason: &str) {
        let mut state = self.state.write().await;
        self.halt_locked(&mut state, format!("operator kill: {}", reason))
            .await;
    }

    /// Operator resume after confirming root cause. The only way out of
    /// PAUSED or HALTED.
    pub async fn resume(&self) {
        let mut state = self.state.write().await;
        if state.status == EngineStatus::Running {
            return;
        }
        info!("RiskEngine: resumed by operator");
        state.status = EngineStatus::Running;
        state.halt_reason = None;
        state.consecutive_losses = 0;
        state.updated_at = self.clock.now();
        self.publish_state(&state).await;
        self.journal_state(&state).await;
        self.events.publish(EngineEvent::RiskResumed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::SystemClock;
    use crate::domain::repositories::{
        CapitalEvent, DailyPerformance, PortfolioSnapshot,
    };
    use crate::domain::errors::JournalError;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct NullPerformanceStore;

    #[async_trait]
    impl PerformanceStore for NullPerformanceStore {
        async fn record_daily(&self, _row: &DailyPerformance) -> Result<(), JournalError> {
            Ok(())
        }
        async fn record_capital_event(&self, _event: &CapitalEvent) -> Result<(), JournalError> {
            Ok(())
        }
        async fn capital_events(&self) -> Result<Vec<CapitalEvent>, JournalError> {
            Ok(vec![])
        }
        async fn record_risk_snapshot(&self, _state: &RiskState) -> Result<(), JournalError> {
            Ok(())
        }
        async fn latest_risk_snapshot(&self) -> Result<Option<RiskState>, JournalError> {
            Ok(None)
        }
        async fn record_portfolio_snapshot(
            &self,
            _snapshot: &PortfolioSnapshot,
        ) -> Result<(), JournalError> {
            Ok(())
        }
        async fn latest_portfolio_snapshot(
            &self,
        ) -> Result<Option<PortfolioSnapshot>, JournalError> {
            Ok(None)
        }
    }

    fn engine(limits: RiskLimits) -> RiskEngine {
        let now = Utc::now();
        RiskEngine::new(
            limits,
            Arc::new(SystemClock),
            chrono_tz::UTC,
            HashSet::from(["BTCUSD".to_string()]),
            RiskState::new(dec!(1000), now.date_naive(), now),
            Arc::new(NullPerformanceStore),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn fills_increment_daily_trades_once() {
        let engine = engine(RiskLimits::default());
        engine.on_fill().await;
        engine.on_fill().await;
        assert_eq!(engine.snapshot().await.daily_trades, 2);
    }

    #[tokio::test]
    async fn losing_streak_drives_counters_and_halt() {
        let limits = RiskLimits {
            max_daily_loss_pct: dec!(0.10),
            rollback_daily_loss_pct: dec!(0.50), // out of the way
            ..Default::default()
        };
        let engine = engine(limits);

        engine.on_trade_closed(dec!(-40)).await;
        engine.on_trade_closed(dec!(-35)).await;
        let state = engine.snapshot().await;
        assert_eq!(state.consecutive_losses, 2);
        assert_eq!(state.status, EngineStatus::Running);

        // -101 total <= -100 cap
        engine.on_trade_closed(dec!(-26)).await;
        let state = engine.snapshot().await;
        assert_eq!(state.status, EngineStatus::Halted);
        assert!(state.halt_reason.as_deref().unwrap().contains("daily loss"));
    }

    #[tokio::test]
    async fn rollback_threshold_sets_flag_and_halts() {
        let limits = RiskLimits {
            max_daily_loss_pct: dec!(0.10),
            rollback_daily_loss_pct: dec!(0.06),
            ..Default::default()
        };
        let engine = engine(limits);
        engine.on_trade_closed(dec!(-61)).await;

        let state = engine.snapshot().await;
        assert!(state.rollback_pending);
        assert_eq!(state.status, EngineStatus::Halted);
    }

    #[tokio::test]
    async fn drawdown_mark_halts_past_cap() {
        let limits = RiskLimits {
            max_drawdown_pct: dec!(0.20),
            ..Default::default()
        };
        let engine = engine(limits);
        engine.mark(dec!(1200)).await; // peak
        engine.mark(dec!(1000)).await; // ~16.7% down, fine
        assert_eq!(engine.snapshot().await.status, EngineStatus::Running);
        engine.mark(dec!(950)).await; // 20.8% down
        assert_eq!(engine.snapshot().await.status, EngineStatus::Halted);
    }

    #[tokio::test]
    async fn operator_resume_clears_halt() {
        let engine = engine(RiskLimits::default());
        engine.kill("drill").await;
        assert_eq!(engine.snapshot().await.status, EngineStatus::Halted);
        engine.resume().await;
        let state = engine.snapshot().await;
        assert_eq!(state.status, EngineStatus::Running);
        assert!(state.halt_reason.is_none());
    }

    #[tokio::test]
    async fn consecutive_loss_knob_pauses_when_enabled() {
        let limits = RiskLimits {
            consecutive_losses_disable: Some(2),
            max_daily_loss_pct: dec!(0.90),
            rollback_daily_loss_pct: dec!(0.95),
            ..Default::default()
        };
        let engine = engine(limits);
        engine.on_trade_closed(dec!(-1)).await;
        assert_eq!(engine.snapshot().await.status, EngineStatus::Running);
        engine.on_trade_closed(dec!(-1)).await;
        assert_eq!(engine.snapshot().await.status, EngineStatus::Paused);
    }
}
