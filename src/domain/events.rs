use crate::domain::portfolio::CloseReason;
use crate::domain::types::OrderSide;
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Engine event taxonomy. Observers are best-effort: every event is
/// published only after the corresponding state change has been journaled.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TradeExecuted {
        symbol: String,
        tag: String,
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
        fee: Decimal,
    },
    StopTriggered {
        symbol: String,
        tag: String,
        reason: CloseReason,
        trigger_price: Decimal,
    },
    SignalRejected {
        symbol: String,
        action: String,
        reason: String,
    },
    RiskHalt {
        reason: String,
    },
    RiskResumed,
    StrategyRollback {
        daily_pnl_pct: Decimal,
    },
    ScanComplete {
        symbols_scanned: usize,
        signals: usize,
    },
    SystemOnline,
    SystemShutdown,
    SystemError {
        context: String,
    },
    WebsocketFeedLost {
        consecutive_failures: u32,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::TradeExecuted { .. } => "trade_executed",
            EngineEvent::StopTriggered { .. } => "stop_triggered",
            EngineEvent::SignalRejected { .. } => "signal_rejected",
            EngineEvent::RiskHalt { .. } => "risk_halt",
            EngineEvent::RiskResumed => "risk_resumed",
            EngineEvent::StrategyRollback { .. } => "strategy_rollback",
            EngineEvent::ScanComplete { .. } => "scan_complete",
            EngineEvent::SystemOnline => "system_online",
            EngineEvent::SystemShutdown => "system_shutdown",
            EngineEvent::SystemError { .. } => "system_error",
            EngineEvent::WebsocketFeedLost { .. } => "websocket_feed_lost",
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Default observer: structured log lines.
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::RiskHalt { reason } => {
                warn!(event = event.name(), %reason, "risk halt");
            }
            EngineEvent::SystemError { context } => {
                warn!(event = event.name(), %context, "system error");
            }
            EngineEvent::WebsocketFeedLost {
                consecutive_failures,
            } => {
                warn!(
                    event = event.name(),
                    consecutive_failures, "streaming feed lost"
                );
            }
            other => {
                info!(event = other.name(), detail = ?other);
            }
        }
    }
}
