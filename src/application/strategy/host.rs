//! Strategy host: loads a strategy implementation, enforces the contract
//! around it, and owns its persisted state. Load failures fall back to the
//! previously persisted strategy state and ultimately to the compiled-in
//! momentum default; if nothing loads, the host runs paused — scans keep
//! journaling snapshots but no signals come out.

use crate::application::executor::FillNotice;
use crate::application::market_state::SymbolData;
use crate::application::strategy::momentum::MomentumStrategy;
use crate::application::strategy::process::ProcessStrategy;
use crate::application::strategy::{PortfolioView, Strategy, StrategyIdentity, purity};
use crate::config::{RiskLimits, StrategyConfig, StrategyKind};
use crate::domain::errors::StrategyError;
use crate::domain::repositories::StrategyStateStore;
use crate::domain::signal::{Signal, validate_batch};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Wall-clock budget for one analyze() call.
const ANALYZE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct StrategyHost {
    strategy: Mutex<Box<dyn Strategy>>,
    identity: Arc<RwLock<StrategyIdentity>>,
    state_store: Arc<dyn StrategyStateStore>,
    /// No strategy could be loaded: scans continue, signals do not.
    paused: AtomicBool,
    /// The strategy misbehaved (timeout or contract violation). It stays
    /// loaded but is marked for review.
    flagged: AtomicBool,
    scan_interval_minutes: u32,
}

impl StrategyHost {
    /// Build the host: configured strategy first, compiled-in fallback
    /// second, paused if both fail.
    pub async fn load(
        config: &StrategyConfig,
        limits: &RiskLimits,
        symbols: &[String],
        state_store: Arc<dyn StrategyStateStore>,
    ) -> Self {
        let mut paused = false;

        let strategy: Box<dyn Strategy> = match Self::load_configured(config, limits, symbols)
            .await
        {
            Ok(strategy) => strategy,
            Err(e) => {
                warn!("StrategyHost: configured strategy failed to load: {}", e);
                let mut fallback = Box::new(MomentumStrategy::new());
                match fallback.initialize(limits, symbols).await {
                    Ok(()) => {
                        info!("StrategyHost: running fallback '{}'", fallback.name());
                        fallback
                    }
                    Err(fallback_err) => {
                        error!(
                            "StrategyHost: fallback failed too ({}), entering paused state",
                            fallback_err
                        );
                        paused = true;
                        fallback
                    }
                }
            }
        };

        let mut host = Self {
            scan_interval_minutes: strategy.scan_interval_minutes(),
            identity: Arc::new(RwLock::new(StrategyIdentity {
                version: strategy.version(),
                regime: strategy.regime(),
            })),
            strategy: Mutex::new(strategy),
            state_store,
            paused: AtomicBool::new(paused),
            flagged: AtomicBool::new(false),
        };
        host.restore_state().await;
        host
    }

    async fn load_configured(
        config: &StrategyConfig,
        limits: &RiskLimits,
        symbols: &[String],
    ) -> Result<Box<dyn Strategy>, StrategyError> {
        match config.kind {
            StrategyKind::Builtin => {
                let mut strategy = Box::new(MomentumStrategy::new());
                strategy.initialize(limits, symbols).await?;
                Ok(strategy)
            }
            StrategyKind::Process => {
                // Reject code containing forbidden symbols before the swap
                // is accepted; a violation keeps the previous strategy.
                if let Some(source) = &config.source_path {
                    purity::scan_file(source)?;
                }
                let path = config
                    .path
                    .clone()
                    .ok_or_else(|| StrategyError::Load("process strategy has no path".into()))?;
                let mut strategy = Box::new(ProcessStrategy::new(path));
                strategy.initialize(limits, symbols).await?;
                Ok(strategy)
            }
        }
    }

    async fn restore_state(&mut self) {
        let mut strategy = self.strategy.lock().await;
        let version = strategy.version();
        let stored = match self.state_store.load(Some(&version)).await {
            Ok(Some(found)) => Some(found),
            Ok(None) => match self.state_store.load(None).await {
                Ok(found) => found,
                Err(e) => {
                    error!("StrategyHost: state load failed: {}", e);
                    None
                }
            },
            Err(e) => {
                error!("StrategyHost: state load failed: {}", e);
                None
            }
        };
        if let Some((stored_version, blob)) = stored {
            match strategy.load_state(&blob).await {
                Ok(()) => info!(
                    "StrategyHost: restored state from version '{}'",
                    stored_version
                ),
                Err(e) => warn!(
                    "StrategyHost: state blob from '{}' rejected ({}), starting fresh",
                    stored_version, e
                ),
            }
        }
    }

    pub fn identity(&self) -> Arc<RwLock<StrategyIdentity>> {
        Arc::clone(&self.identity)
    }

    pub fn scan_interval_minutes(&self) -> u32 {
        self.scan_interval_minutes
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged.load(Ordering::Acquire)
    }

    /// One scan: analyze under the timeout, validate the batch as a whole,
    /// persist strategy state, refresh the identity.
    #[tracing::instrument(skip_all, fields(symbols = markets.len()))]
    pub async fn run_scan(
        &self,
        markets: &HashMap<String, SymbolData>,
        portfolio: &PortfolioView,
        now: DateTime<Utc>,
    ) -> Result<Vec<Signal>, StrategyError> {
        if self.is_paused() {
            return Ok(Vec::new());
        }

        let mut strategy = self.strategy.lock().await;
        let signals =
            match tokio::time::timeout(ANALYZE_TIMEOUT, strategy.analyze(markets, portfolio, now))
                .await
            {
                Ok(Ok(signals)) => signals,
                Ok(Err(e)) => {
                    self.flagged.store(true, Ordering::Release);
                    return Err(e);
                }
                Err(_) => {
                    // Batch dropped; the strategy stays loaded but flagged.
                    self.flagged.store(true, Ordering::Release);
                    return Err(StrategyError::Timeout {
                        timeout_secs: ANALYZE_TIMEOUT.as_secs(),
                    });
                }
            };

        if let Err(violation) = validate_batch(&signals) {
            self.flagged.store(true, Ordering::Release);
            return Err(violation);
        }

        self.persist_state(&mut strategy).await;
        {
            let mut identity = self.identity.write().await;
            identity.version = strategy.version();
            identity.regime = strategy.regime();
        }
        Ok(signals)
    }

    async fn persist_state(&self, strategy: &mut Box<dyn Strategy>) {
        match strategy.get_state().await {
            Ok(blob) => {
                if let Err(e) = self.state_store.save(&strategy.version(), &blob).await {
                    error!("StrategyHost: state persist failed: {}", e);
                }
            }
            Err(e) => warn!("StrategyHost: get_state failed: {}", e),
        }
    }

    /// Deliver a fill (and close, when applicable) to the strategy.
    pub async fn notify_fill(&self, notice: &FillNotice) {
        let mut strategy = self.strategy.lock().await;
        strategy.on_fill(notice).await;
        if let Some((pnl, pnl_pct)) = notice.closed {
            strategy
                .on_position_closed(&notice.symbol, &notice.tag, pnl, pnl_pct)
                .await;
        }
    }

    /// Shutdown hook: journal the final strategy state.
    pub async fn save_state(&self) {
        let mut strategy = self.strategy.lock().await;
        self.persist_state(&mut strategy).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::JournalError;
    use crate::domain::signal::{Intent, SignalAction};
    use crate::domain::types::OrderType;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct MemoryStateStore {
        saved: std::sync::Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl StrategyStateStore for MemoryStateStore {
        async fn save(
            &self,
            strategy_version: &str,
            blob: &serde_json::Value,
        ) -> Result<(), JournalError> {
            self.saved
                .lock()
                .unwrap()
                .push((strategy_version.to_string(), blob.clone()));
            Ok(())
        }
        async fn load(
            &self,
            _strategy_version: Option<&str>,
        ) -> Result<Option<(String, serde_json::Value)>, JournalError> {
            Ok(self.saved.lock().unwrap().last().cloned())
        }
    }

    fn store() -> Arc<MemoryStateStore> {
        Arc::new(MemoryStateStore {
            saved: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn builtin_config() -> StrategyConfig {
        StrategyConfig {
            kind: StrategyKind::Builtin,
            path: None,
            source_path: None,
        }
    }

    #[tokio::test]
    async fn builtin_loads_and_scans() {
        let host = StrategyHost::load(
            &builtin_config(),
            &RiskLimits::default(),
            &["BTCUSD".to_string()],
            store(),
        )
        .await;
        assert!(!host.is_paused());

        let signals = host
            .run_scan(&HashMap::new(), &PortfolioView::default(), Utc::now())
            .await
            .unwrap();
        assert!(signals.is_empty());
        assert!(host.identity().read().await.version.starts_with("momentum"));
    }

    #[tokio::test]
    async fn missing_process_binary_falls_back_to_builtin() {
        let config = StrategyConfig {
            kind: StrategyKind::Process,
            path: Some("/nonexistent/strategy-binary".into()),
            source_path: None,
        };
        let host = StrategyHost::load(
            &config,
            &RiskLimits::default(),
            &["BTCUSD".to_string()],
            store(),
        )
        .await;
        assert!(!host.is_paused());
        assert!(host.identity().read().await.version.starts_with("momentum"));
    }

    #[tokio::test]
    async fn impure_source_blocks_swap_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("strategy.rs");
        // the alias hides the forbidden module from any textual match
        std::fs::write(
            &source,
            "use std::net as n;\nfn main() { let _ = n::TcpStream::connect(\"x\"); }\n",
        )
        .unwrap();

        let config = StrategyConfig {
            kind: StrategyKind::Process,
            path: Some(source.clone()),
            source_path: Some(source),
        };
        let host = StrategyHost::load(
            &config,
            &RiskLimits::default(),
            &["BTCUSD".to_string()],
            store(),
        )
        .await;
        // purity violation aborts the swap; the fallback carries on
        assert!(host.identity().read().await.version.starts_with("momentum"));
    }

    #[tokio::test]
    async fn unvettable_source_blocks_swap_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("strategy.py");
        std::fs::write(&source, "import requests\nrequests.get('http://x')\n").unwrap();

        let config = StrategyConfig {
            kind: StrategyKind::Process,
            path: Some(source.clone()),
            source_path: Some(source),
        };
        let host = StrategyHost::load(
            &config,
            &RiskLimits::default(),
            &["BTCUSD".to_string()],
            store(),
        )
        .await;
        // source that cannot be parsed cannot be vetted: same outcome
        assert!(host.identity().read().await.version.starts_with("momentum"));
    }

    struct OpposingStrategy;

    #[async_trait]
    impl Strategy for OpposingStrategy {
        fn name(&self) -> &'static str {
            "opposing"
        }
        fn version(&self) -> String {
            "opposing-1".to_string()
        }
        fn regime(&self) -> String {
            "test".to_string()
        }
        async fn initialize(
            &mut self,
            _limits: &RiskLimits,
            _symbols: &[String],
        ) -> Result<(), StrategyError> {
            Ok(())
        }
        async fn analyze(
            &mut self,
            _markets: &HashMap<String, SymbolData>,
            _portfolio: &PortfolioView,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Signal>, StrategyError> {
            let template = Signal {
                symbol: "BTCUSD".to_string(),
                action: SignalAction::Buy,
                size_pct: dec!(0.05),
                order_type: OrderType::Market,
                limit_price: None,
                stop_loss: None,
                take_profit: None,
                intent: Intent::Day,
                tag: "core".to_string(),
                confidence: dec!(0.5),
                reasoning: "test".to_string(),
            };
            let mut opposite = template.clone();
            opposite.action = SignalAction::Close;
            Ok(vec![template, opposite])
        }
        async fn on_fill(&mut self, _notice: &FillNotice) {}
        async fn on_position_closed(
            &mut self,
            _symbol: &str,
            _tag: &str,
            _pnl: Decimal,
            _pnl_pct: Decimal,
        ) {
        }
        async fn get_state(&mut self) -> Result<serde_json::Value, StrategyError> {
            Ok(serde_json::Value::Null)
        }
        async fn load_state(&mut self, _blob: &serde_json::Value) -> Result<(), StrategyError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn opposing_batch_flags_strategy() {
        let host = StrategyHost {
            scan_interval_minutes: 5,
            identity: Arc::new(RwLock::new(StrategyIdentity::default())),
            strategy: Mutex::new(Box::new(OpposingStrategy)),
            state_store: store(),
            paused: AtomicBool::new(false),
            flagged: AtomicBool::new(false),
        };

        let result = host
            .run_scan(&HashMap::new(), &PortfolioView::default(), Utc::now())
            .await;
        assert!(matches!(
            result,
            Err(StrategyError::ContractViolation(_))
        ));
        assert!(host.is_flagged());
    }
}
