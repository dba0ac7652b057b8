//! Subprocess strategy host. The strategy is an external executable that
//! the nightly orchestrator may rewrite without the engine being rebuilt.
//! The wire is line-delimited JSON over stdin/stdout: one request line in,
//! one response line out. Purity is enforced statically before a swap
//! (`purity::scan_file`) and dynamically by only ever shipping the IO
//! contract values.

use crate::application::executor::FillNotice;
use crate::application::market_state::SymbolData;
use crate::application::strategy::{PortfolioView, Strategy};
use crate::config::RiskLimits;
use crate::domain::errors::StrategyError;
use crate::domain::signal::Signal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    signals: Vec<Signal>,
    #[serde(default)]
    state: Option<serde_json::Value>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    regime: Option<String>,
    #[serde(default)]
    scan_interval_minutes: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    op: &'static str,
    markets: &'a HashMap<String, SymbolData>,
    portfolio: &'a PortfolioView,
    now: i64,
}

pub struct ProcessStrategy {
    path: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    version: String,
    regime: String,
    scan_interval_minutes: u32,
}

impl ProcessStrategy {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            child: None,
            stdin: None,
            stdout: None,
            version: "unloaded".to_string(),
            regime: "warmup".to_string(),
            scan_interval_minutes: 5,
        }
    }

    fn spawn(&mut self) -> Result<(), StrategyError> {
        let mut child = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StrategyError::Load(format!("spawn {}: {}", self.path.display(), e))
            })?;
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take().map(BufReader::new);
        self.child = Some(child);
        info!("ProcessStrategy: spawned {}", self.path.display());
        Ok(())
    }

    /// One request/response exchange. Any wire failure poisons the child;
    /// the host decides whether to fall back.
    async fn call(&mut self, request: serde_json::Value) -> Result<Reply, StrategyError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| StrategyError::Load("strategy process not running".to_string()))?;
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| StrategyError::Load("strategy stdout closed".to_string()))?;

        let mut line = request.to_string();
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;

        let mut response = String::new();
        let read = stdout.read_line(&mut response).await?;
        if read == 0 {
            return Err(StrategyError::Load(
                "strategy process closed its stdout".to_string(),
            ));
        }
        let reply: Reply = serde_json::from_str(response.trim())
            .map_err(|e| StrategyError::ContractViolation(format!("bad reply: {}", e)))?;
        if let Some(error) = reply.error {
            return Err(StrategyError::ContractViolation(error));
        }
        Ok(reply)
    }
}

impl Drop for ProcessStrategy {
    fn drop(&mut self) {
        if let Some(child) = &mut self.child {
            if let Err(e) = child.start_kill() {
                warn!("ProcessStrategy: kill on drop failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl Strategy for ProcessStrategy {
    fn name(&self) -> &'static str {
        "process"
    }

    fn version(&self) -> String {
        self.version.clone()
    }

    fn regime(&self) -> String {
        self.regime.clone()
    }

    fn scan_interval_minutes(&self) -> u32 {
        self.scan_interval_minutes
    }

    async fn initialize(
        &mut self,
        limits: &RiskLimits,
        symbols: &[String],
    ) -> Result<(), StrategyError> {
        self.spawn()?;
        let reply = self
            .call(json!({
                "op": "initialize",
                "limits": {
                    "max_trade_pct": limits.max_trade_pct,
                    "default_trade_pct": limits.default_trade_pct,
                    "max_positions": limits.max_positions,
                    "default_stop_loss_pct": limits.default_stop_loss_pct,
                    "default_take_profit_pct": limits.default_take_profit_pct,
                },
                "symbols": symbols,
            }))
            .await?;
        if !reply.ok {
            return Err(StrategyError::Load(
                "strategy rejected initialize".to_string(),
            ));
        }
        if let Some(version) = reply.version {
            self.version = version;
        }
        if let Some(minutes) = reply.scan_interval_minutes {
            self.scan_interval_minutes = minutes.max(1);
        }
        Ok(())
    }

    async fn analyze(
        &mut self,
        markets: &HashMap<String, SymbolData>,
        portfolio: &PortfolioView,
        now: DateTime<Utc>,
    ) -> Result<Vec<Signal>, StrategyError> {
        let request = serde_json::to_value(AnalyzeRequest {
            op: "analyze",
            markets,
            portfolio,
            now: now.timestamp(),
        })
        .map_err(|e| StrategyError::BadState(e.to_string()))?;
        let reply = self.call(request).await?;
        if let Some(regime) = reply.regime {
            self.regime = regime;
        }
        Ok(reply.signals)
    }

    async fn on_fill(&mut self, notice: &FillNotice) {
        let request = json!({
            "op": "on_fill",
            "symbol": notice.symbol,
            "action": notice.action.as_str(),
            "qty": notice.qty,
            "price": notice.price,
            "intent": notice.intent.as_str(),
            "tag": notice.tag,
        });
        if let Err(e) = self.call(request).await {
            warn!("ProcessStrategy: on_fill delivery failed: {}", e);
        }
    }

    async fn on_position_closed(
        &mut self,
        symbol: &str,
        tag: &str,
        pnl: Decimal,
        pnl_pct: Decimal,
    ) {
        let request = json!({
            "op": "on_position_closed",
            "symbol": symbol,
            "tag": tag,
            "pnl": pnl,
            "pnl_pct": pnl_pct,
        });
        if let Err(e) = self.call(request).await {
            warn!("ProcessStrategy: on_position_closed delivery failed: {}", e);
        }
    }

    async fn get_state(&mut self) -> Result<serde_json::Value, StrategyError> {
        let reply = self.call(json!({"op": "get_state"})).await?;
        Ok(reply.state.unwrap_or(serde_json::Value::Null))
    }

    async fn load_state(&mut self, blob: &serde_json::Value) -> Result<(), StrategyError> {
        let reply = self
            .call(json!({"op": "load_state", "state": blob}))
            .await?;
        if !reply.ok {
            return Err(StrategyError::BadState(
                "strategy rejected state blob".to_string(),
            ));
        }
        Ok(())
    }
}
