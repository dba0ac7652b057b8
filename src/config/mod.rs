//! Configuration loading for the engine.
//!
//! Two documents drive the engine: the general document (`engine.toml`) and
//! the risk limits document (`risk.toml`). Both are strict: unknown fields
//! are startup errors, not warnings. Environment variables override file
//! values; exchange credentials come from the environment only.

mod risk_limits;

pub use risk_limits::RiskLimits;

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Execution mode: which exchange adapter variant backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Paper,
    Live,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(Mode::Paper),
            "live" => Ok(Mode::Live),
            _ => bail!("invalid mode: {}. Must be 'paper' or 'live'", s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EngineDocument {
    mode: String,
    #[serde(default = "default_paper_balance")]
    paper_balance_usd: Decimal,
    symbols: Vec<String>,
    #[serde(default = "default_timezone")]
    timezone: String,
    scan_interval_minutes_override: Option<u32>,
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default)]
    exchange: ExchangeDocument,
    #[serde(default)]
    strategy: StrategyDocument,
}

fn default_paper_balance() -> Decimal {
    Decimal::from(10_000)
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExchangeDocument {
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default = "default_ws_url")]
    ws_url: String,
    /// REST polling cadence while the streaming feed is degraded.
    #[serde(default = "default_poll_secs")]
    degraded_poll_secs: u64,
}

fn default_base_url() -> String {
    "https://api.exchange.example".to_string()
}

fn default_ws_url() -> String {
    "wss://stream.exchange.example".to_string()
}

fn default_poll_secs() -> u64 {
    5
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrategyDocument {
    /// "builtin" or "process".
    #[serde(default = "default_strategy_kind")]
    kind: String,
    /// Executable path for the process kind; also the target of orchestrator
    /// rewrites.
    path: Option<PathBuf>,
    /// Source file checked by the purity scan before a swap is accepted.
    source_path: Option<PathBuf>,
}

fn default_strategy_kind() -> String {
    "builtin".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Builtin,
    Process,
}

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub path: Option<PathBuf>,
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub ws_url: String,
    pub degraded_poll_secs: u64,
}

/// Fully validated engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub paper_balance_usd: Decimal,
    pub symbols: Vec<String>,
    pub timezone: Tz,
    pub scan_interval_minutes_override: Option<u32>,
    pub data_dir: PathBuf,
    pub exchange: ExchangeConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskLimits,
}

impl Config {
    /// Load and validate both documents from a config directory. Any
    /// inconsistency is fatal here, before the engine touches I/O.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let engine_path = config_dir.join("engine.toml");
        let risk_path = config_dir.join("risk.toml");

        let engine_raw = std::fs::read_to_string(&engine_path)
            .with_context(|| format!("cannot read {}", engine_path.display()))?;
        let doc: EngineDocument = toml::from_str(&engine_raw)
            .with_context(|| format!("invalid config in {}", engine_path.display()))?;

        let risk_raw = std::fs::read_to_string(&risk_path)
            .with_context(|| format!("cannot read {}", risk_path.display()))?;
        let risk: RiskLimits = toml::from_str(&risk_raw)
            .with_context(|| format!("invalid config in {}", risk_path.display()))?;

        Self::from_documents(doc, risk)
    }

    fn from_documents(doc: EngineDocument, risk: RiskLimits) -> Result<Self> {
        let mode_str = env::var("TIDEBOT_MODE").unwrap_or(doc.mode);
        let mode = Mode::from_str(&mode_str)?;

        if doc.symbols.is_empty() {
            bail!("symbol allow-list is empty");
        }
        for symbol in &doc.symbols {
            if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
                bail!("invalid symbol in allow-list: '{}'", symbol);
            }
        }

        let timezone: Tz = doc
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid timezone '{}': {}", doc.timezone, e))?;

        if doc.paper_balance_usd <= Decimal::ZERO {
            bail!("paper_balance_usd must be positive");
        }

        if let Some(minutes) = doc.scan_interval_minutes_override
            && minutes == 0
        {
            bail!("scan_interval_minutes_override must be at least 1");
        }

        // The risk limits document is the single source for
        // max_daily_loss_pct. An env override that disagrees is drift
        // between documents, and drift is an error.
        if let Ok(env_value) = env::var("MAX_DAILY_LOSS_PCT") {
            let env_pct: Decimal = env_value
                .parse()
                .context("MAX_DAILY_LOSS_PCT is not a number")?;
            if env_pct != risk.max_daily_loss_pct {
                bail!(
                    "MAX_DAILY_LOSS_PCT mismatch: env says {}, risk.toml says {}",
                    env_pct,
                    risk.max_daily_loss_pct
                );
            }
        }

        risk.validate()?;

        let strategy_kind = match doc.strategy.kind.as_str() {
            "builtin" => StrategyKind::Builtin,
            "process" => StrategyKind::Process,
            other => bail!("invalid strategy kind: '{}'", other),
        };
        if strategy_kind == StrategyKind::Process && doc.strategy.path.is_none() {
            bail!("strategy kind 'process' requires strategy.path");
        }

        let api_key = env::var("EXCHANGE_API_KEY").unwrap_or_default();
        let api_secret = env::var("EXCHANGE_API_SECRET").unwrap_or_default();
        if mode == Mode::Live && (api_key.is_empty() || api_secret.is_empty()) {
            bail!("live mode requires EXCHANGE_API_KEY and EXCHANGE_API_SECRET");
        }

        Ok(Self {
            mode,
            paper_balance_usd: doc.paper_balance_usd,
            symbols: doc.symbols,
            timezone,
            scan_interval_minutes_override: doc.scan_interval_minutes_override,
            data_dir: doc.data_dir,
            exchange: ExchangeConfig {
                api_key,
                api_secret,
                base_url: doc.exchange.base_url,
                ws_url: doc.exchange.ws_url,
                degraded_poll_secs: doc.exchange.degraded_poll_secs,
            },
            strategy: StrategyConfig {
                kind: strategy_kind,
                path: doc.strategy.path,
                source_path: doc.strategy.source_path,
            },
            risk,
        })
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.data_dir.join("tidebot.db").display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine_doc(toml_str: &str) -> EngineDocument {
        toml::from_str(toml_str).unwrap()
    }

    fn base_engine() -> EngineDocument {
        engine_doc(
            r#"
            mode = "paper"
            symbols = ["BTCUSD", "ETHUSD"]
            timezone = "Europe/Berlin"
            "#,
        )
    }

    #[test]
    fn paper_config_parses() {
        let config = Config::from_documents(base_engine(), RiskLimits::default()).unwrap();
        assert_eq!(config.mode, Mode::Paper);
        assert_eq!(config.paper_balance_usd, dec!(10000));
        assert_eq!(config.symbols.len(), 2);
        assert_eq!(config.timezone, chrono_tz::Europe::Berlin);
    }

    #[test]
    fn unknown_fields_are_errors() {
        let parsed: Result<EngineDocument, _> = toml::from_str(
            r#"
            mode = "paper"
            symbols = ["BTCUSD"]
            max_daily_los_pct = 0.1
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn empty_symbol_list_rejected() {
        let doc = engine_doc(
            r#"
            mode = "paper"
            symbols = []
            "#,
        );
        assert!(Config::from_documents(doc, RiskLimits::default()).is_err());
    }

    #[test]
    fn malformed_symbol_rejected() {
        let doc = engine_doc(
            r#"
            mode = "paper"
            symbols = ["BTC/USD"]
            "#,
        );
        assert!(Config::from_documents(doc, RiskLimits::default()).is_err());
    }

    #[test]
    fn process_strategy_requires_path() {
        let doc = engine_doc(
            r#"
            mode = "paper"
            symbols = ["BTCUSD"]

            [strategy]
            kind = "process"
            "#,
        );
        assert!(Config::from_documents(doc, RiskLimits::default()).is_err());
    }

    #[test]
    fn invalid_timezone_rejected() {
        let doc = engine_doc(
            r#"
            mode = "paper"
            symbols = ["BTCUSD"]
            timezone = "Mars/Olympus"
            "#,
        );
        assert!(Config::from_documents(doc, RiskLimits::default()).is_err());
    }
}
