use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the exchange adapters.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Transient failure that survived the retry budget.
    #[error("exchange unavailable: {reason}")]
    Unavailable { reason: String },

    /// A place call neither clearly succeeded nor failed within the retry
    /// budget. The symbol stays in reconcile_pending until resolved against
    /// the exchange of record.
    #[error("order {order_id} ambiguous after {attempts} attempts: {reason}")]
    OrderAmbiguous {
        order_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("order rejected by exchange: {reason}")]
    Rejected { reason: String },

    #[error("symbol {symbol} not tradable: {reason}")]
    SymbolNotTradable { symbol: String, reason: String },

    #[error("insufficient funds: need {need}, available {available}")]
    InsufficientFunds { need: Decimal, available: Decimal },
}

/// Errors in the strategy contract and lifecycle.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("strategy load failed: {0}")]
    Load(String),

    /// Forbidden symbol found by the static purity scan.
    #[error("purity violation in {path}: {symbol}")]
    PurityViolation { path: String, symbol: String },

    #[error("strategy contract violation: {0}")]
    ContractViolation(String),

    #[error("analyze() exceeded {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("state blob rejected: {0}")]
    BadState(String),

    #[error("strategy io: {0}")]
    Io(#[from] std::io::Error),
}

/// A journal write failed. Fatal by policy: the engine refuses to diverge
/// from persistence, halts, and exits after in-flight monitors finish.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal write failed: {0}")]
    Write(#[from] sqlx::Error),

    #[error("journal corrupt: {0}")]
    Corrupt(String),
}
