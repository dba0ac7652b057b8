//! Exchange adapter capability. Two variants implement the same contract:
//! `LiveAdapter` speaks HTTPS + streaming ticker to the real exchange,
//! `PaperAdapter` simulates fills in memory off the live quote feed. The
//! engine cannot tell them apart.

mod http;
mod live;
mod paper;
mod stream;

pub use http::HttpClientFactory;
pub use live::LiveAdapter;
pub use paper::PaperAdapter;
pub use stream::TickerStream;

use crate::domain::errors::ExchangeError;
use crate::domain::fees::FeeSchedule;
use crate::domain::types::{
    Balances, Candle, ConditionalKind, ConditionalOrder, ConditionalStatus, OpenOrderInfo,
    OrderAck, OrderRequest, OrderStatusReport, OrderUpdate, Quote, SymbolMetadata, Timeframe,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Quote, ExchangeError>;

    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Submit an order. Market orders return `Filled` once terminal; resting
    /// limit orders return `Accepted` and complete through `order_updates`.
    /// Placement is never retried internally — an ambiguous outcome surfaces
    /// as `ExchangeError::OrderAmbiguous` for the caller to reconcile.
    async fn place(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    async fn cancel(&self, order_id: &str, symbol: &str) -> Result<(), ExchangeError>;

    async fn list_open_orders(&self) -> Result<Vec<OpenOrderInfo>, ExchangeError>;

    async fn balances(&self) -> Result<Balances, ExchangeError>;

    async fn symbol_metadata(&self) -> Result<Vec<SymbolMetadata>, ExchangeError>;

    async fn fee_schedule(&self) -> Result<FeeSchedule, ExchangeError>;

    /// Terminal-state lookup for reconciliation paths.
    async fn order_status(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<OrderStatusReport, ExchangeError>;

    /// Mirror a position's stop or target as an exchange-native conditional
    /// order. Returns None where stops are enforced client-side (paper).
    async fn place_conditional(
        &self,
        symbol: &str,
        tag: &str,
        kind: ConditionalKind,
        trigger_price: Decimal,
        qty: Decimal,
    ) -> Result<Option<ConditionalOrder>, ExchangeError>;

    async fn conditional_status(
        &self,
        id: &str,
        symbol: &str,
    ) -> Result<ConditionalStatus, ExchangeError>;

    async fn cancel_conditional(&self, id: &str, symbol: &str) -> Result<(), ExchangeError>;

    /// Asynchronous order transitions (limit fills, expiries, stop fills).
    fn order_updates(&self) -> broadcast::Receiver<OrderUpdate>;
}
