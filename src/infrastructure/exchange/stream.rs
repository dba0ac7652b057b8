use crate::domain::types::{MarketEvent, Quote};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::ExchangeAdapter;

/// Consecutive connection failures before the feed degrades to REST polling.
const DEGRADE_AFTER: u32 = 3;
const MAX_BACKOFF_SECS: u64 = 60;

/// Streaming ticker ingestion. One instance per engine; the single writer
/// of market events. On connection loss it reconnects with jittered
/// exponential backoff, and after repeated failures degrades to REST
/// polling while still attempting to upgrade back to streaming.
pub struct TickerStream {
    ws_url: String,
    symbols: Vec<String>,
    event_tx: mpsc::Sender<MarketEvent>,
    rest: Arc<dyn ExchangeAdapter>,
    degraded_poll_secs: u64,
}

impl TickerStream {
    pub fn new(
        ws_url: String,
        symbols: Vec<String>,
        event_tx: mpsc::Sender<MarketEvent>,
        rest: Arc<dyn ExchangeAdapter>,
        degraded_poll_secs: u64,
    ) -> Self {
        Self {
            ws_url,
            symbols,
            event_tx,
            rest,
            degraded_poll_secs,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff_secs: u64 = 1;
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect_and_stream(&mut shutdown).await {
                Ok(()) => {
                    // graceful close (server or shutdown)
                    if *shutdown.borrow() {
                        break;
                    }
                    if failures >= DEGRADE_AFTER {
                        info!("TickerStream: streaming restored after degrade");
                        let _ = self.event_tx.send(MarketEvent::FeedRestored).await;
                    }
                    failures = 0;
                    backoff_secs = 1;
                }
                Err(e) => {
                    failures += 1;
                    error!(
                        "TickerStream: connection failed ({} consecutive): {}",
                        failures, e
                    );
                    if failures == DEGRADE_AFTER {
                        warn!(
                            "TickerStream: degrading to REST polling every {}s",
                            self.degraded_poll_secs
                        );
                        let _ = self
                            .event_tx
                            .send(MarketEvent::FeedDegraded {
                                consecutive_failures: failures,
                            })
                            .await;
                    }

                    if failures >= DEGRADE_AFTER {
                        // Keep prices flowing over REST until the next
                        // upgrade attempt.
                        self.poll_rest_once().await;
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(self.degraded_poll_secs)) => {}
                            _ = shutdown.changed() => {}
                        }
                    } else {
                        let jitter_ms = rand::rng().random_range(0..500);
                        let delay =
                            Duration::from_secs(backoff_secs) + Duration::from_millis(jitter_ms);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.changed() => {}
                        }
                        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    }
                }
            }
        }
        info!("TickerStream: stopped");
    }

    async fn poll_rest_once(&self) {
        for symbol in &self.symbols {
            match self.rest.quote(symbol).await {
                Ok(quote) => {
                    let _ = self.event_tx.send(MarketEvent::Quote(quote)).await;
                }
                Err(e) => debug!("TickerStream: REST poll {} failed: {}", symbol, e),
            }
        }
    }

    async fn connect_and_stream(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let streams: Vec<String> = self
            .symbols
            .iter()
            .map(|s| format!("{}@ticker", s.to_lowercase()))
            .collect();
        let url = Url::parse(&format!(
            "{}/stream?streams={}",
            self.ws_url.trim_end_matches('/'),
            streams.join("/")
        ))
        .context("Invalid ticker stream url")?;

        info!("TickerStream: connecting to {}", url);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .context("Failed to connect ticker stream")?;
        info!("TickerStream: connected");

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_message(&text).await {
                                debug!("TickerStream: unparsed message: {}", e);
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("TickerStream: closed by server: {:?}", frame);
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(anyhow::anyhow!("read error: {}", e));
                        }
                        None => {
                            return Err(anyhow::anyhow!("stream ended"));
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&self, text: &str) -> Result<()> {
        #[derive(Debug, Deserialize)]
        struct StreamMessage {
            #[allow(dead_code)]
            stream: String,
            data: TickerData,
        }
        #[derive(Debug, Deserialize)]
        struct TickerData {
            #[serde(rename = "s")]
            symbol: String,
            #[serde(rename = "c")]
            last_price: String,
            #[serde(rename = "b")]
            bid: String,
            #[serde(rename = "a")]
            ask: String,
            #[serde(rename = "q")]
            quote_volume: String,
            #[serde(rename = "E")]
            event_time_ms: i64,
        }

        let message: StreamMessage = serde_json::from_str(text)?;
        let data = message.data;

        let price = Decimal::from_str(&data.last_price).unwrap_or(Decimal::ZERO);
        if price <= Decimal::ZERO {
            return Ok(());
        }
        let bid = Decimal::from_str(&data.bid).unwrap_or(Decimal::ZERO);
        let ask = Decimal::from_str(&data.ask).unwrap_or(Decimal::ZERO);

        let quote = Quote {
            symbol: data.symbol,
            price,
            spread: (ask - bid).max(Decimal::ZERO),
            volume_24h: Decimal::from_str(&data.quote_volume).unwrap_or(Decimal::ZERO),
            ts: data.event_time_ms / 1000,
        };
        self.event_tx
            .send(MarketEvent::Quote(quote))
            .await
            .map_err(|_| anyhow::anyhow!("event channel closed"))?;
        Ok(())
    }
}
