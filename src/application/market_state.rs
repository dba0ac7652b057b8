use crate::domain::types::{Candle, Quote, Timeframe};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Strategy-facing view of one symbol at scan time. Candle tiers are lazily
/// populated: a tier that has not been fetched yet is an empty sequence,
/// never an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolData {
    pub price: Decimal,
    pub spread: Decimal,
    pub volume_24h: Decimal,
    pub candles_5m: Vec<Candle>,
    pub candles_1h: Vec<Candle>,
    pub candles_1d: Vec<Candle>,
}

impl SymbolData {
    pub fn candles(&self, timeframe: Timeframe) -> &[Candle] {
        match timeframe {
            Timeframe::M5 => &self.candles_5m,
            Timeframe::H1 => &self.candles_1h,
            Timeframe::D1 => &self.candles_1d,
        }
    }
}

#[derive(Debug, Default)]
struct SymbolSlot {
    quote: Option<Quote>,
    candles: HashMap<Timeframe, VecDeque<Candle>>,
}

/// Shared in-memory market snapshot. Single writer: the ingestion task (and
/// the candle refresh inside the scan job). Everyone else takes cloned
/// snapshots and never blocks the writer for long.
pub struct MarketState {
    slots: RwLock<HashMap<String, SymbolSlot>>,
}

impl MarketState {
    pub fn new(symbols: &[String]) -> Self {
        let mut slots = HashMap::new();
        for symbol in symbols {
            slots.insert(symbol.clone(), SymbolSlot::default());
        }
        Self {
            slots: RwLock::new(slots),
        }
    }

    /// Record the latest quote. Unknown symbols are dropped at this
    /// boundary; the allow-list was fixed at startup.
    pub async fn apply_quote(&self, quote: &Quote) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(&quote.symbol) {
            slot.quote = Some(quote.clone());
        }
    }

    /// Append candles for a timeframe, deduplicating on bucket start and
    /// keeping the ring bounded to the timeframe's retention.
    pub async fn extend_candles(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots.get_mut(symbol) else {
            return;
        };
        let ring = slot.candles.entry(timeframe).or_default();
        for candle in candles {
            if !candle.is_coherent() {
                continue;
            }
            match ring.back() {
                Some(last) if candle.ts < last.ts => continue,
                Some(last) if candle.ts == last.ts => {
                    // same bucket: replace with the fresher version
                    ring.pop_back();
                    ring.push_back(candle);
                }
                _ => ring.push_back(candle),
            }
        }
        let cap = timeframe.retention();
        while ring.len() > cap {
            ring.pop_front();
        }
    }

    pub async fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.slots
            .read()
            .await
            .get(symbol)
            .and_then(|slot| slot.quote.as_ref())
            .map(|quote| quote.price)
    }

    /// All last-known prices, for mark-to-market valuation.
    pub async fn price_map(&self) -> HashMap<String, Decimal> {
        self.slots
            .read()
            .await
            .iter()
            .filter_map(|(symbol, slot)| {
                slot.quote.as_ref().map(|quote| (symbol.clone(), quote.price))
            })
            .collect()
    }

    /// Snapshot one symbol for the strategy. None until a first quote
    /// arrived (the scan skips such symbols).
    pub async fn snapshot(&self, symbol: &str) -> Option<SymbolData> {
        let slots = self.slots.read().await;
        let slot = slots.get(symbol)?;
        let quote = slot.quote.as_ref()?;
        let tier = |tf: Timeframe| -> Vec<Candle> {
            slot.candles
                .get(&tf)
                .map(|ring| ring.iter().cloned().collect())
                .unwrap_or_default()
        };
        Some(SymbolData {
            price: quote.price,
            spread: quote.spread,
            volume_24h: quote.volume_24h,
            candles_5m: tier(Timeframe::M5),
            candles_1h: tier(Timeframe::H1),
            candles_1d: tier(Timeframe::D1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(symbol: &str, price: Decimal) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            price,
            spread: dec!(0.5),
            volume_24h: dec!(100),
            ts: 0,
        }
    }

    fn candle(ts: i64, close: Decimal) -> Candle {
        Candle {
            ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            timeframe: Timeframe::M5,
        }
    }

    #[tokio::test]
    async fn unknown_symbol_dropped_at_boundary() {
        let state = MarketState::new(&["BTCUSD".to_string()]);
        state.apply_quote(&quote("DOGEUSD", dec!(0.1))).await;
        assert!(state.last_price("DOGEUSD").await.is_none());

        state.apply_quote(&quote("BTCUSD", dec!(50000))).await;
        assert_eq!(state.last_price("BTCUSD").await, Some(dec!(50000)));
    }

    #[tokio::test]
    async fn snapshot_requires_a_quote_but_not_candles() {
        let state = MarketState::new(&["BTCUSD".to_string()]);
        assert!(state.snapshot("BTCUSD").await.is_none());

        state.apply_quote(&quote("BTCUSD", dec!(50000))).await;
        let data = state.snapshot("BTCUSD").await.unwrap();
        assert_eq!(data.price, dec!(50000));
        // missing tiers are empty, not errors
        assert!(data.candles_5m.is_empty());
        assert!(data.candles_1d.is_empty());
    }

    #[tokio::test]
    async fn candles_dedupe_and_replace_same_bucket() {
        let state = MarketState::new(&["BTCUSD".to_string()]);
        state
            .extend_candles(
                "BTCUSD",
                Timeframe::M5,
                vec![candle(0, dec!(1)), candle(300, dec!(2))],
            )
            .await;
        // same bucket 300 refreshed, older bucket ignored
        state
            .extend_candles(
                "BTCUSD",
                Timeframe::M5,
                vec![candle(100, dec!(9)), candle(300, dec!(3)), candle(600, dec!(4))],
            )
            .await;

        state.apply_quote(&quote("BTCUSD", dec!(50000))).await;
        let data = state.snapshot("BTCUSD").await.unwrap();
        let closes: Vec<Decimal> = data.candles_5m.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![dec!(1), dec!(3), dec!(4)]);
    }
}
