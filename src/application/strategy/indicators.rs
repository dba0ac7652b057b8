//! Per-scan indicator computation. Feeds both the scan snapshot journal
//! and the built-in momentum strategy.

use crate::application::market_state::SymbolData;
use crate::domain::types::{Candle, Timeframe};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use ta::Next;
use ta::indicators::{ExponentialMovingAverage, RelativeStrengthIndex};

pub const EMA_FAST_PERIOD: usize = 12;
pub const EMA_SLOW_PERIOD: usize = 26;
pub const RSI_PERIOD: usize = 14;

/// Volume ratio lookback (candles).
const VOLUME_WINDOW: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct IndicatorSet {
    pub ema_fast: Option<Decimal>,
    pub ema_slow: Option<Decimal>,
    pub rsi: Option<Decimal>,
    pub volume_ratio: Option<Decimal>,
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .filter_map(|c| c.close.to_f64())
        .collect()
}

fn run_ema(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period {
        return None;
    }
    let mut ema = ExponentialMovingAverage::new(period).ok()?;
    let mut value = 0.0;
    for close in closes {
        value = ema.next(*close);
    }
    Some(value)
}

fn run_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() <= period {
        return None;
    }
    let mut rsi = RelativeStrengthIndex::new(period).ok()?;
    let mut value = 50.0;
    for close in closes {
        value = rsi.next(*close);
    }
    Some(value)
}

/// Compute indicators off the finest tier available. Too little history
/// yields Nones, never errors.
pub fn compute(data: &SymbolData) -> IndicatorSet {
    let candles = if !data.candles_5m.is_empty() {
        data.candles(Timeframe::M5)
    } else if !data.candles_1h.is_empty() {
        data.candles(Timeframe::H1)
    } else {
        data.candles(Timeframe::D1)
    };
    if candles.is_empty() {
        return IndicatorSet::default();
    }

    let closes = closes(candles);
    let ema_fast = run_ema(&closes, EMA_FAST_PERIOD).and_then(Decimal::from_f64);
    let ema_slow = run_ema(&closes, EMA_SLOW_PERIOD).and_then(Decimal::from_f64);
    let rsi = run_rsi(&closes, RSI_PERIOD).and_then(Decimal::from_f64);

    let volume_ratio = if candles.len() >= 2 {
        let window = candles.len().min(VOLUME_WINDOW);
        let recent = &candles[candles.len() - window..];
        let total: Decimal = recent.iter().map(|c| c.volume).sum();
        let mean = total / Decimal::from(window);
        let last = candles[candles.len() - 1].volume;
        (mean > Decimal::ZERO).then(|| last / mean)
    } else {
        None
    };

    IndicatorSet {
        ema_fast,
        ema_slow,
        rsi,
        volume_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn series(closes: &[i64]) -> SymbolData {
        SymbolData {
            price: Decimal::from(*closes.last().unwrap_or(&0)),
            candles_5m: closes
                .iter()
                .enumerate()
                .map(|(i, close)| Candle {
                    ts: i as i64 * 300,
                    open: Decimal::from(*close),
                    high: Decimal::from(*close + 1),
                    low: Decimal::from(*close - 1),
                    close: Decimal::from(*close),
                    volume: dec!(10),
                    timeframe: Timeframe::M5,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn short_history_yields_nones() {
        let set = compute(&series(&[100, 101, 102]));
        assert!(set.ema_fast.is_none());
        assert!(set.ema_slow.is_none());
        assert!(set.rsi.is_none());
    }

    #[test]
    fn rising_series_orders_emas() {
        let closes: Vec<i64> = (100..160).collect();
        let set = compute(&series(&closes));
        let fast = set.ema_fast.unwrap();
        let slow = set.ema_slow.unwrap();
        assert!(fast > slow, "fast {} should lead slow {} uptrend", fast, slow);
        // steadily rising closes push RSI high
        assert!(set.rsi.unwrap() > dec!(70));
    }

    #[test]
    fn flat_volume_ratio_is_one() {
        let closes: Vec<i64> = (100..160).collect();
        let set = compute(&series(&closes));
        assert_eq!(set.volume_ratio.unwrap(), dec!(1));
    }

    #[test]
    fn empty_data_is_default() {
        let set = compute(&SymbolData::default());
        assert!(set.ema_fast.is_none());
        assert!(set.volume_ratio.is_none());
    }
}
