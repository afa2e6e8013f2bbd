// =============================================================================
// PriceBar ring — per-token rolling OHLCV history
// =============================================================================
//
// One bar per minute bucket. A write either extends the bar for the current
// bucket (folding close/high/low/volume in) or appends a new bar; the ring
// is capped at `max_bars` by dropping from the front, mirroring the
// Binance-kline buffer this engine's candle ingestion used to be built on.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::TokenKey;

/// `{t: minute-aligned epoch-ms, o, h, l, c, v}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

impl PriceBar {
    fn new(minute: i64, price: f64, volume: f64, high: Option<f64>, low: Option<f64>) -> Self {
        Self {
            t: minute,
            o: price,
            h: high.unwrap_or(price).max(price),
            l: low.unwrap_or(price).min(price),
            c: price,
            v: volume,
        }
    }

    fn extend(&mut self, price: f64, volume: f64, high: Option<f64>, low: Option<f64>) {
        self.c = price;
        self.h = self.h.max(high.unwrap_or(price)).max(price);
        self.l = self.l.min(low.unwrap_or(price)).min(price);
        self.v += volume;
    }
}

fn minute_bucket(epoch_ms: i64) -> i64 {
    epoch_ms - (epoch_ms.rem_euclid(60_000))
}

/// Per-token bar history, bounded to `max_bars` entries.
pub struct BarRing {
    bars: RwLock<HashMap<TokenKey, VecDeque<PriceBar>>>,
    max_bars: usize,
}

impl BarRing {
    pub fn new(max_bars: usize) -> Self {
        Self {
            bars: RwLock::new(HashMap::new()),
            max_bars,
        }
    }

    /// Folds a live tick into the current minute-bucket bar, or appends a
    /// new bar. `now_ms` should be the sample's own timestamp.
    pub fn update_price_history(
        &self,
        key: &TokenKey,
        now_ms: i64,
        price: f64,
        volume: f64,
        high: Option<f64>,
        low: Option<f64>,
    ) {
        let minute = minute_bucket(now_ms);
        let mut guard = self.bars.write();
        let ring = guard.entry(key.clone()).or_default();

        match ring.back_mut() {
            Some(last) if last.t == minute => {
                last.extend(price, volume, high, low);
            }
            _ => {
                ring.push_back(PriceBar::new(minute, price, volume, high, low));
            }
        }

        while ring.len() > self.max_bars {
            ring.pop_front();
        }
    }

    /// Merges externally fetched candles by minute bucket, de-duplicating
    /// and keeping the ring sorted ascending and capped.
    pub fn ingest_ohlcv(&self, key: &TokenKey, candles: &[PriceBar]) {
        if candles.is_empty() {
            return;
        }
        let mut guard = self.bars.write();
        let ring = guard.entry(key.clone()).or_default();

        for candle in candles {
            let minute = minute_bucket(candle.t);
            if let Some(existing) = ring.iter_mut().find(|b| b.t == minute) {
                *existing = PriceBar { t: minute, ..*candle };
            } else {
                ring.push_back(PriceBar { t: minute, ..*candle });
            }
        }

        ring.make_contiguous().sort_by_key(|b| b.t);
        ring.dedup_by_key(|b| b.t);

        while ring.len() > self.max_bars {
            ring.pop_front();
        }
    }

    pub fn bars(&self, key: &TokenKey) -> Vec<PriceBar> {
        self.bars
            .read()
            .get(key)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn closes(&self, key: &TokenKey) -> Vec<f64> {
        self.bars
            .read()
            .get(key)
            .map(|ring| ring.iter().map(|b| b.c).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, key: &TokenKey) -> usize {
        self.bars.read().get(key).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, key: &TokenKey) -> bool {
        self.len(key) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chain;

    fn key() -> TokenKey {
        TokenKey::new(Chain::Solana, "TokenMint111")
    }

    #[test]
    fn appends_new_bar_for_new_minute() {
        let ring = BarRing::new(200);
        ring.update_price_history(&key(), 0, 1.0, 10.0, None, None);
        ring.update_price_history(&key(), 60_000, 2.0, 10.0, None, None);
        assert_eq!(ring.len(&key()), 2);
    }

    #[test]
    fn folds_same_minute_into_last_bar() {
        let ring = BarRing::new(200);
        ring.update_price_history(&key(), 0, 1.0, 10.0, None, None);
        ring.update_price_history(&key(), 30_000, 1.5, 5.0, None, None);
        assert_eq!(ring.len(&key()), 1);
        let bars = ring.bars(&key());
        assert_eq!(bars[0].c, 1.5);
        assert_eq!(bars[0].h, 1.5);
        assert_eq!(bars[0].v, 15.0);
    }

    #[test]
    fn default_bar_idempotence_does_not_grow_ring() {
        // Calling update_price_history twice with the same price/0 volume
        // within the same minute does not grow the ring (§8 law).
        let ring = BarRing::new(200);
        ring.update_price_history(&key(), 0, 1.0, 0.0, None, None);
        ring.update_price_history(&key(), 1_000, 1.0, 0.0, None, None);
        assert_eq!(ring.len(&key()), 1);
    }

    #[test]
    fn enforces_cap_by_dropping_oldest() {
        let ring = BarRing::new(5);
        for i in 0..10 {
            ring.update_price_history(&key(), i * 60_000, i as f64, 1.0, None, None);
        }
        assert_eq!(ring.len(&key()), 5);
        let bars = ring.bars(&key());
        assert_eq!(bars.first().unwrap().c, 5.0);
        assert_eq!(bars.last().unwrap().c, 9.0);
    }

    #[test]
    fn ingest_ohlcv_sorts_and_dedupes() {
        let ring = BarRing::new(200);
        let candles = vec![
            PriceBar { t: 120_000, o: 3.0, h: 3.0, l: 3.0, c: 3.0, v: 1.0 },
            PriceBar { t: 0, o: 1.0, h: 1.0, l: 1.0, c: 1.0, v: 1.0 },
            PriceBar { t: 60_000, o: 2.0, h: 2.0, l: 2.0, c: 2.0, v: 1.0 },
        ];
        ring.ingest_ohlcv(&key(), &candles);
        let closes = ring.closes(&key());
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
    }
}
