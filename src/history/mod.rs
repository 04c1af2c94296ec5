use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::indicators::MovingAverageKind;
use crate::models::Candle;

/// Periods and flavour of the fast/slow averages written onto each candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovingAverageSettings {
    pub fast_period: usize,
    pub slow_period: usize,
    pub kind: MovingAverageKind,
}

impl Default for MovingAverageSettings {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 20,
            kind: MovingAverageKind::Windowed,
        }
    }
}

/// Bounded, ordered candle history for one (symbol, timeframe).
///
/// The history is the sole owner of its candles. Moving averages are computed
/// once, when a candle is appended, from the closes held at that moment; they
/// are never recomputed afterwards.
#[derive(Debug, Clone)]
pub struct CandleHistory {
    candles: VecDeque<Candle>,
    max_candles: usize,
    averages: MovingAverageSettings,
}

impl CandleHistory {
    /// Create a new history
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep (oldest dropped first)
    /// * `averages` - Settings for the fast/slow average fields
    pub fn new(max_candles: usize, averages: MovingAverageSettings) -> Self {
        Self {
            candles: VecDeque::with_capacity(max_candles + 1),
            max_candles: max_candles.max(1),
            averages,
        }
    }

    /// Append a closed candle.
    ///
    /// Returns the stored (annotated) candle, or None when the timestamp is not
    /// newer than the last stored one. A repeated timestamp is already folded
    /// into the history and is dropped silently.
    pub fn push(&mut self, candle: Candle) -> Option<&Candle> {
        if let Some(last) = self.candles.back() {
            if candle.timestamp <= last.timestamp {
                tracing::debug!(
                    ts = %candle.timestamp,
                    last = %last.timestamp,
                    "Dropping candle that is not newer than history"
                );
                return None;
            }
        }

        self.candles.push_back(candle.stripped());

        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }

        let closes: Vec<f64> = self.candles.iter().map(|c| c.close).collect();
        let fast = self.averages.kind.compute(&closes, self.averages.fast_period);
        let slow = self.averages.kind.compute(&closes, self.averages.slow_period);

        let newest = self.candles.back_mut()?;
        newest.ema_fast = fast;
        newest.ema_slow = slow;
        Some(newest)
    }

    /// Replace the contents with a freshly fetched history (oldest first)
    pub fn load(&mut self, candles: impl IntoIterator<Item = Candle>) {
        self.candles.clear();
        for candle in candles {
            self.push(candle);
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn max_candles(&self) -> usize {
        self.max_candles
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.candles.back().map(|c| c.timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    /// All candles, oldest first
    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    /// Candles with a timestamp at or after `from`
    pub fn since(&self, from: DateTime<Utc>) -> Vec<Candle> {
        self.candles
            .iter()
            .filter(|c| c.timestamp >= from)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }
}
