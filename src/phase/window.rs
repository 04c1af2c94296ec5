use chrono::{DateTime, Utc};
use std::ops::Deref;
use std::sync::Arc;

use crate::models::Candle;

/// Immutable, ordered snapshot of a timeframe's candles for one evaluation pass.
///
/// Every rule evaluated during a pass reads the same snapshot; the generation
/// counter tells passes apart.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: Arc<[Candle]>,
    generation: u64,
}

impl CandleWindow {
    pub fn new(candles: impl Into<Arc<[Candle]>>, generation: u64) -> Self {
        Self {
            candles: candles.into(),
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn newest(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Newest and second-newest candle
    pub fn last_two(&self) -> Option<(&Candle, &Candle)> {
        let n = self.candles.len();
        if n < 2 {
            return None;
        }
        Some((&self.candles[n - 2], &self.candles[n - 1]))
    }

    pub fn position_of(&self, timestamp: DateTime<Utc>) -> Option<usize> {
        self.candles.iter().position(|c| c.timestamp == timestamp)
    }
}

impl Deref for CandleWindow {
    type Target = [Candle];

    fn deref(&self) -> &[Candle] {
        &self.candles
    }
}
