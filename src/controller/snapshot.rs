use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Candle, Direction, Side, Timeframe};
use crate::phase::Phase;

/// Switch anchor pair shown for a timeframe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwitchLevels {
    pub direction: Direction,
    pub initial_extreme: f64,
    pub previous_extreme: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeSnapshot {
    pub timeframe: Timeframe,
    pub phase: Phase,
    pub switch_levels: Option<SwitchLevels>,
    /// Timestamps of the live confirmation candles
    pub bullish_confirmation: Option<DateTime<Utc>>,
    pub bearish_confirmation: Option<DateTime<Utc>>,
    pub last_candle: Option<Candle>,
    pub candles: usize,
}

/// Order or position the controller is tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTrade {
    pub ticket: u64,
    pub side: Side,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub opened_at: DateTime<Utc>,
    pub break_even_applied: bool,
    pub trailing_level: u32,
}

/// Read-only view of one symbol's controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub symbol: String,
    pub active_timeframe: Timeframe,
    pub entered_direction: Option<Direction>,
    pub timeframes: Vec<TimeframeSnapshot>,
    pub open_trades: Vec<OpenTrade>,
}

impl ControllerSnapshot {
    pub fn timeframe(&self, timeframe: Timeframe) -> Option<&TimeframeSnapshot> {
        self.timeframes.iter().find(|t| t.timeframe == timeframe)
    }
}
