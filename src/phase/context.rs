use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{Confirmation, Phase};
use crate::models::{Candle, Direction};

/// Switch extrema of both directions, for display and snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchExtrema {
    pub bull_initial_low: Option<f64>,
    pub bull_prev_higher_high: Option<f64>,
    pub bear_initial_high: Option<f64>,
    pub bear_prev_lower_low: Option<f64>,
}

/// Mutable state of one timeframe's phase machine.
///
/// Only the owning state machine (through its rule conditions and cleanup
/// protocol) and the controller's explicit reset mutate it. The cached search
/// keys are candle timestamps, so they stay meaningful when the bounded
/// history drops its oldest candles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseContext {
    current_phase: Phase,
    pub(crate) last_candles: VecDeque<Candle>,

    pub(crate) bullish: Confirmation,
    pub(crate) bearish: Confirmation,

    pub(crate) switch_bull_initial_low: Option<f64>,
    pub(crate) switch_bull_prev_higher_high: Option<f64>,
    pub(crate) switch_bear_initial_high: Option<f64>,
    pub(crate) switch_bear_prev_lower_low: Option<f64>,

    pub(crate) switch_bull_pivot: Option<DateTime<Utc>>,
    pub(crate) switch_bull_breakout: Option<DateTime<Utc>>,
    pub(crate) switch_bear_pivot: Option<DateTime<Utc>>,
    pub(crate) switch_bear_breakdown: Option<DateTime<Utc>>,
}

impl PhaseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_phase(&self) -> Phase {
        self.current_phase
    }

    pub(crate) fn set_current_phase(&mut self, phase: Phase) {
        self.current_phase = phase;
    }

    /// Back to Neutral with every slot empty
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn last_candles(&self) -> &VecDeque<Candle> {
        &self.last_candles
    }

    pub fn bullish(&self) -> &Confirmation {
        &self.bullish
    }

    pub fn bearish(&self) -> &Confirmation {
        &self.bearish
    }

    pub fn confirmation(&self, direction: Direction) -> &Confirmation {
        match direction {
            Direction::Bull => &self.bullish,
            Direction::Bear => &self.bearish,
        }
    }

    pub(crate) fn confirmation_mut(&mut self, direction: Direction) -> &mut Confirmation {
        match direction {
            Direction::Bull => &mut self.bullish,
            Direction::Bear => &mut self.bearish,
        }
    }

    pub fn switch_extrema(&self) -> SwitchExtrema {
        SwitchExtrema {
            bull_initial_low: self.switch_bull_initial_low,
            bull_prev_higher_high: self.switch_bull_prev_higher_high,
            bear_initial_high: self.switch_bear_initial_high,
            bear_prev_lower_low: self.switch_bear_prev_lower_low,
        }
    }

    /// (initial extreme, opposing extreme) for a direction, when both are set
    pub fn switch_pair(&self, direction: Direction) -> Option<(f64, f64)> {
        match direction {
            Direction::Bull => Some((self.switch_bull_initial_low?, self.switch_bull_prev_higher_high?)),
            Direction::Bear => Some((self.switch_bear_initial_high?, self.switch_bear_prev_lower_low?)),
        }
    }

    pub(crate) fn reset_switch_keys(&mut self, direction: Direction) {
        match direction {
            Direction::Bull => {
                self.switch_bull_pivot = None;
                self.switch_bull_breakout = None;
            }
            Direction::Bear => {
                self.switch_bear_pivot = None;
                self.switch_bear_breakdown = None;
            }
        }
    }

    /// Drop a direction's switch extrema, cached keys and confirmation
    pub(crate) fn clear_switch(&mut self, direction: Direction) {
        match direction {
            Direction::Bull => {
                self.switch_bull_initial_low = None;
                self.switch_bull_prev_higher_high = None;
            }
            Direction::Bear => {
                self.switch_bear_initial_high = None;
                self.switch_bear_prev_lower_low = None;
            }
        }
        self.reset_switch_keys(direction);
        self.confirmation_mut(direction).reset();
    }

    /// Candle immediately before the one with `timestamp` in the retained window
    pub(crate) fn candle_before(&self, timestamp: DateTime<Utc>) -> Option<&Candle> {
        let idx = self.last_candles.iter().position(|c| c.timestamp == timestamp)?;
        if idx == 0 {
            return None;
        }
        self.last_candles.get(idx - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn candle(minute: i64, low: f64) -> Candle {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap() + Duration::minutes(minute);
        Candle::new(ts, low + 1.0, low + 2.0, low, low + 1.0, 0.0)
    }

    #[test]
    fn test_clear_switch_only_touches_one_direction() {
        let mut ctx = PhaseContext::new();
        ctx.switch_bull_initial_low = Some(1.0);
        ctx.switch_bull_prev_higher_high = Some(2.0);
        ctx.switch_bear_initial_high = Some(3.0);
        ctx.switch_bear_prev_lower_low = Some(0.5);
        ctx.bullish.confirm(candle(0, 1.0));
        ctx.switch_bull_pivot = Some(candle(0, 1.0).timestamp);

        ctx.clear_switch(Direction::Bull);

        assert_eq!(ctx.switch_pair(Direction::Bull), None);
        assert!(ctx.switch_bull_pivot.is_none());
        assert!(!ctx.bullish().valid);
        assert_eq!(ctx.switch_pair(Direction::Bear), Some((3.0, 0.5)));
    }

    #[test]
    fn test_candle_before_uses_timestamps() {
        let mut ctx = PhaseContext::new();
        for i in 0..3 {
            ctx.last_candles.push_back(candle(i, 1.0 + i as f64));
        }
        let before = ctx.candle_before(candle(2, 0.0).timestamp).unwrap();
        assert_eq!(before.low, 2.0);
        assert!(ctx.candle_before(candle(0, 0.0).timestamp).is_none());
        assert!(ctx.candle_before(candle(9, 0.0).timestamp).is_none());
    }

    #[test]
    fn test_reset_returns_to_neutral() {
        let mut ctx = PhaseContext::new();
        ctx.set_current_phase(Phase::TrendBear);
        ctx.bearish.confirm(candle(0, 1.0));
        ctx.reset();
        assert_eq!(ctx, PhaseContext::default());
        assert_eq!(ctx.current_phase(), Phase::Neutral);
    }
}
