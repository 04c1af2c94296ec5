// Entry decision logic for the entry timeframe

pub mod window;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BotError;
use crate::models::{Candle, Direction, Quote, Side, SymbolSpec};
use crate::phase::{Phase, PhaseContext};

pub use window::TradingWindow;

/// Fallback when the broker reports no minimum stop level
pub const DEFAULT_STOP_LEVEL_POINTS: u32 = 10;

/// Stop order the controller should place
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub side: Side,
    pub entry_price: f64,
    pub stop_loss: f64,
}

/// Minimum stop distance in price units, never below one tick
pub fn min_stop_distance(stop_level_points: u32, tick_size: f64, fallback_points: u32) -> f64 {
    let level = if stop_level_points > 0 {
        stop_level_points
    } else {
        fallback_points
    };
    (level.max(1) as f64 * tick_size).max(tick_size)
}

/// Round to the nearest tick and strip floating-point noise
pub fn round_to_tick(price: f64, tick_size: f64) -> f64 {
    if tick_size <= 0.0 {
        return price;
    }
    normalize((price / tick_size).round() * tick_size, tick_size)
}

/// Round down to a tick
pub fn floor_to_tick(price: f64, tick_size: f64) -> f64 {
    if tick_size <= 0.0 {
        return price;
    }
    normalize((price / tick_size + 1e-6).floor() * tick_size, tick_size)
}

/// Round up to a tick
pub fn ceil_to_tick(price: f64, tick_size: f64) -> f64 {
    if tick_size <= 0.0 {
        return price;
    }
    normalize((price / tick_size - 1e-6).ceil() * tick_size, tick_size)
}

fn normalize(value: f64, tick_size: f64) -> f64 {
    let decimals = (0..=10)
        .find(|&d| {
            let scaled = tick_size * 10f64.powi(d);
            (scaled - scaled.round()).abs() < 1e-9
        })
        .unwrap_or(10);
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Whichever average sits farther from the close
fn farther_average(candle: &Candle) -> Option<f64> {
    let (fast, slow) = candle.averages()?;
    let dist_fast = (candle.close - fast).abs();
    let dist_slow = (candle.close - slow).abs();
    Some(if dist_fast > dist_slow { fast } else { slow })
}

/// Computes buy-stop / sell-stop entries for the entry timeframe
#[derive(Debug, Clone)]
pub struct EntryLogic {
    window: TradingWindow,
    default_stop_level_points: u32,
}

impl Default for EntryLogic {
    fn default() -> Self {
        Self::new(TradingWindow::default(), DEFAULT_STOP_LEVEL_POINTS)
    }
}

impl EntryLogic {
    pub fn new(window: TradingWindow, default_stop_level_points: u32) -> Self {
        Self {
            window,
            default_stop_level_points,
        }
    }

    pub fn trading_window(&self) -> &TradingWindow {
        &self.window
    }

    pub fn min_distance(&self, spec: &SymbolSpec) -> f64 {
        min_stop_distance(spec.stop_level_points, spec.tick_size, self.default_stop_level_points)
    }

    /// Shared gating: time window, phase, live confirmation inside the
    /// window, switch extrema present, two candles with averages
    fn preconditions<'a>(
        &self,
        direction: Direction,
        phase: Phase,
        ctx: &PhaseContext,
        candles: &'a [Candle],
        now: DateTime<Utc>,
    ) -> Option<(&'a Candle, &'a Candle)> {
        if !self.window.contains(now) {
            tracing::debug!(%now, "Entry skipped outside trading window");
            return None;
        }

        let required = match direction {
            Direction::Bull => Phase::BaseSwitchBull,
            Direction::Bear => Phase::BaseSwitchBear,
        };
        if phase != required {
            return None;
        }

        let confirm = ctx.confirmation(direction).live_candle()?;
        if !candles.iter().any(|c| c.timestamp == confirm.timestamp) {
            return None;
        }
        ctx.switch_pair(direction)?;

        let n = candles.len();
        if n < 2 {
            return None;
        }
        Some((&candles[n - 2], &candles[n - 1]))
    }

    /// Buy-stop above the previous high, stop below the farther average.
    ///
    /// `Err` means the computed stop crossed the entry after clamping.
    pub fn try_buy_stop(
        &self,
        phase: Phase,
        ctx: &PhaseContext,
        candles: &[Candle],
        ask: f64,
        spec: &SymbolSpec,
        now: DateTime<Utc>,
    ) -> Result<Option<EntrySignal>, BotError> {
        let Some((prev, curr)) = self.preconditions(Direction::Bull, phase, ctx, candles, now) else {
            return Ok(None);
        };
        let Some(ema_ref) = farther_average(curr) else {
            return Ok(None);
        };

        let tick = spec.tick_size;
        let spread = spec.spread;
        let min_dist = self.min_distance(spec);

        let desired = prev.high + spread;
        let mut entry = if desired - ask < min_dist {
            ask + min_dist + tick
        } else {
            desired
        };

        let mut stop = ema_ref - 2.0 * spread;

        if entry < ask + min_dist {
            entry = ask + min_dist + tick;
        }
        if (entry - stop).abs() < min_dist {
            stop = entry - min_dist;
        }

        let entry = round_to_tick(entry, tick);
        let stop = round_to_tick(stop, tick);

        if stop >= entry {
            return Err(BotError::InvariantViolation(format!(
                "{} buy stop {} is not below entry {}",
                spec.symbol, stop, entry
            )));
        }

        tracing::debug!(
            symbol = %spec.symbol,
            prev_high = prev.high,
            ask,
            entry,
            stop,
            min_dist,
            "Buy-stop computed"
        );
        Ok(Some(EntrySignal {
            side: Side::Buy,
            entry_price: entry,
            stop_loss: stop,
        }))
    }

    /// Sell-stop below the previous low, stop above the farther average
    pub fn try_sell_stop(
        &self,
        phase: Phase,
        ctx: &PhaseContext,
        candles: &[Candle],
        bid: f64,
        spec: &SymbolSpec,
        now: DateTime<Utc>,
    ) -> Result<Option<EntrySignal>, BotError> {
        let Some((prev, curr)) = self.preconditions(Direction::Bear, phase, ctx, candles, now) else {
            return Ok(None);
        };
        let Some(ema_ref) = farther_average(curr) else {
            return Ok(None);
        };

        let tick = spec.tick_size;
        let spread = spec.spread;
        let min_dist = self.min_distance(spec);

        let desired = prev.low - spread;
        let mut entry = if bid - desired < min_dist {
            bid - min_dist - tick
        } else {
            desired
        };

        let mut stop = ema_ref + 2.0 * spread;

        if bid - entry < min_dist {
            entry = bid - min_dist - tick;
        }
        if (stop - entry).abs() < min_dist {
            stop = entry + min_dist;
        }

        let entry = round_to_tick(entry, tick);
        let stop = round_to_tick(stop, tick);

        if stop <= entry {
            return Err(BotError::InvariantViolation(format!(
                "{} sell stop {} is not above entry {}",
                spec.symbol, stop, entry
            )));
        }

        tracing::debug!(
            symbol = %spec.symbol,
            prev_low = prev.low,
            bid,
            entry,
            stop,
            min_dist,
            "Sell-stop computed"
        );
        Ok(Some(EntrySignal {
            side: Side::Sell,
            entry_price: entry,
            stop_loss: stop,
        }))
    }

    pub fn check_buy_stop(
        &self,
        phase: Phase,
        ctx: &PhaseContext,
        candles: &[Candle],
        ask: f64,
        spec: &SymbolSpec,
        now: DateTime<Utc>,
    ) -> Option<EntrySignal> {
        self.try_buy_stop(phase, ctx, candles, ask, spec, now)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Buy-stop discarded");
                None
            })
    }

    pub fn check_sell_stop(
        &self,
        phase: Phase,
        ctx: &PhaseContext,
        candles: &[Candle],
        bid: f64,
        spec: &SymbolSpec,
        now: DateTime<Utc>,
    ) -> Option<EntrySignal> {
        self.try_sell_stop(phase, ctx, candles, bid, spec, now)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Sell-stop discarded");
                None
            })
    }

    /// Entry for a direction, using the matching side of the quote
    pub fn try_entry(
        &self,
        direction: Direction,
        phase: Phase,
        ctx: &PhaseContext,
        candles: &[Candle],
        quote: Quote,
        spec: &SymbolSpec,
        now: DateTime<Utc>,
    ) -> Result<Option<EntrySignal>, BotError> {
        match direction {
            Direction::Bull => self.try_buy_stop(phase, ctx, candles, quote.ask, spec, now),
            Direction::Bear => self.try_sell_stop(phase, ctx, candles, quote.bid, spec, now),
        }
    }
}
