use chrono::{DateTime, Utc};

use crate::entry::{ceil_to_tick, floor_to_tick};
use crate::models::{Candle, Quote, Side};

/// Candle that traded through the entry and closed on the favourable side
pub fn is_go_candle(side: Side, candle: &Candle, entry_price: f64) -> bool {
    match side {
        Side::Buy => candle.high >= entry_price && candle.close > entry_price,
        Side::Sell => candle.low <= entry_price && candle.close < entry_price,
    }
}

/// Break-even stop for a filled stop order, if the pattern is complete.
///
/// The go-candle is the first candle at or after `opened_at` that closed
/// beyond the entry. A later candle must close beyond the go-candle's
/// extreme without touching the entry (touching it first abandons the
/// search), and the candle after that must also stay clear of the entry.
/// The stop then goes to entry ∓ spread, kept `min_dist` away from the
/// market and rounded away from it.
#[allow(clippy::too_many_arguments)]
pub fn breakeven_price(
    side: Side,
    candles: &[Candle],
    entry_price: f64,
    opened_at: DateTime<Utc>,
    spread: f64,
    quote: Quote,
    min_dist: f64,
    tick_size: f64,
) -> Option<f64> {
    let go_idx = candles
        .iter()
        .position(|c| c.timestamp >= opened_at && is_go_candle(side, c, entry_price))?;
    let go = &candles[go_idx];

    let mut confirmation_idx = None;
    for (i, c) in candles.iter().enumerate().skip(go_idx + 1) {
        let (confirms, violates) = match side {
            Side::Buy => (c.close > go.high && c.low > entry_price, c.low <= entry_price),
            Side::Sell => (c.close < go.low && c.high < entry_price, c.high >= entry_price),
        };
        if confirms {
            confirmation_idx = Some(i);
            break;
        }
        if violates {
            return None;
        }
    }

    let follow = candles.get(confirmation_idx? + 1)?;
    match side {
        Side::Buy if follow.low <= entry_price => return None,
        Side::Sell if follow.high >= entry_price => return None,
        _ => {}
    }

    let stop = match side {
        Side::Buy => {
            let candidate = entry_price - spread;
            floor_to_tick(candidate.min(quote.bid - min_dist), tick_size)
        }
        Side::Sell => {
            let candidate = entry_price + spread;
            ceil_to_tick(candidate.max(quote.ask + min_dist), tick_size)
        }
    };
    Some(stop)
}

/// Next trailing stop and level, when price has run at least 2R and the
/// level beats `last_level`. The stop trails one R behind the level and only
/// ever tightens.
pub fn trailing_step(
    side: Side,
    candles: &[Candle],
    entry_price: f64,
    rr: f64,
    current_stop: f64,
    last_level: u32,
) -> Option<(f64, u32)> {
    if rr <= 0.0 {
        return None;
    }

    let excursion = match side {
        Side::Buy => candles.iter().map(|c| c.high).fold(entry_price, f64::max) - entry_price,
        Side::Sell => entry_price - candles.iter().map(|c| c.low).fold(entry_price, f64::min),
    };
    let level = (excursion / rr).floor().max(0.0) as u32;
    if level < 2 || level <= last_level {
        return None;
    }

    let offset = (level - 1) as f64 * rr;
    match side {
        Side::Buy => {
            let candidate = entry_price + offset;
            (candidate > current_stop).then_some((candidate, level))
        }
        Side::Sell => {
            let candidate = entry_price - offset;
            (candidate < current_stop).then_some((candidate, level))
        }
    }
}
