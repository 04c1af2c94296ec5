//! Transition conditions for the phase rule table.
//!
//! Every condition reads the same candle snapshot and may seed the context
//! (switch extrema, cached search keys, confirmation candles) as part of
//! detecting its pattern. None of them fails loudly: missing lookback or
//! averages that are still warming up simply mean `NoMatch`.

use super::{CandleWindow, Phase, PhaseContext};
use crate::models::{Candle, Direction};

/// Result of evaluating one rule condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    NoMatch,
    Match,
    /// The condition commits the target phase itself before cleanup runs.
    /// Only the Base/BaseSwitch -> Trend rules return this.
    MatchAndForcePhase(Phase),
}

impl RuleOutcome {
    pub fn is_match(self) -> bool {
        !matches!(self, RuleOutcome::NoMatch)
    }
}

impl From<bool> for RuleOutcome {
    fn from(matched: bool) -> Self {
        if matched {
            RuleOutcome::Match
        } else {
            RuleOutcome::NoMatch
        }
    }
}

/// Newest two candles plus the newest candle's averages, when all four
/// averages (newest and previous) are available
fn breakout_inputs(candles: &[Candle]) -> Option<(&Candle, &Candle, f64, f64)> {
    let n = candles.len();
    if n < 2 {
        return None;
    }
    let prev = &candles[n - 2];
    let curr = &candles[n - 1];
    prev.averages()?;
    let (fast, slow) = curr.averages()?;
    Some((prev, curr, fast, slow))
}

/// Close crossing above both averages in any of the three accepted patterns
fn is_breakout_up(candles: &[Candle]) -> bool {
    match breakout_inputs(candles) {
        Some((prev, curr, fast, slow)) => {
            (curr.close > fast && curr.close > slow)
                || (prev.close > fast && curr.close > slow)
                || (prev.close > slow && curr.close > fast)
        }
        None => false,
    }
}

fn is_breakout_down(candles: &[Candle]) -> bool {
    match breakout_inputs(candles) {
        Some((prev, curr, fast, slow)) => {
            (curr.close < fast && curr.close < slow)
                || (prev.close < fast && curr.close < slow)
                || (prev.close < slow && curr.close < fast)
        }
        None => false,
    }
}

/// Pullback candle in a bull phase: no new high, close not below both averages
pub fn is_confirmation_bullish(prev_phase: Phase, candles: &[Candle], ctx: &PhaseContext) -> bool {
    let n = candles.len();
    if n < 2 || !matches!(prev_phase, Phase::SwitchBull | Phase::TrendBull) {
        return false;
    }
    if ctx.bullish.valid {
        return false;
    }

    let prev = &candles[n - 2];
    let curr = &candles[n - 1];
    if curr.high > prev.high {
        return false;
    }

    let Some((fast, slow)) = curr.averages() else {
        return false;
    };
    !(curr.close < fast && curr.close < slow)
}

pub fn is_confirmation_bearish(prev_phase: Phase, candles: &[Candle], ctx: &PhaseContext) -> bool {
    let n = candles.len();
    if n < 2 || !matches!(prev_phase, Phase::SwitchBear | Phase::TrendBear) {
        return false;
    }
    if ctx.bearish.valid {
        return false;
    }

    let prev = &candles[n - 2];
    let curr = &candles[n - 1];
    if curr.low < prev.low {
        return false;
    }

    let Some((fast, slow)) = curr.averages() else {
        return false;
    };
    !(curr.close > fast && curr.close > slow)
}

/// Confirmation predicate for a direction
pub fn is_confirmation(
    direction: Direction,
    prev_phase: Phase,
    candles: &[Candle],
    ctx: &PhaseContext,
) -> bool {
    match direction {
        Direction::Bull => is_confirmation_bullish(prev_phase, candles, ctx),
        Direction::Bear => is_confirmation_bearish(prev_phase, candles, ctx),
    }
}

pub fn neutral_to_switch_bull(prev_phase: Phase, window: &CandleWindow, ctx: &mut PhaseContext) -> RuleOutcome {
    if prev_phase != Phase::Neutral || window.len() < 3 || !is_breakout_up(window) {
        return RuleOutcome::NoMatch;
    }

    let curr_idx = window.len() - 1;
    let Some(initial_idx) = (1..curr_idx)
        .rev()
        .find(|&i| window[i].low > window[i - 1].low)
        .map(|i| i - 1)
    else {
        return RuleOutcome::NoMatch;
    };
    let initial_low = window[initial_idx].low;

    let Some(prev_higher_high) = (0..initial_idx)
        .rev()
        .map(|i| window[i].high)
        .find(|&high| high > initial_low)
    else {
        return RuleOutcome::NoMatch;
    };

    ctx.switch_bull_initial_low = Some(initial_low);
    ctx.switch_bull_prev_higher_high = Some(prev_higher_high);
    tracing::debug!(initial_low, prev_higher_high, "Seeded bull switch extrema from neutral");
    RuleOutcome::Match
}

pub fn neutral_to_switch_bear(prev_phase: Phase, window: &CandleWindow, ctx: &mut PhaseContext) -> RuleOutcome {
    if prev_phase != Phase::Neutral || window.len() < 3 || !is_breakout_down(window) {
        return RuleOutcome::NoMatch;
    }

    let curr_idx = window.len() - 1;
    let Some(initial_idx) = (1..curr_idx)
        .rev()
        .find(|&i| window[i].high < window[i - 1].high)
        .map(|i| i - 1)
    else {
        return RuleOutcome::NoMatch;
    };
    let initial_high = window[initial_idx].high;
    let peak_low = window[initial_idx].low;

    let Some(prev_lower_low) = (0..initial_idx)
        .rev()
        .map(|i| window[i].low)
        .find(|&low| low < peak_low)
    else {
        return RuleOutcome::NoMatch;
    };

    ctx.switch_bear_initial_high = Some(initial_high);
    ctx.switch_bear_prev_lower_low = Some(prev_lower_low);
    tracing::debug!(initial_high, prev_lower_low, "Seeded bear switch extrema from neutral");
    RuleOutcome::Match
}

/// Reversal from the bear family into SwitchBull
pub fn is_switch_bull(prev_phase: Phase, window: &CandleWindow, ctx: &mut PhaseContext) -> RuleOutcome {
    if !prev_phase.is_bear_family() || window.len() < 2 {
        return RuleOutcome::NoMatch;
    }
    // Extrema are written once per occupancy
    if ctx.switch_pair(Direction::Bull).is_some() {
        return RuleOutcome::NoMatch;
    }
    if !is_breakout_up(window) {
        return RuleOutcome::NoMatch;
    }

    let curr_idx = window.len() - 1;
    let Some(initial_idx) = (1..=curr_idx).rev().find(|&i| window[i].low < window[i - 1].low) else {
        return RuleOutcome::NoMatch;
    };
    let initial_low = window[initial_idx].low;
    let peak_high = window[initial_idx].high;

    let Some(prev_higher_high) = (0..initial_idx)
        .rev()
        .map(|i| window[i].high)
        .find(|&high| high > peak_high)
    else {
        return RuleOutcome::NoMatch;
    };

    ctx.switch_bull_initial_low = Some(initial_low);
    ctx.switch_bull_prev_higher_high = Some(prev_higher_high);
    tracing::debug!(initial_low, prev_higher_high, "Seeded bull switch extrema");
    RuleOutcome::Match
}

/// Reversal from the bull family into SwitchBear
pub fn is_switch_bear(prev_phase: Phase, window: &CandleWindow, ctx: &mut PhaseContext) -> RuleOutcome {
    if !prev_phase.is_bull_family() || window.len() < 2 {
        return RuleOutcome::NoMatch;
    }
    if ctx.switch_pair(Direction::Bear).is_some() {
        return RuleOutcome::NoMatch;
    }
    if !is_breakout_down(window) {
        return RuleOutcome::NoMatch;
    }

    let curr_idx = window.len() - 1;
    let Some(initial_idx) = (1..=curr_idx).rev().find(|&i| window[i].high > window[i - 1].high) else {
        return RuleOutcome::NoMatch;
    };
    let initial_high = window[initial_idx].high;
    let peak_low = window[initial_idx].low;

    let Some(prev_lower_low) = (0..initial_idx)
        .rev()
        .map(|i| window[i].low)
        .find(|&low| low < peak_low)
    else {
        return RuleOutcome::NoMatch;
    };

    ctx.switch_bear_initial_high = Some(initial_high);
    ctx.switch_bear_prev_lower_low = Some(prev_lower_low);
    tracing::debug!(initial_high, prev_lower_low, "Seeded bear switch extrema");
    RuleOutcome::Match
}

/// Resolve a cached candle key to an index in this window, or search for it
/// and cache the result. A cached key that fell out of the window yields None.
fn cached_index(
    window: &CandleWindow,
    slot: &mut Option<chrono::DateTime<chrono::Utc>>,
    search: impl FnOnce() -> Option<usize>,
) -> Option<usize> {
    match *slot {
        Some(ts) => window.position_of(ts),
        None => {
            let idx = search()?;
            *slot = Some(window[idx].timestamp);
            Some(idx)
        }
    }
}

pub fn is_base_switch_bull(prev_phase: Phase, window: &CandleWindow, ctx: &mut PhaseContext) -> RuleOutcome {
    if prev_phase != Phase::SwitchBull {
        return RuleOutcome::NoMatch;
    }
    let Some((initial_low, prev_higher_high)) = ctx.switch_pair(Direction::Bull) else {
        return RuleOutcome::NoMatch;
    };

    let Some(pivot) = cached_index(window, &mut ctx.switch_bull_pivot, || {
        window.iter().position(|c| c.low == initial_low)
    }) else {
        return RuleOutcome::NoMatch;
    };

    let Some(breakout) = cached_index(window, &mut ctx.switch_bull_breakout, || {
        (pivot + 1..window.len()).find(|&i| window[i].close > prev_higher_high)
    }) else {
        return RuleOutcome::NoMatch;
    };

    let start = breakout + 1;
    if start >= window.len() {
        return RuleOutcome::NoMatch;
    }

    for j in start..window.len() {
        if is_confirmation_bullish(prev_phase, &window[..=j], ctx) {
            ctx.bullish.confirm(window[j].clone());
            tracing::debug!(ts = %window[j].timestamp, "Bullish confirmation after breakout");
            return RuleOutcome::Match;
        }
    }
    RuleOutcome::NoMatch
}

pub fn is_base_switch_bear(prev_phase: Phase, window: &CandleWindow, ctx: &mut PhaseContext) -> RuleOutcome {
    if prev_phase != Phase::SwitchBear {
        return RuleOutcome::NoMatch;
    }
    let Some((initial_high, prev_lower_low)) = ctx.switch_pair(Direction::Bear) else {
        return RuleOutcome::NoMatch;
    };

    let Some(pivot) = cached_index(window, &mut ctx.switch_bear_pivot, || {
        window.iter().position(|c| c.high == initial_high)
    }) else {
        return RuleOutcome::NoMatch;
    };

    let Some(breakdown) = cached_index(window, &mut ctx.switch_bear_breakdown, || {
        (pivot + 1..window.len()).find(|&i| window[i].close < prev_lower_low)
    }) else {
        return RuleOutcome::NoMatch;
    };

    let start = breakdown + 1;
    if start >= window.len() {
        return RuleOutcome::NoMatch;
    }

    for j in start..window.len() {
        if is_confirmation_bearish(prev_phase, &window[..=j], ctx) {
            ctx.bearish.confirm(window[j].clone());
            tracing::debug!(ts = %window[j].timestamp, "Bearish confirmation after breakdown");
            return RuleOutcome::Match;
        }
    }
    RuleOutcome::NoMatch
}

/// Close beyond the high of the candle preceding the confirmation candle.
///
/// Consumes the confirmation and commits TrendBull directly.
pub fn check_transition_to_trend_bull(
    prev_phase: Phase,
    window: &CandleWindow,
    ctx: &mut PhaseContext,
) -> RuleOutcome {
    if !matches!(prev_phase, Phase::BaseBull | Phase::BaseSwitchBull) {
        return RuleOutcome::NoMatch;
    }
    let Some(confirm_ts) = ctx.bullish.candle.as_ref().map(|c| c.timestamp) else {
        return RuleOutcome::NoMatch;
    };
    let Some(before_high) = ctx.candle_before(confirm_ts).map(|c| c.high) else {
        return RuleOutcome::NoMatch;
    };
    let Some(curr) = window.newest() else {
        return RuleOutcome::NoMatch;
    };

    if curr.close > before_high {
        ctx.bullish.reset();
        RuleOutcome::MatchAndForcePhase(Phase::TrendBull)
    } else {
        RuleOutcome::NoMatch
    }
}

pub fn check_transition_to_trend_bear(
    prev_phase: Phase,
    window: &CandleWindow,
    ctx: &mut PhaseContext,
) -> RuleOutcome {
    if !matches!(prev_phase, Phase::BaseBear | Phase::BaseSwitchBear) {
        return RuleOutcome::NoMatch;
    }
    let Some(confirm_ts) = ctx.bearish.candle.as_ref().map(|c| c.timestamp) else {
        return RuleOutcome::NoMatch;
    };
    let Some(before_low) = ctx.candle_before(confirm_ts).map(|c| c.low) else {
        return RuleOutcome::NoMatch;
    };
    let Some(curr) = window.newest() else {
        return RuleOutcome::NoMatch;
    };

    if curr.close < before_low {
        ctx.bearish.reset();
        RuleOutcome::MatchAndForcePhase(Phase::TrendBear)
    } else {
        RuleOutcome::NoMatch
    }
}

pub fn check_transition_to_base_bull(
    prev_phase: Phase,
    window: &CandleWindow,
    ctx: &mut PhaseContext,
) -> RuleOutcome {
    if prev_phase != Phase::TrendBull || !is_confirmation_bullish(prev_phase, window, ctx) {
        return RuleOutcome::NoMatch;
    }
    let Some(curr) = window.newest() else {
        return RuleOutcome::NoMatch;
    };
    ctx.bullish.confirm(curr.clone());
    RuleOutcome::Match
}

pub fn check_transition_to_base_bear(
    prev_phase: Phase,
    window: &CandleWindow,
    ctx: &mut PhaseContext,
) -> RuleOutcome {
    if prev_phase != Phase::TrendBear || !is_confirmation_bearish(prev_phase, window, ctx) {
        return RuleOutcome::NoMatch;
    }
    let Some(curr) = window.newest() else {
        return RuleOutcome::NoMatch;
    };
    ctx.bearish.confirm(curr.clone());
    RuleOutcome::Match
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    /// Candle with explicit (high, low, close) and averages
    fn bar(i: i64, high: f64, low: f64, close: f64, mas: Option<(f64, f64)>) -> Candle {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap() + Duration::minutes(i);
        let mut c = Candle::new(ts, close, high, low, close, 100.0);
        if let Some((fast, slow)) = mas {
            c.ema_fast = Some(fast);
            c.ema_slow = Some(slow);
        }
        c
    }

    fn window(candles: Vec<Candle>) -> CandleWindow {
        CandleWindow::new(candles, 0)
    }

    fn ctx_with(candles: &[Candle]) -> PhaseContext {
        let mut ctx = PhaseContext::new();
        ctx.last_candles.extend(candles.iter().cloned());
        ctx
    }

    #[test]
    fn test_neutral_to_switch_bull_seeds_extrema() {
        let mas = Some((1.10, 1.12));
        let candles = vec![
            bar(0, 1.20, 1.10, 1.15, mas),
            bar(1, 1.12, 1.05, 1.08, mas),
            bar(2, 1.14, 1.07, 1.11, mas),
            bar(3, 1.16, 1.09, 1.15, mas),
        ];
        let w = window(candles);
        let mut ctx = PhaseContext::new();

        let outcome = neutral_to_switch_bull(Phase::Neutral, &w, &mut ctx);

        assert_eq!(outcome, RuleOutcome::Match);
        // i=2: low 1.07 > 1.05 -> initial index 1
        assert_eq!(ctx.switch_bull_initial_low, Some(1.05));
        assert_eq!(ctx.switch_bull_prev_higher_high, Some(1.20));
    }

    #[test]
    fn test_neutral_breakout_without_extremum_leaves_context_untouched() {
        let mas = Some((1.10, 1.12));
        // Strictly falling lows: no low higher than its predecessor
        let candles = vec![
            bar(0, 1.20, 1.10, 1.15, mas),
            bar(1, 1.18, 1.08, 1.10, mas),
            bar(2, 1.17, 1.06, 1.15, mas),
        ];
        let w = window(candles);
        let mut ctx = PhaseContext::new();

        assert_eq!(neutral_to_switch_bull(Phase::Neutral, &w, &mut ctx), RuleOutcome::NoMatch);
        assert_eq!(ctx, PhaseContext::new());
    }

    #[test]
    fn test_missing_averages_is_no_match() {
        let candles = vec![
            bar(0, 1.20, 1.10, 1.15, None),
            bar(1, 1.12, 1.05, 1.08, None),
            bar(2, 1.16, 1.09, 1.15, Some((1.0, 1.0))),
        ];
        let w = window(candles);
        let mut ctx = PhaseContext::new();
        assert_eq!(neutral_to_switch_bull(Phase::Neutral, &w, &mut ctx), RuleOutcome::NoMatch);
    }

    #[test]
    fn test_switch_bull_refuses_when_already_seeded() {
        let mas = Some((1.10, 1.12));
        let candles = vec![
            bar(0, 1.30, 1.10, 1.15, mas),
            bar(1, 1.20, 1.05, 1.08, mas),
            bar(2, 1.16, 1.09, 1.15, mas),
        ];
        let w = window(candles);
        let mut ctx = PhaseContext::new();
        ctx.switch_bull_initial_low = Some(0.9);
        ctx.switch_bull_prev_higher_high = Some(1.4);

        assert_eq!(is_switch_bull(Phase::TrendBear, &w, &mut ctx), RuleOutcome::NoMatch);
        assert_eq!(ctx.switch_bull_initial_low, Some(0.9));
    }

    #[test]
    fn test_switch_bull_from_bear_family() {
        let mas = Some((1.10, 1.12));
        let candles = vec![
            bar(0, 1.30, 1.10, 1.15, mas),
            bar(1, 1.20, 1.05, 1.08, mas),
            bar(2, 1.16, 1.09, 1.15, mas),
        ];
        let w = window(candles);
        let mut ctx = PhaseContext::new();

        assert_eq!(is_switch_bull(Phase::Neutral, &w, &mut ctx), RuleOutcome::NoMatch);
        assert_eq!(is_switch_bull(Phase::BaseBear, &w, &mut ctx), RuleOutcome::Match);
        // i=1: 1.05 < 1.10 -> initial index 1; previous high above 1.20 is 1.30
        assert_eq!(ctx.switch_pair(Direction::Bull), Some((1.05, 1.30)));
    }

    #[test]
    fn test_confirmation_bullish_rules() {
        let ctx = PhaseContext::new();
        let pullback = vec![
            bar(0, 1.20, 1.10, 1.15, None),
            bar(1, 1.19, 1.12, 1.16, Some((1.14, 1.13))),
        ];
        assert!(is_confirmation_bullish(Phase::SwitchBull, &pullback, &ctx));
        assert!(!is_confirmation_bullish(Phase::BaseBull, &pullback, &ctx));

        let new_high = vec![
            bar(0, 1.20, 1.10, 1.15, None),
            bar(1, 1.21, 1.12, 1.16, Some((1.14, 1.13))),
        ];
        assert!(!is_confirmation_bullish(Phase::TrendBull, &new_high, &ctx));

        let below_both = vec![
            bar(0, 1.20, 1.10, 1.15, None),
            bar(1, 1.19, 1.12, 1.12, Some((1.14, 1.13))),
        ];
        assert!(!is_confirmation_bullish(Phase::TrendBull, &below_both, &ctx));
    }

    #[test]
    fn test_confirmation_refused_while_one_is_live() {
        let candles = vec![
            bar(0, 1.20, 1.10, 1.15, None),
            bar(1, 1.19, 1.12, 1.16, Some((1.14, 1.13))),
        ];
        let mut ctx = PhaseContext::new();
        ctx.bullish.confirm(candles[0].clone());
        assert!(!is_confirmation_bullish(Phase::SwitchBull, &candles, &ctx));
    }

    #[test]
    fn test_confirmation_bearish_mirror() {
        let ctx = PhaseContext::new();
        let pullback = vec![
            bar(0, 1.20, 1.10, 1.15, None),
            bar(1, 1.18, 1.11, 1.14, Some((1.15, 1.16))),
        ];
        assert!(is_confirmation_bearish(Phase::TrendBear, &pullback, &ctx));

        let above_both = vec![
            bar(0, 1.20, 1.10, 1.15, None),
            bar(1, 1.18, 1.11, 1.17, Some((1.15, 1.16))),
        ];
        assert!(!is_confirmation_bearish(Phase::SwitchBear, &above_both, &ctx));

        assert!(is_confirmation(Direction::Bear, Phase::TrendBear, &pullback, &ctx));
        assert!(!is_confirmation(Direction::Bull, Phase::TrendBear, &pullback, &ctx));
    }

    #[test]
    fn test_base_switch_bull_finds_confirmation_after_breakout() {
        let mas = Some((1.10, 1.09));
        let candles = vec![
            bar(0, 1.20, 1.05, 1.10, mas), // pivot (initial low)
            bar(1, 1.22, 1.08, 1.21, mas), // breakout above 1.20
            bar(2, 1.25, 1.15, 1.24, mas), // new high: not a confirmation
            bar(3, 1.24, 1.16, 1.20, mas), // pullback above averages
        ];
        let w = window(candles.clone());
        let mut ctx = ctx_with(&candles);
        ctx.switch_bull_initial_low = Some(1.05);
        ctx.switch_bull_prev_higher_high = Some(1.20);

        let outcome = is_base_switch_bull(Phase::SwitchBull, &w, &mut ctx);

        assert_eq!(outcome, RuleOutcome::Match);
        assert_eq!(ctx.switch_bull_pivot, Some(candles[0].timestamp));
        assert_eq!(ctx.switch_bull_breakout, Some(candles[1].timestamp));
        assert_eq!(ctx.bullish().live_candle(), Some(&candles[3]));
    }

    #[test]
    fn test_base_switch_bull_caches_persist_without_confirmation() {
        let mas = Some((1.10, 1.09));
        let candles = vec![
            bar(0, 1.20, 1.05, 1.10, mas),
            bar(1, 1.22, 1.08, 1.21, mas),
        ];
        let w = window(candles.clone());
        let mut ctx = ctx_with(&candles);
        ctx.switch_bull_initial_low = Some(1.05);
        ctx.switch_bull_prev_higher_high = Some(1.20);

        assert_eq!(is_base_switch_bull(Phase::SwitchBull, &w, &mut ctx), RuleOutcome::NoMatch);
        assert_eq!(ctx.switch_bull_breakout, Some(candles[1].timestamp));
        assert!(!ctx.bullish().valid);
    }

    #[test]
    fn test_base_switch_cached_key_out_of_window_is_no_match() {
        let mas = Some((1.10, 1.09));
        let candles = vec![
            bar(5, 1.22, 1.08, 1.21, mas),
            bar(6, 1.21, 1.10, 1.18, mas),
        ];
        let w = window(candles.clone());
        let mut ctx = ctx_with(&candles);
        ctx.switch_bull_initial_low = Some(1.05);
        ctx.switch_bull_prev_higher_high = Some(1.20);
        ctx.switch_bull_pivot = Some(bar(0, 0.0, 0.0, 0.0, None).timestamp);

        assert_eq!(is_base_switch_bull(Phase::SwitchBull, &w, &mut ctx), RuleOutcome::NoMatch);
    }

    #[test]
    fn test_trend_bull_consumes_confirmation_and_forces_phase() {
        let candles = vec![
            bar(0, 1.20, 1.10, 1.15, None),
            bar(1, 1.19, 1.12, 1.16, None), // confirmation
            bar(2, 1.22, 1.15, 1.21, None), // close above 1.20
        ];
        let w = window(candles.clone());
        let mut ctx = ctx_with(&candles);
        ctx.bullish.confirm(candles[1].clone());

        let outcome = check_transition_to_trend_bull(Phase::BaseSwitchBull, &w, &mut ctx);

        assert_eq!(outcome, RuleOutcome::MatchAndForcePhase(Phase::TrendBull));
        assert!(!ctx.bullish().valid);
        assert!(ctx.bullish().candle.is_none());
    }

    #[test]
    fn test_trend_bear_needs_candle_before_confirmation() {
        let candles = vec![
            bar(0, 1.20, 1.10, 1.15, None), // confirmation with nothing before it
            bar(1, 1.12, 1.02, 1.05, None),
        ];
        let w = window(candles.clone());
        let mut ctx = ctx_with(&candles);
        ctx.bearish.confirm(candles[0].clone());

        assert_eq!(
            check_transition_to_trend_bear(Phase::BaseSwitchBear, &w, &mut ctx),
            RuleOutcome::NoMatch
        );
        assert!(ctx.bearish().valid);
    }

    #[test]
    fn test_trend_to_base_records_newest_candle() {
        let candles = vec![
            bar(0, 1.10, 1.00, 1.05, None),
            bar(1, 1.12, 1.03, 1.04, Some((1.06, 1.07))),
        ];
        let w = window(candles.clone());
        let mut ctx = ctx_with(&candles);

        assert_eq!(check_transition_to_base_bear(Phase::TrendBear, &w, &mut ctx), RuleOutcome::Match);
        assert_eq!(ctx.bearish().live_candle(), Some(&candles[1]));
    }
}
