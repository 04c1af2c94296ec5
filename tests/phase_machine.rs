use chrono::{DateTime, Duration, TimeZone, Utc};
use phasebot::history::{CandleHistory, MovingAverageSettings};
use phasebot::indicators::MovingAverageKind;
use phasebot::{Candle, Direction, Phase, PhaseStateMachine};
use proptest::prelude::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
}

/// Candle with fixed averages (fast 1.00, slow 0.99)
fn bar(i: i64, high: f64, low: f64, close: f64) -> Candle {
    let mut c = Candle::new(t0() + Duration::minutes(i), close, high, low, close, 100.0);
    c.ema_fast = Some(1.00);
    c.ema_slow = Some(0.99);
    c
}

/// Neutral -> SwitchBull -> BaseSwitchBull -> TrendBull -> BaseBull -> SwitchBear
fn bull_cycle() -> Vec<Candle> {
    vec![
        bar(0, 1.05, 0.95, 0.98),
        bar(1, 1.02, 0.90, 0.95),
        bar(2, 1.00, 0.92, 0.97),
        bar(3, 1.06, 0.96, 1.05),
        bar(4, 1.08, 1.01, 1.07),
        bar(5, 1.07, 1.02, 1.04),
        bar(6, 1.11, 1.05, 1.10),
        bar(7, 1.10, 1.06, 1.08),
        bar(8, 1.09, 0.95, 0.97),
    ]
}

#[test]
fn test_full_bull_cycle() {
    let candles = bull_cycle();
    let mut machine = PhaseStateMachine::new(100);

    let phases: Vec<Phase> = candles
        .iter()
        .map(|c| machine.update_with_candle(c.clone()))
        .collect();

    assert_eq!(
        phases,
        vec![
            Phase::Neutral,
            Phase::Neutral,
            Phase::Neutral,
            Phase::SwitchBull,
            Phase::SwitchBull,
            Phase::BaseSwitchBull,
            Phase::TrendBull,
            Phase::BaseBull,
            Phase::SwitchBear,
        ]
    );

    let ctx = machine.context();
    assert_eq!(ctx.switch_pair(Direction::Bear), Some((1.11, 1.02)));
    assert_eq!(ctx.switch_pair(Direction::Bull), None);
    assert!(!ctx.bullish().valid);
}

#[test]
fn test_breakdown_without_extremum_stays_neutral() {
    let candles = bull_cycle();
    let mut machine = PhaseStateMachine::new(100);
    for c in &candles[..3] {
        machine.update_with_candle(c.clone());
    }

    // c2 closes below both averages but no lower low precedes the peak
    assert_eq!(machine.current_phase(), Phase::Neutral);
    let extrema = machine.context().switch_extrema();
    assert_eq!(extrema.bear_initial_high, None);
    assert_eq!(extrema.bear_prev_lower_low, None);
}

#[test]
fn test_switch_extrema_and_confirmation_along_the_cycle() {
    let candles = bull_cycle();
    let mut machine = PhaseStateMachine::new(100);

    for c in &candles[..4] {
        machine.update_with_candle(c.clone());
    }
    assert_eq!(machine.context().switch_pair(Direction::Bull), Some((0.90, 1.05)));
    assert!(!machine.context().bullish().valid);

    machine.update_with_candle(candles[4].clone());
    machine.update_with_candle(candles[5].clone());
    assert_eq!(machine.current_phase(), Phase::BaseSwitchBull);
    assert_eq!(
        machine.context().bullish().live_candle().map(|c| c.timestamp),
        Some(candles[5].timestamp)
    );
}

#[test]
fn test_base_to_trend_keeps_switch_extrema() {
    let candles = bull_cycle();
    let mut machine = PhaseStateMachine::new(100);
    for c in &candles[..7] {
        machine.update_with_candle(c.clone());
    }

    assert_eq!(machine.current_phase(), Phase::TrendBull);
    // Confirmation consumed, extrema still in place
    assert!(!machine.context().bullish().valid);
    assert_eq!(machine.context().switch_pair(Direction::Bull), Some((0.90, 1.05)));

    machine.update_with_candle(candles[7].clone());
    assert_eq!(machine.current_phase(), Phase::BaseBull);
    assert_eq!(
        machine.context().bullish().live_candle().map(|c| c.timestamp),
        Some(candles[7].timestamp)
    );
}

#[test]
fn test_replay_matches_streaming_on_the_cycle() {
    let candles = bull_cycle();
    let mut streaming = PhaseStateMachine::new(100);
    for c in &candles {
        streaming.update_with_candle(c.clone());
    }

    let mut replayed = PhaseStateMachine::new(100);
    replayed.update_with_candle(candles[0].clone());
    assert_eq!(replayed.replay_from_scratch(&candles), Phase::SwitchBear);
    assert_eq!(replayed.context(), streaming.context());
}

#[test]
fn test_reset_forgets_everything() {
    let mut machine = PhaseStateMachine::new(100);
    for c in bull_cycle() {
        machine.update_with_candle(c);
    }
    machine.reset();
    assert_eq!(machine.current_phase(), Phase::Neutral);
    assert!(machine.context().last_candles().is_empty());
    assert_eq!(machine.context().switch_pair(Direction::Bear), None);
}

/// Random walk annotated by a real history buffer
fn annotated(steps: &[(i32, u8)], kind: MovingAverageKind) -> Vec<Candle> {
    let mut history = CandleHistory::new(
        steps.len() + 1,
        MovingAverageSettings {
            fast_period: 3,
            slow_period: 6,
            kind,
        },
    );
    let mut price = 1.1000;
    for (i, (delta, wick)) in steps.iter().enumerate() {
        let open = price;
        price += *delta as f64 * 0.0001;
        let w = *wick as f64 * 0.00005;
        history.push(Candle::new(
            t0() + Duration::minutes(i as i64),
            open,
            open.max(price) + w,
            open.min(price) - w,
            price,
            100.0,
        ));
    }
    history.to_vec()
}

fn kind_strategy() -> impl Strategy<Value = MovingAverageKind> {
    prop_oneof![Just(MovingAverageKind::Ema), Just(MovingAverageKind::Windowed)]
}

/// Split `len` candles into batches at the given cut points, each batch
/// reaching back `overlap` candles into the previous one
fn batches(len: usize, cuts: &[usize], overlap: usize) -> Vec<(usize, usize)> {
    let mut ends: Vec<usize> = cuts.iter().map(|c| c % (len + 1)).collect();
    ends.push(len);
    ends.sort_unstable();
    ends.dedup();

    let mut out = Vec::new();
    let mut prev_end: usize = 0;
    for end in ends {
        out.push((prev_end.saturating_sub(overlap), end));
        prev_end = end;
    }
    out
}

fn assert_pair_pinned(
    phase: Phase,
    pair: Option<(f64, f64)>,
    pinned: &mut Option<(f64, f64)>,
    entered_switch: bool,
    direction: Direction,
) -> Result<(), TestCaseError> {
    let in_family = match direction {
        Direction::Bull => phase.is_bull_family(),
        Direction::Bear => phase.is_bear_family(),
    };
    if entered_switch {
        prop_assert!(pair.is_some(), "{} switch entered without extrema", direction);
        *pinned = pair;
    } else if in_family {
        prop_assert_eq!(pair, *pinned, "{} extrema moved in {}", direction, phase);
    } else {
        prop_assert_eq!(pair, None, "{} extrema survived into {}", direction, phase);
        *pinned = None;
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_replay_equals_streaming(
        steps in prop::collection::vec((-30i32..30, 0u8..20), 3..150),
        kind in kind_strategy(),
        capacity in 10usize..120,
    ) {
        let candles = annotated(&steps, kind);

        let mut streaming = PhaseStateMachine::new(capacity);
        for c in &candles {
            streaming.update_with_candle(c.clone());
        }

        let mut replayed = PhaseStateMachine::new(capacity);
        replayed.replay_from_scratch(&candles);

        prop_assert_eq!(replayed.current_phase(), streaming.current_phase());
        prop_assert_eq!(replayed.context(), streaming.context());
    }

    #[test]
    fn prop_batch_update_equals_streaming(
        steps in prop::collection::vec((-30i32..30, 0u8..20), 3..150),
        kind in kind_strategy(),
        capacity in 10usize..120,
        cuts in prop::collection::vec(0usize..200, 0..8),
        overlap in 0usize..5,
    ) {
        let candles = annotated(&steps, kind);

        let mut streaming = PhaseStateMachine::new(capacity);
        let mut batched = PhaseStateMachine::new(capacity);
        let mut fed = 0;
        for (start, end) in batches(candles.len(), &cuts, overlap) {
            for c in &candles[fed..end] {
                streaming.update_with_candle(c.clone());
            }
            fed = end;

            let phase = batched.update(&candles[start..end]);
            prop_assert_eq!(phase, streaming.current_phase());
            prop_assert_eq!(batched.context().switch_extrema(), streaming.context().switch_extrema());
        }

        prop_assert_eq!(batched.context(), streaming.context());
    }

    #[test]
    fn prop_switch_extrema_are_pinned_while_the_family_holds(
        steps in prop::collection::vec((-30i32..30, 0u8..20), 3..200),
        kind in kind_strategy(),
    ) {
        let candles = annotated(&steps, kind);
        let mut machine = PhaseStateMachine::new(100);
        let mut prev = machine.current_phase();
        let mut pinned_bull = None;
        let mut pinned_bear = None;

        for c in candles {
            let phase = machine.update_with_candle(c);
            let ctx = machine.context();

            assert_pair_pinned(
                phase,
                ctx.switch_pair(Direction::Bull),
                &mut pinned_bull,
                phase == Phase::SwitchBull && prev != Phase::SwitchBull,
                Direction::Bull,
            )?;
            assert_pair_pinned(
                phase,
                ctx.switch_pair(Direction::Bear),
                &mut pinned_bear,
                phase == Phase::SwitchBear && prev != Phase::SwitchBear,
                Direction::Bear,
            )?;
            prev = phase;
        }
    }

    #[test]
    fn prop_confirmations_follow_the_phase_family(
        steps in prop::collection::vec((-30i32..30, 0u8..20), 3..150),
        kind in kind_strategy(),
    ) {
        let candles = annotated(&steps, kind);
        let mut machine = PhaseStateMachine::new(100);

        for c in candles {
            let phase = machine.update_with_candle(c);
            let ctx = machine.context();

            prop_assert!(!(ctx.bullish().valid && ctx.bearish().valid));
            if ctx.bullish().valid {
                prop_assert!(phase.is_bull_family(), "bullish confirmation live in {}", phase);
            }
            if ctx.bearish().valid {
                prop_assert!(phase.is_bear_family(), "bearish confirmation live in {}", phase);
            }
            if matches!(phase, Phase::SwitchBull | Phase::BaseSwitchBull) {
                prop_assert!(ctx.switch_pair(Direction::Bull).is_some());
            }
            if matches!(phase, Phase::SwitchBear | Phase::BaseSwitchBear) {
                prop_assert!(ctx.switch_pair(Direction::Bear).is_some());
            }
        }
    }
}
