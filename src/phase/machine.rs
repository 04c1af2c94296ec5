use super::conditions::RuleOutcome;
use super::rules::{PhaseRule, PHASE_RULES};
use super::{CandleWindow, Phase, PhaseContext};
use crate::models::{Candle, Direction};

/// Default number of candles a machine keeps in its window
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Phase state machine for one timeframe.
///
/// Feeds candles through the static rule table and applies the cleanup
/// protocol on every transition, whether the candles arrive one at a time
/// (`update_with_candle`) or in batches (`update`).
#[derive(Debug, Clone)]
pub struct PhaseStateMachine {
    rules: &'static [PhaseRule],
    context: PhaseContext,
    capacity: usize,
    generation: u64,
}

impl Default for PhaseStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl PhaseStateMachine {
    pub fn new(capacity: usize) -> Self {
        Self {
            rules: &PHASE_RULES,
            context: PhaseContext::new(),
            capacity: capacity.max(1),
            generation: 0,
        }
    }

    pub fn current_phase(&self) -> Phase {
        self.context.current_phase()
    }

    pub fn context(&self) -> &PhaseContext {
        &self.context
    }

    /// Evaluation passes run so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub(crate) fn context_mut(&mut self) -> &mut PhaseContext {
        &mut self.context
    }

    pub fn reset(&mut self) {
        self.context.reset();
    }

    /// Rebuild state from stored history, oldest candle first
    pub fn replay_from_scratch(&mut self, history: &[Candle]) -> Phase {
        self.context.reset();
        for candle in history {
            self.update_with_candle(candle.clone());
        }
        self.current_phase()
    }

    /// Append one closed candle and evaluate the rules against the new window.
    ///
    /// A candle that is not newer than the last one in the window is ignored.
    pub fn update_with_candle(&mut self, candle: Candle) -> Phase {
        if let Some(last) = self.context.last_candles.back() {
            if candle.timestamp <= last.timestamp {
                tracing::debug!(ts = %candle.timestamp, "Ignoring candle already in phase window");
                return self.current_phase();
            }
        }

        self.context.last_candles.push_back(candle);
        while self.context.last_candles.len() > self.capacity {
            self.context.last_candles.pop_front();
        }
        self.evaluate()
    }

    /// Fold a batch of closed candles, oldest first.
    ///
    /// Candles at or before the newest one already in the window are skipped,
    /// so overlapping batches are safe. Each new candle gets its own pass.
    pub fn update(&mut self, candles: &[Candle]) -> Phase {
        let newest = self.context.last_candles.back().map(|c| c.timestamp);
        let start = match newest {
            Some(ts) => candles.partition_point(|c| c.timestamp <= ts),
            None => 0,
        };
        for candle in &candles[start..] {
            self.update_with_candle(candle.clone());
        }
        self.current_phase()
    }

    fn evaluate(&mut self) -> Phase {
        self.generation += 1;
        let snapshot: Vec<Candle> = self.context.last_candles.iter().cloned().collect();
        let window = CandleWindow::new(snapshot, self.generation);
        let prev = self.current_phase();

        let rules = self.rules;
        for rule in rules.iter().filter(|r| r.from == prev) {
            let new_phase = match (rule.condition)(prev, &window, &mut self.context) {
                RuleOutcome::NoMatch => continue,
                RuleOutcome::Match => rule.to,
                RuleOutcome::MatchAndForcePhase(phase) => {
                    self.context.set_current_phase(phase);
                    phase
                }
            };

            if new_phase == prev {
                return prev;
            }

            apply_cleanup(&mut self.context, prev, new_phase, window.newest());
            self.context.set_current_phase(new_phase);
            tracing::info!(
                from = %prev,
                to = %new_phase,
                pass = window.generation(),
                ts = ?window.newest().map(|c| c.timestamp),
                "Phase transition"
            );
            return new_phase;
        }

        prev
    }
}

/// Context bookkeeping for a committed transition `prev -> new`
pub(crate) fn apply_cleanup(ctx: &mut PhaseContext, prev: Phase, new: Phase, newest: Option<&Candle>) {
    // Leaving a Switch phase other than into its own BaseSwitch
    if prev == Phase::SwitchBull && !matches!(new, Phase::SwitchBull | Phase::BaseSwitchBull) {
        ctx.clear_switch(Direction::Bull);
    }
    if prev == Phase::SwitchBear && !matches!(new, Phase::SwitchBear | Phase::BaseSwitchBear) {
        ctx.clear_switch(Direction::Bear);
    }

    // Entering a Switch phase displaces the opposite direction
    if new == Phase::SwitchBull {
        ctx.reset_switch_keys(Direction::Bull);
        ctx.clear_switch(Direction::Bear);
    }
    if new == Phase::SwitchBear {
        ctx.reset_switch_keys(Direction::Bear);
        ctx.clear_switch(Direction::Bull);
    }

    if prev.is_bull_family() && !new.is_bull_family() {
        ctx.bullish.reset();
    }
    if prev.is_bear_family() && !new.is_bear_family() {
        ctx.bearish.reset();
    }

    if matches!(prev, Phase::BaseSwitchBull | Phase::BaseBull) && new == Phase::TrendBull {
        ctx.bullish.reset();
    }
    if matches!(prev, Phase::BaseSwitchBear | Phase::BaseBear) && new == Phase::TrendBear {
        ctx.bearish.reset();
    }

    // Trend -> Base re-entry seeds the next Base -> Trend check
    if let Some(candle) = newest {
        if prev == Phase::TrendBull && new == Phase::BaseBull {
            ctx.bullish.confirm(candle.clone());
        }
        if prev == Phase::TrendBear && new == Phase::BaseBear {
            ctx.bearish.confirm(candle.clone());
        }
    }

    if !new.is_bull_family() {
        ctx.bullish.reset();
    }
    if !new.is_bear_family() {
        ctx.bearish.reset();
    }
}
