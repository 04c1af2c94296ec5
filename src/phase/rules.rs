use super::conditions::{
    check_transition_to_base_bear, check_transition_to_base_bull, check_transition_to_trend_bear,
    check_transition_to_trend_bull, is_base_switch_bear, is_base_switch_bull, is_switch_bear,
    is_switch_bull, neutral_to_switch_bear, neutral_to_switch_bull, RuleOutcome,
};
use super::{CandleWindow, Phase, PhaseContext};

pub type Condition = fn(Phase, &CandleWindow, &mut PhaseContext) -> RuleOutcome;

/// One edge of the transition graph
#[derive(Clone, Copy)]
pub struct PhaseRule {
    pub from: Phase,
    pub to: Phase,
    pub condition: Condition,
}

impl std::fmt::Debug for PhaseRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRule")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

const fn rule(from: Phase, to: Phase, condition: Condition) -> PhaseRule {
    PhaseRule { from, to, condition }
}

/// Static rule table, evaluated in order; the first match wins
pub static PHASE_RULES: [PhaseRule; 18] = [
    rule(Phase::Neutral, Phase::SwitchBull, neutral_to_switch_bull),
    rule(Phase::Neutral, Phase::SwitchBear, neutral_to_switch_bear),
    rule(Phase::BaseSwitchBear, Phase::SwitchBull, is_switch_bull),
    rule(Phase::SwitchBear, Phase::SwitchBull, is_switch_bull),
    rule(Phase::TrendBear, Phase::SwitchBull, is_switch_bull),
    rule(Phase::BaseBear, Phase::SwitchBull, is_switch_bull),
    rule(Phase::BaseSwitchBull, Phase::SwitchBear, is_switch_bear),
    rule(Phase::SwitchBull, Phase::SwitchBear, is_switch_bear),
    rule(Phase::TrendBull, Phase::SwitchBear, is_switch_bear),
    rule(Phase::BaseBull, Phase::SwitchBear, is_switch_bear),
    rule(Phase::BaseSwitchBull, Phase::TrendBull, check_transition_to_trend_bull),
    rule(Phase::BaseBull, Phase::TrendBull, check_transition_to_trend_bull),
    rule(Phase::BaseSwitchBear, Phase::TrendBear, check_transition_to_trend_bear),
    rule(Phase::BaseBear, Phase::TrendBear, check_transition_to_trend_bear),
    rule(Phase::TrendBull, Phase::BaseBull, check_transition_to_base_bull),
    rule(Phase::TrendBear, Phase::BaseBear, check_transition_to_base_bear),
    rule(Phase::SwitchBull, Phase::BaseSwitchBull, is_base_switch_bull),
    rule(Phase::SwitchBear, Phase::BaseSwitchBear, is_base_switch_bear),
];

/// Rules leaving `phase`, in priority order
pub fn rules_from(phase: Phase) -> impl Iterator<Item = &'static PhaseRule> {
    PHASE_RULES.iter().filter(move |r| r.from == phase)
}
