// Phase classification: context, rule table and the state machine driving it

pub mod conditions;
pub mod confirmation;
pub mod context;
pub mod machine;
pub mod rules;
pub mod window;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Direction;

pub use conditions::RuleOutcome;
pub use confirmation::Confirmation;
pub use context::{PhaseContext, SwitchExtrema};
pub use machine::PhaseStateMachine;
pub use rules::{PhaseRule, PHASE_RULES};
pub use window::CandleWindow;

/// Market phase of one timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Neutral,
    SwitchBull,
    BaseSwitchBull,
    TrendBull,
    BaseBull,
    SwitchBear,
    BaseSwitchBear,
    TrendBear,
    BaseBear,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::Neutral,
        Phase::SwitchBull,
        Phase::BaseSwitchBull,
        Phase::TrendBull,
        Phase::BaseBull,
        Phase::SwitchBear,
        Phase::BaseSwitchBear,
        Phase::TrendBear,
        Phase::BaseBear,
    ];

    /// Directional family, None for Neutral
    pub fn direction(self) -> Option<Direction> {
        match self {
            Phase::Neutral => None,
            Phase::SwitchBull | Phase::BaseSwitchBull | Phase::TrendBull | Phase::BaseBull => {
                Some(Direction::Bull)
            }
            Phase::SwitchBear | Phase::BaseSwitchBear | Phase::TrendBear | Phase::BaseBear => {
                Some(Direction::Bear)
            }
        }
    }

    pub fn is_bull_family(self) -> bool {
        self.direction() == Some(Direction::Bull)
    }

    pub fn is_bear_family(self) -> bool {
        self.direction() == Some(Direction::Bear)
    }

    /// BaseSwitch and Base phases of either direction
    pub fn is_base(self) -> bool {
        matches!(
            self,
            Phase::BaseSwitchBull | Phase::BaseBull | Phase::BaseSwitchBear | Phase::BaseBear
        )
    }

    pub fn is_trend(self) -> bool {
        matches!(self, Phase::TrendBull | Phase::TrendBear)
    }

    pub fn is_switch(self) -> bool {
        matches!(self, Phase::SwitchBull | Phase::SwitchBear)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Neutral => "NEUTRAL",
            Phase::SwitchBull => "SWITCH_BULL",
            Phase::BaseSwitchBull => "BASE_SWITCH_BULL",
            Phase::TrendBull => "TREND_BULL",
            Phase::BaseBull => "BASE_BULL",
            Phase::SwitchBear => "SWITCH_BEAR",
            Phase::BaseSwitchBear => "BASE_SWITCH_BEAR",
            Phase::TrendBear => "TREND_BEAR",
            Phase::BaseBear => "BASE_BEAR",
        };
        write!(f, "{}", name)
    }
}
