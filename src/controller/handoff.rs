//! Hand-off rules between the three timeframes.
//!
//! Pure functions of the current phases and the direction the controller
//! entered with. The controller owns the state; these only decide.

use crate::models::{Direction, Timeframe};
use crate::phase::Phase;

/// Context may hand off once it sits in a Base or Trend phase
pub fn can_context_to_confirmation(context: Phase) -> bool {
    context.is_base() || context.is_trend()
}

/// Confirmation may hand off when context and confirmation are both in a Base
/// phase of the same direction
pub fn can_confirmation_to_entry(context: Phase, confirmation: Phase) -> bool {
    context.is_base() && confirmation.is_base() && context.direction() == confirmation.direction()
}

/// Back from confirmation to context when context no longer points the way
/// we entered, or confirmation disagrees with context
pub fn should_return_to_context(
    context: Phase,
    entered: Option<Direction>,
    confirmation_direction: Option<Direction>,
) -> bool {
    if entered.is_none() {
        return false;
    }
    context.direction() != entered || confirmation_direction != context.direction()
}

/// Back from entry when confirmation left the Base family, or its direction
/// disagrees with the entered direction or with context
pub fn should_return_to_confirmation(
    confirmation: Phase,
    entered: Option<Direction>,
    context_direction: Option<Direction>,
) -> bool {
    if entered.is_none() {
        return false;
    }
    if !confirmation.is_base() {
        return true;
    }
    confirmation.direction() != entered || context_direction != confirmation.direction()
}

/// Where a forced return from the entry timeframe lands
pub fn return_target_from_entry(context: Phase, confirmation: Phase) -> Timeframe {
    if confirmation.is_base() && confirmation.direction() != context.direction() {
        Timeframe::Context
    } else {
        Timeframe::Confirmation
    }
}

/// Active timeframe implied by the phases alone
pub fn active_timeframe_for(context: Phase, confirmation: Phase) -> Timeframe {
    if can_confirmation_to_entry(context, confirmation) {
        Timeframe::Entry
    } else if can_context_to_confirmation(context) {
        Timeframe::Confirmation
    } else {
        Timeframe::Context
    }
}

/// Both phases are Base phases of `direction` (entry gating)
pub fn aligned_base(context: Phase, confirmation: Phase, direction: Direction) -> bool {
    let allowed = match direction {
        Direction::Bull => [Phase::BaseBull, Phase::BaseSwitchBull],
        Direction::Bear => [Phase::BaseBear, Phase::BaseSwitchBear],
    };
    allowed.contains(&context) && allowed.contains(&confirmation)
}
