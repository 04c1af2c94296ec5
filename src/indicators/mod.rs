// Technical indicators module
// Moving averages feeding the phase rules

pub mod moving_average;

pub use moving_average::{calculate_ema, calculate_sma, calculate_windowed_ema, MovingAverageKind};
