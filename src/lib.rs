// Core modules
pub mod backtest;
pub mod broker;
pub mod config;
pub mod controller;
pub mod engine;
pub mod entry;
pub mod error;
pub mod history;
pub mod indicators;
pub mod models;
pub mod phase;
pub mod risk;

// Re-export commonly used types
pub use broker::{Broker, PaperBroker};
pub use controller::{ControllerEvent, ControllerSettings, MultiTimeframeController};
pub use engine::{PollingLoop, StopHandle};
pub use error::BotError;
pub use models::*;
pub use phase::{Phase, PhaseStateMachine};

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
