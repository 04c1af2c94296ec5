// Offline replay: synthetic data, timeframe aggregation, runner and metrics

pub mod aggregate;
pub mod metrics;
pub mod runner;
pub mod synthetic;

pub use aggregate::aggregate;
pub use metrics::{BacktestMetrics, TradeRecord};
pub use runner::{BacktestConfig, BacktestReport, BacktestRunner};
pub use synthetic::{MarketScenario, SyntheticDataGenerator};
