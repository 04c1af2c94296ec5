// Configuration: layered TOML file + PHASEBOT__* environment overrides

use chrono::Duration;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::backtest::BacktestConfig;
use crate::controller::ControllerSettings;
use crate::entry::{EntryLogic, TradingWindow, DEFAULT_STOP_LEVEL_POINTS};
use crate::error::BotError;
use crate::history::MovingAverageSettings;
use crate::models::SymbolSpec;
use crate::risk::{RiskManager, RiskSettings};
use crate::Result;

/// File looked up when no explicit path is given
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "PHASEBOT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeframeSettings {
    pub context_minutes: i64,
    pub confirmation_minutes: i64,
    pub entry_minutes: i64,
    /// Candles kept per timeframe
    pub history_limit: usize,
}

impl Default for TimeframeSettings {
    fn default() -> Self {
        Self {
            context_minutes: 60,
            confirmation_minutes: 15,
            entry_minutes: 1,
            history_limit: 100,
        }
    }
}

impl TimeframeSettings {
    pub fn minutes(&self) -> [i64; 3] {
        [self.context_minutes, self.confirmation_minutes, self.entry_minutes]
    }

    pub fn durations(&self) -> [Duration; 3] {
        self.minutes().map(Duration::minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntrySettings {
    /// Stop distance in points when the broker reports a stop level of 0
    pub default_stop_level_points: u32,
    /// IANA name the trading windows are expressed in
    pub timezone: String,
    /// "HH:MM-HH:MM", inclusive on both ends
    pub windows: Vec<String>,
}

impl Default for EntrySettings {
    fn default() -> Self {
        Self {
            default_stop_level_points: DEFAULT_STOP_LEVEL_POINTS,
            timezone: "Europe/Berlin".to_string(),
            windows: vec![
                "08:00-12:00".to_string(),
                "13:00-15:00".to_string(),
                "15:00-20:00".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupSettings {
    pub cancel_stale_orders: bool,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            cancel_stale_orders: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub poll_interval_ms: u64,
    /// Log a controller summary every N polls (0 disables)
    pub summary_every: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            summary_every: 60,
        }
    }
}

impl EngineSettings {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

/// Instrument parameters for the paper broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperSettings {
    pub tick_size: f64,
    pub stop_level_points: u32,
    pub spread: f64,
    pub tick_value: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    /// Starting price of the synthetic feed
    pub base_price: f64,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            tick_size: 0.00001,
            stop_level_points: 0,
            spread: 0.00010,
            tick_value: 1.0,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            base_price: 1.1000,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub symbols: Vec<String>,
    pub timeframes: TimeframeSettings,
    pub indicators: MovingAverageSettings,
    pub risk: RiskSettings,
    pub entry: EntrySettings,
    pub startup: StartupSettings,
    pub engine: EngineSettings,
    pub paper: PaperSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbols: vec!["EURUSD".to_string()],
            timeframes: TimeframeSettings::default(),
            indicators: MovingAverageSettings::default(),
            risk: RiskSettings::default(),
            entry: EntrySettings::default(),
            startup: StartupSettings::default(),
            engine: EngineSettings::default(),
            paper: PaperSettings::default(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("symbols")
        .with_list_parse_key("entry.windows")
}

impl Settings {
    /// Load settings from an optional TOML file, then the environment.
    ///
    /// An explicit `path` must exist; without one, `config/default.toml` is
    /// used when present. `PHASEBOT__RISK__ACCOUNT_BALANCE=5000` style
    /// variables override the file. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(environment())
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        tracing::info!(
            symbols = ?settings.symbols,
            timeframes = ?settings.timeframes.minutes(),
            "Configuration loaded"
        );
        Ok(settings)
    }

    /// Parse and validate settings from TOML text, without the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() || self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(invalid("at least one non-empty symbol is required"));
        }

        let ma = &self.indicators;
        if ma.fast_period == 0 || ma.slow_period == 0 {
            return Err(invalid("moving average periods must be positive"));
        }
        if ma.fast_period >= ma.slow_period {
            return Err(invalid(format!(
                "fast period ({}) must be shorter than slow period ({})",
                ma.fast_period, ma.slow_period
            )));
        }

        let tf = &self.timeframes;
        if tf.minutes().iter().any(|m| *m <= 0) {
            return Err(invalid("timeframe minutes must be positive"));
        }
        if !(tf.context_minutes > tf.confirmation_minutes && tf.confirmation_minutes > tf.entry_minutes) {
            return Err(invalid(
                "timeframes must be ordered context > confirmation > entry",
            ));
        }
        if tf.context_minutes % tf.entry_minutes != 0 || tf.confirmation_minutes % tf.entry_minutes != 0 {
            return Err(invalid("context and confirmation must be multiples of the entry timeframe"));
        }
        if tf.history_limit < 3 {
            return Err(invalid("history_limit must be at least 3"));
        }

        let risk = &self.risk;
        if !(risk.max_risk_per_trade > 0.0 && risk.max_risk_per_trade <= 1.0) {
            return Err(invalid(format!(
                "max_risk_per_trade must be in (0, 1], got {}",
                risk.max_risk_per_trade
            )));
        }
        if risk.account_balance <= 0.0 {
            return Err(invalid("account_balance must be positive"));
        }
        if matches!(risk.risk_amount, Some(a) if a <= 0.0) {
            return Err(invalid("risk_amount must be positive when set"));
        }
        if risk.breakeven_fallback_pips < 0.0 {
            return Err(invalid("breakeven_fallback_pips must not be negative"));
        }

        self.trading_window()?;

        if self.engine.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be positive"));
        }

        let paper = &self.paper;
        if paper.tick_size <= 0.0 || paper.volume_step <= 0.0 || paper.volume_min > paper.volume_max {
            return Err(invalid("paper symbol parameters are inconsistent"));
        }

        Ok(())
    }

    pub fn trading_window(&self) -> Result<TradingWindow> {
        TradingWindow::parse(&self.entry.timezone, &self.entry.windows)
    }

    pub fn entry_logic(&self) -> Result<EntryLogic> {
        Ok(EntryLogic::new(
            self.trading_window()?,
            self.entry.default_stop_level_points,
        ))
    }

    pub fn risk_manager(&self) -> RiskManager {
        RiskManager::new(self.risk.clone())
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            history_limit: self.timeframes.history_limit,
            averages: self.indicators,
            entry_candle: Duration::minutes(self.timeframes.entry_minutes),
            cancel_stale_orders: self.startup.cancel_stale_orders,
        }
    }

    pub fn symbol_spec(&self, symbol: &str) -> SymbolSpec {
        let p = &self.paper;
        SymbolSpec {
            symbol: symbol.to_string(),
            tick_size: p.tick_size,
            stop_level_points: p.stop_level_points,
            spread: p.spread,
            tick_value: p.tick_value,
            volume_min: p.volume_min,
            volume_max: p.volume_max,
            volume_step: p.volume_step,
        }
    }

    /// Replay configuration for the first configured symbol
    pub fn backtest_config(&self) -> Result<BacktestConfig> {
        let symbol = self
            .symbols
            .first()
            .ok_or_else(|| invalid("at least one non-empty symbol is required"))?;
        Ok(BacktestConfig {
            spec: self.symbol_spec(symbol),
            timeframe_minutes: self.timeframes.minutes(),
            controller: self.controller_settings(),
            entry: self.entry_logic()?,
            risk: self.risk.clone(),
            ..BacktestConfig::default()
        })
    }
}

fn invalid(msg: impl Into<String>) -> BotError {
    BotError::Configuration(msg.into())
}
