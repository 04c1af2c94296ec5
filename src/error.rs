use thiserror::Error;

/// Errors surfaced by the bot.
///
/// Rule and predicate failures inside the phase machine are not errors: they
/// resolve to "no transition". Only broker-side failures and startup
/// configuration problems end up here.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("broker rejected {action} for {symbol}: {reason}")]
    BrokerRejection {
        action: String,
        symbol: String,
        reason: String,
    },

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("invalid order parameters: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl BotError {
    pub fn rejection(action: &str, symbol: &str, reason: impl Into<String>) -> Self {
        BotError::BrokerRejection {
            action: action.to_string(),
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, BotError::BrokerRejection { .. })
    }
}
