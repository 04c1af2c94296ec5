use serde::{Deserialize, Serialize};

use crate::models::Candle;

/// A recognised confirmation candle that has not been consumed yet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub valid: bool,
    pub candle: Option<Candle>,
}

impl Confirmation {
    pub fn confirm(&mut self, candle: Candle) {
        self.valid = true;
        self.candle = Some(candle);
    }

    pub fn reset(&mut self) {
        self.valid = false;
        self.candle = None;
    }

    /// The confirmation candle, only while the confirmation is live
    pub fn live_candle(&self) -> Option<&Candle> {
        if self.valid {
            self.candle.as_ref()
        } else {
            None
        }
    }
}
