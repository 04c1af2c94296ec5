use crate::models::Candle;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketScenario {
    /// Rising swings: higher highs and higher lows
    Uptrend,
    /// Falling swings: lower highs and lower lows
    Downtrend,
    /// Mean-reverting chop around the base price
    Sideways,
    /// Large random swings
    Volatile,
}

impl MarketScenario {
    pub const ALL: [MarketScenario; 4] = [
        MarketScenario::Uptrend,
        MarketScenario::Downtrend,
        MarketScenario::Sideways,
        MarketScenario::Volatile,
    ];
}

impl fmt::Display for MarketScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarketScenario::Uptrend => "uptrend",
            MarketScenario::Downtrend => "downtrend",
            MarketScenario::Sideways => "sideways",
            MarketScenario::Volatile => "volatile",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for MarketScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uptrend" => Ok(MarketScenario::Uptrend),
            "downtrend" => Ok(MarketScenario::Downtrend),
            "sideways" => Ok(MarketScenario::Sideways),
            "volatile" => Ok(MarketScenario::Volatile),
            other => Err(format!("unknown scenario '{}'", other)),
        }
    }
}

/// Generates synthetic one-minute FX-style candles
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 1.1000,
            base_volume: 100.0,
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Generate candles for a specific market scenario
    ///
    /// # Arguments
    /// * `scenario` - The market scenario to simulate
    /// * `start` - Open time of the first candle
    /// * `num_candles` - Number of candles to generate
    /// * `interval_minutes` - Minutes between candles
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        start: DateTime<Utc>,
        num_candles: usize,
        interval_minutes: i64,
    ) -> Vec<Candle> {
        match scenario {
            MarketScenario::Uptrend => self.generate_swings(start, num_candles, interval_minutes, 1.0),
            MarketScenario::Downtrend => self.generate_swings(start, num_candles, interval_minutes, -1.0),
            MarketScenario::Sideways => self.generate_sideways(start, num_candles, interval_minutes),
            MarketScenario::Volatile => self.generate_volatile(start, num_candles, interval_minutes),
        }
    }

    /// Trend made of impulse legs and shallower pullbacks, so the averages
    /// get crossed and re-crossed the way real trends do
    fn generate_swings(
        &mut self,
        start: DateTime<Utc>,
        num_candles: usize,
        interval_minutes: i64,
        sign: f64,
    ) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;
        let mut leg_left = 0usize;
        let mut leg_step = 0.0;
        let mut impulse = false;

        for i in 0..num_candles {
            if leg_left == 0 {
                impulse = !impulse;
                leg_left = self.rng.gen_range(20..60);
                // ~3 pips per candle on impulse, ~1.5 back on pullbacks
                leg_step = if impulse {
                    sign * self.rng.gen_range(0.00002..0.00005)
                } else {
                    -sign * self.rng.gen_range(0.00001..0.00003)
                };
            }
            leg_left -= 1;

            let noise = self.rng.gen_range(-0.00008..0.00008);
            price = (price + leg_step + noise).max(self.base_price * 0.2);

            let timestamp = start + Duration::minutes(i as i64 * interval_minutes);
            candles.push(self.create_candle(price, timestamp));
        }

        candles
    }

    /// Generate sideways market: mean-reverting random walk
    fn generate_sideways(&mut self, start: DateTime<Utc>, num_candles: usize, interval_minutes: i64) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;
        let mean_price = self.base_price;

        for i in 0..num_candles {
            let timestamp = start + Duration::minutes(i as i64 * interval_minutes);

            // Mean reversion force + noise
            let reversion = (mean_price - price) * 0.05;
            let noise = self.rng.gen_range(-0.0002..0.0002);
            price += reversion + noise;

            candles.push(self.create_candle(price, timestamp));
        }

        candles
    }

    /// Generate volatile market: large swings
    fn generate_volatile(&mut self, start: DateTime<Utc>, num_candles: usize, interval_minutes: i64) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;

        for i in 0..num_candles {
            let timestamp = start + Duration::minutes(i as i64 * interval_minutes);

            let change = price * self.rng.gen_range(-0.0015..0.0015);
            price = (price + change).max(self.base_price * 0.5);

            candles.push(self.create_candle(price, timestamp));
        }

        candles
    }

    /// Helper to create a candle from close price and timestamp
    fn create_candle(&mut self, price: f64, timestamp: DateTime<Utc>) -> Candle {
        let wick = 0.0003;

        let high = price + self.rng.gen_range(0.0..wick);
        let low = price - self.rng.gen_range(0.0..wick);

        // Generate open and clamp it between low and high
        let open_raw = price + self.rng.gen_range(-wick..wick);
        let open = open_raw.clamp(low, high);

        // Vary volume ±30%
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        Candle::new(timestamp, open, high, low, price, volume)
    }
}
