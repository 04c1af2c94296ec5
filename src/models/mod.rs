use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// OHLCV candlestick with the two moving averages the phase rules read.
///
/// Price fields never change once the candle is in a history buffer. The
/// averages are filled in by the owning history when enough lookback exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            ema_fast: None,
            ema_slow: None,
        }
    }

    /// Both averages, or None while either is still warming up
    pub fn averages(&self) -> Option<(f64, f64)> {
        Some((self.ema_fast?, self.ema_slow?))
    }

    /// Same bar without the derived average fields
    pub fn stripped(&self) -> Self {
        Self {
            ema_fast: None,
            ema_slow: None,
            ..self.clone()
        }
    }
}

/// Raw bar as delivered by a broker feed (unix seconds, optional tick volume)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: Option<f64>,
}

/// Convert raw feed rows into typed candles.
///
/// This is the only place raw input becomes a `Candle`: rows are sorted by
/// time, duplicate timestamps keep the last row, and rows with an
/// unrepresentable timestamp are dropped.
pub fn candles_from_raw(rows: &[RawBar]) -> Vec<Candle> {
    let mut sorted: Vec<&RawBar> = rows.iter().collect();
    sorted.sort_by_key(|r| r.time);

    let mut candles: Vec<Candle> = Vec::with_capacity(sorted.len());
    for row in sorted {
        let Some(timestamp) = Utc.timestamp_opt(row.time, 0).single() else {
            tracing::warn!(time = row.time, "Dropping bar with invalid timestamp");
            continue;
        };
        let candle = Candle::new(
            timestamp,
            row.open,
            row.high,
            row.low,
            row.close,
            row.tick_volume.unwrap_or(0.0),
        );
        match candles.last_mut() {
            Some(last) if last.timestamp == timestamp => *last = candle,
            _ => candles.push(candle),
        }
    }
    candles
}

/// The three nested timeframes, slowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// K: slowest, decides the overall direction
    Context,
    /// B: middle, waits for a base in the context direction
    Confirmation,
    /// E: fastest, the only timeframe that places orders
    Entry,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::Context, Timeframe::Confirmation, Timeframe::Entry];

    pub fn index(self) -> usize {
        match self {
            Timeframe::Context => 0,
            Timeframe::Confirmation => 1,
            Timeframe::Entry => 2,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Context => write!(f, "K"),
            Timeframe::Confirmation => write!(f, "B"),
            Timeframe::Entry => write!(f, "E"),
        }
    }
}

/// Market direction of a phase family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bull,
    Bear,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Bull => Direction::Bear,
            Direction::Bear => Direction::Bull,
        }
    }

    /// Order side that trades in this direction
    pub fn side(self) -> Side {
        match self {
            Direction::Bull => Side::Buy,
            Direction::Bear => Side::Sell,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bull => write!(f, "bull"),
            Direction::Bear => write!(f, "bear"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn direction(self) -> Direction {
        match self {
            Side::Buy => Direction::Bull,
            Side::Sell => Direction::Bear,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Best bid/ask for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

/// Instrument metadata the entry and risk arithmetic needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub symbol: String,
    pub tick_size: f64,
    /// Broker minimum stop distance in points (0 when not reported)
    pub stop_level_points: u32,
    /// Contract spread in price units
    pub spread: f64,
    /// Account-currency value of one tick per lot
    pub tick_value: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
}

impl SymbolSpec {
    /// Broker minimum stop distance in price units (0 when not reported)
    pub fn stop_level_distance(&self) -> f64 {
        self.stop_level_points as f64 * self.tick_size
    }
}

/// Pending stop order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOrderRequest {
    pub client_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub volume: f64,
    pub stop_loss: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub ticket: u64,
    pub accepted: bool,
}

/// Stop order waiting at the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub volume: f64,
    pub stop_loss: f64,
    pub placed_at: DateTime<Utc>,
}

/// Filled position as reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub volume: f64,
    pub stop_loss: f64,
    pub opened_at: DateTime<Utc>,
}

/// Position closed by the broker (stop hit), kept for metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub volume: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl ClosedTrade {
    /// Price-unit profit per unit volume (positive when the trade made money)
    pub fn price_pnl(&self) -> f64 {
        match self.side {
            Side::Buy => self.exit_price - self.entry_price,
            Side::Sell => self.entry_price - self.exit_price,
        }
    }
}
