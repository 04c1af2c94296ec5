//! Deterministic in-memory broker.
//!
//! Serves pre-loaded candle series as if they were closing in real time
//! (`advance_to` moves the clock), fills stop orders when an entry-timeframe
//! candle trades through the order price and closes positions when a candle
//! touches their stop. No randomness, no network I/O.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::Broker;
use crate::error::BotError;
use crate::models::{
    Candle, ClosedTrade, OpenPosition, OrderReceipt, PendingOrder, Quote, Side, StopOrderRequest,
    SymbolSpec, Timeframe,
};
use crate::Result;

#[derive(Debug, Default)]
struct PaperState {
    now: Option<DateTime<Utc>>,
    series: HashMap<(String, Timeframe), Vec<Candle>>,
    specs: HashMap<String, SymbolSpec>,
    orders: Vec<PendingOrder>,
    positions: Vec<OpenPosition>,
    closed: Vec<ClosedTrade>,
    next_ticket: u64,
    /// Entry candles already used for fills/stops, per symbol
    processed_until: HashMap<String, DateTime<Utc>>,
    reject_modifications: u32,
}

/// Paper broker shared behind `&self`
#[derive(Debug)]
pub struct PaperBroker {
    durations: [Duration; 3],
    state: Mutex<PaperState>,
}

impl PaperBroker {
    /// `durations` are the candle lengths of context, confirmation and entry
    pub fn new(durations: [Duration; 3]) -> Self {
        Self {
            durations,
            state: Mutex::new(PaperState {
                next_ticket: 1,
                ..PaperState::default()
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, PaperState>> {
        self.state
            .lock()
            .map_err(|_| BotError::BrokerUnavailable("paper broker state poisoned".to_string()))
    }

    pub fn duration(&self, timeframe: Timeframe) -> Duration {
        self.durations[timeframe.index()]
    }

    pub fn add_symbol(&self, spec: SymbolSpec) -> Result<()> {
        let mut state = self.state()?;
        state.specs.insert(spec.symbol.clone(), spec);
        Ok(())
    }

    /// Load a full candle series (oldest first) for one timeframe
    pub fn load_series(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) -> Result<()> {
        let mut state = self.state()?;
        state.series.insert((symbol.to_string(), timeframe), candles);
        Ok(())
    }

    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.state().ok().and_then(|s| s.now)
    }

    /// Move the simulated clock forward and settle fills and stop hits on
    /// every entry candle that closed in the meantime.
    pub fn advance_to(&self, now: DateTime<Utc>) -> Result<()> {
        let entry_duration = self.duration(Timeframe::Entry);
        let mut state = self.state()?;
        state.now = Some(now);

        let symbols: Vec<String> = state.specs.keys().cloned().collect();
        for symbol in symbols {
            let after = state.processed_until.get(&symbol).copied();
            let closed: Vec<Candle> = state
                .series
                .get(&(symbol.clone(), Timeframe::Entry))
                .map(|series| {
                    series
                        .iter()
                        .filter(|c| c.timestamp + entry_duration <= now)
                        .filter(|c| after.map_or(true, |a| c.timestamp > a))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            for candle in &closed {
                settle_candle(&mut state, &symbol, candle, entry_duration);
            }
            if let Some(last) = closed.last() {
                state.processed_until.insert(symbol.clone(), last.timestamp);
            }
        }
        Ok(())
    }

    /// Refuse the next `count` stop modifications (exercise retry paths)
    pub fn reject_next_modifications(&self, count: u32) -> Result<()> {
        self.state()?.reject_modifications = count;
        Ok(())
    }

    pub fn closed_trades(&self) -> Vec<ClosedTrade> {
        self.state().map(|s| s.closed.clone()).unwrap_or_default()
    }

    /// Place a filled position directly (startup adoption tests)
    pub fn seed_position(&self, position: OpenPosition) -> Result<()> {
        let mut state = self.state()?;
        state.next_ticket = state.next_ticket.max(position.ticket + 1);
        state.positions.push(position);
        Ok(())
    }

    fn last_closed(&self, state: &PaperState, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        let now = state.now?;
        let duration = self.duration(timeframe);
        state
            .series
            .get(&(symbol.to_string(), timeframe))?
            .iter()
            .rev()
            .find(|c| c.timestamp + duration <= now)
            .cloned()
    }

    fn spec_of(state: &PaperState, symbol: &str) -> Result<SymbolSpec> {
        state
            .specs
            .get(symbol)
            .cloned()
            .ok_or_else(|| BotError::BrokerUnavailable(format!("unknown symbol {}", symbol)))
    }

    fn quote_of(&self, state: &PaperState, symbol: &str) -> Result<Quote> {
        let spec = Self::spec_of(state, symbol)?;
        let last = self
            .last_closed(state, symbol, Timeframe::Entry)
            .ok_or_else(|| BotError::BrokerUnavailable(format!("no prices for {}", symbol)))?;
        Ok(Quote {
            bid: last.close,
            ask: last.close + spec.spread,
        })
    }
}

/// Fill pending orders triggered by `candle`, then stop out positions it touches
fn settle_candle(state: &mut PaperState, symbol: &str, candle: &Candle, duration: Duration) {
    let closed_at = candle.timestamp + duration;
    let mut filled_now = Vec::new();

    let mut remaining = Vec::with_capacity(state.orders.len());
    for order in state.orders.drain(..) {
        let triggered = order.symbol == symbol
            && match order.side {
                Side::Buy => candle.high >= order.price,
                Side::Sell => candle.low <= order.price,
            };
        if triggered {
            tracing::info!(ticket = order.ticket, symbol, price = order.price, "Paper stop order filled");
            filled_now.push(order.ticket);
            state.positions.push(OpenPosition {
                ticket: order.ticket,
                symbol: order.symbol,
                side: order.side,
                entry_price: order.price,
                volume: order.volume,
                stop_loss: order.stop_loss,
                opened_at: candle.timestamp,
            });
        } else {
            remaining.push(order);
        }
    }
    state.orders = remaining;

    let mut open = Vec::with_capacity(state.positions.len());
    for position in state.positions.drain(..) {
        // A position is not stopped on the candle that filled it
        let hit = position.symbol == symbol
            && !filled_now.contains(&position.ticket)
            && match position.side {
                Side::Buy => candle.low <= position.stop_loss,
                Side::Sell => candle.high >= position.stop_loss,
            };
        if hit {
            tracing::info!(
                ticket = position.ticket,
                symbol,
                stop = position.stop_loss,
                "Paper position stopped out"
            );
            state.closed.push(ClosedTrade {
                ticket: position.ticket,
                symbol: position.symbol,
                side: position.side,
                entry_price: position.entry_price,
                exit_price: position.stop_loss,
                volume: position.volume,
                opened_at: position.opened_at,
                closed_at,
            });
        } else {
            open.push(position);
        }
    }
    state.positions = open;
}

impl Broker for PaperBroker {
    fn fetch_history(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        let state = self.state()?;
        let Some(now) = state.now else {
            return Ok(Vec::new());
        };
        let duration = self.duration(timeframe);
        let closed: Vec<Candle> = state
            .series
            .get(&(symbol.to_string(), timeframe))
            .map(|series| {
                series
                    .iter()
                    .filter(|c| c.timestamp + duration <= now)
                    .map(Candle::stripped)
                    .collect()
            })
            .unwrap_or_default();
        let skip = closed.len().saturating_sub(limit);
        Ok(closed[skip..].to_vec())
    }

    fn latest_closed_candle(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>> {
        let state = self.state()?;
        Ok(self.last_closed(&state, symbol, timeframe).map(|c| c.stripped()))
    }

    fn quote(&self, symbol: &str) -> Result<Quote> {
        let state = self.state()?;
        self.quote_of(&state, symbol)
    }

    fn symbol_spec(&self, symbol: &str) -> Result<SymbolSpec> {
        let state = self.state()?;
        Self::spec_of(&state, symbol)
    }

    fn place_stop_order(&self, request: &StopOrderRequest) -> Result<OrderReceipt> {
        let mut state = self.state()?;
        let spec = Self::spec_of(&state, &request.symbol)?;
        let quote = self.quote_of(&state, &request.symbol)?;
        let min_dist = spec.stop_level_distance();
        let eps = spec.tick_size * 1e-6;

        let valid = match request.side {
            Side::Buy => {
                request.price >= quote.ask + min_dist - eps && request.stop_loss < request.price
            }
            Side::Sell => {
                request.price <= quote.bid - min_dist + eps && request.stop_loss > request.price
            }
        } && request.volume >= spec.volume_min
            && request.volume <= spec.volume_max;

        if !valid {
            tracing::warn!(
                symbol = %request.symbol,
                side = %request.side,
                price = request.price,
                stop = request.stop_loss,
                bid = quote.bid,
                ask = quote.ask,
                "Paper broker rejected stop order"
            );
            return Ok(OrderReceipt {
                ticket: 0,
                accepted: false,
            });
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let placed_at = state.now.unwrap_or_else(Utc::now);
        state.orders.push(PendingOrder {
            ticket,
            symbol: request.symbol.clone(),
            side: request.side,
            price: request.price,
            volume: request.volume,
            stop_loss: request.stop_loss,
            placed_at,
        });
        Ok(OrderReceipt {
            ticket,
            accepted: true,
        })
    }

    fn modify_stop_loss(&self, ticket: u64, new_stop: f64) -> Result<bool> {
        let mut state = self.state()?;
        if state.reject_modifications > 0 {
            state.reject_modifications -= 1;
            return Ok(false);
        }

        let Some(idx) = state.positions.iter().position(|p| p.ticket == ticket) else {
            return Err(BotError::rejection(
                "modify_stop_loss",
                "?",
                format!("no position with ticket {}", ticket),
            ));
        };
        let symbol = state.positions[idx].symbol.clone();
        let side = state.positions[idx].side;
        let spec = Self::spec_of(&state, &symbol)?;
        let quote = self.quote_of(&state, &symbol)?;
        let min_dist = spec.stop_level_distance();

        let valid = match side {
            Side::Buy => new_stop <= quote.bid - min_dist,
            Side::Sell => new_stop >= quote.ask + min_dist,
        };
        if !valid {
            return Ok(false);
        }

        state.positions[idx].stop_loss = new_stop;
        Ok(true)
    }

    fn cancel_order(&self, ticket: u64) -> Result<bool> {
        let mut state = self.state()?;
        let before = state.orders.len();
        state.orders.retain(|o| o.ticket != ticket);
        Ok(state.orders.len() < before)
    }

    fn open_orders(&self, symbol: &str) -> Result<Vec<PendingOrder>> {
        let state = self.state()?;
        Ok(state.orders.iter().filter(|o| o.symbol == symbol).cloned().collect())
    }

    fn open_positions(&self, symbol: &str) -> Result<Vec<OpenPosition>> {
        let state = self.state()?;
        Ok(state
            .positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
    }

    fn spec() -> SymbolSpec {
        SymbolSpec {
            symbol: "EURUSD".to_string(),
            tick_size: 0.0001,
            stop_level_points: 3,
            spread: 0.0002,
            tick_value: 1.0,
            volume_min: 0.01,
            volume_max: 10.0,
            volume_step: 0.01,
        }
    }

    fn minute(i: i64, low: f64, high: f64, close: f64) -> Candle {
        Candle::new(base() + Duration::minutes(i), close, high, low, close, 10.0)
    }

    fn broker_with(candles: Vec<Candle>) -> PaperBroker {
        let broker = PaperBroker::new([Duration::minutes(60), Duration::minutes(15), Duration::minutes(1)]);
        broker.add_symbol(spec()).unwrap();
        broker.load_series("EURUSD", Timeframe::Entry, candles).unwrap();
        broker
    }

    fn buy_stop(price: f64, stop: f64) -> StopOrderRequest {
        StopOrderRequest {
            client_id: Uuid::new_v4(),
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            price,
            volume: 0.1,
            stop_loss: stop,
        }
    }

    #[test]
    fn test_symbol_queries_come_from_the_spec() {
        let broker = broker_with(vec![minute(0, 1.1000, 1.1010, 1.1005)]);

        assert_eq!(broker.tick_size("EURUSD").unwrap(), 0.0001);
        assert_eq!(broker.contract_spread("EURUSD").unwrap(), 0.0002);
        assert!((broker.min_stop_distance("EURUSD").unwrap() - 0.0003).abs() < 1e-12);
        assert!(broker.tick_size("GBPUSD").is_err());
    }

    #[test]
    fn test_only_closed_candles_are_served() {
        let broker = broker_with(vec![
            minute(0, 1.1000, 1.1010, 1.1005),
            minute(1, 1.1000, 1.1010, 1.1006),
            minute(2, 1.1000, 1.1010, 1.1007),
        ]);
        broker.advance_to(base() + Duration::minutes(2)).unwrap();

        let history = broker.fetch_history("EURUSD", Timeframe::Entry, 10).unwrap();
        assert_eq!(history.len(), 2);
        let latest = broker.latest_closed_candle("EURUSD", Timeframe::Entry).unwrap().unwrap();
        assert_eq!(latest.timestamp, base() + Duration::minutes(1));

        let quote = broker.quote("EURUSD").unwrap();
        assert!((quote.bid - 1.1006).abs() < 1e-12);
        assert!((quote.ask - 1.1008).abs() < 1e-12);
    }

    #[test]
    fn test_stop_order_fill_and_stop_out() {
        let broker = broker_with(vec![
            minute(0, 1.1000, 1.1010, 1.1005),
            minute(1, 1.1004, 1.1030, 1.1025), // triggers buy stop at 1.1020
            minute(2, 1.1012, 1.1028, 1.1015),
            minute(3, 1.0990, 1.1016, 1.0995), // hits stop at 1.1000
        ]);
        broker.advance_to(base() + Duration::minutes(1)).unwrap();

        let receipt = broker.place_stop_order(&buy_stop(1.1020, 1.1000)).unwrap();
        assert!(receipt.accepted);
        assert_eq!(broker.open_orders("EURUSD").unwrap().len(), 1);

        broker.advance_to(base() + Duration::minutes(2)).unwrap();
        let positions = broker.open_positions("EURUSD").unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].opened_at, base() + Duration::minutes(1));
        assert!(broker.open_orders("EURUSD").unwrap().is_empty());

        broker.advance_to(base() + Duration::minutes(4)).unwrap();
        assert!(broker.open_positions("EURUSD").unwrap().is_empty());
        let closed = broker.closed_trades();
        assert_eq!(closed.len(), 1);
        assert!(closed[0].price_pnl() < 0.0);
    }

    #[test]
    fn test_order_too_close_to_market_is_refused() {
        let broker = broker_with(vec![minute(0, 1.1000, 1.1010, 1.1005)]);
        broker.advance_to(base() + Duration::minutes(1)).unwrap();

        // ask = 1.1007, minimum distance 0.0003
        let receipt = broker.place_stop_order(&buy_stop(1.1008, 1.0990)).unwrap();
        assert!(!receipt.accepted);
    }

    #[test]
    fn test_modify_and_cancel() {
        let broker = broker_with(vec![
            minute(0, 1.1000, 1.1010, 1.1005),
            minute(1, 1.1004, 1.1030, 1.1025),
        ]);
        broker.advance_to(base() + Duration::minutes(1)).unwrap();
        let first = broker.place_stop_order(&buy_stop(1.1020, 1.1000)).unwrap();
        let second = broker.place_stop_order(&buy_stop(1.1040, 1.1000)).unwrap();
        assert!(broker.cancel_order(second.ticket).unwrap());
        assert!(!broker.cancel_order(second.ticket).unwrap());

        broker.advance_to(base() + Duration::minutes(2)).unwrap();
        // bid 1.1025: stop must stay at least 0.0003 below
        assert!(broker.modify_stop_loss(first.ticket, 1.1010).unwrap());
        assert!(!broker.modify_stop_loss(first.ticket, 1.1024).unwrap());

        broker.reject_next_modifications(1).unwrap();
        assert!(!broker.modify_stop_loss(first.ticket, 1.1012).unwrap());
        assert!(broker.modify_stop_loss(first.ticket, 1.1012).unwrap());
        assert!(broker.modify_stop_loss(999, 1.0).is_err());
    }
}
