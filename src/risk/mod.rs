// Risk management: position sizing, break-even and trailing stops

pub mod stops;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::broker::Broker;
use crate::entry::{ceil_to_tick, floor_to_tick};
use crate::models::{Candle, OpenPosition, Side, SymbolSpec};
use crate::Result;

pub use stops::{breakeven_price, is_go_candle, trailing_step};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub account_balance: f64,
    pub max_risk_per_trade: f64,
    /// Fixed amount risked per trade; overrides balance * max_risk when set
    pub risk_amount: Option<f64>,
    /// Minimum stop distance in pips when the broker reports none
    pub breakeven_fallback_pips: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            account_balance: 10_000.0,
            max_risk_per_trade: 0.01, // 1% of balance
            risk_amount: Some(50.0),
            breakeven_fallback_pips: 0.5,
        }
    }
}

/// Position sizing plus stop management for open positions.
///
/// Keeps the trailing level reached per ticket so a stop only ever advances
/// to a higher multiple of the initial risk.
#[derive(Debug, Clone)]
pub struct RiskManager {
    settings: RiskSettings,
    trailing_levels: HashMap<u64, u32>,
}

impl RiskManager {
    pub fn new(settings: RiskSettings) -> Self {
        Self {
            settings,
            trailing_levels: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    pub fn risk_amount(&self) -> f64 {
        self.settings
            .risk_amount
            .unwrap_or(self.settings.account_balance * self.settings.max_risk_per_trade)
    }

    /// Lots that risk `risk_amount` between entry and stop, floored to the
    /// volume step and clamped to the broker's volume range
    pub fn position_size(&self, spec: &SymbolSpec, entry: f64, stop: f64) -> f64 {
        let distance = (entry - stop).abs();
        if distance <= 0.0 || spec.tick_size <= 0.0 || spec.tick_value <= 0.0 {
            return spec.volume_min;
        }

        let ticks = distance / spec.tick_size;
        let raw = self.risk_amount() / (ticks * spec.tick_value);
        normalize_lots(spec, raw)
    }

    /// Stop distance used by break-even and trailing: the broker's stop level,
    /// or the configured fallback when it reports none
    pub fn stop_distance<B: Broker + ?Sized>(&self, broker: &B, symbol: &str) -> Result<f64> {
        let reported = broker.min_stop_distance(symbol)?;
        if reported > 0.0 {
            return Ok(reported);
        }
        // 1 pip = 10 points on 5-digit quotes
        Ok(self.settings.breakeven_fallback_pips * 10.0 * broker.tick_size(symbol)?)
    }

    pub fn trailing_level(&self, ticket: u64) -> u32 {
        self.trailing_levels.get(&ticket).copied().unwrap_or(0)
    }

    /// Drop counters for tickets the broker no longer reports
    pub fn retain_tickets(&mut self, live: &[u64]) {
        self.trailing_levels.retain(|ticket, _| live.contains(ticket));
    }

    /// Move the stop to break-even once the go-candle has been confirmed.
    ///
    /// Returns the stop the broker accepted, or None when nothing changed.
    pub fn try_break_even<B: Broker + ?Sized>(
        &mut self,
        broker: &B,
        position: &OpenPosition,
        candles: &[Candle],
    ) -> Result<Option<f64>> {
        let quote = broker.quote(&position.symbol)?;
        let min_dist = self.stop_distance(broker, &position.symbol)?;

        let Some(new_stop) = breakeven_price(
            position.side,
            candles,
            position.entry_price,
            position.opened_at,
            broker.contract_spread(&position.symbol)?,
            quote,
            min_dist,
            broker.tick_size(&position.symbol)?,
        ) else {
            return Ok(None);
        };

        let improves = match position.side {
            Side::Buy => new_stop > position.stop_loss,
            Side::Sell => new_stop < position.stop_loss,
        };
        if !improves {
            return Ok(None);
        }

        if broker.modify_stop_loss(position.ticket, new_stop)? {
            tracing::info!(
                ticket = position.ticket,
                symbol = %position.symbol,
                new_stop,
                "Break-even applied"
            );
            Ok(Some(new_stop))
        } else {
            tracing::warn!(
                ticket = position.ticket,
                symbol = %position.symbol,
                new_stop,
                "Broker refused break-even stop"
            );
            Ok(None)
        }
    }

    /// Trail the stop in multiples of the initial risk, with one retry at a
    /// doubled distance when the broker refuses the first candidate.
    pub fn try_trailing<B: Broker + ?Sized>(
        &mut self,
        broker: &B,
        position: &OpenPosition,
        initial_stop: f64,
        candles: &[Candle],
    ) -> Result<Option<f64>> {
        let rr = (position.entry_price - initial_stop).abs();
        if rr <= 0.0 {
            return Ok(None);
        }

        let since_entry: Vec<Candle> = candles
            .iter()
            .filter(|c| c.timestamp >= position.opened_at)
            .cloned()
            .collect();

        let last_level = self.trailing_level(position.ticket);
        let Some((candidate, level)) = trailing_step(
            position.side,
            &since_entry,
            position.entry_price,
            rr,
            position.stop_loss,
            last_level,
        ) else {
            return Ok(None);
        };

        let quote = broker.quote(&position.symbol)?;
        let min_dist = self.stop_distance(broker, &position.symbol)?;
        let tick = broker.tick_size(&position.symbol)?;

        let candidate = match position.side {
            Side::Buy => {
                let clamped = candidate.min(quote.bid - min_dist);
                if clamped <= position.stop_loss {
                    tracing::debug!(ticket = position.ticket, clamped, "Trailing stop would not advance");
                    return Ok(None);
                }
                ceil_to_tick(clamped, tick)
            }
            Side::Sell => {
                let clamped = candidate.max(quote.ask + min_dist);
                if clamped >= position.stop_loss {
                    tracing::debug!(ticket = position.ticket, clamped, "Trailing stop would not advance");
                    return Ok(None);
                }
                floor_to_tick(clamped, tick)
            }
        };

        let still_open = broker
            .open_positions(&position.symbol)?
            .iter()
            .any(|p| p.ticket == position.ticket);
        if !still_open {
            return Ok(None);
        }

        if broker.modify_stop_loss(position.ticket, candidate)? {
            self.trailing_levels.insert(position.ticket, level);
            tracing::info!(ticket = position.ticket, level, new_stop = candidate, "Trailing stop advanced");
            return Ok(Some(candidate));
        }

        let retry = match position.side {
            Side::Buy => ceil_to_tick(quote.bid - 2.0 * min_dist, tick),
            Side::Sell => floor_to_tick(quote.ask + 2.0 * min_dist, tick),
        };
        tracing::warn!(
            ticket = position.ticket,
            candidate,
            retry,
            "Broker refused trailing stop, retrying with doubled distance"
        );

        let advances = match position.side {
            Side::Buy => retry > position.stop_loss,
            Side::Sell => retry < position.stop_loss,
        };
        if advances && broker.modify_stop_loss(position.ticket, retry)? {
            self.trailing_levels.insert(position.ticket, level);
            tracing::info!(ticket = position.ticket, level, new_stop = retry, "Trailing stop advanced on retry");
            return Ok(Some(retry));
        }

        tracing::warn!(ticket = position.ticket, "Trailing stop abandoned for this cycle");
        Ok(None)
    }
}

/// Floor to the volume step and clamp to [min, max]
pub fn normalize_lots(spec: &SymbolSpec, lots: f64) -> f64 {
    let stepped = if spec.volume_step > 0.0 {
        (lots / spec.volume_step + 1e-9).floor() * spec.volume_step
    } else {
        lots
    };
    let clamped = stepped.max(spec.volume_min).min(spec.volume_max);
    (clamped * 1e8).round() / 1e8
}
