// Multi-timeframe controller: one per symbol
// Hand-offs between K/B/E, entries on E, stop management for open positions

pub mod events;
pub mod handoff;
pub mod snapshot;

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::broker::Broker;
use crate::entry::{floor_to_tick, EntryLogic, EntrySignal};
use crate::history::{CandleHistory, MovingAverageSettings};
use crate::models::{Candle, Direction, Side, StopOrderRequest, SymbolSpec, Timeframe};
use crate::phase::{Phase, PhaseContext, PhaseStateMachine};
use crate::risk::RiskManager;
use crate::Result;

pub use events::{ControllerEvent, EventSink, RecordingSink, StopKind, TracingSink};
pub use handoff::{
    active_timeframe_for, aligned_base, can_confirmation_to_entry, can_context_to_confirmation,
    return_target_from_entry, should_return_to_confirmation, should_return_to_context,
};
pub use snapshot::{ControllerSnapshot, OpenTrade, SwitchLevels, TimeframeSnapshot};

/// A timeframe needs this many candles before the controller switches to it
const MIN_SWITCH_CANDLES: usize = 3;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Candles kept per timeframe (history buffer and phase window)
    pub history_limit: usize,
    pub averages: MovingAverageSettings,
    /// Length of one entry-timeframe candle
    pub entry_candle: Duration,
    /// Cancel pending orders left over from a previous run on startup
    pub cancel_stale_orders: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            history_limit: 100,
            averages: MovingAverageSettings::default(),
            entry_candle: Duration::minutes(1),
            cancel_stale_orders: true,
        }
    }
}

/// What the controller remembers about an order it placed or adopted
#[derive(Debug, Clone)]
struct TradeState {
    side: Side,
    entry_price: f64,
    initial_stop: f64,
    opened_at: DateTime<Utc>,
    break_even_applied: bool,
}

/// Drives the three phase machines of one symbol.
///
/// Only one timeframe is "active" at a time: context (K) waits for a Base or
/// Trend phase, confirmation (B) waits for a Base phase agreeing with K, and
/// entry (E) places stop orders. Every other timeframe keeps updating its
/// machine so the hand-off rules always see fresh phases.
pub struct MultiTimeframeController<B: Broker + ?Sized> {
    symbol: String,
    broker: Arc<B>,
    settings: ControllerSettings,
    entry: EntryLogic,
    risk: RiskManager,
    sink: Arc<dyn EventSink>,

    histories: [CandleHistory; 3],
    machines: [PhaseStateMachine; 3],
    phases: [Phase; 3],
    switch_levels: [Option<SwitchLevels>; 3],
    last_update: [Option<DateTime<Utc>>; 3],

    active: Timeframe,
    entered: Option<Direction>,
    trades: HashMap<u64, TradeState>,
    processed_entries: HashSet<(String, DateTime<Utc>)>,
}

impl<B: Broker + ?Sized> MultiTimeframeController<B> {
    pub fn new(
        symbol: impl Into<String>,
        broker: Arc<B>,
        settings: ControllerSettings,
        entry: EntryLogic,
        risk: RiskManager,
    ) -> Self {
        let limit = settings.history_limit;
        let averages = settings.averages;
        Self {
            symbol: symbol.into(),
            broker,
            entry,
            risk,
            sink: Arc::new(TracingSink),
            histories: std::array::from_fn(|_| CandleHistory::new(limit, averages)),
            machines: std::array::from_fn(|_| PhaseStateMachine::new(limit)),
            phases: [Phase::Neutral; 3],
            switch_levels: [None; 3],
            last_update: [None; 3],
            active: Timeframe::Context,
            entered: None,
            trades: HashMap::new(),
            processed_entries: HashSet::new(),
            settings,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn current_phase(&self, timeframe: Timeframe) -> Phase {
        self.phases[timeframe.index()]
    }

    pub fn active_timeframe(&self) -> Timeframe {
        self.active
    }

    pub fn entered_direction(&self) -> Option<Direction> {
        self.entered
    }

    pub fn machine(&self, timeframe: Timeframe) -> &PhaseStateMachine {
        &self.machines[timeframe.index()]
    }

    pub fn history(&self, timeframe: Timeframe) -> &CandleHistory {
        &self.histories[timeframe.index()]
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    fn emit(&self, event: ControllerEvent) {
        self.sink.record(event);
    }

    /// Cold start: replay every timeframe's history, adopt whatever the
    /// broker still has open and pick the active timeframe from the phases.
    pub fn initialize(&mut self) -> Result<()> {
        tracing::info!(symbol = %self.symbol, "Initializing controller");

        if self.settings.cancel_stale_orders {
            for order in self.broker.open_orders(&self.symbol)? {
                let cancelled =
                    absorb_rejection(&self.symbol, "cancel_order", self.broker.cancel_order(order.ticket))?;
                if cancelled == Some(true) {
                    self.emit(ControllerEvent::OrderCancelled {
                        symbol: self.symbol.clone(),
                        ticket: order.ticket,
                        reason: "startup cleanup".to_string(),
                    });
                }
            }
        }

        self.trades.clear();
        self.processed_entries.clear();
        self.entered = None;
        self.active = Timeframe::Context;

        for tf in Timeframe::ALL {
            let i = tf.index();
            let candles = self
                .broker
                .fetch_history(&self.symbol, tf, self.settings.history_limit)?;
            self.histories[i].load(candles);

            let annotated = self.histories[i].to_vec();
            let phase = self.machines[i].replay_from_scratch(&annotated);
            self.phases[i] = phase;
            self.last_update[i] = self.histories[i].last_timestamp();
            self.switch_levels[i] = switch_levels_for(phase, self.machines[i].context());

            tracing::info!(
                symbol = %self.symbol,
                timeframe = %tf,
                %phase,
                candles = annotated.len(),
                "Timeframe replayed"
            );
        }

        self.adopt_open_trades()?;

        let k = self.current_phase(Timeframe::Context);
        let b = self.current_phase(Timeframe::Confirmation);
        self.entered = match (k.direction(), b.direction()) {
            (Some(kd), Some(bd)) if kd == bd => Some(kd),
            _ => None,
        };

        if self.entered.is_none() && can_context_to_confirmation(k) {
            self.entered = k.direction();
            self.record_switch(Timeframe::Context);
            self.switch_to(Timeframe::Confirmation);
            if can_confirmation_to_entry(k, b) {
                self.entered = b.direction();
                self.record_switch(Timeframe::Confirmation);
                self.switch_to(Timeframe::Entry);
            }
        }

        self.reconcile_tickets()?;
        self.sync_active_timeframe_with_phases();

        tracing::info!(
            symbol = %self.symbol,
            active = %self.active,
            entered = ?self.entered,
            "Controller initialized"
        );
        Ok(())
    }

    fn adopt_open_trades(&mut self) -> Result<()> {
        for order in self.broker.open_orders(&self.symbol)? {
            tracing::info!(symbol = %self.symbol, ticket = order.ticket, price = order.price, "Adopting pending order");
            self.trades.insert(
                order.ticket,
                TradeState {
                    side: order.side,
                    entry_price: order.price,
                    initial_stop: order.stop_loss,
                    opened_at: order.placed_at,
                    break_even_applied: false,
                },
            );
        }
        for position in self.broker.open_positions(&self.symbol)? {
            tracing::info!(
                symbol = %self.symbol,
                ticket = position.ticket,
                entry = position.entry_price,
                stop = position.stop_loss,
                "Adopting open position"
            );
            self.trades.insert(
                position.ticket,
                TradeState {
                    side: position.side,
                    entry_price: position.entry_price,
                    initial_stop: position.stop_loss,
                    opened_at: position.opened_at,
                    break_even_applied: false,
                },
            );
        }
        Ok(())
    }

    /// Active timeframe straight from the K and B phases
    pub fn sync_active_timeframe_with_phases(&mut self) {
        self.active = active_timeframe_for(
            self.current_phase(Timeframe::Context),
            self.current_phase(Timeframe::Confirmation),
        );
    }

    /// Feed one closed candle of `timeframe`.
    ///
    /// Candles that are not newer than the last one seen for the timeframe
    /// are dropped. Broker rejections are logged and skipped; any other broker
    /// failure is returned.
    pub fn on_new_candle(&mut self, timeframe: Timeframe, candle: Candle) -> Result<()> {
        let i = timeframe.index();
        if self.last_update[i].is_some_and(|last| candle.timestamp <= last) {
            tracing::debug!(symbol = %self.symbol, %timeframe, ts = %candle.timestamp, "Duplicate candle dropped");
            return Ok(());
        }
        self.last_update[i] = Some(candle.timestamp);

        let Some(stored) = self.histories[i].push(candle).cloned() else {
            return Ok(());
        };
        self.update_machine(timeframe, &stored);

        let moved = self.apply_forward_handoffs() || self.apply_return_rules(timeframe)?;

        // Stops are managed on every entry candle, hand-off or not
        if timeframe == Timeframe::Entry {
            self.protect_pending_orders()?;
            self.manage_open_positions()?;
            if !moved {
                self.consider_entry(&stored)?;
            }
            self.reconcile_tickets()?;
        }
        Ok(())
    }

    fn update_machine(&mut self, timeframe: Timeframe, candle: &Candle) {
        let i = timeframe.index();
        let prev = self.phases[i];
        let phase = self.machines[i].update_with_candle(candle.clone());
        self.phases[i] = phase;

        if phase != prev {
            self.switch_levels[i] = switch_levels_for(phase, self.machines[i].context());
            self.emit(ControllerEvent::PhaseChanged {
                symbol: self.symbol.clone(),
                timeframe,
                from: prev,
                to: phase,
                at: candle.timestamp,
            });
        }
    }

    /// K -> B, then B -> E in the same pass. Returns true if anything moved.
    fn apply_forward_handoffs(&mut self) -> bool {
        let k = self.current_phase(Timeframe::Context);
        let b = self.current_phase(Timeframe::Confirmation);
        let mut handed_off = false;

        if self.active == Timeframe::Context && can_context_to_confirmation(k) {
            self.entered = k.direction();
            self.record_switch(Timeframe::Context);
            handed_off |= self.switch_to(Timeframe::Confirmation);
        }
        if self.active == Timeframe::Confirmation && can_confirmation_to_entry(k, b) {
            self.entered = b.direction();
            self.record_switch(Timeframe::Confirmation);
            handed_off |= self.switch_to(Timeframe::Entry);
        }
        handed_off
    }

    fn apply_return_rules(&mut self, timeframe: Timeframe) -> Result<bool> {
        if self.entered.is_none() {
            return Ok(false);
        }
        let k = self.current_phase(Timeframe::Context);
        let b = self.current_phase(Timeframe::Confirmation);

        match timeframe {
            Timeframe::Confirmation => {
                if should_return_to_context(k, self.entered, b.direction()) {
                    tracing::info!(symbol = %self.symbol, context = %k, confirmation = %b, "Direction lost, back to context");
                    self.entered = None;
                    self.switch_to(Timeframe::Context);
                    return Ok(true);
                }
            }
            Timeframe::Entry if self.active == Timeframe::Entry => {
                if self.has_active_trade()? {
                    tracing::debug!(symbol = %self.symbol, "Active trade keeps the entry timeframe");
                    return Ok(false);
                }
                if should_return_to_confirmation(b, self.entered, k.direction()) {
                    let target = return_target_from_entry(k, b);
                    tracing::info!(symbol = %self.symbol, context = %k, confirmation = %b, %target, "Leaving entry timeframe");
                    if target == Timeframe::Context {
                        self.entered = None;
                    }
                    self.switch_to(target);
                    return Ok(true);
                }
            }
            _ => {}
        }
        Ok(false)
    }

    /// Make `target` the active timeframe. Landing on context bounces straight
    /// back to confirmation when context already sits in a Base or Trend phase.
    fn switch_to(&mut self, target: Timeframe) -> bool {
        let available = self.histories[target.index()].len();
        if available < MIN_SWITCH_CANDLES {
            tracing::warn!(
                symbol = %self.symbol,
                timeframe = %target,
                available,
                "Not enough candles to switch timeframe"
            );
            return false;
        }

        let from = self.active;
        self.active = target;
        if from != target {
            self.emit(ControllerEvent::HandOff {
                symbol: self.symbol.clone(),
                from,
                to: target,
                direction: self.entered,
            });
        }

        if target == Timeframe::Context {
            self.bounce_from_context();
        }
        true
    }

    fn bounce_from_context(&mut self) {
        let k = self.current_phase(Timeframe::Context);
        if !can_context_to_confirmation(k) {
            return;
        }
        self.entered = k.direction();
        self.record_switch(Timeframe::Context);
        tracing::info!(symbol = %self.symbol, context = %k, "Context still directional, bouncing to confirmation");
        self.switch_to(Timeframe::Confirmation);
    }

    fn record_switch(&mut self, timeframe: Timeframe) {
        let Some(direction) = self.entered else {
            return;
        };
        let i = timeframe.index();
        self.switch_levels[i] = self.machines[i]
            .context()
            .switch_pair(direction)
            .map(|(initial, previous)| SwitchLevels {
                direction,
                initial_extreme: initial,
                previous_extreme: previous,
            });
    }

    fn has_active_trade(&self) -> Result<bool> {
        Ok(!self.broker.open_positions(&self.symbol)?.is_empty()
            || !self.broker.open_orders(&self.symbol)?.is_empty())
    }

    /// Cancel pending orders pointing against a fresh Switch on E
    fn protect_pending_orders(&mut self) -> Result<()> {
        let phase = self.current_phase(Timeframe::Entry);
        let conflicting = match phase {
            Phase::SwitchBear => Side::Buy,
            Phase::SwitchBull => Side::Sell,
            _ => return Ok(()),
        };

        for order in self.broker.open_orders(&self.symbol)? {
            if order.side != conflicting {
                continue;
            }
            let cancelled =
                absorb_rejection(&self.symbol, "cancel_order", self.broker.cancel_order(order.ticket))?;
            if cancelled == Some(true) {
                self.trades.remove(&order.ticket);
                self.emit(ControllerEvent::OrderCancelled {
                    symbol: self.symbol.clone(),
                    ticket: order.ticket,
                    reason: format!("entry timeframe turned {}", phase),
                });
            }
        }
        Ok(())
    }

    /// Break-even then trailing for every open position of the symbol
    fn manage_open_positions(&mut self) -> Result<()> {
        let positions = self.broker.open_positions(&self.symbol)?;
        if positions.is_empty() {
            return Ok(());
        }
        let candles = self.histories[Timeframe::Entry.index()].to_vec();

        for mut position in positions {
            let ticket = position.ticket;
            let initial_stop = self
                .trades
                .entry(ticket)
                .or_insert_with(|| {
                    tracing::warn!(ticket, "Untracked position, adopting with its current stop");
                    TradeState {
                        side: position.side,
                        entry_price: position.entry_price,
                        initial_stop: position.stop_loss,
                        opened_at: position.opened_at,
                        break_even_applied: false,
                    }
                })
                .initial_stop;

            let break_even = absorb_rejection(
                &self.symbol,
                "break_even",
                self.risk.try_break_even(self.broker.as_ref(), &position, &candles),
            )?
            .flatten();
            if let Some(stop) = break_even {
                position.stop_loss = stop;
                if let Some(trade) = self.trades.get_mut(&ticket) {
                    trade.break_even_applied = true;
                }
                self.emit(ControllerEvent::StopModified {
                    symbol: self.symbol.clone(),
                    ticket,
                    new_stop: stop,
                    kind: StopKind::BreakEven,
                });
            }

            let trailed = absorb_rejection(
                &self.symbol,
                "trailing_stop",
                self.risk
                    .try_trailing(self.broker.as_ref(), &position, initial_stop, &candles),
            )?
            .flatten();
            if let Some(stop) = trailed {
                self.emit(ControllerEvent::StopModified {
                    symbol: self.symbol.clone(),
                    ticket,
                    new_stop: stop,
                    kind: StopKind::Trailing,
                });
            }
        }
        Ok(())
    }

    /// Evaluate the entry rules once per entry candle
    fn consider_entry(&mut self, candle: &Candle) -> Result<()> {
        if self.active != Timeframe::Entry {
            return Ok(());
        }
        let key = (self.symbol.clone(), candle.timestamp);
        if self.processed_entries.contains(&key) {
            tracing::debug!(symbol = %self.symbol, ts = %candle.timestamp, "Entry candle already processed");
            return Ok(());
        }
        if self.has_active_trade()? {
            tracing::debug!(symbol = %self.symbol, "Order or position already open");
            return Ok(());
        }
        self.processed_entries.insert(key);

        let Some(direction) = self.entered else {
            return Ok(());
        };
        let k = self.current_phase(Timeframe::Context);
        let b = self.current_phase(Timeframe::Confirmation);
        let e = self.current_phase(Timeframe::Entry);
        let required = match direction {
            Direction::Bull => Phase::BaseSwitchBull,
            Direction::Bear => Phase::BaseSwitchBear,
        };
        if e != required {
            return Ok(());
        }
        if !aligned_base(k, b, direction) {
            tracing::debug!(symbol = %self.symbol, context = %k, confirmation = %b, %direction, "Entry blocked by higher timeframes");
            return Ok(());
        }

        let spec = self.broker.symbol_spec(&self.symbol)?;
        let quote = self.broker.quote(&self.symbol)?;
        let now = candle.timestamp + self.settings.entry_candle;
        let candles = self.histories[Timeframe::Entry.index()].to_vec();
        let ctx = self.machines[Timeframe::Entry.index()].context();

        match self.entry.try_entry(direction, e, ctx, &candles, quote, &spec, now) {
            Ok(Some(signal)) => self.open_new_trade(signal, &spec, candle.timestamp),
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, error = %e, "Entry discarded");
                self.emit(ControllerEvent::EntryRejected {
                    symbol: self.symbol.clone(),
                    side: direction.side(),
                    reason: e.to_string(),
                });
                Ok(())
            }
        }
    }

    fn open_new_trade(&mut self, signal: EntrySignal, spec: &SymbolSpec, at: DateTime<Utc>) -> Result<()> {
        let tick = self.broker.tick_size(&self.symbol)?;
        let entry_price = floor_to_tick(signal.entry_price, tick);
        let stop_loss = floor_to_tick(signal.stop_loss, tick);
        let volume = self.risk.position_size(spec, entry_price, stop_loss);

        let request = StopOrderRequest {
            client_id: Uuid::new_v4(),
            symbol: self.symbol.clone(),
            side: signal.side,
            price: entry_price,
            volume,
            stop_loss,
        };

        let receipt = absorb_rejection(&self.symbol, "place_stop_order", self.broker.place_stop_order(&request))?;
        let Some(receipt) = receipt.filter(|r| r.accepted) else {
            self.emit(ControllerEvent::EntryRejected {
                symbol: self.symbol.clone(),
                side: signal.side,
                reason: "broker refused stop order".to_string(),
            });
            return Ok(());
        };

        let rr_points = if tick > 0.0 {
            (entry_price - stop_loss).abs() / tick
        } else {
            0.0
        };
        tracing::info!(
            symbol = %self.symbol,
            ticket = receipt.ticket,
            side = %signal.side,
            entry_price,
            stop_loss,
            volume,
            rr_points,
            "Trade opened"
        );

        self.trades.insert(
            receipt.ticket,
            TradeState {
                side: signal.side,
                entry_price,
                initial_stop: stop_loss,
                opened_at: at,
                break_even_applied: false,
            },
        );
        self.emit(ControllerEvent::OrderPlaced {
            symbol: self.symbol.clone(),
            ticket: receipt.ticket,
            side: signal.side,
            price: entry_price,
            stop_loss,
            volume,
        });
        Ok(())
    }

    /// Forget tickets the broker no longer reports
    fn reconcile_tickets(&mut self) -> Result<()> {
        let positions: Vec<u64> = self
            .broker
            .open_positions(&self.symbol)?
            .iter()
            .map(|p| p.ticket)
            .collect();
        let orders: Vec<u64> = self
            .broker
            .open_orders(&self.symbol)?
            .iter()
            .map(|o| o.ticket)
            .collect();

        let before = self.trades.len();
        self.trades
            .retain(|ticket, _| positions.contains(ticket) || orders.contains(ticket));
        self.risk.retain_tickets(&positions);
        if self.trades.len() != before {
            tracing::debug!(symbol = %self.symbol, dropped = before - self.trades.len(), "Closed tickets forgotten");
        }

        if let Some(oldest) = self.histories[Timeframe::Entry.index()].iter().next() {
            let oldest = oldest.timestamp;
            self.processed_entries.retain(|(_, ts)| *ts >= oldest);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let timeframes = Timeframe::ALL
            .iter()
            .map(|&tf| {
                let i = tf.index();
                let ctx = self.machines[i].context();
                TimeframeSnapshot {
                    timeframe: tf,
                    phase: self.phases[i],
                    switch_levels: self.switch_levels[i],
                    bullish_confirmation: ctx.bullish().live_candle().map(|c| c.timestamp),
                    bearish_confirmation: ctx.bearish().live_candle().map(|c| c.timestamp),
                    last_candle: self.histories[i].last().cloned(),
                    candles: self.histories[i].len(),
                }
            })
            .collect();

        let mut open_trades: Vec<OpenTrade> = self
            .trades
            .iter()
            .map(|(&ticket, t)| OpenTrade {
                ticket,
                side: t.side,
                entry_price: t.entry_price,
                initial_stop: t.initial_stop,
                opened_at: t.opened_at,
                break_even_applied: t.break_even_applied,
                trailing_level: self.risk.trailing_level(ticket),
            })
            .collect();
        open_trades.sort_by_key(|t| t.ticket);

        ControllerSnapshot {
            symbol: self.symbol.clone(),
            active_timeframe: self.active,
            entered_direction: self.entered,
            timeframes,
            open_trades,
        }
    }

    /// Periodic status line per timeframe
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        for tf in &snapshot.timeframes {
            let (fast, slow) = tf
                .last_candle
                .as_ref()
                .map(|c| (c.ema_fast, c.ema_slow))
                .unwrap_or((None, None));
            tracing::info!(
                symbol = %snapshot.symbol,
                timeframe = %tf.timeframe,
                phase = %tf.phase,
                active = tf.timeframe == snapshot.active_timeframe,
                switch = ?tf.switch_levels,
                close = ?tf.last_candle.as_ref().map(|c| c.close),
                ema_fast = ?fast,
                ema_slow = ?slow,
                "Timeframe summary"
            );
        }
        for trade in &snapshot.open_trades {
            tracing::info!(
                symbol = %snapshot.symbol,
                ticket = trade.ticket,
                side = %trade.side,
                entry = trade.entry_price,
                initial_stop = trade.initial_stop,
                break_even = trade.break_even_applied,
                trailing_level = trade.trailing_level,
                "Open trade"
            );
        }
    }
}

fn switch_levels_for(phase: Phase, ctx: &PhaseContext) -> Option<SwitchLevels> {
    let direction = match phase {
        Phase::SwitchBull | Phase::BaseSwitchBull => Direction::Bull,
        Phase::SwitchBear | Phase::BaseSwitchBear => Direction::Bear,
        _ => return None,
    };
    ctx.switch_pair(direction)
        .map(|(initial, previous)| SwitchLevels {
            direction,
            initial_extreme: initial,
            previous_extreme: previous,
        })
}

/// Broker rejections become a logged no-op for this cycle
fn absorb_rejection<T>(symbol: &str, action: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_rejection() => {
            tracing::warn!(symbol, action, error = %e, "Broker rejected request");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
