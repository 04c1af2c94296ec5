use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backtest::aggregate::aggregate;
use crate::backtest::metrics::{BacktestMetrics, TradeRecord};
use crate::backtest::synthetic::{MarketScenario, SyntheticDataGenerator};
use crate::broker::{Broker, PaperBroker};
use crate::controller::{
    ControllerEvent, ControllerSettings, ControllerSnapshot, MultiTimeframeController, RecordingSink,
};
use crate::engine::PollingLoop;
use crate::entry::EntryLogic;
use crate::error::BotError;
use crate::models::{Candle, ClosedTrade, SymbolSpec, Timeframe};
use crate::risk::{RiskManager, RiskSettings};
use crate::Result;

/// Everything a replay needs besides the candles
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub spec: SymbolSpec,
    /// Candle length in minutes for context, confirmation and entry
    pub timeframe_minutes: [i64; 3],
    pub controller: ControllerSettings,
    pub entry: EntryLogic,
    pub risk: RiskSettings,
    /// Entry-timeframe minutes replayed into history before trading starts
    pub warmup_minutes: i64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            spec: SymbolSpec {
                symbol: "EURUSD".to_string(),
                tick_size: 0.00001,
                stop_level_points: 0,
                spread: 0.00010,
                tick_value: 1.0,
                volume_min: 0.01,
                volume_max: 100.0,
                volume_step: 0.01,
            },
            timeframe_minutes: [60, 15, 1],
            controller: ControllerSettings::default(),
            entry: EntryLogic::default(),
            risk: RiskSettings::default(),
            warmup_minutes: 6 * 60,
        }
    }
}

/// Outcome of one replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub candles: usize,
    pub metrics: BacktestMetrics,
    pub snapshot: Option<ControllerSnapshot>,
    pub events: Vec<ControllerEvent>,
}

/// Deterministic replay of entry-timeframe candles through the paper broker
pub struct BacktestRunner {
    config: BacktestConfig,
}

impl BacktestRunner {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Generate a synthetic scenario starting Monday 2024-01-08 00:00 UTC
    /// and replay it
    pub fn run_scenario(&self, scenario: MarketScenario, seed: u64, minutes: usize) -> Result<BacktestReport> {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 8, 0, 0, 0)
            .single()
            .ok_or_else(|| BotError::Configuration("invalid scenario start".to_string()))?;
        let candles = SyntheticDataGenerator::new(seed).generate(
            scenario,
            start,
            minutes,
            self.config.timeframe_minutes[Timeframe::Entry.index()],
        );
        tracing::info!(%scenario, seed, minutes, "Generated synthetic scenario");
        self.run(candles)
    }

    /// Replay entry candles (oldest first). Context and confirmation candles
    /// are aggregated from them.
    pub fn run(&self, entry_candles: Vec<Candle>) -> Result<BacktestReport> {
        let [k_min, b_min, e_min] = self.config.timeframe_minutes;
        let symbol = self.config.spec.symbol.clone();

        let warmup_candles = (self.config.warmup_minutes / e_min.max(1)).max(0) as usize;
        let (Some(first), Some(last)) = (entry_candles.first(), entry_candles.last()) else {
            return Err(BotError::Configuration("no candles to backtest".to_string()));
        };
        if entry_candles.len() <= warmup_candles {
            return Err(BotError::Configuration(format!(
                "Not enough candles for backtest. Need more than {}, got {}",
                warmup_candles,
                entry_candles.len()
            )));
        }
        let start = first.timestamp + Duration::minutes(self.config.warmup_minutes);
        let end = last.timestamp + Duration::minutes(e_min);
        let total = entry_candles.len();

        let broker = Arc::new(PaperBroker::new([
            Duration::minutes(k_min),
            Duration::minutes(b_min),
            Duration::minutes(e_min),
        ]));
        broker.add_symbol(self.config.spec.clone())?;
        broker.load_series(&symbol, Timeframe::Context, aggregate(&entry_candles, e_min, k_min))?;
        broker.load_series(&symbol, Timeframe::Confirmation, aggregate(&entry_candles, e_min, b_min))?;
        broker.load_series(&symbol, Timeframe::Entry, entry_candles)?;
        broker.advance_to(start)?;

        tracing::info!(%symbol, candles = total, %start, %end, "Starting backtest");

        let sink = RecordingSink::new();
        let mut controller = MultiTimeframeController::new(
            symbol.clone(),
            broker.clone(),
            self.config.controller.clone(),
            self.config.entry.clone(),
            RiskManager::new(self.config.risk.clone()),
        )
        .with_sink(Arc::new(sink.clone()));
        controller.initialize()?;

        let mut poller = PollingLoop::new(broker.clone(), std::time::Duration::from_millis(1));
        poller.add_controller(controller);

        let mut now = start;
        while now < end {
            now += Duration::minutes(e_min);
            broker.advance_to(now)?;
            poller.poll_once();
        }

        let mut closed = broker.closed_trades();
        closed.extend(mark_to_market(broker.as_ref(), &symbol, last_close(&broker, &symbol)?, end)?);
        closed.sort_by_key(|t| t.closed_at);

        let records: Vec<TradeRecord> = closed
            .iter()
            .map(|t| TradeRecord::from_closed(t, &self.config.spec))
            .collect();

        let events = sink.events();
        let mut metrics = BacktestMetrics::from_trades(records, self.config.risk.account_balance);
        metrics.orders_placed = count(&events, |e| matches!(e, ControllerEvent::OrderPlaced { .. }));
        metrics.orders_cancelled = count(&events, |e| matches!(e, ControllerEvent::OrderCancelled { .. }));
        metrics.stop_modifications = count(&events, |e| matches!(e, ControllerEvent::StopModified { .. }));

        tracing::info!(
            %symbol,
            trades = metrics.total_trades,
            orders = metrics.orders_placed,
            pnl = metrics.total_pnl,
            "Backtest complete"
        );

        Ok(BacktestReport {
            snapshot: poller.controller(&symbol).map(|c| c.snapshot()),
            symbol,
            candles: total,
            metrics,
            events,
        })
    }
}

fn count(events: &[ControllerEvent], pred: impl Fn(&ControllerEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

fn last_close(broker: &PaperBroker, symbol: &str) -> Result<f64> {
    Ok(broker.quote(symbol)?.bid)
}

/// Close whatever is still open at the final price
fn mark_to_market(
    broker: &PaperBroker,
    symbol: &str,
    price: f64,
    at: DateTime<Utc>,
) -> Result<Vec<ClosedTrade>> {
    Ok(broker
        .open_positions(symbol)?
        .into_iter()
        .map(|p| ClosedTrade {
            ticket: p.ticket,
            symbol: p.symbol,
            side: p.side,
            entry_price: p.entry_price,
            exit_price: price,
            volume: p.volume,
            opened_at: p.opened_at,
            closed_at: at,
        })
        .collect())
}
