// Polling loop: pulls closed candles from the broker and dispatches them

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::broker::Broker;
use crate::controller::MultiTimeframeController;
use crate::models::{Candle, Timeframe};
use crate::Result;

/// Extra observer for one (symbol, timeframe) stream
pub type CandleCallback = Box<dyn FnMut(&str, Timeframe, &Candle) + Send>;

struct Subscription {
    symbol: String,
    timeframe: Timeframe,
    callback: CandleCallback,
}

/// Cloneable flag that ends `PollingLoop::run` before its next poll
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fixed-interval poller.
///
/// Every poll asks the broker for the latest closed candle of each
/// subscribed (symbol, timeframe), drops anything not newer than what was
/// already dispatched, and hands new candles to the symbol's controller and
/// the subscribed callbacks. Symbols are processed one after another and
/// timeframes slowest first, so the entry timeframe always sees fresh
/// context and confirmation phases.
pub struct PollingLoop<B: Broker + ?Sized> {
    broker: Arc<B>,
    controllers: Vec<MultiTimeframeController<B>>,
    subscriptions: Vec<Subscription>,
    last_seen: HashMap<(String, Timeframe), DateTime<Utc>>,
    poll_interval: Duration,
    summary_every: u64,
    polls: u64,
    stop: StopHandle,
}

impl<B: Broker + ?Sized> PollingLoop<B> {
    pub fn new(broker: Arc<B>, poll_interval: Duration) -> Self {
        Self {
            broker,
            controllers: Vec::new(),
            subscriptions: Vec::new(),
            last_seen: HashMap::new(),
            poll_interval,
            summary_every: 0,
            polls: 0,
            stop: StopHandle::default(),
        }
    }

    /// Log every controller's summary once per `polls` polls (0 disables)
    pub fn with_summary_every(mut self, polls: u64) -> Self {
        self.summary_every = polls;
        self
    }

    /// Add an initialized controller; it receives all three timeframes of
    /// its symbol
    pub fn add_controller(&mut self, controller: MultiTimeframeController<B>) {
        for tf in Timeframe::ALL {
            if let Some(last) = controller.history(tf).last_timestamp() {
                self.last_seen
                    .entry((controller.symbol().to_string(), tf))
                    .or_insert(last);
            }
        }
        self.controllers.push(controller);
    }

    pub fn subscribe(&mut self, symbol: impl Into<String>, timeframe: Timeframe, callback: CandleCallback) {
        self.subscriptions.push(Subscription {
            symbol: symbol.into(),
            timeframe,
            callback,
        });
    }

    pub fn controllers(&self) -> &[MultiTimeframeController<B>] {
        &self.controllers
    }

    pub fn controller(&self, symbol: &str) -> Option<&MultiTimeframeController<B>> {
        self.controllers.iter().find(|c| c.symbol() == symbol)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Every (symbol, timeframe) someone listens to, in dispatch order
    fn streams(&self) -> Vec<(String, Timeframe)> {
        let mut streams: Vec<(String, Timeframe)> = Vec::new();
        let symbols = self
            .controllers
            .iter()
            .map(|c| c.symbol())
            .chain(self.subscriptions.iter().map(|s| s.symbol.as_str()));
        for symbol in symbols {
            for tf in Timeframe::ALL {
                let wanted = self.controllers.iter().any(|c| c.symbol() == symbol)
                    || self
                        .subscriptions
                        .iter()
                        .any(|s| s.symbol == symbol && s.timeframe == tf);
                let key = (symbol.to_string(), tf);
                if wanted && !streams.contains(&key) {
                    streams.push(key);
                }
            }
        }
        streams
    }

    /// One pass over all streams. Returns how many new candles were dispatched.
    ///
    /// A failing stream is logged and skipped; the other streams still run.
    pub fn poll_once(&mut self) -> usize {
        let mut dispatched = 0;

        for (symbol, tf) in self.streams() {
            let candle = match self.broker.latest_closed_candle(&symbol, tf) {
                Ok(Some(candle)) => candle,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(%symbol, timeframe = %tf, error = %e, "Failed to fetch latest candle");
                    continue;
                }
            };

            let key = (symbol.clone(), tf);
            if self.last_seen.get(&key).is_some_and(|last| candle.timestamp <= *last) {
                continue;
            }
            self.last_seen.insert(key, candle.timestamp);
            dispatched += 1;

            tracing::debug!(%symbol, timeframe = %tf, ts = %candle.timestamp, close = candle.close, "New closed candle");

            if let Some(controller) = self.controllers.iter_mut().find(|c| c.symbol() == symbol) {
                if let Err(e) = controller.on_new_candle(tf, candle.clone()) {
                    tracing::error!(%symbol, timeframe = %tf, error = %e, "Controller failed to process candle");
                }
            }
            for sub in self
                .subscriptions
                .iter_mut()
                .filter(|s| s.symbol == symbol && s.timeframe == tf)
            {
                (sub.callback)(&symbol, tf, &candle);
            }
        }

        self.polls += 1;
        if self.summary_every > 0 && self.polls % self.summary_every == 0 {
            for controller in &self.controllers {
                controller.log_summary();
            }
        }
        dispatched
    }

    /// Poll on the configured interval until the stop flag is raised
    pub async fn run(&mut self) -> Result<()> {
        self.run_with(|| Ok(true)).await
    }

    /// Like `run`, calling `before_poll` ahead of every poll. Returning
    /// `Ok(false)` ends the loop (e.g. a simulated feed ran out of data).
    pub async fn run_with<F>(&mut self, mut before_poll: F) -> Result<()>
    where
        F: FnMut() -> Result<bool>,
    {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            controllers = self.controllers.len(),
            subscriptions = self.subscriptions.len(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "Polling loop started"
        );

        loop {
            ticker.tick().await;
            if self.stop.is_stopped() {
                tracing::info!("Stop requested, leaving polling loop");
                break;
            }
            if !before_poll()? {
                tracing::info!("Feed exhausted, leaving polling loop");
                break;
            }
            self.poll_once();
        }

        for controller in &self.controllers {
            controller.log_summary();
        }
        Ok(())
    }
}
