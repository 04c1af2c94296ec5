use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::models::{Direction, Side, Timeframe};
use crate::phase::Phase;

/// Which stop management rule moved a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopKind {
    BreakEven,
    Trailing,
}

/// Something the controller did that an observer may care about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    PhaseChanged {
        symbol: String,
        timeframe: Timeframe,
        from: Phase,
        to: Phase,
        at: DateTime<Utc>,
    },
    HandOff {
        symbol: String,
        from: Timeframe,
        to: Timeframe,
        direction: Option<Direction>,
    },
    OrderPlaced {
        symbol: String,
        ticket: u64,
        side: Side,
        price: f64,
        stop_loss: f64,
        volume: f64,
    },
    OrderCancelled {
        symbol: String,
        ticket: u64,
        reason: String,
    },
    StopModified {
        symbol: String,
        ticket: u64,
        new_stop: f64,
        kind: StopKind,
    },
    EntryRejected {
        symbol: String,
        side: Side,
        reason: String,
    },
}

/// Receiver for controller events, injected at construction
pub trait EventSink: Send + Sync {
    fn record(&self, event: ControllerEvent);
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: ControllerEvent) {
        match &event {
            ControllerEvent::PhaseChanged {
                symbol,
                timeframe,
                from,
                to,
                at,
            } => {
                tracing::info!(%symbol, %timeframe, %from, %to, %at, "Phase changed");
            }
            ControllerEvent::HandOff {
                symbol,
                from,
                to,
                direction,
            } => {
                tracing::info!(%symbol, %from, %to, direction = ?direction, "Timeframe hand-off");
            }
            ControllerEvent::OrderPlaced {
                symbol,
                ticket,
                side,
                price,
                stop_loss,
                volume,
            } => {
                tracing::info!(%symbol, ticket, %side, price, stop_loss, volume, "Stop order placed");
            }
            ControllerEvent::OrderCancelled { symbol, ticket, reason } => {
                tracing::info!(%symbol, ticket, %reason, "Pending order cancelled");
            }
            ControllerEvent::StopModified {
                symbol,
                ticket,
                new_stop,
                kind,
            } => {
                tracing::info!(%symbol, ticket, new_stop, kind = ?kind, "Stop modified");
            }
            ControllerEvent::EntryRejected { symbol, side, reason } => {
                tracing::warn!(%symbol, %side, %reason, "Entry rejected");
            }
        }
    }
}

/// Keeps every event in memory (backtests and tests)
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ControllerEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ControllerEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything recorded so far
    pub fn drain(&self) -> Vec<ControllerEvent> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: ControllerEvent) {
        tracing::debug!(event = ?event, "Recorded controller event");
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_shares_events_between_clones() {
        let sink = RecordingSink::new();
        let other = sink.clone();
        other.record(ControllerEvent::OrderCancelled {
            symbol: "EURUSD".to_string(),
            ticket: 7,
            reason: "stale".to_string(),
        });

        assert_eq!(sink.len(), 1);
        let drained = sink.drain();
        assert_eq!(drained.len(), 1);
        assert!(other.is_empty());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = ControllerEvent::HandOff {
            symbol: "EURUSD".to_string(),
            from: Timeframe::Context,
            to: Timeframe::Confirmation,
            direction: Some(Direction::Bull),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "hand_off");
        assert_eq!(json["to"], "Confirmation");
    }
}
