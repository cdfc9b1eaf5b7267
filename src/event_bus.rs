//! In-memory structured event log with fan-out to subscribers.
//!
//! Mirrors the teacher's pattern of logging every state transition through
//! `tracing` while also keeping an ordered in-process record consumers can
//! subscribe to — here the record is explicit (`StructuredEvent`) rather than
//! inferred from log lines, since downstream code (alerts, tests) needs to
//! consume it structurally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    OrderSubmitted,
    OrderRepriced,
    OrderRepriceSuppressed,
    OrderSpreadBlocked,
    OrderFillPartial,
    OrderFillComplete,
    OrderTimedOut,
    OrderCancelled,
    OrderRejected,
    MakerTimeoutTakerFallback,
    WsReconnectAttempt,
    WsCircuitOpen,
    WsRestFallback,
    WsStalenessFallback,
    ExchangeNotFound,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::OrderSubmitted => "order_submitted",
            EventName::OrderRepriced => "order_repriced",
            EventName::OrderRepriceSuppressed => "order_reprice_suppressed",
            EventName::OrderSpreadBlocked => "order_spread_blocked",
            EventName::OrderFillPartial => "order_fill_partial",
            EventName::OrderFillComplete => "order_fill_complete",
            EventName::OrderTimedOut => "order_timed_out",
            EventName::OrderCancelled => "order_cancelled",
            EventName::OrderRejected => "order_rejected",
            EventName::MakerTimeoutTakerFallback => "maker_timeout_taker_fallback",
            EventName::WsReconnectAttempt => "ws_reconnect_attempt",
            EventName::WsCircuitOpen => "ws_circuit_open",
            EventName::WsRestFallback => "ws_rest_fallback",
            EventName::WsStalenessFallback => "ws_staleness_fallback",
            EventName::ExchangeNotFound => "exchange_not_found",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StructuredEvent {
    pub name: &'static str,
    pub order_id: Option<String>,
    pub symbol: Option<String>,
    pub exchange_id: Option<String>,
    pub timestamp_ms: u64,
    pub payload: Map<String, Value>,
}

/// Builds a `StructuredEvent` without forcing every call site to fill in
/// every correlation field.
#[derive(Default)]
pub struct EventBuilder {
    order_id: Option<String>,
    symbol: Option<String>,
    exchange_id: Option<String>,
    payload: Map<String, Value>,
}

impl EventBuilder {
    pub fn order_id(mut self, v: impl Into<String>) -> Self {
        self.order_id = Some(v.into());
        self
    }
    pub fn symbol(mut self, v: impl Into<String>) -> Self {
        self.symbol = Some(v.into());
        self
    }
    pub fn exchange_id(mut self, v: impl Into<String>) -> Self {
        self.exchange_id = Some(v.into());
        self
    }
    pub fn field(mut self, key: &str, v: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), v.into());
        self
    }
}

const SUBSCRIBER_CAPACITY: usize = 256;

pub struct EventBus {
    log: Mutex<Vec<StructuredEvent>>,
    subscribers: Mutex<Vec<mpsc::Sender<StructuredEvent>>>,
    dropped: AtomicU64,
    start: std::time::Instant,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
            start: std::time::Instant::now(),
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<StructuredEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> Vec<StructuredEvent> {
        self.log.lock().unwrap().clone()
    }

    pub fn emit(&self, name: EventName, builder: EventBuilder) {
        let event = StructuredEvent {
            name: name.as_str(),
            order_id: builder.order_id,
            symbol: builder.symbol,
            exchange_id: builder.exchange_id,
            timestamp_ms: self.start.elapsed().as_millis() as u64,
            payload: builder.payload,
        };

        match name {
            EventName::WsCircuitOpen
            | EventName::OrderRejected
            | EventName::OrderTimedOut
            | EventName::OrderSpreadBlocked
            | EventName::ExchangeNotFound => {
                tracing::warn!(
                    event = event.name,
                    order_id = event.order_id.as_deref(),
                    symbol = event.symbol.as_deref(),
                    exchange_id = event.exchange_id.as_deref(),
                    payload = %Value::Object(event.payload.clone()),
                    "execution event"
                );
            }
            _ => {
                tracing::info!(
                    event = event.name,
                    order_id = event.order_id.as_deref(),
                    symbol = event.symbol.as_deref(),
                    exchange_id = event.exchange_id.as_deref(),
                    payload = %Value::Object(event.payload.clone()),
                    "execution event"
                );
            }
        }

        self.log.lock().unwrap().push(event.clone());

        let mut subs = self.subscribers.lock().unwrap();
        subs.retain_mut(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

pub fn event() -> EventBuilder {
    EventBuilder::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_records_and_fans_out() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(
            EventName::OrderSubmitted,
            event().order_id("o1").symbol("BTC-USDT"),
        );
        assert_eq!(bus.events().len(), 1);
        let received = rx.try_recv().expect("event delivered");
        assert_eq!(received.name, "order_submitted");
    }

    #[test]
    fn dropped_counter_increments_when_subscriber_buffer_is_full() {
        let bus = EventBus::new();
        let _rx = bus.subscribe();
        for _ in 0..(SUBSCRIBER_CAPACITY + 5) {
            bus.emit(EventName::OrderRepriced, event());
        }
        assert!(bus.dropped_count() > 0);
    }
}
