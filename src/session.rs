//! Per-batch, per-exchange session: dedupes margin/leverage setup calls and
//! pre-warms WebSocket streams before any order is submitted on that venue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;

use crate::adapter::ExchangeAdapter;
use crate::error::ExecutionError;
use crate::event_bus::{event, EventBus, EventName};
use crate::model::MarginMode;

/// Wraps a `watch::Sender<bool>` so "is the circuit open" can be polled or
/// subscribed to reactively without any task busy-looping on it.
#[derive(Clone)]
pub struct CircuitBreaker {
    tx: Arc<watch::Sender<bool>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Opens the circuit. Returns `true` only for the caller that actually
    /// flipped it, so `ws_circuit_open` is emitted exactly once even when
    /// several orders hit their max reconnect attempt concurrently.
    pub fn try_open(&self) -> bool {
        self.tx
            .send_if_modified(|open| {
                if *open {
                    false
                } else {
                    *open = true;
                    true
                }
            })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ExchangeSession {
    pub exchange_id: String,
    pub adapter: Arc<dyn ExchangeAdapter>,
    margin_set: HashSet<String>,
    leverage_set: HashMap<String, u32>,
    active_ws_streams: HashSet<String>,
    pub circuit: CircuitBreaker,
}

impl ExchangeSession {
    pub fn new(exchange_id: impl Into<String>, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            adapter,
            margin_set: HashSet::new(),
            leverage_set: HashMap::new(),
            active_ws_streams: HashSet::new(),
            circuit: CircuitBreaker::new(),
        }
    }

    pub fn has_margin_mode(&self, symbol: &str) -> bool {
        self.margin_set.contains(symbol)
    }

    pub fn leverage_for(&self, symbol: &str) -> Option<u32> {
        self.leverage_set.get(symbol).copied()
    }

    /// Sets margin mode and leverage at most once per distinct symbol /
    /// (symbol, leverage) pair, and pre-warms the book stream for maker
    /// symbols before the first limit order goes out.
    pub async fn init(
        &mut self,
        symbols: &[(String, Option<MarginMode>, Option<u32>, bool)],
        bus: &EventBus,
    ) -> Result<(), ExecutionError> {
        for (symbol, margin_mode, leverage, is_maker) in symbols {
            if let Some(mode) = margin_mode {
                if !self.margin_set.contains(symbol) {
                    let mode_str = match mode {
                        MarginMode::Cross => "cross",
                        MarginMode::Isolated => "isolated",
                    };
                    self.adapter.set_margin_mode(symbol, mode_str).await?;
                    self.margin_set.insert(symbol.clone());
                }
            }

            if let Some(lev) = leverage {
                if self.leverage_set.get(symbol) != Some(lev) {
                    self.adapter.set_leverage(symbol, *lev).await?;
                    self.leverage_set.insert(symbol.clone(), *lev);
                }
            }

            if *is_maker
                && self.adapter.capabilities().supports_websocket
                && !self.active_ws_streams.contains(symbol)
            {
                let _ = self.adapter.watch_order_book(symbol).await;
                self.active_ws_streams.insert(symbol.clone());
                tracing::debug!(exchange_id = %self.exchange_id, symbol = %symbol, "pre-warmed order book stream");
            }
        }
        Ok(())
    }

    /// Torn down at batch end; not reused across batches.
    pub fn teardown(&mut self, bus: &EventBus) {
        for symbol in self.active_ws_streams.drain() {
            tracing::debug!(exchange_id = %self.exchange_id, symbol = %symbol, "tearing down order book stream");
        }
        let _ = bus;
    }

    pub fn emit_exchange_not_found(bus: &EventBus, exchange_id: &str, symbol: &str, order_id: &str) {
        bus.emit(
            EventName::ExchangeNotFound,
            event()
                .order_id(order_id)
                .symbol(symbol)
                .exchange_id(exchange_id),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockAdapter;

    #[tokio::test]
    async fn init_dedups_margin_and_leverage_calls() {
        let adapter = Arc::new(MockAdapter::new(false));
        let mut session = ExchangeSession::new("bybit", adapter.clone());
        let bus = EventBus::new();
        let symbols = vec![
            ("BTC-USDT".to_string(), Some(MarginMode::Cross), Some(5), false),
            ("BTC-USDT".to_string(), Some(MarginMode::Cross), Some(5), false),
            ("BTC-USDT".to_string(), Some(MarginMode::Cross), Some(5), false),
            ("ETH-USDT".to_string(), Some(MarginMode::Cross), Some(5), false),
            ("ETH-USDT".to_string(), Some(MarginMode::Cross), Some(5), false),
        ];
        session.init(&symbols, &bus).await.unwrap();
        assert_eq!(adapter.margin_call_count(), 2);
        assert_eq!(adapter.leverage_call_count(), 2);
    }

    #[test]
    fn circuit_breaker_try_open_wins_once() {
        let circuit = CircuitBreaker::new();
        assert!(circuit.try_open());
        assert!(!circuit.try_open());
        assert!(circuit.is_open());
    }
}
