//! Exchange adapter boundary — the uniform interface every venue must
//! implement, plus an in-memory mock used by this crate's own tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::model::{ExtraParams, Side};

#[derive(Debug, Error)]
pub enum AdapterFailure {
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy)]
pub struct BookTop {
    pub best_bid: f64,
    pub best_ask: f64,
}

impl BookTop {
    pub fn spread_pct(&self) -> f64 {
        if self.best_bid <= 0.0 {
            return f64::INFINITY;
        }
        (self.best_ask - self.best_bid) / self.best_bid
    }

    pub fn price_for(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.best_bid,
            Side::Sell => self.best_ask,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOrderState {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub state: RemoteOrderState,
    pub filled_amount: f64,
    pub avg_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeCapabilities {
    pub supports_websocket: bool,
}

/// Uniform interface every venue implements. One async trait covers REST
/// calls and streaming subscriptions alike; mock and real implementations
/// differ only in what's behind each method.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn capabilities(&self) -> ExchangeCapabilities;

    async fn set_margin_mode(&self, symbol: &str, mode: &str) -> Result<(), AdapterFailure>;
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), AdapterFailure>;

    async fn create_limit_order(
        &self,
        symbol: &str,
        side: Side,
        amount: f64,
        price: f64,
        params: &ExtraParams,
    ) -> Result<String, AdapterFailure>;

    async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        amount: f64,
        params: &ExtraParams,
    ) -> Result<String, AdapterFailure>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<(), AdapterFailure>;

    async fn fetch_order(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<OrderSnapshot, AdapterFailure>;

    async fn fetch_order_book(&self, symbol: &str) -> Result<BookTop, AdapterFailure>;

    async fn watch_order_book(
        &self,
        symbol: &str,
    ) -> Result<broadcast::Receiver<BookTop>, AdapterFailure>;

    async fn watch_orders(
        &self,
        symbol: &str,
    ) -> Result<broadcast::Receiver<OrderSnapshot>, AdapterFailure>;
}

#[derive(Default)]
struct MockInner {
    margin_calls: Vec<(String, String)>,
    leverage_calls: Vec<(String, u32)>,
    cancel_calls: Vec<String>,
    book_tx: HashMap<String, broadcast::Sender<BookTop>>,
    order_tx: HashMap<String, broadcast::Sender<OrderSnapshot>>,
    books: HashMap<String, BookTop>,
    ws_failures_remaining: u32,
    reject_next_limit: bool,
    reject_next_market: bool,
    auto_fill_market: bool,
    next_order_id: u64,
}

/// In-memory adapter used by this crate's own test suite. Every call is
/// synchronous under the hood; `async` is kept so executor code never has to
/// special-case it versus a real networked adapter.
pub struct MockAdapter {
    inner: Arc<Mutex<MockInner>>,
    supports_websocket: bool,
}

impl MockAdapter {
    pub fn new(supports_websocket: bool) -> Self {
        let mut inner = MockInner::default();
        inner.auto_fill_market = true;
        Self {
            inner: Arc::new(Mutex::new(inner)),
            supports_websocket,
        }
    }

    pub fn set_book(&self, symbol: &str, top: BookTop) {
        self.inner
            .lock()
            .unwrap()
            .books
            .insert(symbol.to_string(), top);
    }

    /// Pushes a new book tick to any current `watch_order_book` subscribers.
    pub fn push_book_tick(&self, symbol: &str, top: BookTop) {
        let mut inner = self.inner.lock().unwrap();
        inner.books.insert(symbol.to_string(), top);
        if let Some(tx) = inner.book_tx.get(symbol) {
            let _ = tx.send(top);
        }
    }

    /// Pushes an order status update to any current `watch_orders` subscribers.
    pub fn push_fill(&self, symbol: &str, snapshot: OrderSnapshot) {
        let inner = self.inner.lock().unwrap();
        if let Some(tx) = inner.order_tx.get(symbol) {
            let _ = tx.send(snapshot);
        }
    }

    pub fn set_ws_failures(&self, count: u32) {
        self.inner.lock().unwrap().ws_failures_remaining = count;
    }

    pub fn reject_next_limit_order(&self) {
        self.inner.lock().unwrap().reject_next_limit = true;
    }

    pub fn reject_next_market_order(&self) {
        self.inner.lock().unwrap().reject_next_market = true;
    }

    pub fn set_auto_fill_market(&self, auto_fill: bool) {
        self.inner.lock().unwrap().auto_fill_market = auto_fill;
    }

    pub fn margin_call_count(&self) -> usize {
        self.inner.lock().unwrap().margin_calls.len()
    }

    pub fn leverage_call_count(&self) -> usize {
        self.inner.lock().unwrap().leverage_calls.len()
    }

    pub fn cancel_calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().cancel_calls.clone()
    }

    fn next_id(&self) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.next_order_id += 1;
        format!("mock-{}", inner.next_order_id)
    }
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    fn capabilities(&self) -> ExchangeCapabilities {
        ExchangeCapabilities {
            supports_websocket: self.supports_websocket,
        }
    }

    async fn set_margin_mode(&self, symbol: &str, mode: &str) -> Result<(), AdapterFailure> {
        self.inner
            .lock()
            .unwrap()
            .margin_calls
            .push((symbol.to_string(), mode.to_string()));
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), AdapterFailure> {
        self.inner
            .lock()
            .unwrap()
            .leverage_calls
            .push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn create_limit_order(
        &self,
        symbol: &str,
        _side: Side,
        amount: f64,
        _price: f64,
        _params: &ExtraParams,
    ) -> Result<String, AdapterFailure> {
        let mut reject = false;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.reject_next_limit {
                inner.reject_next_limit = false;
                reject = true;
            }
        }
        if reject {
            return Err(AdapterFailure::Rejected(format!(
                "limit order rejected for {symbol}"
            )));
        }
        let order_id = self.next_id();
        let tx = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .order_tx
                .entry(symbol.to_string())
                .or_insert_with(|| broadcast::channel(256).0)
                .clone()
        };
        let _ = tx.send(OrderSnapshot {
            order_id: order_id.clone(),
            state: RemoteOrderState::Open,
            filled_amount: 0.0,
            avg_price: None,
        });
        let _ = amount;
        Ok(order_id)
    }

    async fn create_market_order(
        &self,
        symbol: &str,
        _side: Side,
        amount: f64,
        _params: &ExtraParams,
    ) -> Result<String, AdapterFailure> {
        let mut reject = false;
        let mut auto_fill = false;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.reject_next_market {
                inner.reject_next_market = false;
                reject = true;
            }
            auto_fill = inner.auto_fill_market;
        }
        if reject {
            return Err(AdapterFailure::Rejected(format!(
                "market order rejected for {symbol}"
            )));
        }
        let order_id = self.next_id();
        if auto_fill {
            let price = self
                .inner
                .lock()
                .unwrap()
                .books
                .get(symbol)
                .map(|b| (b.best_bid + b.best_ask) / 2.0)
                .unwrap_or(0.0);
            let tx = {
                let mut inner = self.inner.lock().unwrap();
                inner
                    .order_tx
                    .entry(symbol.to_string())
                    .or_insert_with(|| broadcast::channel(256).0)
                    .clone()
            };
            let _ = tx.send(OrderSnapshot {
                order_id: order_id.clone(),
                state: RemoteOrderState::Filled,
                filled_amount: amount,
                avg_price: Some(price),
            });
        }
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<(), AdapterFailure> {
        self.inner
            .lock()
            .unwrap()
            .cancel_calls
            .push(order_id.to_string());
        Ok(())
    }

    async fn fetch_order(
        &self,
        order_id: &str,
        symbol: &str,
    ) -> Result<OrderSnapshot, AdapterFailure> {
        let price = self
            .inner
            .lock()
            .unwrap()
            .books
            .get(symbol)
            .map(|b| (b.best_bid + b.best_ask) / 2.0);
        Ok(OrderSnapshot {
            order_id: order_id.to_string(),
            state: RemoteOrderState::Open,
            filled_amount: 0.0,
            avg_price: price,
        })
    }

    async fn fetch_order_book(&self, symbol: &str) -> Result<BookTop, AdapterFailure> {
        self.inner
            .lock()
            .unwrap()
            .books
            .get(symbol)
            .copied()
            .ok_or_else(|| AdapterFailure::NotFound(format!("no book for {symbol}")))
    }

    async fn watch_order_book(
        &self,
        symbol: &str,
    ) -> Result<broadcast::Receiver<BookTop>, AdapterFailure> {
        let mut inner = self.inner.lock().unwrap();
        if inner.ws_failures_remaining > 0 {
            inner.ws_failures_remaining -= 1;
            return Err(AdapterFailure::Disconnected(
                "simulated websocket failure".into(),
            ));
        }
        let tx = inner
            .book_tx
            .entry(symbol.to_string())
            .or_insert_with(|| broadcast::channel(256).0);
        Ok(tx.subscribe())
    }

    async fn watch_orders(
        &self,
        symbol: &str,
    ) -> Result<broadcast::Receiver<OrderSnapshot>, AdapterFailure> {
        let mut inner = self.inner.lock().unwrap();
        if inner.ws_failures_remaining > 0 {
            inner.ws_failures_remaining -= 1;
            return Err(AdapterFailure::Disconnected(
                "simulated websocket failure".into(),
            ));
        }
        let tx = inner
            .order_tx
            .entry(symbol.to_string())
            .or_insert_with(|| broadcast::channel(256).0);
        Ok(tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn margin_and_leverage_calls_are_recorded() {
        let adapter = MockAdapter::new(true);
        adapter.set_margin_mode("BTC-USDT", "cross").await.unwrap();
        adapter.set_leverage("BTC-USDT", 5).await.unwrap();
        assert_eq!(adapter.margin_call_count(), 1);
        assert_eq!(adapter.leverage_call_count(), 1);
    }

    #[tokio::test]
    async fn ws_failure_injection_is_consumed_once() {
        let adapter = MockAdapter::new(true);
        adapter.set_ws_failures(1);
        assert!(adapter.watch_order_book("BTC-USDT").await.is_err());
        assert!(adapter.watch_order_book("BTC-USDT").await.is_ok());
    }

    #[tokio::test]
    async fn reject_next_limit_order_fires_once() {
        let adapter = MockAdapter::new(false);
        adapter.reject_next_limit_order();
        let params = ExtraParams::default();
        assert!(adapter
            .create_limit_order("BTC-USDT", Side::Buy, 1.0, 100.0, &params)
            .await
            .is_err());
        assert!(adapter
            .create_limit_order("BTC-USDT", Side::Buy, 1.0, 100.0, &params)
            .await
            .is_ok());
    }
}
