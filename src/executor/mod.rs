//! Shared executor contract: configuration, state machine glue, spread gate,
//! and the timeout→taker-fallback path used by both the REST and WS variants.

pub mod rest;
pub mod ws;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapter::{BookTop, ExchangeAdapter};
use crate::error::ExecutionError;
use crate::event_bus::{event, EventBus, EventName};
use crate::model::{
    can_transition, ExecutionReport, OpenOrder, OrderRequest, OrderState, ReportStatus, Side,
};
use crate::reprice::RepricePolicyConfig;

pub use rest::RestExecutor;
pub use ws::WsExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Fast,
    BestPrice,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub strategy: Strategy,
    pub max_spread_pct: f64,
    pub timeout_duration: Duration,
    pub ws_reconnect_base_delay_ms: u64,
    pub ws_reconnect_cap_ms: u64,
    pub ws_max_reconnect_attempts: u32,
    pub ws_staleness_window: Duration,
    pub reprice: RepricePolicyConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Fast,
            max_spread_pct: 0.005,
            timeout_duration: Duration::from_secs(300),
            ws_reconnect_base_delay_ms: 100,
            ws_reconnect_cap_ms: 30_000,
            ws_max_reconnect_attempts: 3,
            ws_staleness_window: Duration::from_secs(10),
            reprice: RepricePolicyConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.max_spread_pct < 0.0 {
            return Err(ExecutionError::ConfigInvalid(
                "max_spread_pct must be >= 0".into(),
            ));
        }
        if self.ws_max_reconnect_attempts == 0 {
            return Err(ExecutionError::ConfigInvalid(
                "ws_max_reconnect_attempts must be >= 1".into(),
            ));
        }
        if self.ws_reconnect_base_delay_ms == 0 {
            return Err(ExecutionError::ConfigInvalid(
                "ws_reconnect_base_delay_ms must be >= 1".into(),
            ));
        }
        if self.ws_reconnect_cap_ms < self.ws_reconnect_base_delay_ms {
            return Err(ExecutionError::ConfigInvalid(
                "ws_reconnect_cap_ms must be >= ws_reconnect_base_delay_ms".into(),
            ));
        }
        self.reprice.validate()
    }
}

/// delay(n) = min(base * 2^(n-1), cap), n = 1..=max_attempts
pub fn backoff_delay_ms(attempt: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let scaled = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(40));
    scaled.min(cap_ms)
}

/// Shared machinery the REST and WS executors both build on: the spread
/// gate, state-transition bookkeeping, and the timeout/taker-fallback path.
pub struct BaseExecutor {
    pub config: ExecutorConfig,
    pub bus: Arc<EventBus>,
}

impl BaseExecutor {
    pub fn new(config: ExecutorConfig, bus: Arc<EventBus>) -> Self {
        Self { config, bus }
    }

    pub fn apply_transition(
        &self,
        open: &mut OpenOrder,
        to: OrderState,
    ) -> Result<(), ExecutionError> {
        if !can_transition(open.state, to) {
            return Err(ExecutionError::Validation(format!(
                "illegal transition {:?} -> {:?} for order {}",
                open.state, to, open.order_id
            )));
        }
        open.state = to;
        open.last_event_ts = Instant::now();
        Ok(())
    }

    /// If running BEST_PRICE and the book is too wide, wait (with bounded
    /// retries) for it to narrow before submission; emits `order_spread_blocked`
    /// on every failed check.
    pub async fn wait_for_spread_gate(
        &self,
        adapter: &dyn ExchangeAdapter,
        symbol: &str,
        order_id: &str,
        exchange_id: &str,
    ) -> Result<BookTop, ExecutionError> {
        const MAX_WAIT_TICKS: u32 = 20;
        const TICK: Duration = Duration::from_millis(250);

        let started = Instant::now();
        let mut tick = 0u32;
        loop {
            let top = adapter.fetch_order_book(symbol).await?;
            if self.config.strategy != Strategy::BestPrice
                || top.spread_pct() <= self.config.max_spread_pct
            {
                return Ok(top);
            }

            self.bus.emit(
                EventName::OrderSpreadBlocked,
                event()
                    .order_id(order_id)
                    .symbol(symbol)
                    .exchange_id(exchange_id)
                    .field("spread_pct", top.spread_pct())
                    .field("elapsed_ms", started.elapsed().as_millis() as u64),
            );

            tick += 1;
            if tick >= MAX_WAIT_TICKS {
                return Err(ExecutionError::SpreadTooWide {
                    symbol: symbol.to_string(),
                    spread_pct: top.spread_pct(),
                    max_spread_pct: self.config.max_spread_pct,
                });
            }
            tokio::time::sleep(TICK).await;
        }
    }

    /// Cancels the resting maker order, fires a market order for whatever
    /// remains, and turns the outcome into a terminal report. Never leaves
    /// the order in `monitoring`.
    pub async fn timeout_taker_fallback(
        &self,
        adapter: &dyn ExchangeAdapter,
        open: &mut OpenOrder,
    ) -> Result<ExecutionReport, ExecutionError> {
        let maker_open_duration = open.submit_ts.elapsed();

        let _ = adapter
            .cancel_order(&open.remote_order_id, &open.request.symbol)
            .await;
        self.apply_transition(open, OrderState::TimedOut)?;
        self.bus.emit(
            EventName::OrderTimedOut,
            event()
                .order_id(&open.order_id)
                .symbol(&open.request.symbol)
                .exchange_id(&open.request.exchange_id)
                .field("elapsed_secs", maker_open_duration.as_secs()),
        );

        let remaining = open.remaining_amount;
        match adapter
            .create_market_order(
                &open.request.symbol,
                open.request.side,
                remaining,
                &open.request.extra_params,
            )
            .await
        {
            Ok(taker_order_id) => {
                let snapshot = adapter
                    .fetch_order(&taker_order_id, &open.request.symbol)
                    .await?;
                open.remote_order_id = taker_order_id;
                self.apply_transition(open, OrderState::Filled)?;
                self.bus.emit(
                    EventName::MakerTimeoutTakerFallback,
                    event()
                        .order_id(&open.order_id)
                        .symbol(&open.request.symbol)
                        .exchange_id(&open.request.exchange_id)
                        .field("maker_open_duration_ms", maker_open_duration.as_millis() as u64),
                );
                ExecutionReport::builder()
                    .order_id(open.order_id.clone())
                    .symbol(open.request.symbol.clone())
                    .exchange_id(open.request.exchange_id.clone())
                    .side(open.request.side)
                    .status(ReportStatus::Filled)
                    .requested_amount(open.request.amount)
                    .filled_amount((open.filled_amount + snapshot.filled_amount).min(open.request.amount))
                    .fill_price(snapshot.avg_price.unwrap_or(open.current_price))
                    .latency_ms(open.submit_ts.elapsed().as_millis() as u64)
                    .timed_out()
                    .build()
            }
            Err(err) => {
                self.apply_transition(open, OrderState::Rejected)?;
                self.bus.emit(
                    EventName::OrderRejected,
                    event()
                        .order_id(&open.order_id)
                        .symbol(&open.request.symbol)
                        .exchange_id(&open.request.exchange_id)
                        .field("reason", err.to_string()),
                );
                ExecutionReport::builder()
                    .order_id(open.order_id.clone())
                    .symbol(open.request.symbol.clone())
                    .exchange_id(open.request.exchange_id.clone())
                    .side(open.request.side)
                    .status(ReportStatus::Failed)
                    .requested_amount(open.request.amount)
                    .filled_amount(open.filled_amount)
                    .latency_ms(open.submit_ts.elapsed().as_millis() as u64)
                    .reason(format!("taker fallback rejected: {err}"))
                    .timed_out()
                    .build()
            }
        }
    }

    pub fn initial_price(&self, top: &BookTop, side: Side) -> f64 {
        top.price_for(side)
    }

    pub fn request_requires_margin(request: &OrderRequest) -> bool {
        request.margin_mode.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_matches_doubling_schedule() {
        assert_eq!(backoff_delay_ms(1, 100, 30_000), 100);
        assert_eq!(backoff_delay_ms(2, 100, 30_000), 200);
        assert_eq!(backoff_delay_ms(3, 100, 30_000), 400);
    }

    #[test]
    fn backoff_delay_caps_out() {
        assert_eq!(backoff_delay_ms(20, 100, 30_000), 30_000);
    }

    #[test]
    fn default_config_validates() {
        assert!(ExecutorConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_attempts_is_invalid() {
        let mut cfg = ExecutorConfig::default();
        cfg.ws_max_reconnect_attempts = 0;
        assert!(cfg.validate().is_err());
    }
}
