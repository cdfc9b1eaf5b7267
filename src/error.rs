//! Typed error surface for the execution core.
//!
//! Transient variants are recovered locally by the callers that produce them
//! (spread wait, WS reconnect, staleness fallback) and rarely escape this
//! crate. Terminal variants for a single order never escape `execute` — the
//! executor turns them into a `failed`/`rejected`/`timed_out` report instead.
//! `ConfigInvalid` is the only variant that can abort a batch before it starts.

use thiserror::Error;

use crate::adapter::AdapterFailure;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("spread too wide for {symbol}: {spread_pct:.4} > {max_spread_pct:.4}")]
    SpreadTooWide {
        symbol: String,
        spread_pct: f64,
        max_spread_pct: f64,
    },

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("order timed out after {elapsed_secs}s")]
    OrderTimedOut { elapsed_secs: u64 },

    #[error("taker fallback failed: {0}")]
    TakerFallbackFailed(String),

    #[error("websocket disconnected: {0}")]
    WsDisconnected(String),

    #[error("websocket circuit open for exchange {exchange_id}")]
    WsCircuitOpen { exchange_id: String },

    #[error("stale monitoring for order {order_id}, no events for {elapsed_ms}ms")]
    StaleMonitoring { order_id: String, elapsed_ms: u64 },

    #[error("adapter error: {0}")]
    AdapterError(#[from] AdapterFailure),

    #[error("validation failed: {0}")]
    Validation(String),
}
