//! Order, batch, and report types that flow through the execution core.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutionError;

pub type ExtraParams = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Maker,
    Taker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginMode {
    Cross,
    Isolated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub amount: f64,
    pub kind: OrderKind,
    pub exchange_id: String,
    pub leverage: Option<u32>,
    pub margin_mode: Option<MarginMode>,
    #[serde(default)]
    pub extra_params: ExtraParams,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("symbol must not be empty".into());
        }
        if self.exchange_id.trim().is_empty() {
            return Err("exchange_id must not be empty".into());
        }
        if !(self.amount.is_finite()) || self.amount <= 0.0 {
            return Err(format!("amount must be positive, got {}", self.amount));
        }
        if let Some(lev) = self.leverage {
            if lev == 0 {
                return Err("leverage must be positive when set".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBatch {
    pub orders: Vec<OrderRequest>,
}

impl OrderBatch {
    pub fn new(orders: Vec<OrderRequest>) -> Self {
        Self { orders }
    }

    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.orders.is_empty() {
            return Err(ExecutionError::ConfigInvalid(
                "batch must contain at least one order".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Pending,
    Submitted,
    Monitoring,
    PartiallyFilled,
    Filled,
    Cancelled,
    TimedOut,
    Rejected,
    Failed,
}

/// Valid edges of the order lifecycle. Anything not listed here is refused.
pub fn can_transition(from: OrderState, to: OrderState) -> bool {
    use OrderState::*;
    matches!(
        (from, to),
        (Pending, Submitted)
            | (Pending, Rejected)
            | (Pending, Failed)
            | (Submitted, Monitoring)
            | (Submitted, Rejected)
            | (Submitted, Failed)
            | (Monitoring, PartiallyFilled)
            | (Monitoring, Filled)
            | (Monitoring, Cancelled)
            | (Monitoring, TimedOut)
            | (Monitoring, Rejected)
            | (Monitoring, Failed)
            | (PartiallyFilled, PartiallyFilled)
            | (PartiallyFilled, Filled)
            | (PartiallyFilled, Cancelled)
            | (PartiallyFilled, TimedOut)
            | (PartiallyFilled, Failed)
            | (TimedOut, Submitted)
            | (TimedOut, Filled)
            | (TimedOut, Rejected)
            | (TimedOut, Failed)
            | (Cancelled, Submitted)
    )
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    /// Stable client-side correlation key used in every event and the
    /// final report. Unlike the exchange's own order id, this never
    /// changes across a reprice cancel+recreate.
    pub order_id: String,
    /// The exchange's current order id for this logical order. Replaced
    /// after each reprice (cancel old, create new) and after a taker
    /// fallback market order.
    pub remote_order_id: String,
    pub request: OrderRequest,
    pub submit_ts: Instant,
    pub current_price: f64,
    pub filled_amount: f64,
    pub remaining_amount: f64,
    pub state: OrderState,
    pub last_event_ts: Instant,
}

impl OpenOrder {
    pub fn new(order_id: String, request: OrderRequest, initial_price: f64) -> Self {
        let now = Instant::now();
        let amount = request.amount;
        Self {
            order_id,
            remote_order_id: String::new(),
            request,
            submit_ts: now,
            current_price: initial_price,
            filled_amount: 0.0,
            remaining_amount: amount,
            state: OrderState::Pending,
            last_event_ts: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    order_id: String,
    symbol: String,
    exchange_id: String,
    side: Side,
    status: ReportStatus,
    requested_amount: f64,
    filled_amount: f64,
    fill_price: Option<f64>,
    latency_ms: u64,
    reason: Option<String>,
    /// Set when this order hit its timeout and went through the
    /// taker-fallback path before landing on `status`, whatever that
    /// final status turned out to be. Tracked separately from `status`
    /// since a timed-out order still resolves to `Filled` or `Failed`.
    timed_out: bool,
}

impl ExecutionReport {
    pub fn order_id(&self) -> &str {
        &self.order_id
    }
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
    pub fn exchange_id(&self) -> &str {
        &self.exchange_id
    }
    pub fn side(&self) -> Side {
        self.side
    }
    pub fn status(&self) -> ReportStatus {
        self.status
    }
    pub fn requested_amount(&self) -> f64 {
        self.requested_amount
    }
    pub fn filled_amount(&self) -> f64 {
        self.filled_amount
    }
    pub fn fill_price(&self) -> Option<f64> {
        self.fill_price
    }
    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn builder() -> ExecutionReportBuilder {
        ExecutionReportBuilder::default()
    }

    /// Execution reports are immutable once built. This always fails; it
    /// exists so callers that hold a report can't silently mutate history.
    pub fn amend(&self) -> Result<(), ExecutionError> {
        Err(ExecutionError::Validation(
            "execution reports are immutable after construction".into(),
        ))
    }
}

#[derive(Debug, Default)]
pub struct ExecutionReportBuilder {
    order_id: Option<String>,
    symbol: Option<String>,
    exchange_id: Option<String>,
    side: Option<Side>,
    status: Option<ReportStatus>,
    requested_amount: Option<f64>,
    filled_amount: f64,
    fill_price: Option<f64>,
    latency_ms: u64,
    reason: Option<String>,
    timed_out: bool,
}

impl ExecutionReportBuilder {
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
    pub fn side(mut self, v: Side) -> Self {
        self.side = Some(v);
        self
    }
    pub fn status(mut self, v: ReportStatus) -> Self {
        self.status = Some(v);
        self
    }
    pub fn requested_amount(mut self, v: f64) -> Self {
        self.requested_amount = Some(v);
        self
    }
    pub fn filled_amount(mut self, v: f64) -> Self {
        self.filled_amount = v;
        self
    }
    pub fn fill_price(mut self, v: f64) -> Self {
        self.fill_price = Some(v);
        self
    }
    pub fn latency_ms(mut self, v: u64) -> Self {
        self.latency_ms = v;
        self
    }
    pub fn reason(mut self, v: impl Into<String>) -> Self {
        self.reason = Some(v.into());
        self
    }
    pub fn timed_out(mut self) -> Self {
        self.timed_out = true;
        self
    }

    pub fn build(self) -> Result<ExecutionReport, ExecutionError> {
        Ok(ExecutionReport {
            order_id: self
                .order_id
                .ok_or_else(|| ExecutionError::Validation("report missing order_id".into()))?,
            symbol: self
                .symbol
                .ok_or_else(|| ExecutionError::Validation("report missing symbol".into()))?,
            exchange_id: self
                .exchange_id
                .ok_or_else(|| ExecutionError::Validation("report missing exchange_id".into()))?,
            side: self
                .side
                .ok_or_else(|| ExecutionError::Validation("report missing side".into()))?,
            status: self
                .status
                .ok_or_else(|| ExecutionError::Validation("report missing status".into()))?,
            requested_amount: self.requested_amount.ok_or_else(|| {
                ExecutionError::Validation("report missing requested_amount".into())
            })?,
            filled_amount: self.filled_amount,
            fill_price: self.fill_price,
            latency_ms: self.latency_ms,
            reason: self.reason,
            timed_out: self.timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_symbol() {
        let req = OrderRequest {
            symbol: "".into(),
            side: Side::Buy,
            amount: 1.0,
            kind: OrderKind::Taker,
            exchange_id: "binance".into(),
            leverage: None,
            margin_mode: None,
            extra_params: ExtraParams::default(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_amount() {
        let req = OrderRequest {
            symbol: "BTC-USDT".into(),
            side: Side::Buy,
            amount: 0.0,
            kind: OrderKind::Taker,
            exchange_id: "binance".into(),
            leverage: None,
            margin_mode: None,
            extra_params: ExtraParams::default(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn transition_table_allows_fill_path() {
        assert!(can_transition(OrderState::Pending, OrderState::Submitted));
        assert!(can_transition(OrderState::Submitted, OrderState::Monitoring));
        assert!(can_transition(OrderState::Monitoring, OrderState::Filled));
    }

    #[test]
    fn transition_table_rejects_skip_to_filled() {
        assert!(!can_transition(OrderState::Pending, OrderState::Filled));
    }

    #[test]
    fn report_amend_always_fails() {
        let report = ExecutionReport::builder()
            .order_id("o1")
            .symbol("BTC-USDT")
            .exchange_id("binance")
            .side(Side::Buy)
            .status(ReportStatus::Filled)
            .requested_amount(1.0)
            .filled_amount(1.0)
            .fill_price(100.0)
            .build()
            .unwrap();
        assert!(report.amend().is_err());
    }

    #[test]
    fn builder_requires_mandatory_fields() {
        let err = ExecutionReport::builder().symbol("BTC-USDT").build();
        assert!(err.is_err());
    }
}
