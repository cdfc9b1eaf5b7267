//! Poll-based monitoring: fetches order status and book top at a bounded
//! cadence instead of subscribing to streams.

use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use crate::error::ExecutionError;
use crate::event_bus::{event, EventName};
use crate::model::{ExecutionReport, OpenOrder, OrderRequest, OrderState, ReportStatus};
use crate::reprice::{decide, RepriceDecision};
use crate::session::ExchangeSession;

use super::BaseExecutor;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct RestExecutor {
    base: BaseExecutor,
}

impl RestExecutor {
    pub fn new(base: BaseExecutor) -> Self {
        Self { base }
    }

    pub async fn execute(
        &self,
        order_id: String,
        request: OrderRequest,
        session: &ExchangeSession,
    ) -> Result<ExecutionReport, ExecutionError> {
        let adapter = session.adapter.as_ref();
        let symbol = request.symbol.clone();
        let exchange_id = request.exchange_id.clone();

        let top = self
            .base
            .wait_for_spread_gate(adapter, &symbol, &order_id, &exchange_id)
            .await?;
        let initial_price = self.base.initial_price(&top, request.side);

        let mut open = OpenOrder::new(order_id.clone(), request.clone(), initial_price);
        self.base.apply_transition(&mut open, OrderState::Submitted)?;

        open.remote_order_id = match request.kind {
            crate::model::OrderKind::Maker => {
                adapter
                    .create_limit_order(
                        &symbol,
                        request.side,
                        request.amount,
                        initial_price,
                        &request.extra_params,
                    )
                    .await?
            }
            crate::model::OrderKind::Taker => {
                adapter
                    .create_market_order(&symbol, request.side, request.amount, &request.extra_params)
                    .await?
            }
        };

        self.base.bus.emit(
            EventName::OrderSubmitted,
            event()
                .order_id(&order_id)
                .symbol(&symbol)
                .exchange_id(&exchange_id)
                .field("price", initial_price),
        );
        self.base.apply_transition(&mut open, OrderState::Monitoring)?;

        let deadline = Instant::now() + self.base.config.timeout_duration;
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {}
                _ = tokio::time::sleep_until(deadline.into()) => {
                    return self.base.timeout_taker_fallback(adapter, &mut open).await;
                }
            }

            let snapshot = adapter.fetch_order(&open.remote_order_id, &symbol).await?;
            match snapshot.state {
                crate::adapter::RemoteOrderState::Filled => {
                    self.base.apply_transition(&mut open, OrderState::Filled)?;
                    self.base.bus.emit(
                        EventName::OrderFillComplete,
                        event()
                            .order_id(&order_id)
                            .symbol(&symbol)
                            .exchange_id(&exchange_id)
                            .field("filled", snapshot.filled_amount),
                    );
                    return ExecutionReport::builder()
                        .order_id(order_id)
                        .symbol(symbol)
                        .exchange_id(exchange_id)
                        .side(request.side)
                        .status(ReportStatus::Filled)
                        .requested_amount(request.amount)
                        .filled_amount(snapshot.filled_amount)
                        .fill_price(snapshot.avg_price.unwrap_or(open.current_price))
                        .latency_ms(open.submit_ts.elapsed().as_millis() as u64)
                        .build();
                }
                crate::adapter::RemoteOrderState::PartiallyFilled => {
                    open.filled_amount = snapshot.filled_amount;
                    open.remaining_amount = request.amount - snapshot.filled_amount;
                    self.base.apply_transition(&mut open, OrderState::PartiallyFilled)?;
                    self.base.bus.emit(
                        EventName::OrderFillPartial,
                        event()
                            .order_id(&order_id)
                            .symbol(&symbol)
                            .exchange_id(&exchange_id)
                            .field("filled", snapshot.filled_amount)
                            .field("remaining", open.remaining_amount),
                    );
                }
                crate::adapter::RemoteOrderState::Rejected => {
                    self.base.apply_transition(&mut open, OrderState::Rejected)?;
                    self.base.bus.emit(
                        EventName::OrderRejected,
                        event().order_id(&order_id).symbol(&symbol).exchange_id(&exchange_id),
                    );
                    return ExecutionReport::builder()
                        .order_id(order_id)
                        .symbol(symbol)
                        .exchange_id(exchange_id)
                        .side(request.side)
                        .status(ReportStatus::Rejected)
                        .requested_amount(request.amount)
                        .filled_amount(open.filled_amount)
                        .latency_ms(open.submit_ts.elapsed().as_millis() as u64)
                        .reason("rejected by exchange".to_string())
                        .build();
                }
                crate::adapter::RemoteOrderState::Cancelled => {
                    self.base.apply_transition(&mut open, OrderState::Cancelled)?;
                    return ExecutionReport::builder()
                        .order_id(order_id)
                        .symbol(symbol)
                        .exchange_id(exchange_id)
                        .side(request.side)
                        .status(ReportStatus::Cancelled)
                        .requested_amount(request.amount)
                        .filled_amount(open.filled_amount)
                        .latency_ms(open.submit_ts.elapsed().as_millis() as u64)
                        .build();
                }
                crate::adapter::RemoteOrderState::Open => {}
            }

            if matches!(request.kind, crate::model::OrderKind::Maker) {
                if let Ok(book) = adapter.fetch_order_book(&symbol).await {
                    let best = book.price_for(request.side);
                    let decision = decide(
                        open.current_price,
                        best,
                        open.submit_ts.elapsed(),
                        &self.base.config.reprice,
                    );
                    self.apply_reprice(&mut open, adapter, &symbol, &exchange_id, decision)
                        .await?;
                }
            }
        }
    }

    async fn apply_reprice(
        &self,
        open: &mut OpenOrder,
        adapter: &dyn crate::adapter::ExchangeAdapter,
        symbol: &str,
        exchange_id: &str,
        decision: RepriceDecision,
    ) -> Result<(), ExecutionError> {
        match decision {
            RepriceDecision::Suppress(change_pct) => {
                self.base.bus.emit(
                    EventName::OrderRepriceSuppressed,
                    event()
                        .order_id(&open.order_id)
                        .symbol(symbol)
                        .exchange_id(exchange_id)
                        .field("actual", change_pct)
                        .field("threshold", self.base.config.reprice.min_reprice_threshold_pct),
                );
                Ok(())
            }
            RepriceDecision::Reprice(new_price) | RepriceDecision::ElapsedOverride(new_price) => {
                adapter.cancel_order(&open.remote_order_id, symbol).await?;
                let new_remote_id = adapter
                    .create_limit_order(
                        symbol,
                        open.request.side,
                        open.remaining_amount,
                        new_price,
                        &open.request.extra_params,
                    )
                    .await?;
                self.base.bus.emit(
                    EventName::OrderRepriced,
                    event()
                        .order_id(&open.order_id)
                        .symbol(symbol)
                        .exchange_id(exchange_id)
                        .field("prev", open.current_price)
                        .field("new", new_price),
                );
                open.current_price = new_price;
                open.remote_order_id = new_remote_id;
                Ok(())
            }
        }
    }
}
