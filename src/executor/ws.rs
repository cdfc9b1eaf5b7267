//! Event-driven WebSocket monitoring: two independent streams per order
//! (book + order updates), exponential reconnect backoff, a per-exchange
//! circuit breaker, and a staleness fallback that never cancels.

use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::adapter::{BookTop, ExchangeAdapter, OrderSnapshot, RemoteOrderState};
use crate::error::ExecutionError;
use crate::event_bus::{event, EventName};
use crate::model::{ExecutionReport, OpenOrder, OrderKind, OrderRequest, OrderState, ReportStatus};
use crate::reprice::{decide, RepriceDecision};
use crate::session::{CircuitBreaker, ExchangeSession};

use super::{backoff_delay_ms, BaseExecutor};

pub struct WsExecutor {
    base: BaseExecutor,
}

enum Streams {
    Connected {
        book_rx: broadcast::Receiver<BookTop>,
        order_rx: broadcast::Receiver<OrderSnapshot>,
    },
    RestFallback,
}

impl WsExecutor {
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
        let circuit = session.circuit.clone();

        let top = self
            .base
            .wait_for_spread_gate(adapter, &symbol, &order_id, &exchange_id)
            .await?;
        let initial_price = self.base.initial_price(&top, request.side);

        let mut open = OpenOrder::new(order_id.clone(), request.clone(), initial_price);
        self.base.apply_transition(&mut open, OrderState::Submitted)?;

        open.remote_order_id = adapter
            .create_limit_order(
                &symbol,
                request.side,
                request.amount,
                initial_price,
                &request.extra_params,
            )
            .await?;

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

        // Subscribed once, before connecting, and reused for the whole life
        // of this order: `watch::Receiver::changed()` only fires on the
        // *next* change after subscription, so a receiver re-created every
        // loop iteration (or subscribed only after another order's
        // `try_open()` already fired) could miss the one-time notification
        // and wait on a dead connection forever.
        let mut circuit_rx = circuit.subscribe();

        let mut streams = self
            .connect_or_fallback(adapter, &symbol, &exchange_id, &order_id, &circuit)
            .await;

        // Covers the race where the circuit opened between our subscribe
        // and `connect_or_fallback` returning `Connected`.
        if matches!(streams, Streams::Connected { .. }) && *circuit_rx.borrow() {
            self.base.bus.emit(
                EventName::WsRestFallback,
                event().order_id(&order_id).symbol(&symbol).exchange_id(&exchange_id),
            );
            streams = Streams::RestFallback;
        }

        loop {
            match &mut streams {
                Streams::RestFallback => {
                    match self.rest_fallback_tick(adapter, &mut open, deadline).await? {
                        Some(report) => return Ok(report),
                        None => continue,
                    }
                }
                Streams::Connected { book_rx, order_rx } => {
                    let staleness = tokio::time::sleep(self.base.config.ws_staleness_window);
                    tokio::pin!(staleness);
                    let timeout_sleep = tokio::time::sleep_until(deadline.into());
                    tokio::pin!(timeout_sleep);

                    tokio::select! {
                        biased;

                        _ = &mut timeout_sleep => {
                            return self.base.timeout_taker_fallback(adapter, &mut open).await;
                        }

                        changed = circuit_rx.changed() => {
                            if changed.is_ok() && *circuit_rx.borrow() {
                                self.base.bus.emit(
                                    EventName::WsRestFallback,
                                    event().order_id(&open.order_id).symbol(&symbol).exchange_id(&exchange_id),
                                );
                                streams = Streams::RestFallback;
                            }
                        }

                        book = book_rx.recv() => {
                            if let Ok(top) = book {
                                if matches!(request.kind, OrderKind::Maker) {
                                    let best = top.price_for(request.side);
                                    let decision = decide(
                                        open.current_price,
                                        best,
                                        open.submit_ts.elapsed(),
                                        &self.base.config.reprice,
                                    );
                                    self.apply_reprice(&mut open, adapter, &symbol, &exchange_id, decision).await?;
                                }
                            }
                        }

                        snapshot = order_rx.recv() => {
                            if let Ok(snapshot) = snapshot {
                                if snapshot.order_id != open.remote_order_id {
                                    continue;
                                }
                                if let Some(report) = self.handle_order_update(&mut open, &request, snapshot, &symbol, &exchange_id).await? {
                                    return Ok(report);
                                }
                            }
                        }

                        _ = &mut staleness => {
                            self.base.bus.emit(
                                EventName::WsStalenessFallback,
                                event()
                                    .order_id(&open.order_id)
                                    .symbol(&symbol)
                                    .exchange_id(&exchange_id)
                                    .field("elapsed_ms", open.last_event_ts.elapsed().as_millis() as u64),
                            );
                            let snapshot = adapter.fetch_order(&open.remote_order_id, &symbol).await?;
                            if snapshot.state == RemoteOrderState::Filled {
                                if let Some(report) = self.handle_order_update(&mut open, &request, snapshot, &symbol, &exchange_id).await? {
                                    return Ok(report);
                                }
                            }
                            open.last_event_ts = Instant::now();
                        }
                    }
                }
            }
        }
    }

    async fn connect_or_fallback(
        &self,
        adapter: &dyn ExchangeAdapter,
        symbol: &str,
        exchange_id: &str,
        order_id: &str,
        circuit: &CircuitBreaker,
    ) -> Streams {
        if circuit.is_open() {
            self.base.bus.emit(
                EventName::WsRestFallback,
                event().order_id(order_id).symbol(symbol).exchange_id(exchange_id),
            );
            return Streams::RestFallback;
        }

        let max_attempts = self.base.config.ws_max_reconnect_attempts;
        for attempt in 1..=max_attempts {
            // Short-circuit: a failed book subscription aborts the attempt
            // without also spending an orders subscription on it.
            let connected = match adapter.watch_order_book(symbol).await {
                Ok(book_rx) => match adapter.watch_orders(symbol).await {
                    Ok(order_rx) => Some((book_rx, order_rx)),
                    Err(_) => None,
                },
                Err(_) => None,
            };
            match connected {
                Some((book_rx, order_rx)) => {
                    return Streams::Connected { book_rx, order_rx };
                }
                None => {
                    let delay_ms = backoff_delay_ms(
                        attempt,
                        self.base.config.ws_reconnect_base_delay_ms,
                        self.base.config.ws_reconnect_cap_ms,
                    );
                    self.base.bus.emit(
                        EventName::WsReconnectAttempt,
                        event()
                            .order_id(order_id)
                            .symbol(symbol)
                            .exchange_id(exchange_id)
                            .field("attempt_number", attempt)
                            .field("delay_ms", delay_ms),
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }

        if circuit.try_open() {
            self.base.bus.emit(
                EventName::WsCircuitOpen,
                event().order_id(order_id).symbol(symbol).exchange_id(exchange_id),
            );
        }
        self.base.bus.emit(
            EventName::WsRestFallback,
            event().order_id(order_id).symbol(symbol).exchange_id(exchange_id),
        );
        Streams::RestFallback
    }

    /// One bounded REST poll while operating in fallback mode; returns a
    /// terminal report if one was produced this tick, else `None` to keep
    /// looping.
    async fn rest_fallback_tick(
        &self,
        adapter: &dyn ExchangeAdapter,
        open: &mut OpenOrder,
        deadline: Instant,
    ) -> Result<Option<ExecutionReport>, ExecutionError> {
        if Instant::now() >= deadline {
            return Ok(Some(self.base.timeout_taker_fallback(adapter, open).await?));
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::time::sleep_until(deadline.into()) => {
                return Ok(Some(self.base.timeout_taker_fallback(adapter, open).await?));
            }
        }
        let snapshot = adapter.fetch_order(&open.remote_order_id, &open.request.symbol).await?;
        let symbol = open.request.symbol.clone();
        let exchange_id = open.request.exchange_id.clone();
        let request = open.request.clone();
        self.handle_order_update(open, &request, snapshot, &symbol, &exchange_id).await
    }

    async fn handle_order_update(
        &self,
        open: &mut OpenOrder,
        request: &OrderRequest,
        snapshot: OrderSnapshot,
        symbol: &str,
        exchange_id: &str,
    ) -> Result<Option<ExecutionReport>, ExecutionError> {
        open.last_event_ts = Instant::now();
        match snapshot.state {
            RemoteOrderState::Filled => {
                self.base.apply_transition(open, OrderState::Filled)?;
                self.base.bus.emit(
                    EventName::OrderFillComplete,
                    event()
                        .order_id(&open.order_id)
                        .symbol(symbol)
                        .exchange_id(exchange_id)
                        .field("filled", snapshot.filled_amount),
                );
                Ok(Some(
                    ExecutionReport::builder()
                        .order_id(open.order_id.clone())
                        .symbol(symbol.to_string())
                        .exchange_id(exchange_id.to_string())
                        .side(request.side)
                        .status(ReportStatus::Filled)
                        .requested_amount(request.amount)
                        .filled_amount(snapshot.filled_amount)
                        .fill_price(snapshot.avg_price.unwrap_or(open.current_price))
                        .latency_ms(open.submit_ts.elapsed().as_millis() as u64)
                        .build()?,
                ))
            }
            RemoteOrderState::PartiallyFilled => {
                open.filled_amount = snapshot.filled_amount;
                open.remaining_amount = request.amount - snapshot.filled_amount;
                self.base.apply_transition(open, OrderState::PartiallyFilled)?;
                self.base.bus.emit(
                    EventName::OrderFillPartial,
                    event()
                        .order_id(&open.order_id)
                        .symbol(symbol)
                        .exchange_id(exchange_id)
                        .field("filled", snapshot.filled_amount)
                        .field("remaining", open.remaining_amount),
                );
                Ok(None)
            }
            RemoteOrderState::Rejected => {
                self.base.apply_transition(open, OrderState::Rejected)?;
                self.base.bus.emit(
                    EventName::OrderRejected,
                    event().order_id(&open.order_id).symbol(symbol).exchange_id(exchange_id),
                );
                Ok(Some(
                    ExecutionReport::builder()
                        .order_id(open.order_id.clone())
                        .symbol(symbol.to_string())
                        .exchange_id(exchange_id.to_string())
                        .side(request.side)
                        .status(ReportStatus::Rejected)
                        .requested_amount(request.amount)
                        .filled_amount(open.filled_amount)
                        .latency_ms(open.submit_ts.elapsed().as_millis() as u64)
                        .reason("rejected by exchange".to_string())
                        .build()?,
                ))
            }
            RemoteOrderState::Cancelled => {
                self.base.apply_transition(open, OrderState::Cancelled)?;
                Ok(Some(
                    ExecutionReport::builder()
                        .order_id(open.order_id.clone())
                        .symbol(symbol.to_string())
                        .exchange_id(exchange_id.to_string())
                        .side(request.side)
                        .status(ReportStatus::Cancelled)
                        .requested_amount(request.amount)
                        .filled_amount(open.filled_amount)
                        .latency_ms(open.submit_ts.elapsed().as_millis() as u64)
                        .build()?,
                ))
            }
            RemoteOrderState::Open => Ok(None),
        }
    }

    async fn apply_reprice(
        &self,
        open: &mut OpenOrder,
        adapter: &dyn ExchangeAdapter,
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
