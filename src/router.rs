//! Router: the crate's single public entry point. Partitions a batch by
//! exchange, stands up sessions, dispatches each order to the right
//! executor, and collects reports in input order.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::adapter::ExchangeAdapter;
use crate::error::ExecutionError;
use crate::event_bus::EventBus;
use crate::executor::{BaseExecutor, ExecutorConfig, RestExecutor, WsExecutor};
use crate::model::{ExecutionReport, OrderBatch, OrderKind, ReportStatus};
use crate::session::ExchangeSession;

pub struct OrderRouter {
    config: ExecutorConfig,
    bus: Arc<EventBus>,
}

impl OrderRouter {
    pub fn new(config: ExecutorConfig, bus: Arc<EventBus>) -> Result<Self, ExecutionError> {
        config.validate()?;
        Ok(Self { config, bus })
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Single public surface: partitions, routes, executes, and tears down.
    /// Refactors to the internals must never require callers to call
    /// anything else.
    pub async fn execute_orders(
        &self,
        exchanges: &HashMap<String, Arc<dyn ExchangeAdapter>>,
        batch: OrderBatch,
    ) -> Result<Vec<ExecutionReport>, ExecutionError> {
        batch.validate()?;

        let mut reports: Vec<Option<ExecutionReport>> = Vec::with_capacity(batch.orders.len());
        reports.resize_with(batch.orders.len(), || None);

        let mut by_exchange: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, request) in batch.orders.iter().enumerate() {
            if !exchanges.contains_key(&request.exchange_id) {
                let order_id = Uuid::new_v4().to_string();
                crate::session::ExchangeSession::emit_exchange_not_found(
                    &self.bus,
                    &request.exchange_id,
                    &request.symbol,
                    &order_id,
                );
                reports[idx] = Some(
                    ExecutionReport::builder()
                        .order_id(order_id)
                        .symbol(request.symbol.clone())
                        .exchange_id(request.exchange_id.clone())
                        .side(request.side)
                        .status(ReportStatus::Failed)
                        .requested_amount(request.amount)
                        .filled_amount(0.0)
                        .latency_ms(0)
                        .reason("exchange_not_found")
                        .build()?,
                );
                continue;
            }
            by_exchange.entry(request.exchange_id.clone()).or_default().push(idx);
        }

        for (exchange_id, indices) in by_exchange {
            let adapter = exchanges.get(&exchange_id).expect("checked above").clone();
            let mut session = ExchangeSession::new(exchange_id.clone(), adapter.clone());

            // Validate every order up front so an invalid one never reaches
            // `session.init`, which issues real margin/leverage adapter
            // calls keyed on the symbols it's given — fail-fast means those
            // calls must never fire for an order that's already doomed.
            let mut valid_indices = Vec::with_capacity(indices.len());
            for idx in indices {
                let request = &batch.orders[idx];
                if let Err(reason) = request.validate() {
                    reports[idx] = Some(
                        ExecutionReport::builder()
                            .order_id(Uuid::new_v4().to_string())
                            .symbol(request.symbol.clone())
                            .exchange_id(request.exchange_id.clone())
                            .side(request.side)
                            .status(ReportStatus::Failed)
                            .requested_amount(request.amount)
                            .filled_amount(0.0)
                            .latency_ms(0)
                            .reason(reason)
                            .build()?,
                    );
                    continue;
                }
                valid_indices.push(idx);
            }

            if valid_indices.is_empty() {
                continue;
            }

            let init_entries: Vec<_> = valid_indices
                .iter()
                .map(|&idx| {
                    let req = &batch.orders[idx];
                    (
                        req.symbol.clone(),
                        req.margin_mode,
                        req.leverage,
                        matches!(req.kind, OrderKind::Maker),
                    )
                })
                .collect();
            session.init(&init_entries, &self.bus).await?;

            for idx in valid_indices {
                let request = batch.orders[idx].clone();
                let order_id = Uuid::new_v4().to_string();
                let use_ws = session.adapter.capabilities().supports_websocket
                    && matches!(request.kind, OrderKind::Maker);

                let result = if use_ws {
                    let executor = WsExecutor::new(BaseExecutor::new(self.config.clone(), self.bus.clone()));
                    executor.execute(order_id, request, &session).await
                } else {
                    let executor = RestExecutor::new(BaseExecutor::new(self.config.clone(), self.bus.clone()));
                    executor.execute(order_id, request, &session).await
                };

                reports[idx] = Some(match result {
                    Ok(report) => report,
                    Err(err) => ExecutionReport::builder()
                        .order_id(Uuid::new_v4().to_string())
                        .symbol(batch.orders[idx].symbol.clone())
                        .exchange_id(batch.orders[idx].exchange_id.clone())
                        .side(batch.orders[idx].side)
                        .status(ReportStatus::Failed)
                        .requested_amount(batch.orders[idx].amount)
                        .filled_amount(0.0)
                        .latency_ms(0)
                        .reason(err.to_string())
                        .build()?,
                });
            }

            session.teardown(&self.bus);
        }

        Ok(reports.into_iter().map(|r| r.expect("every index filled")).collect())
    }
}
