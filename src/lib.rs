//! Multi-exchange order execution engine.
//!
//! Entry point is [`router::OrderRouter::execute_orders`]: partitions a
//! batch by exchange, dedupes per-exchange setup via [`session::ExchangeSession`],
//! runs each order through a REST or WebSocket [`executor`], and returns one
//! [`model::ExecutionReport`] per order in input order.

pub mod adapter;
pub mod alert;
pub mod error;
pub mod event_bus;
pub mod executor;
pub mod model;
pub mod reprice;
pub mod router;
pub mod session;

pub use adapter::{AdapterFailure, ExchangeAdapter, MockAdapter};
pub use error::ExecutionError;
pub use event_bus::{EventBus, StructuredEvent};
pub use executor::{ExecutorConfig, Strategy};
pub use model::{
    ExecutionReport, OrderBatch, OrderKind, OrderRequest, OrderState, ReportStatus, Side,
};
pub use reprice::{RepriceDecision, RepricePolicyConfig};
pub use router::OrderRouter;
