//! Demonstration binary: builds a small batch against in-memory mock
//! venues and prints the resulting alert. Not part of the library surface.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use xvenue_exec::adapter::{BookTop, ExchangeAdapter, MockAdapter};
use xvenue_exec::model::{MarginMode, OrderBatch, OrderKind, OrderRequest, Side};
use xvenue_exec::{EventBus, ExecutorConfig, OrderRouter};

#[derive(Debug, Clone)]
struct RunSettings {
    symbol: String,
    amount: f64,
    exchange_ids: Vec<String>,
}

impl RunSettings {
    fn from_env() -> Self {
        let symbol = env::var("DEMO_SYMBOL").unwrap_or_else(|_| "BTC/USDT".to_string());
        let amount: f64 = env::var("DEMO_AMOUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.1);
        let exchange_ids = env::var("DEMO_EXCHANGES")
            .unwrap_or_else(|_| "bybit,kucoin".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();
        Self {
            symbol,
            amount,
            exchange_ids,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_max_level(Level::INFO)
        .init();

    let settings = RunSettings::from_env();
    info!(?settings, "starting demo batch");

    let bybit = Arc::new(MockAdapter::new(true));
    bybit.set_book(
        &settings.symbol,
        BookTop {
            best_bid: 43_200.0,
            best_ask: 43_201.0,
        },
    );

    let mut exchanges: HashMap<String, Arc<dyn ExchangeAdapter>> = HashMap::new();
    exchanges.insert("bybit".to_string(), bybit.clone());

    let orders: Vec<OrderRequest> = settings
        .exchange_ids
        .iter()
        .map(|exchange_id| OrderRequest {
            symbol: settings.symbol.clone(),
            side: Side::Buy,
            amount: settings.amount,
            kind: OrderKind::Taker,
            exchange_id: exchange_id.clone(),
            leverage: Some(1),
            margin_mode: Some(MarginMode::Cross),
            extra_params: Default::default(),
        })
        .collect();

    let bus = Arc::new(EventBus::new());
    let router = OrderRouter::new(ExecutorConfig::default(), bus)?;
    let reports = router
        .execute_orders(&exchanges, OrderBatch::new(orders))
        .await?;

    println!("{}", xvenue_exec::alert::format_alert(&reports));
    Ok(())
}
