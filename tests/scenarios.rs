//! End-to-end scenarios driven entirely through the in-memory mock adapter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use xvenue_exec::adapter::{BookTop, ExchangeAdapter, MockAdapter};
use xvenue_exec::model::{MarginMode, OrderBatch, OrderKind, OrderRequest, ReportStatus, Side};
use xvenue_exec::{EventBus, ExecutorConfig, OrderRouter, RepricePolicyConfig};

fn basic_request(symbol: &str, exchange_id: &str, kind: OrderKind) -> OrderRequest {
    OrderRequest {
        symbol: symbol.to_string(),
        side: Side::Buy,
        amount: 0.1,
        kind,
        exchange_id: exchange_id.to_string(),
        leverage: Some(1),
        margin_mode: Some(MarginMode::Cross),
        extra_params: Default::default(),
    }
}

#[tokio::test]
async fn walking_skeleton_taker_order_fills_on_rest() {
    let adapter = Arc::new(MockAdapter::new(false));
    adapter.set_book("BTC/USDT", BookTop { best_bid: 50_000.0, best_ask: 50_001.0 });

    let mut exchanges: HashMap<String, Arc<dyn ExchangeAdapter>> = HashMap::new();
    exchanges.insert("bybit".to_string(), adapter.clone());

    let bus = Arc::new(EventBus::new());
    let router = OrderRouter::new(ExecutorConfig::default(), bus).unwrap();

    let batch = OrderBatch::new(vec![basic_request("BTC/USDT", "bybit", OrderKind::Taker)]);
    let reports = router.execute_orders(&exchanges, batch).await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].exchange_id(), "bybit");
    assert_eq!(reports[0].status(), ReportStatus::Filled);
}

#[tokio::test]
async fn dedups_margin_and_leverage_calls_across_orders() {
    let adapter = Arc::new(MockAdapter::new(false));
    adapter.set_book("BTC/USDT", BookTop { best_bid: 50_000.0, best_ask: 50_001.0 });
    adapter.set_book("ETH/USDT", BookTop { best_bid: 3_000.0, best_ask: 3_001.0 });

    let mut exchanges: HashMap<String, Arc<dyn ExchangeAdapter>> = HashMap::new();
    exchanges.insert("bybit".to_string(), adapter.clone());

    let bus = Arc::new(EventBus::new());
    let router = OrderRouter::new(ExecutorConfig::default(), bus).unwrap();

    let batch = OrderBatch::new(vec![
        basic_request("BTC/USDT", "bybit", OrderKind::Taker),
        basic_request("BTC/USDT", "bybit", OrderKind::Taker),
        basic_request("BTC/USDT", "bybit", OrderKind::Taker),
        basic_request("ETH/USDT", "bybit", OrderKind::Taker),
        basic_request("ETH/USDT", "bybit", OrderKind::Taker),
    ]);
    let reports = router.execute_orders(&exchanges, batch).await.unwrap();

    assert_eq!(reports.len(), 5);
    assert_eq!(adapter.margin_call_count(), 2);
    assert!(adapter.leverage_call_count() <= 2);
}

#[tokio::test]
async fn reprice_suppression_below_threshold() {
    use xvenue_exec::reprice::{decide, RepriceDecision};

    let cfg = RepricePolicyConfig {
        min_reprice_threshold_pct: 0.001,
        elapsed_override: None,
    };
    let decision = decide(43200.00, 43200.20, Duration::from_secs(0), &cfg);
    match decision {
        RepriceDecision::Suppress(actual) => assert!((actual - 0.00000463).abs() < 0.000001),
        other => panic!("expected suppress, got {other:?}"),
    }
}

#[tokio::test]
async fn reprice_fires_above_threshold() {
    use xvenue_exec::reprice::{decide, RepriceDecision};

    let cfg = RepricePolicyConfig {
        min_reprice_threshold_pct: 0.001,
        elapsed_override: None,
    };
    let decision = decide(43200.00, 43140.00, Duration::from_secs(0), &cfg);
    assert_eq!(decision, RepriceDecision::Reprice(43140.00));
}

#[tokio::test]
async fn maker_timeout_falls_back_to_taker_fill() {
    let adapter = Arc::new(MockAdapter::new(false));
    adapter.set_book("ETH/USDT", BookTop { best_bid: 3_000.0, best_ask: 3_001.0 });

    let mut exchanges: HashMap<String, Arc<dyn ExchangeAdapter>> = HashMap::new();
    exchanges.insert("bybit".to_string(), adapter.clone());

    let mut config = ExecutorConfig::default();
    config.timeout_duration = Duration::from_millis(50);

    let bus = Arc::new(EventBus::new());
    let router = OrderRouter::new(config, bus.clone()).unwrap();

    let batch = OrderBatch::new(vec![basic_request("ETH/USDT", "bybit", OrderKind::Maker)]);
    let reports = router.execute_orders(&exchanges, batch).await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status(), ReportStatus::Filled);
    let events = bus.events();
    assert!(events.iter().any(|e| e.name == "order_timed_out"));
    assert!(events.iter().any(|e| e.name == "maker_timeout_taker_fallback"));
}

#[tokio::test]
async fn ws_circuit_opens_and_falls_back_to_rest() {
    let adapter = Arc::new(MockAdapter::new(true));
    adapter.set_book("ETH/USDT", BookTop { best_bid: 3_000.0, best_ask: 3_001.0 });
    adapter.set_ws_failures(3);

    let mut exchanges: HashMap<String, Arc<dyn ExchangeAdapter>> = HashMap::new();
    exchanges.insert("bybit".to_string(), adapter.clone());

    let mut config = ExecutorConfig::default();
    config.ws_reconnect_base_delay_ms = 5;
    config.ws_reconnect_cap_ms = 20;
    config.timeout_duration = Duration::from_millis(300);

    let bus = Arc::new(EventBus::new());
    let router = OrderRouter::new(config, bus.clone()).unwrap();

    let batch = OrderBatch::new(vec![basic_request("ETH/USDT", "bybit", OrderKind::Maker)]);
    let _reports = router.execute_orders(&exchanges, batch).await.unwrap();

    let events = bus.events();
    let reconnect_attempts = events.iter().filter(|e| e.name == "ws_reconnect_attempt").count();
    assert_eq!(reconnect_attempts, 3);
    assert!(events.iter().any(|e| e.name == "ws_circuit_open"));
    assert!(events.iter().any(|e| e.name == "ws_rest_fallback"));
}

#[tokio::test]
async fn orphaned_order_reports_failed_exchange_not_found() {
    let adapter = Arc::new(MockAdapter::new(false));
    adapter.set_book("BTC/USDT", BookTop { best_bid: 50_000.0, best_ask: 50_001.0 });

    let mut exchanges: HashMap<String, Arc<dyn ExchangeAdapter>> = HashMap::new();
    exchanges.insert("bybit".to_string(), adapter.clone());

    let bus = Arc::new(EventBus::new());
    let router = OrderRouter::new(ExecutorConfig::default(), bus.clone()).unwrap();

    let batch = OrderBatch::new(vec![
        basic_request("BTC/USDT", "bybit", OrderKind::Taker),
        basic_request("BTC/USDT", "kucoin", OrderKind::Taker),
    ]);
    let reports = router.execute_orders(&exchanges, batch).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].status(), ReportStatus::Filled);
    assert_eq!(reports[1].status(), ReportStatus::Failed);
    assert_eq!(reports[1].reason(), Some("exchange_not_found"));

    let alert = xvenue_exec::alert::format_alert(&reports);
    assert!(alert.contains("orphaned BTC/USDT@kucoin"));
}
