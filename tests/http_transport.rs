//! `ReqwestTransport` against a real TCP backend.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use collector_resilience::collector::{CollectorBuilder, HttpJsonCollector};
use collector_resilience::config::{CollectorSettings, RateLimitConfig};
use collector_resilience::error::CollectorError;
use collector_resilience::sink::MemorySink;
use collector_resilience::transport::{ReqwestTransport, TransportError};

mod common;
use common::MockResponse;

fn quick_settings() -> CollectorSettings {
    CollectorSettings {
        max_retries: 2,
        retry_delay_secs: 0.01,
        max_retry_delay_secs: 0.1,
        request_timeout_secs: 2.0,
        ..Default::default()
    }
}

fn fast_limiter() -> RateLimitConfig {
    RateLimitConfig {
        default_rate: 10.0,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_collects_records_and_reads_quota_headers() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let addr = common::start_programmable_backend(move |line| {
        log.lock().unwrap().push(line);
        async {
            MockResponse::new(200, r#"{"data":[{"p":1},{"p":2}]}"#)
                .header("X-RateLimit-Limit", "100")
                .header("X-RateLimit-Remaining", "50")
                .header("X-RateLimit-Reset", "60")
        }
    })
    .await;

    let sink = MemorySink::new();
    let collector = HttpJsonCollector::new("quotes", format!("http://{addr}"), "/v1/quotes")
        .with_param("symbol", "AAPL")
        .with_records_pointer("/data");
    let svc = CollectorBuilder::new(collector)
        .settings(quick_settings())
        .transport(Arc::new(ReqwestTransport::new()))
        .sink(Arc::new(sink.clone()))
        .build();
    svc.connect().await.unwrap();

    let outcome = svc.collect_once().await.unwrap();
    assert!(outcome.success, "{:?}", outcome.errors);
    assert_eq!(outcome.data_points_collected, 2);
    assert_eq!(sink.len(), 2);
    assert_eq!(sink.records()[0].source, "quotes");

    let lines = seen.lock().unwrap().clone();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("GET /v1/quotes?symbol=AAPL"), "{}", lines[0]);

    let limiter = svc.core().limiter().snapshot();
    let endpoint = &limiter.endpoints["/v1/quotes"];
    assert_eq!(endpoint.limit, Some(100));
    assert_eq!(endpoint.remaining, Some(50));
    assert!(endpoint.quota_rate.is_some());
}

#[tokio::test]
async fn test_server_error_then_recovery() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let addr = common::start_programmable_backend(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                MockResponse::new(503, "{}")
            } else {
                MockResponse::new(200, "[1]")
            }
        }
    })
    .await;

    let svc = CollectorBuilder::new(HttpJsonCollector::new("q", format!("http://{addr}"), "/v1"))
        .settings(quick_settings())
        .rate_limit(fast_limiter())
        .transport(Arc::new(ReqwestTransport::new()))
        .build();
    svc.connect().await.unwrap();

    let outcome = svc.collect_once().await.unwrap();
    assert!(outcome.success, "{:?}", outcome.errors);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(svc.core().breaker().snapshot().total_failures, 1);
}

#[tokio::test]
async fn test_retry_after_delays_next_attempt() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let addr = common::start_programmable_backend(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                MockResponse::new(429, "{}").header("Retry-After", "1")
            } else {
                MockResponse::new(200, "[]")
            }
        }
    })
    .await;

    let svc = CollectorBuilder::new(HttpJsonCollector::new("q", format!("http://{addr}"), "/v1"))
        .settings(quick_settings())
        .rate_limit(fast_limiter())
        .transport(Arc::new(ReqwestTransport::new()))
        .build();
    svc.connect().await.unwrap();

    let started = Instant::now();
    let outcome = svc.collect_once().await.unwrap();
    assert!(outcome.success, "{:?}", outcome.errors);
    assert!(started.elapsed() >= Duration::from_millis(990));
    assert_eq!(svc.core().limiter().snapshot().total_violations, 1);
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let addr = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        MockResponse::new(200, "[]")
    })
    .await;

    let settings = CollectorSettings {
        max_retries: 0,
        request_timeout_secs: 0.2,
        ..quick_settings()
    };
    let svc = CollectorBuilder::new(HttpJsonCollector::new("q", format!("http://{addr}"), "/v1"))
        .settings(settings)
        .transport(Arc::new(ReqwestTransport::new()))
        .build();
    svc.connect().await.unwrap();

    let err = svc
        .core()
        .make_request("/v1", collector_resilience::transport::TransportRequest::get(format!("http://{addr}/v1")))
        .await
        .unwrap_err();

    match err {
        CollectorError::Collection { attempts, last } => {
            assert_eq!(attempts, 1);
            assert!(matches!(*last, CollectorError::Transport(TransportError::Timeout(_))));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_refused_connection_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let settings = CollectorSettings {
        max_retries: 0,
        ..quick_settings()
    };
    let svc = CollectorBuilder::new(HttpJsonCollector::new("q", format!("http://{addr}"), "/v1"))
        .settings(settings)
        .transport(Arc::new(ReqwestTransport::new()))
        .build();
    svc.connect().await.unwrap();

    let outcome = svc.collect_once().await.unwrap();
    assert!(!outcome.success);
    assert_eq!(svc.core().breaker().consecutive_failures(), 1);
}
