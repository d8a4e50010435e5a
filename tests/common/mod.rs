//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

use collector_resilience::collector::{CollectionOutcome, Collector, CollectorCore};
use collector_resilience::error::CollectorError;
use collector_resilience::sink::Record;
use collector_resilience::transport::{
    Headers, Transport, TransportError, TransportRequest, TransportResponse,
};

/// One scripted transport reaction.
#[derive(Clone, Debug)]
pub enum Step {
    Respond {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },
    Fail(TransportError),
    /// Never answers; the caller's timeout fires.
    Hang,
    /// Answer after a delay.
    Delay(Duration, Box<Step>),
}

impl Step {
    pub fn ok(body: &str) -> Self {
        Self::status(200).body(body)
    }

    pub fn status(status: u16) -> Self {
        Step::Respond {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn body(self, text: &str) -> Self {
        match self {
            Step::Respond { status, headers, .. } => Step::Respond {
                status,
                headers,
                body: text.to_string(),
            },
            other => other,
        }
    }

    pub fn header(self, name: &str, value: &str) -> Self {
        match self {
            Step::Respond {
                status,
                mut headers,
                body,
            } => {
                headers.push((name.to_string(), value.to_string()));
                Step::Respond { status, headers, body }
            }
            other => other,
        }
    }
}

/// In-process transport replaying a script, then a fallback step forever.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    completed: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Self::with_fallback(script, Step::ok("[]"))
    }

    pub fn with_fallback(script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn play(step: Step) -> std::pin::Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send>> {
    Box::pin(async move {
        match step {
            Step::Respond { status, headers, body } => Ok(TransportResponse {
                status,
                headers: headers.into_iter().collect::<Headers>(),
                body: body.into_bytes(),
            }),
            Step::Fail(e) => Err(e),
            Step::Hang => std::future::pending().await,
            Step::Delay(delay, inner) => {
                tokio::time::sleep(delay).await;
                play(*inner).await
            }
        }
    })
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        self.requests.lock().unwrap().push(request);
        let step = self.next_step();
        let result = play(step).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Minimal collector: one GET per cycle, one record per successful call.
pub struct PingCollector {
    pub name: String,
    pub valid: bool,
}

impl PingCollector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            valid: true,
        }
    }

    pub fn invalid(name: &str) -> Self {
        Self {
            name: name.to_string(),
            valid: false,
        }
    }
}

#[async_trait]
impl Collector for PingCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_config(&self) -> Result<(), CollectorError> {
        if self.valid {
            Ok(())
        } else {
            Err(CollectorError::Configuration("missing api key".into()))
        }
    }

    async fn collect_data(&self, ctx: &CollectorCore) -> Result<CollectionOutcome, CollectorError> {
        let response = ctx
            .make_request("/ping", TransportRequest::get("http://upstream.test/ping"))
            .await?;
        let stored = ctx
            .store_records(vec![Record::new(self.name.clone(), serde_json::json!({ "status": response.status }))])
            .await?;
        Ok(CollectionOutcome::succeeded(stored))
    }
}

/// A canned HTTP response for the TCP backend.
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Start a programmable backend on an ephemeral port.
///
/// The handler receives the request line (e.g. `GET /v1/quotes?x=1 HTTP/1.1`).
pub async fn start_programmable_backend<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 1024];
                        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                            }
                        }
                        let head = String::from_utf8_lossy(&buf);
                        let request_line = head.lines().next().unwrap_or_default().to_string();

                        let response = handler(request_line).await;
                        let mut out = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n",
                            response.status,
                            reason(response.status),
                            response.body.len()
                        );
                        for (name, value) in &response.headers {
                            out.push_str(&format!("{name}: {value}\r\n"));
                        }
                        out.push_str("\r\n");
                        out.push_str(&response.body);

                        let _ = socket.write_all(out.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
