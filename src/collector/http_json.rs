//! Config-driven JSON polling collector.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::config::CollectorDefinition;
use crate::error::CollectorError;
use crate::sink::Record;
use crate::transport::{TransportRequest, TransportResponse};

use super::{CollectionOutcome, Collector, CollectorCore};

/// GETs one endpoint and stores every element of the array found at
/// `records_pointer` as a record.
#[derive(Debug, Clone)]
pub struct HttpJsonCollector {
    name: String,
    base_url: String,
    endpoint: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    records_pointer: String,
    backfill_chunk: chrono::Duration,
    backfill_start_param: String,
    backfill_end_param: String,
}

impl HttpJsonCollector {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            endpoint: endpoint.into(),
            params: Vec::new(),
            headers: Vec::new(),
            records_pointer: String::new(),
            backfill_chunk: chrono::Duration::hours(24),
            backfill_start_param: "start".to_string(),
            backfill_end_param: "end".to_string(),
        }
    }

    pub fn from_definition(def: &CollectorDefinition) -> Self {
        Self {
            name: def.name.clone(),
            base_url: def.base_url.clone(),
            endpoint: def.endpoint.clone(),
            params: def.params.clone(),
            headers: def.headers.clone(),
            records_pointer: def.records_pointer.clone(),
            backfill_chunk: chrono::Duration::hours(i64::from(def.backfill_chunk_hours)),
            backfill_start_param: def.backfill_start_param.clone(),
            backfill_end_param: def.backfill_end_param.clone(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_records_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.records_pointer = pointer.into();
        self
    }

    pub fn with_backfill_chunk(mut self, chunk: chrono::Duration) -> Self {
        self.backfill_chunk = chunk;
        self
    }

    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }

    fn request(&self) -> TransportRequest {
        let mut request = TransportRequest::get(self.url());
        for (k, v) in &self.params {
            request = request.with_param(k, v);
        }
        for (k, v) in &self.headers {
            request = request.with_header(k, v.as_str());
        }
        request
    }

    fn extract(&self, response: &TransportResponse) -> Result<Vec<Value>, CollectorError> {
        let body: Value = response
            .json()
            .map_err(|e| CollectorError::InvalidResponse(format!("body is not JSON: {e}")))?;

        let found = if self.records_pointer.is_empty() {
            body
        } else {
            body.pointer(&self.records_pointer).cloned().ok_or_else(|| {
                CollectorError::InvalidResponse(format!("no value at '{}'", self.records_pointer))
            })?
        };

        Ok(match found {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        })
    }

    async fn fetch(&self, ctx: &CollectorCore, request: TransportRequest) -> Result<u64, CollectorError> {
        let response = ctx.make_request(&self.endpoint, request).await?;
        let items = self.extract(&response)?;
        let now = ctx.clock().now();
        let records = items
            .into_iter()
            .map(|payload| Record {
                source: self.name.clone(),
                collected_at: now,
                payload,
            })
            .collect();
        ctx.store_records(records).await
    }
}

#[async_trait]
impl Collector for HttpJsonCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_config(&self) -> Result<(), CollectorError> {
        if self.name.trim().is_empty() {
            return Err(CollectorError::Configuration("collector name is empty".into()));
        }
        let url = url::Url::parse(&self.url())
            .map_err(|e| CollectorError::Configuration(format!("invalid url '{}': {e}", self.url())))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CollectorError::Configuration(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if !self.records_pointer.is_empty() && !self.records_pointer.starts_with('/') {
            return Err(CollectorError::Configuration(format!(
                "records pointer '{}' must start with '/'",
                self.records_pointer
            )));
        }
        Ok(())
    }

    async fn collect_data(&self, ctx: &CollectorCore) -> Result<CollectionOutcome, CollectorError> {
        let stored = self.fetch(ctx, self.request()).await?;
        Ok(CollectionOutcome::succeeded(stored))
    }

    fn backfill_chunk(&self) -> chrono::Duration {
        self.backfill_chunk
    }

    async fn fetch_range(
        &self,
        ctx: &CollectorCore,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, CollectorError> {
        let request = self
            .request()
            .with_param(&self.backfill_start_param, start.to_rfc3339_opts(SecondsFormat::Secs, true))
            .with_param(&self.backfill_end_param, end.to_rfc3339_opts(SecondsFormat::Secs, true));
        self.fetch(ctx, request).await
    }
}
