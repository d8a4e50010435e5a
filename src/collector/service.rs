//! Collector lifecycle driver.

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{CircuitBreakerConfig, CollectorSettings, RateLimitConfig};
use crate::error::CollectorError;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::persistence::{MemoryStore, PersistenceStore, DEFAULT_STATE_TTL};
use crate::resilience::{AdaptiveRateLimiter, CircuitBreaker, Clock};
use crate::sink::{DataSink, MemorySink};
use crate::transport::{ReqwestTransport, Transport};

use super::context::CollectorCore;
use super::stats::{HealthReport, HealthStatus, StatsTracker};
use super::{BackfillResult, CollectionOutcome, Collector, CollectorPhase, TimeRange};

/// Assembles a [`CollectorService`] around a [`Collector`].
pub struct CollectorBuilder {
    collector: Arc<dyn Collector>,
    settings: CollectorSettings,
    circuit_breaker: CircuitBreakerConfig,
    rate_limit: RateLimitConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn PersistenceStore>>,
    sink: Option<Arc<dyn DataSink>>,
    state_ttl: Duration,
    clock: Option<Clock>,
}

impl CollectorBuilder {
    pub fn new(collector: impl Collector) -> Self {
        Self::from_arc(Arc::new(collector))
    }

    pub fn from_arc(collector: Arc<dyn Collector>) -> Self {
        Self {
            collector,
            settings: CollectorSettings::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            transport: None,
            store: None,
            sink: None,
            state_ttl: DEFAULT_STATE_TTL,
            clock: None,
        }
    }

    pub fn settings(mut self, settings: CollectorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DataSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn state_ttl(mut self, ttl: Duration) -> Self {
        self.state_ttl = ttl;
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the service. Missing collaborators default to a `reqwest`
    /// transport, an in-memory store and an in-memory sink.
    pub fn build(self) -> CollectorService {
        let name = self.collector.name().to_string();
        let clock = self.clock.unwrap_or_default();

        let core = CollectorCore {
            breaker: CircuitBreaker::with_clock(&name, self.circuit_breaker, clock),
            limiter: AdaptiveRateLimiter::with_clock(&name, self.rate_limit, clock),
            transport: self.transport.unwrap_or_else(|| Arc::new(ReqwestTransport::new())),
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            sink: self.sink.unwrap_or_else(|| Arc::new(MemorySink::new())),
            stats: StatsTracker::new(&self.settings),
            shutdown: Shutdown::new(),
            clock,
            state_ttl: self.state_ttl,
            cycle_lock: tokio::sync::Mutex::new(()),
            settings: self.settings,
            name,
        };

        CollectorService {
            collector: self.collector,
            core: Arc::new(core),
            phase: Mutex::new(CollectorPhase::Created),
            task: tokio::sync::Mutex::new(None),
        }
    }
}

/// One collector with its lifecycle.
pub struct CollectorService {
    collector: Arc<dyn Collector>,
    core: Arc<CollectorCore>,
    phase: Mutex<CollectorPhase>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CollectorService {
    pub fn builder(collector: impl Collector) -> CollectorBuilder {
        CollectorBuilder::new(collector)
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn core(&self) -> &CollectorCore {
        &self.core
    }

    fn lock_phase(&self) -> MutexGuard<'_, CollectorPhase> {
        self.phase.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Collector phase mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn phase(&self) -> CollectorPhase {
        *self.lock_phase()
    }

    fn set_phase(&self, phase: CollectorPhase) {
        *self.lock_phase() = phase;
    }

    /// Running phase with a live loop task.
    pub fn is_running(&self) -> bool {
        self.phase() == CollectorPhase::Running && self.loop_alive()
    }

    fn loop_alive(&self) -> bool {
        // Held only while start or stop is in progress.
        match self.task.try_lock() {
            Ok(task) => task.as_ref().is_some_and(|handle| !handle.is_finished()),
            Err(_) => true,
        }
    }

    /// Validate configuration, open the transport and restore persisted state.
    pub async fn connect(&self) -> Result<(), CollectorError> {
        let phase = self.phase();
        if !matches!(
            phase,
            CollectorPhase::Created | CollectorPhase::Disconnected | CollectorPhase::Failed
        ) {
            return Err(CollectorError::InvalidState(format!(
                "cannot connect collector '{}' while {phase:?}",
                self.name()
            )));
        }

        if let Err(e) = self.collector.validate_config() {
            tracing::error!(collector = %self.name(), error = %e, "Collector configuration rejected");
            self.core.stats.mark_config_error(Some(e.to_string()));
            self.set_phase(CollectorPhase::Failed);
            return Err(e);
        }
        self.core.stats.mark_config_error(None);

        self.core.transport.open().await?;
        self.core.load_state().await;
        self.set_phase(CollectorPhase::Connected);

        tracing::info!(
            collector = %self.name(),
            circuit_state = %self.core.breaker.state(),
            "Collector connected"
        );
        Ok(())
    }

    /// Launch the periodic loop on its own task and return immediately.
    pub async fn start(&self) -> Result<(), CollectorError> {
        let mut task = self.task.lock().await;
        match self.phase() {
            CollectorPhase::Running => return Ok(()),
            CollectorPhase::Connected | CollectorPhase::Stopped => {}
            phase => {
                return Err(CollectorError::InvalidState(format!(
                    "cannot start collector '{}' while {phase:?}",
                    self.name()
                )))
            }
        }

        self.core.shutdown.reset();
        self.core.stats.mark_started(self.core.clock.now());
        let collector = Arc::clone(&self.collector);
        let core = Arc::clone(&self.core);
        *task = Some(tokio::spawn(run_loop(collector, core)));
        self.set_phase(CollectorPhase::Running);

        tracing::info!(
            collector = %self.name(),
            interval_secs = self.core.settings.collection_interval_secs,
            "Collector started"
        );
        Ok(())
    }

    /// Stop with the configured grace period.
    pub async fn stop(&self) {
        self.stop_with_grace(self.core.settings.stop_grace()).await
    }

    /// Signal the loop, wait up to `grace` for it to exit, then abort it.
    ///
    /// Idempotent and safe before `start()`.
    pub async fn stop_with_grace(&self, grace: Duration) {
        let mut task = self.task.lock().await;
        let Some(mut handle) = task.take() else {
            return;
        };

        self.core.shutdown.trigger();
        let started = Instant::now();
        match time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(collector = %self.name(), error = %e, "Collector task panicked"),
            Err(_) => {
                tracing::warn!(
                    collector = %self.name(),
                    grace_secs = grace.as_secs_f64(),
                    "Collector did not stop within grace period, aborting"
                );
                handle.abort();
            }
        }
        self.core.shutdown.reset();

        self.core.persist_all().await;
        self.set_phase(CollectorPhase::Stopped);
        tracing::info!(
            collector = %self.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collector stopped"
        );
    }

    /// Persist final state and release the transport.
    pub async fn disconnect(&self) -> Result<(), CollectorError> {
        match self.phase() {
            CollectorPhase::Disconnected => return Ok(()),
            CollectorPhase::Running => self.stop().await,
            _ => {}
        }

        if matches!(self.phase(), CollectorPhase::Connected | CollectorPhase::Stopped) {
            self.core.persist_all().await;
            self.core.transport.close().await;
        }
        self.set_phase(CollectorPhase::Disconnected);
        tracing::info!(collector = %self.name(), "Collector disconnected");
        Ok(())
    }

    fn ensure_connected(&self, operation: &str) -> Result<(), CollectorError> {
        match self.phase() {
            CollectorPhase::Connected | CollectorPhase::Running | CollectorPhase::Stopped => Ok(()),
            phase => Err(CollectorError::InvalidState(format!(
                "cannot {operation} collector '{}' while {phase:?}",
                self.name()
            ))),
        }
    }

    /// Run one collection cycle now.
    pub async fn collect_once(&self) -> Result<CollectionOutcome, CollectorError> {
        self.ensure_connected("collect with")?;
        Ok(run_cycle(&*self.collector, &self.core).await)
    }

    /// Fetch `[start, end)` in collector-sized chunks.
    ///
    /// A failing chunk is recorded and the remaining chunks still run.
    pub async fn backfill_historical(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BackfillResult, CollectorError> {
        self.ensure_connected("backfill")?;

        let chunk = self.collector.backfill_chunk();
        if chunk <= chrono::Duration::zero() {
            return Err(CollectorError::Configuration(format!(
                "collector '{}' has a non-positive backfill chunk",
                self.name()
            )));
        }

        let _cycle = self.core.cycle_lock.lock().await;
        tracing::info!(collector = %self.name(), %start, %end, "Backfill started");

        let mut result = BackfillResult {
            success: true,
            data_points_collected: 0,
            time_range: TimeRange { start, end },
            errors: Vec::new(),
            chunks_total: 0,
            chunks_failed: 0,
        };

        let mut chunk_start = start;
        while chunk_start < end {
            let chunk_end = (chunk_start + chunk).min(end);
            result.chunks_total += 1;

            match self.collector.fetch_range(&self.core, chunk_start, chunk_end).await {
                Ok(points) => result.data_points_collected += points,
                Err(CollectorError::Cancelled) => {
                    result.chunks_failed += 1;
                    result.errors.push(format!("{chunk_start}..{chunk_end}: cancelled"));
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        collector = %self.name(),
                        chunk_start = %chunk_start,
                        chunk_end = %chunk_end,
                        error = %e,
                        "Backfill chunk failed"
                    );
                    result.chunks_failed += 1;
                    result.errors.push(format!("{chunk_start}..{chunk_end}: {e}"));
                }
            }
            chunk_start = chunk_end;
        }

        result.success = result.errors.is_empty();
        self.core.stats.add_data_points(result.data_points_collected);

        tracing::info!(
            collector = %self.name(),
            data_points = result.data_points_collected,
            chunks = result.chunks_total,
            failed_chunks = result.chunks_failed,
            "Backfill finished"
        );
        Ok(result)
    }

    /// Current health, breaker, limiter and statistics.
    pub fn health_check(&self) -> HealthReport {
        let circuit_breaker = self.core.breaker.status();
        let phase = self.phase();
        let is_running = self.is_running();
        let status = if phase == CollectorPhase::Running && !is_running {
            HealthStatus::Failed
        } else {
            self.core.stats.status(
                circuit_breaker.snapshot.state == crate::resilience::CircuitState::Open,
                &self.core.settings,
            )
        };
        HealthReport {
            name: self.name().to_string(),
            healthy: status == HealthStatus::Healthy,
            status,
            phase,
            is_running,
            circuit_breaker,
            rate_limiter: self.core.limiter.stats(),
            statistics: self.core.stats.snapshot(),
        }
    }

    /// Operator reset of the statistics.
    pub fn reset_statistics(&self) {
        self.core.stats.reset();
        tracing::info!(collector = %self.name(), "Statistics reset");
    }

    /// Operator reset of the circuit breaker, deleting its checkpoint.
    pub async fn reset_circuit_breaker(&self) {
        self.core.reset_breaker().await;
    }
}

/// One collection cycle inside its own span.
async fn run_cycle(collector: &dyn Collector, core: &CollectorCore) -> CollectionOutcome {
    let cycle_id = Uuid::new_v4();
    let span = tracing::info_span!("collection_cycle", collector = %core.name, %cycle_id);

    async {
        let _cycle = core.cycle_lock.lock().await;
        let started = Instant::now();

        let result = AssertUnwindSafe(collector.collect_data(core))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(CollectorError::Panicked(panic_message(panic.as_ref()).to_string()))
            });

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(CollectorError::Cancelled) => {
                tracing::debug!("Collection cycle cancelled by stop");
                return CollectionOutcome::failed(vec![CollectorError::Cancelled.to_string()]);
            }
            Err(e) if e.is_circuit_open() => {
                tracing::debug!(error = %e, "Collection cycle skipped, circuit open");
                CollectionOutcome::failed(vec![e.to_string()])
            }
            Err(e) => {
                tracing::error!(error = %e, "Collection cycle failed");
                CollectionOutcome::failed(vec![e.to_string()])
            }
        };

        core.stats.record_cycle(&outcome, core.clock.now());
        metrics::record_cycle(&core.name, outcome.success);
        tracing::debug!(
            success = outcome.success,
            data_points = outcome.data_points_collected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collection cycle finished"
        );
        outcome
    }
    .instrument(span)
    .await
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Periodic collection until the stop signal fires.
async fn run_loop(collector: Arc<dyn Collector>, core: Arc<CollectorCore>) {
    let mut stop = core.shutdown.subscribe();

    let mut ticker = time::interval(core.settings.collection_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let persist_every = core.settings.state_persist_interval();
    let mut persist_ticker = time::interval_at(Instant::now() + persist_every, persist_every);
    persist_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.wait() => break,
            _ = ticker.tick() => {
                run_cycle(&*collector, &core).await;
            }
            _ = persist_ticker.tick() => {
                core.persist_limiter().await;
            }
        }
        if stop.is_triggered() {
            break;
        }
    }

    tracing::info!(collector = %core.name, "Collection loop exited");
}
