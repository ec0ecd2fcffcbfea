//! The observability facade
//!
//! [`ObservabilityCore`] wires the pipeline together. A log call runs
//! synchronously on the caller's thread through deduplication, the level
//! gate, the circuit breaker, record construction and per-record emission,
//! and ends in the log buffer. Flushed batches are handed to a dispatcher
//! task over a bounded channel; the dispatcher is the only place that awaits
//! the sink. Periodic tasks flush buffers on their time threshold, run
//! health checks and emit performance heartbeats until shutdown.
//!
//! The circuit breaker counts failures from both sink paths, but only batch
//! delivery can reset it. While it is open, queued batches are dropped
//! without reaching the sink. The first entry admitted after the recovery
//! timeout is flushed right away, so the half-open probe is a real batch
//! delivery.
//!
//! Nothing on the logging path returns an error: failures are counted and
//! surface through [`ObservabilityCore::stats`] and
//! [`ObservabilityCore::health`].

use crate::buffer::{AppendOutcome, BufferAggregator, DrainedBatch, FlushReason};
use crate::circuit_breaker::{CircuitBreaker, CircuitState, Transition};
use crate::config::ObservabilityConfig;
use crate::dedup::{DedupKey, DeduplicationFilter};
use crate::health::{HealthInputs, HealthMonitor, HealthReport};
use crate::performance::{OperationStats, PerformanceTracker};
use crate::record::{EventType, Level, LevelSet, LogRecord, TelemetryEvent};
use crate::registry::{HealthSource, InstanceRegistry};
use crate::sanitization::PayloadSanitizer;
use crate::sink::{LogSink, SinkError};
use crate::structured::{InstanceIdentity, StructuredEntryBuilder};
use crate::{ObservabilityError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const LOG_OPERATION: &str = "log";
const TELEMETRY_OPERATION: &str = "telemetry";

/// Counters and gauges describing one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreStats {
    pub instance_id: String,
    pub session_id: String,
    /// Records accepted by the sink and buffered
    pub total_logs: u64,
    pub total_errors: u64,
    /// Caller-submitted telemetry events accepted
    pub total_events: u64,
    pub suppressed: u64,
    pub level_filtered: u64,
    /// Calls skipped because the circuit was open
    pub circuit_rejected: u64,
    pub sink_failures: u64,
    pub internal_errors: u64,
    pub dropped_records: u64,
    pub log_flushes: u64,
    pub telemetry_flushes: u64,
    pub log_buffer_len: usize,
    pub telemetry_buffer_len: usize,
    pub tracked_dedup_keys: usize,
    pub circuit_state: CircuitState,
}

#[derive(Debug, Default)]
struct Counters {
    total_logs: AtomicU64,
    total_errors: AtomicU64,
    total_events: AtomicU64,
    level_filtered: AtomicU64,
    circuit_rejected: AtomicU64,
    sink_failures: AtomicU64,
    internal_errors: AtomicU64,
    dropped_records: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Work queued for the dispatcher task
enum Dispatch {
    Logs(Vec<LogRecord>),
    Telemetry(Vec<TelemetryEvent>),
    /// Acknowledged once everything queued before it has been delivered
    Barrier(oneshot::Sender<()>),
}

/// Circuit breaker verdict for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Pass,
    /// Admitted as the half-open probe; its batch is flushed immediately
    Probe,
    Rejected,
}

#[derive(Debug, Clone, Copy)]
enum BufferKind {
    Logs,
    Telemetry,
}

#[derive(Default)]
struct TaskHandles {
    periodic: Vec<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

struct CoreShared {
    config: ObservabilityConfig,
    builder: StructuredEntryBuilder,
    levels: AtomicU8,
    dedup: DeduplicationFilter,
    breaker: CircuitBreaker,
    performance: PerformanceTracker,
    log_buffer: BufferAggregator<LogRecord>,
    telemetry_buffer: BufferAggregator<TelemetryEvent>,
    health: HealthMonitor,
    sink: Arc<dyn LogSink>,
    correlation_id: Mutex<Option<String>>,
    started_at: Instant,
    counters: Counters,
    dispatch_tx: Mutex<Option<mpsc::Sender<Dispatch>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<TaskHandles>,
    registry: Option<InstanceRegistry>,
    closed: AtomicBool,
}

/// Handle to a running observability core
///
/// Cloning is cheap and every clone drives the same instance.
#[derive(Clone)]
pub struct ObservabilityCore {
    shared: Arc<CoreShared>,
}

impl ObservabilityCore {
    /// Start a core on the current tokio runtime
    ///
    /// Spawns the sink dispatcher and the periodic tasks, and registers the
    /// instance with `registry` if one is given.
    pub fn start(
        config: ObservabilityConfig,
        sink: Arc<dyn LogSink>,
        registry: Option<InstanceRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|e| {
            ObservabilityError::Runtime(format!("observability core needs a tokio runtime: {e}"))
        })?;

        let now = Instant::now();
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(CoreShared {
            builder: StructuredEntryBuilder::new(
                InstanceIdentity::generate(),
                PayloadSanitizer::new(config.sanitization.clone()),
            ),
            levels: AtomicU8::new(LevelSet::up_to(config.level).bits()),
            dedup: DeduplicationFilter::new(&config.dedup),
            breaker: CircuitBreaker::new("sink", &config.circuit_breaker),
            performance: PerformanceTracker::new(config.performance_window),
            log_buffer: BufferAggregator::new_at("logs", &config.log_buffer, now),
            telemetry_buffer: BufferAggregator::new_at("telemetry", &config.telemetry_buffer, now),
            health: HealthMonitor::new(&config.health),
            sink: Arc::clone(&sink),
            correlation_id: Mutex::new(None),
            started_at: now,
            counters: Counters::default(),
            dispatch_tx: Mutex::new(Some(dispatch_tx)),
            shutdown_tx,
            tasks: Mutex::new(TaskHandles::default()),
            registry,
            closed: AtomicBool::new(false),
            config,
        });

        let weak = Arc::downgrade(&shared);
        let dispatcher = handle.spawn(run_dispatcher(weak.clone(), sink, dispatch_rx));
        let periodic = vec![
            spawn_flush_task(&handle, weak.clone(), shared.shutdown_tx.subscribe(), BufferKind::Logs),
            spawn_flush_task(
                &handle,
                weak.clone(),
                shared.shutdown_tx.subscribe(),
                BufferKind::Telemetry,
            ),
            spawn_periodic(
                &handle,
                weak.clone(),
                shared.shutdown_tx.subscribe(),
                shared.config.health.check_interval(),
                "health",
                CoreShared::run_health_check,
            ),
            spawn_periodic(
                &handle,
                weak,
                shared.shutdown_tx.subscribe(),
                shared.config.heartbeat_interval(),
                "heartbeat",
                CoreShared::emit_heartbeat,
            ),
        ];
        *crate::lock(&shared.tasks) = TaskHandles {
            periodic,
            dispatcher: Some(dispatcher),
        };

        if let Some(registry) = &shared.registry {
            let source: Arc<dyn HealthSource> = shared.clone();
            registry.register(&source);
        }

        info!(
            instance_id = %shared.instance_id(),
            session_id = %shared.builder.identity().session_id,
            level = %shared.config.level,
            "Observability core started"
        );

        Ok(Self { shared })
    }

    /// Log at [`Level::Error`]
    pub fn error(&self, context: &str, message: &str, payload: Option<Value>) {
        self.log(Level::Error, context, message, payload);
    }

    /// Log at [`Level::Warn`]
    pub fn warn(&self, context: &str, message: &str, payload: Option<Value>) {
        self.log(Level::Warn, context, message, payload);
    }

    /// Log at [`Level::Info`]
    pub fn info(&self, context: &str, message: &str, payload: Option<Value>) {
        self.log(Level::Info, context, message, payload);
    }

    /// Log at [`Level::Debug`]
    pub fn debug(&self, context: &str, message: &str, payload: Option<Value>) {
        self.log(Level::Debug, context, message, payload);
    }

    /// Log at [`Level::Trace`]
    pub fn trace(&self, context: &str, message: &str, payload: Option<Value>) {
        self.log(Level::Trace, context, message, payload);
    }

    /// Log a record at `level`
    pub fn log(&self, level: Level, context: &str, message: &str, payload: Option<Value>) {
        self.shared
            .log_entry(level, context, message, |builder, correlation_id| {
                builder.build_record(level, context, message, payload.as_ref(), correlation_id)
            });
    }

    /// Log a record with any serializable payload
    pub fn log_with<P: Serialize + ?Sized>(
        &self,
        level: Level,
        context: &str,
        message: &str,
        payload: &P,
    ) {
        self.shared
            .log_entry(level, context, message, |builder, correlation_id| {
                builder.build_record_with(level, context, message, payload, correlation_id)
            });
    }

    /// Emit a telemetry event by type name
    ///
    /// Unknown type names are dropped and counted as internal errors.
    pub fn emit_telemetry(&self, event_type: &str, data: Value) {
        if self.shared.is_closed() {
            return;
        }
        match event_type.parse::<EventType>() {
            Ok(event_type) => self.emit_event(event_type, data),
            Err(e) => {
                bump(&self.shared.counters.internal_errors);
                debug!(instance_id = %self.shared.instance_id(), error = %e, "Dropped telemetry event");
            }
        }
    }

    pub fn emit_event(&self, event_type: EventType, data: Value) {
        self.shared.telemetry_entry(event_type, data);
    }

    /// Run a health check now
    pub fn health(&self) -> HealthReport {
        self.shared.assess_health()
    }

    /// Most recent health report, if any check has run
    pub fn last_health(&self) -> Option<HealthReport> {
        self.shared.health.last_report()
    }

    /// Attach `id` to every subsequent record and event
    pub fn set_correlation_id(&self, id: impl Into<String>) {
        if self.shared.is_closed() {
            return;
        }
        *crate::lock(&self.shared.correlation_id) = Some(id.into());
    }

    /// Go back to a fresh correlation ID per entry
    pub fn clear_correlation_id(&self) {
        *crate::lock(&self.shared.correlation_id) = None;
    }

    pub fn correlation_id(&self) -> Option<String> {
        self.shared.current_correlation_id()
    }

    /// Drain both buffers and wait until the sink has seen the batches
    pub async fn flush_all(&self) {
        if self.shared.is_closed() {
            return;
        }
        self.shared.flush_buffers(FlushReason::Manual);
        self.shared.wait_for_dispatcher().await;
    }

    /// Enable `level` and every more severe level, disabling the rest
    pub fn set_level(&self, level: Level) {
        self.shared
            .levels
            .store(LevelSet::up_to(level).bits(), Ordering::Relaxed);
    }

    pub fn enable_level(&self, level: Level) {
        self.shared.update_levels(|set| set.with(level));
    }

    pub fn disable_level(&self, level: Level) {
        self.shared.update_levels(|set| set.without(level));
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        self.shared.levels().contains(level)
    }

    pub fn stats(&self) -> CoreStats {
        let shared = &self.shared;
        let counters = &shared.counters;
        CoreStats {
            instance_id: shared.instance_id().to_string(),
            session_id: shared.builder.identity().session_id.clone(),
            total_logs: load(&counters.total_logs),
            total_errors: load(&counters.total_errors),
            total_events: load(&counters.total_events),
            suppressed: shared.dedup.suppressed_count(),
            level_filtered: load(&counters.level_filtered),
            circuit_rejected: load(&counters.circuit_rejected),
            sink_failures: load(&counters.sink_failures),
            internal_errors: load(&counters.internal_errors),
            dropped_records: load(&counters.dropped_records),
            log_flushes: shared.log_buffer.flush_count(),
            telemetry_flushes: shared.telemetry_buffer.flush_count(),
            log_buffer_len: shared.log_buffer.len(),
            telemetry_buffer_len: shared.telemetry_buffer.len(),
            tracked_dedup_keys: shared.dedup.tracked_keys(),
            circuit_state: shared.breaker.state(),
        }
    }

    /// Per-operation timing statistics
    pub fn performance(&self) -> Vec<OperationStats> {
        self.shared.performance.summary()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.shared.breaker.state()
    }

    pub fn instance_id(&self) -> &str {
        self.shared.instance_id()
    }

    pub fn session_id(&self) -> &str {
        &self.shared.builder.identity().session_id
    }

    pub fn config(&self) -> &ObservabilityConfig {
        &self.shared.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stop the periodic tasks, flush both buffers and wait for delivery
    ///
    /// Every call on this instance (and its clones) is a no-op afterwards.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Tasks may already be gone; a send error only means no receivers
        let _ = shared.shutdown_tx.send(true);
        let TaskHandles {
            periodic,
            dispatcher,
        } = std::mem::take(&mut *crate::lock(&shared.tasks));

        for task in periodic {
            if let Err(e) = task.await {
                warn!(instance_id = %shared.instance_id(), error = %e, "Periodic task ended abnormally");
            }
        }

        shared.flush_buffers(FlushReason::Shutdown);

        // Closing the channel lets the dispatcher drain and exit
        crate::lock(&shared.dispatch_tx).take();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                warn!(instance_id = %shared.instance_id(), error = %e, "Dispatcher ended abnormally");
            }
        }
        // Calls that passed the closed check before the swap may have
        // appended after the final flush
        shared.discard_stranded();

        if let Some(registry) = &shared.registry {
            registry.unregister(shared.instance_id());
        }

        let counters = &shared.counters;
        info!(
            instance_id = %shared.instance_id(),
            total_logs = load(&counters.total_logs),
            dropped_records = load(&counters.dropped_records),
            "Observability core shut down"
        );
    }
}

impl std::fmt::Debug for ObservabilityCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservabilityCore")
            .field("instance_id", &self.instance_id())
            .field("circuit_state", &self.circuit_state())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl CoreShared {
    fn instance_id(&self) -> &str {
        &self.builder.identity().instance_id
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn levels(&self) -> LevelSet {
        LevelSet::from_bits(self.levels.load(Ordering::Relaxed))
    }

    fn update_levels(&self, update: impl Fn(LevelSet) -> LevelSet) {
        // The closure always returns Some, so this cannot fail
        let _ = self
            .levels
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some(update(LevelSet::from_bits(bits)).bits())
            });
    }

    fn current_correlation_id(&self) -> Option<String> {
        crate::lock(&self.correlation_id).clone()
    }

    fn log_entry<F>(&self, level: Level, context: &str, message: &str, build: F)
    where
        F: FnOnce(&StructuredEntryBuilder, Option<&str>) -> LogRecord,
    {
        if self.is_closed() {
            return;
        }
        let started = Instant::now();

        if self
            .dedup
            .should_suppress_at(&DedupKey::new(level, context, message), started)
        {
            return;
        }
        if !self.levels().contains(level) {
            bump(&self.counters.level_filtered);
            return;
        }
        let admission = self.gate();
        if admission == Admission::Rejected {
            bump(&self.counters.circuit_rejected);
            return;
        }

        let correlation_id = self.current_correlation_id();
        let record = build(&self.builder, correlation_id.as_deref());

        if let Err(e) = self.sink.emit(&record) {
            self.sink_failed(LOG_OPERATION, &e);
            return;
        }

        bump(&self.counters.total_logs);
        let error_event = (level == Level::Error).then(|| {
            json!({
                "context": record.context(),
                "message": record.message(),
                "correlation_id": record.correlation_id(),
            })
        });
        let log_event = self.config.mirror_logs_to_telemetry.then(|| {
            json!({
                "level": record.level().as_str(),
                "context": record.context(),
                "message": record.message(),
                "correlation_id": record.correlation_id(),
            })
        });

        self.buffer_record(record);
        if admission == Admission::Probe {
            self.flush_log_buffer(FlushReason::Probe);
        }

        if let Some(data) = error_event {
            bump(&self.counters.total_errors);
            self.enqueue_event(EventType::ErrorEvent, data);
        }
        if let Some(data) = log_event {
            self.enqueue_event(EventType::LogEvent, data);
        }

        self.performance
            .record(LOG_OPERATION, started.elapsed().as_secs_f64() * 1000.0);
    }

    fn telemetry_entry(&self, event_type: EventType, data: Value) {
        if self.is_closed() {
            return;
        }
        let started = Instant::now();

        let admission = self.gate();
        if admission == Admission::Rejected {
            bump(&self.counters.circuit_rejected);
            return;
        }

        let correlation_id = self.current_correlation_id();
        let event = self
            .builder
            .build_event(event_type, &data, correlation_id.as_deref());

        if let Err(e) = self.sink.emit_telemetry(&event) {
            self.sink_failed(TELEMETRY_OPERATION, &e);
            return;
        }

        bump(&self.counters.total_events);
        self.buffer_event(event);
        if admission == Admission::Probe {
            self.flush_telemetry_buffer(FlushReason::Probe);
        }

        self.performance
            .record(TELEMETRY_OPERATION, started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Ask the circuit breaker whether the sink may be called
    fn gate(&self) -> Admission {
        let (allowed, transition) = self.breaker.allow();
        if let Some(transition) = transition {
            self.on_transition(transition);
        }
        match (allowed, self.breaker.state()) {
            (false, _) => Admission::Rejected,
            (true, CircuitState::HalfOpen) => Admission::Probe,
            (true, _) => Admission::Pass,
        }
    }

    fn sink_succeeded(&self) {
        if let Some(transition) = self.breaker.record_success() {
            self.on_transition(transition);
        }
    }

    fn sink_failed(&self, operation: &'static str, error: &SinkError) {
        bump(&self.counters.sink_failures);
        debug!(instance_id = %self.instance_id(), operation, error = %error, "Sink call failed");
        if let Some(transition) = self.breaker.record_failure() {
            self.on_transition(transition);
        }
    }

    fn on_transition(&self, transition: Transition) {
        let failure_count = self.breaker.snapshot().failure_count;
        self.enqueue_event(
            EventType::CircuitBreakerChange,
            json!({
                "from": transition.from.as_str(),
                "to": transition.to.as_str(),
                "failure_count": failure_count,
            }),
        );
    }

    /// Queue an internally generated event
    ///
    /// Internal events bypass the circuit breaker gate, and their emission
    /// failures are counted without being fed back into it. An open circuit
    /// still skips the per-event emission.
    fn enqueue_event(&self, event_type: EventType, data: Value) {
        let correlation_id = self.current_correlation_id();
        let event = self
            .builder
            .build_event(event_type, &data, correlation_id.as_deref());

        if self.breaker.state() == CircuitState::Open {
            self.buffer_event(event);
            return;
        }
        if let Err(e) = self.sink.emit_telemetry(&event) {
            bump(&self.counters.sink_failures);
            debug!(
                instance_id = %self.instance_id(),
                event_type = event_type.as_str(),
                error = %e,
                "Internal event emission failed"
            );
        }
        self.buffer_event(event);
    }

    fn buffer_record(&self, record: LogRecord) {
        let started = Instant::now();
        match self.log_buffer.append_at(record, started) {
            AppendOutcome::Buffered(batches) => {
                for batch in batches {
                    self.dispatch_logs(batch, started);
                }
            }
            AppendOutcome::Rejected(_) => self.buffer_rejected(self.log_buffer.name()),
        }
        if self.is_closed() {
            self.discard_stranded();
        }
    }

    fn buffer_event(&self, event: TelemetryEvent) {
        let started = Instant::now();
        match self.telemetry_buffer.append_at(event, started) {
            AppendOutcome::Buffered(batches) => {
                for batch in batches {
                    self.dispatch_telemetry(batch, started);
                }
            }
            AppendOutcome::Rejected(_) => self.buffer_rejected(self.telemetry_buffer.name()),
        }
        if self.is_closed() {
            self.discard_stranded();
        }
    }

    /// Drop whatever is still buffered once the dispatcher is gone
    fn discard_stranded(&self) {
        if crate::lock(&self.dispatch_tx).is_some() {
            return;
        }
        let now = Instant::now();
        let stranded = self.log_buffer.flush_at(now, FlushReason::Shutdown).len()
            + self.telemetry_buffer.flush_at(now, FlushReason::Shutdown).len();
        if stranded > 0 {
            self.counters
                .dropped_records
                .fetch_add(stranded as u64, Ordering::Relaxed);
            warn!(instance_id = %self.instance_id(), stranded, "Entries buffered after shutdown dropped");
        }
    }

    fn buffer_rejected(&self, buffer: &'static str) {
        bump(&self.counters.internal_errors);
        bump(&self.counters.dropped_records);
        warn!(instance_id = %self.instance_id(), buffer, "Buffer full after forced flush, entry dropped");
    }

    fn dispatch_logs(&self, batch: DrainedBatch<LogRecord>, started: Instant) {
        if batch.is_empty() {
            return;
        }
        let batch_size = batch.len();
        let reason = batch.reason;
        self.hand_off(Dispatch::Logs(batch.entries), batch_size);
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        debug!(
            instance_id = %self.instance_id(),
            buffer = self.log_buffer.name(),
            batch_size,
            reason = reason.as_str(),
            latency_ms,
            "Buffer flushed"
        );
        self.enqueue_event(
            EventType::BufferFlush,
            json!({
                "buffer": self.log_buffer.name(),
                "batch_size": batch_size,
                "reason": reason.as_str(),
                "latency_ms": latency_ms,
            }),
        );
    }

    fn dispatch_telemetry(&self, batch: DrainedBatch<TelemetryEvent>, started: Instant) {
        if batch.is_empty() {
            return;
        }
        let batch_size = batch.len();
        let reason = batch.reason;
        self.hand_off(Dispatch::Telemetry(batch.entries), batch_size);

        debug!(
            instance_id = %self.instance_id(),
            buffer = self.telemetry_buffer.name(),
            batch_size,
            reason = reason.as_str(),
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Buffer flushed"
        );
    }

    /// Pass a batch to the dispatcher without waiting
    fn hand_off(&self, dispatch: Dispatch, batch_size: usize) {
        let guard = crate::lock(&self.dispatch_tx);
        let Some(tx) = guard.as_ref() else {
            self.counters
                .dropped_records
                .fetch_add(batch_size as u64, Ordering::Relaxed);
            return;
        };

        match tx.try_send(dispatch) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                bump(&self.counters.internal_errors);
                self.counters
                    .dropped_records
                    .fetch_add(batch_size as u64, Ordering::Relaxed);
                warn!(instance_id = %self.instance_id(), batch_size, "Dispatch queue full, batch dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.counters
                    .dropped_records
                    .fetch_add(batch_size as u64, Ordering::Relaxed);
            }
        }
    }

    /// Drain both buffers; the log buffer goes first so its flush event
    /// leaves with the telemetry batch
    fn flush_buffers(&self, reason: FlushReason) {
        self.flush_log_buffer(reason);
        self.flush_telemetry_buffer(reason);
    }

    fn flush_log_buffer(&self, reason: FlushReason) {
        let started = Instant::now();
        let batch = self.log_buffer.flush_at(started, reason);
        self.dispatch_logs(batch, started);
    }

    fn flush_telemetry_buffer(&self, reason: FlushReason) {
        let started = Instant::now();
        let batch = self.telemetry_buffer.flush_at(started, reason);
        self.dispatch_telemetry(batch, started);
    }

    fn flush_deadline(&self, kind: BufferKind) -> Instant {
        match kind {
            BufferKind::Logs => self.log_buffer.last_flush_at() + self.log_buffer.time_threshold(),
            BufferKind::Telemetry => {
                self.telemetry_buffer.last_flush_at() + self.telemetry_buffer.time_threshold()
            }
        }
    }

    fn flush_if_due(&self, kind: BufferKind) {
        let now = Instant::now();
        match kind {
            BufferKind::Logs => {
                if let Some(batch) = self.log_buffer.flush_if_due_at(now) {
                    self.dispatch_logs(batch, now);
                }
            }
            BufferKind::Telemetry => {
                if let Some(batch) = self.telemetry_buffer.flush_if_due_at(now) {
                    self.dispatch_telemetry(batch, now);
                }
            }
        }
    }

    async fn wait_for_dispatcher(&self) {
        let Some(tx) = crate::lock(&self.dispatch_tx).clone() else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Dispatch::Barrier(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Whether a dequeued batch may go to the sink
    ///
    /// Batches dequeued while the circuit is open are dropped and counted.
    fn admit_batch(&self, operation: &'static str, batch_size: usize) -> bool {
        if self.breaker.state() != CircuitState::Open {
            return true;
        }
        self.counters
            .dropped_records
            .fetch_add(batch_size as u64, Ordering::Relaxed);
        debug!(
            instance_id = %self.instance_id(),
            operation,
            batch_size,
            "Circuit open, batch dropped"
        );
        false
    }

    /// Feed a batch delivery outcome to the circuit breaker
    fn record_delivery(
        &self,
        operation: &'static str,
        batch_size: usize,
        result: std::result::Result<(), SinkError>,
    ) {
        match result {
            Ok(()) => self.sink_succeeded(),
            Err(e) => {
                self.counters
                    .dropped_records
                    .fetch_add(batch_size as u64, Ordering::Relaxed);
                warn!(
                    instance_id = %self.instance_id(),
                    operation,
                    batch_size,
                    error = %e,
                    "Batch delivery failed"
                );
                self.sink_failed(operation, &e);
            }
        }
    }

    fn assess_health(&self) -> HealthReport {
        let breaker = self.breaker.snapshot();
        let counters = &self.counters;
        self.health.check(HealthInputs {
            instance_id: self.instance_id().to_string(),
            uptime: self.started_at.elapsed(),
            total_logs: load(&counters.total_logs),
            total_errors: load(&counters.total_errors),
            total_flushes: self.log_buffer.flush_count() + self.telemetry_buffer.flush_count(),
            internal_errors: load(&counters.internal_errors),
            dropped_records: load(&counters.dropped_records),
            buffer_occupancy_percent: self
                .log_buffer
                .occupancy_percent()
                .max(self.telemetry_buffer.occupancy_percent()),
            average_operation_ms: self.performance.recent_average(),
            circuit_breaker_state: breaker.state,
            failure_count: breaker.failure_count,
        })
    }

    fn run_health_check(&self) {
        let pruned = self.dedup.prune_at(Instant::now());
        let report = self.assess_health();

        if !report.healthy {
            warn!(
                instance_id = %self.instance_id(),
                issues = ?report.issues,
                circuit_state = %report.circuit_breaker_state,
                "Health check degraded"
            );
        } else {
            debug!(instance_id = %self.instance_id(), pruned_dedup_keys = pruned, "Health check passed");
        }

        match serde_json::to_value(&report) {
            Ok(data) => self.enqueue_event(EventType::HealthCheck, data),
            Err(e) => {
                bump(&self.counters.internal_errors);
                warn!(instance_id = %self.instance_id(), error = %e, "Failed to serialize health report");
            }
        }
    }

    fn emit_heartbeat(&self) {
        let operations = match serde_json::to_value(self.performance.summary()) {
            Ok(operations) => operations,
            Err(e) => {
                bump(&self.counters.internal_errors);
                warn!(instance_id = %self.instance_id(), error = %e, "Failed to serialize performance summary");
                return;
            }
        };
        self.enqueue_event(
            EventType::PerformanceMetric,
            json!({
                "operations": operations,
                "recent_average_ms": self.performance.recent_average(),
                "samples": self.performance.sample_count(),
                "uptime_secs": self.started_at.elapsed().as_secs_f64(),
            }),
        );
    }
}

impl HealthSource for CoreShared {
    fn instance_id(&self) -> &str {
        &self.builder.identity().instance_id
    }

    fn check_health(&self) -> HealthReport {
        self.assess_health()
    }
}

/// Deliver queued batches to the sink until the channel closes
async fn run_dispatcher(
    core: Weak<CoreShared>,
    sink: Arc<dyn LogSink>,
    mut rx: mpsc::Receiver<Dispatch>,
) {
    while let Some(dispatch) = rx.recv().await {
        let (operation, batch_size) = match &dispatch {
            Dispatch::Logs(batch) => (LOG_OPERATION, batch.len()),
            Dispatch::Telemetry(batch) => (TELEMETRY_OPERATION, batch.len()),
            Dispatch::Barrier(_) => ("barrier", 0),
        };
        if batch_size > 0
            && core
                .upgrade()
                .is_some_and(|core| !core.admit_batch(operation, batch_size))
        {
            continue;
        }

        let result = match dispatch {
            Dispatch::Logs(batch) => sink.send(batch).await,
            Dispatch::Telemetry(batch) => sink.send_telemetry(batch).await,
            Dispatch::Barrier(ack) => {
                let _ = ack.send(());
                continue;
            }
        };

        match core.upgrade() {
            Some(core) => core.record_delivery(operation, batch_size, result),
            None => {
                if let Err(e) = result {
                    warn!(operation, batch_size, error = %e, "Batch delivery failed after core was dropped");
                }
            }
        }
    }
    debug!("Sink dispatcher stopped");
}

/// Flush a buffer whenever its time threshold elapses
fn spawn_flush_task(
    handle: &Handle,
    core: Weak<CoreShared>,
    mut shutdown: watch::Receiver<bool>,
    kind: BufferKind,
) -> JoinHandle<()> {
    handle.spawn(async move {
        loop {
            let deadline = match core.upgrade() {
                Some(shared) => shared.flush_deadline(kind),
                None => break,
            };
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let Some(shared) = core.upgrade() else { break };
                    shared.flush_if_due(kind);
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(buffer = ?kind, "Flush task stopped");
    })
}

fn spawn_periodic<F>(
    handle: &Handle,
    core: Weak<CoreShared>,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
    task: &'static str,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(&CoreShared) + Send + 'static,
{
    handle.spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(shared) = core.upgrade() else { break };
                    tick(&shared);
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(task, "Periodic task stopped");
    })
}

#[cfg(test)]
#[path = "facade_tests.rs"]
mod facade_tests;
