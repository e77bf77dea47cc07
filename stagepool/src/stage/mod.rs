//! The pipeline stage.
//!
//! A [`Stage`] owns an input queue, an output queue, a bounded
//! [`WorkerPool`] and a [`PendingCounter`]. One consumption task takes units
//! off the input queue in arrival order and hands each to the pool, so
//! intake is strictly ordered while processing overlaps. Every outcome,
//! success or captured failure, lands on the output queue; the sentinel is
//! always the last thing a stage emits.
//!
//! ## Shutdown
//!
//! - [`Stage::join`] queues the sentinel behind any remaining work and waits
//!   for the consumption loop to reach it.
//! - [`Stage::terminate`] first discards everything still waiting, then does
//!   the same.
//!
//! In both cases, observing the sentinel stops the pool: units still in flight
//! are aborted, not awaited. [`Stage::join_drained`] waits for in-flight
//! units first.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::capabilities::Capability;
use crate::config::StageConfig;
use crate::core::{Envelope, FailureReport, StageMessage, StageResult};
use crate::errors::{CapabilityError, StageError};
use crate::observability::SpanTimer;
use crate::pool::{PendingCounter, WorkerPool};
use crate::queue::WorkQueue;
use crate::status::{NoOpStatus, StatusReporter, StatusSnapshot};
use crate::utils::generate_uuid;


/// Shared capability handle.
pub type CapabilityRef<W, R> = Arc<dyn Capability<W, R>>;

/// Builder for [`Stage`].
pub struct StageBuilder<W, R> {
    name: String,
    phase: Option<String>,
    capabilities: Vec<CapabilityRef<W, R>>,
    status: Option<Arc<dyn StatusReporter>>,
    config: StageConfig,
}

impl<W, R> StageBuilder<W, R>
where
    W: Clone + Debug + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Creates a builder for a stage called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: None,
            capabilities: Vec::new(),
            status: None,
            config: StageConfig::default(),
        }
    }

    /// Sets the phase recorded in failure reports. Defaults to the stage name.
    #[must_use]
    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Adds a capability.
    #[must_use]
    pub fn capability(mut self, capability: CapabilityRef<W, R>) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Adds several capabilities.
    #[must_use]
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = CapabilityRef<W, R>>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    /// Sets the status collaborator.
    #[must_use]
    pub fn status(mut self, status: Arc<dyn StatusReporter>) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the stage. The consumption loop is not running until [`Stage::start`].
    pub fn build(self) -> Result<Stage<W, R>, StageError> {
        self.config.validate()?;
        if self.capabilities.is_empty() {
            return Err(StageError::NoCapabilities(self.name));
        }

        let pool = WorkerPool::new(self.config.worker_name.clone(), self.config.pool_size);
        let inner = StageInner {
            id: generate_uuid(),
            phase: self.phase.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            config: self.config,
            in_queue: WorkQueue::new(),
            out_queue: WorkQueue::new(),
            pending: PendingCounter::new(),
            capabilities: self.capabilities,
            status: self.status.unwrap_or_else(|| Arc::new(NoOpStatus)),
        };

        Ok(Stage {
            inner: Arc::new(inner),
            pool: Arc::new(pool),
            handle: Mutex::new(None),
            started: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
        })
    }
}

/// Point-in-time counters for a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStats {
    /// The stage name.
    pub name: String,
    /// Units waiting to be dispatched.
    pub input_queue_size: usize,
    /// Messages waiting to be drained.
    pub output_queue_size: usize,
    /// Units dispatched but not completed.
    pub pending: usize,
    /// Pool slots in use.
    pub active_workers: usize,
    /// Pool slots available in total.
    pub pool_size: usize,
    /// Whether the consumption loop was started.
    pub started: bool,
    /// Whether the consumption loop has exited.
    pub finished: bool,
}

/// State shared between the stage handle, its consumption loop and its workers.
struct StageInner<W, R> {
    id: Uuid,
    name: String,
    phase: String,
    config: StageConfig,
    in_queue: WorkQueue<Envelope<W>>,
    out_queue: WorkQueue<StageMessage<W, R>>,
    pending: PendingCounter,
    capabilities: Vec<CapabilityRef<W, R>>,
    status: Arc<dyn StatusReporter>,
}

/// A pipeline stage fanning a work queue out to a bounded worker pool.
pub struct Stage<W, R> {
    inner: Arc<StageInner<W, R>>,
    pool: Arc<WorkerPool>,
    handle: Mutex<Option<JoinHandle<Result<(), StageError>>>>,
    started: AtomicBool,
    shutdown_requested: AtomicBool,
}

impl<W, R> Stage<W, R>
where
    W: Clone + Debug + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Shorthand for [`StageBuilder::new`].
    #[must_use]
    pub fn builder(name: impl Into<String>) -> StageBuilder<W, R> {
        StageBuilder::new(name)
    }

    /// Returns the stage identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the phase recorded in failure reports.
    #[must_use]
    pub fn phase(&self) -> &str {
        &self.inner.phase
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StageConfig {
        &self.inner.config
    }

    /// Spawns the consumption loop on the current tokio runtime.
    ///
    /// Fails with [`StageError::NoRuntime`] when called outside one.
    pub fn start(&self) -> Result<(), StageError> {
        let runtime = Handle::try_current().map_err(|e| StageError::NoRuntime {
            stage: self.inner.name.clone(),
            reason: e.to_string(),
        })?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StageError::AlreadyStarted(self.inner.name.clone()));
        }

        let inner = Arc::clone(&self.inner);
        let pool = Arc::clone(&self.pool);
        let span = info_span!("stage", stage = %self.inner.name, id = %self.inner.id);
        let handle = runtime.spawn(consume(inner, pool).instrument(span));
        *self.handle.lock() = Some(handle);

        info!(
            stage = %self.inner.name,
            pool_size = self.pool.size(),
            capabilities = self.inner.capabilities.len(),
            "Stage started"
        );
        Ok(())
    }

    /// Returns true once [`start`](Self::start) has been called.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns true once the consumption loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        if !self.is_started() {
            return false;
        }
        self.handle.lock().as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Queues a work unit. `None` is ignored.
    pub fn put(&self, unit: impl Into<Option<W>>) {
        if let Some(unit) = unit.into() {
            self.inner.in_queue.put(Envelope::Work(unit));
        }
    }

    /// Queues every unit of `units` in iteration order. `None` items are ignored.
    pub fn put_many<I>(&self, units: I)
    where
        I: IntoIterator,
        I::Item: Into<Option<W>>,
    {
        for unit in units {
            self.put(unit);
        }
    }

    /// Takes one message off the output queue, waiting at most `timeout`.
    ///
    /// `Err(StageError::Timeout)` means "nothing yet" and is safe to retry.
    pub async fn get_result(&self, timeout: Duration) -> Result<StageMessage<W, R>, StageError> {
        self.inner.out_queue.get_timeout(timeout).await
    }

    /// [`get_result`](Self::get_result) with the configured default timeout.
    pub async fn next_result(&self) -> Result<StageMessage<W, R>, StageError> {
        self.get_result(self.inner.config.result_timeout()).await
    }

    /// Returns true while the stage may still produce output.
    ///
    /// False only when nothing waits on the input queue, nothing waits on the
    /// output queue and no dispatched unit is still in flight.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        // Read order matters. A unit's guard is taken before its input slot is
        // marked handled, and its output is pushed before its guard is released,
        // so reading input, then pending, then output never misses a unit in
        // transit between them.
        if self.inner.in_queue.unfinished() > 0 {
            return true;
        }
        if self.inner.pending.is_busy() {
            return true;
        }
        !self.inner.out_queue.is_empty()
    }

    /// Number of units waiting to be dispatched.
    #[must_use]
    pub fn input_queue_size(&self) -> usize {
        self.inner.in_queue.len()
    }

    /// Number of messages waiting to be drained.
    #[must_use]
    pub fn output_queue_size(&self) -> usize {
        self.inner.out_queue.len()
    }

    /// Number of dispatched units not yet completed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.get()
    }

    /// Returns the current counters.
    #[must_use]
    pub fn stats(&self) -> StageStats {
        StageStats {
            name: self.inner.name.clone(),
            input_queue_size: self.input_queue_size(),
            output_queue_size: self.output_queue_size(),
            pending: self.pending_count(),
            active_workers: self.pool.active(),
            pool_size: self.pool.size(),
            started: self.is_started(),
            finished: self.is_finished(),
        }
    }

    /// Graceful shutdown: lets queued work be dispatched, then stops.
    ///
    /// Returns the teardown error, if any capability's cleanup failed. After
    /// `Err(StageError::Teardown { .. })` no sentinel is emitted: the stage is
    /// finished and its owner must stop draining rather than wait for one.
    pub async fn join(&self) -> Result<(), StageError> {
        self.begin_shutdown()?;
        info!(stage = %self.inner.name, queued = self.input_queue_size(), "Joining stage");
        self.send_sentinel_and_wait().await
    }

    /// Immediate shutdown: discards queued work, then stops.
    ///
    /// Units already dispatched are aborted with the pool as in [`join`](Self::join).
    /// A teardown error likewise means no sentinel will follow.
    pub async fn terminate(&self) -> Result<(), StageError> {
        self.begin_shutdown()?;
        let discarded = self.inner.in_queue.clear();
        info!(stage = %self.inner.name, discarded, "Terminating stage");
        self.send_sentinel_and_wait().await
    }

    /// Drain-then-join: waits until every queued unit has been dispatched and
    /// every dispatched unit has completed, then shuts down like [`join`](Self::join).
    ///
    /// Nothing is aborted, so each unit put before this call yields its
    /// messages ahead of the sentinel.
    pub async fn join_drained(&self) -> Result<(), StageError> {
        self.begin_shutdown()?;
        info!(stage = %self.inner.name, queued = self.input_queue_size(), "Draining stage");

        loop {
            self.inner.in_queue.join().await;
            self.inner.pending.wait_idle().await;
            if self.inner.in_queue.unfinished() == 0 && !self.inner.pending.is_busy() {
                break;
            }
        }
        self.send_sentinel_and_wait().await
    }

    fn begin_shutdown(&self) -> Result<(), StageError> {
        if !self.is_started() {
            return Err(StageError::NotStarted(self.inner.name.clone()));
        }
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            return Err(StageError::AlreadyShutdown(self.inner.name.clone()));
        }
        Ok(())
    }

    async fn send_sentinel_and_wait(&self) -> Result<(), StageError> {
        self.inner.in_queue.put(Envelope::Sentinel);
        self.inner.in_queue.join().await;

        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };

        match handle.await {
            Ok(result) => result,
            Err(join_error) => Err(StageError::LoopAborted {
                stage: self.inner.name.clone(),
                reason: join_error.to_string(),
            }),
        }
    }
}

impl<W, R> Debug for Stage<W, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("input_queue", &self.inner.in_queue)
            .field("output_queue", &self.inner.out_queue)
            .field("pending", &self.inner.pending.get())
            .field("pool", &self.pool)
            .finish()
    }
}

impl<W, R> Drop for Stage<W, R> {
    fn drop(&mut self) {
        // Pool first: once it is stopped a loop still running elsewhere can no
        // longer hand it new units.
        if !self.pool.is_stopped() && self.started.load(Ordering::SeqCst) {
            let aborted = self.pool.abort_all();
            debug!(stage = %self.inner.name, aborted, "Stage dropped; in-flight units aborted");
        }
        if let Some(handle) = self.handle.get_mut().take() {
            if !handle.is_finished() {
                debug!(stage = %self.inner.name, "Stage dropped while running; aborting loop");
                handle.abort();
            }
        }
    }
}

/// The consumption loop: strictly ordered intake, concurrent processing.
async fn consume<W, R>(inner: Arc<StageInner<W, R>>, pool: Arc<WorkerPool>) -> Result<(), StageError>
where
    W: Clone + Debug + Send + Sync + 'static,
    R: Send + 'static,
{
    loop {
        match inner.in_queue.get().await {
            Envelope::Work(unit) => {
                let guard = inner.pending.acquire();
                let worker = Arc::clone(&inner);
                let span = info_span!("stage_worker", worker = %inner.config.worker_name);

                pool.submit(
                    async move {
                        let _guard = guard;
                        worker.dispatch(unit).await;
                    }
                    .instrument(span),
                );
                inner.in_queue.task_done()?;
            }
            Envelope::Sentinel => {
                let aborted = pool.stop().await;
                if aborted > 0 {
                    info!(aborted, "In-flight units aborted at shutdown");
                }

                let torn_down = inner.teardown().await;
                if torn_down.is_ok() {
                    inner.out_queue.put(StageMessage::Sentinel);
                }
                inner.in_queue.task_done()?;

                info!(ok = torn_down.is_ok(), "Consumption loop finished");
                return torn_down;
            }
        }
    }
}

impl<W, R> StageInner<W, R>
where
    W: Clone + Debug + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Runs `unit` through every applicable capability, pushing one message each.
    async fn dispatch(&self, unit: W) {
        let timer = SpanTimer::start("dispatch");

        for capability in &self.capabilities {
            let applies = std::panic::catch_unwind(AssertUnwindSafe(|| capability.applies_to(&unit)));
            let message = match applies {
                Ok(false) => continue,
                Ok(true) => self.run_capability(capability, &unit).await,
                Err(payload) => StageMessage::Failure(self.capture_failure(
                    capability.name(),
                    &unit,
                    CapabilityError::from_panic(payload.as_ref()),
                )),
            };
            self.out_queue.put(message);
        }

        debug!(elapsed_ms = timer.finish(), "Unit dispatched");
    }

    async fn run_capability(&self, capability: &CapabilityRef<W, R>, unit: &W) -> StageMessage<W, R> {
        match AssertUnwindSafe(capability.process(unit)).catch_unwind().await {
            Ok(Ok(value)) => {
                StageMessage::Result(StageResult::new(capability.name(), unit.clone(), value))
            }
            Ok(Err(error)) => StageMessage::Failure(self.capture_failure(capability.name(), unit, error)),
            Err(payload) => StageMessage::Failure(self.capture_failure(
                capability.name(),
                unit,
                CapabilityError::from_panic(payload.as_ref()),
            )),
        }
    }

    fn capture_failure(&self, capability: &str, unit: &W, error: CapabilityError) -> FailureReport<W> {
        let enabled = self.status.enabled_capabilities();
        let description = format!("{unit:?}");

        self.status.set_running_capability(capability);
        self.status.set_phase(&self.phase);
        self.status.set_current_unit(&description);

        warn!(
            phase = %self.phase,
            capability,
            unit = %description,
            error = %error,
            "Capability failed"
        );

        let snapshot = StatusSnapshot {
            phase: Some(self.phase.clone()),
            running_capability: Some(capability.to_string()),
            current_unit: Some(description),
        };
        FailureReport::capture(&self.phase, capability, unit.clone(), error)
            .with_enabled_capabilities(enabled)
            .with_status(snapshot)
    }

    /// Calls every capability's cleanup hook; the first failure is returned.
    async fn teardown(&self) -> Result<(), StageError> {
        for capability in &self.capabilities {
            let error = match AssertUnwindSafe(capability.end()).catch_unwind().await {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(payload) => CapabilityError::from_panic(payload.as_ref()),
            };
            warn!(capability = capability.name(), error = %error, "Teardown failed");
            return Err(StageError::teardown(capability.name(), error));
        }
        Ok(())
    }
}
