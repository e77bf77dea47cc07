//! Mock capabilities for testing.
//!
//! Every mock produces a `String` value rendering the unit with `{:?}`, so
//! they can be mixed in one stage regardless of the unit type.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::capabilities::Capability;
use crate::errors::CapabilityError;

fn render<W: Debug>(unit: &W) -> String {
    format!("{unit:?}")
}

/// A capability that records every unit it sees.
#[derive(Debug)]
pub struct RecordingCapability {
    name: String,
    seen: Mutex<Vec<String>>,
    ended: AtomicBool,
}

impl RecordingCapability {
    /// Creates a new recording capability.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seen: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        }
    }

    /// Returns the rendered units in processing order.
    #[must_use]
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    /// Returns the number of processed units.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Returns true once `end()` has been called.
    #[must_use]
    pub fn ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<W> Capability<W, String> for RecordingCapability
where
    W: Debug + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, unit: &W) -> Result<String, CapabilityError> {
        let rendered = render(unit);
        self.seen.lock().push(rendered.clone());
        Ok(rendered)
    }

    async fn end(&self) -> Result<(), CapabilityError> {
        self.ended.store(true, Ordering::SeqCst);
        Ok(())
    }
}

type UnitPredicate<W> = Box<dyn Fn(&W) -> bool + Send + Sync>;

/// A capability that fails on selected units, and optionally on `end()`.
pub struct FailingCapability<W> {
    name: String,
    error: String,
    predicate: UnitPredicate<W>,
    fail_on_end: bool,
}

impl<W> FailingCapability<W> {
    /// Creates a capability that fails on every unit.
    #[must_use]
    pub fn always(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::when(name, error, |_| true)
    }

    /// Creates a capability that fails on units matching `predicate` and
    /// succeeds on the rest.
    #[must_use]
    pub fn when<P>(name: impl Into<String>, error: impl Into<String>, predicate: P) -> Self
    where
        P: Fn(&W) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            error: error.into(),
            predicate: Box::new(predicate),
            fail_on_end: false,
        }
    }

    /// Makes `end()` fail too.
    #[must_use]
    pub fn with_failing_end(mut self) -> Self {
        self.fail_on_end = true;
        self
    }
}

impl<W> Debug for FailingCapability<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailingCapability")
            .field("name", &self.name)
            .field("error", &self.error)
            .field("fail_on_end", &self.fail_on_end)
            .finish()
    }
}

#[async_trait]
impl<W> Capability<W, String> for FailingCapability<W>
where
    W: Debug + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, unit: &W) -> Result<String, CapabilityError> {
        if (self.predicate)(unit) {
            Err(CapabilityError::failed(&self.error))
        } else {
            Ok(render(unit))
        }
    }

    async fn end(&self) -> Result<(), CapabilityError> {
        if self.fail_on_end {
            Err(CapabilityError::failed(format!("{} could not be closed", self.name)))
        } else {
            Ok(())
        }
    }
}

/// A capability that panics on every unit.
#[derive(Debug)]
pub struct PanickingCapability {
    name: String,
    message: String,
}

impl PanickingCapability {
    /// Creates a new panicking capability.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl<W> Capability<W, String> for PanickingCapability
where
    W: Debug + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::panic)]
    async fn process(&self, _unit: &W) -> Result<String, CapabilityError> {
        panic!("{}", self.message);
    }
}

/// A capability that takes time to process each unit.
#[derive(Debug)]
pub struct SlowCapability {
    name: String,
    delay: Duration,
    completed: AtomicUsize,
}

impl SlowCapability {
    /// Creates a new slow capability.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            completed: AtomicUsize::new(0),
        }
    }

    /// Creates a slow capability with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }

    /// Number of units that finished their delay.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<W> Capability<W, String> for SlowCapability
where
    W: Debug + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, unit: &W) -> Result<String, CapabilityError> {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(render(unit))
    }
}

/// A capability that blocks each unit until the test opens the gate.
///
/// Useful to hold units in flight deterministically.
#[derive(Debug, Clone)]
pub struct GatedCapability {
    name: String,
    gate: Arc<Semaphore>,
    entered: Arc<AtomicUsize>,
}

impl GatedCapability {
    /// Creates a capability with a closed gate.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gate: Arc::new(Semaphore::new(0)),
            entered: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Lets `n` more units through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Number of units that reached the gate.
    #[must_use]
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Waits until at least `n` units reached the gate.
    pub async fn wait_entered(&self, n: usize) {
        while self.entered() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl<W> Capability<W, String> for GatedCapability
where
    W: Debug + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, unit: &W) -> Result<String, CapabilityError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| CapabilityError::failed("gate closed"))?;
        permit.forget();
        Ok(render(unit))
    }
}
