//! Capability trait and implementations.
//!
//! Capabilities are the pluggable units of processing a stage applies to
//! each work unit. The stage knows nothing about what they do; it only
//! moves units in and results (or captured failures) out.

use async_trait::async_trait;
use std::fmt::Debug;
use std::marker::PhantomData;

use crate::errors::CapabilityError;

/// Trait for processing capabilities.
///
/// `W` is the work unit a capability reads and `R` the value it produces.
#[async_trait]
pub trait Capability<W, R>: Send + Sync + Debug {
    /// Returns the name of the capability.
    fn name(&self) -> &str;

    /// Returns the capability family, used to group enabled capabilities.
    fn kind(&self) -> &str {
        "generic"
    }

    /// Whether this capability wants to see `unit` at all.
    fn applies_to(&self, _unit: &W) -> bool {
        true
    }

    /// Processes one work unit.
    ///
    /// # Arguments
    ///
    /// * `unit` - The work unit taken from the stage's input queue
    ///
    /// # Returns
    ///
    /// The computed value, or the error that becomes a failure report.
    async fn process(&self, unit: &W) -> Result<R, CapabilityError>;

    /// Releases whatever the capability holds. Called once at stage teardown.
    async fn end(&self) -> Result<(), CapabilityError> {
        Ok(())
    }
}

/// A simple function-based capability.
pub struct FnCapability<W, R, F>
where
    F: Fn(&W) -> Result<R, CapabilityError> + Send + Sync,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn(&W) -> R>,
}

impl<W, R, F> FnCapability<W, R, F>
where
    F: Fn(&W) -> Result<R, CapabilityError> + Send + Sync,
{
    /// Creates a new function-based capability.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<W, R, F> Debug for FnCapability<W, R, F>
where
    F: Fn(&W) -> Result<R, CapabilityError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCapability")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<W, R, F> Capability<W, R> for FnCapability<W, R, F>
where
    W: Sync,
    R: Send,
    F: Fn(&W) -> Result<R, CapabilityError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, unit: &W) -> Result<R, CapabilityError> {
        (self.func)(unit)
    }
}

/// A capability that accepts every unit and returns `R::default()`.
#[derive(Debug, Clone)]
pub struct NoOpCapability {
    name: String,
}

impl NoOpCapability {
    /// Creates a new no-op capability.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl<W, R> Capability<W, R> for NoOpCapability
where
    W: Sync,
    R: Default + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _unit: &W) -> Result<R, CapabilityError> {
        Ok(R::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_capability() {
        let cap = FnCapability::new("double", |n: &u32| Ok(n * 2));

        assert_eq!(Capability::<u32, u32>::name(&cap), "double");
        assert_eq!(cap.process(&21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_fn_capability_error() {
        let cap = FnCapability::new("picky", |n: &u32| {
            if *n == 0 {
                Err(CapabilityError::failed("zero"))
            } else {
                Ok(*n)
            }
        });

        let err = cap.process(&0).await.unwrap_err();
        assert_eq!(err.to_string(), "zero");
    }

    #[tokio::test]
    async fn test_noop_capability_defaults() {
        let cap = NoOpCapability::new("noop");

        assert_eq!(Capability::<String, Vec<u8>>::kind(&cap), "generic");
        assert!(Capability::<String, Vec<u8>>::applies_to(&cap, &"x".to_string()));

        let value = Capability::<String, Vec<u8>>::process(&cap, &"x".to_string())
            .await
            .unwrap();
        assert!(value.is_empty());
        assert!(Capability::<String, Vec<u8>>::end(&cap).await.is_ok());
    }
}
