//! Entry points for measuring a callable.

use std::sync::Arc;

use ractor::Actor;
use tokio::sync::oneshot;
use tracing::warn;

use crate::actors::{CoordinatorActor, CoordinatorArguments};
use crate::config::MeasureConfig;
use crate::error::MeasureError;
use crate::probe::{AllocationProbe, HeapProbe};
use crate::types::MeasurementResult;

/// Measures callables against one probe.
///
/// Holds no per-measurement state: every call to [`measure`](Self::measure)
/// spawns a fresh coordinator, executor and observer, and all three have
/// terminated when it returns.
#[derive(Debug, Clone)]
pub struct Meter {
    probe: Arc<dyn HeapProbe>,
    config: MeasureConfig,
}

impl Meter {
    /// Create a meter with the default config.
    #[must_use]
    pub fn new(probe: impl HeapProbe) -> Self {
        Self::from_shared(Arc::new(probe))
    }

    /// Create a meter around an already shared probe.
    #[must_use]
    pub fn from_shared(probe: Arc<dyn HeapProbe>) -> Self {
        Self {
            probe,
            config: MeasureConfig::default(),
        }
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: MeasureConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &MeasureConfig {
        &self.config
    }

    /// Run `work` once and report the net heap it retained.
    ///
    /// Never fails: a callable that panics, or a protocol actor that cannot
    /// be spawned, yields [`MeasurementResult::failed`].
    pub async fn measure<T, F>(&self, work: F) -> MeasurementResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply, answer) = oneshot::channel();
        let args = CoordinatorArguments {
            work,
            probe: Arc::clone(&self.probe),
            config: self.config.clone(),
            reply,
        };

        let handle = match Actor::spawn(None, CoordinatorActor::<T, F>::new(), args).await {
            Ok((_coordinator, handle)) => handle,
            Err(e) => {
                warn!(error = %MeasureError::spawn_failed(e.to_string()), "Measurement not started");
                return MeasurementResult::failed();
            }
        };

        let result = answer.await.unwrap_or_else(|_| {
            warn!(error = %MeasureError::ReplyDropped, "Measurement lost");
            MeasurementResult::failed()
        });

        // The coordinator answers before it finishes stopping.
        if let Err(e) = handle.await {
            warn!(error = %e, "Coordinator task ended abnormally");
        }
        result
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new(AllocationProbe::new())
    }
}

/// Measure `work` with the [`AllocationProbe`].
///
/// Reports `bytes: None` unless the binary installed
/// [`TrackingAllocator`](crate::TrackingAllocator) as its global allocator.
pub async fn measure<T, F>(work: F) -> MeasurementResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    Meter::default().measure(work).await
}

/// Measure `work` with a specific probe.
pub async fn measure_with<T, F>(probe: impl HeapProbe, work: F) -> MeasurementResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    Meter::new(probe).measure(work).await
}
