use serde::{Deserialize, Serialize};

/// Default number of detached asynchronous deliveries in flight per signal.
const DEFAULT_MAX_CONCURRENT_ASYNC: usize = 1024;

/// Indicates an invalid signal configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Asynchronous deliveries could never acquire a permit.
    #[error("max_concurrent_async must be at least 1")]
    ZeroConcurrency,

    /// Pooled deliveries would never run.
    #[error("the worker pool requires at least one thread")]
    ZeroThreads,
}

/// Configuration of a [`Signal`](crate::Signal).
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Holds the registry lock for the entire duration of an emission.
    ///
    /// When enabled, [`disconnect`](crate::Signal::disconnect) waits for running emissions to
    /// finish, so that a disconnected synchronous slot is guaranteed to not run anymore once
    /// `disconnect` returns. Slots must not connect or disconnect on the same signal from within
    /// a synchronous delivery, as this deadlocks. The same applies to asynchronous slots while
    /// an emission waits for a permit.
    ///
    /// When disabled, emissions work on a snapshot of the registry taken at their start, and
    /// slots may connect or disconnect on the emitting signal.
    pub enforce_thread_safety: bool,

    /// The maximum number of asynchronous deliveries running at the same time.
    ///
    /// An emission blocks once all permits are taken, until a running delivery finishes.
    pub max_concurrent_async: usize,
}

impl SignalConfig {
    /// Checks the configuration for values that would make deliveries stall.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_async == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }

        Ok(())
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            enforce_thread_safety: false,
            max_concurrent_async: DEFAULT_MAX_CONCURRENT_ASYNC,
        }
    }
}
