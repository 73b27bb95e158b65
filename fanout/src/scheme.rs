use std::fmt;

use serde::{Deserialize, Serialize};

/// Determines how an emission reaches a slot.
///
/// The scheme is chosen when the slot is connected and never changes afterwards. On every
/// emission, slots are visited scheme by scheme in the order of [`DeliveryScheme::ALL`], and
/// within a scheme in the order they were connected.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryScheme {
    /// The slot runs inline on the emitting thread.
    ///
    /// When `emit` returns, every synchronous slot has been invoked and has returned. Prefer
    /// this for short callbacks, or when the emitter must know that the slot has finished.
    Synchronous,

    /// Every emission spawns a detached thread running the slot.
    ///
    /// The number of such threads in flight is bounded by the signal's
    /// [`max_concurrent_async`](crate::SignalConfig::max_concurrent_async). Once exhausted, the
    /// emitting thread blocks until a running delivery finishes.
    Asynchronous,

    /// The slot owns a dedicated worker thread that runs emissions one at a time, in the order
    /// they arrived.
    Ordered,

    /// Emissions are handed to a shared pool of worker threads, without any ordering guarantee.
    Pooled,
}

impl DeliveryScheme {
    /// All schemes in the order they are visited by an emission.
    pub const ALL: [Self; 4] = [
        Self::Synchronous,
        Self::Asynchronous,
        Self::Ordered,
        Self::Pooled,
    ];

    /// Returns the name of the scheme.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synchronous => "synchronous",
            Self::Asynchronous => "asynchronous",
            Self::Ordered => "ordered",
            Self::Pooled => "pooled",
        }
    }
}

impl fmt::Display for DeliveryScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a connected slot within its signal.
///
/// Identifiers strictly increase in connection order and are never reused by the same signal,
/// not even after the slot has been disconnected.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SlotId(u64);

impl SlotId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the numeric value of the identifier.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
