use std::time::Duration;

/// Exponential idle backoff of a polling consumer.
///
/// A consumer that finds its queue empty sleeps for [`current`](Self::current) and then calls
/// [`advance`](Self::advance), which doubles the delay. Once the doubled delay exceeds the
/// ceiling, `advance` returns `false` and the consumer should switch to a blocking receive.
/// Receiving work calls [`reset`](Self::reset).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// The delay a fresh or reset backoff starts with.
    pub const MIN_DELAY: Duration = Duration::from_nanos(1);

    /// Creates a backoff starting at [`MIN_DELAY`](Self::MIN_DELAY) with the given ceiling.
    ///
    /// A ceiling of zero makes the consumer block after the first, minimal sleep.
    pub fn new(max: Duration) -> Self {
        Self::with_min(Self::MIN_DELAY, max)
    }

    /// Creates a backoff with a custom initial delay.
    pub fn with_min(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Returns the delay to sleep for on the next idle poll.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns the ceiling after which the consumer blocks.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Doubles the delay.
    ///
    /// Returns `false` if the new delay exceeds the ceiling.
    pub fn advance(&mut self) -> bool {
        self.current = self.current.saturating_mul(2);
        self.current <= self.max
    }

    /// Resets the delay to its initial value.
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}
