use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// A counting semaphore bounding the number of concurrently running detached jobs.
///
/// [`acquire`](Self::acquire) blocks the calling thread until a permit is available. Permits are
/// returned when the guard is dropped, which also happens when the holding thread unwinds. The
/// number of outstanding permits therefore never exceeds the capacity.
///
/// A gate with a capacity of zero never hands out a permit.
pub struct PermitGate {
    capacity: usize,
    available: Mutex<usize>,
    released: Condvar,
}

impl PermitGate {
    /// Creates a gate with `capacity` permits, all of them available.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            available: Mutex::new(capacity),
            released: Condvar::new(),
        }
    }

    /// Returns the total number of permits of this gate.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of permits that can be acquired without blocking right now.
    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    /// Blocks until a permit is available and takes it.
    pub fn acquire(&self) -> Permit<'_> {
        self.take();
        Permit { gate: self }
    }

    /// Takes a permit if one is available, without blocking.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.try_take().then(|| Permit { gate: self })
    }

    /// Blocks until a permit is available and takes it.
    ///
    /// The returned permit keeps the gate alive, so it can be moved into another thread.
    pub fn acquire_owned(self: &Arc<Self>) -> OwnedPermit {
        self.take();
        OwnedPermit { gate: self.clone() }
    }

    /// Takes a permit that can be moved into another thread if one is available, without
    /// blocking.
    pub fn try_acquire_owned(self: &Arc<Self>) -> Option<OwnedPermit> {
        self.try_take().then(|| OwnedPermit { gate: self.clone() })
    }

    fn take(&self) {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
    }

    fn try_take(&self) -> bool {
        let mut available = self.available.lock();
        if *available == 0 {
            return false;
        }
        *available -= 1;
        true
    }

    fn release(&self) {
        let mut available = self.available.lock();
        debug_assert!(*available < self.capacity, "released more permits than acquired");
        *available += 1;
        drop(available);

        self.released.notify_one();
    }
}

impl fmt::Debug for PermitGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermitGate")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// A permit borrowed from a [`PermitGate`], released on drop.
#[must_use = "the permit is released immediately if unused"]
#[derive(Debug)]
pub struct Permit<'a> {
    gate: &'a PermitGate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// A permit of a shared [`PermitGate`], released on drop.
#[must_use = "the permit is released immediately if unused"]
#[derive(Debug)]
pub struct OwnedPermit {
    gate: Arc<PermitGate>,
}

impl Drop for OwnedPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let gate = PermitGate::new(2);

        let first = gate.acquire();
        let second = gate.acquire();
        assert_eq!(gate.available(), 0);
        assert!(gate.try_acquire().is_none());

        drop(first);
        assert_eq!(gate.available(), 1);
        drop(second);
        assert_eq!(gate.available(), 2);
    }

    #[test]
    fn test_zero_capacity_never_grants() {
        let gate = PermitGate::new(0);
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.capacity(), 0);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let gate = Arc::new(PermitGate::new(1));
        let permit = gate.acquire_owned();

        let (acquired_tx, acquired_rx) = flume::bounded(1);
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || {
                let _permit = gate.acquire_owned();
                acquired_tx.send(()).unwrap();
            })
        };

        assert!(
            acquired_rx
                .recv_timeout(Duration::from_millis(100))
                .is_err()
        );

        drop(permit);
        acquired_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_permit_released_on_panic() {
        let gate = Arc::new(PermitGate::new(1));
        let permit = gate.acquire_owned();

        let result = thread::spawn(move || {
            let _permit = permit;
            panic!("delivery failed");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_outstanding_never_exceeds_capacity() {
        let gate = Arc::new(PermitGate::new(3));
        let in_flight = Arc::new(Mutex::new((0usize, 0usize)));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let gate = gate.clone();
                let in_flight = in_flight.clone();
                thread::spawn(move || {
                    let _permit = gate.acquire_owned();
                    {
                        let mut guard = in_flight.lock();
                        guard.0 += 1;
                        guard.1 = guard.1.max(guard.0);
                    }
                    thread::sleep(Duration::from_millis(5));
                    in_flight.lock().0 -= 1;
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let (current, peak) = *in_flight.lock();
        assert_eq!(current, 0);
        assert!(peak <= 3, "peak of {peak} exceeds capacity");
        assert_eq!(gate.available(), 3);
    }
}
