use std::io;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::Job;
use crate::backoff::Backoff;

/// An item of a strand's queue.
pub enum Message {
    /// Run the job on the strand's worker thread.
    Invoke(Job),
    /// Terminate the worker. Messages queued after this one are never run.
    Stop,
}

/// Error returned when enqueueing onto a strand whose worker has terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("strand worker has terminated")]
pub struct StrandClosed;

/// Creates the queue of a strand.
///
/// The sender can be cloned to enqueue from any number of threads. There is exactly one
/// receiver, which observes messages in the order they were enqueued.
pub fn channel() -> (StrandSender, StrandReceiver) {
    let (tx, rx) = flume::unbounded();
    (StrandSender { tx }, StrandReceiver { rx })
}

/// The producing half of a strand queue.
#[derive(Clone, Debug)]
pub struct StrandSender {
    tx: flume::Sender<Message>,
}

impl StrandSender {
    /// Enqueues a job without blocking.
    pub fn enqueue(&self, job: Job) -> Result<(), StrandClosed> {
        self.tx.send(Message::Invoke(job)).map_err(|_| StrandClosed)
    }

    /// Enqueues the stop sentinel.
    ///
    /// Jobs enqueued before the sentinel still run.
    pub fn stop(&self) {
        // A terminated worker needs no sentinel.
        self.tx.send(Message::Stop).ok();
    }

    /// Returns the number of queued messages.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Returns `true` if no message is queued.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// The consuming half of a strand queue.
///
/// Once every [`StrandSender`] is gone and the queue is drained, the receiver yields
/// [`Message::Stop`].
#[derive(Debug)]
pub struct StrandReceiver {
    rx: flume::Receiver<Message>,
}

impl StrandReceiver {
    /// Dequeues the next message if one is available, without blocking.
    pub fn try_dequeue(&self) -> Option<Message> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(flume::TryRecvError::Empty) => None,
            Err(flume::TryRecvError::Disconnected) => Some(Message::Stop),
        }
    }

    /// Blocks until the next message is available.
    pub fn blocking_dequeue(&self) -> Message {
        self.rx.recv().unwrap_or(Message::Stop)
    }
}

/// States of a strand's worker loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Polling the queue without blocking.
    Draining,
    /// The queue was empty, sleeping before the next poll.
    Sleeping(Duration),
    /// Idle for longer than the backoff ceiling, blocking on the queue.
    BlockedWait,
    /// The sentinel was received.
    Terminated,
}

/// The consumer loop of a strand.
struct Worker {
    rx: StrandReceiver,
    backoff: Backoff,
}

impl Worker {
    fn run(mut self) {
        let mut state = State::Draining;

        while state != State::Terminated {
            state = self.step(state);
        }
    }

    fn step(&mut self, state: State) -> State {
        match state {
            State::Draining => match self.rx.try_dequeue() {
                Some(message) => self.handle(message),
                None => State::Sleeping(self.backoff.current()),
            },
            State::Sleeping(delay) => {
                thread::sleep(delay);
                if self.backoff.advance() {
                    State::Draining
                } else {
                    fanout_log::trace!("strand idle, switching to blocking wait");
                    State::BlockedWait
                }
            }
            State::BlockedWait => {
                let message = self.rx.blocking_dequeue();
                self.handle(message)
            }
            State::Terminated => State::Terminated,
        }
    }

    fn handle(&mut self, message: Message) -> State {
        match message {
            Message::Invoke(job) => {
                job();
                self.backoff.reset();
                State::Draining
            }
            Message::Stop => State::Terminated,
        }
    }
}

/// A dedicated thread running jobs one at a time, in the order they were enqueued.
///
/// The worker polls its queue with an exponential [`Backoff`] while idle, and falls back to a
/// blocking receive once the backoff exceeds `max_wait`. A strand terminates after it dequeued
/// the stop sentinel, which [`shutdown`](Self::shutdown) enqueues before joining the thread.
///
/// Dropping a [`Strand`] without shutting it down detaches the worker. It terminates on its own
/// once every sender is gone and the queue is drained.
#[derive(Debug)]
pub struct Strand {
    sender: StrandSender,
    handle: JoinHandle<()>,
}

impl Strand {
    /// Spawns the worker thread with the given name.
    pub fn spawn(name: String, max_wait: Duration) -> io::Result<Self> {
        let (sender, rx) = channel();
        let worker = Worker {
            rx,
            backoff: Backoff::new(max_wait),
        };

        let handle = thread::Builder::new().name(name).spawn(move || {
            fanout_log::debug!("strand started");
            worker.run();
            fanout_log::debug!("strand stopped");
        })?;

        Ok(Self { sender, handle })
    }

    /// Returns the sender of this strand's queue.
    pub fn sender(&self) -> &StrandSender {
        &self.sender
    }

    /// Enqueues a job without blocking.
    pub fn enqueue(&self, job: Job) -> Result<(), StrandClosed> {
        self.sender.enqueue(job)
    }

    /// Enqueues the stop sentinel without waiting for the worker.
    pub fn stop(&self) {
        self.sender.stop();
    }

    /// Returns `true` if the worker thread has terminated.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Returns the identifier of the worker thread.
    pub fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    /// Waits for the worker thread to terminate.
    ///
    /// Returns the panic payload if a job panicked on the strand. When called from the strand's
    /// own worker thread, this returns immediately and the worker terminates after its current
    /// job, provided the sentinel was enqueued.
    pub fn join(self) -> thread::Result<()> {
        if self.thread_id() == thread::current().id() {
            return Ok(());
        }

        self.handle.join()
    }

    /// Enqueues the stop sentinel and waits for the worker thread to terminate.
    ///
    /// Every job enqueued before this call still runs.
    pub fn shutdown(self) -> thread::Result<()> {
        self.stop();
        self.join()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const MAX_WAIT: Duration = Duration::from_micros(200);
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn push(strand: &Strand, log: &flume::Sender<usize>, value: usize) {
        let log = log.clone();
        strand
            .enqueue(Box::new(move || log.send(value).unwrap()))
            .unwrap();
    }

    #[test]
    fn test_channel_try_dequeue_empty() {
        let (_tx, rx) = channel();
        assert!(rx.try_dequeue().is_none());
    }

    #[test]
    fn test_channel_disconnected_yields_stop() {
        let (tx, rx) = channel();
        drop(tx);
        assert!(matches!(rx.try_dequeue(), Some(Message::Stop)));
        assert!(matches!(rx.blocking_dequeue(), Message::Stop));
    }

    #[test]
    fn test_channel_preserves_order() {
        let (tx, rx) = channel();
        tx.enqueue(Box::new(|| ())).unwrap();
        tx.stop();
        assert_eq!(tx.len(), 2);

        assert!(matches!(rx.try_dequeue(), Some(Message::Invoke(_))));
        assert!(matches!(rx.try_dequeue(), Some(Message::Stop)));
        assert!(tx.is_empty());
    }

    #[test]
    fn test_strand_runs_jobs_in_order() {
        let strand = Strand::spawn("test-strand".to_owned(), MAX_WAIT).unwrap();
        let (log_tx, log_rx) = flume::unbounded();

        for value in 0..100 {
            push(&strand, &log_tx, value);
        }
        strand.shutdown().unwrap();

        let values: Vec<_> = log_rx.try_iter().collect();
        assert_eq!(values, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_strand_runs_on_named_thread() {
        let strand = Strand::spawn("named-strand".to_owned(), MAX_WAIT).unwrap();
        let (name_tx, name_rx) = flume::bounded(1);

        strand
            .enqueue(Box::new(move || {
                let name = thread::current().name().map(str::to_owned);
                name_tx.send(name).unwrap();
            }))
            .unwrap();

        let name = name_rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(name.as_deref(), Some("named-strand"));
        assert_ne!(strand.thread_id(), thread::current().id());
        strand.shutdown().unwrap();
    }

    #[test]
    fn test_strand_wakes_from_blocking_wait() {
        // With a zero ceiling, the worker is parked in a blocking receive almost immediately.
        let strand = Strand::spawn("blocking-strand".to_owned(), Duration::ZERO).unwrap();
        let (log_tx, log_rx) = flume::unbounded();

        thread::sleep(Duration::from_millis(20));
        push(&strand, &log_tx, 1);
        assert_eq!(log_rx.recv_timeout(TIMEOUT).unwrap(), 1);

        thread::sleep(Duration::from_millis(20));
        push(&strand, &log_tx, 2);
        assert_eq!(log_rx.recv_timeout(TIMEOUT).unwrap(), 2);

        strand.shutdown().unwrap();
    }

    #[test]
    fn test_strand_ignores_jobs_after_stop() {
        let strand = Strand::spawn("stopped-strand".to_owned(), MAX_WAIT).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let sender = strand.sender().clone();

        let (gate_tx, gate_rx) = flume::bounded::<()>(0);
        // Hold the worker, so that the sentinel and the late job are queued together.
        strand
            .enqueue(Box::new(move || gate_rx.recv().unwrap()))
            .unwrap();
        strand.stop();
        {
            let counter = counter.clone();
            sender
                .enqueue(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        gate_tx.send(()).unwrap();
        strand.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(sender.enqueue(Box::new(|| ())).is_err());
    }

    #[test]
    fn test_strand_reports_panic_on_join() {
        let strand = Strand::spawn("panicking-strand".to_owned(), MAX_WAIT).unwrap();
        strand
            .enqueue(Box::new(|| panic!("slot failed")))
            .unwrap();

        assert!(strand.shutdown().is_err());
    }

    #[test]
    fn test_strand_shutdown_from_own_thread() {
        let strand = Arc::new(parking_lot::Mutex::new(None));
        let spawned = Strand::spawn("self-stopping-strand".to_owned(), MAX_WAIT).unwrap();
        let sender = spawned.sender().clone();
        *strand.lock() = Some(spawned);

        let (done_tx, done_rx) = flume::bounded(1);
        {
            let strand = strand.clone();
            sender
                .enqueue(Box::new(move || {
                    let own = strand.lock().take().unwrap();
                    done_tx.send(own.shutdown().is_ok()).unwrap();
                }))
                .unwrap();
        }

        assert!(done_rx.recv_timeout(TIMEOUT).unwrap());

        // The worker terminates right after the job that shut it down.
        let deadline = std::time::Instant::now() + TIMEOUT;
        while sender.enqueue(Box::new(|| ())).is_ok() {
            assert!(std::time::Instant::now() < deadline, "strand did not stop");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_worker_state_transitions() {
        let (tx, rx) = channel();
        let mut worker = Worker {
            rx,
            backoff: Backoff::with_min(Duration::from_nanos(1), Duration::from_nanos(2)),
        };

        let state = worker.step(State::Draining);
        assert_eq!(state, State::Sleeping(Duration::from_nanos(1)));
        let state = worker.step(state);
        assert_eq!(state, State::Draining);
        let state = worker.step(state);
        assert_eq!(state, State::Sleeping(Duration::from_nanos(2)));
        let state = worker.step(state);
        assert_eq!(state, State::BlockedWait);

        tx.enqueue(Box::new(|| ())).unwrap();
        let state = worker.step(state);
        assert_eq!(state, State::Draining);
        assert_eq!(worker.backoff.current(), Duration::from_nanos(1));

        tx.stop();
        assert_eq!(worker.step(state), State::Terminated);
    }
}
