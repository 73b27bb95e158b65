use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::Job;
use crate::builder::{PanicHandler, WorkerPoolBuilder};

/// Error returned by [`WorkerPool::spawn`] when no worker thread is left to run the job.
///
/// This only happens after every worker thread has exited, for instance because jobs panicked
/// without a task panic handler installed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("worker pool has no running threads")]
pub struct PoolClosed;

/// A fixed-size pool of threads executing jobs from a shared queue.
///
/// [`WorkerPool`] hands every job to whichever thread picks it up first. There is no ordering
/// guarantee between jobs. The queue is unbounded, so [`spawn`](Self::spawn) never blocks.
///
/// Dropping the pool does not wait for queued jobs. The threads drain the remaining queue and
/// exit once the last handle is gone.
pub struct WorkerPool<F = Job> {
    tx: flume::Sender<F>,
}

impl<F> WorkerPool<F>
where
    F: FnOnce() + Send + 'static,
{
    /// Constructs a new [`WorkerPool`] using the configuration specified by [`WorkerPoolBuilder`].
    pub fn new<S>(mut builder: WorkerPoolBuilder<S>) -> io::Result<Self>
    where
        S: ThreadSpawn,
    {
        if builder.num_threads == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "worker pool requires at least one thread",
            ));
        }

        let (tx, rx) = flume::unbounded();

        for index in 0..builder.num_threads {
            let rx = rx.clone();
            let task_panic_handler = builder.task_panic_handler.clone();

            let thread = Thread {
                index,
                name: builder.thread_name.as_mut().map(|f| f(index)),
                panic_handler: builder.thread_panic_handler.clone(),
                task: Box::new(move || work(rx, task_panic_handler)),
            };

            builder.spawn_handler.spawn(thread)?;
        }

        Ok(Self { tx })
    }
}

impl<F> WorkerPool<F> {
    /// Schedules a job for execution within the pool.
    ///
    /// The job is queued and executed by the next idle thread.
    pub fn spawn(&self, job: F) -> Result<(), PoolClosed> {
        self.tx.send(job).map_err(|_| PoolClosed)
    }

    /// Returns the number of jobs waiting for an idle thread.
    pub fn queue_len(&self) -> usize {
        self.tx.len()
    }
}

impl<F> fmt::Debug for WorkerPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("queue_len", &self.tx.len())
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

/// Runs jobs until every sender is dropped and the queue is drained.
///
/// For any job that panics, the `panic_handler` callback will be called.
fn work<F>(rx: flume::Receiver<F>, panic_handler: Option<Arc<PanicHandler>>)
where
    F: FnOnce(),
{
    while let Ok(job) = rx.recv() {
        let result = panic::catch_unwind(AssertUnwindSafe(job));

        match (panic_handler.as_ref(), result) {
            // Panic handler and error, we swallow the panic and invoke the callback.
            (Some(panic_handler), Err(error)) => {
                panic_handler(error);
            }
            // No panic handler and error, we propagate the panic.
            (None, Err(error)) => {
                panic::resume_unwind(error);
            }
            // Otherwise, we do nothing.
            (_, Ok(())) => {}
        }
    }
}

/// Represents a dedicated thread running jobs within a [`WorkerPool`].
pub struct Thread {
    index: usize,
    name: Option<String>,
    panic_handler: Option<Arc<PanicHandler>>,
    task: Job,
}

impl Thread {
    /// Returns the identifier assigned to this thread.
    ///
    /// The identifier is useful for debugging or tracing job execution across threads.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the name of this thread, if one was provided.
    ///
    /// Thread names can aid in logging and debugging by providing a human-readable identifier.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Thread {
    /// Runs the worker loop associated with this thread.
    ///
    /// If there is a panic during execution, the `panic_handler` will be called.
    pub fn run(self) {
        let result = panic::catch_unwind(AssertUnwindSafe(self.task));

        match (self.panic_handler, result) {
            // Panic handler and error, we swallow the panic and invoke the callback.
            (Some(panic_handler), Err(error)) => {
                panic_handler(error);
            }
            // No panic handler and error, we propagate the panic.
            (None, Err(error)) => {
                panic::resume_unwind(error);
            }
            // Otherwise, we do nothing.
            (_, Ok(())) => {}
        }
    }
}

/// A trait for customizing the spawning of threads in a [`WorkerPool`].
///
/// Implement [`ThreadSpawn`] to modify thread settings, such as the stack size, prior to
/// creation.
pub trait ThreadSpawn {
    /// Spawns a new thread using the provided configuration.
    fn spawn(&mut self, thread: Thread) -> io::Result<()>;
}

/// A default implementation of [`ThreadSpawn`] that uses system defaults.
///
/// [`DefaultSpawn`] names the thread if a name was configured and detaches it.
#[derive(Clone)]
pub struct DefaultSpawn;

impl ThreadSpawn for DefaultSpawn {
    fn spawn(&mut self, thread: Thread) -> io::Result<()> {
        let mut b = std::thread::Builder::new();
        if let Some(name) = thread.name() {
            b = b.name(name.to_owned());
        }
        b.spawn(|| thread.run())?;

        Ok(())
    }
}

/// A flexible [`ThreadSpawn`] implementation that uses a closure for dynamic thread configuration.
#[derive(Clone)]
pub struct CustomSpawn<B>(B);

impl<B> CustomSpawn<B> {
    /// Creates a new instance of [`CustomSpawn`] with the provided configuration closure.
    pub fn new(spawn_handler: B) -> Self {
        CustomSpawn(spawn_handler)
    }
}

impl<B> ThreadSpawn for CustomSpawn<B>
where
    B: FnMut(Thread) -> io::Result<()>,
{
    /// Applies the custom configuration closure when spawning a new thread.
    fn spawn(&mut self, thread: Thread) -> io::Result<()> {
        self.0(thread)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex};
    use std::time::{Duration, Instant};

    use crate::Job;
    use crate::builder::WorkerPoolBuilder;
    use crate::pool::{PoolClosed, Thread, WorkerPool};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_worker_pool_executes_all_jobs() {
        let pool: WorkerPool<Job> = WorkerPoolBuilder::new().num_threads(2).build().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = flume::unbounded();

        for _ in 0..20 {
            let counter = counter.clone();
            let done_tx = done_tx.clone();
            pool.spawn(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                done_tx.send(()).unwrap();
            }))
            .unwrap();
        }

        for _ in 0..20 {
            done_rx.recv_timeout(TIMEOUT).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_worker_pool_executes_jobs_concurrently_with_multiple_threads() {
        let pool: WorkerPool<Job> = WorkerPoolBuilder::new().num_threads(2).build().unwrap();

        // Both jobs only return once the other one has started as well.
        let barrier = Arc::new(Barrier::new(2));
        let (done_tx, done_rx) = flume::unbounded();

        let start = Instant::now();
        for _ in 0..2 {
            let barrier = barrier.clone();
            let done_tx = done_tx.clone();
            pool.spawn(Box::new(move || {
                barrier.wait();
                done_tx.send(()).unwrap();
            }))
            .unwrap();
        }

        for _ in 0..2 {
            done_rx.recv_timeout(TIMEOUT).unwrap();
        }
        assert!(start.elapsed() < TIMEOUT);
    }

    #[test]
    fn test_worker_pool_uses_thread_names() {
        let pool: WorkerPool<Job> = WorkerPoolBuilder::new()
            .num_threads(3)
            .thread_name(|index| format!("test-pool-{index}"))
            .build()
            .unwrap();

        let names = Arc::new(Mutex::new(HashSet::new()));
        let barrier = Arc::new(Barrier::new(3));
        let (done_tx, done_rx) = flume::unbounded();

        for _ in 0..3 {
            let names = names.clone();
            let barrier = barrier.clone();
            let done_tx = done_tx.clone();
            pool.spawn(Box::new(move || {
                let name = std::thread::current().name().map(str::to_owned);
                names.lock().unwrap().insert(name);
                // Keep every thread busy, so that each job lands on its own thread.
                barrier.wait();
                done_tx.send(()).unwrap();
            }))
            .unwrap();
        }

        for _ in 0..3 {
            done_rx.recv_timeout(TIMEOUT).unwrap();
        }

        let names = names.lock().unwrap();
        for index in 0..3 {
            assert!(names.contains(&Some(format!("test-pool-{index}"))));
        }
    }

    #[test]
    fn test_worker_pool_rejects_zero_threads() {
        let result = WorkerPoolBuilder::new().num_threads(0).build::<Job>();
        assert!(result.is_err());
    }

    #[test]
    fn test_task_panic_handler_keeps_thread_alive() {
        let panics = Arc::new(AtomicUsize::new(0));
        let panics_clone = panics.clone();

        let pool: WorkerPool<Job> = WorkerPoolBuilder::new()
            .num_threads(1)
            .task_panic_handler(move |_| {
                panics_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        pool.spawn(Box::new(|| panic!("job panicked"))).unwrap();

        let (done_tx, done_rx) = flume::bounded(1);
        pool.spawn(Box::new(move || done_tx.send(()).unwrap()))
            .unwrap();

        done_rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(panics.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_fails_after_all_threads_exited() {
        let (exited_tx, exited_rx) = flume::bounded(1);
        let pool: WorkerPool<Job> = WorkerPoolBuilder::new()
            .num_threads(1)
            .thread_panic_handler(move |_| {
                exited_tx.send(()).unwrap();
            })
            .build()
            .unwrap();

        // Without a task panic handler the panic unwinds the only worker thread.
        pool.spawn(Box::new(|| panic!("job panicked"))).unwrap();
        exited_rx.recv_timeout(TIMEOUT).unwrap();

        // The receiver is dropped right after the thread panic handler returned.
        let deadline = Instant::now() + TIMEOUT;
        loop {
            match pool.spawn(Box::new(|| ())) {
                Err(PoolClosed) => break,
                Ok(()) => assert!(Instant::now() < deadline, "pool did not close"),
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_custom_spawn_handler() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let spawned_clone = spawned.clone();

        let pool: WorkerPool<Job> = WorkerPoolBuilder::new()
            .num_threads(2)
            .spawn_handler(move |thread: Thread| {
                spawned_clone.fetch_add(1, Ordering::SeqCst);
                std::thread::Builder::new()
                    .stack_size(256 * 1024)
                    .spawn(|| thread.run())?;
                Ok(())
            })
            .build()
            .unwrap();

        let (done_tx, done_rx) = flume::bounded(1);
        pool.spawn(Box::new(move || done_tx.send(()).unwrap()))
            .unwrap();

        done_rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(spawned.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_thread_panic_handling() {
        let has_panicked = Arc::new(AtomicBool::new(false));
        let has_panicked_clone = has_panicked.clone();
        let panic_handler = move |_| {
            has_panicked_clone.store(true, Ordering::SeqCst);
        };

        Thread {
            index: 0,
            name: Some("test-thread".to_owned()),
            panic_handler: Some(Arc::new(panic_handler)),
            task: Box::new(|| panic!("panicked")),
        }
        .run();

        assert!(has_panicked.load(Ordering::SeqCst));
    }
}
