use std::any::Any;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};

use crate::Job;
use crate::builder::WorkerPoolBuilder;
use crate::pool::{PoolClosed, Thread, WorkerPool};

/// Default number of threads of a shared pool.
const DEFAULT_NUM_THREADS: usize = 8;

/// Default backoff ceiling of strand workers, in microseconds.
const DEFAULT_MAX_WAIT_MICROS: u64 = 1000;

/// The pool used by signals that were not given an explicit one.
static GLOBAL: Lazy<SharedPool> = Lazy::new(|| SharedPool::new(PoolConfig::default()));

/// Configuration of a [`SharedPool`].
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// The fixed number of worker threads started with the pool.
    pub num_threads: usize,

    /// Prefix of the worker thread names, followed by the thread index.
    pub thread_name: String,

    /// Ceiling of the idle backoff of strand workers, in microseconds.
    ///
    /// A strand that stays idle for longer switches from polling to a blocking receive.
    pub max_wait_micros: u64,

    /// Stack size of the worker threads in bytes.
    ///
    /// Defaults to the platform's default stack size for spawned threads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,
}

impl PoolConfig {
    /// Returns the backoff ceiling as a [`Duration`].
    pub fn max_wait(&self) -> Duration {
        Duration::from_micros(self.max_wait_micros)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: DEFAULT_NUM_THREADS,
            thread_name: "fanout-pool".to_owned(),
            max_wait_micros: DEFAULT_MAX_WAIT_MICROS,
            stack_size: None,
        }
    }
}

/// Error returned by [`SharedPool::run`].
#[derive(Debug, thiserror::Error)]
pub enum SharedPoolError {
    /// The worker threads could not be started.
    #[error("failed to start the worker pool")]
    Startup(#[from] io::Error),

    /// Every worker thread has exited.
    #[error(transparent)]
    Closed(#[from] PoolClosed),
}

struct Inner {
    config: PoolConfig,
    pool: OnceCell<WorkerPool<Job>>,
}

/// A handle to a lazily started [`WorkerPool`].
///
/// Cloning the handle shares the pool. The threads are started by the first call to
/// [`startup`](Self::startup) or [`run`](Self::run), no matter from which clone, and exit once
/// every clone has been dropped and the queue is drained.
///
/// [`SharedPool::global`] returns the handle used by default, so that all signals share one set
/// of threads unless configured otherwise.
#[derive(Clone)]
pub struct SharedPool {
    inner: Arc<Inner>,
}

impl SharedPool {
    /// Creates a new pool handle. No threads are started until the pool is first used.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                pool: OnceCell::new(),
            }),
        }
    }

    /// Returns the process-wide default pool.
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// Returns the configuration of this pool.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns the backoff ceiling shared with strand workers.
    pub fn max_wait(&self) -> Duration {
        self.inner.config.max_wait()
    }

    /// Returns `true` once the worker threads have been started.
    pub fn is_started(&self) -> bool {
        self.inner.pool.get().is_some()
    }

    /// Returns `true` if both handles share the same pool.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Starts the worker threads unless they are running already.
    ///
    /// Concurrent calls start the threads exactly once. A failed startup is retried by the next
    /// call.
    pub fn startup(&self) -> io::Result<()> {
        self.pool().map(|_| ())
    }

    /// Hands a job to the next idle worker thread, starting the pool if necessary.
    pub fn run<F>(&self, job: F) -> Result<(), SharedPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool()?.spawn(Box::new(job))?;
        Ok(())
    }

    fn pool(&self) -> io::Result<&WorkerPool<Job>> {
        self.inner.pool.get_or_try_init(|| {
            let config = &self.inner.config;
            let prefix = config.thread_name.clone();

            let builder = WorkerPoolBuilder::new()
                .num_threads(config.num_threads)
                .thread_name(move |index| format!("{prefix}-{index}"))
                .thread_panic_handler(|payload| {
                    fanout_log::error!(
                        panic = panic_message(&*payload),
                        "worker thread terminated by a panic"
                    );
                })
                .task_panic_handler(|payload| {
                    fanout_log::error!(panic = panic_message(&*payload), "pooled job panicked");
                });

            let pool = match config.stack_size {
                Some(stack_size) => builder
                    .spawn_handler(move |thread: Thread| spawn_sized(thread, stack_size))
                    .build()?,
                None => builder.build()?,
            };

            fanout_log::debug!(threads = config.num_threads, "worker pool started");
            Ok(pool)
        })
    }
}

impl fmt::Debug for SharedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPool")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool.get())
            .finish()
    }
}

/// Spawns a pool thread with a custom stack size.
fn spawn_sized(thread: Thread, stack_size: usize) -> io::Result<()> {
    let mut builder = std::thread::Builder::new().stack_size(stack_size);
    if let Some(name) = thread.name() {
        builder = builder.name(name.to_owned());
    }
    builder.spawn(move || thread.run())?;

    Ok(())
}

/// Extracts the message of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<unknown panic payload>"
    }
}
