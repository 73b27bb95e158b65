use std::any::Any;
use std::io;
use std::sync::Arc;

use crate::pool::{CustomSpawn, DefaultSpawn, Thread, ThreadSpawn, WorkerPool};

/// Type alias for a thread safe closure that is used for panic handling across the code.
pub(crate) type PanicHandler = dyn Fn(Box<dyn Any + Send>) + Send + Sync;

/// [`WorkerPoolBuilder`] provides a flexible way to configure and build a [`WorkerPool`] for
/// executing jobs on a fixed set of dedicated threads.
///
/// This builder enables you to customize the number of threads, thread naming, and panic handling
/// strategies.
pub struct WorkerPoolBuilder<S = DefaultSpawn> {
    pub(crate) thread_name: Option<Box<dyn FnMut(usize) -> String>>,
    pub(crate) thread_panic_handler: Option<Arc<PanicHandler>>,
    pub(crate) task_panic_handler: Option<Arc<PanicHandler>>,
    pub(crate) spawn_handler: S,
    pub(crate) num_threads: usize,
}

impl WorkerPoolBuilder<DefaultSpawn> {
    /// Initializes a new [`WorkerPoolBuilder`] with default settings.
    ///
    /// The default pool runs a single unnamed thread and propagates panics.
    pub fn new() -> WorkerPoolBuilder<DefaultSpawn> {
        WorkerPoolBuilder {
            thread_name: None,
            thread_panic_handler: None,
            task_panic_handler: None,
            spawn_handler: DefaultSpawn,
            num_threads: 1,
        }
    }
}

impl Default for WorkerPoolBuilder<DefaultSpawn> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> WorkerPoolBuilder<S>
where
    S: ThreadSpawn,
{
    /// Specifies a custom naming convention for threads in the [`WorkerPool`].
    ///
    /// The provided closure receives the thread's index and returns a name,
    /// which can be useful for debugging and logging.
    pub fn thread_name<F>(mut self, thread_name: F) -> Self
    where
        F: FnMut(usize) -> String + 'static,
    {
        self.thread_name = Some(Box::new(thread_name));
        self
    }

    /// Sets a custom panic handler for threads in the [`WorkerPool`].
    ///
    /// If a thread panics, the provided handler will be invoked so that you can perform
    /// custom error handling or cleanup. The thread exits afterwards.
    pub fn thread_panic_handler<F>(mut self, panic_handler: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.thread_panic_handler = Some(Arc::new(panic_handler));
        self
    }

    /// Sets a custom panic handler for jobs executed by the [`WorkerPool`].
    ///
    /// When set, a panicking job is reported to the handler and the worker thread keeps running.
    /// Without a handler, the panic unwinds the worker thread.
    pub fn task_panic_handler<F>(mut self, panic_handler: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.task_panic_handler = Some(Arc::new(panic_handler));
        self
    }

    /// Configures a custom thread spawning procedure for the [`WorkerPool`].
    ///
    /// This method allows you to adjust thread settings (e.g. stack size) before thread creation,
    /// making it possible to apply application-specific configurations.
    pub fn spawn_handler<F>(self, spawn_handler: F) -> WorkerPoolBuilder<CustomSpawn<F>>
    where
        F: FnMut(Thread) -> io::Result<()>,
    {
        WorkerPoolBuilder {
            thread_name: self.thread_name,
            thread_panic_handler: self.thread_panic_handler,
            task_panic_handler: self.task_panic_handler,
            spawn_handler: CustomSpawn::new(spawn_handler),
            num_threads: self.num_threads,
        }
    }

    /// Sets the number of worker threads for the [`WorkerPool`].
    ///
    /// The pool never grows or shrinks after it has been built.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Constructs a [`WorkerPool`] based on the configured settings.
    ///
    /// Fails if `num_threads` is zero or if one of the threads cannot be spawned. Threads that
    /// were already spawned exit once the partially built pool is dropped.
    pub fn build<F>(self) -> io::Result<WorkerPool<F>>
    where
        F: FnOnce() + Send + 'static,
    {
        WorkerPool::new(self)
    }
}
