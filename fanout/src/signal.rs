use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use fanout_log::LogError;
use fanout_threading::{PermitGate, SharedPool, Strand, StrandSender, panic_message};
use parking_lot::{Mutex, RwLock};

use crate::config::{ConfigError, SignalConfig};
use crate::error::SignalError;
use crate::scheme::{DeliveryScheme, SlotId};

/// Name of the detached threads running asynchronous deliveries.
const ASYNC_THREAD_NAME: &str = "fanout-async";

/// A connected callable.
type Slot<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A slot with a dedicated strand, and the queue of that strand.
struct OrderedSlot<T> {
    slot: Slot<T>,
    queue: StrandSender,
}

impl<T> Clone for OrderedSlot<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            queue: self.queue.clone(),
        }
    }
}

/// The slots of a signal, one map per delivery scheme.
///
/// An identifier is contained in at most one of the maps.
struct Slots<T> {
    synchronous: BTreeMap<SlotId, Slot<T>>,
    asynchronous: BTreeMap<SlotId, Slot<T>>,
    ordered: BTreeMap<SlotId, OrderedSlot<T>>,
    pooled: BTreeMap<SlotId, Slot<T>>,
}

impl<T> Slots<T> {
    fn scheme_of(&self, id: SlotId) -> Option<DeliveryScheme> {
        if self.synchronous.contains_key(&id) {
            Some(DeliveryScheme::Synchronous)
        } else if self.asynchronous.contains_key(&id) {
            Some(DeliveryScheme::Asynchronous)
        } else if self.ordered.contains_key(&id) {
            Some(DeliveryScheme::Ordered)
        } else if self.pooled.contains_key(&id) {
            Some(DeliveryScheme::Pooled)
        } else {
            None
        }
    }

    fn count(&self, scheme: DeliveryScheme) -> usize {
        match scheme {
            DeliveryScheme::Synchronous => self.synchronous.len(),
            DeliveryScheme::Asynchronous => self.asynchronous.len(),
            DeliveryScheme::Ordered => self.ordered.len(),
            DeliveryScheme::Pooled => self.pooled.len(),
        }
    }

    fn remove(&mut self, id: SlotId) {
        self.synchronous.remove(&id);
        self.asynchronous.remove(&id);
        self.ordered.remove(&id);
        self.pooled.remove(&id);
    }
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self {
            synchronous: BTreeMap::new(),
            asynchronous: BTreeMap::new(),
            ordered: BTreeMap::new(),
            pooled: BTreeMap::new(),
        }
    }
}

impl<T> Clone for Slots<T> {
    fn clone(&self) -> Self {
        Self {
            synchronous: self.synchronous.clone(),
            asynchronous: self.asynchronous.clone(),
            ordered: self.ordered.clone(),
            pooled: self.pooled.clone(),
        }
    }
}

/// State guarded by the registry lock.
struct Registry<T> {
    /// Copy-on-write, so that emissions can dispatch from a snapshot without holding the lock.
    slots: Arc<Slots<T>>,
    /// The worker of every ordered slot, keyed like [`Slots::ordered`].
    strands: BTreeMap<SlotId, Strand>,
    /// Strands of disconnected slots that have not been joined yet.
    stopping: BTreeMap<SlotId, Arc<Teardown>>,
    next_id: u64,
}

impl<T> Registry<T> {
    fn next_id(&mut self) -> SlotId {
        let id = SlotId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Moves the strand of a slot into teardown and enqueues its sentinel.
    ///
    /// Returns the pending teardown of the slot, including one started by an earlier call.
    fn stop_strand(&mut self, id: SlotId) -> Option<Arc<Teardown>> {
        if let Some(strand) = self.strands.remove(&id) {
            strand.stop();
            let teardown = Arc::new(Teardown::new(id, strand));
            self.stopping.insert(id, Arc::clone(&teardown));
            return Some(teardown);
        }

        self.stopping.get(&id).cloned()
    }
}

/// A stopped strand, shared by every caller that waits for it to terminate.
///
/// The first waiter joins the strand while holding the lock, so later waiters block until the
/// worker thread has terminated.
struct Teardown {
    id: SlotId,
    thread: ThreadId,
    strand: Mutex<Option<Strand>>,
}

impl Teardown {
    fn new(id: SlotId, strand: Strand) -> Self {
        Self {
            id,
            thread: strand.thread_id(),
            strand: Mutex::new(Some(strand)),
        }
    }

    /// Blocks until the worker thread has terminated.
    ///
    /// Returns `false` without waiting when called from the worker thread itself.
    fn wait(&self) -> bool {
        if self.thread == thread::current().id() {
            return false;
        }

        let mut strand = self.strand.lock();
        if let Some(strand) = strand.take() {
            join_strand(self.id, strand);
        }

        true
    }
}

/// Waits for the worker of a disconnected ordered slot to terminate.
fn join_strand(id: SlotId, strand: Strand) {
    match strand.join() {
        Ok(()) => fanout_log::debug!(slot = %id, "strand joined"),
        Err(payload) => fanout_log::error!(
            slot = %id,
            panic = panic_message(&*payload),
            "strand terminated by a panic"
        ),
    }
}

/// A broadcaster notifying every connected slot on each emission.
///
/// Each slot is connected with a [`DeliveryScheme`] that decides on which thread it runs and
/// which ordering guarantees it gets. Slots receive a clone of the emitted value, which is why
/// `T` has to be `Clone`. Values handed to other threads must own their data, so `T` is also
/// `Send + 'static`.
///
/// # Example
///
/// ```
/// use std::sync::mpsc;
///
/// use fanout::{DeliveryScheme, Signal};
///
/// let signal = Signal::new();
/// let (tx, rx) = mpsc::channel();
///
/// signal
///     .connect(DeliveryScheme::Ordered, move |value: u32| tx.send(value).unwrap())
///     .unwrap();
///
/// signal.emit(1);
/// signal.emit(2);
/// signal.emit(3);
///
/// // Joins the strand after it has drained its queue.
/// signal.disconnect_all();
/// assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
/// ```
///
/// # Teardown
///
/// Dropping the signal disconnects all slots and joins their strands. Asynchronous and pooled
/// deliveries that are already running or queued are not awaited and may still execute
/// afterwards.
pub struct Signal<T> {
    config: SignalConfig,
    registry: RwLock<Registry<T>>,
    permits: Arc<PermitGate>,
    pool: SharedPool,
}

impl<T> Signal<T> {
    /// Creates a signal with the default configuration and the global worker pool.
    pub fn new() -> Self {
        Self::from_parts(SignalConfig::default(), SharedPool::global())
    }

    /// Returns a builder to configure a signal.
    pub fn builder() -> SignalBuilder<T> {
        SignalBuilder::new()
    }

    fn from_parts(config: SignalConfig, pool: SharedPool) -> Self {
        Self {
            permits: Arc::new(PermitGate::new(config.max_concurrent_async)),
            config,
            registry: RwLock::new(Registry {
                slots: Arc::new(Slots::default()),
                strands: BTreeMap::new(),
                stopping: BTreeMap::new(),
                next_id: 0,
            }),
            pool,
        }
    }

    /// Returns the configuration of this signal.
    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Returns the worker pool used for pooled deliveries.
    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    /// Returns the total number of connected slots.
    pub fn len(&self) -> usize {
        let registry = self.registry.read();
        DeliveryScheme::ALL
            .iter()
            .map(|scheme| registry.slots.count(*scheme))
            .sum()
    }

    /// Returns `true` if no slot is connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of slots connected with the given scheme.
    pub fn slot_count(&self, scheme: DeliveryScheme) -> usize {
        self.registry.read().slots.count(scheme)
    }

    /// Returns the scheme of a connected slot, or `None` if the slot is not connected.
    pub fn scheme_of(&self, id: SlotId) -> Option<DeliveryScheme> {
        self.registry.read().slots.scheme_of(id)
    }

    /// Disconnects a slot.
    ///
    /// Emissions that start after this call returns never reach the slot. For an ordered slot,
    /// deliveries that were already queued still run, and this call blocks until the slot's
    /// strand has terminated, also when another thread is already disconnecting it. Called from
    /// the slot's own strand, this returns right away and the strand terminates after the
    /// current delivery. Disconnecting an unknown slot does nothing.
    pub fn disconnect(&self, id: SlotId) {
        let teardown = {
            let mut registry = self.registry.write();
            if let Some(scheme) = registry.slots.scheme_of(id) {
                Arc::make_mut(&mut registry.slots).remove(id);
                fanout_log::debug!(slot = %id, %scheme, "slot disconnected");
            }
            registry.stop_strand(id)
        };

        // Joined without the lock, so that queued deliveries can still emit on this signal.
        if teardown.is_some_and(|teardown| teardown.wait()) {
            self.registry.write().stopping.remove(&id);
        }
    }

    /// Disconnects all slots and joins the strands of all ordered slots.
    ///
    /// When this returns, no strand of this signal is running anymore, including strands that
    /// other threads are still disconnecting. The strand this is called from, if any, is the
    /// only exception.
    pub fn disconnect_all(&self) {
        let teardowns: Vec<_> = {
            let mut registry = self.registry.write();
            registry.slots = Arc::new(Slots::default());

            // Stop all strands first, so that they drain their queues concurrently.
            let ids: Vec<_> = registry.strands.keys().copied().collect();
            for id in ids {
                registry.stop_strand(id);
            }
            registry.stopping.values().cloned().collect()
        };

        let joined: Vec<_> = teardowns
            .iter()
            .filter(|teardown| teardown.wait())
            .map(|teardown| teardown.id)
            .collect();

        if !joined.is_empty() {
            let mut registry = self.registry.write();
            for id in joined {
                registry.stopping.remove(&id);
            }
        }
    }
}

impl<T> Signal<T>
where
    T: 'static,
{
    /// Connects a slot with the given delivery scheme and returns its identifier.
    ///
    /// An ordered slot gets its own strand, which is spawned before this returns. The first
    /// pooled slot starts the worker pool if it is not running yet.
    pub fn connect<F>(&self, scheme: DeliveryScheme, slot: F) -> Result<SlotId, SignalError>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let slot: Slot<T> = Arc::new(slot);

        if scheme == DeliveryScheme::Pooled {
            self.pool.startup().map_err(SignalError::StartPool)?;
        }

        let mut registry = self.registry.write();
        let id = registry.next_id();

        match scheme {
            DeliveryScheme::Synchronous => {
                Arc::make_mut(&mut registry.slots)
                    .synchronous
                    .insert(id, slot);
            }
            DeliveryScheme::Asynchronous => {
                Arc::make_mut(&mut registry.slots)
                    .asynchronous
                    .insert(id, slot);
            }
            DeliveryScheme::Ordered => {
                let strand = Strand::spawn(format!("fanout-strand-{id}"), self.pool.max_wait())
                    .map_err(SignalError::SpawnStrand)?;
                let queue = strand.sender().clone();

                Arc::make_mut(&mut registry.slots)
                    .ordered
                    .insert(id, OrderedSlot { slot, queue });
                registry.strands.insert(id, strand);
            }
            DeliveryScheme::Pooled => {
                Arc::make_mut(&mut registry.slots).pooled.insert(id, slot);
            }
        }

        fanout_log::debug!(slot = %id, %scheme, "slot connected");
        Ok(id)
    }

    /// Connects a method of a shared target as a slot.
    ///
    /// The slot only holds a weak reference to the target. Once the target has been dropped,
    /// deliveries to the slot do nothing. To keep the target alive as long as the slot is
    /// connected, move a clone of the [`Arc`] into a closure passed to
    /// [`connect`](Self::connect) instead.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicU64, Ordering};
    ///
    /// use fanout::{DeliveryScheme, Signal};
    ///
    /// #[derive(Default)]
    /// struct Total(AtomicU64);
    ///
    /// impl Total {
    ///     fn add(&self, value: u64) {
    ///         self.0.fetch_add(value, Ordering::SeqCst);
    ///     }
    /// }
    ///
    /// let total = Arc::new(Total::default());
    /// let signal = Signal::new();
    /// signal
    ///     .connect_bound(DeliveryScheme::Synchronous, &total, Total::add)
    ///     .unwrap();
    ///
    /// signal.emit(40);
    /// signal.emit(2);
    /// assert_eq!(total.0.load(Ordering::SeqCst), 42);
    /// ```
    pub fn connect_bound<C, M>(
        &self,
        scheme: DeliveryScheme,
        target: &Arc<C>,
        method: M,
    ) -> Result<SlotId, SignalError>
    where
        C: Send + Sync + 'static,
        M: Fn(&C, T) + Send + Sync + 'static,
    {
        let target: Weak<C> = Arc::downgrade(target);

        self.connect(scheme, move |args| {
            if let Some(target) = target.upgrade() {
                method(&target, args);
            }
        })
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + 'static,
{
    /// Delivers a value to every connected slot.
    ///
    /// Synchronous slots run before this returns, in connection order. Asynchronous slots each
    /// get a detached thread, this blocks while the signal's limit of concurrent asynchronous
    /// deliveries is reached. Ordered slots receive the value on their strand, pooled slots on
    /// the worker pool. Emitting without any slots does nothing.
    ///
    /// A panic in a synchronous slot propagates to the caller and skips the remaining slots.
    pub fn emit(&self, args: T) {
        if self.config.enforce_thread_safety {
            // Recursive, so that nested emissions from synchronous slots cannot deadlock behind
            // a waiting writer.
            let registry = self.registry.read_recursive();
            self.dispatch(&registry.slots, args);
        } else {
            let slots = Arc::clone(&self.registry.read().slots);
            self.dispatch(&slots, args);
        }
    }

    fn dispatch(&self, slots: &Slots<T>, args: T) {
        for slot in slots.synchronous.values() {
            slot(args.clone());
        }

        for (id, slot) in &slots.asynchronous {
            self.run_asynchronous(*id, slot, args.clone());
        }

        for (id, ordered) in &slots.ordered {
            let slot = Arc::clone(&ordered.slot);
            let args = args.clone();
            if ordered.queue.enqueue(Box::new(move || slot(args))).is_err() {
                fanout_log::debug!(slot = %id, "strand terminated, dropping delivery");
            }
        }

        for (id, slot) in &slots.pooled {
            let slot = Arc::clone(slot);
            let args = args.clone();
            if let Err(error) = self.pool.run(move || slot(args)) {
                fanout_log::error!(
                    slot = %id,
                    error = %LogError(&error),
                    "failed to submit pooled delivery"
                );
            }
        }
    }

    fn run_asynchronous(&self, id: SlotId, slot: &Slot<T>, args: T) {
        let permit = self.permits.acquire_owned();
        let slot = Arc::clone(slot);

        let spawned = thread::Builder::new()
            .name(ASYNC_THREAD_NAME.to_owned())
            .spawn(move || {
                // Released when the slot returns or unwinds.
                let _permit = permit;
                slot(args);
            });

        if let Err(error) = spawned {
            fanout_log::error!(
                slot = %id,
                error = %LogError(&error),
                "failed to spawn asynchronous delivery"
            );
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Signal<T> {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read();
        let mut map = f.debug_map();
        for scheme in DeliveryScheme::ALL {
            map.entry(&scheme, &registry.slots.count(scheme));
        }
        map.finish()
    }
}

/// Configures and builds a [`Signal`].
///
/// # Example
///
/// ```
/// use fanout::Signal;
///
/// let signal = Signal::<String>::builder()
///     .enforce_thread_safety(true)
///     .max_concurrent_async(16)
///     .build()
///     .unwrap();
///
/// assert!(signal.config().enforce_thread_safety);
/// ```
pub struct SignalBuilder<T> {
    config: SignalConfig,
    pool: Option<SharedPool>,
    _args: PhantomData<fn(T)>,
}

impl<T> SignalBuilder<T> {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: SignalConfig::default(),
            pool: None,
            _args: PhantomData,
        }
    }

    /// Replaces the entire configuration.
    pub fn config(mut self, config: SignalConfig) -> Self {
        self.config = config;
        self
    }

    /// See [`SignalConfig::enforce_thread_safety`].
    pub fn enforce_thread_safety(mut self, enforce: bool) -> Self {
        self.config.enforce_thread_safety = enforce;
        self
    }

    /// See [`SignalConfig::max_concurrent_async`].
    pub fn max_concurrent_async(mut self, max: usize) -> Self {
        self.config.max_concurrent_async = max;
        self
    }

    /// Uses the given pool for pooled deliveries instead of [`SharedPool::global`].
    pub fn pool(mut self, pool: SharedPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Validates the configuration and creates the signal.
    pub fn build(self) -> Result<Signal<T>, ConfigError> {
        self.config.validate()?;

        let pool = self.pool.unwrap_or_else(SharedPool::global);
        if pool.config().num_threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }

        Ok(Signal::from_parts(self.config, pool))
    }
}

impl<T> Default for SignalBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
