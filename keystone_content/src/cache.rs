use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
};

use keystone_shared::{
    log::{debug, info, trace, warn},
    parking_lot::Mutex,
};

use crate::{
    fallback,
    registry::Registry,
    work_order::{AssetWorkOrder, WorkOrder},
    worker_pool::{BoxedWorkOrder, WorkerPool},
    Asset, AssetCacheConfig, AssetKey, AssetType, Error, ErrorReporter, LoadMode, LogReporter, MemoryStorage, Result, Storage,
};

#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicUsize);

impl Counter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub orders_submitted: Counter,
    pub prepared: Counter,
    pub committed: Counter,
    pub failed: Counter,
    pub substituted: Counter,
    pub cancelled: Counter,
}

/// Snapshot of the counters of an [`AssetCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Number of work orders that were created. There is one per loaded asset.
    pub orders_submitted: usize,
    /// Number of prepare phases that ran on worker threads or inline.
    pub prepared: usize,
    /// Number of assets that were finalized with their own resource.
    pub committed: usize,
    /// Number of assets whose prepare or commit failed.
    pub failed: usize,
    /// Number of assets that were finalized with the fallback.
    pub substituted: usize,
    pub cancelled: usize,
    /// Number of work orders that are queued or in flight.
    pub pending: usize,
    /// Number of assets in the registry.
    pub registered: usize,
}

/// State that the cache shares with its worker threads.
pub(crate) struct Shared {
    pub registry: Registry,
    pub storage: Arc<dyn Storage>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub statistics: Counters,
    pending_orders: AtomicUsize,
    changed: AtomicBool,
}

impl Shared {
    pub fn new(storage: Arc<dyn Storage>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            registry: Registry::new(),
            storage,
            reporter,
            statistics: Counters::default(),
            pending_orders: AtomicUsize::new(0),
            changed: AtomicBool::new(false),
        }
    }

    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }
}

/// Loads assets once per key and hands out shared handles to them.
///
/// The cache can be shared between threads. Requests can be made from every thread but the
/// commit phase only runs on the thread that owns the exclusive context `C` and calls
/// [`AssetCache::tick`].
///
/// # Example
///
/// ```
/// use keystone_content::{kinds::{ConfigAsset, SoftwareContext}, AssetCache, MemoryStorage};
///
/// let storage = MemoryStorage::new().with("settings.cfg", "\"SPEED\" \"2.5\"");
/// let cache = AssetCache::<SoftwareContext>::builder().with_storage(storage).build().unwrap();
/// let mut context = SoftwareContext::new();
///
/// let settings = cache.request::<ConfigAsset>("settings.cfg", Default::default());
/// while !settings.is_ready() {
///     cache.tick(&mut context);
/// }
/// assert_eq!(settings.payload().unwrap().get("SPEED"), Some(2.5));
/// ```
pub struct AssetCache<C: 'static> {
    shared: Arc<Shared>,
    pool: WorkerPool<C>,
    config: AssetCacheConfig,
    /// Thread that passed the context first.
    owner: Mutex<Option<ThreadId>>,
}

impl<C: 'static> AssetCache<C> {
    pub fn builder() -> AssetCacheBuilder<C> {
        AssetCacheBuilder::new()
    }

    /// Returns the asset for the key and starts loading it on the worker threads when it
    /// was not requested before. Never blocks on the load.
    ///
    /// The `params` of the first request of a key are used. Later requests get the same asset.
    pub fn request<T>(&self, key: impl Into<AssetKey>, params: T::Params) -> Asset<T>
    where
        T: AssetType<Context = C>,
    {
        let key = key.into();
        let (asset, is_new) = self.shared.registry.lookup_or_reserve::<T>(&key);
        if is_new {
            debug!("Loading {} asset {key}", T::TYPE_TAG);
            self.submit(Box::new(AssetWorkOrder::new(asset.clone(), params)));
        }
        asset
    }

    /// Like [`AssetCache::request`] but loads the asset on the calling thread and returns when
    /// the asset is finalized. When the asset is already being loaded on the worker threads,
    /// the commit queue is pumped until it's done.
    pub fn request_inline<T>(&self, key: impl Into<AssetKey>, params: T::Params, context: &mut C) -> Asset<T>
    where
        T: AssetType<Context = C>,
    {
        let key = key.into();
        let (asset, is_new) = self.shared.registry.lookup_or_reserve::<T>(&key);
        if is_new {
            self.claim_context();
            debug!("Loading {} asset {key} inline", T::TYPE_TAG);
            self.shared.statistics.orders_submitted.increment();
            self.shared.pending_orders.fetch_add(1, Ordering::SeqCst);
            let mut order = Box::new(AssetWorkOrder::new(asset.clone(), params));
            order.prepare(self.shared.storage.as_ref());
            self.shared.statistics.prepared.increment();
            self.commit_order(order, context);
        } else if !asset.is_terminal() {
            self.claim_context();
            self.wait_for(&asset, context);
        }
        asset
    }

    /// Requests the asset in the given mode.
    pub fn request_with<T>(&self, key: impl Into<AssetKey>, params: T::Params, mode: LoadMode, context: &mut C) -> Asset<T>
    where
        T: AssetType<Context = C>,
    {
        match mode {
            LoadMode::Threaded => self.request(key, params),
            LoadMode::Inline => self.request_inline(key, params, context),
        }
    }

    /// Requests the asset in the [`AssetCacheConfig::default_mode`].
    pub fn load<T>(&self, key: impl Into<AssetKey>, params: T::Params, context: &mut C) -> Asset<T>
    where
        T: AssetType<Context = C>,
    {
        self.request_with(key, params, self.config.default_mode, context)
    }

    /// Runs the commit phase of the prepared work orders. Returns the number of processed work
    /// orders.
    ///
    /// Must be called regularly, always by the same thread and with the same context. The first
    /// thread that passes a context becomes its owner. Debug builds panic when another thread
    /// pumps the cache afterwards.
    pub fn tick(&self, context: &mut C) -> usize {
        self.claim_context();
        let limit = self.config.commit_batch_limit.unwrap_or(usize::MAX);
        let mut processed = 0;
        while processed < limit {
            let Some(order) = self.pool.try_pop_committable() else {
                break;
            };
            self.commit_order(order, context);
            processed += 1;
        }
        if processed > 0 {
            trace!("Processed {processed} work order(s)");
        }
        processed
    }

    /// Returns the asset of the key when it was requested before.
    pub fn get<T>(&self, key: impl Into<AssetKey>) -> Option<Asset<T>>
    where
        T: AssetType<Context = C>,
    {
        self.shared.registry.get::<T>(&key.into())
    }

    /// Returns `true` when no work order is pending and every asset reached its final state.
    pub fn ready_to_use(&self) -> bool {
        self.shared.pending_orders.load(Ordering::SeqCst) == 0 && self.shared.registry.all_terminal()
    }

    /// Returns whether an asset was finalized since the last call.
    pub fn has_changed(&self) -> bool {
        self.shared.changed.swap(false, Ordering::SeqCst)
    }

    /// Cancels the load of an asset that hasn't been committed yet. Returns `false` when the
    /// asset is unknown, already finalized or already cancelled.
    ///
    /// A cancelled asset is not committed, its observers are dropped and the next request of the
    /// key loads it again. The prepare phase isn't interrupted.
    pub fn cancel<T>(&self, key: impl Into<AssetKey>) -> bool
    where
        T: AssetType<Context = C>,
    {
        let key = key.into();
        let Some(asset) = self.shared.registry.get::<T>(&key) else {
            return false;
        };
        let cancelled = asset.request_cancel();
        if cancelled {
            debug!("Requested cancellation of {} asset {key}", T::TYPE_TAG);
        }
        cancelled
    }

    /// Removes the asset from the registry so that the next request loads it again. Handles
    /// that are still around keep their data.
    pub fn invalidate<T>(&self, key: impl Into<AssetKey>) -> bool
    where
        T: AssetType<Context = C>,
    {
        let key = key.into();
        let removed = self.shared.registry.remove::<T>(&key).is_some();
        if removed {
            debug!("Invalidated {} asset {key}", T::TYPE_TAG);
        }
        removed
    }

    /// Removes the finalized assets that are only referenced by the cache. Returns the number
    /// of removed assets.
    pub fn purge_unused(&self) -> usize {
        let purged = self.shared.registry.purge_unused();
        if purged > 0 {
            debug!("Purged {purged} unused asset(s)");
        }
        purged
    }

    /// Constructs the fallback of `T` now instead of on the first failure.
    ///
    /// Unlike the construction in [`AssetCache::tick`], which panics, a failure of the
    /// hardcoded fallback is returned as an error.
    pub fn warm_fallback<T>(&self, context: &mut C) -> Result<Asset<T>>
    where
        T: AssetType<Context = C>,
    {
        if let Some(fallback) = self.shared.registry.fallback::<T>() {
            return Ok(fallback);
        }
        self.claim_context();
        let fallback = fallback::construct::<T>(&self.shared, context)?;
        Ok(self.shared.registry.insert_fallback(fallback))
    }

    /// Returns the fallback of `T` when it was constructed already.
    pub fn fallback<T>(&self) -> Option<Asset<T>>
    where
        T: AssetType<Context = C>,
    {
        self.shared.registry.fallback::<T>()
    }

    pub fn statistics(&self) -> Statistics {
        let counters = &self.shared.statistics;
        Statistics {
            orders_submitted: counters.orders_submitted.get(),
            prepared: counters.prepared.get(),
            committed: counters.committed.get(),
            failed: counters.failed.get(),
            substituted: counters.substituted.get(),
            cancelled: counters.cancelled.get(),
            pending: self.shared.pending_orders.load(Ordering::SeqCst),
            registered: self.shared.registry.len(),
        }
    }

    pub fn config(&self) -> &AssetCacheConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Stops the worker threads. Assets that weren't prepared yet are substituted by their
    /// fallback on the next [`AssetCache::tick`]. Also happens when the cache is dropped.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn claim_context(&self) {
        let current = thread::current().id();
        let owner = *self.owner.lock().get_or_insert(current);
        debug_assert_eq!(owner, current, "The context of the asset cache must only be used by one thread");
    }

    fn submit(&self, order: BoxedWorkOrder<C>) {
        self.shared.statistics.orders_submitted.increment();
        self.shared.pending_orders.fetch_add(1, Ordering::SeqCst);
        if let Err(mut order) = self.pool.submit(order) {
            warn!("The worker pool is shut down and can't prepare {} asset {}", order.type_tag(), order.key());
            order.fail(Error::Other("the worker pool is shut down".into()));
            self.pool.push_committable(order);
        }
    }

    fn commit_order(&self, order: BoxedWorkOrder<C>, context: &mut C) {
        order.commit(&self.shared, context);
        self.shared.pending_orders.fetch_sub(1, Ordering::SeqCst);
    }

    fn wait_for<T>(&self, asset: &Asset<T>, context: &mut C)
    where
        T: AssetType<Context = C>,
    {
        trace!("Waiting for {} asset {} to be loaded", T::TYPE_TAG, asset.key());
        let poll = self.config.inline_wait_poll();
        while !asset.is_terminal() {
            match self.pool.pop_committable_timeout(poll) {
                Some(order) => self.commit_order(order, context),
                None if self.shared.pending_orders.load(Ordering::SeqCst) == 0 => {
                    warn!("{} asset {} has no pending work order and won't be finalized", T::TYPE_TAG, asset.key());
                    break;
                }
                None => {}
            }
        }
    }
}

pub struct AssetCacheBuilder<C> {
    config: Option<AssetCacheConfig>,
    storage: Option<Arc<dyn Storage>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    _context: PhantomData<fn(&mut C)>,
}

impl<C: 'static> AssetCacheBuilder<C> {
    fn new() -> Self {
        Self {
            config: None,
            storage: None,
            reporter: None,
            _context: PhantomData,
        }
    }

    pub fn with_config(mut self, config: AssetCacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the storage from which the assets are read. Defaults to an empty [`MemoryStorage`].
    pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Sets the receiver of the load failures. Defaults to the [`LogReporter`].
    pub fn with_error_reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    pub fn build(self) -> Result<AssetCache<C>> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        #[cfg(feature = "deadlock_detection")]
        keystone_shared::spawn_deadlock_detection();

        let storage = self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let reporter = self.reporter.unwrap_or_else(|| Arc::new(LogReporter));
        let shared = Arc::new(Shared::new(storage, reporter));
        let pool = WorkerPool::new(config.worker_count(), &shared)?;
        info!("Created AssetCache with {} worker thread(s)", pool.worker_count());
        Ok(AssetCache {
            shared,
            pool,
            config,
            owner: Mutex::new(None),
        })
    }
}
