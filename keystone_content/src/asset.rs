use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use keystone_shared::{
    derive_where::derive_where,
    log::{trace, warn},
    parking_lot::Mutex,
};
use serde::{Deserialize, Serialize};

use crate::{AssetKey, Error, Result, Storage};

/// A kind of asset that the [`AssetCache`](crate::AssetCache) can load.
///
/// Loading happens in two phases. [`AssetType::prepare`] runs on a worker thread and turns the stored
/// bytes into the payload (`Self`). [`AssetType::commit`] runs on the thread that owns the exclusive
/// `Context` and creates the resource from the payload.
pub trait AssetType: Sized + Send + Sync + 'static {
    /// Exclusive context in which resources are created, e.g. a graphics device.
    type Context: 'static;

    /// Parameters that influence how the asset is loaded. Only the first request of a key decides them.
    type Params: Clone + Default + Send + Sync + 'static;

    /// Result of the commit phase.
    type Resource: Send + Sync + 'static;

    /// Name of the asset type used in logs and error reports.
    const TYPE_TAG: &'static str;

    /// Produces the payload from the storage. The default implementation reads the bytes
    /// of the key and passes them to [`AssetType::decode`].
    ///
    /// Runs on a worker thread and must not touch the `Context`.
    fn prepare(key: &AssetKey, params: &Self::Params, storage: &dyn Storage) -> Result<Self> {
        if !storage.exists(key.as_path()) {
            return Err(Error::NotFound(key.clone()));
        }
        let bytes = storage.read(key.as_path())?;
        Self::decode(&bytes, params)
    }

    /// Decodes the raw bytes of the asset.
    fn decode(bytes: &[u8], params: &Self::Params) -> Result<Self>;

    /// Creates the resource. Runs on the thread that owns the `Context`.
    fn commit(&self, params: &Self::Params, context: &mut Self::Context) -> Result<Self::Resource>;

    /// Key of the default asset that is substituted when loading an asset of this type fails.
    fn fallback_key() -> AssetKey;

    /// Payload that is used when the default asset can't be loaded either.
    fn hardcoded_fallback() -> Self;
}

/// Lifecycle of an [`Asset`].
///
/// ```text
/// Empty -> Preparing -> PendingCommit -> Finalized
///              |              |
///              +-> Failed <---+  (substituted by the fallback and finalized by the commit pump)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetState {
    Empty,
    Preparing,
    PendingCommit,
    Finalized,
    Failed,
}

/// How a request is served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Prepare on a worker thread and commit when the owner pumps the cache.
    #[default]
    Threaded,
    /// Prepare and commit on the calling thread before returning.
    Inline,
}

/// Identifies an observer of an [`Asset`]. Adding an observer with a token that is already
/// registered replaces the previous callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverToken(u64);

impl ObserverToken {
    /// Creates a token that is unique within the process.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverToken {
    fn default() -> Self {
        Self::new()
    }
}

pub type ObserverFn<T> = dyn FnOnce(&Asset<T>) + Send;

pub(crate) type Observers<T> = Vec<(ObserverToken, Box<ObserverFn<T>>)>;

struct Slot<T: AssetType> {
    state: AssetState,
    payload: Option<Arc<T>>,
    resource: Option<Arc<T::Resource>>,
    failure: Option<Arc<Error>>,
    observers: Observers<T>,
}

struct RawAsset<T: AssetType> {
    key: AssetKey,
    cancelled: AtomicBool,
    slot: Mutex<Slot<T>>,
}

/// Shared handle to an asset in the cache. Cloning the handle is cheap and all clones observe
/// the same state.
#[derive_where(Clone)]
#[derive_where(crate = keystone_shared::derive_where)]
pub struct Asset<T: AssetType> {
    raw: Arc<RawAsset<T>>,
}

impl<T: AssetType> Asset<T> {
    pub(crate) fn new(key: AssetKey) -> Self {
        Self {
            raw: Arc::new(RawAsset {
                key,
                cancelled: AtomicBool::new(false),
                slot: Mutex::new(Slot {
                    state: AssetState::Empty,
                    payload: None,
                    resource: None,
                    failure: None,
                    observers: Vec::new(),
                }),
            }),
        }
    }

    /// Returns the [`AssetKey`] of the asset.
    pub fn key(&self) -> &AssetKey {
        &self.raw.key
    }

    pub fn state(&self) -> AssetState {
        self.raw.slot.lock().state
    }

    /// Returns `true` when the asset is finalized, either with its own data or with the fallback.
    pub fn is_ready(&self) -> bool {
        self.state() == AssetState::Finalized
    }

    /// Returns `true` when the asset won't change its state anymore.
    pub fn is_terminal(&self) -> bool {
        match self.state() {
            AssetState::Finalized => true,
            AssetState::Failed => self.is_cancelled(),
            _ => false,
        }
    }

    /// Returns the payload that was produced by the prepare phase.
    pub fn payload(&self) -> Option<Arc<T>> {
        self.raw.slot.lock().payload.clone()
    }

    /// Returns the resource that was produced by the commit phase.
    pub fn resource(&self) -> Option<Arc<T::Resource>> {
        self.raw.slot.lock().resource.clone()
    }

    /// Returns the error that prevented the asset from being loaded.
    pub fn failure(&self) -> Option<Arc<Error>> {
        self.raw.slot.lock().failure.clone()
    }

    /// Returns `true` when the asset is finalized with the data of the fallback.
    pub fn is_substituted(&self) -> bool {
        let slot = self.raw.slot.lock();
        slot.state == AssetState::Finalized && slot.failure.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.raw.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `true` when both handles refer to the same asset.
    pub fn ptr_eq(&self, other: &Asset<T>) -> bool {
        Arc::ptr_eq(&self.raw, &other.raw)
    }

    /// Registers a callback that runs once the asset is finalized.
    ///
    /// When the asset is already finalized, the callback runs immediately on the calling thread.
    /// Otherwise it runs on the thread that pumps the cache. Callbacks of cancelled assets are
    /// dropped without being called.
    pub fn add_observer(&self, token: ObserverToken, observer: impl FnOnce(&Asset<T>) + Send + 'static) {
        let mut slot = self.raw.slot.lock();
        let state = slot.state;
        match state {
            AssetState::Finalized => {
                drop(slot);
                observer(self);
            }
            AssetState::Failed if self.is_cancelled() => {
                trace!("Dropping observer {token:?} of cancelled asset {}", self.key());
            }
            _ => {
                if let Some(entry) = slot.observers.iter_mut().find(|(existing, _)| *existing == token) {
                    entry.1 = Box::new(observer);
                } else {
                    slot.observers.push((token, Box::new(observer)));
                }
            }
        }
    }

    /// Removes a pending observer. Returns `false` when there was no observer with the given token.
    pub fn remove_observer(&self, token: ObserverToken) -> bool {
        let mut slot = self.raw.slot.lock();
        let count = slot.observers.len();
        slot.observers.retain(|(existing, _)| *existing != token);
        slot.observers.len() != count
    }

    /// Number of observers waiting for the asset.
    pub fn pending_observers(&self) -> usize {
        self.raw.slot.lock().observers.len()
    }

    /// Number of handles that point to this asset including the one of the registry.
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.raw)
    }

    /// Flags the asset as cancelled unless it's already finalized.
    pub(crate) fn request_cancel(&self) -> bool {
        let slot = self.raw.slot.lock();
        if slot.state == AssetState::Finalized {
            return false;
        }
        !self.raw.cancelled.swap(true, Ordering::SeqCst)
    }

    /// Moves the asset from `Empty` to `Preparing`. Returns `false` when preparing already started.
    pub(crate) fn begin_prepare(&self) -> bool {
        let mut slot = self.raw.slot.lock();
        if slot.state != AssetState::Empty {
            warn!("Asset {} is already in state {:?} and can't be prepared", self.key(), slot.state);
            return false;
        }
        slot.state = AssetState::Preparing;
        true
    }

    pub(crate) fn store_payload(&self, payload: Arc<T>) {
        let mut slot = self.raw.slot.lock();
        slot.payload = Some(payload);
        slot.state = AssetState::PendingCommit;
    }

    pub(crate) fn mark_failed(&self, error: Arc<Error>) {
        let mut slot = self.raw.slot.lock();
        slot.failure = Some(error);
        slot.state = AssetState::Failed;
    }

    /// Returns the payload when the asset is waiting for its commit.
    pub(crate) fn payload_for_commit(&self) -> Option<Arc<T>> {
        let slot = self.raw.slot.lock();
        match slot.state {
            AssetState::PendingCommit => slot.payload.clone(),
            _ => None,
        }
    }

    /// Stores the resource and returns the observers that have to be notified. Returns `None`
    /// when the asset was not waiting for its commit.
    pub(crate) fn finalize(&self, resource: Arc<T::Resource>) -> Option<Observers<T>> {
        let mut slot = self.raw.slot.lock();
        if slot.state != AssetState::PendingCommit {
            return None;
        }
        slot.resource = Some(resource);
        slot.state = AssetState::Finalized;
        Some(std::mem::take(&mut slot.observers))
    }

    /// Finalizes the asset with the data of `fallback` and records the `error` that made the
    /// substitution necessary.
    pub(crate) fn substitute(&self, fallback: &Asset<T>, error: Arc<Error>) -> Observers<T> {
        let payload = fallback.payload();
        let resource = fallback.resource();
        let mut slot = self.raw.slot.lock();
        if slot.state == AssetState::Finalized {
            return Vec::new();
        }
        slot.payload = payload;
        slot.resource = resource;
        slot.failure = Some(error);
        slot.state = AssetState::Finalized;
        std::mem::take(&mut slot.observers)
    }

    /// Finalizes the asset with data that didn't go through its own prepare phase, e.g. the
    /// hardcoded fallback of its type. `failure` is the error that made this necessary.
    pub(crate) fn finalize_with(&self, payload: Arc<T>, resource: Arc<T::Resource>, failure: Option<Arc<Error>>) -> Observers<T> {
        let mut slot = self.raw.slot.lock();
        if slot.state == AssetState::Finalized {
            return Vec::new();
        }
        slot.payload = Some(payload);
        slot.resource = Some(resource);
        slot.failure = failure;
        slot.state = AssetState::Finalized;
        std::mem::take(&mut slot.observers)
    }

    /// Holds the lock of the asset until the returned guard is dropped.
    #[cfg(test)]
    pub(crate) fn lock_state(&self) -> impl Sized + '_ {
        self.raw.slot.lock()
    }

    /// Puts the asset into its final `Failed` state and drops the pending observers without calling them.
    pub(crate) fn abandon(&self, error: Arc<Error>) -> usize {
        let observers = {
            let mut slot = self.raw.slot.lock();
            slot.payload = None;
            slot.failure = Some(error);
            slot.state = AssetState::Failed;
            std::mem::take(&mut slot.observers)
        };
        observers.len()
    }

    /// Calls the observers. Must be called without holding the lock of the asset.
    pub(crate) fn notify(&self, observers: Observers<T>) {
        for (_token, observer) in observers {
            observer(self);
        }
    }
}

impl<T: AssetType> fmt::Debug for Asset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Asset")
            .field("type", &T::TYPE_TAG)
            .field("key", self.key())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use keystone_test::spectral::{assert_that, prelude::*};

    use super::*;
    use crate::mock::{MockAsset, MockResource};

    fn finalized(key: &str, text: &str) -> Asset<MockAsset> {
        let asset = Asset::<MockAsset>::new(AssetKey::new(key));
        assert!(asset.begin_prepare());
        asset.store_payload(Arc::new(MockAsset { text: text.to_owned() }));
        let observers = asset.finalize(Arc::new(MockResource { id: 1, text: text.to_owned() })).unwrap();
        asset.notify(observers);
        asset
    }

    #[test]
    fn lifecycle() {
        let asset = Asset::<MockAsset>::new(AssetKey::new("mock/a.txt"));
        assert_that!(asset.state()).is_equal_to(AssetState::Empty);
        assert_that!(asset.begin_prepare()).is_true();
        assert_that!(asset.begin_prepare()).is_false();
        assert_that!(asset.state()).is_equal_to(AssetState::Preparing);
        assert_that!(asset.payload_for_commit()).is_none();

        asset.store_payload(Arc::new(MockAsset { text: "a".to_owned() }));
        assert_that!(asset.state()).is_equal_to(AssetState::PendingCommit);
        assert_that!(asset.payload_for_commit()).is_some();

        let resource = Arc::new(MockResource { id: 7, text: "a".to_owned() });
        assert!(asset.finalize(resource.clone()).is_some());
        assert!(asset.finalize(resource).is_none());
        assert_that!(asset.is_ready()).is_true();
        assert_that!(asset.is_substituted()).is_false();
        assert_that!(asset.resource().unwrap().id).is_equal_to(7);
    }

    #[test]
    fn observer_runs_once_after_finalize() {
        let asset = Asset::<MockAsset>::new(AssetKey::new("mock/a.txt"));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        asset.add_observer(ObserverToken::new(), move |asset| {
            assert!(asset.is_ready());
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_that!(asset.pending_observers()).is_equal_to(1);

        asset.begin_prepare();
        asset.store_payload(Arc::new(MockAsset { text: "a".to_owned() }));
        let observers = asset.finalize(Arc::new(MockResource { id: 1, text: "a".to_owned() })).unwrap();
        assert_that!(calls.load(Ordering::SeqCst)).is_equal_to(0);
        asset.notify(observers);
        assert_that!(calls.load(Ordering::SeqCst)).is_equal_to(1);
        assert_that!(asset.pending_observers()).is_equal_to(0);
    }

    #[test]
    fn observer_of_finalized_asset_runs_immediately() {
        let asset = finalized("mock/a.txt", "a");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        asset.add_observer(ObserverToken::new(), move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_that!(calls.load(Ordering::SeqCst)).is_equal_to(1);
        assert_that!(asset.pending_observers()).is_equal_to(0);
    }

    #[test]
    fn same_token_replaces_observer() {
        let asset = Asset::<MockAsset>::new(AssetKey::new("mock/a.txt"));
        let token = ObserverToken::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let first_clone = first.clone();
        let second_clone = second.clone();
        asset.add_observer(token, move |_| {
            first_clone.fetch_add(1, Ordering::SeqCst);
        });
        asset.add_observer(token, move |_| {
            second_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_that!(asset.pending_observers()).is_equal_to(1);

        asset.begin_prepare();
        asset.store_payload(Arc::new(MockAsset { text: "a".to_owned() }));
        let observers = asset.finalize(Arc::new(MockResource { id: 1, text: "a".to_owned() })).unwrap();
        asset.notify(observers);
        assert_that!(first.load(Ordering::SeqCst)).is_equal_to(0);
        assert_that!(second.load(Ordering::SeqCst)).is_equal_to(1);
    }

    #[test]
    fn removed_observer_is_not_called() {
        let asset = Asset::<MockAsset>::new(AssetKey::new("mock/a.txt"));
        let token = ObserverToken::new();
        asset.add_observer(token, |_| panic!("removed observer must not run"));
        assert_that!(asset.remove_observer(token)).is_true();
        assert_that!(asset.remove_observer(token)).is_false();
    }

    #[test]
    fn substitute_copies_fallback() {
        let fallback = finalized("mock/default.txt", "fallback");
        let asset = Asset::<MockAsset>::new(AssetKey::new("tex/brick"));
        asset.begin_prepare();
        let error = Arc::new(Error::NotFound(asset.key().clone()));
        asset.mark_failed(error.clone());
        assert_that!(asset.state()).is_equal_to(AssetState::Failed);
        assert_that!(asset.is_terminal()).is_false();

        asset.substitute(&fallback, error);
        assert_that!(asset.is_ready()).is_true();
        assert_that!(asset.is_substituted()).is_true();
        assert_that!(asset.payload().unwrap().text.as_str()).is_equal_to("fallback");
        assert_that!(asset.failure().unwrap().kind()).is_equal_to(crate::ErrorKind::NotFound);
    }

    #[test]
    fn cancelled_asset_drops_observers() {
        let asset = Asset::<MockAsset>::new(AssetKey::new("mock/a.txt"));
        asset.add_observer(ObserverToken::new(), |_| panic!("observer of cancelled asset must not run"));
        assert_that!(asset.request_cancel()).is_true();
        assert_that!(asset.request_cancel()).is_false();
        assert_that!(asset.abandon(Arc::new(Error::Cancelled(asset.key().clone())))).is_equal_to(1);
        assert_that!(asset.is_terminal()).is_true();
        asset.add_observer(ObserverToken::new(), |_| panic!("observer of cancelled asset must not run"));
        assert_that!(asset.pending_observers()).is_equal_to(0);
    }

    #[test]
    fn finalized_asset_can_not_be_cancelled() {
        let asset = finalized("mock/a.txt", "a");
        assert_that!(asset.request_cancel()).is_false();
        assert_that!(asset.is_cancelled()).is_false();
    }
}
