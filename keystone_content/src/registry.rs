use std::{
    any::{Any, TypeId},
    collections::{BTreeMap, HashMap},
};

use keystone_shared::{log::trace, parking_lot::Mutex};

use crate::{Asset, AssetKey, AssetType};

/// Assets of one type.
struct Entries<T: AssetType> {
    assets: BTreeMap<AssetKey, Asset<T>>,
}

/// Type erased handle to an asset that was copied out of the registry.
trait ErasedAsset: Send {
    fn as_any(&self) -> &dyn Any;
    fn is_terminal(&self) -> bool;
}

impl<T: AssetType> ErasedAsset for Asset<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_terminal(&self) -> bool {
        Asset::<T>::is_terminal(self)
    }
}

/// Operations that have to work on the entries of every asset type.
///
/// None of them may lock an asset. They run under the registry lock while the asset locks are
/// taken by other threads in arbitrary order.
trait ErasedEntries: Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn handles(&self) -> Vec<Box<dyn ErasedAsset>>;
    /// Entries that nobody but the registry holds.
    fn unused(&self) -> Vec<Box<dyn ErasedAsset>>;
    /// Removes the `candidates` that are still registered and still held only by the registry
    /// and the candidate itself.
    fn remove_unused(&mut self, candidates: &[Box<dyn ErasedAsset>]) -> usize;
    fn len(&self) -> usize;
}

impl<T: AssetType> ErasedEntries for Entries<T> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn handles(&self) -> Vec<Box<dyn ErasedAsset>> {
        self.assets.values().map(|asset| Box::new(asset.clone()) as Box<dyn ErasedAsset>).collect()
    }

    fn unused(&self) -> Vec<Box<dyn ErasedAsset>> {
        self.assets
            .values()
            .filter(|asset| asset.handle_count() == 1)
            .map(|asset| Box::new(asset.clone()) as Box<dyn ErasedAsset>)
            .collect()
    }

    fn remove_unused(&mut self, candidates: &[Box<dyn ErasedAsset>]) -> usize {
        let mut removed = 0;
        for candidate in candidates {
            let Some(candidate) = candidate.as_any().downcast_ref::<Asset<T>>() else {
                continue;
            };
            let unchanged = self
                .assets
                .get(candidate.key())
                .is_some_and(|asset| asset.ptr_eq(candidate) && asset.handle_count() == 2);
            if unchanged {
                self.assets.remove(candidate.key());
                removed += 1;
            }
        }
        removed
    }

    fn len(&self) -> usize {
        self.assets.len()
    }
}

/// Keeps track of every requested asset so that each key is loaded only once per type.
///
/// All lookups and insertions happen under a single lock which makes "look up, and insert when
/// missing" atomic. The registry lock and the asset locks are never held at the same time.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<TypeId, Box<dyn ErasedEntries>>>,
    fallbacks: Mutex<HashMap<TypeId, Box<dyn Any + Send>>>,
}

fn typed<T: AssetType>(entries: &mut Box<dyn ErasedEntries>) -> &mut Entries<T> {
    entries
        .as_any_mut()
        .downcast_mut::<Entries<T>>()
        .expect("registry entries are keyed by the TypeId of their asset type")
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the asset for the key and whether it was inserted by this call.
    pub fn lookup_or_reserve<T: AssetType>(&self, key: &AssetKey) -> (Asset<T>, bool) {
        let mut entries = self.entries.lock();
        let entries = typed::<T>(entries.entry(TypeId::of::<T>()).or_insert_with(|| {
            Box::new(Entries::<T> {
                assets: BTreeMap::new(),
            }) as Box<dyn ErasedEntries>
        }));
        if let Some(asset) = entries.assets.get(key) {
            return (asset.clone(), false);
        }
        trace!("Reserving {} asset {key}", T::TYPE_TAG);
        let asset = Asset::<T>::new(key.clone());
        entries.assets.insert(key.clone(), asset.clone());
        (asset, true)
    }

    pub fn get<T: AssetType>(&self, key: &AssetKey) -> Option<Asset<T>> {
        let mut entries = self.entries.lock();
        let entries = typed::<T>(entries.get_mut(&TypeId::of::<T>())?);
        entries.assets.get(key).cloned()
    }

    /// Removes the entry of the key regardless of its state.
    pub fn remove<T: AssetType>(&self, key: &AssetKey) -> Option<Asset<T>> {
        let mut entries = self.entries.lock();
        let entries = typed::<T>(entries.get_mut(&TypeId::of::<T>())?);
        entries.assets.remove(key)
    }

    /// Removes the entry of the key only when it still refers to `asset`.
    pub fn remove_if_same<T: AssetType>(&self, asset: &Asset<T>) -> bool {
        let mut entries = self.entries.lock();
        let Some(entries) = entries.get_mut(&TypeId::of::<T>()) else {
            return false;
        };
        let entries = typed::<T>(entries);
        match entries.assets.get(asset.key()) {
            Some(existing) if existing.ptr_eq(asset) => {
                entries.assets.remove(asset.key());
                true
            }
            _ => false,
        }
    }

    /// Drops the terminal entries that nobody else holds. Returns the number of dropped entries.
    pub fn purge_unused(&self) -> usize {
        let candidates = self
            .entries
            .lock()
            .iter()
            .map(|(type_id, entries)| (*type_id, entries.unused()))
            .collect::<Vec<_>>();
        let mut purged = 0;
        for (type_id, candidates) in candidates {
            let terminal = candidates.into_iter().filter(|asset| asset.is_terminal()).collect::<Vec<_>>();
            if terminal.is_empty() {
                continue;
            }
            if let Some(entries) = self.entries.lock().get_mut(&type_id) {
                purged += entries.remove_unused(&terminal);
            }
        }
        purged
    }

    pub fn all_terminal(&self) -> bool {
        let handles = self
            .entries
            .lock()
            .values()
            .flat_map(|entries| entries.handles())
            .collect::<Vec<_>>();
        handles.iter().all(|asset| asset.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().values().map(|entries| entries.len()).sum()
    }

    pub fn fallback<T: AssetType>(&self) -> Option<Asset<T>> {
        self.fallbacks
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|fallback| fallback.downcast_ref::<Asset<T>>())
            .cloned()
    }

    /// Returns the fallback of `T` and calls `construct` when there is none yet.
    ///
    /// `construct` runs without holding the lock. When another fallback was inserted in the
    /// meantime, the first one wins and the new one is discarded.
    pub fn get_fallback<T: AssetType>(&self, construct: impl FnOnce() -> Asset<T>) -> Asset<T> {
        if let Some(fallback) = self.fallback::<T>() {
            return fallback;
        }
        let constructed = construct();
        self.insert_fallback(constructed)
    }

    /// Inserts the fallback unless there is one already and returns the stored one.
    pub fn insert_fallback<T: AssetType>(&self, fallback: Asset<T>) -> Asset<T> {
        let mut fallbacks = self.fallbacks.lock();
        let stored = fallbacks.entry(TypeId::of::<T>()).or_insert_with(|| Box::new(fallback));
        stored
            .downcast_ref::<Asset<T>>()
            .cloned()
            .expect("fallbacks are keyed by the TypeId of their asset type")
    }
}
