use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use keystone_shared::log::{debug, info, trace, warn};

use crate::{
    cache::Shared,
    fallback,
    reporter::{ErrorReport, Phase, Severity},
    Asset, AssetKey, AssetType, Error, Storage,
};

/// A unit of work that loads one asset. The worker threads call [`WorkOrder::prepare`] and the
/// commit pump calls [`WorkOrder::commit`] on the thread that owns the context `C`.
pub(crate) trait WorkOrder<C>: Send {
    fn type_tag(&self) -> &'static str;

    fn key(&self) -> &AssetKey;

    /// Runs the prepare phase. Must be called at most once.
    fn prepare(&mut self, storage: &dyn Storage);

    /// Marks the order as failed without preparing it.
    fn fail(&mut self, error: Error);

    /// Runs the commit phase, or substitutes the fallback when the order failed.
    fn commit(self: Box<Self>, shared: &Shared, context: &mut C);
}

pub(crate) struct AssetWorkOrder<T: AssetType> {
    asset: Asset<T>,
    params: T::Params,
    failure: Option<Arc<Error>>,
}

impl<T: AssetType> AssetWorkOrder<T> {
    pub fn new(asset: Asset<T>, params: T::Params) -> Self {
        Self {
            asset,
            params,
            failure: None,
        }
    }
}

impl<T: AssetType> WorkOrder<T::Context> for AssetWorkOrder<T> {
    fn type_tag(&self) -> &'static str {
        T::TYPE_TAG
    }

    fn key(&self) -> &AssetKey {
        self.asset.key()
    }

    fn prepare(&mut self, storage: &dyn Storage) {
        if let Err(error) = prepare_asset(&self.asset, &self.params, storage) {
            self.failure = Some(error);
        }
    }

    fn fail(&mut self, error: Error) {
        let error = Arc::new(error);
        self.asset.mark_failed(error.clone());
        self.failure = Some(error);
    }

    fn commit(self: Box<Self>, shared: &Shared, context: &mut T::Context) {
        let AssetWorkOrder { asset, params, failure } = *self;

        if asset.is_cancelled() {
            let dropped = asset.abandon(Arc::new(Error::Cancelled(asset.key().clone())));
            shared.registry.remove_if_same(&asset);
            shared.statistics.cancelled.increment();
            debug!(
                "Cancelled {} asset {} and dropped {dropped} observer(s)",
                T::TYPE_TAG,
                asset.key()
            );
            return;
        }

        let result = match failure {
            Some(error) => Err((Phase::Prepare, error)),
            None => {
                let Some(payload) = asset.payload_for_commit() else {
                    warn!("{} asset {} is not waiting for a commit", T::TYPE_TAG, asset.key());
                    return;
                };
                commit_payload(asset.key(), payload.as_ref(), &params, context).map_err(|error| (Phase::Commit, Arc::new(error)))
            }
        };

        match result {
            Ok(resource) => {
                if let Some(observers) = asset.finalize(resource) {
                    shared.statistics.committed.increment();
                    shared.mark_changed();
                    trace!("Committed {} asset {}", T::TYPE_TAG, asset.key());
                    asset.notify(observers);
                }
            }
            Err((phase, error)) => {
                shared.statistics.failed.increment();
                shared
                    .reporter
                    .report(&ErrorReport::new(Severity::Error, T::TYPE_TAG, asset.key(), phase, &error));
                let fallback = fallback::fetch::<T>(shared, context);
                let observers = asset.substitute(&fallback, error);
                shared.statistics.substituted.increment();
                shared.mark_changed();
                info!("Substituted the fallback for {} asset {}", T::TYPE_TAG, asset.key());
                asset.notify(observers);
            }
        }
    }
}

/// Runs [`AssetType::prepare`] and stores the payload in the asset. Panics of the asset type
/// are caught and reported as [`Error::Corrupt`].
pub(crate) fn prepare_asset<T: AssetType>(asset: &Asset<T>, params: &T::Params, storage: &dyn Storage) -> Result<(), Arc<Error>> {
    if !asset.begin_prepare() {
        return Ok(());
    }
    let key = asset.key();
    let result = panic::catch_unwind(AssertUnwindSafe(|| T::prepare(key, params, storage)))
        .unwrap_or_else(|payload| Err(Error::from_panic(key, payload)))
        .map_err(|error| error.into_prepare_error(key));
    match result {
        Ok(payload) => {
            asset.store_payload(Arc::new(payload));
            Ok(())
        }
        Err(error) => {
            let error = Arc::new(error);
            asset.mark_failed(error.clone());
            Err(error)
        }
    }
}

/// Runs [`AssetType::commit`] and maps its errors to [`Error::CommitFailed`].
pub(crate) fn commit_payload<T: AssetType>(
    key: &AssetKey,
    payload: &T,
    params: &T::Params,
    context: &mut T::Context,
) -> crate::Result<Arc<T::Resource>> {
    payload
        .commit(params, context)
        .map(Arc::new)
        .map_err(|error| error.into_commit_error(key))
}

#[cfg(test)]
mod tests {
    use keystone_test::spectral::{assert_that, prelude::*};

    use super::*;
    use crate::{
        mock::{MockAsset, MockContext, MockParams},
        AssetState, ErrorKind, MemoryStorage,
    };

    #[test]
    fn prepare_stores_payload() {
        let storage = MemoryStorage::new().with("mock/a.txt", "a");
        let asset = Asset::<MockAsset>::new(AssetKey::new("mock/a.txt"));
        assert_that!(prepare_asset(&asset, &MockParams::default(), &storage)).is_ok();
        assert_that!(asset.state()).is_equal_to(AssetState::PendingCommit);
        assert_that!(asset.payload().unwrap().text.as_str()).is_equal_to("a");
    }

    #[test]
    fn prepare_classifies_errors() {
        let storage = MemoryStorage::new().with("mock/corrupt.txt", "corrupt");
        let missing = Asset::<MockAsset>::new(AssetKey::new("mock/missing.txt"));
        let error = prepare_asset(&missing, &MockParams::default(), &storage).unwrap_err();
        assert_that!(error.kind()).is_equal_to(ErrorKind::NotFound);
        assert_that!(missing.state()).is_equal_to(AssetState::Failed);

        let corrupt = Asset::<MockAsset>::new(AssetKey::new("mock/corrupt.txt"));
        let error = prepare_asset(&corrupt, &MockParams::default(), &storage).unwrap_err();
        assert_that!(error.kind()).is_equal_to(ErrorKind::Corrupt);
    }

    #[test]
    fn prepare_catches_panics() {
        let storage = MemoryStorage::new();
        let asset = Asset::<MockAsset>::new(AssetKey::new("mock/a.txt"));
        let params = MockParams {
            panic_in_prepare: true,
            ..Default::default()
        };
        let error = prepare_asset(&asset, &params, &storage).unwrap_err();
        assert_that!(error.kind()).is_equal_to(ErrorKind::Corrupt);
        assert_that!(error.to_string().contains("panicked")).is_true();
    }

    #[test]
    fn commit_errors_become_commit_failed() {
        let key = AssetKey::new("mock/a.txt");
        let params = MockParams {
            fail_commit: true,
            ..Default::default()
        };
        let payload = MockAsset { text: "a".to_owned() };
        let mut context = MockContext::new();
        let error = commit_payload(&key, &payload, &params, &mut context).unwrap_err();
        assert_that!(error.kind()).is_equal_to(ErrorKind::CommitFailed);
        assert_that!(context.committed).is_empty();
    }
}
