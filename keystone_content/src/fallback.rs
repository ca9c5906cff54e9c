use std::sync::Arc;

use keystone_shared::log::{info, warn};

use crate::{
    cache::Shared,
    reporter::{ErrorReport, Phase, Severity},
    work_order::{commit_payload, prepare_asset},
    Asset, AssetKey, AssetType, Error, Result,
};

/// Returns the fallback of `T` and constructs it on first use.
///
/// # Panics
///
/// When not even the hardcoded fallback of `T` can be committed.
pub(crate) fn fetch<T: AssetType>(shared: &Shared, context: &mut T::Context) -> Asset<T> {
    shared.registry.get_fallback::<T>(|| match construct::<T>(shared, context) {
        Ok(fallback) => fallback,
        Err(error) => panic!("The hardcoded fallback of the asset type '{}' can't be committed: {error}", T::TYPE_TAG),
    })
}

/// Loads the default asset of `T` and falls back to the hardcoded payload when that fails.
///
/// The default asset is registered under [`AssetType::fallback_key`] like every requested asset,
/// so requesting that key returns the fallback itself. Failures never ask for another fallback.
pub(crate) fn construct<T: AssetType>(shared: &Shared, context: &mut T::Context) -> Result<Asset<T>> {
    let key = T::fallback_key();
    let params = T::Params::default();

    let (asset, is_new) = shared.registry.lookup_or_reserve::<T>(&key);
    if !is_new {
        if asset.is_ready() && !asset.is_substituted() {
            info!("Using the loaded default {} asset {key} as fallback", T::TYPE_TAG);
            return Ok(asset);
        }
        // The default asset is still loading and its commit may sit behind the current one.
        warn!("The default {} asset {key} isn't loaded yet, using the hardcoded fallback", T::TYPE_TAG);
        let hardcoded = Asset::<T>::new(AssetKey::structural(T::TYPE_TAG, ["hardcoded fallback"]));
        commit_hardcoded(&hardcoded, &params, context, None)?;
        return Ok(hardcoded);
    }

    let loaded = prepare_asset(&asset, &params, shared.storage.as_ref()).and_then(|_| {
        let payload = asset
            .payload_for_commit()
            .ok_or_else(|| Arc::new(Error::Other(format!("default asset {key} has no payload").into())))?;
        commit_payload(&key, payload.as_ref(), &params, context).map_err(Arc::new)
    });
    let error = match loaded {
        Ok(resource) => {
            if let Some(observers) = asset.finalize(resource) {
                shared.mark_changed();
                asset.notify(observers);
            }
            info!("Loaded the default {} asset {key}", T::TYPE_TAG);
            return Ok(asset);
        }
        Err(error) => error,
    };
    shared
        .reporter
        .report(&ErrorReport::new(Severity::Warning, T::TYPE_TAG, &key, Phase::Fallback, &error));

    warn!("Using the hardcoded fallback for the asset type '{}'", T::TYPE_TAG);
    if let Err(hardcoded_error) = commit_hardcoded(&asset, &params, context, Some(error)) {
        asset.abandon(Arc::new(Error::Other(hardcoded_error.to_string().into())));
        shared.registry.remove_if_same(&asset);
        return Err(hardcoded_error);
    }
    shared.mark_changed();
    Ok(asset)
}

fn commit_hardcoded<T: AssetType>(
    asset: &Asset<T>,
    params: &T::Params,
    context: &mut T::Context,
    failure: Option<Arc<Error>>,
) -> Result<()> {
    let payload = Arc::new(T::hardcoded_fallback());
    let resource = commit_payload(asset.key(), payload.as_ref(), params, context)?;
    let observers = asset.finalize_with(payload, resource, failure);
    asset.notify(observers);
    Ok(())
}

#[cfg(test)]
mod tests {
    use keystone_test::spectral::{assert_that, prelude::*};

    use super::*;
    use crate::{
        mock::{BrokenAsset, MockAsset, MockContext},
        reporter::RecordingReporter,
        ErrorKind, MemoryStorage,
    };

    fn shared(storage: MemoryStorage, reporter: Arc<RecordingReporter>) -> Shared {
        Shared::new(Arc::new(storage), reporter)
    }

    #[test]
    fn loads_default_asset_from_storage() {
        let reporter = Arc::new(RecordingReporter::new());
        let shared = shared(MemoryStorage::new().with("mock/default.txt", "default"), reporter.clone());
        let mut context = MockContext::new();
        let fallback = construct::<MockAsset>(&shared, &mut context).unwrap();
        assert_that!(fallback.is_ready()).is_true();
        assert_that!(fallback.is_substituted()).is_false();
        assert_that!(fallback.payload().unwrap().text.as_str()).is_equal_to("default");
        assert_that!(reporter.is_empty()).is_true();
    }

    #[test]
    fn default_asset_is_registered_under_its_key() {
        let shared = shared(MemoryStorage::new().with("mock/default.txt", "default"), Arc::new(RecordingReporter::new()));
        let mut context = MockContext::new();
        let fallback = construct::<MockAsset>(&shared, &mut context).unwrap();
        let (registered, is_new) = shared.registry.lookup_or_reserve::<MockAsset>(&MockAsset::fallback_key());
        assert_that!(is_new).is_false();
        assert_that!(registered.ptr_eq(&fallback)).is_true();
        assert_that!(context.committed_texts()).is_equal_to(vec!["default"]);
    }

    #[test]
    fn reuses_default_asset_that_was_loaded_before() {
        let shared = shared(MemoryStorage::new().with("mock/default.txt", "default"), Arc::new(RecordingReporter::new()));
        let mut context = MockContext::new();
        let (default, _) = shared.registry.lookup_or_reserve::<MockAsset>(&MockAsset::fallback_key());
        prepare_asset(&default, &Default::default(), shared.storage.as_ref()).unwrap();
        let payload = default.payload_for_commit().unwrap();
        let resource = commit_payload(default.key(), payload.as_ref(), &Default::default(), &mut context).unwrap();
        default.finalize(resource);

        let fallback = construct::<MockAsset>(&shared, &mut context).unwrap();
        assert_that!(fallback.ptr_eq(&default)).is_true();
        assert_that!(context.committed).has_length(1);
    }

    #[test]
    fn pending_default_asset_is_not_duplicated() {
        let shared = shared(MemoryStorage::new().with("mock/default.txt", "default"), Arc::new(RecordingReporter::new()));
        let mut context = MockContext::new();
        let (pending, _) = shared.registry.lookup_or_reserve::<MockAsset>(&MockAsset::fallback_key());

        let fallback = construct::<MockAsset>(&shared, &mut context).unwrap();
        assert_that!(fallback.ptr_eq(&pending)).is_false();
        assert_that!(fallback.key()).is_not_equal_to(pending.key());
        assert_that!(fallback.payload().unwrap().text.as_str()).is_equal_to("hardcoded");
        let (registered, _) = shared.registry.lookup_or_reserve::<MockAsset>(&MockAsset::fallback_key());
        assert_that!(registered.ptr_eq(&pending)).is_true();
    }

    #[test]
    fn uses_hardcoded_payload_when_default_is_missing() {
        let reporter = Arc::new(RecordingReporter::new());
        let shared = shared(MemoryStorage::new(), reporter.clone());
        let mut context = MockContext::new();
        let fallback = construct::<MockAsset>(&shared, &mut context).unwrap();
        assert_that!(fallback.is_ready()).is_true();
        assert_that!(fallback.is_substituted()).is_true();
        assert_that!(fallback.payload().unwrap().text.as_str()).is_equal_to("hardcoded");
        let reports = reporter.reports();
        assert_that!(reports).has_length(1);
        assert_that!(reports[0].severity).is_equal_to(Severity::Warning);
        assert_that!(reports[0].phase).is_equal_to(Phase::Fallback);
        assert_that!(reports[0].kind).is_equal_to(ErrorKind::NotFound);
    }

    #[test]
    fn fetch_constructs_once() {
        let reporter = Arc::new(RecordingReporter::new());
        let shared = shared(MemoryStorage::new(), reporter.clone());
        let mut context = MockContext::new();
        let first = fetch::<MockAsset>(&shared, &mut context);
        let second = fetch::<MockAsset>(&shared, &mut context);
        assert_that!(first.ptr_eq(&second)).is_true();
        assert_that!(context.committed).has_length(1);
        assert_that!(reporter.len()).is_equal_to(1);
    }

    #[test]
    fn failing_hardcoded_commit_is_an_error() {
        let shared = shared(MemoryStorage::new(), Arc::new(RecordingReporter::new()));
        let mut context = MockContext::new();
        let result = construct::<BrokenAsset>(&shared, &mut context);
        assert_that!(matches!(result, Err(ref error) if error.kind() == ErrorKind::CommitFailed)).is_true();
        assert_that!(shared.registry.get::<BrokenAsset>(&BrokenAsset::fallback_key())).is_none();
    }
}
