//! # Overview
//!
//! Crate for loading assets in the background and turning them into resources on the thread
//! that owns the resource context.
//!
//! Loading an asset happens in two phases. The *prepare* phase reads the bytes from a
//! [`Storage`] and decodes them into the payload of the asset. It runs on the threads of a
//! worker pool and never touches the resource context. The *commit* phase creates the resource
//! from the payload. It runs on the thread that calls [`AssetCache::tick`] and is the only place
//! where the context is borrowed mutably.
//!
//! Every key is loaded at most once per asset type. Requesting a key that is already known
//! returns another handle to the same [`Asset`].
//!
//! # Fallbacks
//!
//! An asset that can't be prepared or committed is replaced by the fallback of its type. The
//! fallback is loaded from [`AssetType::fallback_key`] and, when that fails as well, built from
//! [`AssetType::hardcoded_fallback`]. All failing assets of a type share the same fallback
//! resource. The error is handed to the [`ErrorReporter`] exactly once.
//!
//! # Components
//!
//! * [`AssetCache`]: registry, worker pool and commit queue
//! * [`Asset`]: shared handle that observes the state of an asset
//! * [`AssetType`]: implemented by every kind of asset
//! * [`Storage`]: where the bytes come from, either a [`FileSystem`] or a [`MemoryStorage`]
//! * [`kinds`]: sample asset kinds for textures, shaders, primitives and configs

mod asset;
mod cache;
mod common;
mod config;
mod fallback;
mod registry;
mod reporter;
mod storage;
mod work_order;
mod worker_pool;

#[cfg(test)]
mod mock;

pub mod kinds;

pub use asset::{Asset, AssetState, AssetType, LoadMode, ObserverFn, ObserverToken};
pub use cache::{AssetCache, AssetCacheBuilder, Statistics};
pub use common::{AssetKey, Error, ErrorKind, Result};
pub use config::AssetCacheConfig;
pub use reporter::{ErrorReport, ErrorReporter, LogReporter, Phase, RecordingReporter, Severity};
pub use storage::{FileSystem, MemoryStorage, Storage};
