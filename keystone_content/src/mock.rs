//! Asset types and storage used by the tests of this crate.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    thread::{self, ThreadId},
    time::Duration,
};

use keystone_shared::parking_lot::Mutex;

use crate::{AssetKey, AssetType, Error, MemoryStorage, Result, Storage};

#[derive(Debug, Clone, PartialEq)]
pub struct MockAsset {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockResource {
    pub id: u64,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct MockParams {
    pub fail_commit: bool,
    pub prepare_delay: Option<Duration>,
    pub panic_in_prepare: bool,
}

/// Records on which thread which payload was committed.
#[derive(Debug, Default)]
pub struct MockContext {
    pub committed: Vec<(ThreadId, String)>,
    next_id: u64,
}

impl MockContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed_texts(&self) -> Vec<&str> {
        self.committed.iter().map(|(_, text)| text.as_str()).collect()
    }
}

impl AssetType for MockAsset {
    type Context = MockContext;
    type Params = MockParams;
    type Resource = MockResource;

    const TYPE_TAG: &'static str = "mock";

    fn prepare(key: &AssetKey, params: &Self::Params, storage: &dyn Storage) -> Result<Self> {
        if let Some(delay) = params.prepare_delay {
            thread::sleep(delay);
        }
        if params.panic_in_prepare {
            panic!("mock prepare of {key} panicked");
        }
        if !storage.exists(key.as_path()) {
            return Err(Error::NotFound(key.clone()));
        }
        let bytes = storage.read(key.as_path())?;
        Self::decode(&bytes, params)
    }

    fn decode(bytes: &[u8], _params: &Self::Params) -> Result<Self> {
        let text = String::from_utf8(bytes.to_vec()).map_err(|err| Error::Decode(err.to_string()))?;
        if text == "corrupt" {
            return Err(Error::Decode("mock data is corrupt".to_owned()));
        }
        Ok(Self { text })
    }

    fn commit(&self, params: &Self::Params, context: &mut Self::Context) -> Result<Self::Resource> {
        if params.fail_commit {
            return Err(Error::Other("mock commit failed".into()));
        }
        context.next_id += 1;
        context.committed.push((thread::current().id(), self.text.clone()));
        Ok(MockResource {
            id: context.next_id,
            text: self.text.clone(),
        })
    }

    fn fallback_key() -> AssetKey {
        AssetKey::new("mock/default.txt")
    }

    fn hardcoded_fallback() -> Self {
        Self {
            text: "hardcoded".to_owned(),
        }
    }
}

/// Asset type whose commit never succeeds, not even for the hardcoded fallback.
#[derive(Debug)]
pub struct BrokenAsset;

impl AssetType for BrokenAsset {
    type Context = MockContext;
    type Params = ();
    type Resource = ();

    const TYPE_TAG: &'static str = "broken";

    fn decode(_bytes: &[u8], _params: &Self::Params) -> Result<Self> {
        Ok(Self)
    }

    fn commit(&self, _params: &Self::Params, _context: &mut Self::Context) -> Result<Self::Resource> {
        Err(Error::Other("broken asset can't be committed".into()))
    }

    fn fallback_key() -> AssetKey {
        AssetKey::new("broken/default")
    }

    fn hardcoded_fallback() -> Self {
        Self
    }
}

/// Wraps a [`MemoryStorage`] and counts the `exists` calls per path.
#[derive(Default)]
pub struct CountingStorage {
    inner: MemoryStorage,
    exists_calls: Mutex<HashMap<PathBuf, usize>>,
}

impl CountingStorage {
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            exists_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn exists_calls(&self, path: impl AsRef<Path>) -> usize {
        let key = AssetKey::new(path);
        self.exists_calls.lock().get(key.as_path()).copied().unwrap_or(0)
    }
}

impl Storage for CountingStorage {
    fn exists(&self, path: &Path) -> bool {
        *self.exists_calls.lock().entry(path.to_owned()).or_insert(0) += 1;
        self.inner.exists(path)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path)
    }
}
