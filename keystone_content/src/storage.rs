use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use keystone_shared::parking_lot::RwLock;

use crate::{common::check_path, AssetKey, Result};

/// Source of the raw bytes of assets. Called from the worker threads.
pub trait Storage: Send + Sync {
    /// Returns whether there is data for the given relative path.
    fn exists(&self, path: &Path) -> bool;

    /// Reads the whole content of the given relative path.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn exists(&self, path: &Path) -> bool {
        self.as_ref().exists(path)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.as_ref().read(path)
    }
}

/// Reads assets from a directory.
#[derive(Debug)]
pub struct FileSystem {
    root: PathBuf,
}

impl FileSystem {
    /// Creates a new [`FileSystem`] storage and checks that the given root directory exists.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use keystone_content::FileSystem;
    /// let _file_system = FileSystem::new("assets").unwrap();
    /// ```
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = env::current_dir()?.join(root);
        if !root.is_dir() {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("Directory '{}' does not exist", root.display())).into());
        }
        Ok(Self { root })
    }

    /// Returns the directory in which the assets are looked up.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Storage for FileSystem {
    fn exists(&self, path: &Path) -> bool {
        check_path(path).is_ok() && self.root.join(path).is_file()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        check_path(path)?;
        Ok(fs::read(self.root.join(path))?)
    }
}

/// Keeps the assets in memory. Useful for tests and for data that is generated at runtime.
#[derive(Default)]
pub struct MemoryStorage {
    files: RwLock<BTreeMap<PathBuf, Arc<[u8]>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the content for the given path and replaces any previous content.
    pub fn insert(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let key = AssetKey::new(path);
        let content: Vec<u8> = content.into();
        self.files.write().insert(key.as_path().to_owned(), content.into());
    }

    /// Builder-style variant of [`MemoryStorage::insert`].
    pub fn with(self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        let key = AssetKey::new(path);
        self.files.write().remove(key.as_path()).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .map(|content| content.to_vec())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("No content for '{}'", path.display())).into())
    }
}
