use std::{
    any::Any,
    borrow::Cow,
    fmt::{self, Formatter},
    hash::Hasher,
    io,
    path::{Path, PathBuf},
    result,
};

use keystone_shared::{ahash::AHasher, thiserror};

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Asset not found: {0}")]
    NotFound(AssetKey),
    #[error("Asset {key} is corrupt: {reason}")]
    Corrupt { key: AssetKey, reason: String },
    #[error("Failed to commit asset {key}: {reason}")]
    CommitFailed { key: AssetKey, reason: String },
    #[error("Loading of asset {0} was cancelled")]
    Cancelled(AssetKey),
    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),
    #[error("IoError: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to start worker pool")]
    FailedToStartWorkerPool,
    #[error("Failed to decode: {0}")]
    Decode(String),
    #[error("Other: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Coarse classification of an [`Error`] that is passed to the [`ErrorReporter`](crate::ErrorReporter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The storage has no data for the key.
    NotFound,
    /// The data exists but couldn't be decoded.
    Corrupt,
    /// The resource couldn't be created in the exclusive context.
    CommitFailed,
    Cancelled,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Corrupt { .. } | Error::Decode(_) => ErrorKind::Corrupt,
            Error::CommitFailed { .. } => ErrorKind::CommitFailed,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    /// Converts an error raised while preparing the asset with the given key into the
    /// variant that describes the failure of the prepare phase.
    pub(crate) fn into_prepare_error(self, key: &AssetKey) -> Self {
        match self {
            Error::NotFound(_) | Error::Corrupt { .. } | Error::Cancelled(_) => self,
            Error::IoError(err) if err.kind() == io::ErrorKind::NotFound => Error::NotFound(key.clone()),
            other => Error::Corrupt {
                key: key.clone(),
                reason: other.to_string(),
            },
        }
    }

    /// Converts an error raised while committing the asset with the given key into [`Error::CommitFailed`].
    pub(crate) fn into_commit_error(self, key: &AssetKey) -> Self {
        match self {
            Error::CommitFailed { .. } => self,
            other => Error::CommitFailed {
                key: key.clone(),
                reason: other.to_string(),
            },
        }
    }

    /// Creates an error from the payload of a caught panic.
    pub(crate) fn from_panic(key: &AssetKey, payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        Error::Corrupt {
            key: key.clone(),
            reason: format!("panicked while preparing: {message}"),
        }
    }
}

/// Identifies the asset. It's a relative path in the asset storage.
///
/// Paths are normalized on construction so that the same file can't end up in the cache twice
/// under different spellings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetKey(PathBuf);

impl AssetKey {
    /// Create a new [`AssetKey`] from a path. Backslashes are converted to slashes and `.` components
    /// are removed. No other validation is done on the path.
    ///
    /// # Example
    ///
    /// ```rust
    /// use keystone_content::AssetKey;
    /// let asset_key = AssetKey::new("./textures\\character.png");
    /// assert_eq!(asset_key.as_str(), "textures/character.png");
    /// ```
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(normalize(path.as_ref()))
    }

    /// Creates a key for an asset that doesn't correspond to a single file but to a combination
    /// of other assets. The same tag and parts always produce the same key.
    ///
    /// # Example
    ///
    /// ```rust
    /// use keystone_content::AssetKey;
    /// let a = AssetKey::structural("material", ["tex/albedo.png", "tex/normal.png"]);
    /// let b = AssetKey::structural("material", ["tex/albedo.png", "tex/normal.png"]);
    /// assert_eq!(a, b);
    /// assert!(a.as_str().starts_with("material#"));
    /// ```
    pub fn structural<I, P>(tag: &str, parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        // AHasher::default uses fixed keys which keeps the key stable across runs.
        let mut hasher = AHasher::default();
        hasher.write(tag.as_bytes());
        for part in parts {
            hasher.write_u8(0xff);
            hasher.write(part.as_ref().as_bytes());
        }
        Self(PathBuf::from(format!("{tag}#{:016x}", hasher.finish())))
    }

    /// Returns the path of the asset.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use std::ffi::OsStr;
    /// use keystone_content::AssetKey;
    /// let asset_key = AssetKey::new("textures/character.png");
    /// assert_eq!(asset_key.as_path().extension(), Some(OsStr::new("png")));
    /// ```
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Returns the path of the asset as a string.
    pub fn as_str(&self) -> Cow<'_, str> {
        self.0.to_string_lossy()
    }

    /// Returns the lowercase extension of the asset if there is one.
    pub fn extension(&self) -> Option<String> {
        self.0
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| extension.to_lowercase())
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AssetKey({})", self.as_str())
    }
}

impl From<&str> for AssetKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AssetKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&Path> for AssetKey {
    fn from(value: &Path) -> Self {
        Self::new(value)
    }
}

impl From<PathBuf> for AssetKey {
    fn from(value: PathBuf) -> Self {
        Self::new(value)
    }
}

impl From<&AssetKey> for AssetKey {
    fn from(value: &AssetKey) -> Self {
        value.clone()
    }
}

fn normalize(path: &Path) -> PathBuf {
    let text = path.to_string_lossy().replace('\\', "/");
    let joined = text
        .split('/')
        .filter(|component| !component.is_empty() && *component != ".")
        .collect::<Vec<_>>()
        .join("/");
    if text.starts_with('/') {
        PathBuf::from(format!("/{joined}"))
    } else {
        PathBuf::from(joined)
    }
}

/// Only relative paths without parent components are allowed to leave the storage root.
pub(crate) fn check_path(path: &Path) -> Result<()> {
    let escapes = path
        .components()
        .any(|component| !matches!(component, std::path::Component::Normal(_)));
    if path.as_os_str().is_empty() || escapes {
        return Err(Error::InvalidPath(path.to_owned()));
    }
    Ok(())
}
