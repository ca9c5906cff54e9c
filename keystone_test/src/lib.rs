use std::{
    fs,
    path::{Path, PathBuf},
    sync::Once,
    thread,
    time::{Duration, Instant},
};

use keystone_shared::log::LevelFilter;

pub use spectral;

static LOGGER: Once = Once::new();

/// Installs a logger that prints to stdout. Can be called from every test; only the first call has an effect.
pub fn setup_logger() {
    LOGGER.call_once(|| {
        // Another test harness might have installed a logger already.
        let _ = simple_logger::SimpleLogger::new().with_level(LevelFilter::Trace).init();
    });
}

/// Polls `condition` until it returns `true` or the `timeout` elapsed. Returns the last result of `condition`.
///
/// `condition` is called at least once.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

/// Writes `content` to `relative_path` below `root` and creates the missing parent directories.
pub fn write_asset_file(root: &Path, relative_path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> PathBuf {
    let path = root.join(relative_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap_or_else(|_| panic!("Failed to create directory \"{}\"", parent.display()));
    }
    fs::write(&path, content).unwrap_or_else(|_| panic!("Failed to write file \"{}\"", path.display()));
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_until_immediately_true() {
        assert!(wait_until(Duration::ZERO, || true));
    }

    #[test]
    fn wait_until_times_out() {
        let mut calls = 0;
        assert!(!wait_until(Duration::from_millis(5), || {
            calls += 1;
            false
        }));
        assert!(calls >= 1);
    }

    #[test]
    fn write_asset_file_creates_parents() {
        let root = std::env::temp_dir().join(keystone_shared::function_name!().replace("::", "."));
        let path = write_asset_file(&root, "textures/brick.txt", "brick");
        assert_eq!(fs::read_to_string(&path).unwrap(), "brick");
        fs::remove_dir_all(&root).unwrap();
    }
}
