//! Third-party stack shared by the `keystone` crates.
//!
//! Crates of the workspace import `log`, `parking_lot`, `crossbeam_channel` and friends through
//! this crate so that every crate agrees on the versions.

mod deadlock;

pub use deadlock::*;

pub use ahash;
pub use chrono;
pub use crossbeam_channel;
pub use derive_where;
pub use log;
pub use num_cpus;
pub use parking_lot;
pub use thiserror;

/// Name of the function this macro is called in
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        &name[..name.len() - 3]
    }};
}

/// Returns the number of threads the hardware can run concurrently.
///
/// Never returns 0 so it can be used directly as a pool size.
pub fn hardware_concurrency() -> usize {
    num_cpus::get().max(1)
}
