/// Starts a thread that periodically checks the `parking_lot` locks for deadlocks and logs them.
///
/// Only available with the `deadlock_detection` feature. The thread runs for the rest of the
/// process and is started at most once.
#[cfg(feature = "deadlock_detection")]
pub fn spawn_deadlock_detection() {
    use std::{sync::Once, thread};

    static STARTED: Once = Once::new();
    STARTED.call_once(|| {
        let result = thread::Builder::new()
            .name("Deadlock detection".to_owned())
            .spawn(run_deadlock_detection);
        if let Err(err) = result {
            crate::log::error!("Failed to start the deadlock detection thread: {err}");
        }
    });
}

/// Does nothing when the `deadlock_detection` feature is disabled.
#[cfg(not(feature = "deadlock_detection"))]
pub fn spawn_deadlock_detection() {}

#[cfg(feature = "deadlock_detection")]
fn run_deadlock_detection() {
    use crate::{
        log::{error, info},
        parking_lot::deadlock,
    };
    use std::{thread, time::Duration};

    info!("Deadlock detection thread started");

    loop {
        thread::sleep(Duration::from_secs(1));
        let deadlocks = deadlock::check_deadlock();
        if deadlocks.is_empty() {
            continue;
        }

        error!("{} deadlocks detected", deadlocks.len());
        for (i, threads) in deadlocks.iter().enumerate() {
            error!("Deadlock #{}", i);
            for t in threads {
                error!("Thread Id {:#?}", t.thread_id());
                error!("{:#?}", t.backtrace());
            }
        }
    }
}
