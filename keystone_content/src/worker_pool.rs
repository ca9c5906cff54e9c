use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use keystone_shared::{
    crossbeam_channel::{self, Receiver, SendError, Sender},
    log::{error, info, trace, warn},
    parking_lot::{Mutex, RwLock},
};

use crate::{cache::Shared, work_order::WorkOrder, Error, Result};

pub(crate) type BoxedWorkOrder<C> = Box<dyn WorkOrder<C>>;

enum Item<C> {
    Wakeup,
    Prepare(BoxedWorkOrder<C>),
}

/// Threads that run the prepare phase of the work orders. Prepared orders are handed over to
/// the commit queue which is drained by the thread that owns the context `C`.
pub(crate) struct WorkerPool<C: 'static> {
    wants_drop: Arc<AtomicBool>,
    /// Submissions hold the read lock across the running check and the send. Shutdown flips
    /// `wants_drop` under the write lock so no order is queued behind the final drain.
    submission: RwLock<()>,
    item_sender: Sender<Item<C>>,
    item_receiver: Receiver<Item<C>>,
    commit_sender: Sender<BoxedWorkOrder<C>>,
    commit_receiver: Receiver<BoxedWorkOrder<C>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl<C: 'static> WorkerPool<C> {
    pub fn new(worker_count: usize, shared: &Arc<Shared>) -> Result<Self> {
        let wants_drop = Arc::new(AtomicBool::new(false));
        let (item_sender, item_receiver) = crossbeam_channel::unbounded();
        let (commit_sender, commit_receiver) = crossbeam_channel::unbounded();

        let threads = (0..worker_count)
            .map(|thread_index| spawn_worker(&wants_drop, &item_receiver, &commit_sender, shared, thread_index))
            .collect::<Result<Vec<_>>>()?;
        info!("Started {worker_count} asset worker thread(s)");

        Ok(Self {
            wants_drop,
            submission: RwLock::new(()),
            item_sender,
            item_receiver,
            commit_sender,
            commit_receiver,
            threads: Mutex::new(threads),
            worker_count,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_running(&self) -> bool {
        !self.wants_drop.load(Ordering::SeqCst)
    }

    /// Queues the order for the prepare phase. Returns the order when the pool is shut down.
    pub fn submit(&self, order: BoxedWorkOrder<C>) -> std::result::Result<(), BoxedWorkOrder<C>> {
        let _submission = self.submission.read();
        if !self.is_running() {
            return Err(order);
        }
        trace!("Queueing {} asset {} for the prepare phase", order.type_tag(), order.key());
        match self.item_sender.send(Item::Prepare(order)) {
            Err(SendError(Item::Prepare(order))) => Err(order),
            _ => Ok(()),
        }
    }

    /// Puts the order directly into the commit queue.
    pub fn push_committable(&self, order: BoxedWorkOrder<C>) {
        if let Err(err) = self.commit_sender.send(order) {
            error!("Failed to push work order into the commit queue: {err}");
        }
    }

    pub fn try_pop_committable(&self) -> Option<BoxedWorkOrder<C>> {
        self.commit_receiver.try_recv().ok()
    }

    pub fn pop_committable_timeout(&self, timeout: Duration) -> Option<BoxedWorkOrder<C>> {
        self.commit_receiver.recv_timeout(timeout).ok()
    }

    /// Stops and joins the worker threads. Orders that haven't been prepared yet are failed and
    /// moved to the commit queue so that they are substituted by the fallback.
    pub fn shutdown(&self) {
        {
            let _submission = self.submission.write();
            if self.wants_drop.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        for _ in 0..self.worker_count {
            if let Err(err) = self.item_sender.send(Item::Wakeup) {
                error!("Failed to send wakeup item to the asset workers: {err}");
            }
        }
        let threads = std::mem::take(&mut *self.threads.lock());
        for thread in threads {
            if thread.join().is_err() {
                error!("An asset worker thread panicked");
            }
        }

        let mut abandoned = 0;
        for item in self.item_receiver.try_iter() {
            if let Item::Prepare(mut order) = item {
                order.fail(shutdown_error());
                self.push_committable(order);
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            warn!("{abandoned} work order(s) were not prepared before the worker pool was shut down");
        }
        info!("Asset worker threads stopped");
    }
}

impl<C: 'static> Drop for WorkerPool<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn shutdown_error() -> Error {
    Error::Other("the worker pool was shut down before the asset was prepared".into())
}

fn spawn_worker<C: 'static>(
    wants_drop: &Arc<AtomicBool>,
    item_receiver: &Receiver<Item<C>>,
    commit_sender: &Sender<BoxedWorkOrder<C>>,
    shared: &Arc<Shared>,
    thread_index: usize,
) -> Result<JoinHandle<()>> {
    let wants_drop = wants_drop.clone();
    let item_receiver = item_receiver.clone();
    let commit_sender = commit_sender.clone();
    let shared = shared.clone();
    let thread_name = format!("AssetWorker {thread_index}");
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            info!("Starting asset worker '{thread_name}'");
            loop {
                let Ok(item) = item_receiver.recv() else {
                    error!("Asset worker '{thread_name}' failed to receive item");
                    break;
                };
                let mut order = match item {
                    Item::Wakeup if wants_drop.load(Ordering::SeqCst) => {
                        trace!("Asset worker '{thread_name}' wants to be dropped");
                        break;
                    }
                    Item::Wakeup => continue,
                    Item::Prepare(order) => order,
                };
                if wants_drop.load(Ordering::SeqCst) {
                    order.fail(shutdown_error());
                } else {
                    trace!("Asset worker '{thread_name}' prepares {} asset {}", order.type_tag(), order.key());
                    order.prepare(shared.storage.as_ref());
                    shared.statistics.prepared.increment();
                }

                if let Err(err) = commit_sender.send(order) {
                    error!("Asset worker '{thread_name}' failed to hand over a work order: {err}");
                    break;
                }
            }
            info!("Asset worker '{thread_name}' will stop now");
        })
        .map_err(|_| Error::FailedToStartWorkerPool)
}
