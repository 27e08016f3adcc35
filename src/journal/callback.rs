//! Ordered callback executor: a hash-striped set of single-consumer
//! queues so that callbacks for the same `ctx` (ledger id) are always
//! dispatched in FIFO order, while different ledgers' callbacks run
//! concurrently across stripes.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct OrderedCallbackExecutor {
    senders: Vec<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl OrderedCallbackExecutor {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        let mut senders = Vec::with_capacity(stripes);
        let mut handles = Vec::with_capacity(stripes);
        for i in 0..stripes {
            let (tx, rx) = channel::unbounded::<Job>();
            let handle = std::thread::Builder::new()
                .name(format!("bk-journal-callback-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .expect("failed to spawn journal callback thread");
            senders.push(tx);
            handles.push(handle);
        }
        OrderedCallbackExecutor { senders, handles }
    }

    /// Routes `job` to the stripe owning `ctx`, preserving FIFO order
    /// for repeated submissions with the same `ctx`.
    pub fn submit(&self, ctx: u64, job: Job) {
        let idx = (ctx as usize) % self.senders.len();
        // The receiving end only ever disconnects during shutdown,
        // which happens after the writer/force-write threads have
        // already stopped submitting; a send failure here would mean
        // a callback raced shutdown and is dropped, matching the
        // documented shutdown-only behavior.
        let _ = self.senders[idx].send(job);
    }

    pub fn stripe_count(&self) -> usize {
        self.senders.len()
    }

    /// Closes all stripes and waits up to `grace` for every worker to
    /// drain its queue and exit. Workers still running after `grace`
    /// are left to finish in the background; this call returns either
    /// way, so `shutdown()` never hangs indefinitely on a stuck callback.
    pub fn shutdown(mut self, grace: Duration) {
        self.senders.clear();
        let handles = std::mem::take(&mut self.handles);
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        std::thread::spawn(move || {
            for handle in handles {
                let _ = handle.join();
            }
            let _ = done_tx.send(());
        });
        if done_rx.recv_timeout(grace).is_err() {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "callback executor grace period elapsed; abandoning outstanding callbacks"
            );
        }
    }
}
