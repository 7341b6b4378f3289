//! Ordered execution lanes.
//!
//! A [`SerialLane`] is a single consumer task fed by an unbounded channel.
//! Jobs dispatched to one lane run one at a time in dispatch order, no
//! matter which thread dispatched them. Lanes are independent of each
//! other. The [`BackgroundLane`] runs work concurrently.

use crate::error::{DdpError, DdpResult};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum LaneCommand {
    Run(Job),
    Flush(oneshot::Sender<()>),
}

/// A FIFO lane that runs at most one job at a time.
pub struct SerialLane {
    name: &'static str,
    tx: mpsc::UnboundedSender<LaneCommand>,
    dispatched: AtomicU64,
}

impl SerialLane {
    /// Spawns the lane's consumer task on `handle`.
    pub fn spawn(name: &'static str, handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LaneCommand>();
        handle.spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    LaneCommand::Run(job) => {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!(lane = name, "lane job panicked");
                        }
                    }
                    LaneCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            trace!(lane = name, "lane closed");
        });
        Self {
            name,
            tx,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Lane name, for logging.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queues a job. Returns false if the lane has shut down.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        self.tx.send(LaneCommand::Run(Box::new(job))).is_ok()
    }

    /// Number of jobs dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Waits until every job queued before this call has run.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(LaneCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// A lane with no ordering guarantees.
#[derive(Clone)]
pub struct BackgroundLane {
    handle: Handle,
}

impl BackgroundLane {
    /// Creates a background lane on `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Runs a blocking-free closure concurrently with everything else.
    pub fn run(&self, job: impl FnOnce() + Send + 'static) {
        self.handle.spawn(async move {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!(lane = "background", "background job panicked");
            }
        });
    }

    /// Spawns a future.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

/// The fixed set of lanes a client runs on.
pub(crate) struct Lanes {
    /// Outbound `sub`/`unsub` sends and subscription table updates.
    pub(crate) subscriptions: SerialLane,
    /// Inbound frame processing.
    pub(crate) inbound: SerialLane,
    /// Method result delivery.
    pub(crate) callbacks: SerialLane,
    /// Collection change and data-event observers.
    pub(crate) notify: SerialLane,
    pub(crate) background: BackgroundLane,
}

impl Lanes {
    pub(crate) fn new() -> DdpResult<Self> {
        let handle = Handle::try_current().map_err(|_| DdpError::NoRuntime)?;
        Ok(Self {
            subscriptions: SerialLane::spawn("subscriptions", &handle),
            inbound: SerialLane::spawn("inbound", &handle),
            callbacks: SerialLane::spawn("callbacks", &handle),
            notify: SerialLane::spawn("notify", &handle),
            background: BackgroundLane::new(handle),
        })
    }

    fn dispatched(&self) -> u64 {
        self.subscriptions.dispatched()
            + self.inbound.dispatched()
            + self.callbacks.dispatched()
            + self.notify.dispatched()
    }

    /// Flushes every serial lane until a full round queues no new work.
    pub(crate) async fn settle(&self) {
        loop {
            let before = self.dispatched();
            self.inbound.flush().await;
            self.subscriptions.flush().await;
            self.callbacks.flush().await;
            self.notify.flush().await;
            if self.dispatched() == before {
                break;
            }
        }
    }
}
