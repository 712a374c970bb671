//! Pluggable execution of completion callbacks.
//!
//! The completion core never decides *where* a callback registered through
//! [`Completable::on_complete`](crate::Completable::on_complete) runs; it
//! hands a [`Job`] to [`dispatch`], which forwards it to whatever scheduler
//! the embedding application installed with [`set_scheduler`]. Without a
//! scheduler the job runs inline on the completing thread.

use crate::config::DispatchConfig;
use crate::{Future, Promise};
use anyhow::Result;
use flume::{Receiver, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub type Job = Box<dyn FnOnce() + Send>;
pub type ScheduleFunc = Box<dyn Fn(Job) + Send + Sync + 'static>;

lazy_static::lazy_static! {
    static ref SCHEDULER: Mutex<Option<Arc<ScheduleFunc>>> = Mutex::new(None);
}

static SCHEDULER_CONFIGURED: AtomicBool = AtomicBool::new(false);

pub fn is_scheduler_configured() -> bool {
    SCHEDULER_CONFIGURED.load(Ordering::Relaxed)
}

/// Route every dispatched job through `func`.
/// The embedding application decides which thread or loop runs the job;
/// `func` only has to accept it.
pub fn set_scheduler(func: ScheduleFunc) {
    *SCHEDULER.lock() = Some(Arc::new(func));
    SCHEDULER_CONFIGURED.store(true, Ordering::Relaxed);
}

/// Go back to running dispatched jobs inline.
pub fn clear_scheduler() {
    SCHEDULER.lock().take();
    SCHEDULER_CONFIGURED.store(false, Ordering::Relaxed);
}

/// Hand `job` to the configured scheduler, or run it inline.
pub fn dispatch(job: Job) {
    // Clone out of the lock so a scheduler that runs the job inline may
    // dispatch again without deadlocking.
    let scheduler = SCHEDULER.lock().as_ref().map(Arc::clone);
    match scheduler {
        Some(func) => func(job),
        None => job(),
    }
}

/// Run `f` on a new thread and complete the returned future with its
/// result. Can be called from any thread.
pub fn spawn_into_new_thread<F, T>(f: F) -> Future<T>
where
    F: FnOnce() -> Result<T>,
    F: Send + 'static,
    T: Send + Sync + 'static,
{
    let promise = Promise::new();
    let future = promise.get_future();
    std::thread::spawn(move || {
        promise.result(f());
    });
    future
}

/// Block the current thread until the passed future completes.
pub use async_io::block_on;

/// A scheduler that queues dispatched jobs until the owner runs them.
///
/// Creating one installs it as the global scheduler. Dispatching never
/// blocks: a job that finds the queue full, or the executor dropped, runs
/// inline on the dispatching thread.
pub struct QueueExecutor {
    rx: Receiver<Job>,
}

impl Default for QueueExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueExecutor {
    pub fn new() -> Self {
        Self::with_config(&DispatchConfig::default())
    }

    pub fn with_config(config: &DispatchConfig) -> Self {
        let (tx, rx) = match config.queue_capacity {
            Some(capacity) => flume::bounded(capacity),
            None => flume::unbounded(),
        };

        set_scheduler(Box::new(move |job: Job| {
            match tx.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(job)) => {
                    tracing::debug!("dispatch queue full; running job inline");
                    job();
                }
                Err(TrySendError::Disconnected(job)) => {
                    tracing::debug!("dispatch queue closed; running job inline");
                    job();
                }
            }
        }));
        Self { rx }
    }

    /// Wait for one job and run it.
    pub fn tick(&self) -> anyhow::Result<()> {
        match self.rx.recv() {
            Ok(job) => job(),
            Err(err) => anyhow::bail!("while waiting for events: {:?}", err),
        };
        Ok(())
    }

    /// Run one queued job if there is one.
    pub fn try_tick(&self) -> bool {
        match self.rx.try_recv() {
            Ok(job) => {
                job();
                true
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
        }
    }

    /// Run queued jobs, including ones queued while running, until the
    /// queue is empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.try_tick() {
            ran += 1;
        }
        ran
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
