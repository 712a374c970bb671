//! Single-assignment futures and the `all`/`any`/`reduce` combinators
//! built on top of them.
//!
//! A [`Promise`] is the producer side of a completion cell and a [`Future`]
//! is the consumer side. The cell accepts exactly one completion; racing
//! producers lose quietly. Observers registered on a [`Completable`] run
//! exactly once with the terminal [`Outcome`], whether they were registered
//! before or after the completion happened.
//!
//! The [`composite`] module aggregates many completables into one
//! [`CompositeFuture`] that is itself completable, so composites nest.

use anyhow::Error;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, Waker};

pub mod composite;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;

pub use composite::{CompositeFuture, Policy, Slot, all, any, reduce};
pub use error::{BrokenPromise, Cause, CompositeError, ConfigError};

/// Callback invoked once with the terminal state of a completable
pub type Observer<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

/// Terminal state of a completable.
#[derive(Debug)]
pub enum Outcome<T> {
    Succeeded(Arc<T>),
    Failed(Cause),
}

impl<T> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Succeeded(value) => Self::Succeeded(Arc::clone(value)),
            Self::Failed(cause) => Self::Failed(cause.clone()),
        }
    }
}

impl<T> Outcome<T> {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            Self::Succeeded(value) => Some(value),
            Self::Failed(_) => None,
        }
    }

    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(cause) => Some(cause),
        }
    }

    pub fn into_result(self) -> Result<Arc<T>, Cause> {
        match self {
            Self::Succeeded(value) => Ok(value),
            Self::Failed(cause) => Err(cause),
        }
    }

    /// Keep the terminal kind, swapping the success value.
    pub(crate) fn with_value<U>(self, value: U) -> Outcome<U> {
        match self {
            Self::Succeeded(_) => Outcome::Succeeded(Arc::new(value)),
            Self::Failed(cause) => Outcome::Failed(cause),
        }
    }
}

/// The capability set shared by every future-like value in this crate.
///
/// Anything implementing it can be an input to [`all`], [`any`] and
/// [`reduce`], and everything those produce implements it again.
pub trait Completable: Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    /// Register `observer` to run once with the terminal state.
    ///
    /// If the completable is already terminal the observer runs immediately
    /// on the calling thread; otherwise it runs on the thread that completes
    /// it. No lock is held while it runs.
    fn observe(&self, observer: Observer<Self::Value>);

    /// Snapshot of the terminal state, `None` while pending
    fn outcome(&self) -> Option<Outcome<Self::Value>>;

    fn is_complete(&self) -> bool {
        self.outcome().is_some()
    }

    fn succeeded(&self) -> bool {
        self.outcome().is_some_and(|outcome| outcome.succeeded())
    }

    fn failed(&self) -> bool {
        self.outcome().is_some_and(|outcome| outcome.failed())
    }

    fn value(&self) -> Option<Arc<Self::Value>> {
        self.outcome().and_then(|outcome| outcome.into_result().ok())
    }

    fn cause(&self) -> Option<Cause> {
        self.outcome().and_then(|outcome| outcome.into_result().err())
    }

    /// Like [`Completable::observe`], but the callback is handed to the
    /// configured [`dispatch`] scheduler instead of running inline.
    fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(Outcome<Self::Value>) + Send + 'static,
        Self: Sized,
    {
        self.observe(Box::new(move |outcome| {
            dispatch::dispatch(Box::new(move || f(outcome)));
        }));
    }
}

struct Waiters<T> {
    observers: Vec<Observer<T>>,
    wakers: Vec<Waker>,
    /// Set once the observer list has been drained by the completing thread
    delivered: bool,
}

/// The shared completion cell behind [`Promise`], [`Future`] and the
/// aggregate outcome of a [`CompositeFuture`].
///
/// `outcome` is the single claim: whoever manages to `set` it owns the
/// transition and drains `waiters`. Registration checks `delivered` under
/// the waiters lock, so an observer either lands in the list before the
/// drain or sees the published outcome afterwards.
pub(crate) struct Core<T> {
    outcome: OnceLock<Outcome<T>>,
    waiters: Mutex<Waiters<T>>,
    producers: AtomicUsize,
}

impl<T> Core<T> {
    pub(crate) fn new() -> Self {
        Self {
            outcome: OnceLock::new(),
            waiters: Mutex::new(Waiters {
                observers: Vec::new(),
                wakers: Vec::new(),
                delivered: false,
            }),
            producers: AtomicUsize::new(0),
        }
    }

    fn completed(outcome: Outcome<T>) -> Self {
        Self {
            outcome: OnceLock::from(outcome),
            waiters: Mutex::new(Waiters {
                observers: Vec::new(),
                wakers: Vec::new(),
                delivered: true,
            }),
            producers: AtomicUsize::new(0),
        }
    }

    pub(crate) fn get(&self) -> Option<&Outcome<T>> {
        self.outcome.get()
    }

    /// Returns `false` if another completion got there first.
    pub(crate) fn complete(&self, outcome: Outcome<T>) -> bool {
        let delivered = outcome.clone();
        if self.outcome.set(outcome).is_err() {
            tracing::trace!("completion lost the race; future already terminal");
            return false;
        }

        let (observers, wakers) = {
            let mut waiters = self.waiters.lock();
            waiters.delivered = true;
            (
                std::mem::take(&mut waiters.observers),
                std::mem::take(&mut waiters.wakers),
            )
        };

        // A panicking observer must not starve the ones behind it.
        let mut first_panic = None;
        for observer in observers {
            let outcome = delivered.clone();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || observer(outcome))) {
                tracing::debug!("observer panicked; delivering to the rest first");
                first_panic.get_or_insert(payload);
            }
        }
        for waker in wakers {
            waker.wake();
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
        true
    }

    pub(crate) fn observe(&self, observer: Observer<T>) {
        {
            let mut waiters = self.waiters.lock();
            if !waiters.delivered {
                waiters.observers.push(observer);
                return;
            }
        }
        if let Some(outcome) = self.outcome.get() {
            observer(outcome.clone());
        }
    }

    pub(crate) fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<Outcome<T>> {
        if let Some(outcome) = self.outcome.get() {
            return Poll::Ready(outcome.clone());
        }

        let mut waiters = self.waiters.lock();
        if !waiters.delivered {
            if !waiters.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                waiters.wakers.push(cx.waker().clone());
            }
            return Poll::Pending;
        }
        drop(waiters);

        match self.outcome.get() {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => Poll::Pending,
        }
    }

    fn state_name(&self) -> &'static str {
        match self.outcome.get() {
            None => "pending",
            Some(Outcome::Succeeded(_)) => "succeeded",
            Some(Outcome::Failed(_)) => "failed",
        }
    }
}

/// Producer handle of a completion cell.
///
/// Clones are additional producers racing to complete the same future; the
/// first `ok`/`err`/`result` wins and the others return `false`. When the
/// last producer is dropped while the future is still pending, the future
/// fails with [`BrokenPromise`].
pub struct Promise<T> {
    core: Arc<Core<T>>,
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        let core = Core::new();
        core.producers.store(1, Ordering::Relaxed);
        Self {
            core: Arc::new(core),
        }
    }

    pub fn get_future(&self) -> Future<T> {
        Future {
            core: Arc::clone(&self.core),
        }
    }

    pub fn ok(&self, value: T) -> bool {
        self.complete(Outcome::Succeeded(Arc::new(value)))
    }

    pub fn err(&self, err: Error) -> bool {
        self.complete(Outcome::Failed(err.into()))
    }

    pub fn result(&self, result: Result<T, Error>) -> bool {
        match result {
            Ok(value) => self.ok(value),
            Err(err) => self.err(err),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.core.get().is_some()
    }

    /// Complete with an outcome that already exists elsewhere, so a
    /// propagated [`Cause`] keeps its identity.
    pub(crate) fn complete(&self, outcome: Outcome<T>) -> bool {
        self.core.complete(outcome)
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        self.core.producers.fetch_add(1, Ordering::Relaxed);
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.core.producers.fetch_sub(1, Ordering::AcqRel) == 1 && self.core.get().is_none() {
            tracing::debug!("last promise handle dropped before completion");
            self.core
                .complete(Outcome::Failed(Error::new(BrokenPromise {}).into()));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.core.state_name())
            .finish_non_exhaustive()
    }
}

/// Consumer handle of a completion cell; cheap to clone.
pub struct Future<T> {
    core: Arc<Core<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("state", &self.core.state_name())
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Future<T> {
    /// Create a leaf future which is immediately ready with
    /// the provided value
    pub fn ok(value: T) -> Self {
        Self::result(Ok(value))
    }

    /// Create a leaf future which is immediately ready with
    /// the provided error
    pub fn err(err: Error) -> Self {
        Self::result(Err(err))
    }

    /// Create a leaf future which is immediately ready with
    /// the provided result
    pub fn result(result: Result<T, Error>) -> Self {
        let outcome = match result {
            Ok(value) => Outcome::Succeeded(Arc::new(value)),
            Err(err) => Outcome::Failed(err.into()),
        };
        Self {
            core: Arc::new(Core::completed(outcome)),
        }
    }

    /// Derive a future holding `f` applied to this one's value.
    /// A failure is passed through untouched and `f` never runs.
    pub fn map<U, F>(&self, f: F) -> Future<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let promise = Promise::new();
        let future = promise.get_future();
        self.observe(Box::new(move |outcome| match outcome {
            Outcome::Succeeded(value) => {
                promise.ok(f(&value));
            }
            Outcome::Failed(cause) => {
                promise.complete(Outcome::Failed(cause));
            }
        }));
        future
    }
}

impl<T: Send + Sync + 'static> Completable for Future<T> {
    type Value = T;

    fn observe(&self, observer: Observer<T>) {
        self.core.observe(observer);
    }

    fn outcome(&self) -> Option<Outcome<T>> {
        self.core.get().cloned()
    }
}

impl<T: Send + Sync + 'static> std::future::Future for Future<T> {
    type Output = Result<Arc<T>, Cause>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<Self::Output> {
        self.core.poll_outcome(ctx).map(Outcome::into_result)
    }
}
