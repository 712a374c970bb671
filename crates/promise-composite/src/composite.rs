//! Composite futures: one outcome derived from many inputs.
//!
//! A [`CompositeFuture`] observes an ordered list of [`Completable`] inputs
//! (its *slots*), records each slot's terminal state as it arrives, and
//! completes its own outcome once the [`Policy`] is satisfied:
//!
//! ```text
//! Policy::All ── first failure ──────────► Failed(cause of that slot)
//!             └─ N-th success ───────────► Succeeded
//! Policy::Any ── first success ──────────► Succeeded
//!             └─ N-th failure ───────────► Failed(cause of that slot)
//! ```
//!
//! Slot values are stored type-erased, so inputs of different value types
//! mix freely; [`CompositeFuture::result`] names the expected type at the
//! read site and yields `None` on a mismatch.
//!
//! # Example
//!
//! ```ignore
//! let composite = promise_composite::all!(Future::ok(5i32), Future::ok("x"));
//! assert!(composite.succeeded());
//! assert_eq!(*composite.result::<i32>(0)?.unwrap(), 5);
//! ```

use crate::{Cause, Completable, CompositeError, Core, Future, Observer, Outcome, Promise};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

/// Termination rule of a composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Succeed once every slot succeeded; fail on the first failure.
    All,
    /// Succeed on the first success; fail once every slot failed.
    Any,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Any => f.write_str("any"),
        }
    }
}

type ErasedValue = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
enum SlotState {
    Succeeded(ErasedValue),
    Failed(Cause),
}

trait ErasedCompletable: Send + Sync {
    fn observe_erased(&self, observer: Box<dyn FnOnce(SlotState) + Send>);
}

impl<C: Completable> ErasedCompletable for C {
    fn observe_erased(&self, observer: Box<dyn FnOnce(SlotState) + Send>) {
        self.observe(Box::new(move |outcome| {
            observer(match outcome {
                Outcome::Succeeded(value) => SlotState::Succeeded(value),
                Outcome::Failed(cause) => SlotState::Failed(cause),
            });
        }));
    }
}

/// A type-erased composite input. Every [`Completable`] converts into one.
pub struct Slot {
    inner: Box<dyn ErasedCompletable>,
}

impl<C: Completable> From<C> for Slot {
    fn from(completable: C) -> Self {
        Self {
            inner: Box::new(completable),
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").finish_non_exhaustive()
    }
}

struct Inner {
    policy: Policy,
    /// Write-once snapshot per input; unset while the input is pending
    slots: Box<[OnceLock<SlotState>]>,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    outcome: Core<()>,
}

impl Inner {
    fn on_slot_complete(&self, index: usize, state: SlotState) {
        let cause = match &state {
            SlotState::Succeeded(_) => None,
            SlotState::Failed(cause) => Some(cause.clone()),
        };
        // The snapshot is published before the counters move, so whoever
        // observes the final count also observes every slot.
        if self.slots[index].set(state).is_err() {
            tracing::debug!(index, "slot completed twice; ignoring");
            return;
        }

        let size = self.slots.len();
        match (self.policy, cause) {
            (Policy::All, Some(cause)) => {
                self.failed.fetch_add(1, Ordering::AcqRel);
                self.decide(index, Outcome::Failed(cause));
            }
            (Policy::All, None) => {
                if self.succeeded.fetch_add(1, Ordering::AcqRel) + 1 == size {
                    self.decide(index, Outcome::Succeeded(Arc::new(())));
                }
            }
            (Policy::Any, None) => {
                self.succeeded.fetch_add(1, Ordering::AcqRel);
                self.decide(index, Outcome::Succeeded(Arc::new(())));
            }
            (Policy::Any, Some(cause)) => {
                if self.failed.fetch_add(1, Ordering::AcqRel) + 1 == size {
                    self.decide(index, Outcome::Failed(cause));
                }
            }
        }
    }

    fn decide(&self, index: usize, outcome: Outcome<()>) {
        let succeeded = outcome.succeeded();
        if self.outcome.complete(outcome) {
            tracing::debug!(
                policy = %self.policy,
                index,
                size = self.slots.len(),
                succeeded,
                "composite decided"
            );
        }
    }
}

/// The aggregate of an ordered list of completables.
///
/// It is itself a [`Completable`] whose value is the composite, so it can
/// be awaited, observed, or fed into another combinator.
#[derive(Clone)]
pub struct CompositeFuture {
    inner: Arc<Inner>,
}

impl CompositeFuture {
    fn new(policy: Policy, inputs: Vec<Slot>) -> Self {
        let size = inputs.len();
        let composite = Self {
            inner: Arc::new(Inner {
                policy,
                slots: (0..size).map(|_| OnceLock::new()).collect(),
                succeeded: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                outcome: Core::new(),
            }),
        };

        if size == 0 {
            tracing::trace!(%policy, "empty composite completes immediately");
            composite.inner.outcome.complete(Outcome::Succeeded(Arc::new(())));
            return composite;
        }

        for (index, slot) in inputs.iter().enumerate() {
            let inner = Arc::clone(&composite.inner);
            slot.inner
                .observe_erased(Box::new(move |state| inner.on_slot_complete(index, state)));
        }
        composite
    }

    pub fn policy(&self) -> Policy {
        self.inner.policy
    }

    /// Number of inputs
    pub fn size(&self) -> usize {
        self.inner.slots.len()
    }

    /// Number of inputs that have reached a terminal state so far
    pub fn completed_count(&self) -> usize {
        self.inner.succeeded.load(Ordering::Acquire) + self.inner.failed.load(Ordering::Acquire)
    }

    fn slot(&self, index: usize) -> Result<Option<&SlotState>, CompositeError> {
        self.inner
            .slots
            .get(index)
            .map(OnceLock::get)
            .ok_or(CompositeError::IndexOutOfRange {
                index,
                size: self.size(),
            })
    }

    pub fn succeeded_at(&self, index: usize) -> Result<bool, CompositeError> {
        Ok(matches!(self.slot(index)?, Some(SlotState::Succeeded(_))))
    }

    pub fn failed_at(&self, index: usize) -> Result<bool, CompositeError> {
        Ok(matches!(self.slot(index)?, Some(SlotState::Failed(_))))
    }

    pub fn is_complete_at(&self, index: usize) -> Result<bool, CompositeError> {
        Ok(self.slot(index)?.is_some())
    }

    /// Failure of input `index`, `None` unless that input failed
    pub fn cause_at(&self, index: usize) -> Result<Option<Cause>, CompositeError> {
        Ok(match self.slot(index)? {
            Some(SlotState::Failed(cause)) => Some(cause.clone()),
            _ => None,
        })
    }

    /// Value of input `index` as a `T`.
    ///
    /// `None` while the input is pending, when it failed, or when its value
    /// is not a `T`.
    pub fn result<T>(&self, index: usize) -> Result<Option<Arc<T>>, CompositeError>
    where
        T: Any + Send + Sync,
    {
        Ok(match self.slot(index)? {
            Some(SlotState::Succeeded(value)) => Arc::clone(value).downcast::<T>().ok(),
            _ => None,
        })
    }

    /// [`CompositeFuture::result`] for every index, in input order
    pub fn list<T>(&self) -> Vec<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        (0..self.size())
            .map(|index| self.result::<T>(index).ok().flatten())
            .collect()
    }
}

impl Completable for CompositeFuture {
    type Value = CompositeFuture;

    fn observe(&self, observer: Observer<CompositeFuture>) {
        // Weak, since the observer is stored inside `inner` until delivery.
        // Delivery always runs while some slot observer or caller holds `inner`.
        let inner = Arc::downgrade(&self.inner);
        self.inner.outcome.observe(Box::new(move |outcome| {
            if let Some(inner) = inner.upgrade() {
                observer(outcome.with_value(CompositeFuture { inner }));
            }
        }));
    }

    fn outcome(&self) -> Option<Outcome<CompositeFuture>> {
        self.inner
            .outcome
            .get()
            .map(|outcome| outcome.clone().with_value(self.clone()))
    }
}

impl std::future::Future for CompositeFuture {
    type Output = Result<CompositeFuture, Cause>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<Self::Output> {
        let this: &CompositeFuture = &self;
        match this.inner.outcome.poll_outcome(ctx) {
            Poll::Ready(Outcome::Succeeded(_)) => Poll::Ready(Ok(this.clone())),
            Poll::Ready(Outcome::Failed(cause)) => Poll::Ready(Err(cause)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for CompositeFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeFuture")
            .field("policy", &self.inner.policy)
            .field("size", &self.size())
            .field("state", &self.inner.outcome.state_name())
            .finish_non_exhaustive()
    }
}

/// Succeeds when every input succeeds; fails as soon as any input fails.
///
/// An empty input list yields a composite that has already succeeded.
pub fn all<I>(inputs: I) -> CompositeFuture
where
    I: IntoIterator,
    I::Item: Into<Slot>,
{
    CompositeFuture::new(Policy::All, inputs.into_iter().map(Into::into).collect())
}

/// Succeeds as soon as any input succeeds; fails once every input failed,
/// with the cause of the last input to fail.
///
/// An empty input list yields a composite that has already succeeded.
pub fn any<I>(inputs: I) -> CompositeFuture
where
    I: IntoIterator,
    I::Item: Into<Slot>,
{
    CompositeFuture::new(Policy::Any, inputs.into_iter().map(Into::into).collect())
}

/// Fold the values of `inputs` in input order, starting from `zero`.
///
/// The fold runs once, after every input succeeded, regardless of the order
/// in which they completed. If an input fails, the result fails with the
/// same cause the [`all`] composite reports and `reducer` never runs.
pub fn reduce<T, U, C, I, F>(zero: U, mut reducer: F, inputs: I) -> Future<U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
    C: Completable<Value = T>,
    I: IntoIterator<Item = C>,
    F: FnMut(U, &T) -> U + Send + 'static,
{
    let composite = all(inputs);
    let promise = Promise::new();
    let future = promise.get_future();

    composite.observe(Box::new(move |outcome| match outcome {
        Outcome::Succeeded(composite) => {
            // Every slot holds a `T` once the composite has succeeded.
            let value = (0..composite.size())
                .filter_map(|index| composite.result::<T>(index).ok().flatten())
                .fold(zero, |acc, value| reducer(acc, &*value));
            promise.ok(value);
        }
        Outcome::Failed(cause) => {
            promise.complete(Outcome::Failed(cause));
        }
    }));
    future
}

/// Fixed-arity form of [`all`](crate::composite::all); inputs may have
/// different value types.
///
/// `all!(a, b, c)` is exactly `all([Slot::from(a), Slot::from(b), Slot::from(c)])`.
#[macro_export]
macro_rules! all {
    ($($input:expr),+ $(,)?) => {
        $crate::composite::all([$($crate::composite::Slot::from($input)),+])
    };
}

/// Fixed-arity form of [`any`](crate::composite::any).
#[macro_export]
macro_rules! any {
    ($($input:expr),+ $(,)?) => {
        $crate::composite::any([$($crate::composite::Slot::from($input)),+])
    };
}

/// Fixed-arity form of [`reduce`](crate::composite::reduce):
/// `reduce!(zero, reducer; a, b, c)`.
#[macro_export]
macro_rules! reduce {
    ($zero:expr, $reducer:expr; $($input:expr),+ $(,)?) => {
        $crate::composite::reduce($zero, $reducer, [$($input),+])
    };
}
