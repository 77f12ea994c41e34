//! Deferred Completion Handle
//!
//! A single-assignment handle that settles exactly once with either a value
//! or an error. Clones share the same underlying state, so the side that
//! settles and the side that waits can live in different tasks.
//!
//! Settling an already-settled handle is a no-op: the first outcome wins and
//! every waiter observes it.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Settlement state of a [`Deferred`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredState<T, E> {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Resolved(T),
    /// Settled with an error.
    Rejected(E),
}

impl<T, E> DeferredState<T, E> {
    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

type Continuation<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

struct Inner<T, E> {
    state: Mutex<DeferredState<T, E>>,
    continuations: Mutex<Vec<Continuation<T, E>>>,
    notify: Notify,
}

/// Single-assignment value/error handle.
///
/// # Example
///
/// ```rust
/// use realtime_client::domain::deferred::Deferred;
///
/// # tokio_test::block_on(async {
/// let deferred: Deferred<u32, String> = Deferred::new();
/// let waiter = deferred.clone();
///
/// assert!(deferred.resolve(7));
/// assert!(!deferred.reject("too late".to_string()));
/// assert_eq!(waiter.await, Ok(7));
/// # });
/// ```
pub struct Deferred<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl<T, E> Default for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a pending handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DeferredState::Pending),
                continuations: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Create a handle already resolved with `value`.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        let deferred = Self::new();
        deferred.resolve(value);
        deferred
    }

    /// Create a handle already rejected with `error`.
    #[must_use]
    pub fn rejected(error: E) -> Self {
        let deferred = Self::new();
        deferred.reject(error);
        deferred
    }

    /// Settle with a value. Returns `false` if the handle was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(DeferredState::Resolved(value))
    }

    /// Settle with an error. Returns `false` if the handle was already settled.
    pub fn reject(&self, error: E) -> bool {
        self.settle(DeferredState::Rejected(error))
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> DeferredState<T, E> {
        self.inner.state.lock().clone()
    }

    /// Whether the handle is still pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.inner.state.lock().is_settled()
    }

    /// Whether two handles share the same underlying state.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attach a continuation that runs once with the outcome.
    ///
    /// Runs immediately on the calling thread if the handle is already settled.
    pub fn on_settled<F>(&self, continuation: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        let outcome = {
            let state = self.inner.state.lock();
            match &*state {
                DeferredState::Pending => {
                    // register while holding the state lock so settle() cannot slip in between
                    self.inner
                        .continuations
                        .lock()
                        .push(Box::new(continuation));
                    return;
                }
                DeferredState::Resolved(value) => Ok(value.clone()),
                DeferredState::Rejected(error) => Err(error.clone()),
            }
        };
        continuation(outcome);
    }

    /// Wait for the outcome.
    pub async fn wait(&self) -> Result<T, E> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.outcome() {
                return outcome;
            }

            notified.await;
        }
    }

    /// Outcome if settled, `None` while pending.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<T, E>> {
        match &*self.inner.state.lock() {
            DeferredState::Pending => None,
            DeferredState::Resolved(value) => Some(Ok(value.clone())),
            DeferredState::Rejected(error) => Some(Err(error.clone())),
        }
    }

    /// Handle that settles with the outcome of whichever input settles first.
    ///
    /// An empty input produces a handle that never settles.
    #[must_use]
    pub fn race<I>(deferreds: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let winner = Self::new();
        for deferred in deferreds {
            let winner = winner.clone();
            deferred.on_settled(move |outcome| {
                match outcome {
                    Ok(value) => winner.resolve(value),
                    Err(error) => winner.reject(error),
                };
            });
        }
        winner
    }

    fn settle(&self, next: DeferredState<T, E>) -> bool {
        let (continuations, outcome) = {
            let mut state = self.inner.state.lock();
            if state.is_settled() {
                tracing::debug!("Ignoring settlement of an already settled deferred");
                return false;
            }
            let outcome = match &next {
                DeferredState::Resolved(value) => Ok(value.clone()),
                DeferredState::Rejected(error) => Err(error.clone()),
                DeferredState::Pending => return false,
            };
            *state = next;
            let continuations = std::mem::take(&mut *self.inner.continuations.lock());
            (continuations, outcome)
        };

        self.inner.notify.notify_waiters();
        for continuation in continuations {
            continuation(outcome.clone());
        }
        true
    }
}

impl<T, E> IntoFuture for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}
