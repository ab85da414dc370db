//! Cooperative cancellation shared by the producer, stage workers and the orderer.
//!
//! A token carries a channel that never transports messages: cancelling drops
//! the only sender, which disconnects every receiver at once. Blocking queue
//! operations `select!` on that receiver so they wake up immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crossbeam_channel::{Receiver, Sender, select};

use crate::{Result, SealError};

#[derive(Debug)]
struct TokenInner {
    cancelled: AtomicBool,
    state: Mutex<TokenState>,
    signal: Receiver<()>,
}

#[derive(Debug)]
struct TokenState {
    trigger: Option<Sender<()>>,
    /// Children are held weakly so a dropped child costs the parent nothing.
    children: Vec<Weak<TokenInner>>,
}

/// Clonable cancellation signal. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (trigger, signal) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                state: Mutex::new(TokenState {
                    trigger: Some(trigger),
                    children: Vec::new(),
                }),
                signal,
            }),
        }
    }

    /// Creates a token that is cancelled whenever `self` is cancelled.
    ///
    /// Cancelling the child does not affect the parent.
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        let mut state = self.lock_state();
        if self.is_cancelled() {
            drop(state);
            child.cancel();
        } else {
            state.children.retain(|existing| {
                existing
                    .upgrade()
                    .is_some_and(|inner| !inner.cancelled.load(Ordering::Acquire))
            });
            state.children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    /// Signals cancellation. Idempotent.
    pub fn cancel(&self) {
        let children = {
            let mut state = self.lock_state();
            self.inner.cancelled.store(true, Ordering::Release);
            state.trigger.take();
            std::mem::take(&mut state.children)
        };
        for inner in children.iter().filter_map(Weak::upgrade) {
            Self { inner }.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SealError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Receiver that becomes disconnected when the token fires.
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    #[cfg(test)]
    fn child_count(&self) -> usize {
        self.lock_state().children.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Pushes `item` into a bounded queue, waiting for space unless cancelled.
///
/// A disconnected receiver means the downstream side already shut down,
/// which only happens on a faulted or cancelled run.
pub(crate) fn send<T>(tx: &Sender<T>, item: T, cancel: &CancellationToken) -> Result<()> {
    cancel.check()?;
    select! {
        send(tx, item) -> sent => sent.map_err(|_| SealError::Cancelled),
        recv(cancel.signal()) -> _ => Err(SealError::Cancelled),
    }
}

/// Pops the next item from a queue.
///
/// Returns `Ok(None)` once the queue is closed and drained.
pub(crate) fn recv<T>(rx: &Receiver<T>, cancel: &CancellationToken) -> Result<Option<T>> {
    cancel.check()?;
    select! {
        recv(rx) -> item => Ok(item.ok()),
        recv(cancel.signal()) -> _ => Err(SealError::Cancelled),
    }
}
