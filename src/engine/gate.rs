use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, MutexGuard};

use crate::observability::{GATE_WAITERS, GATE_WAIT_SECONDS};

/// FIFO mutual exclusion around the value it owns.
///
/// Waiters are granted access strictly in arrival order (tokio's mutex queues
/// lock requests fairly). Access ends when the returned [`GateGuard`] is
/// dropped, so every exit path of a critical section releases the gate.
pub struct ConcurrencyGate<T> {
    inner: Mutex<T>,
    waiting: AtomicUsize,
}

/// Exclusive access to the gated value.
pub struct GateGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

/// Decrements the waiter count even if the acquiring future is dropped.
struct WaitTicket<'a>(&'a AtomicUsize);

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        let left = self.0.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!(GATE_WAITERS).set(left as f64);
    }
}

impl<T> ConcurrencyGate<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Suspend until every earlier caller has released, then take the gate.
    pub async fn acquire(&self) -> GateGuard<'_, T> {
        let queued = self.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!(GATE_WAITERS).set(queued as f64);
        let ticket = WaitTicket(&self.waiting);
        let started = Instant::now();

        let guard = self.inner.lock().await;

        drop(ticket);
        metrics::histogram!(GATE_WAIT_SECONDS).record(started.elapsed().as_secs_f64());
        GateGuard { guard }
    }

    /// Take the gate only if it is idle.
    pub fn try_acquire(&self) -> Option<GateGuard<'_, T>> {
        self.inner.try_lock().ok().map(|guard| GateGuard { guard })
    }

    /// Callers currently suspended in [`acquire`](Self::acquire).
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

impl<T> GateGuard<'_, T> {
    /// Hand the gate to the next waiter, or leave it idle.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for GateGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for GateGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
