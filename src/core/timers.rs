//! # Cancellable delayed actions.
//!
//! A [`Timer`] is a tokio task that sleeps and then posts a message back to
//! the runtime's mailbox. The message carries the timer id, so a firing that
//! raced with a cancellation can be recognised as stale and ignored.
//!
//! ```text
//! arm(delay) ──► sleep ──► tx.send(make(id))
//!      │
//!      └── drop / cancel ──► token.cancel() (task exits without sending)
//! ```
//!
//! [`TimerSet`] keys timers (restart timers are keyed by uid); arming a key
//! that already has a timer replaces it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Identity of one armed timer.
pub(crate) type TimerId = u64;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// A one-shot delayed message. Dropping the timer cancels it.
#[derive(Debug)]
pub(crate) struct Timer {
    id: TimerId,
    token: CancellationToken,
}

impl Timer {
    /// Arms a timer that sends `make(id)` on `tx` after `delay`.
    pub(crate) fn arm<T, F>(delay: Duration, tx: mpsc::UnboundedSender<T>, make: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(TimerId) -> T + Send + 'static,
    {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let child = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = child.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(make(id));
                }
            }
        });

        Self { id, token }
    }

    #[inline]
    pub(crate) fn id(&self) -> TimerId {
        self.id
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Timers keyed by `K`; at most one per key.
#[derive(Debug)]
pub(crate) struct TimerSet<K> {
    timers: HashMap<K, Timer>,
}

impl<K: Eq + Hash> Default for TimerSet<K> {
    fn default() -> Self {
        Self {
            timers: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> TimerSet<K> {
    /// Stores `timer` under `key`, cancelling any previous one.
    pub(crate) fn arm(&mut self, key: K, timer: Timer) {
        self.timers.insert(key, timer);
    }

    /// Cancels the timer under `key`, if any.
    pub(crate) fn cancel(&mut self, key: &K) -> bool {
        self.timers.remove(key).is_some()
    }

    /// Removes the timer under `key` if it is the one that fired.
    ///
    /// Returns `false` for a stale firing.
    pub(crate) fn take_fired(&mut self, key: &K, id: TimerId) -> bool {
        match self.timers.get(key) {
            Some(t) if t.id() == id => {
                // already elapsed; dropping only cancels a finished task
                self.timers.remove(key);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    /// Cancels every timer.
    pub(crate) fn clear(&mut self) {
        self.timers.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }
}
