//! Request/response correlation.
//!
//! One [`Correlator`] per connection: it allocates sequence ids, tracks the
//! outstanding waiters, and routes each incoming response to exactly one of
//! them. Waiters are registered strictly before the request frame is
//! transmitted, so a response can never beat its waiter into the table.
//!
//! Application threads insert-and-wait; the I/O task looks up and resolves.
//! The table is a concurrent map and no lock is held across the wait itself.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{BeanwireError, Result};
use crate::wire::WireValue;

/// Callback pair for one asynchronous-mode request.
///
/// The boxes sit in the shared waiter table until delivery, so they must be
/// `Sync` as well as `Send`.
pub struct Callbacks {
    /// Invoked with the result value on success.
    pub on_success: Box<dyn FnOnce(WireValue) + Send + Sync>,
    /// Invoked with the error on failure (carried failure, close, ...).
    pub on_failure: Box<dyn FnOnce(BeanwireError) + Send + Sync>,
}

enum Waiter {
    /// Synchronous caller blocked on a oneshot slot.
    Sync(oneshot::Sender<Result<WireValue>>),
    /// Asynchronous caller with per-operation callbacks.
    Async(Callbacks),
}

/// Per-connection correlation state.
pub struct Correlator {
    next_seq: AtomicU32,
    waiters: DashMap<u32, Waiter>,
}

impl Correlator {
    /// Create an empty correlator starting at sequence id 1.
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU32::new(1),
            waiters: DashMap::new(),
        }
    }

    /// Allocate the next sequence id. Monotonically increasing; an id is
    /// never reassigned while its waiter is outstanding.
    pub fn next_seq(&self) -> u32 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a synchronous waiter for `seq`. Must happen before the
    /// request frame is written.
    pub fn register_sync(&self, seq: u32) -> oneshot::Receiver<Result<WireValue>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(seq, Waiter::Sync(tx));
        rx
    }

    /// Register asynchronous callbacks for `seq`.
    pub fn register_callbacks(&self, seq: u32, callbacks: Callbacks) {
        self.waiters.insert(seq, Waiter::Async(callbacks));
    }

    /// Remove a waiter without resolving it (timeout expiry). A response
    /// arriving afterwards is dropped by [`deliver`](Self::deliver).
    pub fn forget(&self, seq: u32) {
        self.waiters.remove(&seq);
    }

    /// Number of outstanding requests.
    pub fn outstanding(&self) -> usize {
        self.waiters.len()
    }

    /// Route a response result to its waiter.
    ///
    /// A carried failure is re-raised as `Remote` instead of delivered as a
    /// value. A response with no waiter (late, after timeout) is dropped.
    pub fn deliver(&self, seq: u32, result: WireValue) {
        let Some((_, waiter)) = self.waiters.remove(&seq) else {
            tracing::warn!(seq, "dropping response with no outstanding waiter");
            return;
        };

        let outcome = match result {
            WireValue::Failure(failure) => Err(BeanwireError::Remote(failure)),
            value => Ok(value),
        };

        match waiter {
            Waiter::Sync(tx) => {
                // Receiver gone means the caller already timed out.
                if tx.send(outcome).is_err() {
                    tracing::debug!(seq, "waiter gone before delivery");
                }
            }
            Waiter::Async(callbacks) => match outcome {
                Ok(value) => (callbacks.on_success)(value),
                Err(err) => (callbacks.on_failure)(err),
            },
        }
    }

    /// Release every outstanding waiter with a connection-closed error.
    pub fn fail_all(&self) {
        let seqs: Vec<u32> = self.waiters.iter().map(|e| *e.key()).collect();
        for seq in seqs {
            if let Some((_, waiter)) = self.waiters.remove(&seq) {
                match waiter {
                    Waiter::Sync(tx) => {
                        let _ = tx.send(Err(BeanwireError::ConnectionClosed));
                    }
                    Waiter::Async(callbacks) => {
                        (callbacks.on_failure)(BeanwireError::ConnectionClosed)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RemoteFailure;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_correlator_shared_across_tasks() {
        // The read task and every caller hold the same table; the callback
        // boxes inside must not poison that.
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Correlator>();
        assert_send_sync::<Callbacks>();
    }

    #[test]
    fn test_seq_ids_monotonic() {
        let c = Correlator::new();
        let a = c.next_seq();
        let b = c.next_seq();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_sync_delivery() {
        let c = Correlator::new();
        let seq = c.next_seq();
        let rx = c.register_sync(seq);
        assert_eq!(c.outstanding(), 1);

        c.deliver(seq, WireValue::Str("DefaultDomain".into()));

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result, WireValue::Str("DefaultDomain".into()));
        assert_eq!(c.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_delivery_matches_waiters() {
        let c = Correlator::new();
        let seqs: Vec<u32> = (0..8).map(|_| c.next_seq()).collect();
        let rxs: Vec<_> = seqs.iter().map(|&s| c.register_sync(s)).collect();

        // Deliver in reverse order; each caller must see its own value.
        for &seq in seqs.iter().rev() {
            c.deliver(seq, WireValue::I32(seq as i32));
        }

        for (seq, rx) in seqs.into_iter().zip(rxs) {
            assert_eq!(rx.await.unwrap().unwrap(), WireValue::I32(seq as i32));
        }
    }

    #[tokio::test]
    async fn test_carried_failure_re_raised() {
        let c = Correlator::new();
        let seq = c.next_seq();
        let rx = c.register_sync(seq);

        c.deliver(seq, WireValue::Failure(RemoteFailure::new("Boom", "bad")));

        match rx.await.unwrap() {
            Err(BeanwireError::Remote(f)) => assert_eq!(f.kind, "Boom"),
            other => panic!("expected Remote failure, got {other:?}"),
        }
    }

    #[test]
    fn test_late_response_dropped() {
        let c = Correlator::new();
        let seq = c.next_seq();
        let rx = c.register_sync(seq);
        c.forget(seq); // timeout path
        drop(rx);

        // Must not panic or resolve anything.
        c.deliver(seq, WireValue::Void);
        assert_eq!(c.outstanding(), 0);
    }

    #[test]
    fn test_async_callbacks() {
        let c = Correlator::new();
        let seq = c.next_seq();
        let hit = Arc::new(AtomicBool::new(false));
        let hit2 = hit.clone();
        c.register_callbacks(
            seq,
            Callbacks {
                on_success: Box::new(move |v| {
                    assert_eq!(v, WireValue::Bool(true));
                    hit2.store(true, Ordering::SeqCst);
                }),
                on_failure: Box::new(|_| panic!("unexpected failure")),
            },
        );

        c.deliver(seq, WireValue::Bool(true));
        assert!(hit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_fail_all_releases_waiters() {
        let c = Correlator::new();
        let rx1 = c.register_sync(c.next_seq());
        let rx2 = c.register_sync(c.next_seq());

        c.fail_all();

        assert!(matches!(rx1.await.unwrap(), Err(BeanwireError::ConnectionClosed)));
        assert!(matches!(rx2.await.unwrap(), Err(BeanwireError::ConnectionClosed)));
        assert_eq!(c.outstanding(), 0);
    }
}
