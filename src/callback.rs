//! C3 (other half): the per-connection pending-callback table
//! (`spec.md §3`, `§4.3`).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::MessagingError;
use crate::monitor::MonitorCache;

/// A pending reply sink tied to an outbound request id. `resolver` is
/// completed exactly once, by whichever of {dispatcher, sweeper, close}
/// gets there first; the map entry's removal is the single point of
/// truth for "first writer wins" (`spec.md §3`, `§9`).
pub struct Callback {
    pub subject: String,
    pub timeout: Duration,
    pub created_at: Instant,
    resolver: oneshot::Sender<Result<Vec<u8>, MessagingError>>,
}

/// The concurrent `id -> Callback` map owned by one client connection,
/// plus its subject-keyed reply-time history.
///
/// A single [`Mutex`] guards both the map and the monitor cache: the
/// teacher's own transport layer favors a coarse lock over a lock-free
/// structure where contention is low (see `spec.md §9`, "Callback map
/// concurrency" — either a concurrent map or a coarse lock is
/// acceptable), and callback registration/completion is not the hot
/// loop here; the frame codec and socket I/O are.
pub struct CallbackTable {
    inner: Mutex<Inner>,
}

struct Inner {
    callbacks: HashMap<u64, Callback>,
    monitors: MonitorCache,
}

impl CallbackTable {
    pub fn new() -> Self {
        CallbackTable {
            inner: Mutex::new(Inner {
                callbacks: HashMap::new(),
                monitors: MonitorCache::new(),
            }),
        }
    }

    /// Register a pending callback, returning the receiving half the
    /// caller awaits for its reply.
    pub fn register(
        &self,
        id: u64,
        subject: String,
        timeout: Duration,
    ) -> oneshot::Receiver<Result<Vec<u8>, MessagingError>> {
        let (resolver, receiver) = oneshot::channel();
        let callback = Callback {
            subject,
            timeout,
            created_at: Instant::now(),
            resolver,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.callbacks.insert(id, callback);
        receiver
    }

    /// Remove and complete successfully, recording the reply time into
    /// the subject's monitor (`spec.md §4.3`, `completeCallback`).
    pub fn complete(&self, id: u64, payload: Result<Vec<u8>, MessagingError>) {
        let callback = {
            let mut inner = self.inner.lock().unwrap();
            let callback = inner.callbacks.remove(&id);
            if let (Some(cb), true) = (&callback, payload.is_ok()) {
                let elapsed = cb.created_at.elapsed();
                inner.monitors.get_or_create(&cb.subject).add_reply_time(elapsed);
            }
            callback
        };
        match callback {
            Some(cb) => {
                // A second completion attempt (e.g. a racing sweep) on an
                // already-removed id silently drops here: the receiver
                // was already fulfilled or dropped.
                let _ = cb.resolver.send(payload);
            }
            None => {
                debug!(id, "reply for unknown or already-completed callback dropped");
            }
        }
    }

    /// Remove and fail, without recording a reply time (`spec.md §4.3`,
    /// `failCallback`).
    pub fn fail(&self, id: u64, error: MessagingError) {
        let callback = self.inner.lock().unwrap().callbacks.remove(&id);
        if let Some(cb) = callback {
            let _ = cb.resolver.send(Err(error));
        }
    }

    /// Fail every outstanding callback exactly once, e.g. because the
    /// owning channel closed (`spec.md §3` invariants).
    pub fn fail_all(&self, error_factory: impl Fn() -> MessagingError) {
        let callbacks: Vec<Callback> = {
            let mut inner = self.inner.lock().unwrap();
            inner.callbacks.drain().map(|(_, cb)| cb).collect()
        };
        for cb in callbacks {
            let _ = cb.resolver.send(Err(error_factory()));
        }
    }

    /// One sweep pass (`spec.md §4.3`): snapshot the ids currently
    /// pending, then fail each one whose deadline (static or adaptive)
    /// has passed. Iterating a snapshot, rather than the live map,
    /// guarantees a callback the dispatcher completes mid-sweep is
    /// never double-resolved by `fail`, since `fail` is a no-op once
    /// `complete` has already removed the entry.
    pub fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<(u64, Duration)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .callbacks
                .iter()
                .filter_map(|(&id, cb)| {
                    let elapsed = now.duration_since(cb.created_at);
                    let timed_out = if cb.timeout > Duration::ZERO {
                        elapsed > cb.timeout
                    } else {
                        elapsed > crate::defaults::MAX_ADAPTIVE_TIMEOUT
                    };
                    timed_out.then_some((id, elapsed))
                })
                .collect()
        };

        for (id, elapsed) in expired {
            let should_fail = {
                let mut inner = self.inner.lock().unwrap();
                match inner.callbacks.get(&id) {
                    Some(cb) if cb.timeout > Duration::ZERO => elapsed > cb.timeout,
                    Some(cb) => {
                        let adaptive_timed_out = elapsed > Duration::from_millis(100)
                            && inner.monitors.get_or_create(&cb.subject).is_timed_out(elapsed);
                        let hard_cap = elapsed > crate::defaults::MAX_ADAPTIVE_TIMEOUT;
                        if hard_cap || adaptive_timed_out {
                            inner.monitors.get_or_create(&cb.subject).add_reply_time(elapsed);
                            true
                        } else {
                            false
                        }
                    }
                    None => false,
                }
            };
            if should_fail {
                warn!(id, elapsed_ms = elapsed.as_millis() as u64, "request timed out");
                self.fail(id, MessagingError::Timeout);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CallbackTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_resolves_the_receiver() {
        let table = CallbackTable::new();
        let rx = table.register(1, "echo".to_string(), Duration::ZERO);
        table.complete(1, Ok(vec![1, 2, 3]));
        assert_eq!(rx.await.unwrap().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn fail_resolves_with_the_given_error() {
        let table = CallbackTable::new();
        let rx = table.register(1, "echo".to_string(), Duration::ZERO);
        table.fail(1, MessagingError::NoRemoteHandler);
        assert!(matches!(
            rx.await.unwrap(),
            Err(MessagingError::NoRemoteHandler)
        ));
    }

    #[tokio::test]
    async fn completing_an_unknown_id_does_not_panic() {
        let table = CallbackTable::new();
        table.complete(404, Ok(vec![]));
    }

    #[tokio::test]
    async fn sweep_fails_requests_past_their_static_timeout() {
        let table = CallbackTable::new();
        let rx = table.register(1, "slow".to_string(), Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        table.sweep();
        assert!(matches!(rx.await.unwrap(), Err(MessagingError::Timeout)));
    }

    #[tokio::test]
    async fn sweep_does_not_touch_requests_within_their_timeout() {
        let table = CallbackTable::new();
        let rx = table.register(1, "slow".to_string(), Duration::from_secs(10));
        table.sweep();
        table.complete(1, Ok(vec![9]));
        assert_eq!(rx.await.unwrap().unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn fail_all_resolves_every_outstanding_callback() {
        let table = CallbackTable::new();
        let rx1 = table.register(1, "a".to_string(), Duration::ZERO);
        let rx2 = table.register(2, "b".to_string(), Duration::ZERO);
        table.fail_all(|| MessagingError::ConnectionClosed);
        assert!(matches!(rx1.await.unwrap(), Err(MessagingError::ConnectionClosed)));
        assert!(matches!(rx2.await.unwrap(), Err(MessagingError::ConnectionClosed)));
        assert!(table.is_empty());
    }
}
