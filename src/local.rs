//! C4 (loopback half): `LocalClientConnection`, the self-addressed fast
//! path that never touches a socket (`spec.md §4.4`).
//!
//! `LocalServerConnection` from `spec.md §4.4` has no separate type
//! here: its status-to-sink mapping is exactly
//! [`crate::handler::Handler::invoke`]'s `Result<Vec<u8>, MessagingError>`,
//! so the handler invocation below *is* that mapping.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::callback::CallbackTable;
use crate::error::MessagingError;
use crate::executor::run_on;
use crate::handler::HandlerTable;
use crate::message::MessageIdSource;

/// Per-process singleton used when a send's destination is this node's
/// own address (`spec.md §3`).
///
/// Routes `sendAndReceive` through the same [`CallbackTable`] the
/// remote path uses, rather than awaiting the handler inline, so the
/// timeout sweeper (`spec.md §4.8`: "invokes `timeoutCallbacks` on the
/// local client connection") has something to act on if a registered
/// async handler never completes.
pub struct LocalClientConnection {
    handlers: Arc<HandlerTable>,
    callbacks: Arc<CallbackTable>,
}

impl LocalClientConnection {
    pub fn new(handlers: Arc<HandlerTable>) -> Self {
        LocalClientConnection {
            handlers,
            callbacks: Arc::new(CallbackTable::new()),
        }
    }

    pub fn callbacks(&self) -> Arc<CallbackTable> {
        self.callbacks.clone()
    }

    /// No handler registered: silently succeeds after a debug log,
    /// preserving the source's fire-and-forget-to-nowhere behavior
    /// (`spec.md §9`).
    pub async fn send_async(&self, subject: &str, payload: Vec<u8>) {
        match self.handlers.get(subject) {
            Some(entry) => {
                let invoked = entry.clone();
                run_on(entry.executor.as_ref(), async move {
                    invoked.handler.invoke_fire_and_forget(payload).await
                })
                .await
            }
            None => debug!(subject, "loopback sendAsync with no handler registered; dropped"),
        }
    }

    pub async fn send_and_receive(
        &self,
        id_source: &MessageIdSource,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, MessagingError> {
        let entry = match self.handlers.get(subject) {
            Some(entry) => entry,
            None => return Err(MessagingError::NoRemoteHandler),
        };

        let id = id_source.next();
        let receiver = self.callbacks.register(id, subject.to_string(), timeout);
        let callbacks = self.callbacks.clone();
        tokio::spawn(async move {
            let invoked = entry.clone();
            let result = run_on(entry.executor.as_ref(), async move {
                invoked.handler.invoke(payload).await
            })
            .await;
            callbacks.complete(id, result);
        });

        receiver.await.unwrap_or(Err(MessagingError::ConnectionClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;

    #[tokio::test]
    async fn round_trips_through_a_registered_handler() {
        let handlers = Arc::new(HandlerTable::new());
        handlers.register(
            "local",
            Handler::sync(|mut payload: Vec<u8>| {
                payload.reverse();
                payload
            }),
            None,
        );
        let local = LocalClientConnection::new(handlers);
        let id_source = MessageIdSource::new();
        let result = local
            .send_and_receive(&id_source, "local", vec![1, 2, 3], Duration::ZERO)
            .await;
        assert_eq!(result.unwrap(), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn send_and_receive_with_no_handler_fails() {
        let handlers = Arc::new(HandlerTable::new());
        let local = LocalClientConnection::new(handlers);
        let id_source = MessageIdSource::new();
        let result = local
            .send_and_receive(&id_source, "missing", vec![], Duration::ZERO)
            .await;
        assert!(matches!(result, Err(MessagingError::NoRemoteHandler)));
    }

    #[tokio::test]
    async fn send_async_with_no_handler_does_not_panic() {
        let handlers = Arc::new(HandlerTable::new());
        let local = LocalClientConnection::new(handlers);
        local.send_async("missing", vec![]).await;
    }

    #[tokio::test]
    async fn send_async_invokes_the_handler() {
        let handlers = Arc::new(HandlerTable::new());
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        handlers.register(
            "notify",
            Handler::fire_and_forget(move |payload| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(payload);
                }
            }),
            None,
        );
        let local = LocalClientConnection::new(handlers);
        local.send_async("notify", vec![7]).await;
        assert_eq!(rx.await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn send_and_receive_dispatches_invocation_through_the_registered_executor() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let handlers = Arc::new(HandlerTable::new());
        let ran_via_executor = Arc::new(AtomicBool::new(false));
        let flag = ran_via_executor.clone();
        let executor: crate::executor::Executor = Arc::new(move |task| {
            flag.store(true, Ordering::SeqCst);
            tokio::spawn(task);
        });
        handlers.register("echo", Handler::sync(|p| p), Some(executor));

        let local = LocalClientConnection::new(handlers);
        let id_source = MessageIdSource::new();
        let result = local
            .send_and_receive(&id_source, "echo", vec![1], Duration::ZERO)
            .await;
        assert_eq!(result.unwrap(), vec![1]);
        assert!(ran_via_executor.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn a_slow_handler_is_failed_by_a_static_timeout() {
        let handlers = Arc::new(HandlerTable::new());
        handlers.register(
            "slow",
            Handler::asynchronous(|payload: Vec<u8>| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(payload)
            }),
            None,
        );
        let local = Arc::new(LocalClientConnection::new(handlers));
        let id_source = Arc::new(MessageIdSource::new());
        let callbacks = local.callbacks();

        let call = tokio::spawn({
            let local = local.clone();
            let id_source = id_source.clone();
            async move {
                local
                    .send_and_receive(&id_source, "slow", vec![], Duration::from_millis(20))
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        callbacks.sweep();

        assert!(matches!(call.await.unwrap(), Err(MessagingError::Timeout)));
    }
}
