//! The registered-handler table and the three handler arities of
//! `spec.md §4.7`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use crate::error::MessagingError;
use crate::executor::Executor;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A registered subject handler, unified across the three arities
/// `spec.md §4.7` names (consumer, sync function, async function) into
/// one closed enum rather than three separately named registration
/// methods — the natural shape for a single Rust trait object table.
pub enum Handler {
    /// Fire-and-forget: invoked for `sendAsync` only; its return value,
    /// if any, is discarded.
    FireAndForget(Box<dyn Fn(Vec<u8>) + Send + Sync>),
    /// Synchronous request/reply: invoked for `sendAndReceive`, runs to
    /// completion before a reply is produced.
    Sync(Box<dyn Fn(Vec<u8>) -> Result<Vec<u8>, String> + Send + Sync>),
    /// Asynchronous request/reply: the same, but returning a future.
    Async(Box<dyn Fn(Vec<u8>) -> BoxFuture<Result<Vec<u8>, String>> + Send + Sync>),
}

impl Handler {
    pub fn sync(f: impl Fn(Vec<u8>) -> Vec<u8> + Send + Sync + 'static) -> Self {
        Handler::Sync(Box::new(move |payload| Ok(f(payload))))
    }

    pub fn fallible(
        f: impl Fn(Vec<u8>) -> Result<Vec<u8>, String> + Send + Sync + 'static,
    ) -> Self {
        Handler::Sync(Box::new(f))
    }

    pub fn fire_and_forget(f: impl Fn(Vec<u8>) + Send + Sync + 'static) -> Self {
        Handler::FireAndForget(Box::new(f))
    }

    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, String>> + Send + 'static,
    {
        Handler::Async(Box::new(move |payload| Box::pin(f(payload))))
    }

    /// Invoke the handler for a request/reply call. A synchronous
    /// handler that panics is caught and reported as
    /// `RemoteHandlerFailure`, matching "a handler throwing
    /// synchronously produces ERROR_HANDLER_EXCEPTION" (`spec.md §4.7`).
    pub async fn invoke(&self, payload: Vec<u8>) -> Result<Vec<u8>, MessagingError> {
        match self {
            Handler::FireAndForget(f) => {
                f(payload);
                Ok(Vec::new())
            }
            Handler::Sync(f) => {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(payload)));
                match result {
                    Ok(Ok(bytes)) => Ok(bytes),
                    Ok(Err(message)) => Err(MessagingError::RemoteHandlerFailure(message)),
                    Err(_) => Err(MessagingError::RemoteHandlerFailure(
                        "handler panicked".to_string(),
                    )),
                }
            }
            Handler::Async(f) => match f(payload).await {
                Ok(bytes) => Ok(bytes),
                Err(message) => Err(MessagingError::RemoteHandlerFailure(message)),
            },
        }
    }

    /// Invoke for a `sendAsync` delivery: same dispatch, but the result
    /// (success or failure) is not observable to the sender.
    pub async fn invoke_fire_and_forget(&self, payload: Vec<u8>) {
        let _ = self.invoke(payload).await;
    }
}

/// A registered handler paired with the executor (if any) its
/// invocations are dispatched through: "Executor wraps invocation where
/// supplied" (`spec.md §4.7`, `registerHandler`).
pub struct HandlerEntry {
    pub handler: Handler,
    pub executor: Option<Executor>,
}

/// Write-rare, read-hot subject -> handler table (`spec.md §5`).
///
/// Entries are kept behind an `Arc` so a lookup can release the lock
/// before the (possibly async) handler runs, rather than holding the
/// lock across an `.await` (`spec.md §9`, executor dispatch).
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, Arc<HandlerEntry>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `subject`, dispatching its invocations
    /// through `executor` when supplied (`spec.md §4.7`). Overwriting an
    /// existing subject replaces it.
    pub fn register(&self, subject: impl Into<String>, handler: Handler, executor: Option<Executor>) {
        self.handlers
            .write()
            .unwrap()
            .insert(subject.into(), Arc::new(HandlerEntry { handler, executor }));
    }

    pub fn unregister(&self, subject: &str) {
        self.handlers.write().unwrap().remove(subject);
    }

    /// Clone out the handler entry `Arc` for `subject`, if registered.
    pub fn get(&self, subject: &str) -> Option<Arc<HandlerEntry>> {
        self.handlers.read().unwrap().get(subject).cloned()
    }

    pub fn with_handler<R>(&self, subject: &str, f: impl FnOnce(&Handler) -> R) -> Option<R> {
        self.handlers.read().unwrap().get(subject).map(|entry| f(&entry.handler))
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.handlers.read().unwrap().contains_key(subject)
    }
}
