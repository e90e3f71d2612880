//! The caller-supplied executor of `spec.md §4.7`/`§5`/`§9`: completions
//! of `sendAndReceive` and handler invocations dispatched by
//! `registerHandler` are both routed through this sink rather than run
//! directly on an I/O thread, when the caller supplies one.
//!
//! Treated as an opaque `run(task)` sink (`spec.md §9`): this module
//! never inspects what the executor does with the task, only whether it
//! accepted it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;

/// A unit of work handed to an [`Executor`].
pub type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// An opaque completion-dispatch sink (`spec.md §5`, `§9`).
pub type Executor = Arc<dyn Fn(Task) + Send + Sync>;

/// Run `fut`, dispatched through `executor` if supplied, inline
/// otherwise (`spec.md §4.7`: "default: immediate").
///
/// If `executor` accepts the task but never runs it — or drops it
/// outright — the caller's future never resolves; this is the
/// preserved behavior of `spec.md §7`: "if that executor rejects the
/// completion task, the message is logged and the future is left
/// incomplete."
pub async fn run_on<T>(executor: Option<&Executor>, fut: impl Future<Output = T> + Send + 'static) -> T
where
    T: Send + 'static,
{
    let executor = match executor {
        Some(executor) => executor,
        None => return fut.await,
    };

    let (tx, rx) = tokio::sync::oneshot::channel();
    let task: Task = Box::pin(async move {
        let _ = tx.send(fut.await);
    });
    executor(task);
    match rx.await {
        Ok(value) => value,
        Err(_) => {
            warn!("caller-supplied executor dropped its task without completing it; leaving the caller's future incomplete");
            std::future::pending().await
        }
    }
}
