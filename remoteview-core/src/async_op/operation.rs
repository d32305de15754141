//! Pending asynchronous operation handle
//!
//! An [`AsyncOperation`] is the consumer half of one in-flight call. The
//! producer holds the matching [`Completer`] and reports the terminal
//! status exactly once. One completion handler may be registered; if the
//! operation is already terminal at registration time the handler runs
//! immediately on the registering thread.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

use crate::error::{CODE_ABANDONED, RemoteViewError, Result};

/// Operation id counter, used only for log correlation
static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Status code the platform reports for a canceled operation
const CODE_CANCELED: u32 = 0x8007_04C7;

/// Terminal (or not yet terminal) status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsyncStatus {
    /// Still running
    Started,
    /// Finished successfully
    Completed,
    /// Canceled before finishing
    Canceled,
    /// Finished with an error
    Error,
}

impl AsyncStatus {
    /// Whether the operation has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }
}

type CompletionHandler<T> = Box<dyn FnOnce(&AsyncOperation<T>, AsyncStatus) + Send + 'static>;

struct OperationState<T> {
    status: AsyncStatus,
    result: Option<Result<T>>,
    handler: Option<CompletionHandler<T>>,
    handler_registered: bool,
}

struct OperationInner<T> {
    id: u64,
    label: &'static str,
    state: Mutex<OperationState<T>>,
}

/// Handle to an asynchronous operation
pub struct AsyncOperation<T> {
    inner: Arc<OperationInner<T>>,
}

impl<T> Clone for AsyncOperation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for AsyncOperation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("status", &self.status())
            .finish()
    }
}

impl<T: Send + 'static> AsyncOperation<T> {
    /// Create a pending operation and the completer that finishes it
    pub fn pending(label: &'static str) -> (Self, Completer<T>) {
        let op = Self {
            inner: Arc::new(OperationInner {
                id: OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed),
                label,
                state: Mutex::new(OperationState {
                    status: AsyncStatus::Started,
                    result: None,
                    handler: None,
                    handler_registered: false,
                }),
            }),
        };
        trace!("Operation {} ({}) started", op.inner.id, label);
        let completer = Completer {
            op: Some(op.clone()),
        };
        (op, completer)
    }

    /// Create an operation that has already finished with `result`
    pub fn ready(label: &'static str, result: Result<T>) -> Self {
        let (op, completer) = Self::pending(label);
        completer.complete(result);
        op
    }

    /// Register the completion handler
    ///
    /// Only one handler may ever be registered. A second registration fails
    /// with `InvalidState` and leaves the first in place.
    pub fn set_completed<F>(&self, handler: F) -> Result<()>
    where
        F: FnOnce(&AsyncOperation<T>, AsyncStatus) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.handler_registered {
            return Err(RemoteViewError::invalid_state(format!(
                "completion handler already registered for {}",
                self.inner.label
            )));
        }
        state.handler_registered = true;

        if state.status.is_terminal() {
            let status = state.status;
            drop(state);
            handler(self, status);
        } else {
            state.handler = Some(Box::new(handler));
        }
        Ok(())
    }

    fn finish(&self, status: AsyncStatus, result: Result<T>) {
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            warn!(
                "Operation {} ({}) completed twice, ignoring",
                self.inner.id, self.inner.label
            );
            return;
        }
        state.status = status;
        state.result = Some(result);
        let handler = state.handler.take();
        drop(state);

        debug!(
            "Operation {} ({}) finished: {:?}",
            self.inner.id, self.inner.label, status
        );
        if let Some(handler) = handler {
            handler(self, status);
        }
    }
}

impl<T> AsyncOperation<T> {
    /// Current status
    pub fn status(&self) -> AsyncStatus {
        self.inner.state.lock().status
    }

    /// Label given at creation, for logs
    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    /// The failure carried by a non-successful terminal operation
    pub fn error(&self) -> Option<RemoteViewError> {
        let state = self.inner.state.lock();
        match &state.result {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }
}

impl<T: Clone> AsyncOperation<T> {
    /// Fetch the result of a terminal operation
    pub fn get_results(&self) -> Result<T> {
        let state = self.inner.state.lock();
        match &state.result {
            Some(result) => result.clone(),
            None => Err(RemoteViewError::invalid_state(format!(
                "{} has not completed",
                self.inner.label
            ))),
        }
    }
}

impl<T: Clone + Send + 'static> AsyncOperation<T> {
    /// Await the operation's result
    ///
    /// Consumes the completion handler slot.
    pub async fn join(self) -> Result<T> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.set_completed(move |op, _status| {
            let _ = tx.send(op.get_results());
        })?;
        rx.await.map_err(|_| {
            RemoteViewError::invalid_state("operation dropped before completing")
        })?
    }
}

/// Producer half of an [`AsyncOperation`]
///
/// Dropping a completer without completing it fails the operation with an
/// "abandoned" platform error, so waiters are never left hanging.
pub struct Completer<T: Send + 'static> {
    op: Option<AsyncOperation<T>>,
}

impl<T: Send + 'static> Completer<T> {
    /// Finish the operation with a result
    pub fn complete(mut self, result: Result<T>) {
        if let Some(op) = self.op.take() {
            let status = if result.is_ok() {
                AsyncStatus::Completed
            } else {
                AsyncStatus::Error
            };
            op.finish(status, result);
        }
    }

    /// Finish the operation as canceled
    pub fn cancel(mut self) {
        if let Some(op) = self.op.take() {
            op.finish(
                AsyncStatus::Canceled,
                Err(RemoteViewError::platform(CODE_CANCELED, "operation canceled")),
            );
        }
    }

    /// The operation this completer finishes
    pub fn operation(&self) -> Option<&AsyncOperation<T>> {
        self.op.as_ref()
    }
}

impl<T: Send + 'static> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(op) = self.op.take() {
            op.finish(
                AsyncStatus::Error,
                Err(RemoteViewError::platform(
                    CODE_ABANDONED,
                    format!("{} abandoned before completion", op.label()),
                )),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_handler_runs_once_on_completion() {
        let (op, completer) = AsyncOperation::<u32>::pending("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        op.set_completed(move |op, status| {
            assert_eq!(status, AsyncStatus::Completed);
            assert_eq!(op.get_results().unwrap(), 7);
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        completer.complete(Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_registration_runs_immediately() {
        let op = AsyncOperation::ready("done", Ok(1u8));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        op.set_completed(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_handler_rejected() {
        let (op, _completer) = AsyncOperation::<()>::pending("twice");
        op.set_completed(|_, _| {}).unwrap();
        let err = op.set_completed(|_, _| {}).unwrap_err();
        assert!(matches!(err, RemoteViewError::InvalidState(_)));
    }

    #[test]
    fn test_dropped_completer_reports_abandoned() {
        let (op, completer) = AsyncOperation::<()>::pending("abandoned");
        drop(completer);
        assert_eq!(op.status(), AsyncStatus::Error);
        assert_eq!(op.error().unwrap().code(), CODE_ABANDONED);
    }

    #[test]
    fn test_results_before_completion() {
        let (op, _completer) = AsyncOperation::<u32>::pending("early");
        assert!(matches!(
            op.get_results(),
            Err(RemoteViewError::InvalidState(_))
        ));
    }

    #[test]
    fn test_cancel_status() {
        let (op, completer) = AsyncOperation::<()>::pending("cancel");
        completer.cancel();
        assert_eq!(op.status(), AsyncStatus::Canceled);
        assert!(op.get_results().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_join_from_other_thread() {
        let (op, completer) = AsyncOperation::<String>::pending("join");
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            completer.complete(Ok("done".to_string()));
        });
        assert_eq!(op.join().await.unwrap(), "done");
    }

    #[test]
    fn test_join_reports_abandoned_completer() {
        let (op, completer) = AsyncOperation::<u32>::pending("join-abandoned");
        drop(completer);
        let err = tokio_test::assert_err!(tokio_test::block_on(op.join()));
        assert_eq!(err.code(), CODE_ABANDONED);

        let op = AsyncOperation::ready("join-ready", Ok(3u32));
        assert_eq!(tokio_test::assert_ok!(tokio_test::block_on(op.join())), 3);
    }
}
