//! Continuation primitive
//!
//! This is the one place that decides whether an asynchronous call failed
//! and why. Continuations receive `(result, operation, status)` with the
//! failure already extracted.

use crate::error::{CODE_FAIL, RemoteViewError, Result};

use super::operation::{AsyncOperation, AsyncStatus};

/// Run `continuation` exactly once when `operation` reaches a terminal state
///
/// A missing operation fails with `InvalidArgument` and registers nothing.
/// Registration failures are returned to the caller.
pub fn then<T, F>(operation: Option<&AsyncOperation<T>>, continuation: F) -> Result<()>
where
    T: Send + 'static,
    F: FnOnce(Result<()>, &AsyncOperation<T>, AsyncStatus) + Send + 'static,
{
    let operation =
        operation.ok_or_else(|| RemoteViewError::invalid_argument("operation handle is missing"))?;

    operation.set_completed(move |op, status| {
        let result = match status {
            AsyncStatus::Completed => Ok(()),
            _ => Err(op.error().unwrap_or_else(|| {
                RemoteViewError::platform(
                    CODE_FAIL,
                    format!("{} finished as {:?} without an error", op.label(), status),
                )
            })),
        };
        continuation(result, op, status);
    })
}

impl<T: Send + 'static> AsyncOperation<T> {
    /// Chain a continuation onto this operation
    pub fn then<F>(&self, continuation: F) -> Result<()>
    where
        F: FnOnce(Result<()>, &AsyncOperation<T>, AsyncStatus) + Send + 'static,
    {
        then(Some(self), continuation)
    }
}

impl<T: Clone + Send + 'static> AsyncOperation<T> {
    /// Derive a new operation from this one's result
    ///
    /// A failure of this operation propagates unchanged; otherwise `step`
    /// produces the value (or error) of the returned operation.
    pub fn chain<U, F>(&self, label: &'static str, step: F) -> Result<AsyncOperation<U>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let (next, completer) = AsyncOperation::pending(label);
        self.then(move |result, op, _status| {
            let outcome = result.and_then(|_| op.get_results()).and_then(step);
            completer.complete(outcome);
        })?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_missing_operation_is_invalid_argument() {
        let err = then::<(), _>(None, |_, _, _| panic!("must not run")).unwrap_err();
        assert!(matches!(err, RemoteViewError::InvalidArgument(_)));
    }

    #[test]
    fn test_failed_operation_reports_error() {
        let (op, completer) = AsyncOperation::<u32>::pending("fails");
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        op.then(move |result, _, status| {
            *slot.lock() = Some((result, status));
        })
        .unwrap();

        completer.complete(Err(RemoteViewError::platform(0x8000_4005, "boom")));

        let (result, status) = seen.lock().take().unwrap();
        assert_eq!(status, AsyncStatus::Error);
        assert_eq!(result.unwrap_err().code(), 0x8000_4005);
    }

    #[test]
    fn test_canceled_operation_is_not_success() {
        let (op, completer) = AsyncOperation::<()>::pending("canceled");
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        op.then(move |result, _, _| *slot.lock() = Some(result.is_ok()))
            .unwrap();
        completer.cancel();
        assert_eq!(*seen.lock(), Some(false));
    }

    #[test]
    fn test_chain_maps_success() {
        let (op, completer) = AsyncOperation::<u32>::pending("source");
        let next = op.chain("doubled", |v| Ok(v * 2)).unwrap();
        completer.complete(Ok(21));
        assert_eq!(next.get_results().unwrap(), 42);
    }

    #[test]
    fn test_chain_propagates_failure_without_running_step() {
        let (op, completer) = AsyncOperation::<u32>::pending("source");
        let next = op
            .chain::<u32, _>("never", |_| panic!("step must not run"))
            .unwrap();
        completer.complete(Err(RemoteViewError::not_found("device")));
        assert!(matches!(
            next.get_results(),
            Err(RemoteViewError::NotFound(_))
        ));
    }
}
