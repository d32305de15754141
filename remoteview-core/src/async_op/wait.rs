//! Blocking adapter
//!
//! Turns an operation into a synchronous wait for call sequences that gain
//! nothing from chaining. The waiting thread must never be the one that
//! delivers the completion, so inside a tokio multi-thread runtime the wait
//! is moved off the worker with `block_in_place`, and inside a
//! current-thread runtime it is refused.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::trace;

use crate::error::{RemoteViewError, Result};

use super::operation::AsyncOperation;

/// Manual-reset event signaled by a completion
#[derive(Default)]
struct CompletionEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl CompletionEvent {
    fn set(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let mut signaled = self.signaled.lock();
        match timeout {
            None => {
                while !*signaled {
                    self.cond.wait(&mut signaled);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*signaled {
                    if self.cond.wait_until(&mut signaled, deadline).timed_out() && !*signaled {
                        return Err(RemoteViewError::Timeout(timeout.as_millis() as u64));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Block until `operation` completes or `timeout` elapses
///
/// `None` waits without a budget. Success means the operation reached a
/// terminal state; read its outcome with `get_results`.
pub fn sync_wait<T: Send + 'static>(
    operation: &AsyncOperation<T>,
    timeout: Option<Duration>,
) -> Result<()> {
    let in_multi_thread_runtime = match Handle::try_current() {
        Ok(handle) if matches!(handle.runtime_flavor(), RuntimeFlavor::CurrentThread) => {
            return Err(RemoteViewError::invalid_state(
                "cannot block inside a current-thread runtime",
            ));
        }
        Ok(_) => true,
        Err(_) => false,
    };

    let event = Arc::new(CompletionEvent::default());
    let signal = event.clone();
    operation.then(move |_, _, _| signal.set())?;

    trace!("Waiting on {} ({:?})", operation.label(), timeout);
    if in_multi_thread_runtime {
        tokio::task::block_in_place(|| event.wait(timeout))
    } else {
        event.wait(timeout)
    }
}

/// Block on `operation` and return its result
pub fn sync_get<T: Clone + Send + 'static>(
    operation: &AsyncOperation<T>,
    timeout: Option<Duration>,
) -> Result<T> {
    sync_wait(operation, timeout)?;
    operation.get_results()
}
