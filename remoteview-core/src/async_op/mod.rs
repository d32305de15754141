//! Asynchronous-operation completion bridge
//!
//! Platform calls return an [`AsyncOperation`]. Callers then either:
//! - chain a continuation with [`then`] (or [`AsyncOperation::chain`]),
//! - block with [`sync_wait`] / [`sync_get`],
//! - or `.await` it with [`AsyncOperation::join`].

mod operation;
mod then;
mod wait;

pub use operation::{AsyncOperation, AsyncStatus, Completer};
pub use then::then;
pub use wait::{sync_get, sync_wait};
