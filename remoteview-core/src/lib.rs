//! RemoteView Core Library
//!
//! Live audio/video capture sessions driven through an asynchronous
//! completion bridge.
//!
//! This library provides:
//! - `AsyncOperation` handles with continuation, blocking and `.await` adapters
//! - A thread-safe multi-subscriber broadcaster
//! - The capture session state machine (`CaptureEngine`)
//! - A handle-based module registry for host integration
//! - A simulated platform for running without hardware
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Device       │──▶│ Profile       │──▶│ Capture      │──▶│ Network      │
//! │ Discovery    │   │ Negotiation   │   │ + Effects    │   │ Sink         │
//! └──────────────┘   └───────────────┘   └──────────────┘   └──────────────┘
//!          every platform call returns an AsyncOperation
//! ```

pub mod async_op;
pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod registry;
pub mod session;
pub mod signal;
pub mod sim;
pub mod types;

pub use async_op::{AsyncOperation, AsyncStatus, Completer, sync_get, sync_wait, then};
pub use config::{CaptureConfig, ConfigFile, EffectFailurePolicy};
pub use error::{RemoteViewError, Result, ResultExt};
pub use platform::Platform;
pub use registry::ModuleRegistry;
pub use session::CaptureEngine;
pub use signal::{Broadcaster, SubscriptionToken};
pub use types::{Handle, ModuleHandle, SessionPhase, SessionStatus, SpatialCoordinateSystem};
