//! Module registry
//!
//! Host-facing handle table. Capture sessions and connections are stored
//! under opaque [`ModuleHandle`]s; every entry point takes handles and
//! reports completion through a callback.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::error::{RemoteViewError, Result};
use crate::platform::{Connection, Platform};
use crate::session::CaptureEngine;
use crate::signal::SubscriptionToken;
use crate::types::{ModuleHandle, SpatialCoordinateSystem};

enum Module {
    Capture {
        engine: CaptureEngine,
        /// Closed subscriptions made through this registry
        closed_tokens: Vec<u64>,
    },
    Connection(Arc<dyn Connection>),
}

impl Module {
    fn kind(&self) -> &'static str {
        match self {
            Self::Capture { .. } => "capture",
            Self::Connection(_) => "connection",
        }
    }
}

struct RegistryInner {
    modules: Mutex<HashMap<u32, Module>>,
    next_handle: AtomicU32,
}

/// Handle table of capture sessions and connections
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct ModuleRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown(handle: ModuleHandle) -> RemoteViewError {
    RemoteViewError::not_found(format!("no module registered as {}", handle))
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                modules: Mutex::new(HashMap::new()),
                next_handle: AtomicU32::new(1),
            }),
        }
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.inner.modules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, module: Module) -> ModuleHandle {
        let handle = ModuleHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));
        debug!("Registered {} module as {}", module.kind(), handle);
        self.inner.modules.lock().insert(handle.0, module);
        handle
    }

    /// Register a connection for later use by `capture_start_async`
    pub fn register_connection(&self, connection: Arc<dyn Connection>) -> ModuleHandle {
        self.insert(Module::Connection(connection))
    }

    /// Look up a capture session
    pub fn capture(&self, handle: ModuleHandle) -> Result<CaptureEngine> {
        match self.inner.modules.lock().get(&handle.0) {
            Some(Module::Capture { engine, .. }) => Ok(engine.clone()),
            Some(other) => Err(RemoteViewError::invalid_argument(format!(
                "{} is a {} module, not a capture module",
                handle,
                other.kind()
            ))),
            None => Err(unknown(handle)),
        }
    }

    fn connection(&self, handle: ModuleHandle) -> Result<Arc<dyn Connection>> {
        match self.inner.modules.lock().get(&handle.0) {
            Some(Module::Connection(connection)) => Ok(connection.clone()),
            Some(other) => Err(RemoteViewError::invalid_argument(format!(
                "{} is a {} module, not a connection",
                handle,
                other.kind()
            ))),
            None => Err(unknown(handle)),
        }
    }

    /// Create and initialize a capture session
    ///
    /// On success the session is registered and `callback` receives its
    /// handle; on an asynchronous failure it receives `ModuleHandle::INVALID`
    /// and the error. Setup failures are returned and `callback` is dropped
    /// without being called.
    pub fn capture_create_async<F>(
        &self,
        platform: Platform,
        config: CaptureConfig,
        enable_audio: bool,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(ModuleHandle, Result<()>) + Send + 'static,
    {
        let created = CaptureEngine::create_async(platform, config, enable_audio)?;
        let registry = self.clone();
        created.then(move |result, created, _| {
            match result.and_then(|_| created.get_results()) {
                Ok(engine) => {
                    let handle = registry.insert(Module::Capture {
                        engine,
                        closed_tokens: Vec::new(),
                    });
                    callback(handle, Ok(()));
                }
                Err(e) => {
                    warn!("Capture module creation failed: {}", e);
                    callback(ModuleHandle::INVALID, Err(e));
                }
            }
        })
    }

    /// Subscribe `callback` to the session's Closed notifications
    ///
    /// Returns the token value to pass to `capture_remove_closed`.
    pub fn capture_add_closed<F>(&self, handle: ModuleHandle, callback: F) -> Result<u64>
    where
        F: Fn(ModuleHandle) + Send + Sync + 'static,
    {
        let engine = self.capture(handle)?;
        let token = engine.add_closed(move |_| callback(handle)).as_u64();

        let mut modules = self.inner.modules.lock();
        match modules.get_mut(&handle.0) {
            Some(Module::Capture { closed_tokens, .. }) => {
                closed_tokens.push(token);
                Ok(token)
            }
            _ => {
                drop(modules);
                let _ = engine.remove_closed(SubscriptionToken::from_u64(token));
                Err(unknown(handle))
            }
        }
    }

    /// Remove a subscription made with `capture_add_closed`
    pub fn capture_remove_closed(&self, handle: ModuleHandle, token: u64) -> Result<()> {
        let engine = {
            let mut modules = self.inner.modules.lock();
            match modules.get_mut(&handle.0) {
                Some(Module::Capture {
                    engine,
                    closed_tokens,
                }) => {
                    let position = closed_tokens
                        .iter()
                        .position(|t| *t == token)
                        .ok_or_else(|| {
                            RemoteViewError::not_found(format!(
                                "subscription {:#x} on {}",
                                token, handle
                            ))
                        })?;
                    closed_tokens.swap_remove(position);
                    engine.clone()
                }
                Some(other) => {
                    return Err(RemoteViewError::invalid_argument(format!(
                        "{} is a {} module, not a capture module",
                        handle,
                        other.kind()
                    )));
                }
                None => return Err(unknown(handle)),
            }
        };
        engine.remove_closed(SubscriptionToken::from_u64(token))
    }

    /// Start recording a session into a registered connection
    ///
    /// A given spatial coordinate system is applied before starting.
    pub fn capture_start_async<F>(
        &self,
        capture: ModuleHandle,
        connection: ModuleHandle,
        enable_mrc: bool,
        spatial: Option<SpatialCoordinateSystem>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let engine = self.capture(capture)?;
        let connection = self.connection(connection)?;
        if spatial.is_some() {
            engine.set_spatial_coordinate_system(spatial);
        }
        engine
            .start_async(enable_mrc, connection)?
            .then(move |result, _, _| callback(result))
    }

    /// Stop recording a session
    pub fn capture_stop_async<F>(&self, handle: ModuleHandle, callback: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.capture(handle)?
            .stop_async()?
            .then(move |result, _, _| callback(result))
    }

    /// Forward a spatial coordinate system to a session
    pub fn set_spatial_coordinate_system(
        &self,
        handle: ModuleHandle,
        spatial: Option<SpatialCoordinateSystem>,
    ) -> Result<()> {
        self.capture(handle)?.set_spatial_coordinate_system(spatial);
        Ok(())
    }

    /// Close a session and drop its handle
    pub fn capture_close(&self, handle: ModuleHandle) -> Result<()> {
        self.capture(handle)?;
        self.release_module(handle)
    }

    /// Drop any module's handle, closing sessions and their subscriptions
    pub fn release_module(&self, handle: ModuleHandle) -> Result<()> {
        let module = self
            .inner
            .modules
            .lock()
            .remove(&handle.0)
            .ok_or_else(|| unknown(handle))?;

        match module {
            Module::Capture {
                engine,
                closed_tokens,
            } => {
                for token in closed_tokens {
                    if let Err(e) = engine.remove_closed(SubscriptionToken::from_u64(token)) {
                        warn!("Failed to remove closed subscription on {}: {}", handle, e);
                    }
                }
                engine.close()?;
                info!("Released capture module {}", handle);
            }
            Module::Connection(connection) => {
                debug!("Released connection {} ({})", handle, connection.name());
            }
        }
        Ok(())
    }
}
