//! Multi-subscriber notification list
//!
//! Handlers live in an arena keyed by generation-tagged tokens, so a stale
//! token can never remove a newer subscriber that reused its slot.
//!
//! Each entry carries its own reentrant lock. `notify_all` holds it while
//! invoking the handler and `unsubscribe` takes it before returning, which
//! gives the guarantee that a handler is never invoked after its
//! unsubscribe call has returned. The reentrancy lets a handler remove
//! itself from inside its own invocation.

use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::sync::Arc;
use tracing::trace;

use crate::error::{RemoteViewError, Result};

/// Token returned by [`Broadcaster::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionToken {
    index: u32,
    generation: u32,
}

impl SubscriptionToken {
    /// Pack into a single integer (generation in the high half)
    pub fn as_u64(&self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpack a value produced by [`SubscriptionToken::as_u64`]
    pub fn from_u64(value: u64) -> Self {
        Self {
            index: value as u32,
            generation: (value >> 32) as u32,
        }
    }
}

type Handler<A> = Arc<dyn Fn(&A) + Send + Sync + 'static>;

struct Entry<A> {
    handler: Handler<A>,
    live: ReentrantMutex<Cell<bool>>,
}

struct Slot<A> {
    generation: u32,
    entry: Option<Arc<Entry<A>>>,
}

struct Arena<A> {
    slots: Vec<Slot<A>>,
    free: Vec<u32>,
    len: usize,
}

/// Thread-safe list of handlers invoked together
pub struct Broadcaster<A> {
    arena: Mutex<Arena<A>>,
}

impl<A> Default for Broadcaster<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Broadcaster<A> {
    /// Create an empty broadcaster
    pub fn new() -> Self {
        Self {
            arena: Mutex::new(Arena {
                slots: Vec::new(),
                free: Vec::new(),
                len: 0,
            }),
        }
    }

    /// Add a handler
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let entry = Arc::new(Entry {
            handler: Arc::new(handler),
            live: ReentrantMutex::new(Cell::new(true)),
        });

        let mut arena = self.arena.lock();
        arena.len += 1;
        let token = match arena.free.pop() {
            Some(index) => {
                let slot = &mut arena.slots[index as usize];
                slot.entry = Some(entry);
                SubscriptionToken {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = arena.slots.len() as u32;
                arena.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                SubscriptionToken {
                    index,
                    generation: 0,
                }
            }
        };
        trace!("Subscribed handler {:?}", token);
        token
    }

    /// Remove a handler
    ///
    /// Waits for an in-flight invocation of this handler on another thread
    /// to finish. Unknown or stale tokens fail with `NotFound`.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> Result<()> {
        let entry = {
            let mut arena = self.arena.lock();
            let slot = arena
                .slots
                .get_mut(token.index as usize)
                .filter(|slot| slot.generation == token.generation && slot.entry.is_some())
                .ok_or_else(|| {
                    RemoteViewError::not_found(format!("subscription {:#x}", token.as_u64()))
                })?;
            let entry = slot.entry.take();
            slot.generation = slot.generation.wrapping_add(1);
            arena.free.push(token.index);
            arena.len -= 1;
            entry
        };

        if let Some(entry) = entry {
            let live = entry.live.lock();
            live.set(false);
        }
        trace!("Unsubscribed handler {:?}", token);
        Ok(())
    }

    /// Invoke every live handler once with `arg`
    ///
    /// Returns the number of handlers invoked. Handlers may subscribe or
    /// unsubscribe while this runs.
    pub fn notify_all(&self, arg: &A) -> usize {
        let entries: Vec<Arc<Entry<A>>> = {
            let arena = self.arena.lock();
            arena
                .slots
                .iter()
                .filter_map(|slot| slot.entry.clone())
                .collect()
        };

        let mut invoked = 0;
        for entry in entries {
            let live = entry.live.lock();
            if live.get() {
                (entry.handler)(arg);
                invoked += 1;
            }
        }
        invoked
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.arena.lock().len
    }

    /// Whether there are no subscriptions
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every subscription
    pub fn clear(&self) {
        let entries: Vec<Arc<Entry<A>>> = {
            let mut arena = self.arena.lock();
            let mut taken = Vec::new();
            for (index, slot) in arena.slots.iter_mut().enumerate() {
                if let Some(entry) = slot.entry.take() {
                    slot.generation = slot.generation.wrapping_add(1);
                    taken.push((index as u32, entry));
                }
            }
            for (index, _) in &taken {
                arena.free.push(*index);
            }
            arena.len = 0;
            taken.into_iter().map(|(_, entry)| entry).collect()
        };

        for entry in entries {
            entry.live.lock().set(false);
        }
    }
}
