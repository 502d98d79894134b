//! Context registry: a bounded, generation-checked handle table.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::context::{ClientId, Context, ContextHandle};
use crate::core::error::DispatchError;

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Arc<Context>>,
}

#[derive(Debug)]
struct RegistryInner {
    slots: Vec<Slot>,
    /// Vacated slot indexes (0-based) available for reuse.
    free: Vec<u32>,
    live: usize,
}

/// Handle table mapping small integer handles to reference-counted contexts.
///
/// Slots are reused, but each reuse bumps the slot's generation tag; a stale
/// handle kept past release fails the generation check instead of aliasing
/// the new occupant. Capacity is bounded: allocation beyond `max_contexts`
/// live entries fails with `ResourceExhausted`.
pub struct ContextRegistry {
    max_contexts: usize,
    inner: Mutex<RegistryInner>,
}

impl ContextRegistry {
    /// Create a registry holding at most `max_contexts` live entries.
    pub(crate) fn new(max_contexts: usize) -> Self {
        Self {
            max_contexts,
            inner: Mutex::new(RegistryInner {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    /// Create a context owned by `client` and insert it under a fresh handle.
    ///
    /// # Errors
    ///
    /// [`DispatchError::ResourceExhausted`] when the table is full.
    pub fn allocate(&self, client: ClientId) -> Result<ContextHandle, DispatchError> {
        let mut inner = self.inner.lock();
        if inner.live >= self.max_contexts {
            return Err(DispatchError::ResourceExhausted(format!(
                "context table full ({} live)",
                inner.live
            )));
        }

        let slot_idx = match inner.free.pop() {
            Some(idx) => idx,
            None => {
                inner.slots.push(Slot {
                    generation: 1,
                    entry: None,
                });
                (inner.slots.len() - 1) as u32
            }
        };

        let slot = &mut inner.slots[slot_idx as usize];
        let handle = ContextHandle {
            index: slot_idx + 1,
            generation: slot.generation,
        };
        slot.entry = Some(Arc::new(Context::new(handle, client)));
        inner.live += 1;
        tracing::debug!(handle = %handle, client = %client, live = inner.live, "context allocated");
        Ok(handle)
    }

    /// Look up a live context without taking ownership.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidHandle`] when the slot is out of range, vacant,
    /// or carries a different generation.
    pub fn lookup(&self, handle: ContextHandle) -> Result<Arc<Context>, DispatchError> {
        let inner = self.inner.lock();
        let slot = handle
            .index
            .checked_sub(1)
            .and_then(|idx| inner.slots.get(idx as usize))
            .ok_or(DispatchError::InvalidHandle(handle))?;
        if slot.generation != handle.generation {
            return Err(DispatchError::InvalidHandle(handle));
        }
        slot.entry
            .clone()
            .ok_or(DispatchError::InvalidHandle(handle))
    }

    /// Vacate a handle's slot, returning its context.
    ///
    /// The caller must already have drained any job that could still
    /// dereference the context. The slot's generation is bumped so the
    /// removed handle can never resolve again.
    pub fn remove(&self, handle: ContextHandle) -> Option<Arc<Context>> {
        let mut inner = self.inner.lock();
        let idx = handle.index.checked_sub(1)? as usize;
        let slot = inner.slots.get_mut(idx)?;
        if slot.generation != handle.generation || slot.entry.is_none() {
            return None;
        }
        let ctx = slot.entry.take();
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(idx as u32);
        inner.live -= 1;
        tracing::debug!(handle = %handle, live = inner.live, "context removed");
        ctx
    }

    /// Vacate every entry owned by `client`, returning the contexts for
    /// cancellation. Mirrors process-death cleanup on client disconnect.
    pub fn remove_all_for(&self, client: ClientId) -> Vec<Arc<Context>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut removed = Vec::new();
        for (idx, slot) in inner.slots.iter_mut().enumerate() {
            let owned = slot
                .entry
                .as_ref()
                .is_some_and(|ctx| ctx.client() == client);
            if owned {
                if let Some(ctx) = slot.entry.take() {
                    slot.generation = slot.generation.wrapping_add(1);
                    removed.push(ctx);
                }
                inner.free.push(idx as u32);
            }
        }
        inner.live -= removed.len();
        if !removed.is_empty() {
            tracing::info!(
                client = %client,
                count = removed.len(),
                "contexts released on disconnect"
            );
        }
        removed
    }

    /// Number of live contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().live
    }

    /// Whether the table has no live contexts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("max_contexts", &self.max_contexts)
            .field("live", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_lookup_roundtrip() {
        let reg = ContextRegistry::new(8);
        let handle = reg.allocate(ClientId::new(1)).unwrap();
        let ctx = reg.lookup(handle).unwrap();
        assert_eq!(ctx.handle(), handle);
        assert_eq!(ctx.client(), ClientId::new(1));
    }

    #[test]
    fn lookup_unknown_handle_fails() {
        let reg = ContextRegistry::new(8);
        let err = reg
            .lookup(ContextHandle { index: 5, generation: 1 })
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidHandle(_)));
    }

    #[test]
    fn stale_handle_cannot_alias_reused_slot() {
        let reg = ContextRegistry::new(8);
        let old = reg.allocate(ClientId::new(1)).unwrap();
        assert!(reg.remove(old).is_some());

        // Reuse lands on the same slot with a new generation.
        let fresh = reg.allocate(ClientId::new(2)).unwrap();
        assert_eq!(fresh.index, old.index);
        assert_ne!(fresh.generation, old.generation);

        assert!(reg.lookup(old).is_err());
        assert!(reg.lookup(fresh).is_ok());
    }

    #[test]
    fn double_remove_is_noop() {
        let reg = ContextRegistry::new(8);
        let handle = reg.allocate(ClientId::new(1)).unwrap();
        assert!(reg.remove(handle).is_some());
        assert!(reg.remove(handle).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn allocation_bounded_by_capacity() {
        let reg = ContextRegistry::new(2);
        reg.allocate(ClientId::new(1)).unwrap();
        reg.allocate(ClientId::new(1)).unwrap();
        let err = reg.allocate(ClientId::new(1)).unwrap_err();
        assert!(matches!(err, DispatchError::ResourceExhausted(_)));
    }

    #[test]
    fn remove_all_for_releases_only_that_client() {
        let reg = ContextRegistry::new(8);
        let a1 = reg.allocate(ClientId::new(1)).unwrap();
        let b = reg.allocate(ClientId::new(2)).unwrap();
        let a2 = reg.allocate(ClientId::new(1)).unwrap();

        let removed = reg.remove_all_for(ClientId::new(1));
        assert_eq!(removed.len(), 2);
        assert_eq!(reg.len(), 1);
        assert!(reg.lookup(a1).is_err());
        assert!(reg.lookup(a2).is_err());
        assert!(reg.lookup(b).is_ok());
    }
}
