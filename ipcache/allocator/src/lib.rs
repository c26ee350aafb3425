//! An in-process, reference-counted allocator for local-scope identities.
//!
//! Each distinct label set maps to one identity. Allocating an already-known label set takes
//! another reference to its identity; the identity is freed when its last reference is released.
//! Numeric identities are drawn from the local scope (see
//! [`NumericIdentity::LOCAL_IDENTITY_FLAG`]), so they are never shared with other nodes.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]


use ahash::AHashMap as HashMap;
use anyhow::{bail, Result};
use ipcache_core::{Identity, IdentityAllocator, Labels, NumericIdentity};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct LocalIdentityAllocator {
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    by_labels: HashMap<Labels, Slot>,
    by_id: HashMap<NumericIdentity, Labels>,

    /// The next numeric identity to consider when no usable hint is provided.
    cursor: u32,
    min: u32,
    max: u32,
}

#[derive(Debug)]
struct Slot {
    identity: Arc<Identity>,
    refs: usize,
}

// === impl LocalIdentityAllocator ===

impl Default for LocalIdentityAllocator {
    fn default() -> Self {
        Self::with_range(NumericIdentity::MIN_LOCAL, NumericIdentity::MAX_LOCAL)
    }
}

impl LocalIdentityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator that only hands out identities in `min..=max`.
    ///
    /// # Panics
    ///
    /// If `min` is greater than `max`.
    pub fn with_range(min: NumericIdentity, max: NumericIdentity) -> Self {
        assert!(min <= max, "identity range must not be empty");
        Self {
            state: Mutex::new(State {
                by_labels: HashMap::new(),
                by_id: HashMap::new(),
                cursor: min.get(),
                min: min.get(),
                max: max.get(),
            }),
        }
    }

    /// Returns the number of outstanding references to `id`.
    pub fn ref_count(&self, id: NumericIdentity) -> usize {
        let state = self.state.lock();
        state
            .by_id
            .get(&id)
            .and_then(|labels| state.by_labels.get(labels))
            .map(|slot| slot.refs)
            .unwrap_or(0)
    }

    /// Returns the number of allocated identities.
    pub fn len(&self) -> usize {
        self.state.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl IdentityAllocator for LocalIdentityAllocator {
    async fn allocate_identity(
        &self,
        labels: Labels,
        _is_local: bool,
        previous: NumericIdentity,
    ) -> Result<(Arc<Identity>, bool)> {
        self.state.lock().allocate(labels, previous)
    }

    async fn release(&self, identity: &Identity, _is_local: bool) -> Result<bool> {
        self.state.lock().release(identity)
    }

    async fn lookup_identity(&self, labels: &Labels) -> Option<Arc<Identity>> {
        let state = self.state.lock();
        state.by_labels.get(labels).map(|s| s.identity.clone())
    }

    async fn lookup_identity_by_id(&self, id: NumericIdentity) -> Option<Arc<Identity>> {
        let state = self.state.lock();
        let labels = state.by_id.get(&id)?;
        state.by_labels.get(labels).map(|s| s.identity.clone())
    }
}

// === impl State ===

impl State {
    fn allocate(
        &mut self,
        labels: Labels,
        previous: NumericIdentity,
    ) -> Result<(Arc<Identity>, bool)> {
        if let Some(slot) = self.by_labels.get_mut(&labels) {
            slot.refs += 1;
            trace!(id = %slot.identity.id, refs = slot.refs, "Reusing identity");
            return Ok((slot.identity.clone(), false));
        }

        let id = match self.take_previous(previous) {
            Some(id) => id,
            None => self.next_free()?,
        };

        let identity = Arc::new(Identity::new(id, labels.clone()));
        debug!(%id, %labels, "Allocated identity");
        self.by_id.insert(id, labels.clone());
        self.by_labels.insert(
            labels,
            Slot {
                identity: identity.clone(),
                refs: 1,
            },
        );
        Ok((identity, true))
    }

    fn release(&mut self, identity: &Identity) -> Result<bool> {
        let slot = match self.by_labels.get_mut(&identity.labels) {
            Some(slot) if slot.identity.id == identity.id => slot,
            _ => bail!("identity {} is not allocated", identity.id),
        };

        slot.refs -= 1;
        if slot.refs > 0 {
            trace!(id = %identity.id, refs = slot.refs, "Released reference");
            return Ok(false);
        }

        self.by_labels.remove(&identity.labels);
        self.by_id.remove(&identity.id);
        debug!(id = %identity.id, "Freed identity");
        Ok(true)
    }

    /// Returns the previously-used identity if it is in range and still free.
    fn take_previous(&self, previous: NumericIdentity) -> Option<NumericIdentity> {
        if !previous.is_valid() || !self.in_range(previous) {
            return None;
        }
        if self.by_id.contains_key(&previous) {
            trace!(%previous, "Previous identity is in use");
            return None;
        }
        Some(previous)
    }

    fn next_free(&mut self) -> Result<NumericIdentity> {
        let span = u64::from(self.max - self.min) + 1;
        for _ in 0..span {
            let candidate = NumericIdentity::new(self.cursor);
            self.cursor = if self.cursor >= self.max {
                self.min
            } else {
                self.cursor + 1
            };
            if !self.by_id.contains_key(&candidate) {
                return Ok(candidate);
            }
        }

        bail!(
            "local identity space exhausted: {} identities in use",
            self.by_id.len()
        )
    }

    #[inline]
    fn in_range(&self, id: NumericIdentity) -> bool {
        (self.min..=self.max).contains(&id.get())
    }
}
