//! The IP cache: an index of prefixes to the identities the datapath enforces policy with.
//!
//! Each entry is keyed by the canonical string form of a prefix (e.g. `10.0.0.0/24`, or
//! `192.0.2.1/32` for a single address) and records the identity bound to it along with the
//! source that wrote it. Sources arbitrate overwrites: an entry written by a stronger source (e.g.
//! the Kubernetes API) is never replaced by a weaker one (e.g. a generated CIDR identity).
//!
//! The index is shared as an `Arc<Store>`, a lock around the index that is only held for the
//! duration of a single map operation, so the index may be updated from any task.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
#[cfg(test)]
mod tests;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use ipcache_core::{CachedIdentity, IpCacheStore, K8sMetadata, NumericIdentity, Source};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::{collections::hash_map::Entry as HashEntry, net::IpAddr, sync::Arc};
use tracing::{debug, trace};

pub type SharedIndex = Arc<Store>;

/// A lock around an [`Index`], exposed to the coordinator as an [`IpCacheStore`].
#[derive(Debug, Default)]
pub struct Store(RwLock<Index>);

#[derive(Debug, Default)]
pub struct Index {
    entries: HashMap<String, Entry>,

    /// Reverse index of identities to the prefixes that reference them.
    by_identity: HashMap<NumericIdentity, HashSet<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub identity: CachedIdentity,
    pub host_ip: Option<IpAddr>,
    pub encrypt_key: u8,
    pub k8s_meta: Option<K8sMetadata>,
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(Store::default())
    }

    pub fn upsert(&mut self, prefix: &str, entry: Entry) -> bool {
        let prior = match self.entries.entry(prefix.to_string()) {
            HashEntry::Vacant(e) => {
                debug!(%prefix, id = %entry.identity.id, source = %entry.identity.source, "Adding");
                e.insert(entry.clone());
                None
            }
            HashEntry::Occupied(mut e) => {
                let existing = e.get().identity;
                if !Source::allows_overwrite(existing.source, entry.identity.source) {
                    debug!(
                        %prefix,
                        existing = %existing.source,
                        new = %entry.identity.source,
                        "Skipping overwrite by lower-precedence source"
                    );
                    return false;
                }
                if *e.get() == entry {
                    trace!(%prefix, "Unchanged");
                    return true;
                }
                debug!(%prefix, id = %entry.identity.id, source = %entry.identity.source, "Updating");
                Some(std::mem::replace(e.get_mut(), entry.clone()).identity.id)
            }
        };

        if let Some(prior) = prior {
            self.unlink(prior, prefix);
        }
        self.by_identity
            .entry(entry.identity.id)
            .or_default()
            .insert(prefix.to_string());
        true
    }

    pub fn delete(&mut self, prefix: &str, source: Source) -> bool {
        let id = match self.entries.get(prefix) {
            Some(entry) if entry.identity.source == source => entry.identity.id,
            Some(entry) => {
                debug!(
                    %prefix,
                    existing = %entry.identity.source,
                    %source,
                    "Skipping delete of entry written by another source"
                );
                return false;
            }
            None => {
                trace!(%prefix, "Not found");
                return false;
            }
        };

        self.entries.remove(prefix);
        self.unlink(id, prefix);
        debug!(%prefix, %id, "Deleted");
        true
    }

    #[inline]
    pub fn get(&self, prefix: &str) -> Option<&Entry> {
        self.entries.get(prefix)
    }

    /// Returns the prefixes bound to `id`, sorted.
    pub fn lookup_by_identity(&self, id: NumericIdentity) -> Vec<String> {
        let mut prefixes = self
            .by_identity
            .get(&id)
            .map(|p| p.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        prefixes.sort();
        prefixes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn count_by_source(&self) -> HashMap<Source, usize> {
        let mut counts = HashMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.identity.source).or_default() += 1;
        }
        counts
    }

    fn unlink(&mut self, id: NumericIdentity, prefix: &str) {
        if let HashEntry::Occupied(mut prefixes) = self.by_identity.entry(id) {
            prefixes.get_mut().remove(prefix);
            if prefixes.get().is_empty() {
                prefixes.remove_entry();
            }
        }
    }
}

// === impl Store ===

impl Store {
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.0.read()
    }

    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.0.write()
    }
}

impl IpCacheStore for Store {
    fn upsert(
        &self,
        prefix: &str,
        host_ip: Option<IpAddr>,
        encrypt_key: u8,
        k8s_meta: Option<K8sMetadata>,
        identity: CachedIdentity,
    ) -> bool {
        self.write().upsert(
            prefix,
            Entry {
                identity,
                host_ip,
                encrypt_key,
                k8s_meta,
            },
        )
    }

    fn delete(&self, prefix: &str, source: Source) -> bool {
        self.write().delete(prefix, source)
    }

    fn lookup_by_ip(&self, prefix: &str) -> Option<CachedIdentity> {
        self.read().get(prefix).map(|e| e.identity)
    }
}
