use crate::{Coordinator, NewlyAllocated};
use ahash::AHashMap as HashMap;
use ipcache_core::{
    CachedIdentity, Identity, IdentityAllocator, IdentityKind, IpCacheStore, NumericIdentity,
    Source,
};
use std::sync::Arc;
use tracing::{debug, warn};

impl<A, S> Coordinator<A, S>
where
    A: IdentityAllocator,
    S: IpCacheStore,
{
    /// Upserts every identity in `newly_allocated` into the IP cache, then upserts any CIDR
    /// identity in `used` whose prefix has no IP cache entry.
    ///
    /// An identity in `used` that is missing from the IP cache is still referenced, so its entry
    /// should never have been deleted. Each such restoration is counted as an unexpected recovery.
    /// This never removes entries.
    pub fn upsert_generated_identities(
        &self,
        newly_allocated: &NewlyAllocated,
        used: &[Arc<Identity>],
    ) {
        for (prefix, id) in newly_allocated.iter() {
            self.inner.upsert_generated(prefix, id.id);
        }
        if used.is_empty() {
            return;
        }

        let mut missing = HashMap::new();
        for id in used {
            let prefix = match id.kind {
                IdentityKind::Cidr(net) => net.to_string(),
                IdentityKind::Generic => {
                    warn!(id = %id.id, labels = %id.labels, "Attempting to upsert non-CIDR identity");
                    continue;
                }
            };
            if self.inner.store.lookup_by_ip(&prefix).is_some() {
                continue;
            }
            missing.insert(prefix, id.id);
        }

        for (prefix, id) in missing {
            warn!(%prefix, %id, "Restoring missing IP cache entry for referenced identity");
            self.inner.metrics.inc_unexpected_recovery();
            self.inner.upsert_generated(&prefix, id);
        }
    }
}

impl<A, S: IpCacheStore> crate::Inner<A, S> {
    pub(crate) fn upsert_generated(&self, prefix: &str, id: NumericIdentity) {
        let identity = CachedIdentity {
            id,
            source: Source::Generated,
        };
        if !self.store.upsert(prefix, None, 0, None, identity) {
            debug!(%prefix, %id, "IP cache kept an entry from a higher-precedence source");
        }
    }
}
