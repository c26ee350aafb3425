use crate::{Coordinator, Inner};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use ipcache_core::{cidr, Identity, IdentityAllocator, IpCacheStore, IpNet, Labels, NumericIdentity};
use std::{net::IpAddr, sync::Arc};
use tokio::time::{self, Duration};
use tracing::{debug, instrument, trace};

/// Identities created by an allocation call, keyed by prefix.
pub type NewlyAllocated = HashMap<String, Arc<Identity>>;

#[derive(Debug, thiserror::Error)]
pub enum AllocateError {
    #[error("failed to allocate identity for cidr {prefix}: {error}")]
    Allocator { prefix: IpNet, error: anyhow::Error },

    #[error("timed out allocating identity for cidr {prefix} after {timeout:?}")]
    Timeout { prefix: IpNet, timeout: Duration },
}

// === impl Coordinator ===

impl<A, S> Coordinator<A, S>
where
    A: IdentityAllocator,
    S: IpCacheStore,
{
    /// Allocates identities for a list of prefixes. `None` entries are skipped.
    ///
    /// If any allocation fails, every identity allocated earlier in this call is released and the
    /// error is returned; nothing is upserted.
    ///
    /// `previous` may hold, for each index of `prefixes`, the numeric identity previously used
    /// for that prefix ([`NumericIdentity::INVALID`] when there is none). A previous identity is
    /// reused if it is still free; otherwise a fresh one is allocated.
    ///
    /// When `newly_allocated` is `None`, identities created by this call are upserted into the IP
    /// cache before returning. Otherwise they are added to `newly_allocated` and the caller is
    /// responsible for passing them to [`Coordinator::upsert_generated_identities`]; this allows
    /// several allocations to be upserted together.
    ///
    /// The returned identities are deduplicated by prefix. On success, the caller must
    /// eventually release the prefixes via [`Coordinator::release_cidr_identities_by_cidr`] or
    /// [`Coordinator::release_cidr_identities_by_id`].
    #[instrument(skip_all, fields(prefixes = prefixes.len()))]
    pub async fn allocate_cidrs(
        &self,
        prefixes: &[Option<IpNet>],
        previous: Option<&[NumericIdentity]>,
        newly_allocated: Option<&mut NewlyAllocated>,
    ) -> Result<Vec<Arc<Identity>>, AllocateError> {
        let mut created = NewlyAllocated::new();
        let upsert = newly_allocated.is_none();
        let newly_allocated = newly_allocated.unwrap_or(&mut created);

        // Every identity referenced by this call, so that it may be undone on error.
        let mut used = Vec::with_capacity(prefixes.len());
        let mut allocated = Vec::with_capacity(prefixes.len());
        let mut seen = HashSet::with_capacity(prefixes.len());
        {
            let metadata = self.inner.metadata.read().await;
            let _lock = self.inner.mutex.write().await;
            for (i, prefix) in prefixes.iter().enumerate() {
                let prefix = match prefix {
                    Some(prefix) => prefix.trunc(),
                    None => continue,
                };

                let labels = metadata.labels_for(prefix);
                let previous = previous
                    .and_then(|ids| ids.get(i).copied())
                    .unwrap_or(NumericIdentity::INVALID);
                let (id, is_new) = match self.inner.allocate(prefix, labels, previous).await {
                    Ok(allocation) => allocation,
                    Err(error) => {
                        self.inner.release_all(&used).await;
                        return Err(error);
                    }
                };

                let prefix = prefix.to_string();
                used.push(id.clone());
                if is_new {
                    newly_allocated.insert(prefix.clone(), id.clone());
                }
                if seen.insert(prefix) {
                    allocated.push(id);
                }
            }
        }

        if upsert {
            self.upsert_generated_identities(newly_allocated, &[]);
        }

        Ok(allocated)
    }

    /// Allocates identities for individual addresses, each treated as a host-length prefix.
    ///
    /// On success, the caller must eventually release the identities via
    /// [`Coordinator::release_cidr_identities_by_id`].
    pub async fn allocate_cidrs_for_ips(
        &self,
        ips: &[IpAddr],
        newly_allocated: Option<&mut NewlyAllocated>,
    ) -> Result<Vec<Arc<Identity>>, AllocateError> {
        self.allocate_cidrs(&cidr::prefixes_from_ips(ips), None, newly_allocated)
            .await
    }
}

// === impl Inner ===

impl<A, S> Inner<A, S>
where
    A: IdentityAllocator,
    S: IpCacheStore,
{
    /// Allocates the identity for `prefix`, bounded by the allocation timeout.
    async fn allocate(
        &self,
        prefix: IpNet,
        labels: Labels,
        previous: NumericIdentity,
    ) -> Result<(Arc<Identity>, bool), AllocateError> {
        let timeout = self.config.allocation_timeout();
        let allocation = self
            .allocator
            .allocate_identity(labels, false, previous);
        match time::timeout(timeout, allocation).await {
            Ok(Ok((id, is_new))) => {
                trace!(%prefix, id = %id.id, is_new, "Allocated");
                Ok((id, is_new))
            }
            Ok(Err(error)) => Err(AllocateError::Allocator { prefix, error }),
            Err(_) => Err(AllocateError::Timeout { prefix, timeout }),
        }
    }

    /// Releases identities allocated by a call that failed.
    ///
    /// Errors and timeouts are ignored: the caller never received these identities.
    async fn release_all(&self, identities: &[Arc<Identity>]) {
        for id in identities {
            if let Err(error) = self.release(id).await {
                debug!(id = %id.id, %error, "Failed to roll back identity");
            }
        }
    }
}
