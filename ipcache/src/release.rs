use crate::{queue::ReleaseQueue, Coordinator, Inner};
use ipcache_core::{
    cidr, Identity, IdentityAllocator, IdentityKind, IpCacheStore, IpNet, Labels,
    NumericIdentity, Source,
};
use std::sync::Arc;
use tokio::time;
use tracing::{debug, error, instrument, trace, warn};

const REASON_CIDR: &str = "cidr-prefix-release";
const REASON_SELECTOR: &str = "selector-prefix-release";

/// Processes deferred releases in batches.
pub struct Releaser<A, S> {
    inner: Arc<Inner<A, S>>,
    queue: ReleaseQueue,
}

// === impl Coordinator ===

impl<A, S> Coordinator<A, S>
where
    A: IdentityAllocator,
    S: IpCacheStore,
{
    /// Releases the identities of a list of prefixes. When the last reference to an identity is
    /// released, its IP cache entry is deleted.
    ///
    /// The release is deferred; this returns immediately.
    pub fn release_cidr_identities_by_cidr(&self, nets: &[IpNet]) {
        let prefixes = nets.iter().map(|n| n.trunc().to_string()).collect::<Vec<_>>();
        self.enqueue(prefixes, REASON_CIDR);
    }

    /// Releases the given CIDR identities. When the last reference to an identity is released,
    /// its IP cache entry is deleted.
    ///
    /// Identities that are no longer allocated or that were not derived from a prefix are
    /// skipped: the latter indicates a caller bug and the identity is leaked rather than
    /// releasing an unrelated entry.
    #[instrument(skip_all, fields(ids = ids.len()))]
    pub async fn release_cidr_identities_by_id(&self, ids: &[NumericIdentity]) {
        let mut prefixes = Vec::with_capacity(ids.len());
        for &nid in ids {
            match self.inner.allocator.lookup_identity_by_id(nid).await {
                Some(id) => match id.kind {
                    IdentityKind::Cidr(net) => prefixes.push(net.to_string()),
                    IdentityKind::Generic => warn!(
                        id = %nid,
                        labels = %id.labels,
                        "Unexpected release of non-CIDR identity, will leak this identity"
                    ),
                },
                None => warn!(
                    id = %nid,
                    "Unexpected release of numeric identity that is no longer allocated"
                ),
            }
        }
        self.enqueue(prefixes, REASON_SELECTOR);
    }

    fn enqueue(&self, prefixes: Vec<String>, reason: &'static str) {
        if prefixes.is_empty() {
            return;
        }
        let added = self.releases.enqueue(prefixes, reason);
        self.inner.metrics.inc_enqueued(reason, added);
    }
}

// === impl Releaser ===

impl<A, S> Releaser<A, S>
where
    A: IdentityAllocator,
    S: IpCacheStore,
{
    pub(crate) fn new(inner: Arc<Inner<A, S>>, queue: ReleaseQueue) -> Self {
        Self { inner, queue }
    }

    /// Processes releases until shutdown is signaled.
    ///
    /// Enqueued prefixes are coalesced for the configured release interval (or until a flush is
    /// requested) and then released as one batch. Releases still pending at shutdown are
    /// processed before the drain handle is released.
    pub async fn run(self, drain: drain::Watch) {
        let interval = self.inner.config.release_interval();
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        loop {
            tokio::select! {
                biased;

                handle = (&mut shutdown) => {
                    debug!(pending = self.queue.len(), "Shutting down");
                    handle
                        .release_after(async {
                            self.process().await;
                            self.queue.close();
                        })
                        .await;
                    return;
                }

                _ = self.queue.notified() => {}
            }

            let deadline = time::Instant::now() + interval;
            while !self.queue.flush_requested() {
                tokio::select! {
                    _ = time::sleep_until(deadline) => break,
                    _ = self.queue.notified() => {}
                }
            }

            self.process().await;
        }
    }

    async fn process(&self) {
        let mut batch = self.queue.take();
        if !batch.prefixes.is_empty() {
            debug!(prefixes = batch.prefixes.len(), reasons = ?batch.reasons, "Releasing");
            let prefixes = std::mem::take(&mut batch.prefixes);
            self.inner.release_cidr_identities(prefixes).await;
        }
        batch.complete();
    }
}

impl<A, S> Drop for Releaser<A, S> {
    fn drop(&mut self) {
        self.queue.close();
    }
}

// === impl Inner ===

impl<A, S> Inner<A, S>
where
    A: IdentityAllocator,
    S: IpCacheStore,
{
    /// Drops one reference to the identity of each prefix and deletes the IP cache entries of the
    /// identities that were freed.
    ///
    /// Malformed prefixes and prefixes without an identity are skipped.
    #[instrument(skip_all, fields(prefixes = prefixes.len()))]
    pub(crate) async fn release_cidr_identities(&self, prefixes: Vec<String>) {
        let candidates = {
            let metadata = self.metadata.read().await;
            prefixes
                .into_iter()
                .filter_map(|prefix| match prefix.parse::<IpNet>() {
                    Ok(net) => {
                        let net = net.trunc();
                        Some((net, metadata.labels_for(net)))
                    }
                    Err(error) => {
                        error!(%prefix, %error, "Unable to parse CIDR during IP cache release");
                        None
                    }
                })
                .collect::<Vec<_>>()
        };

        // Allocations must not interleave between an identity being freed and its entry being
        // deleted.
        let _lock = self.mutex.write().await;

        let mut released = Vec::with_capacity(candidates.len());
        for (net, labels) in candidates {
            let id = match self.lookup_identity(net, &labels).await {
                Some(id) => id,
                None => {
                    error!(prefix = %net, "Unable to find identity of previously used CIDR");
                    continue;
                }
            };

            match self.release(&id).await {
                Ok(true) => released.push(net.to_string()),
                Ok(false) => trace!(prefix = %net, id = %id.id, "Identity is still referenced"),
                Err(error) => warn!(
                    prefix = %net,
                    id = %id.id,
                    %error,
                    "Unable to release CIDR identity. Ignoring error. Identity may be leaked"
                ),
            }
        }

        for prefix in &released {
            self.store.delete(prefix, Source::Generated);
        }
        self.metrics.inc_released(released.len());
    }

    /// Finds the identity of a prefix. If the prefix's metadata changed since it was allocated,
    /// the identity may have been allocated from its CIDR labels alone.
    async fn lookup_identity(&self, net: IpNet, labels: &Labels) -> Option<Arc<Identity>> {
        if let Some(id) = self.allocator.lookup_identity(labels).await {
            return Some(id);
        }
        let plain = cidr::cidr_labels(net);
        if plain == *labels {
            return None;
        }
        self.allocator.lookup_identity(&plain).await
    }

    /// Drops one reference to `id`, bounded by the allocation timeout.
    pub(crate) async fn release(&self, id: &Identity) -> anyhow::Result<bool> {
        let timeout = self.config.allocation_timeout();
        match time::timeout(timeout, self.allocator.release(id, false)).await {
            Ok(res) => res,
            Err(_) => Err(anyhow::anyhow!("timed out after {:?}", timeout)),
        }
    }
}
