//! CIDR identity allocation for the IP cache.
//!
//! Policies that select traffic by IP prefix need a numeric identity for each prefix, and the
//! datapath needs an IP cache entry binding the prefix to that identity. The [`Coordinator`] owns
//! that relationship:
//!
//! - [`Coordinator::allocate_cidrs`] derives each prefix's labels, allocates (or takes another
//!   reference to) its identity and upserts newly-allocated identities into the IP cache. A failed
//!   allocation rolls back every identity allocated earlier in the same call.
//! - [`Coordinator::release_cidr_identities_by_cidr`] and
//!   [`Coordinator::release_cidr_identities_by_id`] enqueue prefixes on a deferred release queue.
//!   The [`Releaser`] task drains the queue in batches, drops one reference per prefix and deletes
//!   the IP cache entry of every identity that was freed.
//! - [`Coordinator::upsert_generated_identities`] restores IP cache entries for identities that
//!   are still referenced but whose entries have gone missing.
//!
//! ```text
//! allocate: [ prefixes ] -> [ labels ] -> [ IdentityAllocator ] -> [ IpCacheStore::upsert ]
//! release:  [ prefixes ] -> [ ReleaseQueue ] -> [ Releaser ] -> [ IdentityAllocator ] -> [ IpCacheStore::delete ]
//! ```
//!
//! ## Locking
//!
//! Two locks are held by the coordinator: the metadata lock, guarding per-address label
//! overrides, and the main lock, serializing identity allocation against identity release. When
//! both are held, the metadata lock is always acquired first. IP cache upserts that follow an
//! allocation are performed after both locks are released; the store synchronizes internally.
//! Release holds the main lock across both the allocator release and the IP cache deletion, so
//! that a concurrent allocation either observes the identity before it is freed (and takes a
//! reference that prevents the deletion) or allocates it anew after the entry has been deleted
//! (and upserts it again).

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod allocate;
mod config;
mod metadata;
mod metrics;
mod queue;
mod release;
mod upsert;


pub use self::{
    allocate::{AllocateError, NewlyAllocated},
    config::Config,
    metrics::Metrics,
    release::Releaser,
};
use self::{metadata::Metadata, queue::ReleaseQueue};
use ipcache_core::{IdentityAllocator, IpCacheStore, Labels};
use std::{net::IpAddr, sync::Arc};
use tokio::sync::RwLock;
use tracing::debug;

/// Coordinates CIDR identity allocation and release against an identity allocator and an IP
/// cache store.
pub struct Coordinator<A, S> {
    inner: Arc<Inner<A, S>>,
    releases: ReleaseQueue,
}

struct Inner<A, S> {
    allocator: A,
    store: S,

    /// Acquired before `mutex` whenever both are held.
    metadata: RwLock<Metadata>,

    /// Serializes allocation against release.
    mutex: RwLock<()>,

    metrics: Metrics,
    config: Config,
}

// === impl Coordinator ===

impl<A, S> Coordinator<A, S>
where
    A: IdentityAllocator,
    S: IpCacheStore,
{
    /// Builds a coordinator and the task that processes its deferred releases. The caller must
    /// spawn [`Releaser::run`]; releases are not processed until it runs.
    pub fn new(allocator: A, store: S, metrics: Metrics, config: Config) -> (Self, Releaser<A, S>) {
        let inner = Arc::new(Inner {
            allocator,
            store,
            metadata: RwLock::new(Metadata::default()),
            mutex: RwLock::new(()),
            metrics,
            config,
        });
        let releases = ReleaseQueue::default();
        let releaser = Releaser::new(inner.clone(), releases.clone());
        (Self { inner, releases }, releaser)
    }

    /// Sets the labels merged into the identity of any prefix whose network address is `ip`.
    ///
    /// Only affects subsequent allocations.
    pub async fn upsert_metadata(&self, ip: IpAddr, labels: Labels) {
        self.inner.metadata.write().await.upsert(ip, labels);
    }

    pub async fn remove_metadata(&self, ip: IpAddr) {
        self.inner.metadata.write().await.remove(ip);
    }

    /// Resolves once every release enqueued before this call has been processed.
    ///
    /// Does not resolve until the [`Releaser`] runs. Once the [`Releaser`] has stopped, resolves
    /// immediately; releases still pending are never processed.
    pub async fn flush_releases(&self) {
        if self.releases.flush().await.is_err() {
            debug!(
                pending = self.releases.len(),
                "Release worker has stopped; pending releases will not be processed"
            );
        }
    }

    /// Returns the number of prefixes awaiting release.
    pub fn pending_releases(&self) -> usize {
        self.releases.len()
    }
}

impl<A, S> Clone for Coordinator<A, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            releases: self.releases.clone(),
        }
    }
}
