use crate::{NumericIdentity, Source};
use std::{net::IpAddr, sync::Arc};

/// The identity bound to a prefix in the IP cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CachedIdentity {
    pub id: NumericIdentity,
    pub source: Source,
}

/// Kubernetes ownership metadata attached to an IP cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct K8sMetadata {
    pub namespace: String,
    pub pod_name: String,
}

/// The prefix-to-identity store consumed by the datapath.
///
/// Implementations synchronize internally; every method may be called concurrently.
pub trait IpCacheStore: Send + Sync {
    /// Inserts or overwrites the entry for `prefix`. Returns false if the update was refused
    /// because the existing entry has a higher-precedence source.
    fn upsert(
        &self,
        prefix: &str,
        host_ip: Option<IpAddr>,
        encrypt_key: u8,
        k8s_meta: Option<K8sMetadata>,
        identity: CachedIdentity,
    ) -> bool;

    /// Removes the entry for `prefix` if it was written by `source`. Returns true if an entry was
    /// removed.
    fn delete(&self, prefix: &str, source: Source) -> bool;

    fn lookup_by_ip(&self, prefix: &str) -> Option<CachedIdentity>;
}

impl<S: IpCacheStore + ?Sized> IpCacheStore for Arc<S> {
    fn upsert(
        &self,
        prefix: &str,
        host_ip: Option<IpAddr>,
        encrypt_key: u8,
        k8s_meta: Option<K8sMetadata>,
        identity: CachedIdentity,
    ) -> bool {
        (**self).upsert(prefix, host_ip, encrypt_key, k8s_meta, identity)
    }

    fn delete(&self, prefix: &str, source: Source) -> bool {
        (**self).delete(prefix, source)
    }

    fn lookup_by_ip(&self, prefix: &str) -> Option<CachedIdentity> {
        (**self).lookup_by_ip(prefix)
    }
}
