use crate::{Identity, Labels, NumericIdentity};
use anyhow::Result;
use std::sync::Arc;

/// Allocates reference-counted numeric identities for label sets.
///
/// Allocation and release are asynchronous since an allocator may be backed by a remote store;
/// callers bound each call with their own timeout.
#[async_trait::async_trait]
pub trait IdentityAllocator: Send + Sync {
    /// Allocates (or takes another reference to) the identity for `labels`.
    ///
    /// `previous` hints a numeric identity that was used for these labels before; it is reused if
    /// still free. [`NumericIdentity::INVALID`] indicates no hint. Returns the identity and
    /// whether it was newly created by this call.
    async fn allocate_identity(
        &self,
        labels: Labels,
        is_local: bool,
        previous: NumericIdentity,
    ) -> Result<(Arc<Identity>, bool)>;

    /// Drops a reference to `identity`. Returns true when this was the last reference and the
    /// identity has been freed.
    async fn release(&self, identity: &Identity, is_local: bool) -> Result<bool>;

    async fn lookup_identity(&self, labels: &Labels) -> Option<Arc<Identity>>;

    async fn lookup_identity_by_id(&self, id: NumericIdentity) -> Option<Arc<Identity>>;
}

#[async_trait::async_trait]
impl<A: IdentityAllocator + ?Sized> IdentityAllocator for Arc<A> {
    async fn allocate_identity(
        &self,
        labels: Labels,
        is_local: bool,
        previous: NumericIdentity,
    ) -> Result<(Arc<Identity>, bool)> {
        (**self).allocate_identity(labels, is_local, previous).await
    }

    async fn release(&self, identity: &Identity, is_local: bool) -> Result<bool> {
        (**self).release(identity, is_local).await
    }

    async fn lookup_identity(&self, labels: &Labels) -> Option<Arc<Identity>> {
        (**self).lookup_identity(labels).await
    }

    async fn lookup_identity_by_id(&self, id: NumericIdentity) -> Option<Arc<Identity>> {
        (**self).lookup_identity_by_id(id).await
    }
}
