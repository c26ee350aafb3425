#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod allocator;
pub mod cidr;
mod identity;
pub mod labels;
mod source;
mod store;

pub use self::{
    allocator::IdentityAllocator,
    identity::{Identity, IdentityKind, NumericIdentity},
    labels::{Label, LabelSource, Labels},
    source::Source,
    store::{CachedIdentity, IpCacheStore, K8sMetadata},
};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};
