use crate::labels::{LabelSource, Labels};
use ipnet::IpNet;
use std::fmt;

/// A compact numeric security identity.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NumericIdentity(u32);

/// An identity allocated for a set of labels.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: NumericIdentity,
    pub labels: Labels,
    pub kind: IdentityKind,
}

/// Distinguishes identities that represent an IP prefix from all others.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    Generic,

    /// The identity was derived from the labels of this prefix.
    Cidr(IpNet),
}

// === impl NumericIdentity ===

impl NumericIdentity {
    /// Indicates the absence of an identity (e.g. no previously-used identity exists).
    pub const INVALID: Self = Self(0);

    /// Identities in the local scope are allocated by each node and are never shared across the
    /// cluster. CIDR identities are local.
    pub const LOCAL_IDENTITY_FLAG: u32 = 1 << 24;

    pub const MIN_LOCAL: Self = Self(Self::LOCAL_IDENTITY_FLAG | 1);
    pub const MAX_LOCAL: Self = Self(Self::LOCAL_IDENTITY_FLAG | 0x00ff_ffff);

    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn get(&self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    #[inline]
    pub fn has_local_scope(&self) -> bool {
        self.0 & Self::LOCAL_IDENTITY_FLAG != 0
    }
}

impl From<u32> for NumericIdentity {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for NumericIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl Identity ===

impl Identity {
    /// Builds an identity, classifying it from its labels.
    pub fn new(id: NumericIdentity, labels: Labels) -> Self {
        let kind = IdentityKind::from_labels(&labels);
        Self { id, labels, kind }
    }

    /// Returns the prefix this identity was derived from, if any.
    #[inline]
    pub fn cidr(&self) -> Option<IpNet> {
        match self.kind {
            IdentityKind::Cidr(net) => Some(net),
            IdentityKind::Generic => None,
        }
    }
}

// === impl IdentityKind ===

impl IdentityKind {
    /// A label set describes a CIDR identity when it carries the `reserved:world` label and at
    /// least one `cidr:` label. The identity's prefix is its most specific CIDR label.
    pub fn from_labels(labels: &Labels) -> Self {
        if !labels.iter().any(|l| l.is_world()) {
            return Self::Generic;
        }

        labels
            .by_source(LabelSource::Cidr)
            .filter_map(|l| l.key.parse::<IpNet>().ok())
            .max_by_key(|net| net.prefix_len())
            .map(Self::Cidr)
            .unwrap_or(Self::Generic)
    }
}
