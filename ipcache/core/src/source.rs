use std::fmt;

/// The provenance of an IP cache entry.
///
/// Variants are ordered by precedence: an entry may only be overwritten by an update from a
/// source of equal or greater precedence.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    #[default]
    Unspec,

    /// Derived from a CIDR identity allocation.
    Generated,

    Kubernetes,
    CustomResource,
    KvStore,
    Local,
    KubeApiServer,
}

impl Source {
    #[inline]
    pub fn allows_overwrite(existing: Self, new: Self) -> bool {
        new >= existing
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspec => "unspec",
            Self::Generated => "generated",
            Self::Kubernetes => "k8s",
            Self::CustomResource => "custom-resource",
            Self::KvStore => "kvstore",
            Self::Local => "local",
            Self::KubeApiServer => "kube-apiserver",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence() {
        assert!(Source::allows_overwrite(Source::Unspec, Source::Generated));
        assert!(Source::allows_overwrite(Source::Generated, Source::Generated));
        assert!(Source::allows_overwrite(Source::Generated, Source::Kubernetes));
        assert!(!Source::allows_overwrite(Source::Kubernetes, Source::Generated));
        assert!(!Source::allows_overwrite(Source::KubeApiServer, Source::Local));
    }
}
