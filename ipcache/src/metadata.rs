use ahash::AHashMap as HashMap;
use ipcache_core::{cidr, IpNet, Labels};
use std::net::IpAddr;

/// Operator-supplied labels for individual addresses.
///
/// Allocation merges an address's labels into the labels derived from its prefix, so the
/// resulting identity carries them.
#[derive(Debug, Default)]
pub(crate) struct Metadata {
    by_ip: HashMap<IpAddr, Labels>,
}

impl Metadata {
    pub(crate) fn get(&self, ip: IpAddr) -> Option<&Labels> {
        self.by_ip.get(&ip)
    }

    pub(crate) fn upsert(&mut self, ip: IpAddr, labels: Labels) -> Option<Labels> {
        self.by_ip.insert(ip, labels)
    }

    pub(crate) fn remove(&mut self, ip: IpAddr) -> Option<Labels> {
        self.by_ip.remove(&ip)
    }

    /// Returns the labels of `prefix`, merged with any metadata for its network address.
    pub(crate) fn labels_for(&self, prefix: IpNet) -> Labels {
        let mut labels = cidr::cidr_labels(prefix);
        if let Some(extra) = self.get(prefix.network()) {
            labels.merge(extra);
        }
        labels
    }
}
