//! Derives label sets from IP prefixes.

use crate::labels::{Label, LabelSource, Labels};
use ipnet::IpNet;
use std::net::IpAddr;

/// Returns the label that names exactly this prefix.
pub fn cidr_label(net: IpNet) -> Label {
    Label::new(LabelSource::Cidr, net.trunc(), "")
}

/// Returns the labels of a prefix: a `cidr:` label for the prefix and for every prefix that
/// contains it (down to the zero-length prefix), plus `reserved:world`.
///
/// Selecting on any enclosing CIDR therefore matches the identity of a more specific one.
pub fn cidr_labels(net: IpNet) -> Labels {
    let net = net.trunc();
    (0..=net.prefix_len())
        .filter_map(|len| IpNet::new(net.addr(), len).ok())
        .map(cidr_label)
        .chain(Some(Label::world()))
        .collect()
}

/// Converts a bare address into its host-length prefix (`/32` or `/128`).
#[inline]
pub fn host_prefix(addr: IpAddr) -> IpNet {
    IpNet::from(addr)
}

pub fn prefixes_from_ips(addrs: &[IpAddr]) -> Vec<Option<IpNet>> {
    addrs.iter().copied().map(host_prefix).map(Some).collect()
}

/// Extracts the prefix from a `cidr:` label.
pub fn label_to_prefix(label: &Label) -> Option<IpNet> {
    if label.source != LabelSource::Cidr {
        return None;
    }
    label.key.parse().ok()
}
