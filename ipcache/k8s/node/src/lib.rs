//! The local node's addressing, as published on its Kubernetes `Node` resource.
//!
//! The node's pod allocation CIDRs are read from `spec.podCIDRs` (or `spec.podCIDR`), falling back
//! to the `io.cilium.network.ipv{4,6}-pod-cidr` annotations for any family the spec does not
//! provide.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod wait;


pub use self::wait::{wait_for_node_information, Backoff, NodeGetter, Requirements, MAX_RETRIES};
use ipnet::IpNet;
pub use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1 as k8s;
use std::{collections::BTreeMap, fmt, net::IpAddr, str::FromStr};
use tracing::{trace, warn};

pub const V4_CIDR_ANNOTATION: &str = "io.cilium.network.ipv4-pod-cidr";
pub const V6_CIDR_ANNOTATION: &str = "io.cilium.network.ipv6-pod-cidr";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub ipv4_alloc_cidr: Option<IpNet>,
    pub ipv6_alloc_cidr: Option<IpNet>,
    pub addresses: Vec<NodeAddress>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeAddress {
    pub kind: AddressType,
    pub ip: IpAddr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AddressType {
    Hostname,
    ExternalIp,
    InternalIp,
    ExternalDns,
    InternalDns,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("node has no name")]
    MissingName,

    #[error("invalid pod CIDR {cidr:?}: {error}")]
    InvalidCidr {
        cidr: String,
        error: ipnet::AddrParseError,
    },

    #[error("invalid node address type {0:?}")]
    InvalidAddressType(String),

    #[error("node name must be specified to retrieve its pod CIDRs")]
    NameRequired,

    #[error("unable to retrieve node {name}: {error}")]
    Retrieve { name: String, error: anyhow::Error },

    #[error("required IPv4 pod CIDR not available")]
    MissingIpv4PodCidr,

    #[error("required IPv6 pod CIDR not available")]
    MissingIpv6PodCidr,

    #[error("unable to retrieve node information after {attempts} attempts")]
    Unavailable { attempts: usize },
}

// === impl NodeInfo ===

impl NodeInfo {
    /// Reads a node's addressing. Annotations are only consulted when `use_annotations` is set.
    pub fn try_from_node(node: &Node, use_annotations: bool) -> Result<Self, NodeError> {
        let name = node
            .metadata
            .name
            .clone()
            .ok_or(NodeError::MissingName)?;
        let labels = node.metadata.labels.clone().unwrap_or_default();

        let mut ipv4_alloc_cidr = None;
        let mut ipv6_alloc_cidr = None;
        for cidr in pod_cidrs(node) {
            match parse_cidr(cidr)? {
                net @ IpNet::V4(_) => {
                    ipv4_alloc_cidr.get_or_insert(net);
                }
                net @ IpNet::V6(_) => {
                    ipv6_alloc_cidr.get_or_insert(net);
                }
            }
        }

        if use_annotations {
            let annotations = node.metadata.annotations.as_ref();
            if ipv4_alloc_cidr.is_none() {
                if let Some(cidr) = annotations.and_then(|a| a.get(V4_CIDR_ANNOTATION)) {
                    ipv4_alloc_cidr = Some(parse_cidr(cidr)?);
                }
            }
            if ipv6_alloc_cidr.is_none() {
                if let Some(cidr) = annotations.and_then(|a| a.get(V6_CIDR_ANNOTATION)) {
                    ipv6_alloc_cidr = Some(parse_cidr(cidr)?);
                }
            }
        }

        let addresses = node
            .status
            .as_ref()
            .and_then(|status| status.addresses.as_ref())
            .into_iter()
            .flatten()
            .filter_map(NodeAddress::from_k8s)
            .collect();

        Ok(Self {
            name,
            labels,
            ipv4_alloc_cidr,
            ipv6_alloc_cidr,
            addresses,
        })
    }

    /// Returns the node's allocation CIDRs, IPv4 first. Families without a CIDR are `None`.
    pub fn alloc_cidrs(&self) -> Vec<Option<IpNet>> {
        vec![self.ipv4_alloc_cidr, self.ipv6_alloc_cidr]
    }

    /// Returns the node's address of the given family, preferring internal addresses.
    pub fn node_ip(&self, ipv6: bool) -> Option<IpAddr> {
        self.address(AddressType::InternalIp, ipv6)
            .or_else(|| self.address(AddressType::ExternalIp, ipv6))
    }

    pub fn external_ip(&self, ipv6: bool) -> Option<IpAddr> {
        self.address(AddressType::ExternalIp, ipv6)
    }

    fn address(&self, kind: AddressType, ipv6: bool) -> Option<IpAddr> {
        self.addresses
            .iter()
            .find(|a| a.kind == kind && a.ip.is_ipv6() == ipv6)
            .map(|a| a.ip)
    }
}

impl TryFrom<&Node> for NodeInfo {
    type Error = NodeError;

    fn try_from(node: &Node) -> Result<Self, Self::Error> {
        Self::try_from_node(node, true)
    }
}

/// `spec.podCIDRs` when set, else `spec.podCIDR`.
fn pod_cidrs(node: &Node) -> impl Iterator<Item = &str> {
    let spec = node.spec.as_ref();
    let cidrs = spec
        .and_then(|s| s.pod_cidrs.as_deref())
        .filter(|cidrs| !cidrs.is_empty())
        .map(|cidrs| cidrs.iter().map(String::as_str).collect::<Vec<_>>())
        .unwrap_or_else(|| spec.and_then(|s| s.pod_cidr.as_deref()).into_iter().collect());
    cidrs.into_iter().filter(|c| !c.is_empty())
}

fn parse_cidr(cidr: &str) -> Result<IpNet, NodeError> {
    cidr.parse().map_err(|error| NodeError::InvalidCidr {
        cidr: cidr.to_string(),
        error,
    })
}

// === impl NodeAddress ===

impl NodeAddress {
    fn from_k8s(addr: &k8s::NodeAddress) -> Option<Self> {
        let kind = match addr.type_.parse() {
            Ok(kind) => kind,
            Err(error) => {
                warn!(%error, address = %addr.address, "Ignoring node address");
                return None;
            }
        };
        match addr.address.parse() {
            Ok(ip) => Some(Self { kind, ip }),
            Err(_) => {
                trace!(address = %addr.address, ?kind, "Skipping non-IP node address");
                None
            }
        }
    }
}

// === impl AddressType ===

impl AddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hostname => "Hostname",
            Self::ExternalIp => "ExternalIP",
            Self::InternalIp => "InternalIP",
            Self::ExternalDns => "ExternalDNS",
            Self::InternalDns => "InternalDNS",
        }
    }
}

impl FromStr for AddressType {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Hostname" => Ok(Self::Hostname),
            "ExternalIP" => Ok(Self::ExternalIp),
            "InternalIP" => Ok(Self::InternalIp),
            "ExternalDNS" => Ok(Self::ExternalDns),
            "InternalDNS" => Ok(Self::InternalDns),
            s => Err(NodeError::InvalidAddressType(s.to_string())),
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
