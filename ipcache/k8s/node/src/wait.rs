use crate::{Node, NodeError, NodeInfo};
use tokio::time::{self, Duration};
use tracing::{debug, info, instrument, warn};

/// The number of times node information is requested before giving up.
pub const MAX_RETRIES: usize = 15;

/// Fetches a node by name, e.g. from the API server or a local cache.
#[async_trait::async_trait]
pub trait NodeGetter: Send + Sync {
    async fn get_node(&self, name: &str) -> anyhow::Result<Node>;
}

#[async_trait::async_trait]
impl<G: NodeGetter + ?Sized> NodeGetter for std::sync::Arc<G> {
    async fn get_node(&self, name: &str) -> anyhow::Result<Node> {
        (**self).get_node(name).await
    }
}

/// Pod CIDRs that must be available before node information is accepted.
#[derive(Copy, Clone, Debug, Default, clap::Args)]
pub struct Requirements {
    /// Wait for the node to be assigned an IPv4 pod CIDR.
    #[clap(long = "k8s-require-ipv4-pod-cidr")]
    pub ipv4_pod_cidr: bool,

    /// Wait for the node to be assigned an IPv6 pod CIDR.
    #[clap(long = "k8s-require-ipv6-pod-cidr")]
    pub ipv6_pod_cidr: bool,
}

/// An exponential backoff without jitter.
#[derive(Clone, Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: u32,
    attempt: u32,
}

/// Retrieves the local node's information, retrying with an exponential backoff.
///
/// When no pod CIDR is required the node information is optional: `Ok(None)` is returned if the
/// node name is empty or the node cannot be retrieved. Otherwise, retrieval is retried up to
/// [`MAX_RETRIES`] times until the node carries every required pod CIDR.
#[instrument(skip(getter, requirements))]
pub async fn wait_for_node_information<G>(
    getter: &G,
    name: &str,
    requirements: Requirements,
) -> Result<Option<NodeInfo>, NodeError>
where
    G: NodeGetter + ?Sized,
{
    if name.is_empty() {
        if requirements.any() {
            return Err(NodeError::NameRequired);
        }
        debug!("Node name is not set");
        return Ok(None);
    }

    let mut backoff = Backoff::default();
    for _ in 0..MAX_RETRIES {
        match retrieve(getter, name, requirements).await {
            Ok(info) => {
                if let Some(info) = &info {
                    info!(
                        ipv4 = ?info.node_ip(false),
                        ipv6 = ?info.node_ip(true),
                        ipv4_alloc_cidr = ?info.ipv4_alloc_cidr,
                        ipv6_alloc_cidr = ?info.ipv6_alloc_cidr,
                        "Retrieved node information"
                    );
                }
                return Ok(info);
            }
            Err(error) => {
                warn!(%error, "Waiting for node information");
                backoff.wait().await;
            }
        }
    }

    if requirements.any() {
        return Err(NodeError::Unavailable {
            attempts: MAX_RETRIES,
        });
    }
    Ok(None)
}

async fn retrieve<G>(
    getter: &G,
    name: &str,
    requirements: Requirements,
) -> Result<Option<NodeInfo>, NodeError>
where
    G: NodeGetter + ?Sized,
{
    let node = match getter.get_node(name).await {
        Ok(node) => node,
        Err(error) if !requirements.any() => {
            debug!(%error, "Node information is optional");
            return Ok(None);
        }
        Err(error) => {
            return Err(NodeError::Retrieve {
                name: name.to_string(),
                error,
            })
        }
    };

    let info = NodeInfo::try_from(&node)?;
    if requirements.ipv4_pod_cidr && info.ipv4_alloc_cidr.is_none() {
        return Err(NodeError::MissingIpv4PodCidr);
    }
    if requirements.ipv6_pod_cidr && info.ipv6_alloc_cidr.is_none() {
        return Err(NodeError::MissingIpv6PodCidr);
    }
    Ok(Some(info))
}

// === impl Requirements ===

impl Requirements {
    #[inline]
    pub fn any(&self) -> bool {
        self.ipv4_pod_cidr || self.ipv6_pod_cidr
    }
}

// === impl Backoff ===

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(120), 2)
    }
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, factor: u32) -> Self {
        Self {
            min,
            max,
            factor,
            attempt: 0,
        }
    }

    /// Returns the delay before the next attempt: `min * factor^attempt`, capped at `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .factor
            .checked_pow(self.attempt)
            .and_then(|n| self.min.checked_mul(n))
            .map_or(self.max, |d| d.min(self.max));
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub async fn wait(&mut self) {
        time::sleep(self.next_delay()).await
    }
}
