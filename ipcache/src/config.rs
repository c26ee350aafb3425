use tokio::time::Duration;

/// Tunables for CIDR identity allocation and release.
///
/// May be flattened into a binary's arguments.
#[derive(Clone, Debug, clap::Args)]
pub struct Config {
    /// Bounds each call to the identity allocator.
    #[clap(
        long = "ipcache-allocation-timeout-ms",
        default_value = "120000",
        env = "IPCACHE_ALLOCATION_TIMEOUT_MS"
    )]
    pub allocation_timeout_ms: u64,

    /// How long release requests are coalesced before they are processed.
    #[clap(long = "ipcache-release-interval-ms", default_value = "100")]
    pub release_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allocation_timeout_ms: 120_000,
            release_interval_ms: 100,
        }
    }
}

impl Config {
    #[inline]
    pub fn allocation_timeout(&self) -> Duration {
        Duration::from_millis(self.allocation_timeout_ms)
    }

    #[inline]
    pub fn release_interval(&self) -> Duration {
        Duration::from_millis(self.release_interval_ms)
    }
}
