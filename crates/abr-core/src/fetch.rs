//! The fetch contract (spec.md §4.4.4, §6).
//!
//! Shaped after `mesio_engine::hls::fetcher::SegmentDownloader`: an
//! object-safe async trait the pipeline drives, with a cancellation token
//! rather than a bare future so in-flight fetches can be aborted on seek,
//! quality change, or quota recovery (spec.md §5 "Cancellation").

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AbrError;

/// Result of a single segment fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub bytes: std::sync::Arc<[u8]>,
    pub http_status: u16,
    pub duration_ms: u64,
    pub from_cache: bool,
    /// Bytes actually moved over the network; 0 or ≪ `resource_bytes` means
    /// a cache hit (spec.md §4.4.4).
    pub transferred_bytes: u64,
    /// Decompressed payload size.
    pub resource_bytes: u64,
}

/// Above this, a sample is assumed to be a LAN/localhost artifact rather
/// than a real edge-network measurement and is discarded (spec.md §4.4.4
/// "plausibility ceiling").
const PLAUSIBILITY_CEILING_BPS: f64 = 2_000_000_000.0;

impl FetchOutcome {
    /// Whether this sample should feed the bandwidth estimator: only
    /// non-cached fetches with a plausible duration and an implied
    /// bandwidth under the ceiling count (spec.md §4.4.4).
    pub fn feeds_bandwidth_estimator(&self) -> bool {
        if self.from_cache || self.duration_ms < 50 {
            return false;
        }
        let implied_bps = 8000.0 * self.transferred_bytes as f64 / self.duration_ms as f64;
        implied_bps.is_finite() && implied_bps <= PLAUSIBILITY_CEILING_BPS
    }
}

/// Transport collaborator the pipeline calls to retrieve segment bytes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, cancel: CancellationToken) -> Result<FetchOutcome, AbrError>;
}
