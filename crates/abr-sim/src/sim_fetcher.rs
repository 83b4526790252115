use std::sync::atomic::{AtomicU64, Ordering};

use abr_core::error::AbrError;
use abr_core::fetch::{FetchOutcome, Fetcher};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Simulates a link at a fixed throughput, in bits/s. Every fetch returns
/// `segment_bytes` worth of payload at that rate.
pub struct SimFetcher {
    bandwidth_bps: AtomicU64,
    segment_bytes: u64,
}

impl SimFetcher {
    pub fn new(bandwidth_bps: u64, segment_bytes: u64) -> Self {
        Self {
            bandwidth_bps: AtomicU64::new(bandwidth_bps),
            segment_bytes,
        }
    }

    pub fn set_bandwidth(&self, bandwidth_bps: u64) {
        self.bandwidth_bps.store(bandwidth_bps, Ordering::Relaxed);
    }
}

#[async_trait]
impl Fetcher for SimFetcher {
    async fn fetch(&self, url: &str, _cancel: CancellationToken) -> Result<FetchOutcome, AbrError> {
        let bandwidth = self.bandwidth_bps.load(Ordering::Relaxed).max(1);
        let duration_ms = (8_000 * self.segment_bytes / bandwidth).max(1);
        tracing::debug!(url, bandwidth, duration_ms, "simulated fetch");
        Ok(FetchOutcome {
            bytes: std::sync::Arc::from(vec![0u8; self.segment_bytes as usize]),
            http_status: 200,
            duration_ms,
            from_cache: false,
            transferred_bytes: self.segment_bytes,
            resource_bytes: self.segment_bytes,
        })
    }
}
