//! Pipeline-owned records: `DownloadTask`, `QueuedSegment`, `ReplacementTask`,
//! `BufferedSegmentInfo` (spec.md §3). These are exclusively mutated by
//! `SegmentPipeline` — nothing else touches them.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::model::Representation;

/// An in-flight fetch.
#[derive(Debug)]
pub struct DownloadTask {
    pub segment_number: u64,
    pub url: String,
    pub representation: Arc<Representation>,
    pub started_at: std::time::Instant,
    pub cancel: CancellationToken,
    pub is_replacement: bool,
    pub replacing_segment: Option<u64>,
}

/// Downloaded bytes waiting to be appended, sorted by `segment_number`.
#[derive(Debug, Clone)]
pub struct QueuedSegment {
    /// Empty for a blacklisted/skipped segment.
    pub bytes: Arc<[u8]>,
    pub duration: f64,
    pub segment_number: u64,
    pub representation: Arc<Representation>,
}

impl QueuedSegment {
    pub fn is_skip_marker(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Bytes intended to overwrite a buffered lower-quality segment.
#[derive(Debug, Clone)]
pub struct ReplacementTask {
    pub target_segment_number: u64,
    pub bytes: Arc<[u8]>,
    pub representation: Arc<Representation>,
    pub start_time: f64,
    pub end_time: f64,
}

/// Persistent record for a segment the pipeline believes is buffered in the
/// sink. Reconciled against the sink's reported ranges on every
/// `updateend` (spec.md §4.4.7).
#[derive(Debug, Clone)]
pub struct BufferedSegmentInfo {
    pub segment_number: u64,
    pub start_time: f64,
    pub end_time: f64,
    pub representation: Arc<Representation>,
    pub byte_size: u64,
}

impl BufferedSegmentInfo {
    pub fn overlaps(&self, range_start: f64, range_end: f64) -> bool {
        self.start_time < range_end && range_start < self.end_time
    }
}
