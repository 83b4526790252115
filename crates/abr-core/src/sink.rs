//! The media sink contract (spec.md §6).
//!
//! Byte storage and eviction are the sink's job; the core only calls this
//! interface. Modeled as an `async_trait` the way
//! `mesio_engine::hls::fetcher::SegmentDownloader` models the fetch side,
//! and as *result-returning* operations rather than throw/catch, per the
//! Design Notes (spec.md §9): quota is a first-class error variant, not an
//! exception a caller has to guess at.

use async_trait::async_trait;

use crate::error::AbrError;

/// A half-open time range, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
}

/// Lifecycle state of a `MediaSink`, mirrored from the SourceBuffer model
/// this contract is based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Open,
    Ended,
    Closed,
}

/// Output collaborator: a bounded media buffer that ingests byte ranges.
///
/// Only the `SegmentPipeline` may mutate a sink; other components only
/// read `buffered()`/`state()` (spec.md §5, "Shared resources").
#[async_trait]
pub trait MediaSink: Send {
    /// Opens (or reconfigures, if already open) the sink for this mime/codec pair.
    async fn open(&mut self, mime: &str, codecs: &str) -> Result<(), AbrError>;

    /// Attempts an in-place codec change without tearing down buffered data.
    /// Returns `Ok(false)` if the sink doesn't support this and the caller
    /// must recreate it instead (spec.md §4.4.2).
    async fn change_type(&mut self, mime: &str, codecs: &str) -> Result<bool, AbrError>;

    /// Appends bytes. Completes on the sink's `updateend` equivalent; may
    /// fail with [`AbrError::SinkQuotaExceeded`].
    async fn append(&mut self, bytes: &[u8]) -> Result<(), AbrError>;

    /// Removes `[start, end)` from the buffer.
    async fn remove(&mut self, start: f64, end: f64) -> Result<(), AbrError>;

    /// Aborts whatever operation is currently pending, if any.
    async fn abort(&mut self) -> Result<(), AbrError>;

    async fn close(&mut self) -> Result<(), AbrError>;

    /// Ordered, non-overlapping buffered ranges.
    fn buffered(&self) -> Vec<BufferedRange>;

    fn state(&self) -> SinkState;

    /// Whether the sink currently has no pending async operation.
    fn is_idle(&self) -> bool;
}
