//! Shared test fixtures: an in-memory `MediaSink`, a scripted `Fetcher`,
//! and a representation-ladder builder, mirroring
//! `mesio_engine::hls::scheduler::tests::create_test_job`'s role in the
//! teacher crate. Used across `bola`/`pipeline`/`quality` unit tests.

#![cfg(test)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AbrError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::model::{Representation, SegmentIndex, SegmentReference};
use crate::sink::{BufferedRange, MediaSink, SinkState};

/// Builds an ascending-by-bitrate ladder with `segment_count` segments of
/// `segment_duration` seconds each, matching scenario fixtures in spec.md §8.
pub fn representation_ladder(bitrates: &[u64], segment_count: u64, segment_duration: f64) -> Vec<Arc<Representation>> {
    bitrates
        .iter()
        .map(|&bitrate| {
            let segments = (0..segment_count)
                .map(|n| {
                    SegmentReference::new(
                        n,
                        n as f64 * segment_duration,
                        (n + 1) as f64 * segment_duration,
                    )
                })
                .collect();
            Arc::new(Representation::new(
                format!("r{bitrate}"),
                bitrate,
                "avc1",
                SegmentIndex::new(segments),
                None,
            ))
        })
        .collect()
}

/// In-memory `MediaSink`: tracks buffered ranges, can be told to fail the
/// next append with quota-exceeded.
#[derive(Debug, Default)]
pub struct FakeSink {
    pub ranges: Vec<BufferedRange>,
    pub state: Option<SinkState>,
    pub idle: bool,
    pub fail_next_append_with_quota: bool,
}

impl FakeSink {
    pub fn new() -> Self {
        Self {
            ranges: Vec::new(),
            state: None,
            idle: true,
            fail_next_append_with_quota: false,
        }
    }
}

#[async_trait]
impl MediaSink for FakeSink {
    async fn open(&mut self, _mime: &str, _codecs: &str) -> Result<(), AbrError> {
        self.state = Some(SinkState::Open);
        Ok(())
    }

    async fn change_type(&mut self, _mime: &str, _codecs: &str) -> Result<bool, AbrError> {
        Ok(true)
    }

    async fn append(&mut self, _bytes: &[u8]) -> Result<(), AbrError> {
        if self.fail_next_append_with_quota {
            self.fail_next_append_with_quota = false;
            return Err(AbrError::SinkQuotaExceeded);
        }
        Ok(())
    }

    async fn remove(&mut self, start: f64, end: f64) -> Result<(), AbrError> {
        self.ranges.retain(|r| r.end <= start || r.start >= end);
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), AbrError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AbrError> {
        self.state = Some(SinkState::Closed);
        Ok(())
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        self.ranges.clone()
    }

    fn state(&self) -> SinkState {
        self.state.unwrap_or(SinkState::Open)
    }

    fn is_idle(&self) -> bool {
        self.idle
    }
}

/// Scripted `Fetcher`: returns a queued outcome (or a transient error) per
/// call, in order.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<FetchOutcome, AbrError>>>,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<Result<FetchOutcome, AbrError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }

    pub fn ok(bytes: &[u8], duration_ms: u64) -> Result<FetchOutcome, AbrError> {
        Ok(FetchOutcome {
            bytes: Arc::from(bytes),
            http_status: 200,
            duration_ms,
            from_cache: false,
            transferred_bytes: bytes.len() as u64,
            resource_bytes: bytes.len() as u64,
        })
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _url: &str, _cancel: CancellationToken) -> Result<FetchOutcome, AbrError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Self::ok(b"0000", 100))
    }
}
