//! A minimal standalone `MediaSink` for the demo CLI. Not shared with
//! `abr-core`'s own test fixtures — this binary only depends on the
//! library's public API.
//!
//! The demo ladder uses a uniform segment duration, so unlike a real
//! SourceBuffer (which has no notion of "seconds per append") this sink
//! can simulate real buffered ranges by advancing a cursor one segment
//! duration per successful append.

use abr_core::error::AbrError;
use abr_core::sink::{BufferedRange, MediaSink, SinkState};
use async_trait::async_trait;

pub struct SimSink {
    ranges: Vec<BufferedRange>,
    state: SinkState,
    cursor: f64,
    segment_duration: f64,
}

impl SimSink {
    pub fn new(segment_duration: f64) -> Self {
        Self {
            ranges: Vec::new(),
            state: SinkState::Open,
            cursor: 0.0,
            segment_duration,
        }
    }

    fn insert_range(&mut self, start: f64, end: f64) {
        self.ranges.push(BufferedRange { start, end });
        self.ranges.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());
        let mut merged: Vec<BufferedRange> = Vec::new();
        for range in self.ranges.drain(..) {
            if let Some(last) = merged.last_mut() {
                if range.start <= last.end {
                    last.end = last.end.max(range.end);
                    continue;
                }
            }
            merged.push(range);
        }
        self.ranges = merged;
    }
}

#[async_trait]
impl MediaSink for SimSink {
    async fn open(&mut self, _mime: &str, _codecs: &str) -> Result<(), AbrError> {
        self.state = SinkState::Open;
        Ok(())
    }

    async fn change_type(&mut self, _mime: &str, _codecs: &str) -> Result<bool, AbrError> {
        Ok(true)
    }

    async fn append(&mut self, bytes: &[u8]) -> Result<(), AbrError> {
        if bytes.is_empty() {
            return Ok(()); // skip markers carry no bytes
        }
        let end = self.cursor + self.segment_duration;
        self.insert_range(self.cursor, end);
        self.cursor = end;
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
        self.state = SinkState::Closed;
        Ok(())
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        self.ranges.clone()
    }

    fn state(&self) -> SinkState {
        self.state
    }

    fn is_idle(&self) -> bool {
        true
    }
}
