//! Append-queue processing and buffered-segment sync (spec.md §4.4.6–§4.4.7).

use crate::error::AbrError;
use crate::model::BufferedSegmentInfo;
use crate::sink::{MediaSink, SinkState};

use super::SegmentPipeline;

impl SegmentPipeline {
    /// Processes the append queue while the preconditions in spec.md
    /// §4.4.6 hold: sink idle, queue non-empty, sink open, not already
    /// processing, no quota recovery in progress.
    pub async fn process_append_queue(&mut self, sink: &mut dyn MediaSink) -> Result<(), AbrError> {
        loop {
            if self.quota_exceeded_in_progress {
                return Ok(());
            }
            if !sink.is_idle() || sink.state() != SinkState::Open {
                return Ok(());
            }
            if self.append_queue.is_empty() {
                return Ok(());
            }
            let Some(expected) = self.next_segment_to_append else {
                return Ok(());
            };

            let position = self.append_queue.iter().position(|q| q.segment_number == expected);
            let Some(position) = position else {
                let all_greater = self.append_queue.iter().all(|q| q.segment_number > expected);
                if all_greater && self.append_queue.len() > 3 {
                    tracing::warn!(expected, "expected segment lost, resetting append queue");
                    self.append_queue.clear();
                    self.next_segment_to_append = self.next_segment_to_download;
                    continue;
                }
                return Ok(());
            };

            let entry = self.append_queue.remove(position);
            if entry.is_skip_marker() {
                self.next_segment_to_append = Some(expected + 1);
                continue;
            }

            match sink.append(&entry.bytes).await {
                Ok(()) => {
                    self.next_segment_to_append = Some(expected + 1);
                    if let Some(segment) = entry.representation.segment_index.by_number(expected) {
                        self.buffered_segments.push(BufferedSegmentInfo {
                            segment_number: expected,
                            start_time: segment.start_time,
                            end_time: segment.end_time,
                            representation: entry.representation.clone(),
                            byte_size: entry.bytes.len() as u64,
                        });
                    }
                    if self.next_segment_to_download.map_or(false, |d| d < expected + 1) {
                        self.next_segment_to_download = Some(expected + 1);
                    }
                }
                Err(AbrError::SinkQuotaExceeded) => {
                    self.append_queue.insert(position, entry);
                    self.begin_quota_recovery();
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(?err, segment_number = expected, "append failed, skipping segment");
                    self.next_segment_to_append = Some(expected + 1);
                }
            }
        }
    }

    /// Reconciles `buffered_segments` against the sink's reported ranges,
    /// called on every sink `updateend` (spec.md §4.4.7).
    pub fn sync_buffered_segments(&mut self, sink: &dyn MediaSink) {
        let ranges = sink.buffered();
        self.buffered_segments
            .retain(|seg| ranges.iter().any(|r| seg.overlaps(r.start, r.end)));
    }
}
