//! Quota-exceeded recovery, buffer pruning, seek handling, and effective
//! buffer level (spec.md §4.4.8–§4.4.11).

use crate::error::AbrError;
use crate::sink::MediaSink;

use super::{PipelineState, SegmentPipeline};

impl SegmentPipeline {
    /// Marks recovery as in progress. Reentrancy-guarded: calling this
    /// again while already recovering is a no-op (spec.md §8 idempotence
    /// property).
    pub(crate) fn begin_quota_recovery(&mut self) {
        if self.quota_exceeded_in_progress {
            return;
        }
        self.quota_exceeded_in_progress = true;
        self.state = PipelineState::DrainingForQuota;
    }

    /// Runs the quota-exceeded recovery protocol (spec.md §4.4.8). `playhead`
    /// and `buffer_level` are read once at the start; the caller is expected
    /// to have already waited for sink idle via its own scheduling (steps 1
    /// is modeled as a precondition here, not a busy-loop, since suspension
    /// points are explicit in this single-threaded model).
    pub async fn run_quota_recovery(
        &mut self,
        sink: &mut dyn MediaSink,
        playhead: f64,
        buffer_level: f64,
    ) -> Result<f64, AbrError> {
        if !self.quota_exceeded_in_progress {
            // Idempotent: a second call outside an active recovery is a no-op.
            return Ok(self.buffering_target);
        }

        sink.abort().await.ok();

        let basis = self.critical_buffer_level.unwrap_or(buffer_level);
        let new_critical = (basis * self.config.quota_exceeded_correction_factor).max(self.config.quota_floor);
        self.critical_buffer_level = Some(new_critical);
        self.buffering_target = new_critical;

        for task in self.downloads.drain(..) {
            task.cancel.cancel();
        }
        self.append_queue.clear();
        self.replacement_queue.clear();
        self.replacement_in_progress.clear();

        let keep_behind = self.config.buffer_behind.min(2.0);
        let keep_start = (playhead - keep_behind).max(0.0);
        let keep_end = playhead + new_critical;
        self.prune_to_window(sink, keep_start, keep_end).await?;

        self.recompute_pointers_from_window(keep_end, playhead);

        self.quota_exceeded_in_progress = false;
        self.state = PipelineState::Normal;
        tracing::info!(new_critical, "quota recovery complete");
        Ok(new_critical)
    }

    /// Removes buffered ranges outside `[keep_start, keep_end)`, handling
    /// the standard overlap cases (spec.md §4.4.8 step 5 / §4.4.10).
    pub(crate) async fn prune_to_window(
        &mut self,
        sink: &mut dyn MediaSink,
        keep_start: f64,
        keep_end: f64,
    ) -> Result<(), AbrError> {
        for range in sink.buffered() {
            if range.end <= keep_start || range.start >= keep_end {
                sink.remove(range.start, range.end).await?;
            } else {
                if range.start < keep_start {
                    sink.remove(range.start, keep_start).await?;
                }
                if range.end > keep_end {
                    sink.remove(keep_end, range.end).await?;
                }
            }
        }
        self.buffered_segments
            .retain(|seg| seg.end_time > keep_start && seg.start_time < keep_end);
        Ok(())
    }

    fn recompute_pointers_from_window(&mut self, window_end: f64, playhead: f64) {
        let Some(representation) = self.current_representation.clone() else {
            self.next_segment_to_download = None;
            self.next_segment_to_append = None;
            return;
        };
        let anchor = representation
            .segment_index
            .at(window_end)
            .or_else(|| representation.segment_index.at(playhead));
        self.next_segment_to_download = anchor.map(|s| s.segment_number);
        self.next_segment_to_append = anchor.map(|s| s.segment_number);
    }

    /// Background pruning: keeps only `bufferBehind` seconds behind the
    /// playhead (spec.md §4.4.9). Caller invokes this on `pruningInterval`.
    pub async fn prune_behind(&mut self, sink: &mut dyn MediaSink, playhead: f64) -> Result<(), AbrError> {
        for range in sink.buffered() {
            if playhead - range.start > self.config.buffer_behind {
                let cut = playhead - self.config.buffer_behind;
                sink.remove(range.start, cut.min(range.end)).await?;
            }
        }
        let cut = playhead - self.config.buffer_behind;
        self.buffered_segments.retain(|seg| seg.end_time > cut);
        Ok(())
    }

    /// External seek handling (spec.md §4.4.10).
    pub async fn on_seek(&mut self, sink: &mut dyn MediaSink, playhead: f64) -> Result<(), AbrError> {
        if sink.is_idle() {
            sink.abort().await.ok();
        }
        for task in self.downloads.drain(..) {
            task.cancel.cancel();
        }
        self.append_queue.clear();

        let keep_start = (playhead - self.config.buffer_behind).max(0.0);
        let keep_end = playhead + self.buffering_target;
        self.prune_to_window(sink, keep_start, keep_end).await?;

        let representation = self.current_representation.clone();
        let next = representation.and_then(|r| r.segment_index.at(playhead));
        self.next_segment_to_download = next.map(|s| s.segment_number);
        self.next_segment_to_append = self.next_segment_to_download;
        Ok(())
    }

    /// Reported buffer level per spec.md §4.4.11: sum of future range
    /// durations plus jumpable gaps, clamped to `1.5 * bufferingTarget`.
    pub fn effective_buffer_level(&self, sink: &dyn MediaSink, playhead: f64) -> f64 {
        const JUMPABLE_GAP: f64 = 1.5;
        let mut ranges: Vec<_> = sink
            .buffered()
            .into_iter()
            .filter(|r| r.end > playhead)
            .collect();
        ranges.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());

        let mut total = 0.0;
        let mut cursor = playhead;
        for range in &ranges {
            let start = range.start.max(cursor);
            if start > cursor {
                let gap = start - cursor;
                let gap_limit = if cursor == playhead {
                    self.buffering_target
                } else {
                    JUMPABLE_GAP
                };
                if gap >= gap_limit {
                    break;
                }
                total += gap;
            }
            if range.end > start {
                total += range.end - start;
            }
            cursor = range.end;
        }
        total.min(self.buffering_target * 1.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::SinkKind;
    use crate::testing::FakeSink;

    #[tokio::test]
    async fn s3_quota_recovery_shrinks_target_and_floors_at_ten() {
        let mut pipeline = SegmentPipeline::new(PipelineConfig::default(), SinkKind::Standard, 60.0);
        let mut sink = FakeSink::new();
        pipeline.begin_quota_recovery();
        let new_target = pipeline.run_quota_recovery(&mut sink, 30.0, 70.0).await.unwrap();
        assert!((new_target - 56.0).abs() < 1e-9);
        assert!(!pipeline.quota_exceeded_in_progress);
    }

    #[tokio::test]
    async fn quota_recovery_is_idempotent_while_not_in_progress() {
        let mut pipeline = SegmentPipeline::new(PipelineConfig::default(), SinkKind::Standard, 60.0);
        let mut sink = FakeSink::new();
        let result = pipeline.run_quota_recovery(&mut sink, 0.0, 70.0).await.unwrap();
        assert_eq!(result, 60.0); // untouched: no recovery was in progress
    }

    #[test]
    fn s6_gap_within_tolerance_is_counted_as_buffer() {
        let pipeline = SegmentPipeline::new(PipelineConfig::default(), SinkKind::Standard, 60.0);
        let mut sink = FakeSink::new();
        sink.ranges = vec![
            crate::sink::BufferedRange { start: 5.0, end: 30.0 },
            crate::sink::BufferedRange { start: 30.5, end: 60.0 },
        ];
        let level = pipeline.effective_buffer_level(&sink, 30.2);
        // Playhead inside [5,30): counted from 30.2 to 30 (nothing, already past start)
        // plus the 0.3s jumpable gap plus [30.5,60).
        assert!(level > 29.0 && level <= 60.0);
    }
}
