//! Fast-switch replacement (spec.md §4.4.5).
//!
//! After an up-switch, buffered segments at a lower bitrate that are still
//! far enough ahead of the playhead get re-fetched at the new
//! representation and swapped in. Replacement downloads bypass the
//! committed-duration check (they displace, not add, buffered duration);
//! the replacement *queue* is then processed strictly serially.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::error::AbrError;
use crate::fetch::Fetcher;
use crate::model::{BufferedSegmentInfo, DownloadTask, Representation, ReplacementTask};
use crate::sink::MediaSink;

use super::SegmentPipeline;

impl SegmentPipeline {
    /// Candidates in `buffered_segments` eligible for replacement against
    /// `new_representation`, ordered earliest-deadline-first (spec.md
    /// §4.4.5 / scenario S5).
    pub fn replacement_candidates(
        &self,
        playhead: f64,
        segment_duration: f64,
        new_representation: &Representation,
    ) -> Vec<u64> {
        if !self.config.fast_switching_enabled {
            return Vec::new();
        }
        let threshold = playhead + segment_duration * self.config.replacement_safety_factor;
        let mut candidates: Vec<&BufferedSegmentInfo> = self
            .buffered_segments
            .iter()
            .filter(|seg| seg.end_time > playhead)
            .filter(|seg| seg.start_time >= threshold)
            .filter(|seg| seg.representation.bitrate < new_representation.bitrate)
            .filter(|seg| !self.replacement_in_progress.contains(&seg.segment_number))
            .collect();
        candidates.sort_by(|a, b| a.start_time.partial_cmp(&b.start_time).unwrap());
        candidates.iter().map(|s| s.segment_number).collect()
    }

    /// Dispatches one replacement download for `segment_number` against
    /// `representation`, bypassing the committed-duration admission check.
    pub async fn dispatch_replacement(
        &mut self,
        fetcher: &dyn Fetcher,
        representation: Arc<Representation>,
        segment_number: u64,
    ) -> Result<(), AbrError> {
        let Some(segment) = representation.segment_index.by_number(segment_number) else {
            return Ok(());
        };
        self.replacement_in_progress.insert(segment_number);
        let url = segment.uri("seg", &representation.id);
        let cancel = CancellationToken::new();
        self.downloads.push(DownloadTask {
            segment_number,
            url: url.clone(),
            representation: representation.clone(),
            started_at: Instant::now(),
            cancel: cancel.clone(),
            is_replacement: true,
            replacing_segment: Some(segment_number),
        });

        let result = fetcher.fetch(&url, cancel).await;
        self.downloads.retain(|d| d.segment_number != segment_number || !d.is_replacement);

        match result {
            Ok(outcome) => {
                self.replacement_queue.push(ReplacementTask {
                    target_segment_number: segment_number,
                    bytes: outcome.bytes,
                    representation,
                    start_time: segment.start_time,
                    end_time: segment.end_time,
                });
                Ok(())
            }
            Err(err) => {
                self.replacement_in_progress.remove(&segment_number);
                tracing::warn!(?err, segment_number, "replacement fetch failed");
                Ok(())
            }
        }
    }

    /// Processes one entry from the replacement queue: waits for sink idle,
    /// removes the old range, appends the replacement, updates
    /// `BufferedSegmentInfo`. On failure the prior info is restored (the
    /// sink may or may not still hold the old bytes; the next sync
    /// reconciles it).
    pub async fn process_replacement_queue(&mut self, sink: &mut dyn MediaSink) -> Result<(), AbrError> {
        while sink.is_idle() {
            let Some(task) = self.replacement_queue.first().cloned() else {
                break;
            };

            let prior = self
                .buffered_segments
                .iter()
                .find(|b| b.segment_number == task.target_segment_number)
                .cloned();

            let outcome = async {
                sink.remove(task.start_time, task.end_time).await?;
                sink.append(&task.bytes).await
            }
            .await;

            self.replacement_queue.remove(0);
            self.replacement_in_progress.remove(&task.target_segment_number);

            match outcome {
                Ok(()) => {
                    self.buffered_segments
                        .retain(|b| b.segment_number != task.target_segment_number);
                    self.buffered_segments.push(BufferedSegmentInfo {
                        segment_number: task.target_segment_number,
                        start_time: task.start_time,
                        end_time: task.end_time,
                        representation: task.representation,
                        byte_size: task.bytes.len() as u64,
                    });
                }
                Err(err) => {
                    tracing::warn!(?err, segment_number = task.target_segment_number, "replacement append failed");
                    if let Some(prior) = prior {
                        self.buffered_segments
                            .retain(|b| b.segment_number != task.target_segment_number);
                        self.buffered_segments.push(prior);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::model::{Representation, SegmentIndex, SegmentReference};
    use crate::pipeline::SinkKind;

    fn rep(bitrate: u64) -> Arc<Representation> {
        Arc::new(Representation::new(
            format!("r{bitrate}"),
            bitrate,
            "avc1",
            SegmentIndex::new(
                (40..=50)
                    .map(|n| SegmentReference::new(n, (n * 4) as f64, ((n + 1) * 4) as f64))
                    .collect(),
            ),
            None,
        ))
    }

    #[test]
    fn s5_fast_switch_selects_segments_past_the_edf_threshold() {
        let mut pipeline = SegmentPipeline::new(PipelineConfig::default(), SinkKind::Standard, 60.0);
        let low = rep(1000);
        for n in 40..=50 {
            let seg = low.segment_index.by_number(n).unwrap();
            pipeline.buffered_segments.push(BufferedSegmentInfo {
                segment_number: n,
                start_time: seg.start_time,
                end_time: seg.end_time,
                representation: low.clone(),
                byte_size: 1000,
            });
        }
        let high = rep(6000);
        // playhead at segment 40 start (160s), segment duration 4s, threshold = 160 + 4*1.5 = 166.
        let candidates = pipeline.replacement_candidates(160.0, 4.0, &high);
        assert!(!candidates.contains(&41)); // starts at 164, below threshold
        assert!(candidates.contains(&42)); // starts at 168, at/above threshold
        assert_eq!(*candidates.first().unwrap(), 42); // earliest-deadline-first
    }
}
