//! Download dispatch (spec.md §4.4.3–§4.4.4).
//!
//! `maxConcurrentDownloads` is meant literally: each `load_next` call fires
//! its whole admitted batch at once via `futures::future::join_all` rather
//! than awaiting fetches one at a time, matching spec.md §4.4.1's
//! "at most N DownloadTasks active" (plural, concurrent). Each fetch is
//! wrapped in `tokio::time::timeout(segmentTimeout, ...)` so a hung fetch
//! surfaces as `AbrError::SegmentTimeout` instead of running forever.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::bandwidth::BandwidthEstimator;
use crate::error::AbrError;
use crate::events::FragmentStatus;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::model::{DownloadTask, QueuedSegment, Representation, SegmentReference};
use crate::sink::MediaSink;

use super::{PipelineState, SegmentPipeline, SinkKind};

const SAFETY_MARGIN_SECONDS: f64 = 2.0;

/// One dispatched-and-resolved fetch, reported back so the caller (which
/// owns the per-track `BolaController` and event dispatcher) can drive the
/// §4.2 download lifecycle hooks and publish the §6 fragment events.
pub struct FragmentCompletion {
    pub segment: SegmentReference,
    pub is_replacement: bool,
    pub status: FragmentStatus,
    pub duration_ms: u64,
    pub from_cache: bool,
    pub transferred_bytes: u64,
    pub resource_bytes: u64,
    pub reason: Option<String>,
}

/// Result of one `load_next` call.
#[derive(Default)]
pub struct LoadNextOutcome {
    /// Segments admitted this call, reported before their fetches resolve
    /// (`FragmentLoadingStarted`, spec.md §6).
    pub started: Vec<(SegmentReference, bool)>,
    /// Segments whose fetch resolved this call (`FragmentLoadingCompleted`).
    pub completed: Vec<FragmentCompletion>,
    /// `Some(new_target)` if quota recovery ran this call (spec.md §4.4.8
    /// step 3, `BUFFER_TARGET_CHANGED`).
    pub buffer_target_changed: Option<f64>,
}

impl SegmentPipeline {
    /// If draining from a quota-exceeded event, runs recovery; then drives
    /// the append queue, then admits and fires a batch of downloads
    /// respecting `should_start_new_download`'s budget (spec.md §4.4.3
    /// `loadNext()`).
    pub async fn load_next(
        &mut self,
        sink: &mut dyn MediaSink,
        fetcher: &dyn Fetcher,
        bandwidth: &mut BandwidthEstimator,
        buffer_level: f64,
        playhead: f64,
        streaming_active: bool,
    ) -> Result<LoadNextOutcome, AbrError> {
        let mut outcome = LoadNextOutcome::default();

        if self.state == PipelineState::DrainingForQuota {
            let new_target = self.run_quota_recovery(sink, playhead, buffer_level).await?;
            outcome.buffer_target_changed = Some(new_target);
        }

        self.process_append_queue(sink).await?;

        let batch = self.admit_batch(buffer_level, streaming_active);
        if batch.is_empty() {
            return Ok(outcome);
        }

        let Some(representation) = self.current_representation.clone() else {
            return Ok(outcome);
        };

        let segment_timeout = self.config.segment_timeout;
        let mut fetches = Vec::with_capacity(batch.len());
        for number in &batch {
            let segment = representation.segment_index.by_number(*number).expect("admitted number must exist");
            let url = segment.uri("seg", &representation.id);
            let cancel = CancellationToken::new();
            self.downloads.push(DownloadTask {
                segment_number: *number,
                url: url.clone(),
                representation: representation.clone(),
                started_at: Instant::now(),
                cancel: cancel.clone(),
                is_replacement: false,
                replacing_segment: None,
            });
            outcome.started.push((segment, false));
            fetches.push(fetch_with_timeout(*number, url, cancel, segment_timeout, fetcher));
        }

        let results = futures::future::join_all(fetches).await;
        for (number, (elapsed, result)) in batch.into_iter().zip(results) {
            self.downloads.retain(|d| d.segment_number != number);
            let completion = self.handle_fetch_result(number, representation.clone(), elapsed, result, bandwidth);
            outcome.completed.push(completion);
        }
        Ok(outcome)
    }

    fn committed_duration(&self) -> f64 {
        let representation = self.current_representation.clone();
        let queued: f64 = self.append_queue.iter().map(|q| q.duration).sum();
        let in_flight: f64 = self
            .downloads
            .iter()
            .filter(|d| !d.is_replacement)
            .filter_map(|d| {
                representation
                    .as_ref()
                    .and_then(|r| r.segment_index.by_number(d.segment_number))
                    .map(|s| s.duration())
            })
            .sum();
        queued + in_flight
    }

    pub(crate) fn should_start_new_download(&self, buffer_level: f64, streaming_active: bool) -> bool {
        if !streaming_active || self.quota_exceeded_in_progress {
            return false;
        }
        match self.sink_kind {
            SinkKind::Managed => self.downloads.is_empty(),
            SinkKind::Standard => {
                let remaining_buffer_space = self.buffering_target - buffer_level;
                if self.downloads.len() >= self.config.max_concurrent_downloads {
                    return false;
                }
                if remaining_buffer_space <= 0.0 {
                    return false;
                }
                self.committed_duration() + SAFETY_MARGIN_SECONDS <= remaining_buffer_space
            }
        }
    }

    /// Dry-run selection of the segment numbers this round admits,
    /// without mutating pipeline state, so the whole batch can be fired
    /// concurrently afterward.
    fn admit_batch(&self, buffer_level: f64, streaming_active: bool) -> Vec<u64> {
        let mut batch = Vec::new();
        if !streaming_active || self.quota_exceeded_in_progress {
            return batch;
        }
        let Some(representation) = self.current_representation.as_ref() else {
            return batch;
        };
        let Some(max_number) = representation.segment_index.last().map(|s| s.segment_number) else {
            return batch;
        };

        let remaining_buffer_space = self.buffering_target - buffer_level;
        let mut simulated_committed = self.committed_duration();
        let mut cursor = match self.next_segment_to_download {
            Some(n) => n,
            None => return batch,
        };

        loop {
            match self.sink_kind {
                SinkKind::Managed => {
                    if !self.downloads.is_empty() || !batch.is_empty() {
                        break;
                    }
                }
                SinkKind::Standard => {
                    if self.downloads.len() + batch.len() >= self.config.max_concurrent_downloads {
                        break;
                    }
                    if remaining_buffer_space <= 0.0 {
                        break;
                    }
                }
            }

            while cursor <= max_number
                && (self.downloads.iter().any(|d| d.segment_number == cursor)
                    || self.append_queue.iter().any(|q| q.segment_number == cursor)
                    || batch.contains(&cursor)
                    || self.number_blacklist.contains(&cursor))
            {
                cursor += 1;
            }
            if cursor > max_number {
                break;
            }
            let Some(segment) = representation.segment_index.by_number(cursor) else {
                break;
            };
            if matches!(self.sink_kind, SinkKind::Standard)
                && simulated_committed + segment.duration() + SAFETY_MARGIN_SECONDS > remaining_buffer_space
            {
                break;
            }
            simulated_committed += segment.duration();
            batch.push(cursor);
            cursor += 1;
        }
        batch
    }

    fn handle_fetch_result(
        &mut self,
        number: u64,
        representation: Arc<Representation>,
        elapsed: Duration,
        result: Result<FetchOutcome, AbrError>,
        bandwidth: &mut BandwidthEstimator,
    ) -> FragmentCompletion {
        let segment = representation
            .segment_index
            .by_number(number)
            .expect("completed number must exist");
        match result {
            Ok(outcome) => {
                let url = segment.uri("seg", &representation.id);
                if self.url_blacklist.contains(&url) {
                    return FragmentCompletion {
                        segment,
                        is_replacement: false,
                        status: FragmentStatus::Discarded,
                        duration_ms: outcome.duration_ms,
                        from_cache: outcome.from_cache,
                        transferred_bytes: outcome.transferred_bytes,
                        resource_bytes: outcome.resource_bytes,
                        reason: Some("url previously blacklisted".to_string()),
                    };
                }
                Self::bandwidth_sample_from_fetch(bandwidth, &outcome);
                let completion = FragmentCompletion {
                    segment,
                    is_replacement: false,
                    status: FragmentStatus::Ok,
                    duration_ms: outcome.duration_ms,
                    from_cache: outcome.from_cache,
                    transferred_bytes: outcome.transferred_bytes,
                    resource_bytes: outcome.resource_bytes,
                    reason: None,
                };
                self.append_queue.push(QueuedSegment {
                    bytes: outcome.bytes,
                    duration: segment.duration(),
                    segment_number: number,
                    representation,
                });
                self.append_queue.sort_by_key(|q| q.segment_number);
                self.advance_download_pointer_past(number);
                completion
            }
            Err(err) => {
                let timeout = self.config.segment_timeout;
                let fraction = self.config.blacklist_timeout_fraction;
                let reason = err.to_string();
                match &err {
                    AbrError::SegmentFetch { retryable: false, .. } => {
                        let url = segment.uri("seg", &representation.id);
                        self.url_blacklist.insert(url);
                        self.enqueue_skip(number, representation);
                    }
                    AbrError::SegmentTimeout { .. } => {
                        self.number_blacklist.insert(number);
                        self.enqueue_skip(number, representation);
                    }
                    _ if elapsed.as_secs_f64() >= timeout.as_secs_f64() * fraction => {
                        self.number_blacklist.insert(number);
                        self.enqueue_skip(number, representation);
                    }
                    _ => {
                        tracing::warn!(segment_number = number, "transient fetch error, will retry next tick");
                    }
                }
                FragmentCompletion {
                    segment,
                    is_replacement: false,
                    status: FragmentStatus::Discarded,
                    duration_ms: elapsed.as_millis() as u64,
                    from_cache: false,
                    transferred_bytes: 0,
                    resource_bytes: 0,
                    reason: Some(reason),
                }
            }
        }
    }

    fn advance_download_pointer_past(&mut self, number: u64) {
        if self.next_segment_to_download.map_or(true, |n| n <= number) {
            self.next_segment_to_download = Some(number + 1);
        }
    }

    fn enqueue_skip(&mut self, number: u64, representation: Arc<Representation>) {
        let duration = representation
            .segment_index
            .by_number(number)
            .map(|s| s.duration())
            .unwrap_or(0.0);
        self.append_queue.push(QueuedSegment {
            bytes: Arc::from(&[][..]),
            duration,
            segment_number: number,
            representation,
        });
        self.append_queue.sort_by_key(|q| q.segment_number);
        self.advance_download_pointer_past(number);
    }
}

/// Races one fetch against `segment_timeout`, converting an elapsed timeout
/// into `AbrError::SegmentTimeout` and cancelling the in-flight request.
async fn fetch_with_timeout(
    segment_number: u64,
    url: String,
    cancel: CancellationToken,
    segment_timeout: Duration,
    fetcher: &dyn Fetcher,
) -> (Duration, Result<FetchOutcome, AbrError>) {
    let started = Instant::now();
    match tokio::time::timeout(segment_timeout, fetcher.fetch(&url, cancel.clone())).await {
        Ok(result) => (started.elapsed(), result),
        Err(_) => {
            cancel.cancel();
            let elapsed = started.elapsed();
            (
                elapsed,
                Err(AbrError::SegmentTimeout {
                    segment_number,
                    elapsed,
                    timeout: segment_timeout,
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::BandwidthEstimator;
    use crate::config::{BandwidthConfig, PipelineConfig};
    use crate::model::{Representation, SegmentIndex, SegmentReference};
    use crate::pipeline::SinkKind;
    use crate::testing::{FakeSink, ScriptedFetcher};

    fn representation() -> Arc<Representation> {
        Arc::new(Representation::new(
            "r1",
            1_000_000,
            "avc1",
            SegmentIndex::new(vec![
                SegmentReference::new(0, 0.0, 4.0),
                SegmentReference::new(1, 4.0, 8.0),
                SegmentReference::new(2, 8.0, 12.0),
            ]),
            None,
        ))
    }

    #[test]
    fn standard_sink_respects_max_concurrent_downloads() {
        let mut pipeline = SegmentPipeline::new(PipelineConfig::default(), SinkKind::Standard, 60.0);
        pipeline.current_representation = Some(representation());
        pipeline.next_segment_to_download = Some(0);
        for n in 0..pipeline.config.max_concurrent_downloads {
            pipeline.downloads.push(DownloadTask {
                segment_number: n as u64,
                url: "u".into(),
                representation: representation(),
                started_at: Instant::now(),
                cancel: CancellationToken::new(),
                is_replacement: false,
                replacing_segment: None,
            });
        }
        assert!(!pipeline.should_start_new_download(0.0, true));
        assert!(pipeline.admit_batch(0.0, true).is_empty());
    }

    #[test]
    fn managed_sink_allows_only_one_in_flight_download() {
        let mut pipeline = SegmentPipeline::new(PipelineConfig::default(), SinkKind::Managed, 60.0);
        pipeline.current_representation = Some(representation());
        pipeline.next_segment_to_download = Some(0);
        assert!(pipeline.should_start_new_download(0.0, true));
        assert_eq!(pipeline.admit_batch(0.0, true), vec![0]);
    }

    #[test]
    fn download_admission_stops_once_buffer_target_is_committed() {
        let mut pipeline = SegmentPipeline::new(PipelineConfig::default(), SinkKind::Standard, 10.0);
        pipeline.current_representation = Some(representation());
        pipeline.next_segment_to_download = Some(0);
        assert!(!pipeline.should_start_new_download(10.0, true));
        assert!(pipeline.admit_batch(10.0, true).is_empty());
    }

    #[test]
    fn batch_admits_multiple_segments_up_to_the_concurrency_cap() {
        let mut pipeline = SegmentPipeline::new(PipelineConfig::default(), SinkKind::Standard, 60.0);
        pipeline.current_representation = Some(representation());
        pipeline.next_segment_to_download = Some(0);
        let batch = pipeline.admit_batch(0.0, true);
        assert_eq!(batch, vec![0, 1]); // max_concurrent_downloads defaults to 2
    }

    #[tokio::test]
    async fn load_next_reports_started_and_completed_fragments() {
        let mut pipeline = SegmentPipeline::new(PipelineConfig::default(), SinkKind::Standard, 60.0);
        let mut sink = FakeSink::new();
        let rep = representation();
        pipeline
            .on_representation_changed(&mut sink, rep, crate::model::SwitchReason::Start, 0.0, "video/mp4", "avc1")
            .await
            .unwrap();

        let fetcher = ScriptedFetcher::new(vec![
            ScriptedFetcher::ok(b"aaaa", 100),
            ScriptedFetcher::ok(b"bbbb", 100),
        ]);
        let mut bandwidth = BandwidthEstimator::new(BandwidthConfig::default());
        let outcome = pipeline
            .load_next(&mut sink, &fetcher, &mut bandwidth, 0.0, 0.0, true)
            .await
            .unwrap();

        assert_eq!(outcome.started.len(), 2);
        assert_eq!(outcome.completed.len(), 2);
        assert!(outcome.completed.iter().all(|c| c.status == FragmentStatus::Ok));
        assert!(outcome.buffer_target_changed.is_none());
    }

    #[tokio::test]
    async fn load_next_drains_quota_recovery_before_dispatching() {
        let mut pipeline = SegmentPipeline::new(PipelineConfig::default(), SinkKind::Standard, 60.0);
        let mut sink = FakeSink::new();
        let rep = representation();
        pipeline
            .on_representation_changed(&mut sink, rep, crate::model::SwitchReason::Start, 30.0, "video/mp4", "avc1")
            .await
            .unwrap();
        pipeline.begin_quota_recovery();

        let fetcher = ScriptedFetcher::new(vec![ScriptedFetcher::ok(b"aaaa", 100)]);
        let mut bandwidth = BandwidthEstimator::new(BandwidthConfig::default());
        let outcome = pipeline
            .load_next(&mut sink, &fetcher, &mut bandwidth, 70.0, 30.0, true)
            .await
            .unwrap();

        assert!(outcome.buffer_target_changed.is_some());
        assert_eq!(pipeline.state(), PipelineState::Normal);
    }
}
