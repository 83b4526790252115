//! Adaptive bitrate streaming core of a DASH video player: bandwidth
//! estimation, BOLA buffer-based quality control, the segment
//! download/append pipeline, and the scheduler/stall-detector that
//! coordinate them.
//!
//! Out of scope (external collaborators, see [`sink`] and [`fetch`]):
//! manifest XML parsing, media sink internals, UI, and fetch transport
//! internals — the core only calls their interfaces.

pub mod bandwidth;
pub mod bola;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod model;
pub mod pipeline;
pub mod quality;
pub mod scheduler;
pub mod sink;
pub mod stall;
mod testing;

use std::sync::Arc;
use std::time::Instant;

use crate::bandwidth::BandwidthEstimator;
use crate::bola::BolaController;
use crate::config::Config;
use crate::error::AbrError;
use crate::events::{CoreEvent, EventDispatcher, EventSubscriber, ExternalEvent};
use crate::fetch::Fetcher;
use crate::model::{Representation, SwitchReason, TrackKind};
use crate::pipeline::{SegmentPipeline, SinkKind};
use crate::quality::{DisplayTarget, QualityDecision, QualitySelector};
use crate::scheduler::Scheduler;
use crate::sink::MediaSink;
use crate::stall::{GapHandler, PlayerContext, StallDetector};

/// Outcome of one [`CoreSession::tick`] call: every §4.4/§4.6 behavior that
/// isn't surfaced as a published [`CoreEvent`] but still matters to the
/// caller driving playback.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickOutcome {
    pub quality_changed: bool,
    pub buffer_level: f64,
    pub stall_confirmed: bool,
    /// `Some(position)` if the gap handler wants the player to jump there.
    pub seek_jump: Option<f64>,
}

/// One value that owns every component, per the Design Notes (spec.md
/// §9): no shared globals, state threads through explicit references.
pub struct CoreSession {
    config: Config,
    pub video_bandwidth: BandwidthEstimator,
    pub audio_bandwidth: BandwidthEstimator,
    pub video_quality: QualitySelector,
    pub audio_quality: QualitySelector,
    pub video_pipeline: SegmentPipeline,
    pub audio_pipeline: SegmentPipeline,
    pub scheduler: Scheduler,
    pub stall_detector: StallDetector,
    pub gap_handler: GapHandler,
    dispatcher: EventDispatcher,
    abr_enabled: bool,
    last_prune: Option<Instant>,
}

impl CoreSession {
    pub fn new(config: Config, sink_kind: SinkKind, now: Instant) -> Self {
        let video_bandwidth = BandwidthEstimator::new(config.bandwidth.clone());
        let audio_bandwidth = BandwidthEstimator::new(config.bandwidth.clone());

        let make_bola = |cfg: &Config| {
            BolaController::new(
                cfg.bola.clone(),
                cfg.quality_selector.min_buffer_level,
                cfg.pipeline.max_buffer_level,
                cfg.pipeline.buffering_target,
            )
        };
        let video_quality = QualitySelector::new(
            config.quality_selector.clone(),
            make_bola(&config),
            config.bola.startup_safety_factor,
        );
        let audio_quality = QualitySelector::new(
            config.quality_selector.clone(),
            make_bola(&config),
            config.bola.startup_safety_factor,
        );

        let video_pipeline = SegmentPipeline::new(config.pipeline.clone(), sink_kind, config.pipeline.buffering_target);
        let audio_pipeline = SegmentPipeline::new(config.pipeline.clone(), sink_kind, config.pipeline.buffering_target);

        Self {
            scheduler: Scheduler::new(config.scheduler.clone()),
            stall_detector: StallDetector::new(config.stall.clone(), now),
            gap_handler: GapHandler::new(config.stall.clone()),
            video_bandwidth,
            audio_bandwidth,
            video_quality,
            audio_quality,
            video_pipeline,
            audio_pipeline,
            dispatcher: EventDispatcher::new(),
            abr_enabled: true,
            last_prune: None,
            config,
        }
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn EventSubscriber + Send>) {
        self.dispatcher.subscribe(subscriber);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Loads a freshly parsed manifest: `representations_changed` (spec.md §6).
    pub fn on_representations_changed(&mut self, video: Vec<Arc<Representation>>, audio: Vec<Arc<Representation>>, now: Instant) {
        self.video_quality.set_representations(video.clone(), now);
        self.audio_quality.set_representations(audio.clone(), now);
        self.dispatcher.publish(CoreEvent::RepresentationsChanged { video, audio });
    }

    /// Runs one quality check for a track and, on a switch, drives the
    /// corresponding pipeline's representation-change path (spec.md §4.4.2).
    pub async fn check_quality(
        &mut self,
        track: TrackKind,
        sink: &mut dyn MediaSink,
        now: Instant,
        buffer_level: f64,
        playhead: f64,
        mime: &str,
        codecs: &str,
    ) -> Result<bool, AbrError> {
        if !self.abr_enabled {
            return Ok(false);
        }
        let (selector, pipeline, bandwidth) = match track {
            TrackKind::Video => (&mut self.video_quality, &mut self.video_pipeline, &self.video_bandwidth),
            TrackKind::Audio => (&mut self.audio_quality, &mut self.audio_pipeline, &self.audio_bandwidth),
        };
        let bandwidth_bps = Some(bandwidth.estimate());
        let decision = selector.check(now, buffer_level, bandwidth_bps);
        match decision {
            QualityDecision::NoChange => Ok(false),
            QualityDecision::Switch { representation, reason, .. } => {
                pipeline
                    .on_representation_changed(sink, representation.clone(), reason, playhead, mime, codecs)
                    .await?;
                let event = match track {
                    TrackKind::Video => CoreEvent::VideoBitrateChanged { representation, switch_reason: reason },
                    TrackKind::Audio => CoreEvent::AudioBitrateChanged { representation, switch_reason: reason },
                };
                self.dispatcher.publish(event);
                Ok(true)
            }
        }
    }

    /// Drives one pipeline's `loadNext()`: runs quota recovery if draining,
    /// feeds completed fetches into BOLA's download-timing hooks, and
    /// publishes the per-fragment and buffer-target-changed events
    /// (spec.md §4.2, §4.4.8, §6).
    pub async fn load_next(
        &mut self,
        track: TrackKind,
        sink: &mut dyn MediaSink,
        fetcher: &dyn Fetcher,
        buffer_level: f64,
        playhead: f64,
        streaming_active: bool,
    ) -> Result<(), AbrError> {
        let (pipeline, bandwidth, selector) = match track {
            TrackKind::Video => (&mut self.video_pipeline, &mut self.video_bandwidth, &mut self.video_quality),
            TrackKind::Audio => (&mut self.audio_pipeline, &mut self.audio_bandwidth, &mut self.audio_quality),
        };
        let outcome = pipeline
            .load_next(sink, fetcher, bandwidth, buffer_level, playhead, streaming_active)
            .await?;

        for (segment, is_replacement) in &outcome.started {
            selector.bola_mut().on_segment_download_begin(segment.start_time);
            self.dispatcher.publish(CoreEvent::FragmentLoadingStarted {
                segment: *segment,
                is_replacement: *is_replacement,
            });
        }
        for completion in outcome.completed {
            selector
                .bola_mut()
                .on_segment_download_end(completion.segment.duration(), completion.is_replacement);
            self.dispatcher.publish(CoreEvent::FragmentLoadingCompleted {
                segment: completion.segment,
                status: completion.status,
                duration_ms: completion.duration_ms,
                from_cache: completion.from_cache,
                transferred_bytes: completion.transferred_bytes,
                resource_bytes: completion.resource_bytes,
                is_replacement: completion.is_replacement,
                reason: completion.reason,
            });
        }
        if let Some(new_buffer_target) = outcome.buffer_target_changed {
            self.dispatcher.publish(CoreEvent::BufferTargetChanged { new_buffer_target });
        }
        if track == TrackKind::Video {
            self.dispatcher.publish(CoreEvent::BufferLevelUpdated { buffer_level });
        }
        Ok(())
    }

    /// Drives one scheduler iteration across both tracks: quality check
    /// (video), download dispatch, buffered-segment sync, background
    /// pruning, fast-switch replacement, and stall/gap detection (spec.md
    /// §4.4.7, §4.4.9, §4.4.5/S5, §4.4.11, §4.6). Complements the
    /// individually-callable methods above with the end-to-end loop body
    /// spec.md §4.5 describes.
    #[allow(clippy::too_many_arguments)]
    pub async fn tick(
        &mut self,
        video_sink: &mut dyn MediaSink,
        audio_sink: &mut dyn MediaSink,
        video_fetcher: &dyn Fetcher,
        audio_fetcher: &dyn Fetcher,
        now: Instant,
        playhead: f64,
        paused: bool,
        seeking: bool,
        ended: bool,
        stream_end: f64,
        total_frames: u64,
        dropped_frames: u64,
        mime: &str,
        codecs: &str,
    ) -> Result<TickOutcome, AbrError> {
        self.video_quality.record_dropped_frames(total_frames, dropped_frames);

        let mut quality_changed = false;
        if self.scheduler.quality_check_due(now) && !self.scheduler.preloading() {
            let check_buffer_level = self.video_pipeline.effective_buffer_level(video_sink, playhead);
            quality_changed = self
                .check_quality(TrackKind::Video, video_sink, now, check_buffer_level, playhead, mime, codecs)
                .await?;
            if quality_changed {
                self.stall_detector.set_context(PlayerContext::QualitySwitching, now);
            }
            self.scheduler.mark_quality_checked(now);
        }

        let streaming_active = !paused && !ended;
        let video_buffer_level = self.video_pipeline.effective_buffer_level(video_sink, playhead);
        let audio_buffer_level = self.audio_pipeline.effective_buffer_level(audio_sink, playhead);
        self.load_next(TrackKind::Video, video_sink, video_fetcher, video_buffer_level, playhead, streaming_active)
            .await?;
        self.load_next(TrackKind::Audio, audio_sink, audio_fetcher, audio_buffer_level, playhead, streaming_active)
            .await?;

        self.video_pipeline.sync_buffered_segments(video_sink);
        self.audio_pipeline.sync_buffered_segments(audio_sink);

        let prune_due = self
            .last_prune
            .map_or(true, |last| now.duration_since(last) >= self.config.pipeline.pruning_interval);
        if prune_due {
            self.video_pipeline.prune_behind(video_sink, playhead).await?;
            self.audio_pipeline.prune_behind(audio_sink, playhead).await?;
            self.last_prune = Some(now);
        }

        if let Some(representation) = self.video_quality.current_representation() {
            if let Some(first) = representation.segment_index.first() {
                let candidates = self
                    .video_pipeline
                    .replacement_candidates(playhead, first.duration(), &representation);
                for segment_number in candidates {
                    self.video_pipeline
                        .dispatch_replacement(video_fetcher, representation.clone(), segment_number)
                        .await?;
                }
            }
            self.video_pipeline.process_replacement_queue(video_sink).await?;
        }

        let position_is_buffered = video_sink
            .buffered()
            .iter()
            .any(|r| r.start <= playhead && playhead < r.end);
        let download_covers_position = self.video_pipeline.downloads().iter().any(|d| {
            d.representation
                .segment_index
                .by_number(d.segment_number)
                .map_or(false, |s| s.start_time <= playhead && playhead < s.end_time)
        });
        let stall_confirmed = self.stall_detector.sample(
            now,
            playhead,
            paused,
            seeking,
            ended,
            position_is_buffered,
            download_covers_position,
        );

        let future_ranges = video_sink.buffered();
        let seek_jump = self.gap_handler.check(
            now,
            playhead,
            &future_ranges,
            true,
            seeking,
            paused,
            quality_changed,
            stall_confirmed,
            stream_end,
        );

        let avg_segment_duration = self
            .video_quality
            .current_representation()
            .and_then(|r| r.segment_index.first())
            .map(|s| s.duration());
        self.scheduler
            .advance_interval(video_buffer_level, self.video_pipeline.buffering_target(), avg_segment_duration);

        Ok(TickOutcome {
            quality_changed,
            buffer_level: video_buffer_level,
            stall_confirmed,
            seek_jump,
        })
    }

    pub async fn handle_external_event(
        &mut self,
        event: ExternalEvent,
        now: Instant,
        video_sink: &mut dyn MediaSink,
        audio_sink: &mut dyn MediaSink,
        playhead: f64,
    ) -> Result<(), AbrError> {
        match event {
            ExternalEvent::SeekRequested { .. } | ExternalEvent::Seeked => {
                self.video_quality.bola_mut().on_seek();
                self.audio_quality.bola_mut().on_seek();
                self.video_pipeline.on_seek(video_sink, playhead).await?;
                self.audio_pipeline.on_seek(audio_sink, playhead).await?;
                self.scheduler.on_seek();
                self.gap_handler.note_seek(now);
                self.stall_detector.set_context(PlayerContext::Seeking, now);
            }
            ExternalEvent::ForceVideoBitrateChange { .. } => {
                self.abr_enabled = false;
                self.video_quality.set_abr_enabled(false);
            }
            ExternalEvent::EnableAbr => {
                self.abr_enabled = true;
                self.video_quality.set_abr_enabled(true);
            }
            ExternalEvent::PlaybackStarted => {
                self.scheduler.on_playback_started();
                self.video_quality.on_playback_started_or_seek(now);
                self.audio_quality.on_playback_started_or_seek(now);
                self.stall_detector.set_context(PlayerContext::Normal, now);
            }
            ExternalEvent::PlaybackPaused => {
                self.stall_detector.set_context(PlayerContext::Normal, now);
            }
            ExternalEvent::PlaybackEnded => {
                self.scheduler.on_end();
            }
            ExternalEvent::DimensionsChanged { width, height, device_pixel_ratio } => {
                self.video_quality.set_display_target(Some(DisplayTarget {
                    width,
                    height,
                    device_pixel_ratio,
                }));
            }
            ExternalEvent::PlaybackProgress { .. } | ExternalEvent::QualityChangeRequested { .. } => {}
        }
        Ok(())
    }

    /// `quality_change_requested`: forces a representation on the named
    /// track, exempt from the switch cooldown (spec.md §6, §8 property 7).
    pub async fn force_representation(
        &mut self,
        track: TrackKind,
        index: usize,
        sink: &mut dyn MediaSink,
        now: Instant,
        playhead: f64,
        mime: &str,
        codecs: &str,
    ) -> Result<(), AbrError> {
        let (selector, pipeline) = match track {
            TrackKind::Video => (&mut self.video_quality, &mut self.video_pipeline),
            TrackKind::Audio => (&mut self.audio_quality, &mut self.audio_pipeline),
        };
        if let QualityDecision::Switch { representation, reason, .. } = selector.force_switch(index, now) {
            pipeline
                .on_representation_changed(sink, representation, reason, playhead, mime, codecs)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{representation_ladder, FakeSink};

    #[tokio::test]
    async fn first_quality_decision_opens_the_sink_with_start_reason() {
        let config = Config::default();
        let mut session = CoreSession::new(config, SinkKind::Standard, Instant::now());
        let ladder = representation_ladder(&[400, 1000, 3000, 6000], 5, 4.0);
        let now = Instant::now();
        session.on_representations_changed(ladder, Vec::new(), now);

        let mut sink = FakeSink::new();
        let changed = session
            .check_quality(TrackKind::Video, &mut sink, now, 0.0, 0.0, "video/mp4", "avc1")
            .await
            .unwrap();
        assert!(changed);
        assert!(session.video_pipeline.current_representation().is_some());
    }

    #[tokio::test]
    async fn seek_event_prunes_the_pipeline_to_the_new_window() {
        let config = Config::default();
        let mut session = CoreSession::new(config, SinkKind::Standard, Instant::now());
        let ladder = representation_ladder(&[400, 1000, 3000, 6000], 20, 4.0);
        let now = Instant::now();
        session.on_representations_changed(ladder, Vec::new(), now);

        let mut video_sink = FakeSink::new();
        let mut audio_sink = FakeSink::new();
        session
            .check_quality(TrackKind::Video, &mut video_sink, now, 0.0, 0.0, "video/mp4", "avc1")
            .await
            .unwrap();
        video_sink.ranges = vec![crate::sink::BufferedRange { start: 0.0, end: 40.0 }];

        session
            .handle_external_event(
                ExternalEvent::SeekRequested { seek_to: 60.0 },
                now,
                &mut video_sink,
                &mut audio_sink,
                60.0,
            )
            .await
            .unwrap();

        // Seeking past the old buffered window prunes it away entirely.
        assert!(video_sink.ranges.is_empty());
    }

    #[tokio::test]
    async fn tick_drives_download_append_and_buffer_level_together() {
        let config = Config::default();
        let mut session = CoreSession::new(config, SinkKind::Standard, Instant::now());
        let ladder = representation_ladder(&[400, 1000, 3000, 6000], 30, 4.0);
        let now = Instant::now();
        session.on_representations_changed(ladder, Vec::new(), now);

        let mut video_sink = FakeSink::new();
        let mut audio_sink = FakeSink::new();
        let video_fetcher = crate::testing::ScriptedFetcher::default();
        let audio_fetcher = crate::testing::ScriptedFetcher::default();

        let outcome = session
            .tick(
                &mut video_sink,
                &mut audio_sink,
                &video_fetcher,
                &audio_fetcher,
                now,
                0.0,
                false,
                false,
                false,
                120.0,
                0,
                0,
                "video/mp4",
                "avc1",
            )
            .await
            .unwrap();

        assert!(outcome.quality_changed);
        assert!(session.video_pipeline.current_representation().is_some());
    }
}
