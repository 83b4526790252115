//! QualitySelector (spec.md §4.3): composes BOLA, throughput, and
//! dropped-frames strategies behind cooldown and smoothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bola::BolaController;
use crate::config::QualitySelectorConfig;
use crate::model::{Representation, SwitchReason};
use crate::quality::filter::{filter_representations, DisplayTarget};
use crate::quality::smoothing::{apply_smoothing, QualityHistory};
use crate::quality::strategies::{DroppedFramesOutcome, DroppedFramesTracker, StrategyKind};

/// Outcome of a `check()` call.
#[derive(Debug, Clone)]
pub enum QualityDecision {
    NoChange,
    Switch {
        representation: Arc<Representation>,
        reason: SwitchReason,
        strategy: StrategyKind,
    },
}

pub struct QualitySelector {
    config: QualitySelectorConfig,
    bola_safety_factor: f64,
    bola: BolaController,
    dropped_frames: DroppedFramesTracker,
    history: QualityHistory,
    last_switch: Option<Instant>,
    activated_at: Option<Instant>,
    abr_enabled: bool,
    all_representations: Vec<Arc<Representation>>,
    filtered: Vec<Arc<Representation>>,
    bitrate_cap: Option<u64>,
    display_target: Option<DisplayTarget>,
    current_index: usize,
}

impl QualitySelector {
    pub fn new(config: QualitySelectorConfig, bola: BolaController, bola_safety_factor: f64) -> Self {
        Self {
            config,
            bola_safety_factor,
            bola,
            dropped_frames: DroppedFramesTracker::default(),
            history: QualityHistory::new(10),
            last_switch: None,
            activated_at: None,
            abr_enabled: true,
            all_representations: Vec::new(),
            filtered: Vec::new(),
            bitrate_cap: None,
            display_target: None,
            current_index: 0,
        }
    }

    /// Loads a new representation ladder (manifest update), applying the
    /// current filter and re-initializing BOLA.
    pub fn set_representations(&mut self, representations: Vec<Arc<Representation>>, now: Instant) {
        self.all_representations = representations;
        self.refilter();
        self.bola.init(self.filtered.clone());
        self.current_index = 0;
        self.activated_at = Some(now);
        self.last_switch = None;
        self.history = QualityHistory::new(self.config.history_capacity);
    }

    pub fn set_bitrate_cap(&mut self, cap: Option<u64>) {
        self.bitrate_cap = cap;
        self.refilter();
    }

    pub fn set_display_target(&mut self, target: Option<DisplayTarget>) {
        self.display_target = target;
        self.refilter();
    }

    fn refilter(&mut self) {
        self.filtered = filter_representations(&self.all_representations, self.bitrate_cap, self.display_target);
    }

    pub fn set_abr_enabled(&mut self, enabled: bool) {
        self.abr_enabled = enabled;
    }

    pub fn record_dropped_frames(&mut self, total_frames: u64, dropped_frames: u64) {
        self.dropped_frames.record(total_frames, dropped_frames);
    }

    pub fn on_playback_started_or_seek(&mut self, now: Instant) {
        self.activated_at = Some(now);
    }

    pub fn current_representation(&self) -> Option<Arc<Representation>> {
        self.filtered.get(self.current_index).cloned()
    }

    pub fn bola_mut(&mut self) -> &mut BolaController {
        &mut self.bola
    }

    fn smoothing_active(&self, now: Instant) -> bool {
        if !self.config.allow_smoothing {
            return false;
        }
        match self.activated_at {
            Some(t) => now.duration_since(t) >= self.config.smoothing_enable_delay,
            None => false,
        }
    }

    fn cooldown_active(&self, now: Instant) -> bool {
        match self.last_switch {
            Some(last) => now.duration_since(last) < self.config.switch_cooldown,
            None => false,
        }
    }

    fn bandwidth_sustainable_index(&self, bandwidth_bps: f64) -> usize {
        self.filtered
            .iter()
            .enumerate()
            .rev()
            .find(|(_, r)| r.bitrate as f64 <= self.bola_safety_factor * bandwidth_bps)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Runs one quality check (spec.md §4.3's strategy priority list) and
    /// returns the decision.
    pub fn check(
        &mut self,
        now: Instant,
        buffer_level: f64,
        bandwidth_bps: Option<f64>,
    ) -> QualityDecision {
        if !self.abr_enabled || self.filtered.is_empty() {
            return QualityDecision::NoChange;
        }

        // Strategy 1: dropped frames, bypasses cooldown entirely.
        let dropped_outcome = self.dropped_frames.check(
            now,
            self.config.dropped_frames_sample_threshold,
            self.config.dropped_frames_high_watermark,
            self.config.dropped_frames_low_watermark,
            self.config.dropped_frames_max_downgrades,
            self.config.dropped_frames_window,
        );
        if dropped_outcome == DroppedFramesOutcome::EmergencyDowngrade {
            let target = self.current_index.saturating_sub(1);
            return self.commit(target, SwitchReason::Abr, StrategyKind::DroppedFrames, now);
        }

        if self.cooldown_active(now) {
            return QualityDecision::NoChange;
        }

        let (raw_target, strategy) = if buffer_level >= self.config.min_buffer_level {
            (self.bola.choose(buffer_level, bandwidth_bps), StrategyKind::Buffer)
        } else {
            match bandwidth_bps {
                Some(bw) => (self.bandwidth_sustainable_index(bw), StrategyKind::Bandwidth),
                None => (0, StrategyKind::Bandwidth),
            }
        };

        let target = if self.smoothing_active(now) {
            apply_smoothing(
                self.current_index,
                raw_target,
                self.config.smoothing_factor,
                self.history.is_oscillating(),
            )
        } else {
            raw_target
        };

        if target == self.current_index {
            return QualityDecision::NoChange;
        }

        self.commit(target, SwitchReason::Abr, strategy, now)
    }

    /// A forced switch requested by the outside world; exempt from cooldown.
    pub fn force_switch(&mut self, index: usize, now: Instant) -> QualityDecision {
        self.commit(index, SwitchReason::ChosenByUser, StrategyKind::Buffer, now)
    }

    fn commit(
        &mut self,
        target: usize,
        reason: SwitchReason,
        strategy: StrategyKind,
        now: Instant,
    ) -> QualityDecision {
        let Some(representation) = self.filtered.get(target).cloned() else {
            return QualityDecision::NoChange;
        };
        self.current_index = target;
        self.history.push(target);
        if !reason.is_cooldown_exempt() {
            self.last_switch = Some(now);
        }
        QualityDecision::Switch {
            representation,
            reason,
            strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BolaConfig;
    use crate::model::{SegmentIndex, SegmentReference};

    fn ladder(bitrates: &[u64]) -> Vec<Arc<Representation>> {
        bitrates
            .iter()
            .map(|&b| {
                Arc::new(Representation::new(
                    format!("r{b}"),
                    b,
                    "avc1",
                    SegmentIndex::new(vec![SegmentReference::new(0, 0.0, 4.0)]),
                    None,
                ))
            })
            .collect()
    }

    fn make_selector() -> QualitySelector {
        let bola = BolaController::new(BolaConfig::default(), 10.0, 90.0, 60.0);
        QualitySelector::new(QualitySelectorConfig::default(), bola, 0.9)
    }

    #[test]
    fn cooldown_suppresses_a_second_abr_switch_immediately_after_the_first() {
        let mut selector = make_selector();
        let now = Instant::now();
        selector.set_representations(ladder(&[400, 1000, 3000, 6000]), now);
        // Drive buffer below minBufferLevel with a bandwidth hint that picks a higher rep.
        let decision = selector.check(now, 2.0, Some(2_000_000.0));
        assert!(matches!(decision, QualityDecision::Switch { .. }));
        let decision2 = selector.check(now + Duration::from_millis(100), 2.0, Some(6_000_000.0));
        assert!(matches!(decision2, QualityDecision::NoChange));
    }

    #[test]
    fn dropped_frames_bypasses_cooldown() {
        let mut selector = make_selector();
        let now = Instant::now();
        selector.set_representations(ladder(&[400, 1000, 3000, 6000]), now);
        selector.check(now, 2.0, Some(6_000_000.0)); // establish a switch + cooldown
        selector.record_dropped_frames(400, 70); // 17.5% drop ratio
        let decision = selector.check(now + Duration::from_millis(50), 20.0, Some(6_000_000.0));
        assert!(matches!(
            decision,
            QualityDecision::Switch {
                strategy: StrategyKind::DroppedFrames,
                ..
            }
        ));
    }

    #[test]
    fn force_switch_is_cooldown_exempt() {
        let mut selector = make_selector();
        let now = Instant::now();
        selector.set_representations(ladder(&[400, 1000, 3000, 6000]), now);
        selector.check(now, 2.0, Some(500_000.0));
        let decision = selector.force_switch(3, now + Duration::from_millis(10));
        assert!(matches!(decision, QualityDecision::Switch { .. }));
    }

    #[test]
    fn disabled_abr_always_returns_no_change() {
        let mut selector = make_selector();
        let now = Instant::now();
        selector.set_representations(ladder(&[400, 1000, 3000, 6000]), now);
        selector.set_abr_enabled(false);
        let decision = selector.check(now, 2.0, Some(500_000.0));
        assert!(matches!(decision, QualityDecision::NoChange));
    }
}
