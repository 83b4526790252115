//! Scheduler (spec.md §4.5): drives the SegmentPipeline at an adaptive
//! cadence, single-threaded cooperative.

use std::time::Duration;

use crate::config::SchedulerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Preloading,
    Steady,
    Stopped,
}

/// Tracks the current tick interval and derives the next one from buffer
/// level (spec.md §4.5 "Interval derivation").
pub struct Scheduler {
    config: SchedulerConfig,
    phase: SchedulerPhase,
    current_interval: Duration,
    last_quality_check: Option<std::time::Instant>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let current_interval = config.base_interval;
        Self {
            config,
            phase: SchedulerPhase::Stopped,
            current_interval,
            last_quality_check: None,
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Whether a quality check is due this tick (spec.md §4.5 loop body (a)).
    pub fn quality_check_due(&self, now: std::time::Instant) -> bool {
        if self.phase == SchedulerPhase::Preloading {
            return false;
        }
        match self.last_quality_check {
            Some(last) => now.duration_since(last) >= self.config.quality_check_interval,
            None => true,
        }
    }

    pub fn mark_quality_checked(&mut self, now: std::time::Instant) {
        self.last_quality_check = Some(now);
    }

    /// Target interval for the given buffer level, before smoothing
    /// (spec.md §4.5 "Interval derivation").
    fn target_interval(&self, buffer_level: f64, buffer_target: f64, avg_segment_duration: Option<f64>) -> Duration {
        let target = if buffer_level < self.config.critical_buffer_level {
            self.config.min_interval
        } else if buffer_level < buffer_target {
            let fill_ratio = buffer_level / buffer_target;
            if fill_ratio < self.config.slowdown_threshold {
                self.config.base_interval
            } else {
                let span = (1.0 - self.config.slowdown_threshold).max(f64::EPSILON);
                let t = ((fill_ratio - self.config.slowdown_threshold) / span).clamp(0.0, 1.0);
                let base = self.config.base_interval.as_secs_f64();
                let max = self.config.max_interval.as_secs_f64();
                Duration::from_secs_f64(base + t * (max - base))
            }
        } else {
            self.config.max_interval
        };

        match avg_segment_duration {
            Some(duration) if buffer_level < buffer_target => {
                let cap = Duration::from_secs_f64(0.5 * duration);
                target.min(cap)
            }
            _ => target,
        }
    }

    /// Advances `current_interval` toward the buffer-derived target with
    /// smoothing (spec.md §4.5: `current := 0.7*current + 0.3*target`),
    /// clamped to `[min_interval, max_interval]`.
    pub fn advance_interval(&mut self, buffer_level: f64, buffer_target: f64, avg_segment_duration: Option<f64>) {
        let target = self.target_interval(buffer_level, buffer_target, avg_segment_duration);
        let current_s = self.current_interval.as_secs_f64();
        let target_s = target.as_secs_f64();
        let smoothed = 0.7 * current_s + 0.3 * target_s;
        let clamped = smoothed
            .max(self.config.min_interval.as_secs_f64())
            .min(self.config.max_interval.as_secs_f64());
        self.current_interval = Duration::from_secs_f64(clamped);
    }

    pub fn on_source_changed(&mut self) {
        self.phase = SchedulerPhase::Preloading;
        self.current_interval = self.config.base_interval;
        self.last_quality_check = None;
    }

    pub fn on_playback_started(&mut self) {
        self.phase = SchedulerPhase::Steady;
    }

    /// Doubles the interval on pause, but only if the buffer is healthy
    /// (above `criticalBufferLevel`) — pausing shouldn't slow recovery from
    /// a near-empty buffer.
    pub fn on_pause(&mut self, buffer_level: f64) {
        if buffer_level > self.config.critical_buffer_level {
            let doubled = self.current_interval.as_secs_f64() * 2.0;
            self.current_interval =
                Duration::from_secs_f64(doubled.min(self.config.max_interval.as_secs_f64()));
        }
    }

    pub fn on_seek(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    pub fn on_end(&mut self) {
        self.phase = SchedulerPhase::Stopped;
    }

    pub fn preloading(&self) -> bool {
        self.phase == SchedulerPhase::Preloading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_buffer_forces_min_interval() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.advance_interval(1.0, 60.0, None);
        assert!(scheduler.current_interval() <= Duration::from_millis(500));
    }

    #[test]
    fn full_buffer_relaxes_toward_max_interval() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        for _ in 0..50 {
            scheduler.advance_interval(60.0, 60.0, None);
        }
        assert_eq!(scheduler.current_interval(), Duration::from_millis(2000));
    }

    #[test]
    fn seek_resets_interval_to_minimum() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.on_seek();
        assert_eq!(scheduler.current_interval(), Duration::from_millis(100));
    }

    #[test]
    fn pause_doubles_interval_only_when_buffer_is_healthy() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let before = scheduler.current_interval();
        scheduler.on_pause(1.0); // below critical level: no change
        assert_eq!(scheduler.current_interval(), before);
        scheduler.on_pause(10.0);
        assert!(scheduler.current_interval() > before);
    }

    #[test]
    fn quality_check_due_is_suppressed_while_preloading() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.on_source_changed();
        assert!(!scheduler.quality_check_due(std::time::Instant::now()));
    }
}
