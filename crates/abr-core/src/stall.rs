//! StallDetector & GapHandler (spec.md §4.6).

use std::time::{Duration, Instant};

use crate::config::StallConfig;
use crate::sink::BufferedRange;

/// Player context, each with its own grace period before a stall can be
/// flagged as a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerContext {
    Startup,
    Seeking,
    QualitySwitching,
    Normal,
    Buffering,
}

impl PlayerContext {
    fn grace_period(self, config: &StallConfig) -> Duration {
        match self {
            PlayerContext::Startup => config.grace_startup,
            PlayerContext::Seeking => config.grace_seeking,
            PlayerContext::QualitySwitching => config.grace_quality_switching,
            PlayerContext::Normal => config.grace_normal,
            PlayerContext::Buffering => config.grace_buffering,
        }
    }
}

/// Runs off 10 Hz playback-position samples (spec.md §4.6).
pub struct StallDetector {
    config: StallConfig,
    context: PlayerContext,
    context_since: Instant,
    last_position: Option<(Instant, f64)>,
    stall_since: Option<Instant>,
    recent_checks: Vec<bool>,
}

impl StallDetector {
    pub fn new(config: StallConfig, now: Instant) -> Self {
        Self {
            config,
            context: PlayerContext::Startup,
            context_since: now,
            last_position: None,
            stall_since: None,
            recent_checks: Vec::new(),
        }
    }

    pub fn set_context(&mut self, context: PlayerContext, now: Instant) {
        if self.context != context {
            self.context = context;
            self.context_since = now;
            self.stall_since = None;
        }
    }

    /// Samples the current playhead. `paused`/`seeking`/`ended` and
    /// buffered-region context determine candidacy, then confirmation
    /// requires 3 consecutive candidates (>=250ms) and >=2 of the last 3
    /// checks being stalls (spec.md §4.6).
    pub fn sample(
        &mut self,
        now: Instant,
        position: f64,
        paused: bool,
        seeking: bool,
        ended: bool,
        position_is_buffered: bool,
        download_covers_position: bool,
    ) -> bool {
        let past_grace = now.duration_since(self.context_since) >= self.context.grace_period(&self.config);
        let moved = match self.last_position {
            Some((_, last_pos)) => (position - last_pos).abs() >= 0.01,
            None => true,
        };
        self.last_position = Some((now, position));

        let is_candidate = !paused
            && !seeking
            && !ended
            && past_grace
            && !moved
            && !(!position_is_buffered && download_covers_position);

        if is_candidate {
            if self.stall_since.is_none() {
                self.stall_since = Some(now);
            }
        } else {
            self.stall_since = None;
        }

        self.recent_checks.push(is_candidate);
        if self.recent_checks.len() > 3 {
            self.recent_checks.remove(0);
        }

        let duration_ok = self
            .stall_since
            .map(|since| now.duration_since(since) >= self.config.stall_threshold)
            .unwrap_or(false);
        let consecutive_ok = self.recent_checks.len() as u32 >= self.config.consecutive_checks_threshold
            && self.recent_checks.iter().rev().take(3).all(|&c| c);
        let majority_ok = self.recent_checks.iter().filter(|&&c| c).count() >= 2;

        duration_ok && consecutive_ok && majority_ok
    }
}

/// Every 100 ms, jumps across small gaps or confirmed stalls (spec.md §4.6).
pub struct GapHandler {
    config: StallConfig,
    last_jump_position: Option<f64>,
    last_seek_at: Option<Instant>,
}

impl GapHandler {
    pub fn new(config: StallConfig) -> Self {
        Self {
            config,
            last_jump_position: None,
            last_seek_at: None,
        }
    }

    pub fn note_seek(&mut self, now: Instant) {
        self.last_seek_at = Some(now);
    }

    /// Returns a position to seek to, if a jump is warranted.
    pub fn check(
        &mut self,
        now: Instant,
        current_time: f64,
        future_ranges: &[BufferedRange],
        gap_handling_active: bool,
        seeking: bool,
        paused: bool,
        quality_switching: bool,
        stall_confirmed: bool,
        stream_end: f64,
    ) -> Option<f64> {
        if !gap_handling_active || seeking || paused || quality_switching {
            return None;
        }
        if let Some(last_seek) = self.last_seek_at {
            if now.duration_since(last_seek) < self.config.min_seek_gap {
                return None;
            }
        }

        let mut sorted: Vec<&BufferedRange> = future_ranges.iter().filter(|r| r.end > current_time).collect();
        sorted.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());
        let next_range = sorted.first();
        let currently_buffered = sorted.first().map_or(false, |r| r.start <= current_time);

        if let Some(range) = next_range {
            let gap = range.start - current_time;
            if gap > 0.0 && gap <= self.config.gap_jump_tolerance {
                return self.commit_jump(range.start);
            }
        }

        if !stall_confirmed {
            return None;
        }

        if let Some(range) = next_range {
            let gap = range.start - current_time;
            if gap > 0.0 && gap <= 2.0 * self.config.gap_jump_tolerance {
                return self.commit_jump(range.start);
            }
        }
        if currently_buffered {
            return self.commit_jump(current_time + 0.1);
        }
        if stream_end - current_time <= 1.5 {
            return self.commit_jump(stream_end);
        }
        None
    }

    fn commit_jump(&mut self, position: f64) -> Option<f64> {
        if self.last_jump_position == Some(position) {
            return None;
        }
        self.last_jump_position = Some(position);
        Some(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_small_gap_jumps_across_immediately() {
        let mut handler = GapHandler::new(StallConfig::default());
        let now = Instant::now();
        let ranges = vec![
            BufferedRange { start: 5.0, end: 30.0 },
            BufferedRange { start: 30.5, end: 60.0 },
        ];
        let jump = handler.check(now, 30.2, &ranges, true, false, false, false, false, 600.0);
        assert_eq!(jump, Some(30.5));
    }

    #[test]
    fn confirmed_stall_with_no_next_range_jumps_to_stream_end_near_boundary() {
        let mut handler = GapHandler::new(StallConfig::default());
        let now = Instant::now();
        let ranges = vec![BufferedRange { start: 0.0, end: 598.9 }];
        let jump = handler.check(now, 598.9, &ranges, true, false, false, false, true, 600.0);
        assert_eq!(jump, Some(600.0));
    }

    #[test]
    fn does_not_re_jump_to_the_same_position() {
        let mut handler = GapHandler::new(StallConfig::default());
        let now = Instant::now();
        let ranges = vec![
            BufferedRange { start: 5.0, end: 30.0 },
            BufferedRange { start: 30.5, end: 60.0 },
        ];
        let first = handler.check(now, 30.2, &ranges, true, false, false, false, false, 600.0);
        assert_eq!(first, Some(30.5));
        let second = handler.check(now, 30.2, &ranges, true, false, false, false, false, 600.0);
        assert_eq!(second, None);
    }

    #[test]
    fn stall_requires_three_consecutive_candidates_past_grace() {
        let now = Instant::now();
        let mut detector = StallDetector::new(StallConfig::default(), now);
        detector.set_context(PlayerContext::Normal, now); // zero grace period
        let mut confirmed = false;
        for i in 0..5u32 {
            let t = now + Duration::from_millis(100 * (i as u64 + 1));
            confirmed = detector.sample(t, 10.0, false, false, false, true, false);
        }
        assert!(confirmed);
    }
}
