//! BandwidthEstimator (spec.md §4.1).
//!
//! Two EWMAs (fast/slow half-life) over (duration, bytes) samples, reported
//! as `min(fast, slow)` once enough data has accumulated — an asymmetric
//! design that adapts down quickly and up slowly.

use std::time::Duration;

use crate::config::BandwidthConfig;

/// Single exponentially-weighted moving average with zero-bias correction,
/// as described in spec.md §4.1.
#[derive(Debug, Clone)]
struct Ewma {
    alpha: f64,
    estimate: f64,
    total_weight: f64,
}

impl Ewma {
    fn new(half_life: Duration) -> Self {
        let half_life_s = half_life.as_secs_f64();
        let alpha = (std::f64::consts::LN_2 * -1.0 / half_life_s).exp();
        Self {
            alpha,
            estimate: 0.0,
            total_weight: 0.0,
        }
    }

    fn sample(&mut self, weight: f64, observation_bps: f64) {
        let decay = self.alpha.powf(weight);
        self.estimate = observation_bps * (1.0 - decay) + decay * self.estimate;
        self.total_weight += weight;
    }

    /// `None` until any weight has accrued (avoids dividing by zero).
    fn value(&self) -> Option<f64> {
        if self.total_weight <= 0.0 {
            return None;
        }
        let correction = 1.0 - self.alpha.powf(self.total_weight);
        if correction <= 0.0 {
            None
        } else {
            Some(self.estimate / correction)
        }
    }

    fn reset(&mut self) {
        self.estimate = 0.0;
        self.total_weight = 0.0;
    }
}

/// Dual-EWMA bandwidth estimator.
#[derive(Debug)]
pub struct BandwidthEstimator {
    config: BandwidthConfig,
    fast: Ewma,
    slow: Ewma,
    sample_count: u64,
    total_bytes: u64,
    /// Hint from the playback engine's network-information API, if any.
    network_hint_bps: Option<f64>,
}

impl BandwidthEstimator {
    pub fn new(config: BandwidthConfig) -> Self {
        let fast = Ewma::new(config.fast_half_life);
        let slow = Ewma::new(config.slow_half_life);
        Self {
            config,
            fast,
            slow,
            sample_count: 0,
            total_bytes: 0,
            network_hint_bps: None,
        }
    }

    pub fn set_network_hint(&mut self, hint_bps: Option<f64>) {
        self.network_hint_bps = hint_bps;
    }

    /// Feeds one (duration, bytes) observation. Fails silently (per the
    /// spec contract) on non-finite/non-positive input or samples too
    /// small to be meaningful (invariant: tested explicitly, spec.md §8
    /// property 6).
    pub fn sample(&mut self, duration_ms: u64, bytes: u64) {
        if duration_ms == 0 || bytes == 0 {
            return;
        }
        if bytes < self.config.min_sample_bytes {
            tracing::trace!(bytes, "bandwidth sample discarded: below MIN_BYTES");
            return;
        }
        let weight = duration_ms as f64 / 1000.0;
        let observation_bps = 8000.0 * bytes as f64 / duration_ms as f64;
        if !observation_bps.is_finite() {
            return;
        }
        self.fast.sample(weight, observation_bps);
        self.slow.sample(weight, observation_bps);
        self.sample_count += 1;
        self.total_bytes += bytes;
        tracing::debug!(observation_bps, weight, "bandwidth sample recorded");
    }

    /// Current bandwidth estimate, bits/s.
    pub fn estimate(&self) -> f64 {
        if self.total_bytes < self.config.min_total_bytes {
            return self.blended_fallback();
        }
        match (self.fast.value(), self.slow.value()) {
            (Some(fast), Some(slow)) => fast.min(slow),
            _ => self.blended_fallback(),
        }
    }

    fn blended_fallback(&self) -> f64 {
        let default = self
            .network_hint_bps
            .unwrap_or(self.config.default_estimate_bps);
        match self.network_hint_bps {
            Some(hint) => {
                let weight = (0.1_f64).max((-(self.sample_count as f64) / 5.0).exp());
                let measured = self
                    .fast
                    .value()
                    .zip(self.slow.value())
                    .map(|(f, s)| f.min(s))
                    .unwrap_or(default);
                weight * hint + (1.0 - weight) * measured
            }
            None => default,
        }
    }

    /// Zeroes sample count and accumulated bytes; both EWMAs keep their
    /// alpha but zero their accrued state. Triggered on a "significant
    /// network change" event (spec.md §4.1).
    pub fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.sample_count = 0;
        self.total_bytes = 0;
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_below_min_bytes_do_not_change_state() {
        let mut estimator = BandwidthEstimator::new(BandwidthConfig::default());
        let before = estimator.estimate();
        estimator.sample(1000, 100); // well under 16 KiB
        assert_eq!(estimator.sample_count(), 0);
        assert_eq!(estimator.estimate(), before);
    }

    #[test]
    fn falls_back_to_default_before_min_total_bytes() {
        let estimator = BandwidthEstimator::new(BandwidthConfig::default());
        assert_eq!(estimator.estimate(), 3_000_000.0);
    }

    #[test]
    fn converges_toward_a_stable_rate_after_enough_samples() {
        let mut estimator = BandwidthEstimator::new(BandwidthConfig::default());
        // 5 Mbps over 200 KiB chunks, several samples to clear MIN_TOTAL_BYTES.
        for _ in 0..10 {
            // 200 KiB in (8*200*1024*1000)/(5_000_000) ms at 5 Mbps.
            let bytes = 200 * 1024u64;
            let duration_ms = (8 * bytes * 1000) / 5_000_000;
            estimator.sample(duration_ms, bytes);
        }
        let estimate = estimator.estimate();
        assert!(
            (estimate - 5_000_000.0).abs() / 5_000_000.0 < 0.2,
            "estimate {estimate} not within 20% of 5 Mbps"
        );
    }

    #[test]
    fn reset_clears_accumulated_state_but_keeps_alphas() {
        let mut estimator = BandwidthEstimator::new(BandwidthConfig::default());
        estimator.sample(1000, 200 * 1024);
        assert!(estimator.sample_count() > 0);
        estimator.reset();
        assert_eq!(estimator.sample_count(), 0);
        assert_eq!(estimator.estimate(), 3_000_000.0);
    }

    #[test]
    fn network_hint_dominates_before_samples_accrue() {
        let mut estimator = BandwidthEstimator::new(BandwidthConfig::default());
        estimator.set_network_hint(Some(10_000_000.0));
        let estimate = estimator.estimate();
        assert!((estimate - 10_000_000.0).abs() < 1.0);
    }
}
