//! Configuration surface for the ABR core.
//!
//! One `Config` aggregates per-component sub-configs, following the
//! `HlsConfig` composition-of-sub-configs style: each sub-config carries its
//! own `Default` impl with the literal defaults from spec.md §6.

use std::time::Duration;

/// Strategy the [`crate::quality::QualitySelector`] uses before any samples
/// or buffer history exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupStrategy {
    #[default]
    Bandwidth,
    Buffer,
}

#[derive(Debug, Clone)]
pub struct BandwidthConfig {
    /// Samples smaller than this are discarded (first-byte latency dominates).
    pub min_sample_bytes: u64,
    /// Below this much total sampled bytes, fall back to the network hint / default.
    pub min_total_bytes: u64,
    /// Used when no network hint is present and insufficient samples exist.
    pub default_estimate_bps: f64,
    pub fast_half_life: Duration,
    pub slow_half_life: Duration,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            min_sample_bytes: 16 * 1024,
            min_total_bytes: 128 * 1024,
            default_estimate_bps: 3_000_000.0,
            fast_half_life: Duration::from_secs(2),
            slow_half_life: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BolaConfig {
    /// Minimum buffer per extra representation level, seconds (`K` in spec.md §4.2).
    pub min_buffer_per_level: f64,
    /// Safety factor applied to bandwidth estimates during STARTUP and the
    /// oscillation guard's throughput-sustainable check.
    pub startup_safety_factor: f64,
    /// Hysteresis multiplier applied to up-switch candidates.
    pub up_switch_bias: f64,
    /// Hysteresis multiplier applied to down-switch candidates.
    pub down_switch_bias: f64,
}

impl Default for BolaConfig {
    fn default() -> Self {
        Self {
            min_buffer_per_level: 2.0,
            startup_safety_factor: 0.9,
            up_switch_bias: 1.2,
            down_switch_bias: 0.95,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualitySelectorConfig {
    pub min_buffer_level: f64,
    pub switch_cooldown: Duration,
    pub startup_strategy: StartupStrategy,
    pub allow_smoothing: bool,
    pub smoothing_enable_delay: Duration,
    pub smoothing_factor: f64,
    /// Frame-sample threshold before the dropped-frames strategy evaluates.
    pub dropped_frames_sample_threshold: u64,
    /// Drop ratio above which an emergency downgrade is triggered.
    pub dropped_frames_high_watermark: f64,
    /// Drop ratio below which the dropped-frame counters reset.
    pub dropped_frames_low_watermark: f64,
    /// Maximum emergency downgrades allowed within the trailing window.
    pub dropped_frames_max_downgrades: u32,
    pub dropped_frames_window: Duration,
    /// History length for oscillation-pattern detection (A,B,A,B).
    pub history_capacity: usize,
}

impl Default for QualitySelectorConfig {
    fn default() -> Self {
        Self {
            min_buffer_level: 10.0,
            switch_cooldown: Duration::from_secs(5),
            startup_strategy: StartupStrategy::Bandwidth,
            allow_smoothing: true,
            smoothing_enable_delay: Duration::from_secs(5),
            smoothing_factor: 0.5,
            dropped_frames_sample_threshold: 375,
            dropped_frames_high_watermark: 0.15,
            dropped_frames_low_watermark: 0.075,
            dropped_frames_max_downgrades: 2,
            dropped_frames_window: Duration::from_secs(10),
            history_capacity: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrent_downloads: usize,
    pub fast_switching_enabled: bool,
    /// EDF safety threshold, in units of segment duration (spec.md §4.4.5).
    pub replacement_safety_factor: f64,
    pub quota_exceeded_correction_factor: f64,
    pub max_allowed_overrun: Duration,
    pub segment_timeout: Duration,
    /// Fraction of `segment_timeout` past which a failure blacklists the segment number.
    pub blacklist_timeout_fraction: f64,
    pub buffer_behind: f64,
    pub buffering_target: f64,
    pub max_buffer_level: f64,
    pub pruning_interval: Duration,
    /// Safety margin subtracted from remaining buffer space before admitting
    /// a new (non-replacement) download, seconds.
    pub download_safety_margin: f64,
    /// Quota recovery retry count/interval waiting for sink idle.
    pub quota_idle_retries: u32,
    pub quota_idle_retry_interval: Duration,
    pub quota_quiescence: Duration,
    pub quota_floor: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            fast_switching_enabled: true,
            replacement_safety_factor: 1.5,
            quota_exceeded_correction_factor: 0.8,
            max_allowed_overrun: Duration::from_secs(4),
            segment_timeout: Duration::from_millis(10_000),
            blacklist_timeout_fraction: 0.8,
            buffer_behind: 5.0,
            buffering_target: 60.0,
            max_buffer_level: 90.0,
            pruning_interval: Duration::from_secs(5),
            download_safety_margin: 2.0,
            quota_idle_retries: 10,
            quota_idle_retry_interval: Duration::from_millis(100),
            quota_quiescence: Duration::from_secs(2),
            quota_floor: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub initial_delay: Duration,
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub slowdown_threshold: f64,
    pub preload_target: f64,
    pub critical_buffer_level: f64,
    pub quality_check_interval: Duration,
    /// Smoothing weight applied to the new target interval each tick.
    pub interval_smoothing: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            base_interval: Duration::from_millis(500),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(2000),
            slowdown_threshold: 0.8,
            preload_target: 20.0,
            critical_buffer_level: 5.0,
            quality_check_interval: Duration::from_secs(1),
            interval_smoothing: 0.3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StallConfig {
    pub stall_threshold: Duration,
    pub consecutive_checks_threshold: u32,
    pub gap_jump_tolerance: f64,
    pub sample_interval: Duration,
    pub grace_startup: Duration,
    pub grace_seeking: Duration,
    pub grace_quality_switching: Duration,
    pub grace_normal: Duration,
    pub grace_buffering: Duration,
    pub min_seek_gap: Duration,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            stall_threshold: Duration::from_millis(250),
            consecutive_checks_threshold: 3,
            gap_jump_tolerance: 0.3,
            sample_interval: Duration::from_millis(100),
            grace_startup: Duration::from_millis(2000),
            grace_seeking: Duration::from_millis(2000),
            grace_quality_switching: Duration::from_millis(1500),
            grace_normal: Duration::from_millis(0),
            grace_buffering: Duration::from_millis(3000),
            min_seek_gap: Duration::from_secs(2),
        }
    }
}

/// Aggregated configuration for the whole ABR core.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub bandwidth: BandwidthConfig,
    pub bola: BolaConfig,
    pub quality_selector: QualitySelectorConfig,
    pub pipeline: PipelineConfig,
    pub scheduler: SchedulerConfig,
    pub stall: StallConfig,
}
