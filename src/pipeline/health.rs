//! Health counters for the playback pipeline

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every stage of one player
pub struct PipelineHealth {
    /// Compressed units accepted by a stream queue
    pub units_routed: AtomicU64,

    /// Total bytes of compressed data routed
    pub bytes_routed: AtomicU64,

    /// Key units routed
    pub keyframes_routed: AtomicU64,

    /// Video units dropped because the queue was full
    pub unit_drops: AtomicU64,

    /// Audio units dropped because the queue was full
    pub audio_drops: AtomicU64,

    /// Units the decoder refused or failed to decode
    pub decode_failures: AtomicU64,

    pub frames_decoded: AtomicU64,

    pub frames_converted: AtomicU64,

    pub convert_failures: AtomicU64,

    /// Frames successfully written to the panel
    pub frames_displayed: AtomicU64,

    /// Panel writes that failed or were refused
    pub device_errors: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self {
            units_routed: AtomicU64::new(0),
            bytes_routed: AtomicU64::new(0),
            keyframes_routed: AtomicU64::new(0),
            unit_drops: AtomicU64::new(0),
            audio_drops: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_converted: AtomicU64::new(0),
            convert_failures: AtomicU64::new(0),
            frames_displayed: AtomicU64::new(0),
            device_errors: AtomicU64::new(0),
        }
    }

    /// Record a unit accepted by a stream queue
    pub fn record_unit(&self, size: usize, is_key: bool) {
        self.units_routed.fetch_add(1, Ordering::Relaxed);
        self.bytes_routed.fetch_add(size as u64, Ordering::Relaxed);
        if is_key {
            self.keyframes_routed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a video unit dropped on a full queue
    pub fn record_unit_drop(&self) {
        self.unit_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_drop(&self) {
        self.audio_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_converted(&self) {
        self.frames_converted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_convert_failure(&self) {
        self.convert_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_displayed(&self) {
        self.frames_displayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_device_error(&self) {
        self.device_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn units_routed(&self) -> u64 {
        self.units_routed.load(Ordering::Relaxed)
    }

    pub fn bytes_routed(&self) -> u64 {
        self.bytes_routed.load(Ordering::Relaxed)
    }

    pub fn keyframes_routed(&self) -> u64 {
        self.keyframes_routed.load(Ordering::Relaxed)
    }

    pub fn unit_drops(&self) -> u64 {
        self.unit_drops.load(Ordering::Relaxed)
    }

    pub fn audio_drops(&self) -> u64 {
        self.audio_drops.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn frames_converted(&self) -> u64 {
        self.frames_converted.load(Ordering::Relaxed)
    }

    pub fn convert_failures(&self) -> u64 {
        self.convert_failures.load(Ordering::Relaxed)
    }

    pub fn frames_displayed(&self) -> u64 {
        self.frames_displayed.load(Ordering::Relaxed)
    }

    pub fn device_errors(&self) -> u64 {
        self.device_errors.load(Ordering::Relaxed)
    }

    /// Share of video units lost to backpressure, in percent
    pub fn unit_drop_rate(&self) -> f64 {
        let drops = self.unit_drops();
        let total = drops + self.units_routed();
        if total == 0 {
            return 0.0;
        }
        (drops as f64 / total as f64) * 100.0
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            units_routed: self.units_routed(),
            bytes_routed: self.bytes_routed(),
            unit_drops: self.unit_drops(),
            audio_drops: self.audio_drops(),
            unit_drop_rate: self.unit_drop_rate(),
            decode_failures: self.decode_failures(),
            frames_decoded: self.frames_decoded(),
            frames_converted: self.frames_converted(),
            convert_failures: self.convert_failures(),
            frames_displayed: self.frames_displayed(),
            device_errors: self.device_errors(),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters, logged at teardown
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub units_routed: u64,
    pub bytes_routed: u64,
    pub unit_drops: u64,
    pub audio_drops: u64,
    pub unit_drop_rate: f64,
    pub decode_failures: u64,
    pub frames_decoded: u64,
    pub frames_converted: u64,
    pub convert_failures: u64,
    pub frames_displayed: u64,
    pub device_errors: u64,
}

impl fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Health: {} units ({} bytes, {} video drops {:.2}%, {} audio drops), {} decoded ({} failures), {} converted ({} failures), {} displayed ({} device errors)",
            self.units_routed,
            self.bytes_routed,
            self.unit_drops,
            self.unit_drop_rate,
            self.audio_drops,
            self.frames_decoded,
            self.decode_failures,
            self.frames_converted,
            self.convert_failures,
            self.frames_displayed,
            self.device_errors
        )
    }
}
