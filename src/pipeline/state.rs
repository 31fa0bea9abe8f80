//! Lifecycle and cross-stage state
//!
//! Three pieces of state live here:
//! - [`PipelineState`]: the coordinator lifecycle with validated transitions
//! - [`SharedState`]: lock-free flags every stage polls at loop boundaries
//! - [`PipelineConfig`]: conversion settings a display driver may override

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::media::{DitherMode, ScaleAlgorithm};

/// Where a [`PlayerCore`](super::PlayerCore) is in its life
///
/// ```text
/// Idle -> Initializing -> Ready -> Running -> Stopping -> Stopped
///              \------------\----------------^
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// Source, decoder, display and converter are being set up
    Initializing,
    /// Every stage is built, no worker spawned
    Ready,
    Running { since: Instant },
    /// Queues shut down, workers being joined
    Stopping,
    /// Terminal: queue shutdown cannot be undone
    Stopped,
}

impl PipelineState {
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        if self == target {
            return true;
        }
        matches!(
            (self, target),
            (Idle, Initializing)
                | (Initializing, Ready | Stopping)
                | (Ready, Running { .. } | Stopping)
                | (Running { .. }, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Running { .. } => "Running",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Time spent running, `None` outside [`Running`](Self::Running)
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Self::Running { since } => Some(since.elapsed()),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Playback flags shared by all stages
///
/// Only `running`, `eof` and `frame_changed` are driven by the pipeline today;
/// the rest are carried for a control surface to set.
#[derive(Debug)]
pub struct SharedState {
    running: AtomicBool,
    paused: AtomicBool,
    seeking: AtomicBool,
    /// f64 bits
    speed: AtomicU64,
    eof: AtomicBool,
    /// Negative when no seek is pending
    seek_target: AtomicI64,
    frame_changed: AtomicBool,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            seeking: AtomicBool::new(false),
            speed: AtomicU64::new(1.0f64.to_bits()),
            eof: AtomicBool::new(false),
            seek_target: AtomicI64::new(-1),
            frame_changed: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_seeking(&self) -> bool {
        self.seeking.load(Ordering::Relaxed)
    }

    pub fn set_seeking(&self, seeking: bool) {
        self.seeking.store(seeking, Ordering::Relaxed);
    }

    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed.load(Ordering::Relaxed))
    }

    pub fn set_speed(&self, speed: f64) {
        self.speed.store(speed.to_bits(), Ordering::Relaxed);
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    pub fn set_eof(&self, eof: bool) {
        self.eof.store(eof, Ordering::Release);
    }

    pub fn seek_target(&self) -> Option<i64> {
        let target = self.seek_target.load(Ordering::Relaxed);
        (target >= 0).then_some(target)
    }

    pub fn set_seek_target(&self, target: Option<i64>) {
        self.seek_target
            .store(target.filter(|t| *t >= 0).unwrap_or(-1), Ordering::Relaxed);
    }

    /// Raised by the display stage every time a new frame reaches the panel
    pub fn mark_frame_changed(&self) {
        self.frame_changed.store(true, Ordering::Release);
    }

    /// Read and clear the frame-changed notification
    pub fn take_frame_changed(&self) -> bool {
        self.frame_changed.swap(false, Ordering::AcqRel)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Conversion settings read by the convert stage when it initializes
///
/// Display drivers override the defaults from their `init`, which always runs
/// before the converter is built.
#[derive(Debug)]
pub struct PipelineConfig {
    algorithm: AtomicU8,
    dither: AtomicU8,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self {
            algorithm: AtomicU8::new(ScaleAlgorithm::Bicubic as u8),
            dither: AtomicU8::new(DitherMode::Bayer as u8),
        }
    }

    pub fn algorithm(&self) -> ScaleAlgorithm {
        ScaleAlgorithm::from_u8(self.algorithm.load(Ordering::Acquire))
    }

    pub fn set_algorithm(&self, algorithm: ScaleAlgorithm) {
        self.algorithm.store(algorithm as u8, Ordering::Release);
    }

    pub fn dither(&self) -> DitherMode {
        DitherMode::from_u8(self.dither.load(Ordering::Acquire))
    }

    pub fn set_dither(&self, dither: DitherMode) {
        self.dither.store(dither as u8, Ordering::Release);
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}
