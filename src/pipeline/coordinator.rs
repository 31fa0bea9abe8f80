//! Player coordinator
//!
//! Owns the queues and the stages of one playback session. Initialization is
//! an ordered chain, each step depending on what the previous one published:
//!
//! 1. open the source
//! 2. select streams
//! 3. open the video decoder (publishes the source geometry)
//! 4. initialize the display (reads the source geometry, publishes the destination)
//! 5. build the converter (reads both geometries)
//!
//! Stopping shuts every queue down before the workers are joined, since a
//! worker parked in a queue wait never observes the running flag.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::mem;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::convert_stage::ConvertStage;
use super::decode_stage::DecodeStage;
use super::display_stage::DisplayStage;
use super::error::PipelineError;
use super::health::PipelineHealth;
use super::queue::{BoundedQueue, FrameQueue, PacketQueue};
use super::router_stage::{Router, RouterStage, select_streams};
use super::stage::{PipelineStage, StageContext, StageHandle, spawn_stage};
use super::state::{PipelineState, SharedState};
use crate::display::{AreaRequest, DisplayDevice, Orientation};
use crate::media::MediaEngine;

pub const PACKET_QUEUE_CAPACITY: usize = 30;
pub const FRAME_QUEUE_CAPACITY: usize = 30;

/// Every queue between the stages
#[derive(Clone)]
pub struct PipelineQueues {
    pub video_packets: Arc<PacketQueue>,
    /// Filled by the router, never consumed
    pub audio_packets: Arc<PacketQueue>,
    pub decoded_frames: Arc<FrameQueue>,
    pub display_frames: Arc<FrameQueue>,
}

impl PipelineQueues {
    pub fn new() -> Self {
        Self {
            video_packets: Arc::new(BoundedQueue::new(PACKET_QUEUE_CAPACITY)),
            audio_packets: Arc::new(BoundedQueue::new(PACKET_QUEUE_CAPACITY)),
            decoded_frames: Arc::new(BoundedQueue::new(FRAME_QUEUE_CAPACITY)),
            display_frames: Arc::new(BoundedQueue::new(FRAME_QUEUE_CAPACITY)),
        }
    }

    /// Discard everything queued, returning how many items were dropped
    pub fn flush_all(&self) -> usize {
        self.video_packets.flush()
            + self.audio_packets.flush()
            + self.decoded_frames.flush()
            + self.display_frames.flush()
    }

    pub fn shutdown_all(&self) {
        self.video_packets.shutdown();
        self.audio_packets.shutdown();
        self.decoded_frames.shutdown();
        self.display_frames.shutdown();
    }
}

impl Default for PipelineQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle that stops a running player from any thread
#[derive(Clone)]
pub struct StopHandle {
    state: Arc<SharedState>,
    queues: PipelineQueues,
}

impl StopHandle {
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Clear the running flag and wake every worker
    pub fn stop(&self) {
        if self.state.is_running() {
            info!("PlayerCore: stop requested");
        }
        self.state.set_running(false);
        self.queues.shutdown_all();
    }
}

/// One playback session: router, decode, convert and display workers
pub struct PlayerCore {
    ctx: StageContext,
    lifecycle: RwLock<PipelineState>,
    queues: PipelineQueues,
    stages: Vec<Box<dyn PipelineStage>>,
    handles: Vec<StageHandle>,
}

impl PlayerCore {
    pub fn new() -> Self {
        Self {
            ctx: StageContext::new(),
            lifecycle: RwLock::new(PipelineState::Idle),
            queues: PipelineQueues::new(),
            stages: Vec::new(),
            handles: Vec::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.lifecycle.read()
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        self.ctx.health.clone()
    }

    pub fn queues(&self) -> &PipelineQueues {
        &self.queues
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            state: self.ctx.state.clone(),
            queues: self.queues.clone(),
        }
    }

    fn transition(&self, next: PipelineState) -> Result<(), PipelineError> {
        let mut current = self.lifecycle.write();
        if !current.can_transition_to(&next) {
            return Err(PipelineError::InvalidState {
                from: current.name(),
                to: next.name(),
            });
        }
        debug!("PlayerCore: {} -> {}", *current, next);
        *current = next;
        Ok(())
    }

    /// Open `path` and set up every stage for `device`
    ///
    /// On failure the player ends up stopped and the error names the stage
    /// that could not be initialized.
    pub fn init(
        &mut self,
        engine: &dyn MediaEngine,
        device: Box<dyn DisplayDevice>,
        path: &Path,
        orientation: Orientation,
        request: &AreaRequest,
    ) -> Result<(), PipelineError> {
        self.transition(PipelineState::Initializing)?;

        match self.build_stages(engine, device, path, orientation, request) {
            Ok(stages) => {
                self.stages = stages;
                self.transition(PipelineState::Ready)?;
                info!("PlayerCore: ready to play {}", path.display());
                Ok(())
            }
            Err(e) => {
                error!("PlayerCore: {}", e);
                self.transition(PipelineState::Stopping)?;
                self.finish();
                Err(e)
            }
        }
    }

    fn build_stages(
        &self,
        engine: &dyn MediaEngine,
        device: Box<dyn DisplayDevice>,
        path: &Path,
        orientation: Orientation,
        request: &AreaRequest,
    ) -> Result<Vec<Box<dyn PipelineStage>>, PipelineError> {
        let source = engine
            .open(path)
            .map_err(|e| PipelineError::init("source", e))?;

        let selection =
            select_streams(source.streams()).map_err(|e| PipelineError::init("stream selection", e))?;
        info!(
            "PlayerCore: selected streams video={:?} audio={:?} subtitle={:?}",
            selection.video, selection.audio, selection.subtitle
        );
        let stream = selection
            .video
            .and_then(|index| source.streams().iter().find(|s| s.index == index))
            .cloned()
            .ok_or_else(|| PipelineError::init("stream selection", "no video stream to play"))?;

        let queues = &self.queues;
        let mut decode = DecodeStage::new(
            queues.video_packets.clone(),
            queues.decoded_frames.clone(),
            self.ctx.clone(),
        );
        decode.open(engine, &stream)?;

        let mut display = DisplayStage::new(device, queues.display_frames.clone(), self.ctx.clone());
        display.init(orientation, request)?;

        let mut convert = ConvertStage::new(
            queues.decoded_frames.clone(),
            queues.display_frames.clone(),
            self.ctx.clone(),
        );
        convert.init(engine)?;

        let router = Router::new(
            selection,
            queues.video_packets.clone(),
            queues.audio_packets.clone(),
            self.ctx.clone(),
        );
        Ok(vec![
            Box::new(RouterStage::new(source, router, self.ctx.clone())),
            Box::new(decode),
            Box::new(convert),
            Box::new(display),
        ])
    }

    /// Spawn one worker per stage
    pub fn start(&mut self) -> Result<()> {
        self.transition(PipelineState::Running {
            since: Instant::now(),
        })?;

        let dropped = self.queues.flush_all();
        if dropped > 0 {
            debug!("PlayerCore: flushed {} stale items", dropped);
        }
        self.ctx.state.set_eof(false);
        self.ctx.state.set_running(true);

        for stage in mem::take(&mut self.stages) {
            let name = stage.name();
            match spawn_stage(stage) {
                Ok(handle) => self.handles.push(handle),
                Err(e) => {
                    self.stop();
                    return Err(e).with_context(|| format!("failed to spawn {name}"));
                }
            }
        }
        info!("PlayerCore: started {} workers", self.handles.len());
        Ok(())
    }

    /// Block until every worker has finished
    ///
    /// Worker errors are logged; the first failure stops the remaining workers.
    pub fn wait(&mut self) -> Result<()> {
        if !self.state().is_running() {
            return Err(PipelineError::InvalidState {
                from: self.state().name(),
                to: PipelineState::Stopped.name(),
            }
            .into());
        }

        self.join_workers();
        self.ctx.state.set_running(false);
        if let Some(elapsed) = self.state().elapsed() {
            info!("PlayerCore: played for {:.1?}", elapsed);
        }
        self.transition(PipelineState::Stopping)?;
        self.finish();
        Ok(())
    }

    /// Start and block until playback ends or is stopped
    pub fn play(&mut self) -> Result<()> {
        self.start()?;
        self.wait()
    }

    /// Stop the workers and tear the pipeline down
    pub fn stop(&mut self) {
        match self.state() {
            PipelineState::Idle | PipelineState::Stopped => return,
            _ => {}
        }

        self.stop_handle().stop();
        if let Err(e) = self.transition(PipelineState::Stopping) {
            warn!("PlayerCore: {}", e);
        }
        self.join_workers();
        self.finish();
    }

    fn join_workers(&mut self) {
        for handle in mem::take(&mut self.handles) {
            let name = handle.name();
            if let Err(e) = handle.join() {
                error!("PlayerCore: {} failed: {:#}", name, e);
                self.stop_handle().stop();
            }
        }
    }

    fn finish(&mut self) {
        self.stages.clear();
        self.queues.flush_all();
        self.queues.shutdown_all();
        self.ctx.state.set_running(false);

        info!("PlayerCore: {}", self.ctx.health.summary());
        if let Err(e) = self.transition(PipelineState::Stopped) {
            warn!("PlayerCore: {}", e);
        }
    }
}

impl Default for PlayerCore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlayerCore {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::testing::RecordingDevice;
    use crate::media::testing::FakeEngine;
    use crate::pipeline::types::{Packet, StreamInfo};
    use std::thread;
    use std::time::Duration;

    fn streams() -> Vec<StreamInfo> {
        vec![
            StreamInfo::video(0, "h264", 320, 240),
            StreamInfo::audio(1, "aac", 48_000),
        ]
    }

    fn units(count: i64) -> Vec<Packet> {
        let mut units = Vec::new();
        for pts in 1..=count {
            units.push(
                Packet::new(0, vec![0x80u8; 8])
                    .with_pts(pts)
                    .with_key(pts % 10 == 1),
            );
            units.push(Packet::new(1, vec![0u8; 4]).with_pts(pts));
        }
        units
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn init(core: &mut PlayerCore, engine: &FakeEngine, device: RecordingDevice) -> Result<(), PipelineError> {
        core.init(
            engine,
            Box::new(device),
            Path::new("clip.mp4"),
            Orientation::Landscape,
            &AreaRequest::default(),
        )
    }

    #[test]
    fn test_plays_to_end_in_order() {
        let mut engine = FakeEngine::new(streams(), units(20));
        engine.decoder_delay = 0;
        let device = RecordingDevice::new();
        let shown = device.shown.clone();

        let mut core = PlayerCore::new();
        init(&mut core, &engine, device).unwrap();
        assert_eq!(core.state(), PipelineState::Ready);
        core.play().unwrap();

        let expected: Vec<_> = (1..=20).map(Some).collect();
        assert_eq!(*shown.lock(), expected);
        assert_eq!(core.state(), PipelineState::Stopped);
        assert!(core.context().state.is_eof());
        assert!(!core.context().state.is_running());

        let health = core.health();
        assert_eq!(health.frames_displayed(), 20);
        assert_eq!(health.keyframes_routed(), 2);
        assert_eq!(health.unit_drops(), 0);
    }

    #[test]
    fn test_buffered_frames_reach_the_panel() {
        let mut engine = FakeEngine::new(streams(), units(12));
        engine.decoder_delay = 3;
        let device = RecordingDevice::new();
        let shown = device.shown.clone();

        let mut core = PlayerCore::new();
        init(&mut core, &engine, device).unwrap();
        core.play().unwrap();

        assert_eq!(shown.lock().len(), 12);
    }

    #[test]
    fn test_init_failure_names_stage() {
        let engine = FakeEngine::new(vec![StreamInfo::audio(0, "aac", 44_100)], Vec::new());
        let mut core = PlayerCore::new();
        let err = init(&mut core, &engine, RecordingDevice::new()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Init {
                stage: "stream selection",
                ..
            }
        ));
        assert_eq!(core.state(), PipelineState::Stopped);
        assert!(core.queues().video_packets.is_shutdown());

        let engine = FakeEngine::new(streams(), Vec::new());
        let mut core = PlayerCore::new();
        let err = core
            .init(
                &engine,
                Box::new(RecordingDevice::new()),
                Path::new(""),
                Orientation::Landscape,
                &AreaRequest::default(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Init { stage: "source", .. }));
    }

    #[test]
    fn test_init_order_reaches_display_after_decoder() {
        let engine = FakeEngine::new(streams(), Vec::new());
        let device = RecordingDevice::new();
        let calls = device.calls.clone();
        let mut core = PlayerCore::new();
        init(&mut core, &engine, device).unwrap();

        assert_eq!(engine.lookups.lock().as_slice(), ["h264_v4l2m2m", "h264"]);
        assert_eq!(calls.lock().last(), Some(&"negotiate_geometry"));
        assert_eq!(engine.converters_built.lock().len(), 1);
        assert!(core.context().geometry.destination.is_set());
    }

    #[test]
    fn test_stop_unblocks_endless_playback() {
        let engine = FakeEngine::new(streams(), Vec::new()).endless();
        let mut device = RecordingDevice::new();
        device.frame_delay = Duration::from_millis(5);

        let mut core = PlayerCore::new();
        init(&mut core, &engine, device).unwrap();
        core.start().unwrap();

        let health = core.health();
        wait_for(|| health.frames_displayed() > 0);

        let started = Instant::now();
        core.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(core.state(), PipelineState::Stopped);
        assert!(core.queues().display_frames.is_empty());
        assert!(core.start().is_err());
    }

    #[test]
    fn test_stop_handle_ends_play() {
        let engine = FakeEngine::new(streams(), Vec::new()).endless();
        let mut device = RecordingDevice::new();
        device.frame_delay = Duration::from_millis(2);

        let mut core = PlayerCore::new();
        init(&mut core, &engine, device).unwrap();
        let handle = core.stop_handle();
        let health = core.health();
        let stopper = thread::spawn(move || {
            wait_for(|| health.frames_displayed() >= 3);
            handle.stop();
        });

        core.play().unwrap();
        stopper.join().unwrap();
        assert_eq!(core.state(), PipelineState::Stopped);
        assert!(core.health().frames_displayed() >= 3);
    }

    #[test]
    fn test_wait_requires_start() {
        let mut core = PlayerCore::new();
        assert!(core.wait().is_err());
        core.stop();
        assert_eq!(core.state(), PipelineState::Idle);
    }

    #[test]
    fn test_queue_capacities() {
        let queues = PipelineQueues::new();
        assert_eq!(queues.video_packets.capacity(), 30);
        assert_eq!(queues.audio_packets.capacity(), 30);
        assert_eq!(queues.decoded_frames.capacity(), 30);
        assert_eq!(queues.display_frames.capacity(), 30);
    }
}
