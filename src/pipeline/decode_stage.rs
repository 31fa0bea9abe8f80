//! Decode stage: compressed video units in, raw frames out
//!
//! The decoder is opened during initialization, preferring a hardware decoder
//! for the stream's codec and falling back to the engine's software decoder.
//! On exit (end of stream or stop) the decoder is flushed and every buffered
//! frame is drained before the output queue is shut down. The input queue is
//! shut down as well so the router notices when decoding ends early.

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use std::sync::Arc;

use super::error::PipelineError;
use super::queue::{FrameQueue, PacketQueue};
use super::stage::{PipelineStage, StageContext};
use super::types::{Frame, Packet, StreamInfo};
use crate::media::{DecodeError, DecoderLookup, MediaEngine, VideoDecode, hardware_decoder_name};

/// Decoder worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    Opened,
    Running,
    Draining,
    Stopped,
}

/// Presentation timestamp for a decoded frame
///
/// The frame's own timestamp wins, then the decoder's best-effort guess, then
/// the timestamp of the unit that produced it.
pub fn resolve_pts(frame: &Frame, unit: Option<&Packet>) -> Option<i64> {
    frame
        .pts
        .or(frame.best_effort_pts)
        .or_else(|| unit.and_then(|u| u.pts))
}

/// Locate a decoder for `stream`, hardware first
pub fn open_decoder(
    engine: &dyn MediaEngine,
    stream: &StreamInfo,
) -> Result<Box<dyn VideoDecode>, PipelineError> {
    if let Some(name) = hardware_decoder_name(&stream.codec) {
        match engine.open_decoder(stream, DecoderLookup::ByName(name)) {
            Ok(decoder) => {
                info!("DecodeStage: using hardware decoder {}", name);
                return Ok(decoder);
            }
            Err(e) => debug!("DecodeStage: hardware decoder {} unavailable: {}", name, e),
        }
    }

    let decoder = engine
        .open_decoder(stream, DecoderLookup::ByCodec)
        .map_err(|e| PipelineError::init("video decoder", e))?;
    info!("DecodeStage: using software decoder {}", decoder.name());
    Ok(decoder)
}

/// Decode stage: turns video units into raw frames
pub struct DecodeStage {
    decoder: Option<Box<dyn VideoDecode>>,
    input: Arc<PacketQueue>,
    output: Arc<FrameQueue>,
    ctx: StageContext,
    state: DecoderState,
}

impl DecodeStage {
    pub fn new(input: Arc<PacketQueue>, output: Arc<FrameQueue>, ctx: StageContext) -> Self {
        Self {
            decoder: None,
            input,
            output,
            ctx,
            state: DecoderState::Idle,
        }
    }

    /// Open the decoder and publish the source geometry
    pub fn open(&mut self, engine: &dyn MediaEngine, stream: &StreamInfo) -> Result<(), PipelineError> {
        let decoder = open_decoder(engine, stream)?;
        let geometry = decoder.geometry();
        info!(
            "DecodeStage: stream {} {} {}x{} {} (sar {})",
            stream.index, stream.codec, geometry.width, geometry.height, geometry.format, geometry.sar
        );
        self.ctx
            .geometry
            .source
            .publish(geometry)
            .map_err(|e| PipelineError::init("video decoder", e))?;
        self.decoder = Some(decoder);
        self.state = DecoderState::Opened;
        Ok(())
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Take every frame the decoder has ready; false once the output is closed
    fn drain(&self, decoder: &mut dyn VideoDecode, unit: Option<&Packet>) -> bool {
        loop {
            match decoder.take() {
                Ok(Some(mut frame)) => {
                    frame.pts = resolve_pts(&frame, unit);
                    self.ctx.health.record_frame_decoded();
                    if self.output.push(frame).is_err() {
                        return false;
                    }
                }
                Ok(None) | Err(DecodeError::Again) => return true,
                Err(DecodeError::Failed(e)) => {
                    warn!("DecodeStage: failed to receive frame: {}", e);
                    self.ctx.health.record_decode_failure();
                    return true;
                }
            }
        }
    }

    /// Feed one unit and drain its frames; false once the output is closed
    fn decode_unit(&self, decoder: &mut dyn VideoDecode, unit: &Packet) -> bool {
        let mut sent = decoder.push(unit);
        if sent == Err(DecodeError::Again) {
            if !self.drain(decoder, Some(unit)) {
                return false;
            }
            sent = decoder.push(unit);
        }
        if let Err(e) = sent {
            warn!("DecodeStage: failed to send unit (pts={:?}): {}", unit.pts, e);
            self.ctx.health.record_decode_failure();
            return true;
        }
        self.drain(decoder, Some(unit))
    }
}

impl PipelineStage for DecodeStage {
    fn run(&mut self) -> Result<()> {
        let mut decoder = self
            .decoder
            .take()
            .ok_or_else(|| anyhow!("DecodeStage: decoder not opened"))?;

        let mut units = 0u64;
        self.state = DecoderState::Running;
        info!("DecodeStage: started");

        let mut output_open = true;
        while self.ctx.state.is_running() {
            let Some(unit) = self.input.pop() else {
                break;
            };
            units += 1;
            if !self.decode_unit(decoder.as_mut(), &unit) {
                output_open = false;
                break;
            }
        }

        self.state = DecoderState::Draining;
        if let Err(e) = decoder.flush() {
            warn!("DecodeStage: flush failed: {}", e);
        }
        if output_open {
            self.drain(decoder.as_mut(), None);
        }
        self.output.shutdown();
        // upstream sees a closed queue if we stopped early
        self.input.shutdown();
        self.state = DecoderState::Stopped;

        info!(
            "DecodeStage: finished ({} units, {} decoded frames, {} failures)",
            units,
            self.ctx.health.frames_decoded(),
            self.ctx.health.decode_failures()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DecodeStage"
    }
}
