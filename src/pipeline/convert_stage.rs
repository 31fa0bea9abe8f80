//! Convert stage: scales decoded frames into the display's pixel layout

use anyhow::{Result, anyhow};
use log::{error, info, warn};
use std::sync::Arc;

use super::error::PipelineError;
use super::geometry::Geometry;
use super::queue::FrameQueue;
use super::stage::{PipelineStage, StageContext};
use super::types::Frame;
use crate::media::{FrameConvert, MediaEngine};

/// Row alignment of converted frames, in bytes
pub const FRAME_ALIGN: usize = 32;

pub struct ConvertStage {
    converter: Option<Box<dyn FrameConvert>>,
    destination: Option<Geometry>,
    input: Arc<FrameQueue>,
    output: Arc<FrameQueue>,
    ctx: StageContext,
}

impl ConvertStage {
    pub fn new(input: Arc<FrameQueue>, output: Arc<FrameQueue>, ctx: StageContext) -> Self {
        Self {
            converter: None,
            destination: None,
            input,
            output,
            ctx,
        }
    }

    /// Build the conversion context from both negotiated geometries
    ///
    /// Must run after the decoder and the display have published their sides.
    pub fn init(&mut self, engine: &dyn MediaEngine) -> Result<(), PipelineError> {
        let geometry = &self.ctx.geometry;
        let source = geometry
            .source
            .require()
            .map_err(|e| PipelineError::init("converter", e))?;
        let destination = geometry
            .destination
            .require()
            .map_err(|e| PipelineError::init("converter", e))?;

        let algorithm = self.ctx.config.algorithm();
        let dither = self.ctx.config.dither();
        let converter = engine
            .build_converter(source, destination, algorithm, dither)
            .map_err(|e| PipelineError::init("converter", e))?;

        info!(
            "ConvertStage: {}x{} {} -> {}x{} {} ({:?}, dither {:?})",
            source.width,
            source.height,
            source.format,
            destination.width,
            destination.height,
            destination.format,
            algorithm,
            dither
        );
        self.converter = Some(converter);
        self.destination = Some(destination.clone());
        Ok(())
    }

    fn allocate(destination: &Geometry) -> Result<Frame, PipelineError> {
        Frame::alloc(
            destination.width,
            destination.height,
            destination.format.clone(),
            FRAME_ALIGN,
        )
        .map_err(|e| {
            PipelineError::Resource(format!(
                "{}x{} {} frame: {}",
                destination.width, destination.height, destination.format, e
            ))
        })
    }

    fn convert_loop(&mut self, converter: &mut dyn FrameConvert, destination: &Geometry) -> Result<u64> {
        let mut converted = 0u64;
        while self.ctx.state.is_running() {
            let Some(frame) = self.input.pop() else {
                break;
            };

            let mut out = match Self::allocate(destination) {
                Ok(out) => out,
                Err(e) => {
                    error!("ConvertStage: {}", e);
                    return Err(e.into());
                }
            };

            if let Err(e) = converter.convert(&frame, &mut out) {
                warn!("ConvertStage: conversion failed (pts={:?}): {}", frame.pts, e);
                self.ctx.health.record_convert_failure();
                continue;
            }
            out.pts = frame.pts;
            self.ctx.health.record_frame_converted();
            converted += 1;

            if self.output.push(out).is_err() {
                break;
            }
        }
        Ok(converted)
    }
}

impl PipelineStage for ConvertStage {
    fn run(&mut self) -> Result<()> {
        let (Some(mut converter), Some(destination)) = (self.converter.take(), self.destination.take())
        else {
            self.output.shutdown();
            self.input.shutdown();
            return Err(anyhow!("ConvertStage: converter not initialized"));
        };

        info!("ConvertStage: started");
        let result = self.convert_loop(converter.as_mut(), &destination);
        self.output.shutdown();
        self.input.shutdown();

        let converted = result?;
        info!(
            "ConvertStage: finished ({} frames, {} failures)",
            converted,
            self.ctx.health.convert_failures()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ConvertStage"
    }
}
