//! Display stage: pushes converted frames to the panel

use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

use super::error::PipelineError;
use super::queue::FrameQueue;
use super::stage::{PipelineStage, StageContext};
use crate::display::fit::FitRect;
use crate::display::{AreaRequest, DeviceError, DisplayDevice, Orientation};

pub struct DisplayStage {
    device: Box<dyn DisplayDevice>,
    input: Arc<FrameQueue>,
    ctx: StageContext,
}

impl DisplayStage {
    pub fn new(device: Box<dyn DisplayDevice>, input: Arc<FrameQueue>, ctx: StageContext) -> Self {
        Self { device, input, ctx }
    }

    /// Bring the panel up and publish the destination geometry
    ///
    /// Reads the source geometry, so the decoder must be open already.
    pub fn init(&mut self, orientation: Orientation, request: &AreaRequest) -> Result<FitRect, PipelineError> {
        let name = self.device.name();
        let fail = |e: DeviceError| PipelineError::init("display", e);

        self.device.init(&self.ctx.config).map_err(fail)?;
        if let Err(e) = self.device.clear() {
            warn!("DisplayStage: {} clear failed: {}", name, e);
        }
        self.device.set_orientation(orientation).map_err(fail)?;

        let source = self
            .ctx
            .geometry
            .source
            .require()
            .map_err(|e| PipelineError::init("display", e))?;
        let area = self.device.set_area(request, source).map_err(fail)?;
        self.device
            .negotiate_geometry(&self.ctx.geometry.destination)
            .map_err(fail)?;

        info!(
            "DisplayStage: {} ready, orientation {}, area {}x{}",
            name, orientation, area.width, area.height
        );
        Ok(area)
    }
}

impl PipelineStage for DisplayStage {
    fn run(&mut self) -> Result<()> {
        let name = self.device.name();
        let mut shown = 0u64;
        let mut failed = 0u64;
        info!("DisplayStage: started ({})", name);

        while self.ctx.state.is_running() {
            let Some(frame) = self.input.pop() else {
                break;
            };
            match self.device.render_frame(&frame) {
                Ok(()) => {
                    shown += 1;
                    self.ctx.health.record_frame_displayed();
                    self.ctx.state.mark_frame_changed();
                }
                Err(e) => {
                    failed += 1;
                    warn!("DisplayStage: {} render failed (pts={:?}): {}", name, frame.pts, e);
                    self.ctx.health.record_device_error();
                }
            }
        }

        self.input.shutdown();
        info!("DisplayStage: finished ({} shown, {} failed)", shown, failed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DisplayStage"
    }
}
