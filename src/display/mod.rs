//! Panel drivers
//!
//! Every panel implements [`DisplayDevice`]. A driver owns its bus handles,
//! knows its native resolution and scan direction, places the picture with
//! [`fit::fit_area`] and publishes the destination geometry the converter
//! must produce.

pub mod bus;
pub mod fit;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod ssd1306;
pub mod st7735s;

use log::{info, warn};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::DeviceConfig;
use crate::pipeline::geometry::{Geometry, GeometryDescriptor, GeometryError};
use crate::pipeline::state::PipelineConfig;
use crate::pipeline::types::{Frame, PixelFormat};
use fit::{Axis, Fit, FitRect};

pub use ssd1306::Ssd1306;
pub use st7735s::St7735s;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("bus transfer failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("display is not powered on")]
    NotPowered,

    #[error("display area is not set")]
    AreaNotSet,

    #[error("invalid display area {width}x{height}")]
    InvalidArea { width: i32, height: i32 },

    #[error("frame {got_width}x{got_height} does not match display area {width}x{height}")]
    FrameMismatch {
        got_width: u32,
        got_height: u32,
        width: u32,
        height: u32,
    },

    #[error("unsupported frame format {0}")]
    Format(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Picture orientation relative to the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Landscape,
    LandscapeInverted,
    Portrait,
    PortraitInverted,
}

impl Orientation {
    pub fn code(&self) -> &'static str {
        match self {
            Orientation::Landscape => "L",
            Orientation::LandscapeInverted => "LI",
            Orientation::Portrait => "P",
            Orientation::PortraitInverted => "PI",
        }
    }

    pub fn is_portrait(&self) -> bool {
        matches!(self, Orientation::Portrait | Orientation::PortraitInverted)
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L" => Ok(Orientation::Landscape),
            "LI" => Ok(Orientation::LandscapeInverted),
            "P" => Ok(Orientation::Portrait),
            "PI" => Ok(Orientation::PortraitInverted),
            other => Err(format!("unknown orientation '{other}' (expected L, LI, P or PI)")),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Requested placement; `None` lets the fit algorithm decide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AreaRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub offset_x: Option<u32>,
    pub offset_y: Option<u32>,
}

impl AreaRequest {
    /// Build from signed values where negative means unspecified
    ///
    /// Zero sizes are treated as unspecified too; a zero offset is a real offset.
    pub fn from_signed(width: i32, height: i32, offset_x: i32, offset_y: i32) -> Self {
        let size = |v: i32| (v > 0).then_some(v as u32);
        let offset = |v: i32| (v >= 0).then_some(v as u32);
        Self {
            width: size(width),
            height: size(height),
            offset_x: offset(offset_x),
            offset_y: offset(offset_y),
        }
    }
}

/// Panel driver contract used by the display stage
pub trait DisplayDevice: Send {
    fn name(&self) -> &'static str;

    /// Power on and program the controller; may override conversion settings
    fn init(&mut self, config: &PipelineConfig) -> Result<(), DeviceError>;

    /// Blank the whole panel
    fn clear(&mut self) -> Result<(), DeviceError>;

    fn set_orientation(&mut self, orientation: Orientation) -> Result<(), DeviceError>;

    /// Place a picture of `source` geometry on the panel
    fn set_area(&mut self, request: &AreaRequest, source: &Geometry) -> Result<FitRect, DeviceError>;

    /// Publish the destination geometry frames must be converted to
    fn negotiate_geometry(&self, destination: &GeometryDescriptor) -> Result<(), DeviceError>;

    fn render_frame(&mut self, frame: &Frame) -> Result<(), DeviceError>;
}

/// Publish `area` in `format` as the destination geometry
pub(crate) fn publish_area(
    destination: &GeometryDescriptor,
    area: Option<&FitRect>,
    format: PixelFormat,
) -> Result<(), DeviceError> {
    let area = area.ok_or(DeviceError::AreaNotSet)?;
    if area.width <= 0 || area.height <= 0 {
        return Err(DeviceError::InvalidArea {
            width: area.width,
            height: area.height,
        });
    }
    destination.publish(Geometry::new(area.width as u32, area.height as u32, format))?;
    Ok(())
}

/// Log the placement chosen by the fit algorithm and any offset it reset
pub(crate) fn report_fit(device: &str, fit: &Fit) {
    for correction in &fit.corrections {
        let axis = match correction.axis {
            Axis::X => "X",
            Axis::Y => "Y",
        };
        warn!(
            "{}: offset {} {} out of range 0..{}, reset to 0",
            device, axis, correction.requested, correction.limit
        );
    }
    let rect = &fit.rect;
    info!(
        "{}: {} * {}  X: {} ~ {}  Y: {} ~ {}",
        device, rect.width, rect.height, rect.x_start, rect.x_end, rect.y_start, rect.y_end
    );
}

/// Reject frames that do not match the negotiated area
pub(crate) fn check_frame(frame: &Frame, area: &FitRect, format: &PixelFormat) -> Result<(), DeviceError> {
    if &frame.format != format {
        return Err(DeviceError::Format(frame.format.to_string()));
    }
    if frame.width as i32 != area.width || frame.height as i32 != area.height {
        return Err(DeviceError::FrameMismatch {
            got_width: frame.width,
            got_height: frame.height,
            width: area.width.max(0) as u32,
            height: area.height.max(0) as u32,
        });
    }
    let plane = frame
        .planes
        .first()
        .ok_or_else(|| DeviceError::Format(frame.format.to_string()))?;
    let needed = plane.stride * frame.height.saturating_sub(1) as usize + frame.row_bytes(0);
    if plane.stride < frame.row_bytes(0) || plane.data.len() < needed {
        return Err(DeviceError::Format(format!(
            "{} plane too small for {}x{}",
            frame.format, frame.width, frame.height
        )));
    }
    Ok(())
}

/// Supported panel controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Ssd1306,
    St7735s,
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssd1306" => Ok(DeviceKind::Ssd1306),
            "st7735s" | "st7735" => Ok(DeviceKind::St7735s),
            other => Err(format!("unknown device '{other}'")),
        }
    }
}

/// Open the buses for `kind` as wired in `config`
#[cfg(target_os = "linux")]
pub fn open_device(
    kind: DeviceKind,
    config: &DeviceConfig,
) -> Result<Box<dyn DisplayDevice>, DeviceError> {
    use bus::ThreadDelay;
    use linux::{GpioLine, I2cDevice, SpiDevice};

    match kind {
        DeviceKind::Ssd1306 => {
            let wiring = &config.ssd1306;
            let bus = I2cDevice::open(&wiring.i2c_device, wiring.address)?;
            Ok(Box::new(Ssd1306::new(bus)))
        }
        DeviceKind::St7735s => {
            let wiring = &config.st7735s;
            let spi = SpiDevice::open(
                &wiring.spi_device,
                wiring.mode,
                wiring.bits_per_word,
                wiring.speed_hz,
            )?;
            let reset = GpioLine::request(&wiring.reset.chip, wiring.reset.line, "st7735s-reset", true)?;
            let dc = GpioLine::request(&wiring.dc.chip, wiring.dc.line, "st7735s-dc", true)?;
            Ok(Box::new(
                St7735s::new(spi, reset, dc, ThreadDelay).with_chunk_size(wiring.chunk_size),
            ))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn open_device(
    kind: DeviceKind,
    _config: &DeviceConfig,
) -> Result<Box<dyn DisplayDevice>, DeviceError> {
    Err(DeviceError::Unsupported(format!(
        "{kind:?} needs the Linux i2c-dev/spidev/gpio interfaces"
    )))
}
