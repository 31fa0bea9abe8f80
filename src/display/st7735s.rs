//! ST7735S 128x160 RGB565 TFT on SPI
//!
//! Commands and parameters travel on the same SPI bus; a separate GPIO line
//! (DC) tells the controller which is which, low for a command byte and high
//! for data. Rotation is done by the controller through MADCTL, and frames
//! are streamed into the window set with CASET/RASET after a RAMWR.

use log::{debug, info};
use std::io;

use super::bus::{Delay, OutputLine, StreamBus};
use super::fit::{AxisLimits, FitRect, SourceShape, fit_area};
use super::{
    AreaRequest, DeviceError, DisplayDevice, Orientation, check_frame, publish_area, report_fit,
};
use crate::media::{DitherMode, ScaleAlgorithm};
use crate::pipeline::geometry::{Geometry, GeometryDescriptor};
use crate::pipeline::state::PipelineConfig;
use crate::pipeline::types::{Frame, PixelFormat};

pub const WIDTH: i32 = 128;
pub const HEIGHT: i32 = 160;
const BYTES_PER_PIXEL: usize = 2;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_SPEED_HZ: u32 = 32_000_000;

const SLEEP_IN: u8 = 0x10;
const SLEEP_OUT: u8 = 0x11;
const INVERSION_OFF: u8 = 0x20;
const INVERSION_ON: u8 = 0x21;
const DISPLAY_OFF: u8 = 0x28;
const DISPLAY_ON: u8 = 0x29;
const COLUMN_ADDRESS_SET: u8 = 0x2A;
const ROW_ADDRESS_SET: u8 = 0x2B;
const MEMORY_WRITE: u8 = 0x2C;
const MEMORY_ACCESS_CONTROL: u8 = 0x36;
const IDLE_OFF: u8 = 0x38;
const IDLE_ON: u8 = 0x39;
const GAMMA_ENABLE: u8 = 0xF2;
const POSITIVE_GAMMA: u8 = 0xE0;
const NEGATIVE_GAMMA: u8 = 0xE1;

/// MADCTL row address order
const MADCTL_MY: u8 = 0x80;
/// MADCTL column address order
const MADCTL_MX: u8 = 0x40;
/// MADCTL row/column exchange
const MADCTL_MV: u8 = 0x20;
/// MADCTL BGR panel order
const MADCTL_BGR: u8 = 0x08;
const MADCTL_ORIENTATION: u8 = MADCTL_MY | MADCTL_MX | MADCTL_MV;

struct Register {
    command: u8,
    data: &'static [u8],
}

const fn reg(command: u8, data: &'static [u8]) -> Register {
    Register { command, data }
}

/// Controller setup after sleep out, before the color order is chosen
const PANEL_SETUP: &[Register] = &[
    reg(0x3A, &[0x55]),       // 16 bit pixels
    reg(0x26, &[0x03]),       // gamma curve
    reg(0xB1, &[0x06, 0x0A]), // frame rate, normal mode
    reg(0xB2, &[0x06, 0x0A]), // frame rate, idle mode
    reg(0xB3, &[0x06, 0x0A]), // frame rate, partial mode
    reg(0xB4, &[0x02]),       // inversion control
    reg(0xC0, &[0x0A, 0x02]), // power control 1
    reg(0xC1, &[0x02]),       // power control 2
    reg(0xC5, &[0x4F, 0x5A]), // VCOM control
    reg(0xC7, &[0x40]),       // VCOM offset
];

/// Source and gate driver scan direction
const DRIVER_DIRECTION: &[Register] = &[reg(0xB7, &[0x00]), reg(0xB8, &[0x00])];

const GAMMA_POSITIVE: [u8; 15] = [
    0x3F, 0x25, 0x1C, 0x1E, 0x20, 0x12, 0x2A, 0x90, 0x24, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00,
];
const GAMMA_NEGATIVE: [u8; 15] = [
    0x20, 0x20, 0x20, 0x20, 0x05, 0x00, 0x15, 0xA7, 0x3D, 0x18, 0x25, 0x2A, 0x2B, 0x2B, 0x3A,
];

/// Pack 8 bit RGB into RGB565
pub fn rgb565(rgb: u32) -> u16 {
    let r = ((rgb >> 16) & 0xFF) as u16;
    let g = ((rgb >> 8) & 0xFF) as u16;
    let b = (rgb & 0xFF) as u16;
    ((r & 0xF8) << 8) | ((g & 0xFC) << 3) | (b >> 3)
}

fn orientation_bits(orientation: Orientation) -> u8 {
    match orientation {
        Orientation::Portrait => 0,
        Orientation::PortraitInverted => MADCTL_MY | MADCTL_MX,
        Orientation::Landscape => MADCTL_MX | MADCTL_MV,
        Orientation::LandscapeInverted => MADCTL_MY | MADCTL_MV,
    }
}

pub struct St7735s<S, P, D> {
    spi: S,
    reset: P,
    dc: P,
    delay: D,
    chunk_size: usize,
    madctl: u8,
    orientation: Orientation,
    area: Option<FitRect>,
    powered: bool,
}

impl<S: StreamBus, P: OutputLine, D: Delay> St7735s<S, P, D> {
    pub fn new(spi: S, reset: P, dc: P, delay: D) -> Self {
        Self {
            spi,
            reset,
            dc,
            delay,
            chunk_size: DEFAULT_CHUNK_SIZE,
            madctl: 0,
            orientation: Orientation::Portrait,
            area: None,
            powered: false,
        }
    }

    /// Largest single SPI transfer
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn write_command(&mut self, command: u8) -> io::Result<()> {
        self.dc.set_value(false)?;
        self.spi.transfer(&[command])
    }

    fn write_data(&mut self, data: &[u8]) -> io::Result<()> {
        self.dc.set_value(true)?;
        for chunk in data.chunks(self.chunk_size) {
            self.spi.transfer(chunk)?;
        }
        Ok(())
    }

    fn write_register(&mut self, command: u8, data: &[u8]) -> io::Result<()> {
        self.write_command(command)?;
        if !data.is_empty() {
            self.write_data(data)?;
        }
        Ok(())
    }

    fn write_registers(&mut self, registers: &[Register]) -> io::Result<()> {
        for register in registers {
            self.write_register(register.command, register.data)?;
        }
        Ok(())
    }

    /// Hardware reset through the RST line
    pub fn reset(&mut self) -> Result<(), DeviceError> {
        self.reset.set_value(false)?;
        self.delay.delay_ms(50);
        self.reset.set_value(true)?;
        self.delay.delay_ms(50);
        Ok(())
    }

    pub fn set_sleep(&mut self, sleep: bool) -> Result<(), DeviceError> {
        if sleep {
            self.write_command(SLEEP_IN)?;
            self.delay.delay_ms(5);
        } else {
            self.write_command(SLEEP_OUT)?;
            self.delay.delay_ms(120);
        }
        Ok(())
    }

    pub fn set_display_on(&mut self, on: bool) -> Result<(), DeviceError> {
        self.write_command(if on { DISPLAY_ON } else { DISPLAY_OFF })?;
        self.powered = on;
        Ok(())
    }

    pub fn set_inverted(&mut self, inverted: bool) -> Result<(), DeviceError> {
        self.write_command(if inverted { INVERSION_ON } else { INVERSION_OFF })?;
        Ok(())
    }

    pub fn set_idle(&mut self, idle: bool) -> Result<(), DeviceError> {
        self.write_command(if idle { IDLE_ON } else { IDLE_OFF })?;
        Ok(())
    }

    /// RGB (`true`) or BGR panel color order
    pub fn set_color_order_rgb(&mut self, rgb: bool) -> Result<(), DeviceError> {
        if rgb {
            self.madctl &= !MADCTL_BGR;
        } else {
            self.madctl |= MADCTL_BGR;
        }
        self.write_register(MEMORY_ACCESS_CONTROL, &[self.madctl])?;
        Ok(())
    }

    /// Load the positive and negative gamma correction tables
    pub fn load_gamma(&mut self) -> Result<(), DeviceError> {
        self.write_command(GAMMA_ENABLE)?;
        self.write_register(POSITIVE_GAMMA, &GAMMA_POSITIVE)?;
        self.write_register(NEGATIVE_GAMMA, &GAMMA_NEGATIVE)?;
        Ok(())
    }

    fn set_window(&mut self, x_start: i32, x_end: i32, y_start: i32, y_end: i32) -> Result<(), DeviceError> {
        self.delay.delay_ms(10);
        self.write_register(COLUMN_ADDRESS_SET, &[0x00, x_start as u8, 0x00, x_end as u8])?;
        self.write_register(ROW_ADDRESS_SET, &[0x00, y_start as u8, 0x00, y_end as u8])?;
        self.delay.delay_ms(10);
        Ok(())
    }

    fn panel_extent(&self) -> AxisLimits {
        AxisLimits::new(WIDTH, HEIGHT, self.madctl & MADCTL_MV != 0)
    }

    /// Paint the whole panel with one 24 bit color
    pub fn fill(&mut self, rgb: u32) -> Result<(), DeviceError> {
        let extent = self.panel_extent();
        self.set_window(0, extent.x - 1, 0, extent.y - 1)?;

        let color = rgb565(rgb).to_be_bytes();
        let pixels = (extent.x * extent.y) as usize;
        let mut buffer = Vec::with_capacity(pixels * BYTES_PER_PIXEL);
        for _ in 0..pixels {
            buffer.extend_from_slice(&color);
        }
        self.write_command(MEMORY_WRITE)?;
        self.write_data(&buffer)?;

        // restore the picture window
        if let Some(area) = self.area {
            self.set_window(area.x_start, area.x_end, area.y_start, area.y_end)?;
        }
        Ok(())
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }
}

impl<S: StreamBus, P: OutputLine, D: Delay> DisplayDevice for St7735s<S, P, D> {
    fn name(&self) -> &'static str {
        "ST7735S"
    }

    fn init(&mut self, config: &PipelineConfig) -> Result<(), DeviceError> {
        config.set_algorithm(ScaleAlgorithm::Bicubic);
        config.set_dither(DitherMode::ErrorDiffusion);

        self.reset()?;
        self.set_sleep(false)?;
        self.write_registers(PANEL_SETUP)?;
        self.set_inverted(false)?;
        self.set_color_order_rgb(true)?;
        self.set_idle(false)?;
        self.write_registers(DRIVER_DIRECTION)?;
        self.set_display_on(true)?;

        info!("ST7735S: initialized {}x{}", WIDTH, HEIGHT);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DeviceError> {
        self.fill(0x000000)
    }

    fn set_orientation(&mut self, orientation: Orientation) -> Result<(), DeviceError> {
        self.madctl = (self.madctl & !MADCTL_ORIENTATION) | orientation_bits(orientation);
        self.write_register(MEMORY_ACCESS_CONTROL, &[self.madctl])?;
        self.orientation = orientation;
        debug!("ST7735S: MADCTL {:#04x} for {}", self.madctl, orientation);
        Ok(())
    }

    fn set_area(&mut self, request: &AreaRequest, source: &Geometry) -> Result<FitRect, DeviceError> {
        let limits = self.panel_extent();
        let fit = fit_area(request, &SourceShape::from_geometry(source), limits);
        report_fit("ST7735S", &fit);
        let rect = fit.rect;
        if rect.width <= 0 || rect.height <= 0 {
            return Err(DeviceError::InvalidArea {
                width: rect.width,
                height: rect.height,
            });
        }
        self.set_window(rect.x_start, rect.x_end, rect.y_start, rect.y_end)?;
        self.area = Some(rect);
        Ok(rect)
    }

    fn negotiate_geometry(&self, destination: &GeometryDescriptor) -> Result<(), DeviceError> {
        publish_area(destination, self.area.as_ref(), PixelFormat::Rgb565Be)
    }

    fn render_frame(&mut self, frame: &Frame) -> Result<(), DeviceError> {
        if !self.powered {
            return Err(DeviceError::NotPowered);
        }
        let area = self.area.ok_or(DeviceError::AreaNotSet)?;
        check_frame(frame, &area, &PixelFormat::Rgb565Be)?;

        let plane = &frame.planes[0];
        let row = frame.width as usize * BYTES_PER_PIXEL;
        let rows = frame.height as usize;

        self.write_command(MEMORY_WRITE)?;
        if plane.stride == row {
            self.write_data(&plane.data[..row * rows])?;
        } else {
            let mut packed = Vec::with_capacity(row * rows);
            for y in 0..rows {
                packed.extend_from_slice(plane.row(y, row));
            }
            self.write_data(&packed)?;
        }
        Ok(())
    }
}
