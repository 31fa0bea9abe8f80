//! SSD1306 128x64 monochrome OLED on I2C
//!
//! Every I2C write starts with a control byte: `0x00` for a command byte,
//! `0x40` for display RAM data. The controller runs in horizontal addressing
//! mode, so a full frame is one 1024 byte data write of eight 128 column pages
//! where bit `b` of a column byte is row `page * 8 + b`.

use log::info;
use std::io;

use super::bus::RegisterBus;
use super::fit::{AxisLimits, FitRect, SourceShape, fit_area};
use super::{
    AreaRequest, DeviceError, DisplayDevice, Orientation, check_frame, publish_area, report_fit,
};
use crate::media::{DitherMode, ScaleAlgorithm};
use crate::pipeline::geometry::{Geometry, GeometryDescriptor};
use crate::pipeline::state::PipelineConfig;
use crate::pipeline::types::{Frame, PixelFormat};

pub const WIDTH: i32 = 128;
pub const HEIGHT: i32 = 64;
const PAGES: usize = HEIGHT as usize / 8;
pub const BUFFER_LEN: usize = WIDTH as usize * PAGES;

pub const DEFAULT_ADDRESS: u16 = 0x3C;

const CONTROL_COMMAND: u8 = 0x00;
const CONTROL_DATA: u8 = 0x40;

const DISPLAY_OFF: u8 = 0xAE;
const DISPLAY_ON: u8 = 0xAF;
const NORMAL_DISPLAY: u8 = 0xA6;
const INVERT_DISPLAY: u8 = 0xA7;
const SET_CONTRAST: u8 = 0x81;
const RESUME_FROM_RAM: u8 = 0xA4;
const ENTIRE_DISPLAY_ON: u8 = 0xA5;

const DEFAULT_CONTRAST: u8 = 0xDD;

/// Power-on register programming, one command frame per byte
const INIT_SEQUENCE: &[u8] = &[
    0x00, 0x10, // column start address 0
    0x40, // display start line 0
    0xA1, // segment remap
    0xC8, // COM scan direction remapped
    0xA8, 0x3F, // multiplex ratio 64
    0xD3, 0x00, // no display offset
    0xD5, 0x80, // oscillator frequency
    0xD9, 0xF1, // pre-charge period
    0xDA, 0x12, // COM pins configuration
    0xDB, 0x30, // VCOMH deselect level
    0x20, 0x00, // horizontal addressing mode
    0x8D, 0x14, // charge pump on
    0x21, 0x00, 0x7F, // column window 0..127
    0x22, 0x00, 0x07, // page window 0..7
];

/// Whole-panel pixel map, row major
pub struct Bitmap {
    pixels: Vec<bool>,
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            pixels: vec![false; (WIDTH * HEIGHT) as usize],
        }
    }

    pub fn set(&mut self, x: i32, y: i32) {
        self.pixels[(y * WIDTH + x) as usize] = true;
    }

    pub fn get(&self, x: i32, y: i32) -> bool {
        self.pixels[(y * WIDTH + x) as usize]
    }

    /// Pack into controller pages
    pub fn pack_pages(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; BUFFER_LEN];
        for page in 0..PAGES as i32 {
            for col in 0..WIDTH {
                let mut byte = 0u8;
                for bit in 0..8 {
                    if self.get(col, page * 8 + bit) {
                        byte |= 1 << bit;
                    }
                }
                buffer[(page * WIDTH + col) as usize] = byte;
            }
        }
        buffer
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// Panel coordinate of picture pixel (`x`, `y`) placed in `area`
pub fn remap(orientation: Orientation, area: &FitRect, x: i32, y: i32) -> (i32, i32) {
    match orientation {
        Orientation::Landscape => (area.x_start + x, area.y_start + y),
        Orientation::LandscapeInverted => (area.x_end - x, area.y_end - y),
        Orientation::Portrait => (area.y_start + y, area.x_end - x),
        Orientation::PortraitInverted => (area.y_end - y, area.x_start + x),
    }
}

/// Place the lit pixels of a monochrome frame on a panel bitmap
pub fn rasterize(frame: &Frame, area: &FitRect, orientation: Orientation) -> Bitmap {
    let mut bitmap = Bitmap::new();
    let plane = &frame.planes[0];
    for y in 0..frame.height as i32 {
        let row = plane.row(y as usize, frame.row_bytes(0));
        for x in 0..frame.width as i32 {
            let lit = row[x as usize / 8] & (0x80 >> (x % 8)) != 0;
            if !lit {
                continue;
            }
            let (dx, dy) = remap(orientation, area, x, y);
            if (0..WIDTH).contains(&dx) && (0..HEIGHT).contains(&dy) {
                bitmap.set(dx, dy);
            }
        }
    }
    bitmap
}

pub struct Ssd1306<B> {
    bus: B,
    orientation: Orientation,
    area: Option<FitRect>,
    powered: bool,
}

impl<B: RegisterBus> Ssd1306<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            orientation: Orientation::Landscape,
            area: None,
            powered: false,
        }
    }

    fn command(&mut self, bytes: &[u8]) -> io::Result<()> {
        for byte in bytes {
            self.bus.write(&[CONTROL_COMMAND, *byte])?;
        }
        Ok(())
    }

    fn data(&mut self, data: &[u8]) -> io::Result<()> {
        let mut message = Vec::with_capacity(data.len() + 1);
        message.push(CONTROL_DATA);
        message.extend_from_slice(data);
        self.bus.write(&message)
    }

    pub fn set_display_on(&mut self, on: bool) -> Result<(), DeviceError> {
        self.command(&[if on { DISPLAY_ON } else { DISPLAY_OFF }])?;
        self.powered = on;
        Ok(())
    }

    pub fn set_inverted(&mut self, inverted: bool) -> Result<(), DeviceError> {
        self.command(&[if inverted { INVERT_DISPLAY } else { NORMAL_DISPLAY }])?;
        Ok(())
    }

    pub fn set_contrast(&mut self, contrast: u8) -> Result<(), DeviceError> {
        self.command(&[SET_CONTRAST, contrast])?;
        Ok(())
    }

    /// Light every pixel regardless of RAM content
    pub fn set_entire_on(&mut self, on: bool) -> Result<(), DeviceError> {
        self.command(&[if on { ENTIRE_DISPLAY_ON } else { RESUME_FROM_RAM }])?;
        Ok(())
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn area(&self) -> Option<FitRect> {
        self.area
    }
}

impl<B: RegisterBus> DisplayDevice for Ssd1306<B> {
    fn name(&self) -> &'static str {
        "SSD1306"
    }

    fn init(&mut self, config: &PipelineConfig) -> Result<(), DeviceError> {
        config.set_algorithm(ScaleAlgorithm::Bicubic);
        config.set_dither(DitherMode::ErrorDiffusion);

        self.set_display_on(false)?;
        self.command(INIT_SEQUENCE)?;
        self.set_inverted(false)?;
        self.set_contrast(DEFAULT_CONTRAST)?;
        self.set_entire_on(false)?;
        self.clear()?;
        self.set_display_on(true)?;

        info!("SSD1306: initialized {}x{}", WIDTH, HEIGHT);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DeviceError> {
        self.data(&[0u8; BUFFER_LEN])?;
        Ok(())
    }

    fn set_orientation(&mut self, orientation: Orientation) -> Result<(), DeviceError> {
        // applied in software while rasterizing
        self.orientation = orientation;
        Ok(())
    }

    fn set_area(&mut self, request: &AreaRequest, source: &Geometry) -> Result<FitRect, DeviceError> {
        let limits = AxisLimits::new(WIDTH, HEIGHT, self.orientation.is_portrait());
        let fit = fit_area(request, &SourceShape::from_geometry(source), limits);
        report_fit("SSD1306", &fit);
        let rect = fit.rect;
        self.area = Some(rect);
        Ok(rect)
    }

    fn negotiate_geometry(&self, destination: &GeometryDescriptor) -> Result<(), DeviceError> {
        publish_area(destination, self.area.as_ref(), PixelFormat::MonoBlack)
    }

    fn render_frame(&mut self, frame: &Frame) -> Result<(), DeviceError> {
        if !self.powered {
            return Err(DeviceError::NotPowered);
        }
        let area = self.area.ok_or(DeviceError::AreaNotSet)?;
        check_frame(frame, &area, &PixelFormat::MonoBlack)?;

        let buffer = rasterize(frame, &area, self.orientation).pack_pages();
        self.data(&buffer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::bus::mock::{BusEvent, EventLog, MockRegisterBus};
    use std::collections::HashSet;

    fn device() -> (Ssd1306<MockRegisterBus>, EventLog) {
        let log = EventLog::default();
        let bus = MockRegisterBus {
            log: log.clone(),
            fail: false,
        };
        (Ssd1306::new(bus), log)
    }

    fn full_area(orientation: Orientation) -> FitRect {
        let limits = AxisLimits::new(WIDTH, HEIGHT, orientation.is_portrait());
        FitRect {
            x_start: 0,
            x_end: limits.x - 1,
            y_start: 0,
            y_end: limits.y - 1,
            width: limits.x,
            height: limits.y,
        }
    }

    #[test]
    fn test_init_sequence() {
        let (mut oled, log) = device();
        let config = PipelineConfig::new();
        oled.init(&config).unwrap();

        assert_eq!(config.dither(), DitherMode::ErrorDiffusion);
        assert_eq!(config.algorithm(), ScaleAlgorithm::Bicubic);
        assert!(oled.is_powered());

        let mut expected = vec![BusEvent::Write(vec![0x00, 0xAE])];
        for byte in INIT_SEQUENCE {
            expected.push(BusEvent::Write(vec![0x00, *byte]));
        }
        for byte in [0xA6, 0x81, 0xDD, 0xA4] {
            expected.push(BusEvent::Write(vec![0x00, byte]));
        }
        let mut clear = vec![0x40];
        clear.extend_from_slice(&[0u8; BUFFER_LEN]);
        expected.push(BusEvent::Write(clear));
        expected.push(BusEvent::Write(vec![0x00, 0xAF]));

        assert_eq!(log.events(), expected);
    }

    #[test]
    fn test_orientation_is_bijective() {
        for orientation in [
            Orientation::Landscape,
            Orientation::LandscapeInverted,
            Orientation::Portrait,
            Orientation::PortraitInverted,
        ] {
            let area = full_area(orientation);
            let mut seen = HashSet::new();
            for y in 0..area.height {
                for x in 0..area.width {
                    let (dx, dy) = remap(orientation, &area, x, y);
                    assert!((0..WIDTH).contains(&dx) && (0..HEIGHT).contains(&dy));
                    assert!(seen.insert((dx, dy)), "{orientation:?} maps twice to ({dx}, {dy})");
                }
            }
            assert_eq!(seen.len(), (WIDTH * HEIGHT) as usize);
        }
    }

    #[test]
    fn test_remap_corners() {
        let landscape = full_area(Orientation::Landscape);
        assert_eq!(remap(Orientation::LandscapeInverted, &landscape, 0, 0), (127, 63));

        let portrait = full_area(Orientation::Portrait);
        assert_eq!(remap(Orientation::Portrait, &portrait, 0, 0), (0, 63));
        assert_eq!(remap(Orientation::PortraitInverted, &portrait, 0, 0), (127, 0));
    }

    #[test]
    fn test_page_packing() {
        let mut bitmap = Bitmap::new();
        bitmap.set(5, 10);
        bitmap.set(127, 63);
        bitmap.set(0, 0);
        let buffer = bitmap.pack_pages();

        assert_eq!(buffer.len(), BUFFER_LEN);
        assert_eq!(buffer[128 + 5], 1 << 2);
        assert_eq!(buffer[7 * 128 + 127], 0x80);
        assert_eq!(buffer[0], 0x01);
        assert_eq!(buffer.iter().filter(|b| **b != 0).count(), 3);
    }

    #[test]
    fn test_render_letterboxed_frame() {
        let (mut oled, log) = device();
        oled.init(&PipelineConfig::new()).unwrap();
        let source = Geometry::new(320, 240, PixelFormat::Yuv420p);
        let area = oled.set_area(&AreaRequest::default(), &source).unwrap();
        assert_eq!((area.x_start, area.width, area.height), (22, 85, 64));

        let destination = GeometryDescriptor::new("destination");
        oled.negotiate_geometry(&destination).unwrap();
        let geometry = destination.require().unwrap();
        assert_eq!((geometry.width, geometry.height), (85, 64));
        assert_eq!(geometry.format, PixelFormat::MonoBlack);

        let mut frame = Frame::alloc(85, 64, PixelFormat::MonoBlack, 32).unwrap();
        frame.planes[0].data.fill(0xFF);
        log.clear();
        oled.render_frame(&frame).unwrap();

        let events = log.events();
        assert_eq!(events.len(), 1);
        let BusEvent::Write(message) = &events[0] else {
            panic!("expected a data write");
        };
        assert_eq!(message[0], 0x40);
        let pages = &message[1..];
        assert_eq!(pages.len(), BUFFER_LEN);
        for page in 0..PAGES {
            for col in 0..WIDTH as usize {
                let expected = if (22..=106).contains(&col) { 0xFF } else { 0x00 };
                assert_eq!(pages[page * 128 + col], expected, "page {page} col {col}");
            }
        }
    }

    #[test]
    fn test_render_refused_before_power_on() {
        let (mut oled, _) = device();
        let frame = Frame::alloc(8, 8, PixelFormat::MonoBlack, 32).unwrap();
        assert!(matches!(oled.render_frame(&frame), Err(DeviceError::NotPowered)));
    }

    #[test]
    fn test_render_requires_area() {
        let (mut oled, _) = device();
        oled.init(&PipelineConfig::new()).unwrap();
        let frame = Frame::alloc(8, 8, PixelFormat::MonoBlack, 32).unwrap();
        assert!(matches!(oled.render_frame(&frame), Err(DeviceError::AreaNotSet)));
    }

    #[test]
    fn test_bus_failure_surfaces() {
        let log = EventLog::default();
        let mut oled = Ssd1306::new(MockRegisterBus { log, fail: true });
        assert!(matches!(
            oled.init(&PipelineConfig::new()),
            Err(DeviceError::Io(_))
        ));
        assert!(!oled.is_powered());
    }

    #[test]
    fn test_portrait_swaps_limits() {
        let (mut oled, _) = device();
        oled.set_orientation(Orientation::Portrait).unwrap();
        let area = oled
            .set_area(&AreaRequest::default(), &Geometry::new(320, 240, PixelFormat::Yuv420p))
            .unwrap();
        assert_eq!((area.width, area.height), (64, 48));
    }
}
