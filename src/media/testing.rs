//! In-memory engine used by pipeline tests

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;

use super::{
    DecodeError, DecoderLookup, DitherMode, FrameConvert, MediaEngine, MediaError, MediaSource,
    ScaleAlgorithm, VideoDecode,
};
use crate::pipeline::geometry::Geometry;
use crate::pipeline::types::{Frame, Packet, PixelFormat, StreamInfo};

/// Payload that makes [`FakeDecoder::push`] fail
pub const CORRUPT_UNIT: &[u8] = b"corrupt";

pub struct FakeSource {
    streams: Vec<StreamInfo>,
    units: VecDeque<Packet>,
    /// Keep producing video units forever after `units` runs out
    endless: Option<usize>,
    next_pts: i64,
}

impl FakeSource {
    pub fn new(streams: Vec<StreamInfo>, units: Vec<Packet>) -> Self {
        Self {
            streams,
            units: units.into(),
            endless: None,
            next_pts: 0,
        }
    }

    pub fn endless(streams: Vec<StreamInfo>, video_index: usize) -> Self {
        Self {
            streams,
            units: VecDeque::new(),
            endless: Some(video_index),
            next_pts: 0,
        }
    }
}

impl MediaSource for FakeSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_unit(&mut self) -> Result<Option<Packet>, MediaError> {
        if let Some(unit) = self.units.pop_front() {
            return Ok(Some(unit));
        }
        Ok(self.endless.map(|index| {
            self.next_pts += 1;
            Packet::new(index, vec![0x10u8; 8])
                .with_pts(self.next_pts)
                .with_key(self.next_pts % 10 == 1)
        }))
    }
}

/// Decoder holding back `delay` frames until flushed, like a reordering codec
pub struct FakeDecoder {
    name: String,
    geometry: Geometry,
    pending: VecDeque<Frame>,
    delay: usize,
    flushed: bool,
}

impl FakeDecoder {
    pub fn new(name: &str, geometry: Geometry, delay: usize) -> Self {
        Self {
            name: name.to_string(),
            geometry,
            pending: VecDeque::new(),
            delay,
            flushed: false,
        }
    }
}

impl VideoDecode for FakeDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> Geometry {
        self.geometry.clone()
    }

    fn push(&mut self, unit: &Packet) -> Result<(), DecodeError> {
        if unit.data.as_ref() == CORRUPT_UNIT {
            return Err(DecodeError::Failed("invalid data".to_string()));
        }
        if self.pending.len() > self.delay {
            return Err(DecodeError::Again);
        }
        let mut frame = Frame::alloc(
            self.geometry.width,
            self.geometry.height,
            PixelFormat::Gray8,
            1,
        )
        .map_err(|e| DecodeError::Failed(e.to_string()))?;
        frame.planes[0].data.fill(unit.data.first().copied().unwrap_or(0));
        // Odd sizes report their own timestamp to exercise resolution order
        if unit.data.len() % 2 == 1 {
            frame.best_effort_pts = unit.pts.map(|pts| pts + 1000);
        }
        self.pending.push_back(frame);
        Ok(())
    }

    fn take(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.flushed || self.pending.len() > self.delay {
            return Ok(self.pending.pop_front());
        }
        Err(DecodeError::Again)
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        self.flushed = true;
        Ok(())
    }
}

/// Fills the destination with white, or with the byte carried as the
/// source's native payload
pub struct FakeConverter {
    source: Geometry,
}

impl FrameConvert for FakeConverter {
    fn convert(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), MediaError> {
        if src.width != self.source.width || src.height != self.source.height {
            return Err(MediaError::Converter(format!(
                "unexpected input {}x{}",
                src.width, src.height
            )));
        }
        let fill = src
            .native
            .as_ref()
            .and_then(|n| n.downcast_ref::<u8>())
            .copied()
            .unwrap_or(0xFF);
        for plane in &mut dst.planes {
            plane.data.fill(fill);
        }
        Ok(())
    }
}

pub struct FakeEngine {
    streams: Vec<StreamInfo>,
    units: Mutex<Option<Vec<Packet>>>,
    endless: bool,
    pub hardware_available: bool,
    pub decoder_delay: usize,
    pub decoded_geometry: Geometry,
    /// Every decoder lookup attempted, in order
    pub lookups: Mutex<Vec<String>>,
    pub converters_built: Mutex<Vec<(Geometry, ScaleAlgorithm, DitherMode)>>,
}

impl FakeEngine {
    pub fn new(streams: Vec<StreamInfo>, units: Vec<Packet>) -> Self {
        let decoded_geometry = streams
            .iter()
            .find(|s| s.kind == crate::pipeline::types::MediaKind::Video)
            .map(|s| Geometry::new(s.width, s.height, PixelFormat::Gray8))
            .unwrap_or_else(|| Geometry::new(320, 240, PixelFormat::Gray8));
        Self {
            streams,
            units: Mutex::new(Some(units)),
            endless: false,
            hardware_available: false,
            decoder_delay: 1,
            decoded_geometry,
            lookups: Mutex::new(Vec::new()),
            converters_built: Mutex::new(Vec::new()),
        }
    }

    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }
}

impl MediaEngine for FakeEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>, MediaError> {
        let units = self.units.lock().take().ok_or_else(|| MediaError::Open {
            path: path.display().to_string(),
            reason: "already opened".to_string(),
        })?;
        if path.as_os_str().is_empty() {
            return Err(MediaError::Open {
                path: String::new(),
                reason: "empty path".to_string(),
            });
        }
        if self.endless {
            let video = self
                .streams
                .iter()
                .find(|s| s.kind == crate::pipeline::types::MediaKind::Video)
                .map(|s| s.index)
                .unwrap_or(0);
            return Ok(Box::new(FakeSource::endless(self.streams.clone(), video)));
        }
        Ok(Box::new(FakeSource::new(self.streams.clone(), units)))
    }

    fn open_decoder(
        &self,
        stream: &StreamInfo,
        lookup: DecoderLookup<'_>,
    ) -> Result<Box<dyn VideoDecode>, MediaError> {
        let name = match lookup {
            DecoderLookup::ByName(name) => name.to_string(),
            DecoderLookup::ByCodec => stream.codec.clone(),
        };
        self.lookups.lock().push(name.clone());

        if matches!(lookup, DecoderLookup::ByName(_)) && !self.hardware_available {
            return Err(MediaError::NoDecoder(name));
        }
        Ok(Box::new(FakeDecoder::new(
            &name,
            self.decoded_geometry.clone(),
            self.decoder_delay,
        )))
    }

    fn build_converter(
        &self,
        source: &Geometry,
        destination: &Geometry,
        algorithm: ScaleAlgorithm,
        dither: DitherMode,
    ) -> Result<Box<dyn FrameConvert>, MediaError> {
        self.converters_built
            .lock()
            .push((destination.clone(), algorithm, dither));
        Ok(Box::new(FakeConverter {
            source: source.clone(),
        }))
    }
}
