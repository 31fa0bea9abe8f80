//! Media engine abstraction
//!
//! The pipeline never talks to a codec library directly. It goes through
//! three capabilities provided by a [`MediaEngine`]:
//! - [`MediaSource`]: container demuxing into compressed units
//! - [`VideoDecode`]: compressed units in, raw frames out
//! - [`FrameConvert`]: scale and re-pack a raw frame into the display layout
//!
//! The production engine lives in [`ffmpeg`] behind the `ffmpeg` feature.

pub mod dither;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;
use thiserror::Error;

use crate::pipeline::geometry::Geometry;
use crate::pipeline::types::{Frame, Packet, StreamInfo};

/// Hardware decoders tried by name before falling back to software decoding
pub const HARDWARE_DECODERS: &[(&str, &str)] = &[
    ("h264", "h264_v4l2m2m"),
    ("hevc", "hevc_v4l2m2m"),
    ("mpeg4", "mpeg4_v4l2m2m"),
    ("vp8", "vp8_v4l2m2m"),
    ("vp9", "vp9_v4l2m2m"),
];

/// Name of the hardware decoder for `codec`, if one is known
pub fn hardware_decoder_name(codec: &str) -> Option<&'static str> {
    HARDWARE_DECODERS
        .iter()
        .find(|(name, _)| *name == codec)
        .map(|(_, decoder)| *decoder)
}

/// Scaling filter used when resizing frames
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAlgorithm {
    FastBilinear = 0,
    Bilinear = 1,
    Bicubic = 2,
    Point = 3,
    Area = 4,
    Lanczos = 5,
}

impl ScaleAlgorithm {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ScaleAlgorithm::FastBilinear,
            1 => ScaleAlgorithm::Bilinear,
            3 => ScaleAlgorithm::Point,
            4 => ScaleAlgorithm::Area,
            5 => ScaleAlgorithm::Lanczos,
            _ => ScaleAlgorithm::Bicubic,
        }
    }
}

/// How gray levels are reduced to one bit per pixel
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DitherMode {
    /// Fixed threshold at mid gray
    None = 0,
    /// Ordered 4x4 Bayer matrix
    Bayer = 1,
    /// Floyd-Steinberg error diffusion
    ErrorDiffusion = 2,
}

impl DitherMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => DitherMode::None,
            2 => DitherMode::ErrorDiffusion,
            _ => DitherMode::Bayer,
        }
    }
}

/// How a decoder should be located
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderLookup<'a> {
    /// A specific decoder implementation
    ByName(&'a str),
    /// Whatever decoder the engine picks for the stream's codec
    ByCodec,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("{0} has no streams")]
    NoStream(String),

    #[error("no decoder available: {0}")]
    NoDecoder(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("converter error: {0}")]
    Converter(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result of pushing into or pulling from a decoder
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Decoder needs its pending output drained (push) or more input (take)
    #[error("decoder not ready, try again")]
    Again,
    #[error("decode failed: {0}")]
    Failed(String),
}

/// Opened container
pub trait MediaSource: Send {
    /// Every stream the container exposes
    fn streams(&self) -> &[StreamInfo];

    /// Next compressed unit; `Ok(None)` at end of stream
    fn read_unit(&mut self) -> Result<Option<Packet>, MediaError>;
}

/// Push/pull video decoder
pub trait VideoDecode: Send {
    fn name(&self) -> &str;

    /// Geometry of the decoded pictures
    fn geometry(&self) -> Geometry;

    fn push(&mut self, unit: &Packet) -> Result<(), DecodeError>;

    /// Next decoded frame, `Ok(None)` once nothing more is pending
    fn take(&mut self) -> Result<Option<Frame>, DecodeError>;

    /// Signal end of stream so buffered frames can be taken
    fn flush(&mut self) -> Result<(), DecodeError>;
}

/// Frame scaler and pixel-format converter
pub trait FrameConvert: Send {
    /// Convert `src` into the preallocated `dst`
    fn convert(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), MediaError>;
}

pub trait MediaEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>, MediaError>;

    fn open_decoder(
        &self,
        stream: &StreamInfo,
        lookup: DecoderLookup<'_>,
    ) -> Result<Box<dyn VideoDecode>, MediaError>;

    fn build_converter(
        &self,
        source: &Geometry,
        destination: &Geometry,
        algorithm: ScaleAlgorithm,
        dither: DitherMode,
    ) -> Result<Box<dyn FrameConvert>, MediaError>;
}

/// Engine compiled into this binary
pub fn default_engine() -> Result<Box<dyn MediaEngine>, MediaError> {
    #[cfg(feature = "ffmpeg")]
    {
        Ok(Box::new(ffmpeg::FfmpegEngine::new()))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Err(MediaError::Unsupported(
            "built without the `ffmpeg` feature".to_string(),
        ))
    }
}
