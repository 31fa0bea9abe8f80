//! Core types for the pipeline system

use bytes::Bytes;
use std::any::Any;
use std::collections::TryReserveError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Rational number used for time bases and sample aspect ratios
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Both terms strictly positive
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Video stream
    Video,
    /// Audio stream
    Audio,
    /// Subtitle stream
    Subtitle,
    /// Data, attachments and anything else the source exposes
    Other,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
            MediaKind::Subtitle => write!(f, "Subtitle"),
            MediaKind::Other => write!(f, "Other"),
        }
    }
}

/// Description of one elementary stream as enumerated by a media source
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Index used by compressed units to refer to this stream
    pub index: usize,
    pub kind: MediaKind,
    /// Codec short name (`h264`, `aac`, ...)
    pub codec: String,
    /// Coded width, video only
    pub width: u32,
    /// Coded height, video only
    pub height: u32,
    /// Sample rate in Hz, audio only
    pub sample_rate: u32,
    /// Container marks this stream as the default of its kind
    pub is_default: bool,
    pub time_base: Rational,
}

impl StreamInfo {
    pub fn video(index: usize, codec: &str, width: u32, height: u32) -> Self {
        Self {
            index,
            kind: MediaKind::Video,
            codec: codec.to_string(),
            width,
            height,
            sample_rate: 0,
            is_default: false,
            time_base: Rational::new(1, 90_000),
        }
    }

    pub fn audio(index: usize, codec: &str, sample_rate: u32) -> Self {
        Self {
            index,
            kind: MediaKind::Audio,
            codec: codec.to_string(),
            width: 0,
            height: 0,
            sample_rate,
            is_default: false,
            time_base: Rational::new(1, sample_rate.max(1) as i32),
        }
    }

    pub fn subtitle(index: usize, codec: &str) -> Self {
        Self {
            index,
            kind: MediaKind::Subtitle,
            codec: codec.to_string(),
            width: 0,
            height: 0,
            sample_rate: 0,
            is_default: false,
            time_base: Rational::new(1, 1000),
        }
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }
}

/// Compressed media unit read from the source
///
/// Timestamps are expressed in the stream time base and are `None` when the
/// container does not carry them.
#[derive(Clone)]
pub struct Packet {
    /// Stream this unit belongs to
    pub stream_index: usize,

    /// Compressed payload
    pub data: Bytes,

    /// Presentation timestamp
    pub pts: Option<i64>,

    /// Decode timestamp
    pub dts: Option<i64>,

    /// Key unit (decodable without prior units)
    pub is_key: bool,

    pub time_base: Rational,
}

impl Packet {
    pub fn new(stream_index: usize, data: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            data: data.into(),
            pts: None,
            dts: None,
            is_key: false,
            time_base: Rational::default(),
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("stream_index", &self.stream_index)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("is_key", &self.is_key)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Pixel layout of a raw frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, three planes
    Yuv420p,
    /// Full-range planar YUV 4:2:0 (JPEG)
    Yuvj420p,
    /// Planar YUV 4:2:2
    Yuv422p,
    /// Planar YUV 4:4:4
    Yuv444p,
    /// Planar YUV 4:2:0, 10 bits in 16 bit little endian samples
    Yuv420p10le,
    /// Semi-planar YUV 4:2:0, luma plus interleaved chroma
    Nv12,
    /// 8 bit luma only
    Gray8,
    /// 1 bit per pixel packed MSB first, set bit is white
    MonoBlack,
    /// 16 bit RGB 5:6:5 big endian
    Rgb565Be,
    /// 24 bit packed RGB
    Rgb24,
    /// Any other layout, by its canonical name
    ///
    /// The pipeline cannot address its planes; only the engine that produced
    /// it can.
    Other(String),
}

/// How a format spreads its samples over planes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// One plane, `bits` per pixel
    Packed { bits: usize },
    /// Luma plane plus two chroma planes subsampled by `1 << shift`
    Planar {
        shift_x: u32,
        shift_y: u32,
        sample_bytes: usize,
    },
    /// Luma plane plus one plane of interleaved chroma pairs
    SemiPlanar { shift_x: u32, shift_y: u32 },
}

fn subsampled(len: usize, shift: u32) -> usize {
    (len + (1 << shift) - 1) >> shift
}

impl PixelFormat {
    pub fn name(&self) -> &str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuvj420p => "yuvj420p",
            PixelFormat::Yuv422p => "yuv422p",
            PixelFormat::Yuv444p => "yuv444p",
            PixelFormat::Yuv420p10le => "yuv420p10le",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Gray8 => "gray",
            PixelFormat::MonoBlack => "monob",
            PixelFormat::Rgb565Be => "rgb565be",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Other(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "yuv420p" => PixelFormat::Yuv420p,
            "yuvj420p" => PixelFormat::Yuvj420p,
            "yuv422p" => PixelFormat::Yuv422p,
            "yuv444p" => PixelFormat::Yuv444p,
            "yuv420p10le" => PixelFormat::Yuv420p10le,
            "nv12" => PixelFormat::Nv12,
            "gray" | "gray8" => PixelFormat::Gray8,
            "monob" => PixelFormat::MonoBlack,
            "rgb565be" => PixelFormat::Rgb565Be,
            "rgb24" => PixelFormat::Rgb24,
            other => PixelFormat::Other(other.to_string()),
        }
    }

    fn layout(&self) -> Option<Layout> {
        let planar = |shift_x, shift_y, sample_bytes| Layout::Planar {
            shift_x,
            shift_y,
            sample_bytes,
        };
        match self {
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p => Some(planar(1, 1, 1)),
            PixelFormat::Yuv422p => Some(planar(1, 0, 1)),
            PixelFormat::Yuv444p => Some(planar(0, 0, 1)),
            PixelFormat::Yuv420p10le => Some(planar(1, 1, 2)),
            PixelFormat::Nv12 => Some(Layout::SemiPlanar {
                shift_x: 1,
                shift_y: 1,
            }),
            PixelFormat::Other(_) => None,
            packed => packed.packed_bits().map(|bits| Layout::Packed { bits }),
        }
    }

    /// Whether the pipeline knows where this format keeps its samples
    pub fn has_layout(&self) -> bool {
        self.layout().is_some()
    }

    /// Bits per pixel for packed single-plane layouts
    pub fn packed_bits(&self) -> Option<usize> {
        match self {
            PixelFormat::Gray8 => Some(8),
            PixelFormat::MonoBlack => Some(1),
            PixelFormat::Rgb565Be => Some(16),
            PixelFormat::Rgb24 => Some(24),
            _ => None,
        }
    }

    /// Meaningful bytes in one row of `width` pixels of plane `plane`
    fn plane_row_bytes(&self, plane: usize, width: usize) -> usize {
        let Some(layout) = self.layout() else {
            return 0;
        };
        match (layout, plane) {
            (Layout::Packed { bits }, _) => (width * bits).div_ceil(8),
            (Layout::Planar { sample_bytes, .. }, 0) => width * sample_bytes,
            (Layout::Planar { shift_x, sample_bytes, .. }, _) => subsampled(width, shift_x) * sample_bytes,
            (Layout::SemiPlanar { .. }, 0) => width,
            (Layout::SemiPlanar { shift_x, .. }, _) => subsampled(width, shift_x) * 2,
        }
    }

    fn plane_rows(&self, plane: usize, height: usize) -> usize {
        match self.layout() {
            None => 0,
            Some(Layout::Planar { shift_y, .. } | Layout::SemiPlanar { shift_y, .. }) if plane > 0 => {
                subsampled(height, shift_y)
            }
            Some(_) => height,
        }
    }

    /// Planes the format stores, 0 when the layout is unknown
    pub fn plane_count(&self) -> usize {
        match self.layout() {
            Some(Layout::Packed { .. }) => 1,
            Some(Layout::Planar { .. }) => 3,
            Some(Layout::SemiPlanar { .. }) => 2,
            None => 0,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One image plane with its row stride in bytes
#[derive(Clone, Default)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

impl Plane {
    pub fn row(&self, y: usize, len: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + len]
    }

    pub fn row_mut(&mut self, y: usize, len: usize) -> &mut [u8] {
        let start = y * self.stride;
        &mut self.data[start..start + len]
    }
}

/// Picture storage owned by a media engine
///
/// Handed from the decoder to the converter of the same engine without being
/// copied or inspected by the stages in between.
pub type NativeFrame = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Error)]
pub enum FrameAllocError {
    #[error("no plane layout for pixel format {0}")]
    UnknownLayout(String),

    #[error(transparent)]
    Reserve(#[from] TryReserveError),
}

/// Raw picture, either decoded or converted for the display
///
/// `pts` is the presentation timestamp the pipeline carries forward; decoders
/// also report a `best_effort_pts` used when the primary one is missing.
/// Engine-decoded frames may leave `planes` empty and keep their pixels in
/// `native`.
#[derive(Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    pub native: Option<NativeFrame>,
    pub pts: Option<i64>,
    pub best_effort_pts: Option<i64>,
}

impl Frame {
    /// Frame whose pixels stay inside the engine
    pub fn native(width: u32, height: u32, format: PixelFormat, native: NativeFrame) -> Self {
        Self {
            width,
            height,
            format,
            planes: Vec::new(),
            native: Some(native),
            pts: None,
            best_effort_pts: None,
        }
    }

    /// Allocate a zeroed frame whose plane strides are rounded up to `align`
    ///
    /// Allocation is fallible so callers can treat exhaustion as an error
    /// instead of aborting.
    pub fn alloc(
        width: u32,
        height: u32,
        format: PixelFormat,
        align: usize,
    ) -> Result<Self, FrameAllocError> {
        if !format.has_layout() {
            return Err(FrameAllocError::UnknownLayout(format.name().to_string()));
        }
        let align = align.max(1);
        let mut planes = Vec::new();
        planes.try_reserve_exact(format.plane_count())?;

        for index in 0..format.plane_count() {
            let row = format.plane_row_bytes(index, width as usize);
            let stride = row.div_ceil(align) * align;
            let len = stride * format.plane_rows(index, height as usize);

            let mut data = Vec::new();
            data.try_reserve_exact(len)?;
            data.resize(len, 0);
            planes.push(Plane { data, stride });
        }

        Ok(Self {
            width,
            height,
            format,
            planes,
            native: None,
            pts: None,
            best_effort_pts: None,
        })
    }

    /// Bytes of meaningful pixel data per row of plane `index`
    pub fn row_bytes(&self, index: usize) -> usize {
        self.format.plane_row_bytes(index, self.width as usize)
    }

    /// Rows in plane `index`
    pub fn plane_rows(&self, index: usize) -> usize {
        self.format.plane_rows(index, self.height as usize)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("planes", &self.planes.len())
            .field("native", &self.native.is_some())
            .field("pts", &self.pts)
            .field("best_effort_pts", &self.best_effort_pts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_aligns_stride() {
        let frame = Frame::alloc(85, 64, PixelFormat::MonoBlack, 32).unwrap();
        assert_eq!(frame.planes.len(), 1);
        assert_eq!(frame.row_bytes(0), 11);
        assert_eq!(frame.planes[0].stride, 32);
        assert_eq!(frame.planes[0].data.len(), 32 * 64);
        assert!(frame.planes[0].data.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_alloc_planar_layout() {
        let frame = Frame::alloc(33, 17, PixelFormat::Yuv420p, 32).unwrap();
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.planes[0].stride, 64);
        assert_eq!(frame.planes[1].stride, 32);
        assert_eq!(frame.plane_rows(1), 9);
        assert_eq!(frame.planes[2].data.len(), 32 * 9);
    }

    #[test]
    fn test_alloc_subsampled_layouts() {
        let yuv422 = Frame::alloc(64, 48, PixelFormat::Yuv422p, 1).unwrap();
        assert_eq!(yuv422.planes.len(), 3);
        assert_eq!((yuv422.row_bytes(1), yuv422.plane_rows(1)), (32, 48));

        let yuv444 = Frame::alloc(64, 48, PixelFormat::Yuv444p, 1).unwrap();
        assert_eq!((yuv444.row_bytes(2), yuv444.plane_rows(2)), (64, 48));

        let jpeg = Frame::alloc(64, 48, PixelFormat::from_name("yuvj420p"), 1).unwrap();
        assert_eq!(jpeg.planes.len(), 3);
        assert_eq!((jpeg.row_bytes(1), jpeg.plane_rows(1)), (32, 24));

        let nv12 = Frame::alloc(33, 17, PixelFormat::Nv12, 1).unwrap();
        assert_eq!((nv12.row_bytes(1), nv12.plane_rows(1)), (34, 9));
    }

    #[test]
    fn test_alloc_ten_bit_samples() {
        let frame = Frame::alloc(64, 48, PixelFormat::from_name("yuv420p10le"), 1).unwrap();
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.row_bytes(0), 128);
        assert_eq!(frame.row_bytes(1), 64);
        assert_eq!(frame.plane_rows(2), 24);
        assert_eq!(frame.planes[0].data.len(), 128 * 48);
    }

    #[test]
    fn test_unknown_layout_is_refused() {
        let format = PixelFormat::from_name("p010le");
        assert!(!format.has_layout());
        assert_eq!(format.plane_count(), 0);
        let err = Frame::alloc(64, 48, format, 32).unwrap_err();
        assert!(matches!(err, FrameAllocError::UnknownLayout(ref name) if name == "p010le"));
    }

    #[test]
    fn test_native_frame_keeps_payload() {
        let frame = Frame::native(64, 48, PixelFormat::from_name("p010le"), Arc::new(7u32));
        assert!(frame.planes.is_empty());
        let copy = frame.clone();
        let payload = copy.native.as_ref().and_then(|n| n.downcast_ref::<u32>());
        assert_eq!(payload, Some(&7));
    }

    #[test]
    fn test_rgb565_row_bytes() {
        let frame = Frame::alloc(128, 2, PixelFormat::Rgb565Be, 32).unwrap();
        assert_eq!(frame.row_bytes(0), 256);
        assert_eq!(frame.planes[0].stride, 256);
    }

    #[test]
    fn test_pixel_format_names() {
        for format in [
            PixelFormat::Yuv420p,
            PixelFormat::Yuvj420p,
            PixelFormat::Yuv422p,
            PixelFormat::Yuv444p,
            PixelFormat::Yuv420p10le,
            PixelFormat::Nv12,
            PixelFormat::Gray8,
            PixelFormat::MonoBlack,
            PixelFormat::Rgb565Be,
            PixelFormat::Rgb24,
        ] {
            assert_eq!(PixelFormat::from_name(format.name()), format);
        }
        assert_eq!(
            PixelFormat::from_name("p010le"),
            PixelFormat::Other("p010le".to_string())
        );
    }

    #[test]
    fn test_rational_validity() {
        assert!(Rational::new(1, 1).is_valid());
        assert!(!Rational::new(0, 1).is_valid());
        assert!(!Rational::new(1, 0).is_valid());
        assert!((Rational::new(4, 3).as_f64() - 1.3333).abs() < 1e-3);
    }
}
