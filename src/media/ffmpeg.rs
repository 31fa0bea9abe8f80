//! Media engine backed by the system FFmpeg libraries through `ac-ffmpeg`
//!
//! Decoded pictures stay in FFmpeg's buffers: the decoder wraps them as the
//! frame's native payload and the converter scales them in place, whatever
//! their pixel format.
//!
//! Sample aspect ratio, stream disposition and the best-effort timestamp are
//! not exposed by the bindings, so every stream reports a 1:1 SAR and no
//! default flag, and decoded frames carry no best-effort pts.

use ac_ffmpeg::codec::video::scaler::{Algorithm, VideoFrameScaler};
use ac_ffmpeg::codec::video::{self, VideoDecoder, VideoFrame, VideoFrameMut};
use ac_ffmpeg::codec::{CodecParameters, Decoder};
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp};
use std::cell::RefCell;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use super::dither::MonoPacker;
use super::{
    DecodeError, DecoderLookup, DitherMode, FrameConvert, MediaEngine, MediaError, MediaSource,
    ScaleAlgorithm, VideoDecode,
};
use crate::pipeline::geometry::Geometry;
use crate::pipeline::types::{Frame, MediaKind, Packet, PixelFormat, Rational, StreamInfo};

fn codec_error(e: ac_ffmpeg::Error) -> MediaError {
    MediaError::Codec(e.to_string())
}

fn time_base(rational: Rational) -> TimeBase {
    TimeBase::new(rational.num, rational.den)
}

fn rational(time_base: TimeBase) -> Rational {
    Rational::new(time_base.num() as i32, time_base.den() as i32)
}

fn timestamp(ts: Timestamp) -> Option<i64> {
    (!ts.is_null()).then(|| ts.timestamp())
}

fn to_timestamp(value: Option<i64>, time_base: TimeBase) -> Timestamp {
    match value {
        Some(value) => Timestamp::new(value, time_base),
        None => Timestamp::null(),
    }
}

fn pixel_format(format: &PixelFormat) -> Result<video::PixelFormat, MediaError> {
    format
        .name()
        .parse::<video::PixelFormat>()
        .map_err(|_| MediaError::Unsupported(format!("pixel format {format}")))
}

fn scale_algorithm(algorithm: ScaleAlgorithm) -> Algorithm {
    match algorithm {
        ScaleAlgorithm::FastBilinear => Algorithm::FastBilinear,
        ScaleAlgorithm::Bilinear => Algorithm::Bilinear,
        ScaleAlgorithm::Bicubic => Algorithm::Bicubic,
        ScaleAlgorithm::Point => Algorithm::Point,
        ScaleAlgorithm::Area => Algorithm::Area,
        ScaleAlgorithm::Lanczos => Algorithm::Lanczos,
    }
}

/// Decoded picture travelling to the converter untouched
struct Picture(VideoFrame);

// SAFETY: a picture is only read, by one stage at a time, after the decoder
// has handed it over
unsafe impl Send for Picture {}
unsafe impl Sync for Picture {}

fn frame_from_ffmpeg(frame: VideoFrame) -> Frame {
    let format = PixelFormat::from_name(frame.pixel_format().name());
    let (width, height) = (frame.width() as u32, frame.height() as u32);
    let pts = timestamp(frame.pts());

    let mut out = Frame::native(width, height, format, Arc::new(Picture(frame)));
    out.pts = pts;
    out
}

/// Copy a plane-backed pipeline frame into a fresh FFmpeg frame
fn frame_to_ffmpeg(frame: &Frame) -> Result<VideoFrame, MediaError> {
    if !frame.format.has_layout() || frame.planes.len() != frame.format.plane_count() {
        return Err(MediaError::Unsupported(format!(
            "{} frame with {} planes",
            frame.format,
            frame.planes.len()
        )));
    }
    let format = pixel_format(&frame.format)?;
    let mut out = VideoFrameMut::black(format, frame.width as usize, frame.height as usize);

    {
        let mut planes = out.planes_mut();
        for (index, src) in frame.planes.iter().enumerate() {
            let row_bytes = frame.row_bytes(index);
            let dst = &mut planes[index];
            let dst_stride = dst.line_size();
            let data = dst.data_mut();
            for y in 0..frame.plane_rows(index) {
                data[y * dst_stride..y * dst_stride + row_bytes].copy_from_slice(src.row(y, row_bytes));
            }
        }
    }
    Ok(out.freeze())
}

/// Opened container
pub struct FfmpegSource {
    demuxer: DemuxerWithStreamInfo<File>,
    streams: Vec<StreamInfo>,
}

// SAFETY: the demuxer is owned by exactly one stage thread at a time
unsafe impl Send for FfmpegSource {}

impl MediaSource for FfmpegSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_unit(&mut self) -> Result<Option<Packet>, MediaError> {
        let Some(packet) = self.demuxer.take().map_err(codec_error)? else {
            return Ok(None);
        };

        let mut unit = Packet::new(packet.stream_index(), packet.data().to_vec());
        unit.pts = timestamp(packet.pts());
        unit.dts = timestamp(packet.dts());
        unit.is_key = packet.is_key();
        unit.time_base = rational(packet.time_base());
        Ok(Some(unit))
    }
}

pub struct FfmpegDecoder {
    name: String,
    decoder: VideoDecoder,
    geometry: Geometry,
    time_base: TimeBase,
}

// SAFETY: the codec context is owned by exactly one stage thread at a time
unsafe impl Send for FfmpegDecoder {}

impl VideoDecode for FfmpegDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> Geometry {
        self.geometry.clone()
    }

    fn push(&mut self, unit: &Packet) -> Result<(), DecodeError> {
        let packet = PacketMut::from(unit.data.as_ref())
            .with_time_base(self.time_base)
            .with_pts(to_timestamp(unit.pts, self.time_base))
            .with_dts(to_timestamp(unit.dts, self.time_base))
            .freeze();
        self.decoder
            .push(packet)
            .map_err(|e| DecodeError::Failed(e.to_string()))
    }

    fn take(&mut self) -> Result<Option<Frame>, DecodeError> {
        match self.decoder.take() {
            Ok(Some(frame)) => Ok(Some(frame_from_ffmpeg(frame))),
            Ok(None) => Err(DecodeError::Again),
            Err(e) => Err(DecodeError::Failed(e.to_string())),
        }
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        self.decoder
            .flush()
            .map_err(|e| DecodeError::Failed(e.to_string()))
    }
}

/// Scaler, with a software dithering pass for 1 bit targets
pub struct FfmpegConverter {
    scaler: VideoFrameScaler,
    destination: Geometry,
    dither: DitherMode,
}

// SAFETY: the scaler context is owned by exactly one stage thread at a time
unsafe impl Send for FfmpegConverter {}

impl FrameConvert for FfmpegConverter {
    fn convert(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), MediaError> {
        let picture = src.native.as_ref().and_then(|n| n.downcast_ref::<Picture>());
        let scaled = match picture {
            Some(Picture(frame)) => self.scaler.scale(frame),
            None => self.scaler.scale(&frame_to_ffmpeg(src)?),
        }
        .map_err(|e| MediaError::Converter(e.to_string()))?;
        let planes = scaled.planes();
        let plane = planes
            .first()
            .ok_or_else(|| MediaError::Converter("scaler returned no planes".to_string()))?;
        let (row_bytes, rows) = (dst.row_bytes(0), dst.height as usize);
        let out = dst
            .planes
            .first_mut()
            .ok_or_else(|| MediaError::Converter("destination has no planes".to_string()))?;

        if self.destination.format == PixelFormat::MonoBlack {
            MonoPacker {
                src: plane.data(),
                src_stride: plane.line_size(),
                width: self.destination.width as usize,
                height: rows,
            }
            .pack(self.dither, &mut out.data, out.stride);
            return Ok(());
        }

        for y in 0..rows {
            let start = y * plane.line_size();
            out.row_mut(y, row_bytes)
                .copy_from_slice(&plane.data()[start..start + row_bytes]);
        }
        Ok(())
    }
}

/// Production engine
///
/// Keeps the codec parameters of the last opened container so decoders can be
/// built for its streams.
pub struct FfmpegEngine {
    parameters: RefCell<Vec<CodecParameters>>,
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self {
            parameters: RefCell::new(Vec::new()),
        }
    }

    fn stream_info(index: usize, params: &CodecParameters, time_base: TimeBase) -> StreamInfo {
        let codec = params.decoder_name().unwrap_or("unknown");
        let mut info = if let Some(video) = params.as_video_codec_parameters() {
            StreamInfo::video(index, codec, video.width() as u32, video.height() as u32)
        } else if let Some(audio) = params.as_audio_codec_parameters() {
            StreamInfo::audio(index, codec, audio.sample_rate())
        } else if params.is_subtitle_codec() {
            StreamInfo::subtitle(index, codec)
        } else {
            let mut info = StreamInfo::subtitle(index, codec);
            info.kind = MediaKind::Other;
            info
        };
        info.time_base = rational(time_base);
        info
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for FfmpegEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>, MediaError> {
        let open_error = |reason: String| MediaError::Open {
            path: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| open_error(e.to_string()))?;
        let io = IO::from_seekable_read_stream(file);
        let demuxer = Demuxer::builder()
            .build(io)
            .map_err(|e| open_error(e.to_string()))?
            .find_stream_info(None)
            .map_err(|(_, e)| open_error(e.to_string()))?;

        let mut parameters = Vec::new();
        let mut streams = Vec::new();
        for (index, stream) in demuxer.streams().iter().enumerate() {
            let params = stream.codec_parameters();
            streams.push(Self::stream_info(index, &params, stream.time_base()));
            parameters.push(params);
        }
        if streams.is_empty() {
            return Err(MediaError::NoStream(path.display().to_string()));
        }

        *self.parameters.borrow_mut() = parameters;
        Ok(Box::new(FfmpegSource { demuxer, streams }))
    }

    fn open_decoder(
        &self,
        stream: &StreamInfo,
        lookup: DecoderLookup<'_>,
    ) -> Result<Box<dyn VideoDecode>, MediaError> {
        let parameters = self.parameters.borrow();
        let params = parameters
            .get(stream.index)
            .and_then(|p| p.as_video_codec_parameters())
            .ok_or_else(|| MediaError::NoDecoder(format!("stream {} is not video", stream.index)))?;

        let builder = match lookup {
            DecoderLookup::ByName(name) => VideoDecoder::builder(name),
            DecoderLookup::ByCodec => VideoDecoder::from_codec_parameters(params),
        }
        .map_err(|e| MediaError::NoDecoder(e.to_string()))?;

        let time_base = time_base(stream.time_base);
        let decoder = builder
            .extradata(params.extradata())
            .time_base(time_base)
            .build()
            .map_err(|e| MediaError::NoDecoder(e.to_string()))?;

        let name = match lookup {
            DecoderLookup::ByName(name) => name.to_string(),
            DecoderLookup::ByCodec => stream.codec.clone(),
        };
        let geometry = Geometry::new(
            params.width() as u32,
            params.height() as u32,
            PixelFormat::from_name(params.pixel_format().name()),
        );

        Ok(Box::new(FfmpegDecoder {
            name,
            decoder,
            geometry,
            time_base,
        }))
    }

    fn build_converter(
        &self,
        source: &Geometry,
        destination: &Geometry,
        algorithm: ScaleAlgorithm,
        dither: DitherMode,
    ) -> Result<Box<dyn FrameConvert>, MediaError> {
        // 1 bit targets are scaled to gray and dithered here
        let target = match destination.format {
            PixelFormat::MonoBlack => PixelFormat::Gray8,
            ref other => other.clone(),
        };

        let scaler = VideoFrameScaler::builder()
            .source_pixel_format(pixel_format(&source.format)?)
            .source_width(source.width as usize)
            .source_height(source.height as usize)
            .target_pixel_format(pixel_format(&target)?)
            .target_width(destination.width as usize)
            .target_height(destination.height as usize)
            .algorithm(scale_algorithm(algorithm))
            .build()
            .map_err(|e| MediaError::Converter(e.to_string()))?;

        Ok(Box::new(FfmpegConverter {
            scaler,
            destination: destination.clone(),
            dither,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black(format: &str, width: usize, height: usize) -> VideoFrame {
        let format = format.parse::<video::PixelFormat>().unwrap();
        VideoFrameMut::black(format, width, height).freeze()
    }

    #[test]
    fn test_decoded_frame_stays_in_engine_buffer() {
        let frame = frame_from_ffmpeg(black("yuv422p", 64, 48));
        assert_eq!(frame.format, PixelFormat::Yuv422p);
        assert_eq!((frame.width, frame.height), (64, 48));
        assert!(frame.planes.is_empty());

        let picture = frame.native.as_ref().and_then(|n| n.downcast_ref::<Picture>());
        assert!(picture.is_some());
    }

    #[test]
    fn test_scales_subsampled_and_deep_sources() {
        let engine = FfmpegEngine::new();
        for format in ["yuv422p", "yuv420p10le"] {
            let source = Geometry::new(64, 48, PixelFormat::from_name(format));
            let destination = Geometry::new(32, 24, PixelFormat::Gray8);
            let mut converter = engine
                .build_converter(&source, &destination, ScaleAlgorithm::Bicubic, DitherMode::None)
                .unwrap();

            let src = frame_from_ffmpeg(black(format, 64, 48));
            let mut dst = Frame::alloc(32, 24, PixelFormat::Gray8, 32).unwrap();
            dst.planes[0].data.fill(0xAA);
            converter.convert(&src, &mut dst).unwrap();
            for y in [0, 23] {
                assert!(dst.planes[0].row(y, 32).iter().all(|b| *b < 8), "{format}");
            }
        }
    }

    #[test]
    fn test_plane_less_frame_is_refused() {
        let opaque = Frame::native(
            8,
            8,
            PixelFormat::from_name("p010le"),
            std::sync::Arc::new(0u8),
        );
        assert!(matches!(frame_to_ffmpeg(&opaque), Err(MediaError::Unsupported(_))));
    }

    #[test]
    fn test_unit_timestamps_forwarded() {
        let time_base = TimeBase::new(1, 90_000);
        assert_eq!(to_timestamp(Some(3003), time_base).timestamp(), 3003);
        assert!(to_timestamp(None, time_base).is_null());
    }
}
