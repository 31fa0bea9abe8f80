//! Router stage: reads compressed units from the source and dispatches them
//! to the per-stream queues.
//!
//! Drop policy on a full queue:
//! - video non-key units are dropped with a warning
//! - video key units wait for room, so decoding can always resume cleanly
//! - audio units are always dropped
//!
//! Units from streams that were not selected are ignored.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use thiserror::Error;

use super::queue::{PacketQueue, TryPushError};
use super::stage::{PipelineStage, StageContext};
use super::types::{MediaKind, Packet, StreamInfo};
use crate::media::MediaSource;

/// Bonus for streams the container marks as default
const DEFAULT_STREAM_BONUS: i64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no decodable video or audio stream")]
pub struct NoPlayableStream;

/// Preference score of a stream within its kind; `None` if never selectable
pub fn stream_score(stream: &StreamInfo) -> Option<i64> {
    let base = if stream.is_default {
        DEFAULT_STREAM_BONUS
    } else {
        0
    };
    match stream.kind {
        MediaKind::Video => Some(base + (stream.width as i64 * stream.height as i64) / 100),
        MediaKind::Audio => Some(base + stream.sample_rate as i64 / 1000),
        MediaKind::Subtitle => Some(base),
        MediaKind::Other => None,
    }
}

/// Best stream index per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSelection {
    pub video: Option<usize>,
    pub audio: Option<usize>,
    pub subtitle: Option<usize>,
}

fn best_of(streams: &[StreamInfo], kind: MediaKind) -> Option<usize> {
    let mut best: Option<(i64, usize)> = None;
    for stream in streams.iter().filter(|s| s.kind == kind) {
        let Some(score) = stream_score(stream) else {
            continue;
        };
        // first stream wins ties
        if best.is_none_or(|(top, _)| score > top) {
            best = Some((score, stream.index));
        }
    }
    best.map(|(_, index)| index)
}

/// Pick the highest scoring video, audio and subtitle streams
///
/// Fails only when neither a video nor an audio stream exists.
pub fn select_streams(streams: &[StreamInfo]) -> Result<StreamSelection, NoPlayableStream> {
    let selection = StreamSelection {
        video: best_of(streams, MediaKind::Video),
        audio: best_of(streams, MediaKind::Audio),
        subtitle: best_of(streams, MediaKind::Subtitle),
    };
    if selection.video.is_none() && selection.audio.is_none() {
        return Err(NoPlayableStream);
    }
    Ok(selection)
}

/// What happened to one routed unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued without waiting
    Queued,
    /// Key unit queued after waiting for room
    QueuedAfterWait,
    Dropped,
    /// Not from a selected stream
    Ignored,
    /// The video queue was shut down
    Closed,
}

/// Dispatches units to the stream queues according to the drop policy
pub struct Router {
    selection: StreamSelection,
    video: Arc<PacketQueue>,
    audio: Arc<PacketQueue>,
    ctx: StageContext,
}

impl Router {
    pub fn new(
        selection: StreamSelection,
        video: Arc<PacketQueue>,
        audio: Arc<PacketQueue>,
        ctx: StageContext,
    ) -> Self {
        Self {
            selection,
            video,
            audio,
            ctx,
        }
    }

    pub fn route(&self, unit: Packet) -> RouteOutcome {
        let index = Some(unit.stream_index);
        if index == self.selection.video {
            self.route_video(unit)
        } else if index == self.selection.audio {
            self.route_audio(unit)
        } else {
            RouteOutcome::Ignored
        }
    }

    fn route_video(&self, unit: Packet) -> RouteOutcome {
        let (size, is_key) = (unit.size(), unit.is_key);
        match self.video.try_push(unit) {
            Ok(()) => {
                self.ctx.health.record_unit(size, is_key);
                RouteOutcome::Queued
            }
            Err(TryPushError::Full(unit)) if unit.is_key => match self.video.push(unit) {
                Ok(()) => {
                    self.ctx.health.record_unit(size, is_key);
                    RouteOutcome::QueuedAfterWait
                }
                Err(_) => RouteOutcome::Closed,
            },
            Err(TryPushError::Full(unit)) => {
                warn!(
                    "Router: video queue full, dropped non-key unit (pts={:?})",
                    unit.pts
                );
                self.ctx.health.record_unit_drop();
                RouteOutcome::Dropped
            }
            Err(TryPushError::Shutdown(_)) => RouteOutcome::Closed,
        }
    }

    fn route_audio(&self, unit: Packet) -> RouteOutcome {
        let (size, is_key) = (unit.size(), unit.is_key);
        match self.audio.try_push(unit) {
            Ok(()) => {
                self.ctx.health.record_unit(size, is_key);
                RouteOutcome::Queued
            }
            Err(err) => {
                if err.is_full() {
                    debug!(
                        "Router: audio queue full, dropped unit (pts={:?})",
                        err.into_inner().pts
                    );
                }
                self.ctx.health.record_audio_drop();
                RouteOutcome::Dropped
            }
        }
    }

    /// Signal end of stream downstream
    pub fn close(&self) {
        self.video.shutdown();
        self.audio.shutdown();
    }
}

/// Router stage: source reader feeding the stream queues
pub struct RouterStage {
    source: Box<dyn MediaSource>,
    router: Router,
    ctx: StageContext,
}

impl RouterStage {
    pub fn new(source: Box<dyn MediaSource>, router: Router, ctx: StageContext) -> Self {
        Self {
            source,
            router,
            ctx,
        }
    }
}

impl PipelineStage for RouterStage {
    fn run(&mut self) -> Result<()> {
        let mut routed = 0u64;
        let mut dropped = 0u64;

        info!("Router: started");

        while self.ctx.state.is_running() {
            let unit = match self.source.read_unit() {
                Ok(Some(unit)) => unit,
                Ok(None) => {
                    info!("Router: end of stream");
                    self.ctx.state.set_eof(true);
                    break;
                }
                Err(e) => {
                    error!("Router: read failed: {}", e);
                    self.ctx.state.set_eof(true);
                    break;
                }
            };

            match self.router.route(unit) {
                RouteOutcome::Queued | RouteOutcome::QueuedAfterWait => routed += 1,
                RouteOutcome::Dropped => dropped += 1,
                RouteOutcome::Ignored => {}
                RouteOutcome::Closed => {
                    info!("Router: video queue closed");
                    break;
                }
            }
        }

        self.router.close();
        info!("Router: finished ({} routed, {} dropped)", routed, dropped);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Router"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::FakeSource;
    use crate::pipeline::queue::BoundedQueue;
    use std::thread;
    use std::time::Duration;

    fn router(capacity: usize) -> (Router, Arc<PacketQueue>, Arc<PacketQueue>, StageContext) {
        let video = Arc::new(BoundedQueue::new(capacity));
        let audio = Arc::new(BoundedQueue::new(capacity));
        let ctx = StageContext::new();
        let selection = StreamSelection {
            video: Some(0),
            audio: Some(1),
            subtitle: None,
        };
        (
            Router::new(selection, video.clone(), audio.clone(), ctx.clone()),
            video,
            audio,
            ctx,
        )
    }

    fn unit(stream: usize, pts: i64, key: bool) -> Packet {
        Packet::new(stream, vec![0u8; 4]).with_pts(pts).with_key(key)
    }

    #[test]
    fn test_scores() {
        let video = StreamInfo::video(0, "h264", 1920, 1080);
        assert_eq!(stream_score(&video), Some(20736));
        assert_eq!(stream_score(&video.clone().with_default(true)), Some(20836));

        let audio = StreamInfo::audio(1, "aac", 48000);
        assert_eq!(stream_score(&audio), Some(48));

        let subtitle = StreamInfo::subtitle(2, "srt").with_default(true);
        assert_eq!(stream_score(&subtitle), Some(100));
    }

    #[test]
    fn test_selects_best_per_kind() {
        let streams = vec![
            StreamInfo::video(0, "h264", 640, 360),
            StreamInfo::video(1, "h264", 1280, 720),
            StreamInfo::audio(2, "aac", 44100),
            StreamInfo::audio(3, "aac", 22050).with_default(true),
            StreamInfo::subtitle(4, "srt"),
        ];
        let selection = select_streams(&streams).unwrap();
        assert_eq!(selection.video, Some(1));
        assert_eq!(selection.audio, Some(3));
        assert_eq!(selection.subtitle, Some(4));
    }

    #[test]
    fn test_first_stream_wins_tie() {
        let streams = vec![
            StreamInfo::video(3, "h264", 320, 240),
            StreamInfo::video(5, "hevc", 320, 240),
        ];
        assert_eq!(select_streams(&streams).unwrap().video, Some(3));
    }

    #[test]
    fn test_audio_only_is_playable() {
        let streams = vec![StreamInfo::audio(0, "mp3", 44100)];
        let selection = select_streams(&streams).unwrap();
        assert_eq!(selection.video, None);
        assert_eq!(selection.audio, Some(0));
    }

    #[test]
    fn test_no_playable_stream() {
        assert_eq!(select_streams(&[]), Err(NoPlayableStream));
        let streams = vec![StreamInfo::subtitle(0, "srt")];
        assert_eq!(select_streams(&streams), Err(NoPlayableStream));
    }

    #[test]
    fn test_full_queue_drops_non_key_video() {
        let (router, video, _, ctx) = router(2);
        assert_eq!(router.route(unit(0, 1, true)), RouteOutcome::Queued);
        assert_eq!(router.route(unit(0, 2, false)), RouteOutcome::Queued);
        assert_eq!(router.route(unit(0, 3, false)), RouteOutcome::Dropped);
        assert_eq!(video.len(), 2);
        assert_eq!(ctx.health.unit_drops(), 1);
    }

    #[test]
    fn test_full_queue_blocks_key_video() {
        let (router, video, _, _) = router(1);
        router.route(unit(0, 1, false));

        let consumer = {
            let video = video.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                video.pop()
            })
        };
        assert_eq!(router.route(unit(0, 2, true)), RouteOutcome::QueuedAfterWait);
        assert_eq!(consumer.join().unwrap().and_then(|u| u.pts), Some(1));
        assert_eq!(video.pop().and_then(|u| u.pts), Some(2));
    }

    #[test]
    fn test_full_queue_always_drops_audio() {
        let (router, _, audio, ctx) = router(1);
        assert_eq!(router.route(unit(1, 1, true)), RouteOutcome::Queued);
        assert_eq!(router.route(unit(1, 2, true)), RouteOutcome::Dropped);
        assert_eq!(audio.len(), 1);
        assert_eq!(ctx.health.audio_drops(), 1);
    }

    #[test]
    fn test_unselected_stream_ignored() {
        let (router, video, audio, _) = router(4);
        assert_eq!(router.route(unit(7, 1, true)), RouteOutcome::Ignored);
        assert!(video.is_empty() && audio.is_empty());
    }

    #[test]
    fn test_shutdown_queue_reports_closed() {
        let (router, video, _, _) = router(4);
        video.shutdown();
        assert_eq!(router.route(unit(0, 1, true)), RouteOutcome::Closed);
    }

    #[test]
    fn test_stage_routes_until_eof_then_closes() {
        let (router, video, audio, ctx) = router(8);
        ctx.state.set_running(true);
        let streams = vec![
            StreamInfo::video(0, "h264", 320, 240),
            StreamInfo::audio(1, "aac", 48000),
        ];
        let units = vec![unit(0, 1, true), unit(1, 1, true), unit(2, 1, true), unit(0, 2, false)];
        let mut stage = RouterStage::new(Box::new(FakeSource::new(streams, units)), router, ctx.clone());
        stage.run().unwrap();

        assert!(ctx.state.is_eof());
        assert!(video.is_shutdown() && audio.is_shutdown());
        assert_eq!(video.len(), 2);
        assert_eq!(audio.len(), 1);
        assert_eq!(ctx.health.units_routed(), 3);
    }
}
