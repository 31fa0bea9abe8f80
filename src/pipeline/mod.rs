//! Playback pipeline
//!
//! This module wires a media source to a panel through independently
//! threaded stages, separating concerns between:
//! - Control/Coordination: lifecycle state machine and ordered initialization
//! - Data Transport: bounded queues with shutdown-based cancellation
//! - Media Processing: route, decode, convert and display stages
//!
//! # Architecture
//!
//! ```text
//! source -> Router -> video queue -> DecodeStage -> frame queue
//!                  \-> audio queue (dropped when full)
//! frame queue -> ConvertStage -> frame queue -> DisplayStage -> panel
//! ```
//!
//! - Each stage runs on its own thread and implements `PipelineStage`
//! - The router never drops a video key unit; it waits for room instead
//! - Source and destination geometry are negotiated once, before any worker starts
//! - End of stream cascades: every stage drains its input, then shuts its output
//! - `PipelineHealth` counts routed, dropped, decoded and displayed items

pub mod convert_stage;
pub mod coordinator;
pub mod decode_stage;
pub mod display_stage;
pub mod error;
pub mod geometry;
pub mod health;
pub mod queue;
pub mod router_stage;
pub mod stage;
pub mod state;
pub mod types;

pub use coordinator::{PlayerCore, StopHandle};
pub use error::PipelineError;
pub use geometry::{Geometry, GeometryDescriptor, NegotiatedGeometry};
pub use health::PipelineHealth;
pub use queue::{BoundedQueue, FrameQueue, PacketQueue};
pub use stage::{PipelineStage, StageContext};
pub use state::{PipelineConfig, PipelineState, SharedState};
pub use types::{Frame, MediaKind, Packet, PixelFormat, StreamInfo};
