//! Pipeline stage trait and worker threads
//!
//! Each stage owns its loop and runs on a dedicated named thread. Stages
//! communicate only through [`BoundedQueue`](super::queue::BoundedQueue)s and
//! the shared [`StageContext`].

use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::geometry::NegotiatedGeometry;
use super::health::PipelineHealth;
use super::state::{PipelineConfig, SharedState};

/// Trait for pipeline stages that process media data
pub trait PipelineStage: Send {
    /// Run the stage until its input ends or the pipeline stops
    fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;
}

/// State shared by every stage of one player
#[derive(Clone)]
pub struct StageContext {
    pub state: Arc<SharedState>,
    pub config: Arc<PipelineConfig>,
    pub geometry: Arc<NegotiatedGeometry>,
    pub health: Arc<PipelineHealth>,
}

impl StageContext {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SharedState::new()),
            config: Arc::new(PipelineConfig::new()),
            geometry: Arc::new(NegotiatedGeometry::new()),
            health: Arc::new(PipelineHealth::new()),
        }
    }
}

impl Default for StageContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Running stage worker
pub struct StageHandle {
    name: &'static str,
    handle: JoinHandle<Result<()>>,
}

impl StageHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the worker; a panic is reported as an error
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| anyhow!("{} worker panicked", self.name))?
    }
}

/// Move a stage onto its own thread
pub fn spawn_stage(mut stage: Box<dyn PipelineStage>) -> Result<StageHandle> {
    let name = stage.name();
    let handle = thread::Builder::new()
        .name(name.to_lowercase())
        .spawn(move || stage.run())?;
    Ok(StageHandle { name, handle })
}
