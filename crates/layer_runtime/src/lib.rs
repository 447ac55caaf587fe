//! Two-thread frame pipeline over a layer tree.

mod config;
mod pipeline;

use std::path::PathBuf;

use thiserror::Error;

pub use config::RuntimeConfig;
pub use pipeline::{FrameNotice, FramePipeline, RenderedFrame, SimulationContext};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("frame notice capacity must be non-zero")]
    ZeroNoticeCapacity,
    #[error("failed to read config {}: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid runtime config: {0}")]
    ParseConfig(#[from] serde_json::Error),
    #[error("failed to spawn simulation thread: {0}")]
    SpawnSimulation(#[source] std::io::Error),
    #[error("simulation thread stopped")]
    SimulationStopped,
    #[error("simulation thread panicked")]
    SimulationPanicked,
}
