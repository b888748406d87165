//! Frame source: keeps the latest frame from a capture pipeline and restarts
//! the pipeline when video is lost.

pub mod channels;
pub mod frame_source;
pub mod pipeline;
pub mod recovery;
pub mod types;

#[cfg(test)]
mod tests;

use std::time::Duration;

use crate::error::Result;
use crate::frame::Frame;

pub use frame_source::{FrameSource, SourceOptions};
pub use pipeline::{CapturePipeline, FramePlayer, PipelineEvents, PipelineFactory};
pub use recovery::{Action, Recovery};
pub use types::{PipelineEvent, PipelineState};

/// Anything frames can be read from.
pub trait FrameProvider: Send + Sync {
    /// The newest frame with a timestamp after `since`, waiting up to `timeout`.
    fn get_frame(&self, timeout: Duration, since: Option<f64>) -> Result<Frame>;
}
