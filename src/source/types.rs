//! Types and enums for the frame source

use crate::frame::Frame;

/// What a capture pipeline reports to the capture loop.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Sample(Frame),
    /// The stream ended.
    Eos,
    /// Fatal decode or bus error.
    Error(String),
    Warning(String),
    /// The pipeline's input queue ran dry.
    Underrun,
    /// Data is flowing again after an underrun.
    Running,
}

/// Requests from the owning thread to the capture loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCommand {
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Normal,
    UnderrunPending,
    Restarting,
}
