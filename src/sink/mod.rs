//! Sink compositor: overlays text and match results on captured video and
//! records it.

pub mod annotation;
pub mod compositor;
pub mod draw;
pub mod output;

#[cfg(test)]
mod tests;

pub use compositor::{SinkCompositor, SinkHandle, SinkOptions};
pub use output::{PngSequenceOutput, VideoOutput};
