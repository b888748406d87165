use std::path::PathBuf;
use thiserror::Error;

use crate::frame::Frame;

/// A specialized `Result` type for video UI test operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for the capture, matching and orchestration core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid image: {description}")]
    InvalidImage { description: String },

    #[error("Invalid template: {description}")]
    InvalidTemplate { description: String },

    #[error("Image file not found: {path:?}")]
    FileNotFound { path: PathBuf },

    #[error("Configuration error: {description}")]
    Configuration { description: String },

    #[error("Invalid argument: {description}")]
    InvalidArgument { description: String },

    #[error("No video")]
    NoVideo,

    #[error("Video pipeline error: {description}")]
    Pipeline { description: String },

    #[error("Didn't find match for '{expected}' within {timeout_secs} seconds.")]
    MatchTimeout {
        screenshot: Frame,
        expected: String,
        timeout_secs: f64,
    },

    #[error("Mask shape {mask:?} and required shape {required:?} don't match")]
    ShapeMismatch {
        mask: (u32, u32),
        required: (u32, u32),
    },

    #[error("Unsupported mask operand: {operand}")]
    UnsupportedOperand { operand: String },

    #[error("Remote control '{key}' failed: {description}")]
    Control { key: String, description: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Image codec error: {source}")]
    Image {
        #[from]
        source: image::ImageError,
    },
}

impl Error {
    pub fn configuration(description: impl Into<String>) -> Self {
        Error::Configuration {
            description: description.into(),
        }
    }

    pub fn invalid_template(description: impl Into<String>) -> Self {
        Error::InvalidTemplate {
            description: description.into(),
        }
    }

    pub fn invalid_image(description: impl Into<String>) -> Self {
        Error::InvalidImage {
            description: description.into(),
        }
    }

    pub fn pipeline(description: impl Into<String>) -> Self {
        Error::Pipeline {
            description: description.into(),
        }
    }
}
