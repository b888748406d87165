//! Captured video frames

use image::RgbImage;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::region::Region;

/// An immutable video frame and the time it was captured.
///
/// Pixels are shared behind an `Arc` and never written after the frame is
/// created; anything that wants to draw on a frame takes a copy with
/// [`Frame::to_owned_image`]. Cloning a `Frame` is cheap.
#[derive(Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    /// Capture time in seconds since the Unix epoch.
    pub time: f64,
    /// Sequence number of the pipeline sample this frame came from, if any.
    pub sample: Option<u64>,
}

impl Frame {
    pub fn new(image: RgbImage, time: f64) -> Self {
        Self {
            image: Arc::new(image),
            time,
            sample: None,
        }
    }

    pub fn from_shared(image: Arc<RgbImage>, time: f64, sample: Option<u64>) -> Self {
        Self {
            image,
            time,
            sample,
        }
    }

    pub fn with_sample(mut self, sample: u64) -> Self {
        self.sample = Some(sample);
        self
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn shared_image(&self) -> Arc<RgbImage> {
        Arc::clone(&self.image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn region(&self) -> Region {
        Region::full_frame(self.width(), self.height())
    }

    /// A private, writable copy of the pixels.
    pub fn to_owned_image(&self) -> RgbImage {
        self.image.as_ref().clone()
    }

    /// Write the frame to an image file; the format follows the extension.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        self.image.save(path)?;
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Frame(time={:.3}, dimensions={}x{}x3)>",
            self.time,
            self.width(),
            self.height()
        )
    }
}

/// Current wall-clock time in seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
