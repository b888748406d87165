//! Destinations for composited video

use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;

use crate::error::Result;

/// Receives composited frames in presentation order.
pub trait VideoOutput: Send {
    fn push_frame(&mut self, image: &RgbImage, time: f64) -> Result<()>;

    /// Finish the stream. The returned receiver yields once everything pushed
    /// so far has been written out.
    fn end_of_stream(&mut self) -> Result<std_mpsc::Receiver<()>>;
}

/// Writes each frame as `frame-NNNNNN.png` into a directory.
#[derive(Debug)]
pub struct PngSequenceOutput {
    dir: PathBuf,
    written: u64,
}

impl PngSequenceOutput {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        log::debug!("Saving video frames to {}", dir.display());
        Ok(Self { dir, written: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }
}

impl VideoOutput for PngSequenceOutput {
    fn push_frame(&mut self, image: &RgbImage, _time: f64) -> Result<()> {
        let path = self.dir.join(format!("frame-{:06}.png", self.written));
        image.save(&path)?;
        self.written += 1;
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<std_mpsc::Receiver<()>> {
        // Frames are written synchronously, so there is nothing left to flush.
        let (tx, rx) = std_mpsc::channel();
        let _ = tx.send(());
        Ok(rx)
    }
}
