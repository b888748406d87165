//! Log initialisation and the debug image sink used by the matcher

use image::{GrayImage, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Set up `env_logger`. `RUST_LOG` wins; otherwise `debug` selects the level.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .try_init();
}

/// An image produced while matching: frames, templates, heatmaps and masks.
pub enum DebugImage<'a> {
    Rgb(&'a RgbImage),
    Gray(&'a GrayImage),
}

/// Receives intermediate images for offline inspection.
///
/// Implementations must not fail the operation being logged: errors are
/// reported through `log` and otherwise ignored.
pub trait ImageLogger: Send + Sync {
    fn enabled(&self) -> bool {
        true
    }

    fn log_image(&self, name: &str, image: DebugImage<'_>);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoImageLog;

impl ImageLogger for NoImageLog {
    fn enabled(&self) -> bool {
        false
    }

    fn log_image(&self, _name: &str, _image: DebugImage<'_>) {}
}

/// Writes each image as `<dir>/<call>/<name>.png`, one sub-directory per
/// logger instance so that consecutive match calls don't overwrite each other.
#[derive(Debug)]
pub struct DirImageLogger {
    dir: PathBuf,
}

static NEXT_CALL: AtomicU64 = AtomicU64::new(1);

impl DirImageLogger {
    /// Create a logger for one operation under `root`.
    pub fn new(root: impl AsRef<Path>, operation: &str) -> Self {
        let call = NEXT_CALL.fetch_add(1, Ordering::Relaxed);
        Self {
            dir: root.as_ref().join(format!("{call:05}-{operation}")),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ImageLogger for DirImageLogger {
    fn log_image(&self, name: &str, image: DebugImage<'_>) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            log::warn!("Failed to create debug directory {}: {e}", self.dir.display());
            return;
        }
        let path = self.dir.join(format!("{name}.png"));
        let result = match image {
            DebugImage::Rgb(img) => img.save(&path),
            DebugImage::Gray(img) => img.save(&path),
        };
        if let Err(e) = result {
            log::warn!("Failed to write debug image {}: {e}", path.display());
        }
    }
}
