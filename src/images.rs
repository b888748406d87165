//! Loading reference images (templates and masks) from disk or memory

use image::{DynamicImage, GrayImage, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Resolves relative image file names.
///
/// Relative names are looked up in each search directory in order (typically
/// the directory of the calling test script), then in the current working
/// directory. Absolute paths are used as-is.
#[derive(Debug, Clone, Default)]
pub struct ImageLookup {
    search_dirs: Vec<PathBuf>,
}

impl ImageLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dirs<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add_dir(&mut self, dir: impl Into<PathBuf>) {
        self.search_dirs.push(dir.into());
    }

    pub fn resolve(&self, name: impl AsRef<Path>) -> Result<PathBuf> {
        let name = name.as_ref();
        if name.is_absolute() {
            return if name.is_file() {
                Ok(name.to_path_buf())
            } else {
                Err(Error::FileNotFound {
                    path: name.to_path_buf(),
                })
            };
        }

        let cwd = std::env::current_dir()?;
        self.search_dirs
            .iter()
            .chain(std::iter::once(&cwd))
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| Error::FileNotFound {
                path: name.to_path_buf(),
            })
    }

    fn open(&self, name: &Path) -> Result<DynamicImage> {
        let path = self.resolve(name)?;
        log::debug!("Loading image {}", path.display());
        image::open(&path).map_err(|e| Error::InvalidImage {
            description: format!("failed to load {}: {e}", path.display()),
        })
    }

    pub fn load_rgb(&self, name: impl AsRef<Path>) -> Result<RgbImage> {
        Ok(self.open(name.as_ref())?.to_rgb8())
    }

    /// Masks keep a single channel when the file is greyscale.
    pub fn load_mask_image(&self, name: impl AsRef<Path>) -> Result<MaskImage> {
        Ok(MaskImage::from(self.open(name.as_ref())?))
    }

    pub fn load_template(&self, name: impl AsRef<Path>) -> Result<Template> {
        let name = name.as_ref();
        let image = self.load_rgb(name)?;
        Ok(Template {
            image: Arc::new(image),
            name: Some(name.to_string_lossy().into_owned()),
        })
    }
}

/// Pixels backing an image mask: either one channel or three.
#[derive(Debug, Clone)]
pub enum MaskImage {
    Gray(GrayImage),
    Rgb(RgbImage),
}

impl MaskImage {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            MaskImage::Gray(img) => img.dimensions(),
            MaskImage::Rgb(img) => img.dimensions(),
        }
    }
}

impl From<DynamicImage> for MaskImage {
    fn from(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => MaskImage::Gray(gray),
            other if other.color().channel_count() <= 2 => MaskImage::Gray(other.to_luma8()),
            other => MaskImage::Rgb(other.to_rgb8()),
        }
    }
}

/// A reference image to search for, plus the name it was loaded under.
#[derive(Debug, Clone)]
pub struct Template {
    pub image: Arc<RgbImage>,
    /// File name relative to the lookup directories; `None` for in-memory images.
    pub name: Option<String>,
}

impl Template {
    pub fn from_image(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
            name: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Name used in logs and error messages.
    pub fn friendly_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => "<Custom Image>".to_string(),
        }
    }
}

impl From<RgbImage> for Template {
    fn from(image: RgbImage) -> Self {
        Template::from_image(image)
    }
}
