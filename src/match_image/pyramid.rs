//! Image pyramids: an image, then the same image at 1/2 size, 1/4, ...

use image::RgbImage;
use image::imageops::{self, FilterType};
use std::borrow::Cow;

/// Below this many pixels in either dimension an image isn't reduced further.
const MIN_REDUCIBLE_SIZE: u32 = 20;

/// Level 0 is the full-size image; level `n` is downsampled `n` times.
pub(super) struct Pyramid<'a> {
    base: Cow<'a, RgbImage>,
    reduced: Vec<RgbImage>,
}

impl<'a> Pyramid<'a> {
    /// Build up to `levels` levels, stopping early once a level is too small
    /// to reduce.
    pub fn build(base: Cow<'a, RgbImage>, levels: usize) -> Self {
        let mut reduced: Vec<RgbImage> = Vec::new();
        while 1 + reduced.len() < levels {
            let prev: &RgbImage = reduced.last().unwrap_or(&*base);
            if prev.width() < MIN_REDUCIBLE_SIZE || prev.height() < MIN_REDUCIBLE_SIZE {
                break;
            }
            let next = downsample(prev);
            reduced.push(next);
        }
        Self { base, reduced }
    }

    pub fn len(&self) -> usize {
        1 + self.reduced.len()
    }

    pub fn level(&self, level: usize) -> &RgbImage {
        match level {
            0 => &self.base,
            n => &self.reduced[n - 1],
        }
    }
}

/// Halve both dimensions, rounding up.
fn downsample(image: &RgbImage) -> RgbImage {
    let width = image.width().div_ceil(2);
    let height = image.height().div_ceil(2);
    imageops::resize(image, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_halve_rounding_up() {
        let pyramid = Pyramid::build(Cow::Owned(RgbImage::new(101, 80)), 3);
        assert_eq!(pyramid.len(), 3);
        assert_eq!(pyramid.level(1).dimensions(), (51, 40));
        assert_eq!(pyramid.level(2).dimensions(), (26, 20));
    }

    #[test]
    fn test_small_images_stop_early() {
        let pyramid = Pyramid::build(Cow::Owned(RgbImage::new(40, 19)), 3);
        assert_eq!(pyramid.len(), 1);

        let pyramid = Pyramid::build(Cow::Owned(RgbImage::new(30, 30)), 5);
        assert_eq!(pyramid.len(), 2);
        assert_eq!(pyramid.level(1).dimensions(), (15, 15));
    }

    #[test]
    fn test_single_level_borrows_input() {
        let image = RgbImage::new(64, 64);
        let pyramid = Pyramid::build(Cow::Borrowed(&image), 1);
        assert_eq!(pyramid.len(), 1);
        assert!(std::ptr::eq(pyramid.level(0), &image));
    }
}
