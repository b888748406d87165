//! Second pass: pixel-level confirmation of a first-pass candidate

use image::{GrayImage, Luma, RgbImage, imageops};
use imageproc::contrast::{ThresholdType, stretch_contrast, threshold};
use imageproc::distance_transform::Norm;
use imageproc::map::map_colors2;
use imageproc::morphology::erode;

use super::params::{ConfirmMethod, MatchParameters};
use crate::logging::{DebugImage, ImageLogger};

/// Check `template` against the `width` x `height` area of `image` at `(x, y)`.
///
/// Pixels whose grey levels differ by more than `confirm_threshold` are marked
/// different; the difference mask is eroded to drop isolated noise and the match
/// is confirmed only if nothing survives.
pub(super) fn confirm_match(
    image: &RgbImage,
    (x, y): (u32, u32),
    template: &RgbImage,
    params: &MatchParameters,
    logger: &dyn ImageLogger,
    prefix: &str,
) -> bool {
    if params.confirm_method() == ConfirmMethod::None {
        return true;
    }

    let roi = imageops::crop_imm(image, x, y, template.width(), template.height()).to_image();
    let mut roi_gray = imageops::grayscale(&roi);
    let mut template_gray = imageops::grayscale(template);
    let log = |name: &str, img: &GrayImage| {
        if logger.enabled() {
            logger.log_image(&format!("{prefix}-confirm-{name}"), DebugImage::Gray(img));
        }
    };
    if logger.enabled() {
        logger.log_image(&format!("{prefix}-confirm-source_roi"), DebugImage::Rgb(&roi));
    }
    log("source_roi_gray", &roi_gray);
    log("template_gray", &template_gray);

    if params.confirm_method() == ConfirmMethod::NormedAbsdiff {
        roi_gray = stretch_to_full_range(&roi_gray);
        template_gray = stretch_to_full_range(&template_gray);
        log("source_roi_gray_normalized", &roi_gray);
        log("template_gray_normalized", &template_gray);
    }

    let absdiff: GrayImage = map_colors2(&roi_gray, &template_gray, |a: Luma<u8>, b: Luma<u8>| {
        Luma([a[0].abs_diff(b[0])])
    });

    let level = (params.confirm_threshold() * 255.0) as u8;
    let thresholded = threshold(&absdiff, level, ThresholdType::Binary);

    let mut eroded = thresholded.clone();
    for _ in 0..params.erode_passes() {
        eroded = erode(&eroded, Norm::L1, 1);
    }

    log("absdiff", &absdiff);
    log("absdiff_threshold", &thresholded);
    log("absdiff_threshold_erode", &eroded);

    eroded.pixels().all(|p| p[0] == 0)
}

/// Linearly rescale so the darkest pixel becomes 0 and the brightest 255.
/// A flat image becomes all zero.
fn stretch_to_full_range(image: &GrayImage) -> GrayImage {
    let (lo, hi) = image
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi > lo {
        stretch_contrast(image, lo, hi, 0, 255)
    } else {
        GrayImage::new(image.width(), image.height())
    }
}
