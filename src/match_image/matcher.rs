//! Hierarchical template search producing a lazy sequence of matches

use image::RgbImage;
use image::imageops;
use imageproc::region_labelling::{Connectivity, connected_components};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use super::confirm::confirm_match;
use super::heatmap::{Heatmap, Permission, SearchRect, match_template};
use super::params::MatchParameters;
use super::pyramid::Pyramid;
use crate::error::{Error, Result};
use crate::logging::{DebugImage, ImageLogger, NoImageLog};
use crate::mask::{Mask, Shape};
use crate::region::Region;

/// Below this size the coarse heatmap is too small to narrow the next level.
const MIN_ROI_HEATMAP_SIZE: u32 = 3;

/// Threshold relaxation for scaled-down pyramid levels.
const COARSE_LEVEL_RELAXATION: f64 = 0.2;

/// One entry of a match sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Passed both the first pass and the confirmation pass.
    pub matched: bool,
    /// Where the template is, or the closest position when `matched` is false.
    pub region: Region,
    pub first_pass_matched: bool,
    pub first_pass_certainty: f64,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Candidate(matched={}, region={}, first_pass_matched={}, first_pass_certainty={:.4})",
            self.matched, self.region, self.first_pass_matched, self.first_pass_certainty
        )
    }
}

/// Template search engine.
#[derive(Clone)]
pub struct Matcher {
    pyramid_levels: u32,
    logger: Arc<dyn ImageLogger>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            pyramid_levels: 3,
            logger: Arc::new(NoImageLog),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("pyramid_levels", &self.pyramid_levels)
            .field("image_log", &self.logger.enabled())
            .finish()
    }
}

impl Matcher {
    pub fn new(pyramid_levels: u32) -> Result<Self> {
        if pyramid_levels == 0 {
            return Err(Error::configuration("'match.pyramid_levels' must be > 0"));
        }
        Ok(Self {
            pyramid_levels,
            ..Self::default()
        })
    }

    pub fn with_image_logger(mut self, logger: Arc<dyn ImageLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn pyramid_levels(&self) -> u32 {
        self.pyramid_levels
    }

    /// Search for `template` in `frame`.
    ///
    /// The returned iterator yields zero or more matched candidates in order of
    /// decreasing certainty, then exactly one unmatched candidate, then ends.
    /// When `mask` is given, the template may only be found where every pixel
    /// it covers is included by the mask.
    pub fn find_matches<'a>(
        &self,
        frame: &'a RgbImage,
        template: &'a RgbImage,
        params: MatchParameters,
        mask: Option<&Mask>,
    ) -> Result<Matches<'a>> {
        if template.width() < 1 || template.height() < 1 {
            return Err(Error::invalid_template("Template image must contain some data"));
        }
        if frame.width() < template.width() || frame.height() < template.height() {
            return Err(Error::invalid_image(format!(
                "Source image ({}x{}) must be larger than template image ({}x{})",
                frame.width(),
                frame.height(),
                template.width(),
                template.height()
            )));
        }

        let mut search = SearchArea {
            image: Cow::Borrowed(frame),
            offset: (0, 0),
            permission: None,
        };
        if let Some(mask) = mask {
            search = SearchArea::masked(frame, template, mask)?;
        }

        Ok(Matches {
            template,
            params,
            pyramid_levels: self.pyramid_levels as usize,
            logger: Arc::clone(&self.logger),
            search: Some(search),
            state: State::NotStarted,
            index: 0,
        })
    }
}

/// Convenience wrapper using a default [`Matcher`].
pub fn find_matches<'a>(
    frame: &'a RgbImage,
    template: &'a RgbImage,
    params: MatchParameters,
    mask: Option<&Mask>,
) -> Result<Matches<'a>> {
    Matcher::default().find_matches(frame, template, params, mask)
}

/// The part of the frame that is searched.
struct SearchArea<'a> {
    image: Cow<'a, RgbImage>,
    /// Position of `image` within the frame.
    offset: (u32, u32),
    /// Level-0 permission map; `None` allows everything.
    permission: Option<Permission>,
}

impl<'a> SearchArea<'a> {
    fn masked(frame: &'a RgbImage, template: &RgbImage, mask: &Mask) -> Result<Self> {
        let coverage = mask.to_coverage(Shape::gray(frame.width(), frame.height()))?;
        let (tw, th) = template.dimensions();

        let bounds = coverage
            .bounding_box()
            .and_then(|r| r.clip_to(frame.width(), frame.height()))
            .filter(|&(_, _, w, h)| w >= tw && h >= th);

        let Some((x, y, w, h)) = bounds else {
            // Nothing searchable: search the whole frame with every position
            // forbidden so the sequence is a single non-match.
            let nowhere = Permission::from_coverage(|_, _| false, frame.width(), frame.height(), tw, th);
            return Ok(Self {
                image: Cow::Borrowed(frame),
                offset: (0, 0),
                permission: Some(nowhere),
            });
        };

        let permission = Permission::from_coverage(|px, py| coverage.get(x + px, y + py) != 0, w, h, tw, th);
        let image = if (x, y, w, h) == (0, 0, frame.width(), frame.height()) {
            Cow::Borrowed(frame)
        } else {
            Cow::Owned(imageops::crop_imm(frame, x, y, w, h).to_image())
        };
        Ok(Self {
            image,
            offset: (x, y),
            permission: Some(permission),
        })
    }
}

enum State {
    NotStarted,
    /// The previous candidate was a confirmed level-0 match at `last`.
    Matched {
        heatmap: Heatmap,
        threshold: f64,
        last: (u32, u32),
    },
    Done,
}

/// Lazy sequence of [`Candidate`]s returned by [`Matcher::find_matches`].
pub struct Matches<'a> {
    template: &'a RgbImage,
    params: MatchParameters,
    pyramid_levels: usize,
    logger: Arc<dyn ImageLogger>,
    search: Option<SearchArea<'a>>,
    state: State,
    index: usize,
}

impl Iterator for Matches<'_> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Done => None,
            State::NotStarted => {
                let (heatmap, level, threshold) = self.first_pass(self.search.as_ref()?);
                Some(self.emit(heatmap, level, threshold))
            }
            State::Matched {
                mut heatmap,
                threshold,
                last,
            } => {
                // Exclude positions that would overlap the previous match.
                let (tw, th) = (self.template.width() as i64, self.template.height() as i64);
                let (x, y) = (last.0 as i64, last.1 as i64);
                heatmap.exclude(x - tw + 1, y - th + 1, x + tw, y + th);
                Some(self.emit(heatmap, 0, threshold))
            }
        }
    }
}

impl Matches<'_> {
    fn log_rgb(&self, name: &str, image: &RgbImage) {
        if self.logger.enabled() {
            self.logger.log_image(name, DebugImage::Rgb(image));
        }
    }

    fn log_gray(&self, name: &str, image: &image::GrayImage) {
        if self.logger.enabled() {
            self.logger.log_image(name, DebugImage::Gray(image));
        }
    }

    /// Pyramid search from the coarsest level down. Returns the last heatmap
    /// computed, its level and the threshold used there. Stops early at the
    /// first level without a match.
    fn first_pass(&self, search: &SearchArea<'_>) -> (Heatmap, usize, f64) {
        let method = self.params.match_method();
        let match_threshold = self.params.match_threshold();

        self.log_rgb("source", &search.image);
        self.log_rgb("template", self.template);
        log::trace!(
            "Original image {:?}, template {:?}",
            search.image.dimensions(),
            self.template.dimensions()
        );

        let template_pyramid = Pyramid::build(Cow::Borrowed(self.template), self.pyramid_levels);
        let image_pyramid = Pyramid::build(Cow::Borrowed(&*search.image), template_pyramid.len());
        let levels = template_pyramid.len().min(image_pyramid.len());

        let mut rois: Option<Vec<SearchRect>> = None;
        let mut level = levels - 1;
        loop {
            let image = image_pyramid.level(level);
            let template = template_pyramid.level(level);
            let heatmap_w = image.width() - template.width() + 1;
            let heatmap_h = image.height() - template.height() + 1;

            let permission = search.permission.as_ref().map(|p| {
                if level == 0 {
                    p.clone()
                } else {
                    p.pooled(1 << level, heatmap_w, heatmap_h)
                }
            });

            let heatmap = match_template(image, template, method, rois.as_deref(), permission.as_ref());
            let threshold = if level > 0 {
                (match_threshold - COARSE_LEVEL_RELAXATION).max(0.0)
            } else {
                match_threshold
            };
            let (position, certainty) = heatmap.best();
            let matched = certainty >= threshold;
            log::trace!(
                "Level {level}: {} at {position:?} with certainty {certainty:.4}",
                if matched { "Matched" } else { "Didn't match" }
            );

            self.log_rgb(&format!("level{level}-source"), image);
            self.log_rgb(&format!("level{level}-template"), template);
            self.log_gray(&format!("level{level}-source_matchtemplate"), &heatmap.to_debug_image());

            if !matched || level == 0 {
                return (heatmap, level, threshold);
            }

            let passing = heatmap.threshold(threshold);
            self.log_gray(&format!("level{level}-source_matchtemplate_threshold"), &passing);

            let finer = (image_pyramid.level(level - 1), template_pyramid.level(level - 1));
            let finer_w = finer.0.width() - finer.1.width() + 1;
            let finer_h = finer.0.height() - finer.1.height() + 1;
            rois = if heatmap.width() < MIN_ROI_HEATMAP_SIZE || heatmap.height() < MIN_ROI_HEATMAP_SIZE {
                None
            } else {
                Some(regions_of_interest(&passing, finer_w, finer_h))
            };
            level -= 1;
        }
    }

    fn emit(&mut self, heatmap: Heatmap, level: usize, threshold: f64) -> Candidate {
        let index = self.index;
        self.index += 1;

        let (position, certainty) = heatmap.best();
        let first_pass_matched = certainty >= threshold;
        let scale = 1u32 << level;
        let local = (position.0 * scale, position.1 * scale);

        self.log_gray(&format!("match{index}-heatmap"), &heatmap.to_debug_image());

        let confirmed = first_pass_matched
            && match self.search.as_ref() {
                Some(search) => confirm_match(
                    &search.image,
                    local,
                    self.template,
                    &self.params,
                    self.logger.as_ref(),
                    &format!("match{index}"),
                ),
                None => false,
            };

        let offset = self.search.as_ref().map(|s| s.offset).unwrap_or((0, 0));
        let region = Region::new(
            (local.0 + offset.0) as i32,
            (local.1 + offset.1) as i32,
            self.template.width() as i32,
            self.template.height() as i32,
        );

        if confirmed {
            self.state = State::Matched {
                heatmap,
                threshold,
                last: position,
            };
        } else {
            self.search = None;
        }

        Candidate {
            matched: confirmed,
            region,
            first_pass_matched,
            first_pass_certainty: certainty,
        }
    }
}

/// Bounding boxes of the connected passing areas of a coarse heatmap, scaled
/// up to the next finer level with a one-position margin and clipped to its
/// `width` x `height` heatmap.
fn regions_of_interest(passing: &image::GrayImage, width: u32, height: u32) -> Vec<SearchRect> {
    let labels = connected_components(passing, Connectivity::Eight, image::Luma([0u8]));
    let mut boxes: Vec<Option<(u32, u32, u32, u32)>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if boxes.len() < label {
            boxes.resize(label, None);
        }
        let b = boxes[label - 1].get_or_insert((x, y, x, y));
        b.0 = b.0.min(x);
        b.1 = b.1.min(y);
        b.2 = b.2.max(x);
        b.3 = b.3.max(y);
    }

    boxes
        .into_iter()
        .flatten()
        .filter_map(|(x0, y0, x1, y1)| {
            let left = (x0 * 2).saturating_sub(1);
            let top = (y0 * 2).saturating_sub(1);
            let right = ((x1 + 1) * 2 + 1).min(width);
            let bottom = ((y1 + 1) * 2 + 1).min(height);
            (left < right && top < bottom).then_some(SearchRect {
                x: left,
                y: top,
                width: right - left,
                height: bottom - top,
            })
        })
        .collect()
}

#[cfg(test)]
mod roi_tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_each_component_gets_a_box() {
        let mut passing = GrayImage::new(10, 8);
        passing.put_pixel(1, 1, Luma([255]));
        passing.put_pixel(2, 2, Luma([255]));
        passing.put_pixel(8, 6, Luma([255]));
        let mut rois = regions_of_interest(&passing, 19, 15);
        rois.sort_by_key(|r| (r.y, r.x));
        assert_eq!(
            rois,
            vec![
                SearchRect { x: 1, y: 1, width: 6, height: 6 },
                SearchRect { x: 15, y: 11, width: 4, height: 4 },
            ]
        );
    }

    #[test]
    fn test_nothing_passing_means_no_rois() {
        let passing = GrayImage::new(5, 5);
        assert!(regions_of_interest(&passing, 9, 9).is_empty());
    }
}
