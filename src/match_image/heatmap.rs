//! First-pass similarity heatmaps over three-channel images

use image::{GrayImage, Luma, Rgb, RgbImage, imageops};
use imageproc::definitions::Image;
use imageproc::integral_image::{integral_image, integral_squared_image, sum_image_pixels};
use imageproc::map::{blue_channel, green_channel, red_channel};
use imageproc::template_matching::MatchTemplateMethod;

use super::params::MatchMethod;

/// A rectangle of heatmap positions, `[x, x + width) x [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct SearchRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Which template positions a caller mask allows.
#[derive(Debug, Clone)]
pub(super) struct Permission {
    width: u32,
    height: u32,
    allowed: Vec<bool>,
}

impl Permission {
    /// A position is allowed only if every pixel under the template is covered.
    /// `covered` is the coverage of the (cropped) frame, `width` x `height`.
    pub fn from_coverage(
        covered: impl Fn(u32, u32) -> bool,
        width: u32,
        height: u32,
        template_width: u32,
        template_height: u32,
    ) -> Self {
        let holes = GrayImage::from_fn(width, height, |x, y| Luma([u8::from(!covered(x, y))]));
        let holes = integral_image::<_, u32>(&holes);

        let pw = width - template_width + 1;
        let ph = height - template_height + 1;
        let mut allowed = Vec::with_capacity(pw as usize * ph as usize);
        for y in 0..ph {
            for x in 0..pw {
                let [count] = sum_image_pixels(&holes, x, y, x + template_width - 1, y + template_height - 1);
                allowed.push(count == 0);
            }
        }
        Self {
            width: pw,
            height: ph,
            allowed,
        }
    }

    pub fn allows(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.allowed[(y * self.width + x) as usize]
    }

    /// Permission for a coarser heatmap of `width` x `height` positions where
    /// each position stands for a `factor` x `factor` block at full resolution.
    pub fn pooled(&self, factor: u32, width: u32, height: u32) -> Self {
        let mut allowed = vec![false; width as usize * height as usize];
        for y in 0..self.height {
            for x in 0..self.width {
                if self.allows(x, y) {
                    let (cx, cy) = (x / factor, y / factor);
                    if cx < width && cy < height {
                        allowed[(cy * width + cx) as usize] = true;
                    }
                }
            }
        }
        Self {
            width,
            height,
            allowed,
        }
    }
}

/// Similarity of the template at every top-left position of an image.
#[derive(Debug, Clone)]
pub(super) struct Heatmap {
    width: u32,
    height: u32,
    values: Vec<f32>,
    method: MatchMethod,
}

impl Heatmap {
    /// Score that can never satisfy any threshold.
    pub fn worst(method: MatchMethod) -> f32 {
        if method.lower_is_better() {
            f32::INFINITY
        } else {
            f32::NEG_INFINITY
        }
    }

    fn unsearched(width: u32, height: u32, method: MatchMethod) -> Self {
        Self {
            width,
            height,
            values: vec![Self::worst(method); width as usize * height as usize],
            method,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.width + x) as usize]
    }

    /// Best position and its certainty. Ties go to the first position in
    /// row-major order. When nothing searchable is left the certainty is 0.
    pub fn best(&self) -> ((u32, u32), f64) {
        let lower = self.method.lower_is_better();
        let mut best_idx = 0usize;
        let mut best = self.values[0];
        for (idx, &v) in self.values.iter().enumerate().skip(1) {
            if (lower && v < best) || (!lower && v > best) {
                best = v;
                best_idx = idx;
            }
        }
        let pos = (best_idx as u32 % self.width, best_idx as u32 / self.width);
        let certainty = match best as f64 {
            v if !v.is_finite() => 0.0,
            v if lower => 1.0 - v,
            v => v,
        };
        (pos, certainty)
    }

    /// 255 where the score passes `threshold`, 0 elsewhere.
    pub fn threshold(&self, threshold: f64) -> GrayImage {
        let lower = self.method.lower_is_better();
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let v = self.get(x, y) as f64;
            let pass = if lower { v <= 1.0 - threshold } else { v > threshold };
            Luma([if pass { 255 } else { 0 }])
        })
    }

    /// Set every position in `[x0, x1) x [y0, y1)` (clipped) to the worst score.
    pub fn exclude(&mut self, x0: i64, y0: i64, x1: i64, y1: i64) {
        let worst = Self::worst(self.method);
        let xs = x0.max(0) as u32..x1.clamp(0, self.width as i64) as u32;
        for y in y0.max(0) as u32..y1.clamp(0, self.height as i64) as u32 {
            for x in xs.clone() {
                self.values[(y * self.width + x) as usize] = worst;
            }
        }
    }

    /// Scores as a greyscale image, 255 = best.
    pub fn to_debug_image(&self) -> GrayImage {
        let lower = self.method.lower_is_better();
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let v = self.get(x, y);
            let goodness = if lower { 1.0 - v } else { v };
            Luma([(goodness.clamp(0.0, 1.0) * 255.0).round() as u8])
        })
    }
}

/// Compute the heatmap of `template` over `image`, only at positions inside
/// `rois` (everywhere when `None`) and allowed by `permission`. Every other
/// position holds [`Heatmap::worst`].
pub(super) fn match_template(
    image: &RgbImage,
    template: &RgbImage,
    method: MatchMethod,
    rois: Option<&[SearchRect]>,
    permission: Option<&Permission>,
) -> Heatmap {
    let (tw, th) = template.dimensions();
    let width = image.width() - tw + 1;
    let height = image.height() - th + 1;
    let mut heatmap = Heatmap::unsearched(width, height, method);

    let whole = [SearchRect {
        x: 0,
        y: 0,
        width,
        height,
    }];
    let rois = rois.unwrap_or(&whole);

    let terms = Normalisation::new(image, template);
    let template_channels = split_channels(template);
    let kernel = match method {
        MatchMethod::SqdiffNormed => MatchTemplateMethod::SumOfSquaredErrors,
        MatchMethod::CcorrNormed | MatchMethod::CcoeffNormed => MatchTemplateMethod::CrossCorrelation,
    };

    for roi in rois {
        let x1 = (roi.x + roi.width).min(width);
        let y1 = (roi.y + roi.height).min(height);
        if roi.x >= x1 || roi.y >= y1 {
            continue;
        }
        let window = imageops::crop_imm(image, roi.x, roi.y, x1 - roi.x + tw - 1, y1 - roi.y + th - 1).to_image();
        let raw = split_channels(&window)
            .iter()
            .zip(&template_channels)
            .map(|(channel, template)| imageproc::template_matching::match_template(channel, template, kernel))
            .collect::<Vec<_>>();

        for y in roi.y..y1 {
            for x in roi.x..x1 {
                if permission.is_some_and(|p| !p.allows(x, y)) {
                    continue;
                }
                let (dx, dy) = (x - roi.x, y - roi.y);
                let per_channel: [f64; 3] = std::array::from_fn(|c| raw[c].get_pixel(dx, dy)[0] as f64);
                heatmap.values[(y * width + x) as usize] = terms.score(method, x, y, per_channel) as f32;
            }
        }
    }
    heatmap
}

fn split_channels(image: &RgbImage) -> [GrayImage; 3] {
    [red_channel(image), green_channel(image), blue_channel(image)]
}

/// Window sums of the image and whole-template sums, per channel.
struct Normalisation {
    sum: Image<Rgb<u64>>,
    squares: Image<Rgb<u64>>,
    template_sum: [f64; 3],
    template_squares: [f64; 3],
    template_width: u32,
    template_height: u32,
}

impl Normalisation {
    fn new(image: &RgbImage, template: &RgbImage) -> Self {
        let (tw, th) = template.dimensions();
        let whole = |table: &Image<Rgb<u64>>| sum_image_pixels(table, 0, 0, tw - 1, th - 1).map(|v| v as f64);
        Self {
            sum: integral_image::<_, u64>(image),
            squares: integral_squared_image::<_, u64>(image),
            template_sum: whole(&integral_image::<_, u64>(template)),
            template_squares: whole(&integral_squared_image::<_, u64>(template)),
            template_width: tw,
            template_height: th,
        }
    }

    fn window(&self, table: &Image<Rgb<u64>>, x: u32, y: u32) -> [f64; 3] {
        let (right, bottom) = (x + self.template_width - 1, y + self.template_height - 1);
        sum_image_pixels(table, x, y, right, bottom).map(|v| v as f64)
    }

    /// Normalised score at `(x, y)` from the per-channel sliding sums.
    fn score(&self, method: MatchMethod, x: u32, y: u32, raw: [f64; 3]) -> f64 {
        let squares = self.window(&self.squares, x, y);
        let (num, denom_sq) = match method {
            MatchMethod::SqdiffNormed | MatchMethod::CcorrNormed => {
                let isq: f64 = squares.iter().sum();
                let tsq: f64 = self.template_squares.iter().sum();
                (raw.iter().sum(), isq * tsq)
            }
            MatchMethod::CcoeffNormed => {
                let n = f64::from(self.template_width) * f64::from(self.template_height);
                let sums = self.window(&self.sum, x, y);
                let (mut num, mut ivar, mut tvar) = (0.0, 0.0, 0.0);
                for c in 0..3 {
                    let (isum, tsum) = (sums[c], self.template_sum[c]);
                    num += raw[c] - isum * tsum / n;
                    ivar += squares[c] - isum * isum / n;
                    tvar += self.template_squares[c] - tsum * tsum / n;
                }
                if tvar <= f64::EPSILON {
                    // A flat template correlates equally with everything.
                    return 1.0;
                }
                (num, ivar.max(0.0) * tvar)
            }
        };
        normalise(num, denom_sq.sqrt(), method)
    }
}

/// Divide by the normalisation term, saturating where it's (nearly) zero.
fn normalise(num: f64, t: f64, method: MatchMethod) -> f64 {
    if num.abs() < t {
        num / t
    } else if num.abs() < t * 1.125 {
        num.signum()
    } else if method.lower_is_better() {
        1.0
    } else {
        0.0
    }
}
