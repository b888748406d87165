//! Pending overlay annotations and their expiry rules

use image::Rgb;

use crate::region::Region;

/// Outline colour of a region that matched.
pub const MATCHED: Rgb<u8> = Rgb([255, 0, 32]);
/// Outline colour of the best candidate when nothing matched.
pub const NO_MATCH: Rgb<u8> = Rgb([255, 255, 32]);

/// Text fades over this many seconds, down to half intensity.
const FADE_SECS: f64 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TextAnnotation {
    pub time: f64,
    pub text: String,
    /// Infinite for text that never expires.
    pub duration: f64,
}

impl TextAnnotation {
    pub fn end_time(&self) -> f64 {
        self.time + self.duration
    }
}

/// A match result drawn on exactly the frame it was found in.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionAnnotation {
    pub time: f64,
    pub region: Region,
    pub label: String,
    pub matched: bool,
}

impl RegionAnnotation {
    pub fn colour(&self) -> Rgb<u8> {
        if self.matched { MATCHED } else { NO_MATCH }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveText {
    pub text: String,
    pub intensity: u8,
}

/// What to draw on one frame. Texts are newest first.
#[derive(Debug, Default)]
pub struct Overlay {
    pub texts: Vec<ActiveText>,
    pub regions: Vec<RegionAnnotation>,
}

#[derive(Debug, Default)]
pub struct Annotations {
    texts: Vec<TextAnnotation>,
    regions: Vec<RegionAnnotation>,
}

pub fn intensity(age_secs: f64) -> u8 {
    (255.0 * (1.0 - age_secs / FADE_SECS).max(0.5)).round() as u8
}

impl Annotations {
    pub fn add_text(&mut self, annotation: TextAnnotation) {
        self.texts.push(annotation);
    }

    pub fn add_region(&mut self, annotation: RegionAnnotation) {
        self.regions.push(annotation);
    }

    pub fn pending(&self) -> usize {
        self.texts.len() + self.regions.len()
    }

    /// Select the annotations for a frame captured at `now`, forgetting
    /// those that can no longer apply to any later frame.
    pub fn take_overlay(&mut self, now: f64) -> Overlay {
        self.texts.retain(|t| now < t.end_time());
        let texts = self
            .texts
            .iter()
            .rev()
            .filter(|t| t.time <= now)
            .map(|t| ActiveText {
                text: t.text.clone(),
                intensity: intensity(now - t.time),
            })
            .collect();

        let mut regions = Vec::new();
        self.regions.retain(|r| {
            if r.time == now {
                regions.push(r.clone());
            }
            now < r.time
        });

        Overlay { texts, regions }
    }
}
