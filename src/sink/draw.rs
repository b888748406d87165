//! Overlay rendering: timestamps, fading text and match rectangles

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use time::{OffsetDateTime, UtcOffset};

use super::annotation::{Overlay, RegionAnnotation};
use crate::error::{Error, Result};

const TEXT_HEIGHT_PX: f32 = 24.0;
const LINE_SPACING: i32 = 30;
const LEFT_MARGIN: i32 = 10;
const OUTLINE_WIDTH: i32 = 3;
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Tried in order when no font is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
];

/// The first common system font present on this machine.
pub fn system_font() -> Option<PathBuf> {
    SYSTEM_FONTS.iter().map(PathBuf::from).find(|path| path.is_file())
}

const CLOCK_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[hour]:[minute]:[second].[subsecond digits:2]");

/// Formats Unix timestamps as local `HH:MM:SS.cc`.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    offset: UtcOffset,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }
}

impl Clock {
    pub fn utc() -> Self {
        Self { offset: UtcOffset::UTC }
    }

    pub fn format(&self, secs: f64) -> String {
        OffsetDateTime::from_unix_timestamp_nanos((secs * 1e9) as i128)
            .ok()
            .and_then(|t| t.to_offset(self.offset).format(CLOCK_FORMAT).ok())
            .unwrap_or_else(|| format!("{secs:.2}"))
    }
}

pub struct Painter {
    font: Option<FontVec>,
    clock: Clock,
}

impl std::fmt::Debug for Painter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Painter")
            .field("font", &self.font.is_some())
            .field("clock", &self.clock)
            .finish()
    }
}

impl Painter {
    /// Without a font, text is reduced to its black backing box.
    pub fn new(font_path: Option<&Path>, clock: Clock) -> Result<Self> {
        let font = match font_path {
            Some(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    Error::configuration(format!("Failed to read font {}: {e}", path.display()))
                })?;
                let font = FontVec::try_from_vec(bytes).map_err(|e| {
                    Error::configuration(format!("Invalid font {}: {e}", path.display()))
                })?;
                Some(font)
            }
            None => None,
        };
        Ok(Self { font, clock })
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Draw `text` with its baseline starting at `origin` over a black box.
    pub fn draw_text(&self, image: &mut RgbImage, text: &str, origin: (i32, i32), colour: Rgb<u8>, scale: f32) {
        if text.is_empty() {
            return;
        }
        let px = PxScale::from(TEXT_HEIGHT_PX * scale);
        let (width, height) = match &self.font {
            Some(font) => text_size(px, font, text),
            None => (
                (text.chars().count() as f32 * px.x * 0.6).ceil() as u32,
                px.y.ceil() as u32,
            ),
        };
        let (x, y) = origin;
        let backing = Rect::at(x - 2, y - height as i32 - 2).of_size(width.max(1) + 4, height.max(1) + 4);
        draw_filled_rect_mut(image, backing, BLACK);
        if let Some(font) = &self.font {
            draw_text_mut(image, colour, x, y - height as i32, px, font, text);
        }
    }

    pub fn draw_region(&self, image: &mut RgbImage, annotation: &RegionAnnotation) {
        let region = annotation.region;
        if region.is_empty() {
            return;
        }
        let colour = annotation.colour();
        for d in 0..OUTLINE_WIDTH {
            let rect = Rect::at(region.x - d, region.y - d)
                .of_size((region.width + 2 * d) as u32, (region.height + 2 * d) as u32);
            draw_hollow_rect_mut(image, rect, colour);
        }
        self.draw_text(image, &annotation.label, (region.x, region.y - 10), WHITE, 0.5);
    }

    /// Render the wall clock, active texts and this frame's match regions.
    pub fn composite(&self, image: &mut RgbImage, overlay: &Overlay, wall_time: f64) {
        self.draw_text(image, &self.clock.format(wall_time), (LEFT_MARGIN, LINE_SPACING), WHITE, 1.0);
        for (i, text) in overlay.texts.iter().enumerate() {
            let grey = Rgb([text.intensity; 3]);
            let y = (i as i32 + 2) * LINE_SPACING;
            self.draw_text(image, &text.text, (LEFT_MARGIN, y), grey, 1.0);
        }
        for region in &overlay.regions {
            self.draw_region(image, region);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;
    use crate::sink::annotation::{MATCHED, NO_MATCH};

    #[test]
    fn test_clock_format() {
        let clock = Clock::utc();
        assert_eq!(clock.format(3600.0 * 13.0 + 62.257), "13:01:02.25");
        assert_eq!(clock.format(0.0), "00:00:00.00");
    }

    #[test]
    fn test_region_outline_colours() {
        let painter = Painter::new(None, Clock::utc()).unwrap();
        let mut image = RgbImage::new(100, 100);
        let mut annotation = RegionAnnotation {
            time: 1.0,
            region: Region::new(40, 40, 20, 20),
            label: String::new(),
            matched: true,
        };
        painter.draw_region(&mut image, &annotation);
        assert_eq!(*image.get_pixel(40, 40), MATCHED);
        assert_eq!(*image.get_pixel(38, 50), MATCHED);
        assert_eq!(*image.get_pixel(50, 50), BLACK);

        annotation.matched = false;
        painter.draw_region(&mut image, &annotation);
        assert_eq!(*image.get_pixel(59, 59), NO_MATCH);
    }

    #[test]
    fn test_text_gets_backing_box() {
        let painter = Painter::new(None, Clock::utc()).unwrap();
        let mut image = RgbImage::from_pixel(200, 60, Rgb([200, 200, 200]));
        painter.draw_text(&mut image, "hello", (10, 30), WHITE, 1.0);
        assert_eq!(*image.get_pixel(12, 20), BLACK);
        assert_eq!(*image.get_pixel(150, 50), Rgb([200, 200, 200]));
    }

    #[test]
    fn test_text_is_rendered_with_a_font() {
        let Some(path) = system_font() else {
            eprintln!("no system font installed, nothing to render with");
            return;
        };
        let painter = Painter::new(Some(&path), Clock::utc()).unwrap();
        let mut image = RgbImage::from_pixel(200, 60, Rgb([200, 200, 200]));
        painter.draw_text(&mut image, "Hello", (10, 40), WHITE, 1.0);

        assert_eq!(*image.get_pixel(8, 40), BLACK);
        assert_eq!(*image.get_pixel(195, 5), Rgb([200, 200, 200]));
        let (width, height) = text_size(PxScale::from(TEXT_HEIGHT_PX), painter.font.as_ref().unwrap(), "Hello");
        let lit = (10..10 + width)
            .flat_map(|x| (40 - height..40).map(move |y| (x, y)))
            .filter(|&(x, y)| image.get_pixel(x, y)[0] > 128)
            .count();
        assert!(lit > 20, "only {lit} glyph pixels drawn");
    }

    #[test]
    fn test_missing_font_is_configuration_error() {
        let err = Painter::new(Some(Path::new("/nonexistent/font.ttf")), Clock::utc()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
