//! Tests for the matching engine

use super::*;
use crate::error::Error;
use crate::logging::DirImageLogger;
use crate::mask::Mask;
use crate::region::Region;
use image::{Rgb, RgbImage};
use std::sync::Arc;

const FRAME_W: u32 = 160;
const FRAME_H: u32 = 128;

/// Dark, low-contrast noise standing in for an empty screen.
fn background(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        let v = |c: u32| {
            let seed = x.wrapping_mul(7919) ^ y.wrapping_mul(104_729) ^ c.wrapping_mul(31_337);
            (seed.wrapping_mul(2_654_435_761) >> 24) as u8 % 31
        };
        Rgb([v(1), v(2), v(3)])
    })
}

/// A bright, high-contrast 40x40 checkerboard with 8px squares.
fn button() -> RgbImage {
    RgbImage::from_fn(40, 40, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgb([220, 200, 180])
        } else {
            Rgb([40, 60, 90])
        }
    })
}

fn paste(frame: &mut RgbImage, template: &RgbImage, x: u32, y: u32) {
    image::imageops::replace(frame, template, x as i64, y as i64);
}

fn frame_with_buttons(positions: &[(u32, u32)]) -> RgbImage {
    let mut frame = background(FRAME_W, FRAME_H);
    for &(x, y) in positions {
        paste(&mut frame, &button(), x, y);
    }
    frame
}

#[test]
fn test_exact_subimage_gives_one_match_then_terminator() {
    let frame = frame_with_buttons(&[(64, 48)]);
    let template = image::imageops::crop_imm(&frame, 64, 48, 40, 40).to_image();

    for method in [MatchMethod::SqdiffNormed, MatchMethod::CcorrNormed, MatchMethod::CcoeffNormed] {
        let params = MatchParameters::default().with_match_method(method);
        let results: Vec<Candidate> = find_matches(&frame, &template, params, None).unwrap().collect();

        assert_eq!(results.len(), 2, "{method}: {results:?}");
        assert!(results[0].matched);
        assert!(results[0].first_pass_matched);
        assert_eq!(results[0].region, Region::new(64, 48, 40, 40));
        assert!((results[0].first_pass_certainty - 1.0).abs() < 1e-3, "{method}");
        assert!(!results[1].matched);
    }
}

#[test]
fn test_sequence_ends_after_first_non_match() {
    let frame = frame_with_buttons(&[(64, 48)]);
    let template = button();
    let mut matches = find_matches(&frame, &template, MatchParameters::default(), None).unwrap();
    assert!(matches.next().unwrap().matched);
    assert!(!matches.next().unwrap().matched);
    assert!(matches.next().is_none());
    assert!(matches.next().is_none());
}

#[test]
fn test_terminator_certainty_is_a_probability() {
    let frame = frame_with_buttons(&[(64, 48)]);
    let template = button();
    let masked = Mask::from(Region::new(40, 30, 90, 80));

    for method in [MatchMethod::SqdiffNormed, MatchMethod::CcorrNormed, MatchMethod::CcoeffNormed] {
        for mask in [None, Some(&masked)] {
            let params = MatchParameters::default().with_match_method(method);
            let results: Vec<Candidate> = find_matches(&frame, &template, params, mask).unwrap().collect();
            let last = results.last().unwrap();
            assert!(!last.matched, "{method}: {results:?}");
            assert!(
                (0.0..=1.0).contains(&last.first_pass_certainty),
                "{method}: {}",
                last.first_pass_certainty
            );
        }
    }
}

#[test]
fn test_two_copies_found_in_scan_order() {
    let frame = frame_with_buttons(&[(104, 80), (24, 16)]);
    let results: Vec<Candidate> = find_matches(&frame, &button(), MatchParameters::default(), None)
        .unwrap()
        .collect();

    assert_eq!(results.len(), 3, "{results:?}");
    assert_eq!(results[0].region, Region::new(24, 16, 40, 40));
    assert_eq!(results[1].region, Region::new(104, 80, 40, 40));
    assert!(results[0].matched && results[1].matched);
    assert!(!results[2].matched);
}

#[test]
fn test_no_match_on_empty_screen() {
    let frame = background(FRAME_W, FRAME_H);
    let results: Vec<Candidate> = find_matches(&frame, &button(), MatchParameters::default(), None)
        .unwrap()
        .collect();
    assert_eq!(results.len(), 1);
    assert!(!results[0].matched);
    assert!(!results[0].first_pass_matched);
    assert_eq!(results[0].region.width, 40);
}

#[test]
fn test_confirmation_rejects_what_first_pass_accepts() {
    let frame = frame_with_buttons(&[(64, 48)]);
    // Same button with one bright square painted dark.
    let mut template = button();
    for y in 16..24 {
        for x in 16..24 {
            template.put_pixel(x, y, Rgb([40, 60, 90]));
        }
    }

    let none = MatchParameters::default().with_confirm_method(ConfirmMethod::None);
    let first = find_matches(&frame, &template, none, None).unwrap().next().unwrap();
    assert!(first.matched);
    assert_eq!(first.region, Region::new(64, 48, 40, 40));

    let absdiff = MatchParameters::default().with_confirm_method(ConfirmMethod::Absdiff);
    let results: Vec<Candidate> = find_matches(&frame, &template, absdiff, None).unwrap().collect();
    assert_eq!(results.len(), 1);
    assert!(!results[0].matched);
    assert!(results[0].first_pass_matched);
    assert_eq!(results[0].region, Region::new(64, 48, 40, 40));
}

#[test]
fn test_mask_restricts_search() {
    let frame = frame_with_buttons(&[(24, 16), (104, 80)]);
    let template = button();

    let top_left = Mask::from(Region::new(0, 0, 80, 80));
    let results: Vec<Candidate> = find_matches(&frame, &template, MatchParameters::default(), Some(&top_left))
        .unwrap()
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].region, Region::new(24, 16, 40, 40));

    let bottom_right = Mask::from(Region::new(80, 64, 80, 64));
    let results: Vec<Candidate> =
        find_matches(&frame, &template, MatchParameters::default(), Some(&bottom_right))
            .unwrap()
            .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].region, Region::new(104, 80, 40, 40));
}

#[test]
fn test_partially_masked_template_cannot_match() {
    let frame = frame_with_buttons(&[(64, 48)]);
    let mask = Mask::all() - Region::new(100, 60, 2, 2);
    let results: Vec<Candidate> = find_matches(&frame, &button(), MatchParameters::default(), Some(&mask))
        .unwrap()
        .collect();
    assert!(results.iter().all(|c| !c.matched), "{results:?}");

    let empty = Mask::from(None::<Region>);
    let results: Vec<Candidate> = find_matches(&frame, &button(), MatchParameters::default(), Some(&empty))
        .unwrap()
        .collect();
    assert_eq!(results.len(), 1);
    assert!(!results[0].matched);
}

#[test]
fn test_zero_threshold_still_terminates() {
    let frame = background(40, 30);
    let template = RgbImage::from_pixel(10, 10, Rgb([15, 15, 15]));
    let params = MatchParameters::default()
        .with_match_threshold(0.0)
        .unwrap()
        .with_confirm_method(ConfirmMethod::None);
    let results: Vec<Candidate> = find_matches(&frame, &template, params, None).unwrap().collect();

    let matched: Vec<Region> = results.iter().filter(|c| c.matched).map(|c| c.region).collect();
    assert!(!matched.is_empty());
    assert!(!results.last().unwrap().matched);
    for (i, a) in matched.iter().enumerate() {
        for b in &matched[i + 1..] {
            assert!((a.x - b.x).abs() >= 10 || (a.y - b.y).abs() >= 10, "{a} overlaps {b}");
        }
    }
}

#[test]
fn test_invalid_inputs() {
    let frame = RgbImage::new(30, 30);
    let err = find_matches(&frame, &RgbImage::new(0, 5), MatchParameters::default(), None).err().unwrap();
    assert!(matches!(err, Error::InvalidTemplate { .. }));

    let err = find_matches(&frame, &RgbImage::new(31, 5), MatchParameters::default(), None).err().unwrap();
    assert!(matches!(err, Error::InvalidImage { .. }));

    let err = Matcher::new(0).unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[test]
fn test_image_mask_shape_mismatch_surfaces() {
    let frame = frame_with_buttons(&[(64, 48)]);
    let mask = Mask::from_gray(image::GrayImage::new(10, 10));
    let err = find_matches(&frame, &button(), MatchParameters::default(), Some(&mask)).err().unwrap();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn test_single_level_pyramid_matches_too() {
    let frame = frame_with_buttons(&[(64, 48)]);
    let matcher = Matcher::new(1).unwrap();
    let first = matcher
        .find_matches(&frame, &button(), MatchParameters::default(), None)
        .unwrap()
        .next()
        .unwrap();
    assert!(first.matched);
    assert_eq!(first.region.position(), crate::region::Position::new(64, 48));
}

#[test]
fn test_debug_images_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let logger = Arc::new(DirImageLogger::new(dir.path(), "match"));
    let matcher = Matcher::default().with_image_logger(logger.clone());
    let frame = frame_with_buttons(&[(64, 48)]);
    let count = matcher
        .find_matches(&frame, &button(), MatchParameters::default(), None)
        .unwrap()
        .count();
    assert_eq!(count, 2);
    for name in [
        "source",
        "template",
        "level2-source_matchtemplate",
        "level1-source_matchtemplate_threshold",
        "level0-source",
        "match0-heatmap",
        "match0-confirm-absdiff_threshold_erode",
    ] {
        assert!(logger.dir().join(format!("{name}.png")).is_file(), "{name}");
    }
}
