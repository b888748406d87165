//! The device-under-test: video in, key presses out

use image::{GrayImage, Luma, RgbImage, imageops};
use log::{debug, error};
use std::borrow::Cow;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::control::RemoteControl;
use super::results::{IsScreenBlackResult, MatchResult};
use crate::config::{Config, secs};
use crate::error::{Error, Result};
use crate::frame::{Frame, now_secs};
use crate::images::Template;
use crate::logging::{DebugImage, DirImageLogger, ImageLogger};
use crate::mask::{Mask, Shape};
use crate::match_image::{MatchParameters, Matcher};
use crate::region::{Position, Region};
use crate::sink::SinkHandle;
use crate::source::FrameProvider;

/// How long `get_frame` and friends wait for video by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const TEXT_DURATION: Duration = Duration::from_secs(3);
const MAX_HOLD: Duration = Duration::from_secs(60);

pub struct DeviceUnderTest {
    video: Box<dyn FrameProvider>,
    control: Box<dyn RemoteControl>,
    sink: Option<SinkHandle>,
    config: Config,
    last_press: Option<Instant>,
}

impl std::fmt::Debug for DeviceUnderTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceUnderTest")
            .field("sink", &self.sink.is_some())
            .field("last_press", &self.last_press)
            .finish()
    }
}

fn basename(name: &str) -> Cow<'_, str> {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or(Cow::Borrowed(name))
}

fn searchable_area(frame: &Frame, region: Region) -> Result<Region> {
    Region::intersect(Some(frame.region()), Some(region)).ok_or_else(|| Error::InvalidArgument {
        description: format!("{region} doesn't overlap the {}x{} frame", frame.width(), frame.height()),
    })
}

fn crop(frame: &Frame, area: Region) -> Cow<'_, RgbImage> {
    if area == frame.region() {
        Cow::Borrowed(frame.image())
    } else {
        Cow::Owned(
            imageops::crop_imm(
                frame.image(),
                area.x as u32,
                area.y as u32,
                area.width as u32,
                area.height as u32,
            )
            .to_image(),
        )
    }
}

impl DeviceUnderTest {
    pub fn new(
        video: impl FrameProvider + 'static,
        control: impl RemoteControl + 'static,
        config: Config,
    ) -> Self {
        Self {
            video: Box::new(video),
            control: Box::new(control),
            sink: None,
            config,
            last_press: None,
        }
    }

    /// Annotate presses and matches on this sink.
    pub fn with_sink(mut self, sink: SinkHandle) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn image_logger(&self, operation: &str) -> Option<DirImageLogger> {
        self.config
            .debug
            .image_dir
            .as_ref()
            .map(|dir| DirImageLogger::new(dir, operation))
    }

    fn matcher(&self) -> Result<Matcher> {
        let matcher = Matcher::new(self.config.matching.pyramid_levels)?;
        Ok(match self.image_logger("match") {
            Some(logger) => matcher.with_image_logger(Arc::new(logger)),
            None => matcher,
        })
    }

    fn default_parameters(&self, params: Option<MatchParameters>) -> Result<MatchParameters> {
        match params {
            Some(params) => Ok(params),
            None => self.config.matching.parameters(),
        }
    }

    /// Show `text` on the recorded video for `duration`.
    pub fn draw_text(&self, text: &str, duration: Duration) {
        if let Some(sink) = &self.sink {
            sink.draw_text(text, Some(duration));
        }
    }

    fn draw_match(&self, result: &MatchResult, label: &str) {
        if let Some(sink) = &self.sink {
            sink.draw_region(result.time, result.region, result.matched, label);
        }
    }

    // Presses
    // ========================================================================

    fn wait_interpress_delay(&self, delay: Option<Duration>) {
        let delay = delay.unwrap_or_else(|| secs(self.config.press.interpress_delay_secs));
        let Some(last) = self.last_press else {
            return;
        };
        // sleep may return early, so loop until the deadline has really passed
        loop {
            let remaining = (last + delay).saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining);
        }
    }

    /// Press and release `key`, or hold it down for `hold`.
    ///
    /// Consecutive presses are spaced at least `interpress_delay` apart
    /// (default from `press.interpress_delay_secs`).
    pub fn press(&mut self, key: &str, interpress_delay: Option<Duration>, hold: Option<Duration>) -> Result<()> {
        let Some(hold) = hold else {
            self.wait_interpress_delay(interpress_delay);
            let pressed = self.control.press(key);
            self.last_press = Some(Instant::now());
            pressed?;
            self.draw_text(key, TEXT_DURATION);
            return Ok(());
        };

        if hold > MAX_HOLD {
            return Err(Error::InvalidArgument {
                description: "press: hold_secs must be less than 60 seconds".to_string(),
            });
        }

        let held = self.control.keydown(key);
        if held.is_ok() {
            self.draw_text(&format!("Holding {key}"), hold.min(TEXT_DURATION));
            std::thread::sleep(hold);
        }
        let released = self.control.keyup(key);
        if released.is_ok() {
            self.draw_text(&format!("Released {key}"), TEXT_DURATION);
        }
        held?;
        released
    }

    /// Hold `key` down until the returned guard is released or dropped.
    ///
    /// The guard dereferences to the device, so matching and further presses
    /// work while the key is held. [`Pressing::release`] reports a failure
    /// to release the key; dropping the guard only logs it.
    pub fn pressing(&mut self, key: &str, interpress_delay: Option<Duration>) -> Result<Pressing<'_>> {
        self.wait_interpress_delay(interpress_delay);
        if let Err(e) = self.control.keydown(key) {
            if let Err(up) = self.release_key(key) {
                debug!("Failed to release {key} after failing to hold it: {up}");
            }
            return Err(e);
        }
        self.draw_text(&format!("Holding {key}"), TEXT_DURATION);
        Ok(Pressing {
            dut: self,
            key: key.to_string(),
            released: false,
        })
    }

    /// Run `f` with `key` held down.
    ///
    /// An error from `f` takes precedence over a failure to release the key.
    pub fn while_pressing<T>(&mut self, key: &str, f: impl FnOnce(&mut DeviceUnderTest) -> Result<T>) -> Result<T> {
        let mut guard = self.pressing(key, None)?;
        let value = f(&mut *guard)?;
        guard.release()?;
        Ok(value)
    }

    fn release_key(&mut self, key: &str) -> Result<()> {
        let released = self.control.keyup(key);
        self.last_press = Some(Instant::now());
        released?;
        self.draw_text(&format!("Released {key}"), TEXT_DURATION);
        Ok(())
    }

    // Video
    // ========================================================================

    /// The latest frame, waiting up to [`DEFAULT_TIMEOUT`] for one.
    pub fn get_frame(&self) -> Result<Frame> {
        self.video.get_frame(DEFAULT_TIMEOUT, None)
    }

    /// Successive new frames. With a timeout, ends at the first frame captured
    /// after the deadline (the first frame is always yielded).
    pub fn frames(&self, timeout: Option<Duration>) -> Frames<'_> {
        Frames {
            video: &*self.video,
            wait: timeout.map_or(DEFAULT_TIMEOUT, |t| t.max(DEFAULT_TIMEOUT)),
            end_time: timeout.map(|t| now_secs() + t.as_secs_f64()),
            since: None,
            first: true,
            done: false,
        }
    }

    fn visit_matches(
        &self,
        template: &Template,
        frame: Option<&Frame>,
        params: Option<MatchParameters>,
        region: Region,
        mut visit: impl FnMut(MatchResult) -> bool,
    ) -> Result<()> {
        let params = self.default_parameters(params)?;
        let matcher = self.matcher()?;
        let grabbed;
        let frame = match frame {
            Some(frame) => frame,
            None => {
                grabbed = self.get_frame()?;
                &grabbed
            }
        };

        let area = searchable_area(frame, region)?;
        let searched = crop(frame, area);
        let name = template.friendly_name();
        let label = format!("match('{}')", basename(&name));

        for candidate in matcher.find_matches(&searched, &template.image, params, None)? {
            let result = MatchResult {
                time: frame.time,
                matched: candidate.matched,
                region: candidate.region.translate(area.x, area.y),
                first_pass_result: candidate.first_pass_certainty,
                first_pass_matched: candidate.first_pass_matched,
                frame: frame.clone(),
                image: name.clone(),
            };
            self.draw_match(&result, &label);
            if !visit(result) {
                break;
            }
        }
        Ok(())
    }

    /// Search `frame` (default: the next frame) for `template`.
    ///
    /// Only the part of the frame inside `region` is searched; the returned
    /// region is in frame coordinates either way.
    pub fn match_template(
        &self,
        template: &Template,
        frame: Option<&Frame>,
        params: Option<MatchParameters>,
        region: Region,
    ) -> Result<MatchResult> {
        let mut first = None;
        self.visit_matches(template, frame, params, region, |result| {
            first = Some(result);
            false
        })?;
        let result = first.ok_or_else(|| Error::invalid_template("matching produced no result"))?;
        if result.matched {
            debug!("Match found: {result}");
        } else {
            debug!("No match found. Closest match: {result}");
        }
        Ok(result)
    }

    /// Every match of `template`, best first. Empty when nothing matched.
    pub fn match_all(
        &self,
        template: &Template,
        frame: Option<&Frame>,
        params: Option<MatchParameters>,
        region: Region,
    ) -> Result<Vec<MatchResult>> {
        let mut matches = Vec::new();
        self.visit_matches(template, frame, params, region, |result| {
            if result.matched {
                debug!("Match found: {result}");
                matches.push(result);
                true
            } else {
                if matches.is_empty() {
                    debug!("No match found. Closest match: {result}");
                }
                false
            }
        })?;
        Ok(matches)
    }

    /// Match `template` against each new frame for `timeout`.
    pub fn detect_match<'a>(
        &'a self,
        template: &'a Template,
        timeout: Duration,
        params: Option<MatchParameters>,
        region: Region,
    ) -> Result<DetectMatch<'a>> {
        let params = self.default_parameters(params)?;
        debug!("Searching for {}", template.friendly_name());
        Ok(DetectMatch {
            dut: self,
            frames: self.frames(Some(timeout)),
            template,
            params,
            region,
        })
    }

    /// Wait until `template` is found at the same position in
    /// `consecutive_matches` successive frames.
    ///
    /// Fails with [`Error::MatchTimeout`], carrying the last frame searched,
    /// when that doesn't happen within `timeout`.
    pub fn wait_for_match(
        &self,
        template: &Template,
        timeout: Duration,
        consecutive_matches: u32,
        params: Option<MatchParameters>,
        region: Region,
    ) -> Result<MatchResult> {
        if consecutive_matches == 0 {
            return Err(Error::InvalidArgument {
                description: "consecutive_matches must be at least 1".to_string(),
            });
        }

        let mut match_count = 0;
        let mut last_pos = Position::default();
        let mut last_frame = None;
        for result in self.detect_match(template, timeout, params, region)? {
            let result = result?;
            if result.matched && (match_count == 0 || result.position() == last_pos) {
                match_count += 1;
            } else {
                match_count = 0;
            }
            last_pos = result.position();
            if match_count == consecutive_matches {
                debug!("Matched {}", template.friendly_name());
                return Ok(result);
            }
            last_frame = Some(result.frame);
        }

        Err(Error::MatchTimeout {
            screenshot: last_frame.ok_or(Error::NoVideo)?,
            expected: template.friendly_name(),
            timeout_secs: timeout.as_secs_f64(),
        })
    }

    /// Press `key` every `interval` until `template` appears.
    ///
    /// Gives up with the last [`Error::MatchTimeout`] after `max_presses`.
    pub fn press_until_match(
        &mut self,
        key: &str,
        template: &Template,
        interval: Option<Duration>,
        max_presses: Option<u32>,
        params: Option<MatchParameters>,
        region: Region,
    ) -> Result<MatchResult> {
        let interval = interval.unwrap_or_else(|| secs(self.config.press_until_match.interval_secs));
        let max_presses = max_presses.unwrap_or(self.config.press_until_match.max_presses);
        let params = self.default_parameters(params)?;

        let mut presses = 0;
        loop {
            match self.wait_for_match(template, interval, 1, Some(params), region) {
                Err(timeout @ Error::MatchTimeout { .. }) => {
                    if presses >= max_presses {
                        return Err(timeout);
                    }
                    self.press(key, None, None)?;
                    presses += 1;
                }
                other => return other,
            }
        }
    }

    /// Whether the screen is (nearly) black.
    ///
    /// Only pixels inside `region` and included by `mask` are considered; the
    /// mask is in the coordinates of `region`. The screen is black when no
    /// considered pixel's grey level exceeds `threshold` (default from
    /// `is_screen_black.threshold`).
    pub fn is_screen_black(
        &self,
        frame: Option<&Frame>,
        mask: Option<&Mask>,
        threshold: Option<u8>,
        region: Region,
    ) -> Result<IsScreenBlackResult> {
        let threshold = threshold.unwrap_or(self.config.is_screen_black.threshold);
        let grabbed;
        let frame = match frame {
            Some(frame) => frame,
            None => {
                grabbed = self.get_frame()?;
                &grabbed
            }
        };

        let area = searchable_area(frame, region)?;
        let searched = crop(frame, area);
        let mut grey = imageops::grayscale(&*searched);
        let coverage = match mask {
            Some(mask) => Some(mask.to_coverage(Shape::gray(grey.width(), grey.height()))?),
            None => None,
        };
        if let Some(coverage) = &coverage {
            for (pixel, &allowed) in grey.pixels_mut().zip(coverage.data()) {
                pixel.0[0] &= allowed;
            }
        }
        let max_intensity = grey.pixels().map(|p| p.0[0]).max().unwrap_or(0);

        if let Some(logger) = self.image_logger("is_screen_black") {
            logger.log_image("source", DebugImage::Rgb(frame.image()));
            if let Some(coverage) = &coverage {
                logger.log_image("mask", DebugImage::Gray(&coverage.to_gray_image()));
            }
            let non_black = GrayImage::from_fn(grey.width(), grey.height(), |x, y| {
                Luma([if grey.get_pixel(x, y).0[0] > threshold { 255 } else { 0 }])
            });
            logger.log_image("non-black-regions-after-masking", DebugImage::Gray(&non_black));
        }

        let result = IsScreenBlackResult {
            black: max_intensity <= threshold,
            frame: frame.clone(),
        };
        debug!(
            "is_screen_black: {} black screen using mask={}, threshold={threshold}, region={region}: {result}, maximum_intensity={max_intensity}",
            if result.black { "Found" } else { "Didn't find" },
            mask.map_or_else(|| "None".to_string(), |m| m.to_string()),
        );
        Ok(result)
    }
}

/// A key held down by [`DeviceUnderTest::pressing`].
pub struct Pressing<'a> {
    dut: &'a mut DeviceUnderTest,
    key: String,
    released: bool,
}

impl Pressing<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the key, reporting failure.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.dut.release_key(&self.key)
    }
}

impl Deref for Pressing<'_> {
    type Target = DeviceUnderTest;

    fn deref(&self) -> &DeviceUnderTest {
        self.dut
    }
}

impl DerefMut for Pressing<'_> {
    fn deref_mut(&mut self) -> &mut DeviceUnderTest {
        self.dut
    }
}

impl Drop for Pressing<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.dut.release_key(&self.key)
        {
            error!("Failed to release {}: {e}", self.key);
        }
    }
}

/// Iterator returned by [`DeviceUnderTest::frames`].
pub struct Frames<'a> {
    video: &'a dyn FrameProvider,
    wait: Duration,
    end_time: Option<f64>,
    since: Option<f64>,
    first: bool,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let frame = match self.video.get_frame(self.wait, self.since) {
            Ok(frame) => frame,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        self.since = Some(frame.time);
        if !self.first
            && let Some(end_time) = self.end_time
            && frame.time > end_time
        {
            debug!("timed out: {:.3} > {:.3}", frame.time, end_time);
            self.done = true;
            return None;
        }
        self.first = false;
        Some(Ok(frame))
    }
}

/// Iterator returned by [`DeviceUnderTest::detect_match`].
pub struct DetectMatch<'a> {
    dut: &'a DeviceUnderTest,
    frames: Frames<'a>,
    template: &'a Template,
    params: MatchParameters,
    region: Region,
}

impl Iterator for DetectMatch<'_> {
    type Item = Result<MatchResult>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = match self.frames.next()? {
            Ok(frame) => frame,
            Err(e) => return Some(Err(e)),
        };
        Some(
            self.dut
                .match_template(self.template, Some(&frame), Some(self.params), self.region),
        )
    }
}
