//! Configuration for matching, capture and recording
//!
//! Every section has defaults, so an empty file (or no file at all) is a valid
//! configuration. Files are TOML:
//!
//! ```toml
//! [match]
//! match_method = "sqdiff-normed"   # "sqdiff-normed" | "ccorr-normed" | "ccoeff-normed"
//! match_threshold = 0.8
//! confirm_method = "absdiff"       # "none" | "absdiff" | "normed-absdiff"
//! confirm_threshold = 0.16
//! erode_passes = 1
//! pyramid_levels = 3
//!
//! [is_screen_black]
//! threshold = 10
//!
//! [press]
//! interpress_delay_secs = 0.0
//!
//! [press_until_match]
//! interval_secs = 3.0
//! max_presses = 10
//!
//! [global]
//! restart_source = false
//! source_teardown_eos = false
//!
//! [source]
//! underrun_timeout_secs = 2.0
//! restart_delay_secs = 5.0
//! teardown_eos_timeout_secs = 10.0
//!
//! [sink]
//! latency_secs = 0.5
//! buffer_frames = 35
//! eos_timeout_secs = 10.0
//! # font_path = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"
//!
//! [debug]
//! # image_dir = "stbt-debug"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::match_image::{ConfirmMethod, MatchMethod, MatchParameters};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, rename = "match")]
    pub matching: MatchConfig,

    #[serde(default)]
    pub is_screen_black: IsScreenBlackConfig,

    #[serde(default)]
    pub press: PressConfig,

    #[serde(default)]
    pub press_until_match: PressUntilMatchConfig,

    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(default)]
    pub debug: DebugConfig,
}

/// Defaults for [`MatchParameters`] plus the pyramid depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub match_method: MatchMethod,
    pub match_threshold: f64,
    pub confirm_method: ConfirmMethod,
    pub confirm_threshold: f64,
    pub erode_passes: u32,
    /// Checked when matching starts: zero is a configuration error.
    pub pyramid_levels: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        let params = MatchParameters::default();
        Self {
            match_method: params.match_method(),
            match_threshold: params.match_threshold(),
            confirm_method: params.confirm_method(),
            confirm_threshold: params.confirm_threshold(),
            erode_passes: params.erode_passes(),
            pyramid_levels: 3,
        }
    }
}

impl MatchConfig {
    pub fn parameters(&self) -> Result<MatchParameters> {
        MatchParameters::new(
            self.match_method,
            self.match_threshold,
            self.confirm_method,
            self.confirm_threshold,
            self.erode_passes,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsScreenBlackConfig {
    /// Highest grey level still considered black.
    pub threshold: u8,
}

impl Default for IsScreenBlackConfig {
    fn default() -> Self {
        Self { threshold: 10 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PressConfig {
    /// Minimum time between the end of one press and the start of the next.
    pub interpress_delay_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PressUntilMatchConfig {
    pub interval_secs: f64,
    pub max_presses: u32,
}

impl Default for PressUntilMatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3.0,
            max_presses: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Restart the capture pipeline after underruns, EOS and errors.
    pub restart_source: bool,
    /// Push EOS through the pipeline before tearing it down.
    pub source_teardown_eos: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub underrun_timeout_secs: f64,
    pub restart_delay_secs: f64,
    pub teardown_eos_timeout_secs: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            underrun_timeout_secs: 2.0,
            restart_delay_secs: 5.0,
            teardown_eos_timeout_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// How long frames wait for annotations before being composited.
    pub latency_secs: f64,
    pub buffer_frames: usize,
    pub eos_timeout_secs: f64,
    /// TrueType font for overlay text. When unset a common system font is
    /// used if one is installed; otherwise only a backing box is drawn.
    pub font_path: Option<PathBuf>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            latency_secs: 0.5,
            buffer_frames: 35,
            eos_timeout_secs: 10.0,
            font_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Directory for intermediate matching images; unset disables them.
    pub image_dir: Option<PathBuf>,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&content)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, otherwise use the defaults.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.matching.parameters()?;

        let non_negative = [
            ("press.interpress_delay_secs", self.press.interpress_delay_secs),
            ("press_until_match.interval_secs", self.press_until_match.interval_secs),
            ("source.underrun_timeout_secs", self.source.underrun_timeout_secs),
            ("source.restart_delay_secs", self.source.restart_delay_secs),
            ("source.teardown_eos_timeout_secs", self.source.teardown_eos_timeout_secs),
            ("sink.latency_secs", self.sink.latency_secs),
            ("sink.eos_timeout_secs", self.sink.eos_timeout_secs),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::configuration(format!(
                    "{name} must be a non-negative number of seconds, got {value}"
                )));
            }
        }

        if self.sink.buffer_frames == 0 {
            return Err(Error::configuration("sink.buffer_frames must be at least 1"));
        }
        Ok(())
    }
}

/// Seconds from configuration as a `Duration`. Values are validated non-negative.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
