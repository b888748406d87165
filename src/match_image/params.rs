//! Parameters controlling the matching algorithm

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Heatmap method for the first pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMethod {
    /// Normalised sum of squared differences; lower is better.
    SqdiffNormed,
    /// Normalised cross-correlation; higher is better.
    CcorrNormed,
    /// Normalised correlation coefficient; higher is better.
    CcoeffNormed,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMethod::SqdiffNormed => "sqdiff-normed",
            MatchMethod::CcorrNormed => "ccorr-normed",
            MatchMethod::CcoeffNormed => "ccoeff-normed",
        }
    }

    /// Whether the best position has the lowest heatmap value.
    pub fn lower_is_better(self) -> bool {
        matches!(self, MatchMethod::SqdiffNormed)
    }
}

impl FromStr for MatchMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sqdiff-normed" => Ok(MatchMethod::SqdiffNormed),
            "ccorr-normed" => Ok(MatchMethod::CcorrNormed),
            "ccoeff-normed" => Ok(MatchMethod::CcoeffNormed),
            other => Err(Error::configuration(format!(
                "Invalid match method '{other}': expected sqdiff-normed, ccorr-normed or ccoeff-normed"
            ))),
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Second-pass check applied to first-pass candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmMethod {
    None,
    Absdiff,
    NormedAbsdiff,
}

impl ConfirmMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmMethod::None => "none",
            ConfirmMethod::Absdiff => "absdiff",
            ConfirmMethod::NormedAbsdiff => "normed-absdiff",
        }
    }
}

impl FromStr for ConfirmMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(ConfirmMethod::None),
            "absdiff" => Ok(ConfirmMethod::Absdiff),
            "normed-absdiff" => Ok(ConfirmMethod::NormedAbsdiff),
            other => Err(Error::configuration(format!(
                "Invalid confirm method '{other}': expected none, absdiff or normed-absdiff"
            ))),
        }
    }
}

impl fmt::Display for ConfirmMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated, immutable matching parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchParameters {
    match_method: MatchMethod,
    match_threshold: f64,
    confirm_method: ConfirmMethod,
    confirm_threshold: f64,
    erode_passes: u32,
}

impl Default for MatchParameters {
    fn default() -> Self {
        Self {
            match_method: MatchMethod::SqdiffNormed,
            match_threshold: 0.8,
            confirm_method: ConfirmMethod::Absdiff,
            confirm_threshold: 0.16,
            erode_passes: 1,
        }
    }
}

fn check_unit(name: &str, value: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(Error::configuration(format!(
            "{name} must be between 0 and 1, got {value}"
        )))
    }
}

impl MatchParameters {
    pub fn new(
        match_method: MatchMethod,
        match_threshold: f64,
        confirm_method: ConfirmMethod,
        confirm_threshold: f64,
        erode_passes: u32,
    ) -> Result<Self> {
        Ok(Self {
            match_method,
            match_threshold: check_unit("match_threshold", match_threshold)?,
            confirm_method,
            confirm_threshold: check_unit("confirm_threshold", confirm_threshold)?,
            erode_passes,
        })
    }

    pub fn match_method(&self) -> MatchMethod {
        self.match_method
    }

    pub fn match_threshold(&self) -> f64 {
        self.match_threshold
    }

    pub fn confirm_method(&self) -> ConfirmMethod {
        self.confirm_method
    }

    pub fn confirm_threshold(&self) -> f64 {
        self.confirm_threshold
    }

    pub fn erode_passes(&self) -> u32 {
        self.erode_passes
    }

    pub fn with_match_method(self, match_method: MatchMethod) -> Self {
        Self {
            match_method,
            ..self
        }
    }

    pub fn with_match_threshold(self, match_threshold: f64) -> Result<Self> {
        Ok(Self {
            match_threshold: check_unit("match_threshold", match_threshold)?,
            ..self
        })
    }

    pub fn with_confirm_method(self, confirm_method: ConfirmMethod) -> Self {
        Self {
            confirm_method,
            ..self
        }
    }

    pub fn with_confirm_threshold(self, confirm_threshold: f64) -> Result<Self> {
        Ok(Self {
            confirm_threshold: check_unit("confirm_threshold", confirm_threshold)?,
            ..self
        })
    }

    pub fn with_erode_passes(self, erode_passes: u32) -> Self {
        Self {
            erode_passes,
            ..self
        }
    }
}

impl fmt::Display for MatchParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MatchParameters(match_method={}, match_threshold={}, confirm_method={}, \
             confirm_threshold={}, erode_passes={})",
            self.match_method,
            self.match_threshold,
            self.confirm_method,
            self.confirm_threshold,
            self.erode_passes
        )
    }
}
