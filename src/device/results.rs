//! Results returned by the device-under-test operations

use std::fmt;

use crate::frame::Frame;
use crate::region::{Position, Region};

/// The outcome of searching one frame for a template.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Capture time of the frame that was searched.
    pub time: f64,
    pub matched: bool,
    /// Where the template was found, or the closest candidate.
    pub region: Region,
    /// Certainty from the first pass, 0 (poor) to 1 (excellent).
    pub first_pass_result: f64,
    pub first_pass_matched: bool,
    pub frame: Frame,
    /// Friendly name of the template.
    pub image: String,
}

impl MatchResult {
    pub fn position(&self) -> Position {
        self.region.position()
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MatchResult(time={:.3}, match={}, region={}, first_pass_result={}, frame={:?}, image={})",
            self.time, self.matched, self.region, self.first_pass_result, self.frame, self.image
        )
    }
}

#[derive(Debug, Clone)]
pub struct IsScreenBlackResult {
    pub black: bool,
    pub frame: Frame,
}

impl fmt::Display for IsScreenBlackResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IsScreenBlackResult(black={}, frame={:?})", self.black, self.frame)
    }
}
