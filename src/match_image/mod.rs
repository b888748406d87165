//! Template matching for video frames
//!
//! Two passes: a coarse-to-fine pyramid search over a similarity heatmap finds
//! candidate positions, then a pixel-level comparison confirms or rejects each
//! one. See [`Matcher::find_matches`].

mod confirm;
mod heatmap;
mod matcher;
mod params;
mod pyramid;

#[cfg(test)]
mod tests;

pub use matcher::{Candidate, Matcher, Matches, find_matches};
pub use params::{ConfirmMethod, MatchMethod, MatchParameters};
