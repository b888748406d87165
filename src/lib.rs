pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod images;
pub mod logging;
pub mod mask;
pub mod match_image;
pub mod region;
pub mod sink;
pub mod source;

pub use config::Config;
pub use device::DeviceUnderTest;
pub use error::{Error, Result};
pub use frame::Frame;
pub use images::{ImageLookup, Template};
pub use mask::Mask;
pub use match_image::{MatchParameters, Matcher};
pub use region::{Position, Region};
