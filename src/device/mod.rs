//! Test-script facing API: presses keys on the device and checks its video.

pub mod control;
pub mod dut;
pub mod results;
pub mod wait;


pub use control::{NullControl, RemoteControl};
pub use dut::{DEFAULT_TIMEOUT, DetectMatch, DeviceUnderTest, Frames, Pressing};
pub use results::{IsScreenBlackResult, MatchResult};
pub use wait::{Truthy, wait_until, wait_until_with};
