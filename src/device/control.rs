//! Remote control abstraction

use log::debug;

use crate::error::Result;

/// Sends key presses to the device under test.
pub trait RemoteControl: Send {
    fn press(&mut self, key: &str) -> Result<()>;

    fn keydown(&mut self, key: &str) -> Result<()>;

    fn keyup(&mut self, key: &str) -> Result<()>;
}

/// A remote control that isn't connected to anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullControl;

impl RemoteControl for NullControl {
    fn press(&mut self, key: &str) -> Result<()> {
        debug!("NullControl: Ignoring request to press {key}");
        Ok(())
    }

    fn keydown(&mut self, key: &str) -> Result<()> {
        debug!("NullControl: Ignoring request to hold {key}");
        Ok(())
    }

    fn keyup(&mut self, key: &str) -> Result<()> {
        debug!("NullControl: Ignoring request to release {key}");
        Ok(())
    }
}
