//! The output device used by the [logger](crate::logger).
//!
//! The kernel registers whatever device it uses as its console (usually a
//! UART) once it is available. Until then, all output is silently dropped.

use core::fmt;
use spin::{Mutex, MutexGuard};

/// A device that can be used as the console.
pub type ConsoleDevice = dyn fmt::Write + Send;

pub static CONSOLE: Mutex<StaticConsoleDevice> = Mutex::new(StaticConsoleDevice(None));

/// Console device that can be used inside a static context.
pub struct StaticConsoleDevice(Option<&'static mut ConsoleDevice>);

impl StaticConsoleDevice {
    /// Write the given string into this device.
    ///
    /// If it hasn't initialized yet, it will be a no-op.
    pub fn write(&mut self, s: &str) -> fmt::Result {
        match self.0 {
            Some(ref mut dev) => dev.write_str(s),
            None => Ok(()),
        }
    }

    /// Check if a device was registered.
    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Write for StaticConsoleDevice {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s)
    }
}

/// Register the device that all console output will be written to.
///
/// Replaces any device that was registered before.
pub fn init(dev: &'static mut ConsoleDevice) {
    CONSOLE.lock().0 = Some(dev);
}

/// Lock the console and return a guard that can write to the console.
pub fn lock() -> MutexGuard<'static, StaticConsoleDevice> {
    CONSOLE.lock()
}
