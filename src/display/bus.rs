//! Transport seams between panel drivers and the kernel
//!
//! Drivers are generic over these traits so the register protocol can be
//! exercised against recording mocks; the Linux character-device
//! implementations live in [`super::linux`].

use std::io;
use std::thread;
use std::time::Duration;

/// Addressed register bus (I2C): each call is one bus transaction
pub trait RegisterBus: Send {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Full-duplex serial bus (SPI) used write-only
pub trait StreamBus: Send {
    fn transfer(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Single digital output line (GPIO)
pub trait OutputLine: Send {
    fn set_value(&mut self, high: bool) -> io::Result<()>;
}

/// Blocking delay between panel commands
pub trait Delay: Send {
    fn delay_ms(&mut self, ms: u64);
}

/// Sleeps the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}
