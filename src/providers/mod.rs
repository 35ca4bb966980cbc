//! Port openers

mod loopback;
#[cfg(feature = "serial")]
mod serial;

pub use loopback::{LoopbackDevice, LoopbackDevices, LoopbackOpener};
#[cfg(feature = "serial")]
pub use serial::SerialPortOpener;
