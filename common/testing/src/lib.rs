// Licensed under the Apache-2.0 license

//! Host-side fixtures shared by the unit and integration tests: a simulated
//! device with both flash parts, a firmware image builder and the test
//! signing key.

mod device;
mod image;
pub mod keys;

pub use device::TestDevice;
pub use image::ImageBuilder;

use log::LevelFilter;
use simple_logger::SimpleLogger;

/// Routes `log` output to stderr. Safe to call from every test.
pub fn init_logging() {
    let _ = SimpleLogger::new().with_level(LevelFilter::Info).init();
}
