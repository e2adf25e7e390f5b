//! Smart meter module
//!
//! Drives one authenticated portal session per call and normalizes the
//! intercepted usage payload into meter readings.

mod scraper;
mod types;

pub use scraper::Meter;
pub use types::MeterReading;
