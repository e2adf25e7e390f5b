//! Smart energy meter scraper for ConEdison and Orange & Rockland Utility.
//!
//! Neither utility offers a public data API; the usage data is only
//! reachable by logging into the customer portal the way a person does and
//! intercepting the JSON the dashboard fetches in the background for its
//! usage chart. This crate drives a headless browser through that session
//! (login, MFA, opening the energy-use view), captures that one response
//! and normalizes it into meter readings.
//!
//! # Example
//!
//! ```rust,ignore
//! use meter_service::{AccountConfig, Meter, MfaType, Site};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AccountConfig::new(
//!         "user@example.com",
//!         "password",
//!         MfaType::Totp,
//!         "BASE32SHAREDSECRET",
//!         "account-uuid",
//!         "00123456789",
//!     )
//!     .with_site(Site::Coned);
//!
//!     let meter = Meter::new(config).unwrap();
//!     let (start, end, value, unit) = meter.last_read().await.unwrap();
//!     println!("{start} - {end}: {value} {unit}");
//! }
//! ```
//!
//! # tower example
//!
//! ```rust,ignore
//! use meter_service::{MeterReadService, MfaType, ReadRequest};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut service = MeterReadService::new();
//!     let request = ReadRequest::new(
//!         "user@example.com", "password", MfaType::SecurityQuestion,
//!         "mother's maiden name", "account-uuid", "00123456789",
//!     );
//!     let result = service.call(request).await.unwrap();
//!     println!("{} reads", result.reads.len());
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod meter;
pub mod service;
pub mod totp;

pub use config::{AccountConfig, MfaType, Site};
pub use engine::{CaptureHandle, ChromiumEngine, LaunchOptions, UsageEngine, UsageSession};
pub use error::{FlowError, MeterError};
pub use meter::{Meter, MeterReading};
pub use service::{MeterReadService, ReadRequest, ReadResult};
