//! Meter reading types and the raw payload shape of the usage endpoint.

use serde::{Deserialize, Serialize};

/// One normalized usage measurement.
///
/// Timestamps are kept exactly as the source reports them; the unit is
/// shared by every reading of one capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub start_time: String,
    pub end_time: String,
    pub value: f64,
    pub unit_of_measurement: String,
}

/// Raw payload of the intercepted usage response. Carries either an
/// embedded error object or the reads plus a response-wide unit.
#[derive(Debug, Deserialize)]
pub(crate) struct UsagePayload {
    pub error: Option<ApiError>,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub reads: Vec<RawRead>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub details: String,
}

/// One time bucket as the source reports it. `value` is null for buckets
/// the utility has not populated yet.
#[derive(Debug, Deserialize)]
pub(crate) struct RawRead {
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "endTime")]
    pub end_time: String,
    pub value: Option<f64>,
}
