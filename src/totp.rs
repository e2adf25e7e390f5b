//! Time-based one-time code derivation for the MFA step.
//!
//! The portal hands out a base32 shared secret when TOTP is enrolled; the
//! login flow derives the current 6-digit SHA-1 code from it. Codes are only
//! valid for one 30-second step, so derivation happens at the moment the
//! code is submitted, never earlier.

use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::FlowError;

/// Derive the code for the current wall-clock time.
pub fn current_code(secret: &str) -> Result<String, FlowError> {
    build(secret)?
        .generate_current()
        .map_err(|e| FlowError::Totp(e.to_string()))
}

/// Derive the code for a fixed unix timestamp.
pub fn code_at(secret: &str, unix_time: u64) -> Result<String, FlowError> {
    Ok(build(secret)?.generate(unix_time))
}

fn build(secret: &str) -> Result<TOTP, FlowError> {
    let normalized = secret.trim().replace(' ', "").to_ascii_uppercase();
    let bytes = Secret::Encoded(normalized)
        .to_bytes()
        .map_err(|e| FlowError::Totp(format!("invalid shared secret: {e:?}")))?;
    // new_unchecked: portal secrets can be shorter than the RFC 4226
    // 128-bit minimum that TOTP::new enforces.
    Ok(TOTP::new_unchecked(Algorithm::SHA1, 6, 1, 30, bytes))
}
