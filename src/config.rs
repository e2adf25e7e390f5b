use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::MeterError;

/// Second authentication factor required by the utility portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaType {
    /// A static security-question answer, submitted verbatim.
    SecurityQuestion,
    /// A time-based one-time code derived from a shared secret.
    Totp,
}

impl FromStr for MfaType {
    type Err = MeterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SECURITY_QUESTION" => Ok(Self::SecurityQuestion),
            "TOTP" => Ok(Self::Totp),
            other => Err(MeterError::Config(format!(
                "unsupported mfa_type {other}"
            ))),
        }
    }
}

/// Target utility portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    /// ConEdison
    Coned,
    /// Orange and Rockland Utility
    Oru,
}

impl Site {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coned => "coned",
            Self::Oru => "oru",
        }
    }

    /// Web hostname of the customer portal.
    pub fn host(&self) -> &'static str {
        match self {
            Self::Coned => "www.coned.com",
            Self::Oru => "www.oru.com",
        }
    }

    /// Short internal data-site tag, used for log correlation only.
    pub fn data_site(&self) -> &'static str {
        match self {
            Self::Coned => "cned",
            Self::Oru => "oru",
        }
    }

    pub fn login_url(&self) -> String {
        format!("https://{}/en/login", self.host())
    }

    pub fn energy_use_url(&self) -> String {
        format!(
            "https://{}/en/accounts-billing/my-account/energy-use",
            self.host()
        )
    }
}

impl FromStr for Site {
    type Err = MeterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coned" => Ok(Self::Coned),
            "oru" => Ok(Self::Oru),
            other => Err(MeterError::Config(format!("unsupported site {other}"))),
        }
    }
}

/// Immutable description of one utility account plus the operational knobs
/// of a browse session. Validated by [`crate::Meter::new`] before use.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub email: String,
    pub password: String,
    pub mfa_type: MfaType,
    pub mfa_secret: String,
    pub account_uuid: String,
    /// Meter number with leading zeros stripped.
    pub meter_number: String,
    /// For accounts with multiple meters.
    pub account_number: Option<String>,
    pub site: Site,
    pub headless: bool,
    /// Log screenshots as base64 data URIs in addition to writing files.
    pub debug: bool,
    /// Directory the fixed-name diagnostic screenshots are written to.
    pub screenshot_dir: PathBuf,
    /// Upper bound on waiting for the intercepted usage response.
    pub capture_timeout: Duration,
}

impl AccountConfig {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        mfa_type: MfaType,
        mfa_secret: impl Into<String>,
        account_uuid: impl Into<String>,
        meter_number: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            mfa_type,
            mfa_secret: mfa_secret.into(),
            account_uuid: account_uuid.into(),
            meter_number: meter_number.into().trim_start_matches('0').to_string(),
            account_number: None,
            site: Site::Coned,
            headless: true,
            debug: false,
            screenshot_dir: PathBuf::from("."),
            capture_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_site(mut self, site: Site) -> Self {
        self.site = site;
        self
    }

    pub fn with_account_number(mut self, account_number: impl Into<String>) -> Self {
        self.account_number = Some(account_number.into());
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = dir.into();
        self
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    /// Checks the required fields in a fixed order and names the first one
    /// that is missing. No partially-valid config ever reaches a browse.
    pub(crate) fn validate(&self) -> Result<(), MeterError> {
        let required = [
            ("email", &self.email),
            ("password", &self.password),
            ("mfa_secret", &self.mfa_secret),
            ("account_uuid", &self.account_uuid),
            ("meter_number", &self.meter_number),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(MeterError::Config(format!("{field} is missing")));
            }
        }
        Ok(())
    }
}
