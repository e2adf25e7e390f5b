use thiserror::Error;

/// Public error taxonomy of the meter scraper.
///
/// Flow-step causes ([`FlowError`]) are deliberately collapsed into
/// [`MeterError::Extraction`]; the specific cause is logged only.
#[derive(Error, Debug)]
pub enum MeterError {
    #[error("error initializing meter data - {0}")]
    Config(String),

    #[error("remote API error: {0}")]
    RemoteApi(String),

    #[error("error requesting meter data")]
    Extraction,

    #[error("no meter reads available")]
    NoReads,
}

/// Internal failure of one step of the browsing flow.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("browser launch error: {0}")]
    BrowserInit(String),

    #[error("navigation error: {0}")]
    Navigation(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("javascript error: {0}")]
    JavaScript(String),

    #[error("screenshot error: {0}")]
    Screenshot(String),

    #[error("mfa code error: {0}")]
    Totp(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("usage capture error: {0}")]
    Capture(String),
}
