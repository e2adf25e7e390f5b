//! Smart meter scraper: the authenticated browse flow plus read parsing.
//!
//! The utility exposes no public data API. The only path to the usage data
//! is to log in the way a customer does, open the energy-use dashboard and
//! intercept the JSON the page fetches in the background for its chart.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{AccountConfig, MfaType};
use crate::engine::{ChromiumEngine, LaunchOptions, UsageEngine, UsageSession};
use crate::error::{FlowError, MeterError};
use crate::totp;

use super::types::{MeterReading, UsagePayload};

/// Viewport of the browsing session.
const VIEWPORT_WIDTH: u32 = 1920;
const VIEWPORT_HEIGHT: u32 = 1080;

/// Cooldown before the single extra extraction attempt. Deliberately a flat
/// 5 minutes with no backoff: long enough to not hammer the site, and there
/// is never a third attempt.
const RETRY_COOLDOWN: Duration = Duration::from_secs(300);

/// Best-effort readiness waits. Timeouts here are tolerated; the armed
/// capture is the actual correctness gate.
const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const CHART_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// URL markers of the internal usage endpoint the dashboard calls.
const USAGE_API_MARKER: &str = "cws-real-time-ami-v1";
const USAGE_RESOURCE_MARKER: &str = "usage";

/// Accessible labels / control names on the portal.
const EMAIL_LABEL: &str = "Email Address";
const PASSWORD_LABEL: &str = "Password";
const MFA_CODE_LABEL: &str = "Enter Code";
const LOGIN_BUTTON: &str = "Log In";
const ENERGY_USE_LINK: &str = "VIEW ENERGY USE";
/// Chart legend entry whose appearance signals the chart (and therefore
/// the underlying data fetch) has completed.
const CHART_LEGEND_TEXT: &str = "Weather";

/// A response qualifies as the usage data call when its request URL carries
/// both the internal API segment and the usage resource name.
pub(crate) fn is_usage_response(url: &str) -> bool {
    url.contains(USAGE_API_MARKER) && url.contains(USAGE_RESOURCE_MARKER)
}

/// A smart energy meter of ConEdison or Orange and Rockland Utility.
///
/// Construction validates the account configuration eagerly; every call to
/// [`Meter::all_reads`] / [`Meter::last_read`] runs one fresh browsing
/// session and returns freshly parsed readings. Nothing is cached.
#[derive(Debug)]
pub struct Meter<E: UsageEngine = ChromiumEngine> {
    config: AccountConfig,
    engine: E,
}

impl Meter<ChromiumEngine> {
    /// Validate `config` and build a meter backed by headless Chromium.
    pub fn new(config: AccountConfig) -> Result<Self, MeterError> {
        Self::with_engine(config, ChromiumEngine::new())
    }
}

impl<E: UsageEngine> Meter<E> {
    /// Build a meter on top of a specific browsing engine.
    pub fn with_engine(config: AccountConfig, engine: E) -> Result<Self, MeterError> {
        config.validate()?;
        Ok(Self { config, engine })
    }

    /// Return all available meter read values and the unit of measurement.
    ///
    /// One browse; if it fails, one more attempt after a fixed 5-minute
    /// cooldown, whose result is used either way. Readings with no measured
    /// value are filtered out; source order is preserved.
    pub async fn all_reads(&self) -> Result<Vec<MeterReading>, MeterError> {
        let raw = match self.browse().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("failed retrieving the usage data, trying again in 5 minutes: {e}");
                sleep(RETRY_COOLDOWN).await;
                self.browse().await.map_err(|e| {
                    error!("usage extraction failed after retry: {e}");
                    MeterError::Extraction
                })?
            }
        };

        let reads = parse_reads(&raw)?;
        for read in &reads {
            info!(
                "got read = {} {} {} {}",
                read.start_time, read.end_time, read.value, read.unit_of_measurement
            );
        }
        Ok(reads)
    }

    /// Return the last meter read as `(start, end, value, unit)`.
    pub async fn last_read(&self) -> Result<(String, String, f64, String), MeterError> {
        let mut reads = self.all_reads().await?;
        let last = reads.pop().ok_or(MeterError::NoReads)?;
        Ok((
            last.start_time,
            last.end_time,
            last.value,
            last.unit_of_measurement,
        ))
    }

    /// Run one authenticated browsing session and return the raw text of
    /// the intercepted usage response.
    pub async fn browse(&self) -> Result<String, FlowError> {
        info!(
            site = self.config.site.as_str(),
            data_site = self.config.site.data_site(),
            "starting usage extraction"
        );

        self.cleanup_screenshots();

        let options = LaunchOptions {
            width: VIEWPORT_WIDTH,
            height: VIEWPORT_HEIGHT,
            headless: self.config.headless,
            debug: self.config.debug,
        };
        let mut session = self.engine.launch(&options).await?;

        // The session is released exactly once, whichever step failed.
        let result = self.run_session(&mut session).await;
        if let Err(e) = session.close().await {
            debug!("error closing browser session: {e}");
        }
        result
    }

    async fn run_session(&self, session: &mut E::Session) -> Result<String, FlowError> {
        session.goto(&self.config.site.login_url()).await?;

        session
            .fill_labeled(EMAIL_LABEL, &self.config.email)
            .await?;
        session
            .fill_labeled(PASSWORD_LABEL, &self.config.password)
            .await?;
        self.snapshot(session, "meter1-1").await;
        session.click_button(LOGIN_BUTTON).await?;
        self.snapshot(session, "meter1-2").await;

        // TOTP codes are short-lived, so the code is derived right before
        // it is submitted.
        let mfa_code = match self.config.mfa_type {
            MfaType::Totp => totp::current_code(&self.config.mfa_secret)?,
            MfaType::SecurityQuestion => self.config.mfa_secret.clone(),
        };
        session.fill_labeled(MFA_CODE_LABEL, &mfa_code).await?;
        self.snapshot(session, "meter2-1").await;
        // The code field has no submit button of its own
        session.press_key(MFA_CODE_LABEL, "Enter").await?;

        // Armed before the trigger so a fast response is never missed
        let capture = session.arm_capture(is_usage_response).await?;
        session.click_link(ENERGY_USE_LINK).await?;

        if let Err(e) = session
            .wait_for_url(&self.config.site.energy_use_url(), PAGE_LOAD_TIMEOUT)
            .await
        {
            warn!("timeout loading energy use page: {e}");
        }
        if let Err(e) = session
            .click_by_text(CHART_LEGEND_TEXT, CHART_READY_TIMEOUT)
            .await
        {
            info!("timeout waiting for chart to load: {e}");
        }
        self.snapshot(session, "meter3-1").await;

        let raw = capture.wait(self.config.capture_timeout).await?;
        debug!("raw_data = {raw}");
        Ok(raw)
    }

    /// Diagnostic screenshot at a phase boundary. Purely for post-hoc
    /// debugging; failures are logged and never affect the flow.
    async fn snapshot(&self, session: &mut E::Session, tag: &str) {
        let path = self.config.screenshot_dir.join(format!("{tag}.png"));
        match session.screenshot(&path).await {
            Ok(()) => debug!("{tag}"),
            Err(e) => debug!("screenshot {tag} failed: {e}"),
        }
    }

    /// Remove screenshot artifacts of a prior run. Best effort.
    fn cleanup_screenshots(&self) {
        let entries = match std::fs::read_dir(&self.config.screenshot_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("error listing screenshot directory: {e}");
                return;
            }
        };
        for entry in entries.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("meter") && name.ends_with(".png") {
                if let Err(e) = std::fs::remove_file(&path) {
                    debug!("error while deleting file {path:?}: {e}");
                }
            }
        }
    }
}

/// Decode a raw capture into normalized readings.
///
/// An embedded error object surfaces as [`MeterError::RemoteApi`]; any
/// decode failure is logged and collapsed into the uniform
/// [`MeterError::Extraction`].
pub(crate) fn parse_reads(raw: &str) -> Result<Vec<MeterReading>, MeterError> {
    let payload: UsagePayload = serde_json::from_str(raw).map_err(|e| {
        error!("failed to decode usage payload: {e}");
        MeterError::Extraction
    })?;

    if let Some(api_error) = payload.error {
        info!("got JSON error back = {}", api_error.details);
        return Err(MeterError::RemoteApi(api_error.details));
    }

    let unit = payload.unit;
    Ok(payload
        .reads
        .into_iter()
        .filter_map(|read| {
            read.value.map(|value| MeterReading {
                start_time: read.start_time,
                end_time: read.end_time,
                value,
                unit_of_measurement: unit.clone(),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CaptureHandle;

    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    // RFC 6238 test secret, base32
    const TOTP_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    const USAGE_JSON: &str = r#"{
        "unit": "kWh",
        "reads": [
            {"startTime": "t0", "endTime": "t1", "value": null},
            {"startTime": "t1", "endTime": "t2", "value": 3.2}
        ]
    }"#;

    #[derive(Debug, Default)]
    struct MockState {
        calls: Vec<String>,
        launches: u32,
        close_calls: u32,
        /// Launch numbers (1-based) for which the capture resolves to an error.
        failing_attempts: u32,
        fail_click_link: bool,
        raw: String,
    }

    #[derive(Debug, Clone)]
    struct MockEngine(Arc<Mutex<MockState>>);

    impl MockEngine {
        fn returning(raw: &str) -> Self {
            Self(Arc::new(Mutex::new(MockState {
                raw: raw.to_string(),
                ..Default::default()
            })))
        }

        fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
            self.0.lock().unwrap()
        }
    }

    struct MockSession(Arc<Mutex<MockState>>);

    impl MockSession {
        fn record(&self, call: String) {
            self.0.lock().unwrap().calls.push(call);
        }
    }

    #[async_trait]
    impl UsageEngine for MockEngine {
        type Session = MockSession;

        async fn launch(&self, options: &LaunchOptions) -> Result<Self::Session, FlowError> {
            let mut state = self.0.lock().unwrap();
            state.launches += 1;
            state
                .calls
                .push(format!("launch:{}x{}", options.width, options.height));
            Ok(MockSession(self.0.clone()))
        }
    }

    #[async_trait]
    impl UsageSession for MockSession {
        async fn goto(&mut self, url: &str) -> Result<(), FlowError> {
            self.record(format!("goto:{url}"));
            Ok(())
        }

        async fn fill_labeled(&mut self, label: &str, value: &str) -> Result<(), FlowError> {
            self.record(format!("fill:{label}={value}"));
            Ok(())
        }

        async fn press_key(&mut self, label: &str, key: &str) -> Result<(), FlowError> {
            self.record(format!("press:{label}:{key}"));
            Ok(())
        }

        async fn click_button(&mut self, name: &str) -> Result<(), FlowError> {
            self.record(format!("button:{name}"));
            Ok(())
        }

        async fn click_link(&mut self, name: &str) -> Result<(), FlowError> {
            self.record(format!("link:{name}"));
            if self.0.lock().unwrap().fail_click_link {
                return Err(FlowError::ElementNotFound(format!("link '{name}'")));
            }
            Ok(())
        }

        async fn arm_capture(
            &mut self,
            predicate: crate::engine::UrlPredicate,
        ) -> Result<CaptureHandle, FlowError> {
            self.record("arm_capture".to_string());
            assert!(predicate(
                "https://www.coned.com/sitecore/api/ssc/ConEd-Cms-Services-Controllers-OpowerService/0/cws-real-time-ami-v1/usage"
            ));
            let state = self.0.lock().unwrap();
            if state.launches <= state.failing_attempts {
                Ok(CaptureHandle::resolved(Err(FlowError::Capture(
                    "no usage response".into(),
                ))))
            } else {
                Ok(CaptureHandle::resolved(Ok(state.raw.clone())))
            }
        }

        async fn wait_for_url(&mut self, url: &str, _timeout: Duration) -> Result<(), FlowError> {
            self.record(format!("wait_url:{url}"));
            // readiness hints time out in these tests; the flow tolerates it
            Err(FlowError::Timeout("page load".into()))
        }

        async fn click_by_text(&mut self, text: &str, _timeout: Duration) -> Result<(), FlowError> {
            self.record(format!("click_text:{text}"));
            Err(FlowError::Timeout("chart legend".into()))
        }

        async fn screenshot(&mut self, path: &Path) -> Result<(), FlowError> {
            self.record(format!(
                "screenshot:{}",
                path.file_name().unwrap().to_string_lossy()
            ));
            Ok(())
        }

        async fn close(&mut self) -> Result<(), FlowError> {
            let mut state = self.0.lock().unwrap();
            state.close_calls += 1;
            state.calls.push("close".to_string());
            Ok(())
        }
    }

    fn config(mfa_type: MfaType) -> AccountConfig {
        AccountConfig::new(
            "user@example.com",
            "hunter2",
            mfa_type,
            TOTP_SECRET,
            "uuid",
            "123456",
        )
        .with_screenshot_dir(std::env::temp_dir())
    }

    fn meter(engine: &MockEngine, mfa_type: MfaType) -> Meter<MockEngine> {
        Meter::with_engine(config(mfa_type), engine.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_browse_step_order() {
        let engine = MockEngine::returning(USAGE_JSON);
        let raw = meter(&engine, MfaType::SecurityQuestion)
            .browse()
            .await
            .unwrap();
        assert_eq!(raw, USAGE_JSON);

        let state = engine.state();
        let expected = vec![
            "launch:1920x1080".to_string(),
            "goto:https://www.coned.com/en/login".to_string(),
            "fill:Email Address=user@example.com".to_string(),
            "fill:Password=hunter2".to_string(),
            "screenshot:meter1-1.png".to_string(),
            "button:Log In".to_string(),
            "screenshot:meter1-2.png".to_string(),
            format!("fill:Enter Code={TOTP_SECRET}"),
            "screenshot:meter2-1.png".to_string(),
            "press:Enter Code:Enter".to_string(),
            "arm_capture".to_string(),
            "link:VIEW ENERGY USE".to_string(),
            "wait_url:https://www.coned.com/en/accounts-billing/my-account/energy-use".to_string(),
            "click_text:Weather".to_string(),
            "screenshot:meter3-1.png".to_string(),
            "close".to_string(),
        ];
        assert_eq!(state.calls, expected);
    }

    #[tokio::test]
    async fn test_totp_code_is_derived_not_literal() {
        let engine = MockEngine::returning(USAGE_JSON);
        meter(&engine, MfaType::Totp).browse().await.unwrap();

        let state = engine.state();
        let fill = state
            .calls
            .iter()
            .find(|c| c.starts_with("fill:Enter Code="))
            .unwrap();
        let code = fill.strip_prefix("fill:Enter Code=").unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(code, TOTP_SECRET);
    }

    #[tokio::test]
    async fn test_session_closed_once_when_trigger_fails() {
        let engine = MockEngine::returning(USAGE_JSON);
        engine.state().fail_click_link = true;

        let err = meter(&engine, MfaType::SecurityQuestion)
            .browse()
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ElementNotFound(_)));
        assert_eq!(engine.state().close_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_cooldown_then_success() {
        let engine = MockEngine::returning(USAGE_JSON);
        engine.state().failing_attempts = 1;

        let reads = meter(&engine, MfaType::SecurityQuestion)
            .all_reads()
            .await
            .unwrap();
        assert_eq!(reads.len(), 1);
        let state = engine.state();
        assert_eq!(state.launches, 2);
        assert_eq!(state.close_calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_third_attempt() {
        let engine = MockEngine::returning(USAGE_JSON);
        engine.state().failing_attempts = 2;

        let err = meter(&engine, MfaType::SecurityQuestion)
            .all_reads()
            .await
            .unwrap_err();
        assert!(matches!(err, MeterError::Extraction));
        assert_eq!(engine.state().launches, 2);
    }

    #[tokio::test]
    async fn test_no_retry_when_first_attempt_succeeds() {
        let engine = MockEngine::returning(USAGE_JSON);
        meter(&engine, MfaType::SecurityQuestion)
            .all_reads()
            .await
            .unwrap();
        assert_eq!(engine.state().launches, 1);
    }

    #[tokio::test]
    async fn test_last_read_returns_final_reading() {
        let raw = r#"{
            "unit": "kWh",
            "reads": [
                {"startTime": "t0", "endTime": "t1", "value": 1.0},
                {"startTime": "t1", "endTime": "t2", "value": 2.0}
            ]
        }"#;
        let engine = MockEngine::returning(raw);
        let (start, end, value, unit) = meter(&engine, MfaType::SecurityQuestion)
            .last_read()
            .await
            .unwrap();
        assert_eq!(start, "t1");
        assert_eq!(end, "t2");
        assert_eq!(value, 2.0);
        assert_eq!(unit, "kWh");
    }

    #[tokio::test]
    async fn test_last_read_on_all_null_values() {
        let raw = r#"{
            "unit": "kWh",
            "reads": [
                {"startTime": "t0", "endTime": "t1", "value": null},
                {"startTime": "t1", "endTime": "t2", "value": null}
            ]
        }"#;
        let engine = MockEngine::returning(raw);
        let err = meter(&engine, MfaType::SecurityQuestion)
            .last_read()
            .await
            .unwrap_err();
        assert!(matches!(err, MeterError::NoReads));
    }

    #[tokio::test]
    async fn test_remote_api_error_surfaces_detail() {
        let engine = MockEngine::returning(r#"{"error":{"details":"account locked"}}"#);
        let err = meter(&engine, MfaType::SecurityQuestion)
            .all_reads()
            .await
            .unwrap_err();
        match err {
            MeterError::RemoteApi(details) => assert_eq!(details, "account locked"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_filters_null_values() {
        let reads = parse_reads(USAGE_JSON).unwrap();
        assert_eq!(
            reads,
            vec![MeterReading {
                start_time: "t1".to_string(),
                end_time: "t2".to_string(),
                value: 3.2,
                unit_of_measurement: "kWh".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_empty_reads() {
        let reads = parse_reads(r#"{"unit":"therms","reads":[]}"#).unwrap();
        assert!(reads.is_empty());
    }

    #[test]
    fn test_parse_malformed_json_collapses_to_extraction() {
        assert!(matches!(
            parse_reads("not json").unwrap_err(),
            MeterError::Extraction
        ));
        assert!(matches!(
            parse_reads(r#"{"reads": 7}"#).unwrap_err(),
            MeterError::Extraction
        ));
    }

    #[test]
    fn test_usage_response_predicate() {
        assert!(is_usage_response(
            "https://www.coned.com/api/cws-real-time-ami-v1/usage?x=1"
        ));
        assert!(!is_usage_response(
            "https://www.coned.com/api/cws-real-time-ami-v1/billing"
        ));
        assert!(!is_usage_response("https://www.coned.com/api/other/usage"));
    }

    #[test]
    fn test_cleanup_removes_only_meter_screenshots() {
        let dir = std::env::temp_dir().join(format!(
            "meter-service-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("meter1-1.png"), b"png").unwrap();
        std::fs::write(dir.join("notes.txt"), b"keep").unwrap();

        let engine = MockEngine::returning(USAGE_JSON);
        let config = config(MfaType::SecurityQuestion).with_screenshot_dir(&dir);
        let meter = Meter::with_engine(config, engine).unwrap();
        meter.cleanup_screenshots();

        assert!(!dir.join("meter1-1.png").exists());
        assert!(dir.join("notes.txt").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let engine = MockEngine::returning(USAGE_JSON);
        let mut config = config(MfaType::SecurityQuestion);
        config.email.clear();
        let err = Meter::with_engine(config, engine).unwrap_err();
        assert!(err.to_string().contains("email"));
    }
}
