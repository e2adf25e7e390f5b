//! chromiumoxide implementation of the browsing-engine seam.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::FlowError;

use super::{CaptureHandle, LaunchOptions, UrlPredicate, UsageEngine, UsageSession};

/// CDP request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 60;
/// Polling interval for url/element readiness waits.
const POLL_INTERVAL_MS: u64 = 500;
/// The response body only becomes fetchable once the browser finishes
/// loading the resource, so the fetch is retried for a while.
const BODY_FETCH_ATTEMPTS: u32 = 20;

/// Launches headless Chromium sessions via the DevTools protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumEngine;

impl ChromiumEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UsageEngine for ChromiumEngine {
    type Session = ChromiumSession;

    async fn launch(&self, options: &LaunchOptions) -> Result<Self::Session, FlowError> {
        info!("Initializing browser session...");

        // Unique user data dir so concurrent sessions never share profile state
        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let user_data_dir = std::env::temp_dir().join(format!("meter-service-{}", unique_id));

        let mut builder = BrowserConfig::builder()
            .window_size(options.width, options.height)
            .user_data_dir(&user_data_dir)
            .no_sandbox()
            .request_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if let Ok(chrome_path) =
            std::env::var("CHROME_PATH").or_else(|_| std::env::var("CHROMIUM_PATH"))
        {
            builder = builder.chrome_executable(chrome_path);
        }

        if !options.headless {
            builder = builder.with_head();
        }

        let browser_config = builder
            .build()
            .map_err(|e| FlowError::BrowserInit(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| FlowError::BrowserInit(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FlowError::BrowserInit(e.to_string()))?;

        info!("Browser session initialized");
        Ok(ChromiumSession {
            browser: Some(browser),
            page: Some(page),
            handler_task: Some(handler_task),
            debug: options.debug,
        })
    }
}

pub struct ChromiumSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
    debug: bool,
}

impl ChromiumSession {
    fn page(&self) -> Result<&Page, FlowError> {
        self.page
            .as_ref()
            .ok_or_else(|| FlowError::BrowserInit("session already closed".into()))
    }

    /// Input lookup by accessible label, the way the portal markup
    /// associates them: `<label for=...>` pointing at the input's id.
    async fn find_labeled_input(
        &self,
        label: &str,
    ) -> Result<chromiumoxide::Element, FlowError> {
        let query = format!(
            r#"//input[@id = //label[contains(normalize-space(string(.)), "{label}")]/@for]"#
        );
        self.page()?
            .find_xpath(&query)
            .await
            .map_err(|e| FlowError::ElementNotFound(format!("input labeled '{label}': {e}")))
    }

    async fn eval_bool(&self, script: &str) -> Result<bool, FlowError> {
        let result = self
            .page()?
            .evaluate(script)
            .await
            .map_err(|e| FlowError::JavaScript(e.to_string()))?;
        Ok(result.into_value::<bool>().unwrap_or(false))
    }
}

#[async_trait]
impl UsageSession for ChromiumSession {
    async fn goto(&mut self, url: &str) -> Result<(), FlowError> {
        let page = self.page()?;
        page.goto(url)
            .await
            .map_err(|e| FlowError::Navigation(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| FlowError::Navigation(e.to_string()))?;
        debug!("navigated to {url}");
        Ok(())
    }

    async fn fill_labeled(&mut self, label: &str, value: &str) -> Result<(), FlowError> {
        let element = self.find_labeled_input(label).await?;
        element
            .click()
            .await
            .map_err(|e| FlowError::ElementNotFound(format!("input labeled '{label}': {e}")))?;
        element
            .type_str(value)
            .await
            .map_err(|e| FlowError::JavaScript(format!("typing into '{label}': {e}")))?;
        debug!("filled input labeled '{label}'");
        Ok(())
    }

    async fn press_key(&mut self, label: &str, key: &str) -> Result<(), FlowError> {
        let element = self.find_labeled_input(label).await?;
        element
            .press_key(key)
            .await
            .map_err(|e| FlowError::JavaScript(format!("pressing {key} on '{label}': {e}")))?;
        Ok(())
    }

    async fn click_button(&mut self, name: &str) -> Result<(), FlowError> {
        let script = format!(
            r#"
            (function() {{
                var buttons = document.querySelectorAll('button');
                for (var i = 0; i < buttons.length; i++) {{
                    if (buttons[i].textContent.trim().indexOf('{name}') >= 0) {{
                        buttons[i].click();
                        return true;
                    }}
                }}
                return false;
            }})()
            "#
        );
        if !self.eval_bool(script.as_str()).await? {
            return Err(FlowError::ElementNotFound(format!("button '{name}'")));
        }
        debug!("clicked button '{name}'");
        Ok(())
    }

    async fn click_link(&mut self, name: &str) -> Result<(), FlowError> {
        // Case-insensitive: the portal renders the link uppercase via CSS
        let script = format!(
            r#"
            (function() {{
                var links = document.querySelectorAll('a');
                for (var i = 0; i < links.length; i++) {{
                    if (links[i].textContent.trim().toUpperCase().indexOf('{}') >= 0) {{
                        links[i].click();
                        return true;
                    }}
                }}
                return false;
            }})()
            "#,
            name.to_uppercase()
        );
        if !self.eval_bool(script.as_str()).await? {
            return Err(FlowError::ElementNotFound(format!("link '{name}'")));
        }
        debug!("clicked link '{name}'");
        Ok(())
    }

    async fn arm_capture(&mut self, predicate: UrlPredicate) -> Result<CaptureHandle, FlowError> {
        let page = self.page()?.clone();
        page.execute(EnableParams::default())
            .await
            .map_err(|e| FlowError::Capture(format!("enabling network events: {e}")))?;

        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| FlowError::Capture(format!("arming response observer: {e}")))?;

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                if !predicate(&event.response.url) {
                    continue;
                }
                debug!("matched usage response: {}", event.response.url);
                let _ = tx.send(fetch_body(&page, event.request_id.clone()).await);
                return;
            }
            // stream ended without a match; the receiver observes the
            // closed channel and reports a capture error
        });

        Ok(CaptureHandle::new(rx, Some(task)))
    }

    async fn wait_for_url(&mut self, url: &str, timeout: Duration) -> Result<(), FlowError> {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            let current = self
                .page()?
                .evaluate("window.location.href")
                .await
                .map_err(|e| FlowError::JavaScript(e.to_string()))?
                .into_value::<String>()
                .unwrap_or_default();
            if current.starts_with(url) {
                debug!("reached {url} after {:?}", start.elapsed());
                return Ok(());
            }
            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
        Err(FlowError::Timeout(format!("url {url} not reached")))
    }

    async fn click_by_text(&mut self, text: &str, timeout: Duration) -> Result<(), FlowError> {
        let script = format!(
            r#"
            (function() {{
                var items = document.querySelectorAll('li');
                for (var i = 0; i < items.length; i++) {{
                    if (items[i].textContent.indexOf('{text}') >= 0) {{
                        items[i].click();
                        return true;
                    }}
                }}
                return false;
            }})()
            "#
        );
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.eval_bool(script.as_str()).await? {
                debug!("clicked list item containing '{text}'");
                return Ok(());
            }
            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
        Err(FlowError::Timeout(format!(
            "list item containing '{text}' did not appear"
        )))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), FlowError> {
        let bytes = self
            .page()?
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map_err(|e| FlowError::Screenshot(e.to_string()))?;
        if self.debug {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            debug!("screenshot {path:?}: data:image/png;base64,{encoded}");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FlowError> {
        info!("Closing browser session...");
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("failed to close page: {e}");
            }
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("failed to close browser: {e}");
            }
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        info!("Browser session closed");
        Ok(())
    }
}

/// Fetch the body of an intercepted response, retrying until the browser
/// has finished loading the resource.
async fn fetch_body(page: &Page, request_id: RequestId) -> Result<String, FlowError> {
    for attempt in 0..BODY_FETCH_ATTEMPTS {
        match page
            .execute(GetResponseBodyParams::new(request_id.clone()))
            .await
        {
            Ok(response) => {
                let body = response.result;
                if body.base64_encoded {
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(body.body)
                        .map_err(|e| FlowError::Capture(format!("decoding body: {e}")))?;
                    return String::from_utf8(bytes)
                        .map_err(|e| FlowError::Capture(format!("non-utf8 body: {e}")));
                }
                return Ok(body.body);
            }
            Err(e) => {
                debug!("response body not ready yet (attempt {}): {e}", attempt + 1);
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
    Err(FlowError::Capture(
        "response body unavailable after retries".into(),
    ))
}
