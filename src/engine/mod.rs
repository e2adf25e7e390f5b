//! Browsing-engine capability seam.
//!
//! The extraction flow only needs a handful of page-automation primitives:
//! navigate, fill an input found by its accessible label, click controls by
//! their visible name, and observe the next network response whose request
//! URL satisfies a predicate. [`UsageEngine`]/[`UsageSession`] carve exactly
//! that surface out of the underlying browser so the flow can run against a
//! test double.

mod chromium;

pub use chromium::{ChromiumEngine, ChromiumSession};

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::FlowError;

/// Predicate over a response's request URL.
pub type UrlPredicate = fn(&str) -> bool;

/// Options for launching one isolated browsing session.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub width: u32,
    pub height: u32,
    pub headless: bool,
    /// Log screenshots as base64 data URIs.
    pub debug: bool,
}

#[async_trait]
pub trait UsageEngine: Send + Sync {
    type Session: UsageSession;

    /// Start an isolated browsing session. Fatal to the call on failure.
    async fn launch(&self, options: &LaunchOptions) -> Result<Self::Session, FlowError>;
}

/// One exclusively-owned browsing session.
#[async_trait]
pub trait UsageSession: Send {
    async fn goto(&mut self, url: &str) -> Result<(), FlowError>;

    /// Fill the input associated with the given accessible label.
    async fn fill_labeled(&mut self, label: &str, value: &str) -> Result<(), FlowError>;

    /// Press a key on the input associated with the given label.
    async fn press_key(&mut self, label: &str, key: &str) -> Result<(), FlowError>;

    /// Click the button whose visible name contains `name`.
    async fn click_button(&mut self, name: &str) -> Result<(), FlowError>;

    /// Click the link whose visible name contains `name` (case-insensitive).
    async fn click_link(&mut self, name: &str) -> Result<(), FlowError>;

    /// Arm an observer for the next network response whose request URL
    /// satisfies `predicate`. Must be called before the action that triggers
    /// the request; the returned handle is awaited afterwards.
    async fn arm_capture(&mut self, predicate: UrlPredicate) -> Result<CaptureHandle, FlowError>;

    /// Wait until the page URL starts with `url`.
    async fn wait_for_url(&mut self, url: &str, timeout: Duration) -> Result<(), FlowError>;

    /// Wait for a list item containing `text` to appear and click it.
    async fn click_by_text(&mut self, text: &str, timeout: Duration) -> Result<(), FlowError>;

    async fn screenshot(&mut self, path: &Path) -> Result<(), FlowError>;

    /// Release the session. Called exactly once per session, whatever the
    /// outcome of the preceding steps.
    async fn close(&mut self) -> Result<(), FlowError>;
}

/// Awaitable handle for one armed response capture.
///
/// Resolves to the body text of the first matching response. Created before
/// the triggering action and awaited after it, so a response arriving in
/// between is never lost.
pub struct CaptureHandle {
    rx: oneshot::Receiver<Result<String, FlowError>>,
    task: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub(crate) fn new(
        rx: oneshot::Receiver<Result<String, FlowError>>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { rx, task }
    }

    /// Handle that resolves immediately. Intended for engine test doubles.
    pub fn resolved(result: Result<String, FlowError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx, task: None }
    }

    /// Handle that never resolves. Intended for engine test doubles.
    pub fn pending() -> Self {
        let (tx, rx) = oneshot::channel();
        // keep the sender alive inside a parked task so the channel stays open
        let task = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Block until the matching response arrives or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> Result<String, FlowError> {
        let result = match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(FlowError::Capture(
                "response observer stopped before a matching response".into(),
            )),
            Err(_) => Err(FlowError::Timeout(format!(
                "no matching usage response within {timeout:?}"
            ))),
        };
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Err(e) = &result {
            debug!("capture wait failed: {e}");
        }
        result
    }
}
