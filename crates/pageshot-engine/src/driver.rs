//! Browser driver abstraction.
//!
//! The pool, consent engine and capture executor talk to the browser through
//! these traits. Production uses the CDP-backed implementation in
//! [`crate::cdp`]; tests swap in scripted in-memory drivers.

use async_trait::async_trait;
use std::time::Duration;

use pageshot_models::{ClipRegion, ImageFormat, Viewport};

use crate::error::DriverResult;

/// Launches browser processes on demand.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self) -> DriverResult<Box<dyn BrowserHandle>>;
}

/// One live browser process.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open a fresh page in the existing process.
    async fn new_page(&self) -> DriverResult<Box<dyn PageSession>>;

    /// Whether the process connection is still alive.
    fn is_connected(&self) -> bool;

    /// Resolves when the process connection is lost. Resolves immediately if
    /// the connection is already gone.
    async fn wait_disconnected(&self);

    /// Terminate the process. Closing an already-dead process is not an
    /// error.
    async fn close(&self) -> DriverResult<()>;
}

/// A screenshot request as the driver sees it, already reduced from the
/// higher-level render options.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotRequest {
    pub format: ImageFormat,
    /// Encoder quality, only meaningful for lossy formats.
    pub quality: Option<u8>,
    pub full_page: bool,
    pub clip: Option<ClipRegion>,
}

/// A clickable element located by the consent probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementHit {
    /// CSS path to the element within its document.
    pub css: String,
    /// CSS path to the containing iframe, if the element lives in one.
    pub frame_css: Option<String>,
    /// Element center in main-frame viewport coordinates.
    pub x: f64,
    pub y: f64,
    /// Visible label, for logging.
    pub label: String,
}

/// How a click is delivered to an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClickMethod {
    /// Resolve the element and click it through the automation layer.
    Element,
    /// Scroll the element into view, then dispatch raw mouse events at its
    /// center.
    Forced,
    /// Invoke the element's click handler from injected script.
    Script,
    /// Dispatch raw mouse events at the recorded coordinates without
    /// resolving the element.
    Pointer,
}

impl ClickMethod {
    /// Escalation order: least to most invasive.
    pub const ALL: [ClickMethod; 4] = [
        ClickMethod::Element,
        ClickMethod::Forced,
        ClickMethod::Script,
        ClickMethod::Pointer,
    ];
}

/// One page within a browser process.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Whether the page target is still usable.
    fn is_open(&self) -> bool;

    /// Navigate and wait for the document to become ready.
    async fn goto(&self, url: &str) -> DriverResult<()>;

    /// Return the page to a neutral blank state so it can be reused.
    async fn reset(&self, timeout: Duration) -> DriverResult<()>;

    /// Drop all cookies held by the browser.
    async fn clear_cookies(&self) -> DriverResult<()>;

    async fn set_viewport(&self, viewport: &Viewport) -> DriverResult<()>;

    async fn set_user_agent(&self, user_agent: &str) -> DriverResult<()>;

    async fn emulate_dark_mode(&self, enabled: bool) -> DriverResult<()>;

    /// Append a stylesheet to the current document.
    async fn inject_css(&self, css: &str) -> DriverResult<()>;

    /// Poll for a selector to appear. Returns false if it never showed up
    /// within the timeout.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<bool>;

    /// Evaluate a script expression in the page, returning its JSON result.
    async fn evaluate(&self, expression: &str) -> DriverResult<serde_json::Value>;

    /// Click a located element using the given delivery method.
    async fn click(&self, hit: &ElementHit, method: ClickMethod) -> DriverResult<()>;

    async fn screenshot(&self, request: &ScreenshotRequest) -> DriverResult<Vec<u8>>;

    /// Close the page target. Closing an already-closed page is not an
    /// error.
    async fn close(&self) -> DriverResult<()>;
}
