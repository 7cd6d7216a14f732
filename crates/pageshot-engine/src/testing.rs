//! Scripted in-memory driver implementations for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use pageshot_models::Viewport;

use crate::driver::{
    BrowserDriver, BrowserHandle, ClickMethod, ElementHit, PageSession, ScreenshotRequest,
};
use crate::error::{DriverError, DriverResult};

/// Driver that fabricates browsers without any real process.
pub struct MockDriver {
    launches: AtomicUsize,
    fail_launches: AtomicUsize,
    launch_delay: Duration,
    page_seq: Arc<AtomicUsize>,
    browsers: Mutex<Vec<Arc<MockBrowser>>>,
    pages: Arc<Mutex<Vec<Arc<MockPage>>>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            launches: AtomicUsize::new(0),
            fail_launches: AtomicUsize::new(0),
            launch_delay: Duration::ZERO,
            page_seq: Arc::new(AtomicUsize::new(0)),
            browsers: Mutex::new(Vec::new()),
            pages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make launches take this long, to widen race windows.
    pub fn with_launch_delay(self, delay: Duration) -> Self {
        Self {
            launch_delay: delay,
            ..self
        }
    }

    /// Refuse the next `count` launches.
    pub fn with_failing_launches(self, count: usize) -> Self {
        self.fail_launches.store(count, Ordering::SeqCst);
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn pages_created(&self) -> usize {
        self.pages.lock().unwrap().len()
    }

    pub fn pages(&self) -> Vec<Arc<MockPage>> {
        self.pages.lock().unwrap().clone()
    }

    pub fn last_browser(&self) -> Arc<MockBrowser> {
        self.browsers.lock().unwrap().last().cloned().unwrap()
    }

    pub fn all_pages_closed(&self) -> bool {
        self.pages
            .lock()
            .unwrap()
            .iter()
            .all(|p| p.closed.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn launch(&self) -> DriverResult<Box<dyn BrowserHandle>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        let remaining = self.fail_launches.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_launches.store(remaining - 1, Ordering::SeqCst);
            return Err(DriverError::Protocol("mock launch refused".to_string()));
        }
        let browser = Arc::new(MockBrowser::new(self.page_seq.clone(), self.pages.clone()));
        self.browsers.lock().unwrap().push(browser.clone());
        Ok(Box::new(browser))
    }
}

/// One fabricated browser process.
pub struct MockBrowser {
    pub closed: AtomicBool,
    pub fail_new_page: AtomicBool,
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    page_seq: Arc<AtomicUsize>,
    pages: Arc<Mutex<Vec<Arc<MockPage>>>>,
}

impl MockBrowser {
    fn new(page_seq: Arc<AtomicUsize>, pages: Arc<Mutex<Vec<Arc<MockPage>>>>) -> Self {
        let (connected_tx, connected_rx) = watch::channel(true);
        Self {
            closed: AtomicBool::new(false),
            fail_new_page: AtomicBool::new(false),
            connected_tx,
            connected_rx,
            page_seq,
            pages,
        }
    }

    /// Simulate the process dying underneath us.
    pub fn disconnect(&self) {
        let _ = self.connected_tx.send(false);
    }
}

#[async_trait]
impl BrowserHandle for Arc<MockBrowser> {
    async fn new_page(&self) -> DriverResult<Box<dyn PageSession>> {
        if !self.is_connected() {
            return Err(DriverError::ConnectionClosed);
        }
        if self.fail_new_page.load(Ordering::SeqCst) {
            return Err(DriverError::Protocol("mock page refused".to_string()));
        }
        let id = self.page_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let page = Arc::new(MockPage::new(id));
        self.pages.lock().unwrap().push(page.clone());
        Ok(Box::new(page))
    }

    fn is_connected(&self) -> bool {
        *self.connected_rx.borrow() && !self.closed.load(Ordering::SeqCst)
    }

    async fn wait_disconnected(&self) {
        let mut rx = self.connected_rx.clone();
        if !*rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|connected| !connected).await;
    }

    async fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.connected_tx.send(false);
        Ok(())
    }
}

/// One fabricated page with scriptable behavior.
pub struct MockPage {
    pub id: usize,
    pub open: AtomicBool,
    pub closed: AtomicBool,
    pub reset_fails: AtomicBool,
    goto_error: Mutex<Option<DriverError>>,
    screenshot_error: Mutex<Option<DriverError>>,
    screenshot_bytes: Mutex<Vec<u8>>,
    missing_selectors: Mutex<HashSet<String>>,
    probe_hits: Mutex<Vec<(String, String)>>,
    fail_click_methods: Mutex<HashSet<ClickMethod>>,
    calls: Mutex<Vec<String>>,
    clicks: Mutex<Vec<(String, ClickMethod)>>,
}

impl MockPage {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            open: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            reset_fails: AtomicBool::new(false),
            goto_error: Mutex::new(None),
            screenshot_error: Mutex::new(None),
            screenshot_bytes: Mutex::new(b"\x89PNG mock".to_vec()),
            missing_selectors: Mutex::new(HashSet::new()),
            probe_hits: Mutex::new(Vec::new()),
            fail_click_methods: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            clicks: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_goto(&self, error: DriverError) {
        *self.goto_error.lock().unwrap() = Some(error);
    }

    pub fn fail_screenshot(&self, error: DriverError) {
        *self.screenshot_error.lock().unwrap() = Some(error);
    }

    pub fn set_screenshot_bytes(&self, bytes: Vec<u8>) {
        *self.screenshot_bytes.lock().unwrap() = bytes;
    }

    pub fn mark_selector_missing(&self, selector: &str) {
        self.missing_selectors
            .lock()
            .unwrap()
            .insert(selector.to_string());
    }

    /// Script the consent probe for the given mode ("banner", "page",
    /// "frames") to report these hits.
    pub fn set_probe_hits(&self, mode: &str, hits: Vec<Value>) {
        let payload = serde_json::to_string(&hits).unwrap();
        self.probe_hits
            .lock()
            .unwrap()
            .push((mode.to_string(), payload));
    }

    pub fn fail_clicks(&self, methods: &[ClickMethod]) {
        let mut failing = self.fail_click_methods.lock().unwrap();
        for method in methods {
            failing.insert(*method);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> Vec<(String, ClickMethod)> {
        self.clicks.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl PageSession for Arc<MockPage> {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn goto(&self, url: &str) -> DriverResult<()> {
        self.record(format!("goto:{url}"));
        if let Some(err) = self.goto_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(())
    }

    async fn reset(&self, _timeout: Duration) -> DriverResult<()> {
        self.record("reset");
        if self.reset_fails.load(Ordering::SeqCst) {
            return Err(DriverError::Protocol("mock reset refused".to_string()));
        }
        Ok(())
    }

    async fn clear_cookies(&self) -> DriverResult<()> {
        self.record("clear_cookies");
        Ok(())
    }

    async fn set_viewport(&self, viewport: &Viewport) -> DriverResult<()> {
        self.record(format!("set_viewport:{}x{}", viewport.width, viewport.height));
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> DriverResult<()> {
        self.record(format!("set_user_agent:{user_agent}"));
        Ok(())
    }

    async fn emulate_dark_mode(&self, enabled: bool) -> DriverResult<()> {
        self.record(format!("emulate_dark_mode:{enabled}"));
        Ok(())
    }

    async fn inject_css(&self, _css: &str) -> DriverResult<()> {
        self.record("inject_css");
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> DriverResult<bool> {
        self.record(format!("wait_for_selector:{selector}"));
        Ok(!self.missing_selectors.lock().unwrap().contains(selector))
    }

    async fn evaluate(&self, expression: &str) -> DriverResult<Value> {
        self.record(format!(
            "evaluate:{}",
            expression.lines().next().unwrap_or_default()
        ));
        if expression.contains("consent-probe:") {
            let hits = self.probe_hits.lock().unwrap();
            for (mode, payload) in hits.iter() {
                if expression.contains(&format!("consent-probe:{mode}")) {
                    return Ok(Value::String(payload.clone()));
                }
            }
            return Ok(Value::String("[]".to_string()));
        }
        if expression.contains("consent-visibility") {
            // Scripted overlays vanish as soon as they are clicked.
            return Ok(Value::Bool(false));
        }
        Ok(Value::Null)
    }

    async fn click(&self, hit: &ElementHit, method: ClickMethod) -> DriverResult<()> {
        self.clicks.lock().unwrap().push((hit.css.clone(), method));
        if self.fail_click_methods.lock().unwrap().contains(&method) {
            return Err(DriverError::Protocol("mock click refused".to_string()));
        }
        Ok(())
    }

    async fn screenshot(&self, request: &ScreenshotRequest) -> DriverResult<Vec<u8>> {
        self.record(format!(
            "screenshot:{:?}:full_page={}",
            request.format, request.full_page
        ));
        if let Some(err) = self.screenshot_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.screenshot_bytes.lock().unwrap().clone())
    }

    async fn close(&self) -> DriverResult<()> {
        self.record("close");
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
