//! Chromium driver speaking the DevTools protocol via chromiumoxide.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    MediaFeature, SetDeviceMetricsOverrideParams, SetEmulatedMediaParams,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, trace};

use pageshot_models::{ImageFormat, Viewport};

use crate::config::LaunchConfig;
use crate::driver::{
    BrowserDriver, BrowserHandle, ClickMethod, ElementHit, PageSession, ScreenshotRequest,
};
use crate::error::{DriverError, DriverResult};

const BLANK_PAGE: &str = "about:blank";

/// Launches headless Chromium processes.
pub struct CdpDriver {
    config: LaunchConfig,
}

impl CdpDriver {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn launch(&self) -> DriverResult<Box<dyn BrowserHandle>> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.config.window_width, self.config.window_height);
        if let Some(executable) = &self.config.executable {
            builder = builder.chrome_executable(executable);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if self.config.no_sandbox {
            builder = builder.no_sandbox();
        }
        builder = builder
            .arg("--disable-gpu")
            .arg("--hide-scrollbars")
            .arg("--mute-audio")
            .arg("--disable-background-networking");
        for arg in &self.config.extra_args {
            builder = builder.arg(arg);
        }
        let browser_config = builder.build().map_err(DriverError::Protocol)?;

        let (browser, mut handler) =
            tokio::time::timeout(self.config.launch_timeout, Browser::launch(browser_config))
                .await
                .map_err(|_| DriverError::Timeout(self.config.launch_timeout))?
                .map_err(|err| DriverError::Protocol(err.to_string()))?;

        let (closed_tx, closed_rx) = watch::channel(false);
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "cdp event loop error");
                    break;
                }
                trace!("cdp event handled");
            }
            // The event stream ending means the websocket is gone.
            let _ = closed_tx.send(true);
        });

        Ok(Box::new(CdpBrowser {
            browser: Mutex::new(browser),
            closed_rx,
        }))
    }
}

struct CdpBrowser {
    browser: Mutex<Browser>,
    closed_rx: watch::Receiver<bool>,
}

#[async_trait]
impl BrowserHandle for CdpBrowser {
    async fn new_page(&self) -> DriverResult<Box<dyn PageSession>> {
        if !self.is_connected() {
            return Err(DriverError::ConnectionClosed);
        }
        let browser = self.browser.lock().await;
        let page = browser
            .new_page(BLANK_PAGE)
            .await
            .map_err(|err| map_cdp_error(err, &self.closed_rx))?;
        Ok(Box::new(CdpPage {
            page,
            closed_rx: self.closed_rx.clone(),
            target_closed: AtomicBool::new(false),
        }))
    }

    fn is_connected(&self) -> bool {
        !*self.closed_rx.borrow()
    }

    async fn wait_disconnected(&self) {
        let mut rx = self.closed_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn close(&self) -> DriverResult<()> {
        let mut browser = self.browser.lock().await;
        // Best effort; the process may already be gone.
        let _ = browser.close().await;
        let _ = browser.wait().await;
        Ok(())
    }
}

struct CdpPage {
    page: Page,
    closed_rx: watch::Receiver<bool>,
    target_closed: AtomicBool,
}

impl CdpPage {
    fn map_err(&self, err: CdpError) -> DriverError {
        if self.target_closed.load(Ordering::SeqCst) {
            return DriverError::TargetClosed;
        }
        map_cdp_error(err, &self.closed_rx)
    }

    async fn mouse_click(&self, x: f64, y: f64) -> DriverResult<()> {
        let press = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(DriverError::Protocol)?;
        self.page
            .execute(press)
            .await
            .map_err(|err| self.map_err(err))?;

        let release = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(DriverError::Protocol)?;
        self.page
            .execute(release)
            .await
            .map_err(|err| self.map_err(err))?;
        Ok(())
    }
}

#[async_trait]
impl PageSession for CdpPage {
    fn is_open(&self) -> bool {
        !self.target_closed.load(Ordering::SeqCst) && !*self.closed_rx.borrow()
    }

    async fn goto(&self, url: &str) -> DriverResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|err| self.map_err(err))?;
        // Ready once the document is parsed; subresources may still be
        // loading. The caller bounds the overall navigation time.
        loop {
            if let Value::Bool(true) = self.evaluate("document.readyState !== 'loading'").await? {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn reset(&self, timeout: Duration) -> DriverResult<()> {
        tokio::time::timeout(timeout, self.goto(BLANK_PAGE))
            .await
            .map_err(|_| DriverError::Timeout(timeout))?
    }

    async fn clear_cookies(&self) -> DriverResult<()> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(|err| self.map_err(err))?;
        Ok(())
    }

    async fn set_viewport(&self, viewport: &Viewport) -> DriverResult<()> {
        let params = SetDeviceMetricsOverrideParams::new(
            viewport.width as i64,
            viewport.height as i64,
            viewport.device_scale_factor,
            viewport.mobile,
        );
        self.page
            .execute(params)
            .await
            .map_err(|err| self.map_err(err))?;
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> DriverResult<()> {
        self.page
            .execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(|err| self.map_err(err))?;
        Ok(())
    }

    async fn emulate_dark_mode(&self, enabled: bool) -> DriverResult<()> {
        let scheme = if enabled { "dark" } else { "light" };
        let mut params = SetEmulatedMediaParams::default();
        params.features = Some(vec![MediaFeature {
            name: "prefers-color-scheme".to_string(),
            value: scheme.to_string(),
        }]);
        self.page
            .execute(params)
            .await
            .map_err(|err| self.map_err(err))?;
        Ok(())
    }

    async fn inject_css(&self, css: &str) -> DriverResult<()> {
        let js = format!(
            "(() => {{ const style = document.createElement('style'); \
             style.textContent = {}; document.head.appendChild(style); return true; }})()",
            encode_js_string(css)
        );
        self.evaluate(&js).await?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<bool> {
        let js = format!(
            "document.querySelector({}) !== null",
            encode_js_string(selector)
        );
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Value::Bool(true) = self.evaluate(&js).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn evaluate(&self, expression: &str) -> DriverResult<Value> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|err| self.map_err(err))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn click(&self, hit: &ElementHit, method: ClickMethod) -> DriverResult<()> {
        match method {
            ClickMethod::Element => {
                if hit.frame_css.is_some() {
                    return Err(DriverError::Protocol(
                        "element click cannot cross into a frame".to_string(),
                    ));
                }
                let element = self
                    .page
                    .find_element(&hit.css)
                    .await
                    .map_err(|err| self.map_err(err))?;
                element.click().await.map_err(|err| self.map_err(err))?;
                Ok(())
            }
            ClickMethod::Forced => {
                // Scrolling invalidates the probe-time coordinates, so the
                // box center is re-read afterwards.
                let js = format!(
                    "(() => {{ const el = document.querySelector({}); \
                     if (!el) return null; \
                     el.scrollIntoView({{ block: 'center' }}); \
                     const r = el.getBoundingClientRect(); \
                     return [r.left + r.width / 2, r.top + r.height / 2]; }})()",
                    encode_js_string(&hit.css)
                );
                let (x, y) = click_point(self.evaluate(&js).await?, (hit.x, hit.y));
                self.mouse_click(x, y).await
            }
            ClickMethod::Script => {
                let root = match &hit.frame_css {
                    Some(frame) => format!(
                        "const frame = document.querySelector({}); \
                         const root = frame && frame.contentDocument; \
                         if (!root) return false;",
                        encode_js_string(frame)
                    ),
                    None => "const root = document;".to_string(),
                };
                let js = format!(
                    "(() => {{ {root} const el = root.querySelector({}); \
                     if (!el) return false; el.click(); return true; }})()",
                    encode_js_string(&hit.css)
                );
                match self.evaluate(&js).await? {
                    Value::Bool(true) => Ok(()),
                    _ => Err(DriverError::Protocol(
                        "scripted click found no element".to_string(),
                    )),
                }
            }
            ClickMethod::Pointer => self.mouse_click(hit.x, hit.y).await,
        }
    }

    async fn screenshot(&self, request: &ScreenshotRequest) -> DriverResult<Vec<u8>> {
        let mut builder = ScreenshotParams::builder()
            .format(map_format(request.format))
            .from_surface(true)
            .full_page(request.full_page);
        if let Some(quality) = request.quality {
            builder = builder.quality(quality as i64);
        }
        if let Some(clip) = &request.clip {
            builder = builder.clip(chromiumoxide::cdp::browser_protocol::page::Viewport {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
                scale: 1.0,
            });
        }
        self.page
            .screenshot(builder.build())
            .await
            .map_err(|err| self.map_err(err))
    }

    async fn close(&self) -> DriverResult<()> {
        self.target_closed.store(true, Ordering::SeqCst);
        let _ = self.page.clone().close().await;
        Ok(())
    }
}

fn map_format(format: ImageFormat) -> CaptureScreenshotFormat {
    match format {
        ImageFormat::Png => CaptureScreenshotFormat::Png,
        ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        ImageFormat::Webp => CaptureScreenshotFormat::Webp,
    }
}

fn map_cdp_error(err: CdpError, closed_rx: &watch::Receiver<bool>) -> DriverError {
    // The event loop flips this flag the moment the websocket drops, so a
    // dead connection is recognized without sniffing message text.
    if *closed_rx.borrow() {
        return DriverError::ConnectionClosed;
    }
    DriverError::Protocol(err.to_string())
}

fn encode_js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

/// Pull `[x, y]` out of the scroll probe's result, falling back to the
/// probe-time coordinates when the element vanished.
fn click_point(value: Value, fallback: (f64, f64)) -> (f64, f64) {
    match value {
        Value::Array(point) if point.len() == 2 => (
            point[0].as_f64().unwrap_or(fallback.0),
            point[1].as_f64().unwrap_or(fallback.1),
        ),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mapping() {
        assert_eq!(map_format(ImageFormat::Png), CaptureScreenshotFormat::Png);
        assert_eq!(map_format(ImageFormat::Jpeg), CaptureScreenshotFormat::Jpeg);
        assert_eq!(map_format(ImageFormat::Webp), CaptureScreenshotFormat::Webp);
    }

    #[test]
    fn test_js_string_encoding_escapes_quotes() {
        assert_eq!(encode_js_string("a'b\"c"), "\"a'b\\\"c\"");
    }

    #[test]
    fn test_click_point_uses_post_scroll_coordinates() {
        let value = serde_json::json!([120.0, 48.5]);
        assert_eq!(click_point(value, (5.0, 6.0)), (120.0, 48.5));
    }

    #[test]
    fn test_click_point_falls_back_when_element_is_gone() {
        assert_eq!(click_point(Value::Null, (5.0, 6.0)), (5.0, 6.0));
        assert_eq!(click_point(serde_json::json!([1.0]), (5.0, 6.0)), (5.0, 6.0));
    }
}
