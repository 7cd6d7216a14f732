//! Capture execution: one job in, one image out.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use pageshot_models::{CaptureJob, CaptureOutput};

use crate::config::CaptureConfig;
use crate::consent;
use crate::driver::{PageSession, ScreenshotRequest};
use crate::error::{DriverError, EngineError, Result};
use crate::pool::PagePool;

/// Runs capture jobs against pooled pages.
///
/// The executor owns the whole lifecycle of a job: check out a page, prepare
/// it, navigate, optionally clear consent overlays, screenshot, and hand the
/// page back whatever the outcome.
pub struct CaptureExecutor {
    pool: Arc<PagePool>,
    config: CaptureConfig,
}

impl CaptureExecutor {
    pub fn new(pool: Arc<PagePool>, config: CaptureConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &Arc<PagePool> {
        &self.pool
    }

    /// Execute one capture job. The page is returned to the pool on every
    /// path, success or failure.
    pub async fn capture(&self, job: &CaptureJob) -> Result<CaptureOutput> {
        let started = Instant::now();
        let handle = self.pool.acquire().await?;
        debug!(url = %job.url, page_id = handle.id(), "page acquired");

        let result = self.run_on_page(handle.page(), job).await;
        self.pool.release(handle).await;

        match &result {
            Ok(output) => info!(
                url = %job.url,
                bytes = output.bytes.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "capture complete"
            ),
            Err(err) => warn!(url = %job.url, error = %err, "capture failed"),
        }
        result
    }

    async fn run_on_page(&self, page: &dyn PageSession, job: &CaptureJob) -> Result<CaptureOutput> {
        // Pooled pages carry state from earlier jobs.
        page.clear_cookies().await?;

        // Emulation has to be in place before the request goes out, so the
        // server sees the right user agent and the layout settles once.
        if let Some(viewport) = job.options.effective_viewport() {
            page.set_viewport(&viewport).await?;
        }
        if let Some(device) = job.options.device {
            page.set_user_agent(device.user_agent()).await?;
        }

        self.navigate(page, &job.url).await?;

        if job.dismiss_consent {
            let outcome = consent::dismiss_overlays(page, self.config.consent_budget).await;
            debug!(
                url = %job.url,
                dismissed = outcome.dismissed,
                strategy = outcome.strategy.unwrap_or("none"),
                "consent pass finished"
            );
        }

        if job.options.dark_mode {
            page.emulate_dark_mode(true).await?;
        }
        if let Some(css) = &job.options.inject_css {
            page.inject_css(css).await?;
        }
        if let Some(wait) = &job.options.wait_for {
            let wait_timeout = std::time::Duration::from_millis(wait.timeout_ms);
            let appeared = page.wait_for_selector(&wait.selector, wait_timeout).await?;
            if !appeared {
                // Capture what we have rather than fail the whole job.
                debug!(selector = %wait.selector, "selector never appeared, capturing anyway");
            }
        }

        let request = ScreenshotRequest {
            format: job.options.format,
            quality: job
                .options
                .format
                .supports_quality()
                .then_some(job.options.quality),
            full_page: job.options.full_page,
            clip: job.options.clip,
        };
        let bytes = page
            .screenshot(&request)
            .await
            .map_err(|err| EngineError::Capture(err.to_string()))?;

        Ok(CaptureOutput {
            bytes,
            format: job.options.format,
        })
    }

    async fn navigate(&self, page: &dyn PageSession, url: &str) -> Result<()> {
        let budget = self.config.navigation_timeout;
        match timeout(budget, page.goto(url)).await {
            Err(_) => Err(EngineError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: budget.as_millis() as u64,
            }),
            Ok(Err(DriverError::Timeout(elapsed))) => Err(EngineError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: elapsed.as_millis() as u64,
            }),
            Ok(Err(err)) => Err(EngineError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            }),
            Ok(Ok(())) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::driver::BrowserDriver;
    use crate::testing::MockDriver;
    use pageshot_models::{DevicePreset, ImageFormat, RenderOptions, WaitFor};
    use std::time::Duration;

    fn executor(driver: &Arc<MockDriver>) -> CaptureExecutor {
        let pool = PagePool::new(
            driver.clone() as Arc<dyn BrowserDriver>,
            PoolConfig::default(),
        );
        CaptureExecutor::new(pool, CaptureConfig::default())
    }

    #[tokio::test]
    async fn test_successful_capture_returns_bytes() {
        let driver = Arc::new(MockDriver::new());
        let executor = executor(&driver);

        let output = executor
            .capture(&CaptureJob::new("https://example.com"))
            .await
            .unwrap();
        assert_eq!(output.format, ImageFormat::Png);
        assert!(!output.bytes.is_empty());

        let calls = driver.pages()[0].calls();
        assert!(calls.contains(&"clear_cookies".to_string()));
        assert!(calls.contains(&"goto:https://example.com".to_string()));
    }

    #[tokio::test]
    async fn test_page_released_after_navigation_failure() {
        let driver = Arc::new(MockDriver::new());
        let executor = executor(&driver);

        let handle = executor.pool().acquire().await.unwrap();
        executor.pool().release(handle).await;
        driver.pages()[0].fail_goto(DriverError::Protocol("dns failure".to_string()));

        let result = executor
            .capture(&CaptureJob::new("https://broken.invalid"))
            .await;
        assert!(matches!(result, Err(EngineError::Navigation { .. })));

        // The page went back to the pool despite the failure.
        let stats = executor.pool().stats().await;
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn test_driver_timeout_becomes_navigation_timeout() {
        let driver = Arc::new(MockDriver::new());
        let executor = executor(&driver);

        let handle = executor.pool().acquire().await.unwrap();
        executor.pool().release(handle).await;
        driver.pages()[0].fail_goto(DriverError::Timeout(Duration::from_secs(60)));

        let result = executor.capture(&CaptureJob::new("https://slow.example")).await;
        assert!(matches!(
            result,
            Err(EngineError::NavigationTimeout { timeout_ms: 60_000, .. })
        ));
    }

    #[tokio::test]
    async fn test_device_preset_applies_viewport_and_user_agent() {
        let driver = Arc::new(MockDriver::new());
        let executor = executor(&driver);

        let job = CaptureJob::with_options(
            "https://example.com",
            RenderOptions {
                device: Some(DevicePreset::Iphone14),
                ..Default::default()
            },
        );
        executor.capture(&job).await.unwrap();

        let calls = driver.pages()[0].calls();
        assert!(calls.contains(&"set_viewport:390x844".to_string()));
        assert!(calls.iter().any(|c| c.starts_with("set_user_agent:")));
        // Emulation precedes navigation.
        let viewport_pos = calls.iter().position(|c| c.starts_with("set_viewport")).unwrap();
        let goto_pos = calls.iter().position(|c| c.starts_with("goto")).unwrap();
        assert!(viewport_pos < goto_pos);
    }

    #[tokio::test]
    async fn test_missing_wait_selector_does_not_fail_capture() {
        let driver = Arc::new(MockDriver::new());
        let executor = executor(&driver);

        let handle = executor.pool().acquire().await.unwrap();
        executor.pool().release(handle).await;
        driver.pages()[0].mark_selector_missing("#never-appears");

        let job = CaptureJob::with_options(
            "https://example.com",
            RenderOptions {
                wait_for: Some(WaitFor {
                    selector: "#never-appears".to_string(),
                    timeout_ms: 500,
                }),
                ..Default::default()
            },
        );
        assert!(executor.capture(&job).await.is_ok());
    }

    #[tokio::test]
    async fn test_consent_pass_can_be_disabled() {
        let driver = Arc::new(MockDriver::new());
        let executor = executor(&driver);

        let mut job = CaptureJob::new("https://example.com");
        job.dismiss_consent = false;
        executor.capture(&job).await.unwrap();

        let calls = driver.pages()[0].calls();
        assert!(!calls.iter().any(|c| c.contains("consent-probe")));
    }

    #[tokio::test]
    async fn test_quality_forwarded_only_for_lossy_formats() {
        let driver = Arc::new(MockDriver::new());
        let executor = executor(&driver);

        let job = CaptureJob::with_options(
            "https://example.com",
            RenderOptions {
                format: ImageFormat::Jpeg,
                quality: 70,
                full_page: true,
                ..Default::default()
            },
        );
        let output = executor.capture(&job).await.unwrap();
        assert_eq!(output.format, ImageFormat::Jpeg);
        assert_eq!(output.content_type(), "image/jpeg");

        let calls = driver.pages()[0].calls();
        assert!(calls.contains(&"screenshot:Jpeg:full_page=true".to_string()));
    }

    #[tokio::test]
    async fn test_screenshot_failure_maps_to_capture_error() {
        let driver = Arc::new(MockDriver::new());
        let executor = executor(&driver);

        let handle = executor.pool().acquire().await.unwrap();
        executor.pool().release(handle).await;
        driver.pages()[0].fail_screenshot(DriverError::Protocol("encode failed".to_string()));

        let result = executor.capture(&CaptureJob::new("https://example.com")).await;
        assert!(matches!(result, Err(EngineError::Capture(_))));
    }
}
