//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Floor for the idle sweep cadence so reclamation never busy-loops.
pub const MIN_IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Page pool sizing and reclamation settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard cap on concurrently tracked pages.
    pub max_size: usize,
    /// Tear down the browser after this long without pool activity.
    /// Zero disables idle reclamation.
    pub idle_timeout: Duration,
    /// How often the idle sweep runs. Floored to
    /// [`MIN_IDLE_CHECK_INTERVAL`].
    pub idle_check_interval: Duration,
    /// Budget for returning a page to a clean state on release.
    pub reset_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            idle_timeout: Duration::ZERO,
            idle_check_interval: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(3),
        }
    }
}

/// Chromium launch settings for the CDP driver.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Explicit browser binary; auto-detected when absent.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub no_sandbox: bool,
    pub extra_args: Vec<String>,
    pub launch_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            window_width: 1280,
            window_height: 800,
            no_sandbox: false,
            extra_args: Vec::new(),
            launch_timeout: Duration::from_secs(30),
        }
    }
}

/// Capture executor timeouts.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Budget for navigation including document readiness.
    pub navigation_timeout: Duration,
    /// Total budget for the consent dismissal pass.
    pub consent_budget: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            consent_budget: Duration::from_secs(8),
        }
    }
}

/// Scheduler cadence settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often due schedules are polled.
    pub tick_interval: Duration,
    /// Delay before retrying a failed schedule run.
    pub retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            retry_delay: Duration::from_secs(60),
        }
    }
}
