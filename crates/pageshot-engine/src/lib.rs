//! Pageshot Engine - browser automation for screenshot capture
//!
//! The engine drives headless Chromium through a bounded page pool, runs
//! one-shot capture jobs with consent dismissal, and executes recurring
//! schedules with persistence, retention and webhook notification.
//!
//! # Architecture
//!
//! - [`pool`] - Bounded pool of pages over one lazily-launched browser
//! - [`capture`] - One job in, one image out
//! - [`consent`] - Cookie/consent overlay dismissal heuristics
//! - [`scheduler`] - Recurring captures with retry and history retention
//! - [`cdp`] - The chromiumoxide-backed driver implementation
//! - [`driver`] - Traits decoupling all of the above from CDP

pub mod capture;
pub mod cdp;
pub mod config;
pub mod consent;
pub mod driver;
pub mod error;
pub mod persist;
pub mod pool;
pub mod scheduler;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use capture::CaptureExecutor;
pub use cdp::CdpDriver;
pub use config::{CaptureConfig, LaunchConfig, PoolConfig, SchedulerConfig};
pub use consent::{ConsentOutcome, dismiss_overlays};
pub use driver::{BrowserDriver, BrowserHandle, PageSession};
pub use error::{DriverError, EngineError, Result};
pub use persist::{RedbHistoryStore, RedbScheduleStore};
pub use pool::{PageHandle, PagePool, PoolStats};
pub use scheduler::{CaptureScheduler, HistoryStore, ScheduleStore, next_occurrence};
pub use webhook::{HttpWebhookNotifier, NullWebhookNotifier, WebhookNotifier};
