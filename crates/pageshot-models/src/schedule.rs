//! Recurring capture schedules and retained capture metadata.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::CaptureJob;
use crate::render::{ImageFormat, RenderOptions};

/// A persisted recurring capture: a URL, a cron recurrence and the render
/// options to apply on every run.
///
/// Run bookkeeping (`last_run_at_ms`, `next_run_at_ms`, counters) lives on
/// the definition itself so a single storage write records an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub id: String,
    pub url: String,
    /// Cron recurrence expression (standard 5-field form).
    pub cron: String,
    /// Inactive schedules are never picked up by the scheduler.
    pub active: bool,
    #[serde(default)]
    pub options: RenderOptions,
    #[serde(default = "default_true")]
    pub dismiss_consent: bool,
    /// Optional endpoint notified after every run.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Retain captured images alongside the schedule.
    #[serde(default)]
    pub keep_history: bool,
    /// Retention window for kept captures, unlimited when absent.
    #[serde(default)]
    pub history_ttl_ms: Option<i64>,
    pub created_at_ms: i64,
    #[serde(default)]
    pub last_run_at_ms: Option<i64>,
    #[serde(default)]
    pub next_run_at_ms: Option<i64>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ScheduleDefinition {
    pub fn new(url: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            cron: cron.into(),
            active: true,
            options: RenderOptions::default(),
            dismiss_consent: true,
            webhook_url: None,
            keep_history: false,
            history_ttl_ms: None,
            created_at_ms: Utc::now().timestamp_millis(),
            last_run_at_ms: None,
            next_run_at_ms: None,
            run_count: 0,
            failure_count: 0,
            last_error: None,
        }
    }

    /// Whether the schedule should run now. A schedule that has never been
    /// planned (`next_run_at_ms` unset) is due immediately.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.active && self.next_run_at_ms.is_none_or(|next| next <= now_ms)
    }

    /// Record a successful run and plan the next one.
    pub fn record_success(&mut self, now_ms: i64, next_run_at_ms: Option<i64>) {
        self.run_count += 1;
        self.last_run_at_ms = Some(now_ms);
        self.next_run_at_ms = next_run_at_ms;
        self.last_error = None;
    }

    /// Record a failed run and retry at the given time instead of the
    /// regular cron occurrence.
    pub fn record_failure(&mut self, now_ms: i64, error: impl Into<String>, retry_at_ms: i64) {
        self.failure_count += 1;
        self.last_run_at_ms = Some(now_ms);
        self.next_run_at_ms = Some(retry_at_ms);
        self.last_error = Some(error.into());
    }

    /// Build the capture job this schedule executes.
    pub fn job(&self) -> CaptureJob {
        CaptureJob {
            url: self.url.clone(),
            dismiss_consent: self.dismiss_consent,
            options: self.options.clone(),
        }
    }
}

/// Metadata for one retained capture image. The image bytes are stored
/// separately, keyed by the record id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub id: String,
    pub schedule_id: String,
    pub format: ImageFormat,
    pub byte_len: u64,
    pub captured_at_ms: i64,
    #[serde(default)]
    pub expires_at_ms: Option<i64>,
}

impl CaptureRecord {
    pub fn new(
        schedule_id: impl Into<String>,
        format: ImageFormat,
        byte_len: u64,
        captured_at_ms: i64,
        ttl_ms: Option<i64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule_id.into(),
            format,
            byte_len,
            captured_at_ms,
            expires_at_ms: ttl_ms.map(|ttl| captured_at_ms + ttl),
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}
