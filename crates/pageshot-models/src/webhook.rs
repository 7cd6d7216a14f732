//! Outbound notification payloads for schedule executions.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::schedule::ScheduleDefinition;

/// Event posted to a schedule's webhook after each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum WebhookEvent {
    #[serde(rename = "schedule.completed")]
    ScheduleCompleted {
        job_id: String,
        url: String,
        timestamp: String,
    },
    #[serde(rename = "schedule.failed")]
    ScheduleFailed {
        job_id: String,
        url: String,
        timestamp: String,
        error: String,
    },
}

impl WebhookEvent {
    pub fn completed(def: &ScheduleDefinition) -> Self {
        WebhookEvent::ScheduleCompleted {
            job_id: def.id.clone(),
            url: def.url.clone(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn failed(def: &ScheduleDefinition, error: impl Into<String>) -> Self {
        WebhookEvent::ScheduleFailed {
            job_id: def.id.clone(),
            url: def.url.clone(),
            timestamp: Utc::now().to_rfc3339(),
            error: error.into(),
        }
    }
}
