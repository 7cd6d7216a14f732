//! Pageshot Models - shared capture and schedule primitives
//!
//! Plain data types exchanged between the engine, the storage layer and the
//! CLI. Everything here is serde-serializable so the same shapes can be
//! persisted, logged and posted to webhooks without translation layers.

pub mod job;
pub mod render;
pub mod schedule;
pub mod webhook;

pub use job::{CaptureJob, CaptureOutput};
pub use render::{ClipRegion, DevicePreset, ImageFormat, RenderOptions, Viewport, WaitFor};
pub use schedule::{CaptureRecord, ScheduleDefinition};
pub use webhook::WebhookEvent;
