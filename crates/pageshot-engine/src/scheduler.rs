//! Recurring capture scheduler.
//!
//! Polls the schedule store on a fixed cadence, runs every due schedule as
//! its own task and writes the outcome back. A failed run books a near-term
//! retry instead of waiting for the next cron occurrence; a failed schedule
//! never takes the others down with it.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use pageshot_models::{CaptureRecord, ScheduleDefinition, WebhookEvent};

use crate::capture::CaptureExecutor;
use crate::config::SchedulerConfig;
use crate::webhook::WebhookNotifier;

/// Persistence boundary for schedule definitions.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// All active schedules whose next run time has passed.
    async fn list_due(&self, now_ms: i64) -> AnyResult<Vec<ScheduleDefinition>>;

    /// Persist an updated definition.
    async fn update(&self, def: &ScheduleDefinition) -> AnyResult<()>;
}

/// Persistence boundary for retained captures.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn store(&self, record: &CaptureRecord, bytes: &[u8]) -> AnyResult<()>;

    /// Drop records past their retention window, returning how many went.
    async fn purge_expired(&self, now_ms: i64) -> AnyResult<usize>;
}

pub struct CaptureScheduler {
    executor: Arc<CaptureExecutor>,
    store: Arc<dyn ScheduleStore>,
    history: Arc<dyn HistoryStore>,
    notifier: Arc<dyn WebhookNotifier>,
    config: SchedulerConfig,
}

impl CaptureScheduler {
    pub fn new(
        executor: Arc<CaptureExecutor>,
        store: Arc<dyn ScheduleStore>,
        history: Arc<dyn HistoryStore>,
        notifier: Arc<dyn WebhookNotifier>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            store,
            history,
            notifier,
            config,
        })
    }

    /// Run the polling loop until the shutdown signal flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.tick_interval, "scheduler started");
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One polling pass: spawn a task per due schedule and sweep expired
    /// history. Returns how many runs were dispatched.
    pub async fn tick(self: &Arc<Self>) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        let due = match self.store.list_due(now_ms).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = ?err, "failed to list due schedules");
                return 0;
            }
        };

        let dispatched = due.len();
        if dispatched > 0 {
            debug!(count = dispatched, "dispatching due schedules");
        }
        for def in due {
            let scheduler = self.clone();
            // Each run is its own task so one slow or panicking capture
            // cannot stall the rest.
            tokio::spawn(async move {
                scheduler.execute(def).await;
            });
        }

        match self.history.purge_expired(now_ms).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "expired captures purged"),
            Err(err) => warn!(error = ?err, "history purge failed"),
        }

        dispatched
    }

    /// Run one schedule end to end and persist the outcome.
    pub async fn execute(&self, mut def: ScheduleDefinition) {
        let job = def.job();
        let result = self.executor.capture(&job).await;
        let now_ms = Utc::now().timestamp_millis();
        let retry_at_ms = now_ms + self.config.retry_delay.as_millis() as i64;

        match result {
            Ok(output) => match next_occurrence(&def.cron, now_ms) {
                Ok(next_run) => {
                    def.record_success(now_ms, next_run);
                    if def.keep_history {
                        let record = CaptureRecord::new(
                            &def.id,
                            output.format,
                            output.bytes.len() as u64,
                            now_ms,
                            def.history_ttl_ms,
                        );
                        if let Err(err) = self.history.store(&record, &output.bytes).await {
                            warn!(schedule_id = %def.id, error = ?err, "failed to retain capture");
                        }
                    }
                    self.send_webhook(&def, WebhookEvent::completed(&def)).await;
                }
                Err(err) => {
                    // The capture worked but the recurrence is unusable;
                    // surface that as a run failure so it shows up.
                    let msg = format!("invalid recurrence expression: {err:#}");
                    def.record_failure(now_ms, msg.as_str(), retry_at_ms);
                    self.send_webhook(&def, WebhookEvent::failed(&def, msg)).await;
                }
            },
            Err(err) => {
                let msg = err.to_string();
                warn!(schedule_id = %def.id, error = %msg, "scheduled capture failed");
                def.record_failure(now_ms, msg.as_str(), retry_at_ms);
                self.send_webhook(&def, WebhookEvent::failed(&def, msg)).await;
            }
        }

        if let Err(err) = self.store.update(&def).await {
            error!(schedule_id = %def.id, error = ?err, "failed to persist schedule outcome");
        }
    }

    async fn send_webhook(&self, def: &ScheduleDefinition, event: WebhookEvent) {
        if let Some(url) = &def.webhook_url {
            self.notifier.notify(url, &event).await;
        }
    }
}

/// Next run time strictly after `after_ms`, in epoch milliseconds.
///
/// Accepts the standard 5-field cron form; a seconds field of `0` is
/// prepended before parsing.
pub fn next_occurrence(cron_expr: &str, after_ms: i64) -> AnyResult<Option<i64>> {
    let normalized = normalize_cron(cron_expr);
    let schedule = cron::Schedule::from_str(&normalized)
        .with_context(|| format!("failed to parse cron expression '{cron_expr}'"))?;
    let after = DateTime::<Utc>::from_timestamp_millis(after_ms)
        .with_context(|| format!("timestamp {after_ms} out of range"))?;
    Ok(schedule
        .after(&after)
        .next()
        .map(|occurrence| occurrence.timestamp_millis()))
}

fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptureConfig, PoolConfig};
    use crate::driver::BrowserDriver;
    use crate::error::DriverError;
    use crate::pool::PagePool;
    use crate::testing::MockDriver;
    use crate::webhook::NullWebhookNotifier;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MemoryScheduleStore {
        schedules: Mutex<Vec<ScheduleDefinition>>,
    }

    impl MemoryScheduleStore {
        fn new(schedules: Vec<ScheduleDefinition>) -> Arc<Self> {
            Arc::new(Self {
                schedules: Mutex::new(schedules),
            })
        }

        fn get(&self, id: &str) -> ScheduleDefinition {
            self.schedules
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl ScheduleStore for MemoryScheduleStore {
        async fn list_due(&self, now_ms: i64) -> AnyResult<Vec<ScheduleDefinition>> {
            Ok(self
                .schedules
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.is_due(now_ms))
                .cloned()
                .collect())
        }

        async fn update(&self, def: &ScheduleDefinition) -> AnyResult<()> {
            let mut schedules = self.schedules.lock().unwrap();
            if let Some(slot) = schedules.iter_mut().find(|s| s.id == def.id) {
                *slot = def.clone();
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryHistoryStore {
        records: Mutex<Vec<(CaptureRecord, usize)>>,
    }

    #[async_trait]
    impl HistoryStore for MemoryHistoryStore {
        async fn store(&self, record: &CaptureRecord, bytes: &[u8]) -> AnyResult<()> {
            self.records
                .lock()
                .unwrap()
                .push((record.clone(), bytes.len()));
            Ok(())
        }

        async fn purge_expired(&self, now_ms: i64) -> AnyResult<usize> {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|(record, _)| !record.is_expired(now_ms));
            Ok(before - records.len())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<(String, WebhookEvent)>>,
    }

    #[async_trait]
    impl WebhookNotifier for RecordingNotifier {
        async fn notify(&self, url: &str, event: &WebhookEvent) {
            self.events
                .lock()
                .unwrap()
                .push((url.to_string(), event.clone()));
        }
    }

    struct Fixture {
        driver: Arc<MockDriver>,
        store: Arc<MemoryScheduleStore>,
        history: Arc<MemoryHistoryStore>,
        notifier: Arc<RecordingNotifier>,
        scheduler: Arc<CaptureScheduler>,
    }

    fn fixture(schedules: Vec<ScheduleDefinition>) -> Fixture {
        let driver = Arc::new(MockDriver::new());
        let pool = PagePool::new(
            driver.clone() as Arc<dyn BrowserDriver>,
            PoolConfig::default(),
        );
        let executor = Arc::new(CaptureExecutor::new(pool, CaptureConfig::default()));
        let store = MemoryScheduleStore::new(schedules);
        let history = Arc::new(MemoryHistoryStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = CaptureScheduler::new(
            executor,
            store.clone(),
            history.clone(),
            notifier.clone(),
            SchedulerConfig {
                tick_interval: Duration::from_secs(60),
                retry_delay: Duration::from_secs(60),
            },
        );
        Fixture {
            driver,
            store,
            history,
            notifier,
            scheduler,
        }
    }

    fn schedule(url: &str) -> ScheduleDefinition {
        let mut def = ScheduleDefinition::new(url, "*/5 * * * *");
        def.webhook_url = Some("https://hooks.example/capture".to_string());
        def
    }

    #[tokio::test]
    async fn test_successful_run_updates_bookkeeping() {
        let def = schedule("https://example.com");
        let id = def.id.clone();
        let fx = fixture(vec![def.clone()]);

        fx.scheduler.execute(def).await;

        let stored = fx.store.get(&id);
        assert_eq!(stored.run_count, 1);
        assert_eq!(stored.failure_count, 0);
        assert!(stored.last_error.is_none());
        assert!(stored.last_run_at_ms.is_some());
        // Next run comes from the cron expression, within the next 5 min.
        let next = stored.next_run_at_ms.unwrap();
        let last = stored.last_run_at_ms.unwrap();
        assert!(next > last);
        assert!(next <= last + 5 * 60 * 1000);

        let events = fx.notifier.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].1, WebhookEvent::ScheduleCompleted { .. }));
    }

    #[tokio::test]
    async fn test_failed_run_books_retry_and_notifies() {
        let def = schedule("https://broken.invalid");
        let id = def.id.clone();
        let fx = fixture(vec![def.clone()]);

        // Pre-open the page so the navigation failure can be scripted.
        let handle = fx.scheduler.executor.pool().acquire().await.unwrap();
        fx.scheduler.executor.pool().release(handle).await;
        fx.driver.pages()[0].fail_goto(DriverError::Protocol("dns failure".to_string()));

        let before_ms = Utc::now().timestamp_millis();
        fx.scheduler.execute(def).await;

        let stored = fx.store.get(&id);
        assert_eq!(stored.run_count, 0);
        assert_eq!(stored.failure_count, 1);
        assert!(stored.last_error.as_deref().unwrap().contains("dns failure"));
        // Retry in about a minute, not at the next cron occurrence.
        let next = stored.next_run_at_ms.unwrap();
        assert!(next >= before_ms + 59_000);
        assert!(next <= before_ms + 62_000);

        let events = fx.notifier.events.lock().unwrap();
        assert!(matches!(events[0].1, WebhookEvent::ScheduleFailed { .. }));
    }

    #[tokio::test]
    async fn test_history_retained_only_when_enabled() {
        let mut keeper = schedule("https://example.com/a");
        keeper.keep_history = true;
        keeper.history_ttl_ms = Some(1_000);
        let dropper = schedule("https://example.com/b");

        // Webhook delivery is irrelevant here, so events go to the sink.
        let pool = PagePool::new(
            Arc::new(MockDriver::new()) as Arc<dyn BrowserDriver>,
            PoolConfig::default(),
        );
        let executor = Arc::new(CaptureExecutor::new(pool, CaptureConfig::default()));
        let store = MemoryScheduleStore::new(vec![keeper.clone(), dropper.clone()]);
        let history = Arc::new(MemoryHistoryStore::default());
        let scheduler = CaptureScheduler::new(
            executor,
            store,
            history.clone(),
            Arc::new(NullWebhookNotifier),
            SchedulerConfig::default(),
        );

        scheduler.execute(keeper.clone()).await;
        scheduler.execute(dropper).await;

        let records = history.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.schedule_id, keeper.id);
        assert!(records[0].1 > 0);
    }

    #[tokio::test]
    async fn test_tick_dispatches_due_schedules_only() {
        let due = schedule("https://example.com/due");
        let mut dormant = schedule("https://example.com/later");
        dormant.next_run_at_ms = Some(Utc::now().timestamp_millis() + 3_600_000);
        let mut paused = schedule("https://example.com/paused");
        paused.active = false;

        let fx = fixture(vec![due.clone(), dormant, paused]);
        let dispatched = fx.scheduler.tick().await;
        assert_eq!(dispatched, 1);

        // Wait for the spawned run to land.
        loop {
            if fx.store.get(&due.id).run_count == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_one_failing_schedule_does_not_block_others() {
        let bad = {
            let mut def = schedule("https://example.com/bad");
            def.cron = "not a cron".to_string();
            def
        };
        let good = schedule("https://example.com/good");
        let fx = fixture(vec![bad.clone(), good.clone()]);

        fx.scheduler.execute(bad.clone()).await;
        fx.scheduler.execute(good.clone()).await;

        let bad_stored = fx.store.get(&bad.id);
        assert_eq!(bad_stored.failure_count, 1);
        assert!(
            bad_stored
                .last_error
                .as_deref()
                .unwrap()
                .contains("recurrence")
        );

        let good_stored = fx.store.get(&good.id);
        assert_eq!(good_stored.run_count, 1);
    }

    #[test]
    fn test_next_occurrence_accepts_five_field_cron() {
        // Every hour on the hour, from one minute past.
        let after_ms = Utc
            .with_ymd_and_hms(2026, 3, 1, 10, 1, 0)
            .unwrap()
            .timestamp_millis();
        let next = next_occurrence("0 * * * *", after_ms).unwrap().unwrap();
        let expected = Utc
            .with_ymd_and_hms(2026, 3, 1, 11, 0, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(next, expected);
    }

    #[test]
    fn test_next_occurrence_accepts_six_field_cron() {
        let after_ms = Utc
            .with_ymd_and_hms(2026, 3, 1, 10, 0, 0)
            .unwrap()
            .timestamp_millis();
        let next = next_occurrence("30 */5 * * * *", after_ms).unwrap().unwrap();
        let expected = Utc
            .with_ymd_and_hms(2026, 3, 1, 10, 0, 30)
            .unwrap()
            .timestamp_millis();
        assert_eq!(next, expected);
    }

    #[test]
    fn test_next_occurrence_rejects_garbage() {
        assert!(next_occurrence("not a cron", 0).is_err());
    }
}
