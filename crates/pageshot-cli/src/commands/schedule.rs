use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{TimeZone, Utc};
use colored::Colorize;
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use pageshot_engine::{RedbHistoryStore, RedbScheduleStore, next_occurrence};
use pageshot_models::ScheduleDefinition;
use pageshot_storage::Storage;

use crate::cli::{ScheduleAddArgs, ScheduleCommands};

pub fn run(storage: Arc<Storage>, command: ScheduleCommands) -> Result<()> {
    let store = RedbScheduleStore::new(storage.clone());
    match command {
        ScheduleCommands::Add(args) => add(&store, args),
        ScheduleCommands::List { json } => list(&store, json),
        ScheduleCommands::Remove { id } => remove(&store, &RedbHistoryStore::new(storage), &id),
        ScheduleCommands::Pause { id } => set_active(&store, &id, false),
        ScheduleCommands::Resume { id } => set_active(&store, &id, true),
        ScheduleCommands::History { id } => history(&RedbHistoryStore::new(storage), &id),
    }
}

fn add(store: &RedbScheduleStore, args: ScheduleAddArgs) -> Result<()> {
    // Reject bad expressions here rather than at the first scheduler tick.
    next_occurrence(&args.cron, Utc::now().timestamp_millis())
        .with_context(|| format!("invalid cron expression '{}'", args.cron))?;

    let mut def = ScheduleDefinition::new(args.url, args.cron);
    def.options = args.render.to_options();
    def.dismiss_consent = !args.render.no_consent;
    def.webhook_url = args.webhook;
    def.keep_history = args.keep_history || args.history_ttl_hours.is_some();
    def.history_ttl_ms = args.history_ttl_hours.map(|hours| hours * 3_600_000);
    store.insert(&def)?;

    println!("{} schedule {}", "Added".green().bold(), def.id.bold());
    Ok(())
}

fn list(store: &RedbScheduleStore, json: bool) -> Result<()> {
    let mut defs = store.list()?;
    defs.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));

    if json {
        println!("{}", serde_json::to_string_pretty(&defs)?);
        return Ok(());
    }
    if defs.is_empty() {
        println!("No schedules.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["ID", "URL", "CRON", "ACTIVE", "RUNS", "FAILS", "NEXT RUN", "LAST ERROR"]);
    for def in defs {
        table.add_row([
            def.id.clone(),
            def.url.clone(),
            def.cron.clone(),
            if def.active { "yes".into() } else { "paused".into() },
            def.run_count.to_string(),
            def.failure_count.to_string(),
            def.next_run_at_ms.map(format_ms).unwrap_or_else(|| "now".into()),
            def.last_error.unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn remove(store: &RedbScheduleStore, history: &RedbHistoryStore, id: &str) -> Result<()> {
    if !store.remove(id)? {
        bail!("no schedule with id {id}");
    }
    let purged = history.remove_for_schedule(id)?;
    if purged > 0 {
        println!(
            "{} schedule {} and {} retained capture(s)",
            "Removed".green().bold(),
            id,
            purged
        );
    } else {
        println!("{} schedule {}", "Removed".green().bold(), id);
    }
    Ok(())
}

fn set_active(store: &RedbScheduleStore, id: &str, active: bool) -> Result<()> {
    let Some(mut def) = store.get(id)? else {
        bail!("no schedule with id {id}");
    };
    def.active = active;
    store.insert(&def)?;
    let verb = if active { "Resumed" } else { "Paused" };
    println!("{} schedule {}", verb.green().bold(), id);
    Ok(())
}

fn history(history: &RedbHistoryStore, id: &str) -> Result<()> {
    let mut records: Vec<_> = history
        .list()?
        .into_iter()
        .filter(|record| record.schedule_id == id)
        .collect();
    if records.is_empty() {
        println!("No retained captures for schedule {id}.");
        return Ok(());
    }
    records.sort_by(|a, b| b.captured_at_ms.cmp(&a.captured_at_ms));

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["ID", "CAPTURED", "FORMAT", "SIZE", "EXPIRES"]);
    for record in records {
        table.add_row([
            record.id.clone(),
            format_ms(record.captured_at_ms),
            record.format.extension().to_string(),
            format!("{} B", record.byte_len),
            record.expires_at_ms.map(format_ms).unwrap_or_else(|| "never".into()),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn format_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}
