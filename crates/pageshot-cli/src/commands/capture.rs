use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use pageshot_engine::{CaptureConfig, CaptureExecutor, CdpDriver, LaunchConfig, PagePool, PoolConfig};
use pageshot_models::{CaptureJob, ImageFormat};

use crate::cli::CaptureArgs;

pub async fn run(args: CaptureArgs) -> Result<()> {
    let job = CaptureJob {
        url: args.url.clone(),
        dismiss_consent: !args.render.no_consent,
        options: args.render.to_options(),
    };

    let driver = Arc::new(CdpDriver::new(LaunchConfig::default()));
    let pool = PagePool::new(
        driver,
        PoolConfig {
            max_size: 1,
            ..Default::default()
        },
    );
    let executor = CaptureExecutor::new(pool.clone(), CaptureConfig::default());

    let result = executor.capture(&job).await;
    pool.shutdown().await;
    let output = result?;

    let path = args
        .output
        .unwrap_or_else(|| default_output_path(&args.url, output.format));
    std::fs::write(&path, &output.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!(
        "{} {} ({} bytes)",
        "Saved".green().bold(),
        path.display(),
        output.bytes.len()
    );
    Ok(())
}

/// Derive an output filename from the URL host and the current time.
fn default_output_path(url: &str, format: ImageFormat) -> PathBuf {
    let host = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split(['/', '?', '#'])
        .next()
        .filter(|host| !host.is_empty())
        .unwrap_or("capture")
        .replace(':', "_");
    PathBuf::from(format!(
        "{host}-{}.{}",
        Utc::now().format("%Y%m%d-%H%M%S"),
        format.extension()
    ))
}
