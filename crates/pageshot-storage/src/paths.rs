//! Path utilities for Pageshot directory resolution.

use anyhow::Result;
use std::path::PathBuf;

const PAGESHOT_DIR: &str = ".pageshot";
const DATABASE_FILE: &str = "pageshot.redb";

/// Environment variable to override the Pageshot directory.
const PAGESHOT_DIR_ENV: &str = "PAGESHOT_DIR";

/// Resolve the Pageshot data directory.
/// Priority: PAGESHOT_DIR env var > ~/.pageshot/
pub fn resolve_pageshot_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(PAGESHOT_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(PAGESHOT_DIR))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))
}

/// Ensure the Pageshot directory exists and return its path.
pub fn ensure_pageshot_dir() -> Result<PathBuf> {
    let dir = resolve_pageshot_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Get the database path: ~/.pageshot/pageshot.redb
pub fn database_path() -> Result<PathBuf> {
    Ok(ensure_pageshot_dir()?.join(DATABASE_FILE))
}
