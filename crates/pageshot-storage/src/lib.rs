//! Pageshot Storage - low-level persistence layer
//!
//! Embedded redb database holding schedules and retained captures. The APIs
//! here are byte-level: higher layers serialize their own models, which keeps
//! this crate free of circular dependencies on the engine's types.
//!
//! # Tables
//!
//! - `schedules` - Recurring capture definitions
//! - `capture_meta` - Metadata for retained captures
//! - `capture_blobs` - Image bytes, keyed by record id

pub mod history;
pub mod kv;
pub mod paths;
pub mod schedule;

use anyhow::Result;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

pub use history::HistoryStorage;
pub use kv::KvStorage;
pub use schedule::ScheduleStorage;

/// Central storage manager that initializes all tables.
pub struct Storage {
    db: Arc<Database>,
    pub schedules: ScheduleStorage,
    pub history: HistoryStorage,
}

impl Storage {
    /// Open (or create) the database at the given path and initialize all
    /// required tables.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);

        let schedules = ScheduleStorage::new(db.clone())?;
        let history = HistoryStorage::new(db.clone())?;

        Ok(Self {
            db,
            schedules,
            history,
        })
    }

    /// Open the database at the default location under the pageshot
    /// directory.
    pub fn open_default() -> Result<Self> {
        Self::new(paths::database_path()?)
    }

    /// Get a reference to the underlying database
    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}
