//! Capture history storage - retained screenshots split across two tables.
//!
//! Record metadata and image bytes are stored separately so listing history
//! never pages megabytes of pixels through memory.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::sync::Arc;

const META_TABLE: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("capture_meta");
const BLOB_TABLE: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("capture_blobs");

/// Low-level capture history storage with byte-level API
#[derive(Debug, Clone)]
pub struct HistoryStorage {
    db: Arc<Database>,
}

impl HistoryStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(META_TABLE)?;
        write_txn.open_table(BLOB_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Store a record's metadata and image bytes in one transaction.
    pub fn put_raw(&self, id: &str, meta: &[u8], blob: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            meta_table.insert(id, meta)?;
            let mut blob_table = write_txn.open_table(BLOB_TABLE)?;
            blob_table.insert(id, blob)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_meta_raw(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;

        if let Some(value) = table.get(id)? {
            Ok(Some(value.value().to_vec()))
        } else {
            Ok(None)
        }
    }

    pub fn get_blob(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BLOB_TABLE)?;

        if let Some(value) = table.get(id)? {
            Ok(Some(value.value().to_vec()))
        } else {
            Ok(None)
        }
    }

    /// List all record metadata as (id, bytes) pairs. Blobs stay on disk.
    pub fn list_meta_raw(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;

        let mut items = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            items.push((key.value().to_string(), value.value().to_vec()));
        }

        Ok(items)
    }

    /// Delete a record and its blob, returns true if the record existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let existed = meta_table.remove(id)?.is_some();
            let mut blob_table = write_txn.open_table(BLOB_TABLE)?;
            blob_table.remove(id)?;
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// Delete a batch of records in one transaction, returns how many
    /// existed.
    pub fn delete_many(&self, ids: &[String]) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let mut removed = 0;
        {
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let mut blob_table = write_txn.open_table(BLOB_TABLE)?;
            for id in ids {
                if meta_table.remove(id.as_str())?.is_some() {
                    removed += 1;
                }
                blob_table.remove(id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;
        Ok(table.len()? as usize)
    }
}
