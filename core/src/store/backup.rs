//! Backup (cold) store for archived event payloads
//!
//! Write-once blob store keyed by event id, populated only by the archival
//! task. Re-writing the same payload is accepted so an interrupted archival
//! pass can resume; writing a different payload under an existing id is an
//! invariant violation.

use super::compression;
use crate::types::EventId;
use crate::{Error, Result};
use rocksdb::{Options, DB};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

pub trait BackupStore: Send + Sync {
    fn put(&self, id: &EventId, payload: &[u8]) -> Result<()>;

    fn get(&self, id: &EventId) -> Result<Option<Vec<u8>>>;
}

/// Backup store kept in process memory
#[derive(Default)]
pub struct MemoryBackupStore {
    blobs: Mutex<HashMap<EventId, Vec<u8>>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BackupStore for MemoryBackupStore {
    fn put(&self, id: &EventId, payload: &[u8]) -> Result<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| Error::Storage("Backup store lock poisoned".to_string()))?;

        match blobs.get(id) {
            Some(existing) if existing.as_slice() != payload => Err(Error::Invariant(format!(
                "backup for event {} already written with different content",
                id
            ))),
            Some(_) => Ok(()),
            None => {
                blobs.insert(*id, payload.to_vec());
                Ok(())
            }
        }
    }

    fn get(&self, id: &EventId) -> Result<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| Error::Storage("Backup store lock poisoned".to_string()))?;
        Ok(blobs.get(id).cloned())
    }
}

/// RocksDB-backed backup store with LZ4-compressed values
pub struct RocksBackupStore {
    db: DB,
    /// Serializes the read-compare-write in `put`
    write_lock: Mutex<()>,
}

impl RocksBackupStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path)
            .map_err(|e| Error::Storage(format!("Failed to open backup database: {}", e)))?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn key(id: &EventId) -> Vec<u8> {
        let mut key = b"backup:".to_vec();
        key.extend_from_slice(id.as_bytes());
        key
    }
}

impl BackupStore for RocksBackupStore {
    fn put(&self, id: &EventId, payload: &[u8]) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Storage("Backup store lock poisoned".to_string()))?;

        if let Some(existing) = self.get(id)? {
            if existing != payload {
                return Err(Error::Invariant(format!(
                    "backup for event {} already written with different content",
                    id
                )));
            }
            return Ok(());
        }

        let framed = compression::pack(payload)?;
        self.db
            .put(Self::key(id), framed)
            .map_err(|e| Error::Storage(format!("Failed to store backup: {}", e)))?;

        tracing::debug!(event_id = %id, bytes = payload.len(), "Backed up payload");
        Ok(())
    }

    fn get(&self, id: &EventId) -> Result<Option<Vec<u8>>> {
        match self.db.get(Self::key(id)) {
            Ok(Some(framed)) => Ok(Some(compression::unpack(&framed)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to get backup: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_backup_is_write_once() {
        let store = MemoryBackupStore::new();
        let id = EventId::new();

        store.put(&id, b"payload").unwrap();
        // Same content again is a no-op
        store.put(&id, b"payload").unwrap();
        assert!(matches!(store.put(&id, b"other"), Err(Error::Invariant(_))));

        assert_eq!(store.get(&id).unwrap(), Some(b"payload".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rocks_backup_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksBackupStore::open(temp_dir.path()).unwrap();
        let id = EventId::new();
        let payload = r#"{"productCode":"P1","quantity":5}"#.repeat(40);

        store.put(&id, payload.as_bytes()).unwrap();
        store.put(&id, payload.as_bytes()).unwrap();

        assert_eq!(store.get(&id).unwrap(), Some(payload.into_bytes()));
        assert!(store.get(&EventId::new()).unwrap().is_none());
        assert!(matches!(store.put(&id, b"changed"), Err(Error::Invariant(_))));
    }
}
