//! Archival task
//!
//! Compaction, not a business mutation: fully confirmed events have their
//! payload copied to the backup store and dropped from the hot log. A failure
//! only delays compaction until the next run.

use crate::store::{BackupStore, EventStore};
use crate::Result;
use std::sync::Arc;

pub const DEFAULT_PAGE_SIZE: usize = 100;

pub struct ArchivalTask {
    store: Arc<dyn EventStore>,
    backup: Arc<dyn BackupStore>,
    page_size: usize,
}

impl ArchivalTask {
    pub fn new(store: Arc<dyn EventStore>, backup: Arc<dyn BackupStore>, page_size: usize) -> Self {
        Self {
            store,
            backup,
            page_size: page_size.max(1),
        }
    }

    /// Archive pages of eligible events until none remain
    ///
    /// Returns the number of events archived.
    pub async fn run_once(&self) -> Result<usize> {
        let mut archived = 0;
        loop {
            let page = self.store.find_archivable(self.page_size)?;
            if page.is_empty() {
                break;
            }

            for event in page {
                // An archived event's payload lives in the backup store only
                let payload = event.payload.unwrap_or_default();
                self.backup.put(&event.id, &payload)?;
                self.store.archive(&event.id)?;
                archived += 1;
            }
            tokio::task::yield_now().await;
        }

        if archived > 0 {
            tracing::info!(archived, "Archived fully confirmed events");
        }
        Ok(archived)
    }
}
