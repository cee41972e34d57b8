//! Event storage
//!
//! The `EventStore` trait is the persistence contract of the event log:
//! sequence allocation, de-duplicated import and query-by-status. Two
//! backends are provided:
//! - `MemoryEventStore` for tests and embedded use
//! - `RocksEventStore` for on-disk nodes
//!
//! Archived payloads move to a `BackupStore` (see `backup`).

pub mod backup;
pub mod compression;
pub mod memory;
pub mod rocks;

use crate::event::Event;
use crate::types::*;
use crate::Result;

pub use backup::{BackupStore, MemoryBackupStore, RocksBackupStore};
pub use memory::MemoryEventStore;
pub use rocks::RocksEventStore;

/// Persistence contract of the replicated event log
///
/// Implementations must make `import_all_get_new_added` atomic: either every
/// new event of the batch is stored or none is.
pub trait EventStore: Send + Sync {
    /// Store a locally produced event, assigning its local sequence number
    fn append(&self, event: Event) -> Result<u64>;

    /// Reserve the next position inside `group` (0, 1, 2, ...)
    fn next_group_sequence_number(&self, group: &GroupId) -> Result<u64>;

    /// Store the events whose ids are not present yet and return them
    fn import_all_get_new_added(&self, events: Vec<Event>) -> Result<Vec<Event>>;

    fn find_not_replayed_events(&self) -> Result<Vec<Event>>;

    /// All stored events of `group`, ordered by group sequence number
    fn load_sorted_group_events(&self, group: &GroupId) -> Result<Vec<Event>>;

    fn get(&self, id: &EventId) -> Result<Option<Event>>;

    /// Make sure the next allocated sequence is greater than `min`
    fn seed_sequence(&self, min: u64) -> Result<()>;

    /// Highest sequence allocated or observed so far
    fn last_sequence(&self) -> u64;

    fn mark_replayed(&self, id: &EventId) -> Result<()>;

    /// Confirm events as held by the online web
    fn mark_online_web_synced(&self, ids: &[EventId], synced_time: u64) -> Result<()>;

    /// Confirm events as held by their receiving facility
    fn mark_receiver_synced(&self, ids: &[EventId]) -> Result<()>;

    /// Events produced by `sender` the online web has not confirmed yet
    fn find_unpushed(&self, sender: &FacilityId) -> Result<Vec<Event>>;

    /// Events addressed to one of `receivers` that they have not confirmed yet
    fn find_for_receivers(&self, receivers: &[FacilityId]) -> Result<Vec<Event>>;

    /// Events sent by one of `senders` whose receivers confirmed them
    fn find_receiver_confirmed(&self, senders: &[FacilityId]) -> Result<Vec<EventId>>;

    /// Up to `limit` fully confirmed, not yet archived events
    fn find_archivable(&self, limit: usize) -> Result<Vec<Event>>;

    /// Drop the payload and mark the event archived
    fn archive(&self, id: &EventId) -> Result<()>;
}

/// Sort events by local sequence, the storage order used by status queries
pub(crate) fn sort_by_sequence(events: &mut [Event]) {
    events.sort_by_key(|e| (e.local_sequence_number, e.id));
}
