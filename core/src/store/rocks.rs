//! RocksDB-based persistent event store

use super::{sort_by_sequence, EventStore};
use crate::event::{Event, SequenceGenerator};
use crate::types::*;
use crate::{Error, Result};
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const EVENT_PREFIX: &[u8] = b"event:";
const ORIGIN_PREFIX: &[u8] = b"origin:";
const GROUP_PREFIX: &[u8] = b"group:";
const GROUP_COUNTER_PREFIX: &[u8] = b"meta:group:";
const SEQUENCE_KEY: &[u8] = b"meta:sequence";

/// Event store persisted in RocksDB
///
/// Every mutation goes through one `WriteBatch`, so an import either lands
/// completely or not at all.
pub struct RocksEventStore {
    db: DB,
    sequence: SequenceGenerator,
    /// Serializes check-then-write sequences
    write_lock: Mutex<()>,
}

impl RocksEventStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open(&opts, path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        let last = match db.get(SEQUENCE_KEY)? {
            Some(bytes) => decode_u64(&bytes)?,
            None => 0,
        };
        tracing::debug!(last_sequence = last, "Opened event store");

        Ok(Self {
            db,
            sequence: SequenceGenerator::starting_after(last),
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::Storage("Event store lock poisoned".to_string()))
    }

    fn load(&self, id: &EventId) -> Result<Option<Event>> {
        match self.db.get(event_key(id)) {
            Ok(Some(value)) => Ok(Some(Event::from_bytes(&value)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to get event: {}", e))),
        }
    }

    fn load_existing(&self, id: &EventId) -> Result<Event> {
        self.load(id)?
            .ok_or_else(|| Error::Storage(format!("Unknown event {}", id)))
    }

    fn read_id(&self, key: &[u8]) -> Result<Option<EventId>> {
        match self.db.get(key)? {
            Some(bytes) => {
                let uuid = uuid::Uuid::from_slice(&bytes)
                    .map_err(|e| Error::Serialization(format!("Corrupt index entry: {}", e)))?;
                Ok(Some(EventId(uuid)))
            }
            None => Ok(None),
        }
    }

    fn group_counter(&self, group: &GroupId) -> Result<u64> {
        match self.db.get(group_counter_key(group))? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    /// Reject an event whose origin sequence or group position is taken
    fn check_indexes(&self, event: &Event) -> Result<()> {
        if let Some(existing) = self.read_id(&origin_key(&event.sender_id, event.local_sequence_number))? {
            if existing != event.id {
                return Err(Error::Invariant(format!(
                    "sequence {} of {} already taken by event {}",
                    event.local_sequence_number, event.sender_id, existing
                )));
            }
        }

        if let (Some(group), Some(position)) = (&event.group_id, event.group_sequence_number) {
            if let Some(existing) = self.read_id(&group_key(group, position))? {
                if existing != event.id {
                    return Err(Error::Invariant(format!(
                        "group {} position {} already taken by event {}",
                        group, position, existing
                    )));
                }
            }
        }

        Ok(())
    }

    /// Add an event and its index entries to a batch
    fn stage(&self, batch: &mut WriteBatch, event: &Event) -> Result<()> {
        batch.put(event_key(&event.id), event.to_bytes()?);
        batch.put(
            origin_key(&event.sender_id, event.local_sequence_number),
            event.id.as_bytes(),
        );
        if let (Some(group), Some(position)) = (&event.group_id, event.group_sequence_number) {
            batch.put(group_key(group, position), event.id.as_bytes());
        }
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| Error::Storage(format!("Failed to write batch: {}", e)))
    }

    /// Rewrite one event in place
    fn update(&self, id: &EventId, f: impl FnOnce(&mut Event)) -> Result<()> {
        let mut event = self.load_existing(id)?;
        f(&mut event);
        self.db
            .put(event_key(id), event.to_bytes()?)
            .map_err(|e| Error::Storage(format!("Failed to update event: {}", e)))
    }

    /// Scan all events, keeping those matching `filter`
    fn scan(&self, filter: impl Fn(&Event) -> bool) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        let iter = self.db.iterator(IteratorMode::From(EVENT_PREFIX, rocksdb::Direction::Forward));

        for item in iter {
            let (key, value) = item
                .map_err(|e| Error::Storage(format!("Iterator error: {}", e)))?;

            // Stop once we've moved past the event keys
            if !key.starts_with(EVENT_PREFIX) {
                break;
            }

            let event = Event::from_bytes(&value)?;
            if filter(&event) {
                events.push(event);
            }
        }

        sort_by_sequence(&mut events);
        Ok(events)
    }
}

impl EventStore for RocksEventStore {
    fn append(&self, mut event: Event) -> Result<u64> {
        let _guard = self.lock()?;

        if self.load(&event.id)?.is_some() {
            return Err(Error::Invariant(format!("event {} appended twice", event.id)));
        }

        event.local_sequence_number = self.sequence.next();
        self.check_indexes(&event)?;

        let mut batch = WriteBatch::default();
        self.stage(&mut batch, &event)?;
        batch.put(SEQUENCE_KEY, self.sequence.current().to_be_bytes());
        if let (Some(group), Some(position)) = (&event.group_id, event.group_sequence_number) {
            let next = self.group_counter(group)?.max(position + 1);
            batch.put(group_counter_key(group), next.to_be_bytes());
        }
        self.write(batch)?;

        tracing::debug!(event_id = %event.id, sequence = event.local_sequence_number, "Appended event");
        Ok(event.local_sequence_number)
    }

    fn next_group_sequence_number(&self, group: &GroupId) -> Result<u64> {
        let _guard = self.lock()?;
        let position = self.group_counter(group)?;
        self.db
            .put(group_counter_key(group), (position + 1).to_be_bytes())
            .map_err(|e| Error::Storage(format!("Failed to reserve group position: {}", e)))?;
        Ok(position)
    }

    fn import_all_get_new_added(&self, events: Vec<Event>) -> Result<Vec<Event>> {
        let _guard = self.lock()?;

        let mut batch_ids = HashSet::new();
        let mut batch_origins = HashSet::new();
        let mut counters: HashMap<GroupId, u64> = HashMap::new();
        let mut new_events = Vec::new();
        let mut max_sequence = self.sequence.current();

        for event in events {
            if !batch_ids.insert(event.id) || self.load(&event.id)?.is_some() {
                continue;
            }
            self.check_indexes(&event)?;
            if !batch_origins.insert((event.sender_id, event.local_sequence_number)) {
                return Err(Error::Invariant(format!(
                    "sequence {} of {} used twice in one batch",
                    event.local_sequence_number, event.sender_id
                )));
            }

            max_sequence = max_sequence.max(event.local_sequence_number);
            if let (Some(group), Some(position)) = (&event.group_id, event.group_sequence_number) {
                let current = match counters.get(group) {
                    Some(value) => *value,
                    None => self.group_counter(group)?,
                };
                counters.insert(group.clone(), current.max(position + 1));
            }
            new_events.push(event);
        }

        if new_events.is_empty() {
            return Ok(new_events);
        }

        let mut batch = WriteBatch::default();
        for event in &new_events {
            self.stage(&mut batch, event)?;
        }
        for (group, next) in &counters {
            batch.put(group_counter_key(group), next.to_be_bytes());
        }
        batch.put(SEQUENCE_KEY, max_sequence.to_be_bytes());
        self.write(batch)?;

        self.sequence.observe(max_sequence);
        Ok(new_events)
    }

    fn find_not_replayed_events(&self) -> Result<Vec<Event>> {
        self.scan(|e| !e.local_replayed && !e.archived)
    }

    fn load_sorted_group_events(&self, group: &GroupId) -> Result<Vec<Event>> {
        let prefix = group_prefix(group);
        let mut events = Vec::new();
        let iter = self.db.iterator(IteratorMode::From(&prefix, rocksdb::Direction::Forward));

        for item in iter {
            let (key, value) = item
                .map_err(|e| Error::Storage(format!("Iterator error: {}", e)))?;
            if !key.starts_with(&prefix) {
                break;
            }

            let uuid = uuid::Uuid::from_slice(&value)
                .map_err(|e| Error::Serialization(format!("Corrupt group index: {}", e)))?;
            events.push(self.load_existing(&EventId(uuid))?);
        }

        // Keys carry big-endian positions, so iteration order is sequence order
        Ok(events)
    }

    fn get(&self, id: &EventId) -> Result<Option<Event>> {
        self.load(id)
    }

    fn seed_sequence(&self, min: u64) -> Result<()> {
        let _guard = self.lock()?;
        self.sequence.observe(min);
        self.db
            .put(SEQUENCE_KEY, self.sequence.current().to_be_bytes())
            .map_err(|e| Error::Storage(format!("Failed to seed sequence: {}", e)))
    }

    fn last_sequence(&self) -> u64 {
        self.sequence.current()
    }

    fn mark_replayed(&self, id: &EventId) -> Result<()> {
        let _guard = self.lock()?;
        self.update(id, |e| e.local_replayed = true)
    }

    fn mark_online_web_synced(&self, ids: &[EventId], synced_time: u64) -> Result<()> {
        let _guard = self.lock()?;
        let mut batch = WriteBatch::default();
        for id in ids {
            let mut event = self.load_existing(id)?;
            event.online_web_synced = true;
            event.synced_time.get_or_insert(synced_time);
            batch.put(event_key(id), event.to_bytes()?);
        }
        self.write(batch)
    }

    fn mark_receiver_synced(&self, ids: &[EventId]) -> Result<()> {
        let _guard = self.lock()?;
        let mut batch = WriteBatch::default();
        for id in ids {
            // Confirmations may name events this node never stored
            if let Some(mut event) = self.load(id)? {
                event.receiver_synced = true;
                batch.put(event_key(id), event.to_bytes()?);
            }
        }
        self.write(batch)
    }

    fn find_unpushed(&self, sender: &FacilityId) -> Result<Vec<Event>> {
        self.scan(|e| e.sender_id == *sender && !e.online_web_synced && !e.archived)
    }

    fn find_for_receivers(&self, receivers: &[FacilityId]) -> Result<Vec<Event>> {
        self.scan(|e| {
            !e.receiver_synced
                && !e.archived
                && e.receiver_id.map(|r| receivers.contains(&r)).unwrap_or(false)
        })
    }

    fn find_receiver_confirmed(&self, senders: &[FacilityId]) -> Result<Vec<EventId>> {
        Ok(self
            .scan(|e| e.receiver_id.is_some() && e.receiver_synced && senders.contains(&e.sender_id))?
            .into_iter()
            .map(|e| e.id)
            .collect())
    }

    fn find_archivable(&self, limit: usize) -> Result<Vec<Event>> {
        let mut events = self.scan(Event::is_archivable)?;
        events.truncate(limit);
        Ok(events)
    }

    fn archive(&self, id: &EventId) -> Result<()> {
        let _guard = self.lock()?;
        self.update(id, |e| {
            e.payload = None;
            e.archived = true;
        })
    }
}

// Key construction helpers

fn event_key(id: &EventId) -> Vec<u8> {
    let mut key = EVENT_PREFIX.to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

fn origin_key(sender: &FacilityId, sequence: u64) -> Vec<u8> {
    let mut key = ORIGIN_PREFIX.to_vec();
    key.extend_from_slice(sender.as_bytes());
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn group_prefix(group: &GroupId) -> Vec<u8> {
    let mut prefix = GROUP_PREFIX.to_vec();
    prefix.extend_from_slice(group.as_str().as_bytes());
    prefix.push(0);
    prefix
}

fn group_key(group: &GroupId, position: u64) -> Vec<u8> {
    let mut key = group_prefix(group);
    key.extend_from_slice(&position.to_be_bytes());
    key
}

fn group_counter_key(group: &GroupId) -> Vec<u8> {
    let mut key = GROUP_COUNTER_PREFIX.to_vec();
    key.extend_from_slice(group.as_str().as_bytes());
    key
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Serialization(format!("Expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventCategory;
    use tempfile::TempDir;

    fn event(sender: FacilityId) -> Event {
        Event::new(sender, EventCategory::StockCard, b"[]".to_vec())
    }

    #[test]
    fn test_store_and_retrieve_event() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksEventStore::open(temp_dir.path()).unwrap();

        let e = event(FacilityId::new());
        let id = e.id;
        let sequence = store.append(e).unwrap();

        let retrieved = store.get(&id).unwrap().unwrap();
        assert_eq!(retrieved.local_sequence_number, sequence);
        assert_eq!(store.find_not_replayed_events().unwrap().len(), 1);
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let facility = FacilityId::new();

        let last = {
            let store = RocksEventStore::open(temp_dir.path()).unwrap();
            store.append(event(facility)).unwrap();
            store.append(event(facility)).unwrap()
        };

        let store = RocksEventStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.last_sequence(), last);
        assert!(store.append(event(facility)).unwrap() > last);
    }

    #[test]
    fn test_seed_sequence_persists() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksEventStore::open(temp_dir.path()).unwrap();
            store.seed_sequence(1_000).unwrap();
        }

        let store = RocksEventStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.append(event(FacilityId::new())).unwrap(), 1_001);
    }

    #[test]
    fn test_import_is_atomic() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksEventStore::open(temp_dir.path()).unwrap();
        let sender = FacilityId::new();

        let mut first = event(sender);
        first.local_sequence_number = 10;
        let mut clash = event(sender);
        clash.local_sequence_number = 10;

        let result = store.import_all_get_new_added(vec![first.clone(), clash]);
        assert!(matches!(result, Err(Error::Invariant(_))));
        assert!(store.get(&first.id).unwrap().is_none());

        let added = store.import_all_get_new_added(vec![first.clone(), first.clone()]).unwrap();
        assert_eq!(added.len(), 1);
        assert!(store.import_all_get_new_added(vec![first]).unwrap().is_empty());
        assert_eq!(store.last_sequence(), 10);
    }

    #[test]
    fn test_group_events_sorted_and_counter_advanced() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksEventStore::open(temp_dir.path()).unwrap();
        let sender = FacilityId::new();
        let group = GroupId::new("req-7");

        let batch: Vec<Event> = [(1u64, 1u64), (2, 0), (3, 256)]
            .into_iter()
            .map(|(sequence, position)| {
                let mut e = event(sender).with_group(group.clone(), position);
                e.local_sequence_number = sequence;
                e
            })
            .collect();
        store.import_all_get_new_added(batch).unwrap();

        let positions: Vec<u64> = store
            .load_sorted_group_events(&group)
            .unwrap()
            .iter()
            .filter_map(|e| e.group_sequence_number)
            .collect();
        assert_eq!(positions, vec![0, 1, 256]);
        assert_eq!(store.next_group_sequence_number(&group).unwrap(), 257);

        // A group whose name extends another one's must not bleed into it
        assert!(store.load_sorted_group_events(&GroupId::new("req")).unwrap().is_empty());
    }

    #[test]
    fn test_flag_updates_and_archive() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksEventStore::open(temp_dir.path()).unwrap();
        let me = FacilityId::new();
        let them = FacilityId::new();

        let e = event(me).with_receiver(them);
        let id = e.id;
        store.append(e).unwrap();

        store.mark_online_web_synced(&[id], 99).unwrap();
        store.mark_receiver_synced(&[id]).unwrap();
        assert!(store.find_archivable(100).unwrap().is_empty());

        store.mark_replayed(&id).unwrap();
        assert_eq!(store.find_archivable(100).unwrap().len(), 1);
        assert_eq!(store.find_receiver_confirmed(&[me]).unwrap(), vec![id]);

        store.archive(&id).unwrap();
        let archived = store.get(&id).unwrap().unwrap();
        assert!(archived.archived && archived.payload.is_none());
        assert_eq!(archived.synced_time, Some(99));
    }
}
