//! In-memory event store

use super::{sort_by_sequence, EventStore};
use crate::event::{Event, SequenceGenerator};
use crate::types::*;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Event store backed by process memory
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
    sequence: SequenceGenerator,
}

#[derive(Default)]
struct Inner {
    events: HashMap<EventId, Event>,

    /// (origin, local sequence) -> event, detects sequence reuse
    by_origin_sequence: HashMap<(FacilityId, u64), EventId>,

    /// group -> (group sequence -> event)
    groups: HashMap<GroupId, BTreeMap<u64, EventId>>,

    /// Next reserved position per group
    group_counters: HashMap<GroupId, u64>,
}

impl Inner {
    /// Check an event against the indexes without mutating anything
    fn check_indexes(&self, event: &Event) -> Result<()> {
        let origin_key = (event.sender_id, event.local_sequence_number);
        if let Some(existing) = self.by_origin_sequence.get(&origin_key) {
            if *existing != event.id {
                return Err(Error::Invariant(format!(
                    "sequence {} of {} already taken by event {}",
                    event.local_sequence_number, event.sender_id, existing
                )));
            }
        }

        if let (Some(group), Some(position)) = (&event.group_id, event.group_sequence_number) {
            if let Some(existing) = self.groups.get(group).and_then(|g| g.get(&position)) {
                if *existing != event.id {
                    return Err(Error::Invariant(format!(
                        "group {} position {} already taken by event {}",
                        group, position, existing
                    )));
                }
            }
        }

        Ok(())
    }

    fn insert(&mut self, event: Event) {
        self.by_origin_sequence
            .insert((event.sender_id, event.local_sequence_number), event.id);

        if let (Some(group), Some(position)) = (&event.group_id, event.group_sequence_number) {
            self.groups
                .entry(group.clone())
                .or_default()
                .insert(position, event.id);
            let counter = self.group_counters.entry(group.clone()).or_insert(0);
            *counter = (*counter).max(position + 1);
        }

        self.events.insert(event.id, event);
    }

    fn update(&mut self, id: &EventId, f: impl FnOnce(&mut Event)) -> Result<()> {
        let event = self
            .events
            .get_mut(id)
            .ok_or_else(|| Error::Storage(format!("Unknown event {}", id)))?;
        f(event);
        Ok(())
    }

    fn collect(&self, filter: impl Fn(&Event) -> bool) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.values().filter(|e| filter(e)).cloned().collect();
        sort_by_sequence(&mut events);
        events
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            sequence: SequenceGenerator::new(),
        }
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::Storage("Event store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::Storage("Event store lock poisoned".to_string()))
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, mut event: Event) -> Result<u64> {
        let mut inner = self.write()?;

        if inner.events.contains_key(&event.id) {
            return Err(Error::Invariant(format!("event {} appended twice", event.id)));
        }

        event.local_sequence_number = self.sequence.next();
        inner.check_indexes(&event)?;

        let sequence = event.local_sequence_number;
        tracing::debug!(event_id = %event.id, sequence, "Appended event");
        inner.insert(event);
        Ok(sequence)
    }

    fn next_group_sequence_number(&self, group: &GroupId) -> Result<u64> {
        let mut inner = self.write()?;
        let counter = inner.group_counters.entry(group.clone()).or_insert(0);
        let position = *counter;
        *counter += 1;
        Ok(position)
    }

    fn import_all_get_new_added(&self, events: Vec<Event>) -> Result<Vec<Event>> {
        let mut inner = self.write()?;

        // Validate the whole batch before touching anything
        let mut batch_ids = HashSet::new();
        let mut batch_origins = HashSet::new();
        let mut new_events = Vec::new();
        for event in events {
            if inner.events.contains_key(&event.id) || !batch_ids.insert(event.id) {
                continue;
            }
            inner.check_indexes(&event)?;
            if !batch_origins.insert((event.sender_id, event.local_sequence_number)) {
                return Err(Error::Invariant(format!(
                    "sequence {} of {} used twice in one batch",
                    event.local_sequence_number, event.sender_id
                )));
            }
            new_events.push(event);
        }

        for event in &new_events {
            self.sequence.observe(event.local_sequence_number);
            inner.insert(event.clone());
        }

        Ok(new_events)
    }

    fn find_not_replayed_events(&self) -> Result<Vec<Event>> {
        Ok(self.read()?.collect(|e| !e.local_replayed && !e.archived))
    }

    fn load_sorted_group_events(&self, group: &GroupId) -> Result<Vec<Event>> {
        let inner = self.read()?;
        let Some(members) = inner.groups.get(group) else {
            return Ok(Vec::new());
        };
        Ok(members
            .values()
            .filter_map(|id| inner.events.get(id).cloned())
            .collect())
    }

    fn get(&self, id: &EventId) -> Result<Option<Event>> {
        Ok(self.read()?.events.get(id).cloned())
    }

    fn seed_sequence(&self, min: u64) -> Result<()> {
        self.sequence.observe(min);
        Ok(())
    }

    fn last_sequence(&self) -> u64 {
        self.sequence.current()
    }

    fn mark_replayed(&self, id: &EventId) -> Result<()> {
        self.write()?.update(id, |e| e.local_replayed = true)
    }

    fn mark_online_web_synced(&self, ids: &[EventId], synced_time: u64) -> Result<()> {
        let mut inner = self.write()?;
        for id in ids {
            inner.update(id, |e| {
                e.online_web_synced = true;
                e.synced_time.get_or_insert(synced_time);
            })?;
        }
        Ok(())
    }

    fn mark_receiver_synced(&self, ids: &[EventId]) -> Result<()> {
        let mut inner = self.write()?;
        for id in ids {
            // Confirmations may name events this node never stored
            if inner.events.contains_key(id) {
                inner.update(id, |e| e.receiver_synced = true)?;
            }
        }
        Ok(())
    }

    fn find_unpushed(&self, sender: &FacilityId) -> Result<Vec<Event>> {
        Ok(self
            .read()?
            .collect(|e| e.sender_id == *sender && !e.online_web_synced && !e.archived))
    }

    fn find_for_receivers(&self, receivers: &[FacilityId]) -> Result<Vec<Event>> {
        Ok(self.read()?.collect(|e| {
            !e.receiver_synced
                && !e.archived
                && e.receiver_id.map(|r| receivers.contains(&r)).unwrap_or(false)
        }))
    }

    fn find_receiver_confirmed(&self, senders: &[FacilityId]) -> Result<Vec<EventId>> {
        Ok(self
            .read()?
            .collect(|e| e.receiver_id.is_some() && e.receiver_synced && senders.contains(&e.sender_id))
            .into_iter()
            .map(|e| e.id)
            .collect())
    }

    fn find_archivable(&self, limit: usize) -> Result<Vec<Event>> {
        let mut events = self.read()?.collect(Event::is_archivable);
        events.truncate(limit);
        Ok(events)
    }

    fn archive(&self, id: &EventId) -> Result<()> {
        self.write()?.update(id, |e| {
            e.payload = None;
            e.archived = true;
        })
    }
}
