//! Replay engine
//!
//! Applies stored events to the ledger exactly once and in order. Events
//! without a group form the default group, replayed by (synced time, local
//! sequence) under a single lock. Grouped events are replayed strictly by
//! group sequence under one lock per group; a missing position defers the
//! rest of the group to a later round. In both, an event whose parent is
//! stored but not yet replayed waits for it.
//!
//! An applier failure only affects that event: it stays unreplayed, is
//! retried on the next sweep, and the rest of the default group goes ahead.
//! Inside a causal group it holds back the later positions.

use super::lock::{LockHandle, LockService};
use crate::event::Event;
use crate::ledger::EventApplier;
use crate::store::EventStore;
use crate::types::{EventId, GroupId};
use crate::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Lock guarding the default group
pub const DEFAULT_REPLAY_LOCK: &str = "default-replay";

/// What happened to the events handed to one replay round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Applied in this round, in application order
    pub applied: Vec<EventId>,
    /// Waiting for a missing predecessor
    pub deferred: Vec<EventId>,
    /// The applier refused them; left unreplayed for a later round
    pub failed: Vec<EventId>,
    /// Ordering units skipped because their lock was held elsewhere
    pub contended: Vec<String>,
}

impl ReplayReport {
    pub fn merge(&mut self, other: ReplayReport) {
        self.applied.extend(other.applied);
        self.deferred.extend(other.deferred);
        self.failed.extend(other.failed);
        self.contended.extend(other.contended);
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.deferred.is_empty() && self.failed.is_empty() && self.contended.is_empty()
    }
}

enum Outcome {
    Applied { keep_lease: bool },
    Failed,
}

pub struct ReplayEngine {
    store: Arc<dyn EventStore>,
    locks: Arc<dyn LockService>,
    applier: Arc<dyn EventApplier>,
    lease: Duration,
}

impl ReplayEngine {
    pub fn new(
        store: Arc<dyn EventStore>,
        locks: Arc<dyn LockService>,
        applier: Arc<dyn EventApplier>,
        lease: Duration,
    ) -> Self {
        Self {
            store,
            locks,
            applier,
            lease,
        }
    }

    /// Replay everything the store still holds unreplayed
    pub async fn replay_pending(&self) -> Result<ReplayReport> {
        let pending = self.store.find_not_replayed_events()?;
        self.replay(pending).await
    }

    /// Replay a set of stored events
    pub async fn replay(&self, events: Vec<Event>) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        if events.is_empty() {
            return Ok(report);
        }

        let mut default_group = Vec::new();
        let mut groups = BTreeSet::new();
        for event in events {
            match &event.group_id {
                Some(group) => {
                    groups.insert(group.clone());
                }
                None => default_group.push(event),
            }
        }

        if !default_group.is_empty() {
            report.merge(self.replay_default(default_group).await?);
        }
        for group in groups {
            report.merge(self.replay_group(&group).await?);
        }

        if !report.is_empty() {
            tracing::info!(
                applied = report.applied.len(),
                deferred = report.deferred.len(),
                failed = report.failed.len(),
                contended = report.contended.len(),
                "Replay round finished"
            );
        }
        Ok(report)
    }

    async fn replay_default(&self, mut events: Vec<Event>) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        let Some(handle) = self.locks.try_acquire(DEFAULT_REPLAY_LOCK, self.lease).await? else {
            tracing::debug!(lock = DEFAULT_REPLAY_LOCK, "Replay lock held elsewhere, skipping round");
            report.contended.push(DEFAULT_REPLAY_LOCK.to_string());
            return Ok(report);
        };

        events.sort_by_key(Event::replay_key);
        let result = self.apply_default(&handle, &events, &mut report).await;
        self.locks.release(handle).await?;
        result.map(|_| report)
    }

    async fn apply_default(&self, handle: &LockHandle, events: &[Event], report: &mut ReplayReport) -> Result<()> {
        for event in events {
            // Another round may have applied it since the caller read it
            let Some(current) = self.store.get(&event.id)? else {
                continue;
            };
            if current.local_replayed {
                continue;
            }

            if self.parent_pending(&current)? {
                report.deferred.push(current.id);
                continue;
            }

            match self.apply(handle, &current).await? {
                Outcome::Applied { keep_lease } => {
                    report.applied.push(current.id);
                    if !keep_lease {
                        break;
                    }
                }
                Outcome::Failed => report.failed.push(current.id),
            }
        }
        Ok(())
    }

    async fn replay_group(&self, group: &GroupId) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        let Some(handle) = self.locks.try_acquire(group.as_str(), self.lease).await? else {
            tracing::debug!(group = %group, "Group lock held elsewhere, skipping round");
            report.contended.push(group.to_string());
            return Ok(report);
        };

        let result = self.apply_group(&handle, group, &mut report).await;
        self.locks.release(handle).await?;
        result.map(|_| report)
    }

    async fn apply_group(&self, handle: &LockHandle, group: &GroupId, report: &mut ReplayReport) -> Result<()> {
        let events = self.store.load_sorted_group_events(group)?;

        let waiting_from = |index: usize| -> Vec<EventId> {
            events[index..]
                .iter()
                .filter(|e| !e.local_replayed)
                .map(|e| e.id)
                .collect()
        };

        for (index, event) in events.iter().enumerate() {
            if event.group_sequence_number != Some(index as u64) {
                let waiting = waiting_from(index);
                tracing::debug!(
                    group = %group,
                    missing = index,
                    waiting = waiting.len(),
                    "Group has a gap, deferring the rest"
                );
                report.deferred.extend(waiting);
                return Ok(());
            }
            if event.local_replayed {
                continue;
            }
            if self.parent_pending(event)? {
                report.deferred.extend(waiting_from(index));
                return Ok(());
            }

            match self.apply(handle, event).await? {
                Outcome::Applied { keep_lease } => {
                    report.applied.push(event.id);
                    if !keep_lease {
                        return Ok(());
                    }
                }
                Outcome::Failed => {
                    report.failed.push(event.id);
                    report.deferred.extend(waiting_from(index + 1));
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// True if the event names a parent that is stored but not yet replayed
    fn parent_pending(&self, event: &Event) -> Result<bool> {
        let Some(parent) = event.parent_id else {
            return Ok(false);
        };
        let pending = self
            .store
            .get(&parent)?
            .map(|p| !p.local_replayed)
            .unwrap_or(false);
        if pending {
            tracing::debug!(event_id = %event.id, parent = %parent, "Parent not replayed yet, deferring");
        }
        Ok(pending)
    }

    /// Apply one event and record it as replayed
    ///
    /// A lost lease is reported as `keep_lease: false`; the round stops there.
    async fn apply(&self, handle: &LockHandle, event: &Event) -> Result<Outcome> {
        if let Err(e) = self.applier.apply(event).await {
            tracing::warn!(event_id = %event.id, error = %e, "Applier refused event, leaving it unreplayed");
            return Ok(Outcome::Failed);
        }
        self.store.mark_replayed(&event.id)?;
        tracing::debug!(event_id = %event.id, sequence = event.local_sequence_number, "Replayed event");

        let keep_lease = self.locks.extend(handle, self.lease).await?;
        if !keep_lease {
            tracing::warn!(lock = %handle.name, "Replay lease lost, stopping round");
        }
        Ok(Outcome::Applied { keep_lease })
    }
}
