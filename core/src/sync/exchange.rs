//! Push/pull exchange with the online web
//!
//! A local machine pushes the events it produced and pulls the events
//! addressed to its facilities. Heartbeat gates the whole exchange. Nothing
//! is marked synced unless the peer explicitly acknowledged it; a failed call
//! leaves every flag untouched so the next exchange retries.

use super::import::{ImportReport, Importer};
use super::publish::Publisher;
use crate::event::{now_millis, Event};
use crate::store::EventStore;
use crate::types::{EventId, FacilityId};
use crate::{Error, Result};
use async_trait::async_trait;
use minicbor::{Decode, Encode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Batch of locally produced events for the online web
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct PushRequest {
    #[n(0)]
    pub sender: FacilityId,
    #[n(1)]
    pub events: Vec<Event>,
}

/// Per-event rejections; every pushed id not listed was accepted
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct PushResponse {
    #[n(0)]
    pub errors: HashMap<EventId, String>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct PullRequest {
    /// Facilities whose addressed events the caller receives
    #[n(0)]
    pub facility_ids: Vec<FacilityId>,
    /// Events the caller received and stored since its last pull
    #[n(1)]
    pub received: Vec<EventId>,
}

#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct PullResponse {
    #[n(0)]
    pub events: Vec<Event>,
    /// Events sent by the caller's facilities that their receivers confirmed
    #[n(1)]
    pub acknowledged: Vec<EventId>,
    /// Highest sequence the online web has seen
    #[n(2)]
    pub max_sequence: u64,
}

/// Connection to the online web
#[async_trait]
pub trait Transport: Send + Sync {
    async fn heartbeat(&self) -> Result<()>;

    async fn push(&self, request: PushRequest) -> Result<PushResponse>;

    async fn pull(&self, request: PullRequest) -> Result<PullResponse>;
}

/// Sink for events the online web refused
pub trait ErrorRecorder: Send + Sync {
    fn record(&self, event_id: &EventId, error: &str);
}

/// Reports refused events through tracing
pub struct LoggingErrorRecorder;

impl ErrorRecorder for LoggingErrorRecorder {
    fn record(&self, event_id: &EventId, error: &str) {
        tracing::warn!(event_id = %event_id, error, "Online web refused event");
    }
}

/// Keeps refused events for inspection
#[derive(Default)]
pub struct MemoryErrorRecorder {
    records: Mutex<Vec<(EventId, String)>>,
}

impl MemoryErrorRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(EventId, String)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ErrorRecorder for MemoryErrorRecorder {
    fn record(&self, event_id: &EventId, error: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push((*event_id, error.to_string()));
        }
    }
}

/// Split events into batches whose encoded size stays within `budget`
///
/// An event larger than the budget on its own travels alone.
pub fn chunk_by_budget(events: Vec<Event>, budget: usize) -> Result<Vec<Vec<Event>>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0;

    for event in events {
        let size = event.encoded_len()?;
        if !current.is_empty() && current_size + size > budget {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(event);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

#[derive(Debug, Clone, Default)]
pub struct PushReport {
    pub requests: usize,
    pub accepted: Vec<EventId>,
    pub rejected: Vec<EventId>,
}

#[derive(Debug, Clone, Default)]
pub struct PullReport {
    pub acknowledged: usize,
    pub import: ImportReport,
}

#[derive(Debug, Clone, Default)]
pub struct ExchangeReport {
    /// False if the heartbeat failed and nothing was attempted
    pub online: bool,
    pub push: PushReport,
    pub pull: PullReport,
}

/// Local machine side of the exchange
pub struct SyncService {
    facility_id: FacilityId,
    known_facilities: Vec<FacilityId>,
    store: Arc<dyn EventStore>,
    transport: Arc<dyn Transport>,
    importer: Arc<Importer>,
    publisher: Publisher,
    errors: Arc<dyn ErrorRecorder>,
    push_byte_budget: usize,
    /// Receipts not yet delivered to the online web
    pending_receipts: Mutex<Vec<EventId>>,
}

impl SyncService {
    pub fn new(
        facility_id: FacilityId,
        known_facilities: Vec<FacilityId>,
        store: Arc<dyn EventStore>,
        transport: Arc<dyn Transport>,
        importer: Arc<Importer>,
        errors: Arc<dyn ErrorRecorder>,
        push_byte_budget: usize,
    ) -> Self {
        Self {
            facility_id,
            known_facilities,
            publisher: Publisher::new(store.clone()),
            store,
            transport,
            importer,
            errors,
            push_byte_budget,
            pending_receipts: Mutex::new(Vec::new()),
        }
    }

    /// Heartbeat, then push, then pull
    pub async fn exchange(&self) -> Result<ExchangeReport> {
        if let Err(e) = self.transport.heartbeat().await {
            tracing::warn!(error = %e, "Online web unreachable, skipping exchange");
            return Ok(ExchangeReport::default());
        }

        let push = self.push().await?;
        let pull = self.pull().await?;
        Ok(ExchangeReport {
            online: true,
            push,
            pull,
        })
    }

    /// Send unconfirmed local events in budget-sized requests
    ///
    /// Each request is acknowledged independently; a failing request stops
    /// the push but keeps the confirmations of earlier ones.
    pub async fn push(&self) -> Result<PushReport> {
        let mut report = PushReport::default();
        let unpushed = self.store.find_unpushed(&self.facility_id)?;
        if unpushed.is_empty() {
            return Ok(report);
        }

        for chunk in chunk_by_budget(unpushed, self.push_byte_budget)? {
            let ids: Vec<EventId> = chunk.iter().map(|e| e.id).collect();
            let response = self
                .transport
                .push(PushRequest {
                    sender: self.facility_id,
                    events: chunk,
                })
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, events = ids.len(), "Push failed");
                    e
                })?;
            report.requests += 1;

            let (rejected, accepted): (Vec<EventId>, Vec<EventId>) =
                ids.into_iter().partition(|id| response.errors.contains_key(id));
            self.publisher.confirm_pushed(&accepted, now_millis())?;
            for id in &rejected {
                if let Some(error) = response.errors.get(id) {
                    self.errors.record(id, error);
                }
            }

            report.accepted.extend(accepted);
            report.rejected.extend(rejected);
        }

        tracing::info!(
            requests = report.requests,
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            "Push finished"
        );
        Ok(report)
    }

    /// Fetch addressed events and acknowledgements, import the events
    pub async fn pull(&self) -> Result<PullReport> {
        let received = self.take_receipts()?;
        let request = PullRequest {
            facility_ids: self.known_facilities.clone(),
            received: received.clone(),
        };

        let response = match self.transport.pull(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Pull failed");
                self.restore_receipts(received)?;
                return Err(e);
            }
        };

        self.store.seed_sequence(response.max_sequence)?;
        self.publisher.confirm_delivered(&response.acknowledged)?;

        let import = self.importer.import(response.events).await?;
        self.restore_receipts(import.accepted.clone())?;

        Ok(PullReport {
            acknowledged: response.acknowledged.len(),
            import,
        })
    }

    /// Receipts waiting for the next pull
    pub fn pending_receipts(&self) -> Vec<EventId> {
        self.pending_receipts.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn take_receipts(&self) -> Result<Vec<EventId>> {
        let mut pending = self
            .pending_receipts
            .lock()
            .map_err(|_| Error::Storage("Receipt queue poisoned".to_string()))?;
        Ok(std::mem::take(&mut *pending))
    }

    fn restore_receipts(&self, ids: Vec<EventId>) -> Result<()> {
        let mut pending = self
            .pending_receipts
            .lock()
            .map_err(|_| Error::Storage("Receipt queue poisoned".to_string()))?;
        for id in ids {
            if !pending.contains(&id) {
                pending.push(id);
            }
        }
        Ok(())
    }
}
