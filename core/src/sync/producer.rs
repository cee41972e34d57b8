//! Event production
//!
//! The only way business actions enter the log: stock card batches pass the
//! consistency gate first, then become one event appended to the local store.
//!
//! The ledger only changes when the replay sweep applies an event, so the gate
//! checks against the ledger plus every stock card this facility recorded
//! that is still waiting for replay.

use crate::event::{Event, EventCategory};
use crate::gate::{ConsistencyGate, ReasonCatalog, ValidationContext, ValidationResult};
use crate::ledger::{LedgerHistory, MovementType, ProductMovement, StockCardCreateRequest};
use crate::store::EventStore;
use crate::types::{EventId, FacilityId, GroupId};
use crate::{Error, Result};
use std::sync::Arc;

/// Ledger history with this facility's recorded, unreplayed movements on top
struct PendingHistory<'a> {
    ledger: &'a dyn LedgerHistory,
    facility_id: FacilityId,
    pending: Vec<ProductMovement>,
}

impl LedgerHistory for PendingHistory<'_> {
    fn movements(&self, facility: &FacilityId, product_code: &str) -> Vec<ProductMovement> {
        let mut movements = self.ledger.movements(facility, product_code);
        if *facility != self.facility_id {
            return movements;
        }

        let before = movements.len();
        for movement in self.pending.iter().filter(|m| m.product_code == product_code) {
            // Replay may have landed it in the ledger since the store was read
            let key = movement.key();
            if !movements.iter().any(|m| m.key() == key) {
                movements.push(movement.clone());
            }
        }
        if movements.len() != before {
            movements.sort_by(|a, b| a.event_time.cmp(&b.event_time));
        }
        movements
    }
}

pub struct EventProducer {
    store: Arc<dyn EventStore>,
    facility_id: FacilityId,
}

impl EventProducer {
    pub fn new(store: Arc<dyn EventStore>, facility_id: FacilityId) -> Self {
        Self { store, facility_id }
    }

    pub fn facility_id(&self) -> FacilityId {
        self.facility_id
    }

    /// Validate a stock card batch and record it as a single event
    ///
    /// A rejected batch is returned as `Error::Rejected` and nothing is stored.
    pub fn record_stock_cards(
        &self,
        history: &dyn LedgerHistory,
        catalog: &ReasonCatalog,
        requests: &[StockCardCreateRequest],
        receiver: Option<FacilityId>,
    ) -> Result<Event> {
        let history = PendingHistory {
            ledger: history,
            facility_id: self.facility_id,
            pending: self.pending_movements()?,
        };
        let ctx = ValidationContext::new(self.facility_id, &history, catalog);
        if let ValidationResult::Reject(rejection) = ConsistencyGate::validate(&ctx, requests)? {
            tracing::info!(
                facility = %self.facility_id,
                reason = rejection.kind.flag(),
                "Stock card batch rejected"
            );
            return Err(Error::Rejected(rejection));
        }

        let category = if requests
            .iter()
            .all(|r| r.movement_type == MovementType::PhysicalInventory)
        {
            EventCategory::PhysicalInventory
        } else {
            EventCategory::StockCard
        };

        let mut event = Event::new(self.facility_id, category, serde_json::to_vec(requests)?);
        if let Some(receiver) = receiver {
            event = event.with_receiver(receiver);
        }
        self.append(event)
    }

    /// Record an arbitrary payload, optionally addressed and with a parent
    pub fn record(
        &self,
        category: EventCategory,
        payload: Vec<u8>,
        receiver: Option<FacilityId>,
        parent: Option<EventId>,
    ) -> Result<Event> {
        let mut event = Event::new(self.facility_id, category, payload);
        if let Some(receiver) = receiver {
            event = event.with_receiver(receiver);
        }
        if let Some(parent) = parent {
            event = event.with_parent(parent);
        }
        self.append(event)
    }

    /// Record the next member of a causal group
    pub fn record_in_group(
        &self,
        group: &GroupId,
        category: EventCategory,
        payload: Vec<u8>,
        receiver: Option<FacilityId>,
    ) -> Result<Event> {
        let position = self.store.next_group_sequence_number(group)?;
        let mut event = Event::new(self.facility_id, category, payload).with_group(group.clone(), position);
        if let Some(receiver) = receiver {
            event = event.with_receiver(receiver);
        }
        self.append(event)
    }

    /// Movements of stock cards recorded here that replay has not applied yet
    fn pending_movements(&self) -> Result<Vec<ProductMovement>> {
        let mut movements = Vec::new();
        for event in self.store.find_not_replayed_events()? {
            if event.sender_id != self.facility_id
                || !matches!(event.category, EventCategory::StockCard | EventCategory::PhysicalInventory)
            {
                continue;
            }
            let Some(payload) = event.payload.as_deref() else {
                continue;
            };
            match serde_json::from_slice::<Vec<StockCardCreateRequest>>(payload) {
                Ok(requests) => movements.extend(requests.iter().map(ProductMovement::from_request)),
                Err(e) => tracing::warn!(event_id = %event.id, error = %e, "Unreadable pending stock card"),
            }
        }
        Ok(movements)
    }

    fn append(&self, mut event: Event) -> Result<Event> {
        event.local_sequence_number = self.store.append(event.clone())?;
        tracing::debug!(
            event_id = %event.id,
            sequence = event.local_sequence_number,
            category = ?event.category,
            "Recorded event"
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{FacilityReasons, RejectionKind};
    use crate::ledger::MemoryLedger;
    use crate::store::MemoryEventStore;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn request(quantity: i64, stock_on_hand: i64) -> StockCardCreateRequest {
        request_on(1, quantity, stock_on_hand)
    }

    fn request_on(day: u32, quantity: i64, stock_on_hand: i64) -> StockCardCreateRequest {
        StockCardCreateRequest {
            product_code: "P1".to_string(),
            movement_type: MovementType::Receive,
            reason_name: Some("District Store".to_string()),
            quantity,
            stock_on_hand,
            occurred_date: NaiveDate::from_ymd_opt(2024, 4, day).unwrap(),
            recorded_at: Utc.with_ymd_and_hms(2024, 4, day, 12, 0, 0).unwrap(),
            document_number: Some("GRN-1".to_string()),
            lot_events: vec![],
        }
    }

    fn setup() -> (EventProducer, Arc<MemoryEventStore>, ReasonCatalog) {
        let facility = FacilityId::new();
        let store = Arc::new(MemoryEventStore::new());
        let mut catalog = ReasonCatalog::new();
        catalog.insert(facility, FacilityReasons::default().with_source("District Store", "s-1"));
        (EventProducer::new(store.clone(), facility), store, catalog)
    }

    #[test]
    fn test_accepted_batch_becomes_one_event() {
        let (producer, store, catalog) = setup();
        let ledger = MemoryLedger::new();
        let receiver = FacilityId::new();

        let event = producer
            .record_stock_cards(&ledger, &catalog, &[request(10, 10)], Some(receiver))
            .unwrap();

        assert_eq!(event.local_sequence_number, 1);
        assert_eq!(event.category, EventCategory::StockCard);
        assert!(!event.receiver_synced);
        let stored = store.get(&event.id).unwrap().unwrap();
        let payload: Vec<StockCardCreateRequest> = serde_json::from_slice(stored.payload.as_deref().unwrap()).unwrap();
        assert_eq!(payload, vec![request(10, 10)]);
    }

    #[test]
    fn test_rejected_batch_stores_nothing() {
        let (producer, store, catalog) = setup();
        let ledger = MemoryLedger::new();

        let result = producer.record_stock_cards(&ledger, &catalog, &[request(10, 30)], None);
        match result {
            Err(Error::Rejected(rejection)) => assert_eq!(rejection.kind, RejectionKind::New),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_chained_batches_before_replay() {
        let (producer, _, catalog) = setup();
        let ledger = MemoryLedger::new();

        producer
            .record_stock_cards(&ledger, &catalog, &[request_on(1, 50, 50)], None)
            .unwrap();
        producer
            .record_stock_cards(&ledger, &catalog, &[request_on(2, 10, 60)], None)
            .unwrap();

        // Still unreplayed, yet a broken continuation is caught
        let result = producer.record_stock_cards(&ledger, &catalog, &[request_on(3, 5, 70)], None);
        match result {
            Err(Error::Rejected(rejection)) => {
                assert_eq!(rejection.kind, RejectionKind::Continuity);
                assert_eq!(rejection.diagnostics.get_i64("previousInventory"), Some(60));
            }
            other => panic!("expected continuity rejection, got {:?}", other),
        }
        assert!(ledger.movements(&producer.facility_id(), "P1").is_empty());
    }

    #[tokio::test]
    async fn test_pending_and_replayed_history_agree() {
        let (producer, store, catalog) = setup();
        let ledger = Arc::new(MemoryLedger::new());
        let replay = crate::sync::ReplayEngine::new(
            store.clone(),
            Arc::new(crate::sync::MemoryLockService::new()),
            ledger.clone(),
            std::time::Duration::from_secs(30),
        );

        producer
            .record_stock_cards(ledger.as_ref(), &catalog, &[request_on(1, 50, 50)], None)
            .unwrap();
        replay.replay_pending().await.unwrap();
        producer
            .record_stock_cards(ledger.as_ref(), &catalog, &[request_on(2, 20, 70)], None)
            .unwrap();
        // Resubmitted while the first copy is still unreplayed
        producer
            .record_stock_cards(ledger.as_ref(), &catalog, &[request_on(2, 20, 70)], None)
            .unwrap();
        replay.replay_pending().await.unwrap();

        let movements = ledger.movements(&producer.facility_id(), "P1");
        assert_eq!(movements.len(), 2);
        assert_eq!(ledger.stock_on_hand(&producer.facility_id(), "P1"), Some(70));
    }

    #[test]
    fn test_group_members_get_dense_positions() {
        let (producer, store, _) = setup();
        let group = GroupId::new("requisition-9");

        let first = producer
            .record_in_group(&group, EventCategory::Requisition, b"{}".to_vec(), None)
            .unwrap();
        let second = producer
            .record_in_group(&group, EventCategory::Requisition, b"{}".to_vec(), None)
            .unwrap();

        assert_eq!(first.group_sequence_number, Some(0));
        assert_eq!(second.group_sequence_number, Some(1));
        let sorted: Vec<EventId> = store
            .load_sorted_group_events(&group)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(sorted, vec![first.id, second.id]);
    }
}
