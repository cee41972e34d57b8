//! In-memory stock ledger
//!
//! Reference ledger used by tests, the CLI simulation and embedded nodes.
//! Applying an event decodes its stock card payload and appends one
//! `ProductMovement` per request to the sender facility's stock cards,
//! skipping movements whose key is already on the card.

use super::{EventApplier, LedgerHistory, ProductMovement, StockCardCreateRequest};
use crate::event::{Event, EventCategory};
use crate::types::{EventId, FacilityId};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Default)]
pub struct MemoryLedger {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    cards: HashMap<(FacilityId, String), Vec<ProductMovement>>,
    applied: HashSet<EventId>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed history directly, bypassing the event log
    pub fn record(&self, facility: FacilityId, movement: ProductMovement) {
        if let Ok(mut inner) = self.inner.write() {
            let card = inner
                .cards
                .entry((facility, movement.product_code.clone()))
                .or_default();
            card.push(movement);
            card.sort_by(|a, b| a.event_time.cmp(&b.event_time));
        }
    }

    /// Current stock on hand of a product, if it has any history
    pub fn stock_on_hand(&self, facility: &FacilityId, product_code: &str) -> Option<i64> {
        self.movements(facility, product_code)
            .last()
            .map(|m| m.stock_quantity)
    }

    pub fn applied_count(&self) -> usize {
        self.inner.read().map(|inner| inner.applied.len()).unwrap_or(0)
    }

    pub fn is_applied(&self, id: &EventId) -> bool {
        self.inner
            .read()
            .map(|inner| inner.applied.contains(id))
            .unwrap_or(false)
    }
}

impl LedgerHistory for MemoryLedger {
    fn movements(&self, facility: &FacilityId, product_code: &str) -> Vec<ProductMovement> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.cards.get(&(*facility, product_code.to_string())).cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventApplier for MemoryLedger {
    async fn apply(&self, event: &Event) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| Error::Storage("Ledger lock poisoned".to_string()))?;

        if inner.applied.contains(&event.id) {
            tracing::debug!(event_id = %event.id, "Event already applied to ledger");
            return Ok(());
        }

        match event.category {
            EventCategory::StockCard | EventCategory::PhysicalInventory => {
                let payload = event.payload.as_deref().ok_or_else(|| {
                    Error::Invariant(format!("event {} has no payload to apply", event.id))
                })?;
                let requests: Vec<StockCardCreateRequest> = serde_json::from_slice(payload)?;

                for request in &requests {
                    let movement = ProductMovement::from_request(request);
                    let card = inner
                        .cards
                        .entry((event.sender_id, request.product_code.clone()))
                        .or_default();
                    // A resubmitted movement arrives under a fresh event id
                    let key = movement.key();
                    if card.iter().any(|m| m.key() == key) {
                        tracing::debug!(
                            event_id = %event.id,
                            product = %request.product_code,
                            "Movement already on the stock card"
                        );
                        continue;
                    }
                    card.push(movement);
                    card.sort_by(|a, b| a.event_time.cmp(&b.event_time));
                }
            }
            EventCategory::Requisition => {}
        }

        inner.applied.insert(event.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MovementType;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn request(day: u32, quantity: i64, stock_on_hand: i64) -> StockCardCreateRequest {
        StockCardCreateRequest {
            product_code: "P1".to_string(),
            movement_type: MovementType::Receive,
            reason_name: Some("District Store".to_string()),
            quantity,
            stock_on_hand,
            occurred_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            recorded_at: Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).unwrap(),
            document_number: None,
            lot_events: vec![],
        }
    }

    #[tokio::test]
    async fn test_apply_is_idempotent_per_event() {
        let ledger = MemoryLedger::new();
        let facility = FacilityId::new();
        let payload = serde_json::to_vec(&vec![request(1, 50, 50), request(2, 10, 60)]).unwrap();
        let event = Event::new(facility, EventCategory::StockCard, payload);

        ledger.apply(&event).await.unwrap();
        ledger.apply(&event).await.unwrap();

        assert_eq!(ledger.movements(&facility, "P1").len(), 2);
        assert_eq!(ledger.stock_on_hand(&facility, "P1"), Some(60));
        assert_eq!(ledger.applied_count(), 1);
    }

    #[tokio::test]
    async fn test_resubmitted_batch_adds_no_movements() {
        let ledger = MemoryLedger::new();
        let facility = FacilityId::new();
        let payload = serde_json::to_vec(&vec![request(1, 50, 50)]).unwrap();
        let first = Event::new(facility, EventCategory::StockCard, payload.clone());
        let again = Event::new(facility, EventCategory::StockCard, payload);

        ledger.apply(&first).await.unwrap();
        ledger.apply(&again).await.unwrap();

        assert_eq!(ledger.movements(&facility, "P1").len(), 1);
        assert_eq!(ledger.stock_on_hand(&facility, "P1"), Some(50));
        assert!(ledger.is_applied(&again.id));
    }

    #[tokio::test]
    async fn test_apply_archived_event_fails() {
        let ledger = MemoryLedger::new();
        let mut event = Event::new(FacilityId::new(), EventCategory::StockCard, vec![]);
        event.payload = None;

        assert!(matches!(ledger.apply(&event).await, Err(Error::Invariant(_))));
    }

    #[tokio::test]
    async fn test_requisition_has_no_ledger_effect() {
        let ledger = MemoryLedger::new();
        let facility = FacilityId::new();
        let event = Event::new(facility, EventCategory::Requisition, b"not json".to_vec());

        ledger.apply(&event).await.unwrap();
        assert!(ledger.is_applied(&event.id));
        assert!(ledger.movements(&facility, "P1").is_empty());
    }
}
