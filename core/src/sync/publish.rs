//! Confirmation bookkeeping after a successful transmission
//!
//! Flags only ever flip here in response to an explicit acknowledgement from
//! the peer, which is what makes delivery at-least-once.

use crate::store::EventStore;
use crate::types::EventId;
use crate::Result;
use std::sync::Arc;

pub struct Publisher {
    store: Arc<dyn EventStore>,
}

impl Publisher {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// The online web acknowledged these pushed events
    pub fn confirm_pushed(&self, ids: &[EventId], synced_time: u64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.store.mark_online_web_synced(ids, synced_time)?;
        tracing::info!(count = ids.len(), "Confirmed pushed events");
        Ok(())
    }

    /// Receivers confirmed these events
    pub fn confirm_delivered(&self, ids: &[EventId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.store.mark_receiver_synced(ids)?;
        tracing::debug!(count = ids.len(), "Confirmed delivered events");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventCategory};
    use crate::store::MemoryEventStore;
    use crate::types::FacilityId;

    #[test]
    fn test_confirmations_flip_only_named_events() {
        let store = Arc::new(MemoryEventStore::new());
        let publisher = Publisher::new(store.clone());

        let sender = FacilityId::new();
        let pushed = Event::new(sender, EventCategory::StockCard, vec![1]).with_receiver(FacilityId::new());
        let other = Event::new(sender, EventCategory::StockCard, vec![2]);
        store.append(pushed.clone()).unwrap();
        store.append(other.clone()).unwrap();

        publisher.confirm_pushed(&[pushed.id], 1_700).unwrap();
        publisher.confirm_delivered(&[pushed.id, EventId::new()]).unwrap();

        let pushed = store.get(&pushed.id).unwrap().unwrap();
        assert!(pushed.online_web_synced && pushed.receiver_synced);
        assert_eq!(pushed.synced_time, Some(1_700));
        assert!(!store.get(&other.id).unwrap().unwrap().online_web_synced);
    }
}
