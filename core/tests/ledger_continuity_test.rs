//! Ledger continuity and on-disk persistence
//!
//! Movements admitted by the gate and replayed into the ledger must keep
//! `stockOnHand[i] == stockOnHand[i-1] + quantity[i]`, and an on-disk node
//! must pick up exactly where it stopped after a restart.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use fieldsync_core::gate::{ConsistencyGate, FacilityReasons, ReasonCatalog, ValidationContext};
use fieldsync_core::ledger::{LedgerHistory, MemoryLedger, MovementType, StockCardCreateRequest};
use fieldsync_core::{Error, FacilityId, Node, NodeConfig, NodeRole};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

fn catalog(facility: FacilityId) -> ReasonCatalog {
    let mut catalog = ReasonCatalog::new();
    catalog.insert(
        facility,
        FacilityReasons::default()
            .with_source("District Store", "src-district")
            .with_destination("Ward", "dst-ward")
            .with_reason("Damaged", "rsn-damaged"),
    );
    catalog
}

fn movement(index: usize, quantity: i64, stock_on_hand: i64) -> StockCardCreateRequest {
    let (movement_type, reason) = if quantity >= 0 {
        (MovementType::Receive, "District Store")
    } else if index % 2 == 0 {
        (MovementType::Issue, "Ward")
    } else {
        (MovementType::Adjustment, "Damaged")
    };
    let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + ChronoDuration::days(index as i64);
    StockCardCreateRequest {
        product_code: "P".to_string(),
        movement_type,
        reason_name: Some(reason.to_string()),
        quantity,
        stock_on_hand,
        occurred_date: day,
        recorded_at: Utc.from_utc_datetime(&day.and_hms_opt(10, 0, 0).unwrap()),
        document_number: None,
        lot_events: vec![],
    }
}

/// Split quantities into a chain of requests starting from zero stock
fn chain(quantities: &[i64]) -> Vec<StockCardCreateRequest> {
    let mut running = 0;
    quantities
        .iter()
        .enumerate()
        .map(|(i, q)| {
            running += q;
            movement(i, *q, running)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_admitted_batches_keep_running_sum(
        quantities in prop::collection::vec(-30i64..60, 1..25),
        split in 1usize..5,
    ) {
        let facility = FacilityId::new();
        let catalog = catalog(facility);
        let ledger = Arc::new(MemoryLedger::new());
        let node = Node::in_memory(NodeConfig::new(NodeRole::LocalMachine, facility), ledger.clone()).unwrap();
        let requests = chain(&quantities);

        // Submit in several batches, replaying between them
        for batch in requests.chunks(split) {
            node.producer()
                .record_stock_cards(ledger.as_ref(), &catalog, batch, None)
                .unwrap();
            tokio_test::block_on(node.replay_engine().replay_pending()).unwrap();
        }

        let movements = ledger.movements(&facility, "P");
        prop_assert_eq!(movements.len(), quantities.len());
        let mut expected = 0;
        for (movement, quantity) in movements.iter().zip(&quantities) {
            expected += quantity;
            prop_assert_eq!(movement.stock_quantity, expected);
        }

        // Resubmitting everything is an accepted no-op match
        let ctx = ValidationContext::new(facility, ledger.as_ref(), &catalog);
        prop_assert!(ConsistencyGate::validate(&ctx, &requests).unwrap().is_accepted());
    }
}

#[tokio::test]
async fn test_batches_recorded_between_sweeps_chain_on_each_other() -> Result<()> {
    let facility = FacilityId::new();
    let catalog = catalog(facility);
    let ledger = Arc::new(MemoryLedger::new());
    let node = Node::in_memory(NodeConfig::new(NodeRole::LocalMachine, facility), ledger.clone())?;

    // No sweep between the batches: the second one continues the first
    let requests = chain(&[50, 10, -15]);
    for request in &requests {
        node.producer()
            .record_stock_cards(ledger.as_ref(), &catalog, std::slice::from_ref(request), None)?;
    }
    assert!(ledger.movements(&facility, "P").is_empty());

    let report = node.replay_engine().replay_pending().await?;
    assert_eq!(report.applied.len(), 3);
    assert_eq!(ledger.stock_on_hand(&facility, "P"), Some(45));
    Ok(())
}

#[tokio::test]
async fn test_resubmitted_batch_keeps_one_movement_per_key() -> Result<()> {
    let facility = FacilityId::new();
    let catalog = catalog(facility);
    let ledger = Arc::new(MemoryLedger::new());
    let node = Node::in_memory(NodeConfig::new(NodeRole::LocalMachine, facility), ledger.clone())?;
    let batch = chain(&[50]);

    node.producer().record_stock_cards(ledger.as_ref(), &catalog, &batch, None)?;
    node.replay_engine().replay_pending().await?;
    let again = node.producer().record_stock_cards(ledger.as_ref(), &catalog, &batch, None)?;
    node.replay_engine().replay_pending().await?;

    assert!(ledger.is_applied(&again.id));
    assert_eq!(ledger.movements(&facility, "P").len(), 1);
    assert_eq!(ledger.stock_on_hand(&facility, "P"), Some(50));
    Ok(())
}

#[test]
fn test_broken_chain_never_reaches_the_log() -> Result<()> {
    let facility = FacilityId::new();
    let catalog = catalog(facility);
    let ledger = Arc::new(MemoryLedger::new());
    let node = Node::in_memory(NodeConfig::new(NodeRole::LocalMachine, facility), ledger.clone())?;

    let mut requests = chain(&[20, -5, 10]);
    requests[2].stock_on_hand += 1;

    let result = node.producer().record_stock_cards(ledger.as_ref(), &catalog, &requests, None);
    match result {
        Err(Error::Rejected(rejection)) => {
            assert!(rejection.diagnostics.flag("failedByGap"));
            assert_eq!(rejection.diagnostics.get_i64("expectedStockOnHand"), Some(25));
        }
        other => panic!("expected gap rejection, got {:?}", other),
    }
    assert!(node.store().find_unpushed(&facility)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_on_disk_node_survives_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let facility = FacilityId::new();
    let catalog = catalog(facility);
    let mut config = NodeConfig::new(NodeRole::LocalMachine, facility);
    config.storage_path = dir.path().to_path_buf();

    let (first_id, last_sequence) = {
        let ledger = Arc::new(MemoryLedger::new());
        let node = Node::open(config.clone(), ledger.clone())?;
        let event = node
            .producer()
            .record_stock_cards(ledger.as_ref(), &catalog, &chain(&[40]), None)?;
        (event.id, node.store().last_sequence())
    };

    // Reopen: the event is still pending replay and sequences keep growing
    let ledger = Arc::new(MemoryLedger::new());
    let node = Node::open(config, ledger.clone())?;
    let pending: Vec<_> = node.store().find_not_replayed_events()?.into_iter().map(|e| e.id).collect();
    assert_eq!(pending, vec![first_id]);

    let report = node.replay_engine().replay_pending().await?;
    assert_eq!(report.applied, vec![first_id]);
    assert_eq!(ledger.stock_on_hand(&facility, "P"), Some(40));

    let next = node
        .producer()
        .record(fieldsync_core::EventCategory::Requisition, b"{}".to_vec(), None, None)?;
    assert!(next.local_sequence_number > last_sequence);
    Ok(())
}
