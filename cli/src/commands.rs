//! Subcommand implementations

use crate::ui;
use crate::StatusFilter;
use anyhow::{anyhow, Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use colored::Colorize;
use fieldsync_core::gate::{ConsistencyGate, FacilityReasons, ReasonCatalog, ValidationContext, ValidationResult};
use fieldsync_core::ledger::{LedgerHistory, MemoryLedger, MovementType, ProductMovement, StockCardCreateRequest};
use fieldsync_core::store::{EventStore, RocksBackupStore, RocksEventStore};
use fieldsync_core::sync::{ArchivalTask, InProcessTransport, MemoryErrorRecorder, SyncService};
use fieldsync_core::{Event, FacilityId, Node, NodeConfig, NodeRole};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load the node config, or defaults when none is given
pub fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    match path {
        Some(path) => Ok(NodeConfig::load(path)?),
        None => Ok(NodeConfig::default()),
    }
}

pub fn data_dir(explicit: Option<PathBuf>, config: &NodeConfig) -> PathBuf {
    explicit.unwrap_or_else(|| config.storage_path.clone())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn validate(
    requests: &Path,
    history: Option<&Path>,
    catalog: Option<&Path>,
    facility: FacilityId,
) -> Result<()> {
    let requests: Vec<StockCardCreateRequest> = read_json(requests)?;
    let catalog: ReasonCatalog = match catalog {
        Some(path) => read_json(path)?,
        None => ReasonCatalog::new(),
    };

    let ledger = MemoryLedger::new();
    if let Some(path) = history {
        let recorded: Vec<StockCardCreateRequest> = read_json(path)?;
        for request in &recorded {
            ledger.record(facility, ProductMovement::from_request(request));
        }
    }

    let ctx = ValidationContext::new(facility, &ledger, &catalog);
    match ConsistencyGate::validate(&ctx, &requests)? {
        ValidationResult::Accept => {
            ui::print_success(&format!("{} request(s) accepted", requests.len()));
            Ok(())
        }
        ValidationResult::Reject(rejection) => {
            ui::print_error(&format!("Batch rejected: {}", rejection.kind.flag()));
            println!("{}", serde_json::to_string_pretty(&rejection.diagnostics)?);
            Err(anyhow!("batch rejected"))
        }
    }
}

/// One line of `events` output
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventRow {
    id: String,
    sequence: u64,
    sender: String,
    receiver: Option<String>,
    group: Option<String>,
    category: String,
    online_web_synced: bool,
    receiver_synced: bool,
    local_replayed: bool,
    archived: bool,
}

impl From<&Event> for EventRow {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.to_string(),
            sequence: event.local_sequence_number,
            sender: event.sender_id.to_string(),
            receiver: event.receiver_id.map(|r| r.to_string()),
            group: event
                .group_id
                .as_ref()
                .map(|g| format!("{}#{}", g, event.group_sequence_number.unwrap_or_default())),
            category: format!("{:?}", event.category),
            online_web_synced: event.online_web_synced,
            receiver_synced: event.receiver_synced,
            local_replayed: event.local_replayed,
            archived: event.archived,
        }
    }
}

fn open_store(data_dir: &Path) -> Result<RocksEventStore> {
    RocksEventStore::open(data_dir.join("events"))
        .with_context(|| format!("Failed to open event store in {}", data_dir.display()))
}

pub fn events(data_dir: &Path, status: StatusFilter, facility: FacilityId, json: bool) -> Result<()> {
    let store = open_store(data_dir)?;
    let events = match status {
        StatusFilter::Pending => {
            if facility.is_nil() {
                return Err(anyhow!("--facility (or a config file) is required for pending events"));
            }
            store.find_unpushed(&facility)?
        }
        StatusFilter::Unreplayed => store.find_not_replayed_events()?,
        StatusFilter::Archivable => store.find_archivable(usize::MAX)?,
    };

    if json {
        for event in &events {
            println!("{}", serde_json::to_string(&EventRow::from(event))?);
        }
        return Ok(());
    }

    if events.is_empty() {
        ui::print_info("No matching events");
        return Ok(());
    }
    ui::print_event_header();
    for event in &events {
        ui::print_event_row(event);
    }
    println!();
    ui::print_info(&format!(
        "{} event(s), last sequence {}",
        events.len(),
        store.last_sequence()
    ));
    Ok(())
}

pub async fn archive(data_dir: &Path, page_size: usize) -> Result<()> {
    let store = Arc::new(open_store(data_dir)?);
    let backup = Arc::new(
        RocksBackupStore::open(data_dir.join("backup"))
            .with_context(|| format!("Failed to open backup store in {}", data_dir.display()))?,
    );

    let archived = ArchivalTask::new(store, backup, page_size).run_once().await?;
    if archived == 0 {
        ui::print_warning("Nothing to archive; events still wait for confirmations");
    } else {
        ui::print_success(&format!("Archived {} event(s)", archived));
    }
    Ok(())
}

pub fn seed(data_dir: &Path, min: u64) -> Result<()> {
    let store = open_store(data_dir)?;
    let before = store.last_sequence();
    store.seed_sequence(min)?;
    let after = store.last_sequence();

    if after == before {
        ui::print_info(&format!("Sequence already at {}", before));
    } else {
        ui::print_success(&format!("Sequence raised from {} to {}", before, after));
    }
    Ok(())
}

struct SimulatedLocal {
    facility: FacilityId,
    node: Node,
    ledger: Arc<MemoryLedger>,
    sync: SyncService,
}

/// Alternate receipts and issues; issues go to the next facility
fn simulated_movement(index: usize, running: i64) -> StockCardCreateRequest {
    let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default() + ChronoDuration::days(index as i64);
    let recorded = Utc.from_utc_datetime(&day.and_hms_opt(9, 0, 0).unwrap_or_default());
    let (movement_type, reason, quantity) = if index % 2 == 0 {
        (MovementType::Receive, "District Store", 50)
    } else {
        (MovementType::Issue, "Health Post", -(running.min(20)))
    };
    StockCardCreateRequest {
        product_code: "SIM-001".to_string(),
        movement_type,
        reason_name: Some(reason.to_string()),
        quantity,
        stock_on_hand: running + quantity,
        occurred_date: day,
        recorded_at: recorded,
        document_number: None,
        lot_events: vec![],
    }
}

pub async fn simulate(facilities: usize, movements: usize) -> Result<()> {
    let facilities = facilities.max(2);

    let online_ledger = Arc::new(MemoryLedger::new());
    let online = Node::in_memory(
        NodeConfig::new(NodeRole::OnlineWeb, FacilityId::new()),
        online_ledger.clone(),
    )?;
    let endpoint = Arc::new(online.endpoint()?);

    let mut catalog = ReasonCatalog::new();
    let mut locals = Vec::with_capacity(facilities);
    for _ in 0..facilities {
        let facility = FacilityId::new();
        catalog.insert(
            facility,
            FacilityReasons::default()
                .with_source("District Store", "src-district")
                .with_destination("Health Post", "dst-health-post"),
        );
        let ledger = Arc::new(MemoryLedger::new());
        let node = Node::in_memory(NodeConfig::new(NodeRole::LocalMachine, facility), ledger.clone())?;
        let transport = Arc::new(InProcessTransport::new(endpoint.clone()));
        let sync = node.sync_service(transport, Arc::new(MemoryErrorRecorder::new()))?;
        locals.push(SimulatedLocal {
            facility,
            node,
            ledger,
            sync,
        });
    }
    ui::print_info(&format!("Online web plus {} local machine(s)", facilities));

    let mut running = 0;
    for index in 0..movements {
        let origin = &locals[0];
        let request = simulated_movement(index, running);
        let receiver = (request.movement_type == MovementType::Issue).then(|| locals[1 + index % (facilities - 1)].facility);
        let event = origin
            .node
            .producer()
            .record_stock_cards(origin.ledger.as_ref(), &catalog, std::slice::from_ref(&request), receiver)?;
        running = request.stock_on_hand;
        println!(
            "  {} {} {:>4} -> {:>4}  seq {}",
            "recorded".bright_green(),
            request.movement_type.as_str(),
            request.quantity,
            request.stock_on_hand,
            event.local_sequence_number
        );
    }

    let replayed = locals[0].node.replay_engine().replay_pending().await?;
    ui::print_info(&format!("Replayed {} event(s) locally", replayed.applied.len()));

    // Two rounds: deliver, then carry receipts and acknowledgements back
    for round in 1..=2 {
        for local in &locals {
            let report = local.sync.exchange().await?;
            println!(
                "  {} round {} {}: pushed {}, pulled {}, acknowledged {}",
                "exchange".bright_cyan(),
                round,
                short(&local.facility),
                report.push.accepted.len(),
                report.pull.import.new.len(),
                report.pull.acknowledged
            );
        }
    }
    locals[0].sync.exchange().await?;

    let mut archived = online.archival_task().run_once().await?;
    for local in &locals {
        archived += local.node.archival_task().run_once().await?;
    }

    println!();
    let origin = locals[0].facility;
    ui::print_success(&format!(
        "Online ledger stock on hand for {}: {}",
        short(&origin),
        online_ledger.stock_on_hand(&origin, "SIM-001").unwrap_or(0)
    ));
    for local in &locals[1..] {
        ui::print_info(&format!(
            "{} holds {} movement(s) addressed to it",
            short(&local.facility),
            local.ledger.movements(&origin, "SIM-001").len()
        ));
    }
    ui::print_success(&format!("Archived {} event copies across all nodes", archived));
    Ok(())
}

fn short(facility: &FacilityId) -> String {
    facility.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::EventCategory;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_validate_reports_new_product_rejection() {
        let dir = TempDir::new().unwrap();
        let requests = write(
            &dir,
            "requests.json",
            r#"[{"productCode": "P", "type": "PHYSICAL_INVENTORY", "quantity": 30,
                 "stockOnHand": 50, "occurredDate": "2024-01-01",
                 "recordedAt": "2024-01-01T08:00:00Z"}]"#,
        );

        assert!(validate(&requests, None, None, FacilityId::new()).is_err());
    }

    #[test]
    fn test_validate_accepts_continuation_of_history() {
        let dir = TempDir::new().unwrap();
        let history = write(
            &dir,
            "history.json",
            r#"[{"productCode": "P", "type": "PHYSICAL_INVENTORY", "quantity": 0,
                 "stockOnHand": 0, "occurredDate": "2024-01-01",
                 "recordedAt": "2024-01-01T08:00:00Z"}]"#,
        );
        let requests = write(
            &dir,
            "requests.json",
            r#"[{"productCode": "P", "type": "PHYSICAL_INVENTORY", "quantity": 12,
                 "stockOnHand": 12, "occurredDate": "2024-01-02",
                 "recordedAt": "2024-01-02T08:00:00Z"}]"#,
        );

        validate(&requests, Some(&history), None, FacilityId::new()).unwrap();
    }

    #[test]
    fn test_seed_and_events_on_disk() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(dir.path()).unwrap();
            store
                .append(Event::new(FacilityId::new(), EventCategory::Requisition, vec![]))
                .unwrap();
        }

        seed(dir.path(), 250).unwrap();
        assert!(open_store(dir.path()).unwrap().last_sequence() >= 250);
        events(dir.path(), StatusFilter::Unreplayed, FacilityId::default(), true).unwrap();
        assert!(events(dir.path(), StatusFilter::Pending, FacilityId::default(), false).is_err());
    }

    #[tokio::test]
    async fn test_simulation_runs() {
        simulate(3, 6).await.unwrap();
    }
}
