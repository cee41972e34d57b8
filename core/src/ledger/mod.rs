//! Stock ledger model
//!
//! Types for the movements that make up a product's stock card, the raw
//! requests offline agents submit, and the `LedgerHistory` / `EventApplier`
//! seams the gate and the replay engine talk to.

pub mod memory;

use crate::event::{Event, EventTime};
use crate::types::FacilityId;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use memory::MemoryLedger;

/// Kind of ledger-affecting operation
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    PhysicalInventory,
    Receive,
    Issue,
    Adjustment,
    UnpackKit,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::PhysicalInventory => "PHYSICAL_INVENTORY",
            MovementType::Receive => "RECEIVE",
            MovementType::Issue => "ISSUE",
            MovementType::Adjustment => "ADJUSTMENT",
            MovementType::UnpackKit => "UNPACK_KIT",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of "the same logical movement" across request and history
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ProductMovementKey {
    pub product_code: String,
    pub event_time: EventTime,
    pub movement_type: MovementType,
}

/// Per-lot movement detail
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MovementDetail {
    /// Signed quantity
    pub adjustment: i64,
    pub movement_type: MovementType,
    pub reason: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LotMovement {
    pub lot_code: String,
    /// Lot stock on hand after the movement
    pub stock_quantity: i64,
    pub detail: MovementDetail,
}

/// One persisted ledger operation on a product
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProductMovement {
    pub product_code: String,
    pub event_time: EventTime,
    pub movement_type: MovementType,
    /// Reason, source or destination name as entered
    pub reason: Option<String>,
    /// Signed quantity
    pub requested_quantity: i64,
    /// Product stock on hand after the movement
    pub stock_quantity: i64,
    #[serde(default)]
    pub lot_movements: Vec<LotMovement>,
}

impl ProductMovement {
    pub fn key(&self) -> ProductMovementKey {
        ProductMovementKey {
            product_code: self.product_code.clone(),
            event_time: self.event_time,
            movement_type: self.movement_type,
        }
    }

    /// The movement a request would record once admitted
    pub fn from_request(request: &StockCardCreateRequest) -> Self {
        let lot_movements = request
            .lot_events
            .iter()
            .map(|lot| LotMovement {
                lot_code: lot.lot_code.clone(),
                stock_quantity: lot.stock_on_hand.unwrap_or(0),
                detail: MovementDetail {
                    adjustment: lot.quantity.unwrap_or(0),
                    movement_type: request.movement_type,
                    reason: lot.reason_name.clone().or_else(|| request.reason_name.clone()),
                },
            })
            .collect();

        Self {
            product_code: request.product_code.clone(),
            event_time: request.event_time(),
            movement_type: request.movement_type,
            reason: request.reason_name.clone(),
            requested_quantity: request.quantity,
            stock_quantity: request.stock_on_hand,
            lot_movements,
        }
    }
}

/// Raw per-lot entry of a stock card request
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StockCardLotEventRequest {
    pub lot_code: String,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub stock_on_hand: Option<i64>,
    #[serde(default)]
    pub reason_name: Option<String>,
}

/// Raw, unvalidated stock card movement from an offline agent
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StockCardCreateRequest {
    pub product_code: String,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    #[serde(default)]
    pub reason_name: Option<String>,
    /// Signed quantity
    pub quantity: i64,
    pub stock_on_hand: i64,
    pub occurred_date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub document_number: Option<String>,
    #[serde(default)]
    pub lot_events: Vec<StockCardLotEventRequest>,
}

impl StockCardCreateRequest {
    pub fn event_time(&self) -> EventTime {
        EventTime::new(self.occurred_date, self.recorded_at)
    }

    pub fn key(&self) -> ProductMovementKey {
        ProductMovementKey {
            product_code: self.product_code.clone(),
            event_time: self.event_time(),
            movement_type: self.movement_type,
        }
    }

    /// Stock on hand before this movement, `None` if it does not fit an i64
    pub fn init_inventory(&self) -> Option<i64> {
        self.stock_on_hand.checked_sub(self.quantity)
    }
}

/// Read access to the persisted ledger
pub trait LedgerHistory: Send + Sync {
    /// Movements of `product_code` at `facility`, in event-time order
    fn movements(&self, facility: &FacilityId, product_code: &str) -> Vec<ProductMovement>;
}

/// Downstream ledger mutation invoked by the replay engine
///
/// Implementations must be idempotent per event id and must commit
/// independently of whatever transaction produced the event.
#[async_trait]
pub trait EventApplier: Send + Sync {
    async fn apply(&self, event: &Event) -> Result<()>;
}
