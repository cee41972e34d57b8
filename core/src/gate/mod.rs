//! Consistency validation gate
//!
//! Decides whether a batch of stock card requests may enter the event log.
//! The checks run per product against the persisted ledger and across the
//! batch itself:
//! - `product`: history match, new-product and continuity checks
//! - `gap`: arithmetic continuity inside the batch
//! - `lot`: lot sums against the product-level values
//! - `reason`: reason/source/destination resolution per movement type
//!
//! Every rejection carries a `Diagnostics` map with enough context for the
//! caller to render a precise message. Rendering and localization happen
//! outside this crate.

pub mod gap;
pub mod lot;
pub mod product;
pub mod reason;

use crate::ledger::{LedgerHistory, StockCardCreateRequest};
use crate::types::FacilityId;
use crate::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub use reason::{FacilityReasons, ReasonCatalog};

/// Gate verdict for a batch
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Accept,
    Reject(Rejection),
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationResult::Accept)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ValidationResult::Accept => None,
            ValidationResult::Reject(rejection) => Some(rejection),
        }
    }
}

/// Why a batch was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RejectionKind {
    /// First record of an unknown product does not start from zero
    New,
    /// Movement is not in history yet lies before its tail
    NotFound,
    /// Movement after the tail does not continue from the tail balance
    Continuity,
    /// Matched product movement differs from history
    SameProduct,
    /// Matched lot movement differs from history
    SameLot,
    /// Stock on hand chain inside the batch is broken
    Gap,
    /// Lot stock on hand sum exceeds the product stock on hand
    LotStockExceeded,
    /// Lot quantity sum differs from the product quantity
    LotQuantityMismatch,
    NoSuchReason,
    NoSuchSource,
    NoSuchDestination,
}

impl RejectionKind {
    /// Name of the boolean flag set in the diagnostics map
    pub fn flag(&self) -> &'static str {
        match self {
            RejectionKind::New => "failedByNew",
            RejectionKind::NotFound => "failedByNotFound",
            RejectionKind::Continuity => "failedByContinuity",
            RejectionKind::SameProduct => "failedBySameProduct",
            RejectionKind::SameLot => "failedBySameLot",
            RejectionKind::Gap => "failedByGap",
            RejectionKind::LotStockExceeded => "failedByLotStockOnHand",
            RejectionKind::LotQuantityMismatch => "failedByLotQuantity",
            RejectionKind::NoSuchReason => "noSuchReason",
            RejectionKind::NoSuchSource => "noSuchSource",
            RejectionKind::NoSuchDestination => "noSuchDestination",
        }
    }
}

/// Named diagnostic variables for message rendering
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(BTreeMap<String, Value>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    /// Add productCode, occurredDate and recordedAt of a request
    pub fn for_request(self, request: &StockCardCreateRequest) -> Self {
        self.with("productCode", request.product_code.as_str())
            .with("occurredDate", request.occurred_date.to_string())
            .with("recordedAt", request.recorded_at.to_rfc3339())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    /// True if the named flag is present and set
    pub fn flag(&self, name: &str) -> bool {
        self.0.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// A rejected batch with its diagnostic context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub diagnostics: Diagnostics,
}

impl Rejection {
    /// Build a rejection; the kind's flag is always set in the diagnostics
    pub fn new(kind: RejectionKind, diagnostics: Diagnostics) -> Self {
        Self {
            kind,
            diagnostics: diagnostics.with(kind.flag(), true),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details = serde_json::to_string(&self.diagnostics).unwrap_or_default();
        write!(f, "{} {}", self.kind.flag(), details)
    }
}

/// Explicit context threaded through every validator
pub struct ValidationContext<'a> {
    /// Facility whose stock cards the batch writes to
    pub facility_id: FacilityId,
    pub history: &'a dyn LedgerHistory,
    pub catalog: &'a ReasonCatalog,
}

impl<'a> ValidationContext<'a> {
    pub fn new(facility_id: FacilityId, history: &'a dyn LedgerHistory, catalog: &'a ReasonCatalog) -> Self {
        Self {
            facility_id,
            history,
            catalog,
        }
    }
}

/// Entry points of the gate
pub struct ConsistencyGate;

impl ConsistencyGate {
    /// Run every check on a batch; the first rejection wins
    pub fn validate(ctx: &ValidationContext<'_>, requests: &[StockCardCreateRequest]) -> Result<ValidationResult> {
        let result = Self::validate_products(ctx, requests)?;
        if !result.is_accepted() {
            return Ok(result);
        }

        let result = Self::validate_lots(requests);
        if !result.is_accepted() {
            return Ok(result);
        }

        Ok(reason::check_reasons(ctx, requests))
    }

    /// History, continuity and gap checks, one product group at a time
    pub fn validate_products(
        ctx: &ValidationContext<'_>,
        requests: &[StockCardCreateRequest],
    ) -> Result<ValidationResult> {
        for (product_code, group) in group_by_product(requests) {
            let result = product::check_history(ctx, product_code, &group)?;
            if !result.is_accepted() {
                return Ok(result);
            }

            let result = gap::check_gap(&group);
            if !result.is_accepted() {
                return Ok(result);
            }
        }

        Ok(ValidationResult::Accept)
    }

    /// Lot-level checks across the whole batch
    pub fn validate_lots(requests: &[StockCardCreateRequest]) -> ValidationResult {
        for request in requests {
            let result = lot::check_lots(request);
            if !result.is_accepted() {
                return result;
            }
        }
        ValidationResult::Accept
    }
}

/// Group requests by product, each group sorted ascending by event time
pub fn group_by_product(requests: &[StockCardCreateRequest]) -> BTreeMap<&str, Vec<&StockCardCreateRequest>> {
    let mut groups: BTreeMap<&str, Vec<&StockCardCreateRequest>> = BTreeMap::new();
    for request in requests {
        groups.entry(request.product_code.as_str()).or_default().push(request);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|r| r.event_time());
    }
    groups
}
