//! Reason, source and destination resolution
//!
//! Each movement type resolves the name an agent typed into a canonical id
//! from the facility's configuration. Names match case-insensitively after
//! trimming.

use super::{Diagnostics, Rejection, RejectionKind, ValidationContext, ValidationResult};
use crate::ledger::{MovementType, StockCardCreateRequest};
use crate::types::FacilityId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Valid names for one facility, each mapped to its canonical id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacilityReasons {
    #[serde(default)]
    pub reasons: HashMap<String, String>,
    #[serde(default)]
    pub sources: HashMap<String, String>,
    #[serde(default)]
    pub destinations: HashMap<String, String>,
}

impl FacilityReasons {
    pub fn with_reason(mut self, name: &str, id: &str) -> Self {
        self.reasons.insert(name.to_string(), id.to_string());
        self
    }

    pub fn with_source(mut self, name: &str, id: &str) -> Self {
        self.sources.insert(name.to_string(), id.to_string());
        self
    }

    pub fn with_destination(mut self, name: &str, id: &str) -> Self {
        self.destinations.insert(name.to_string(), id.to_string());
        self
    }
}

/// Facility-scoped reason configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasonCatalog {
    facilities: HashMap<FacilityId, FacilityReasons>,
}

/// What a movement type resolves its name against
enum Lookup {
    None,
    Reason,
    Source,
    Destination,
}

fn lookup_for(movement_type: MovementType) -> Lookup {
    match movement_type {
        MovementType::Receive => Lookup::Source,
        MovementType::Issue => Lookup::Destination,
        MovementType::Adjustment => Lookup::Reason,
        MovementType::PhysicalInventory | MovementType::UnpackKit => Lookup::None,
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ReasonCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, facility: FacilityId, reasons: FacilityReasons) {
        self.facilities.insert(facility, reasons);
    }

    /// Resolve a name for a movement type
    ///
    /// `Ok(None)` means the type needs no resolution; `Err(kind)` names the
    /// failed lookup.
    pub fn resolve(
        &self,
        facility: &FacilityId,
        movement_type: MovementType,
        name: Option<&str>,
    ) -> Result<Option<&str>, RejectionKind> {
        let (kind, table) = match lookup_for(movement_type) {
            Lookup::None => return Ok(None),
            Lookup::Reason => (RejectionKind::NoSuchReason, self.facilities.get(facility).map(|f| &f.reasons)),
            Lookup::Source => (RejectionKind::NoSuchSource, self.facilities.get(facility).map(|f| &f.sources)),
            Lookup::Destination => (
                RejectionKind::NoSuchDestination,
                self.facilities.get(facility).map(|f| &f.destinations),
            ),
        };

        let (Some(table), Some(name)) = (table, name) else {
            return Err(kind);
        };
        let needle = normalize(name);
        table
            .iter()
            .find(|(candidate, _)| normalize(candidate) == needle)
            .map(|(_, id)| Some(id.as_str()))
            .ok_or(kind)
    }
}

/// Resolve every product and lot name in the batch
pub fn check_reasons(ctx: &ValidationContext<'_>, requests: &[StockCardCreateRequest]) -> ValidationResult {
    for request in requests {
        let names = std::iter::once(request.reason_name.as_deref()).chain(
            request
                .lot_events
                .iter()
                .filter(|lot| lot.reason_name.is_some())
                .map(|lot| lot.reason_name.as_deref()),
        );

        for name in names {
            if let Err(kind) = ctx.catalog.resolve(&ctx.facility_id, request.movement_type, name) {
                return ValidationResult::Reject(Rejection::new(
                    kind,
                    Diagnostics::new()
                        .for_request(request)
                        .with("reasonName", name)
                        .with("movementType", request.movement_type.as_str()),
                ));
            }
        }
    }
    ValidationResult::Accept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::test_support::{lot, request};
    use crate::ledger::MemoryLedger;

    fn catalog(facility: FacilityId) -> ReasonCatalog {
        let mut catalog = ReasonCatalog::new();
        catalog.insert(
            facility,
            FacilityReasons::default()
                .with_reason("Damaged", "r-damaged")
                .with_source("District Store", "s-district")
                .with_destination("Maternity", "d-maternity"),
        );
        catalog
    }

    #[test]
    fn test_resolution_dispatches_on_movement_type() {
        let facility = FacilityId::new();
        let catalog = catalog(facility);

        assert_eq!(
            catalog.resolve(&facility, MovementType::Receive, Some("  district store ")),
            Ok(Some("s-district"))
        );
        assert_eq!(
            catalog.resolve(&facility, MovementType::Issue, Some("Maternity")),
            Ok(Some("d-maternity"))
        );
        assert_eq!(
            catalog.resolve(&facility, MovementType::Adjustment, Some("DAMAGED")),
            Ok(Some("r-damaged"))
        );
        // A source name is not a valid destination
        assert_eq!(
            catalog.resolve(&facility, MovementType::Issue, Some("District Store")),
            Err(RejectionKind::NoSuchDestination)
        );
        assert_eq!(catalog.resolve(&facility, MovementType::PhysicalInventory, None), Ok(None));
        assert_eq!(
            catalog.resolve(&facility, MovementType::Adjustment, None),
            Err(RejectionKind::NoSuchReason)
        );
    }

    #[test]
    fn test_catalog_is_facility_scoped() {
        let facility = FacilityId::new();
        let catalog = catalog(facility);

        assert_eq!(
            catalog.resolve(&FacilityId::new(), MovementType::Receive, Some("District Store")),
            Err(RejectionKind::NoSuchSource)
        );
    }

    #[test]
    fn test_lot_reason_checked() {
        let facility = FacilityId::new();
        let catalog = catalog(facility);
        let ledger = MemoryLedger::new();
        let ctx = ValidationContext::new(facility, &ledger, &catalog);

        let mut req = request("P", 1, -5, 20);
        req.lot_events = vec![lot("L1", Some(-5), Some(20))];
        req.lot_events[0].reason_name = Some("Lost".to_string());

        let result = check_reasons(&ctx, &[req]);
        let rejection = result.rejection().unwrap();
        assert_eq!(rejection.kind, RejectionKind::NoSuchDestination);
        assert!(rejection.diagnostics.flag("noSuchDestination"));
        assert_eq!(
            rejection.diagnostics.get("reasonName").and_then(|v| v.as_str()),
            Some("Lost")
        );
    }

    #[test]
    fn test_catalog_loads_from_json() {
        let facility = FacilityId::new();
        let json = format!(r#"{{"{}": {{"sources": {{"District Store": "s-1"}}}}}}"#, facility);
        let catalog: ReasonCatalog = serde_json::from_str(&json).unwrap();

        assert_eq!(
            catalog.resolve(&facility, MovementType::Receive, Some("district store")),
            Ok(Some("s-1"))
        );
    }
}
