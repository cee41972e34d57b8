//! Product-level history checks
//!
//! Places a product's batch against its persisted stock card: a brand new
//! product must start from zero, a batch after the tail must continue from the
//! tail balance, and a batch overlapping history must repeat it exactly.

use super::gap::overflow;
use super::{Diagnostics, Rejection, RejectionKind, ValidationContext, ValidationResult};
use crate::ledger::{LotMovement, ProductMovement, StockCardCreateRequest};
use crate::Result;
use serde_json::Value;

/// Check one product's requests (sorted by event time) against its history
pub fn check_history(
    ctx: &ValidationContext<'_>,
    product_code: &str,
    requests: &[&StockCardCreateRequest],
) -> Result<ValidationResult> {
    let Some(first) = requests.first() else {
        return Ok(ValidationResult::Accept);
    };

    let history = ctx.history.movements(&ctx.facility_id, product_code);
    for pair in history.windows(2) {
        pair[0].event_time.ensure_not_after(&pair[1].event_time)?;
    }

    let Some(init_inventory) = first.init_inventory() else {
        return Ok(overflow(first));
    };
    let Some(tail) = history.last() else {
        if init_inventory == 0 {
            return Ok(ValidationResult::Accept);
        }
        return Ok(reject(
            RejectionKind::New,
            Diagnostics::new()
                .for_request(first)
                .with("initInventory", init_inventory),
        ));
    };

    let first_key = first.key();
    let Some(start) = history.iter().position(|m| m.key() == first_key) else {
        if first.event_time() <= tail.event_time {
            return Ok(reject(
                RejectionKind::NotFound,
                Diagnostics::new()
                    .for_request(first)
                    .with("movementType", first.movement_type.as_str()),
            ));
        }
        if init_inventory != tail.stock_quantity {
            return Ok(reject(
                RejectionKind::Continuity,
                Diagnostics::new()
                    .for_request(first)
                    .with("initInventory", init_inventory)
                    .with("previousInventory", tail.stock_quantity),
            ));
        }
        return Ok(ValidationResult::Accept);
    };

    let overlap = &history[start..];
    for (existing, request) in overlap.iter().zip(requests.iter()) {
        if existing.key() != request.key() {
            return Ok(reject(
                RejectionKind::NotFound,
                Diagnostics::new()
                    .for_request(request)
                    .with("movementType", request.movement_type.as_str()),
            ));
        }
        if let Some(rejection) = compare_movement(existing, request) {
            return Ok(ValidationResult::Reject(rejection));
        }
    }

    // Requests beyond the matched overlap extend history; the gap check
    // covers their arithmetic, here only their position matters.
    if let Some(next) = requests.get(overlap.len()) {
        if next.event_time() <= tail.event_time {
            return Ok(reject(
                RejectionKind::NotFound,
                Diagnostics::new()
                    .for_request(next)
                    .with("movementType", next.movement_type.as_str()),
            ));
        }
    }

    Ok(ValidationResult::Accept)
}

fn reject(kind: RejectionKind, diagnostics: Diagnostics) -> ValidationResult {
    ValidationResult::Reject(Rejection::new(kind, diagnostics))
}

fn field_mismatch(
    kind: RejectionKind,
    request: &StockCardCreateRequest,
    field: &str,
    request_value: impl Into<Value>,
    existing_value: impl Into<Value>,
) -> Rejection {
    Rejection::new(
        kind,
        Diagnostics::new()
            .for_request(request)
            .with("field", field)
            .with("requestValue", request_value)
            .with("existingValue", existing_value),
    )
}

/// Compare a matched history movement with the movement a request would record
fn compare_movement(existing: &ProductMovement, request: &StockCardCreateRequest) -> Option<Rejection> {
    let incoming = ProductMovement::from_request(request);
    let kind = RejectionKind::SameProduct;

    if incoming.requested_quantity != existing.requested_quantity {
        return Some(field_mismatch(
            kind,
            request,
            "quantity",
            incoming.requested_quantity,
            existing.requested_quantity,
        ));
    }
    if incoming.stock_quantity != existing.stock_quantity {
        return Some(field_mismatch(
            kind,
            request,
            "stockOnHand",
            incoming.stock_quantity,
            existing.stock_quantity,
        ));
    }
    if incoming.movement_type != existing.movement_type {
        return Some(field_mismatch(
            kind,
            request,
            "type",
            incoming.movement_type.as_str(),
            existing.movement_type.as_str(),
        ));
    }
    if incoming.reason != existing.reason {
        return Some(field_mismatch(
            kind,
            request,
            "reasonName",
            incoming.reason.clone(),
            existing.reason.clone(),
        ));
    }
    if incoming.lot_movements.len() != existing.lot_movements.len() {
        return Some(field_mismatch(
            RejectionKind::SameLot,
            request,
            "lotEvents",
            incoming.lot_movements.len(),
            existing.lot_movements.len(),
        ));
    }

    let mut incoming_lots: Vec<&LotMovement> = incoming.lot_movements.iter().collect();
    let mut existing_lots: Vec<&LotMovement> = existing.lot_movements.iter().collect();
    incoming_lots.sort_by(|a, b| a.lot_code.cmp(&b.lot_code));
    existing_lots.sort_by(|a, b| a.lot_code.cmp(&b.lot_code));

    incoming_lots
        .into_iter()
        .zip(existing_lots)
        .find_map(|(incoming, existing)| compare_lot(request, incoming, existing))
}

fn compare_lot(request: &StockCardCreateRequest, incoming: &LotMovement, existing: &LotMovement) -> Option<Rejection> {
    let mismatch = |field: &str, request_value: Value, existing_value: Value| {
        let rejection = field_mismatch(RejectionKind::SameLot, request, field, request_value, existing_value);
        Rejection {
            diagnostics: rejection.diagnostics.with("lotCode", incoming.lot_code.as_str()),
            ..rejection
        }
    };

    if incoming.lot_code != existing.lot_code {
        return Some(mismatch(
            "lotCode",
            incoming.lot_code.clone().into(),
            existing.lot_code.clone().into(),
        ));
    }
    if incoming.stock_quantity != existing.stock_quantity {
        return Some(mismatch(
            "stockOnHand",
            incoming.stock_quantity.into(),
            existing.stock_quantity.into(),
        ));
    }
    if incoming.detail.adjustment != existing.detail.adjustment {
        return Some(mismatch(
            "quantity",
            incoming.detail.adjustment.into(),
            existing.detail.adjustment.into(),
        ));
    }
    if incoming.detail.movement_type != existing.detail.movement_type {
        return Some(mismatch(
            "type",
            incoming.detail.movement_type.as_str().into(),
            existing.detail.movement_type.as_str().into(),
        ));
    }
    if incoming.detail.reason != existing.detail.reason {
        return Some(mismatch(
            "reasonName",
            incoming.detail.reason.clone().into(),
            existing.detail.reason.clone().into(),
        ));
    }
    None
}
