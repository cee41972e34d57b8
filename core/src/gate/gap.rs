//! Arithmetic continuity inside a batch

use super::{Diagnostics, Rejection, RejectionKind, ValidationResult};
use crate::ledger::StockCardCreateRequest;

/// Walk one product's requests (sorted by event time) and verify that every
/// stock on hand equals the running balance plus its quantity.
///
/// Balances that leave the i64 range are rejected as a gap.
pub fn check_gap(requests: &[&StockCardCreateRequest]) -> ValidationResult {
    let Some(first) = requests.first() else {
        return ValidationResult::Accept;
    };

    let Some(init) = first.init_inventory() else {
        return overflow(first);
    };
    let mut running = init;
    for request in requests {
        let Some(expected) = running.checked_add(request.quantity) else {
            return overflow(request);
        };
        if request.stock_on_hand != expected {
            return gap(request, expected);
        }
        running = request.stock_on_hand;
    }

    let Some(last) = requests.last() else {
        return ValidationResult::Accept;
    };
    let expected = requests
        .iter()
        .try_fold(init, |balance, r| balance.checked_add(r.quantity));
    match expected {
        Some(expected) if last.stock_on_hand == expected => ValidationResult::Accept,
        Some(expected) => gap(last, expected),
        None => overflow(last),
    }
}

/// Reject a request whose arithmetic does not fit an i64
pub(super) fn overflow(request: &StockCardCreateRequest) -> ValidationResult {
    ValidationResult::Reject(Rejection::new(
        RejectionKind::Gap,
        Diagnostics::new()
            .for_request(request)
            .with("overflow", true)
            .with("quantity", request.quantity)
            .with("actualStockOnHand", request.stock_on_hand),
    ))
}

fn gap(request: &StockCardCreateRequest, expected: i64) -> ValidationResult {
    ValidationResult::Reject(Rejection::new(
        RejectionKind::Gap,
        Diagnostics::new()
            .for_request(request)
            .with("expectedStockOnHand", expected)
            .with("actualStockOnHand", request.stock_on_hand),
    ))
}
