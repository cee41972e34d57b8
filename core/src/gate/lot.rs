//! Lot breakdown checks

use super::{Diagnostics, Rejection, RejectionKind, ValidationResult};
use crate::ledger::StockCardCreateRequest;

/// Verify a request's lot entries against its product-level values
pub fn check_lots(request: &StockCardCreateRequest) -> ValidationResult {
    if request.lot_events.is_empty() {
        return ValidationResult::Accept;
    }

    // A sum past i64::MAX exceeds any product stock on hand
    let lot_stock = checked_sum(request.lot_events.iter().filter_map(|lot| lot.stock_on_hand));
    if lot_stock.map_or(true, |sum| sum > request.stock_on_hand) {
        let mut diagnostics = Diagnostics::new()
            .for_request(request)
            .with("stockOnHand", request.stock_on_hand);
        diagnostics = match lot_stock {
            Some(sum) => diagnostics.with("lotStockOnHand", sum),
            None => diagnostics.with("overflow", true),
        };
        return ValidationResult::Reject(Rejection::new(RejectionKind::LotStockExceeded, diagnostics));
    }

    let quantities: Option<Vec<i64>> = request.lot_events.iter().map(|lot| lot.quantity).collect();
    if let Some(quantities) = quantities {
        let lot_quantity = checked_sum(quantities.into_iter());
        if lot_quantity != Some(request.quantity) {
            let mut diagnostics = Diagnostics::new()
                .for_request(request)
                .with("quantity", request.quantity);
            diagnostics = match lot_quantity {
                Some(sum) => diagnostics.with("lotQuantity", sum),
                None => diagnostics.with("overflow", true),
            };
            return ValidationResult::Reject(Rejection::new(RejectionKind::LotQuantityMismatch, diagnostics));
        }
    }

    ValidationResult::Accept
}

fn checked_sum(mut values: impl Iterator<Item = i64>) -> Option<i64> {
    values.try_fold(0i64, |sum, v| sum.checked_add(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::test_support::{lot, request};

    #[test]
    fn test_lot_stock_may_not_exceed_product() {
        let mut req = request("P", 1, 30, 30);
        req.lot_events = vec![lot("L1", Some(20), Some(20)), lot("L2", Some(10), Some(15))];

        let result = check_lots(&req);
        let rejection = result.rejection().unwrap();
        assert_eq!(rejection.kind, RejectionKind::LotStockExceeded);
        assert_eq!(rejection.diagnostics.get_i64("lotStockOnHand"), Some(35));
    }

    #[test]
    fn test_lot_quantities_must_sum_to_product() {
        let mut req = request("P", 1, 30, 30);
        req.lot_events = vec![lot("L1", Some(20), Some(20)), lot("L2", Some(5), Some(10))];

        let result = check_lots(&req);
        assert_eq!(result.rejection().unwrap().kind, RejectionKind::LotQuantityMismatch);
    }

    #[test]
    fn test_lot_sums_past_i64_range_rejected() {
        let mut req = request("P", 1, i64::MAX, i64::MAX);
        req.lot_events = vec![lot("L1", Some(1), Some(i64::MAX)), lot("L2", Some(1), Some(1))];
        let result = check_lots(&req);
        let rejection = result.rejection().unwrap();
        assert_eq!(rejection.kind, RejectionKind::LotStockExceeded);
        assert!(rejection.diagnostics.flag("overflow"));

        req.lot_events = vec![lot("L1", Some(i64::MAX), Some(1)), lot("L2", Some(1), Some(1))];
        let result = check_lots(&req);
        assert_eq!(result.rejection().unwrap().kind, RejectionKind::LotQuantityMismatch);
    }

    #[test]
    fn test_partial_lot_quantities_skip_sum_check() {
        let mut req = request("P", 1, 30, 30);
        req.lot_events = vec![lot("L1", Some(20), Some(20)), lot("L2", None, Some(10))];

        assert!(check_lots(&req).is_accepted());
    }
}
