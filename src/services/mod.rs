//! Workflow services. Each owns a shared connection pool and the event
//! sender; handlers stay thin and delegate here.

pub mod assessments;
pub mod capacity;
pub mod catalog;
pub mod enrollments;
pub mod payments;
pub mod scope;

use crate::errors::ServiceError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::UpdateResult;
use serde::Serialize;

pub use assessments::AssessmentService;
pub use catalog::CatalogService;
pub use enrollments::EnrollmentService;
pub use payments::PaymentService;

/// Largest value a `NUMERIC(12, 2)` money column holds
pub const MAX_MONEY: Decimal = dec!(9999999999.99);

/// Checks a money input against the column shape: at most two decimal
/// places, never negative, and no larger than [`MAX_MONEY`].
pub fn check_money(field: &str, value: Decimal) -> Result<Decimal, ServiceError> {
    if value.normalize().scale() > 2 {
        return Err(ServiceError::ValidationError(format!(
            "{} must have at most 2 decimal places",
            field
        )));
    }
    if value < Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "{} cannot be negative",
            field
        )));
    }
    if value > MAX_MONEY {
        return Err(ServiceError::ValidationError(format!(
            "{} cannot exceed {}",
            field, MAX_MONEY
        )));
    }
    Ok(value)
}

/// A status-guarded `UPDATE` that matched nothing lost a race with another
/// transition of the same row.
pub(crate) fn ensure_transitioned(result: UpdateResult, what: &str) -> Result<(), ServiceError> {
    if result.rows_affected == 0 {
        return Err(ServiceError::InvalidStatus(format!(
            "{} changed status concurrently; retry with the current state",
            what
        )));
    }
    Ok(())
}

/// One page of a scoped listing
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let total_pages = if per_page == 0 {
            0
        } else {
            total.div_ceil(per_page)
        };
        Self {
            items,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(Page::new(vec![1, 2], 41, 1, 20).total_pages, 3);
        assert_eq!(Page::<i32>::new(vec![], 0, 1, 20).total_pages, 0);
        assert_eq!(Page::<i32>::new(vec![], 40, 2, 20).total_pages, 2);
    }

    #[test]
    fn money_fits_the_column() {
        assert_eq!(check_money("amount", dec!(0)).unwrap(), dec!(0));
        assert_eq!(check_money("amount", dec!(12.50)).unwrap(), dec!(12.50));
        assert_eq!(check_money("amount", dec!(12.5000)).unwrap(), dec!(12.5000));
        assert_eq!(check_money("amount", MAX_MONEY).unwrap(), MAX_MONEY);

        for bad in [
            dec!(0.004),
            dec!(-0.01),
            dec!(10000000000.00),
            Decimal::MAX,
            dec!(99999999999999999999.00),
        ] {
            assert!(
                matches!(check_money("amount", bad), Err(ServiceError::ValidationError(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn unmatched_guarded_update_is_invalid_status() {
        assert!(ensure_transitioned(UpdateResult { rows_affected: 1 }, "Payment").is_ok());
        assert!(matches!(
            ensure_transitioned(UpdateResult { rows_affected: 0 }, "Payment"),
            Err(ServiceError::InvalidStatus(_))
        ));
    }
}
