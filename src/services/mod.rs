pub mod checkout;
pub mod expiry;
pub mod inventory;
pub mod reconciliation;
pub mod webhook;

use crate::errors::ServiceError;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{DbErr, SqlErr};

/// Converts a major-unit decimal amount into minor currency units
/// (e.g. naira to kobo). Gateways deal exclusively in minor units.
pub(crate) fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("amount out of range: {amount}")))
}

/// True when a write lost a race on a unique column. Callers re-query the
/// winning row instead of surfacing the error.
pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
