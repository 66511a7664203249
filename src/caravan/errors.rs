use sled::transaction::TransactionError;
use thiserror::Error;

use super::types::CaravanStatus;

/// Errors that can arise while operating on caravans and their backing store.
#[derive(Debug, Error)]
pub enum CaravanError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Malformed request (zero quantity, same origin and destination, unknown catalog key...)
    #[error("validation error: {0}")]
    Validation(String),

    /// Returned when fetching a record that is not present (or not owned by the caller).
    #[error("record not found: {0}")]
    NotFound(String),

    /// Loading would push the caravan past its capacity.
    #[error("capacity exceeded: {loaded} loaded + {requested} requested > {capacity}")]
    CapacityExceeded {
        capacity: u32,
        loaded: u32,
        requested: u32,
    },

    /// Owner cannot cover a debit.
    #[error("insufficient funds: need {needed}g, have {available}g")]
    InsufficientFunds { needed: i64, available: i64 },

    /// Owner does not hold enough of an item.
    #[error("insufficient inventory of {item_id}: need {requested}, have {available}")]
    InsufficientInventory {
        item_id: String,
        requested: u32,
        available: u32,
    },

    /// Caravan does not carry enough of an item.
    #[error("insufficient cargo of {item_id}: need {requested}, carrying {available}")]
    InsufficientCargo {
        item_id: String,
        requested: u32,
        available: u32,
    },

    /// The action is not allowed from the caravan's current state.
    #[error("cannot {action} caravan {caravan_id} while {status}: {reason}")]
    InvalidStateTransition {
        caravan_id: String,
        status: CaravanStatus,
        action: &'static str,
        reason: String,
    },

    /// Lost an optimistic race. Re-fetch and reassess; do not replay the same mutation.
    #[error("concurrent modification of caravan {0}")]
    ConcurrencyConflict(String),

    /// Internal error (task join errors, unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

impl CaravanError {
    pub(crate) fn invalid_state(
        caravan_id: &str,
        status: CaravanStatus,
        action: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        CaravanError::InvalidStateTransition {
            caravan_id: caravan_id.to_string(),
            status,
            action,
            reason: reason.into(),
        }
    }

    /// True when the error is a lost optimistic race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CaravanError::ConcurrencyConflict(_))
    }
}

impl From<TransactionError<CaravanError>> for CaravanError {
    fn from(err: TransactionError<CaravanError>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(e) => CaravanError::Sled(e),
        }
    }
}
