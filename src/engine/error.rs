use ulid::Ulid;

use crate::model::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("table number {0:?} already in use")]
    DuplicateTableNumber(String),
    /// Carries the confirmed reservation already holding the table.
    #[error("table already booked by reservation {0} in that window")]
    Conflict(Ulid),
    #[error("party of {party_size} does not fit table capacity {capacity}")]
    CapacityExceeded { party_size: u32, capacity: u32 },
    #[error("reservation {0} is cancelled and cannot be modified")]
    ReservationClosed(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("WAL error: {0}")]
    WalError(String),
}
