use chrono::Duration;

use crate::model::*;

use super::availability::ReservationLedger;
use super::EngineError;

/// A confirmed reservation with a table must not overlap any other confirmed
/// reservation on that table and date. The candidate's own id is skipped so
/// an edit never conflicts with its previous version.
pub(crate) fn check_no_double_booking(
    ledger: &impl ReservationLedger,
    candidate: &Reservation,
    default_duration: Duration,
) -> Result<(), EngineError> {
    if !candidate.status.blocks_table() {
        return Ok(());
    }
    let Some(table_id) = candidate.table_id else {
        return Ok(());
    };
    let span = candidate.span(default_duration);
    for window in ledger.list_confirmed_reservations(candidate.date)? {
        if window.reservation_id != candidate.id
            && window.table_id == Some(table_id)
            && window.span.overlaps(&span)
        {
            return Err(EngineError::Conflict(window.reservation_id));
        }
    }
    Ok(())
}

pub(crate) fn check_party_fits(table: &Table, party_size: u32) -> Result<(), EngineError> {
    if party_size > table.capacity {
        return Err(EngineError::CapacityExceeded {
            party_size,
            capacity: table.capacity,
        });
    }
    Ok(())
}
