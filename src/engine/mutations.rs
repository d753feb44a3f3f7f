use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_double_booking, check_party_fits};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Tables ───────────────────────────────────────────────

    pub async fn create_table(&self, id: Ulid, new: NewTable) -> Result<Table, EngineError> {
        let _guard = self.write_lock.lock().await;
        if self.store.table_count() >= MAX_TABLES {
            return Err(EngineError::LimitExceeded("too many tables"));
        }
        if self.store.get_table(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let table = Table::create(id, new, self.settings())?;
        if self.store.table_id_for_number(&table.table_number).is_some() {
            return Err(EngineError::DuplicateTableNumber(table.table_number));
        }

        self.persist_and_apply(Event::TableCreated { table: table.clone() }).await?;
        info!("table {} created: number {}, capacity {}", table.id, table.table_number, table.capacity);
        Ok(table)
    }

    pub async fn update_table(&self, id: Ulid, update: TableUpdate) -> Result<Table, EngineError> {
        let _guard = self.write_lock.lock().await;
        let current = self.store.get_table(&id).ok_or(EngineError::NotFound(id))?;
        let next = current.apply_update(&update, self.settings())?;

        if next.table_number != current.table_number
            && self.store.table_id_for_number(&next.table_number).is_some()
        {
            return Err(EngineError::DuplicateTableNumber(next.table_number));
        }
        if next.capacity < current.capacity {
            for r in self.store.confirmed_on_table(&id) {
                check_party_fits(&next, r.party_size)?;
            }
        }

        self.persist_and_apply(Event::TableUpdated { table: next.clone() }).await?;
        info!("table {id} updated");
        Ok(next)
    }

    /// Remove a table. Reservations that were assigned to it stay, unassigned.
    pub async fn delete_table(&self, id: Ulid) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        if self.store.get_table(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(Event::TableDeleted { id }).await?;
        info!("table {id} deleted");
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Book a new reservation. It starts out confirmed with a fresh
    /// confirmation code.
    pub async fn create_reservation(&self, id: Ulid, new: NewReservation) -> Result<Reservation, EngineError> {
        let _guard = self.write_lock.lock().await;
        if self.store.reservation_count() >= MAX_RESERVATIONS {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        if self.store.reservation_count_on(&new.date) >= MAX_RESERVATIONS_PER_DATE {
            return Err(EngineError::LimitExceeded("too many reservations on that date"));
        }
        if self.store.get_reservation(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let code = self.allocate_confirmation_code()?;
        let reservation = Reservation::create(id, new, code, self.settings())?;
        self.guard_reservation(&reservation)?;

        self.persist_and_apply(Event::ReservationCreated { reservation: reservation.clone() })
            .await?;
        info!(
            "reservation {} created: {} on {} at {}, party of {}",
            reservation.id,
            reservation.confirmation_code,
            reservation.date,
            format_time(reservation.start),
            reservation.party_size
        );
        Ok(reservation)
    }

    pub async fn update_reservation(
        &self,
        id: Ulid,
        update: ReservationUpdate,
    ) -> Result<Reservation, EngineError> {
        let _guard = self.write_lock.lock().await;
        let current = self.store.get_reservation(&id).ok_or(EngineError::NotFound(id))?;
        if current.status == ReservationStatus::Cancelled {
            return Err(EngineError::ReservationClosed(id));
        }
        let next = current.apply_update(&update, self.settings())?;
        if next.date != current.date
            && self.store.reservation_count_on(&next.date) >= MAX_RESERVATIONS_PER_DATE
        {
            return Err(EngineError::LimitExceeded("too many reservations on that date"));
        }
        self.guard_reservation(&next)?;

        self.persist_and_apply(Event::ReservationUpdated { reservation: next.clone() })
            .await?;
        info!("reservation {id} updated: status {}", next.status);
        Ok(next)
    }

    pub async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        if self.store.get_reservation(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(Event::ReservationDeleted { id }).await?;
        info!("reservation {id} deleted");
        Ok(())
    }

    /// Table existence, capacity and overlap checks for a reservation about
    /// to be written. Caller holds `write_lock`.
    fn guard_reservation(&self, reservation: &Reservation) -> Result<(), EngineError> {
        let Some(table_id) = reservation.table_id else {
            return Ok(());
        };
        let table = self.store.get_table(&table_id).ok_or(EngineError::NotFound(table_id))?;
        if !reservation.status.blocks_table() {
            return Ok(());
        }
        check_party_fits(&table, reservation.party_size)?;
        check_no_double_booking(&self.store, reservation, self.settings().default_duration()).inspect_err(
            |_| metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1),
        )
    }

    fn allocate_confirmation_code(&self) -> Result<String, EngineError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = confirmation_code(Ulid::new());
            if !self.store.code_in_use(&code) {
                return Ok(code);
            }
        }
        Err(EngineError::LimitExceeded("could not allocate a unique confirmation code"))
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL as a snapshot of the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Held so no append lands between the snapshot and the swap.
        let _guard = self.write_lock.lock().await;
        let events = self.store.snapshot_events();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// `RES-` followed by the last characters of a ULID's random part:
/// uppercase Crockford base32.
fn confirmation_code(seed: Ulid) -> String {
    let encoded = seed.to_string();
    let tail = &encoded[encoded.len() - CONFIRMATION_CODE_LEN..];
    format!("{CONFIRMATION_CODE_PREFIX}{tail}")
}
