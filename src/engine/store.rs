use chrono::{Duration, NaiveDate};
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::availability::{table_order, ReservationLedger, TableRegistry};
use super::EngineError;

/// Committed state plus the secondary indexes the queries need.
///
/// Only `apply_event` mutates it, so replay and live writes go through the
/// same code. Callers serialize writes; reads need no lock.
pub struct InMemoryStore {
    tables: DashMap<Ulid, Table>,
    table_numbers: DashMap<String, Ulid>,
    reservations: DashMap<Ulid, Reservation>,
    by_date: DashMap<NaiveDate, Vec<Ulid>>,
    by_table: DashMap<Ulid, Vec<Ulid>>,
    codes: DashMap<String, Ulid>,
    default_duration: Duration,
}

impl InMemoryStore {
    pub fn new(default_duration: Duration) -> Self {
        Self {
            tables: DashMap::new(),
            table_numbers: DashMap::new(),
            reservations: DashMap::new(),
            by_date: DashMap::new(),
            by_table: DashMap::new(),
            codes: DashMap::new(),
            default_duration,
        }
    }

    // ── Tables ───────────────────────────────────────────────

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn get_table(&self, id: &Ulid) -> Option<Table> {
        self.tables.get(id).map(|e| e.value().clone())
    }

    pub fn table_id_for_number(&self, number: &str) -> Option<Ulid> {
        self.table_numbers.get(number).map(|e| *e.value())
    }

    // ── Reservations ─────────────────────────────────────────

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    pub fn reservation_count_on(&self, date: &NaiveDate) -> usize {
        self.by_date.get(date).map_or(0, |ids| ids.len())
    }

    pub fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn reservation_id_for_code(&self, code: &str) -> Option<Ulid> {
        self.codes.get(code).map(|e| *e.value())
    }

    pub fn code_in_use(&self, code: &str) -> bool {
        self.codes.contains_key(code)
    }

    /// Ordered by date, start time, then id.
    pub fn list_reservations(&self, date: Option<NaiveDate>) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = match date {
            Some(date) => self
                .ids_on(&date)
                .iter()
                .filter_map(|id| self.get_reservation(id))
                .collect(),
            None => self.reservations.iter().map(|e| e.value().clone()).collect(),
        };
        out.sort_by_key(|r| (r.date, r.start, r.id));
        out
    }

    /// Confirmed reservations currently assigned to `table_id`, any date.
    pub fn confirmed_on_table(&self, table_id: &Ulid) -> Vec<Reservation> {
        let ids = self
            .by_table
            .get(table_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.get_reservation(id))
            .filter(|r| r.status.blocks_table())
            .collect()
    }

    fn ids_on(&self, date: &NaiveDate) -> Vec<Ulid> {
        self.by_date.get(date).map(|e| e.value().clone()).unwrap_or_default()
    }

    // ── Index maintenance ────────────────────────────────────

    fn index_reservation(&self, r: &Reservation) {
        self.by_date.entry(r.date).or_default().push(r.id);
        if let Some(table_id) = r.table_id {
            self.by_table.entry(table_id).or_default().push(r.id);
        }
        self.codes.insert(r.confirmation_code.clone(), r.id);
    }

    fn unindex_reservation(&self, r: &Reservation) {
        remove_from(&self.by_date, &r.date, &r.id);
        if let Some(table_id) = r.table_id {
            remove_from(&self.by_table, &table_id, &r.id);
        }
        self.codes.remove(&r.confirmation_code);
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::TableCreated { table } | Event::TableUpdated { table } => {
                if let Some(old) = self.tables.insert(table.id, table.clone())
                    && old.table_number != table.table_number
                {
                    self.table_numbers.remove(&old.table_number);
                }
                self.table_numbers.insert(table.table_number.clone(), table.id);
            }
            Event::TableDeleted { id } => {
                if let Some((_, table)) = self.tables.remove(id) {
                    self.table_numbers.remove(&table.table_number);
                }
                let assigned = self.by_table.remove(id).map(|(_, ids)| ids).unwrap_or_default();
                for rid in assigned {
                    if let Some(mut r) = self.reservations.get_mut(&rid) {
                        r.table_id = None;
                    }
                }
            }
            Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
                if let Some(old) = self.reservations.insert(reservation.id, reservation.clone()) {
                    self.unindex_reservation(&old);
                }
                self.index_reservation(reservation);
            }
            Event::ReservationDeleted { id } => {
                if let Some((_, old)) = self.reservations.remove(id) {
                    self.unindex_reservation(&old);
                }
            }
        }
    }

    /// Minimal event list recreating the current state: tables first so
    /// every reservation's table exists when it is replayed.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut tables: Vec<Table> = self.tables.iter().map(|e| e.value().clone()).collect();
        tables.sort_by_key(|t| t.id);
        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);

        tables
            .into_iter()
            .map(|table| Event::TableCreated { table })
            .chain(reservations.into_iter().map(|reservation| Event::ReservationCreated { reservation }))
            .collect()
    }
}

fn remove_from<K: std::hash::Hash + Eq>(index: &DashMap<K, Vec<Ulid>>, key: &K, id: &Ulid) {
    let now_empty = match index.get_mut(key) {
        Some(mut ids) => {
            ids.retain(|x| x != id);
            ids.is_empty()
        }
        None => false,
    };
    if now_empty {
        index.remove_if(key, |_, ids| ids.is_empty());
    }
}

impl TableRegistry for InMemoryStore {
    fn list_tables(&self, min_capacity: u32) -> Result<Vec<Table>, EngineError> {
        let mut tables: Vec<Table> = self
            .tables
            .iter()
            .filter(|e| e.value().capacity >= min_capacity)
            .map(|e| e.value().clone())
            .collect();
        tables.sort_by(table_order);
        Ok(tables)
    }
}

impl ReservationLedger for InMemoryStore {
    fn list_confirmed_reservations(&self, date: NaiveDate) -> Result<Vec<ReservationWindow>, EngineError> {
        Ok(self
            .ids_on(&date)
            .iter()
            .filter_map(|id| self.get_reservation(id))
            .filter(|r| r.status.blocks_table())
            .map(|r| r.window(self.default_duration))
            .collect())
    }
}
