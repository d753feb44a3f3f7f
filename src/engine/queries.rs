use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{self, TableRegistry};
use super::{Engine, EngineError};

impl Engine {
    pub fn list_tables(&self, min_capacity: Option<u32>) -> Result<Vec<Table>, EngineError> {
        self.store.list_tables(min_capacity.unwrap_or(0))
    }

    pub fn get_table(&self, id: &Ulid) -> Option<Table> {
        self.store.get_table(id)
    }

    /// Tables matching every set field of `filter`, in registry order.
    pub fn find_tables(&self, filter: &TableFilter) -> Result<Vec<Table>, EngineError> {
        if let Some(id) = filter.id {
            return Ok(self.get_table(&id).into_iter().filter(|t| filter.matches(t)).collect());
        }
        let mut tables = self.list_tables(filter.min_capacity)?;
        tables.retain(|t| filter.matches(t));
        Ok(tables)
    }

    pub fn list_reservations(&self, date: Option<NaiveDate>) -> Vec<Reservation> {
        self.store.list_reservations(date)
    }

    pub fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.store.get_reservation(id)
    }

    pub fn find_by_confirmation_code(&self, code: &str) -> Option<Reservation> {
        self.store
            .reservation_id_for_code(code)
            .and_then(|id| self.store.get_reservation(&id))
    }

    /// Reservations matching every set field of `filter`, by date, start time
    /// and id. A listing for one user comes newest first.
    pub fn find_reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let candidates: Vec<Reservation> = match (filter.id, &filter.confirmation_code) {
            (Some(id), _) => self.get_reservation(&id).into_iter().collect(),
            (None, Some(code)) => self.find_by_confirmation_code(code).into_iter().collect(),
            (None, None) => self.list_reservations(filter.date),
        };
        let mut found: Vec<Reservation> = candidates.into_iter().filter(|r| filter.matches(r)).collect();
        if filter.user_id.is_some() {
            found.reverse();
        }
        found
    }

    /// Tables free for the whole query window and large enough for the party.
    pub fn find_available_tables(&self, query: &AvailabilityQuery) -> Result<AvailabilityResult, EngineError> {
        let result = availability::find_available_tables(
            &self.store,
            &self.store,
            query,
            self.settings().default_duration(),
        )?;
        metrics::histogram!(crate::observability::AVAILABILITY_RESULT_SIZE)
            .record(result.total_available as f64);
        tracing::debug!(
            "availability {} {} party {}: {} tables",
            query.date,
            format_time(query.start),
            query.party_size,
            result.total_available
        );
        Ok(result)
    }
}
