use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Collaborators ────────────────────────────────────────────────

/// Catalog of physical tables.
pub trait TableRegistry {
    /// Tables seating at least `min_capacity`, in [`table_order`].
    fn list_tables(&self, min_capacity: u32) -> Result<Vec<Table>, EngineError>;
}

/// Source of committed reservations.
pub trait ReservationLedger {
    /// Confirmed reservations on exactly `date`, including unassigned ones.
    /// Windows already carry the default duration where no end was booked.
    fn list_confirmed_reservations(&self, date: NaiveDate) -> Result<Vec<ReservationWindow>, EngineError>;
}

/// Capacity ascending, then table number, then id.
pub fn table_order(a: &Table, b: &Table) -> std::cmp::Ordering {
    a.capacity
        .cmp(&b.capacity)
        .then_with(|| a.table_number.cmp(&b.table_number))
        .then_with(|| a.id.cmp(&b.id))
}

// ── Availability Algorithm ───────────────────────────────────────

/// Tables holding at least one window that overlaps `query`.
/// Unassigned windows block nothing.
pub fn blocked_tables(windows: &[ReservationWindow], query: &Span) -> HashSet<Ulid> {
    windows
        .iter()
        .filter(|w| w.span.overlaps(query))
        .filter_map(|w| w.table_id)
        .collect()
}

/// Drop every candidate blocked during `query`. Candidate order is kept.
pub fn available_tables(candidates: Vec<Table>, windows: &[ReservationWindow], query: &Span) -> Vec<Table> {
    let blocked = blocked_tables(windows, query);
    if blocked.is_empty() {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|t| !blocked.contains(&t.id))
        .collect()
}

/// Which tables can seat `query.party_size` for the whole requested window.
///
/// Reads both collaborators once and holds no state between calls: the same
/// inputs always produce the same result. An empty result is not an error.
pub fn find_available_tables(
    registry: &impl TableRegistry,
    ledger: &impl ReservationLedger,
    query: &AvailabilityQuery,
    default_duration: Duration,
) -> Result<AvailabilityResult, EngineError> {
    let window = query.window(default_duration);
    let candidates = registry.list_tables(query.party_size)?;
    let reservations = ledger.list_confirmed_reservations(query.date)?;
    let tables = available_tables(candidates, &reservations, &window);
    Ok(AvailabilityResult {
        total_available: tables.len(),
        tables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Floor(Vec<Table>);

    impl TableRegistry for Floor {
        fn list_tables(&self, min_capacity: u32) -> Result<Vec<Table>, EngineError> {
            let mut tables: Vec<Table> = self
                .0
                .iter()
                .filter(|t| t.capacity >= min_capacity)
                .cloned()
                .collect();
            tables.sort_by(table_order);
            Ok(tables)
        }
    }

    struct Book(Vec<Reservation>);

    impl ReservationLedger for Book {
        fn list_confirmed_reservations(&self, date: NaiveDate) -> Result<Vec<ReservationWindow>, EngineError> {
            Ok(self
                .0
                .iter()
                .filter(|r| r.date == date && r.status.blocks_table())
                .map(|r| r.window(Duration::hours(2)))
                .collect())
        }
    }

    fn table(number: &str, capacity: u32) -> Table {
        Table {
            id: Ulid::new(),
            table_number: number.into(),
            capacity,
            area: TableArea::MainHall,
            features: TableFeatures::default(),
            status: TableStatus::Available,
        }
    }

    fn booking(table: &Table, date: &str, start: &str, end: Option<&str>) -> Reservation {
        Reservation {
            id: Ulid::new(),
            user_id: Ulid::new(),
            table_id: Some(table.id),
            date: parse_date(date).unwrap(),
            start: parse_time(start).unwrap(),
            end: end.map(|e| parse_time(e).unwrap()),
            party_size: 2,
            status: ReservationStatus::Confirmed,
            confirmation_code: format!("RES-{}", &Ulid::new().to_string()[18..]),
            special_request: None,
        }
    }

    fn query(date: &str, time: &str, end: Option<&str>, party: i64) -> AvailabilityQuery {
        AvailabilityQuery::parse(date, time, end, Some(party)).unwrap()
    }

    fn numbers(result: &AvailabilityResult) -> Vec<&str> {
        result.tables.iter().map(|t| t.table_number.as_str()).collect()
    }

    #[test]
    fn empty_ledger_filters_by_capacity_in_order() {
        let floor = Floor(vec![table("T6", 6), table("T2", 2), table("T4b", 4), table("T4a", 4)]);
        let result = find_available_tables(
            &floor,
            &Book(vec![]),
            &query("2025-06-01", "19:00", None, 4),
            Duration::hours(2),
        )
        .unwrap();
        assert_eq!(numbers(&result), ["T4a", "T4b", "T6"]);
        assert_eq!(result.total_available, 3);
    }

    #[test]
    fn overlapping_confirmed_reservation_excludes_table() {
        let a = table("A", 4);
        let b = table("B", 4);
        let book = Book(vec![booking(&a, "2025-06-01", "19:00", Some("21:00"))]);
        let result = find_available_tables(
            &Floor(vec![a, b]),
            &book,
            &query("2025-06-01", "19:30", None, 4),
            Duration::hours(2),
        )
        .unwrap();
        assert_eq!(numbers(&result), ["B"]);
    }

    #[test]
    fn back_to_back_is_free() {
        let a = table("A", 4);
        let book = Book(vec![booking(&a, "2025-06-01", "19:00", Some("21:00"))]);
        let floor = Floor(vec![a]);
        let result = find_available_tables(
            &floor,
            &book,
            &query("2025-06-01", "21:00", None, 4),
            Duration::hours(2),
        )
        .unwrap();
        assert_eq!(numbers(&result), ["A"]);

        // And the other side: a query ending exactly when the booking starts.
        let result = find_available_tables(
            &floor,
            &book,
            &query("2025-06-01", "17:00", Some("19:00"), 4),
            Duration::hours(2),
        )
        .unwrap();
        assert_eq!(numbers(&result), ["A"]);
    }

    #[test]
    fn default_duration_applies_to_stored_reservation() {
        let a = table("A", 4);
        // Booked 18:00 with no end: holds the table until 20:00.
        let book = Book(vec![booking(&a, "2025-06-01", "18:00", None)]);
        let floor = Floor(vec![a]);
        let at = |time: &str| {
            find_available_tables(&floor, &book, &query("2025-06-01", time, Some("23:00"), 2), Duration::hours(2))
                .unwrap()
                .total_available
        };
        assert_eq!(at("19:59"), 0);
        assert_eq!(at("20:00"), 1);
    }

    #[test]
    fn non_confirmed_reservations_do_not_block() {
        let a = table("A", 4);
        let mut cancelled = booking(&a, "2025-06-01", "19:00", Some("21:00"));
        cancelled.status = ReservationStatus::Cancelled;
        let mut done = booking(&a, "2025-06-01", "19:00", Some("21:00"));
        done.status = ReservationStatus::Completed;
        let result = find_available_tables(
            &Floor(vec![a]),
            &Book(vec![cancelled, done]),
            &query("2025-06-01", "19:30", None, 2),
            Duration::hours(2),
        )
        .unwrap();
        assert_eq!(result.total_available, 1);
    }

    #[test]
    fn other_dates_do_not_block() {
        let a = table("A", 4);
        let book = Book(vec![booking(&a, "2025-06-02", "19:00", Some("21:00"))]);
        let result = find_available_tables(
            &Floor(vec![a]),
            &book,
            &query("2025-06-01", "19:00", None, 2),
            Duration::hours(2),
        )
        .unwrap();
        assert_eq!(result.total_available, 1);
    }

    #[test]
    fn unassigned_reservations_block_nothing() {
        let a = table("A", 4);
        let mut floating = booking(&a, "2025-06-01", "19:00", Some("21:00"));
        floating.table_id = None;
        let result = find_available_tables(
            &Floor(vec![a]),
            &Book(vec![floating]),
            &query("2025-06-01", "19:00", None, 2),
            Duration::hours(2),
        )
        .unwrap();
        assert_eq!(result.total_available, 1);
    }

    #[test]
    fn oversized_party_yields_empty_result() {
        let floor = Floor(vec![table("T12", 12), table("T4", 4)]);
        let result = find_available_tables(
            &floor,
            &Book(vec![]),
            &query("2025-06-01", "19:00", None, 50),
            Duration::hours(2),
        )
        .unwrap();
        assert!(result.tables.is_empty());
        assert_eq!(result.total_available, 0);
    }

    #[test]
    fn repeated_queries_agree() {
        let a = table("A", 4);
        let b = table("B", 2);
        let book = Book(vec![booking(&b, "2025-06-01", "12:00", Some("13:00"))]);
        let floor = Floor(vec![a, b]);
        let q = query("2025-06-01", "12:30", None, 2);
        let first = find_available_tables(&floor, &book, &q, Duration::hours(2)).unwrap();
        let second = find_available_tables(&floor, &book, &q, Duration::hours(2)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn blocked_tables_ignores_touching_windows() {
        let a = table("A", 4);
        let windows = [booking(&a, "2025-06-01", "18:00", Some("20:00")).window(Duration::hours(2))];
        let date = parse_date("2025-06-01").unwrap();
        let after = Span::new(
            date.and_time(parse_time("20:00").unwrap()),
            date.and_time(parse_time("22:00").unwrap()),
        );
        assert!(blocked_tables(&windows, &after).is_empty());
    }
}
