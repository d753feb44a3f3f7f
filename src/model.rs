use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::Settings;
use crate::limits::*;

/// Half-open interval `[start, end)` on the restaurant's wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `[date start, date start + duration)`. May run past midnight.
    pub fn starting_at(date: NaiveDate, start: NaiveTime, duration: Duration) -> Self {
        let start = date.and_time(start);
        Self::new(start, start + duration)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Validation ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid date {0:?}: expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid time {0:?}: expected HH:MM")]
    InvalidTime(String),
    #[error("unknown {kind} {value:?}")]
    UnknownVariant { kind: &'static str, value: String },
    #[error("party size must be at least 1, got {0}")]
    PartySizeTooSmall(i64),
    #[error("party size {size} exceeds maximum of {max}")]
    PartySizeTooLarge { size: i64, max: u32 },
    #[error("capacity must be between 1 and {max}, got {capacity}")]
    CapacityOutOfRange { capacity: i64, max: u32 },
    #[error("end time {end} must be after start time {start}")]
    EndNotAfterStart { start: NaiveTime, end: NaiveTime },
    #[error("table number must not be empty")]
    EmptyTableNumber,
    #[error("{0} too long")]
    TooLong(&'static str),
    #[error("vip_room is only allowed for tables in the vip area")]
    VipRoomOutsideVipArea,
}

impl ValidationError {
    /// Input that could not be parsed at all, as opposed to a well-formed
    /// value that breaks a rule.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ValidationError::InvalidDate(_) | ValidationError::InvalidTime(_))
    }
}

/// Strict `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    if s.len() != 10 {
        return Err(ValidationError::InvalidDate(s.to_string()));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate(s.to_string()))
}

/// Strict 24-hour `HH:MM`.
pub fn parse_time(s: &str) -> Result<NaiveTime, ValidationError> {
    if s.len() != 5 {
        return Err(ValidationError::InvalidTime(s.to_string()));
    }
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| ValidationError::InvalidTime(s.to_string()))
}

pub fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn check_party_size(size: i64, max: Option<u32>) -> Result<u32, ValidationError> {
    if size < 1 {
        return Err(ValidationError::PartySizeTooSmall(size));
    }
    let max = max.unwrap_or(u32::MAX);
    if size > max as i64 {
        return Err(ValidationError::PartySizeTooLarge { size, max });
    }
    Ok(size as u32)
}

fn check_end_after_start(start: NaiveTime, end: Option<NaiveTime>) -> Result<(), ValidationError> {
    match end {
        Some(end) if end <= start => Err(ValidationError::EndNotAfterStart { start, end }),
        _ => Ok(()),
    }
}

// ── Closed enums ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableArea {
    Terrace,
    MainHall,
    Vip,
}

impl TableArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableArea::Terrace => "terrace",
            TableArea::MainHall => "main_hall",
            TableArea::Vip => "vip",
        }
    }
}

impl FromStr for TableArea {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terrace" => Ok(TableArea::Terrace),
            "main_hall" => Ok(TableArea::MainHall),
            "vip" => Ok(TableArea::Vip),
            _ => Err(ValidationError::UnknownVariant { kind: "table area", value: s.to_string() }),
        }
    }
}

impl fmt::Display for TableArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live floor state. Never consulted by availability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableStatus {
    #[default]
    Available,
    Occupied,
    Reserved,
    Maintenance,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Available => "available",
            TableStatus::Occupied => "occupied",
            TableStatus::Reserved => "reserved",
            TableStatus::Maintenance => "maintenance",
        }
    }
}

impl FromStr for TableStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(TableStatus::Available),
            "occupied" => Ok(TableStatus::Occupied),
            "reserved" => Ok(TableStatus::Reserved),
            "maintenance" => Ok(TableStatus::Maintenance),
            _ => Err(ValidationError::UnknownVariant { kind: "table status", value: s.to_string() }),
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    #[default]
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::NoShow => "no_show",
        }
    }

    /// Only confirmed reservations hold a table.
    pub fn blocks_table(&self) -> bool {
        matches!(self, ReservationStatus::Confirmed)
    }
}

impl FromStr for ReservationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "completed" => Ok(ReservationStatus::Completed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "no_show" => Ok(ReservationStatus::NoShow),
            _ => Err(ValidationError::UnknownVariant {
                kind: "reservation status",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tables ───────────────────────────────────────────────────────

/// Positional features of a table. Not mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFeatures {
    pub smoking: bool,
    pub window_seat: bool,
    pub wall_seat: bool,
    pub vip_room: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: Ulid,
    pub table_number: String,
    pub capacity: u32,
    pub area: TableArea,
    pub features: TableFeatures,
    pub status: TableStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTable {
    pub table_number: String,
    pub capacity: u32,
    pub area: TableArea,
    pub features: TableFeatures,
}

/// Partial table edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableUpdate {
    pub table_number: Option<String>,
    pub capacity: Option<u32>,
    pub area: Option<TableArea>,
    pub smoking: Option<bool>,
    pub window_seat: Option<bool>,
    pub wall_seat: Option<bool>,
    pub vip_room: Option<bool>,
    pub status: Option<TableStatus>,
}

impl Table {
    pub fn create(id: Ulid, new: NewTable, settings: &Settings) -> Result<Self, ValidationError> {
        let table = Self {
            id,
            table_number: new.table_number.trim().to_string(),
            capacity: new.capacity,
            area: new.area,
            features: new.features,
            status: TableStatus::Available,
        };
        table.validate(settings)?;
        Ok(table)
    }

    pub fn validate(&self, settings: &Settings) -> Result<(), ValidationError> {
        if self.table_number.is_empty() {
            return Err(ValidationError::EmptyTableNumber);
        }
        if self.table_number.len() > MAX_TABLE_NUMBER_LEN {
            return Err(ValidationError::TooLong("table number"));
        }
        if self.capacity < 1 || self.capacity > settings.max_table_capacity {
            return Err(ValidationError::CapacityOutOfRange {
                capacity: self.capacity as i64,
                max: settings.max_table_capacity,
            });
        }
        if self.features.vip_room && self.area != TableArea::Vip {
            return Err(ValidationError::VipRoomOutsideVipArea);
        }
        Ok(())
    }

    /// Merge `update` into a copy of `self` and validate the result.
    pub fn apply_update(&self, update: &TableUpdate, settings: &Settings) -> Result<Table, ValidationError> {
        let mut next = self.clone();
        if let Some(number) = &update.table_number {
            next.table_number = number.trim().to_string();
        }
        if let Some(capacity) = update.capacity {
            next.capacity = capacity;
        }
        if let Some(area) = update.area {
            next.area = area;
        }
        if let Some(v) = update.smoking {
            next.features.smoking = v;
        }
        if let Some(v) = update.window_seat {
            next.features.window_seat = v;
        }
        if let Some(v) = update.wall_seat {
            next.features.wall_seat = v;
        }
        if let Some(v) = update.vip_room {
            next.features.vip_room = v;
        }
        if let Some(status) = update.status {
            next.status = status;
        }
        next.validate(settings)?;
        Ok(next)
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub table_id: Option<Ulid>,
    pub date: NaiveDate,
    pub start: NaiveTime,
    /// `None` means the default duration applies.
    pub end: Option<NaiveTime>,
    pub party_size: u32,
    pub status: ReservationStatus,
    pub confirmation_code: String,
    pub special_request: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub user_id: Ulid,
    pub table_id: Option<Ulid>,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
    pub party_size: u32,
    pub special_request: Option<String>,
}

/// Partial reservation edit. Nullable fields use `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationUpdate {
    pub date: Option<NaiveDate>,
    pub start: Option<NaiveTime>,
    pub end: Option<Option<NaiveTime>>,
    pub party_size: Option<u32>,
    pub status: Option<ReservationStatus>,
    pub table_id: Option<Option<Ulid>>,
    pub special_request: Option<Option<String>>,
}

impl Reservation {
    pub fn create(
        id: Ulid,
        new: NewReservation,
        confirmation_code: String,
        settings: &Settings,
    ) -> Result<Self, ValidationError> {
        let reservation = Self {
            id,
            user_id: new.user_id,
            table_id: new.table_id,
            date: new.date,
            start: new.start,
            end: new.end,
            party_size: new.party_size,
            status: ReservationStatus::Confirmed,
            confirmation_code,
            special_request: new.special_request,
        };
        reservation.validate(settings)?;
        Ok(reservation)
    }

    pub fn validate(&self, settings: &Settings) -> Result<(), ValidationError> {
        check_party_size(self.party_size as i64, Some(settings.max_party_size))?;
        check_end_after_start(self.start, self.end)?;
        if self.special_request.as_ref().is_some_and(|r| r.len() > MAX_SPECIAL_REQUEST_LEN) {
            return Err(ValidationError::TooLong("special request"));
        }
        Ok(())
    }

    pub fn apply_update(
        &self,
        update: &ReservationUpdate,
        settings: &Settings,
    ) -> Result<Reservation, ValidationError> {
        let mut next = self.clone();
        if let Some(date) = update.date {
            next.date = date;
        }
        if let Some(start) = update.start {
            next.start = start;
        }
        if let Some(end) = update.end {
            next.end = end;
        }
        if let Some(size) = update.party_size {
            next.party_size = size;
        }
        if let Some(status) = update.status {
            next.status = status;
        }
        if let Some(table_id) = update.table_id {
            next.table_id = table_id;
        }
        if let Some(req) = &update.special_request {
            next.special_request = req.clone();
        }
        next.validate(settings)?;
        Ok(next)
    }

    /// Effective occupied window, applying the default duration when no end
    /// time was given.
    pub fn span(&self, default_duration: Duration) -> Span {
        match self.end {
            Some(end) => Span::new(self.date.and_time(self.start), self.date.and_time(end)),
            None => Span::starting_at(self.date, self.start, default_duration),
        }
    }

    pub fn window(&self, default_duration: Duration) -> ReservationWindow {
        ReservationWindow {
            reservation_id: self.id,
            table_id: self.table_id,
            span: self.span(default_duration),
        }
    }
}

/// Conjunctive filter for table listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFilter {
    pub id: Option<Ulid>,
    pub min_capacity: Option<u32>,
    pub status: Option<TableStatus>,
}

impl TableFilter {
    pub fn matches(&self, table: &Table) -> bool {
        self.id.is_none_or(|id| table.id == id)
            && self.min_capacity.is_none_or(|min| table.capacity >= min)
            && self.status.is_none_or(|status| table.status == status)
    }
}

/// Conjunctive filter for reservation listings. Unset fields match everything.
/// `from_date` keeps reservations on or after that date ("upcoming").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub id: Option<Ulid>,
    pub confirmation_code: Option<String>,
    pub user_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
    pub date: Option<NaiveDate>,
    pub from_date: Option<NaiveDate>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.id.is_none_or(|id| r.id == id)
            && self.confirmation_code.as_ref().is_none_or(|code| &r.confirmation_code == code)
            && self.user_id.is_none_or(|user| r.user_id == user)
            && self.status.is_none_or(|status| r.status == status)
            && self.date.is_none_or(|date| r.date == date)
            && self.from_date.is_none_or(|from| r.date >= from)
    }
}

/// What the ledger hands the availability engine for one reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationWindow {
    pub reservation_id: Ulid,
    pub table_id: Option<Ulid>,
    pub span: Span,
}

// ── Availability ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
    pub party_size: u32,
}

impl AvailabilityQuery {
    pub fn new(
        date: NaiveDate,
        start: NaiveTime,
        end: Option<NaiveTime>,
        party_size: i64,
    ) -> Result<Self, ValidationError> {
        let party_size = check_party_size(party_size, None)?;
        check_end_after_start(start, end)?;
        Ok(Self { date, start, end, party_size })
    }

    /// Parse the raw `date`, `time`, `endTime`, `partySize` inputs.
    pub fn parse(
        date: &str,
        time: &str,
        end_time: Option<&str>,
        party_size: Option<i64>,
    ) -> Result<Self, ValidationError> {
        let date = parse_date(date)?;
        let start = parse_time(time)?;
        let end = end_time.map(parse_time).transpose()?;
        Self::new(date, start, end, party_size.unwrap_or(DEFAULT_PARTY_SIZE as i64))
    }

    pub fn window(&self, default_duration: Duration) -> Span {
        match self.end {
            Some(end) => Span::new(self.date.and_time(self.start), self.date.and_time(end)),
            None => Span::starting_at(self.date, self.start, default_duration),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityResult {
    pub tables: Vec<Table>,
    pub total_available: usize,
}

// ── Response envelope ────────────────────────────────────────────

/// JSON shape served to booking front-ends.
#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub success: bool,
    pub data: Vec<AvailableTable>,
    pub meta: AvailabilityMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTable {
    pub id: String,
    pub table_number: String,
    pub capacity: u32,
    pub location: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityMeta {
    pub date: String,
    pub time: String,
    pub end_time: String,
    pub party_size: u32,
    pub total_available: usize,
}

impl AvailabilityResponse {
    pub fn new(query: &AvailabilityQuery, window: &Span, result: &AvailabilityResult) -> Self {
        Self {
            success: true,
            data: result
                .tables
                .iter()
                .map(|t| AvailableTable {
                    id: t.id.to_string(),
                    table_number: t.table_number.clone(),
                    capacity: t.capacity,
                    location: t.area.as_str(),
                    status: t.status.as_str(),
                })
                .collect(),
            meta: AvailabilityMeta {
                date: query.date.format("%Y-%m-%d").to_string(),
                time: format_time(query.start),
                end_time: format_time(window.end.time()),
                party_size: query.party_size,
                total_available: result.total_available,
            },
        }
    }
}

/// One committed mutation. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TableCreated { table: Table },
    TableUpdated { table: Table },
    TableDeleted { id: Ulid },
    ReservationCreated { reservation: Reservation },
    ReservationUpdated { reservation: Reservation },
    ReservationDeleted { id: Ulid },
}
