pub const MAX_TABLES: usize = 10_000;
pub const MAX_RESERVATIONS: usize = 1_000_000;
pub const MAX_RESERVATIONS_PER_DATE: usize = 10_000;
pub const MAX_TABLE_NUMBER_LEN: usize = 32;
pub const MAX_SPECIAL_REQUEST_LEN: usize = 500;
pub const MAX_SQL_LEN: usize = 64 * 1024;

pub const CONFIRMATION_CODE_PREFIX: &str = "RES-";
pub const CONFIRMATION_CODE_LEN: usize = 8;
pub const MAX_CODE_ATTEMPTS: usize = 16;

pub const DEFAULT_PARTY_SIZE: u32 = 1;
pub const DEFAULT_RESERVATION_MINUTES: i64 = 120;
pub const DEFAULT_MAX_PARTY_SIZE: u32 = 20;
pub const DEFAULT_MAX_TABLE_CAPACITY: u32 = 20;
pub const MAX_RESERVATION_MINUTES: i64 = 24 * 60;
