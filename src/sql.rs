use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_SQL_LEN;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTable {
        id: Ulid,
        table: NewTable,
    },
    UpdateTable {
        id: Ulid,
        update: TableUpdate,
    },
    DeleteTable {
        id: Ulid,
    },
    SelectTables {
        filter: TableFilter,
    },
    InsertReservation {
        id: Ulid,
        reservation: NewReservation,
    },
    UpdateReservation {
        id: Ulid,
        update: ReservationUpdate,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    /// `json` selects the single-row envelope form (`available_tables_json`).
    SelectAvailableTables {
        query: AvailabilityQuery,
        json: bool,
    },
}


pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::TooLong);
    }
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        // (id, table_number, capacity, area[, smoking, window_seat, wall_seat, vip_room])
        "tables" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("tables", 4, values.len()));
            }
            let flag = |i: usize| values.get(i).map_or(Ok(false), parse_bool);
            Ok(Command::InsertTable {
                id: parse_ulid(&values[0])?,
                table: NewTable {
                    table_number: parse_string(&values[1])?.to_string(),
                    capacity: parse_u32(&values[2], "capacity")?,
                    area: parse_enum(&values[3])?,
                    features: TableFeatures {
                        smoking: flag(4)?,
                        window_seat: flag(5)?,
                        wall_seat: flag(6)?,
                        vip_room: flag(7)?,
                    },
                },
            })
        }
        // (id, user_id, table_id, date, time, end_time, party_size[, special_request])
        "reservations" => {
            if values.len() < 7 {
                return Err(SqlError::WrongArity("reservations", 7, values.len()));
            }
            let special_request = match values.get(7) {
                Some(v) => parse_string_or_null(v)?.map(str::to_string),
                None => None,
            };
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                reservation: NewReservation {
                    user_id: parse_ulid(&values[1])?,
                    table_id: parse_ulid_or_null(&values[2])?,
                    date: parse_date_expr(&values[3])?,
                    start: parse_time_expr(&values[4])?,
                    end: parse_time_or_null(&values[5])?,
                    party_size: parse_party_size(&values[6])?,
                    special_request,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    if assignments.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    match table.as_str() {
        "tables" => {
            let mut update = TableUpdate::default();
            for a in assignments {
                let v = &a.value;
                match assignment_column(a)?.as_str() {
                    "table_number" => update.table_number = Some(parse_string(v)?.to_string()),
                    "capacity" => update.capacity = Some(parse_u32(v, "capacity")?),
                    "area" => update.area = Some(parse_enum(v)?),
                    "smoking" => update.smoking = Some(parse_bool(v)?),
                    "window_seat" => update.window_seat = Some(parse_bool(v)?),
                    "wall_seat" => update.wall_seat = Some(parse_bool(v)?),
                    "vip_room" => update.vip_room = Some(parse_bool(v)?),
                    "status" => update.status = Some(parse_enum(v)?),
                    other => return Err(SqlError::UnknownColumn { table: "tables", column: other.into() }),
                }
            }
            Ok(Command::UpdateTable { id, update })
        }
        "reservations" => {
            let mut update = ReservationUpdate::default();
            for a in assignments {
                let v = &a.value;
                match assignment_column(a)?.as_str() {
                    "date" => update.date = Some(parse_date_expr(v)?),
                    "time" => update.start = Some(parse_time_expr(v)?),
                    "end_time" => update.end = Some(parse_time_or_null(v)?),
                    "party_size" => update.party_size = Some(parse_party_size(v)?),
                    "status" => update.status = Some(parse_enum(v)?),
                    "table_id" => update.table_id = Some(parse_ulid_or_null(v)?),
                    "special_request" => {
                        update.special_request = Some(parse_string_or_null(v)?.map(str::to_string))
                    }
                    other => {
                        return Err(SqlError::UnknownColumn { table: "reservations", column: other.into() });
                    }
                }
            }
            Ok(Command::UpdateReservation { id, update })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Unsupported("tuple assignment".into())),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "tables" => Ok(Command::DeleteTable { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// One `column <op> value` term of an AND-only WHERE clause.
struct Filter<'a> {
    column: String,
    op: ast::BinaryOperator,
    value: &'a Expr,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "tables" => {
            let mut filter = TableFilter::default();
            for f in filters {
                match (f.column.as_str(), &f.op) {
                    ("id", ast::BinaryOperator::Eq) => filter.id = Some(parse_ulid(f.value)?),
                    ("capacity", ast::BinaryOperator::GtEq) => {
                        filter.min_capacity = Some(parse_u32(f.value, "capacity")?)
                    }
                    ("status", ast::BinaryOperator::Eq) => filter.status = Some(parse_enum(f.value)?),
                    _ => return Err(SqlError::UnknownColumn { table: "tables", column: f.column }),
                }
            }
            Ok(Command::SelectTables { filter })
        }
        "reservations" => {
            let mut filter = ReservationFilter::default();
            for f in filters {
                match (f.column.as_str(), &f.op) {
                    ("id", ast::BinaryOperator::Eq) => filter.id = Some(parse_ulid(f.value)?),
                    ("confirmation_code", ast::BinaryOperator::Eq) => {
                        filter.confirmation_code = Some(parse_string(f.value)?.to_string())
                    }
                    ("user_id", ast::BinaryOperator::Eq) => filter.user_id = Some(parse_ulid(f.value)?),
                    ("status", ast::BinaryOperator::Eq) => filter.status = Some(parse_enum(f.value)?),
                    ("date", ast::BinaryOperator::Eq) => filter.date = Some(parse_date_expr(f.value)?),
                    ("date", ast::BinaryOperator::GtEq) => filter.from_date = Some(parse_date_expr(f.value)?),
                    ("id" | "confirmation_code" | "user_id" | "status" | "date", op) => {
                        return Err(SqlError::Unsupported(format!("operator {op} on {}", f.column)));
                    }
                    _ => return Err(SqlError::UnknownColumn { table: "reservations", column: f.column }),
                }
            }
            Ok(Command::SelectReservations { filter })
        }
        "available_tables" | "available_tables_json" => {
            let (mut date, mut time, mut end_time, mut party_size) = (None, None, None, None);
            for f in &filters {
                if f.op != ast::BinaryOperator::Eq {
                    return Err(SqlError::Unsupported(format!("operator {} on {}", f.op, f.column)));
                }
                match f.column.as_str() {
                    "date" => date = Some(parse_string(f.value)?),
                    "time" => time = Some(parse_string(f.value)?),
                    "end_time" => end_time = Some(parse_string(f.value)?),
                    "party_size" => party_size = Some(parse_i64_expr(f.value)?),
                    _ => {
                        return Err(SqlError::UnknownColumn {
                            table: "available_tables",
                            column: f.column.clone(),
                        });
                    }
                }
            }
            let query = AvailabilityQuery::parse(
                date.ok_or(SqlError::MissingFilter("date"))?,
                time.ok_or(SqlError::MissingFilter("time"))?,
                end_time,
                party_size,
            )?;
            Ok(Command::SelectAvailableTables { query, json: table == "available_tables_json" })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column =
                expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            out.push(Filter { column, op: op.clone(), value: right });
            Ok(())
        }
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// The single VALUES row of an INSERT.
fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<&str>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    Ok(parse_date(parse_string(expr)?)?)
}

fn parse_time_expr(expr: &Expr) -> Result<NaiveTime, SqlError> {
    Ok(parse_time(parse_string(expr)?)?)
}

fn parse_time_or_null(expr: &Expr) -> Result<Option<NaiveTime>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_time_expr(expr).map(Some)
}

/// Closed enums are matched exactly; anything else is a validation error.
fn parse_enum<T: FromStr<Err = ValidationError>>(expr: &Expr) -> Result<T, SqlError> {
    Ok(parse_string(expr)?.parse()?)
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => {
                s.parse().map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr, what: &'static str) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::OutOfRange { what, value: v })
}

fn parse_party_size(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    if v < 1 {
        return Err(ValidationError::PartySizeTooSmall(v).into());
    }
    u32::try_from(v).map_err(|_| SqlError::OutOfRange { what: "party_size", value: v })
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => match n.as_str() {
                "1" => Ok(true),
                "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {n}"))),
            },
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("query too long")]
    TooLong,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column {column:?} for {table}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("{0}: expected at least {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: i64 },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const USER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        parse_time(s).unwrap()
    }

    #[test]
    fn parse_insert_table() {
        let sql = format!(
            "INSERT INTO tables (id, table_number, capacity, area, smoking, window_seat) \
             VALUES ('{ID}', 'T12', 6, 'terrace', false, true)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertTable { id, table } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(table.table_number, "T12");
                assert_eq!(table.capacity, 6);
                assert_eq!(table.area, TableArea::Terrace);
                assert!(table.features.window_seat);
                assert!(!table.features.smoking);
                assert!(!table.features.vip_room);
            }
            _ => panic!("expected InsertTable, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_table_rejects_unknown_area() {
        let sql = format!("INSERT INTO tables (id, table_number, capacity, area) VALUES ('{ID}', 'T1', 4, 'patio')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::Invalid(ValidationError::UnknownVariant { .. }))
        ));
    }

    #[test]
    fn insert_table_needs_four_values() {
        let sql = format!("INSERT INTO tables (id, table_number, capacity) VALUES ('{ID}', 'T1', 4)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("tables", 4, 3))));
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = format!(
            "INSERT INTO reservations (id, user_id, table_id, date, time, end_time, party_size, special_request) \
             VALUES ('{ID}', '{USER}', '{ID}', '2025-06-01', '19:00', NULL, 4, 'window please')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertReservation { id, reservation } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(reservation.user_id.to_string(), USER);
                assert_eq!(reservation.table_id, Some(id));
                assert_eq!(reservation.date, d("2025-06-01"));
                assert_eq!(reservation.start, t("19:00"));
                assert_eq!(reservation.end, None);
                assert_eq!(reservation.party_size, 4);
                assert_eq!(reservation.special_request.as_deref(), Some("window please"));
            }
            _ => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_reservation_with_malformed_time() {
        let sql = format!(
            "INSERT INTO reservations VALUES ('{ID}', '{USER}', NULL, '2025-06-01', '7pm', NULL, 2)"
        );
        match parse_sql(&sql) {
            Err(SqlError::Invalid(e)) => assert!(e.is_malformed()),
            other => panic!("expected malformed time, got {other:?}"),
        }
    }

    #[test]
    fn insert_reservation_with_zero_party() {
        let sql = format!(
            "INSERT INTO reservations VALUES ('{ID}', '{USER}', NULL, '2025-06-01', '19:00', '21:00', 0)"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::Invalid(ValidationError::PartySizeTooSmall(0)))
        ));
    }

    #[test]
    fn parse_update_table() {
        let sql = format!("UPDATE tables SET capacity = 8, status = 'maintenance', vip_room = true WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateTable { id, update } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(
                    update,
                    TableUpdate {
                        capacity: Some(8),
                        status: Some(TableStatus::Maintenance),
                        vip_room: Some(true),
                        ..Default::default()
                    }
                );
            }
            _ => panic!("expected UpdateTable, got {cmd:?}"),
        }
    }

    #[test]
    fn update_rejects_unknown_columns() {
        let sql = format!("UPDATE tables SET colour = 'red' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn { table: "tables", .. })));
    }

    #[test]
    fn update_requires_id_filter() {
        let sql = "UPDATE tables SET capacity = 8 WHERE table_number = 'T1'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_update_reservation_distinguishes_null_from_absent() {
        let sql = format!(
            "UPDATE reservations SET status = 'no_show', table_id = NULL, end_time = '22:00' WHERE id = '{ID}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateReservation { update, .. } => {
                assert_eq!(update.status, Some(ReservationStatus::NoShow));
                assert_eq!(update.table_id, Some(None));
                assert_eq!(update.end, Some(Some(t("22:00"))));
                assert_eq!(update.special_request, None);
                assert_eq!(update.date, None);
            }
            _ => panic!("expected UpdateReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn update_reservation_rejects_unknown_status() {
        let sql = format!("UPDATE reservations SET status = 'pending' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Invalid(_))));
    }

    #[test]
    fn parse_deletes() {
        let sql = format!("DELETE FROM tables WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteTable { .. }));
        let sql = format!("DELETE FROM reservations WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteReservation { .. }));
    }

    #[test]
    fn parse_select_tables() {
        assert_eq!(
            parse_sql("SELECT * FROM tables").unwrap(),
            Command::SelectTables { filter: TableFilter::default() }
        );
        assert_eq!(
            parse_sql("SELECT * FROM tables WHERE capacity >= 4 AND status = 'available'").unwrap(),
            Command::SelectTables {
                filter: TableFilter {
                    min_capacity: Some(4),
                    status: Some(TableStatus::Available),
                    ..Default::default()
                }
            }
        );
        let by_id = format!("SELECT * FROM tables WHERE id = '{ID}'");
        match parse_sql(&by_id).unwrap() {
            Command::SelectTables { filter } => assert_eq!(filter.id.map(|id| id.to_string()).as_deref(), Some(ID)),
            cmd => panic!("expected SelectTables, got {cmd:?}"),
        }
        assert!(parse_sql("SELECT * FROM tables WHERE capacity < 4").is_err());
        assert!(matches!(
            parse_sql("SELECT * FROM tables WHERE status = 'broken'"),
            Err(SqlError::Invalid(ValidationError::UnknownVariant { .. }))
        ));
    }

    #[test]
    fn parse_select_reservations() {
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectReservations { filter: ReservationFilter::default() }
        );
        assert_eq!(
            parse_sql("SELECT * FROM reservations WHERE \"date\" = '2025-06-01'").unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter { date: Some(d("2025-06-01")), ..Default::default() }
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM reservations WHERE confirmation_code = 'RES-ABCD1234'").unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter {
                    confirmation_code: Some("RES-ABCD1234".into()),
                    ..Default::default()
                }
            }
        );
    }

    #[test]
    fn parse_select_user_reservations() {
        let sql = format!(
            "SELECT * FROM reservations WHERE user_id = '{USER}' AND status = 'confirmed' AND \"date\" >= '2025-06-01'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectReservations { filter } => {
                assert_eq!(filter.user_id.map(|u| u.to_string()).as_deref(), Some(USER));
                assert_eq!(filter.status, Some(ReservationStatus::Confirmed));
                assert_eq!(filter.from_date, Some(d("2025-06-01")));
                assert_eq!(filter.date, None);
            }
            cmd => panic!("expected SelectReservations, got {cmd:?}"),
        }

        let bad_op = format!("SELECT * FROM reservations WHERE user_id >= '{USER}'");
        assert!(matches!(parse_sql(&bad_op), Err(SqlError::Unsupported(_))));
        let unknown = "SELECT * FROM reservations WHERE party_size = 2";
        assert!(matches!(parse_sql(unknown), Err(SqlError::UnknownColumn { .. })));
    }

    #[test]
    fn parse_select_available_tables() {
        let sql = "SELECT * FROM available_tables WHERE \"date\" = '2025-06-01' AND \"time\" = '19:30' AND party_size = 4";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::SelectAvailableTables { query, json } => {
                assert!(!json);
                assert_eq!(query.date, d("2025-06-01"));
                assert_eq!(query.start, t("19:30"));
                assert_eq!(query.end, None);
                assert_eq!(query.party_size, 4);
            }
            _ => panic!("expected SelectAvailableTables, got {cmd:?}"),
        }
    }

    #[test]
    fn available_tables_defaults_party_size() {
        let sql = "SELECT * FROM available_tables_json WHERE \"date\" = '2025-06-01' AND \"time\" = '19:30' AND end_time = '21:00'";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailableTables { query, json } => {
                assert!(json);
                assert_eq!(query.party_size, 1);
                assert_eq!(query.end, Some(t("21:00")));
            }
            cmd => panic!("expected SelectAvailableTables, got {cmd:?}"),
        }
    }

    #[test]
    fn available_tables_validation() {
        let missing_time = "SELECT * FROM available_tables WHERE \"date\" = '2025-06-01'";
        assert!(matches!(parse_sql(missing_time), Err(SqlError::MissingFilter("time"))));

        let backwards =
            "SELECT * FROM available_tables WHERE \"date\" = '2025-06-01' AND \"time\" = '20:00' AND end_time = '19:00'";
        assert!(matches!(
            parse_sql(backwards),
            Err(SqlError::Invalid(ValidationError::EndNotAfterStart { .. }))
        ));

        let bad_date = "SELECT * FROM available_tables WHERE \"date\" = '06/01/2025' AND \"time\" = '19:00'";
        match parse_sql(bad_date) {
            Err(SqlError::Invalid(e)) => assert!(e.is_malformed()),
            other => panic!("expected malformed date, got {other:?}"),
        }

        let zero = "SELECT * FROM available_tables WHERE \"date\" = '2025-06-01' AND \"time\" = '19:00' AND party_size = 0";
        assert!(matches!(
            parse_sql(zero),
            Err(SqlError::Invalid(ValidationError::PartySizeTooSmall(0)))
        ));

        let stray = "SELECT * FROM available_tables WHERE \"date\" = '2025-06-01' AND \"time\" = '19:00' AND area = 'vip'";
        assert!(matches!(parse_sql(stray), Err(SqlError::UnknownColumn { .. })));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO menu_items (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn multiple_statements_rejected() {
        assert!(matches!(
            parse_sql("SELECT * FROM tables; SELECT * FROM tables"),
            Err(SqlError::Unsupported(_))
        ));
    }
}
