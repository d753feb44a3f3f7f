use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::TabulaAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct TabulaHandler {
    engine: Arc<Engine>,
    query_parser: Arc<TabulaQueryParser>,
}

impl TabulaHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(TabulaQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error").increment(1);
                tracing::debug!("rejected query {query:?}: {e}");
                return Err(sql_err(e));
            }
        };
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertTable { id, table } => {
                engine.create_table(id, table).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateTable { id, update } => {
                engine.update_table(id, update).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteTable { id } => {
                engine.delete_table(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectTables { filter } => {
                let tables = engine.find_tables(&filter).map_err(engine_err)?;
                Ok(vec![query_response(tables_schema(), &tables, encode_table)])
            }
            Command::InsertReservation { id, reservation } => {
                engine.create_reservation(id, reservation).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateReservation { id, update } => {
                engine.update_reservation(id, update).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteReservation { id } => {
                engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectReservations { filter } => {
                let reservations = engine.find_reservations(&filter);
                Ok(vec![query_response(reservations_schema(), &reservations, encode_reservation)])
            }
            Command::SelectAvailableTables { query, json: false } => {
                let result = engine.find_available_tables(&query).map_err(engine_err)?;
                Ok(vec![query_response(available_schema(), &result.tables, encode_available)])
            }
            Command::SelectAvailableTables { query, json: true } => {
                let result = engine.find_available_tables(&query).map_err(engine_err)?;
                let window = query.window(engine.settings().default_duration());
                let body = serde_json::to_string(&AvailabilityResponse::new(&query, &window, &result))
                    .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
                Ok(vec![query_response(json_schema(), &[body], |encoder, body| {
                    encoder.encode_field(body)
                })])
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn tables_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("table_number", Type::VARCHAR),
        text_field("capacity", Type::INT8),
        text_field("area", Type::VARCHAR),
        text_field("smoking", Type::BOOL),
        text_field("window_seat", Type::BOOL),
        text_field("wall_seat", Type::BOOL),
        text_field("vip_room", Type::BOOL),
        text_field("status", Type::VARCHAR),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("user_id", Type::VARCHAR),
        text_field("table_id", Type::VARCHAR),
        text_field("date", Type::VARCHAR),
        text_field("time", Type::VARCHAR),
        text_field("end_time", Type::VARCHAR),
        text_field("party_size", Type::INT8),
        text_field("status", Type::VARCHAR),
        text_field("confirmation_code", Type::VARCHAR),
        text_field("special_request", Type::VARCHAR),
    ]
}

fn available_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("table_number", Type::VARCHAR),
        text_field("capacity", Type::INT8),
        text_field("location", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
    ]
}

fn json_schema() -> Vec<FieldInfo> {
    vec![text_field("response", Type::VARCHAR)]
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_table(encoder: &mut DataRowEncoder, t: &Table) -> PgWireResult<()> {
    encoder.encode_field(&t.id.to_string())?;
    encoder.encode_field(&t.table_number)?;
    encoder.encode_field(&(t.capacity as i64))?;
    encoder.encode_field(&t.area.as_str())?;
    encoder.encode_field(&t.features.smoking)?;
    encoder.encode_field(&t.features.window_seat)?;
    encoder.encode_field(&t.features.wall_seat)?;
    encoder.encode_field(&t.features.vip_room)?;
    encoder.encode_field(&t.status.as_str())
}

fn encode_reservation(encoder: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.user_id.to_string())?;
    encoder.encode_field(&r.table_id.map(|id| id.to_string()))?;
    encoder.encode_field(&r.date.to_string())?;
    encoder.encode_field(&format_time(r.start))?;
    encoder.encode_field(&r.end.map(format_time))?;
    encoder.encode_field(&(r.party_size as i64))?;
    encoder.encode_field(&r.status.as_str())?;
    encoder.encode_field(&r.confirmation_code)?;
    encoder.encode_field(&r.special_request)
}

fn encode_available(encoder: &mut DataRowEncoder, t: &Table) -> PgWireResult<()> {
    encoder.encode_field(&t.id.to_string())?;
    encoder.encode_field(&t.table_number)?;
    encoder.encode_field(&(t.capacity as i64))?;
    encoder.encode_field(&t.area.as_str())?;
    encoder.encode_field(&t.status.as_str())
}

/// Result columns for a statement, judged from its text before parameters
/// are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if !upper.starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABLE_TABLES_JSON") {
        json_schema()
    } else if upper.contains("AVAILABLE_TABLES") {
        available_schema()
    } else if upper.contains("RESERVATIONS") {
        reservations_schema()
    } else if upper.contains("TABLES") {
        tables_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for TabulaHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TabulaQueryParser;

#[async_trait]
impl QueryParser for TabulaQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TabulaHandler {
    type Statement = String;
    type QueryParser = TabulaQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run(&sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// Inline bound text parameters as quoted literals in one left-to-right pass.
/// Text inside single-quoted literals is copied untouched, and each `$N`
/// is replaced once, so `$` sequences inside a bound value stay as they are.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_literal = !in_literal,
            b'$' if !in_literal => {
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let param = sql[i + 1..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| params.get(idx));
                if let Some(param) = param {
                    out.push_str(&sql[copied..i]);
                    out.push_str(&param_literal(param.as_ref().map(|p| p.as_ref())));
                    copied = end;
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    out.push_str(&sql[copied..]);
    out
}

fn param_literal(value: Option<&[u8]>) -> String {
    match value {
        Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
        None => "NULL".to_string(),
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TabulaFactory {
    handler: Arc<TabulaHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<TabulaAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TabulaFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(TabulaHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                TabulaAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TabulaFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = TabulaFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn validation_code(e: &ValidationError) -> &'static str {
    if e.is_malformed() { "22007" } else { "22023" }
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) | EngineError::DuplicateTableNumber(_) => "23505",
        EngineError::Conflict(_) => "23P01",
        EngineError::CapacityExceeded { .. } => "22023",
        EngineError::ReservationClosed(_) => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Invalid(v) => validation_code(v),
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::Invalid(v) => validation_code(v),
        SqlError::OutOfRange { .. } => "22003",
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn { .. } => "42703",
        SqlError::TooLong => "54000",
        SqlError::Parse(_)
        | SqlError::Empty
        | SqlError::Unsupported(_)
        | SqlError::WrongArity(..)
        | SqlError::MissingFilter(_) => "42601",
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}
