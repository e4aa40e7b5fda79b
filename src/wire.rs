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

use crate::auth::{GatewayAuthSource, bad_actor, parse_actor};
use crate::engine::{Action, EngineError, NewBooking};
use crate::gateway::{ProviderResponse, Resolution, ScheduleGateway};
use crate::model::*;
use crate::observability;
use crate::sql::{self, BookingFilter, Command, SqlError};

pub struct SlotdHandler {
    gateway: ScheduleGateway,
    query_parser: Arc<SlotdQueryParser>,
}

impl SlotdHandler {
    pub fn new(gateway: ScheduleGateway) -> Self {
        Self {
            gateway,
            query_parser: Arc::new(SlotdQueryParser),
        }
    }

    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        let user = client.metadata().get("user").cloned().unwrap_or_default();
        parse_actor(&user).ok_or_else(|| bad_actor(&user))
    }

    async fn run(&self, actor: &Actor, query: &str) -> PgWireResult<Vec<Response>> {
        let started = Instant::now();
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = observability::command_label(&cmd);
        let result = self.execute_command(actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, actor: &Actor, cmd: Command) -> PgWireResult<Vec<Response>> {
        let gw = &self.gateway;
        match cmd {
            Command::DeclareWindow { id, provider_id, date, start, end, state, note } => {
                gw.declare_window(actor, id, provider_id, date, start, end, state, note)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::PatchWindow { window_id, patch } => {
                gw.update_window(actor, window_id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RemoveWindow { id } => {
                gw.remove_window(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectWindows { provider_id, from, to } => {
                let windows = gw.list_windows(provider_id, from, to).await.map_err(engine_err)?;
                Ok(vec![Response::Query(window_rows(windows))])
            }
            Command::SelectAvailability { provider_id, from, to } => {
                let windows = gw.get_availability(provider_id, from, to).await.map_err(engine_err)?;
                Ok(vec![Response::Query(window_rows(windows))])
            }
            Command::RequestBooking { id, provider_id, offering_id, requested_at, design_id, notes } => {
                let req = NewBooking { id, provider_id, offering_id, requested_at, design_id, notes };
                gw.request_booking(actor, req).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::BookingAction { booking_id, action, at, notes, rating } => {
                match action {
                    Action::Confirm => gw.respond_to_booking(actor, booking_id, ProviderResponse::Confirm).await,
                    Action::ProposeAlternative => {
                        let at = at.ok_or_else(|| sql_err(SqlError::MissingFilter("at")))?;
                        gw.respond_to_booking(actor, booking_id, ProviderResponse::ProposeAlternative(at)).await
                    }
                    Action::Decline => {
                        gw.respond_to_booking(actor, booking_id, ProviderResponse::Decline(notes)).await
                    }
                    Action::AcceptAlternative => {
                        gw.resolve_booking(actor, booking_id, Resolution::AcceptAlternative).await
                    }
                    Action::Cancel => gw.resolve_booking(actor, booking_id, Resolution::Cancel).await,
                    Action::Complete => {
                        gw.resolve_booking(actor, booking_id, Resolution::Complete { notes, rating }).await
                    }
                    Action::Timeout => gw.resolve_booking(actor, booking_id, Resolution::Timeout).await,
                }
                .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectBookings { filter } => {
                let bookings = match filter {
                    BookingFilter::Id(id) => gw.get_booking(actor, id).await.map(|b| vec![b]),
                    BookingFilter::Provider(p) => gw.list_bookings_for_provider(actor, p).await,
                    BookingFilter::Client(c) => gw.list_bookings_for_client(actor, c).await,
                }
                .map_err(engine_err)?;
                Ok(vec![Response::Query(booking_rows(bookings))])
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn window_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("provider_id"),
        text_field("date"),
        text_field("start"),
        text_field("end"),
        text_field("state"),
        text_field("note"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("client_id"),
        text_field("provider_id"),
        text_field("offering_id"),
        text_field("design_id"),
        text_field("requested_at"),
        text_field("proposed_at"),
        text_field("confirmed_at"),
        text_field("responded_at"),
        text_field("status"),
        FieldInfo::new("price".into(), None, None, Type::INT8, FieldFormat::Text),
        text_field("client_notes"),
        text_field("provider_notes"),
        FieldInfo::new("rating".into(), None, None, Type::INT4, FieldFormat::Text),
        text_field("completed_at"),
        text_field("completed_by"),
        text_field("created_at"),
    ]
}

fn fmt_time(t: chrono::NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn fmt_datetime(dt: chrono::NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

fn window_rows(windows: Vec<AvailabilityWindow>) -> QueryResponse {
    let schema = Arc::new(window_schema());
    let rows: Vec<PgWireResult<_>> = windows
        .into_iter()
        .map(|w| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&w.id.to_string())?;
            encoder.encode_field(&w.provider_id.to_string())?;
            encoder.encode_field(&w.date.to_string())?;
            encoder.encode_field(&fmt_time(w.range.start))?;
            encoder.encode_field(&fmt_time(w.range.end))?;
            encoder.encode_field(&w.state.as_str())?;
            encoder.encode_field(&w.note)?;
            Ok(encoder.take_row())
        })
        .collect();
    QueryResponse::new(schema, stream::iter(rows))
}

fn booking_rows(bookings: Vec<Booking>) -> QueryResponse {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.client_id.to_string())?;
            encoder.encode_field(&b.provider_id.to_string())?;
            encoder.encode_field(&b.offering_id.to_string())?;
            encoder.encode_field(&b.design_id.map(|d| d.to_string()))?;
            encoder.encode_field(&fmt_datetime(b.requested_at))?;
            encoder.encode_field(&b.proposed_at.map(fmt_datetime))?;
            encoder.encode_field(&b.confirmed_at.map(fmt_datetime))?;
            encoder.encode_field(&b.responded_at.map(fmt_datetime))?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&(b.price as i64))?;
            encoder.encode_field(&b.client_notes)?;
            encoder.encode_field(&b.provider_notes)?;
            encoder.encode_field(&b.rating.map(i32::from))?;
            encoder.encode_field(&b.completed_at.map(fmt_datetime))?;
            encoder.encode_field(&b.completed_by.map(|a| a.to_string()))?;
            encoder.encode_field(&fmt_datetime(b.created_at))?;
            Ok(encoder.take_row())
        })
        .collect();
    QueryResponse::new(schema, stream::iter(rows))
}

/// Result columns a statement will produce, judged from its text.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("BOOKINGS") {
        booking_schema()
    } else if upper.contains("WINDOWS") || upper.contains("AVAILABILITY") {
        window_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.resolve_actor(client)?;
        self.run(&actor, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotdQueryParser;

#[async_trait]
impl QueryParser for SlotdQueryParser {
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
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotdHandler {
    type Statement = String;
    type QueryParser = SlotdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.resolve_actor(client)?;
        let sql = substitute_params(portal);
        let mut responses = self.run(&actor, &sql).await?;
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
        Ok(DescribeStatementResponse::new(param_types, schema_for(&target.statement)))
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
        Ok(DescribePortalResponse::new(schema_for(&target.statement.statement)))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    max = max.max(n);
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

/// Splice parameters in one left-to-right pass over the statement text, so
/// `$n` inside a bound value is never read as a placeholder.
fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let mut end = i + 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let param = sql[i + 1..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|n| params.get(n));
        if let Some(param) = param {
            out.push_str(&sql[copied..i]);
            match param {
                Some(text) => {
                    out.push('\'');
                    out.push_str(&text.replace('\'', "''"));
                    out.push('\'');
                }
                None => out.push_str("NULL"),
            }
            copied = end;
        }
        i = end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotdFactory {
    handler: Arc<SlotdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<GatewayAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotdFactory {
    pub fn new(gateway: ScheduleGateway, password: String) -> Self {
        let auth_source = GatewayAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotdHandler::new(gateway)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotdFactory {
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
    gateway: ScheduleGateway,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = SlotdFactory::new(gateway, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// SQLSTATE for an engine error: rule violations are raised exceptions,
/// WAL failures are system I/O errors.
fn sqlstate(e: &EngineError) -> &'static str {
    if e.is_business() { "P0001" } else { "58030" }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
