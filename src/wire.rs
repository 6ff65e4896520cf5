use std::fmt::Debug;
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
use serde::Serialize;
use tokio::net::TcpStream;

use crate::auth::{identity_error, ItemShareAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct ItemShareHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ItemShareQueryParser>,
}

impl ItemShareHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ItemShareQueryParser),
        }
    }

    /// The login user name is the acting user id. It was already checked at
    /// startup, so a failure here means the client skipped authentication.
    fn session_user<C: ClientInfo>(&self, client: &C) -> PgWireResult<UserId> {
        let raw = client
            .metadata()
            .get("user")
            .ok_or_else(|| identity_error("no user in session"))?;
        raw.parse()
            .map_err(|e| identity_error(&format!("login user '{raw}' is not a valid user id: {e}")))
    }

    async fn run(&self, actor: UserId, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let command = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => command)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => command, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, actor: UserId, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertUser { name, email } => {
                let user = engine.register_user(actor, &name, &email).await.map_err(engine_err)?;
                user_rows([user])
            }
            Command::UpdateUser { id, name, email } => {
                let user = engine
                    .update_user(actor, id, name.as_deref(), email.as_deref())
                    .await
                    .map_err(engine_err)?;
                user_rows([user])
            }
            Command::DeleteUser { id } => {
                engine.remove_user(actor, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectUsers { id: Some(id) } => user_rows([engine.get_user(id).map_err(engine_err)?]),
            Command::SelectUsers { id: None } => user_rows(engine.list_users()),
            Command::InsertItem {
                name,
                description,
                available,
                request_id,
            } => {
                let item = engine
                    .list_item(actor, &name, &description, available, request_id)
                    .await
                    .map_err(engine_err)?;
                item_rows([bare_detail(item)])
            }
            Command::UpdateItem {
                id,
                name,
                description,
                available,
            } => {
                let item = engine
                    .update_item(actor, id, name.as_deref(), description.as_deref(), available)
                    .await
                    .map_err(engine_err)?;
                item_rows([bare_detail(item)])
            }
            Command::DeleteItem { id } => {
                engine.remove_item(actor, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectItem { id } => item_rows([engine.item_detail(actor, id).await.map_err(engine_err)?]),
            Command::SelectOwnerItems => item_rows(engine.list_owner_items(actor).await),
            Command::SearchItems { text } => {
                let found = engine.search_items(&text).map_err(engine_err)?;
                item_rows(found.into_iter().map(bare_detail))
            }
            Command::InsertBooking { item_id, start, end } => {
                let view = engine
                    .create_booking(actor, item_id, start, end)
                    .await
                    .map_err(engine_err)?;
                booking_rows([view])
            }
            Command::DecideBooking { id, approve } => {
                let view = engine.decide_booking(actor, id, approve).await.map_err(engine_err)?;
                booking_rows([view])
            }
            Command::SelectBooking { id } => booking_rows([engine.get_booking(actor, id).await.map_err(engine_err)?]),
            Command::SelectBookings { category, page } => booking_rows(
                engine
                    .list_booker_bookings(actor, category, page)
                    .await
                    .map_err(engine_err)?,
            ),
            Command::SelectOwnerBookings { category } => booking_rows(
                engine
                    .list_owner_bookings(actor, category)
                    .await
                    .map_err(engine_err)?,
            ),
            Command::InsertComment { item_id, text } => {
                let comment = engine.post_comment(actor, item_id, &text).await.map_err(engine_err)?;
                comment_rows([comment])
            }
            Command::SelectComments { item_id } => comment_rows(engine.list_comments(item_id).map_err(engine_err)?),
            Command::InsertRequest { description } => {
                let request = engine.post_request(actor, &description).await.map_err(engine_err)?;
                request_rows([(request, None)])
            }
            Command::SelectRequests { id: Some(id) } => {
                let view = engine.get_request(id).map_err(engine_err)?;
                request_rows([(view.request, Some(view.items))])
            }
            Command::SelectRequests { id: None } => request_rows(
                engine
                    .list_own_requests(actor)
                    .into_iter()
                    .map(|view| (view.request, Some(view.items))),
            ),
            Command::SelectOtherRequests => {
                request_rows(engine.list_other_requests(actor).into_iter().map(|r| (r, None)))
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn users_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("name"), text_field("email")]
}

fn items_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("owner_id"),
        text_field("name"),
        text_field("description"),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
        text_field("last_booking_id"),
        text_field("last_booker_id"),
        int_field("last_start"),
        int_field("last_end"),
        text_field("next_booking_id"),
        text_field("next_booker_id"),
        int_field("next_start"),
        int_field("next_end"),
        text_field("comments"),
        text_field("request_id"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("item_id"),
        text_field("item_name"),
        text_field("booker_id"),
        int_field("start"),
        int_field("end"),
        text_field("status"),
    ]
}

fn comments_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("item_id"),
        text_field("author_id"),
        text_field("author_name"),
        text_field("text"),
        int_field("created"),
    ]
}

fn requests_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("requester_id"),
        text_field("description"),
        int_field("created"),
        text_field("items"),
    ]
}

fn json_field<T: Serialize>(value: &T, what: &str) -> PgWireResult<String> {
    serde_json::to_string(value).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "XX000".into(),
            format!("encoding {what}: {e}"),
        )))
    })
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    values: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = values
        .into_iter()
        .map(|value| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, value)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn user_rows(users: impl IntoIterator<Item = User>) -> PgWireResult<Response> {
    query_response(users_schema(), users, |enc, user| {
        enc.encode_field(&user.id.to_string())?;
        enc.encode_field(&user.name)?;
        enc.encode_field(&user.email)
    })
}

fn bare_detail(item: Item) -> ItemDetail {
    ItemDetail {
        item,
        last: None,
        next: None,
        comments: Vec::new(),
    }
}

fn encode_short(enc: &mut DataRowEncoder, short: Option<BookingShort>) -> PgWireResult<()> {
    enc.encode_field(&short.map(|b| b.id.to_string()))?;
    enc.encode_field(&short.map(|b| b.booker.to_string()))?;
    enc.encode_field(&short.map(|b| b.start))?;
    enc.encode_field(&short.map(|b| b.end))
}

fn item_rows(details: impl IntoIterator<Item = ItemDetail>) -> PgWireResult<Response> {
    query_response(items_schema(), details, |enc, detail| {
        let comments = json_field(&detail.comments, "comments")?;
        let item = &detail.item;
        enc.encode_field(&item.id.to_string())?;
        enc.encode_field(&item.owner.to_string())?;
        enc.encode_field(&item.name)?;
        enc.encode_field(&item.description)?;
        enc.encode_field(&item.available)?;
        encode_short(enc, detail.last)?;
        encode_short(enc, detail.next)?;
        enc.encode_field(&comments)?;
        enc.encode_field(&item.request.map(|r| r.to_string()))
    })
}

fn booking_rows(views: impl IntoIterator<Item = BookingView>) -> PgWireResult<Response> {
    query_response(bookings_schema(), views, |enc, view| {
        enc.encode_field(&view.id.to_string())?;
        enc.encode_field(&view.item.id.to_string())?;
        enc.encode_field(&view.item.name)?;
        enc.encode_field(&view.booker.id.to_string())?;
        enc.encode_field(&view.start)?;
        enc.encode_field(&view.end)?;
        enc.encode_field(&view.status.to_string())
    })
}

fn comment_rows(comments: impl IntoIterator<Item = Comment>) -> PgWireResult<Response> {
    query_response(comments_schema(), comments, |enc, c| {
        enc.encode_field(&c.id.to_string())?;
        enc.encode_field(&c.item.to_string())?;
        enc.encode_field(&c.author.to_string())?;
        enc.encode_field(&c.author_name)?;
        enc.encode_field(&c.text)?;
        enc.encode_field(&c.created)
    })
}

/// A request row. `items` is `None` where answers are not shown, which
/// encodes as NULL rather than an empty list.
fn request_rows(
    requests: impl IntoIterator<Item = (ItemRequest, Option<Vec<RequestItem>>)>,
) -> PgWireResult<Response> {
    query_response(requests_schema(), requests, |enc, (request, items)| {
        let items = items.map(|i| json_field(&i, "request items")).transpose()?;
        enc.encode_field(&request.id.to_string())?;
        enc.encode_field(&request.requester.to_string())?;
        enc.encode_field(&request.description)?;
        enc.encode_field(&request.created)?;
        enc.encode_field(&items)
    })
}

/// Result columns for a statement, decided from the table it names. Used by
/// Describe, where parameters are not bound yet.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.trim_start().starts_with("DELETE") {
        return vec![];
    }
    let mentions = |table: &str| {
        upper
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .any(|word| word == table)
    };
    if mentions("BOOKINGS") || mentions("OWNER_BOOKINGS") {
        bookings_schema()
    } else if mentions("COMMENTS") {
        comments_schema()
    } else if mentions("REQUESTS") || mentions("ALL_REQUESTS") {
        requests_schema()
    } else if mentions("ITEMS") {
        items_schema()
    } else if mentions("USERS") {
        users_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for ItemShareHandler {
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
        let actor = self.session_user(client)?;
        Ok(vec![self.run(actor, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ItemShareQueryParser;

#[async_trait]
impl QueryParser for ItemShareQueryParser {
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
impl ExtendedQueryHandler for ItemShareHandler {
    type Statement = String;
    type QueryParser = ItemShareQueryParser;

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
        let actor = self.session_user(client)?;
        let sql = substitute_params(portal);
        self.run(actor, &sql).await
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
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// A statement split into verbatim text and `$n` placeholders.
#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Param(usize),
}

/// Single pass over `sql`. Quoted literals and quoted identifiers are copied
/// as text, so a `$1` inside them is never a placeholder.
fn segments(sql: &str) -> Vec<Segment<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let (mut i, mut text_start) = (0, 0);
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let digits = bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
                let end = i + 1 + digits;
                if let Ok(n) = sql[i + 1..end].parse::<usize>()
                    && n > 0
                {
                    if text_start < i {
                        out.push(Segment::Text(&sql[text_start..i]));
                    }
                    out.push(Segment::Param(n));
                    text_start = end;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    if text_start < bytes.len() {
        out.push(Segment::Text(&sql[text_start..]));
    }
    out
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    segments(sql)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Param(n) => Some(n),
            Segment::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Inline bound text parameters as quoted literals; NULL stays NULL. Bound
/// values are never rescanned, and a placeholder with no bound value is left
/// as written.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for segment in segments(sql) {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Param(n) => match params.get(n - 1) {
                Some(Some(bytes)) => {
                    out.push('\'');
                    out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => {
                    out.push('$');
                    out.push_str(&n.to_string());
                }
            },
        }
    }
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ItemShareFactory {
    handler: Arc<ItemShareHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ItemShareAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ItemShareFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(ItemShareHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                ItemShareAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ItemShareFactory {
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
) -> std::io::Result<()> {
    let factory = Arc::new(ItemShareFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(..) => "P0002",
        EngineError::Validation(_) => "22023",
        EngineError::Conflict(_) => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::NullValue(_) => "22004",
        SqlError::InvalidValue(_) => "22023",
        _ => "42601",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}
