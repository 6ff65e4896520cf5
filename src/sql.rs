use std::str::FromStr;

use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, LimitClause, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::engine::{Category, Page};
use crate::model::*;

/// Parsed command from SQL input. Every command acts on behalf of the session user.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        name: String,
        email: String,
    },
    UpdateUser {
        id: UserId,
        name: Option<String>,
        email: Option<String>,
    },
    DeleteUser {
        id: UserId,
    },
    SelectUsers {
        id: Option<UserId>,
    },
    InsertItem {
        name: String,
        description: String,
        available: bool,
        request_id: Option<RequestId>,
    },
    UpdateItem {
        id: ItemId,
        name: Option<String>,
        description: Option<String>,
        available: Option<bool>,
    },
    DeleteItem {
        id: ItemId,
    },
    SelectItem {
        id: ItemId,
    },
    SelectOwnerItems,
    SearchItems {
        text: String,
    },
    InsertBooking {
        item_id: ItemId,
        start: Ms,
        end: Ms,
    },
    DecideBooking {
        id: BookingId,
        approve: bool,
    },
    SelectBooking {
        id: BookingId,
    },
    SelectBookings {
        category: Category,
        page: Page,
    },
    SelectOwnerBookings {
        category: Category,
    },
    InsertComment {
        item_id: ItemId,
        text: String,
    },
    SelectComments {
        item_id: ItemId,
    },
    InsertRequest {
        description: String,
    },
    /// The session user's own requests, or one request by id.
    SelectRequests {
        id: Option<RequestId>,
    },
    SelectOtherRequests,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "users" => {
            let v = insert_fields(insert, "users", &["name", "email"])?;
            Ok(Command::InsertUser {
                name: required(parse_text(v[0])?, "name")?,
                email: required(parse_text(v[1])?, "email")?,
            })
        }
        "items" => {
            let answers_request = if insert.columns.is_empty() {
                values_width(insert) == 4
            } else {
                insert.columns.iter().any(|c| c.value.eq_ignore_ascii_case("request_id"))
            };
            let columns: &[&'static str] = if answers_request {
                &["name", "description", "available", "request_id"]
            } else {
                &["name", "description", "available"]
            };
            let v = insert_fields(insert, "items", columns)?;
            Ok(Command::InsertItem {
                name: required(parse_text(v[0])?, "name")?,
                description: required(parse_text(v[1])?, "description")?,
                available: required(parse_bool(v[2])?, "available")?,
                request_id: v.get(3).map(|e| parse_opt_id(e, "request_id")).transpose()?.flatten(),
            })
        }
        "requests" => {
            let v = insert_fields(insert, "requests", &["description"])?;
            Ok(Command::InsertRequest {
                description: required(parse_text(v[0])?, "description")?,
            })
        }
        "bookings" => {
            let v = insert_fields(insert, "bookings", &["item_id", "start", "end"])?;
            Ok(Command::InsertBooking {
                item_id: parse_id(v[0], "item_id")?,
                start: required(parse_i64(v[1])?, "start")?,
                end: required(parse_i64(v[2])?, "end")?,
            })
        }
        "comments" => {
            let v = insert_fields(insert, "comments", &["item_id", "text"])?;
            Ok(Command::InsertComment {
                item_id: parse_id(v[0], "item_id")?,
                text: required(parse_text(v[1])?, "text")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let filters = eq_filters(selection)?;
    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, &a.value));
    }

    match table.as_str() {
        "users" => {
            let id = parse_id(filter(&filters, "id")?, "id")?;
            let (mut name, mut email) = (None, None);
            for (column, value) in set {
                match column.as_str() {
                    "name" => name = Some(required(parse_text(value)?, "name")?),
                    "email" => email = Some(required(parse_text(value)?, "email")?),
                    other => return Err(SqlError::UnknownColumn("users", other.to_string())),
                }
            }
            Ok(Command::UpdateUser { id, name, email })
        }
        "items" => {
            let id = parse_id(filter(&filters, "id")?, "id")?;
            let (mut name, mut description, mut available) = (None, None, None);
            for (column, value) in set {
                match column.as_str() {
                    "name" => name = Some(required(parse_text(value)?, "name")?),
                    "description" => description = Some(required(parse_text(value)?, "description")?),
                    "available" => available = Some(required(parse_bool(value)?, "available")?),
                    other => return Err(SqlError::UnknownColumn("items", other.to_string())),
                }
            }
            Ok(Command::UpdateItem {
                id,
                name,
                description,
                available,
            })
        }
        "bookings" => {
            let id = parse_id(filter(&filters, "id")?, "id")?;
            let mut approve = None;
            for (column, value) in set {
                match column.as_str() {
                    "approved" => approve = Some(required(parse_bool(value)?, "approved")?),
                    other => return Err(SqlError::UnknownColumn("bookings", other.to_string())),
                }
            }
            let approve = approve.ok_or(SqlError::NullValue("approved"))?;
            Ok(Command::DecideBooking { id, approve })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = eq_filters(delete.selection.as_ref())?;
    let id = filter(&filters, "id")?;

    match table.as_str() {
        "users" => Ok(Command::DeleteUser { id: parse_id(id, "id")? }),
        "items" => Ok(Command::DeleteItem { id: parse_id(id, "id")? }),
        _ => Err(SqlError::UnknownTable(table)),
    }
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
    let filters = eq_filters(select.selection.as_ref())?;
    let lookup = |column: &str| filters.iter().find(|(c, _)| c == column).map(|(_, e)| *e);

    match table.as_str() {
        "users" => Ok(Command::SelectUsers {
            id: lookup("id").map(|e| parse_id(e, "id")).transpose()?,
        }),
        "items" => {
            if let Some(id) = lookup("id") {
                Ok(Command::SelectItem { id: parse_id(id, "id")? })
            } else if let Some(text) = lookup("text") {
                Ok(Command::SearchItems {
                    text: required(parse_text(text)?, "text")?,
                })
            } else {
                Ok(Command::SelectOwnerItems)
            }
        }
        "bookings" => {
            if let Some(id) = lookup("id") {
                return Ok(Command::SelectBooking { id: parse_id(id, "id")? });
            }
            Ok(Command::SelectBookings {
                category: parse_category(lookup("state"))?,
                page: parse_page(query)?,
            })
        }
        "owner_bookings" => Ok(Command::SelectOwnerBookings {
            category: parse_category(lookup("state"))?,
        }),
        "comments" => Ok(Command::SelectComments {
            item_id: parse_id(filter(&filters, "item_id")?, "item_id")?,
        }),
        "requests" => Ok(Command::SelectRequests {
            id: lookup("id").map(|e| parse_id(e, "id")).transpose()?,
        }),
        "all_requests" => Ok(Command::SelectOtherRequests),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `state` filter; absent means `ALL`, explicit NULL is a caller error.
fn parse_category(expr: Option<&Expr>) -> Result<Category, SqlError> {
    let Some(expr) = expr else {
        return Ok(Category::All);
    };
    let text = required(parse_text(expr)?, "state")?;
    text.parse()
        .map_err(|e: crate::engine::UnknownCategory| SqlError::InvalidValue(e.to_string()))
}

fn parse_page(query: &ast::Query) -> Result<Page, SqlError> {
    let (limit, offset) = match &query.limit_clause {
        None => (None, None),
        Some(LimitClause::LimitOffset { limit, offset, .. }) => (limit.as_ref(), offset.as_ref().map(|o| &o.value)),
        Some(LimitClause::OffsetCommaLimit { offset, limit }) => (Some(limit), Some(offset)),
    };
    let mut page = Page::default();
    if let Some(limit) = limit {
        page.size = non_negative(required(parse_i64(limit)?, "limit")?, "LIMIT")?;
    }
    if let Some(offset) = offset {
        page.from = non_negative(required(parse_i64(offset)?, "offset")?, "OFFSET")?;
    }
    Ok(page)
}

fn non_negative(v: i64, what: &str) -> Result<usize, SqlError> {
    usize::try_from(v).map_err(|_| SqlError::InvalidValue(format!("{what} must not be negative, got {v}")))
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

/// Number of values in the first VALUES row, 0 when there is none.
fn values_width(insert: &ast::Insert) -> usize {
    match insert.source.as_ref().map(|q| q.body.as_ref()) {
        Some(SetExpr::Values(values)) => values.rows.first().map_or(0, Vec::len),
        _ => 0,
    }
}

/// The single VALUES row of an INSERT, reordered to `columns`. Without a
/// column list the values are taken positionally.
fn insert_fields<'a>(
    insert: &'a ast::Insert,
    table: &'static str,
    columns: &[&'static str],
) -> Result<Vec<&'a Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let values = match rows.as_slice() {
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        [row] => row,
        _ => return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}"))),
    };
    if values.len() != columns.len() {
        return Err(SqlError::WrongArity(table, columns.len(), values.len()));
    }
    if insert.columns.is_empty() {
        return Ok(values.iter().collect());
    }

    let named: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    if let Some(extra) = named.iter().find(|n| !columns.contains(&n.as_str())) {
        return Err(SqlError::UnknownColumn(table, extra.clone()));
    }
    columns
        .iter()
        .map(|&col| {
            named
                .iter()
                .position(|n| n == col)
                .map(|i| &values[i])
                .ok_or(SqlError::MissingColumn(table, col))
        })
        .collect()
}

/// Flatten `a = x AND b = y` into `[(a, x), (b, y)]`.
fn eq_filters(selection: Option<&Expr>) -> Result<Vec<(String, &Expr)>, SqlError> {
    fn walk<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => walk(inner, out),
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                walk(left, out)?;
                walk(right, out)
            }
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::Eq,
                right,
            } => {
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((column, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk(expr, &mut out)?;
    }
    Ok(out)
}

fn filter<'a>(filters: &[(String, &'a Expr)], column: &'static str) -> Result<&'a Expr, SqlError> {
    filters
        .iter()
        .find(|(c, _)| c == column)
        .map(|(_, e)| *e)
        .ok_or(SqlError::MissingFilter(column))
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

fn required<T>(value: Option<T>, column: &'static str) -> Result<T, SqlError> {
    value.ok_or(SqlError::NullValue(column))
}

/// String-ish literal; `NULL` is `None`.
fn parse_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_id<T>(expr: &Expr, column: &'static str) -> Result<T, SqlError>
where
    T: FromStr<Err = ulid::DecodeError>,
{
    required(parse_opt_id(expr, column)?, column)
}

/// Like [`parse_id`], but `NULL` is `None`.
fn parse_opt_id<T>(expr: &Expr, column: &'static str) -> Result<Option<T>, SqlError>
where
    T: FromStr<Err = ulid::DecodeError>,
{
    parse_text(expr)?
        .map(|text| {
            text.parse()
                .map_err(|e| SqlError::InvalidValue(format!("bad {column} '{text}': {e}")))
        })
        .transpose()
}

fn parse_i64(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(parse_i64(expr)?.map(|v| -v));
    }
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map(Some)
            .map_err(|e| SqlError::Parse(format!("bad i64 '{s}': {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<Option<bool>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::Boolean(b)) => Ok(Some(*b)),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Some(true)),
            "false" | "f" | "0" => Ok(Some(false)),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(Some(n != "0")),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    /// A required value was given as NULL.
    NullValue(&'static str),
    /// Well-typed but not an acceptable value (bad id, unknown state, negative offset).
    InvalidValue(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::NullValue(col) => write!(f, "{col} must not be null"),
            SqlError::InvalidValue(s) => f.write_str(s),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn id<T: FromStr<Err = ulid::DecodeError>>() -> T {
        ID.parse().unwrap()
    }

    #[test]
    fn parse_insert_user() {
        let cmd = parse_sql("INSERT INTO users (name, email) VALUES ('Ann', 'ann@example.com')").unwrap();
        assert_eq!(
            cmd,
            Command::InsertUser {
                name: "Ann".into(),
                email: "ann@example.com".into()
            }
        );
    }

    #[test]
    fn insert_columns_may_be_reordered() {
        let cmd = parse_sql("INSERT INTO users (email, name) VALUES ('ann@example.com', 'Ann')").unwrap();
        assert_eq!(
            cmd,
            Command::InsertUser {
                name: "Ann".into(),
                email: "ann@example.com".into()
            }
        );
    }

    #[test]
    fn parse_insert_item() {
        let cmd = parse_sql("INSERT INTO items (name, description, available) VALUES ('Drill', 'cordless', true)")
            .unwrap();
        assert_eq!(
            cmd,
            Command::InsertItem {
                name: "Drill".into(),
                description: "cordless".into(),
                available: true,
                request_id: None,
            }
        );
    }

    #[test]
    fn insert_item_may_answer_a_request() {
        let named = format!(
            "INSERT INTO items (name, description, available, request_id) VALUES ('Ladder', '3m', true, '{ID}')"
        );
        let positional = format!("INSERT INTO items VALUES ('Ladder', '3m', true, '{ID}')");
        for sql in [named, positional] {
            assert_eq!(
                parse_sql(&sql).unwrap(),
                Command::InsertItem {
                    name: "Ladder".into(),
                    description: "3m".into(),
                    available: true,
                    request_id: Some(id()),
                }
            );
        }
        let null = "INSERT INTO items (name, description, available, request_id) VALUES ('Ladder', '3m', true, NULL)";
        assert!(matches!(
            parse_sql(null).unwrap(),
            Command::InsertItem { request_id: None, .. }
        ));
        assert!(matches!(
            parse_sql("INSERT INTO items VALUES ('Ladder', '3m', true, 'nope')"),
            Err(SqlError::InvalidValue(_))
        ));
    }

    #[test]
    fn parse_request_commands() {
        assert_eq!(
            parse_sql("INSERT INTO requests (description) VALUES ('a tall ladder')").unwrap(),
            Command::InsertRequest {
                description: "a tall ladder".into()
            }
        );
        assert_eq!(
            parse_sql("INSERT INTO requests (description) VALUES (NULL)"),
            Err(SqlError::NullValue("description"))
        );
        assert_eq!(
            parse_sql("SELECT * FROM requests").unwrap(),
            Command::SelectRequests { id: None }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM requests WHERE id = '{ID}'")).unwrap(),
            Command::SelectRequests { id: Some(id()) }
        );
        assert_eq!(
            parse_sql("SELECT * FROM all_requests").unwrap(),
            Command::SelectOtherRequests
        );
    }

    #[test]
    fn parse_insert_booking() {
        let sql = format!("INSERT INTO bookings (item_id, start, \"end\") VALUES ('{ID}', 1000, 2000)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking {
                item_id: id(),
                start: 1000,
                end: 2000
            }
        );
    }

    #[test]
    fn insert_booking_without_column_list_is_positional() {
        let sql = format!("INSERT INTO bookings VALUES ('{ID}', '1000', '2000')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking {
                item_id: id(),
                start: 1000,
                end: 2000
            }
        );
    }

    #[test]
    fn null_booking_bounds_are_caller_errors() {
        let sql = format!("INSERT INTO bookings (item_id, start, \"end\") VALUES ('{ID}', NULL, 2000)");
        assert_eq!(parse_sql(&sql), Err(SqlError::NullValue("start")));
    }

    #[test]
    fn parse_insert_comment() {
        let sql = format!("INSERT INTO comments (item_id, text) VALUES ('{ID}', 'worked well')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertComment {
                item_id: id(),
                text: "worked well".into()
            }
        );
    }

    #[test]
    fn insert_arity_and_columns_checked() {
        assert_eq!(
            parse_sql("INSERT INTO users (name) VALUES ('Ann')"),
            Err(SqlError::WrongArity("users", 2, 1))
        );
        assert_eq!(
            parse_sql("INSERT INTO users (name, phone) VALUES ('Ann', '123')"),
            Err(SqlError::UnknownColumn("users", "phone".into()))
        );
    }

    #[test]
    fn parse_decide_booking() {
        let sql = format!("UPDATE bookings SET approved = true WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DecideBooking {
                id: id(),
                approve: true
            }
        );
        let sql = format!("UPDATE bookings SET approved = 'false' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DecideBooking {
                id: id(),
                approve: false
            }
        );
    }

    #[test]
    fn null_approval_is_a_caller_error() {
        let sql = format!("UPDATE bookings SET approved = NULL WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql), Err(SqlError::NullValue("approved")));
    }

    #[test]
    fn decide_without_id_is_rejected() {
        assert_eq!(
            parse_sql("UPDATE bookings SET approved = true"),
            Err(SqlError::MissingFilter("id"))
        );
    }

    #[test]
    fn parse_partial_item_update() {
        let sql = format!("UPDATE items SET available = false WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateItem {
                id: id(),
                name: None,
                description: None,
                available: Some(false)
            }
        );
    }

    #[test]
    fn parse_user_update_and_delete() {
        let sql = format!("UPDATE users SET name = 'Annie', email = 'a@b.c' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateUser {
                id: id(),
                name: Some("Annie".into()),
                email: Some("a@b.c".into())
            }
        );
        let sql = format!("DELETE FROM users WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteUser { id: id() });
        let sql = format!("DELETE FROM items WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteItem { id: id() });
    }

    #[test]
    fn bookings_listing_defaults() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings {
                category: Category::All,
                page: Page::default()
            }
        );
    }

    #[test]
    fn bookings_listing_with_state_limit_offset() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE state = 'past' LIMIT 5 OFFSET 20").unwrap(),
            Command::SelectBookings {
                category: Category::Past,
                page: Page { from: 20, size: 5 }
            }
        );
    }

    #[test]
    fn unknown_state_reports_the_text() {
        let err = parse_sql("SELECT * FROM bookings WHERE state = 'UNSUPPORTED_STATUS'").unwrap_err();
        assert_eq!(err, SqlError::InvalidValue("Unknown state: UNSUPPORTED_STATUS".into()));
        assert_eq!(err.to_string(), "Unknown state: UNSUPPORTED_STATUS");
        assert_eq!(
            parse_sql("SELECT * FROM owner_bookings WHERE state = NULL"),
            Err(SqlError::NullValue("state"))
        );
    }

    #[test]
    fn negative_offset_rejected() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings LIMIT 5 OFFSET -1"),
            Err(SqlError::InvalidValue(_))
        ));
    }

    #[test]
    fn parse_selects() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE id = '{ID}'")).unwrap(),
            Command::SelectBooking { id: id() }
        );
        assert_eq!(
            parse_sql("SELECT * FROM owner_bookings WHERE state = 'waiting'").unwrap(),
            Command::SelectOwnerBookings {
                category: Category::Waiting
            }
        );
        assert_eq!(parse_sql("SELECT * FROM items").unwrap(), Command::SelectOwnerItems);
        assert_eq!(
            parse_sql(&format!("SELECT * FROM items WHERE id = '{ID}'")).unwrap(),
            Command::SelectItem { id: id() }
        );
        assert_eq!(
            parse_sql("SELECT * FROM items WHERE text = 'drill'").unwrap(),
            Command::SearchItems { text: "drill".into() }
        );
        assert_eq!(
            parse_sql("SELECT * FROM users").unwrap(),
            Command::SelectUsers { id: None }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM comments WHERE item_id = '{ID}'")).unwrap(),
            Command::SelectComments { item_id: id() }
        );
        assert_eq!(
            parse_sql("SELECT * FROM comments"),
            Err(SqlError::MissingFilter("item_id"))
        );
    }

    #[test]
    fn malformed_id_is_invalid_value() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE id = 'nope'"),
            Err(SqlError::InvalidValue(_))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert_eq!(
            parse_sql("SELECT * FROM foobar"),
            Err(SqlError::UnknownTable("foobar".into()))
        );
        let sql = format!("DELETE FROM bookings WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql), Err(SqlError::UnknownTable("bookings".into())));
    }

    #[test]
    fn parse_empty_errors() {
        assert_eq!(parse_sql(""), Err(SqlError::Empty));
    }
}
