use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{Action, WindowPatch};
use crate::model::*;

/// Which bookings a `SELECT ... FROM bookings` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    Id(Ulid),
    Provider(Ulid),
    Client(Ulid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    DeclareWindow {
        id: Ulid,
        provider_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        state: WindowState,
        note: Option<String>,
    },
    PatchWindow {
        window_id: Ulid,
        patch: WindowPatch,
    },
    RemoveWindow {
        id: Ulid,
    },
    SelectWindows {
        provider_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    SelectAvailability {
        provider_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    RequestBooking {
        id: Ulid,
        provider_id: Ulid,
        offering_id: Ulid,
        requested_at: NaiveDateTime,
        design_id: Option<Ulid>,
        notes: Option<String>,
    },
    BookingAction {
        booking_id: Ulid,
        action: Action,
        /// Proposed datetime; only meaningful for `propose`.
        at: Option<NaiveDateTime>,
        notes: Option<String>,
        rating: Option<u8>,
    },
    SelectBookings {
        filter: BookingFilter,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "windows" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("windows", 5, values.len()));
            }
            let state = match values.get(5) {
                Some(e) => parse_text_or_null(e)?
                    .map(|s| WindowState::parse(&s).ok_or(SqlError::Parse(format!("bad window state: {s}"))))
                    .transpose()?
                    .unwrap_or(WindowState::Available),
                None => WindowState::Available,
            };
            Ok(Command::DeclareWindow {
                id: parse_ulid_expr(&values[0])?,
                provider_id: parse_ulid_expr(&values[1])?,
                date: parse_date_expr(&values[2])?,
                start: parse_time_expr(&values[3])?,
                end: parse_time_expr(&values[4])?,
                state,
                note: values.get(6).map(parse_text_or_null).transpose()?.flatten(),
            })
        }
        "window_patches" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("window_patches", 1, 0));
            }
            let state = values.get(3)
                .map(parse_text_or_null)
                .transpose()?
                .flatten()
                .map(|s| WindowState::parse(&s).ok_or(SqlError::Parse(format!("bad window state: {s}"))))
                .transpose()?;
            Ok(Command::PatchWindow {
                window_id: parse_ulid_expr(&values[0])?,
                patch: WindowPatch {
                    start: values.get(1).map(parse_time_or_null).transpose()?.flatten(),
                    end: values.get(2).map(parse_time_or_null).transpose()?.flatten(),
                    state,
                    note: values.get(4).map(parse_text_or_null).transpose()?.flatten(),
                },
            })
        }
        "bookings" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            Ok(Command::RequestBooking {
                id: parse_ulid_expr(&values[0])?,
                provider_id: parse_ulid_expr(&values[1])?,
                offering_id: parse_ulid_expr(&values[2])?,
                requested_at: parse_datetime_expr(&values[3])?,
                design_id: values.get(4).map(parse_ulid_or_null).transpose()?.flatten(),
                notes: values.get(5).map(parse_text_or_null).transpose()?.flatten(),
            })
        }
        "booking_actions" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("booking_actions", 2, values.len()));
            }
            let name = parse_text_or_null(&values[1])?.ok_or(SqlError::MissingFilter("action"))?;
            let action = Action::parse(&name).ok_or(SqlError::Parse(format!("unknown action: {name}")))?;
            let at = values.get(2).map(parse_datetime_or_null).transpose()?.flatten();
            if action == Action::ProposeAlternative && at.is_none() {
                return Err(SqlError::MissingFilter("at"));
            }
            Ok(Command::BookingAction {
                booking_id: parse_ulid_expr(&values[0])?,
                action,
                at,
                notes: values.get(3).map(parse_text_or_null).transpose()?.flatten(),
                rating: values.get(4).map(parse_u8_or_null).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "windows" => Ok(Command::RemoveWindow { id }),
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

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "windows" | "availability" => {
            let provider_id = filters.provider_id.ok_or(SqlError::MissingFilter("provider_id"))?;
            let from = filters.from.ok_or(SqlError::MissingFilter("date"))?;
            let to = filters.to.ok_or(SqlError::MissingFilter("date"))?;
            if table == "windows" {
                Ok(Command::SelectWindows { provider_id, from, to })
            } else {
                Ok(Command::SelectAvailability { provider_id, from, to })
            }
        }
        "bookings" => {
            let filter = match (filters.id, filters.provider_id, filters.client_id) {
                (Some(id), _, _) => BookingFilter::Id(id),
                (None, Some(p), _) => BookingFilter::Provider(p),
                (None, None, Some(c)) => BookingFilter::Client(c),
                (None, None, None) => return Err(SqlError::MissingFilter("id, provider_id or client_id")),
            };
            Ok(Command::SelectBookings { filter })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Debug, Default)]
struct Filters {
    id: Option<Ulid>,
    provider_id: Option<Ulid>,
    client_id: Option<Ulid>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => filters.id = Some(parse_ulid_expr(right)?),
                Some("provider_id") => filters.provider_id = Some(parse_ulid_expr(right)?),
                Some("client_id") => filters.client_id = Some(parse_ulid_expr(right)?),
                Some("date") => {
                    let date = parse_date_expr(right)?;
                    filters.from = Some(date);
                    filters.to = Some(date);
                }
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    filters.from = Some(parse_date_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    filters.to = Some(parse_date_expr(right)?);
                }
            }
            _ => {}
        },
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        _ => {}
    }
    Ok(())
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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

/// String literal (or bare number) text; `None` for NULL.
fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string or NULL, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_text(expr: &Expr, what: &'static str) -> Result<String, SqlError> {
    parse_text_or_null(expr)?.ok_or(SqlError::Parse(format!("{what} must not be NULL")))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr, "id")?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    parse_text_or_null(expr)?
        .map(|s| Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}"))))
        .transpose()
}

fn parse_date(s: &str) -> Result<NaiveDate, SqlError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_time(s: &str) -> Result<NaiveTime, SqlError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| SqlError::Parse(format!("bad time {s:?}: {e}")))
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime, SqlError> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or(SqlError::Parse(format!("bad datetime {s:?}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date(&parse_text(expr, "date")?)
}

fn parse_time_expr(expr: &Expr) -> Result<NaiveTime, SqlError> {
    parse_time(&parse_text(expr, "time")?)
}

fn parse_time_or_null(expr: &Expr) -> Result<Option<NaiveTime>, SqlError> {
    parse_text_or_null(expr)?.map(|s| parse_time(&s)).transpose()
}

fn parse_datetime_expr(expr: &Expr) -> Result<NaiveDateTime, SqlError> {
    parse_datetime(&parse_text(expr, "datetime")?)
}

fn parse_datetime_or_null(expr: &Expr) -> Result<Option<NaiveDateTime>, SqlError> {
    parse_text_or_null(expr)?.map(|s| parse_datetime(&s)).transpose()
}

fn parse_u8_or_null(expr: &Expr) -> Result<Option<u8>, SqlError> {
    parse_text_or_null(expr)?
        .map(|s| {
            s.trim()
                .parse::<u8>()
                .map_err(|e| SqlError::Parse(format!("bad rating {s:?}: {e}")))
        })
        .transpose()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn other() -> Ulid {
        Ulid::from_string(OTHER).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn parse_declare_window_defaults() {
        let sql = format!(r#"INSERT INTO windows (id, provider_id, date, start, "end") VALUES ('{ID}', '{OTHER}', '2024-06-10', '09:00', '10:00')"#);
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::DeclareWindow {
                id: id(),
                provider_id: other(),
                date: date(10),
                start: t(9, 0),
                end: t(10, 0),
                state: WindowState::Available,
                note: None,
            }
        );
    }

    #[test]
    fn parse_declare_window_with_state_and_note() {
        let sql = format!(
            r#"INSERT INTO windows (id, provider_id, date, start, "end", state, note) VALUES ('{ID}', '{OTHER}', '2024-06-10', '09:00:00', '10:30', 'blocked_manual', 'lunch')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::DeclareWindow { state, note, end, .. } => {
                assert_eq!(state, WindowState::BlockedManual);
                assert_eq!(note.as_deref(), Some("lunch"));
                assert_eq!(end, t(10, 30));
            }
            cmd => panic!("expected DeclareWindow, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_declare_window_bad_values() {
        let bad_state = format!(
            r#"INSERT INTO windows VALUES ('{ID}', '{OTHER}', '2024-06-10', '09:00', '10:00', 'maybe', NULL)"#
        );
        assert!(matches!(parse_sql(&bad_state), Err(SqlError::Parse(_))));
        let bad_date = format!(r#"INSERT INTO windows VALUES ('{ID}', '{OTHER}', '10/06/2024', '09:00', '10:00')"#);
        assert!(matches!(parse_sql(&bad_date), Err(SqlError::Parse(_))));
        let short = format!(r#"INSERT INTO windows VALUES ('{ID}', '{OTHER}', '2024-06-10')"#);
        assert!(matches!(parse_sql(&short), Err(SqlError::WrongArity("windows", 5, 3))));
    }

    #[test]
    fn parse_window_patch_nulls_mean_unchanged() {
        let sql = format!(r#"INSERT INTO window_patches (window_id, start, "end", state, note) VALUES ('{ID}', NULL, '11:00', NULL, '')"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::PatchWindow {
                window_id: id(),
                patch: WindowPatch {
                    start: None,
                    end: Some(t(11, 0)),
                    state: None,
                    note: Some(String::new()),
                },
            }
        );
    }

    #[test]
    fn parse_remove_window() {
        let sql = format!("DELETE FROM windows WHERE id = '{ID}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::RemoveWindow { id: id() });
        let sql = format!("DELETE FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_select_windows_and_availability() {
        let sql = format!("SELECT * FROM windows WHERE provider_id = '{ID}' AND date >= '2024-06-10' AND date <= '2024-06-12'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectWindows { provider_id: id(), from: date(10), to: date(12) }
        );
        let sql = format!("SELECT * FROM availability WHERE provider_id = '{ID}' AND date = '2024-06-10'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability { provider_id: id(), from: date(10), to: date(10) }
        );
    }

    #[test]
    fn parse_select_availability_requires_range() {
        let sql = format!("SELECT * FROM availability WHERE provider_id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("date"))));
        let sql = "SELECT * FROM availability WHERE date = '2024-06-10'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("provider_id"))));
    }

    #[test]
    fn parse_request_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, provider_id, offering_id, requested_at, design_id, notes) VALUES ('{ID}', '{OTHER}', '{ID}', '2024-06-10 09:00', NULL, 'short cut')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::RequestBooking {
                id: id(),
                provider_id: other(),
                offering_id: id(),
                requested_at: date(10).and_time(t(9, 0)),
                design_id: None,
                notes: Some("short cut".into()),
            }
        );
    }

    #[test]
    fn parse_request_booking_iso_datetime() {
        let sql = format!("INSERT INTO bookings VALUES ('{ID}', '{OTHER}', '{ID}', '2024-06-10T14:30:00', '{OTHER}')");
        match parse_sql(&sql).unwrap() {
            Command::RequestBooking { requested_at, design_id, notes, .. } => {
                assert_eq!(requested_at, date(10).and_time(t(14, 30)));
                assert_eq!(design_id, Some(other()));
                assert_eq!(notes, None);
            }
            cmd => panic!("expected RequestBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_booking_actions() {
        let sql = format!("INSERT INTO booking_actions (booking_id, action) VALUES ('{ID}', 'confirm')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::BookingAction { booking_id: id(), action: Action::Confirm, at: None, notes: None, rating: None }
        );

        let sql = format!("INSERT INTO booking_actions (booking_id, action, at) VALUES ('{ID}', 'propose', '2024-06-11 10:00')");
        match parse_sql(&sql).unwrap() {
            Command::BookingAction { action, at, .. } => {
                assert_eq!(action, Action::ProposeAlternative);
                assert_eq!(at, Some(date(11).and_time(t(10, 0))));
            }
            cmd => panic!("expected BookingAction, got {cmd:?}"),
        }

        let sql = format!("INSERT INTO booking_actions VALUES ('{ID}', 'complete', NULL, 'all good', 5)");
        match parse_sql(&sql).unwrap() {
            Command::BookingAction { action, notes, rating, .. } => {
                assert_eq!(action, Action::Complete);
                assert_eq!(notes.as_deref(), Some("all good"));
                assert_eq!(rating, Some(5));
            }
            cmd => panic!("expected BookingAction, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_booking_action_errors() {
        let sql = format!("INSERT INTO booking_actions VALUES ('{ID}', 'reschedule')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
        let sql = format!("INSERT INTO booking_actions VALUES ('{ID}', 'propose')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("at"))));
        let sql = format!("INSERT INTO booking_actions VALUES ('{ID}', 'complete', NULL, NULL, 300)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_bookings_filters() {
        let by_id = format!("SELECT * FROM bookings WHERE id = '{ID}'");
        assert_eq!(parse_sql(&by_id).unwrap(), Command::SelectBookings { filter: BookingFilter::Id(id()) });
        let by_provider = format!("SELECT * FROM bookings WHERE provider_id = '{ID}'");
        assert_eq!(
            parse_sql(&by_provider).unwrap(),
            Command::SelectBookings { filter: BookingFilter::Provider(id()) }
        );
        let by_client = format!("SELECT * FROM bookings WHERE client_id = '{ID}'");
        assert_eq!(
            parse_sql(&by_client).unwrap(),
            Command::SelectBookings { filter: BookingFilter::Client(id()) }
        );
        assert!(matches!(parse_sql("SELECT * FROM bookings"), Err(SqlError::MissingFilter(_))));
    }

    #[test]
    fn parse_multi_row_insert_rejected() {
        let sql = format!("INSERT INTO booking_actions VALUES ('{ID}', 'confirm'), ('{OTHER}', 'confirm')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_update_unsupported() {
        let sql = format!("UPDATE windows SET note = 'x' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
