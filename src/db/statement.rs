//! Parameterized statements and row decoding.
//!
//! Values are never interpolated into statement text. Every parameter is
//! bound positionally against a `?N` placeholder (1-indexed).

use base64::Engine;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, TypeInfo, ValueRef};

use crate::db::{DbError, DbResult};

/// One decoded row: column name to value, in result column order.
pub type Row = IndexMap<String, JsonValue>;

/// Rows returned by one statement, in the order the engine produced them.
pub type RowSet = Vec<Row>;

/// Immutable pair of statement text and its ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<JsonValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<JsonValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[JsonValue] {
        &self.params
    }

    /// Whether running this text would begin, end or nest a transaction.
    ///
    /// Every `;`-separated statement is judged by its leading keyword.
    /// Quoted text, comments and trigger bodies are skipped.
    pub fn controls_transaction(&self) -> bool {
        let mut trigger = TriggerScan::Outside;
        let mut leading = true;
        for token in tokens(&self.sql) {
            let word = match token {
                Token::Separator => {
                    if trigger != TriggerScan::Body {
                        trigger = TriggerScan::Outside;
                    }
                    leading = true;
                    continue;
                }
                Token::Other => {
                    leading = false;
                    continue;
                }
                Token::Word(word) => word,
            };
            let is = |keyword: &str| word.eq_ignore_ascii_case(keyword);
            match trigger {
                TriggerScan::Outside if leading => {
                    if TRANSACTION_CONTROL.iter().any(|keyword| is(*keyword)) {
                        return true;
                    }
                    if is("CREATE") {
                        trigger = TriggerScan::Create;
                    }
                }
                TriggerScan::Create if is("TRIGGER") => trigger = TriggerScan::Header,
                TriggerScan::Header if is("BEGIN") => trigger = TriggerScan::Body,
                TriggerScan::Body if leading && is("END") => trigger = TriggerScan::Outside,
                _ => {}
            }
            leading = false;
        }
        false
    }

    /// Build the sqlx query with every parameter bound in order.
    pub(crate) fn query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        let mut q = sqlx::query(&self.sql);
        for value in &self.params {
            q = bind_value(q, value);
        }
        q
    }
}

/// `?1, ?2, ... ?n`
pub fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bind a JSON value to the next positional parameter.
pub(crate) fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q JsonValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        JsonValue::Null => query.bind(None::<String>),
        JsonValue::Bool(b) => query.bind(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => query.bind(s.as_str()),
        // Nested structures are stored as JSON text
        other => query.bind(other.to_string()),
    }
}

/// Decode every column of a row into JSON, keeping column order.
pub(crate) fn decode_row(row: &SqliteRow) -> DbResult<Row> {
    let mut decoded = IndexMap::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        decoded.insert(column.name().to_string(), decode_column(row, i)?);
    }
    Ok(decoded)
}

fn decode_column(row: &SqliteRow, index: usize) -> DbResult<JsonValue> {
    let raw = row.try_get_raw(index).map_err(decode_error)?;
    if raw.is_null() {
        return Ok(JsonValue::Null);
    }

    // SQLite values carry their storage class, which is what type_info reports here
    let value = match raw.type_info().name() {
        "INTEGER" | "INT8" | "BIGINT" | "INT" => {
            JsonValue::from(row.try_get::<i64, _>(index).map_err(decode_error)?)
        }
        "BOOLEAN" => JsonValue::from(row.try_get::<bool, _>(index).map_err(decode_error)?),
        "REAL" | "NUMERIC" => {
            let f = row.try_get::<f64, _>(index).map_err(decode_error)?;
            serde_json::Number::from_f64(f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null)
        }
        "BLOB" => {
            let bytes = row.try_get::<Vec<u8>, _>(index).map_err(decode_error)?;
            JsonValue::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        _ => JsonValue::String(row.try_get::<String, _>(index).map_err(decode_error)?),
    };
    Ok(value)
}

const TRANSACTION_CONTROL: &[&str] = &[
    "BEGIN",
    "COMMIT",
    "END",
    "ROLLBACK",
    "SAVEPOINT",
    "RELEASE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerScan {
    Outside,
    /// Inside a CREATE statement, not yet known to be a trigger
    Create,
    Header,
    /// Between BEGIN and END of a trigger definition
    Body,
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Separator,
    /// Punctuation, numbers, quoted text
    Other,
}

/// Split statement text into keywords, `;` separators and everything else.
fn tokens(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_past(bytes, i + 2, b"\n"),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_past(bytes, i + 2, b"*/"),
            quote @ (b'\'' | b'"' | b'`') => {
                tokens.push(Token::Other);
                i = skip_past(bytes, i + 1, &[quote]);
            }
            b'[' => {
                tokens.push(Token::Other);
                i = skip_past(bytes, i + 1, b"]");
            }
            b';' => {
                tokens.push(Token::Separator);
                i += 1;
            }
            c if c.is_ascii_whitespace() => i += 1,
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let end = bytes[i..]
                    .iter()
                    .position(|b| !b.is_ascii_alphanumeric() && *b != b'_')
                    .map_or(bytes.len(), |n| i + n);
                // Both ends sit on ASCII bytes, so they are char boundaries
                tokens.push(Token::Word(&sql[i..end]));
                i = end;
            }
            _ => {
                tokens.push(Token::Other);
                i += 1;
            }
        }
    }
    tokens
}

/// Index just past the next `end` at or after `from`, or the end of input.
fn skip_past(bytes: &[u8], from: usize, end: &[u8]) -> usize {
    bytes[from.min(bytes.len())..]
        .windows(end.len())
        .position(|w| w == end)
        .map_or(bytes.len(), |n| from + n + end.len())
}

fn decode_error(e: sqlx::Error) -> DbError {
    DbError::Query {
        kind: crate::db::QueryErrorKind::Other,
        constraint: None,
        statement: "<row decode>".to_string(),
        message: e.to_string(),
    }
}
