//! Row decoding into JSON.
//!
//! Column values are decoded in two steps: the declared type name is mapped to
//! a [`TypeCategory`], which picks the preferred Rust types to try first. If
//! none of them fit (expression columns in SQLite often report no declared
//! type) the decoder walks a fixed fallback chain before giving up with
//! `null`.

use crate::models::JsonRow;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};
use tracing::debug;

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Json,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower.contains("float")
        || lower.contains("double")
        || lower.contains("real")
        || lower.contains("numeric")
        || lower.contains("decimal")
    {
        return TypeCategory::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }
    TypeCategory::Unknown
}

/// Render bytes as UTF-8 text when valid, base64 otherwise.
pub fn binary_to_json(bytes: &[u8]) -> JsonValue {
    match std::str::from_utf8(bytes) {
        Ok(text) => JsonValue::String(text.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

/// Conversion of a driver row into a JSON object.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
}

macro_rules! impl_row_to_json {
    ($($row:ty),+ $(,)?) => {
        $(
            impl RowToJson for $row {
                fn to_json_map(&self) -> JsonRow {
                    self.columns()
                        .iter()
                        .map(|col| {
                            let value = decode_column(self, col.ordinal(), col.type_info().name());
                            (col.name().to_string(), value)
                        })
                        .collect()
                }
            }
        )+
    };
}

impl_row_to_json!(MySqlRow, PgRow, SqliteRow);

fn try_decode<R, T>(row: &R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<T, _>(idx).ok()
}

fn decode_column<R>(row: &R, idx: usize, type_name: &str) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    i64: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    i32: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    i16: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    f64: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    f32: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    bool: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    String: for<'r> Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return JsonValue::Null,
        Err(_) => return JsonValue::Null,
        Ok(_) => {}
    }

    let integer = || {
        try_decode::<R, i64>(row, idx)
            .or_else(|| try_decode::<R, i32>(row, idx).map(i64::from))
            .or_else(|| try_decode::<R, i16>(row, idx).map(i64::from))
            .map(|v| JsonValue::Number(v.into()))
    };
    let float = || {
        try_decode::<R, f64>(row, idx)
            .or_else(|| try_decode::<R, f32>(row, idx).map(f64::from))
            .map(|v| {
                serde_json::Number::from_f64(v)
                    .map(JsonValue::Number)
                    .unwrap_or_else(|| JsonValue::String(v.to_string()))
            })
    };
    let boolean = || try_decode::<R, bool>(row, idx).map(JsonValue::Bool);
    let text = || try_decode::<R, String>(row, idx).map(JsonValue::String);
    let binary = || try_decode::<R, Vec<u8>>(row, idx).map(|v| binary_to_json(&v));

    let preferred = match categorize_type(type_name) {
        TypeCategory::Integer => integer(),
        TypeCategory::Float => float(),
        TypeCategory::Boolean => boolean(),
        TypeCategory::Binary => binary(),
        TypeCategory::Json => text().map(|v| match v {
            JsonValue::String(s) => serde_json::from_str(&s).unwrap_or(JsonValue::String(s)),
            other => other,
        }),
        TypeCategory::Text | TypeCategory::Unknown => None,
    };

    preferred
        .or_else(integer)
        .or_else(float)
        .or_else(text)
        .or_else(boolean)
        .or_else(binary)
        .unwrap_or_else(|| {
            debug!(column = idx, type_name = %type_name, "Column type not decodable as JSON");
            JsonValue::Null
        })
}
