//! Conversion of text-format column values to typed values.
//!
//! pgoutput sends every column in PostgreSQL's text output format. The
//! converter maps the column's type OID to a [`PgType`] and parses the text
//! accordingly. Conversion is lenient: a value that does not parse as its
//! declared type is logged and handed through as [`TypedValue::Text`], so one
//! malformed value never stops the stream.

use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::postgres::ColumnValue;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMPTZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%#z";

/// A column value after conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Null,
    Integer(i64),
    Text(String),
    /// Arbitrary precision numeric, kept in its validated text form.
    Decimal(String),
    Boolean(bool),
    Double(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Json(serde_json::Value),
    Uuid(Uuid),
}

/// Semantic type of a column, derived from its type OID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgType {
    Integer,
    Text,
    Decimal,
    Boolean,
    Double,
    Date,
    Timestamp,
    TimestampTz,
    Json,
    Uuid,
}

impl PgType {
    /// Looks up the semantic type for a type OID. Unknown OIDs are text.
    pub fn from_oid(type_id: u32) -> Self {
        match type_id {
            20 | 21 | 23 => PgType::Integer,     // int8, int2, int4
            25 | 1043 => PgType::Text,           // text, varchar
            1700 => PgType::Decimal,             // numeric
            16 => PgType::Boolean,               // bool
            700 | 701 => PgType::Double,         // float4, float8
            1082 => PgType::Date,                // date
            1114 => PgType::Timestamp,           // timestamp
            1184 => PgType::TimestampTz,         // timestamptz
            114 | 3802 => PgType::Json,          // json, jsonb
            2950 => PgType::Uuid,                // uuid
            _ => PgType::Text,
        }
    }
}

#[derive(Debug, Error)]
enum ConversionError {
    #[error("invalid integer: {0}")]
    Integer(#[from] std::num::ParseIntError),

    #[error("invalid floating point number: {0}")]
    Double(#[from] std::num::ParseFloatError),

    #[error("invalid numeric: {0}")]
    Decimal(String),

    #[error("invalid date or timestamp: {0}")]
    DateTime(#[from] chrono::ParseError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    Uuid(#[from] uuid::Error),
}

/// Converts a raw text value of the given type OID.
///
/// `None` (SQL NULL) always converts to [`TypedValue::Null`].
pub fn convert(type_id: u32, raw: Option<&str>) -> TypedValue {
    let Some(raw) = raw else {
        return TypedValue::Null;
    };

    match parse_text(PgType::from_oid(type_id), raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(type_id, value = raw, error = %e, "Failed to convert column value, keeping raw text");
            TypedValue::Text(raw.to_string())
        }
    }
}

/// Converts one decoded column.
///
/// Unchanged TOAST values carry no data and convert to `Null`. Binary
/// values are only sent when the binary protocol option is enabled; they
/// are kept as base64 text.
pub fn convert_column(type_id: u32, value: &ColumnValue) -> TypedValue {
    match value {
        ColumnValue::Null | ColumnValue::Unchanged => TypedValue::Null,
        ColumnValue::Text(text) => convert(type_id, Some(text)),
        ColumnValue::Binary(bytes) => {
            TypedValue::Text(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}

fn parse_text(pg_type: PgType, raw: &str) -> Result<TypedValue, ConversionError> {
    let value = match pg_type {
        PgType::Integer => TypedValue::Integer(raw.parse()?),
        PgType::Text => TypedValue::Text(raw.to_string()),
        PgType::Decimal => TypedValue::Decimal(parse_decimal(raw)?),
        PgType::Boolean => TypedValue::Boolean(raw == "t"),
        PgType::Double => TypedValue::Double(raw.parse()?),
        PgType::Date => TypedValue::Date(NaiveDate::parse_from_str(raw, DATE_FORMAT)?),
        PgType::Timestamp => {
            TypedValue::Timestamp(NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)?)
        }
        PgType::TimestampTz => {
            TypedValue::TimestampTz(DateTime::<FixedOffset>::parse_from_str(raw, TIMESTAMPTZ_FORMAT)?)
        }
        PgType::Json => TypedValue::Json(serde_json::from_str(raw)?),
        PgType::Uuid => TypedValue::Uuid(Uuid::parse_str(raw)?),
    };
    Ok(value)
}

/// Validates PostgreSQL numeric output: `[-]digits[.digits]` or `NaN`,
/// `Infinity`, `-Infinity`.
fn parse_decimal(raw: &str) -> Result<String, ConversionError> {
    if matches!(raw, "NaN" | "Infinity" | "-Infinity") {
        return Ok(raw.to_string());
    }

    let unsigned = raw.strip_prefix('-').unwrap_or(raw);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (unsigned, None),
    };

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if all_digits(int_part) && frac_part.map_or(true, all_digits) {
        Ok(raw.to_string())
    } else {
        Err(ConversionError::Decimal(raw.to_string()))
    }
}
