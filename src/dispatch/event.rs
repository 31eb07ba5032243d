use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::value::TypedValue;
use crate::Error;

/// The kind of row change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    Truncate,
}

impl OperationType {
    pub const ALL: [OperationType; 4] = [
        OperationType::Insert,
        OperationType::Update,
        OperationType::Delete,
        OperationType::Truncate,
    ];

    /// The pgoutput message code for this operation.
    pub fn code(self) -> char {
        match self {
            OperationType::Insert => 'I',
            OperationType::Update => 'U',
            OperationType::Delete => 'D',
            OperationType::Truncate => 'T',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'I' => Some(OperationType::Insert),
            'U' => Some(OperationType::Update),
            'D' => Some(OperationType::Delete),
            'T' => Some(OperationType::Truncate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Insert => "INSERT",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
            OperationType::Truncate => "TRUNCATE",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the operation name in any case (`insert`, `UPDATE`) or its
/// single-character code (`I`, `U`, `D`, `T`).
impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        if let (Some(code), None) = (chars.next(), chars.next()) {
            if let Some(op) = OperationType::from_code(code.to_ascii_uppercase()) {
                return Ok(op);
            }
        }

        OperationType::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("Unknown operation type: {}", s)))
    }
}

/// One column of a changed row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub value: TypedValue,
    pub is_key: bool,
}

/// A row change, as delivered to handlers.
///
/// `xid` and `commit_timestamp` are filled in from the enclosing transaction
/// when it commits, right before delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub op: OperationType,
    pub xid: u32,
    pub commit_timestamp: Option<DateTime<Utc>>,
    pub schema: String,
    pub table: String,
    pub fields: Vec<Field>,
}

impl Event {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&TypedValue> {
        self.field(name).map(|f| &f.value)
    }

    /// Fields that are part of the table's replica identity key.
    pub fn key_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_key)
    }
}
