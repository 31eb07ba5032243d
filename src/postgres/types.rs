use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::lsn::Lsn;

/// Schema snapshot of one published table, sent by the server before the
/// first row change that references it.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    pub id: u32,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_id: u32,
    pub is_key: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeginMessage {
    pub xid: u32,
    pub final_lsn: Lsn,
    pub commit_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitMessage {
    pub commit_lsn: Lsn,
    pub end_lsn: Lsn,
    pub commit_timestamp: DateTime<Utc>,
}

/// One column of a tuple as it came off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    /// Unchanged TOASTed value; the server did not send it.
    Unchanged,
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TupleData {
    pub columns: Vec<ColumnValue>,
}

impl TupleData {
    pub fn new(columns: Vec<ColumnValue>) -> Self {
        Self { columns }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertMessage {
    pub relation_id: u32,
    pub new: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMessage {
    pub relation_id: u32,
    /// Old key or full old row, depending on the table's replica identity.
    pub old: Option<TupleData>,
    pub new: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteMessage {
    pub relation_id: u32,
    pub old: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TruncateMessage {
    pub options: u8,
    pub relation_ids: Vec<u32>,
}

/// A pgoutput message, decoded but not yet interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Relation(RelationDescriptor),
    Begin(BeginMessage),
    Insert(InsertMessage),
    Update(UpdateMessage),
    Delete(DeleteMessage),
    Truncate(TruncateMessage),
    Commit(CommitMessage),
    /// Type, origin, logical-message and any future message kinds.
    Unknown { tag: u8 },
}

impl DecodedMessage {
    /// The single-byte pgoutput tag of this message.
    pub fn tag(&self) -> u8 {
        match self {
            DecodedMessage::Relation(_) => b'R',
            DecodedMessage::Begin(_) => b'B',
            DecodedMessage::Insert(_) => b'I',
            DecodedMessage::Update(_) => b'U',
            DecodedMessage::Delete(_) => b'D',
            DecodedMessage::Truncate(_) => b'T',
            DecodedMessage::Commit(_) => b'C',
            DecodedMessage::Unknown { tag } => *tag,
        }
    }
}
