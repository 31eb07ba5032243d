use bytes::{Buf, Bytes};
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::lsn::Lsn;
use super::types::{
    BeginMessage, ColumnInfo, ColumnValue, CommitMessage, DecodedMessage, DeleteMessage,
    InsertMessage, RelationDescriptor, TruncateMessage, TupleData, UpdateMessage,
};
use crate::{Error, Result};

/// Seconds between the Unix epoch and the PostgreSQL epoch (2000-01-01).
const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Decoder for pgoutput (protocol version 1) message payloads.
///
/// The input is the payload of one XLogData message, starting with the
/// pgoutput tag byte. Relation state is not kept here; resolving relation
/// ids is the dispatcher's job.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgOutputDecoder;

impl PgOutputDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, data: &[u8]) -> Result<DecodedMessage> {
        if data.is_empty() {
            return Err(invalid("Empty pgoutput message"));
        }

        let msg_type = data[0];
        let cursor = &data[1..];

        match msg_type {
            b'B' => self.decode_begin(cursor),
            b'C' => self.decode_commit(cursor),
            b'R' => self.decode_relation(cursor),
            b'I' => self.decode_insert(cursor),
            b'U' => self.decode_update(cursor),
            b'D' => self.decode_delete(cursor),
            b'T' => self.decode_truncate(cursor),
            other => {
                debug!("Unhandled pgoutput message type: {}", other as char);
                Ok(DecodedMessage::Unknown { tag: other })
            }
        }
    }

    fn decode_begin(&self, mut cursor: &[u8]) -> Result<DecodedMessage> {
        if cursor.remaining() < 20 {
            return Err(invalid("Invalid BEGIN message size"));
        }

        let final_lsn = Lsn(cursor.get_u64());
        let timestamp = cursor.get_i64();
        let xid = cursor.get_u32();

        trace!("BEGIN: lsn={}, xid={}", final_lsn, xid);
        Ok(DecodedMessage::Begin(BeginMessage {
            xid,
            final_lsn,
            commit_timestamp: pg_timestamp_to_utc(timestamp)?,
        }))
    }

    fn decode_commit(&self, mut cursor: &[u8]) -> Result<DecodedMessage> {
        if cursor.remaining() < 25 {
            return Err(invalid("Invalid COMMIT message size"));
        }

        let _flags = cursor.get_u8();
        let commit_lsn = Lsn(cursor.get_u64());
        let end_lsn = Lsn(cursor.get_u64());
        let timestamp = cursor.get_i64();

        trace!("COMMIT: lsn={}", end_lsn);
        Ok(DecodedMessage::Commit(CommitMessage {
            commit_lsn,
            end_lsn,
            commit_timestamp: pg_timestamp_to_utc(timestamp)?,
        }))
    }

    fn decode_relation(&self, mut cursor: &[u8]) -> Result<DecodedMessage> {
        if cursor.remaining() < 4 {
            return Err(invalid("Invalid RELATION message size"));
        }

        let id = cursor.get_u32();
        let schema = read_cstr(&mut cursor)?;
        let table = read_cstr(&mut cursor)?;

        if cursor.remaining() < 3 {
            return Err(invalid("Truncated RELATION message"));
        }
        let _replica_identity = cursor.get_u8();
        let num_columns = cursor.get_u16();

        let mut columns = Vec::with_capacity(num_columns as usize);
        for _ in 0..num_columns {
            if cursor.remaining() < 1 {
                return Err(invalid("Truncated RELATION column"));
            }
            let flags = cursor.get_u8();
            let name = read_cstr(&mut cursor)?;
            if cursor.remaining() < 8 {
                return Err(invalid("Truncated RELATION column"));
            }
            let type_id = cursor.get_u32();
            let _type_modifier = cursor.get_i32();

            columns.push(ColumnInfo {
                name,
                type_id,
                is_key: (flags & 1) != 0,
            });
        }

        debug!("RELATION: {}={}.{}", id, schema, table);
        Ok(DecodedMessage::Relation(RelationDescriptor {
            id,
            schema,
            table,
            columns,
        }))
    }

    fn decode_insert(&self, mut cursor: &[u8]) -> Result<DecodedMessage> {
        if cursor.remaining() < 5 {
            return Err(invalid("Invalid INSERT message size"));
        }

        let relation_id = cursor.get_u32();
        let tuple_type = cursor.get_u8();
        if tuple_type != b'N' {
            return Err(invalid(format!(
                "Unexpected tuple type in INSERT: {}",
                tuple_type as char
            )));
        }

        let new = decode_tuple_data(&mut cursor)?;
        Ok(DecodedMessage::Insert(InsertMessage { relation_id, new }))
    }

    fn decode_update(&self, mut cursor: &[u8]) -> Result<DecodedMessage> {
        if cursor.remaining() < 5 {
            return Err(invalid("Invalid UPDATE message size"));
        }

        let relation_id = cursor.get_u32();
        let mut old = None;

        let mut tuple_type = cursor.get_u8();
        if tuple_type == b'O' || tuple_type == b'K' {
            old = Some(decode_tuple_data(&mut cursor)?);
            if cursor.remaining() < 1 {
                return Err(invalid("UPDATE message without new tuple"));
            }
            tuple_type = cursor.get_u8();
        }

        if tuple_type != b'N' {
            return Err(invalid(format!(
                "Unexpected tuple type in UPDATE: {}",
                tuple_type as char
            )));
        }

        let new = decode_tuple_data(&mut cursor)?;
        Ok(DecodedMessage::Update(UpdateMessage {
            relation_id,
            old,
            new,
        }))
    }

    fn decode_delete(&self, mut cursor: &[u8]) -> Result<DecodedMessage> {
        if cursor.remaining() < 5 {
            return Err(invalid("Invalid DELETE message size"));
        }

        let relation_id = cursor.get_u32();
        let tuple_type = cursor.get_u8();
        if tuple_type != b'O' && tuple_type != b'K' {
            return Err(invalid(format!(
                "Unexpected tuple type in DELETE: {}",
                tuple_type as char
            )));
        }

        let old = decode_tuple_data(&mut cursor)?;
        Ok(DecodedMessage::Delete(DeleteMessage { relation_id, old }))
    }

    fn decode_truncate(&self, mut cursor: &[u8]) -> Result<DecodedMessage> {
        if cursor.remaining() < 5 {
            return Err(invalid("Invalid TRUNCATE message size"));
        }

        let num_relations = cursor.get_u32() as usize;
        let options = cursor.get_u8();

        if cursor.remaining() < num_relations * 4 {
            return Err(invalid("Truncated TRUNCATE relation list"));
        }
        let relation_ids = (0..num_relations).map(|_| cursor.get_u32()).collect();

        Ok(DecodedMessage::Truncate(TruncateMessage {
            options,
            relation_ids,
        }))
    }
}

fn decode_tuple_data(cursor: &mut &[u8]) -> Result<TupleData> {
    if cursor.remaining() < 2 {
        return Err(invalid("Invalid tuple header"));
    }
    let num_columns = cursor.get_u16();

    let mut columns = Vec::with_capacity(num_columns as usize);
    for _ in 0..num_columns {
        if cursor.remaining() < 1 {
            return Err(invalid("Truncated tuple data"));
        }

        let col_type = cursor.get_u8();
        let value = match col_type {
            b'n' => ColumnValue::Null,
            b'u' => ColumnValue::Unchanged,
            b't' | b'b' => {
                if cursor.remaining() < 4 {
                    return Err(invalid("Invalid column value length"));
                }
                let len = cursor.get_u32() as usize;
                if cursor.remaining() < len {
                    return Err(invalid("Invalid column value length"));
                }
                let raw = &cursor[..len];
                let value = if col_type == b't' {
                    ColumnValue::Text(String::from_utf8_lossy(raw).into_owned())
                } else {
                    ColumnValue::Binary(Bytes::copy_from_slice(raw))
                };
                cursor.advance(len);
                value
            }
            other => {
                return Err(invalid(format!("Unknown column type: {}", other as char)));
            }
        };
        columns.push(value);
    }

    Ok(TupleData { columns })
}

/// Reads a NUL-terminated string and advances past the terminator.
fn read_cstr(cursor: &mut &[u8]) -> Result<String> {
    let end = cursor
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| invalid("Unterminated string"))?;
    let value = String::from_utf8_lossy(&cursor[..end]).into_owned();
    cursor.advance(end + 1);
    Ok(value)
}

/// Converts microseconds since 2000-01-01 UTC to a UTC timestamp.
pub fn pg_timestamp_to_utc(micros: i64) -> Result<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000) + PG_EPOCH_OFFSET_SECS;
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;

    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| invalid(format!("Timestamp out of range: {}", micros)))
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidMessage {
        message: message.into(),
    }
}
