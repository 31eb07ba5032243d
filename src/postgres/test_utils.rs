use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// Mock pgoutput payload builder for decoder tests
pub struct MockMessageBuilder {
    lsn: u64,
    timestamp: i64,
    relations: HashMap<u32, MockRelation>,
}

#[derive(Debug, Clone)]
pub struct MockRelation {
    pub schema: String,
    pub table: String,
    pub columns: Vec<(String, u32, bool)>,
}

impl MockMessageBuilder {
    pub fn new() -> Self {
        Self {
            lsn: 1000,
            timestamp: 750_681_000_000_000, // 2023-10-15 10:30:00 UTC, PG epoch micros
            relations: HashMap::new(),
        }
    }

    pub fn with_lsn(mut self, lsn: u64) -> Self {
        self.lsn = lsn;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn add_relation(
        mut self,
        id: u32,
        schema: &str,
        table: &str,
        columns: Vec<(&str, u32, bool)>,
    ) -> Self {
        let columns = columns
            .into_iter()
            .map(|(name, type_id, is_key)| (name.to_string(), type_id, is_key))
            .collect();

        self.relations.insert(
            id,
            MockRelation {
                schema: schema.to_string(),
                table: table.to_string(),
                columns,
            },
        );
        self
    }

    pub fn begin_message(&self, xid: u32) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(b'B');
        buf.put_u64(self.lsn); // final LSN
        buf.put_i64(self.timestamp); // commit timestamp
        buf.put_u32(xid);
        buf.freeze()
    }

    pub fn commit_message(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(b'C');
        buf.put_u8(0); // flags
        buf.put_u64(self.lsn); // commit LSN
        buf.put_u64(self.lsn + 100); // end LSN
        buf.put_i64(self.timestamp);
        buf.freeze()
    }

    pub fn relation_message(&self, rel_id: u32) -> Bytes {
        let relation = self
            .relations
            .get(&rel_id)
            .expect("Relation not found. Use add_relation() first.");

        let mut buf = BytesMut::new();
        buf.put_u8(b'R');
        buf.put_u32(rel_id);
        put_cstr(&mut buf, &relation.schema);
        put_cstr(&mut buf, &relation.table);
        buf.put_u8(b'd'); // replica identity default
        buf.put_u16(relation.columns.len() as u16);

        for (name, type_id, is_key) in &relation.columns {
            buf.put_u8(if *is_key { 1 } else { 0 });
            put_cstr(&mut buf, name);
            buf.put_u32(*type_id);
            buf.put_i32(-1); // type modifier
        }

        buf.freeze()
    }

    pub fn insert_message(&self, rel_id: u32, values: &[MockValue]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(b'I');
        buf.put_u32(rel_id);
        buf.put_u8(b'N');
        put_tuple(&mut buf, values);
        buf.freeze()
    }

    pub fn update_message(
        &self,
        rel_id: u32,
        old_values: Option<&[MockValue]>,
        new_values: &[MockValue],
    ) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(b'U');
        buf.put_u32(rel_id);

        if let Some(old) = old_values {
            buf.put_u8(b'O');
            put_tuple(&mut buf, old);
        }

        buf.put_u8(b'N');
        put_tuple(&mut buf, new_values);
        buf.freeze()
    }

    pub fn delete_message(&self, rel_id: u32, key_values: &[MockValue]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(b'D');
        buf.put_u32(rel_id);
        buf.put_u8(b'K');
        put_tuple(&mut buf, key_values);
        buf.freeze()
    }

    pub fn truncate_message(&self, rel_ids: &[u32]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(b'T');
        buf.put_u32(rel_ids.len() as u32);
        buf.put_u8(0); // options
        for rel_id in rel_ids {
            buf.put_u32(*rel_id);
        }
        buf.freeze()
    }
}

/// One tuple column for mock messages
#[derive(Debug, Clone)]
pub enum MockValue {
    Null,
    Unchanged,
    Text(String),
    Binary(Vec<u8>),
}

impl MockValue {
    pub fn text(value: &str) -> Self {
        MockValue::Text(value.to_string())
    }
}

fn put_cstr(buf: &mut BytesMut, value: &str) {
    buf.put(value.as_bytes());
    buf.put_u8(0);
}

fn put_tuple(buf: &mut BytesMut, values: &[MockValue]) {
    buf.put_u16(values.len() as u16);
    for value in values {
        match value {
            MockValue::Null => buf.put_u8(b'n'),
            MockValue::Unchanged => buf.put_u8(b'u'),
            MockValue::Text(text) => {
                buf.put_u8(b't');
                buf.put_i32(text.len() as i32);
                buf.put(text.as_bytes());
            }
            MockValue::Binary(data) => {
                buf.put_u8(b'b');
                buf.put_i32(data.len() as i32);
                buf.put(data.as_slice());
            }
        }
    }
}

/// Common PostgreSQL type OIDs for testing
pub mod type_oids {
    pub const BOOL: u32 = 16;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
}
