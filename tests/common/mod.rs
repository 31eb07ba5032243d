#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pg_dispatch::dispatch::{MessageSource, SourceMessage};
use pg_dispatch::postgres::{
    BeginMessage, ColumnInfo, ColumnValue, CommitMessage, DecodedMessage, DeleteMessage,
    InsertMessage, Lsn, RelationDescriptor, TruncateMessage, TupleData, UpdateMessage,
};
use pg_dispatch::config::{Config, HandlerFailurePolicy, PostgresConfig, ReplicationConfig};
use pg_dispatch::{Error, Event, Result};
use std::collections::VecDeque;
use std::env;
use std::sync::{Arc, Mutex};

pub const INT4: u32 = 23;
pub const TEXT: u32 = 25;
pub const BOOL: u32 = 16;

/// Replays a fixed list of messages and records every acknowledgement.
#[derive(Default)]
pub struct ScriptedSource {
    messages: VecDeque<SourceMessage>,
    next_lsn: u64,
    pub acks: Vec<Lsn>,
    /// Fail `recv` once the script is exhausted instead of ending cleanly.
    pub fail_at_end: bool,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            next_lsn: 1000,
            ..Default::default()
        }
    }

    /// Appends `message` at the next position.
    pub fn push(&mut self, message: DecodedMessage) -> &mut Self {
        self.next_lsn += 100;
        self.messages
            .push_back(SourceMessage::new(self.next_lsn, message));
        self
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = DecodedMessage>) -> &mut Self {
        for message in messages {
            self.push(message);
        }
        self
    }

    pub fn remaining(&self) -> usize {
        self.messages.len()
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn recv(&mut self) -> Result<Option<SourceMessage>> {
        match self.messages.pop_front() {
            Some(message) => Ok(Some(message)),
            None if self.fail_at_end => Err(Error::Replication {
                message: "connection lost".to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn acknowledge(&mut self, lsn: Lsn) -> Result<()> {
        self.acks.push(lsn);
        Ok(())
    }
}

/// Collects every event it is handed, tagged with a label.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<(String, Event)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self, label: &str) -> impl Fn(&Event) -> anyhow::Result<()> + Send + Sync {
        let events = Arc::clone(&self.events);
        let label = label.to_string();
        move |event: &Event| -> anyhow::Result<()> {
            events.lock().unwrap().push((label.clone(), event.clone()));
            Ok(())
        }
    }

    pub fn events(&self) -> Vec<(String, Event)> {
        self.events.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events().into_iter().map(|(label, _)| label).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

pub fn commit_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 10, 15, 10, 30, 0).unwrap()
}

pub fn relation(id: u32, schema: &str, table: &str, columns: &[(&str, u32)]) -> DecodedMessage {
    DecodedMessage::Relation(RelationDescriptor {
        id,
        schema: schema.to_string(),
        table: table.to_string(),
        columns: columns
            .iter()
            .enumerate()
            .map(|(i, (name, type_id))| ColumnInfo {
                name: name.to_string(),
                type_id: *type_id,
                is_key: i == 0,
            })
            .collect(),
    })
}

/// The `public.actors (id int4, name text, active bool)` relation used
/// throughout the tests.
pub fn actors(id: u32) -> DecodedMessage {
    relation(
        id,
        "public",
        "actors",
        &[("id", INT4), ("name", TEXT), ("active", BOOL)],
    )
}

pub fn begin(xid: u32) -> DecodedMessage {
    DecodedMessage::Begin(BeginMessage {
        xid,
        final_lsn: Lsn(5000),
        commit_timestamp: commit_time(),
    })
}

pub fn commit() -> DecodedMessage {
    DecodedMessage::Commit(CommitMessage {
        commit_lsn: Lsn(5000),
        end_lsn: Lsn(5100),
        commit_timestamp: commit_time(),
    })
}

pub fn tuple(values: &[Option<&str>]) -> TupleData {
    TupleData {
        columns: values
            .iter()
            .map(|v| match v {
                Some(text) => ColumnValue::Text(text.to_string()),
                None => ColumnValue::Null,
            })
            .collect(),
    }
}

pub fn insert(relation_id: u32, values: &[Option<&str>]) -> DecodedMessage {
    DecodedMessage::Insert(InsertMessage {
        relation_id,
        new: tuple(values),
    })
}

pub fn update(relation_id: u32, values: &[Option<&str>]) -> DecodedMessage {
    DecodedMessage::Update(UpdateMessage {
        relation_id,
        old: None,
        new: tuple(values),
    })
}

pub fn update_with_old(
    relation_id: u32,
    old: &[Option<&str>],
    new: &[Option<&str>],
) -> DecodedMessage {
    DecodedMessage::Update(UpdateMessage {
        relation_id,
        old: Some(tuple(old)),
        new: tuple(new),
    })
}

pub fn delete(relation_id: u32, values: &[Option<&str>]) -> DecodedMessage {
    DecodedMessage::Delete(DeleteMessage {
        relation_id,
        old: tuple(values),
    })
}

pub fn truncate(relation_ids: &[u32]) -> DecodedMessage {
    DecodedMessage::Truncate(TruncateMessage {
        options: 0,
        relation_ids: relation_ids.to_vec(),
    })
}

/// Configuration for the live database tests, from `TEST_PG_*` variables.
pub fn get_test_config() -> Config {
    let postgres = PostgresConfig {
        host: env::var("TEST_PG_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: env::var("TEST_PG_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5432),
        database: env::var("TEST_PG_DATABASE").unwrap_or_else(|_| "postgres".to_string()),
        username: env::var("TEST_PG_USERNAME").unwrap_or_else(|_| "postgres".to_string()),
        password: env::var("TEST_PG_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
        connect_timeout_secs: 30,
    };

    let replication = ReplicationConfig {
        slot_name: format!("test_slot_{}", std::process::id()),
        publication: format!("test_publication_{}", std::process::id()),
        create_slot: true,
        status_interval_secs: 1,
        handler_failure: HandlerFailurePolicy::Abort,
    };

    Config {
        postgres,
        replication,
    }
}
