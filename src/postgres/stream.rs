use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgwire_replication::{ReplicationClient, ReplicationConfig as PgwireConfig, ReplicationEvent};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::decoder::{pg_timestamp_to_utc, PgOutputDecoder};
use super::lsn::Lsn;
use super::types::{BeginMessage, CommitMessage, DecodedMessage};
use crate::config::Config;
use crate::dispatch::{MessageSource, SourceMessage};
use crate::{Error, Result};

/// Connection settings for the streaming replication connection.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub slot: String,
    pub publication: String,
    pub start_lsn: Lsn,
    /// How often a standby status update is sent when nothing else is.
    pub status_interval: Duration,
    /// Upper bound for establishing the streaming connection.
    pub connect_timeout: Duration,
}

impl StreamOptions {
    pub fn from_config(config: &Config, start_lsn: Lsn) -> Self {
        Self {
            host: config.postgres.host.clone(),
            port: config.postgres.port,
            user: config.postgres.username.clone(),
            password: config.postgres.password.clone(),
            database: config.postgres.database.clone(),
            slot: config.replication.slot_name.clone(),
            publication: config.replication.publication.clone(),
            start_lsn,
            status_interval: Duration::from_secs(config.replication.status_interval_secs),
            connect_timeout: config.connect_timeout(),
        }
    }
}

fn from_wire(lsn: pgwire_replication::Lsn) -> Lsn {
    let value: u64 = lsn.into();
    Lsn(value)
}

/// Begin/Commit can reach us both as protocol events and inside XLogData,
/// depending on the transport version. Tracks the open transaction so each
/// boundary is forwarded once.
#[derive(Debug, Default)]
struct BoundaryTracker {
    open: Option<(u32, DateTime<Utc>)>,
}

impl BoundaryTracker {
    /// Returns false when this Begin duplicates the one already forwarded.
    fn begin(&mut self, xid: u32, commit_timestamp: DateTime<Utc>) -> bool {
        if matches!(self.open, Some((open_xid, _)) if open_xid == xid) {
            return false;
        }
        self.open = Some((xid, commit_timestamp));
        true
    }

    /// Returns the commit timestamp of the open transaction, or `None` when
    /// this Commit duplicates one already forwarded.
    fn commit(&mut self) -> Option<DateTime<Utc>> {
        self.open.take().map(|(_, ts)| ts)
    }
}

/// A pgoutput change stream over a logical replication slot.
pub struct PgOutputStream {
    client: ReplicationClient,
    decoder: PgOutputDecoder,
    boundaries: BoundaryTracker,
    last_lsn: Lsn,
    ack_lsn: Lsn,
}

impl PgOutputStream {
    pub async fn connect(options: StreamOptions) -> Result<Self> {
        info!(
            slot = %options.slot,
            publication = %options.publication,
            start_lsn = %options.start_lsn,
            "Starting replication stream"
        );

        let pgwire_config = PgwireConfig {
            host: options.host,
            port: options.port,
            user: options.user,
            password: options.password,
            database: options.database,
            slot: options.slot,
            publication: options.publication,
            start_lsn: pgwire_replication::Lsn::from(options.start_lsn.as_u64()),
            stop_at_lsn: None,
            status_interval: options.status_interval,
            idle_wakeup_interval: Duration::from_secs(10),
            buffer_events: 8192,
            tls: pgwire_replication::TlsConfig::disabled(),
        };

        let client = tokio::time::timeout(
            options.connect_timeout,
            ReplicationClient::connect(pgwire_config),
        )
        .await
        .map_err(|_| Error::Replication {
            message: format!(
                "Timed out after {:?} opening replication stream",
                options.connect_timeout
            ),
        })?
        .map_err(|e| Error::Replication {
            message: format!("Failed to open replication stream: {}", e),
        })?;

        info!("Replication stream established");

        Ok(Self {
            client,
            decoder: PgOutputDecoder::new(),
            boundaries: BoundaryTracker::default(),
            last_lsn: options.start_lsn,
            ack_lsn: options.start_lsn,
        })
    }

    /// Last position reported back to the server.
    pub fn ack_lsn(&self) -> Lsn {
        self.ack_lsn
    }

    fn on_begin(&mut self, lsn: Lsn, begin: BeginMessage) -> Option<SourceMessage> {
        if self.boundaries.begin(begin.xid, begin.commit_timestamp) {
            Some(SourceMessage::new(lsn, DecodedMessage::Begin(begin)))
        } else {
            trace!(xid = begin.xid, "Duplicate BEGIN");
            None
        }
    }

    fn on_commit(&mut self, lsn: Lsn, mut commit: CommitMessage) -> Option<SourceMessage> {
        match self.boundaries.commit() {
            Some(commit_timestamp) => {
                commit.commit_timestamp = commit_timestamp;
                Some(SourceMessage::new(lsn, DecodedMessage::Commit(commit)))
            }
            None => {
                trace!(lsn = %commit.end_lsn, "Duplicate COMMIT");
                None
            }
        }
    }
}

#[async_trait]
impl MessageSource for PgOutputStream {
    async fn recv(&mut self) -> Result<Option<SourceMessage>> {
        loop {
            let event = self
                .client
                .recv()
                .await
                .map_err(|e| Error::Replication {
                    message: e.to_string(),
                })?;

            let Some(event) = event else {
                info!("Replication stream closed by server");
                return Ok(None);
            };

            match event {
                ReplicationEvent::XLogData { wal_end, data, .. } => {
                    let lsn = from_wire(wal_end);
                    self.last_lsn = lsn;

                    match self.decoder.decode(&data)? {
                        DecodedMessage::Begin(begin) => {
                            if let Some(message) = self.on_begin(lsn, begin) {
                                return Ok(Some(message));
                            }
                        }
                        DecodedMessage::Commit(commit) => {
                            if let Some(message) = self.on_commit(lsn, commit) {
                                return Ok(Some(message));
                            }
                        }
                        message => return Ok(Some(SourceMessage::new(lsn, message))),
                    }
                }
                ReplicationEvent::Begin {
                    xid,
                    commit_time_micros,
                    ..
                } => {
                    let begin = BeginMessage {
                        xid,
                        final_lsn: self.last_lsn,
                        commit_timestamp: pg_timestamp_to_utc(commit_time_micros)?,
                    };
                    if let Some(message) = self.on_begin(self.last_lsn, begin) {
                        return Ok(Some(message));
                    }
                }
                ReplicationEvent::Commit { end_lsn, .. } => {
                    let end_lsn = from_wire(end_lsn);
                    self.last_lsn = end_lsn;
                    let commit = CommitMessage {
                        commit_lsn: end_lsn,
                        end_lsn,
                        commit_timestamp: DateTime::<Utc>::default(),
                    };
                    if let Some(message) = self.on_commit(end_lsn, commit) {
                        return Ok(Some(message));
                    }
                }
                ReplicationEvent::KeepAlive {
                    wal_end,
                    reply_requested,
                    ..
                } => {
                    trace!(wal_end = %from_wire(wal_end), reply_requested, "Keepalive");
                }
                ReplicationEvent::StoppedAt { reached } => {
                    info!(lsn = %from_wire(reached), "Replication stream stopped");
                    return Ok(None);
                }
                #[allow(unreachable_patterns)]
                other => {
                    warn!(event = ?other, "Ignoring unexpected replication event");
                }
            }
        }
    }

    async fn acknowledge(&mut self, lsn: Lsn) -> Result<()> {
        if lsn > self.ack_lsn {
            debug!(%lsn, prev_ack = %self.ack_lsn, "Acknowledging LSN");
            self.client
                .update_applied_lsn(pgwire_replication::Lsn::from(lsn.as_u64()));
            self.ack_lsn = lsn;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_duplicate_begin_is_suppressed() {
        let ts = Utc.with_ymd_and_hms(2023, 10, 15, 10, 30, 0).unwrap();
        let mut tracker = BoundaryTracker::default();

        assert!(tracker.begin(42, ts));
        assert!(!tracker.begin(42, ts));
        assert_eq!(tracker.commit(), Some(ts));
        assert_eq!(tracker.commit(), None);
    }

    #[test]
    fn test_new_xid_replaces_open_transaction() {
        let first = Utc.with_ymd_and_hms(2023, 10, 15, 10, 30, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2023, 10, 15, 10, 31, 0).unwrap();
        let mut tracker = BoundaryTracker::default();

        assert!(tracker.begin(1, first));
        assert!(tracker.begin(2, second));
        assert_eq!(tracker.commit(), Some(second));
    }

    #[test]
    fn test_stream_options_from_config() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "postgres": {
                "host": "db", "port": 5433, "database": "shop",
                "username": "repl", "password": "secret"
            },
            "replication": { "slot_name": "s", "publication": "p", "status_interval_secs": 3 }
        }))
        .unwrap();

        let options = StreamOptions::from_config(&config, Lsn(0x16B3748));
        assert_eq!(options.host, "db");
        assert_eq!(options.port, 5433);
        assert_eq!(options.user, "repl");
        assert_eq!(options.slot, "s");
        assert_eq!(options.publication, "p");
        assert_eq!(options.start_lsn, Lsn(0x16B3748));
        assert_eq!(options.status_interval, Duration::from_secs(3));
        assert_eq!(options.connect_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_timeout() {
        let options = StreamOptions {
            host: "10.255.255.1".to_string(),
            port: 5432,
            user: "repl".to_string(),
            password: "secret".to_string(),
            database: "shop".to_string(),
            slot: "s".to_string(),
            publication: "p".to_string(),
            start_lsn: Lsn::ZERO,
            status_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_millis(50),
        };

        let started = std::time::Instant::now();
        let result = PgOutputStream::connect(options).await;

        assert!(matches!(result, Err(Error::Replication { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
