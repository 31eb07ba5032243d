use tokio_postgres::{Config, NoTls};
use tracing::{error, info, warn};

use super::lsn::Lsn;
use crate::{Error, Result};

/// Regular (non-replication) connection used to prepare and inspect the
/// replication slot. The change stream itself runs over
/// [`PgOutputStream`](super::PgOutputStream).
pub struct ReplicationConnection {
    client: tokio_postgres::Client,
    connection_task: tokio::task::JoinHandle<()>,
    slot_name: String,
}

impl ReplicationConnection {
    pub async fn new(config: &Config, slot_name: String) -> Result<Self> {
        info!("Creating control connection to PostgreSQL");

        let (client, connection) = config.connect(NoTls).await?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Connection error: {}", e);
            }
        });

        info!("Successfully connected to PostgreSQL");

        Ok(Self {
            client,
            connection_task,
            slot_name,
        })
    }

    pub async fn slot_exists(&self) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM pg_replication_slots WHERE slot_name = $1)",
                &[&self.slot_name],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Makes sure the slot exists and decodes with `pgoutput`.
    ///
    /// A missing slot is created when `create_if_missing` is set and is an
    /// error otherwise.
    pub async fn ensure_slot(&self, create_if_missing: bool) -> Result<()> {
        if self.slot_exists().await? {
            let row = self
                .client
                .query_one(
                    "SELECT plugin::text FROM pg_replication_slots WHERE slot_name = $1",
                    &[&self.slot_name],
                )
                .await?;
            let plugin: Option<String> = row.get(0);

            if plugin.as_deref() != Some("pgoutput") {
                return Err(Error::Replication {
                    message: format!(
                        "Replication slot '{}' uses plugin {:?}, expected pgoutput",
                        self.slot_name, plugin
                    ),
                });
            }
            info!("Using existing replication slot '{}'", self.slot_name);
            Ok(())
        } else if create_if_missing {
            self.create_replication_slot().await
        } else {
            Err(Error::Replication {
                message: format!("Replication slot '{}' does not exist", self.slot_name),
            })
        }
    }

    pub async fn create_replication_slot(&self) -> Result<()> {
        info!("Creating replication slot: {}", self.slot_name);

        match self
            .client
            .query_one(
                "SELECT lsn::text FROM pg_create_logical_replication_slot($1, 'pgoutput')",
                &[&self.slot_name],
            )
            .await
        {
            Ok(row) => {
                let lsn: String = row.get(0);
                info!("Created replication slot '{}' at LSN {}", self.slot_name, lsn);
                Ok(())
            }
            Err(e) => {
                if e.to_string().contains("already exists") {
                    info!("Replication slot '{}' already exists", self.slot_name);
                    Ok(())
                } else {
                    Err(Error::Postgres(e))
                }
            }
        }
    }

    pub async fn drop_replication_slot(&self) -> Result<()> {
        info!("Dropping replication slot: {}", self.slot_name);

        match self
            .client
            .execute("SELECT pg_drop_replication_slot($1)", &[&self.slot_name])
            .await
        {
            Ok(_) => {
                info!("Dropped replication slot '{}'", self.slot_name);
                Ok(())
            }
            Err(e) => {
                if e.to_string().contains("does not exist") {
                    warn!("Replication slot '{}' does not exist", self.slot_name);
                    Ok(())
                } else {
                    Err(Error::Postgres(e))
                }
            }
        }
    }

    /// Position up to which the server considers the slot's changes
    /// consumed. Streaming resumes from here.
    pub async fn confirmed_flush_lsn(&self) -> Result<Option<Lsn>> {
        let row = self
            .client
            .query_opt(
                "SELECT confirmed_flush_lsn::text FROM pg_replication_slots WHERE slot_name = $1",
                &[&self.slot_name],
            )
            .await?;

        row.and_then(|r| r.get::<_, Option<String>>(0))
            .map(|s| s.parse())
            .transpose()
    }

    pub async fn close(self) -> Result<()> {
        info!("Closing control connection");
        drop(self.client);
        self.connection_task.abort();
        Ok(())
    }
}
