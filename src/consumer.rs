use std::sync::Arc;
use tracing::info;

use crate::dispatch::{Dispatcher, Handler, MessageSource, OperationType, Pattern};
use crate::postgres::{Lsn, PgOutputStream, ReplicationConnection, StreamOptions};
use crate::{Config, Result};

/// Subscribes handlers to table changes and runs them against a logical
/// replication slot.
///
/// ```no_run
/// use pg_dispatch::{Config, Consumer, Event, OperationType};
///
/// # async fn run() -> pg_dispatch::Result<()> {
/// let mut consumer = Consumer::new(Config::from_env()?);
/// consumer.on(OperationType::Update, "public.*", |event: &Event| -> anyhow::Result<()> {
///     println!("{}.{} changed", event.schema, event.table);
///     Ok(())
/// })?;
/// consumer.start("slot1", "pub1").await
/// # }
/// ```
pub struct Consumer {
    config: Config,
    dispatcher: Dispatcher,
}

impl Consumer {
    pub fn new(config: Config) -> Self {
        let dispatcher = Dispatcher::with_failure_policy(config.replication.handler_failure);
        Self { config, dispatcher }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn register(
        &mut self,
        op: OperationType,
        schema: Pattern,
        table: Pattern,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        self.dispatcher.register(op, schema, table, handler);
        self
    }

    /// Registers `handler` for `op` on every table matching `qualified`
    /// (`schema.table`, either part may be `*`).
    pub fn on<H>(&mut self, op: OperationType, qualified: &str, handler: H) -> Result<&mut Self>
    where
        H: Handler + 'static,
    {
        let (schema, table) = Pattern::parse_qualified(qualified)?;
        Ok(self.register(op, schema, table, Arc::new(handler)))
    }

    /// Registers `handler` for all four operations on `qualified`.
    pub fn on_all<H>(&mut self, qualified: &str, handler: H) -> Result<&mut Self>
    where
        H: Handler + 'static,
    {
        let (schema, table) = Pattern::parse_qualified(qualified)?;
        let handler: Arc<dyn Handler> = Arc::new(handler);
        for op in OperationType::ALL {
            self.register(op, schema.clone(), table.clone(), Arc::clone(&handler));
        }
        Ok(self)
    }

    /// Prepares `slot`, opens the change stream for `publication` and
    /// dispatches until the stream ends or an unrecoverable error occurs.
    pub async fn start(&mut self, slot: &str, publication: &str) -> Result<()> {
        info!(
            slot,
            publication,
            subscriptions = self.dispatcher.subscriptions().len(),
            "Consumer starting"
        );

        let control =
            ReplicationConnection::new(&self.config.postgres_config(), slot.to_string()).await?;
        control.ensure_slot(self.config.replication.create_slot).await?;
        let start_lsn = control.confirmed_flush_lsn().await?.unwrap_or(Lsn::ZERO);
        control.close().await?;

        let mut options = StreamOptions::from_config(&self.config, start_lsn);
        options.slot = slot.to_string();
        options.publication = publication.to_string();

        let mut stream = PgOutputStream::connect(options).await?;
        self.run(&mut stream).await
    }

    /// Runs the dispatch loop against an already opened source.
    pub async fn run<S>(&mut self, source: &mut S) -> Result<()>
    where
        S: MessageSource + ?Sized,
    {
        self.dispatcher.run(source).await
    }
}
