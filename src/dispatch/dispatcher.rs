use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::buffer::{PendingEvent, TransactionBuffer};
use super::event::{Event, Field, OperationType};
use super::relation::RelationDirectory;
use super::source::{MessageSource, SourceMessage};
use super::subscription::{Handler, Pattern, SubscriptionRegistry};
use super::value::convert_column;
use crate::config::HandlerFailurePolicy;
use crate::postgres::{BeginMessage, CommitMessage, DecodedMessage, Lsn, TupleData};
use crate::{Error, Result};

/// The transaction currently being received.
#[derive(Debug)]
struct TransactionContext {
    xid: u32,
    begin_lsn: Lsn,
    commit_timestamp: DateTime<Utc>,
}

/// Turns the decoded replication feed into handler calls.
///
/// Row changes are converted, matched against the registered subscriptions
/// and buffered. Only when their transaction commits are the buffered events
/// handed to their handlers, in the order the rows arrived. Handlers
/// therefore only ever see committed data, and the events of one
/// transaction are delivered back to back.
pub struct Dispatcher {
    relations: RelationDirectory,
    subscriptions: SubscriptionRegistry,
    buffer: TransactionBuffer,
    transaction: Option<TransactionContext>,
    failure_policy: HandlerFailurePolicy,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_failure_policy(HandlerFailurePolicy::default())
    }

    pub fn with_failure_policy(failure_policy: HandlerFailurePolicy) -> Self {
        Self {
            relations: RelationDirectory::new(),
            subscriptions: SubscriptionRegistry::new(),
            buffer: TransactionBuffer::new(),
            transaction: None,
            failure_policy,
        }
    }

    pub fn register(
        &mut self,
        op: OperationType,
        schema: Pattern,
        table: Pattern,
        handler: Arc<dyn Handler>,
    ) {
        debug!(%op, %schema, %table, "Registering handler");
        self.subscriptions.register(op, schema, table, handler);
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn relations(&self) -> &RelationDirectory {
        &self.relations
    }

    pub fn failure_policy(&self) -> HandlerFailurePolicy {
        self.failure_policy
    }

    /// Whether a Begin has been seen without its Commit yet.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Number of (handler, event) pairs waiting for the open transaction to
    /// commit.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pulls messages from `source` until it ends, acknowledging each one
    /// after it has been fully processed.
    pub async fn run<S>(&mut self, source: &mut S) -> Result<()>
    where
        S: MessageSource + ?Sized,
    {
        let mut message_count: u64 = 0;

        while let Some(SourceMessage { lsn, message }) = source.recv().await? {
            trace!(%lsn, tag = %(message.tag() as char), "Dispatching message");
            self.dispatch(message)?;
            source.acknowledge(lsn).await?;
            message_count += 1;
        }

        if self.in_transaction() {
            warn!(
                buffered = self.buffer.len(),
                "Stream ended inside a transaction, dropping its events"
            );
        }
        info!(messages = message_count, "Replication stream ended");
        Ok(())
    }

    /// Processes one decoded message.
    ///
    /// Returns an error only when a handler fails under
    /// [`HandlerFailurePolicy::Abort`].
    pub fn dispatch(&mut self, message: DecodedMessage) -> Result<()> {
        match message {
            DecodedMessage::Relation(descriptor) => {
                debug!(
                    id = descriptor.id,
                    schema = %descriptor.schema,
                    table = %descriptor.table,
                    columns = descriptor.columns.len(),
                    "Relation descriptor"
                );
                self.relations.update(descriptor);
            }
            DecodedMessage::Begin(begin) => self.begin(begin),
            DecodedMessage::Insert(insert) => {
                self.row_change(OperationType::Insert, insert.relation_id, Some(&insert.new))
            }
            DecodedMessage::Update(update) => {
                self.row_change(OperationType::Update, update.relation_id, Some(&update.new))
            }
            DecodedMessage::Delete(delete) => {
                self.row_change(OperationType::Delete, delete.relation_id, Some(&delete.old))
            }
            DecodedMessage::Truncate(truncate) => {
                for relation_id in truncate.relation_ids {
                    self.row_change(OperationType::Truncate, relation_id, None);
                }
            }
            DecodedMessage::Commit(commit) => return self.commit(commit),
            DecodedMessage::Unknown { tag } => {
                trace!(tag = %(tag as char), "Ignoring message");
            }
        }
        Ok(())
    }

    fn begin(&mut self, begin: BeginMessage) {
        if let Some(previous) = self.transaction.take() {
            warn!(
                xid = previous.xid,
                buffered = self.buffer.len(),
                "Transaction began before the previous one committed, discarding its events"
            );
        }
        self.buffer.clear();

        debug!(xid = begin.xid, lsn = %begin.final_lsn, "BEGIN");
        self.transaction = Some(TransactionContext {
            xid: begin.xid,
            begin_lsn: begin.final_lsn,
            commit_timestamp: begin.commit_timestamp,
        });
    }

    fn row_change(&mut self, op: OperationType, relation_id: u32, tuple: Option<&TupleData>) {
        let Some(transaction) = &self.transaction else {
            warn!(%op, relation_id, "Row change outside of a transaction, skipping");
            return;
        };

        let Some(relation) = self.relations.lookup(relation_id) else {
            warn!(%op, relation_id, "Row change for unknown relation, skipping");
            return;
        };

        let handlers = self
            .subscriptions
            .matches(op, &relation.schema, &relation.table);
        if handlers.is_empty() {
            trace!(%op, schema = %relation.schema, table = %relation.table, "No subscribers");
            return;
        }

        let fields = match tuple {
            Some(tuple) if tuple.columns.len() != relation.columns.len() => {
                warn!(
                    %op,
                    relation_id,
                    expected = relation.columns.len(),
                    actual = tuple.columns.len(),
                    "Column count does not match relation descriptor, skipping"
                );
                return;
            }
            Some(tuple) => relation
                .columns
                .iter()
                .zip(&tuple.columns)
                .map(|(column, value)| Field {
                    name: column.name.clone(),
                    value: convert_column(column.type_id, value),
                    is_key: column.is_key,
                })
                .collect(),
            None => Vec::new(),
        };

        let event = Event {
            op,
            xid: transaction.xid,
            commit_timestamp: None,
            schema: relation.schema.clone(),
            table: relation.table.clone(),
            fields,
        };

        trace!(%op, schema = %event.schema, table = %event.table, handlers = handlers.len(), "Buffering event");
        self.buffer.push(event, handlers);
    }

    fn commit(&mut self, commit: CommitMessage) -> Result<()> {
        let Some(mut transaction) = self.transaction.take() else {
            warn!(lsn = %commit.end_lsn, "COMMIT without BEGIN, ignoring");
            self.buffer.clear();
            return Ok(());
        };
        transaction.commit_timestamp = commit.commit_timestamp;

        let pending = self.buffer.take();
        debug!(
            xid = transaction.xid,
            begin_lsn = %transaction.begin_lsn,
            end_lsn = %commit.end_lsn,
            events = pending.len(),
            "COMMIT"
        );

        for PendingEvent { mut event, handlers } in pending {
            event.xid = transaction.xid;
            event.commit_timestamp = Some(transaction.commit_timestamp);

            for handler in handlers {
                if let Err(e) = handler.handle(&event) {
                    match self.failure_policy {
                        HandlerFailurePolicy::Abort => {
                            return Err(Error::Handler {
                                schema: event.schema,
                                table: event.table,
                                source: e,
                            });
                        }
                        HandlerFailurePolicy::LogAndContinue => {
                            error!(
                                xid = transaction.xid,
                                schema = %event.schema,
                                table = %event.table,
                                op = %event.op,
                                error = %e,
                                "Handler failed, continuing with next delivery"
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
