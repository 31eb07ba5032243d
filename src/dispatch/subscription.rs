//! Subscriptions: which handlers want which events.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::event::{Event, OperationType};
use crate::{Error, Result};

/// Receives committed row-change events.
///
/// Implemented for any `Fn(&Event) -> anyhow::Result<()>` closure, so most
/// callers register closures directly.
pub trait Handler: Send + Sync {
    fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self(event)
    }
}

/// A schema or table name filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `*`: matches every name.
    Any,
    Exact(String),
}

impl Pattern {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(expected) => expected == name,
        }
    }

    /// Splits a `schema.table` filter such as `public.*` into its two patterns.
    pub fn parse_qualified(qualified: &str) -> Result<(Pattern, Pattern)> {
        let (schema, table) = qualified.split_once('.').ok_or_else(|| {
            Error::Config(format!(
                "Expected a schema.table pattern, got '{}'",
                qualified
            ))
        })?;
        Ok((schema.parse()?, table.parse()?))
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Err(Error::Config("Empty schema or table pattern".to_string())),
            "*" => Ok(Pattern::Any),
            name => Ok(Pattern::Exact(name.to_string())),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => f.write_str("*"),
            Pattern::Exact(name) => f.write_str(name),
        }
    }
}

pub struct Subscription {
    pub op: OperationType,
    pub schema: Pattern,
    pub table: Pattern,
    pub handler: Arc<dyn Handler>,
}

impl Subscription {
    pub fn matches(&self, op: OperationType, schema: &str, table: &str) -> bool {
        self.op == op && self.schema.matches(schema) && self.table.matches(table)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscription({} {}.{})", self.op, self.schema, self.table)
    }
}

/// Append-only list of subscriptions, kept in registration order.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription. Registering the same handler twice makes it
    /// fire twice.
    pub fn register(
        &mut self,
        op: OperationType,
        schema: Pattern,
        table: Pattern,
        handler: Arc<dyn Handler>,
    ) {
        self.subscriptions.push(Subscription {
            op,
            schema,
            table,
            handler,
        });
    }

    /// Handlers interested in the given change, in registration order.
    pub fn matches(&self, op: OperationType, schema: &str, table: &str) -> Vec<Arc<dyn Handler>> {
        self.subscriptions
            .iter()
            .filter(|s| s.matches(op, schema, table))
            .map(|s| Arc::clone(&s.handler))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
