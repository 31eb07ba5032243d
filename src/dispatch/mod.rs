//! Routing of decoded replication messages to subscribed handlers.

pub mod buffer;
pub mod dispatcher;
pub mod event;
pub mod relation;
pub mod source;
pub mod subscription;
pub mod value;


pub use buffer::TransactionBuffer;
pub use dispatcher::Dispatcher;
pub use event::{Event, Field, OperationType};
pub use relation::RelationDirectory;
pub use source::{MessageSource, SourceMessage};
pub use subscription::{Handler, Pattern, Subscription, SubscriptionRegistry};
pub use value::{convert, convert_column, PgType, TypedValue};
