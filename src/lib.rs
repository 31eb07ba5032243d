pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod error;

pub mod postgres;

pub use config::{Config, HandlerFailurePolicy};
pub use consumer::Consumer;
pub use dispatch::{Dispatcher, Event, Field, Handler, OperationType, Pattern, TypedValue};
pub use error::{Error, Result};
