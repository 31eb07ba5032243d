use async_trait::async_trait;

use crate::postgres::{DecodedMessage, Lsn};
use crate::Result;

/// A decoded message and the stream position it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMessage {
    pub lsn: Lsn,
    pub message: DecodedMessage,
}

impl SourceMessage {
    pub fn new(lsn: impl Into<Lsn>, message: DecodedMessage) -> Self {
        Self {
            lsn: lsn.into(),
            message,
        }
    }
}

/// The feed the dispatcher pulls from.
///
/// `recv` returns `Ok(None)` when the stream has ended. `acknowledge` reports
/// back that everything up to `lsn` has been processed; the dispatcher calls
/// it once for every message it received.
#[async_trait]
pub trait MessageSource: Send {
    async fn recv(&mut self) -> Result<Option<SourceMessage>>;

    async fn acknowledge(&mut self, lsn: Lsn) -> Result<()>;
}
