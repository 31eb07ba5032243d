use std::sync::Arc;

use super::event::Event;
use super::subscription::Handler;

/// An event of the open transaction together with every handler it matched.
pub struct PendingEvent {
    pub event: Event,
    pub handlers: Vec<Arc<dyn Handler>>,
}

/// Matched events of the currently open transaction, in arrival order.
///
/// Nothing in here has been delivered yet. The buffer is drained when the
/// transaction commits and discarded when it is abandoned.
#[derive(Default)]
pub struct TransactionBuffer {
    pending: Vec<PendingEvent>,
    pairs: usize,
}

impl TransactionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `event` for every handler in `handlers`. An empty handler list
    /// buffers nothing.
    pub fn push(&mut self, event: Event, handlers: Vec<Arc<dyn Handler>>) {
        if handlers.is_empty() {
            return;
        }
        self.pairs += handlers.len();
        self.pending.push(PendingEvent { event, handlers });
    }

    /// Removes and returns everything buffered, oldest first.
    pub fn take(&mut self) -> Vec<PendingEvent> {
        self.pairs = 0;
        std::mem::take(&mut self.pending)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.pairs = 0;
    }

    /// Number of buffered (handler, event) pairs.
    pub fn len(&self) -> usize {
        self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs == 0
    }

    /// Number of buffered events, regardless of how many handlers each has.
    pub fn event_count(&self) -> usize {
        self.pending.len()
    }
}
