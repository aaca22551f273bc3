//! Message state machine for the queue.

use serde::{Deserialize, Serialize};

/// Message state.
///
/// State transitions:
/// - Visible -> InFlight (dequeue)
/// - InFlight -> (deleted) (acknowledge)
/// - InFlight -> Visible (visibility timeout elapsed)
/// - Visible | InFlight -> (purged) (retention elapsed)
///
/// Deleted and purged messages leave the store, so there is no terminal variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// Eligible for delivery.
    Visible,

    /// Leased by a consumer; hidden until the lease expires.
    InFlight,
}

impl MessageState {
    pub fn is_deliverable(self) -> bool {
        matches!(self, MessageState::Visible)
    }
}
