//! Connection error types.

use thiserror::Error;
use transom_proto::Origin;

use crate::connection::{CloseReason, ConnectionState};

/// Errors surfaced to callers of connection operations.
///
/// Malformed or mistrusted inbound data never produces one of these: the
/// channel is shared and adversarial, so defensive filtering stays silent.
/// Errors exist only for the caller's own operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// A host channel primitive was unavailable or refused the send.
    #[error("unsupported feature: {detail}")]
    UnsupportedFeature {
        /// What the host transport could not do.
        detail: String,
    },

    /// The origin filter rejected the connecting peer during handshake.
    #[error("did not expect a connection from peer '{origin}'")]
    UnexpectedPeer {
        /// The rejected peer origin.
        origin: Origin,
    },

    /// Operation attempted on a connection in the wrong state.
    #[error("cannot {operation} while connection is {state:?}")]
    InvalidState {
        /// State the connection was in.
        state: ConnectionState,
        /// The attempted operation.
        operation: &'static str,
    },

    /// The connection closed; used to reject operations that were pending
    /// at closure time and everything attempted afterwards.
    #[error("connection {reason}")]
    Closed {
        /// Why the connection closed.
        reason: CloseReason,
    },

    /// Defensive catch-all for protocol-logic violations that should be
    /// impossible.
    #[error("protocol invariant violated: {detail}")]
    Unreachable {
        /// Description of the violated invariant.
        detail: String,
    },
}
