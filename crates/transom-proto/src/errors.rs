//! Error types for outbound envelope construction.
//!
//! Only the outbound paths can fail. Inbound parsing is silent: a malformed
//! envelope is indistinguishable from unrelated channel traffic and must not
//! produce an observable error.

use thiserror::Error;

/// Errors from constructing protocol values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The route is not a well-formed URI-like string.
    #[error("invalid route '{route}': {detail}")]
    InvalidRoute {
        /// The rejected route string.
        route: String,
        /// Parser diagnostic.
        detail: String,
    },

    /// The request identifier is not a well-formed UUID.
    #[error("invalid request id '{value}': {detail}")]
    InvalidRequestId {
        /// The rejected identifier string.
        value: String,
        /// Parser diagnostic.
        detail: String,
    },
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
