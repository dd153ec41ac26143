//! Channel capability traits.
//!
//! The protocol consumes exactly two capabilities from its transport: a way
//! to send a value toward an origin, and a stream of inbound events tagged
//! with the origin they arrived from. The transport's origin tagging is the
//! protocol's only trust anchor, so implementations must report origins
//! truthfully; everything else about delivery (ordering, loss, duplication)
//! is tolerated.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use transom_core::Destination;
use transom_proto::Origin;

/// One inbound message event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    /// The origin the transport attributes this event to.
    pub origin: Origin,
    /// The raw payload; not yet validated as protocol traffic.
    pub data: Value,
}

/// Errors from the send capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The transport could not perform the send.
    #[error("channel send failed: {detail}")]
    SendFailed {
        /// Transport diagnostic.
        detail: String,
    },
}

/// Capability to send a message toward the peer.
pub trait Peer: Send + 'static {
    /// Hand `data` to the transport for delivery to `destination`.
    ///
    /// Delivery is best-effort; an `Ok` only means the transport accepted
    /// the message.
    fn send(&self, data: Value, destination: &Destination) -> Result<(), ChannelError>;
}

/// Capability to receive channel events, bound to a local origin.
#[async_trait]
pub trait Listener: Send + 'static {
    /// The origin this endpoint listens as.
    fn origin(&self) -> Origin;

    /// Wait for the next inbound event. `None` means the transport is gone
    /// for good.
    async fn recv(&mut self) -> Option<ChannelEvent>;
}
