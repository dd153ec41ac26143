//! Async connection surface for the transom protocol.
//!
//! A thin runtime around [`transom_core`]'s pure state machine. Every
//! connection owns one dispatcher task that funnels channel events, caller
//! commands, and keepalive ticks through the state machine and executes the
//! actions it returns. Callers hold a cheap cloneable [`Connection`] handle
//! whose suspension points are exactly [`Connection::establish`] and
//! [`Connection::request`].
//!
//! The channel itself is abstracted behind two explicit capabilities,
//! [`Peer`] (send) and [`Listener`] (receive + own origin); anything
//! satisfying them works - real cross-context messaging, the in-memory test
//! pipe, a socket bridge.

pub mod channel;
pub mod config;
pub mod connection;
pub mod env;
pub mod request;
mod runtime;

pub use channel::{ChannelError, ChannelEvent, Listener, Peer};
pub use config::EstablishConfig;
pub use connection::Connection;
pub use env::SystemEnv;
pub use request::IncomingRequest;
pub use runtime::CloseScope;
pub use transom_core::{
    CloseReason, ConnectionConfig, ConnectionError, Environment, HandlerId, OriginFilter, Role,
};
pub use transom_proto::{Envelope, EnvelopeKind, Origin, RequestId, Route};
