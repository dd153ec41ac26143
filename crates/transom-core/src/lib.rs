//! Transom protocol core logic
//!
//! Pure state machine logic for the transom connection protocol, completely
//! decoupled from I/O. This enables deterministic testing of every lifecycle
//! path, including the ones that are hard to reach over a real channel.
//!
//! # Architecture
//!
//! Protocol logic in this crate is implemented as a deterministic state
//! machine that is isolated from I/O, time, randomness, and scheduling.
//! Time is passed in explicitly; randomness comes from an injected
//! [`env::Environment`].
//!
//! State transitions produce declarative [`connection::ConnectionAction`]s
//! that describe intended effects rather than executing them directly. A
//! runtime or test harness is responsible for interpreting and executing
//! these actions.
//!
//! This separation keeps protocol correctness independent of execution
//! concerns and allows the same code to be reused across production
//! runtimes and deterministic tests.
//!
//! # Components
//!
//! - [`connection`]: Connection lifecycle state machine (handshake,
//!   keepalive, dispatch, teardown)
//! - [`requests`]: Request/response correlation bookkeeping
//! - [`filter`]: Allow/deny policy over peer origins
//! - [`handlers`]: Token-based handler registries
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`error`]: Connection error types

pub mod connection;
pub mod env;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod requests;

pub use connection::{
    CloseReason, Connection, ConnectionAction, ConnectionConfig, ConnectionState, Destination, Role,
};
pub use env::Environment;
pub use error::ConnectionError;
pub use filter::OriginFilter;
pub use handlers::HandlerId;
