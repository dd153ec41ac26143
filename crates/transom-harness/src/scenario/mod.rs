//! Scenario framework for the pure state machine.
//!
//! Scenarios pair an initiator and an acceptor connection, route the
//! actions each machine produces into the other as channel events, and
//! finish with a mandatory oracle that verifies the resulting world. No
//! scenario runs without verification.

pub mod builder;
pub mod oracle;
pub mod world;

pub use builder::{RunnableScenario, Scenario};
pub use oracle::OracleFn;
pub use world::{Side, SideRecord, World};
