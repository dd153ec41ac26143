//! Deterministic test harness for the transom protocol.
//!
//! In-memory implementations of the channel capabilities and the
//! environment, plus a scenario framework for exercising the pure state
//! machine, so protocol behavior can be tested reproducibly under
//! controlled time, randomness, and channel faults.

pub mod pipe;
pub mod scenario;
pub mod sim_env;

pub use pipe::{PipeListener, PipePeer, SentRecord, SimEndpoint, SimLink, sim_link};
pub use sim_env::SimEnv;
