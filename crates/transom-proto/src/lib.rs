//! Wire format for the transom protocol.
//!
//! A transom envelope is a flat JSON object: a constant `domain` marker that
//! separates protocol traffic from everything else sharing the channel, a
//! `kind` discriminant, and kind-specific fields (`requestId`, `route`,
//! `payload`). Payloads are opaque JSON values; the protocol correlates and
//! routes them without inspecting their contents.
//!
//! # Security
//!
//! The channel is shared and adversarial, so the parsing boundary never
//! surfaces errors for inbound data: anything that is not a well-formed
//! envelope of a known kind is treated as absent. Validation happens exactly
//! once, here, and the rest of the stack only ever sees typed envelopes.

pub mod envelope;
pub mod errors;
pub mod ident;
pub mod origin;

pub use envelope::{Envelope, EnvelopeKind, PROTOCOL_DOMAIN};
pub use errors::ProtocolError;
pub use ident::{RequestId, Route};
pub use origin::Origin;
