//! Envelope union and the schema validation boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::ident::{RequestId, Route};

/// Domain marker present on every envelope.
///
/// Distinguishes protocol traffic from unrelated messages on the shared
/// channel. An object without this exact marker is not an envelope.
pub const PROTOCOL_DOMAIN: &str = "transom";

/// One protocol message unit.
///
/// Serializes to a flat JSON object: the `domain` marker plus the fields of
/// [`EnvelopeKind`]. Use [`Envelope::parse`] at the inbound boundary and the
/// kind constructors for outbound traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    domain: Domain,
    /// The kind discriminant and kind-specific fields.
    #[serde(flatten)]
    pub kind: EnvelopeKind,
}

/// The closed set of envelope kinds, discriminated by the `kind` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EnvelopeKind {
    /// Acceptor's untargeted handshake opener.
    HandshakeInit,
    /// Initiator's targeted handshake reply.
    HandshakeComplete,
    /// Liveness probe.
    Ping,
    /// Liveness probe reply.
    Pong,
    /// Notice that the sender has closed the connection.
    ConnectionClosed,
    /// Fire-and-forget application message.
    Common {
        /// Opaque application payload.
        #[serde(default)]
        payload: Value,
    },
    /// Correlated request.
    Request {
        /// Correlation id, echoed back by the response.
        #[serde(rename = "requestId")]
        request_id: RequestId,
        /// The operation this request targets.
        route: Route,
        /// Opaque application payload.
        #[serde(default)]
        payload: Value,
    },
    /// Reply to a previously received request.
    Response {
        /// Correlation id of the request being answered.
        #[serde(rename = "requestId")]
        request_id: RequestId,
        /// Opaque application payload.
        #[serde(default)]
        payload: Value,
    },
}

impl Envelope {
    /// Validate a raw channel value into a typed envelope.
    ///
    /// Returns `None` for anything that is not a well-formed envelope of a
    /// known kind: wrong or missing domain marker, unknown `kind`, missing
    /// or malformed kind-specific fields. Rejection is silent; the channel
    /// carries unrelated traffic that must not be disturbed.
    #[must_use]
    pub fn parse(raw: &Value) -> Option<Self> {
        if !raw.is_object() {
            return None;
        }
        serde_json::from_value(raw.clone()).ok()
    }

    /// Serialize for the wire.
    #[must_use]
    pub fn to_value(&self) -> Value {
        // Every field is a string or already a JSON value, so
        // serialization has no failure path.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn of(kind: EnvelopeKind) -> Self {
        Self { domain: Domain, kind }
    }

    /// Handshake opener.
    #[must_use]
    pub fn handshake_init() -> Self {
        Self::of(EnvelopeKind::HandshakeInit)
    }

    /// Handshake reply.
    #[must_use]
    pub fn handshake_complete() -> Self {
        Self::of(EnvelopeKind::HandshakeComplete)
    }

    /// Liveness probe.
    #[must_use]
    pub fn ping() -> Self {
        Self::of(EnvelopeKind::Ping)
    }

    /// Liveness probe reply.
    #[must_use]
    pub fn pong() -> Self {
        Self::of(EnvelopeKind::Pong)
    }

    /// Closure notice.
    #[must_use]
    pub fn connection_closed() -> Self {
        Self::of(EnvelopeKind::ConnectionClosed)
    }

    /// Fire-and-forget message carrying `payload`.
    #[must_use]
    pub fn common(payload: Value) -> Self {
        Self::of(EnvelopeKind::Common { payload })
    }

    /// Request on `route` correlated by `request_id`.
    #[must_use]
    pub fn request(request_id: RequestId, route: Route, payload: Value) -> Self {
        Self::of(EnvelopeKind::Request { request_id, route, payload })
    }

    /// Response correlated by `request_id`.
    #[must_use]
    pub fn response(request_id: RequestId, payload: Value) -> Self {
        Self::of(EnvelopeKind::Response { request_id, payload })
    }
}

/// Zero-sized stand-in for the constant `domain` field.
///
/// Serializes as [`PROTOCOL_DOMAIN`]; deserialization fails on any other
/// value, which makes the marker check part of schema validation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Domain;

impl Serialize for Domain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(PROTOCOL_DOMAIN)
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == PROTOCOL_DOMAIN {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom("unknown protocol domain"))
        }
    }
}
