//! Request identifiers and routes.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::errors::ProtocolError;

/// Correlation identifier for a request/response pair.
///
/// Request ids are v4 UUIDs. The sender draws one per request from its own
/// randomness; the responder echoes it back verbatim. An envelope whose
/// `requestId` field does not parse as a UUID fails schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Build a v4 request id from 16 caller-supplied random bytes.
    ///
    /// Randomness is injected so deterministic environments can reproduce
    /// id sequences.
    #[must_use]
    pub fn from_random_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Parse a request id from its string form.
    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        Uuid::parse_str(value).map(Self).map_err(|e| ProtocolError::InvalidRequestId {
            value: value.to_string(),
            detail: e.to_string(),
        })
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A request route.
///
/// Routes name the operation a request targets. They must be URI-like
/// (a scheme followed by scheme-specific content, e.g. `greeter:hello` or
/// `https://example.com/search`); the original string is preserved verbatim
/// so peers can match on it without worrying about normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Route(String);

impl Route {
    /// Validate and wrap a route string.
    pub fn parse(route: impl Into<String>) -> Result<Self, ProtocolError> {
        let route = route.into();
        match url::Url::parse(&route) {
            Ok(_) => Ok(Self(route)),
            Err(e) => Err(ProtocolError::InvalidRoute { route, detail: e.to_string() }),
        }
    }

    /// The route as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Route {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Route {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_round_trips_through_string_form() {
        let id = RequestId::from_random_bytes([7; 16]);
        let parsed = RequestId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn request_id_rejects_non_uuid() {
        assert!(RequestId::parse("not-a-uuid").is_err());
        assert!(RequestId::parse("").is_err());
    }

    #[test]
    fn route_accepts_uri_like_strings() {
        assert!(Route::parse("greeter:hello").is_ok());
        assert!(Route::parse("https://example.com/search").is_ok());
        assert!(Route::parse("app:orders:list").is_ok());
    }

    #[test]
    fn route_rejects_schemeless_strings() {
        assert!(Route::parse("hello").is_err());
        assert!(Route::parse("").is_err());
        assert!(Route::parse("/relative/path").is_err());
    }

    #[test]
    fn route_preserves_original_string() {
        let route = Route::parse("app:Orders:LIST").unwrap();
        assert_eq!(route.as_str(), "app:Orders:LIST");
    }
}
