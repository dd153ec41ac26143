//! Origin identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The origin of a channel endpoint.
///
/// Origins are opaque strings supplied by the channel itself (for browser
/// messaging this is the scheme-host-port triple). The protocol never
/// derives origins from message contents: the channel's own tagging is the
/// only trust anchor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Origin(String);

impl Origin {
    /// Wrap an origin string.
    pub fn new(origin: impl Into<String>) -> Self {
        Self(origin.into())
    }

    /// The origin as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Origin {
    fn from(origin: &str) -> Self {
        Self::new(origin)
    }
}

impl From<String> for Origin {
    fn from(origin: String) -> Self {
        Self(origin)
    }
}

impl AsRef<str> for Origin {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
