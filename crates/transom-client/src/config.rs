//! Connection configuration.

use transom_core::{ConnectionConfig, Environment, OriginFilter, Role};
use transom_proto::Origin;

use crate::env::SystemEnv;

/// Everything needed to establish a connection: the two channel
/// capabilities, the handshake role, timing constants, and the environment.
///
/// Both capabilities are explicit; there is no ambient default channel.
/// Platform adapters construct the capability pair and hand it in here.
#[derive(Debug)]
pub struct EstablishConfig<P, L, E = SystemEnv> {
    /// Capability for sending toward the peer.
    pub peer: P,
    /// Capability for receiving inbound events.
    pub listener: L,
    /// Handshake role.
    pub role: Role,
    /// Timing constants for the keepalive monitor.
    pub timing: ConnectionConfig,
    /// Time and randomness source.
    pub env: E,
}

impl<P, L> EstablishConfig<P, L> {
    /// Configure the initiator ("parent") role, which knows the expected
    /// peer origin in advance.
    pub fn initiator(peer: P, listener: L, peer_origin: Origin) -> Self {
        Self {
            peer,
            listener,
            role: Role::Initiator { peer_origin },
            timing: ConnectionConfig::default(),
            env: SystemEnv,
        }
    }

    /// Configure the acceptor ("child") role. With no filter supplied the
    /// connection is closed by default: every peer is rejected until
    /// [`Self::with_filter`] opens it up.
    pub fn acceptor(peer: P, listener: L) -> Self {
        Self {
            peer,
            listener,
            role: Role::Acceptor { filter: None },
            timing: ConnectionConfig::default(),
            env: SystemEnv,
        }
    }
}

impl<P, L, E> EstablishConfig<P, L, E> {
    /// Set the acceptor's origin filter. Ignored for the initiator role,
    /// which implicitly expects exactly the configured peer origin.
    #[must_use]
    pub fn with_filter(mut self, filter: OriginFilter) -> Self {
        if let Role::Acceptor { filter: slot } = &mut self.role {
            *slot = Some(filter);
        }
        self
    }

    /// Override the keepalive timing constants.
    #[must_use]
    pub fn with_timing(mut self, timing: ConnectionConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Swap in a different environment (deterministic tests).
    pub fn with_env<E2: Environment>(self, env: E2) -> EstablishConfig<P, L, E2> {
        EstablishConfig {
            peer: self.peer,
            listener: self.listener,
            role: self.role,
            timing: self.timing,
            env,
        }
    }
}
