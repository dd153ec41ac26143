//! Connection state machine for the transom protocol.
//!
//! This module implements the session layer - managing connection lifecycle,
//! handshake, keepalive, request correlation, and teardown.
//!
//! # Architecture: Action-Based State Machine
//!
//! This state machine follows the action pattern:
//! - Methods accept time as a parameter (no stored clock)
//! - Methods return `Vec<ConnectionAction>` (or `Result` thereof for
//!   caller-initiated operations)
//! - Driver code executes actions (send envelopes, run handlers, resolve
//!   request futures, etc.)
//!
//! This enables:
//! - Pure protocol logic (no I/O)
//! - Easy testing (no mocking time/RNG)
//! - Composability (production runtime and test harness share one machine)
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐  handshake ok   ┌────────┐
//! │ Establishing │────────────────>│ Active │
//! └──────────────┘                 └────────┘
//!        │                             │
//!        │ filter rejected             │ close()/peer close/timeout
//!        ↓                             ↓
//!   ┌────────┐                    ┌────────┐
//!   │ Closed │                    │ Closed │
//!   └────────┘                    └────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. **Establishing**: created by `establish`; the acceptor has broadcast
//!    its handshake opener, the initiator is waiting for one
//! 2. **Active**: handshake complete, peer origin verified; application
//!    traffic flows
//! 3. **Closed**: terminal; a new handshake needs a new connection
//!
//! # Timeouts
//!
//! - **Ping interval**: 5 seconds of silence before probing the peer
//! - **Connection timeout**: 30 seconds of silence before giving up
//!
//! Only *received* messages reset the silence clock, so a peer that keeps
//! sending into a dead channel still times out. Any bidirectional traffic
//! keeps the connection alive without explicit pings.

use std::time::{Duration, Instant};

use serde_json::Value;
use transom_proto::{Envelope, EnvelopeKind, Origin, RequestId, Route};

use crate::{
    env::Environment,
    error::ConnectionError,
    filter::OriginFilter,
    handlers::{HandlerId, HandlerRegistry, RouteRegistry},
    requests::RequestCorrelator,
};

/// Actions returned by the connection state machine.
///
/// The driver (production runtime or test harness) executes these:
/// sends go to the channel, deliveries go to registered handlers,
/// resolutions and rejections complete request futures.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    /// Hand this envelope to the channel.
    Send {
        /// The envelope to serialize and send.
        envelope: Envelope,
        /// Where to send it.
        destination: Destination,
    },

    /// The handshake completed; the establishing caller can proceed.
    Established {
        /// The verified peer origin.
        peer_origin: Origin,
    },

    /// The handshake failed; the establishing caller gets the error.
    EstablishFailed {
        /// Why establishment failed.
        error: ConnectionError,
    },

    /// Invoke every broadcast handler with this payload.
    DeliverCommon {
        /// The application payload.
        payload: Value,
    },

    /// Invoke every request handler registered for `route`.
    DeliverRequest {
        /// Correlation id the eventual response must echo.
        request_id: RequestId,
        /// The route the request targets.
        route: Route,
        /// The application payload.
        payload: Value,
    },

    /// A response arrived for a pending outbound request.
    ResolveRequest {
        /// The resolved request.
        request_id: RequestId,
        /// The response payload.
        payload: Value,
    },

    /// The connection closed while this outbound request was pending.
    RejectRequest {
        /// The rejected request.
        request_id: RequestId,
        /// Why the connection closed.
        reason: CloseReason,
    },

    /// Stop delivering channel events to this connection.
    DetachListener,

    /// Invoke every after-close handler with the closure reason.
    NotifyClosed {
        /// Why the connection closed.
        reason: CloseReason,
    },
}

/// Where an outbound envelope should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A specific origin.
    Peer(Origin),
    /// Untargeted broadcast. Only the acceptor's handshake opener uses
    /// this: the peer origin is not known yet, so it cannot be targeted.
    Any,
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress.
    Establishing,
    /// Handshake complete; peer origin verified.
    Active,
    /// Terminal.
    Closed,
}

/// Why a connection closed.
///
/// The `Display` form is the exact reason string handed to after-close
/// handlers and embedded in rejection errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// This side called close.
    ClosedByThis,
    /// The peer sent a closure notice.
    ClosedByPeer,
    /// The keepalive deadline expired.
    TimedOut,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ClosedByThis => "closed by this",
            Self::ClosedByPeer => "closed by peer",
            Self::TimedOut => "timed out",
        })
    }
}

/// The handshake role of this endpoint.
#[derive(Debug, Clone)]
pub enum Role {
    /// The side that knows the expected peer origin in advance (the
    /// "parent" in a window/frame setup). Waits for a handshake opener and
    /// replies directly to the configured origin.
    Initiator {
        /// The origin this endpoint expects to talk to.
        peer_origin: Origin,
    },
    /// The side that announces itself without knowing who is listening
    /// (the "child"). Broadcasts the handshake opener and filters whoever
    /// answers.
    Acceptor {
        /// Allow/deny policy for the answering origin. `None` materializes
        /// the default deny-all filter on first use.
        filter: Option<OriginFilter>,
    },
}

/// Connection timing configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Silence before a liveness probe is sent. Also the driver's tick
    /// period.
    pub ping_interval: Duration,
    /// Silence before the connection is declared dead. Must be larger than
    /// `ping_interval`.
    pub connection_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection state machine.
///
/// Owns every piece of per-connection mutable state: lifecycle, verified
/// peer origin, silence clock, request correlation, and handler token
/// registries. All mutation flows through its methods; a driver that
/// funnels channel events, commands, and timer ticks through one dispatch
/// loop gets the protocol's single-threaded semantics for free.
#[derive(Debug, Clone)]
pub struct Connection<E: Environment> {
    env: E,
    config: ConnectionConfig,
    state: ConnectionState,
    role: Role,
    local_origin: Origin,
    peer_origin: Option<Origin>,
    last_received: Instant,
    closed_reason: Option<CloseReason>,
    next_handler_id: u64,
    correlator: RequestCorrelator,
    common_handlers: HandlerRegistry,
    before_close_handlers: HandlerRegistry,
    after_close_handlers: HandlerRegistry,
    request_handlers: RouteRegistry,
}

impl<E: Environment> Connection<E> {
    /// Create a connection in the Establishing state.
    ///
    /// Returns the machine plus the actions that begin the handshake: the
    /// acceptor broadcasts its untargeted opener, the initiator just
    /// listens.
    pub fn establish(
        env: E,
        local_origin: Origin,
        role: Role,
        config: ConnectionConfig,
        now: Instant,
    ) -> (Self, Vec<ConnectionAction>) {
        let peer_origin = match &role {
            Role::Initiator { peer_origin } => Some(peer_origin.clone()),
            Role::Acceptor { .. } => None,
        };
        let opening = match &role {
            Role::Acceptor { .. } => vec![ConnectionAction::Send {
                envelope: Envelope::handshake_init(),
                destination: Destination::Any,
            }],
            Role::Initiator { .. } => vec![],
        };

        let connection = Self {
            env,
            config,
            state: ConnectionState::Establishing,
            role,
            local_origin,
            peer_origin,
            last_received: now,
            closed_reason: None,
            next_handler_id: 0,
            correlator: RequestCorrelator::default(),
            common_handlers: HandlerRegistry::default(),
            before_close_handlers: HandlerRegistry::default(),
            after_close_handlers: HandlerRegistry::default(),
            request_handlers: RouteRegistry::default(),
        };

        (connection, opening)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection can carry application traffic.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    /// The verified peer origin, once known.
    #[must_use]
    pub fn peer_origin(&self) -> Option<&Origin> {
        self.peer_origin.as_ref()
    }

    /// This endpoint's own origin.
    #[must_use]
    pub fn local_origin(&self) -> &Origin {
        &self.local_origin
    }

    /// Why the connection closed, if it has.
    #[must_use]
    pub fn closed_reason(&self) -> Option<CloseReason> {
        self.closed_reason
    }

    /// Timing configuration.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Number of outbound requests awaiting a response.
    #[must_use]
    pub fn pending_request_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Number of inbound requests awaiting a local response.
    #[must_use]
    pub fn in_process_request_count(&self) -> usize {
        self.correlator.in_process_count()
    }

    /// Process one inbound channel event.
    ///
    /// This is the single dispatch point for everything the channel
    /// delivers. Anything malformed, foreign, or mistrusted is discarded
    /// without side effects; the method itself never fails.
    pub fn handle_event(
        &mut self,
        origin: &Origin,
        data: &Value,
        now: Instant,
    ) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Closed => vec![],
            ConnectionState::Establishing => self.handle_handshake_event(origin, data, now),
            ConnectionState::Active => self.handle_active_event(origin, data, now),
        }
    }

    /// Handshake-phase dispatch.
    ///
    /// Events from our own origin are ignored (shared-origin setups echo
    /// our own broadcasts back at us). Each role reacts to exactly one
    /// envelope kind and ignores the rest.
    fn handle_handshake_event(
        &mut self,
        origin: &Origin,
        data: &Value,
        now: Instant,
    ) -> Vec<ConnectionAction> {
        if *origin == self.local_origin {
            return vec![];
        }
        let Some(envelope) = Envelope::parse(data) else {
            return vec![];
        };

        match &mut self.role {
            Role::Acceptor { filter } => {
                if envelope.kind != EnvelopeKind::HandshakeComplete {
                    return vec![];
                }

                let accepted = filter.get_or_insert_with(OriginFilter::default).accepts(origin);
                self.last_received = now;
                self.peer_origin = Some(origin.clone());

                if accepted {
                    self.state = ConnectionState::Active;
                    vec![ConnectionAction::Established { peer_origin: origin.clone() }]
                } else {
                    // The peer believes the handshake succeeded; tell it we
                    // are gone before dropping the nascent connection.
                    let mut actions = vec![ConnectionAction::Send {
                        envelope: Envelope::connection_closed(),
                        destination: Destination::Peer(origin.clone()),
                    }];
                    actions.extend(self.teardown(CloseReason::ClosedByThis));
                    actions.push(ConnectionAction::EstablishFailed {
                        error: ConnectionError::UnexpectedPeer { origin: origin.clone() },
                    });
                    actions
                }
            },
            Role::Initiator { peer_origin } => {
                if envelope.kind != EnvelopeKind::HandshakeInit {
                    return vec![];
                }

                let peer = peer_origin.clone();
                self.last_received = now;
                self.state = ConnectionState::Active;
                vec![
                    ConnectionAction::Send {
                        envelope: Envelope::handshake_complete(),
                        destination: Destination::Peer(peer.clone()),
                    },
                    ConnectionAction::Established { peer_origin: peer },
                ]
            },
        }
    }

    /// Active-phase dispatch.
    ///
    /// Only events from the verified peer origin are considered. Every
    /// valid envelope, of any kind, resets the silence clock.
    fn handle_active_event(
        &mut self,
        origin: &Origin,
        data: &Value,
        now: Instant,
    ) -> Vec<ConnectionAction> {
        if Some(origin) != self.peer_origin.as_ref() {
            return vec![];
        }
        let Some(envelope) = Envelope::parse(data) else {
            return vec![];
        };

        self.last_received = now;

        match envelope.kind {
            EnvelopeKind::HandshakeInit | EnvelopeKind::HandshakeComplete => vec![],
            EnvelopeKind::ConnectionClosed => self.teardown(CloseReason::ClosedByPeer),
            EnvelopeKind::Ping => match self.peer_destination() {
                Some(destination) => {
                    vec![ConnectionAction::Send { envelope: Envelope::pong(), destination }]
                },
                None => vec![],
            },
            EnvelopeKind::Pong => vec![],
            EnvelopeKind::Common { payload } => {
                vec![ConnectionAction::DeliverCommon { payload }]
            },
            EnvelopeKind::Request { request_id, route, payload } => {
                // Routes nobody listens on are ignored entirely; the id is
                // tracked only once a handler is going to see it, so a
                // handler's synchronous respond is always valid.
                if !self.request_handlers.has_route(&route) {
                    return vec![];
                }
                self.correlator.begin_inbound(request_id);
                vec![ConnectionAction::DeliverRequest { request_id, route, payload }]
            },
            EnvelopeKind::Response { request_id, payload } => {
                if self.correlator.complete(request_id) {
                    vec![ConnectionAction::ResolveRequest { request_id, payload }]
                } else {
                    vec![]
                }
            },
        }
    }

    /// Keepalive tick. Call once per ping interval.
    ///
    /// Silence beyond the connection timeout closes the connection; silence
    /// beyond the ping interval probes the peer. Sending a probe does not
    /// reset the clock - only received traffic does.
    pub fn tick(&mut self, now: Instant) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Active {
            return vec![];
        }

        let elapsed = now.duration_since(self.last_received);

        if elapsed >= self.config.connection_timeout {
            return self.teardown(CloseReason::TimedOut);
        }

        if elapsed >= self.config.ping_interval {
            if let Some(destination) = self.peer_destination() {
                return vec![ConnectionAction::Send { envelope: Envelope::ping(), destination }];
            }
        }

        vec![]
    }

    /// Send a fire-and-forget message to the peer.
    pub fn send_common(&mut self, payload: Value) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let destination = self.require_active("send a common message")?;
        Ok(vec![ConnectionAction::Send { envelope: Envelope::common(payload), destination }])
    }

    /// Begin an outbound request.
    ///
    /// Generates a fresh request id, tracks it as pending, and returns the
    /// send action. The driver owns the continuation keyed by the returned
    /// id: it resolves on [`ConnectionAction::ResolveRequest`] and rejects
    /// on [`ConnectionAction::RejectRequest`].
    pub fn request(
        &mut self,
        route: Route,
        payload: Value,
    ) -> Result<(RequestId, Vec<ConnectionAction>), ConnectionError> {
        let destination = self.require_active("send a request")?;
        let request_id = self.fresh_request_id();
        self.correlator.track_outbound(request_id);
        let actions = vec![ConnectionAction::Send {
            envelope: Envelope::request(request_id, route, payload),
            destination,
        }];
        Ok((request_id, actions))
    }

    /// Stop tracking an outbound request whose envelope never reached the
    /// channel (the transport rejected the send).
    pub fn abandon_request(&mut self, request_id: RequestId) -> bool {
        self.correlator.complete(request_id)
    }

    /// Answer an inbound request.
    ///
    /// A no-op unless `request_id` is currently awaiting a response, which
    /// makes second answers (and answers to unknown ids) harmless.
    pub fn respond(
        &mut self,
        request_id: RequestId,
        payload: Value,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if !self.correlator.finish_inbound(request_id) {
            return Ok(vec![]);
        }
        let destination = self.require_active("send a response")?;
        Ok(vec![ConnectionAction::Send {
            envelope: Envelope::response(request_id, payload),
            destination,
        }])
    }

    /// Close the connection locally.
    ///
    /// Notifies the peer (when one is known) and runs teardown with reason
    /// "closed by this". Re-entrant calls are no-ops. The driver runs
    /// before-close handlers *prior* to calling this, while sends still
    /// work.
    pub fn close(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Closed {
            return vec![];
        }

        let mut actions = Vec::new();
        if let Some(destination) = self.peer_destination() {
            actions.push(ConnectionAction::Send {
                envelope: Envelope::connection_closed(),
                destination,
            });
        }
        actions.extend(self.teardown(CloseReason::ClosedByThis));
        actions
    }

    /// Register a broadcast message handler. Returns its removal token.
    pub fn add_common_handler(&mut self) -> HandlerId {
        let id = self.issue_handler_id();
        self.common_handlers.register(id);
        id
    }

    /// Remove a broadcast message handler.
    pub fn remove_common_handler(&mut self, id: HandlerId) -> bool {
        self.common_handlers.remove(id)
    }

    /// Register a before-close handler. Returns its removal token.
    pub fn add_before_close_handler(&mut self) -> HandlerId {
        let id = self.issue_handler_id();
        self.before_close_handlers.register(id);
        id
    }

    /// Remove a before-close handler.
    pub fn remove_before_close_handler(&mut self, id: HandlerId) -> bool {
        self.before_close_handlers.remove(id)
    }

    /// Register an after-close handler. Returns its removal token.
    pub fn add_after_close_handler(&mut self) -> HandlerId {
        let id = self.issue_handler_id();
        self.after_close_handlers.register(id);
        id
    }

    /// Remove an after-close handler.
    pub fn remove_after_close_handler(&mut self, id: HandlerId) -> bool {
        self.after_close_handlers.remove(id)
    }

    /// Register a request handler for `route`. Returns its removal token.
    pub fn add_request_handler(&mut self, route: Route) -> HandlerId {
        let id = self.issue_handler_id();
        self.request_handlers.register(route, id);
        id
    }

    /// Remove a request handler from `route`.
    pub fn remove_request_handler(&mut self, route: &Route, id: HandlerId) -> bool {
        self.request_handlers.remove(route, id)
    }

    /// Tear the connection down. Runs at most once; later triggers see the
    /// Closed state and return nothing.
    fn teardown(&mut self, reason: CloseReason) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Closed {
            return vec![];
        }

        self.state = ConnectionState::Closed;
        self.closed_reason = Some(reason);
        self.peer_origin = None;
        self.common_handlers.clear();
        self.before_close_handlers.clear();
        self.request_handlers.clear();
        self.correlator.abandon_inbound();

        let mut actions = vec![ConnectionAction::DetachListener];
        for request_id in self.correlator.drain_pending() {
            actions.push(ConnectionAction::RejectRequest { request_id, reason });
        }
        actions.push(ConnectionAction::NotifyClosed { reason });
        self.after_close_handlers.clear();
        actions
    }

    fn require_active(&self, operation: &'static str) -> Result<Destination, ConnectionError> {
        match self.state {
            ConnectionState::Active => {
                self.peer_destination().ok_or_else(|| ConnectionError::Unreachable {
                    detail: "active connection without a recorded peer origin".to_string(),
                })
            },
            ConnectionState::Closed => Err(match self.closed_reason {
                Some(reason) => ConnectionError::Closed { reason },
                None => ConnectionError::InvalidState { state: self.state, operation },
            }),
            ConnectionState::Establishing => {
                Err(ConnectionError::InvalidState { state: self.state, operation })
            },
        }
    }

    fn peer_destination(&self) -> Option<Destination> {
        self.peer_origin.clone().map(Destination::Peer)
    }

    fn issue_handler_id(&mut self) -> HandlerId {
        let id = HandlerId::new(self.next_handler_id);
        self.next_handler_id += 1;
        id
    }

    fn fresh_request_id(&self) -> RequestId {
        let mut bytes = [0u8; 16];
        self.env.random_bytes(&mut bytes);
        RequestId::from_random_bytes(bytes)
    }
}
