//! The caller-facing connection handle.

use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use transom_core::{
    CloseReason, Connection as ConnectionMachine, ConnectionError, Environment, HandlerId,
};
use transom_proto::{Origin, RequestId, Route};

use crate::{
    channel::{Listener, Peer},
    config::EstablishConfig,
    request::IncomingRequest,
    runtime::{CloseScope, Command, Runtime},
};

/// An established, mutually-authenticated connection to one peer.
///
/// Cheap to clone; all clones drive the same dispatcher task. The only
/// suspension points that wait on the peer are [`Connection::establish`]
/// and [`Connection::request`] - everything else completes as soon as the
/// dispatcher picks the command up.
///
/// A closed connection is not reusable: every operation fails with the
/// closure reason, and a new handshake needs a new `establish` call.
#[derive(Debug, Clone)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    local_origin: Origin,
    peer_origin: Origin,
    closed: Arc<OnceLock<CloseReason>>,
}

impl Connection {
    /// Perform the handshake and return the active connection.
    ///
    /// Resolves once the peer origin is verified; for the acceptor role
    /// this is also where the origin filter can reject the peer with
    /// [`ConnectionError::UnexpectedPeer`]. There is no handshake timeout:
    /// establishment waits until the peer appears or the caller gives up.
    pub async fn establish<P, L, E>(config: EstablishConfig<P, L, E>) -> Result<Self, ConnectionError>
    where
        P: Peer,
        L: Listener,
        E: Environment,
    {
        let EstablishConfig { peer, listener, role, timing, env } = config;
        let local_origin = listener.origin();

        let (core, opening) = ConnectionMachine::establish(
            env.clone(),
            local_origin.clone(),
            role,
            timing,
            env.now(),
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (established_tx, established_rx) = oneshot::channel();
        let closed: Arc<OnceLock<CloseReason>> = Arc::new(OnceLock::new());

        let runtime = Runtime::new(
            core,
            env,
            peer,
            listener,
            command_rx,
            command_tx.clone(),
            Arc::clone(&closed),
            established_tx,
        );
        tokio::spawn(runtime.run(opening));

        let peer_origin = established_rx.await.map_err(|_| ConnectionError::Unreachable {
            detail: "connection dispatcher exited during handshake".to_string(),
        })??;

        Ok(Self { commands: command_tx, local_origin, peer_origin, closed })
    }

    /// The verified origin of the remote peer.
    #[must_use]
    pub fn peer_origin(&self) -> &Origin {
        &self.peer_origin
    }

    /// This endpoint's own origin.
    #[must_use]
    pub fn local_origin(&self) -> &Origin {
        &self.local_origin
    }

    /// Whether the connection is still operational.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.closed.get().is_none()
    }

    /// Send a fire-and-forget message to the peer.
    pub async fn send_common(&self, payload: Value) -> Result<(), ConnectionError> {
        self.run(|done| Command::SendCommon { payload, done }).await?
    }

    /// Send a request and wait for the matching response.
    ///
    /// Concurrent requests are independent: each resolves with the payload
    /// its own response carried, in whatever order responses arrive. There
    /// is no per-request timeout; a request is abandoned only when the
    /// whole connection closes, which rejects it with the closure reason.
    pub async fn request(&self, route: Route, payload: Value) -> Result<Value, ConnectionError> {
        self.run(|done| Command::Request { route, payload, done }).await?
    }

    /// Answer an inbound request by id.
    ///
    /// A no-op if that id was already answered or never seen.
    pub async fn respond(&self, request_id: RequestId, payload: Value) -> Result<(), ConnectionError> {
        self.run(|done| Command::Respond { request_id, payload, done }).await?
    }

    /// Close the connection: run before-close handlers, notify the peer,
    /// reject everything pending, run after-close handlers. Idempotent.
    pub async fn close(&self) {
        let _ = self.run(|done| Command::Close { done }).await;
    }

    /// Register a handler for inbound broadcast messages.
    pub async fn on_common(
        &self,
        handler: impl FnMut(&Value) + Send + 'static,
    ) -> Result<HandlerId, ConnectionError> {
        self.run(|done| Command::AddCommonHandler { handler: Box::new(handler), done }).await
    }

    /// Remove a broadcast handler by token.
    pub async fn remove_common_handler(&self, id: HandlerId) -> Result<bool, ConnectionError> {
        self.run(|done| Command::RemoveCommonHandler { id, done }).await
    }

    /// Register a request handler for `route`. Every handler registered
    /// for a route sees every request on it, in registration order.
    pub async fn on_request(
        &self,
        route: Route,
        handler: impl FnMut(IncomingRequest) + Send + 'static,
    ) -> Result<HandlerId, ConnectionError> {
        self.run(|done| Command::AddRequestHandler { route, handler: Box::new(handler), done })
            .await
    }

    /// Remove a request handler by route and token.
    pub async fn remove_request_handler(
        &self,
        route: Route,
        id: HandlerId,
    ) -> Result<bool, ConnectionError> {
        self.run(|done| Command::RemoveRequestHandler { route, id, done }).await
    }

    /// Register a handler that runs when this side closes the connection,
    /// before the peer is notified. It may still send messages through the
    /// [`CloseScope`] it receives.
    pub async fn on_before_close(
        &self,
        handler: impl FnMut(&mut CloseScope<'_>) + Send + 'static,
    ) -> Result<HandlerId, ConnectionError> {
        self.run(|done| Command::AddBeforeCloseHandler { handler: Box::new(handler), done }).await
    }

    /// Remove a before-close handler by token.
    pub async fn remove_before_close_handler(&self, id: HandlerId) -> Result<bool, ConnectionError> {
        self.run(|done| Command::RemoveBeforeCloseHandler { id, done }).await
    }

    /// Register a handler that runs once the connection has closed, with
    /// the closure reason. It can no longer send.
    pub async fn on_after_close(
        &self,
        handler: impl FnMut(CloseReason) + Send + 'static,
    ) -> Result<HandlerId, ConnectionError> {
        self.run(|done| Command::AddAfterCloseHandler { handler: Box::new(handler), done }).await
    }

    /// Remove an after-close handler by token.
    pub async fn remove_after_close_handler(&self, id: HandlerId) -> Result<bool, ConnectionError> {
        self.run(|done| Command::RemoveAfterCloseHandler { id, done }).await
    }

    pub(crate) fn from_parts(
        commands: mpsc::UnboundedSender<Command>,
        local_origin: Origin,
        peer_origin: Origin,
        closed: Arc<OnceLock<CloseReason>>,
    ) -> Self {
        Self { commands, local_origin, peer_origin, closed }
    }

    /// Queue a response without waiting for the dispatcher; lets
    /// synchronous handler code answer requests.
    pub(crate) fn respond_detached(
        &self,
        request_id: RequestId,
        payload: Value,
    ) -> Result<(), ConnectionError> {
        let (done, _) = oneshot::channel();
        self.commands
            .send(Command::Respond { request_id, payload, done })
            .map_err(|_| self.closed_error())
    }

    /// Round-trip one command through the dispatcher.
    async fn run<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ConnectionError> {
        let (done, outcome) = oneshot::channel();
        self.commands.send(build(done)).map_err(|_| self.closed_error())?;
        outcome.await.map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> ConnectionError {
        match self.closed.get() {
            Some(reason) => ConnectionError::Closed { reason: *reason },
            None => ConnectionError::Unreachable {
                detail: "connection dispatcher is gone".to_string(),
            },
        }
    }
}
