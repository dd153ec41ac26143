//! Per-connection dispatcher.
//!
//! One task owns the core state machine, the channel capabilities, and
//! every registered callback. Channel events, caller commands, and
//! keepalive ticks all funnel through its loop, which gives the protocol
//! its single-dispatcher concurrency model: no locks, no re-entrancy, and
//! handler code always observes a consistent connection.

use std::{collections::HashMap, sync::Arc, sync::OnceLock};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use transom_core::{
    CloseReason, Connection as ConnectionMachine, ConnectionAction, ConnectionError,
    ConnectionState, Environment, HandlerId,
};
use transom_proto::{Origin, RequestId, Route};

use crate::{
    channel::{Listener, Peer},
    connection::Connection,
    request::IncomingRequest,
};

/// Broadcast message callback.
pub(crate) type CommonHandler = Box<dyn FnMut(&Value) + Send>;
/// Request callback.
pub(crate) type RequestHandler = Box<dyn FnMut(IncomingRequest) + Send>;
/// Before-close callback; runs while sends still work.
pub(crate) type BeforeCloseHandler = Box<dyn FnMut(&mut CloseScope<'_>) + Send>;
/// After-close callback.
pub(crate) type AfterCloseHandler = Box<dyn FnMut(CloseReason) + Send>;

/// Handed to before-close handlers: the connection is still active, so they
/// can push final messages to the peer before the closure notice goes out.
pub struct CloseScope<'a> {
    send: &'a mut dyn FnMut(Value) -> Result<(), ConnectionError>,
}

impl CloseScope<'_> {
    /// Send one last fire-and-forget message to the peer.
    pub fn send_common(&mut self, payload: Value) -> Result<(), ConnectionError> {
        (self.send)(payload)
    }
}

/// Caller commands, processed in arrival order by the dispatcher.
pub(crate) enum Command {
    SendCommon {
        payload: Value,
        done: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Request {
        route: Route,
        payload: Value,
        done: oneshot::Sender<Result<Value, ConnectionError>>,
    },
    Respond {
        request_id: RequestId,
        payload: Value,
        done: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
    AddCommonHandler {
        handler: CommonHandler,
        done: oneshot::Sender<HandlerId>,
    },
    RemoveCommonHandler {
        id: HandlerId,
        done: oneshot::Sender<bool>,
    },
    AddRequestHandler {
        route: Route,
        handler: RequestHandler,
        done: oneshot::Sender<HandlerId>,
    },
    RemoveRequestHandler {
        route: Route,
        id: HandlerId,
        done: oneshot::Sender<bool>,
    },
    AddBeforeCloseHandler {
        handler: BeforeCloseHandler,
        done: oneshot::Sender<HandlerId>,
    },
    RemoveBeforeCloseHandler {
        id: HandlerId,
        done: oneshot::Sender<bool>,
    },
    AddAfterCloseHandler {
        handler: AfterCloseHandler,
        done: oneshot::Sender<HandlerId>,
    },
    RemoveAfterCloseHandler {
        id: HandlerId,
        done: oneshot::Sender<bool>,
    },
}

/// Whether the dispatcher loop keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub(crate) struct Runtime<E: Environment, P: Peer, L: Listener> {
    core: ConnectionMachine<E>,
    env: E,
    peer: P,
    listener: L,
    listener_open: bool,
    commands: mpsc::UnboundedReceiver<Command>,
    command_tx: mpsc::UnboundedSender<Command>,
    closed: Arc<OnceLock<CloseReason>>,
    establish_tx: Option<oneshot::Sender<Result<Origin, ConnectionError>>>,
    handle: Option<Connection>,
    local_origin: Origin,
    common: Vec<(HandlerId, CommonHandler)>,
    request_handlers: HashMap<Route, Vec<(HandlerId, RequestHandler)>>,
    before_close: Vec<(HandlerId, BeforeCloseHandler)>,
    after_close: Vec<(HandlerId, AfterCloseHandler)>,
    pending: HashMap<RequestId, oneshot::Sender<Result<Value, ConnectionError>>>,
}

impl<E: Environment, P: Peer, L: Listener> Runtime<E, P, L> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        core: ConnectionMachine<E>,
        env: E,
        peer: P,
        listener: L,
        commands: mpsc::UnboundedReceiver<Command>,
        command_tx: mpsc::UnboundedSender<Command>,
        closed: Arc<OnceLock<CloseReason>>,
        establish_tx: oneshot::Sender<Result<Origin, ConnectionError>>,
    ) -> Self {
        let local_origin = core.local_origin().clone();
        Self {
            core,
            env,
            peer,
            listener,
            listener_open: true,
            commands,
            command_tx,
            closed,
            establish_tx: Some(establish_tx),
            handle: None,
            local_origin,
            common: Vec::new(),
            request_handlers: HashMap::new(),
            before_close: Vec::new(),
            after_close: Vec::new(),
            pending: HashMap::new(),
        }
    }

    /// Dispatcher loop. Runs until teardown, then drops everything.
    pub(crate) async fn run(mut self, opening: Vec<ConnectionAction>) {
        if self.execute(opening) == Flow::Exit {
            return;
        }

        let tick_period = self.core.config().ping_interval;
        let mut next_tick = self.env.now() + tick_period;

        loop {
            let env = self.env.clone();
            let delay = next_tick.saturating_duration_since(env.now());
            let sleep = env.sleep(delay);
            tokio::pin!(sleep);

            let flow = tokio::select! {
                event = self.listener.recv(), if self.listener_open => match event {
                    Some(event) => {
                        let now = self.env.now();
                        let actions = self.core.handle_event(&event.origin, &event.data, now);
                        self.execute(actions)
                    },
                    None => {
                        // The transport is gone; the keepalive will notice
                        // the silence and time the connection out.
                        self.listener_open = false;
                        Flow::Continue
                    },
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => Flow::Continue,
                },
                () = &mut sleep => {
                    next_tick = self.env.now() + tick_period;
                    let now = self.env.now();
                    let actions = self.core.tick(now);
                    self.execute(actions)
                },
            };

            if flow == Flow::Exit {
                break;
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::SendCommon { payload, done } => {
                let result = self
                    .core
                    .send_common(payload)
                    .and_then(|actions| self.execute_user_sends(actions));
                let _ = done.send(result);
                Flow::Continue
            },
            Command::Request { route, payload, done } => {
                match self.core.request(route, payload) {
                    Ok((request_id, actions)) => match self.execute_user_sends(actions) {
                        Ok(()) => {
                            self.pending.insert(request_id, done);
                        },
                        Err(error) => {
                            // The envelope never left; stop tracking it.
                            self.core.abandon_request(request_id);
                            let _ = done.send(Err(error));
                        },
                    },
                    Err(error) => {
                        let _ = done.send(Err(error));
                    },
                }
                Flow::Continue
            },
            Command::Respond { request_id, payload, done } => {
                let result = self
                    .core
                    .respond(request_id, payload)
                    .and_then(|actions| self.execute_user_sends(actions));
                let _ = done.send(result);
                Flow::Continue
            },
            Command::Close { done } => {
                let flow = self.close_locally();
                let _ = done.send(());
                flow
            },
            Command::AddCommonHandler { handler, done } => {
                let id = self.core.add_common_handler();
                self.common.push((id, handler));
                let _ = done.send(id);
                Flow::Continue
            },
            Command::RemoveCommonHandler { id, done } => {
                let removed = self.core.remove_common_handler(id);
                self.common.retain(|(entry, _)| *entry != id);
                let _ = done.send(removed);
                Flow::Continue
            },
            Command::AddRequestHandler { route, handler, done } => {
                let id = self.core.add_request_handler(route.clone());
                self.request_handlers.entry(route).or_default().push((id, handler));
                let _ = done.send(id);
                Flow::Continue
            },
            Command::RemoveRequestHandler { route, id, done } => {
                let removed = self.core.remove_request_handler(&route, id);
                if let Some(handlers) = self.request_handlers.get_mut(&route) {
                    handlers.retain(|(entry, _)| *entry != id);
                    if handlers.is_empty() {
                        self.request_handlers.remove(&route);
                    }
                }
                let _ = done.send(removed);
                Flow::Continue
            },
            Command::AddBeforeCloseHandler { handler, done } => {
                let id = self.core.add_before_close_handler();
                self.before_close.push((id, handler));
                let _ = done.send(id);
                Flow::Continue
            },
            Command::RemoveBeforeCloseHandler { id, done } => {
                let removed = self.core.remove_before_close_handler(id);
                self.before_close.retain(|(entry, _)| *entry != id);
                let _ = done.send(removed);
                Flow::Continue
            },
            Command::AddAfterCloseHandler { handler, done } => {
                let id = self.core.add_after_close_handler();
                self.after_close.push((id, handler));
                let _ = done.send(id);
                Flow::Continue
            },
            Command::RemoveAfterCloseHandler { id, done } => {
                let removed = self.core.remove_after_close_handler(id);
                self.after_close.retain(|(entry, _)| *entry != id);
                let _ = done.send(removed);
                Flow::Continue
            },
        }
    }

    /// Local close: run before-close handlers while sends still work, then
    /// notify the peer and tear down.
    fn close_locally(&mut self) -> Flow {
        if self.core.state() == ConnectionState::Closed {
            return Flow::Continue;
        }

        let mut handlers = std::mem::take(&mut self.before_close);
        for (_, handler) in &mut handlers {
            let mut sink = |payload: Value| -> Result<(), ConnectionError> {
                let actions = self.core.send_common(payload)?;
                self.execute_user_sends(actions)
            };
            let mut scope = CloseScope { send: &mut sink };
            handler(&mut scope);
        }

        let actions = self.core.close();
        self.execute(actions)
    }

    /// Execute actions produced by the state machine.
    fn execute(&mut self, actions: Vec<ConnectionAction>) -> Flow {
        let mut flow = Flow::Continue;
        for action in actions {
            match action {
                ConnectionAction::Send { envelope, destination } => {
                    debug!(origin = %self.local_origin, ?destination, "sending envelope");
                    if let Err(error) = self.peer.send(envelope.to_value(), &destination) {
                        // Protocol-internal traffic is best-effort; the
                        // keepalive escalates persistent failures.
                        debug!(%error, "transport rejected a protocol send");
                    }
                },
                ConnectionAction::Established { peer_origin } => {
                    info!(origin = %self.local_origin, peer = %peer_origin, "connection established");
                    let handle = Connection::from_parts(
                        self.command_tx.clone(),
                        self.local_origin.clone(),
                        peer_origin.clone(),
                        Arc::clone(&self.closed),
                    );
                    self.handle = Some(handle);
                    if let Some(tx) = self.establish_tx.take() {
                        let _ = tx.send(Ok(peer_origin));
                    }
                },
                ConnectionAction::EstablishFailed { error } => {
                    info!(origin = %self.local_origin, %error, "handshake failed");
                    if let Some(tx) = self.establish_tx.take() {
                        let _ = tx.send(Err(error));
                    }
                },
                ConnectionAction::DeliverCommon { payload } => {
                    for (_, handler) in &mut self.common {
                        handler(&payload);
                    }
                },
                ConnectionAction::DeliverRequest { request_id, route, payload } => {
                    let Some(handle) = self.handle.clone() else {
                        continue;
                    };
                    let peer_origin = handle.peer_origin().clone();
                    if let Some(handlers) = self.request_handlers.get_mut(&route) {
                        for (_, handler) in handlers.iter_mut() {
                            handler(IncomingRequest::new(
                                handle.clone(),
                                request_id,
                                route.clone(),
                                peer_origin.clone(),
                                payload.clone(),
                            ));
                        }
                    }
                },
                ConnectionAction::ResolveRequest { request_id, payload } => {
                    if let Some(tx) = self.pending.remove(&request_id) {
                        let _ = tx.send(Ok(payload));
                    }
                },
                ConnectionAction::RejectRequest { request_id, reason } => {
                    if let Some(tx) = self.pending.remove(&request_id) {
                        let _ = tx.send(Err(ConnectionError::Closed { reason }));
                    }
                },
                ConnectionAction::DetachListener => {
                    self.listener_open = false;
                },
                ConnectionAction::NotifyClosed { reason } => {
                    info!(origin = %self.local_origin, %reason, "connection closed");
                    let _ = self.closed.set(reason);
                    let mut handlers = std::mem::take(&mut self.after_close);
                    for (_, handler) in &mut handlers {
                        handler(reason);
                    }
                    self.common.clear();
                    self.request_handlers.clear();
                    self.before_close.clear();
                    flow = Flow::Exit;
                },
            }
        }
        flow
    }

    /// Execute send actions on behalf of a caller operation, surfacing
    /// transport refusals as errors.
    fn execute_user_sends(&mut self, actions: Vec<ConnectionAction>) -> Result<(), ConnectionError> {
        for action in actions {
            if let ConnectionAction::Send { envelope, destination } = action {
                debug!(origin = %self.local_origin, ?destination, "sending envelope");
                self.peer.send(envelope.to_value(), &destination).map_err(|error| {
                    ConnectionError::UnsupportedFeature { detail: error.to_string() }
                })?;
            }
        }
        Ok(())
    }
}
