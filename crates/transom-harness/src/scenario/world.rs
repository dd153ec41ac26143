//! World state for scenario execution.
//!
//! The World owns both connection state machines, an in-flight message
//! queue standing in for the channel, and per-side records of what each
//! machine announced. Oracles verify against this state. Beyond the
//! handshake, tests drive the world directly: close a side, tick the
//! keepalives, push requests across the link, or inject raw adversarial
//! traffic.

use std::{collections::VecDeque, time::Instant};

use serde_json::Value;
use transom_core::{
    CloseReason, Connection, ConnectionAction, ConnectionError, Destination, HandlerId,
};
use transom_proto::{Origin, RequestId, Route};

use crate::sim_env::SimEnv;

/// Which endpoint produced or receives a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The initiator ("parent") endpoint.
    Initiator,
    /// The acceptor ("child") endpoint.
    Acceptor,
}

impl Side {
    /// The opposite endpoint.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Initiator => Self::Acceptor,
            Self::Acceptor => Self::Initiator,
        }
    }
}

/// One in-flight channel message.
#[derive(Debug, Clone)]
struct Delivery {
    to: Side,
    from: Origin,
    data: Value,
}

/// What one side announced over the scenario's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SideRecord {
    /// Envelopes handed to the channel.
    pub sent: usize,
    /// Channel events delivered to the machine.
    pub received: usize,
    /// Whether the handshake completed.
    pub established: bool,
    /// The establish failure, if the handshake was rejected.
    pub establish_error: Option<ConnectionError>,
    /// The closure reason announced to after-close handlers, if any.
    pub closed: Option<CloseReason>,
    /// Broadcast payloads the machine asked to deliver, in order.
    pub delivered_common: Vec<Value>,
    /// Inbound requests the machine asked to fan out, in order.
    pub delivered_requests: Vec<(RequestId, Route, Value)>,
    /// Outbound requests resolved with their response payloads.
    pub resolved: Vec<(RequestId, Value)>,
    /// Outbound requests rejected at closure.
    pub rejected: Vec<(RequestId, CloseReason)>,
}

/// World state containing both actors, the in-flight queue, and records.
pub struct World {
    initiator: Connection<SimEnv>,
    acceptor: Connection<SimEnv>,
    initiator_record: SideRecord,
    acceptor_record: SideRecord,
    queue: VecDeque<Delivery>,
}

impl World {
    /// Build a world around two freshly established machines and route
    /// their opening actions.
    pub fn new(
        initiator: Connection<SimEnv>,
        acceptor: Connection<SimEnv>,
        initiator_opening: Vec<ConnectionAction>,
        acceptor_opening: Vec<ConnectionAction>,
    ) -> Self {
        let mut world = Self {
            initiator,
            acceptor,
            initiator_record: SideRecord::default(),
            acceptor_record: SideRecord::default(),
            queue: VecDeque::new(),
        };
        world.route_actions(Side::Initiator, initiator_opening);
        world.route_actions(Side::Acceptor, acceptor_opening);
        world
    }

    /// The initiator's state machine.
    #[must_use]
    pub fn initiator(&self) -> &Connection<SimEnv> {
        &self.initiator
    }

    /// The acceptor's state machine.
    #[must_use]
    pub fn acceptor(&self) -> &Connection<SimEnv> {
        &self.acceptor
    }

    /// What the initiator announced.
    #[must_use]
    pub fn initiator_record(&self) -> &SideRecord {
        &self.initiator_record
    }

    /// What the acceptor announced.
    #[must_use]
    pub fn acceptor_record(&self) -> &SideRecord {
        &self.acceptor_record
    }

    /// One side's state machine.
    #[must_use]
    pub fn connection(&self, side: Side) -> &Connection<SimEnv> {
        match side {
            Side::Initiator => &self.initiator,
            Side::Acceptor => &self.acceptor,
        }
    }

    /// One side's record.
    #[must_use]
    pub fn record(&self, side: Side) -> &SideRecord {
        match side {
            Side::Initiator => &self.initiator_record,
            Side::Acceptor => &self.acceptor_record,
        }
    }

    /// Close one side locally and route the resulting traffic.
    pub fn close(&mut self, side: Side) {
        let actions = self.machine_mut(side).close();
        self.route_actions(side, actions);
    }

    /// Run one keepalive tick on both sides.
    pub fn tick_both(&mut self, now: Instant) {
        let actions = self.initiator.tick(now);
        self.route_actions(Side::Initiator, actions);
        let actions = self.acceptor.tick(now);
        self.route_actions(Side::Acceptor, actions);
    }

    /// Send a broadcast message from one side.
    pub fn send_common(&mut self, side: Side, payload: Value) -> Result<(), ConnectionError> {
        let actions = self.machine_mut(side).send_common(payload)?;
        self.route_actions(side, actions);
        Ok(())
    }

    /// Begin a request from one side. The id is what a matching response
    /// (or closure rejection) will carry in this side's record.
    pub fn request(
        &mut self,
        side: Side,
        route: Route,
        payload: Value,
    ) -> Result<RequestId, ConnectionError> {
        let (request_id, actions) = self.machine_mut(side).request(route, payload)?;
        self.route_actions(side, actions);
        Ok(request_id)
    }

    /// Answer an inbound request on one side.
    pub fn respond(
        &mut self,
        side: Side,
        request_id: RequestId,
        payload: Value,
    ) -> Result<(), ConnectionError> {
        let actions = self.machine_mut(side).respond(request_id, payload)?;
        self.route_actions(side, actions);
        Ok(())
    }

    /// Register a request handler route on one side so inbound requests on
    /// it are delivered rather than ignored.
    pub fn add_request_handler(&mut self, side: Side, route: Route) -> HandlerId {
        self.machine_mut(side).add_request_handler(route)
    }

    /// Queue a raw value for `to` as if it came from `from`, bypassing the
    /// other machine entirely. For injecting adversarial traffic.
    pub fn inject(&mut self, to: Side, from: Origin, data: Value) {
        self.queue.push_back(Delivery { to, from, data });
    }

    /// Deliver queued messages until the channel falls quiet.
    pub fn run_until_quiet(&mut self, now: Instant) {
        while self.step(now) {}
    }

    /// Deliver one queued message. Returns `false` once the queue is
    /// empty.
    pub fn step(&mut self, now: Instant) -> bool {
        let Some(delivery) = self.queue.pop_front() else {
            return false;
        };

        let (connection, record) = match delivery.to {
            Side::Initiator => (&mut self.initiator, &mut self.initiator_record),
            Side::Acceptor => (&mut self.acceptor, &mut self.acceptor_record),
        };
        record.received += 1;
        let actions = connection.handle_event(&delivery.from, &delivery.data, now);
        self.route_actions(delivery.to, actions);
        true
    }

    /// Interpret one side's actions: sends become queued deliveries,
    /// everything else is recorded for the oracle.
    fn route_actions(&mut self, side: Side, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::Send { envelope, destination } => {
                    self.record_mut(side).sent += 1;
                    let from = self.origin_of(side);
                    let to = match destination {
                        // The pipe has exactly one other endpoint, so the
                        // untargeted broadcast reaches it too.
                        Destination::Any | Destination::Peer(_) => side.other(),
                    };
                    self.queue.push_back(Delivery { to, from, data: envelope.to_value() });
                },
                ConnectionAction::Established { .. } => {
                    self.record_mut(side).established = true;
                },
                ConnectionAction::EstablishFailed { error } => {
                    self.record_mut(side).establish_error = Some(error);
                },
                ConnectionAction::NotifyClosed { reason } => {
                    self.record_mut(side).closed = Some(reason);
                },
                ConnectionAction::DeliverCommon { payload } => {
                    self.record_mut(side).delivered_common.push(payload);
                },
                ConnectionAction::DeliverRequest { request_id, route, payload } => {
                    self.record_mut(side).delivered_requests.push((request_id, route, payload));
                },
                ConnectionAction::ResolveRequest { request_id, payload } => {
                    self.record_mut(side).resolved.push((request_id, payload));
                },
                ConnectionAction::RejectRequest { request_id, reason } => {
                    self.record_mut(side).rejected.push((request_id, reason));
                },
                ConnectionAction::DetachListener => {},
            }
        }
    }

    fn machine_mut(&mut self, side: Side) -> &mut Connection<SimEnv> {
        match side {
            Side::Initiator => &mut self.initiator,
            Side::Acceptor => &mut self.acceptor,
        }
    }

    fn record_mut(&mut self, side: Side) -> &mut SideRecord {
        match side {
            Side::Initiator => &mut self.initiator_record,
            Side::Acceptor => &mut self.acceptor_record,
        }
    }

    fn origin_of(&self, side: Side) -> Origin {
        match side {
            Side::Initiator => self.initiator.local_origin().clone(),
            Side::Acceptor => self.acceptor.local_origin().clone(),
        }
    }
}
