//! Inbound request objects.

use serde_json::Value;
use transom_proto::{Origin, RequestId, Route};

use crate::connection::Connection;

/// A request received from the peer, handed to every handler registered for
/// its route.
///
/// Responding consumes the object, and the connection sends at most one
/// response envelope per request id no matter how many handlers (or raw
/// [`Connection::respond`] calls) try - the first answer wins, the rest are
/// no-ops.
#[derive(Debug)]
pub struct IncomingRequest {
    connection: Connection,
    request_id: RequestId,
    route: Route,
    peer_origin: Origin,
    payload: Value,
}

impl IncomingRequest {
    pub(crate) fn new(
        connection: Connection,
        request_id: RequestId,
        route: Route,
        peer_origin: Origin,
        payload: Value,
    ) -> Self {
        Self { connection, request_id, route, peer_origin, payload }
    }

    /// The correlation id of this request.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// The route the request targets.
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// The verified origin the request came from.
    #[must_use]
    pub fn peer_origin(&self) -> &Origin {
        &self.peer_origin
    }

    /// The request payload.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// The connection the request arrived on.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Answer the request.
    ///
    /// Safe to call from synchronous handler code; the response is queued
    /// onto the connection's dispatcher. Errors only when the connection is
    /// already gone.
    pub fn respond(self, payload: Value) -> Result<(), crate::ConnectionError> {
        self.connection.respond_detached(self.request_id, payload)
    }
}
