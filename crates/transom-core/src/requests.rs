//! Request/response correlation bookkeeping.
//!
//! Two id sets, one per direction:
//!
//! - **pending**: requests this side has sent and not yet seen a response
//!   for. An entry exists from the moment the request envelope is handed to
//!   the channel until a matching response arrives or the connection closes
//!   (which rejects every entry at once).
//! - **in-process**: requests received from the peer that a local handler
//!   has not yet answered. Removal is idempotent: answering an id that is
//!   not in the set is a no-op, which makes double responses harmless.
//!
//! Unknown ids in either direction are ignored; a duplicate or late
//! response after an entry was removed must have no effect.

use transom_proto::RequestId;

/// Correlation state for both directions of request traffic.
#[derive(Debug, Clone, Default)]
pub struct RequestCorrelator {
    pending: Vec<RequestId>,
    in_process: Vec<RequestId>,
}

impl RequestCorrelator {
    /// Track an outbound request awaiting its response.
    pub fn track_outbound(&mut self, id: RequestId) {
        self.pending.push(id);
    }

    /// Resolve an outbound request. Returns `true` if `id` was pending.
    pub fn complete(&mut self, id: RequestId) -> bool {
        match self.pending.iter().position(|entry| *entry == id) {
            Some(idx) => {
                self.pending.remove(idx);
                true
            },
            None => false,
        }
    }

    /// Track an inbound request awaiting a local response.
    pub fn begin_inbound(&mut self, id: RequestId) {
        self.in_process.push(id);
    }

    /// Mark an inbound request as answered. Returns `true` exactly once per
    /// tracked id; later calls (or calls for unknown ids) return `false`.
    pub fn finish_inbound(&mut self, id: RequestId) -> bool {
        match self.in_process.iter().position(|entry| *entry == id) {
            Some(idx) => {
                self.in_process.remove(idx);
                true
            },
            None => false,
        }
    }

    /// Take every pending outbound id, in send order.
    pub fn drain_pending(&mut self) -> Vec<RequestId> {
        std::mem::take(&mut self.pending)
    }

    /// Drop all inbound tracking (the connection is going away; responses
    /// can no longer be sent).
    pub fn abandon_inbound(&mut self) {
        self.in_process.clear();
    }

    /// Number of outbound requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of inbound requests awaiting a local response.
    #[must_use]
    pub fn in_process_count(&self) -> usize {
        self.in_process.len()
    }
}
