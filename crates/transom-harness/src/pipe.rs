//! In-memory duplex channel.
//!
//! Two origin-tagged endpoints connected back to back, standing in for real
//! cross-context messaging. Delivery is buffered and best-effort: severing
//! the link silently drops traffic (the sender still sees success), which
//! is exactly how a dead real-world channel behaves. Every accepted send is
//! recorded so tests can assert on the traffic that actually crossed.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use transom_client::{ChannelError, ChannelEvent, Listener, Peer};
use transom_core::Destination;
use transom_proto::Origin;

/// One send recorded by the link.
#[derive(Debug, Clone, PartialEq)]
pub struct SentRecord {
    /// Origin the message was sent from.
    pub from: Origin,
    /// The raw value handed to the channel.
    pub data: Value,
}

impl SentRecord {
    /// The envelope kind field, when the value carries one.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.data.get("kind").and_then(Value::as_str)
    }
}

#[derive(Debug, Default)]
struct LinkState {
    severed: AtomicBool,
    log: Mutex<Vec<SentRecord>>,
}

impl LinkState {
    fn record(&self, from: &Origin, data: &Value) {
        let mut log = self.log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        log.push(SentRecord { from: from.clone(), data: data.clone() });
    }
}

/// Send half of one endpoint; delivers into the other side's inbox.
#[derive(Debug, Clone)]
pub struct PipePeer {
    from: Origin,
    inbox: mpsc::UnboundedSender<ChannelEvent>,
    link: Arc<LinkState>,
}

impl Peer for PipePeer {
    fn send(&self, data: Value, _destination: &Destination) -> Result<(), ChannelError> {
        // The pipe has exactly one counterpart, so the destination hint is
        // informational, as it is for real cross-context messaging.
        self.link.record(&self.from, &data);
        if self.link.severed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.inbox.send(ChannelEvent { origin: self.from.clone(), data });
        Ok(())
    }
}

/// Receive half of one endpoint.
#[derive(Debug)]
pub struct PipeListener {
    origin: Origin,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

#[async_trait]
impl Listener for PipeListener {
    fn origin(&self) -> Origin {
        self.origin.clone()
    }

    async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

/// The two capabilities one side of the link needs.
#[derive(Debug)]
pub struct SimEndpoint {
    /// Sends toward the other side.
    pub peer: PipePeer,
    /// Receives this side's events.
    pub listener: PipeListener,
}

/// Test-side control over the link.
#[derive(Debug, Clone)]
pub struct SimLink {
    link: Arc<LinkState>,
    origin_a: Origin,
    origin_b: Origin,
    to_a: mpsc::UnboundedSender<ChannelEvent>,
    to_b: mpsc::UnboundedSender<ChannelEvent>,
}

impl SimLink {
    /// Stop delivering in both directions. Senders keep succeeding; the
    /// messages just disappear.
    pub fn sever(&self) {
        debug!(a = %self.origin_a, b = %self.origin_b, "severing link");
        self.link.severed.store(true, Ordering::SeqCst);
    }

    /// Everything accepted by the channel so far, in send order.
    #[must_use]
    pub fn sent_log(&self) -> Vec<SentRecord> {
        self.link.log.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Envelope kinds accepted so far, in send order.
    #[must_use]
    pub fn sent_kinds(&self) -> Vec<String> {
        self.sent_log().iter().filter_map(|record| record.kind().map(str::to_string)).collect()
    }

    /// Deliver a raw value to `destination` as if it came from `from`,
    /// bypassing the endpoints entirely. For injecting adversarial
    /// traffic.
    pub fn inject(&self, destination: &Origin, from: Origin, data: Value) {
        debug!(to = %destination, from = %from, "injecting raw channel event");
        let inbox = if *destination == self.origin_a { &self.to_a } else { &self.to_b };
        let _ = inbox.send(ChannelEvent { origin: from, data });
    }
}

/// Build an in-memory link between two origins.
///
/// Returns the endpoint for `origin_a`, the endpoint for `origin_b`, and
/// the test-side control handle.
#[must_use]
pub fn sim_link(origin_a: &Origin, origin_b: &Origin) -> (SimEndpoint, SimEndpoint, SimLink) {
    let link = Arc::new(LinkState::default());
    let (to_a, events_a) = mpsc::unbounded_channel();
    let (to_b, events_b) = mpsc::unbounded_channel();

    let endpoint_a = SimEndpoint {
        peer: PipePeer { from: origin_a.clone(), inbox: to_b.clone(), link: Arc::clone(&link) },
        listener: PipeListener { origin: origin_a.clone(), events: events_a },
    };
    let endpoint_b = SimEndpoint {
        peer: PipePeer { from: origin_b.clone(), inbox: to_a.clone(), link: Arc::clone(&link) },
        listener: PipeListener { origin: origin_b.clone(), events: events_b },
    };
    let control = SimLink {
        link,
        origin_a: origin_a.clone(),
        origin_b: origin_b.clone(),
        to_a,
        to_b,
    };

    (endpoint_a, endpoint_b, control)
}
