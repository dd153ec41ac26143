//! Fault injection tests for the transom protocol.
//!
//! The channel is shared with unrelated traffic and open to adversaries,
//! so the protocol's defensive filtering must be invisible: malformed
//! payloads, foreign domains, and messages from untrusted origins produce
//! no observable effect - no handler runs, nothing is sent back, nothing
//! closes.

use std::time::Instant;

use serde_json::json;
use transom_core::{Connection, ConnectionConfig, OriginFilter, Role};
use transom_harness::{
    SimEnv,
    scenario::{Side, World},
};
use transom_proto::{Envelope, Origin, Route};

fn initiator_origin() -> Origin {
    Origin::new("https://initiator.example")
}

fn acceptor_origin() -> Origin {
    Origin::new("https://acceptor.example")
}

fn stranger_origin() -> Origin {
    Origin::new("https://stranger.example")
}

fn established_world(now: Instant) -> World {
    let env = SimEnv::with_seed(11);

    let (initiator, initiator_opening) = Connection::establish(
        env.clone(),
        initiator_origin(),
        Role::Initiator { peer_origin: acceptor_origin() },
        ConnectionConfig::default(),
        now,
    );
    let (acceptor, acceptor_opening) = Connection::establish(
        env,
        acceptor_origin(),
        Role::Acceptor { filter: Some(OriginFilter::whitelist([initiator_origin()])) },
        ConnectionConfig::default(),
        now,
    );

    let mut world = World::new(initiator, acceptor, initiator_opening, acceptor_opening);
    world.run_until_quiet(now);
    world
}

#[test]
fn malformed_payloads_have_no_observable_effect() {
    let now = Instant::now();
    let mut world = established_world(now);
    let route = Route::parse("app:echo").unwrap();
    world.add_request_handler(Side::Acceptor, route);
    let sent_before = world.acceptor_record().sent;

    // Each of these claims to be protocol traffic and fails validation:
    // wrong domain, missing domain, unknown kind, request without an id,
    // request with a malformed id, non-object payloads.
    for junk in [
        json!({ "domain": "somebody-else", "kind": "Ping" }),
        json!({ "kind": "Ping" }),
        json!({ "domain": "transom", "kind": "SelfDestruct" }),
        json!({ "domain": "transom", "kind": "Request", "route": "app:echo", "payload": 1 }),
        json!({
            "domain": "transom",
            "kind": "Request",
            "requestId": "not-a-uuid",
            "route": "app:echo",
        }),
        json!("transom"),
        json!(42),
        json!(null),
    ] {
        world.inject(Side::Acceptor, initiator_origin(), junk);
    }
    world.run_until_quiet(now);

    assert!(world.acceptor().is_active(), "junk must not close the connection");
    assert!(world.acceptor_record().delivered_common.is_empty());
    assert!(world.acceptor_record().delivered_requests.is_empty());
    assert_eq!(world.acceptor_record().sent, sent_before, "junk must not be answered");
}

#[test]
fn valid_envelopes_from_a_foreign_origin_are_discarded() {
    let now = Instant::now();
    let mut world = established_world(now);

    world.inject(Side::Acceptor, stranger_origin(), Envelope::common(json!("hi")).to_value());
    world.inject(Side::Acceptor, stranger_origin(), Envelope::connection_closed().to_value());
    world.run_until_quiet(now);

    assert!(world.acceptor().is_active(), "a stranger cannot close the connection");
    assert!(world.acceptor_record().delivered_common.is_empty());
    assert_eq!(world.acceptor().peer_origin(), Some(&initiator_origin()));
}

#[test]
fn own_origin_echoes_are_ignored_during_handshake() {
    let now = Instant::now();
    let env = SimEnv::with_seed(13);
    let (acceptor, _opening) = Connection::establish(
        env,
        acceptor_origin(),
        Role::Acceptor { filter: Some(OriginFilter::allow_all()) },
        ConnectionConfig::default(),
        now,
    );
    // A shared-origin setup can loop the broadcast opener back at its
    // sender. Pair the machine with an idle initiator (the opener itself is
    // withheld so nothing real answers), then echo the acceptor's own
    // traffic back at it.
    let (initiator, initiator_opening) = Connection::establish(
        SimEnv::with_seed(14),
        initiator_origin(),
        Role::Initiator { peer_origin: acceptor_origin() },
        ConnectionConfig::default(),
        now,
    );
    let mut world = World::new(initiator, acceptor, initiator_opening, vec![]);

    world.inject(Side::Acceptor, acceptor_origin(), Envelope::handshake_complete().to_value());
    world.run_until_quiet(now);

    assert!(!world.acceptor().is_active(), "an echo of our own origin must not complete us");
    assert!(world.acceptor_record().establish_error.is_none());
}

#[test]
fn late_responses_after_closure_resolve_nothing() {
    let now = Instant::now();
    let mut world = established_world(now);
    let route = Route::parse("app:slow").unwrap();

    let request_id = world.request(Side::Initiator, route, json!(1)).unwrap();
    world.run_until_quiet(now);

    world.close(Side::Initiator);
    world.run_until_quiet(now);
    assert_eq!(world.initiator_record().rejected.len(), 1);

    // A response for the already-rejected id arrives afterwards.
    world.inject(
        Side::Initiator,
        acceptor_origin(),
        Envelope::response(request_id, json!("late")).to_value(),
    );
    world.run_until_quiet(now);

    assert!(world.initiator_record().resolved.is_empty(), "a rejected request must stay rejected");
}
