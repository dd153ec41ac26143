//! Fuzz the active-phase dispatch point.
//!
//! Feeds arbitrary JSON to an active connection as if it arrived from the
//! verified peer origin. Dispatch must never panic and must leave a live
//! connection either active or cleanly closed.

#![no_main]

use std::time::{Duration, Instant};

use libfuzzer_sys::fuzz_target;
use transom_core::{Connection, ConnectionConfig, ConnectionState, Environment, Role};
use transom_proto::{Envelope, Origin};

#[derive(Clone)]
struct FuzzEnv;

impl Environment for FuzzEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(7);
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    let peer = Origin::new("https://peer.example");
    let now = Instant::now();
    let (mut connection, _) = Connection::establish(
        FuzzEnv,
        Origin::new("https://local.example"),
        Role::Initiator { peer_origin: peer.clone() },
        ConnectionConfig::default(),
        now,
    );
    connection.handle_event(&peer, &Envelope::handshake_init().to_value(), now);
    assert!(connection.is_active());

    let _ = connection.handle_event(&peer, &value, now);
    assert!(matches!(
        connection.state(),
        ConnectionState::Active | ConnectionState::Closed
    ));
});
