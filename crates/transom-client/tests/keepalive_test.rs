//! Keepalive behavior under virtual time.
//!
//! The paused tokio clock auto-advances whenever every task is idle, so
//! the 5-second ping interval and 30-second connection timeout elapse
//! instantly while staying exact.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::json;
use transom_client::{CloseReason, Connection, EstablishConfig, OriginFilter};
use transom_harness::{SimEnv, SimLink, sim_link};
use transom_proto::Origin;

fn parent_origin() -> Origin {
    Origin::new("https://parent.example")
}

fn child_origin() -> Origin {
    Origin::new("https://child.example")
}

async fn establish_pair() -> (Connection, Connection, SimLink) {
    let (parent_end, child_end, link) = sim_link(&parent_origin(), &child_origin());

    let parent_config =
        EstablishConfig::initiator(parent_end.peer, parent_end.listener, child_origin())
            .with_env(SimEnv::with_seed(21));
    let child_config = EstablishConfig::acceptor(child_end.peer, child_end.listener)
        .with_filter(OriginFilter::whitelist([parent_origin()]))
        .with_env(SimEnv::with_seed(22));

    let (parent, child) = tokio::join!(
        Connection::establish(parent_config),
        Connection::establish(child_config),
    );
    (parent.unwrap(), child.unwrap(), link)
}

#[tokio::test(start_paused = true)]
async fn severed_link_times_out_both_sides() {
    let (parent, child, link) = establish_pair().await;

    let (parent_tx, parent_rx) = tokio::sync::oneshot::channel();
    let mut parent_tx = Some(parent_tx);
    parent
        .on_after_close(move |reason| {
            if let Some(tx) = parent_tx.take() {
                let _ = tx.send(reason);
            }
        })
        .await
        .unwrap();

    let (child_tx, child_rx) = tokio::sync::oneshot::channel();
    let mut child_tx = Some(child_tx);
    child
        .on_after_close(move |reason| {
            if let Some(tx) = child_tx.take() {
                let _ = tx.send(reason);
            }
        })
        .await
        .unwrap();

    // Kill delivery in both directions; each side keeps probing into the
    // void until its own deadline expires.
    link.sever();

    assert_eq!(parent_rx.await.unwrap(), CloseReason::TimedOut);
    assert_eq!(child_rx.await.unwrap(), CloseReason::TimedOut);
    assert!(!parent.is_active());
    assert!(!child.is_active());

    // Pings were attempted before giving up.
    assert!(link.sent_kinds().iter().any(|kind| kind == "Ping"));
}

#[tokio::test(start_paused = true)]
async fn idle_connections_stay_alive_on_pings_alone() {
    let (parent, child, link) = establish_pair().await;

    // Two minutes of complete application silence - four timeout windows.
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(parent.is_active());
    assert!(child.is_active());
    let kinds = link.sent_kinds();
    assert!(kinds.iter().any(|kind| kind == "Ping"), "idle sides must probe");
    assert!(kinds.iter().any(|kind| kind == "Pong"), "probes must be answered");
}

#[tokio::test(start_paused = true)]
async fn steady_traffic_suppresses_pings() {
    let (parent, child, link) = establish_pair().await;

    let seen = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&seen);
    child.on_common(move |_| *counter.lock().unwrap() += 1).await.unwrap();

    // Bidirectional chatter at an interval well under the ping threshold.
    for n in 0..30 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        parent.send_common(json!({ "n": n })).await.unwrap();
        child.send_common(json!({ "n": n })).await.unwrap();
    }

    assert!(parent.is_active());
    assert!(child.is_active());
    assert_eq!(*seen.lock().unwrap(), 30);
    assert!(
        !link.sent_kinds().iter().any(|kind| kind == "Ping"),
        "traffic under the ping interval must suppress probes"
    );
}
