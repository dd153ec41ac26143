//! End-to-end tests over the in-memory pipe channel.
//!
//! Exercises the full async stack: two dispatcher tasks, the pipe
//! transport, and the caller-facing handles. Time is paused, so polling
//! sleeps are virtual and the tests run instantly.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::{Value, json};
use transom_client::{
    CloseReason, Connection, ConnectionError, EstablishConfig, IncomingRequest, OriginFilter,
    Route,
};
use transom_harness::{SimEnv, SimLink, sim_link};
use transom_proto::Origin;

fn parent_origin() -> Origin {
    Origin::new("https://parent.example")
}

fn child_origin() -> Origin {
    Origin::new("https://child.example")
}

/// Establish a connected pair over a fresh pipe.
async fn establish_pair() -> (Connection, Connection, SimLink) {
    let (parent_end, child_end, link) = sim_link(&parent_origin(), &child_origin());

    let parent_config =
        EstablishConfig::initiator(parent_end.peer, parent_end.listener, child_origin())
            .with_env(SimEnv::with_seed(1));
    let child_config = EstablishConfig::acceptor(child_end.peer, child_end.listener)
        .with_filter(OriginFilter::whitelist([parent_origin()]))
        .with_env(SimEnv::with_seed(2));

    let (parent, child) = tokio::join!(
        Connection::establish(parent_config),
        Connection::establish(child_config),
    );
    (parent.unwrap(), child.unwrap(), link)
}

/// Poll a condition until it holds; sleeps are virtual under paused time.
async fn eventually(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition never held: {what}");
}

#[tokio::test(start_paused = true)]
async fn handshake_verifies_both_origins() {
    let (parent, child, link) = establish_pair().await;

    assert!(parent.is_active());
    assert!(child.is_active());
    assert_eq!(*parent.peer_origin(), child_origin());
    assert_eq!(*child.peer_origin(), parent_origin());
    assert_eq!(link.sent_kinds(), vec!["HandshakeInit", "HandshakeComplete"]);
}

#[tokio::test(start_paused = true)]
async fn common_messages_fan_out_in_registration_order() {
    let (parent, child, _link) = establish_pair().await;

    let seen: Arc<Mutex<Vec<(u8, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::clone(&seen);
    child
        .on_common(move |payload| first.lock().unwrap().push((1, payload.clone())))
        .await
        .unwrap();
    let second = Arc::clone(&seen);
    child
        .on_common(move |payload| second.lock().unwrap().push((2, payload.clone())))
        .await
        .unwrap();

    parent.send_common(json!({ "greeting": "hello" })).await.unwrap();

    eventually(|| seen.lock().unwrap().len() == 2, "both handlers ran").await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(1, json!({ "greeting": "hello" })), (2, json!({ "greeting": "hello" }))]
    );
}

#[tokio::test(start_paused = true)]
async fn request_response_round_trip() {
    let (parent, child, _link) = establish_pair().await;
    let route = Route::parse("app:double").unwrap();

    child
        .on_request(route.clone(), |request| {
            let n = request.payload()["n"].as_i64().unwrap();
            request.respond(json!({ "n": n * 2 })).unwrap();
        })
        .await
        .unwrap();

    let response = parent.request(route, json!({ "n": 21 })).await.unwrap();
    assert_eq!(response, json!({ "n": 42 }));
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_resolve_independently_of_answer_order() {
    let (parent, child, _link) = establish_pair().await;
    let route = Route::parse("app:echo").unwrap();

    let inbox: Arc<Mutex<Vec<IncomingRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let collector = Arc::clone(&inbox);
    child
        .on_request(route.clone(), move |request| collector.lock().unwrap().push(request))
        .await
        .unwrap();

    let mut calls = Vec::new();
    for n in 0..3 {
        let parent = parent.clone();
        let route = route.clone();
        calls.push(tokio::spawn(async move { parent.request(route, json!({ "n": n })).await }));
    }

    eventually(|| inbox.lock().unwrap().len() == 3, "all requests arrived").await;

    // Answer in reverse arrival order; each caller must still get the
    // payload that matches its own request.
    let mut requests: Vec<IncomingRequest> = std::mem::take(&mut *inbox.lock().unwrap());
    requests.reverse();
    for request in requests {
        let echo = request.payload().clone();
        request.respond(echo).unwrap();
    }

    for (n, call) in calls.into_iter().enumerate() {
        let response = call.await.unwrap().unwrap();
        assert_eq!(response, json!({ "n": n }));
    }
}

#[tokio::test(start_paused = true)]
async fn respond_twice_sends_exactly_one_response() {
    let (parent, child, link) = establish_pair().await;
    let route = Route::parse("app:once").unwrap();

    let seen_id = Arc::new(Mutex::new(None));
    let collector = Arc::clone(&seen_id);
    child
        .on_request(route.clone(), move |request| {
            *collector.lock().unwrap() = Some(request.request_id());
        })
        .await
        .unwrap();

    let call = {
        let parent = parent.clone();
        tokio::spawn(async move { parent.request(route, json!(1)).await })
    };
    eventually(|| seen_id.lock().unwrap().is_some(), "request arrived").await;
    let request_id = seen_id.lock().unwrap().unwrap();

    child.respond(request_id, json!("first")).await.unwrap();
    child.respond(request_id, json!("second")).await.unwrap();

    assert_eq!(call.await.unwrap().unwrap(), json!("first"));
    let responses = link.sent_kinds().iter().filter(|kind| *kind == "Response").count();
    assert_eq!(responses, 1, "the second respond must be a no-op");
}

#[tokio::test(start_paused = true)]
async fn closing_rejects_pending_requests_and_notifies_the_peer() {
    let (parent, child, _link) = establish_pair().await;
    // Nobody handles this route on the child, so the request stays pending.
    let route = Route::parse("app:void").unwrap();

    let parent_reason = Arc::new(Mutex::new(None));
    let child_reason = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&parent_reason);
    parent.on_after_close(move |reason| *sink.lock().unwrap() = Some(reason)).await.unwrap();
    let sink = Arc::clone(&child_reason);
    child.on_after_close(move |reason| *sink.lock().unwrap() = Some(reason)).await.unwrap();

    let call = {
        let parent = parent.clone();
        tokio::spawn(async move { parent.request(route, json!(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    parent.close().await;

    let error = call.await.unwrap().unwrap_err();
    assert_eq!(error, ConnectionError::Closed { reason: CloseReason::ClosedByThis });

    assert_eq!(*parent_reason.lock().unwrap(), Some(CloseReason::ClosedByThis));
    eventually(|| child_reason.lock().unwrap().is_some(), "the peer noticed the close").await;
    assert_eq!(*child_reason.lock().unwrap(), Some(CloseReason::ClosedByPeer));

    // A closed connection is not reusable.
    assert!(!parent.is_active());
    let error = parent.send_common(json!(1)).await.unwrap_err();
    assert_eq!(error, ConnectionError::Closed { reason: CloseReason::ClosedByThis });
}

#[tokio::test(start_paused = true)]
async fn before_close_handlers_can_send_final_messages() {
    let (parent, child, _link) = establish_pair().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let collector = Arc::clone(&seen);
    child.on_common(move |payload| collector.lock().unwrap().push(payload.clone())).await.unwrap();

    parent
        .on_before_close(|scope| {
            scope.send_common(json!("goodbye")).unwrap();
        })
        .await
        .unwrap();

    parent.close().await;

    eventually(|| !seen.lock().unwrap().is_empty(), "the farewell arrived").await;
    assert_eq!(*seen.lock().unwrap(), vec![json!("goodbye")]);
}

#[tokio::test(start_paused = true)]
async fn filter_rejection_surfaces_unexpected_peer() {
    let (parent_end, child_end, _link) = sim_link(&parent_origin(), &child_origin());

    let parent_config =
        EstablishConfig::initiator(parent_end.peer, parent_end.listener, child_origin())
            .with_env(SimEnv::with_seed(3));
    // Blacklisting the parent's origin rejects it at handshake time.
    let child_config = EstablishConfig::acceptor(child_end.peer, child_end.listener)
        .with_filter(OriginFilter::blacklist([parent_origin()]))
        .with_env(SimEnv::with_seed(4));

    let (parent, child) = tokio::join!(
        Connection::establish(parent_config),
        Connection::establish(child_config),
    );

    let error = child.unwrap_err();
    assert!(matches!(error, ConnectionError::UnexpectedPeer { ref origin } if *origin == parent_origin()));

    // The parent finished its own handshake before the filter ran; it must
    // independently notice the closure.
    let parent = parent.unwrap();
    eventually(|| !parent.is_active(), "the initiator noticed the rejection").await;
}

#[tokio::test(start_paused = true)]
async fn malformed_channel_traffic_is_invisible() {
    let (parent, child, link) = establish_pair().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let collector = Arc::clone(&seen);
    child.on_common(move |payload| collector.lock().unwrap().push(payload.clone())).await.unwrap();

    // Junk from the trusted origin and valid traffic from a stranger.
    link.inject(&child_origin(), parent_origin(), json!({ "kind": "Common", "payload": 1 }));
    link.inject(&child_origin(), parent_origin(), json!(42));
    link.inject(
        &child_origin(),
        parent_origin(),
        json!({ "domain": "transom", "kind": "Request", "route": "app:echo" }),
    );
    link.inject(
        &child_origin(),
        Origin::new("https://stranger.example"),
        json!({ "domain": "transom", "kind": "Common", "payload": "spoofed" }),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(child.is_active(), "junk must not close the connection");
    assert!(seen.lock().unwrap().is_empty(), "junk must not reach handlers");

    // The connection still works normally afterwards.
    parent.send_common(json!("real")).await.unwrap();
    eventually(|| !seen.lock().unwrap().is_empty(), "real traffic still flows").await;
    assert_eq!(*seen.lock().unwrap(), vec![json!("real")]);
}

#[tokio::test(start_paused = true)]
async fn removed_handlers_stop_firing() {
    let (parent, child, _link) = establish_pair().await;

    let seen = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&seen);
    let token = child
        .on_common(move |_| *counter.lock().unwrap() += 1)
        .await
        .unwrap();

    parent.send_common(json!(1)).await.unwrap();
    eventually(|| *seen.lock().unwrap() == 1, "first message delivered").await;

    assert!(child.remove_common_handler(token).await.unwrap());
    assert!(!child.remove_common_handler(token).await.unwrap(), "tokens remove once");

    parent.send_common(json!(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*seen.lock().unwrap(), 1, "a removed handler must not fire");
}
