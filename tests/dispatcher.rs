//! Session and dispatcher behavior against a mock service.

mod support;

use bitmap_rpc::transport::{self, RuntimeContext};
use bitmap_rpc::{Dispatcher, Error, Session};
use serde_json::json;
use support::MockServer;

async fn session(server: &MockServer) -> Session {
    let transport = transport::for_context(server.endpoint(), RuntimeContext::Cooperative);
    Session::establish(transport).await.unwrap()
}

#[tokio::test]
async fn handshake_assigns_a_fresh_session_id() {
    let server = MockServer::spawn().await;
    let session = session(&server).await;
    assert!(session.id() > 0);
}

#[tokio::test]
async fn reconnect_is_idempotent_while_the_server_honors_the_id() {
    let server = MockServer::spawn().await;
    let mut session = session(&server).await;
    let id = session.id();

    for _ in 0..3 {
        session.reconnect().await.unwrap();
        assert_eq!(session.id(), id);
    }
    assert_eq!(server.connections(), 4);
}

#[tokio::test]
async fn reconnect_surfaces_an_expired_session() {
    let server = MockServer::spawn().await;
    let mut session = session(&server).await;
    let old = session.id();

    server.expire_sessions(true);
    let err = session.reconnect().await.unwrap_err();
    match err {
        Error::SessionExpired { expected, actual } => {
            assert_eq!(expected, old);
            assert_ne!(actual, old);
        }
        other => panic!("expected SessionExpired, got {other}"),
    }
    // The session carries on under the id the server issued.
    assert_ne!(session.id(), old);
}

#[tokio::test]
async fn call_round_trips_an_opaque_payload() {
    let server = MockServer::spawn().await;
    let mut dispatcher = Dispatcher::connect(&server.endpoint(), RuntimeContext::Cooperative)
        .await
        .unwrap();

    let payload = json!({"values": [1, 2, 3], "label": "x"});
    let echoed = dispatcher.call("Test.Echo", &payload).await.unwrap();
    assert_eq!(echoed, payload);
}

#[tokio::test]
async fn remote_errors_are_surfaced_without_a_retry() {
    let server = MockServer::spawn().await;
    let mut dispatcher = Dispatcher::connect(&server.endpoint(), RuntimeContext::Cooperative)
        .await
        .unwrap();

    let err = dispatcher.call("Test.Err", &json!(null)).await.unwrap_err();
    assert!(matches!(err, Error::Remote(ref m) if m == "kaboom"));
    assert_eq!(server.call_count("Test.Err"), 1);
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn one_transport_failure_gets_one_reconnect_and_retry() {
    let server = MockServer::spawn().await;
    let mut dispatcher = Dispatcher::connect(&server.endpoint(), RuntimeContext::Cooperative)
        .await
        .unwrap();

    server.hangup_next(1);
    let echoed = dispatcher.call("Test.Echo", &json!(42)).await.unwrap();
    assert_eq!(echoed, json!(42));

    // The request went out twice over two connections.
    assert_eq!(server.call_count("Test.Echo"), 2);
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn a_second_failure_stops_after_exactly_one_reconnect() {
    let server = MockServer::spawn().await;
    let mut dispatcher = Dispatcher::connect(&server.endpoint(), RuntimeContext::Cooperative)
        .await
        .unwrap();

    server.hangup_next(2);
    let err = dispatcher.call("Test.Echo", &json!(1)).await.unwrap_err();
    assert!(matches!(err, Error::ReconnectFailed { .. }));

    // One reconnect, never a second: the initial connection plus one more.
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn an_expired_session_aborts_the_retry() {
    let server = MockServer::spawn().await;
    let mut dispatcher = Dispatcher::connect(&server.endpoint(), RuntimeContext::Cooperative)
        .await
        .unwrap();

    server.hangup_next(1);
    server.expire_sessions(true);
    let err = dispatcher.call("Test.Echo", &json!(1)).await.unwrap_err();
    assert!(matches!(err, Error::SessionExpired { .. }));

    // The retry was never sent; the old session's state is gone and the
    // caller decides what happens next.
    assert_eq!(server.call_count("Test.Echo"), 1);
}

#[tokio::test]
async fn new_object_is_tied_to_the_session() {
    let server = MockServer::spawn().await;
    let mut dispatcher = Dispatcher::connect(&server.endpoint(), RuntimeContext::Cooperative)
        .await
        .unwrap();

    let id = dispatcher.new_object().await.unwrap();
    assert_eq!(id.connection_id, dispatcher.session_id());
    assert!(id.object_id > 0);
    assert!(dispatcher.ping().await.unwrap());
}
