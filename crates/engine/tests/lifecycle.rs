//! Connection lifecycle: teardown fan-out, idempotence, observer faults,
//! claims and bounded shutdown.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parlor_engine::{
    CloseStatus, Connection, ConnectionObserver, Delivery, Disposition, EngineConfig,
    EngineContext, EngineError, ObserverError, ReadEvent,
};
use parlor_proto::{Body, Message, Registry, Role};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

#[tokio::test]
async fn close_is_idempotent_and_sentinel_fires_once() {
    let (server_ctx, _client_ctx) = common::contexts();
    let listener = common::listener().await;
    let (accepted, dialed) = common::tcp_pair(&listener).await;

    let server = Connection::open(accepted, &server_ctx).unwrap();
    let first_observer = common::Recorder::new();
    let second_observer = common::Recorder::new();
    server.add_observer(first_observer.clone());
    server.add_observer(second_observer.clone());
    server.start_receiving().unwrap();
    server.start_sending().unwrap();

    // Peer disconnect: the receiver execution runs the teardown itself.
    drop(dialed);
    common::wait_until(Duration::from_secs(2), || !server.is_open()).await;

    // Late closes from other tasks are no-ops.
    server.close(CloseStatus::InternalError);
    server.close(CloseStatus::Unavailable);

    assert_eq!(server.status(), Some(CloseStatus::Normal), "first close wins");
    assert!(server.closed_millis() > 0);
    assert_eq!(first_observer.closed_count(), 1);
    assert_eq!(second_observer.closed_count(), 1);
    assert_eq!(server_ctx.count(), 0);

    // Send on a dead connection is a typed failure, not a panic.
    let refused = server.send(Message::new(Body::KeepAlive));
    assert!(matches!(refused, Err(EngineError::Closed)));
}

#[tokio::test]
async fn kicker_is_recorded_by_the_winning_close() {
    let (server_ctx, _client_ctx) = common::contexts();
    let listener = common::listener().await;
    let (accepted, _dialed) = common::tcp_pair(&listener).await;

    let server = Connection::open(accepted, &server_ctx).unwrap();
    server.close_kicked(CloseStatus::Normal, "203.0.113.7");
    server.close_kicked(CloseStatus::Normal, "somebody-else");

    assert_eq!(server.kicked_by().as_deref(), Some("203.0.113.7"));
    assert_eq!(server.status(), Some(CloseStatus::Normal));
}

#[tokio::test]
async fn protocol_violation_closes_with_400() {
    let (server_ctx, _client_ctx) = common::contexts();
    let listener = common::listener().await;
    let (accepted, mut dialed) = common::tcp_pair(&listener).await;

    let server = Connection::open(accepted, &server_ctx).unwrap();
    server.start_receiving().unwrap();

    // An id outside the installed registry, straight onto the socket.
    dialed.write_all(&[0x7F, 0xFF, 0x00]).await.unwrap();
    dialed.flush().await.unwrap();

    common::wait_until(Duration::from_secs(2), || !server.is_open()).await;
    assert_eq!(server.status(), Some(CloseStatus::ProtocolViolation));
}

struct Failing;

impl ConnectionObserver for Failing {
    fn on_delivery(
        &self,
        _connection: &Connection,
        delivery: &Delivery,
    ) -> Result<Disposition, ObserverError> {
        match delivery {
            Delivery::Message(_) => Err(ObserverError::new("room ledger unavailable")),
            _ => Ok(Disposition::Continue),
        }
    }
}

#[tokio::test]
async fn observer_failure_is_reported_to_the_peer() {
    let (server_ctx, client_ctx) = common::contexts();
    let listener = common::listener().await;
    let (accepted, dialed) = common::tcp_pair(&listener).await;

    let server = Connection::open(accepted, &server_ctx).unwrap();
    server.add_observer(Arc::new(Failing));
    server.start_receiving().unwrap();
    server.start_sending().unwrap();

    let client = Connection::open(dialed, &client_ctx).unwrap();
    client
        .write(&Message::new(Body::KeepAlive))
        .await
        .unwrap();

    // The receiver survives the observer fault and reports it back.
    let event = timeout(Duration::from_secs(2), client.read())
        .await
        .expect("fault within bound")
        .unwrap();
    match event {
        ReadEvent::Message(message) => {
            assert_eq!(message.role(), Role::Indication);
            match message.body() {
                Body::Fault { detail } => assert!(detail.contains("room ledger")),
                other => panic!("expected fault, got {other:?}"),
            }
        }
        ReadEvent::Timeout => panic!("expected fault message, got timeout"),
    }
    assert!(server.is_open(), "observer faults never kill the receiver");

    client.close(CloseStatus::Normal);
    server.close(CloseStatus::Normal);
}

struct Claimer {
    seen: AtomicUsize,
}

impl ConnectionObserver for Claimer {
    fn on_delivery(
        &self,
        _connection: &Connection,
        delivery: &Delivery,
    ) -> Result<Disposition, ObserverError> {
        match delivery {
            Delivery::Message(_) => {
                self.seen.fetch_add(1, Ordering::Relaxed);
                Ok(Disposition::Claimed)
            }
            _ => Ok(Disposition::Continue),
        }
    }
}

#[tokio::test]
async fn claimed_delivery_suppresses_later_observers() {
    let (server_ctx, client_ctx) = common::contexts();
    let listener = common::listener().await;
    let (accepted, dialed) = common::tcp_pair(&listener).await;

    let server = Connection::open(accepted, &server_ctx).unwrap();
    let claimer = Arc::new(Claimer {
        seen: AtomicUsize::new(0),
    });
    let recorder = common::Recorder::new();
    server.add_observer(claimer.clone());
    server.add_observer(recorder.clone());
    server.start_receiving().unwrap();

    let client = Connection::open(dialed, &client_ctx).unwrap();
    client.write(&Message::new(Body::KeepAlive)).await.unwrap();

    common::wait_until(Duration::from_secs(2), || {
        claimer.seen.load(Ordering::Relaxed) == 1
    })
    .await;
    assert_eq!(
        recorder.message_count(),
        0,
        "claimed delivery must not reach later observers"
    );

    // The close sentinel ignores claims: everyone hears it.
    server.close(CloseStatus::Normal);
    assert_eq!(recorder.closed_count(), 1);
    client.close(CloseStatus::Normal);
}

#[tokio::test]
async fn shutdown_is_bounded_and_empties_the_directory() {
    let config = EngineConfig {
        shutdown_join_ms: 500,
        ..EngineConfig::default()
    };
    let server_ctx = EngineContext::new(config, Registry::builtin());
    let listener = common::listener().await;

    let mut held = Vec::new();
    for _ in 0..3 {
        let (accepted, dialed) = common::tcp_pair(&listener).await;
        let conn = Connection::open(accepted, &server_ctx).unwrap();
        conn.start_receiving().unwrap();
        conn.start_sending().unwrap();
        // The peers stay silent forever: worst case for shutdown.
        held.push((conn, dialed));
    }

    timeout(Duration::from_secs(5), server_ctx.shutdown())
        .await
        .expect("shutdown must not block indefinitely");

    assert_eq!(server_ctx.count(), 0);
    for (conn, _) in &held {
        assert!(!conn.is_open());
        assert_eq!(conn.status(), Some(CloseStatus::Unavailable));
    }
}
