//! End-to-end tests for the `/ws` push channel.
//!
//! Each test serves the router on an ephemeral local port and talks to it
//! with a real `WebSocket` client, so framing, ordering, and close codes
//! are checked as a display would see them.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use raceway_core::broadcast::Broadcaster;
use raceway_core::control::RaceControl;
use raceway_core::queue::RaceQueue;
use raceway_core::runner::{ControlHandle, spawn_control_loop};
use raceway_core::sink::NoOpSink;
use raceway_observer::server::serve;
use raceway_observer::state::AppState;
use raceway_types::DriverAssignment;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serve a fresh control loop whose broadcaster holds `capacity` events.
async fn serve_control(capacity: usize) -> (String, ControlHandle) {
    let control = RaceControl::new(
        RaceQueue::new(),
        600,
        Broadcaster::new(capacity),
        Box::new(NoOpSink),
    );
    let (handle, _task) = spawn_control_loop(control, Duration::from_secs(1));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Arc::new(AppState::new(handle.clone()))));
    (format!("ws://{addr}/ws"), handle)
}

async fn connect(url: &str, role: &str) -> Client {
    let (client, _) = connect_async(format!("{url}?role={role}")).await.unwrap();
    client
}

async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
}

async fn next_json(client: &mut Client) -> Value {
    match next_message(client).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

async fn queue_heat(control: &ControlHandle, name: &str) {
    control
        .enqueue(name.to_owned(), vec![DriverAssignment::new("Alice", 1)])
        .await
        .unwrap();
}

#[tokio::test]
async fn resync_comes_first_then_events_in_publish_order() {
    let (url, control) = serve_control(64).await;
    queue_heat(&control, "Heat 1").await;

    let mut client = connect(&url, "spectator").await;
    let resync = next_json(&mut client).await;
    assert_eq!(resync["type"], "resync");
    assert_eq!(resync["queue"][0]["name"], "Heat 1");
    assert_eq!(resync["session"], Value::Null);

    queue_heat(&control, "Heat 2").await;
    control.start().await.unwrap();

    let first = next_json(&mut client).await;
    assert_eq!(first["type"], "queue-changed");
    assert_eq!(first["queue"].as_array().unwrap().len(), 2);

    let second = next_json(&mut client).await;
    assert_eq!(second["type"], "session-activated");
    assert_eq!(second["session"]["name"], "Heat 1");

    let third = next_json(&mut client).await;
    assert_eq!(third["type"], "queue-changed");
    assert_eq!(third["queue"][0]["name"], "Heat 2");
}

#[tokio::test]
async fn lagging_client_is_closed_with_try_again() {
    // One slot: `start` publishes two events before the connection task
    // can forward the first.
    let (url, control) = serve_control(1).await;
    queue_heat(&control, "Heat 1").await;

    let mut client = connect(&url, "observer").await;
    assert_eq!(next_json(&mut client).await["type"], "resync");

    control.start().await.unwrap();

    match next_message(&mut client).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1013),
        other => panic!("expected a close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn spectator_start_is_rejected_over_the_wire() {
    let (url, control) = serve_control(64).await;
    queue_heat(&control, "Heat 1").await;

    let mut client = connect(&url, "spectator").await;
    assert_eq!(next_json(&mut client).await["type"], "resync");

    client
        .send(Message::Text(r#"{"type":"start"}"#.into()))
        .await
        .unwrap();
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "command-rejected");
    assert_eq!(reply["command"], "start");
    assert_eq!(reply["kind"], "forbidden");

    assert_eq!(control.list_queue().await.unwrap().len(), 1);
    assert!(control.session().await.unwrap().session.is_none());
}

#[tokio::test]
async fn controller_command_gets_one_reply() {
    let (url, control) = serve_control(64).await;
    queue_heat(&control, "Heat 1").await;

    let mut client = connect(&url, "controller").await;
    assert_eq!(next_json(&mut client).await["type"], "resync");

    client
        .send(Message::Text(r#"{"type":"start"}"#.into()))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let frame = next_json(&mut client).await;
        kinds.push(frame["type"].as_str().unwrap().to_owned());
    }
    kinds.sort();
    assert_eq!(kinds, vec!["command-ok", "queue-changed", "session-activated"]);
    assert_eq!(
        control.session().await.unwrap().session.map(|s| s.name),
        Some("Heat 1".to_owned())
    );
}
