//! # Lightweight API Tests
//!
//! Free-function triggers and listeners straight over a window pair.

use bridge_channel::telemetry::init_test_tracing;
use bridge_channel::{lite, ChannelError, HandlerError, Transport, WindowTransport};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn windows() -> (Arc<WindowTransport>, Arc<WindowTransport>) {
    init_test_tracing();
    let (host, frame) = WindowTransport::pair("https://host", "https://frame");
    (Arc::new(host), Arc::new(frame))
}

#[tokio::test]
async fn test_trigger_and_on() {
    let (host, frame) = windows();
    let listener = lite::on(frame.clone(), "ping", |payload, _origin| async move {
        Ok(json!(payload.as_i64().unwrap_or_default() + 1))
    })
    .unwrap();
    assert!(listener.is_active());
    assert_eq!(listener.event(), "ping");

    let answer = lite::trigger(&*host, "ping", 41, None).await.unwrap();
    assert_eq!(answer, json!(42));
}

#[tokio::test]
async fn test_concurrent_triggers() {
    let (host, frame) = windows();
    let _listener = lite::on(frame.clone(), "inc", |payload, _origin| async move {
        Ok(json!(payload.as_i64().unwrap_or_default() + 1))
    })
    .unwrap();

    let (a, b) = tokio::join!(
        lite::trigger(&*host, "inc", 1, None),
        lite::trigger(&*host, "inc", 2, None),
    );
    assert_eq!(a.unwrap(), json!(2));
    assert_eq!(b.unwrap(), json!(3));
}

#[tokio::test]
async fn test_handler_error_is_remote() {
    let (host, frame) = windows();
    let listener = lite::on(frame.clone(), "fail", |_payload, _origin| async move {
        Err::<Value, _>(HandlerError::msg("nope"))
    })
    .unwrap();

    let result = lite::trigger(&*host, "fail", Value::Null, None).await;
    assert_eq!(result, Err(ChannelError::Remote("nope".into())));
    assert_eq!(listener.stats().handler_failures, 1);
}

#[tokio::test]
async fn test_simple_trigger_not_answered() {
    let (host, frame) = windows();
    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let _listener = lite::on(frame.clone(), "notify", move |payload, _origin| {
        let _ = seen_tx.send(payload);
        async move { Ok(json!("would be a reply")) }
    })
    .unwrap();

    let mut replies = host.subscribe().unwrap();
    lite::simple_trigger(&*host, "notify", "hi").unwrap();

    assert_eq!(seen_rx.recv().await, Some(json!("hi")));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(replies.try_recv().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_disposed_listener_stops_answering() {
    let (host, frame) = windows();
    let listener = lite::on(frame.clone(), "ping", |payload, _origin| async move { Ok(payload) })
        .unwrap();

    assert_eq!(
        lite::trigger(&*host, "ping", 1, None).await,
        Ok(json!(1))
    );

    listener.dispose();
    listener.dispose();
    assert!(!listener.is_active());

    let result = lite::trigger(&*host, "ping", 1, Some(Duration::from_millis(50))).await;
    assert!(matches!(result, Err(ChannelError::Timeout { .. })));
}

#[tokio::test]
async fn test_other_events_ignored() {
    let (host, frame) = windows();
    let _listener = lite::on(frame.clone(), "ping", |payload, _origin| async move { Ok(payload) })
        .unwrap();

    let result =
        lite::trigger(&*host, "pong", 1, Some(Duration::from_millis(30))).await;
    assert!(matches!(result, Err(ChannelError::Timeout { .. })));
}
