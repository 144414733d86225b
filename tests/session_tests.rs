//! Session lifecycle and operation tests against the mock engine.

use mqtt_session::testing::mocks::{EngineCall, MockConnector, RecordingHandler};
use mqtt_session::{
    PublishOptions, QoS, Session, SessionError, SessionOptions, SubscribeOptions, TerminateReason,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn qos1() -> SubscribeOptions {
    SubscribeOptions::qos(QoS::AtLeastOnce)
}

async fn wait_for_events(seen: &Arc<Mutex<Vec<String>>>, n: usize) {
    for _ in 0..200 {
        if seen.lock().await.len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {n} handler events");
}

async fn wait_until_stopped(session: &Session) {
    for _ in 0..200 {
        if !session.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for session actor to stop");
}

#[tokio::test]
async fn test_first_subscribe_succeeds_second_is_duplicate() {
    let connector = MockConnector::new();
    let session = Session::start(
        "c1",
        RecordingHandler::new(),
        connector.clone(),
        SessionOptions::default(),
    )
    .await
    .unwrap();

    let ack = session.subscribe("a/b", qos1()).await.unwrap();
    assert_eq!(ack.reason_code, 0x01);

    let second = session.subscribe("a/b", qos1()).await;
    assert!(matches!(
        second,
        Err(SessionError::Duplicate { topic }) if topic == "a/b"
    ));

    // Only one subscribe reached the engine.
    let subscribes = connector
        .calls()
        .await
        .into_iter()
        .filter(|c| matches!(c, EngineCall::Subscribe { .. }))
        .count();
    assert_eq!(subscribes, 1);
}

#[tokio::test]
async fn test_subscribe_failure_leaves_registry_untouched() {
    let connector = MockConnector::new();
    connector.fail_subscribes_to("bad/topic").await;
    let session = Session::start(
        "c1",
        RecordingHandler::new(),
        connector.clone(),
        SessionOptions::default(),
    )
    .await
    .unwrap();

    let failed = session.subscribe("bad/topic", qos1()).await;
    assert!(matches!(failed, Err(SessionError::Engine(_))));

    // The failed topic never entered the registry, so a retry surfaces the
    // engine error again instead of Duplicate.
    let retry = session.subscribe("bad/topic", qos1()).await;
    assert!(matches!(retry, Err(SessionError::Engine(_))));

    let subscribes = connector
        .calls()
        .await
        .into_iter()
        .filter(|c| matches!(c, EngineCall::Subscribe { .. }))
        .count();
    assert_eq!(subscribes, 2);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let connector = MockConnector::new();
    let session = Session::start(
        "c1",
        RecordingHandler::new(),
        connector.clone(),
        SessionOptions::default(),
    )
    .await
    .unwrap();

    session.subscribe("a/b", qos1()).await.unwrap();
    session.unsubscribe("a/b").await.unwrap();

    // Unsubscribing a topic that is no longer (or never was) registered
    // still forwards to the engine and succeeds.
    session.unsubscribe("a/b").await.unwrap();
    session.unsubscribe("never/registered").await.unwrap();

    let unsubscribes = connector
        .calls()
        .await
        .into_iter()
        .filter(|c| matches!(c, EngineCall::Unsubscribe { .. }))
        .count();
    assert_eq!(unsubscribes, 3);

    // After removal the topic can be subscribed again.
    assert!(session.subscribe("a/b", qos1()).await.is_ok());
}

#[tokio::test]
async fn test_unsubscribe_engine_failure_still_clears_registry() {
    let connector = MockConnector::new();
    let session = Session::start(
        "c1",
        RecordingHandler::new(),
        connector.clone(),
        SessionOptions::default(),
    )
    .await
    .unwrap();

    session.subscribe("a/b", qos1()).await.unwrap();

    connector.set_fail_unsubscribe(true).await;
    let result = session.unsubscribe("a/b").await;
    assert!(matches!(result, Err(SessionError::Engine(_))));

    // The registry entry is gone despite the engine error.
    connector.set_fail_unsubscribe(false).await;
    assert!(session.subscribe("a/b", qos1()).await.is_ok());
}

#[tokio::test]
async fn test_publish_delivery_tiers() {
    let connector = MockConnector::new();
    let session = Session::start(
        "c1",
        RecordingHandler::new(),
        connector.clone(),
        SessionOptions::default(),
    )
    .await
    .unwrap();

    // Fire-and-forget and acknowledged tiers both normalize to a bare Ok.
    session
        .publish("t", "fire", PublishOptions::qos(QoS::AtMostOnce))
        .await
        .unwrap();
    session
        .publish("t", "acked", PublishOptions::qos(QoS::AtLeastOnce))
        .await
        .unwrap();

    let published: Vec<QoS> = connector
        .calls()
        .await
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::Publish { qos, .. } => Some(qos),
            _ => None,
        })
        .collect();
    assert_eq!(published, vec![QoS::AtMostOnce, QoS::AtLeastOnce]);

    // Engine errors come back unchanged for any tier.
    connector.set_fail_publish(true).await;
    let failed = session
        .publish("t", "boom", PublishOptions::qos(QoS::AtMostOnce))
        .await;
    assert!(matches!(failed, Err(SessionError::Engine(_))));
}

#[tokio::test]
async fn test_events_dispatched_in_arrival_order() {
    let connector = MockConnector::new();
    let handler = RecordingHandler::new();
    let seen = handler.events_seen();
    let terminated = handler.terminated();

    let session = Session::start("c1", handler, connector.clone(), SessionOptions::default())
        .await
        .unwrap();

    connector.deliver_message("t", "e1").await;
    connector.deliver_message("t", "e2").await;
    connector.deliver_ack(9).await;
    wait_for_events(&seen, 3).await;

    assert_eq!(
        *seen.lock().await,
        vec![
            "message:t:e1".to_string(),
            "message:t:e2".to_string(),
            "ack:9".to_string()
        ]
    );

    // The final handler state reflects sequential application of all three.
    session.stop().await.unwrap();
    wait_until_stopped(&session).await;
    let (reason, state) = terminated.lock().await.clone().unwrap();
    assert_eq!(reason, TerminateReason::Normal);
    assert_eq!(state.len(), 3);
}

#[tokio::test]
async fn test_stop_terminates_without_reconnect() {
    let connector = MockConnector::new();
    let handler = RecordingHandler::new();
    let terminated = handler.terminated();

    let session = Session::start("c1", handler, connector.clone(), SessionOptions::default())
        .await
        .unwrap();

    session.stop().await.unwrap();
    wait_until_stopped(&session).await;

    // One connect total: a caller-initiated disconnect never reconnects.
    assert_eq!(connector.connect_count().await, 1);
    let (reason, _) = terminated.lock().await.clone().unwrap();
    assert_eq!(reason, TerminateReason::Normal);

    // Operations on a stopped session fail with Closed.
    let after = session.subscribe("a/b", qos1()).await;
    assert!(matches!(after, Err(SessionError::Closed)));
}

#[tokio::test]
async fn test_stop_with_failing_disconnect_still_terminates() {
    let connector = MockConnector::new();
    let handler = RecordingHandler::new();
    let terminated = handler.terminated();

    let session = Session::start("c1", handler, connector.clone(), SessionOptions::default())
        .await
        .unwrap();

    connector.set_fail_disconnect(true).await;
    let result = session.stop().await;
    assert!(matches!(result, Err(SessionError::Engine(_))));
    wait_until_stopped(&session).await;

    // The failed disconnect reaches the handler as an error reason.
    let (reason, _) = terminated.lock().await.clone().unwrap();
    assert!(matches!(reason, TerminateReason::Error(_)));
}

#[tokio::test]
async fn test_dropping_all_handles_stops_actor() {
    let connector = MockConnector::new();
    let handler = RecordingHandler::new();
    let terminated = handler.terminated();

    let session = Session::start("c1", handler, connector.clone(), SessionOptions::default())
        .await
        .unwrap();
    drop(session);

    for _ in 0..200 {
        if terminated.lock().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (reason, _) = terminated.lock().await.clone().unwrap();
    assert_eq!(reason, TerminateReason::Normal);
    assert!(connector
        .calls()
        .await
        .contains(&EngineCall::Disconnect));
}

#[tokio::test]
async fn test_startup_connect_failure_is_fatal() {
    let connector = MockConnector::new();
    connector.set_refuse_connections(true).await;

    let result = Session::start(
        "c1",
        RecordingHandler::new(),
        connector.clone(),
        SessionOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(SessionError::Startup(_))));
    // Exactly one attempt: no retry loop at startup.
    assert_eq!(connector.connect_count().await, 1);
}

#[tokio::test]
async fn test_handler_init_failure_aborts_startup() {
    let connector = MockConnector::new();

    let result = Session::start(
        "c1",
        RecordingHandler::refusing_init(),
        connector.clone(),
        SessionOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(SessionError::Startup(_))));
    // The transport opened for the attempt is closed again.
    assert!(connector.calls().await.contains(&EngineCall::Disconnect));
}

#[tokio::test]
async fn test_init_subscriptions_are_best_effort() {
    let connector = MockConnector::new();
    connector.fail_subscribes_to("denied").await;

    let handler = RecordingHandler::with_init_subscriptions([
        ("ok/topic".to_string(), qos1()),
        ("denied".to_string(), qos1()),
    ]);
    let session = Session::start("c1", handler, connector.clone(), SessionOptions::default())
        .await
        .unwrap();

    // Both were attempted; the failure did not abort startup.
    let attempted: Vec<String> = connector
        .calls()
        .await
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::Subscribe { topic, .. } => Some(topic),
            _ => None,
        })
        .collect();
    assert_eq!(attempted, vec!["ok/topic".to_string(), "denied".to_string()]);

    // The failed topic is absent from the registry, the good one is present.
    assert!(matches!(
        session.subscribe("ok/topic", qos1()).await,
        Err(SessionError::Duplicate { .. })
    ));
    connector.clear_calls().await;
    // "denied" still fails at the engine but is not a duplicate.
    assert!(matches!(
        session.subscribe("denied", qos1()).await,
        Err(SessionError::Engine(_))
    ));
}

#[tokio::test]
async fn test_named_sessions_register_and_deregister() {
    let connector = MockConnector::new();
    let session = Session::start_named(
        "named-test-1",
        "c1",
        RecordingHandler::new(),
        connector.clone(),
        SessionOptions::default(),
    )
    .await
    .unwrap();

    assert!(Session::lookup("named-test-1").is_some());

    let duplicate = Session::start_named(
        "named-test-1",
        "c2",
        RecordingHandler::new(),
        MockConnector::new(),
        SessionOptions::default(),
    )
    .await;
    assert!(matches!(
        duplicate,
        Err(SessionError::AlreadyRegistered { name }) if name == "named-test-1"
    ));

    session.stop().await.unwrap();
    assert!(Session::lookup("named-test-1").is_none());
}
