use std::time::Duration;

use serde_json::json;

use super::support::{next_event, next_event_where, start_fake_client};
use crate::{
    CopilotError, MessageOptions, ResumeSessionConfig, SessionConfig, SessionEvent, SessionState,
};

#[tokio::test]
async fn send_and_wait_returns_the_assistant_reply() {
    let (_dir, client) = start_fake_client().await;

    let session = client
        .create_session(SessionConfig::new())
        .await
        .expect("create session");
    assert_eq!(session.session_id(), "sess-1");
    assert_eq!(
        session.workspace_path().map(|p| p.display().to_string()),
        Some("/tmp/workspace".to_string())
    );

    let reply = session
        .send_and_wait("What is 2+2?", Duration::from_secs(5))
        .await
        .expect("send and wait")
        .expect("assistant reply");
    assert_eq!(reply.content, "4");
    assert_eq!(reply.message_id.as_deref(), Some("m1"));

    client.stop().await.expect("stop");
}

#[tokio::test]
async fn send_and_wait_returns_none_when_session_goes_idle() {
    let (_dir, client) = start_fake_client().await;
    let session = client
        .create_session(SessionConfig::new())
        .await
        .expect("create session");

    let reply = session
        .send_and_wait("stay quiet", Duration::from_secs(5))
        .await
        .expect("send and wait");
    assert!(reply.is_none());
    assert_eq!(session.state(), SessionState::Idle);

    client.stop().await.expect("stop");
}

#[tokio::test]
async fn large_event_payload_survives_the_decoder() {
    let (_dir, client) = start_fake_client().await;
    let session = client
        .create_session(SessionConfig::new())
        .await
        .expect("create session");

    let reply = session
        .send_and_wait("big payload", Duration::from_secs(5))
        .await
        .expect("send and wait")
        .expect("assistant reply");
    assert_eq!(reply.content.len(), 32 * 1024);

    client.stop().await.expect("stop");
}

#[tokio::test]
async fn unknown_event_type_is_preserved_not_dropped() {
    let (_dir, client) = start_fake_client().await;
    let session = client
        .create_session(SessionConfig::new())
        .await
        .expect("create session");

    let mut events = session.events().expect("subscribe");
    session
        .send("mystery event", MessageOptions::default())
        .await
        .expect("send");

    let unknown = next_event_where(&mut events, |event| {
        matches!(event, SessionEvent::Unknown { .. })
    })
    .await;
    match unknown {
        SessionEvent::Unknown {
            event_type,
            payload,
        } => {
            assert_eq!(event_type, "session.quantumLeap");
            assert_eq!(payload["detail"]["level"], json!(9));
        }
        other => panic!("expected Unknown, got {other:?}"),
    }

    // The stream keeps flowing after the unknown event.
    let message = next_event_where(&mut events, |event| {
        matches!(event, SessionEvent::AssistantMessage(_))
    })
    .await;
    assert!(matches!(
        message,
        SessionEvent::AssistantMessage(body) if body.content == "sent"
    ));

    client.stop().await.expect("stop");
}

#[tokio::test]
async fn subscribers_see_events_in_wire_order() {
    let (_dir, client) = start_fake_client().await;
    let session = client
        .create_session(SessionConfig::new())
        .await
        .expect("create session");

    let mut first = session.events().expect("subscribe");
    let mut second = session.events().expect("subscribe");
    session
        .send("What is 2+2?", MessageOptions::default())
        .await
        .expect("send");

    // The post-start `created` event may or may not land after subscription;
    // the turn sequence itself must arrive in wire order for each subscriber.
    for events in [&mut first, &mut second] {
        let mut sequence = Vec::new();
        loop {
            let event = next_event(events).await;
            if matches!(event, SessionEvent::SessionStart { .. }) {
                continue;
            }
            let done = matches!(event, SessionEvent::SessionIdle { .. });
            sequence.push(event);
            if done {
                break;
            }
        }
        assert_eq!(sequence.len(), 4);
        assert!(matches!(sequence[0], SessionEvent::TurnStart { .. }));
        assert!(matches!(
            sequence[1],
            SessionEvent::AssistantMessageDelta { .. }
        ));
        assert!(matches!(sequence[2], SessionEvent::AssistantMessage(_)));
        assert!(matches!(sequence[3], SessionEvent::SessionIdle { .. }));
    }

    client.stop().await.expect("stop");
}

#[tokio::test]
async fn lifecycle_stream_filters_out_non_lifecycle_events() {
    let (_dir, client) = start_fake_client().await;
    let session = client
        .create_session(SessionConfig::new())
        .await
        .expect("create session");

    let mut lifecycle = session.lifecycle_events().expect("subscribe");
    session
        .send("What is 2+2?", MessageOptions::default())
        .await
        .expect("send");

    // turnStart and the assistant messages never reach the filtered stream;
    // only lifecycle events do, ending with the idle.
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), lifecycle.recv())
            .await
            .expect("lifecycle timeout")
            .expect("lifecycle stream open");
        assert!(event.is_lifecycle(), "non-lifecycle event leaked: {event:?}");
        if matches!(event, SessionEvent::SessionIdle { .. }) {
            break;
        }
    }

    client.stop().await.expect("stop");
}

#[tokio::test]
async fn session_rpcs_round_trip() {
    let (_dir, client) = start_fake_client().await;
    let session = client
        .create_session(SessionConfig::new())
        .await
        .expect("create session");

    let model = session.get_model().await.expect("get model");
    assert_eq!(model.id, "gpt-5");

    let compaction = session.compact().await.expect("compact");
    assert!(compaction.success);
    assert_eq!(compaction.tokens_before, Some(1000));
    assert_eq!(compaction.tokens_after, Some(100));

    client.stop().await.expect("stop");
}

#[tokio::test]
async fn destroyed_session_rejects_further_calls() {
    let (_dir, client) = start_fake_client().await;
    let session = client
        .create_session(SessionConfig::new())
        .await
        .expect("create session");

    session.destroy().await.expect("destroy");
    assert_eq!(session.state(), SessionState::Destroyed);

    let error = session.get_model().await.expect_err("destroyed");
    assert!(matches!(error, CopilotError::SessionDestroyed(_)));
    assert!(session.events().is_err());
    let error = session
        .send("hello", MessageOptions::default())
        .await
        .expect_err("destroyed");
    assert!(matches!(error, CopilotError::SessionDestroyed(_)));

    client.stop().await.expect("stop");
}

#[tokio::test]
async fn resume_session_forwards_configured_fields() {
    let (_dir, client) = start_fake_client().await;

    let mut config = SessionConfig::new();
    config.model = Some("gpt-5".into());
    let session = client
        .resume_session(ResumeSessionConfig::with_config("sess-resumed", config))
        .await
        .expect("resume session");
    assert_eq!(session.session_id(), "sess-resumed");
    assert_eq!(session.state(), SessionState::Running);

    client.stop().await.expect("stop");
}
