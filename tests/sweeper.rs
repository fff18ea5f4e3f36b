//! Session expiry sweeping: one warning, one expiration, optional redirect.

mod common;
use common::*;

use chatflow::event_bus::ConversationEventKind;
use chatflow::message::MessageKind;
use chatflow::types::{CloseReason, ConversationKey};
use chrono::{Duration, Utc};

#[tokio::test]
async fn warns_once_then_expires_once() {
    let h = harness(vec![expiring_flow(100, 30), followup_flow()]).await;
    let t0 = Utc::now();
    h.runner
        .on_inbound_message("acme", "c1", "survey", "hi", t0)
        .await
        .unwrap();

    // Outside the warning window: nothing happens.
    let report = h.sweeper.run_once(t0 + Duration::seconds(50)).await.unwrap();
    assert_eq!((report.warned, report.expired), (0, 0));

    // Inside the window: exactly one warning, conversation stays active.
    let report = h.sweeper.run_once(t0 + Duration::seconds(80)).await.unwrap();
    assert_eq!((report.warned, report.expired), (1, 0));
    let report = h.sweeper.run_once(t0 + Duration::seconds(85)).await.unwrap();
    assert_eq!((report.warned, report.expired), (0, 0));

    let key = ConversationKey::new("acme", "c1", "survey");
    let stored = h.states.load(&key).await.unwrap().unwrap();
    assert!(stored.is_active);
    assert!(stored.last_warning_at.is_some());

    // Past expiry: expiration message, closed as expired.
    let report = h.sweeper.run_once(t0 + Duration::seconds(101)).await.unwrap();
    assert_eq!((report.warned, report.expired), (0, 1));
    let stored = h.states.load(&key).await.unwrap().unwrap();
    assert!(stored.is_closed());
    assert_eq!(stored.close_reason, Some(CloseReason::Expired));

    // A later sweep finds nothing.
    let report = h.sweeper.run_once(t0 + Duration::seconds(200)).await.unwrap();
    assert_eq!((report.warned, report.expired), (0, 0));

    let kinds: Vec<MessageKind> = h.transport.sent().iter().map(|(_, m)| m.kind).collect();
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == MessageKind::ExpiryWarning)
            .count(),
        1
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == MessageKind::Expiration).count(),
        1
    );
}

#[tokio::test]
async fn missed_warning_is_sent_before_expiring() {
    let h = harness(vec![expiring_flow(100, 30), followup_flow()]).await;
    let t0 = Utc::now();
    h.runner
        .on_inbound_message("acme", "c1", "survey", "hi", t0)
        .await
        .unwrap();

    // The first sweep lands well past expiry; the contact still gets the
    // warning first and the conversation stays open.
    let report = h.sweeper.run_once(t0 + Duration::seconds(150)).await.unwrap();
    assert_eq!((report.warned, report.expired), (1, 0));
    let key = ConversationKey::new("acme", "c1", "survey");
    assert!(h.states.load(&key).await.unwrap().unwrap().is_active);

    // Only the following pass closes it.
    let report = h.sweeper.run_once(t0 + Duration::seconds(160)).await.unwrap();
    assert_eq!((report.warned, report.expired), (0, 1));
    let stored = h.states.load(&key).await.unwrap().unwrap();
    assert_eq!(stored.close_reason, Some(CloseReason::Expired));
}

#[tokio::test]
async fn expiry_redirects_into_configured_flow() {
    let h = harness(vec![expiring_flow(100, 30), followup_flow()]).await;
    let t0 = Utc::now();
    h.runner
        .on_inbound_message("acme", "c1", "survey", "hi", t0)
        .await
        .unwrap();

    h.sweeper.run_once(t0 + Duration::seconds(101)).await.unwrap();

    // The redirect flow ran to completion under its own key.
    let redirect_key = ConversationKey::new("acme", "c1", "followup");
    let redirected = h.states.load(&redirect_key).await.unwrap().unwrap();
    assert_eq!(redirected.close_reason, Some(CloseReason::Completed));
    assert_eq!(
        h.transport.texts().last().map(String::as_str),
        Some("We'd love to hear from you another time.")
    );

    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        ConversationEventKind::Closed {
            reason: CloseReason::Expired,
            redirected_to: Some(flow),
            ..
        } if flow == "followup"
    )));
}

#[tokio::test]
async fn redirect_into_own_flow_restarts_the_conversation() {
    use chatflow::flows::{AnswerRule, FlowGraphBuilder, FlowSettings, NodeKind};

    // Expiry sends the contact straight back into the flow they timed out
    // of. The restart re-locks the same conversation key, so the sweep must
    // have let go of it first.
    let survey = FlowGraphBuilder::new("survey")
        .with_settings(FlowSettings {
            session_ttl_secs: Some(100),
            expiration_text: Some("This chat has expired.".into()),
            redirect_flow: Some("survey".into()),
            ..FlowSettings::default()
        })
        .add_node("start", NodeKind::Start)
        .add_node(
            "ask",
            NodeKind::Question {
                prompt: "How did we do?".into(),
                variable: "rating".into(),
                rule: AnswerRule::Any,
                retry_text: None,
            },
        )
        .add_node("done", NodeKind::End { text: None })
        .add_edge("e1", "start", "ask")
        .add_edge("e2", "ask", "done")
        .build()
        .unwrap();
    let h = harness(vec![survey]).await;
    let t0 = Utc::now();
    h.runner
        .on_inbound_message("acme", "c1", "survey", "hi", t0)
        .await
        .unwrap();

    let report = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        h.sweeper.run_once(t0 + Duration::seconds(101)),
    )
    .await
    .expect("sweep pass completed")
    .unwrap();
    assert_eq!((report.warned, report.expired), (0, 1));

    // The same key now holds a fresh conversation waiting at the question.
    let key = ConversationKey::new("acme", "c1", "survey");
    let stored = h.states.load(&key).await.unwrap().unwrap();
    assert!(stored.is_active);
    assert_eq!(stored.turn_seq, 1);
    assert_eq!(
        h.transport.texts().last().map(String::as_str),
        Some("How did we do?")
    );
}

#[tokio::test]
async fn activity_pushes_expiry_out_of_reach() {
    let h = harness(vec![support_flow()]).await;
    let t0 = Utc::now();
    h.runner
        .on_inbound_message("acme", "c1", "support", "hi", t0)
        .await
        .unwrap();
    let key = ConversationKey::new("acme", "c1", "support");
    let first_window = h.states.load(&key).await.unwrap().unwrap().session_expires_at;

    // The contact replies an hour in; the 24h window slides forward.
    h.runner
        .on_inbound_message("acme", "c1", "support", "Ana", t0 + Duration::hours(1))
        .await
        .unwrap();
    let stored = h.states.load(&key).await.unwrap().unwrap();
    assert!(stored.session_expires_at > first_window);

    // A sweep past the original window finds the session still alive.
    let report = h
        .sweeper
        .run_once(first_window + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(report.expired, 0);
    assert!(h.states.load(&key).await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn warning_skipped_when_flow_has_no_threshold() {
    let h = harness(vec![support_flow()]).await;
    let t0 = Utc::now();
    h.runner
        .on_inbound_message("acme", "c1", "support", "hi", t0)
        .await
        .unwrap();

    // support has the default 24h TTL and no warning threshold; a sweep a
    // minute in does nothing.
    let report = h.sweeper.run_once(t0 + Duration::seconds(60)).await.unwrap();
    assert_eq!((report.warned, report.expired), (0, 0));
}
