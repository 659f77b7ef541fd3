/// Reconciliation engine tests
/// Covers the send lifecycle, push-event rules, and the consistency
/// properties: no duplication, viewer-scoped deletion, unread
/// conservation, recency ordering, idempotent replay.
use chatsync_core::config::SyncConfig;
use chatsync_core::engine::{SyncEngine, SyncEvent};
use chatsync_core::events::{PushEvent, PushMessage};
use chatsync_core::index::{ConversationPatch, ConversationSummary, Participant};
use chatsync_core::message::{ContentType, Message, MessageStatus};
use chrono::{TimeZone, Utc};

const VIEWER: &str = "me";

fn engine_with(conversations: &[&str]) -> SyncEngine {
    let mut engine = SyncEngine::new(VIEWER.to_string(), SyncConfig::default());
    let page = conversations
        .iter()
        .enumerate()
        .map(|(i, id)| summary(id, 100 + i as i64, 0))
        .collect();
    engine.merge_conversation_page(page, Utc::now());
    engine
}

fn summary(id: &str, ts: i64, unread: u32) -> ConversationSummary {
    ConversationSummary {
        id: id.to_string(),
        other_participant: Participant {
            id: format!("peer-of-{}", id),
            display_name: "Peer".to_string(),
            online: false,
            avatar_url: None,
        },
        last_preview: String::new(),
        last_message_at: Utc.timestamp_opt(ts, 0).unwrap(),
        unread_count: unread,
        booking_ref: None,
    }
}

fn push_new(conversation_id: &str, id: &str, sender: &str, content: &str) -> PushEvent {
    PushEvent::MessageNew {
        conversation_id: conversation_id.to_string(),
        message: PushMessage {
            id: id.to_string(),
            sender_id: sender.to_string(),
            content: content.to_string(),
            content_type: ContentType::Text,
            created_at: Utc::now(),
            attachment: None,
        },
    }
}

fn canonical(id: &str, conversation_id: &str, content: &str) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: VIEWER.to_string(),
        content: content.to_string(),
        content_type: ContentType::Text,
        created_at: Utc::now(),
        status: MessageStatus::Sent,
        attachment: None,
        seq: 0,
    }
}

fn count_with_content(engine: &SyncEngine, conversation_id: &str, content: &str) -> usize {
    engine
        .timeline(conversation_id)
        .map(|tl| tl.messages().iter().filter(|m| m.content == content).count())
        .unwrap_or(0)
}

// ─── Send lifecycle ──────────────────────────────────────────────────────

#[test]
fn optimistic_send_appears_pending() {
    let mut engine = engine_with(&["c1"]);
    engine.select_conversation(Some("c1"));
    let pending = engine.begin_send("c1", "hello", ContentType::Text, None);

    let timeline = engine.timeline("c1").unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline.messages()[0].status, MessageStatus::Pending);
    assert!(pending.id.starts_with("tmp-"));
    // Send bumps the conversation's recency
    assert_eq!(engine.index().summaries()[0].id, "c1");
}

#[test]
fn ack_then_echo_leaves_single_entry() {
    let mut engine = engine_with(&["c1"]);
    engine.select_conversation(Some("c1"));
    let pending = engine.begin_send("c1", "hello", ContentType::Text, None);

    engine.complete_send("c1", &pending.id, &canonical("srv-1", "c1", "hello"));
    engine.apply_push(push_new("c1", "srv-1", VIEWER, "hello"));

    assert_eq!(count_with_content(&engine, "c1", "hello"), 1);
    let m = engine.timeline("c1").unwrap().get("srv-1").unwrap();
    assert_eq!(m.status, MessageStatus::Sent);
}

#[test]
fn echo_then_ack_leaves_single_entry() {
    let mut engine = engine_with(&["c1"]);
    engine.select_conversation(Some("c1"));
    let pending = engine.begin_send("c1", "hello", ContentType::Text, None);

    // Push echo wins the race against the REST ack
    engine.apply_push(push_new("c1", "srv-1", VIEWER, "hello"));
    engine.complete_send("c1", &pending.id, &canonical("srv-1", "c1", "hello"));

    assert_eq!(count_with_content(&engine, "c1", "hello"), 1);
    let timeline = engine.timeline("c1").unwrap();
    assert!(timeline.contains("srv-1"));
    assert!(!timeline.contains(&pending.id));
}

#[test]
fn failed_send_stays_visible_and_retry_is_a_new_entry() {
    let mut engine = engine_with(&["c1"]);
    engine.select_conversation(Some("c1"));
    let pending = engine.begin_send("c1", "hello", ContentType::Text, None);
    engine.fail_send("c1", &pending.id);

    assert_eq!(
        engine.timeline("c1").unwrap().get(&pending.id).unwrap().status,
        MessageStatus::Failed
    );

    // Retry is a fresh send cycle
    let retry = engine.begin_send("c1", "hello", ContentType::Text, None);
    engine.complete_send("c1", &retry.id, &canonical("srv-2", "c1", "hello"));
    let timeline = engine.timeline("c1").unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline.get(&pending.id).unwrap().status, MessageStatus::Failed);
    assert_eq!(timeline.get("srv-2").unwrap().status, MessageStatus::Sent);
}

#[test]
fn self_message_from_other_device_is_appended_not_suppressed() {
    let mut engine = engine_with(&["c1"]);
    engine.select_conversation(Some("c1"));
    // No matching local send: this came from another tab
    engine.apply_push(push_new("c1", "srv-9", VIEWER, "sent elsewhere"));

    assert_eq!(count_with_content(&engine, "c1", "sent elsewhere"), 1);
    // Own messages are never unread
    assert_eq!(engine.unread_total(), 0);
}

// ─── Push rules ──────────────────────────────────────────────────────────

#[test]
fn unknown_conversation_events_are_ignored() {
    let mut engine = engine_with(&["c1"]);
    engine.apply_push(push_new("ghost", "srv-1", "other", "boo"));
    assert!(engine.timeline("ghost").is_none());
    assert_eq!(engine.unread_total(), 0);
}

#[test]
fn tombstoned_conversation_takes_no_further_events() {
    let mut engine = engine_with(&["c1"]);
    engine.select_conversation(Some("c1"));
    engine.remove_conversation("c1");

    assert_eq!(engine.selected(), None);
    engine.apply_push(push_new("c1", "srv-1", "other", "late"));
    assert!(engine.timeline("c1").is_none());
    assert_eq!(engine.unread_total(), 0);
}

#[test]
fn unselected_conversation_updates_index_not_timeline() {
    let mut engine = engine_with(&["c1", "c2"]);
    engine.select_conversation(Some("c1"));
    engine.apply_push(push_new("c2", "srv-1", "other", "ping"));

    // Timeline untouched, index touched, unread bumped
    assert!(engine.timeline("c2").is_none());
    assert_eq!(engine.index().summaries()[0].id, "c2");
    assert_eq!(engine.index().get("c2").unwrap().last_preview, "ping");
    assert_eq!(engine.index().get("c2").unwrap().unread_count, 1);
    assert_eq!(engine.unread_total(), 1);
}

#[test]
fn open_conversation_message_is_not_counted_unread() {
    let mut engine = engine_with(&["c1"]);
    engine.select_conversation(Some("c1"));
    engine.apply_push(push_new("c1", "srv-1", "other", "hi"));

    assert_eq!(count_with_content(&engine, "c1", "hi"), 1);
    assert_eq!(engine.unread_total(), 0);
}

#[test]
fn duplicate_message_new_does_not_double_count() {
    let mut engine = engine_with(&["c1", "c2"]);
    engine.select_conversation(Some("c1"));
    let event = push_new("c2", "srv-1", "other", "ping");
    engine.apply_push(event.clone());
    engine.apply_push(event);

    assert_eq!(engine.index().get("c2").unwrap().unread_count, 1);
    assert_eq!(engine.unread_total(), 1);
}

#[test]
fn deletion_is_idempotent_under_replay() {
    let mut engine = engine_with(&["c1"]);
    engine.select_conversation(Some("c1"));
    engine.apply_push(push_new("c1", "srv-1", "other", "to be removed"));

    let event = PushEvent::MessageDeleted {
        conversation_id: "c1".to_string(),
        message_id: "srv-1".to_string(),
    };
    engine.apply_push(event.clone());
    let after_once: Vec<_> = engine
        .timeline("c1")
        .unwrap()
        .messages()
        .iter()
        .map(|m| (m.id.clone(), m.status, m.content.clone()))
        .collect();

    engine.apply_push(event);
    let after_twice: Vec<_> = engine
        .timeline("c1")
        .unwrap()
        .messages()
        .iter()
        .map(|m| (m.id.clone(), m.status, m.content.clone()))
        .collect();

    assert_eq!(after_once, after_twice);
    assert_eq!(after_once[0].1, MessageStatus::DeletedLocally);
    assert_eq!(after_once[0].2, "message removed");
}

#[test]
fn deletion_before_ack_still_lands() {
    let mut engine = engine_with(&["c1"]);
    engine.select_conversation(Some("c1"));
    let pending = engine.begin_send("c1", "hello", ContentType::Text, None);

    // The other side deletes while the REST ack is still in flight
    let deletion = PushEvent::MessageDeleted {
        conversation_id: "c1".to_string(),
        message_id: "srv-1".to_string(),
    };
    engine.apply_push(deletion.clone());
    engine.complete_send("c1", &pending.id, &canonical("srv-1", "c1", "hello"));

    let m = engine.timeline("c1").unwrap().get("srv-1").unwrap();
    assert_eq!(m.status, MessageStatus::DeletedLocally);
    assert_eq!(m.content, "message removed");

    // Replay after the id materialized is still a no-op
    engine.apply_push(deletion);
    let timeline = engine.timeline("c1").unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline.get("srv-1").unwrap().status, MessageStatus::DeletedLocally);
}

#[test]
fn deletion_before_echo_still_lands() {
    let mut engine = engine_with(&["c1"]);
    engine.select_conversation(Some("c1"));
    let pending = engine.begin_send("c1", "hello", ContentType::Text, None);

    engine.apply_push(PushEvent::MessageDeleted {
        conversation_id: "c1".to_string(),
        message_id: "srv-1".to_string(),
    });
    // Echo wins the race against the ack; the back-filled entry converges
    // to deleted either way
    engine.apply_push(push_new("c1", "srv-1", VIEWER, "hello"));
    engine.complete_send("c1", &pending.id, &canonical("srv-1", "c1", "hello"));

    assert_eq!(count_with_content(&engine, "c1", "hello"), 0);
    let timeline = engine.timeline("c1").unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline.get("srv-1").unwrap().status, MessageStatus::DeletedLocally);
}

#[test]
fn deletion_is_viewer_scoped() {
    // Two viewers of the same conversation; A deletes, B is unaffected
    let mut viewer_a = engine_with(&["c1"]);
    let mut viewer_b = SyncEngine::new("them".to_string(), SyncConfig::default());
    viewer_b.merge_conversation_page(vec![summary("c1", 100, 0)], Utc::now());

    viewer_a.select_conversation(Some("c1"));
    viewer_b.select_conversation(Some("c1"));
    viewer_a.apply_push(push_new("c1", "srv-1", "them", "shared"));
    viewer_b.apply_push(push_new("c1", "srv-1", "them", "shared"));

    viewer_a.delete_local("c1", "srv-1");

    assert_eq!(
        viewer_a.timeline("c1").unwrap().get("srv-1").unwrap().status,
        MessageStatus::DeletedLocally
    );
    assert_eq!(
        viewer_b.timeline("c1").unwrap().get("srv-1").unwrap().status,
        MessageStatus::Sent
    );
    assert_eq!(
        viewer_b.timeline("c1").unwrap().get("srv-1").unwrap().content,
        "shared"
    );
}

#[test]
fn conversation_new_creates_entry_and_counts_unread() {
    let mut engine = engine_with(&["c1"]);
    engine.apply_push(PushEvent::ConversationNew {
        summary: summary("c2", 500, 2),
    });

    assert!(engine.index().contains("c2"));
    assert_eq!(engine.unread_total(), 2);

    // Duplicate delivery changes nothing
    engine.apply_push(PushEvent::ConversationNew {
        summary: summary("c2", 500, 2),
    });
    assert_eq!(engine.index().get("c2").unwrap().unread_count, 2);
    assert_eq!(engine.unread_total(), 2);
}

#[test]
fn conversation_updated_patch_unread_is_authoritative() {
    let mut engine = engine_with(&["c1"]);
    engine.apply_push(PushEvent::ConversationUpdated {
        conversation_id: "c1".to_string(),
        patch: ConversationPatch {
            last_preview: Some("edited".to_string()),
            unread_count: Some(4),
            ..Default::default()
        },
    });

    assert_eq!(engine.index().get("c1").unwrap().last_preview, "edited");
    assert_eq!(engine.index().get("c1").unwrap().unread_count, 4);
    assert_eq!(engine.unread_total(), 4);
}

#[test]
fn conversation_deleted_push_removes_and_deselects() {
    let mut engine = engine_with(&["c1", "c2"]);
    engine.select_conversation(Some("c1"));
    engine.apply_push(push_new("c2", "srv-1", "other", "unread here"));
    assert_eq!(engine.unread_total(), 1);

    engine.apply_push(PushEvent::ConversationDeleted {
        conversation_id: "c2".to_string(),
    });
    assert!(!engine.index().contains("c2"));
    assert_eq!(engine.unread_total(), 0);

    engine.apply_push(PushEvent::ConversationDeleted {
        conversation_id: "c1".to_string(),
    });
    assert_eq!(engine.selected(), None);
}

#[tokio::test]
async fn typing_is_forwarded_only_for_open_conversation() {
    let mut engine = engine_with(&["c1", "c2"]);
    engine.select_conversation(Some("c1"));
    let mut rx = engine.subscribe();

    engine.apply_push(PushEvent::TypingIndicator {
        conversation_id: "c2".to_string(),
        is_typing: true,
    });
    engine.apply_push(PushEvent::TypingIndicator {
        conversation_id: "c1".to_string(),
        is_typing: true,
    });

    // Only the open conversation's indicator reaches observers
    let mut typing_events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SyncEvent::Typing { conversation_id, is_typing } = event {
            typing_events.push((conversation_id, is_typing));
        }
    }
    assert_eq!(typing_events, vec![("c1".to_string(), true)]);
}

// ─── Unread accounting ───────────────────────────────────────────────────

#[test]
fn unread_badge_flow_matches_scenario() {
    // C1 exists with zero unread and is not selected
    let mut engine = engine_with(&["c1"]);
    assert_eq!(engine.index().get("c1").unwrap().unread_count, 0);

    engine.apply_push(push_new("c1", "srv-1", "other", "new message"));
    assert_eq!(engine.index().get("c1").unwrap().unread_count, 1);
    assert_eq!(engine.unread_total(), 1);
    assert_eq!(engine.index().summaries()[0].id, "c1");

    // Selecting clears and the clear delta flows to the aggregate
    let selection = engine.select_conversation(Some("c1"));
    assert_eq!(selection.cleared, 1);
    assert_eq!(engine.index().get("c1").unwrap().unread_count, 0);
    assert_eq!(engine.unread_total(), 0);
}

#[test]
fn global_unread_always_equals_index_sum() {
    let mut engine = engine_with(&["c1", "c2", "c3"]);
    engine.select_conversation(Some("c1"));

    engine.apply_push(push_new("c2", "m1", "other", "a"));
    engine.apply_push(push_new("c2", "m2", "other", "b"));
    engine.apply_push(push_new("c3", "m3", "other", "c"));
    assert_eq!(engine.unread_total(), engine.index().total_unread());

    engine.select_conversation(Some("c2"));
    assert_eq!(engine.unread_total(), engine.index().total_unread());

    engine.remove_conversation("c3");
    assert_eq!(engine.unread_total(), engine.index().total_unread());
    assert_eq!(engine.unread_total(), 0);
}

#[test]
fn send_and_echo_scenario_end_to_end() {
    // Full happy-path walk-through: send, ack, echo, authoritative refetch
    let mut engine = engine_with(&["c1"]);
    engine.select_conversation(Some("c1"));

    let pending = engine.begin_send("c1", "hello", ContentType::Text, None);
    assert_eq!(engine.timeline("c1").unwrap().messages()[0].status, MessageStatus::Pending);

    engine.complete_send("c1", &pending.id, &canonical("srv-1", "c1", "hello"));
    let timeline = engine.timeline("c1").unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline.messages()[0].id, "srv-1");
    assert_eq!(timeline.messages()[0].status, MessageStatus::Sent);

    engine.apply_push(push_new("c1", "srv-1", VIEWER, "hello"));
    assert_eq!(count_with_content(&engine, "c1", "hello"), 1);

    // Fresh authoritative fetch returns exactly what we already show
    engine.replace_timeline("c1", vec![canonical("srv-1", "c1", "hello")]);
    let timeline = engine.timeline("c1").unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline.messages()[0].id, "srv-1");
    assert_eq!(timeline.messages()[0].content, "hello");
}
