/// Reconciliation engine
///
/// The one writer for the timeline stores and the conversation index.
/// Inputs are the local send lifecycle and validated push events, arriving
/// in arbitrary interleaving; every mutation is safe to apply twice, so
/// duplicate delivery after a reconnect is harmless.
use crate::config::SyncConfig;
use crate::events::{PushEvent, PushMessage};
use crate::index::{ConversationIndex, ConversationSummary};
use crate::message::{Attachment, ContentType, Message, MessageStatus};
use crate::timeline::Timeline;
use crate::unread::UnreadAggregator;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Push ids remembered for duplicate suppression before the oldest are
/// evicted. Reconnect replays arrive within moments, so a few thousand
/// recent ids is ample headroom.
const SEEN_IDS_CAP: usize = 4096;

/// State-change notifications for observers (the UI layer subscribes;
/// rendering itself is out of scope).
#[derive(Debug, Clone)]
pub enum SyncEvent {
    TimelineChanged { conversation_id: String },
    ConversationListChanged,
    UnreadChanged { total: u64 },
    Typing { conversation_id: String, is_typing: bool },
    SendFailed { conversation_id: String, temp_id: String },
}

/// What `select_conversation` tells the caller to do next.
#[derive(Debug, Clone)]
pub struct Selection {
    pub previous: Option<String>,
    /// The newly selected conversation needs an authoritative fetch.
    pub needs_fetch: bool,
    /// Unread cleared locally; forward to mark-read if nonzero.
    pub cleared: u32,
}

pub struct SyncEngine {
    viewer_id: String,
    config: SyncConfig,
    timelines: HashMap<String, Timeline>,
    index: ConversationIndex,
    unread: UnreadAggregator,
    selected: Option<String>,
    /// Message ids already consumed from the push channel. Duplicate
    /// `message:new` delivery must not double-count unread.
    seen_push_ids: SeenIds,
    /// Deletion events whose target id is not present yet — the deletion
    /// raced the send's ack or echo. Applied once the canonical id lands.
    pending_deletions: HashSet<String>,
    /// Per-conversation instant of the last local unread clear, so a stale
    /// list fetch cannot resurrect a count the user just dismissed.
    recent_clears: HashMap<String, DateTime<Utc>>,
    events_tx: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    pub fn new(viewer_id: String, config: SyncConfig) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        info!(viewer = %viewer_id, "sync engine created");
        Self {
            viewer_id,
            config,
            timelines: HashMap::new(),
            index: ConversationIndex::new(),
            unread: UnreadAggregator::new(),
            selected: None,
            seen_push_ids: SeenIds::with_capacity(SEEN_IDS_CAP),
            pending_deletions: HashSet::new(),
            recent_clears: HashMap::new(),
            events_tx,
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    pub fn index(&self) -> &ConversationIndex {
        &self.index
    }

    pub fn timeline(&self, conversation_id: &str) -> Option<&Timeline> {
        self.timelines.get(conversation_id)
    }

    pub fn unread_total(&self) -> u64 {
        self.unread.total()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    // ─── Local send lifecycle ────────────────────────────────────────────

    /// Optimistic send: append a Pending message with a temp id and bump
    /// the conversation's recency. Returns the pending message for the
    /// caller to put on the wire.
    pub fn begin_send(
        &mut self,
        conversation_id: &str,
        content: &str,
        content_type: ContentType,
        attachment: Option<Attachment>,
    ) -> Message {
        let pending = Message::pending(
            &self.config.temp_id_prefix,
            conversation_id,
            &self.viewer_id,
            content,
            content_type,
            attachment,
        );
        self.timelines
            .entry(conversation_id.to_string())
            .or_default()
            .append(pending.clone());
        self.index.touch(conversation_id, pending.created_at, content);
        self.emit(SyncEvent::TimelineChanged {
            conversation_id: conversation_id.to_string(),
        });
        self.emit(SyncEvent::ConversationListChanged);
        pending
    }

    /// REST ack arrived: swap the Pending entry for its canonical
    /// counterpart. A missing temp id (cleared view, or an echo that
    /// already claimed the slot) degrades to a logged no-op.
    pub fn complete_send(&mut self, conversation_id: &str, temp_id: &str, canonical: &Message) {
        // The canonical id is now known; a later echo carrying it must not
        // be double-applied.
        self.seen_push_ids.insert(canonical.id.clone());
        if let Some(timeline) = self.timelines.get_mut(conversation_id) {
            if timeline.replace_temp_with_canonical(temp_id, canonical) {
                self.emit(SyncEvent::TimelineChanged {
                    conversation_id: conversation_id.to_string(),
                });
            }
        }
        // A deletion may have raced this ack; it applies now that the
        // canonical id exists.
        self.apply_parked_deletion(conversation_id, &canonical.id);
    }

    /// REST send failed: flip Pending to Failed and surface a retry
    /// affordance. Retry is a fresh `begin_send`, not a mutation here.
    pub fn fail_send(&mut self, conversation_id: &str, temp_id: &str) {
        if let Some(timeline) = self.timelines.get_mut(conversation_id) {
            if timeline.mark_failed(temp_id) {
                self.emit(SyncEvent::TimelineChanged {
                    conversation_id: conversation_id.to_string(),
                });
                self.emit(SyncEvent::SendFailed {
                    conversation_id: conversation_id.to_string(),
                    temp_id: temp_id.to_string(),
                });
            }
        }
    }

    // ─── Push events ─────────────────────────────────────────────────────

    pub fn apply_push(&mut self, event: PushEvent) {
        self.apply_push_at(event, Utc::now());
    }

    /// Apply a validated push event. `now` is passed explicitly so the
    /// echo window is testable.
    pub fn apply_push_at(&mut self, event: PushEvent, now: DateTime<Utc>) {
        let conversation_id = event.conversation_id().to_string();
        if self.index.is_tombstoned(&conversation_id) {
            debug!(conversation = %conversation_id, "push ignored: conversation deleted locally");
            return;
        }
        match event {
            PushEvent::MessageNew { conversation_id, message } => {
                self.on_message_new(&conversation_id, message, now)
            }
            PushEvent::MessageDeleted { conversation_id, message_id } => {
                self.on_message_deleted(&conversation_id, &message_id)
            }
            PushEvent::TypingIndicator { conversation_id, is_typing } => {
                self.on_typing(&conversation_id, is_typing)
            }
            PushEvent::ConversationNew { summary } => self.on_conversation_new(summary),
            PushEvent::ConversationUpdated { conversation_id, patch } => {
                let unread_override = patch.unread_count;
                if !self.index.contains(&conversation_id) {
                    debug!(conversation = %conversation_id, "update ignored: not in index");
                    return;
                }
                if let Some(unread) = unread_override {
                    let delta = self.index.set_unread(&conversation_id, unread);
                    self.unread.apply_delta(delta);
                    self.emit(SyncEvent::UnreadChanged { total: self.unread.total() });
                }
                let mut patch = patch;
                patch.unread_count = None;
                self.index.apply_patch(&conversation_id, patch);
                self.emit(SyncEvent::ConversationListChanged);
            }
            PushEvent::ConversationDeleted { conversation_id } => {
                self.remove_conversation(&conversation_id)
            }
        }
    }

    fn on_message_new(&mut self, conversation_id: &str, push: PushMessage, now: DateTime<Utc>) {
        // Scope check: locally deleted or never-loaded conversations take
        // no events.
        if !self.index.contains(conversation_id) {
            debug!(conversation = %conversation_id, "message:new ignored: not in index");
            return;
        }
        // Duplicate delivery (reconnect replay) is a no-op.
        if self.seen_push_ids.contains(&push.id) {
            debug!(id = %push.id, "message:new ignored: already applied");
            return;
        }
        self.seen_push_ids.insert(push.id.clone());

        let from_self = push.sender_id == self.viewer_id;
        if from_self {
            // Echo suppression: a recent local send with the same content
            // means this event describes a message already on screen.
            let candidate = self
                .timelines
                .get_mut(conversation_id)
                .and_then(|tl| {
                    tl.find_echo_candidate(
                        &self.viewer_id,
                        &push.content,
                        now,
                        self.config.echo_window,
                    )
                    .map(|m| (m.id.clone(), m.is_temp(&self.config.temp_id_prefix)))
                });
            if let Some((local_id, local_is_temp)) = candidate {
                if local_id != push.id && local_is_temp {
                    // Echo beat the REST ack: adopt the canonical id so the
                    // ack degrades to a no-op.
                    if let Some(timeline) = self.timelines.get_mut(conversation_id) {
                        timeline.replace_temp_with_canonical(&local_id, &Message {
                            id: push.id.clone(),
                            conversation_id: conversation_id.to_string(),
                            sender_id: push.sender_id.clone(),
                            content: push.content.clone(),
                            content_type: push.content_type.clone(),
                            created_at: push.created_at,
                            status: MessageStatus::Sent,
                            attachment: push.attachment.clone(),
                            seq: 0,
                        });
                        self.emit(SyncEvent::TimelineChanged {
                            conversation_id: conversation_id.to_string(),
                        });
                    }
                }
                self.apply_parked_deletion(conversation_id, &push.id);
                debug!(id = %push.id, "echo suppressed");
                return;
            }
            // Sent from another device or tab: treat as a normal own
            // message, but never as unread.
        }

        let is_open = self.selected.as_deref() == Some(conversation_id);
        if is_open {
            let message = Message {
                id: push.id.clone(),
                conversation_id: conversation_id.to_string(),
                sender_id: push.sender_id,
                content: push.content.clone(),
                content_type: push.content_type,
                created_at: push.created_at,
                status: MessageStatus::Sent,
                attachment: push.attachment,
                seq: 0,
            };
            if self
                .timelines
                .entry(conversation_id.to_string())
                .or_default()
                .append(message)
            {
                self.emit(SyncEvent::TimelineChanged {
                    conversation_id: conversation_id.to_string(),
                });
            }
            self.apply_parked_deletion(conversation_id, &push.id);
        }

        self.index.touch(conversation_id, push.created_at, &push.content);
        if !is_open && !from_self && self.index.increment_unread(conversation_id) {
            self.unread.apply_delta(1);
            self.emit(SyncEvent::UnreadChanged { total: self.unread.total() });
        }
        self.emit(SyncEvent::ConversationListChanged);
    }

    fn on_message_deleted(&mut self, conversation_id: &str, message_id: &str) {
        if !self.index.contains(conversation_id) {
            debug!(conversation = %conversation_id, "message:deleted ignored: not in index");
            return;
        }
        // Viewer-scoped: this flips status in our own timeline only, and
        // only while the conversation is the open one.
        if self.selected.as_deref() != Some(conversation_id) {
            return;
        }
        match self.timelines.get_mut(conversation_id) {
            Some(timeline) => {
                if timeline.mark_deleted_locally(message_id) {
                    self.emit(SyncEvent::TimelineChanged {
                        conversation_id: conversation_id.to_string(),
                    });
                } else if !timeline.contains(message_id) {
                    // Deletion beat the message's ack/echo; park it until
                    // the canonical id shows up.
                    debug!(id = %message_id, "deletion parked: message not present yet");
                    self.pending_deletions.insert(message_id.to_string());
                }
            }
            None => {
                self.pending_deletions.insert(message_id.to_string());
            }
        }
    }

    /// Apply a parked deletion if its target id is now present. Keeps the
    /// deletion parked otherwise.
    fn apply_parked_deletion(&mut self, conversation_id: &str, message_id: &str) {
        if !self.pending_deletions.contains(message_id) {
            return;
        }
        if let Some(timeline) = self.timelines.get_mut(conversation_id) {
            if timeline.mark_deleted_locally(message_id) {
                self.pending_deletions.remove(message_id);
                debug!(id = %message_id, "parked deletion applied");
                self.emit(SyncEvent::TimelineChanged {
                    conversation_id: conversation_id.to_string(),
                });
            } else if timeline.contains(message_id) {
                // Already deleted; nothing left to park.
                self.pending_deletions.remove(message_id);
            }
        }
    }

    fn on_typing(&mut self, conversation_id: &str, is_typing: bool) {
        if !self.index.contains(conversation_id) {
            return;
        }
        // Typing never touches the stores; it is only surfaced for the
        // open conversation.
        if self.selected.as_deref() == Some(conversation_id) {
            self.emit(SyncEvent::Typing {
                conversation_id: conversation_id.to_string(),
                is_typing,
            });
        }
    }

    fn on_conversation_new(&mut self, summary: ConversationSummary) {
        if self.index.contains(&summary.id) {
            // Duplicate delivery: merge without disturbing local unread.
            self.index.upsert(summary, false);
        } else {
            let unread = summary.unread_count;
            self.index.upsert(summary, true);
            if unread > 0 {
                self.unread.apply_delta(unread as i64);
                self.emit(SyncEvent::UnreadChanged { total: self.unread.total() });
            }
        }
        self.emit(SyncEvent::ConversationListChanged);
    }

    // ─── Selection & local actions ───────────────────────────────────────

    /// Switch the open conversation. Clearing the old selection, zeroing
    /// unread on the new one, and reporting whether the caller needs an
    /// authoritative fetch for it.
    pub fn select_conversation(&mut self, conversation_id: Option<&str>) -> Selection {
        let previous = self.selected.take();
        let mut cleared = 0;
        let mut needs_fetch = false;
        if let Some(id) = conversation_id {
            self.selected = Some(id.to_string());
            // Recorded even when the count was already zero: an in-flight
            // list fetch must not re-badge what the viewer just opened.
            self.recent_clears.insert(id.to_string(), Utc::now());
            cleared = self.index.clear_unread(id);
            if cleared > 0 {
                self.unread.apply_delta(-(cleared as i64));
                self.emit(SyncEvent::UnreadChanged { total: self.unread.total() });
                self.emit(SyncEvent::ConversationListChanged);
            }
            needs_fetch = self
                .timelines
                .get(id)
                .map(|tl| tl.is_empty())
                .unwrap_or(true);
        }
        Selection { previous, needs_fetch, cleared }
    }

    /// Viewer-scoped local deletion; other participants are unaffected.
    pub fn delete_local(&mut self, conversation_id: &str, message_id: &str) -> bool {
        match self.timelines.get_mut(conversation_id) {
            Some(timeline) => {
                let changed = timeline.mark_deleted_locally(message_id);
                if changed {
                    self.emit(SyncEvent::TimelineChanged {
                        conversation_id: conversation_id.to_string(),
                    });
                }
                changed
            }
            None => false,
        }
    }

    /// Local-only conversation removal: tombstone the index entry, drop
    /// the timeline, clear the selection if it pointed here. Subsequent
    /// push events for this conversation fail the scope check.
    pub fn remove_conversation(&mut self, conversation_id: &str) {
        let unread = self.index.remove(conversation_id);
        self.timelines.remove(conversation_id);
        if self.selected.as_deref() == Some(conversation_id) {
            self.selected = None;
        }
        if unread > 0 {
            self.unread.apply_delta(-(unread as i64));
            self.emit(SyncEvent::UnreadChanged { total: self.unread.total() });
        }
        self.emit(SyncEvent::ConversationListChanged);
    }

    // ─── Resync application ──────────────────────────────────────────────

    /// Merge a fetched conversation-list page. Unread counts from the
    /// fetch are authoritative, with two exceptions: a conversation the
    /// viewer cleared within the grace window (the response was already in
    /// flight), and the open conversation, whose unread is zero for as
    /// long as it stays open regardless of what the server reports.
    pub fn merge_conversation_page(&mut self, page: Vec<ConversationSummary>, now: DateTime<Utc>) {
        self.recent_clears.retain(|_, at| {
            now.signed_duration_since(*at)
                .to_std()
                .map(|age| age < self.config.clear_grace)
                .unwrap_or(true)
        });
        for summary in page {
            let keep_local = self.selected.as_deref() == Some(summary.id.as_str())
                || self.recent_clears.contains_key(&summary.id);
            self.index.upsert(summary, !keep_local);
        }
        let drifted = self.unread.recompute_from(&self.index);
        if drifted {
            self.emit(SyncEvent::UnreadChanged { total: self.unread.total() });
        }
        self.emit(SyncEvent::ConversationListChanged);
    }

    /// Authoritative timeline replacement from a message fetch. Unacked
    /// Pending sends survive on top. The caller is responsible for the
    /// stale-response guard.
    pub fn replace_timeline(&mut self, conversation_id: &str, messages: Vec<Message>) {
        for message in &messages {
            self.seen_push_ids.insert(message.id.clone());
        }
        self.timelines
            .entry(conversation_id.to_string())
            .or_default()
            .replace_all(messages);
        let parked: Vec<String> = self.pending_deletions.iter().cloned().collect();
        for message_id in parked {
            self.apply_parked_deletion(conversation_id, &message_id);
        }
        self.emit(SyncEvent::TimelineChanged {
            conversation_id: conversation_id.to_string(),
        });
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine (headless tests)
        let _ = self.events_tx.send(event);
    }
}

/// Insertion-ordered id set with a fixed capacity; once full, the oldest
/// ids fall off. Keeps duplicate suppression bounded for sessions that
/// stay open all day.
struct SeenIds {
    set: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl SeenIds {
    fn with_capacity(cap: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            cap,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    fn insert(&mut self, id: String) {
        if !self.set.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
    }
}
