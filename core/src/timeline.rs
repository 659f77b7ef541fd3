/// Per-conversation timeline store
///
/// Ordered message list with merge/dedup logic. The one hard guarantee:
/// no operation ever leaves two entries for the same logical send — a temp
/// id and its canonical id never coexist.
use crate::message::{Message, MessageStatus, DELETED_PLACEHOLDER};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{debug, warn};

pub struct Timeline {
    messages: Vec<Message>,
    next_seq: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_seq: 1,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Insert maintaining chronological order. Idempotent: a message whose
    /// id is already present is a no-op. Returns whether anything changed.
    pub fn append(&mut self, mut message: Message) -> bool {
        if self.contains(&message.id) {
            debug!(id = %message.id, "append skipped: id already present");
            return false;
        }
        message.seq = self.next_seq;
        self.next_seq += 1;
        let pos = self
            .messages
            .partition_point(|m| m.timeline_cmp(&message) != std::cmp::Ordering::Greater);
        self.messages.insert(pos, message);
        true
    }

    /// Swap a Pending entry for its acknowledged counterpart, in place.
    /// The slot keeps its position (local `created_at` and `seq`); identity
    /// and status come from the server. Logs and returns false if the temp
    /// id is gone — the ack may race a user-initiated clear, or an echo may
    /// already have claimed the slot.
    pub fn replace_temp_with_canonical(&mut self, temp_id: &str, canonical: &Message) -> bool {
        if self.contains(&canonical.id) {
            // Echo landed first and back-filled the canonical id; drop the
            // temp entry if it somehow still exists.
            if let Some(pos) = self.messages.iter().position(|m| m.id == temp_id) {
                self.messages.remove(pos);
            }
            debug!(id = %canonical.id, "ack is a no-op: canonical id already present");
            return false;
        }
        match self.messages.iter_mut().find(|m| m.id == temp_id) {
            Some(entry) if entry.status != MessageStatus::Pending => {
                debug!(temp_id = %temp_id, "replace skipped: entry no longer pending");
                false
            }
            Some(entry) => {
                entry.id = canonical.id.clone();
                entry.status = MessageStatus::Sent;
                entry.content = canonical.content.clone();
                entry.content_type = canonical.content_type.clone();
                entry.attachment = canonical.attachment.clone();
                true
            }
            None => {
                warn!(temp_id = %temp_id, "replace skipped: temp id no longer present");
                false
            }
        }
    }

    /// Flip a message to locally deleted. Content becomes a placeholder;
    /// `created_at` and position are preserved for stable ordering.
    /// Idempotent.
    pub fn mark_deleted_locally(&mut self, id: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(entry) => {
                if entry.status == MessageStatus::DeletedLocally {
                    return false;
                }
                entry.status = MessageStatus::DeletedLocally;
                entry.content = DELETED_PLACEHOLDER.to_string();
                entry.attachment = None;
                true
            }
            None => false,
        }
    }

    /// Flip a Pending send to Failed. The entry stays visible; retry is a
    /// fresh send cycle, not a mutation of this entry.
    pub fn mark_failed(&mut self, temp_id: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id == temp_id) {
            Some(entry) if entry.status == MessageStatus::Pending => {
                entry.status = MessageStatus::Failed;
                true
            }
            Some(_) => false,
            None => {
                warn!(temp_id = %temp_id, "mark_failed skipped: temp id no longer present");
                false
            }
        }
    }

    /// Authoritative replace after a resync fetch. The fetched page becomes
    /// the timeline in server order; Pending messages still awaiting their
    /// ack are re-appended on top so in-flight sends are not lost.
    pub fn replace_all(&mut self, authoritative: Vec<Message>) {
        let pending: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| m.status == MessageStatus::Pending)
            .collect();
        self.next_seq = 1;
        for mut message in authoritative {
            if self.contains(&message.id) {
                continue;
            }
            message.seq = self.next_seq;
            self.next_seq += 1;
            self.messages.push(message);
        }
        for message in pending {
            self.append(message);
        }
    }

    /// Find a recent own message matching an incoming self-authored push
    /// (echo detection). Matches Pending or Sent entries with identical
    /// content created within `window` of `now`.
    pub fn find_echo_candidate(
        &mut self,
        sender_id: &str,
        content: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Option<&mut Message> {
        let window = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::seconds(10));
        self.messages.iter_mut().rev().find(|m| {
            m.sender_id == sender_id
                && m.content == content
                && matches!(m.status, MessageStatus::Pending | MessageStatus::Sent)
                && now.signed_duration_since(m.created_at) <= window
        })
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}
