/// Conversation index — summaries sorted by recency, unread counts, tombstones
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// The other party in a conversation (list-view identity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Summary of one conversation thread (for the list view).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub other_participant: Participant,
    pub last_preview: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
    /// Opaque booking/subject reference, passed through untouched.
    #[serde(default)]
    pub booking_ref: Option<String>,
}

/// Partial update shape for `conversation:updated` pushes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationPatch {
    pub other_participant: Option<Participant>,
    pub last_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Present means the server explicitly sent a count; absent keeps local.
    pub unread_count: Option<u32>,
    pub booking_ref: Option<String>,
}

/// Ordered set of conversation summaries, newest activity first.
///
/// Locally deleted conversations leave a tombstone for the life of the
/// session: pushes and fetch upserts for a tombstoned id are refused, so a
/// deletion cannot be undone by a stale list page.
pub struct ConversationIndex {
    entries: Vec<ConversationSummary>,
    tombstones: HashSet<String>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            tombstones: HashSet::new(),
        }
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.entries.iter().any(|c| c.id == conversation_id)
    }

    pub fn is_tombstoned(&self, conversation_id: &str) -> bool {
        self.tombstones.contains(conversation_id)
    }

    pub fn get(&self, conversation_id: &str) -> Option<&ConversationSummary> {
        self.entries.iter().find(|c| c.id == conversation_id)
    }

    /// Snapshot in display order (descending by last activity).
    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_unread(&self) -> u64 {
        self.entries.iter().map(|c| c.unread_count as u64).sum()
    }

    /// Insert or merge a summary. On merge the local `unread_count` is
    /// preserved unless `override_unread` is set — a stale list fetch must
    /// not clobber counts the engine just adjusted.
    pub fn upsert(&mut self, summary: ConversationSummary, override_unread: bool) {
        if self.tombstones.contains(&summary.id) {
            debug!(conversation = %summary.id, "upsert refused: tombstoned");
            return;
        }
        match self.entries.iter_mut().find(|c| c.id == summary.id) {
            Some(existing) => {
                let local_unread = existing.unread_count;
                *existing = summary;
                if !override_unread {
                    existing.unread_count = local_unread;
                }
            }
            None => self.entries.push(summary),
        }
        self.sort();
    }

    /// Apply a partial update; absent fields keep their local values.
    /// An `unread_count` present in the patch is authoritative.
    pub fn apply_patch(&mut self, conversation_id: &str, patch: ConversationPatch) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|c| c.id == conversation_id) else {
            return false;
        };
        if let Some(p) = patch.other_participant {
            entry.other_participant = p;
        }
        if let Some(preview) = patch.last_preview {
            entry.last_preview = preview;
        }
        if let Some(at) = patch.last_message_at {
            entry.last_message_at = at;
        }
        if let Some(unread) = patch.unread_count {
            entry.unread_count = unread;
        }
        if let Some(booking) = patch.booking_ref {
            entry.booking_ref = Some(booking);
        }
        self.sort();
        true
    }

    /// Update recency fields for new activity and re-sort. The touched
    /// conversation surfaces to index 0 unless an even newer entry exists.
    pub fn touch(
        &mut self,
        conversation_id: &str,
        last_message_at: DateTime<Utc>,
        preview: &str,
    ) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|c| c.id == conversation_id) else {
            return false;
        };
        // Out-of-order history pages must not move the conversation
        if last_message_at >= entry.last_message_at {
            entry.last_message_at = last_message_at;
            entry.last_preview = preview.to_string();
            self.sort();
        }
        true
    }

    /// Append an older page of summaries without re-sorting the visible
    /// order (the caller is paginating history, not reporting activity).
    pub fn extend_page(&mut self, page: Vec<ConversationSummary>) {
        for summary in page {
            if self.tombstones.contains(&summary.id) || self.contains(&summary.id) {
                continue;
            }
            self.entries.push(summary);
        }
    }

    pub fn increment_unread(&mut self, conversation_id: &str) -> bool {
        match self.entries.iter_mut().find(|c| c.id == conversation_id) {
            Some(entry) => {
                entry.unread_count = entry.unread_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Zero the unread count, returning the delta so the caller can adjust
    /// the global aggregate without a full recompute.
    pub fn clear_unread(&mut self, conversation_id: &str) -> u32 {
        match self.entries.iter_mut().find(|c| c.id == conversation_id) {
            Some(entry) => std::mem::take(&mut entry.unread_count),
            None => 0,
        }
    }

    /// Set the unread count outright (authoritative server value),
    /// returning the signed delta against the previous local value.
    pub fn set_unread(&mut self, conversation_id: &str, unread: u32) -> i64 {
        match self.entries.iter_mut().find(|c| c.id == conversation_id) {
            Some(entry) => {
                let delta = unread as i64 - entry.unread_count as i64;
                entry.unread_count = unread;
                delta
            }
            None => 0,
        }
    }

    /// Local-only removal. Leaves a tombstone; returns the removed entry's
    /// unread count so the aggregate can be adjusted.
    pub fn remove(&mut self, conversation_id: &str) -> u32 {
        self.tombstones.insert(conversation_id.to_string());
        match self.entries.iter().position(|c| c.id == conversation_id) {
            Some(pos) => self.entries.remove(pos).unread_count,
            None => 0,
        }
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    }
}

impl Default for ConversationIndex {
    fn default() -> Self {
        Self::new()
    }
}
