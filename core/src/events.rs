/// Push-channel event model
///
/// Everything arriving on the push channel is validated here, at the
/// boundary, before the reconciliation engine sees it: the engine only ever
/// handles well-formed tagged events, never loose JSON.
use crate::error::{Result, SyncError};
use crate::index::{ConversationPatch, ConversationSummary};
use crate::message::{Attachment, ContentType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire shape of a message carried by `message:new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

/// Events received from the push channel. Wire tags keep the server's
/// `scope:action` naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushEvent {
    #[serde(rename = "message:new")]
    MessageNew {
        conversation_id: String,
        message: PushMessage,
    },
    #[serde(rename = "message:deleted")]
    MessageDeleted {
        conversation_id: String,
        message_id: String,
    },
    #[serde(rename = "typing:indicator")]
    TypingIndicator {
        conversation_id: String,
        is_typing: bool,
    },
    #[serde(rename = "conversation:new")]
    ConversationNew {
        summary: ConversationSummary,
    },
    #[serde(rename = "conversation:updated")]
    ConversationUpdated {
        conversation_id: String,
        patch: ConversationPatch,
    },
    #[serde(rename = "conversation:deleted")]
    ConversationDeleted {
        conversation_id: String,
    },
}

impl PushEvent {
    /// Validate a raw payload into a typed event. Unknown tags, missing
    /// required fields, and empty ids are all `MalformedEvent` — the
    /// caller drops and logs them, never crashes.
    pub fn parse(raw: serde_json::Value) -> Result<Self> {
        let event: PushEvent = serde_json::from_value(raw)
            .map_err(|e| SyncError::MalformedEvent(e.to_string()))?;
        if event.conversation_id().is_empty() {
            return Err(SyncError::MalformedEvent(
                "empty conversation_id".to_string(),
            ));
        }
        match &event {
            PushEvent::MessageNew { message, .. } if message.id.is_empty() => Err(
                SyncError::MalformedEvent("message:new with empty message id".to_string()),
            ),
            PushEvent::MessageDeleted { message_id, .. } if message_id.is_empty() => Err(
                SyncError::MalformedEvent("message:deleted with empty message id".to_string()),
            ),
            _ => Ok(event),
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            PushEvent::MessageNew { conversation_id, .. }
            | PushEvent::MessageDeleted { conversation_id, .. }
            | PushEvent::TypingIndicator { conversation_id, .. }
            | PushEvent::ConversationUpdated { conversation_id, .. }
            | PushEvent::ConversationDeleted { conversation_id } => conversation_id,
            PushEvent::ConversationNew { summary } => &summary.id,
        }
    }
}

/// Events the client emits to scope server-side push delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "conversation:join")]
    ConversationJoin { conversation_id: String },
    #[serde(rename = "conversation:leave")]
    ConversationLeave { conversation_id: String },
}
