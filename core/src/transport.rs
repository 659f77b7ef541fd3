/// External collaborator seams
///
/// The REST client and the push channel are out of scope; only the calls
/// and events they expose are modeled, as traits the session is handed on
/// construction. Tests and the sim binary supply in-memory implementations.
use crate::error::Result;
use crate::events::ClientEvent;
use crate::index::ConversationSummary;
use crate::message::{Attachment, ContentType, Message};
use async_trait::async_trait;

/// Outcome of a delete call; "already deleted" is non-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyDeleted,
}

/// Push-channel connection state, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// REST-like calls the engine consumes. Pages are 1-based; message pages
/// are ordered oldest to newest.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn list_conversations(&self, page: u32, limit: u32) -> Result<Vec<ConversationSummary>>;

    async fn list_messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Message>>;

    /// Returns the canonical message (server id, server timestamp).
    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        content_type: ContentType,
        attachment: Option<Attachment>,
    ) -> Result<Message>;

    async fn delete_message(&self, message_id: &str) -> Result<DeleteOutcome>;

    /// Best-effort; may legitimately return `EndpointUnavailable`.
    async fn mark_read(&self, conversation_id: &str) -> Result<()>;

    async fn send_typing(&self, conversation_id: &str, is_typing: bool) -> Result<()>;
}

/// Client-to-server push emissions (join/leave scoping).
#[async_trait]
pub trait PushOutbound: Send + Sync {
    async fn emit(&self, event: ClientEvent) -> Result<()>;
}

/// What the push transport delivers to the session: raw event payloads
/// (validated at the session boundary) interleaved with connection-state
/// changes. Reconnection itself is the transport's job; the session only
/// reacts to the status transitions.
#[derive(Debug, Clone)]
pub enum PushSignal {
    Event(serde_json::Value),
    Status(ConnectionStatus),
}
