/// Scripted simulation of the sync engine against an in-memory server
///
/// Drives one viewer session through the interesting interleavings:
/// optimistic send + echo, an unread bump from the other side, a local
/// deletion, and a disconnect/reconnect resync. Watch with
/// `RUST_LOG=debug cargo run --bin sim`.
use async_trait::async_trait;
use chatsync_core::config::SyncConfig;
use chatsync_core::error::{Result, SyncError};
use chatsync_core::events::ClientEvent;
use chatsync_core::index::{ConversationSummary, Participant};
use chatsync_core::message::{Attachment, ContentType, Message, MessageStatus};
use chatsync_core::session::SyncSession;
use chatsync_core::transport::{
    ConnectionStatus, DeleteOutcome, MessagingApi, PushOutbound, PushSignal,
};
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

const VIEWER: &str = "viewer-1";
const TUTOR: &str = "tutor-9";

struct SimServer {
    conversations: Mutex<Vec<ConversationSummary>>,
    messages: Mutex<Vec<Message>>,
    next_id: AtomicU64,
}

impl SimServer {
    fn new() -> Self {
        let participant = Participant {
            id: TUTOR.to_string(),
            display_name: "Tutor Nine".to_string(),
            online: true,
            avatar_url: None,
        };
        Self {
            conversations: Mutex::new(vec![ConversationSummary {
                id: "c1".to_string(),
                other_participant: participant,
                last_preview: "see you tomorrow".to_string(),
                last_message_at: Utc::now(),
                unread_count: 0,
                booking_ref: Some("booking-42".to_string()),
            }]),
            messages: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl MessagingApi for SimServer {
    async fn list_conversations(&self, _page: u32, _limit: u32) -> Result<Vec<ConversationSummary>> {
        Ok(self.conversations.lock().await.clone())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        _page: u32,
        _limit: u32,
    ) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .lock()
            .await
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        content_type: ContentType,
        attachment: Option<Attachment>,
    ) -> Result<Message> {
        let canonical = Message {
            id: format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            conversation_id: conversation_id.to_string(),
            sender_id: VIEWER.to_string(),
            content: content.to_string(),
            content_type,
            created_at: Utc::now(),
            status: MessageStatus::Sent,
            attachment,
            seq: 0,
        };
        self.messages.lock().await.push(canonical.clone());
        Ok(canonical)
    }

    async fn delete_message(&self, _message_id: &str) -> Result<DeleteOutcome> {
        Ok(DeleteOutcome::Deleted)
    }

    async fn mark_read(&self, _conversation_id: &str) -> Result<()> {
        Err(SyncError::EndpointUnavailable("mark_read".to_string()))
    }

    async fn send_typing(&self, _conversation_id: &str, _is_typing: bool) -> Result<()> {
        Ok(())
    }
}

struct LoggingPush;

#[async_trait]
impl PushOutbound for LoggingPush {
    async fn emit(&self, event: ClientEvent) -> Result<()> {
        info!("push out: {:?}", event);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = Arc::new(SimServer::new());
    let push = Arc::new(LoggingPush);
    let (push_tx, push_rx) = mpsc::channel(64);

    let mut session = SyncSession::new(VIEWER, SyncConfig::default(), server.clone(), push);
    session.start(push_rx).await;
    let engine = session.engine();

    // Open the seeded conversation and send optimistically
    session.select_conversation(Some("c1")).await;
    session
        .send_message("c1", "hello there", ContentType::Text, None)
        .await;

    // The push channel echoes our own send; the engine must not duplicate it
    push_tx
        .send(PushSignal::Event(json!({
            "type": "message:new",
            "conversation_id": "c1",
            "message": {
                "id": "srv-1",
                "sender_id": VIEWER,
                "content": "hello there",
                "content_type": "text",
                "created_at": Utc::now().to_rfc3339(),
            }
        })))
        .await?;

    // Incoming message in an unopened conversation bumps the badge
    push_tx
        .send(PushSignal::Event(json!({
            "type": "conversation:new",
            "summary": {
                "id": "c2",
                "other_participant": { "id": "tutor-3", "display_name": "Tutor Three" },
                "last_preview": "are you free at 5?",
                "last_message_at": Utc::now().to_rfc3339(),
                "unread_count": 1,
            }
        })))
        .await?;

    // Malformed payload: dropped and logged, never fatal
    push_tx
        .send(PushSignal::Event(json!({ "type": "message:deleted", "message_id": "x" })))
        .await?;

    // Network blip; the transport reconnects and the session resyncs
    push_tx.send(PushSignal::Status(ConnectionStatus::Disconnected)).await?;
    push_tx.send(PushSignal::Status(ConnectionStatus::Connected)).await?;

    tokio::time::sleep(Duration::from_millis(300)).await;

    {
        let engine = engine.read().await;
        let timeline = engine.timeline("c1").expect("timeline exists");
        info!("c1 timeline: {} message(s)", timeline.len());
        for m in timeline.messages() {
            info!("  [{}] {:?} {}", m.id, m.status, m.content);
        }
        info!("global unread: {}", engine.unread_total());
        for c in engine.index().summaries() {
            info!(
                "  {} ({} unread) — {}",
                c.id, c.unread_count, c.last_preview
            );
        }
    }

    session.shutdown().await;
    Ok(())
}
