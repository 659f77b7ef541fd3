/// Resync controller — authoritative refetch after reconnect or staleness
///
/// Every timeline fetch is tagged with the selection epoch active at
/// request time. If the user moves on before the response lands, the
/// response is discarded for the timeline (`StaleContext`) instead of
/// clobbering whatever conversation is open now. Conversation-list
/// responses are always safe to merge.
use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::transport::MessagingApi;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct ResyncController {
    engine: Arc<RwLock<SyncEngine>>,
    api: Arc<dyn MessagingApi>,
    /// Bumped on every selection change; a timeline response from an older
    /// epoch is stale by definition.
    epoch: AtomicU64,
}

impl ResyncController {
    pub fn new(engine: Arc<RwLock<SyncEngine>>, api: Arc<dyn MessagingApi>) -> Self {
        Self {
            engine,
            api,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Refresh the conversation index from page 1 and re-verify the global
    /// unread count against it.
    pub async fn resync_conversations(&self) -> Result<()> {
        let limit = self.engine.read().await.config().page_limit;
        let page = self.api.list_conversations(1, limit).await?;
        self.engine
            .write()
            .await
            .merge_conversation_page(page, Utc::now());
        Ok(())
    }

    /// Authoritatively refetch one conversation's messages. The response
    /// only lands if this conversation is still the selected one and no
    /// selection change happened while the request was in flight.
    pub async fn resync_timeline(&self, conversation_id: &str) -> Result<()> {
        let requested_epoch = self.current_epoch();
        let limit = self.engine.read().await.config().page_limit;
        let messages = self.api.list_messages(conversation_id, 1, limit).await?;

        let mut engine = self.engine.write().await;
        if self.current_epoch() != requested_epoch
            || engine.selected() != Some(conversation_id)
        {
            debug!(conversation = %conversation_id, "timeline fetch discarded: selection changed");
            return Err(SyncError::StaleContext(conversation_id.to_string()));
        }
        engine.replace_timeline(conversation_id, messages);
        Ok(())
    }

    /// Full resync: conversation list, then the open conversation's
    /// timeline. Run on every push-channel (re)connect — buffered events
    /// are never trusted over a fresh fetch.
    pub async fn full_resync(&self) -> Result<()> {
        info!("running full resync");
        self.resync_conversations().await?;
        let selected = self
            .engine
            .read()
            .await
            .selected()
            .map(|s| s.to_string());
        if let Some(conversation_id) = selected {
            match self.resync_timeline(&conversation_id).await {
                Ok(()) | Err(SyncError::StaleContext(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
