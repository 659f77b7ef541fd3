/// Session wiring
///
/// One `SyncSession` per logged-in viewer: it owns the engine, the
/// transport handles, and every background task. Constructed on login,
/// torn down on logout via the cancellation token — no ambient singletons
/// survive it.
use crate::config::SyncConfig;
use crate::engine::{Selection, SyncEngine, SyncEvent};
use crate::error::{Result, SyncError};
use crate::events::{ClientEvent, PushEvent};
use crate::message::{Attachment, ContentType};
use crate::resync::ResyncController;
use crate::transport::{ConnectionStatus, DeleteOutcome, MessagingApi, PushOutbound, PushSignal};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct SyncSession {
    engine: Arc<RwLock<SyncEngine>>,
    api: Arc<dyn MessagingApi>,
    push_out: Arc<dyn PushOutbound>,
    resync: Arc<ResyncController>,
    config: SyncConfig,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncSession {
    pub fn new(
        viewer_id: &str,
        config: SyncConfig,
        api: Arc<dyn MessagingApi>,
        push_out: Arc<dyn PushOutbound>,
    ) -> Self {
        let engine = Arc::new(RwLock::new(SyncEngine::new(
            viewer_id.to_string(),
            config.clone(),
        )));
        let resync = Arc::new(ResyncController::new(engine.clone(), api.clone()));
        Self {
            engine,
            api,
            push_out,
            resync,
            config,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn engine(&self) -> Arc<RwLock<SyncEngine>> {
        self.engine.clone()
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.read().await.subscribe()
    }

    /// Spawn the background tasks: the push-signal loop and the periodic
    /// unread re-verification. Also runs the initial conversation fetch.
    pub async fn start(&mut self, push_rx: mpsc::Receiver<PushSignal>) {
        info!("sync session starting");
        if let Err(e) = self.resync.resync_conversations().await {
            warn!("initial conversation fetch failed: {}", e);
        }

        let push_task = {
            let engine = self.engine.clone();
            let resync = self.resync.clone();
            let push_out = self.push_out.clone();
            let config = self.config.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                run_push_loop(engine, resync, push_out, config, push_rx, cancel).await;
            })
        };

        let verify_task = {
            let resync = self.resync.clone();
            let period = self.config.unread_verify_interval;
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                run_unread_verify(resync, period, cancel).await;
            })
        };

        self.tasks.push(push_task);
        self.tasks.push(verify_task);
    }

    /// Tear down on logout: cancel every task and wait for them.
    pub async fn shutdown(mut self) {
        info!("sync session shutting down");
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }

    // ─── User actions ────────────────────────────────────────────────────

    /// Optimistic send: the Pending message appears immediately; the REST
    /// outcome flips it to Sent or Failed. Never returns an error — a
    /// failed send is a visible state, not an exception.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        content_type: ContentType,
        attachment: Option<Attachment>,
    ) {
        let pending = self.engine.write().await.begin_send(
            conversation_id,
            content,
            content_type.clone(),
            attachment.clone(),
        );
        match self
            .api
            .send_message(conversation_id, content, content_type, attachment)
            .await
        {
            Ok(canonical) => {
                self.engine
                    .write()
                    .await
                    .complete_send(conversation_id, &pending.id, &canonical);
            }
            Err(e) => {
                warn!(conversation = %conversation_id, "send failed: {}", e);
                self.engine
                    .write()
                    .await
                    .fail_send(conversation_id, &pending.id);
            }
        }
    }

    /// Open (or close, with `None`) a conversation: clear its unread,
    /// re-scope push delivery, best-effort mark-as-read, and fetch the
    /// timeline if we have nothing local for it.
    pub async fn select_conversation(&self, conversation_id: Option<&str>) {
        let selection: Selection = self
            .engine
            .write()
            .await
            .select_conversation(conversation_id);
        self.resync.bump_epoch();

        if let Some(previous) = &selection.previous {
            if let Err(e) = self
                .push_out
                .emit(ClientEvent::ConversationLeave {
                    conversation_id: previous.clone(),
                })
                .await
            {
                debug!("conversation:leave emit failed: {}", e);
            }
        }
        let Some(conversation_id) = conversation_id else {
            return;
        };
        if let Err(e) = self
            .push_out
            .emit(ClientEvent::ConversationJoin {
                conversation_id: conversation_id.to_string(),
            })
            .await
        {
            debug!("conversation:join emit failed: {}", e);
        }

        // Mark-as-read is best-effort; a missing endpoint must not surface.
        match self.api.mark_read(conversation_id).await {
            Ok(()) => {}
            Err(SyncError::EndpointUnavailable(_)) => {
                debug!("mark_read endpoint unavailable, skipping");
            }
            Err(e) => debug!("mark_read failed: {}", e),
        }

        if selection.needs_fetch {
            match self.resync.resync_timeline(conversation_id).await {
                Ok(()) => {}
                Err(SyncError::StaleContext(_)) => {
                    debug!(conversation = %conversation_id, "timeline fetch superseded");
                }
                Err(e) => warn!(conversation = %conversation_id, "timeline fetch failed: {}", e),
            }
        }
    }

    /// Delete a message from this viewer's own timeline. The local flip
    /// happens first; "already deleted" from the server is a non-event.
    pub async fn delete_message(&self, conversation_id: &str, message_id: &str) {
        self.engine
            .write()
            .await
            .delete_local(conversation_id, message_id);
        match self.api.delete_message(message_id).await {
            Ok(DeleteOutcome::Deleted) | Ok(DeleteOutcome::AlreadyDeleted) => {}
            Err(e) => warn!(message = %message_id, "delete call failed: {}", e),
        }
    }

    pub async fn remove_conversation(&self, conversation_id: &str) {
        self.engine
            .write()
            .await
            .remove_conversation(conversation_id);
    }

    pub async fn send_typing(&self, conversation_id: &str, is_typing: bool) {
        if let Err(e) = self.api.send_typing(conversation_id, is_typing).await {
            debug!("typing call failed: {}", e);
        }
    }

    /// Force a full resync (also runs automatically on reconnect).
    pub async fn resync(&self) -> Result<()> {
        self.resync.full_resync().await
    }
}

// ─── Background tasks ────────────────────────────────────────────────────

async fn run_push_loop(
    engine: Arc<RwLock<SyncEngine>>,
    resync: Arc<ResyncController>,
    push_out: Arc<dyn PushOutbound>,
    config: SyncConfig,
    mut push_rx: mpsc::Receiver<PushSignal>,
    cancel: CancellationToken,
) {
    let mut was_disconnected = false;
    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => break,
            signal = push_rx.recv() => match signal {
                Some(s) => s,
                None => {
                    debug!("push channel closed");
                    break;
                }
            },
        };
        match signal {
            PushSignal::Event(raw) => match PushEvent::parse(raw) {
                Ok(event) => engine.write().await.apply_push(event),
                Err(e) => warn!("push event dropped: {}", e),
            },
            PushSignal::Status(ConnectionStatus::Disconnected) => {
                // Masked from the UI; the transport reconnects on its own.
                info!("push channel disconnected");
                was_disconnected = true;
            }
            PushSignal::Status(ConnectionStatus::Connected) => {
                if was_disconnected {
                    info!("push channel reconnected, resyncing");
                    was_disconnected = false;
                    let selected = engine.read().await.selected().map(|s| s.to_string());
                    if let Some(conversation_id) = selected {
                        if let Err(e) = push_out
                            .emit(ClientEvent::ConversationJoin { conversation_id })
                            .await
                        {
                            debug!("conversation:join emit failed: {}", e);
                        }
                    }
                    resync_with_backoff(&resync, &config, &cancel).await;
                }
            }
        }
    }
}

/// Retry the post-reconnect resync with capped exponential backoff and
/// jitter until it lands or the session is torn down.
async fn resync_with_backoff(
    resync: &Arc<ResyncController>,
    config: &SyncConfig,
    cancel: &CancellationToken,
) {
    let mut delay = config.reconnect_base;
    loop {
        match resync.full_resync().await {
            Ok(()) => return,
            Err(e) => warn!("resync failed, retrying in {:?}: {}", delay, e),
        }
        let jitter = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
        let wait = delay + Duration::from_millis(jitter);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(wait) => {}
        }
        delay = (delay * 2).min(config.reconnect_cap);
    }
}

/// Periodic drift correction: refetch the conversation list and let the
/// merge recompute the global unread count, regardless of push health.
async fn run_unread_verify(
    resync: Arc<ResyncController>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The immediate first tick duplicates the startup fetch
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = resync.resync_conversations().await {
                    warn!("unread verification fetch failed: {}", e);
                }
            }
        }
    }
}
