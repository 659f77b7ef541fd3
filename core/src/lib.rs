/// ChatSync - Real-time Conversation Synchronization Engine
///
/// Keeps per-conversation message timelines and a cross-conversation
/// unread index consistent under optimistic sends, REST acknowledgements,
/// push-channel echoes, and reconnect resync.

pub mod error;
pub mod config;
pub mod message;
pub mod events;
pub mod timeline;
pub mod index;
pub mod unread;
pub mod transport;
pub mod engine;
pub mod resync;
pub mod session;

pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncEvent};
pub use error::{Result, SyncError};
pub use session::SyncSession;
