mod replay;

pub use replay::{ OutboxDispatcher, ReplayProvider };

use crate::cli::Args;
use crate::models::conversation::Message;
use async_trait::async_trait;
use log::info;
use serde::{ Serialize, Deserialize };
use std::error::Error;
use std::sync::Arc;
use thiserror::Error as ThisError;

/// Errors at the provider boundary.
///
/// `Unavailable` is fatal to the operation in progress; read paths fall
/// back to cached or stored data. `Extraction` is per-conversation and is
/// logged and skipped, never fatal.
#[derive(Debug, ThisError)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("extraction failed for '{sender}': {reason}")]
    Extraction {
        sender: String,
        reason: String,
    },
}

/// Lightweight listing entry: what the provider knows about a conversation
/// before it is opened.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationPreview {
    pub sender_name: String,
    #[serde(default)]
    pub is_unread: bool,
}

/// Source of conversation previews and full message lists. Implementations
/// wrap an unreliable external surface; results may be partial.
#[async_trait]
pub trait ConversationProvider: Send + Sync {
    /// Reach the conversation list. Failure here aborts the operation.
    async fn connect(&self) -> Result<(), ProviderError>;

    /// Conversation previews, most recent first, up to `limit`.
    async fn list_conversations(
        &self,
        limit: usize
    ) -> Result<Vec<ConversationPreview>, ProviderError>;

    /// Cheap provider-side filter: only conversations currently reported
    /// as new or unread.
    async fn list_unread(&self, limit: usize) -> Result<Vec<ConversationPreview>, ProviderError>;

    /// Full message list for one conversation, oldest to newest.
    async fn fetch_messages(
        &self,
        preview: &ConversationPreview
    ) -> Result<Vec<Message>, ProviderError>;
}

/// Sends a reply into a conversation. Fire-and-forget from the core's
/// perspective: a boolean outcome, or an error on transport failure.
#[async_trait]
pub trait ResponseDispatcher: Send + Sync {
    async fn send(&self, sender_name: &str, text: &str) -> Result<bool, ProviderError>;
}

pub fn create_provider(
    args: &Args
) -> Result<Arc<dyn ConversationProvider>, Box<dyn Error + Send + Sync>> {
    match args.provider_type.to_lowercase().as_str() {
        "replay" => {
            info!("Conversation provider: replay feed at {}", args.feed_path);
            Ok(Arc::new(ReplayProvider::new(&args.feed_path)))
        }
        other =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported provider type: {}", other)
                    )
                )
            ),
    }
}

pub fn create_dispatcher(
    args: &Args
) -> Result<Arc<dyn ResponseDispatcher>, Box<dyn Error + Send + Sync>> {
    match args.dispatcher_type.to_lowercase().as_str() {
        "outbox" => {
            info!("Response dispatcher: outbox at {}", args.outbox_path);
            Ok(Arc::new(OutboxDispatcher::new(&args.outbox_path)))
        }
        other =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported dispatcher type: {}", other)
                    )
                )
            ),
    }
}
