use super::{ ConversationPreview, ConversationProvider, ProviderError, ResponseDispatcher };
use crate::models::conversation::Message;
use async_trait::async_trait;
use chrono::Local;
use log::info;
use serde::{ Serialize, Deserialize };
use std::fs::{ self, OpenOptions };
use std::io::Write;
use std::path::PathBuf;

/// One conversation in the replay feed file.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct FeedConversation {
    sender_name: String,
    #[serde(default)]
    is_unread: bool,
    #[serde(default)]
    messages: Vec<Message>,
}

/// File-backed provider that replays a prepared JSON feed.
///
/// Stands in for the real browser-scraping adapter, which lives outside
/// this crate. The feed is a JSON array of conversations with messages
/// oldest to newest; edits to the file show up on the next call, so it
/// also works as a hand-driven integration harness.
pub struct ReplayProvider {
    feed_path: PathBuf,
}

impl ReplayProvider {
    pub fn new(feed_path: impl Into<PathBuf>) -> Self {
        Self { feed_path: feed_path.into() }
    }

    fn read_feed(&self) -> Result<Vec<FeedConversation>, ProviderError> {
        let raw = fs
            ::read_to_string(&self.feed_path)
            .map_err(|e| {
                ProviderError::Unavailable(
                    format!("cannot read feed file {}: {}", self.feed_path.display(), e)
                )
            })?;
        serde_json
            ::from_str(&raw)
            .map_err(|e| {
                ProviderError::Unavailable(
                    format!("feed file {} is not valid JSON: {}", self.feed_path.display(), e)
                )
            })
    }
}

#[async_trait]
impl ConversationProvider for ReplayProvider {
    async fn connect(&self) -> Result<(), ProviderError> {
        self.read_feed()?;
        Ok(())
    }

    async fn list_conversations(
        &self,
        limit: usize
    ) -> Result<Vec<ConversationPreview>, ProviderError> {
        let feed = self.read_feed()?;
        Ok(
            feed
                .into_iter()
                .take(limit)
                .map(|c| ConversationPreview {
                    sender_name: c.sender_name,
                    is_unread: c.is_unread,
                })
                .collect()
        )
    }

    async fn list_unread(&self, limit: usize) -> Result<Vec<ConversationPreview>, ProviderError> {
        let feed = self.read_feed()?;
        Ok(
            feed
                .into_iter()
                .filter(|c| c.is_unread)
                .take(limit)
                .map(|c| ConversationPreview {
                    sender_name: c.sender_name,
                    is_unread: c.is_unread,
                })
                .collect()
        )
    }

    async fn fetch_messages(
        &self,
        preview: &ConversationPreview
    ) -> Result<Vec<Message>, ProviderError> {
        let feed = self.read_feed()?;
        feed
            .into_iter()
            .find(|c| c.sender_name.eq_ignore_ascii_case(&preview.sender_name))
            .map(|c| c.messages)
            .ok_or_else(|| ProviderError::Extraction {
                sender: preview.sender_name.clone(),
                reason: "conversation missing from feed".to_string(),
            })
    }
}

#[derive(Serialize)]
struct OutboxRecord<'a> {
    sender_name: &'a str,
    message: &'a str,
    sent_at: String,
}

/// Dispatcher that appends outgoing replies to a JSONL outbox file instead
/// of driving a real messaging surface.
pub struct OutboxDispatcher {
    path: PathBuf,
}

impl OutboxDispatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResponseDispatcher for OutboxDispatcher {
    async fn send(&self, sender_name: &str, text: &str) -> Result<bool, ProviderError> {
        if let Some(parent) = self.path.parent() {
            fs
                ::create_dir_all(parent)
                .map_err(|e| ProviderError::Unavailable(format!("cannot create outbox dir: {}", e)))?;
        }
        let record = OutboxRecord {
            sender_name,
            message: text,
            sent_at: Local::now().to_rfc3339(),
        };
        let line = serde_json
            ::to_string(&record)
            .map_err(|e| ProviderError::Unavailable(format!("cannot encode outbox record: {}", e)))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                ProviderError::Unavailable(
                    format!("cannot open outbox {}: {}", self.path.display(), e)
                )
            })?;
        writeln!(file, "{}", line).map_err(|e| {
            ProviderError::Unavailable(format!("cannot write outbox: {}", e))
        })?;
        info!("Outbox: queued reply to {}", sender_name);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_feed(dir: &TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("feed.json");
        fs::write(&path, json).unwrap();
        path
    }

    #[tokio::test]
    async fn lists_and_fetches_from_feed() {
        let tmp = TempDir::new().unwrap();
        let path = write_feed(
            &tmp,
            r#"[
                {"sender_name": "Alice", "is_unread": true,
                 "messages": [{"is_sent": false, "message": "hi", "timestamp": "10:00"}]},
                {"sender_name": "Bob", "is_unread": false, "messages": []}
            ]"#
        );
        let provider = ReplayProvider::new(&path);
        provider.connect().await.unwrap();

        let all = provider.list_conversations(10).await.unwrap();
        assert_eq!(all.len(), 2);
        let unread = provider.list_unread(10).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].sender_name, "Alice");

        let messages = provider.fetch_messages(&unread[0]).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "hi");
    }

    #[tokio::test]
    async fn missing_feed_is_unavailable() {
        let provider = ReplayProvider::new("/nonexistent/feed.json");
        let err = provider.connect().await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unknown_sender_is_extraction_error() {
        let tmp = TempDir::new().unwrap();
        let path = write_feed(&tmp, "[]");
        let provider = ReplayProvider::new(&path);
        let preview = ConversationPreview {
            sender_name: "Ghost".to_string(),
            is_unread: false,
        };
        let err = provider.fetch_messages(&preview).await.unwrap_err();
        assert!(matches!(err, ProviderError::Extraction { .. }));
    }

    #[tokio::test]
    async fn outbox_appends_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("outbox.jsonl");
        let dispatcher = OutboxDispatcher::new(&path);
        assert!(dispatcher.send("Alice", "hello").await.unwrap());
        assert!(dispatcher.send("Bob", "hi").await.unwrap());
        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }
}
