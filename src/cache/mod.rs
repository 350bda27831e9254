use crate::models::conversation::ApiConversation;
use log::info;
use std::time::{ Duration, Instant };

/// Time-bounded in-memory snapshot of the conversation store.
///
/// The cache holds an independent copy of the store's view; it may drift
/// between syncs. Callers that mutate the snapshot and want the TTL window
/// extended must call `touch` themselves.
pub struct ConversationCache {
    data: Option<Vec<ApiConversation>>,
    last_fetched: Option<Instant>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self { data: None, last_fetched: None }
    }

    /// Cached snapshot iff data is present and younger than `ttl`;
    /// `None` signals stale.
    pub fn get(&self, ttl: Duration) -> Option<Vec<ApiConversation>> {
        let data = self.data.as_ref()?;
        let fetched = self.last_fetched?;
        if fetched.elapsed() < ttl {
            Some(data.clone())
        } else {
            None
        }
    }

    /// Snapshot regardless of age. Used where the reference behavior reads
    /// the cache without a TTL check (incremental merge seed, fallbacks).
    pub fn peek(&self) -> Option<Vec<ApiConversation>> {
        self.data.clone()
    }

    /// Replace the snapshot and its fetch timestamp in one assignment.
    pub fn put(&mut self, data: Vec<ApiConversation>) {
        info!("Cache updated with {} conversation(s)", data.len());
        self.data = Some(data);
        self.last_fetched = Some(Instant::now());
    }

    /// Bump the fetch timestamp without replacing data.
    pub fn touch(&mut self) {
        self.last_fetched = Some(Instant::now());
    }

    /// Case-insensitive replace-or-append of a single conversation.
    /// Does not alter the fetch timestamp.
    pub fn update_one(&mut self, conversation: ApiConversation) {
        match self.data.as_mut() {
            Some(data) => {
                if let Some(slot) = data
                    .iter_mut()
                    .find(|c| c.matches_sender(&conversation.sender_name))
                {
                    *slot = conversation;
                } else {
                    data.push(conversation);
                }
            }
            None => {
                self.data = Some(vec![conversation]);
            }
        }
    }

    /// Clear the unread flag on a cached conversation, if present.
    pub fn mark_read(&mut self, sender_name: &str) -> bool {
        if let Some(data) = self.data.as_mut() {
            if let Some(conv) = data.iter_mut().find(|c| c.matches_sender(sender_name)) {
                conv.is_unread = false;
                return true;
            }
        }
        false
    }

    #[cfg(test)]
    fn backdate(&mut self, age: Duration) {
        self.last_fetched = Instant::now().checked_sub(age);
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Unread-only view with a deliberate leniency: when filtering leaves
/// nothing, the full snapshot is returned instead so a momentarily stale
/// unread flag never renders the UI empty.
pub fn filter_unread(conversations: &[ApiConversation]) -> Vec<ApiConversation> {
    let unread: Vec<ApiConversation> = conversations
        .iter()
        .filter(|c| c.is_unread)
        .cloned()
        .collect();
    if unread.is_empty() {
        conversations.to_vec()
    } else {
        unread
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversation::{ Message, StoredConversation };

    fn conv(name: &str, unread: bool) -> ApiConversation {
        let stored = StoredConversation::from_messages(
            name,
            unread,
            vec![Message::received("hi", "t")],
            "2024-01-01T00:00:00"
        );
        ApiConversation::from_stored(stored, 0)
    }

    #[test]
    fn get_fresh_after_put() {
        let mut cache = ConversationCache::new();
        cache.put(vec![conv("Alice", false)]);
        let hit = cache.get(Duration::from_secs(10)).unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].sender_name, "Alice");
    }

    #[test]
    fn get_stale_after_ttl() {
        let mut cache = ConversationCache::new();
        cache.put(vec![conv("Alice", false)]);
        cache.backdate(Duration::from_secs(11));
        assert!(cache.get(Duration::from_secs(10)).is_none());
        // peek still serves the stale copy for fallback paths
        assert!(cache.peek().is_some());
    }

    #[test]
    fn empty_cache_is_stale() {
        let cache = ConversationCache::new();
        assert!(cache.get(Duration::from_secs(10)).is_none());
    }

    #[test]
    fn update_one_replaces_case_insensitively() {
        let mut cache = ConversationCache::new();
        cache.put(vec![conv("Alice", false), conv("Bob", false)]);
        let mut replacement = conv("alice", true);
        replacement.all_messages.push(Message::received("more", "t2"));
        replacement.message_count = 2;
        cache.update_one(replacement);

        let data = cache.peek().unwrap();
        assert_eq!(data.len(), 2);
        let alice = data.iter().find(|c| c.matches_sender("ALICE")).unwrap();
        assert_eq!(alice.message_count, 2);
        assert!(alice.is_unread);
    }

    #[test]
    fn update_one_appends_unknown_sender() {
        let mut cache = ConversationCache::new();
        cache.put(vec![conv("Alice", false)]);
        cache.update_one(conv("Carol", true));
        assert_eq!(cache.peek().unwrap().len(), 2);
    }

    #[test]
    fn update_one_seeds_empty_cache() {
        let mut cache = ConversationCache::new();
        cache.update_one(conv("Alice", false));
        assert_eq!(cache.peek().unwrap().len(), 1);
    }

    #[test]
    fn unread_filter_falls_back_to_full_snapshot() {
        let all_read = vec![conv("Alice", false), conv("Bob", false)];
        let filtered = filter_unread(&all_read);
        assert_eq!(filtered.len(), 2);

        let mixed = vec![conv("Alice", true), conv("Bob", false)];
        let filtered = filter_unread(&mixed);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].sender_name, "Alice");
    }

    #[test]
    fn mark_read_clears_flag() {
        let mut cache = ConversationCache::new();
        cache.put(vec![conv("Alice", true)]);
        assert!(cache.mark_read("ALICE"));
        assert!(!cache.peek().unwrap()[0].is_unread);
        assert!(!cache.mark_read("Nobody"));
    }
}
