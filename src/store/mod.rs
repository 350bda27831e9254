use crate::models::conversation::{ ApiConversation, StoredConversation };
use log::{ info, warn, error };
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{ Path, PathBuf };

const ORDER_FILE: &str = "_order.json";
const FALLBACK_SLUG: &str = "Unknown_Contact";

#[derive(Debug)]
pub enum StoreError {
    DirectoryCreate(PathBuf, std::io::Error),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DirectoryCreate(dir, e) => {
                write!(f, "Could not create conversations directory '{}': {}", dir.display(), e)
            }
            StoreError::IoError(e) => write!(f, "Conversation file IO error: {}", e),
            StoreError::JsonError(e) => write!(f, "Conversation JSON error: {}", e),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::DirectoryCreate(_, e) => Some(e),
            StoreError::IoError(e) => Some(e),
            StoreError::JsonError(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::JsonError(err)
    }
}

/// Filesystem-safe slug for a sender display name. Unsafe path characters
/// and whitespace runs become single underscores; the result never starts
/// or ends with one. Idempotent under re-application.
pub fn safe_slug(sender_name: &str) -> String {
    let trimmed = sender_name.trim();
    if trimmed.is_empty() {
        return FALLBACK_SLUG.to_string();
    }
    let mut slug = String::with_capacity(trimmed.len());
    let mut prev_underscore = false;
    for c in trimmed.chars() {
        let unsafe_char = matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*');
        if unsafe_char || c.is_whitespace() || c == '_' {
            if !prev_underscore {
                slug.push('_');
            }
            prev_underscore = true;
        } else {
            slug.push(c);
            prev_underscore = false;
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// Durable per-conversation file store. One pretty-printed JSON file per
/// conversation plus an `_order.json` index recording the processing order
/// of the most recent full sync.
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    /// Open the store, creating its directory. A directory that cannot be
    /// created is a hard error: the store cannot function without it.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::DirectoryCreate(dir.clone(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for a sender's record. Matching is case-insensitive: when a file
    /// whose slug differs only by case already exists, that file is reused so
    /// "alice" and "Alice" always resolve to the same record.
    pub fn path_for(&self, sender_name: &str) -> PathBuf {
        let slug = safe_slug(sender_name);
        let wanted = format!("{}.json", slug);
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                if let Ok(name) = entry.file_name().into_string() {
                    if name != ORDER_FILE && name.eq_ignore_ascii_case(&wanted) {
                        return self.dir.join(name);
                    }
                }
            }
        }
        self.dir.join(wanted)
    }

    /// Write one conversation to its file, overwriting any previous record.
    ///
    /// Returns `Ok(false)` without touching the file when the new record has
    /// zero messages but a file already exists: a failed scrape must not
    /// erase prior data.
    pub fn save(&self, conversation: &StoredConversation) -> Result<bool, StoreError> {
        let path = self.path_for(&conversation.sender_name);
        if conversation.messages.is_empty() && path.exists() {
            warn!(
                "No messages extracted for {}, preserving existing file contents",
                conversation.sender_name
            );
            return Ok(false);
        }
        let json = serde_json::to_string_pretty(conversation)?;
        fs::write(&path, json)?;
        Ok(true)
    }

    /// Read the single record for a sender, if one exists.
    pub fn load_one(&self, sender_name: &str) -> Result<Option<StoredConversation>, StoreError> {
        let path = self.path_for(sender_name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Persist the ordered list of sender names processed by the most
    /// recent full sync.
    pub fn save_order(&self, names: &[String]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(names)?;
        fs::write(self.dir.join(ORDER_FILE), json)?;
        Ok(())
    }

    fn load_order(&self) -> Option<Vec<String>> {
        let path = self.dir.join(ORDER_FILE);
        if !path.exists() {
            return None;
        }
        match fs::read_to_string(&path).map_err(StoreError::from).and_then(|raw| {
            serde_json::from_str::<Vec<String>>(&raw).map_err(StoreError::from)
        }) {
            Ok(order) => Some(order),
            Err(e) => {
                warn!("Could not read {}: {}", ORDER_FILE, e);
                None
            }
        }
    }

    /// Load every conversation in the directory as API conversations with a
    /// deterministic order and a zero-based `index`.
    ///
    /// The order index is applied by prefix match: for each persisted name,
    /// the first file whose stem starts with that name's slug comes next;
    /// files the index does not mention follow in directory-listing order.
    /// Without an index, filenames sort lexicographically. A single corrupt
    /// file is logged and skipped, never aborting the load.
    pub fn load_all(&self) -> Vec<ApiConversation> {
        if !self.dir.exists() {
            warn!("Conversations directory {} not found", self.dir.display());
            return Vec::new();
        }
        let mut files: Vec<String> = match fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| name.ends_with(".json") && name != ORDER_FILE)
                .collect(),
            Err(e) => {
                error!("Could not list {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let ordered_files = match self.load_order() {
            Some(order) => {
                let mut ordered: Vec<String> = Vec::with_capacity(files.len());
                for name in &order {
                    let slug = safe_slug(name);
                    if let Some(pos) = files
                        .iter()
                        .position(|f| f.trim_end_matches(".json").starts_with(&slug))
                    {
                        ordered.push(files.remove(pos));
                    }
                }
                // Anything not covered by the index trails in listing order.
                ordered.extend(files);
                ordered
            }
            None => {
                files.sort();
                files
            }
        };

        let mut conversations = Vec::with_capacity(ordered_files.len());
        for filename in ordered_files {
            let path = self.dir.join(&filename);
            let stored: StoredConversation = match fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            {
                Ok(stored) => stored,
                Err(e) => {
                    error!("Error loading {}: {}", filename, e);
                    continue;
                }
            };
            let index = conversations.len();
            conversations.push(ApiConversation::from_stored(stored, index));
        }
        info!("Loaded {} conversations from individual files", conversations.len());
        conversations
    }

    /// Rewrite a record with its unread flag cleared. Returns `Ok(false)`
    /// when no file exists for the sender.
    pub fn mark_read(&self, sender_name: &str) -> Result<bool, StoreError> {
        match self.load_one(sender_name)? {
            Some(mut stored) => {
                stored.is_unread = false;
                let json = serde_json::to_string_pretty(&stored)?;
                fs::write(self.path_for(sender_name), json)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversation::Message;
    use tempfile::TempDir;

    fn conversation(name: &str, texts: &[&str]) -> StoredConversation {
        let messages = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Message::received(*t, Message::fallback_timestamp(i)))
            .collect();
        StoredConversation::from_messages(name, false, messages, "2024-01-01T00:00:00")
    }

    #[test]
    fn slug_edge_cases() {
        assert_eq!(safe_slug(""), "Unknown_Contact");
        assert_eq!(safe_slug("   "), "Unknown_Contact");
        assert_eq!(safe_slug("A/B:C"), "A_B_C");
        assert_eq!(safe_slug("  John   Smith  "), "John_Smith");
        assert_eq!(safe_slug("___"), "Unknown_Contact");
    }

    #[test]
    fn slug_is_idempotent() {
        for name in ["A/B:C", "John  Smith", "trailing_ ", "a<b>c"] {
            let once = safe_slug(name);
            assert_eq!(safe_slug(&once), once);
        }
    }

    #[test]
    fn save_then_load_all_round_trips_with_index() {
        let tmp = TempDir::new().unwrap();
        let store = ConversationStore::new(tmp.path()).unwrap();
        let conv = conversation("Alice", &["hello", "how are you"]);
        assert!(store.save(&conv).unwrap());

        let loaded = store.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].index, 0);
        assert_eq!(loaded[0].sender_name, "Alice");
        assert_eq!(loaded[0].message_count, 2);
        assert_eq!(loaded[0].all_messages, conv.messages);
        assert_eq!(loaded[0].to_stored(), conv);
    }

    #[test]
    fn empty_save_preserves_existing_file() {
        let tmp = TempDir::new().unwrap();
        let store = ConversationStore::new(tmp.path()).unwrap();
        let full = conversation("Alice", &["one", "two", "three"]);
        assert!(store.save(&full).unwrap());

        let empty = conversation("Alice", &[]);
        assert!(!store.save(&empty).unwrap());

        let kept = store.load_one("Alice").unwrap().unwrap();
        assert_eq!(kept.total_messages, 3);
    }

    #[test]
    fn empty_save_writes_when_no_file_exists() {
        let tmp = TempDir::new().unwrap();
        let store = ConversationStore::new(tmp.path()).unwrap();
        assert!(store.save(&conversation("Fresh", &[])).unwrap());
        assert!(store.load_one("Fresh").unwrap().is_some());
    }

    #[test]
    fn order_index_controls_load_order() {
        let tmp = TempDir::new().unwrap();
        let store = ConversationStore::new(tmp.path()).unwrap();
        store.save(&conversation("Bob Smith", &["hi"])).unwrap();
        store.save(&conversation("Alice", &["hey"])).unwrap();
        store.save_order(&["Alice".to_string(), "Bob Smith".to_string()]).unwrap();

        let loaded = store.load_all();
        let names: Vec<&str> = loaded.iter().map(|c| c.sender_name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob Smith"]);
        assert_eq!(loaded[0].index, 0);
        assert_eq!(loaded[1].index, 1);
    }

    #[test]
    fn files_missing_from_order_are_appended() {
        let tmp = TempDir::new().unwrap();
        let store = ConversationStore::new(tmp.path()).unwrap();
        store.save(&conversation("Alice", &["a"])).unwrap();
        store.save(&conversation("Bob", &["b"])).unwrap();
        store.save(&conversation("Carol", &["c"])).unwrap();
        store.save_order(&["Carol".to_string()]).unwrap();

        let loaded = store.load_all();
        assert_eq!(loaded[0].sender_name, "Carol");
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn missing_order_file_sorts_lexicographically() {
        let tmp = TempDir::new().unwrap();
        let store = ConversationStore::new(tmp.path()).unwrap();
        store.save(&conversation("Zoe", &["z"])).unwrap();
        store.save(&conversation("Alice", &["a"])).unwrap();

        let names: Vec<String> = store
            .load_all()
            .into_iter()
            .map(|c| c.sender_name)
            .collect();
        assert_eq!(names, vec!["Alice".to_string(), "Zoe".to_string()]);
    }

    #[test]
    fn corrupt_file_is_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let store = ConversationStore::new(tmp.path()).unwrap();
        store.save(&conversation("Alice", &["ok"])).unwrap();
        std::fs::write(tmp.path().join("Broken.json"), "{ not json").unwrap();

        let loaded = store.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].sender_name, "Alice");
    }

    #[test]
    fn mark_read_rewrites_flag() {
        let tmp = TempDir::new().unwrap();
        let store = ConversationStore::new(tmp.path()).unwrap();
        let mut conv = conversation("Alice", &["hello"]);
        conv.is_unread = true;
        store.save(&conv).unwrap();

        assert!(store.mark_read("alice").unwrap());
        assert!(!store.load_one("Alice").unwrap().unwrap().is_unread);
        assert!(!store.mark_read("Nobody").unwrap());
    }
}
