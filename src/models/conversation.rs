use serde::{ Serialize, Deserialize };

/// Longest preview text kept on a stored conversation before truncation.
const PREVIEW_MAX_CHARS: usize = 100;

/// A single chat message, oldest-to-newest ordering is carried by the
/// surrounding `Vec`, never by the timestamp text.
///
/// `timestamp` is whatever the platform rendered (relative or absolute time)
/// or a synthetic `msg_NNNN` fallback; it is opaque and never parsed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default)]
    pub is_sent: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    pub fn received(text: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self { is_sent: false, message: text.into(), timestamp: timestamp.into() }
    }

    pub fn sent(text: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self { is_sent: true, message: text.into(), timestamp: timestamp.into() }
    }

    /// Synthetic timestamp used when the platform rendered none.
    pub fn fallback_timestamp(index: usize) -> String {
        format!("msg_{:04}", index)
    }
}

/// On-disk conversation record, one JSON file per conversation.
///
/// `sender_name` is the conversation's only identity and is matched
/// case-insensitively everywhere; two distinct contacts sharing a display
/// name collapse into one record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoredConversation {
    pub sender_name: String,
    #[serde(default)]
    pub is_unread: bool,
    #[serde(default)]
    pub conversation_preview: String,
    #[serde(default)]
    pub total_messages: usize,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub fetch_time: String,
    #[serde(default)]
    pub last_received_message: String,
}

impl StoredConversation {
    /// Build a record from a raw message list, deriving the preview fields.
    pub fn from_messages(
        sender_name: impl Into<String>,
        is_unread: bool,
        messages: Vec<Message>,
        fetch_time: impl Into<String>
    ) -> Self {
        let last_received = last_received_text(&messages);
        Self {
            sender_name: sender_name.into(),
            is_unread,
            conversation_preview: truncate_preview(&last_received),
            total_messages: messages.len(),
            messages,
            fetch_time: fetch_time.into(),
            last_received_message: last_received,
        }
    }

    /// Re-derive `conversation_preview`, `last_received_message` and
    /// `total_messages` after the message list was mutated.
    pub fn refresh_derived(&mut self) {
        self.last_received_message = last_received_text(&self.messages);
        self.conversation_preview = truncate_preview(&self.last_received_message);
        self.total_messages = self.messages.len();
    }
}

/// The HTTP-facing conversation shape. `index` reflects the deterministic
/// load order assigned by the store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiConversation {
    pub sender_name: String,
    #[serde(default)]
    pub is_unread: bool,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub all_messages: Vec<Message>,
    #[serde(default)]
    pub fetch_time: String,
    #[serde(default)]
    pub last_received_message: String,
    #[serde(default)]
    pub index: usize,
}

impl ApiConversation {
    pub fn from_stored(stored: StoredConversation, index: usize) -> Self {
        Self {
            sender_name: stored.sender_name,
            is_unread: stored.is_unread,
            message_count: stored.total_messages,
            all_messages: stored.messages,
            fetch_time: stored.fetch_time,
            last_received_message: stored.last_received_message,
            index,
        }
    }

    /// Convert back to the on-disk schema, re-deriving preview fields.
    pub fn to_stored(&self) -> StoredConversation {
        StoredConversation::from_messages(
            self.sender_name.clone(),
            self.is_unread,
            self.all_messages.clone(),
            self.fetch_time.clone()
        )
    }

    pub fn matches_sender(&self, sender_name: &str) -> bool {
        self.sender_name.eq_ignore_ascii_case(sender_name)
    }
}

/// Full text of the last received (non-sent) message, or empty.
pub fn last_received_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| !m.is_sent)
        .map(|m| m.message.clone())
        .unwrap_or_default()
}

/// Truncate to the preview budget, appending an ellipsis when cut.
pub fn truncate_preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_MAX_CHARS {
        let cut: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_derives_from_last_received() {
        let messages = vec![
            Message::received("hello", "10:00"),
            Message::sent("hi there", "10:01"),
            Message::received("are you free tomorrow?", "10:02"),
            Message::sent("yes", "10:03"),
        ];
        let conv = StoredConversation::from_messages("Alice", false, messages, "2024-01-01T00:00:00");
        assert_eq!(conv.last_received_message, "are you free tomorrow?");
        assert_eq!(conv.conversation_preview, "are you free tomorrow?");
        assert_eq!(conv.total_messages, 4);
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "x".repeat(150);
        let conv = StoredConversation::from_messages(
            "Alice",
            false,
            vec![Message::received(long.clone(), "t")],
            ""
        );
        assert_eq!(conv.conversation_preview.chars().count(), 103);
        assert!(conv.conversation_preview.ends_with("..."));
        assert_eq!(conv.last_received_message, long);
    }

    #[test]
    fn sent_only_conversation_has_empty_preview() {
        let conv = StoredConversation::from_messages(
            "Bob",
            false,
            vec![Message::sent("ping", "t")],
            ""
        );
        assert_eq!(conv.conversation_preview, "");
        assert_eq!(conv.last_received_message, "");
    }

    #[test]
    fn api_round_trip_keeps_messages() {
        let stored = StoredConversation::from_messages(
            "Alice",
            true,
            vec![Message::received("hey", "t1"), Message::sent("hey back", "t2")],
            "2024-01-01T00:00:00"
        );
        let api = ApiConversation::from_stored(stored.clone(), 3);
        assert_eq!(api.index, 3);
        assert_eq!(api.message_count, 2);
        assert_eq!(api.to_stored(), stored);
    }
}
