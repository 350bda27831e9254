use log::{ info, warn };
use serde::{ Serialize, Deserialize };
use std::collections::HashSet;
use std::error::Error;
use std::fs::{ self, OpenOptions };
use std::io::Write;
use std::path::PathBuf;

/// One categorization outcome, appended to the history file and returned
/// to callers of the processing pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessedMessage {
    pub timestamp: String,
    pub sender_name: String,
    pub original_message: String,
    pub category: String,
    pub matched_keyword: Option<String>,
    pub response_template: Option<String>,
    pub personalized_response: Option<String>,
    pub response_sent: bool,
}

/// Append-only log of processed messages, keyed by the exact
/// `(sender_name, message text)` pair.
///
/// Dedup is at-least-once: two genuinely distinct messages with identical
/// text from the same sender are indistinguishable, and the second is
/// always skipped.
pub struct ProcessedLog {
    path: PathBuf,
    seen: HashSet<(String, String)>,
}

impl ProcessedLog {
    /// Open the log, replaying existing JSONL records into the dedup set.
    /// Unparseable lines are logged and skipped.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut seen = HashSet::new();
        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            for (lineno, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ProcessedMessage>(line) {
                    Ok(record) => {
                        seen.insert((record.sender_name, record.original_message));
                    }
                    Err(e) => {
                        warn!("Skipping bad history line {}: {}", lineno + 1, e);
                    }
                }
            }
            info!("Loaded {} processed message record(s) from history", seen.len());
        }
        Ok(Self { path, seen })
    }

    pub fn is_processed(&self, sender_name: &str, message_text: &str) -> bool {
        self.seen.contains(&(sender_name.to_string(), message_text.to_string()))
    }

    /// Append a record and remember its key.
    pub fn record(&mut self, entry: &ProcessedMessage) -> Result<(), Box<dyn Error + Send + Sync>> {
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        self.seen.insert((entry.sender_name.clone(), entry.original_message.clone()));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(sender: &str, text: &str) -> ProcessedMessage {
        ProcessedMessage {
            timestamp: "t".to_string(),
            sender_name: sender.to_string(),
            original_message: text.to_string(),
            category: "interested".to_string(),
            matched_keyword: Some("yes".to_string()),
            response_template: None,
            personalized_response: None,
            response_sent: false,
        }
    }

    #[test]
    fn record_then_is_processed() {
        let tmp = TempDir::new().unwrap();
        let mut log = ProcessedLog::open(tmp.path().join("history.jsonl")).unwrap();
        assert!(!log.is_processed("Alice", "hello"));
        log.record(&entry("Alice", "hello")).unwrap();
        assert!(log.is_processed("Alice", "hello"));
        // exact-match keying: sender case and text both matter
        assert!(!log.is_processed("alice", "hello"));
        assert!(!log.is_processed("Alice", "hello!"));
    }

    #[test]
    fn log_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.jsonl");
        {
            let mut log = ProcessedLog::open(&path).unwrap();
            log.record(&entry("Alice", "hello")).unwrap();
        }
        let log = ProcessedLog::open(&path).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log.is_processed("Alice", "hello"));
    }

    #[test]
    fn bad_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.jsonl");
        {
            let mut log = ProcessedLog::open(&path).unwrap();
            log.record(&entry("Alice", "hello")).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "not json at all").unwrap();
        }
        let log = ProcessedLog::open(&path).unwrap();
        assert_eq!(log.len(), 1);
    }
}
