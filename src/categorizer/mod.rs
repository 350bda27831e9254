use crate::history::{ ProcessedLog, ProcessedMessage };
use crate::models::conversation::ApiConversation;
use chrono::Local;
use log::info;
use serde::{ Serialize, Deserialize };
use std::error::Error;
use std::fs;
use std::path::Path;

const UNCATEGORIZED: &str = "uncategorized";

/// One canned-reply template. Keywords are matched as case-insensitive
/// substrings in table order; first hit wins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseTemplate {
    pub status: String,
    pub keywords: Vec<String>,
    pub response: String,
}

/// Outcome of categorizing one message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Categorization {
    pub category: String,
    pub template: Option<String>,
    pub matched_keyword: Option<String>,
}

/// Keyword-driven categorizer over an immutable template table, loaded once
/// at startup.
pub struct MessageCategorizer {
    templates: Vec<ResponseTemplate>,
}

impl MessageCategorizer {
    pub fn from_templates(templates: Vec<ResponseTemplate>) -> Self {
        Self { templates }
    }

    /// Load the template table from a JSON array of
    /// `{status, keywords, response}` objects.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let path = path.as_ref();
        let raw = fs
            ::read_to_string(path)
            .map_err(|e| format!("Failed to read template file {}: {}", path.display(), e))?;
        let templates: Vec<ResponseTemplate> = serde_json
            ::from_str(&raw)
            .map_err(|e| format!("Failed to parse templates from {}: {}", path.display(), e))?;
        info!("Loaded {} response templates", templates.len());
        Ok(Self::from_templates(templates))
    }

    pub fn templates(&self) -> &[ResponseTemplate] {
        &self.templates
    }

    /// First template (in table order) with any keyword appearing as a
    /// case-insensitive substring of the message.
    ///
    /// Substring matching is the template table's established contract and
    /// a known false-positive source ("no" matches inside "know"); word
    /// boundaries are deliberately not applied.
    pub fn categorize(&self, message_text: &str) -> Categorization {
        let lowered = message_text.to_lowercase();
        for template in &self.templates {
            for keyword in &template.keywords {
                if lowered.contains(&keyword.to_lowercase()) {
                    return Categorization {
                        category: template.status.clone(),
                        template: Some(template.response.clone()),
                        matched_keyword: Some(keyword.clone()),
                    };
                }
            }
        }
        Categorization {
            category: UNCATEGORIZED.to_string(),
            template: None,
            matched_keyword: None,
        }
    }

    /// Fill placeholder tokens. `[Nome HR]` is the legacy spelling of the
    /// HR-name placeholder; anything unmatched stays verbatim.
    pub fn personalize(template: &str, first_name: &str, hr_name: &str) -> String {
        let mut personalized = template.to_string();
        if !first_name.is_empty() {
            personalized = personalized.replace("[firstname]", first_name);
        }
        if !hr_name.is_empty() {
            personalized = personalized.replace("[hrname]", hr_name);
            personalized = personalized.replace("[Nome HR]", hr_name);
        }
        personalized
    }

    /// First whitespace-delimited token of a full name, or empty.
    pub fn extract_first_name(full_name: &str) -> String {
        full_name.split_whitespace().next().unwrap_or_default().to_string()
    }

    /// Categorize every received, non-empty message across `conversations`,
    /// skipping exact `(sender, text)` repeats via the processed log.
    /// Pure pass: recording into the log is the caller's decision, so a
    /// preview run never blocks a later real one.
    pub fn process_conversations(
        &self,
        log: &ProcessedLog,
        conversations: &[ApiConversation],
        hr_name: &str
    ) -> Vec<ProcessedMessage> {
        let mut results = Vec::new();
        for conv in conversations {
            for message in &conv.all_messages {
                if message.is_sent || message.message.trim().is_empty() {
                    continue;
                }
                if log.is_processed(&conv.sender_name, &message.message) {
                    continue;
                }
                let categorization = self.categorize(&message.message);
                let first_name = Self::extract_first_name(&conv.sender_name);
                let personalized = categorization.template
                    .as_deref()
                    .map(|t| Self::personalize(t, &first_name, hr_name));
                let timestamp = if message.timestamp.is_empty() {
                    Local::now().to_rfc3339()
                } else {
                    message.timestamp.clone()
                };
                results.push(ProcessedMessage {
                    timestamp,
                    sender_name: conv.sender_name.clone(),
                    original_message: message.message.clone(),
                    category: categorization.category,
                    matched_keyword: categorization.matched_keyword,
                    response_template: categorization.template,
                    personalized_response: personalized,
                    response_sent: false,
                });
            }
        }
        results
    }
}
