use crate::cache::{ filter_unread, ConversationCache };
use crate::categorizer::{ Categorization, MessageCategorizer, ResponseTemplate };
use crate::cli::Args;
use crate::history::{ ProcessedLog, ProcessedMessage };
use crate::models::conversation::{ ApiConversation, Message, StoredConversation };
use crate::provider::{
    create_dispatcher,
    create_provider,
    ConversationProvider,
    ProviderError,
    ResponseDispatcher,
};
use crate::store::{ ConversationStore, StoreError };
use crate::sync::{ IncrementalOutcome, SyncEngine, SyncError, SyncProgressSnapshot };

use chrono::Local;
use log::{ info, warn };
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How deep into the provider listing a single-conversation lookup searches.
const SINGLE_LOOKUP_LIMIT: usize = 1000;

/// Conversation list plus where it came from, for the read endpoint.
pub struct MessagesView {
    pub conversations: Vec<ApiConversation>,
    pub cached: bool,
    pub source: &'static str,
}

#[derive(Serialize)]
pub struct AutoRespondOutcome {
    pub processed: Vec<ProcessedMessage>,
    pub sent_count: usize,
    pub dry_run: bool,
}

/// Composition root: owns the store, cache, sync engine, categorizer and the
/// provider/dispatcher pair, and exposes the operations the HTTP layer maps
/// onto routes.
pub struct ResponderAgent {
    store: Arc<ConversationStore>,
    cache: Arc<Mutex<ConversationCache>>,
    sync: Arc<SyncEngine>,
    categorizer: MessageCategorizer,
    history: Mutex<ProcessedLog>,
    provider: Arc<dyn ConversationProvider>,
    dispatcher: Arc<dyn ResponseDispatcher>,
    cache_ttl: Duration,
    default_limit: usize,
    hr_name: String,
}

impl ResponderAgent {
    pub fn new(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let provider = create_provider(args)?;
        let dispatcher = create_dispatcher(args)?;
        let store = Arc::new(ConversationStore::new(&args.conversations_dir)?);
        let cache = Arc::new(Mutex::new(ConversationCache::new()));
        let sync = Arc::new(
            SyncEngine::new(
                Arc::clone(&provider),
                Arc::clone(&store),
                Arc::clone(&cache),
                Duration::from_millis(args.sync_pace_ms)
            )
        );
        let categorizer = match MessageCategorizer::load(&args.templates_path) {
            Ok(categorizer) => categorizer,
            Err(e) => {
                warn!("Could not load response templates: {}. Running without templates.", e);
                MessageCategorizer::from_templates(Vec::new())
            }
        };
        let history = Mutex::new(ProcessedLog::open(&args.history_path)?);
        info!(
            "Responder agent ready: store={}, templates={}, history={}",
            args.conversations_dir,
            args.templates_path,
            args.history_path
        );

        Ok(Self {
            store,
            cache,
            sync,
            categorizer,
            history,
            provider,
            dispatcher,
            cache_ttl: Duration::from_secs(args.cache_ttl_secs),
            default_limit: args.default_limit,
            hr_name: args.hr_name.clone(),
        })
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn templates(&self) -> &[ResponseTemplate] {
        self.categorizer.templates()
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    pub fn hr_name(&self) -> &str {
        &self.hr_name
    }

    fn apply_unread(unread_only: bool, conversations: Vec<ApiConversation>) -> Vec<ApiConversation> {
        if unread_only {
            filter_unread(&conversations)
        } else {
            conversations
        }
    }

    /// Fetch everything fresh, reload from disk and republish the cache.
    async fn full_fetch(&self) -> Result<Vec<ApiConversation>, SyncError> {
        let saved = self.sync.refresh_all(self.default_limit).await?;
        info!("Fresh fetch saved {} conversation(s)", saved);
        let conversations = self.store.load_all();
        self.cache.lock().await.put(conversations.clone());
        Ok(conversations)
    }

    /// When the fresh path fails, prefer stale data over an error: the
    /// cache regardless of age, then disk, then an empty list.
    async fn fallback_view(&self, unread_only: bool) -> MessagesView {
        if let Some(snapshot) = self.cache.lock().await.peek() {
            return MessagesView {
                conversations: Self::apply_unread(unread_only, snapshot),
                cached: true,
                source: "cache",
            };
        }
        MessagesView {
            conversations: Self::apply_unread(unread_only, self.store.load_all()),
            cached: false,
            source: "saved_files",
        }
    }

    /// The main read path. Saved-only short-circuits to disk; otherwise the
    /// cache serves within its TTL, a stale cache triggers an incremental
    /// (unread_only) or full fetch, and any fetch failure falls back to
    /// stale data rather than an error.
    pub async fn get_messages(
        &self,
        force_refresh: bool,
        unread_only: bool,
        load_saved_only: bool
    ) -> MessagesView {
        if load_saved_only {
            return MessagesView {
                conversations: Self::apply_unread(unread_only, self.store.load_all()),
                cached: false,
                source: "saved_files",
            };
        }

        if !force_refresh {
            if let Some(snapshot) = self.cache.lock().await.get(self.cache_ttl) {
                return MessagesView {
                    conversations: Self::apply_unread(unread_only, snapshot),
                    cached: true,
                    source: "cache",
                };
            }
        }

        if unread_only && !force_refresh {
            match self.sync.fetch_incremental(self.default_limit, true).await {
                Ok(outcome) if outcome.conversations.is_empty() => {
                    // nothing unread and nothing saved: broaden once
                    info!("No unread or saved conversations; broadening to a full fetch");
                }
                Ok(outcome) => {
                    return MessagesView {
                        conversations: filter_unread(&outcome.conversations),
                        cached: false,
                        source: "incremental",
                    };
                }
                Err(e) => {
                    warn!("Incremental fetch failed: {}. Falling back to stored data.", e);
                    return self.fallback_view(unread_only).await;
                }
            }
        }

        match self.full_fetch().await {
            Ok(conversations) =>
                MessagesView {
                    conversations: Self::apply_unread(unread_only, conversations),
                    cached: false,
                    source: "fresh",
                },
            Err(e) => {
                warn!("Fresh fetch failed: {}. Falling back to stored data.", e);
                self.fallback_view(unread_only).await
            }
        }
    }

    /// Incremental check used by the background poller.
    pub async fn background_fetch(
        &self,
        limit: Option<usize>,
        unread_only: bool
    ) -> Result<IncrementalOutcome, SyncError> {
        self.sync.fetch_incremental(limit.unwrap_or(self.default_limit), unread_only).await
    }

    /// Open one conversation fresh by case-insensitive substring match
    /// against the provider listing. `Ok(None)` means no such conversation.
    pub async fn fetch_single(&self, sender_name: &str) -> Result<Option<ApiConversation>, SyncError> {
        self.provider.connect().await?;
        let previews = self.provider.list_conversations(SINGLE_LOOKUP_LIMIT).await?;
        let needle = sender_name.to_lowercase();
        let Some(preview) = previews
            .into_iter()
            .find(|p| p.sender_name.to_lowercase().contains(&needle)) else {
            return Ok(None);
        };

        let messages = self.provider.fetch_messages(&preview).await?;
        if messages.is_empty() {
            // empty-fetch guard: keep whatever is already on disk
            return Ok(
                self.store
                    .load_one(&preview.sender_name)?
                    .map(|stored| ApiConversation::from_stored(stored, 0))
            );
        }

        let stored = StoredConversation::from_messages(
            preview.sender_name.clone(),
            preview.is_unread,
            messages,
            Local::now().to_rfc3339()
        );
        self.store.save(&stored)?;
        let conversation = ApiConversation::from_stored(stored, 0);
        let mut cache = self.cache.lock().await;
        cache.update_one(conversation.clone());
        cache.touch();
        Ok(Some(conversation))
    }

    /// Dispatch a reply, then echo it locally so the UI reflects the send
    /// without waiting for the next sync. The echo is best-effort.
    pub async fn send_message(
        &self,
        sender_name: &str,
        text: &str
    ) -> Result<Option<ApiConversation>, ProviderError> {
        let delivered = self.dispatcher.send(sender_name, text).await?;
        if !delivered {
            return Ok(None);
        }
        Ok(Some(self.record_sent(sender_name, text).await))
    }

    async fn record_sent(&self, sender_name: &str, text: &str) -> ApiConversation {
        let now = Local::now().to_rfc3339();
        let mut stored = match self.store.load_one(sender_name) {
            Ok(Some(existing)) => existing,
            Ok(None) => StoredConversation::from_messages(sender_name, false, Vec::new(), now.clone()),
            Err(e) => {
                warn!("Could not load conversation for local echo of {}: {}", sender_name, e);
                StoredConversation::from_messages(sender_name, false, Vec::new(), now.clone())
            }
        };
        stored.messages.push(Message::sent(text, now.clone()));
        stored.fetch_time = now;
        stored.refresh_derived();
        if let Err(e) = self.store.save(&stored) {
            warn!("Could not persist local echo for {}: {}", sender_name, e);
        }
        let conversation = ApiConversation::from_stored(stored, 0);
        let mut cache = self.cache.lock().await;
        cache.update_one(conversation.clone());
        cache.touch();
        conversation
    }

    /// Clear the unread flag in cache and on disk. Returns whether the
    /// conversation was known at all.
    pub async fn mark_read(&self, sender_name: &str) -> Result<bool, StoreError> {
        let in_cache = self.cache.lock().await.mark_read(sender_name);
        let on_disk = self.store.mark_read(sender_name)?;
        Ok(in_cache || on_disk)
    }

    /// Categorize one message without sending or recording anything.
    pub fn preview_response(
        &self,
        message: &str,
        sender_name: &str,
        hr_name: Option<&str>
    ) -> (Categorization, String, Option<String>) {
        let hr_name = hr_name.unwrap_or(&self.hr_name);
        let categorization = self.categorizer.categorize(message);
        let first_name = MessageCategorizer::extract_first_name(sender_name);
        let personalized = categorization.template
            .as_deref()
            .map(|t| MessageCategorizer::personalize(t, &first_name, hr_name));
        (categorization, first_name, personalized)
    }

    /// Categorize every unprocessed received message in the current view
    /// and, unless `dry_run`, send the personalized reply and record the
    /// outcome. A failed dispatch is reported per message and never aborts
    /// the pass.
    pub async fn auto_respond(
        &self,
        hr_name: Option<&str>,
        dry_run: bool
    ) -> Result<AutoRespondOutcome, Box<dyn Error + Send + Sync>> {
        let conversations = {
            self.cache.lock().await.peek()
        }.unwrap_or_else(|| self.store.load_all());
        let hr_name = hr_name.unwrap_or(&self.hr_name);

        let mut log = self.history.lock().await;
        let mut entries = self.categorizer.process_conversations(&log, &conversations, hr_name);
        info!(
            "Auto-respond pass over {} conversation(s): {} fresh message(s){}",
            conversations.len(),
            entries.len(),
            if dry_run { " (dry run)" } else { "" }
        );
        if dry_run {
            return Ok(AutoRespondOutcome { processed: entries, sent_count: 0, dry_run });
        }

        let mut sent_count = 0;
        for entry in &mut entries {
            if let Some(response) = entry.personalized_response.clone() {
                match self.dispatcher.send(&entry.sender_name, &response).await {
                    Ok(true) => {
                        entry.response_sent = true;
                        sent_count += 1;
                        self.record_sent(&entry.sender_name, &response).await;
                    }
                    Ok(false) => {
                        warn!("Dispatcher declined auto-response to {}", entry.sender_name);
                    }
                    Err(e) => {
                        warn!("Could not send auto-response to {}: {}", entry.sender_name, e);
                    }
                }
            }
            if let Err(e) = log.record(entry) {
                warn!("Could not record history for {}: {}", entry.sender_name, e);
            }
        }
        Ok(AutoRespondOutcome { processed: entries, sent_count, dry_run })
    }

    pub async fn sync_progress(&self) -> SyncProgressSnapshot {
        self.sync.progress().await
    }
}
