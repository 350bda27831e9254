use crate::cache::ConversationCache;
use crate::models::conversation::{ ApiConversation, StoredConversation };
use crate::provider::{ ConversationProvider, ProviderError };
use crate::store::{ ConversationStore, StoreError };
use chrono::Local;
use log::{ info, warn, error };
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::time::{ Duration, Instant };
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync already in progress")]
    Conflict,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Explicit cancellation token handed into a sync run and checked between
/// conversations. In-flight work for the current conversation is never
/// interrupted.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Live state of the sync in progress. Process-wide singleton behind a
/// mutex; mutated by at most one sync task, polled by any number of
/// status readers.
pub struct SyncProgress {
    pub active: bool,
    pub current: usize,
    pub total: usize,
    pub current_conversation: String,
    pub conversations: Vec<ApiConversation>,
    pub start_time: Option<Instant>,
}

impl SyncProgress {
    pub fn idle() -> Self {
        Self {
            active: false,
            current: 0,
            total: 0,
            current_conversation: String::new(),
            conversations: Vec::new(),
            start_time: None,
        }
    }

    /// Case-insensitive replace-or-append into the progress view.
    fn merge(&mut self, conversation: ApiConversation) {
        merge_conversation(&mut self.conversations, conversation);
    }
}

/// Read-only progress snapshot with the derived fields the status endpoint
/// reports.
#[derive(Clone, Debug, Serialize)]
pub struct SyncProgressSnapshot {
    pub active: bool,
    pub current: usize,
    pub total: usize,
    pub current_conversation: String,
    pub conversations: Vec<ApiConversation>,
    pub progress_percent: f64,
    pub elapsed_time: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct FullSyncOutcome {
    pub total_processed: usize,
    pub total_conversations: usize,
    pub conversations: Vec<ApiConversation>,
    pub sync_time: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct IncrementalOutcome {
    pub new_count: usize,
    pub updated_count: usize,
    pub total_count: usize,
    pub conversations: Vec<ApiConversation>,
}

/// Case-insensitive replace-or-append. Returns true when an existing entry
/// was replaced.
pub fn merge_conversation(list: &mut Vec<ApiConversation>, conversation: ApiConversation) -> bool {
    if let Some(slot) = list.iter_mut().find(|c| c.matches_sender(&conversation.sender_name)) {
        *slot = conversation;
        true
    } else {
        list.push(conversation);
        false
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Orchestrates full, progressive and incremental syncs against the
/// provider, merging results into the store and cache.
///
/// Only one full or progressive sync may run at a time; a second start
/// fails with `SyncError::Conflict` and is not queued.
pub struct SyncEngine {
    provider: Arc<dyn ConversationProvider>,
    store: Arc<ConversationStore>,
    cache: Arc<Mutex<ConversationCache>>,
    progress: Arc<Mutex<SyncProgress>>,
    token: CancelToken,
    pace: Duration,
}

impl SyncEngine {
    pub fn new(
        provider: Arc<dyn ConversationProvider>,
        store: Arc<ConversationStore>,
        cache: Arc<Mutex<ConversationCache>>,
        pace: Duration
    ) -> Self {
        Self {
            provider,
            store,
            cache,
            progress: Arc::new(Mutex::new(SyncProgress::idle())),
            token: CancelToken::default(),
            pace,
        }
    }

    /// Claim the single Running slot, or fail with `Conflict`. Returns a
    /// fresh cancellation token for the run.
    async fn try_begin(
        &self,
        total: usize,
        label: &str,
        seed: Vec<ApiConversation>
    ) -> Result<CancelToken, SyncError> {
        let mut progress = self.progress.lock().await;
        if progress.active {
            return Err(SyncError::Conflict);
        }
        progress.active = true;
        progress.current = 0;
        progress.total = total;
        progress.current_conversation = label.to_string();
        progress.conversations = seed;
        progress.start_time = Some(Instant::now());
        self.token.reset();
        Ok(self.token.clone())
    }

    async fn finish_failed(&self, error: &SyncError) {
        let mut progress = self.progress.lock().await;
        progress.active = false;
        progress.current_conversation = format!("Error: {}", error);
    }

    async fn step(&self, current: usize, sender_name: &str) {
        let mut progress = self.progress.lock().await;
        progress.current = current;
        progress.current_conversation = format!("Processing: {}", sender_name);
    }

    /// Fetch one conversation and persist it. Returns the stored record, or
    /// `None` when the fetch failed or yielded nothing (logged and skipped;
    /// a single bad conversation never aborts a sync).
    async fn fetch_and_save(
        &self,
        run_id: &Uuid,
        preview: &crate::provider::ConversationPreview
    ) -> Option<StoredConversation> {
        let messages = match self.provider.fetch_messages(preview).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("[sync {}] Skipping {}: {}", run_id, preview.sender_name, e);
                return None;
            }
        };
        if messages.is_empty() {
            info!("[sync {}] No messages found for {}", run_id, preview.sender_name);
            return None;
        }
        let stored = StoredConversation::from_messages(
            preview.sender_name.clone(),
            preview.is_unread,
            messages,
            Local::now().to_rfc3339()
        );
        match self.store.save(&stored) {
            Ok(_) => {
                info!(
                    "[sync {}] Saved {}: {} messages",
                    run_id,
                    stored.sender_name,
                    stored.total_messages
                );
                Some(stored)
            }
            Err(e) => {
                error!("[sync {}] Error saving {}: {}", run_id, preview.sender_name, e);
                None
            }
        }
    }

    async fn finalize(&self, processed: usize, order: &[String], cancelled: bool) -> Vec<ApiConversation> {
        if let Err(e) = self.store.save_order(order) {
            warn!("Could not save processing order: {}", e);
        }
        let final_conversations = self.store.load_all();
        self.cache.lock().await.put(final_conversations.clone());
        let mut progress = self.progress.lock().await;
        progress.active = false;
        progress.current_conversation = if cancelled {
            "Cancelled by user".to_string()
        } else {
            format!("Completed! Processed {} conversations", processed)
        };
        progress.conversations = final_conversations.clone();
        final_conversations
    }

    /// Exhaustive synchronous re-fetch of up to `limit` conversations.
    /// Each conversation is written to the store as soon as it is fetched,
    /// so partial progress survives a crash.
    pub async fn full_sync(&self, limit: usize) -> Result<FullSyncOutcome, SyncError> {
        let token = self.try_begin(limit, "Initializing...", Vec::new()).await?;
        match self.run_full(limit, token).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.finish_failed(&e).await;
                Err(e)
            }
        }
    }

    async fn run_full(
        &self,
        limit: usize,
        token: CancelToken
    ) -> Result<FullSyncOutcome, SyncError> {
        let run_id = Uuid::new_v4();
        info!("[sync {}] Starting full sync for up to {} conversations", run_id, limit);
        self.provider.connect().await?;
        let previews = self.provider.list_conversations(limit).await?;
        self.progress.lock().await.total = previews.len();

        let mut order: Vec<String> = Vec::new();
        let mut processed = 0;
        for (i, preview) in previews.iter().enumerate() {
            if token.is_cancelled() {
                info!("[sync {}] Cancelled before conversation {}", run_id, i + 1);
                break;
            }
            self.step(i + 1, &preview.sender_name).await;
            if let Some(stored) = self.fetch_and_save(&run_id, preview).await {
                processed += 1;
                order.push(stored.sender_name.clone());
                self.progress.lock().await.merge(ApiConversation::from_stored(stored, i));
            }
            if !self.pace.is_zero() {
                tokio::time::sleep(self.pace).await;
            }
        }

        let final_conversations = self.finalize(processed, &order, token.is_cancelled()).await;
        info!(
            "[sync {}] Full sync complete: {} processed, {} total",
            run_id,
            processed,
            final_conversations.len()
        );
        Ok(FullSyncOutcome {
            total_processed: processed,
            total_conversations: final_conversations.len(),
            conversations: final_conversations,
            sync_time: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        })
    }

    /// Start a progressive sync on a background task. Progress is published
    /// after each conversation via `progress()`; the caller polls.
    pub async fn start_progressive(self: &Arc<Self>, limit: usize) -> Result<(), SyncError> {
        let seed = self.store.load_all();
        let token = self.try_begin(limit, "Initializing...", seed).await?;
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_progressive(limit, token).await;
        });
        Ok(())
    }

    /// Progressive sync body. Conversations that are already saved and read
    /// on both sides are skipped without a re-fetch but still recorded into
    /// the processing order and the progress view.
    async fn run_progressive(&self, limit: usize, token: CancelToken) {
        let run_id = Uuid::new_v4();
        info!("[sync {}] Starting progressive sync for up to {} conversations", run_id, limit);

        if let Err(e) = self.provider.connect().await {
            error!("[sync {}] Failed to reach conversation list: {}", run_id, e);
            let mut progress = self.progress.lock().await;
            progress.active = false;
            progress.current_conversation = "Failed to navigate to messages".to_string();
            return;
        }

        self.progress.lock().await.current_conversation = "Fetching conversation list...".to_string();
        let previews = match self.provider.list_conversations(limit).await {
            Ok(previews) => previews,
            Err(e) => {
                error!("[sync {}] Could not list conversations: {}", run_id, e);
                let mut progress = self.progress.lock().await;
                progress.active = false;
                progress.current_conversation = format!("Error: {}", e);
                return;
            }
        };
        self.progress.lock().await.total = previews.len();
        if previews.is_empty() {
            let mut progress = self.progress.lock().await;
            progress.active = false;
            progress.current_conversation = "No conversations found".to_string();
            return;
        }

        let mut order: Vec<String> = Vec::new();
        let mut processed = 0;
        for (i, preview) in previews.iter().enumerate() {
            if token.is_cancelled() {
                info!("[sync {}] Cancelled before conversation {}", run_id, i + 1);
                break;
            }
            self.step(i + 1, &preview.sender_name).await;

            // Already saved and read on both sides: no re-fetch needed.
            match self.store.load_one(&preview.sender_name) {
                Ok(Some(existing)) if !existing.is_unread && !preview.is_unread => {
                    info!(
                        "[sync {}] Skipping {}/{}: {} (already saved and read)",
                        run_id,
                        i + 1,
                        previews.len(),
                        preview.sender_name
                    );
                    order.push(preview.sender_name.clone());
                    self.progress.lock().await.merge(ApiConversation::from_stored(existing, i));
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "[sync {}] Could not read existing file for {}: {}",
                        run_id,
                        preview.sender_name,
                        e
                    );
                }
            }

            if let Some(stored) = self.fetch_and_save(&run_id, preview).await {
                processed += 1;
                order.push(stored.sender_name.clone());
                self.progress.lock().await.merge(ApiConversation::from_stored(stored, i));
            }
            if !self.pace.is_zero() {
                tokio::time::sleep(self.pace).await;
            }
        }

        self.finalize(processed, &order, token.is_cancelled()).await;
        info!("[sync {}] Progressive sync complete: {} conversations processed", run_id, processed);
    }

    /// Re-fetch everything up to `limit` and persist each conversation,
    /// without touching the order index or progress state. Used by the
    /// read path's force-refresh. Returns the number saved.
    pub async fn refresh_all(&self, limit: usize) -> Result<usize, SyncError> {
        let run_id = Uuid::new_v4();
        self.provider.connect().await?;
        let previews = self.provider.list_conversations(limit).await?;
        let mut saved = 0;
        for preview in &previews {
            if self.fetch_and_save(&run_id, preview).await.is_some() {
                saved += 1;
            }
            if !self.pace.is_zero() {
                tokio::time::sleep(self.pace).await;
            }
        }
        Ok(saved)
    }

    /// Fetch new or changed conversations and merge them into the current
    /// view by case-insensitive name. With `unread_only` the candidate set
    /// is the provider's unread filter, otherwise the full listing. Only
    /// fetched conversations are persisted. Zero candidates means zero
    /// counts; broadening the request is the caller's decision.
    pub async fn fetch_incremental(
        &self,
        limit: usize,
        unread_only: bool
    ) -> Result<IncrementalOutcome, SyncError> {
        let run_id = Uuid::new_v4();
        let existing = {
            self.cache.lock().await.peek()
        }.unwrap_or_else(|| self.store.load_all());

        let previews = if unread_only {
            self.provider.list_unread(limit).await?
        } else {
            self.provider.list_conversations(limit).await?
        };
        info!("[sync {}] Incremental fetch: {} candidate(s)", run_id, previews.len());

        let mut merged = existing;
        let mut new_count = 0;
        let mut updated_count = 0;
        for preview in &previews {
            let Some(stored) = self.fetch_and_save(&run_id, preview).await else {
                continue;
            };
            let mut api = ApiConversation::from_stored(stored, 0);
            // replaced entries keep their slot's index; appends take the
            // next position so `index` stays meaningful in the merged view
            if let Some(pos) = merged.iter().position(|c| c.matches_sender(&api.sender_name)) {
                api.index = merged[pos].index;
                merged[pos] = api;
                updated_count += 1;
            } else {
                api.index = merged.len();
                merged.push(api);
                new_count += 1;
            }
        }

        self.cache.lock().await.put(merged.clone());
        info!(
            "[sync {}] Incremental fetch complete: {} new, {} updated",
            run_id,
            new_count,
            updated_count
        );
        Ok(IncrementalOutcome {
            new_count,
            updated_count,
            total_count: merged.len(),
            conversations: merged,
        })
    }

    /// Cooperatively cancel the running sync. Idempotent; returns whether
    /// a sync was actually running.
    pub async fn cancel(&self) -> bool {
        let mut progress = self.progress.lock().await;
        if progress.active {
            progress.active = false;
            progress.current_conversation = "Cancelled by user".to_string();
            self.token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn progress(&self) -> SyncProgressSnapshot {
        let progress = self.progress.lock().await;
        let progress_percent = if progress.total > 0 {
            round1(((progress.current as f64) / (progress.total.max(1) as f64)) * 100.0)
        } else {
            0.0
        };
        let elapsed_time = progress.start_time
            .map(|start| round1(start.elapsed().as_secs_f64()))
            .unwrap_or(0.0);
        SyncProgressSnapshot {
            active: progress.active,
            current: progress.current,
            total: progress.total,
            current_conversation: progress.current_conversation.clone(),
            conversations: progress.conversations.clone(),
            progress_percent,
            elapsed_time,
        }
    }
}
