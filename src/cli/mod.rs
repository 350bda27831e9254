use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Conversation Store Args ---
    /// Directory holding one JSON file per conversation plus the order index.
    #[arg(long, env = "CONVERSATIONS_DIR", default_value = "data/conversations")]
    pub conversations_dir: String,

    // --- Provider Args ---
    /// Conversation provider type (replay)
    #[arg(long, env = "PROVIDER_TYPE", default_value = "replay")]
    pub provider_type: String,

    /// Path to the replay feed file (JSON array of conversations).
    #[arg(long, env = "FEED_PATH", default_value = "data/feed.json")]
    pub feed_path: String,

    /// Response dispatcher type (outbox)
    #[arg(long, env = "DISPATCHER_TYPE", default_value = "outbox")]
    pub dispatcher_type: String,

    /// Path to the JSONL outbox file where dispatched replies are appended.
    #[arg(long, env = "OUTBOX_PATH", default_value = "data/outbox.jsonl")]
    pub outbox_path: String,

    // --- Responder Args ---
    /// Path to the response template table (JSON array of {status, keywords, response}).
    #[arg(long, env = "TEMPLATES_PATH", default_value = "data/response_templates.json")]
    pub templates_path: String,

    /// Path to the processed-message history log (JSONL, append-only).
    #[arg(long, env = "HISTORY_PATH", default_value = "data/message_history.jsonl")]
    pub history_path: String,

    /// Name substituted for the [hrname] placeholder in personalized replies.
    #[arg(long, env = "HR_NAME", default_value = "HR Team")]
    pub hr_name: String,

    // --- Sync Args ---
    /// Default number of conversations fetched per sync when the request does not say.
    #[arg(long, env = "SYNC_DEFAULT_LIMIT", default_value = "50")]
    pub default_limit: usize,

    /// Pause between conversation fetches during a sync, in milliseconds.
    #[arg(long, env = "SYNC_PACE_MS", default_value = "1000")]
    pub sync_pace_ms: u64,

    /// Run a full sync once before the server starts accepting requests.
    #[arg(long, env = "SYNC_ON_STARTUP", default_value = "false")]
    pub sync_on_startup: bool,

    // --- Caching Args ---
    /// Time-to-live in seconds for the in-memory conversation snapshot.
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "10")]
    pub cache_ttl_secs: u64,

    // --- General App Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:5000")]
    pub server_addr: String,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
