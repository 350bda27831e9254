use crate::agent::ResponderAgent;
use crate::cli::Args;
use crate::models::conversation::ApiConversation;
use crate::sync::{ FullSyncOutcome, SyncError };
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::{ get, post },
    Router,
    Json,
    extract::{ Path, Query, State },
    response::{ IntoResponse, Response },
    http::StatusCode,
};
use serde::{ Deserialize, Serialize };
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Clone)]
struct AppState {
    agent: Arc<ResponderAgent>,
    args: Args,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { success: false, error: message.into() })).into_response()
}

fn sync_error_response(e: SyncError) -> Response {
    let status = match e {
        SyncError::Conflict => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

pub async fn start_http_server(
    addr: &str,
    agent: Arc<ResponderAgent>,
    args: Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(AppState { agent, args });

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
        e
    })?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/messages", get(messages_handler))
        .route("/api/messages/background", get(background_handler))
        .route("/api/conversation/{sender_name}", get(conversation_handler))
        .route("/api/send_message", post(send_message_handler))
        .route("/api/mark_read/{sender_name}", post(mark_read_handler))
        .route("/api/full_sync", post(full_sync_handler))
        .route("/api/full_sync_progressive", post(full_sync_progressive_handler))
        .route("/api/sync_progress", get(sync_progress_handler))
        .route("/api/sync_cancel", post(sync_cancel_handler))
        .route("/api/templates", get(templates_handler))
        .route("/api/preview_response", post(preview_response_handler))
        .route("/api/auto_respond", post(auto_respond_handler))
        .layer(cors)
        .with_state(state)
}

// Flags arrive as "1" from the UI; anything else means unset.
fn flag(value: &Option<String>) -> bool {
    value.as_deref() == Some("1")
}

#[derive(Deserialize)]
struct MessagesQuery {
    force_refresh: Option<String>,
    unread_only: Option<String>,
    load_saved_only: Option<String>,
}

// The list endpoint returns the conversations as a bare JSON array; the
// UI consumes the body directly rather than unwrapping an envelope.
async fn messages_handler(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>
) -> impl IntoResponse {
    let view = state.agent.get_messages(
        flag(&query.force_refresh),
        flag(&query.unread_only),
        flag(&query.load_saved_only)
    ).await;
    Json(view.conversations)
}

#[derive(Deserialize)]
struct BackgroundQuery {
    unread_only: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct BackgroundResponse {
    success: bool,
    new_count: usize,
    updated_count: usize,
    total_count: usize,
    conversations: Vec<ApiConversation>,
}

async fn background_handler(
    State(state): State<AppState>,
    Query(query): Query<BackgroundQuery>
) -> Response {
    // unread_only defaults on; only an explicit "0" broadens the check
    let unread_only = query.unread_only.as_deref() != Some("0");
    match state.agent.background_fetch(query.limit, unread_only).await {
        Ok(outcome) =>
            Json(BackgroundResponse {
                success: true,
                new_count: outcome.new_count,
                updated_count: outcome.updated_count,
                total_count: outcome.total_count,
                conversations: outcome.conversations,
            }).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Serialize)]
struct ConversationResponse {
    success: bool,
    conversation: ApiConversation,
}

async fn conversation_handler(
    State(state): State<AppState>,
    Path(sender_name): Path<String>
) -> Response {
    match state.agent.fetch_single(&sender_name).await {
        Ok(Some(conversation)) => Json(conversation).into_response(),
        Ok(None) =>
            error_response(
                StatusCode::NOT_FOUND,
                format!("Conversation with '{}' not found", sender_name)
            ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Deserialize)]
struct SendMessageRequest {
    sender_name: Option<String>,
    message: Option<String>,
}

async fn send_message_handler(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>
) -> Response {
    let (Some(sender_name), Some(message)) = (request.sender_name, request.message) else {
        return error_response(StatusCode::BAD_REQUEST, "sender_name and message are required");
    };
    if sender_name.trim().is_empty() || message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "sender_name and message are required");
    }

    match state.agent.send_message(&sender_name, &message).await {
        Ok(Some(conversation)) =>
            Json(ConversationResponse { success: true, conversation }).into_response(),
        Ok(None) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send message"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Serialize)]
struct AckResponse {
    success: bool,
    message: String,
}

async fn mark_read_handler(
    State(state): State<AppState>,
    Path(sender_name): Path<String>
) -> Response {
    // acknowledged whether or not the conversation is known locally; the
    // next sync reconciles the flag either way
    match state.agent.mark_read(&sender_name).await {
        Ok(_) =>
            Json(AckResponse {
                success: true,
                message: format!("Marked conversation with {} as read", sender_name),
            }).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Deserialize, Default)]
struct SyncRequest {
    limit: Option<usize>,
}

const FULL_SYNC_DEFAULT_LIMIT: usize = 100;

#[derive(Serialize)]
struct FullSyncResponse {
    success: bool,
    message: String,
    #[serde(flatten)]
    outcome: FullSyncOutcome,
}

async fn full_sync_handler(
    State(state): State<AppState>,
    request: Option<Json<SyncRequest>>
) -> Response {
    let limit = request
        .and_then(|Json(r)| r.limit)
        .unwrap_or(FULL_SYNC_DEFAULT_LIMIT);
    match state.agent.sync_engine().full_sync(limit).await {
        Ok(outcome) =>
            Json(FullSyncResponse {
                success: true,
                message: format!(
                    "Full sync completed: {} conversations processed",
                    outcome.total_processed
                ),
                outcome,
            }).into_response(),
        Err(e) => sync_error_response(e),
    }
}

#[derive(Serialize)]
struct ProgressiveSyncResponse {
    success: bool,
    message: String,
    progress_endpoint: &'static str,
}

async fn full_sync_progressive_handler(
    State(state): State<AppState>,
    request: Option<Json<SyncRequest>>
) -> Response {
    let limit = request
        .and_then(|Json(r)| r.limit)
        .unwrap_or(state.args.default_limit);
    match state.agent.sync_engine().start_progressive(limit).await {
        Ok(()) =>
            Json(ProgressiveSyncResponse {
                success: true,
                message: "Progressive sync started".to_string(),
                progress_endpoint: "/api/sync_progress",
            }).into_response(),
        Err(e) => sync_error_response(e),
    }
}

async fn sync_progress_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.agent.sync_progress().await)
}

async fn sync_cancel_handler(State(state): State<AppState>) -> impl IntoResponse {
    let was_running = state.agent.sync_engine().cancel().await;
    Json(AckResponse {
        success: was_running,
        message: if was_running {
            "Sync cancellation requested".to_string()
        } else {
            "No sync in progress".to_string()
        },
    })
}

// Bare array, same as the conversation list.
async fn templates_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.agent.templates().to_vec())
}

#[derive(Deserialize)]
struct PreviewRequest {
    message: Option<String>,
    sender_name: Option<String>,
    hr_name: Option<String>,
}

#[derive(Serialize)]
struct PreviewResponse {
    success: bool,
    sender_name: String,
    first_name: String,
    hr_name: String,
    original_message: String,
    category: String,
    matched_keyword: Option<String>,
    response_template: Option<String>,
    personalized_response: Option<String>,
}

async fn preview_response_handler(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>
) -> Response {
    let message = request.message.unwrap_or_default();
    if message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "message is required");
    }
    let sender_name = request.sender_name.unwrap_or_default();
    let hr_name = request.hr_name
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| state.agent.hr_name().to_string());

    let (categorization, first_name, personalized) = state.agent.preview_response(
        &message,
        &sender_name,
        Some(hr_name.as_str())
    );
    Json(PreviewResponse {
        success: true,
        sender_name,
        first_name,
        hr_name,
        original_message: message,
        category: categorization.category,
        matched_keyword: categorization.matched_keyword,
        response_template: categorization.template,
        personalized_response: personalized,
    }).into_response()
}

#[derive(Deserialize, Default)]
struct AutoRespondRequest {
    hr_name: Option<String>,
    dry_run: Option<bool>,
}

#[derive(Serialize)]
struct AutoRespondResponse {
    success: bool,
    processed_count: usize,
    sent_count: usize,
    dry_run: bool,
    results: Vec<crate::history::ProcessedMessage>,
}

async fn auto_respond_handler(
    State(state): State<AppState>,
    request: Option<Json<AutoRespondRequest>>
) -> Response {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let dry_run = request.dry_run.unwrap_or(false);
    match state.agent.auto_respond(request.hr_name.as_deref(), dry_run).await {
        Ok(outcome) =>
            Json(AutoRespondResponse {
                success: true,
                processed_count: outcome.processed.len(),
                sent_count: outcome.sent_count,
                dry_run: outcome.dry_run,
                results: outcome.processed,
            }).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{ to_bytes, Body };
    use axum::http::Request;
    use serde_json::Value;
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_router(tmp: &TempDir) -> Router {
        let dir = tmp.path();
        fs::write(
            dir.join("feed.json"),
            r#"[
                {"sender_name": "Alice Smith", "is_unread": true,
                 "messages": [{"is_sent": false, "message": "yes, interested!", "timestamp": "10:00"}]},
                {"sender_name": "Bob Jones", "is_unread": false,
                 "messages": [{"is_sent": false, "message": "hello there", "timestamp": "09:00"}]}
            ]"#
        ).unwrap();
        fs::write(
            dir.join("templates.json"),
            r#"[{"status": "interested", "keywords": ["interested"],
                 "response": "Hi [firstname], [hrname] will reach out."}]"#
        ).unwrap();
        let args = Args {
            conversations_dir: dir.join("conversations").to_string_lossy().into_owned(),
            provider_type: "replay".to_string(),
            feed_path: dir.join("feed.json").to_string_lossy().into_owned(),
            dispatcher_type: "outbox".to_string(),
            outbox_path: dir.join("outbox.jsonl").to_string_lossy().into_owned(),
            templates_path: dir.join("templates.json").to_string_lossy().into_owned(),
            history_path: dir.join("history.jsonl").to_string_lossy().into_owned(),
            hr_name: "Dana".to_string(),
            default_limit: 50,
            sync_pace_ms: 0,
            sync_on_startup: false,
            cache_ttl_secs: 10,
            server_addr: "127.0.0.1:5000".to_string(),
            debug: false,
        };
        let agent = Arc::new(ResponderAgent::new(&args).unwrap());
        router(AppState { agent, args })
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
            ).await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn messages_endpoint_returns_a_bare_array() {
        let tmp = TempDir::new().unwrap();
        let (status, body) = get_json(test_router(&tmp), "/api/messages").await;
        assert_eq!(status, StatusCode::OK);
        let conversations = body.as_array().unwrap();
        assert_eq!(conversations.len(), 2);
        assert!(conversations[0].get("sender_name").is_some());

        // saved-only on an empty store is still an array, just an empty one
        let tmp = TempDir::new().unwrap();
        let (status, body) = get_json(
            test_router(&tmp),
            "/api/messages?load_saved_only=1"
        ).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn conversation_endpoint_returns_the_object_or_404() {
        let tmp = TempDir::new().unwrap();
        let router = test_router(&tmp);
        let (status, body) = get_json(router.clone(), "/api/conversation/alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sender_name"], "Alice Smith");
        assert!(body.get("success").is_none());

        let (status, body) = get_json(router, "/api/conversation/nobody").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn templates_endpoint_returns_a_bare_array() {
        let tmp = TempDir::new().unwrap();
        let (status, body) = get_json(test_router(&tmp), "/api/templates").await;
        assert_eq!(status, StatusCode::OK);
        let templates = body.as_array().unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0]["status"], "interested");
        assert!(templates[0]["keywords"].is_array());
        assert!(templates[0].get("response").is_some());
    }

    #[tokio::test]
    async fn background_endpoint_keeps_its_envelope_and_takes_flags() {
        let tmp = TempDir::new().unwrap();
        let (status, body) = get_json(
            test_router(&tmp),
            "/api/messages/background?unread_only=1&limit=10"
        ).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["new_count"], 1);
        assert_eq!(body["total_count"], 1);
        assert!(body["conversations"].is_array());

        // unread_only=0 broadens to the full listing
        let tmp = TempDir::new().unwrap();
        let (_, body) = get_json(
            test_router(&tmp),
            "/api/messages/background?unread_only=0"
        ).await;
        assert_eq!(body["new_count"], 2);
    }

    #[tokio::test]
    async fn mark_read_acknowledges_unknown_senders() {
        let tmp = TempDir::new().unwrap();
        let (status, body) = post_json(test_router(&tmp), "/api/mark_read/Nobody").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }
}
