use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use lovechat_sync::ChatError;
use lovechat_sync::composer::{Composer, attachment_category};
use lovechat_sync::reactions::ReactionEngine;
use lovechat_sync::store::{DocumentStore, SqliteStore};
use lovechat_sync::streak::{Clock, StreakTracker, compute_streak};
use lovechat_sync::synchronizer::MessageSynchronizer;
use lovechat_sync::uploads::{LocalBlobStore, MAX_BLOB_SIZE};
use lovechat_types::api::{MediaQuery, SendMessageRequest, StreakResponse, ToggleReactionRequest};
use lovechat_types::models::REACTION_PALETTE;

use crate::gateway;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Arc<SqliteStore>,
    pub synchronizer: MessageSynchronizer<SqliteStore>,
    pub composer: Composer<SqliteStore, LocalBlobStore>,
    pub reactions: ReactionEngine<SqliteStore>,
    pub streak: StreakTracker,
    pub clock: Arc<dyn Clock>,
}

pub fn router(state: AppState, media_dir: &FsPath) -> Router {
    Router::new()
        .route("/messages", get(get_messages).post(send_message))
        .route("/messages/voice", post(send_voice))
        .route("/messages/media", post(send_media))
        .route("/messages/{message_id}/reactions", post(toggle_reaction))
        .route("/streak", get(get_streak))
        .route("/gateway", get(gateway::ws_upgrade))
        .with_state(state)
        .nest_service("/media", ServeDir::new(media_dir))
        .layer(DefaultBodyLimit::max(MAX_BLOB_SIZE))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Map a core failure onto an HTTP status, logging it on the way.
fn status_for(err: ChatError) -> StatusCode {
    match err {
        ChatError::ValidationFailed(_) | ChatError::DeviceDenied(_) => {
            warn!("Rejected request: {}", err);
            StatusCode::BAD_REQUEST
        }
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::PermissionDenied(_) => {
            warn!("{}", err);
            StatusCode::FORBIDDEN
        }
        ChatError::UploadFailed(_) => {
            error!("{}", err);
            StatusCode::BAD_GATEWAY
        }
        ChatError::Unavailable(_) => {
            error!("{}", err);
            StatusCode::SERVICE_UNAVAILABLE
        }
        ChatError::Corrupt(_) => {
            error!("{}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn get_messages(State(state): State<AppState>) -> Result<impl IntoResponse, StatusCode> {
    let messages = state.store.list_messages().await.map_err(status_for)?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    match state.composer.send_text(req.author, &req.text).await.map_err(status_for)? {
        Some(message) => Ok((StatusCode::CREATED, Json(message)).into_response()),
        // Blank text: nothing to send
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /messages/voice?author=user1 with the encoded clip as the raw body.
pub async fn send_voice(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    let message = state.composer.send_voice(query.author, body).await.map_err(status_for)?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /messages/media?author=user1 with an image or video as the raw body.
pub async fn send_media(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNSUPPORTED_MEDIA_TYPE)?;

    if attachment_category(content_type).is_err() {
        return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    let message = state
        .composer
        .send_file(query.author, body, content_type)
        .await
        .map_err(status_for)?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !REACTION_PALETTE.contains(&req.emoji.as_str()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let edit = state
        .reactions
        .toggle_reaction(&message_id, &req.emoji, req.author)
        .await
        .map_err(status_for)?;

    Ok(Json(serde_json::json!({ "edit": edit })))
}

pub async fn get_streak(State(state): State<AppState>) -> Result<impl IntoResponse, StatusCode> {
    let meta = state.store.metadata().await.map_err(status_for)?;
    Ok(Json(StreakResponse {
        streak: compute_streak(meta.first_message_at, state.clock.now()),
        first_message_timestamp: meta.first_message_at,
    }))
}
