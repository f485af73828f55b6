//! HTTP request handlers.

use axum::extract::{Extension, Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::sse::ChannelSink;
use super::AppState;
use crate::error::AppError;
use crate::llm::ChatTurn;
use crate::models::{QueuePriority, RequestUser};
use crate::rate_limit::{RateAction, RateDecision};

/// Health check endpoint for container orchestration.
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct ProcessChannelBody {
    #[serde(rename = "channelId")]
    pub channel_id: String,
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessVideoBody {
    #[serde(rename = "videoId")]
    pub video_id: String,
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VideoChatBody {
    pub messages: Vec<ChatTurn>,
    #[serde(rename = "videoId")]
    pub video_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelChatBody {
    pub messages: Vec<ChatTurn>,
    #[serde(rename = "channelId")]
    pub channel_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

fn parse_priority(raw: &Option<String>) -> QueuePriority {
    raw.as_deref()
        .and_then(QueuePriority::parse)
        .unwrap_or(QueuePriority::Normal)
}

/// Attach X-RateLimit-* headers to a response.
fn with_rate_headers(mut response: Response, decision: &RateDecision) -> Response {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset_at.timestamp().to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
    response
}

/// The 429 envelope with reset metadata and headers.
fn rate_limited_response(decision: &RateDecision) -> Response {
    let error = AppError::RateLimited {
        limit: decision.limit,
        window: decision.window,
        reset_at: decision.reset_at,
    };
    with_rate_headers(error.into_response(), decision)
}

/// Check-and-record helper for rate-limited routes.
async fn enforce_rate_limit(
    state: &AppState,
    user: &RequestUser,
    action: RateAction,
) -> Result<RateDecision, Response> {
    let identifier = user.rate_identifier();
    let decision = state
        .rate_limiter
        .check(&identifier, action, user.class())
        .await;
    if !decision.allowed {
        return Err(rate_limited_response(&decision));
    }
    state.rate_limiter.record(&identifier, action).await;
    Ok(decision)
}

/// POST /api/channels/process (also /api/queue/channel)
pub async fn process_channel(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Json(body): Json<ProcessChannelBody>,
) -> Response {
    let decision = match enforce_rate_limit(&state, &user, RateAction::ChannelProcess).await {
        Ok(decision) => decision,
        Err(response) => return response,
    };

    let requested_by = user.email.clone().or_else(|| user.id.clone());
    match state
        .queue_service
        .enqueue_channel(
            &body.channel_id,
            requested_by.as_deref(),
            parse_priority(&body.priority),
        )
        .await
    {
        Ok(outcome) => with_rate_headers(Json(outcome).into_response(), &decision),
        Err(e) => e.into_response(),
    }
}

/// POST /api/videos/process (also /api/queue/video)
pub async fn process_video(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Json(body): Json<ProcessVideoBody>,
) -> Response {
    let decision = match enforce_rate_limit(&state, &user, RateAction::VideoUpload).await {
        Ok(decision) => decision,
        Err(response) => return response,
    };

    match state
        .queue_service
        .enqueue_video(&body.video_id, user.id.as_deref(), parse_priority(&body.priority))
        .await
    {
        Ok(outcome) => with_rate_headers(Json(outcome).into_response(), &decision),
        Err(e) => e.into_response(),
    }
}

/// GET /api/channels/:id/status
pub async fn channel_status(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Response {
    let channel = match state.db.channels().get_by_external_id(&channel_id).await {
        Ok(Some(channel)) => channel,
        Ok(None) => return AppError::NotFound(format!("channel {channel_id}")).into_response(),
        Err(e) => return AppError::from(e).into_response(),
    };

    let queue_row = match state.db.queue().latest_for_channel(channel.id).await {
        Ok(row) => row,
        Err(e) => return AppError::from(e).into_response(),
    };
    let position = match &queue_row {
        Some(item) => state.db.queue().position(item.id).await.unwrap_or(None),
        None => None,
    };

    Json(serde_json::json!({
        "channel": channel,
        "queue": queue_row,
        "position": position,
    }))
    .into_response()
}

/// GET /api/videos/:id/summary
///
/// Summaries are generated from at most the first 8 000 transcript
/// characters and cached for an hour.
pub async fn video_summary(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Response {
    let video = match state.db.videos().get_by_external_id(&video_id).await {
        Ok(Some(video)) => video,
        Ok(None) => return AppError::NotFound(format!("video {video_id}")).into_response(),
        Err(e) => return AppError::from(e).into_response(),
    };

    match state.summaries.get_summary(&video).await {
        Ok(summary) => Json(serde_json::json!({
            "videoId": video.external_id,
            "title": video.title,
            "summary": summary,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/chat/stream
pub async fn video_chat_stream(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Json(body): Json<VideoChatBody>,
) -> Response {
    let decision = match enforce_rate_limit(&state, &user, RateAction::Chat).await {
        Ok(decision) => decision,
        Err(response) => return response,
    };

    let (sink, response) = ChannelSink::new_response_pair();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator
            .stream_video_chat(&body.messages, &body.video_id, body.session_id, &user, &sink)
            .await;
    });
    with_rate_headers(response, &decision)
}

/// POST /api/chat/channel/stream
pub async fn channel_chat_stream(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Json(body): Json<ChannelChatBody>,
) -> Response {
    let decision = match enforce_rate_limit(&state, &user, RateAction::Chat).await {
        Ok(decision) => decision,
        Err(response) => return response,
    };

    let (sink, response) = ChannelSink::new_response_pair();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator
            .stream_channel_chat(&body.messages, &body.channel_id, body.session_id, &user, &sink)
            .await;
    });
    with_rate_headers(response, &decision)
}

/// GET /api/queue/status
pub async fn queue_status(State(state): State<AppState>) -> Response {
    match state.queue_service.status_counts().await {
        Ok(counts) => {
            let mut body = serde_json::json!({
                "pending": 0,
                "processing": 0,
                "completed": 0,
                "failed": 0,
            });
            for (status, count) in counts {
                body[status] = serde_json::json!(count);
            }
            Json(body).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /api/queue/position/:qid
pub async fn queue_position(State(state): State<AppState>, Path(qid): Path<i64>) -> Response {
    match state.queue_service.position(qid).await {
        Ok(position) => Json(serde_json::json!({
            "queueId": qid,
            "position": position,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/monitor/stats
pub async fn monitor_stats(State(state): State<AppState>) -> Response {
    let videos = state.db.videos();
    let total_videos = videos.count().await.unwrap_or(0);
    let processed_videos = videos.count_processed().await.unwrap_or(0);
    let channels = state.db.channels().count().await.unwrap_or(0);
    let chunks = state.db.chunks().count().await.unwrap_or(0);
    let locks = state.db.locks().count().await.unwrap_or(0);
    let queue_counts = state.queue_service.status_counts().await.unwrap_or_default();

    Json(serde_json::json!({
        "videos": { "total": total_videos, "processed": processed_videos },
        "channels": channels,
        "chunks": chunks,
        "queue": queue_counts
            .into_iter()
            .map(|(status, n)| serde_json::json!({"status": status, "count": n}))
            .collect::<Vec<_>>(),
        "activeStreams": state.streams.active_count().await,
        "cacheEntries": state.cache.memory_len().await,
        "heldLocks": locks,
        "bufferedErrors": state.errors.buffered().await,
    }))
    .into_response()
}

/// GET /api/cron/status
pub async fn cron_status(State(state): State<AppState>) -> Response {
    let ticks = state.ticks.read().await;
    let mut entries: Vec<serde_json::Value> = ticks
        .iter()
        .map(|(name, status)| {
            serde_json::json!({
                "name": name,
                "intervalSecs": status.interval_secs,
                "lastRun": status.last_run.map(|t| t.to_rfc3339()),
                "runs": status.runs,
            })
        })
        .collect();
    entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    Json(serde_json::json!({ "ticks": entries })).into_response()
}

/// GET /api/errors/stats
pub async fn errors_stats(State(state): State<AppState>) -> Response {
    Json(state.errors.stats().await).into_response()
}
