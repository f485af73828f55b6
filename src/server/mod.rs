//! HTTP server: assembly, shared state, and lifecycle.
//!
//! The assembly constructs every component explicitly and owns the
//! background tickers. Shutdown stops the tickers, releases held locks,
//! and flushes the error sink before the process exits.

mod handlers;
mod middleware;
mod routes;
mod sse;

pub use routes::create_router;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::info;

use crate::cache::Cache;
use crate::chat::{ChatOrchestrator, StreamRegistry};
use crate::config::Settings;
use crate::email::{HttpMailer, Mailer, NoopMailer};
use crate::embedding::{EmbeddingClient, OpenAiEmbeddings};
use crate::error_sink::ErrorSink;
use crate::llm::{ChatModel, OpenAiChat};
use crate::lock::LockManager;
use crate::pipeline::{ChannelPipeline, VideoPipeline};
use crate::queue::{Dispatcher, QueueService, TickStatus};
use crate::rate_limit::RateLimiter;
use crate::repository::DbContext;
use crate::search::RetrievalEngine;
use crate::storage::BlobStore;
use crate::summary::SummaryService;
use crate::transcript::{TimedTextSource, TranscriptSource};
use crate::youtube::{VideoDirectory, YouTubeDirectory};

/// Shared state for the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DbContext,
    pub queue_service: QueueService,
    pub orchestrator: ChatOrchestrator,
    pub summaries: SummaryService,
    pub rate_limiter: RateLimiter,
    pub cache: Cache,
    pub errors: ErrorSink,
    pub streams: StreamRegistry,
    pub ticks: Arc<RwLock<HashMap<&'static str, TickStatus>>>,
}

/// Everything the assembly produces besides the state itself.
struct Assembly {
    state: AppState,
    dispatcher: Arc<Dispatcher>,
    locks: LockManager,
    shutdown_tx: watch::Sender<bool>,
}

/// Wire every component together against real upstream providers.
async fn assemble(settings: Settings) -> anyhow::Result<Assembly> {
    let db = DbContext::from_url(&settings.store_url).await?;
    let blobs = BlobStore::new(settings.transcripts_dir());

    let locks = LockManager::new(db.locks());
    let errors = ErrorSink::new(db.error_events());
    let cache = Cache::new(db.cache_entries());
    let rate_limiter = RateLimiter::new(db.rate_events());
    let streams = StreamRegistry::new();

    let embeddings = EmbeddingClient::new(Arc::new(OpenAiEmbeddings::new(
        settings.openai_api_key.clone(),
    )));
    let transcripts: Arc<dyn TranscriptSource> = Arc::new(TimedTextSource::new());
    let directory: Arc<dyn VideoDirectory> =
        Arc::new(YouTubeDirectory::new(settings.youtube_api_key.clone()));
    let llm: Arc<dyn ChatModel> = Arc::new(OpenAiChat::new(settings.openai_api_key.clone()));
    let mailer: Arc<dyn Mailer> = match &settings.email_api_key {
        Some(key) => Arc::new(HttpMailer::new(key.clone())),
        None => Arc::new(NoopMailer),
    };

    let video_pipeline = Arc::new(VideoPipeline::new(
        db.videos(),
        db.chunks(),
        blobs.clone(),
        transcripts,
        embeddings.clone(),
        locks.clone(),
        errors.clone(),
    ));
    let channel_pipeline = Arc::new(ChannelPipeline::new(
        db.channels(),
        db.videos(),
        db.queue(),
        directory.clone(),
        video_pipeline.clone(),
        mailer,
        locks.clone(),
        errors.clone(),
        settings.channel_video_cap,
    ));
    let queue_service = QueueService::new(
        db.channels(),
        db.videos(),
        db.queue(),
        channel_pipeline.clone(),
        video_pipeline.clone(),
    );

    let search = RetrievalEngine::new(db.chunks(), db.videos(), embeddings, blobs.clone());
    let orchestrator = ChatOrchestrator::new(
        search,
        llm.clone(),
        db.chat(),
        db.videos(),
        db.channels(),
        cache.clone(),
        streams.clone(),
        errors.clone(),
    );
    let summaries = SummaryService::new(llm, blobs, cache.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Arc::new(Dispatcher::new(
        db.queue(),
        db.videos(),
        db.channels(),
        directory,
        channel_pipeline,
        video_pipeline,
        locks.clone(),
        cache.clone(),
        rate_limiter.clone(),
        errors.clone(),
        shutdown_rx,
    ));

    let state = AppState {
        settings: Arc::new(settings),
        db,
        queue_service,
        orchestrator,
        summaries,
        rate_limiter,
        cache,
        errors: errors.clone(),
        streams,
        ticks: dispatcher.registry(),
    };

    Ok(Assembly {
        state,
        dispatcher,
        locks,
        shutdown_tx,
    })
}

/// Start the service and run until interrupted.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let host = settings.host.clone();
    let port = settings.port;
    let assembly = assemble(settings).await?;

    let tick_handles = assembly.dispatcher.clone().spawn_all();
    let app = create_router(assembly.state.clone());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("tubesage listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Stop tickers, release held leases, flush buffered errors
    info!("shutting down");
    let _ = assembly.shutdown_tx.send(true);
    for handle in tick_handles {
        let _ = handle.await;
    }
    assembly.locks.release_all().await;
    assembly.state.errors.flush().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Router wiring against scripted providers for endpoint tests.

    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;

    use crate::embedding::{EmbeddingBackend, EmbeddingError};
    use crate::llm::{ChatTurn, DeltaStream, LlmError};
    use crate::transcript::{TranscriptError, TranscriptSegment};
    use crate::youtube::{ChannelInfo, MetadataError, VideoDetails, VideoListing};

    pub struct StubDirectory;

    #[async_trait]
    impl VideoDirectory for StubDirectory {
        async fn resolve_channel(&self, reference: &str) -> Result<ChannelInfo, MetadataError> {
            Ok(ChannelInfo {
                channel_id: reference.to_string(),
                title: format!("Channel {reference}"),
            })
        }

        async fn list_videos(
            &self,
            _channel_id: &str,
            _max_results: usize,
            _published_after: Option<chrono::DateTime<chrono::Utc>>,
        ) -> Result<Vec<VideoListing>, MetadataError> {
            Ok(Vec::new())
        }

        async fn video_details(
            &self,
            _video_id: &str,
        ) -> Result<Option<VideoDetails>, MetadataError> {
            Ok(None)
        }
    }

    pub struct StubTranscripts;

    #[async_trait]
    impl crate::transcript::TranscriptSource for StubTranscripts {
        async fn fetch(&self, _video_id: &str) -> Result<Vec<TranscriptSegment>, TranscriptError> {
            Ok(vec![TranscriptSegment {
                start_seconds: 0,
                end_seconds: 5,
                text: "Stub transcript.".into(),
            }])
        }
    }

    pub struct StubEmbeddings;

    #[async_trait]
    impl EmbeddingBackend for StubEmbeddings {
        async fn embed_one(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    pub struct StubModel;

    #[async_trait]
    impl ChatModel for StubModel {
        async fn stream_completion(
            &self,
            _system: &str,
            _messages: &[ChatTurn],
        ) -> Result<DeltaStream, LlmError> {
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(
                "Stub answer [0:10].".to_string(),
            )])))
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            Ok("Stub summary.".to_string())
        }
    }

    /// Build a full state against the throwaway store and stub providers.
    pub async fn test_state(data_dir: PathBuf, db: DbContext) -> AppState {
        let settings = Settings {
            host: "127.0.0.1".into(),
            port: 0,
            allowed_origins: Vec::new(),
            backend_api_key: "test-secret".into(),
            openai_api_key: "unused".into(),
            youtube_api_key: "unused".into(),
            email_api_key: None,
            store_url: "unused".into(),
            data_dir: data_dir.clone(),
            environment: crate::config::Environment::Development,
            channel_video_cap: 20,
        };
        let blobs = BlobStore::new(settings.transcripts_dir());

        let locks = LockManager::new(db.locks());
        let errors = ErrorSink::new(db.error_events());
        let cache = Cache::new(db.cache_entries());
        let rate_limiter = RateLimiter::new(db.rate_events());
        let streams = StreamRegistry::new();
        let embeddings = EmbeddingClient::new(Arc::new(StubEmbeddings));
        let llm: Arc<dyn ChatModel> = Arc::new(StubModel);

        let video_pipeline = Arc::new(VideoPipeline::new(
            db.videos(),
            db.chunks(),
            blobs.clone(),
            Arc::new(StubTranscripts),
            embeddings.clone(),
            locks.clone(),
            errors.clone(),
        ));
        let channel_pipeline = Arc::new(ChannelPipeline::new(
            db.channels(),
            db.videos(),
            db.queue(),
            Arc::new(StubDirectory),
            video_pipeline.clone(),
            Arc::new(NoopMailer),
            locks.clone(),
            errors.clone(),
            20,
        ));
        let queue_service = QueueService::new(
            db.channels(),
            db.videos(),
            db.queue(),
            channel_pipeline,
            video_pipeline,
        );
        let search = RetrievalEngine::new(db.chunks(), db.videos(), embeddings, blobs.clone());
        let orchestrator = ChatOrchestrator::new(
            search,
            llm.clone(),
            db.chat(),
            db.videos(),
            db.channels(),
            cache.clone(),
            streams.clone(),
            errors.clone(),
        );
        let summaries = SummaryService::new(llm, blobs, cache.clone());

        AppState {
            settings: Arc::new(settings),
            db,
            queue_service,
            orchestrator,
            summaries,
            rate_limiter,
            cache,
            errors,
            streams,
            ticks: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_state;
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::repository::test_context;

    async fn setup_test_app() -> (axum::Router, tempfile::TempDir) {
        let (ctx, dir) = test_context().await;
        let state = test_state(dir.path().to_path_buf(), ctx).await;
        (create_router(state), dir)
    }

    fn authed(builder: axum::http::request::Builder) -> axum::http::request::Builder {
        builder
            .header("X-API-KEY", "test-secret")
            .header("X-User-Id", "u-1")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_requires_no_auth() {
        let (app, _dir) = setup_test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_rejects_missing_key() {
        let (app, _dir) = setup_test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/queue/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_api_rejects_wrong_key() {
        let (app, _dir) = setup_test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/queue/status")
                    .header("X-API-KEY", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_process_channel_then_duplicate() {
        let (app, _dir) = setup_test_app().await;

        let first = app
            .clone()
            .oneshot(
                authed(Request::builder().method("POST").uri("/api/channels/process"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"channelId":"UC123"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first_json = body_json(first).await;
        assert_eq!(first_json["success"], true);
        assert_eq!(first_json["position"], 1);

        let duplicate = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/api/channels/process"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"channelId":"UC123"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::OK);
        let dup_json = body_json(duplicate).await;
        assert_eq!(dup_json["success"], false);
    }

    #[tokio::test]
    async fn test_process_channel_missing_body_field() {
        let (app, _dir) = setup_test_app().await;
        let response = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/api/channels/process"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        // Serde rejects the body before the handler runs
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_queue_status_and_position() {
        let (app, _dir) = setup_test_app().await;

        let enqueue = app
            .clone()
            .oneshot(
                authed(Request::builder().method("POST").uri("/api/queue/channel"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"channelId":"UC9"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let qid = body_json(enqueue).await["queueId"].as_i64().unwrap();

        let status = app
            .clone()
            .oneshot(
                authed(Request::builder().uri("/api/queue/status"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(status.status(), StatusCode::OK);
        let status_json = body_json(status).await;
        assert_eq!(status_json["pending"], 1);

        let position = app
            .oneshot(
                authed(Request::builder().uri(format!("/api/queue/position/{qid}")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let position_json = body_json(position).await;
        assert_eq!(position_json["position"], 1);
    }

    #[tokio::test]
    async fn test_video_summary_unknown_video_is_404() {
        let (app, _dir) = setup_test_app().await;
        let response = app
            .oneshot(
                authed(Request::builder().uri("/api/videos/ghost/summary"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_monitor_and_cron_and_errors_endpoints() {
        let (app, _dir) = setup_test_app().await;
        for uri in ["/api/monitor/stats", "/api/cron/status", "/api/errors/stats"] {
            let response = app
                .clone()
                .oneshot(authed(Request::builder().uri(uri)).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_chat_stream_emits_sse_frames() {
        let (ctx, dir) = test_context().await;
        ctx.videos()
            .upsert_placeholder("vid1", None, "Intro", None)
            .await
            .unwrap();
        let state = test_state(dir.path().to_path_buf(), ctx).await;
        let app = create_router(state);

        let response = app
            .oneshot(
                authed(Request::builder().method("POST").uri("/api/chat/stream"))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"videoId":"vid1","messages":[{"role":"user","content":"hello"}]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.contains("text/event-stream"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(r#""type":"content""#));
        assert!(text.contains(r#""type":"done""#));
        assert!(text.contains("Stub answer"));
    }

    #[tokio::test]
    async fn test_anonymous_chat_rate_limit_returns_429() {
        let (ctx, dir) = test_context().await;
        ctx.videos()
            .upsert_placeholder("vid1", None, "Intro", None)
            .await
            .unwrap();
        let state = test_state(dir.path().to_path_buf(), ctx).await;
        let app = create_router(state);

        // Anonymous callers get 3 chat calls per hour
        for _ in 0..3 {
            let ok = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/chat/stream")
                        .header("X-API-KEY", "test-secret")
                        .header("content-type", "application/json")
                        .body(Body::from(
                            r#"{"videoId":"vid1","messages":[{"role":"user","content":"q"}]}"#,
                        ))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(ok.status(), StatusCode::OK);
        }

        let blocked = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat/stream")
                    .header("X-API-KEY", "test-secret")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"videoId":"vid1","messages":[{"role":"user","content":"q"}]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            blocked
                .headers()
                .get("X-RateLimit-Remaining")
                .and_then(|v| v.to_str().ok()),
            Some("0")
        );
        let body = body_json(blocked).await;
        assert_eq!(body["error"], "rate_limit_exceeded");
        assert!(body["resetAt"].is_string());
    }
}
