use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use copilot_chat::config::Settings;
use copilot_chat::models::{
    AccountSelection, DocumentUpload, IngestResponse, ModeChatRequest, ModeChatResponse,
    PassthroughRequest, PassthroughResponse, SessionCreated,
};
use copilot_chat::modes::accounts::{account_names, find_account};
use copilot_chat::modes::{ChatMode, ModeError, ModeRouter};
use copilot_chat::proxy::{CompletionClient, OpenAIProxy};
use copilot_chat::rag::{Embedder, FastEmbedder, RetrievalPipeline};
use copilot_chat::{RagError, Session};

type ApiError = (StatusCode, String);

struct AppState {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>,
    pipeline: Arc<RetrievalPipeline>,
    modes: ModeRouter,
    proxy: Arc<OpenAIProxy>,
    rag_available: bool,
}

/// Stands in when the embedding model could not be loaded, so every
/// ingestion fails with an embedding-stage error instead of the server
/// refusing to start.
struct UnavailableEmbedder {
    reason: String,
}

#[async_trait]
impl Embedder for UnavailableEmbedder {
    async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding model not loaded: {}", self.reason)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load()?;
    tracing::info!("Completion endpoint: {} ({})", settings.completion.base_url, settings.completion.model);
    tracing::info!(
        "RAG: chunk_size={} top_k={}",
        settings.rag.chunk_size,
        settings.rag.top_k
    );

    let proxy = Arc::new(OpenAIProxy::from_settings(&settings.completion)?);

    let (embedder, rag_available): (Arc<dyn Embedder>, bool) =
        match FastEmbedder::new(&settings.embedding.model_dir) {
            Ok(embedder) => {
                tracing::info!("RAG engine initialized successfully");
                (Arc::new(embedder), true)
            }
            Err(e) => {
                tracing::warn!("RAG engine initialization failed (continuing without RAG): {}", e);
                (Arc::new(UnavailableEmbedder { reason: e.to_string() }), false)
            }
        };

    let completion: Arc<dyn CompletionClient> = proxy.clone();
    let pipeline = Arc::new(RetrievalPipeline::new(
        embedder,
        completion.clone(),
        settings.rag.to_config(),
    ));

    let state = Arc::new(AppState {
        sessions: RwLock::new(HashMap::new()),
        modes: ModeRouter::new(completion, pipeline.clone()),
        pipeline,
        proxy,
        rag_available,
    });

    match settings.server.session_ttl() {
        Some(ttl) => start_session_sweeper(state.clone(), ttl)?,
        None => tracing::info!("Session expiry disabled"),
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/sessions", post(create_session_handler))
        .route("/api/v1/sessions/:id", delete(delete_session_handler))
        .route("/api/v1/sessions/:id/account", put(select_account_handler))
        .route("/api/v1/sessions/:id/documents", post(ingest_document_handler))
        .route("/api/v1/sessions/:id/chat", post(mode_chat_handler))
        .route("/api/v1/chat", post(passthrough_chat_handler))
        .route("/api/v1/accounts", get(list_accounts_handler))
        .route("/api/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(settings.server.bind_address()).await?;
    tracing::info!("Co-pilot server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Drop sessions idle for longer than `ttl`. Sessions currently locked by a
/// request are in use and kept.
async fn expire_idle_sessions(state: &AppState, ttl: chrono::Duration, now: DateTime<Utc>) -> usize {
    let mut sessions = state.sessions.write().await;
    let before = sessions.len();
    sessions.retain(|_, session| match session.try_lock() {
        Ok(session) => !session.is_idle(ttl, now),
        Err(_) => true,
    });
    before - sessions.len()
}

fn start_session_sweeper(state: Arc<AppState>, ttl: Duration) -> Result<()> {
    let idle_limit = chrono::Duration::from_std(ttl)?;
    let period = ttl.min(Duration::from_secs(60));
    tracing::info!("Sessions expire after {}s idle", ttl.as_secs());

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            let expired = expire_idle_sessions(&state, idle_limit, Utc::now()).await;
            if expired > 0 {
                tracing::info!("Expired {} idle sessions", expired);
            }
        }
    });
    Ok(())
}

fn rag_status(err: &RagError) -> StatusCode {
    match err {
        RagError::NotIndexed => StatusCode::CONFLICT,
        RagError::DimensionMismatch { .. } | RagError::IngestionFailed { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RagError::EmptyIndex => StatusCode::NOT_FOUND,
        RagError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn mode_error(err: ModeError) -> ApiError {
    let status = match &err {
        ModeError::UnknownMode(_) | ModeError::MissingMessage(_) => StatusCode::BAD_REQUEST,
        ModeError::Rag(e) => rag_status(e),
    };
    tracing::error!("Chat error: {}", err);
    (status, err.to_string())
}

async fn session_handle(state: &AppState, id: Uuid) -> Result<Arc<Mutex<Session>>, ApiError> {
    state
        .sessions
        .read()
        .await
        .get(&id)
        .cloned()
        .ok_or((StatusCode::NOT_FOUND, format!("Unknown session: {}", id)))
}

async fn create_session_handler(State(state): State<Arc<AppState>>) -> Json<SessionCreated> {
    let session = Session::new();
    let response = SessionCreated {
        session_id: session.id(),
        created_at: session.created_at(),
    };
    state
        .sessions
        .write()
        .await
        .insert(session.id(), Arc::new(Mutex::new(session)));
    tracing::info!("Created session {}", response.session_id);
    Json(response)
}

async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> StatusCode {
    match state.sessions.write().await.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn select_account_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AccountSelection>,
) -> Result<StatusCode, ApiError> {
    let account = payload.account.filter(|name| name != "None");
    if let Some(ref name) = account {
        if find_account(name).is_none() {
            return Err((StatusCode::BAD_REQUEST, format!("Unknown account: {}", name)));
        }
    }

    let session = session_handle(&state, id).await?;
    let mut session = session.lock().await;
    session.touch();
    session.set_account(account);
    Ok(StatusCode::NO_CONTENT)
}

async fn ingest_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DocumentUpload>,
) -> Result<Json<IngestResponse>, ApiError> {
    let session = session_handle(&state, id).await?;
    let mut session = session.lock().await;
    session.touch();

    let report = state
        .pipeline
        .ingest(&mut session, &payload.content)
        .await
        .map_err(|e| {
            tracing::error!("Document ingestion error: {}", e);
            (rag_status(&e), e.to_string())
        })?;

    Ok(Json(IngestResponse {
        status: "Document processed and indexed!".to_string(),
        chunks: report.chunks,
        dimension: report.dimension,
        fingerprint: report.fingerprint,
    }))
}

async fn mode_chat_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ModeChatRequest>,
) -> Result<Json<ModeChatResponse>, ApiError> {
    let mode: ChatMode = request.mode.parse().map_err(mode_error)?;
    let session = session_handle(&state, id).await?;
    let mut session = session.lock().await;
    session.touch();

    let reply = state
        .modes
        .handle(mode, &mut session, request.message.as_deref())
        .await
        .map_err(mode_error)?;

    Ok(Json(ModeChatResponse {
        mode: mode.label().to_string(),
        reply,
    }))
}

async fn passthrough_chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PassthroughRequest>,
) -> Result<Json<PassthroughResponse>, ApiError> {
    if request.messages.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No messages provided".to_string()));
    }

    let result = state.proxy.complete(request.messages).await.map_err(|e| {
        tracing::error!("Completion error: {:#}", e);
        (StatusCode::BAD_GATEWAY, format!("Completion error: {}", e))
    })?;

    Ok(Json(PassthroughResponse { result }))
}

async fn list_accounts_handler() -> Json<Vec<&'static str>> {
    Json(account_names())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let completion_healthy = state.proxy.health_check().await.unwrap_or(false);
    let sessions = state.sessions.read().await.len();

    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "sessions": sessions,
        "services": {
            "completion": completion_healthy,
            "embeddings": state.rag_available,
        }
    }))
}
