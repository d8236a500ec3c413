//! MAYA Gateway: HTTP surface for the Maya turn orchestrator.
//! Chat, history, and profile routes over the core; all pipeline logic lives in `maya_core`.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use maya_core::{
    run_blocking, ChatRequest, ChatResponse, ConversationStore, MayaConfig, SqliteStore,
    StoreError, TurnError, TurnOrchestrator, IDENTITY_KEY,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<TurnOrchestrator>,
    store: Arc<dyn ConversationStore>,
    history_limit: usize,
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    limit: Option<usize>,
}

/// Caller-visible error body: `{"status": <code>, "detail": "..."}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "status": self.status.as_u16(), "detail": self.detail });
        (self.status, Json(body)).into_response()
    }
}

impl From<TurnError> for ApiError {
    fn from(e: TurnError) -> Self {
        let status = StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match e {
            StoreError::EmptyIdentity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = match MayaConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(target: "maya::gateway", error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn ConversationStore> =
        Arc::new(SqliteStore::open(&cfg.database_path, &cfg.profile_defaults)?);
    let orchestrator = Arc::new(TurnOrchestrator::from_config(&cfg, Arc::clone(&store)));

    let state = AppState {
        orchestrator,
        store,
        history_limit: cfg.history_limit,
    };
    let cors = cors_layer(&cfg.allowed_origin)?;
    let app = build_app(state).layer(cors);

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        target: "maya::gateway",
        %addr,
        version = maya_core::version(),
        database = %cfg.database_path,
        "Maya Backend is Online"
    );
    axum::serve(listener, app).await?;
    Ok(())
}

fn cors_layer(origin: &str) -> Result<CorsLayer, axum::http::header::InvalidHeaderValue> {
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::exact(HeaderValue::from_str(origin)?))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any))
}

fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/history", get(history).delete(clear_history))
        .route("/clear", post(clear_history))
        .route("/profile", get(get_profile).put(put_profile))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "Maya Backend is Online" }))
}

async fn health() -> &'static str {
    "OK"
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = payload?;
    let response = state.orchestrator.handle(req).await?;
    Ok(Json(response))
}

/// GET /history: most recent user messages, newest first.
async fn history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = q.limit.unwrap_or(state.history_limit);
    let history = run_blocking(&state.store, move |s| s.list_recent_user_turns(limit)).await?;
    Ok(Json(serde_json::json!({ "history": history })))
}

async fn clear_history(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = run_blocking(&state.store, |s| s.clear_all_turns()).await?;
    Ok(Json(serde_json::json!({ "status": "cleared", "removed": removed })))
}

async fn get_profile(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = run_blocking(&state.store, |s| s.profile()).await?;
    Ok(Json(serde_json::to_value(profile).unwrap_or_default()))
}

/// PUT /profile: upserts every pair; an empty identity rejects the whole update.
async fn put_profile(
    State(state): State<AppState>,
    Json(values): Json<BTreeMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if values.get(IDENTITY_KEY).is_some_and(|v| v.trim().is_empty()) {
        return Err(StoreError::EmptyIdentity(IDENTITY_KEY.to_string()).into());
    }
    let values: BTreeMap<String, String> = values
        .into_iter()
        .map(|(k, v)| (k, v.trim().to_string()))
        .collect();
    let profile = run_blocking(&state.store, move |s| {
        s.set_profile_values(&values)?;
        s.profile()
    })
    .await?;
    tracing::info!(target: "maya::gateway", keys = profile.iter().count(), "Profile updated");
    Ok(Json(serde_json::to_value(profile).unwrap_or_default()))
}
