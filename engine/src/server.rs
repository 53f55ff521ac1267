//! HTTP transport
//!
//! # Endpoints
//!
//! - POST /chat - Run one turn
//! - GET /health - Liveness and feature summary
//! - GET /debug/plans/:user_id - Latest plan versions for a user
//! - GET /debug/recent-plans - Most recent training plans across users
//!
//! The debug routes are only mounted when `server.debug_endpoints` is set.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::HistoryEntry;
use crate::db::{Collection, Filter, FindOptions, RecordStore, StoreError};
use crate::secrets::SecretManager;
use crate::turn::TurnHandler;

const TRAINING_PLAN_COLUMNS: [&str; 6] =
    ["id", "user_id", "version", "days", "reason", "created_at"];
const NUTRITION_PLAN_COLUMNS: [&str; 7] = [
    "id",
    "user_id",
    "version",
    "kcal",
    "protein_grams",
    "reason",
    "created_at",
];

/// Longest error text returned in a `detail` field
const MAX_DETAIL_CHARS: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub turns: Arc<TurnHandler>,
    pub store: Arc<dyn RecordStore>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub mentor_id: String,
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub agent_name: String,
    pub tools_called: Vec<String>,
    pub processing_ms: u64,
    pub guardrail_blocked: bool,
    pub blocked_reason: Option<String>,
    pub language_flagged: bool,
}

/// Error body: `{"detail": "..."}`
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn internal(prefix: &str, err: impl std::fmt::Display) -> Self {
        let text: String = SecretManager::scrub(&err.to_string())
            .chars()
            .take(MAX_DETAIL_CHARS)
            .collect();
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: format!("{}: {}", prefix, text),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::internal("Agent error", err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::internal("Store error", err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

pub fn router(state: AppState, debug_endpoints: bool) -> Router {
    let mut app = Router::new()
        .route("/chat", post(chat_handler))
        .route("/health", get(health_handler));

    if debug_endpoints {
        app = app
            .route("/debug/plans/:user_id", get(plans_handler))
            .route("/debug/recent-plans", get(recent_plans_handler));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
    .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    debug_endpoints: bool,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Mentor server listening on http://{}", addr);
    if debug_endpoints {
        tracing::warn!("Debug endpoints are enabled");
    }

    axum::serve(listener, router(state, debug_endpoints))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Mentor server shutting down gracefully");
        })
        .await
        .context("Server error")?;
    Ok(())
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.user_id.trim().is_empty() || request.mentor_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id and mentor_id are required"));
    }
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let outcome = state
        .turns
        .handle_turn(
            &request.user_id,
            &request.mentor_id,
            &request.message,
            &request.conversation_history,
        )
        .await
        .map_err(|e| {
            tracing::error!(user_id = %request.user_id, "Turn failed: {}", e);
            ApiError::from(e)
        })?;

    Ok(Json(ChatResponse {
        language_flagged: outcome.language_flagged(),
        response: outcome.reply,
        agent_name: outcome.agent_name,
        tools_called: outcome.tools_called,
        processing_ms: outcome.elapsed_ms,
        guardrail_blocked: outcome.blocked,
        blocked_reason: outcome.blocked_reason,
    }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "architecture": "agents-as-tools",
        "features": [
            "dynamic_instructions",
            "input_guardrails",
            "output_guardrails",
            "agent_delegation",
            "tracing",
            "debug_endpoints",
        ],
    }))
}

async fn plans_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(plan_overview(state.store.as_ref(), &user_id).await?))
}

async fn recent_plans_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(recent_plans(state.store.as_ref()).await?))
}

/// The three latest training and nutrition plan versions of a user
pub async fn plan_overview(store: &dyn RecordStore, user_id: &str) -> Result<Value, StoreError> {
    let training = store
        .find_many(
            Collection::TrainingPlanVersions,
            &[Filter::eq("user_id", user_id)],
            FindOptions::new()
                .select(&TRAINING_PLAN_COLUMNS)
                .order_by("version", false)
                .limit(3),
        )
        .await?;
    let nutrition = store
        .find_many(
            Collection::NutritionPlanVersions,
            &[Filter::eq("user_id", user_id)],
            FindOptions::new()
                .select(&NUTRITION_PLAN_COLUMNS)
                .order_by("version", false)
                .limit(3),
        )
        .await?;

    Ok(json!({
        "user_id": user_id,
        "training_plan_count": training.len(),
        "training_plans": training,
        "nutrition_plan_count": nutrition.len(),
        "nutrition_plans": nutrition,
    }))
}

/// The ten most recently created training plans across all users
pub async fn recent_plans(store: &dyn RecordStore) -> Result<Value, StoreError> {
    let plans = store
        .find_many(
            Collection::TrainingPlanVersions,
            &[],
            FindOptions::new()
                .select(&["id", "user_id", "version", "reason", "created_at"])
                .order_by("created_at", false)
                .limit(10),
        )
        .await?;
    Ok(json!({
        "count": plans.len(),
        "recent_plans": plans,
    }))
}
