//! HTTP API handlers and routes using axum.
//!
//! Routes:
//! - GET /health - Health check and stream statistics
//! - GET /accounts - Managed accounts
//! - GET /positions/{account_id} - Positions of one account
//! - GET /search?symbol= - Contract search
//! - GET /loadData?conId&interval&limit&duration - Candles ending now
//! - GET /loadMoreData?conId&interval&limit&endTime&duration - Candles ending at endTime
//! - GET /getSymbolInfo?conId - Contract details
//! - POST /command - Typed session command
//! - GET /ws/... - Streaming endpoints (see `streams`)
//!
//! Every session-backed route answers 503 while the session is down.

use crate::commands::{self, SessionCommand};
use crate::context::GatewayContext;
use crate::error::GatewayError;
use crate::queries::{self, HistoryQuery};
use crate::streams::stream_routes;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use upstream::InstrumentId;

/// Create the full HTTP router: REST endpoints plus streaming endpoints.
pub fn create_router(ctx: Arc<GatewayContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/accounts", get(accounts_handler))
        .route("/positions/{account_id}", get(positions_handler))
        .route("/search", get(search_handler))
        .route("/loadData", get(load_data_handler))
        .route("/loadMoreData", get(load_more_data_handler))
        .route("/getSymbolInfo", get(symbol_info_handler))
        .route("/command", post(command_handler))
        .merge(stream_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
async fn health_handler(State(ctx): State<Arc<GatewayContext>>) -> impl IntoResponse {
    let registry = ctx.hub.registry();
    Json(HealthResponse {
        status: "healthy",
        ib_connected: ctx.session.is_connected(),
        ib_host: ctx.config.ib_host.clone(),
        ib_port: ctx.config.ib_port,
        proxy_host: ctx.config.proxy_host.clone(),
        proxy_port: ctx.config.proxy_port,
        streams: StreamStats {
            topics: registry.topic_count(),
            clients: registry.client_count(),
            upstream_feeds: ctx.hub.feed_count(),
        },
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    ib_connected: bool,
    ib_host: String,
    ib_port: u16,
    proxy_host: String,
    proxy_port: u16,
    streams: StreamStats,
}

#[derive(Serialize)]
struct StreamStats {
    topics: usize,
    clients: usize,
    upstream_feeds: usize,
}

/// GET /accounts
async fn accounts_handler(
    State(ctx): State<Arc<GatewayContext>>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.ensure_connected()?;
    let accounts = queries::accounts(ctx.session.as_ref()).await?;
    Ok(Json(serde_json::json!({ "accounts": accounts })))
}

/// GET /positions/{account_id}
async fn positions_handler(
    State(ctx): State<Arc<GatewayContext>>,
    Path(account_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.ensure_connected()?;
    Ok(Json(queries::positions(ctx.session.as_ref(), &account_id).await?))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    symbol: String,
}

/// GET /search
async fn search_handler(
    State(ctx): State<Arc<GatewayContext>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.ensure_connected()?;
    Ok(Json(queries::search(ctx.session.as_ref(), &query.symbol).await))
}

/// GET /loadData
///
/// Always ends the window now; an `endTime` in the query is ignored.
async fn load_data_handler(
    State(ctx): State<Arc<GatewayContext>>,
    Query(mut query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.ensure_connected()?;
    query.end_time = None;
    Ok(Json(queries::load_history(ctx.session.as_ref(), &query).await?))
}

/// GET /loadMoreData
async fn load_more_data_handler(
    State(ctx): State<Arc<GatewayContext>>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.ensure_connected()?;
    Ok(Json(queries::load_history(ctx.session.as_ref(), &query).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfoQuery {
    con_id: InstrumentId,
}

/// GET /getSymbolInfo
async fn symbol_info_handler(
    State(ctx): State<Arc<GatewayContext>>,
    Query(query): Query<SymbolInfoQuery>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.ensure_connected()?;
    Ok(Json(queries::symbol_info(ctx.session.as_ref(), query.con_id).await))
}

/// POST /command
async fn command_handler(
    State(ctx): State<Arc<GatewayContext>>,
    Json(command): Json<SessionCommand>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.ensure_connected()?;
    match commands::execute(ctx.session.as_ref(), &command).await {
        Ok(response) => Ok(Json(response)),
        Err(e) if e.is_disconnected() => Err(ApiError::ServiceUnavailable),
        Err(e) => Err(ApiError::Internal(format!("Error calling {}: {}", command.name(), e))),
    }
}

// ============================================================================
// Errors
// ============================================================================

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    /// The upstream session has no live connection.
    ServiceUnavailable,
    Internal(String),
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        if e.is_disconnected() {
            ApiError::ServiceUnavailable
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, detail) = match self {
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "Not connected".to_string()),
            ApiError::Internal(msg) => {
                error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse { detail });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}
