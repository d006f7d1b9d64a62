// HTTP server module
// POST /search over the query service, plus a health check


use std::future::Future;
use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::query::{QueryService, SearchHit};
use crate::{RagError, Result};

#[derive(Debug, Clone)]
pub struct AppState {
    pub query: QueryService,
    pub default_top_k: usize,
}

impl AppState {
    #[inline]
    pub fn new(query: QueryService, default_top_k: usize) -> Self {
        Self {
            query,
            default_top_k,
        }
    }

    /// The request's `top_k`, or the default when absent
    fn top_k(&self, requested: Option<i64>) -> Result<usize> {
        match requested {
            None => Ok(self.default_top_k),
            Some(top_k) if top_k <= 0 => Err(RagError::InvalidConfiguration(format!(
                "top_k must be greater than zero, got {}",
                top_k
            ))),
            Some(top_k) => usize::try_from(top_k).map_err(|_| {
                RagError::InvalidConfiguration(format!("top_k {} is too large", top_k))
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchRequest {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchResponse {
    pub question: String,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

fn internal_error(err: &RagError) -> (StatusCode, Json<ErrorBody>) {
    error!(kind = err.kind(), "search failed: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            detail: err.to_string(),
        }),
    )
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> std::result::Result<Json<SearchResponse>, (StatusCode, Json<ErrorBody>)> {
    let top_k = state.top_k(request.top_k).map_err(|e| internal_error(&e))?;

    let results = state
        .query
        .search_query(&request.question, top_k)
        .await
        .map_err(|e| internal_error(&e))?;

    Ok(Json(SearchResponse {
        question: request.question,
        results,
    }))
}

#[inline]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/search", post(search_handler))
        .with_state(state)
}

/// Bind the listening socket for `addr` (`host:port`)
#[inline]
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr.parse().map_err(|e| {
        RagError::InvalidConfiguration(format!("invalid bind address {}: {}", addr, e))
    })?;
    Ok(TcpListener::bind(addr).await?)
}

/// Serve requests on `listener` until `shutdown` resolves
#[inline]
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C
#[inline]
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
