//! HTTP ingress: `GET /api/beststories?n=<count>` behind admission control.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::admission::AdmissionController;
use crate::models::AggregateEntry;
use crate::service::{BestStoriesService, ServiceError};

pub const DEFAULT_COUNT: i64 = 10;

/// Status used when the client went away before the response was ready.
const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BestStoriesService>,
    pub admission: Arc<AdmissionController>,
}

impl AppState {
    pub fn new(service: Arc<BestStoriesService>, admission: Arc<AdmissionController>) -> Self {
        Self { service, admission }
    }
}

pub fn create_router(state: AppState) -> Router {
    let best_stories = Router::new()
        .route("/api/beststories", get(get_best_stories))
        .route_layer(middleware::from_fn_with_state(state.clone(), admit));

    Router::new()
        .route("/health", get(health))
        .merge(best_stories)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct BestStoriesQuery {
    pub n: Option<i64>,
}

async fn get_best_stories(
    State(state): State<AppState>,
    Query(query): Query<BestStoriesQuery>,
) -> Result<Json<Vec<AggregateEntry>>, ApiError> {
    // axum drops this future when the client disconnects; the guard turns
    // that into a cancellation of our own upstream work.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let count = query.n.unwrap_or(DEFAULT_COUNT);
    let stories = state.service.get_top(count, &cancel).await?;
    Ok(Json(stories))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Client identity for admission: the peer IP, or `"unknown"` when the
/// transport did not record one.
fn client_identity(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn admit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let client = client_identity(&req);
    if !state.admission.allow(&client) {
        debug!(client = %client, "request rejected by admission control");
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    next.run(req).await
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            ServiceError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable"),
            ServiceError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            ServiceError::Cancelled => (
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST),
                "cancelled",
            ),
        };

        if !matches!(self.0, ServiceError::Cancelled) {
            error!(error = %self.0, "best stories request failed");
        }

        let body = ErrorBody {
            code,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
