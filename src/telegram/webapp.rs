use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{RawQuery, Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::core::error::StartupError;
use crate::core::lifecycle::Service;
use crate::telegram::assets::AssetServer;
use crate::telegram::webapp_auth::{InitData, InitDataError, InitDataValidator};

/// Header carrying init data when the query string is empty.
pub const INIT_DATA_HEADER: &str = "X-Telegram-Init-Data";

/// Body of every rejected `/api/open` request.
pub const UNAUTHORIZED_BODY: &str = "unauthorized";

// ============================================================================
// API TYPES
// ============================================================================

/// Successful `/api/open` response.
#[derive(Debug, Serialize)]
pub struct OpenResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub init_data: InitData,
}

/// Shared state for all endpoints
#[derive(Clone)]
pub struct WebAppState {
    pub validator: Arc<InitDataValidator>,
    pub assets: AssetServer,
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Every failure reason maps to the same response.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(InitDataError),
}

impl From<InitDataError> for ApiError {
    fn from(err: InitDataError) -> Self {
        ApiError::Unauthorized(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(reason) => {
                tracing::debug!(%reason, "init data rejected");
                (StatusCode::UNAUTHORIZED, UNAUTHORIZED_BODY).into_response()
            }
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Creates the Mini App router: `/api/open` plus static assets for everything else.
pub fn create_webapp_router(validator: Arc<InitDataValidator>, assets: AssetServer, request_timeout: Duration) -> Router {
    let state = WebAppState { validator, assets };

    // CORS for the Mini App
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/open", any(handle_open))
        .fallback(handle_asset)
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
        .layer(cors)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(Arc::new(state))
}

/// Span for one request. Records the path only: the query string of
/// `/api/open` is the raw init data and never reaches the logs.
fn request_span(req: &Request) -> tracing::Span {
    tracing::debug_span!("request", method = %req.method(), path = %req.uri().path())
}

// ============================================================================
// HANDLERS
// ============================================================================

/// `/api/open`: validates the init data the Mini App sends on launch.
async fn handle_open(
    State(state): State<Arc<WebAppState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Json<OpenResponse>, ApiError> {
    let init_data = query
        .filter(|q| !q.is_empty())
        .or_else(|| {
            headers
                .get(INIT_DATA_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let init_data = state.validator.validate(&init_data)?;
    tracing::info!(user_id = init_data.user.id, "mini app opened");

    Ok(Json(OpenResponse { ok: true, init_data }))
}

async fn handle_asset(State(state): State<Arc<WebAppState>>, req: Request) -> Response {
    state.assets.serve(req).await
}

// ============================================================================
// SERVER
// ============================================================================

/// The HTTP side of the process, bound before anything starts.
pub struct HttpService {
    listener: TcpListener,
    router: Router,
}

impl HttpService {
    /// Binds `addr`. Failing here is fatal: nothing has been started yet.
    pub async fn bind(addr: &str, router: Router) -> Result<Self, StartupError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| StartupError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Service for HttpService {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr = self.listener.local_addr()?;
        tracing::info!("🌐 Mini App server listening on http://{}", addr);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        tracing::info!("Mini App server stopped");
        Ok(())
    }
}
