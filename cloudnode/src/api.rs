use crate::automation;
use crate::headless::{BrowserSession, HeadlessBrowser};
use crate::models::{PageRequest, PageResult, ProbeReply, ProbeRequest};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Application state
pub struct AppState {
    /// Index this cloudnode was started with
    pub index: usize,
    /// Browser shared by all requests
    pub browser: RwLock<HeadlessBrowser>,
}

impl AppState {
    pub fn new(index: usize, browser: HeadlessBrowser) -> Self {
        Self {
            index,
            browser: RwLock::new(browser),
        }
    }
}

// API Error handling
#[derive(Debug)]
pub enum ApiError {
    InternalError(String),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, error_message).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

/// Routes served by a cloudnode
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/probe", post(probe_page))
        .route("/api/scrape", post(scrape_page))
        .with_state(state)
}

/// Serve the API on an already-bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn validate_page(page: u32) -> Result<(), ApiError> {
    if page == 0 {
        return Err(ApiError::BadRequest("page numbers start at 1".to_string()));
    }
    Ok(())
}

async fn open_session(state: &AppState) -> Result<BrowserSession, ApiError> {
    let browser = state.browser.read().await;
    Ok(browser.new_session().await?)
}

async fn close_session(session: BrowserSession) {
    if let Err(e) = session.close().await {
        warn!("{}", e);
    }
}

// Route handlers
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.browser.read().await.is_running() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn probe_page(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProbeRequest>,
) -> Result<Json<ProbeReply>, ApiError> {
    validate_page(request.page)?;

    let session = open_session(&state).await?;
    let outcome = automation::is_zero_results(&session, request.page, request.region).await;
    close_session(session).await;

    Ok(Json(ProbeReply {
        page: request.page,
        zero_results: outcome?,
    }))
}

async fn scrape_page(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PageRequest>,
) -> Result<Json<PageResult>, ApiError> {
    validate_page(request.page)?;

    info!(
        "CloudNode {} scraping page {} of {}",
        state.index, request.page, request.region
    );

    let session = open_session(&state).await?;
    let outcome = automation::scrape_page(
        &session,
        request.page,
        request.region,
        request.keywords.as_deref(),
    )
    .await;
    close_session(session).await;

    Ok(Json(outcome?))
}
