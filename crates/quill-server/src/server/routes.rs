use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware,
    response::{IntoResponse, Response},
    routing::post,
};
use quill::{CounterStore, Error, Quill, StoreError};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::server::{
    backend::ViewStore,
    limits::{self, Policies},
};

/// Shared handler state.
pub struct AppState<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    quill: Quill<S, ViewStore>,
    policies: Policies,
    fail_open: bool,
    trust_proxy: bool,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> AppState<S>
where
    S: CounterStore,
{
    pub fn new(
        quill: Quill<S, ViewStore>,
        policies: Policies,
        fail_open: bool,
        trust_proxy: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                quill,
                policies,
                fail_open,
                trust_proxy,
            }),
        }
    }

    pub fn quill(&self) -> &Quill<S, ViewStore> {
        &self.inner.quill
    }

    pub fn policies(&self) -> &Policies {
        &self.inner.policies
    }

    pub fn fail_open(&self) -> bool {
        self.inner.fail_open
    }

    /// Whether `X-Forwarded-For` identifies the client.
    pub fn trust_proxy(&self) -> bool {
        self.inner.trust_proxy
    }

    /// Returns the owned services once every other clone (i.e. the router)
    /// has been dropped.
    pub fn into_quill(self) -> Result<Quill<S, ViewStore>, Self> {
        Arc::try_unwrap(self.inner)
            .map(|inner| inner.quill)
            .map_err(|inner| Self { inner })
    }
}

pub fn router<S>(state: AppState<S>) -> Router
where
    S: CounterStore + 'static,
{
    Router::new()
        .route("/ids", post(issue_id::<S>))
        .route(
            "/posts/{id}/views",
            post(record_view::<S>).get(get_views::<S>),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            limits::rate_limit::<S>,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ViewsResponse {
    pub id: String,
    pub views: u64,
}

async fn issue_id<S>(State(state): State<AppState<S>>) -> Result<Json<String>, ApiError>
where
    S: CounterStore,
{
    let id = state.quill().generator().next_id_async().await?;
    Ok(Json(id.to_string()))
}

async fn record_view<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<ViewsResponse>, ApiError>
where
    S: CounterStore,
{
    state.quill().views().record(&id);
    current_views(&state, id).await
}

async fn get_views<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<ViewsResponse>, ApiError>
where
    S: CounterStore,
{
    current_views(&state, id).await
}

async fn current_views<S>(state: &AppState<S>, id: String) -> Result<Json<ViewsResponse>, ApiError>
where
    S: CounterStore,
{
    let persisted = state.quill().sink().persisted(&id).await?;
    let views = state.quill().views().total(&id, persisted);
    Ok(Json(ViewsResponse { id, views }))
}

/// Maps library errors onto HTTP responses.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(Error::Store(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        let mut response = (status, body).into_response();
        if let Some(retry_after) = self.0.retry_after() {
            // Whole seconds, rounded up so clients never retry early.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}
