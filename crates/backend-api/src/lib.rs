//! HTTP task service: document submission, status polling, and paged result
//! retrieval, backed by the in-memory task store and result cache.

mod cache;
mod error;
mod process;
mod state;
mod tasks;

pub mod routes;

pub use cache::{bundle_fingerprint, document_digest, ResultCache};
pub use error::ApiError;
pub use process::{ChatProcessor, ProcessError, ProcessOutcome, ProcessUseCase};
pub use state::AppState;
pub use tasks::{Task, TaskNotFound, TaskStatus, TaskStore};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let max_upload = state.config().server.max_upload_size_bytes();
    let request_timeout = state.config().server.read_timeout();

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/process", post(routes::process::submit_documents))
        .route("/api/v1/tasks/:task_id", get(routes::tasks::task_status))
        .route(
            "/api/v1/tasks/:task_id/result",
            get(routes::tasks::task_result),
        )
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
