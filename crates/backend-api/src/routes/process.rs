use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::tasks::TaskStatus;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

/// Accepts a multipart upload (repeated `files` fields), registers a pending
/// task, and hands the bundle to a detached worker. Responds immediately
/// with the task id.
pub async fn submit_documents(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let mut documents: Vec<Bytes> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("invalid multipart payload"))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|_| ApiError::internal("failed to read uploaded file"))?;
        documents.push(data);
    }

    if documents.is_empty() {
        return Err(ApiError::bad_request("no files provided"));
    }

    let task_id = Uuid::new_v4().to_string();
    state
        .tasks()
        .create(&task_id, state.config().processing.task_ttl());
    info!(task_id = %task_id, files = documents.len(), "accepted processing task");

    let tasks = state.tasks().clone();
    let processor = state.processor();
    let worker_task_id = task_id.clone();
    tokio::spawn(async move {
        let _ = tasks.set_status(&worker_task_id, TaskStatus::Processing);

        match processor.process(&documents).await {
            Ok(outcome) => {
                // Partial results still complete the task; an empty result
                // with an error does not.
                if outcome.users.is_empty() && outcome.warning.is_some() {
                    let warning = outcome.warning.unwrap_or_default();
                    error!(task_id = %worker_task_id, warning = %warning, "task produced no users");
                    let _ = tasks.set_error(&worker_task_id, warning);
                } else {
                    info!(
                        task_id = %worker_task_id,
                        users = outcome.users.len(),
                        partial = outcome.warning.is_some(),
                        "task completed"
                    );
                    let _ = tasks.set_result(&worker_task_id, outcome.users, outcome.warning);
                }
            }
            Err(err) => {
                error!(task_id = %worker_task_id, error = %err, "task failed");
                let _ = tasks.set_error(&worker_task_id, err.to_string());
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_id })))
}
