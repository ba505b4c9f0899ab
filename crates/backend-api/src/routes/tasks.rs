use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use roster_domain::User;

use crate::error::ApiError;
use crate::state::AppState;
use crate::tasks::TaskStatus;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub current_page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub pagination: Pagination,
    pub data: Vec<User>,
}

pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let task = state
        .tasks()
        .get(&task_id)
        .map_err(|_| ApiError::not_found("task not found"))?;

    Ok(Json(StatusResponse {
        task_id: task.id,
        status: task.status,
        error_message: task.error_message,
    }))
}

pub async fn task_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ResultResponse>, ApiError> {
    let task = state
        .tasks()
        .get(&task_id)
        .map_err(|_| ApiError::not_found("task not found"))?;

    if task.status != TaskStatus::Completed {
        return Err(ApiError::bad_request("task is not completed"));
    }

    let page = parse_positive(query.page.as_deref(), DEFAULT_PAGE);
    let page_size = parse_positive(query.page_size.as_deref(), DEFAULT_PAGE_SIZE);

    let total_items = task.result.len();
    let total_pages = if total_items > 0 {
        total_items.div_ceil(page_size)
    } else {
        0
    };

    // Out-of-range pages return an empty window with accurate totals.
    let start = (page - 1).saturating_mul(page_size).min(total_items);
    let end = start.saturating_add(page_size).min(total_items);
    let data = task.result[start..end].to_vec();

    Ok(Json(ResultResponse {
        pagination: Pagination {
            current_page: page,
            page_size,
            total_items,
            total_pages,
        },
        data,
    }))
}

/// Non-positive or unparsable values fall back to the default.
fn parse_positive(raw: Option<&str>, fallback: usize) -> usize {
    raw.and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .map(|value| value as usize)
        .unwrap_or(fallback)
}
