use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{EnqueueOptions, Job};
use crate::services::queue::QueueError;

/// Request body for submitting a job.
#[derive(Debug, Deserialize, Validate)]
pub struct EnqueueRequest {
    #[garde(length(min = 1, max = 100))]
    pub queue_name: String,

    #[garde(length(min = 1, max = 100))]
    pub job_type: String,

    #[garde(skip)]
    pub organization_id: Uuid,

    #[garde(skip)]
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Map<String, serde_json::Value>,

    #[garde(skip)]
    #[serde(default)]
    pub priority: Option<i32>,

    #[garde(skip)]
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

fn empty_payload() -> serde_json::Map<String, serde_json::Value> {
    serde_json::Map::new()
}

/// POST /api/v1/jobs: enqueue a job for asynchronous processing.
pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(body): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    body.validate()
        .map_err(|report| ApiError::Validation(report.to_string()))?;

    let job = state
        .queue
        .enqueue(
            &body.queue_name,
            &body.job_type,
            body.organization_id,
            &body.payload,
            EnqueueOptions {
                priority: body.priority,
                max_attempts: body.max_attempts,
            },
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/v1/jobs/{job_id}: poll a job's status and result.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = state.queue.get_job(job_id).await?;
    Ok(Json(job))
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("internal error")]
    Internal,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Validation(e) => ApiError::Validation(e.to_string()),
            QueueError::NotFound(id) => ApiError::NotFound(id),
            other => {
                tracing::error!(error = %other, "Queue operation failed");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::NewJobError;

    #[test]
    fn queue_errors_map_to_http_statuses() {
        let missing = Uuid::new_v4();
        let resp = ApiError::from(QueueError::NotFound(missing)).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = ApiError::from(QueueError::Validation(NewJobError::EmptyJobType)).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = ApiError::from(QueueError::Mapping("bad row".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn request_validation_rejects_blank_queue() {
        let body: EnqueueRequest = serde_json::from_value(serde_json::json!({
            "queue_name": "",
            "job_type": "analyze_photo",
            "organization_id": Uuid::new_v4(),
            "payload": {"photo_id": Uuid::new_v4()},
        }))
        .unwrap();
        assert!(body.validate().is_err());
    }

    #[test]
    fn request_defaults_optional_fields() {
        let body: EnqueueRequest = serde_json::from_value(serde_json::json!({
            "queue_name": "photo_analysis",
            "job_type": "analyze_photo",
            "organization_id": Uuid::new_v4(),
        }))
        .unwrap();
        assert!(body.validate().is_ok());
        assert!(body.payload.is_empty());
        assert!(body.priority.is_none());
    }
}
