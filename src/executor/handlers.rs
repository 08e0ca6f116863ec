use super::protocol::*;
use super::service::QueryService;
use crate::error::ExecutorError;
use crate::notification::http::NOTIFY_PATH;
use crate::notification::local::NotificationHub;
use crate::notification::types::QueryTaskNotification;
use crate::query::types::{Method, QueryDefinition, QueryId, TaskId};

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use std::sync::Arc;
use std::time::Duration;

/// Error body plus the status code its kind maps to.
pub struct ApiError(pub ExecutorError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ExecutorError::UnknownQuery(_)
            | ExecutorError::UnknownTask(_)
            | ExecutorError::UnknownQueryLogic(_)
            | ExecutorError::PoolUnknown(_) => StatusCode::NOT_FOUND,
            ExecutorError::QueryClosed(_) | ExecutorError::Interrupted => StatusCode::CONFLICT,
            ExecutorError::PoolExhausted { .. }
            | ExecutorError::LockTimeout(_)
            | ExecutorError::NoEligibleDirectory => StatusCode::SERVICE_UNAVAILABLE,
            ExecutorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ExecutorError::ClaimCheckFetchFailed { .. } | ExecutorError::CollaboratorFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            ExecutorError::StoreReadFailed(_)
            | ExecutorError::StoreWriteFailed(_)
            | ExecutorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ExecutorError> for ApiError {
    fn from(err: ExecutorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }
        let body = ErrorResponse {
            code: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// All executor routes, including the peer notification endpoint.
pub fn router(service: Arc<QueryService>, hub: Arc<NotificationHub>) -> Router {
    Router::new()
        .route(ENDPOINT_CREATE, post(handle_create))
        .route(ENDPOINT_RESULTS, get(handle_results))
        .route(ENDPOINT_METHOD, post(handle_method))
        .route(ENDPOINT_STATUS, get(handle_status))
        .route(ENDPOINT_TASK, get(handle_task))
        .route(ENDPOINT_POOLS, get(handle_pools))
        .route(ENDPOINT_LOGICS, get(handle_logics))
        .route(NOTIFY_PATH, post(handle_notify))
        .layer(Extension(service))
        .layer(Extension(hub))
}

pub async fn handle_create(
    Extension(service): Extension<Arc<QueryService>>,
    Json(definition): Json<QueryDefinition>,
) -> ApiResult<CreateQueryResponse> {
    let (query_id, task_id) = service.create(definition).await?;
    Ok(Json(CreateQueryResponse { query_id, task_id }))
}

pub async fn handle_method(
    Extension(service): Extension<Arc<QueryService>>,
    Path((id, method)): Path<(String, String)>,
) -> ApiResult<MethodResponse> {
    let query_id = QueryId(id);
    let method = Method::parse(&method)
        .ok_or_else(|| ExecutorError::InvalidRequest(format!("unknown method: {}", method)))?;

    let mut response = MethodResponse {
        query_id: Some(query_id.clone()),
        method: Some(method),
        ..MethodResponse::default()
    };

    match method {
        Method::Plan => {
            response.plan = Some(service.plan(&query_id).await?);
        }
        Method::Predict => {
            response.predictions = Some(service.predict(&query_id).await?);
        }
        Method::Create => {
            return Err(ExecutorError::InvalidRequest(format!(
                "use {} to create a query",
                ENDPOINT_CREATE
            ))
            .into());
        }
        Method::Next | Method::Cancel | Method::Close => {
            match service.submit(&query_id, method).await? {
                Some(task_id) => response.task_id = Some(task_id),
                None => response.already_terminal = true,
            }
        }
    }

    Ok(Json(response))
}

pub async fn handle_status(
    Extension(service): Extension<Arc<QueryService>>,
    Path(id): Path<String>,
) -> ApiResult<QueryStatusResponse> {
    let status = service.status(&QueryId(id)).await?;
    Ok(Json(QueryStatusResponse { status }))
}

pub async fn handle_results(
    Extension(service): Extension<Arc<QueryService>>,
    Path(id): Path<String>,
    Query(params): Query<ResultsParams>,
) -> ApiResult<ResultsResponse> {
    let query_id = QueryId(id);
    let (page, finished) = service
        .next_page(&query_id, Duration::from_millis(params.timeout_ms))
        .await?;
    Ok(Json(ResultsResponse {
        query_id,
        page,
        finished,
    }))
}

pub async fn handle_task(
    Extension(service): Extension<Arc<QueryService>>,
    Path(id): Path<String>,
) -> ApiResult<TaskStatusResponse> {
    let task_id = TaskId(id);
    let task = service
        .task(&task_id)?
        .ok_or_else(|| ExecutorError::UnknownTask(task_id.to_string()))?;
    Ok(Json(TaskStatusResponse { task }))
}

pub async fn handle_pools(
    Extension(service): Extension<Arc<QueryService>>,
) -> Json<PoolsResponse> {
    let pools = service.executor().pools();
    Json(PoolsResponse {
        default_pool: pools.default_pool().to_string(),
        pools: pools.pools(),
    })
}

pub async fn handle_logics(Extension(service): Extension<Arc<QueryService>>) -> Json<Vec<String>> {
    Json(service.executor().logics().list_logics())
}

/// Peers push their notifications here; they fan out to this node's subscribers.
pub async fn handle_notify(
    Extension(hub): Extension<Arc<NotificationHub>>,
    Json(notification): Json<QueryTaskNotification>,
) -> StatusCode {
    tracing::trace!("Peer notification {} from {}", notification.request, notification.origin_id);
    if hub.inject(notification) == 0 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}
