use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Json,
};
use metrics::counter;
use tracing::info;

use job_tracker_core::{Application, ApplicationPatch, NewApplication};

use crate::problem::ApiError;
use crate::router::AppState;

type ApiResult<T> = Result<T, ApiError>;

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<NewApplication>, JsonRejection>,
) -> ApiResult<Json<Application>> {
    observe("create", create_application(&state, payload).await)
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Application>>> {
    observe("list", list_applications(&state).await)
}

pub async fn get(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Application>> {
    observe("get", get_application(&state, id).await)
}

pub async fn update(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ApplicationPatch>, JsonRejection>,
) -> ApiResult<Json<Application>> {
    observe("update", update_application(&state, id, payload).await)
}

pub async fn delete(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<StatusCode> {
    observe("delete", delete_application(&state, id).await)
}

async fn create_application(
    state: &AppState,
    payload: Result<Json<NewApplication>, JsonRejection>,
) -> ApiResult<Json<Application>> {
    let Json(payload) = payload?;
    let record = payload.validate()?;

    let created = state
        .storage()
        .applications()
        .insert(&record, state.now())
        .await?;

    info!(stage = "api", id = created.id, company = %created.company, "application created");
    Ok(Json(created))
}

async fn list_applications(state: &AppState) -> ApiResult<Json<Vec<Application>>> {
    let applications = state.storage().applications().list().await?;
    Ok(Json(applications))
}

async fn get_application(
    state: &AppState,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Application>> {
    let Path(id) = id?;
    state
        .storage()
        .applications()
        .get(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn update_application(
    state: &AppState,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ApplicationPatch>, JsonRejection>,
) -> ApiResult<Json<Application>> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let patch = payload.validate()?;

    let updated = state
        .storage()
        .applications()
        .update(id, patch)
        .await?
        .ok_or(ApiError::NotFound)?;

    info!(stage = "api", id, status = %updated.status, "application updated");
    Ok(Json(updated))
}

async fn delete_application(
    state: &AppState,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    if !state.storage().applications().delete(id).await? {
        return Err(ApiError::NotFound);
    }

    info!(stage = "api", id, "application deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn observe<T>(op: &'static str, result: ApiResult<T>) -> ApiResult<T> {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(err) => err.metric_label(),
    };
    counter!("api_requests_total", "op" => op, "result" => outcome).increment(1);
    result
}
