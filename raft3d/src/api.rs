//! HTTP API in front of a [`Node`].
//!
//! Request-shape validation and admission checks (duplicate ids, dangling
//! references, filament budget) live here; the state machine only enforces
//! its own invariants.

use std::sync::Arc;

use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::command::{Command, StatusUpdate};
use crate::metrics::Metrics;
use crate::model::{Filament, JobStatus, PrintJob, Printer};
use crate::node::Node;

#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<Node>,
    pub metrics: Metrics,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/printers", post(create_printer).get(list_printers))
        .route(
            "/api/v1/filaments",
            post(create_filament).get(list_filaments),
        )
        .route(
            "/api/v1/print_jobs",
            post(create_print_job).get(list_print_jobs),
        )
        .route(
            "/api/v1/print_jobs/:job_id/status",
            post(update_print_job_status),
        )
        .route("/metrics", get(metrics))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            count_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn count_requests(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    state
        .metrics
        .inc_requests(request.method().as_str(), &endpoint);
    next.run(request).await
}

/// An error response carrying `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    fn unprocessable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, detail)
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn create_printer(
    State(state): State<ApiState>,
    Json(printer): Json<Printer>,
) -> ApiResult<Printer> {
    if state.node.printers().contains_key(&printer.id) {
        return Err(ApiError::bad_request("Printer ID already exists"));
    }
    let command = Command::AddPrinter(printer.clone());
    if !state.node.apply_command(&command) {
        return Err(ApiError::internal("Failed to create printer"));
    }
    info!(id = %printer.id, "created printer");
    Ok(Json(printer))
}

async fn list_printers(State(state): State<ApiState>) -> Json<Vec<Printer>> {
    Json(state.node.printers().into_values().collect())
}

async fn create_filament(
    State(state): State<ApiState>,
    Json(filament): Json<Filament>,
) -> ApiResult<Filament> {
    if let Err(err) = filament.validate() {
        return Err(ApiError::unprocessable(err.to_string()));
    }
    if state.node.filaments().contains_key(&filament.id) {
        return Err(ApiError::bad_request("Filament ID already exists"));
    }
    let command = Command::AddFilament(filament.clone());
    if !state.node.apply_command(&command) {
        return Err(ApiError::internal("Failed to create filament"));
    }
    info!(id = %filament.id, "created filament");
    Ok(Json(filament))
}

async fn list_filaments(State(state): State<ApiState>) -> Json<Vec<Filament>> {
    Json(state.node.filaments().into_values().collect())
}

/// Body of `POST /print_jobs`. The status is always forced to `Queued`, so
/// clients may leave it out.
#[derive(Debug, Deserialize)]
struct NewPrintJob {
    id: String,
    printer_id: String,
    filament_id: String,
    filepath: String,
    #[serde(alias = "print_weight_in_grams")]
    print_weight: u64,
}

async fn create_print_job(
    State(state): State<ApiState>,
    Json(request): Json<NewPrintJob>,
) -> ApiResult<PrintJob> {
    let job = PrintJob {
        id: request.id,
        printer_id: request.printer_id,
        filament_id: request.filament_id,
        filepath: request.filepath,
        print_weight: request.print_weight,
        status: JobStatus::Queued,
    };

    state.node.fsm().read(|fleet| {
        if fleet.print_jobs.contains_key(&job.id) {
            return Err(ApiError::bad_request("Print job ID already exists"));
        }
        if !fleet.printers.contains_key(&job.printer_id) {
            return Err(ApiError::bad_request("Invalid printer ID"));
        }
        let Some(filament) = fleet.filaments.get(&job.filament_id) else {
            return Err(ApiError::bad_request("Invalid filament ID"));
        };
        let reserved: u64 = fleet
            .print_jobs
            .values()
            .filter(|other| other.filament_id == job.filament_id && other.status.is_active())
            .map(|other| other.print_weight)
            .sum();
        if job.print_weight > filament.remaining_weight.saturating_sub(reserved) {
            return Err(ApiError::bad_request("Insufficient filament weight"));
        }
        Ok(())
    })?;

    let command = Command::AddPrintJob(job.clone());
    if !state.node.apply_command(&command) {
        return Err(ApiError::internal("Failed to create print job"));
    }
    info!(id = %job.id, "created print job");
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
struct StatusFilter {
    status: Option<String>,
}

async fn list_print_jobs(
    State(state): State<ApiState>,
    Query(filter): Query<StatusFilter>,
) -> Json<Vec<PrintJob>> {
    let jobs = match filter.status.as_deref().filter(|s| !s.is_empty()) {
        None => state.node.print_jobs(None),
        Some(raw) => match raw.parse::<JobStatus>() {
            Ok(status) => state.node.print_jobs(Some(status)),
            // No job can carry a status that does not exist.
            Err(_) => Default::default(),
        },
    };
    Json(jobs.into_values().collect())
}

/// Query of `POST /print_jobs/:job_id/status`. A missing `status` is a
/// validation failure (422), an unknown one a bad request (400).
#[derive(Debug, Deserialize)]
struct NewStatus {
    status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusChanged {
    pub job_id: String,
    pub status: JobStatus,
}

async fn update_print_job_status(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Query(NewStatus { status }): Query<NewStatus>,
) -> ApiResult<StatusChanged> {
    let Some(status) = status else {
        return Err(ApiError::unprocessable("Missing status query parameter"));
    };
    if !state.node.print_jobs(None).contains_key(&job_id) {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Print job not found"));
    }
    let status = match status.parse::<JobStatus>() {
        Ok(status) if status != JobStatus::Queued => status,
        _ => return Err(ApiError::bad_request("Invalid status")),
    };

    let command = Command::UpdatePrintJobStatus(StatusUpdate {
        job_id: job_id.clone(),
        status,
    });
    if !state.node.apply_command(&command) {
        return Err(ApiError::internal("Failed to update print job status"));
    }
    info!(%job_id, %status, "updated print job status");
    Ok(Json(StatusChanged { job_id, status }))
}

async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus_text(),
    )
}
