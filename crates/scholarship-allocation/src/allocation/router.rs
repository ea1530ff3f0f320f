use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{ApplicantId, ApplicationId, ReviewAction, ReviewerId, ScholarshipId};
use super::engine::{AllocationEngine, AllocationError};
use super::lifecycle::TransitionError;
use super::repository::{AllocationStore, NotificationSink, ProfileDirectory};
use super::views::{ApplicationView, DecisionView, SlotView, SubmissionView};

type SharedEngine<S, P, N> = Arc<AllocationEngine<S, P, N>>;

#[derive(Debug, Deserialize)]
pub(crate) struct ApplicantRequest {
    pub applicant_id: ApplicantId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecisionRequest {
    pub action: ReviewAction,
    pub reviewer_id: ReviewerId,
    #[serde(default)]
    pub comments: Option<String>,
}

/// Router exposing intake, review, withdrawal, and read endpoints.
pub fn allocation_router<S, P, N>(engine: SharedEngine<S, P, N>) -> Router
where
    S: AllocationStore,
    P: ProfileDirectory + 'static,
    N: NotificationSink + 'static,
{
    Router::new()
        .route(
            "/api/v1/scholarships/:scholarship_id/applications",
            post(submit_handler::<S, P, N>),
        )
        .route(
            "/api/v1/scholarships/:scholarship_id/drafts",
            post(draft_handler::<S, P, N>),
        )
        .route(
            "/api/v1/scholarships/:scholarship_id/slots",
            get(slots_handler::<S, P, N>),
        )
        .route(
            "/api/v1/scholarships/:scholarship_id/summary",
            get(summary_handler::<S, P, N>),
        )
        .route(
            "/api/v1/applications/:application_id",
            get(application_handler::<S, P, N>),
        )
        .route(
            "/api/v1/applications/:application_id/history",
            get(history_handler::<S, P, N>),
        )
        .route(
            "/api/v1/applications/:application_id/submit",
            post(submit_draft_handler::<S, P, N>),
        )
        .route(
            "/api/v1/applications/:application_id/decisions",
            post(decision_handler::<S, P, N>),
        )
        .route(
            "/api/v1/applications/:application_id/withdraw",
            post(withdraw_handler::<S, P, N>),
        )
        .with_state(engine)
}

pub(crate) async fn submit_handler<S, P, N>(
    State(engine): State<SharedEngine<S, P, N>>,
    Path(scholarship_id): Path<String>,
    Json(request): Json<ApplicantRequest>,
) -> Response
where
    S: AllocationStore,
    P: ProfileDirectory + 'static,
    N: NotificationSink + 'static,
{
    let scholarship_id = ScholarshipId(scholarship_id);
    match engine.submit_application(&request.applicant_id, &scholarship_id) {
        Ok(receipt) => (StatusCode::CREATED, Json(SubmissionView::from(&receipt))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn draft_handler<S, P, N>(
    State(engine): State<SharedEngine<S, P, N>>,
    Path(scholarship_id): Path<String>,
    Json(request): Json<ApplicantRequest>,
) -> Response
where
    S: AllocationStore,
    P: ProfileDirectory + 'static,
    N: NotificationSink + 'static,
{
    let scholarship_id = ScholarshipId(scholarship_id);
    match engine.create_draft(&request.applicant_id, &scholarship_id) {
        Ok(record) => (StatusCode::CREATED, Json(ApplicationView::from(&record))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn submit_draft_handler<S, P, N>(
    State(engine): State<SharedEngine<S, P, N>>,
    Path(application_id): Path<String>,
    Json(request): Json<ApplicantRequest>,
) -> Response
where
    S: AllocationStore,
    P: ProfileDirectory + 'static,
    N: NotificationSink + 'static,
{
    let id = ApplicationId(application_id);
    match engine.submit_draft(&id, &request.applicant_id) {
        Ok(receipt) => (StatusCode::OK, Json(SubmissionView::from(&receipt))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn decision_handler<S, P, N>(
    State(engine): State<SharedEngine<S, P, N>>,
    Path(application_id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Response
where
    S: AllocationStore,
    P: ProfileDirectory + 'static,
    N: NotificationSink + 'static,
{
    let id = ApplicationId(application_id);
    match engine.decide_application(&id, request.action, &request.reviewer_id, request.comments) {
        Ok(outcome) => (StatusCode::OK, Json(DecisionView::from(&outcome))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn withdraw_handler<S, P, N>(
    State(engine): State<SharedEngine<S, P, N>>,
    Path(application_id): Path<String>,
    Json(request): Json<ApplicantRequest>,
) -> Response
where
    S: AllocationStore,
    P: ProfileDirectory + 'static,
    N: NotificationSink + 'static,
{
    let id = ApplicationId(application_id);
    match engine.withdraw(&id, &request.applicant_id) {
        Ok(record) => (StatusCode::OK, Json(ApplicationView::from(&record))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn application_handler<S, P, N>(
    State(engine): State<SharedEngine<S, P, N>>,
    Path(application_id): Path<String>,
) -> Response
where
    S: AllocationStore,
    P: ProfileDirectory + 'static,
    N: NotificationSink + 'static,
{
    let id = ApplicationId(application_id);
    match engine.application(&id) {
        Ok(record) => (StatusCode::OK, Json(ApplicationView::from(&record))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn history_handler<S, P, N>(
    State(engine): State<SharedEngine<S, P, N>>,
    Path(application_id): Path<String>,
) -> Response
where
    S: AllocationStore,
    P: ProfileDirectory + 'static,
    N: NotificationSink + 'static,
{
    let id = ApplicationId(application_id);
    match engine.history(&id) {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn slots_handler<S, P, N>(
    State(engine): State<SharedEngine<S, P, N>>,
    Path(scholarship_id): Path<String>,
) -> Response
where
    S: AllocationStore,
    P: ProfileDirectory + 'static,
    N: NotificationSink + 'static,
{
    let id = ScholarshipId(scholarship_id);
    match engine.slot_availability(&id) {
        Ok(counter) => (StatusCode::OK, Json(SlotView::from(&counter))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn summary_handler<S, P, N>(
    State(engine): State<SharedEngine<S, P, N>>,
    Path(scholarship_id): Path<String>,
) -> Response
where
    S: AllocationStore,
    P: ProfileDirectory + 'static,
    N: NotificationSink + 'static,
{
    let id = ScholarshipId(scholarship_id);
    match engine.allocation_summary(&id) {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) fn status_for(error: &AllocationError) -> StatusCode {
    match error {
        AllocationError::ScholarshipNotOpen { .. }
        | AllocationError::WindowClosed { .. }
        | AllocationError::InvalidCriteria { .. }
        | AllocationError::EligibilityRejected { .. }
        | AllocationError::InvalidTransition(TransitionError::Ineligible) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AllocationError::DuplicateApplication { .. }
        | AllocationError::InvalidTransition(_)
        | AllocationError::StaleRecord(_) => StatusCode::CONFLICT,
        AllocationError::NotOwner { .. } => StatusCode::FORBIDDEN,
        AllocationError::ApplicationNotFound(_)
        | AllocationError::ScholarshipNotFound(_)
        | AllocationError::ApplicantNotFound(_) => StatusCode::NOT_FOUND,
        AllocationError::Slot(_) | AllocationError::Repository(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn error_response(error: AllocationError) -> Response {
    let status = status_for(&error);
    let mut payload = json!({
        "error": error.to_string(),
        "kind": error.kind(),
        "retryable": error.is_transient(),
    });
    match &error {
        AllocationError::EligibilityRejected { verdict } => {
            payload["verdict"] = json!(verdict);
        }
        AllocationError::InvalidCriteria { faults } => {
            payload["faults"] = json!(faults);
        }
        _ => {}
    }
    (status, Json(payload)).into_response()
}
