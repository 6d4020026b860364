//! REST endpoints for leads, inbound messages and the follow-up flow.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Local, NaiveDate};
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::FollowupError;
use crate::followup::{
    FollowupSweep, InboundMessage, LeadService, LeadUpdate, MessageIngest, NewLead, StageCache,
};

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub leads: Arc<LeadService>,
    pub stages: Arc<StageCache>,
    pub sweep: Arc<FollowupSweep>,
    pub ingest: Arc<MessageIngest>,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn error_json(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

fn followup_error(e: FollowupError) -> Response {
    let status = match &e {
        FollowupError::SweepInProgress => StatusCode::CONFLICT,
        FollowupError::StageNotFound { .. } => StatusCode::SERVICE_UNAVAILABLE,
        FollowupError::Delivery(_) | FollowupError::Database(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    tracing::error!(error = %e, "Follow-up request failed");
    error_json(status, e)
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// POST /api/stages/refresh
async fn refresh_stages(State(state): State<ApiState>) -> Response {
    state.stages.invalidate().await;
    match state.stages.warm().await {
        Ok(missing) => {
            let missing: Vec<_> = missing.iter().map(|r| r.as_str()).collect();
            Json(json!({ "refreshed": true, "missing": missing })).into_response()
        }
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// POST /api/leads
async fn create_lead(State(state): State<ApiState>, Json(new): Json<NewLead>) -> Response {
    if new.name.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "name is required");
    }
    match state.leads.create(&new, today()).await {
        Ok(lead) => (StatusCode::CREATED, Json(lead)).into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// GET /api/leads/{id}
async fn get_lead(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Response {
    match state.leads.get(id).await {
        Ok(Some(lead)) => Json(lead).into_response(),
        Ok(None) => error_json(StatusCode::NOT_FOUND, format!("Lead {id} not found")),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// PATCH /api/leads/{id}
async fn update_lead(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(update): Json<LeadUpdate>,
) -> Response {
    if update.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "no fields to update");
    }
    match state.leads.write(id, &update, today()).await {
        Ok(Some(lead)) => Json(lead).into_response(),
        Ok(None) => error_json(StatusCode::NOT_FOUND, format!("Lead {id} not found")),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// POST /api/messages
///
/// Stores the message and runs re-engagement. Only a storage failure fails
/// the request.
async fn ingest_message(
    State(state): State<ApiState>,
    Json(message): Json<InboundMessage>,
) -> Response {
    match state.ingest.ingest(&message, today()).await {
        Ok(reengaged) => (
            StatusCode::CREATED,
            Json(json!({ "id": message.id, "reengaged": reengaged })),
        )
            .into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// POST /api/followup/sweep
async fn run_sweep(State(state): State<ApiState>) -> Response {
    match state.sweep.run(today()).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => followup_error(e),
    }
}

/// POST /api/followup/backfill
async fn backfill(State(state): State<ApiState>) -> Response {
    match state.sweep.set_entry_date_today(today()).await {
        Ok(notice) => Json(notice).into_response(),
        Err(e) => followup_error(e),
    }
}

/// GET /api/followup/cold-leads
async fn cold_leads(State(state): State<ApiState>) -> Response {
    match state.sweep.cold_leads().await {
        Ok(leads) => Json(json!({ "count": leads.len(), "leads": leads })).into_response(),
        Err(e) => followup_error(e),
    }
}

/// Build the API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/stages/refresh", post(refresh_stages))
        .route("/api/leads", post(create_lead))
        .route("/api/leads/{id}", get(get_lead).patch(update_lead))
        .route("/api/messages", post(ingest_message))
        .route("/api/followup/sweep", post(run_sweep))
        .route("/api/followup/backfill", post(backfill))
        .route("/api/followup/cold-leads", get(cold_leads))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
