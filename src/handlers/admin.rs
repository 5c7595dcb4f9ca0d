use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::Reservation;
use crate::services::conflicts::{self, ConflictGroup};
use crate::services::lifecycle::{self, Actor, BulkResult, LifecycleEvent};
use crate::services::sweeper::{self, SweepStats};
use crate::state::AppState;

const ADMIN_ID: &str = "admin";

pub fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// POST /api/admin/reservations/:id/force-complete
pub async fn force_complete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Reservation>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let actor = Actor::Admin(ADMIN_ID.to_string());
    let reservation = lifecycle::apply(&state, &id, LifecycleEvent::Complete, &actor, None).await?;
    Ok(Json(reservation))
}

// POST /api/admin/reservations/bulk-status
#[derive(Deserialize)]
pub struct BulkStatusRequest {
    pub ids: Vec<String>,
    pub event: LifecycleEvent,
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct BulkStatusResponse {
    succeeded: usize,
    failed: usize,
    results: Vec<BulkResult>,
}

pub async fn bulk_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BulkStatusRequest>,
) -> Result<Json<BulkStatusResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if req.ids.is_empty() {
        return Err(AppError::validation("ids must not be empty"));
    }

    let actor = Actor::Admin(ADMIN_ID.to_string());
    let results = lifecycle::bulk_apply(&state, &req.ids, req.event, &actor, req.reason.as_deref()).await;
    let succeeded = results.iter().filter(|r| r.ok).count();

    Ok(Json(BulkStatusResponse {
        succeeded,
        failed: results.len() - succeeded,
        results,
    }))
}

// GET /api/admin/conflicts?shop_id=&date=
#[derive(Deserialize)]
pub struct ConflictsQuery {
    pub shop_id: String,
    pub date: String,
}

pub async fn get_conflicts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ConflictsQuery>,
) -> Result<Json<Vec<ConflictGroup>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let date = NaiveDate::parse_from_str(query.date.trim(), queries::DATE_FORMAT)
        .map_err(|_| AppError::validation(format!("invalid date (expected YYYY-MM-DD): {}", query.date)))?;

    let groups = {
        let db = state.lock_db()?;
        conflicts::shop_conflict_groups(
            &db,
            &query.shop_id,
            &date,
            &state.config.conflict_weights,
            state.clock.now(),
        )?
    };
    Ok(Json(groups))
}

// POST /api/admin/conflicts/resolve
#[derive(Deserialize)]
pub struct ResolveRequest {
    /// The reservation to cancel; the others in its group keep their slot.
    pub cancel_id: String,
    pub reason: String,
}

pub async fn resolve_conflict(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Reservation>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let overlapping = {
        let db = state.lock_db()?;
        let target = queries::get_reservation(&db, &req.cancel_id)?
            .ok_or_else(|| AppError::NotFound(format!("reservation {}", req.cancel_id)))?;
        conflicts::list_conflicts(
            &db,
            &target.shop_id,
            &target.date,
            &target.time,
            target.total_duration_minutes,
            Some(&target.id),
        )?
    };
    if overlapping.is_empty() {
        return Err(AppError::validation("reservation does not overlap any other reservation"));
    }

    let actor = Actor::Admin(ADMIN_ID.to_string());
    let reservation =
        lifecycle::apply(&state, &req.cancel_id, LifecycleEvent::ShopCancel, &actor, Some(&req.reason)).await?;
    tracing::info!(
        reservation_id = %reservation.id,
        kept = overlapping.len(),
        "conflict resolved"
    );
    Ok(Json(reservation))
}

// POST /api/admin/sweep
pub async fn run_sweep(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SweepStats>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let stats = sweeper::run_sweep(&state).await?;
    Ok(Json(stats))
}
