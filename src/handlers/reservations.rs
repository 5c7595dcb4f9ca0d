use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::queries::{self, ReservationFilter};
use crate::errors::AppError;
use crate::handlers::admin::check_auth;
use crate::models::{RequesterRole, RescheduleHistoryEntry, Reservation, ReservationStatus};
use crate::services::booking::{self, NewReservation};
use crate::services::lifecycle::{self, Actor, LifecycleEvent};
use crate::services::rescheduling::{self, RescheduleRequest};
use crate::state::AppState;

const DEFAULT_USER_CANCEL_REASON: &str = "cancelled by customer";

// POST /api/reservations
pub async fn create_reservation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewReservation>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    let reservation = booking::create_reservation(&state, req).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

// GET /api/reservations?shop_id=&customer_id=&status=&date=&limit=
#[derive(Deserialize)]
pub struct ListQuery {
    pub shop_id: Option<String>,
    pub customer_id: Option<String>,
    pub status: Option<String>,
    pub date: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_reservations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Reservation>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(|s| ReservationStatus::parse(s).ok_or_else(|| AppError::validation(format!("unknown status {s}"))))
        .transpose()?;
    let date = query
        .date
        .as_deref()
        .map(|d| {
            NaiveDate::parse_from_str(d, queries::DATE_FORMAT)
                .map_err(|_| AppError::validation(format!("invalid date (expected YYYY-MM-DD): {d}")))
        })
        .transpose()?;

    let filter = ReservationFilter {
        shop_id: query.shop_id,
        customer_id: query.customer_id,
        status,
        date,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let reservations = {
        let db = state.lock_db()?;
        queries::list_reservations(&db, &filter, limit)?
    };
    Ok(Json(reservations))
}

// GET /api/reservations/:id
#[derive(Serialize)]
pub struct ReservationDetail {
    #[serde(flatten)]
    reservation: Reservation,
    reschedule_history: Vec<RescheduleHistoryEntry>,
}

pub async fn get_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationDetail>, AppError> {
    let (reservation, reschedule_history) = {
        let db = state.lock_db()?;
        let reservation = queries::get_reservation(&db, &id)?
            .ok_or_else(|| AppError::NotFound(format!("reservation {id}")))?;
        (reservation, queries::list_history(&db, &id)?)
    };
    Ok(Json(ReservationDetail {
        reservation,
        reschedule_history,
    }))
}

// POST /api/reservations/:id/confirm
#[derive(Deserialize)]
pub struct ShopActionRequest {
    pub shop_id: String,
}

pub async fn confirm_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ShopActionRequest>,
) -> Result<Json<Reservation>, AppError> {
    let actor = Actor::Shop(req.shop_id);
    let reservation = lifecycle::apply(&state, &id, LifecycleEvent::ShopConfirm, &actor, None).await?;
    Ok(Json(reservation))
}

// POST /api/reservations/:id/complete
pub async fn complete_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ShopActionRequest>,
) -> Result<Json<Reservation>, AppError> {
    let actor = Actor::Shop(req.shop_id);
    let reservation = lifecycle::apply(&state, &id, LifecycleEvent::Complete, &actor, None).await?;
    Ok(Json(reservation))
}

// POST /api/reservations/:id/cancel
#[derive(Deserialize)]
pub struct CancelRequest {
    pub actor: Actor,
    pub reason: Option<String>,
}

pub async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Reservation>, AppError> {
    let (event, reason) = match &req.actor {
        Actor::User(_) => (
            LifecycleEvent::UserCancel,
            req.reason
                .filter(|r| !r.trim().is_empty())
                .or_else(|| Some(DEFAULT_USER_CANCEL_REASON.to_string())),
        ),
        Actor::Shop(_) => (LifecycleEvent::ShopCancel, req.reason),
        Actor::Admin(_) | Actor::System => {
            return Err(AppError::validation(
                "admins cancel through the conflict resolution or bulk status endpoints",
            ))
        }
    };

    let reservation = lifecycle::apply(&state, &id, event, &req.actor, reason.as_deref()).await?;
    Ok(Json(reservation))
}

// POST /api/reservations/:id/reschedule
pub async fn reschedule_reservation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<RescheduleHistoryEntry>, AppError> {
    if req.requester_role == RequesterRole::Admin {
        check_auth(&headers, &state.config.admin_token)?;
    }
    let entry = rescheduling::reschedule(&state, &id, req).await?;
    Ok(Json(entry))
}
