use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{EventKind, Reservation, ReservationStatus};
use crate::state::AppState;

use super::events;

/// Who is asking for a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "lowercase")]
pub enum Actor {
    User(String),
    Shop(String),
    Admin(String),
    /// Scheduled automation; never reachable from a request.
    #[serde(skip)]
    System,
}

impl Actor {
    pub fn role(&self) -> &'static str {
        match self {
            Actor::User(_) => "user",
            Actor::Shop(_) => "shop",
            Actor::Admin(_) => "admin",
            Actor::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    ShopConfirm,
    UserCancel,
    ShopCancel,
    Complete,
    MarkNoShow,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::ShopConfirm => "confirm",
            LifecycleEvent::UserCancel => "cancel (user)",
            LifecycleEvent::ShopCancel => "cancel (shop)",
            LifecycleEvent::Complete => "complete",
            LifecycleEvent::MarkNoShow => "mark as no-show",
        }
    }

    fn target(&self) -> ReservationStatus {
        match self {
            LifecycleEvent::ShopConfirm => ReservationStatus::Confirmed,
            LifecycleEvent::UserCancel => ReservationStatus::CancelledByUser,
            LifecycleEvent::ShopCancel => ReservationStatus::CancelledByShop,
            LifecycleEvent::Complete => ReservationStatus::Completed,
            LifecycleEvent::MarkNoShow => ReservationStatus::NoShow,
        }
    }

    fn requires_reason(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::UserCancel | LifecycleEvent::ShopCancel | LifecycleEvent::MarkNoShow
        )
    }
}

/// The transition table. Pure so it can be checked without a store.
pub fn next_status(
    reservation: &Reservation,
    event: LifecycleEvent,
    actor: &Actor,
    reason: Option<&str>,
    now: NaiveDateTime,
) -> Result<ReservationStatus, AppError> {
    let from = reservation.status;
    let deny = |detail: &str| AppError::invalid_transition(from, event.as_str(), detail);

    let allowed_from = match event {
        LifecycleEvent::ShopConfirm => from == ReservationStatus::Requested,
        LifecycleEvent::UserCancel | LifecycleEvent::ShopCancel => from.is_active(),
        LifecycleEvent::Complete | LifecycleEvent::MarkNoShow => from == ReservationStatus::Confirmed,
    };
    if !allowed_from {
        return Err(deny("not allowed from this status"));
    }

    match (event, actor) {
        (LifecycleEvent::ShopConfirm, Actor::Shop(id)) | (LifecycleEvent::ShopCancel, Actor::Shop(id))
        | (LifecycleEvent::Complete, Actor::Shop(id))
            if id != &reservation.shop_id =>
        {
            return Err(deny("shop does not own this reservation"));
        }
        (LifecycleEvent::UserCancel, Actor::User(id)) if id != &reservation.customer_id => {
            return Err(deny("customer does not own this reservation"));
        }
        (LifecycleEvent::ShopConfirm, Actor::Shop(_) | Actor::Admin(_))
        | (LifecycleEvent::UserCancel, Actor::User(_) | Actor::Admin(_))
        | (LifecycleEvent::ShopCancel, Actor::Shop(_) | Actor::Admin(_) | Actor::System)
        | (LifecycleEvent::Complete, Actor::Shop(_) | Actor::Admin(_))
        | (LifecycleEvent::MarkNoShow, Actor::System) => {}
        _ => return Err(deny(&format!("{} may not do this", actor.role()))),
    }

    let has_reason = reason.is_some_and(|r| !r.trim().is_empty());
    if event.requires_reason() && !has_reason {
        return Err(deny("a reason is required"));
    }

    match event {
        LifecycleEvent::ShopConfirm if !reservation.payment_state.deposit_settled() => {
            return Err(deny("deposit has not been captured"));
        }
        LifecycleEvent::UserCancel if now >= reservation.start() => {
            return Err(deny("reservation time has passed"));
        }
        // admins may force-complete ahead of the slot
        LifecycleEvent::Complete if now < reservation.start() && !matches!(actor, Actor::Admin(_)) => {
            return Err(deny("reservation time has not been reached"));
        }
        LifecycleEvent::MarkNoShow if now < reservation.end() => {
            return Err(deny("reservation has not ended"));
        }
        _ => {}
    }

    Ok(event.target())
}

#[derive(Debug)]
pub enum TransitionOutcome {
    Applied(Reservation),
    /// Another writer moved the row first; nothing was written.
    AlreadyMoved,
}

/// Checks and applies `event` to an already loaded reservation, persisting with
/// a compare-and-set on its current status.
pub async fn apply_to(
    state: &AppState,
    reservation: &Reservation,
    event: LifecycleEvent,
    actor: &Actor,
    reason: Option<&str>,
) -> Result<TransitionOutcome, AppError> {
    let now = state.clock.now();
    let next = match next_status(reservation, event, actor, reason, now) {
        Ok(next) => next,
        Err(e) => {
            tracing::warn!(
                reservation_id = %reservation.id,
                from = reservation.status.as_str(),
                event = event.as_str(),
                actor = actor.role(),
                error = %e,
                "rejected state transition"
            );
            return Err(e);
        }
    };

    let stored_reason = if event.requires_reason() {
        reason.map(str::trim)
    } else {
        None
    };

    let updated = {
        let db = state.lock_db()?;
        if !queries::update_status(&db, reservation, next, stored_reason, &now)? {
            None
        } else {
            queries::get_reservation(&db, &reservation.id)?
        }
    };
    let Some(updated) = updated else {
        return Ok(TransitionOutcome::AlreadyMoved);
    };

    tracing::info!(
        reservation_id = %updated.id,
        from = reservation.status.as_str(),
        to = next.as_str(),
        actor = actor.role(),
        "reservation transitioned"
    );

    let updated = events::publish(state, EventKind::entering(next), updated).await;
    Ok(TransitionOutcome::Applied(updated))
}

/// Loads and transitions one reservation. A concurrent move surfaces as an
/// invalid transition from whatever status the row holds now.
pub async fn apply(
    state: &AppState,
    reservation_id: &str,
    event: LifecycleEvent,
    actor: &Actor,
    reason: Option<&str>,
) -> Result<Reservation, AppError> {
    let current = load(state, reservation_id)?;
    match apply_to(state, &current, event, actor, reason).await? {
        TransitionOutcome::Applied(r) => Ok(r),
        TransitionOutcome::AlreadyMoved => {
            let now_status = load(state, reservation_id)?.status;
            Err(AppError::invalid_transition(
                now_status,
                event.as_str(),
                "reservation changed concurrently",
            ))
        }
    }
}

fn load(state: &AppState, reservation_id: &str) -> Result<Reservation, AppError> {
    let db = state.lock_db()?;
    queries::get_reservation(&db, reservation_id)?
        .ok_or_else(|| AppError::NotFound(format!("reservation {reservation_id}")))
}

#[derive(Debug, Serialize)]
pub struct BulkResult {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReservationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Applies one event to many reservations. Each id succeeds or fails on its own.
pub async fn bulk_apply(
    state: &AppState,
    ids: &[String],
    event: LifecycleEvent,
    actor: &Actor,
    reason: Option<&str>,
) -> Vec<BulkResult> {
    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
        let result = match apply(state, id, event, actor, reason).await {
            Ok(r) => BulkResult {
                id: id.clone(),
                ok: true,
                status: Some(r.status),
                error: None,
            },
            Err(e) => BulkResult {
                id: id.clone(),
                ok: false,
                status: None,
                error: Some(e.to_string()),
            },
        };
        results.push(result);
    }
    results
}
