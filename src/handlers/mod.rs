pub mod admin;
pub mod events;
pub mod health;
pub mod reservations;
pub mod slots;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/shops/:shop_id/slots", get(slots::get_slots))
        .route(
            "/api/reservations",
            get(reservations::list_reservations).post(reservations::create_reservation),
        )
        .route("/api/reservations/:id", get(reservations::get_reservation))
        .route("/api/reservations/:id/confirm", post(reservations::confirm_reservation))
        .route("/api/reservations/:id/cancel", post(reservations::cancel_reservation))
        .route("/api/reservations/:id/complete", post(reservations::complete_reservation))
        .route("/api/reservations/:id/reschedule", post(reservations::reschedule_reservation))
        .route("/api/events", get(events::events_stream))
        .route(
            "/api/admin/reservations/:id/force-complete",
            post(admin::force_complete),
        )
        .route("/api/admin/reservations/bulk-status", post(admin::bulk_status))
        .route("/api/admin/conflicts", get(admin::get_conflicts))
        .route("/api/admin/conflicts/resolve", post(admin::resolve_conflict))
        .route("/api/admin/sweep", post(admin::run_sweep))
        .with_state(state)
}
