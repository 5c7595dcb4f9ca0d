use std::sync::Arc;

use crate::db::queries;
use crate::models::{EventKind, Reservation, ReservationEvent};
use crate::state::AppState;

use super::payments;

/// Fans a committed change out to the payment coupler, the notifier and live
/// subscribers. Returns the reservation as it stands after payment follow-up.
///
/// Nothing here can undo the change that was committed; failures are logged.
pub async fn publish(state: &AppState, kind: EventKind, mut reservation: Reservation) -> Reservation {
    if let Some(next) = payments::on_event(state, kind, &reservation).await {
        if next != reservation.payment_state {
            let now = state.clock.now();
            let persisted = state
                .lock_db()
                .map_err(anyhow::Error::from)
                .and_then(|db| queries::set_payment_state(&db, &reservation.id, next, &now));
            match persisted {
                Ok(_) => {
                    reservation.payment_state = next;
                    reservation.updated_at = now;
                }
                Err(e) => tracing::error!(
                    reservation_id = %reservation.id,
                    payment_state = next.as_str(),
                    error = %e,
                    "failed to record payment state"
                ),
            }
        }
    }

    let notifier = Arc::clone(&state.notifier);
    let reservation_id = reservation.id.clone();
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(kind, &reservation_id).await {
            tracing::warn!(reservation_id = %reservation_id, event = kind.as_str(), error = %e, "notification failed");
        }
    });

    // No receivers is fine
    let _ = state.events_tx.send(ReservationEvent {
        kind,
        reservation: reservation.clone(),
        at: state.clock.now(),
    });

    reservation
}
