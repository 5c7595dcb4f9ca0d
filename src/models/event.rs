use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::reservation::{Reservation, ReservationStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Confirmed,
    CancelledByUser,
    CancelledByShop,
    Completed,
    NoShow,
    Rescheduled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "reservation_created",
            EventKind::Confirmed => "reservation_confirmed",
            EventKind::CancelledByUser => "reservation_cancelled_by_user",
            EventKind::CancelledByShop => "reservation_cancelled_by_shop",
            EventKind::Completed => "reservation_completed",
            EventKind::NoShow => "reservation_no_show",
            EventKind::Rescheduled => "reservation_rescheduled",
        }
    }

    /// The event emitted when a reservation enters `status`.
    pub fn entering(status: ReservationStatus) -> Self {
        match status {
            ReservationStatus::Requested => EventKind::Created,
            ReservationStatus::Confirmed => EventKind::Confirmed,
            ReservationStatus::Completed => EventKind::Completed,
            ReservationStatus::CancelledByUser => EventKind::CancelledByUser,
            ReservationStatus::CancelledByShop => EventKind::CancelledByShop,
            ReservationStatus::NoShow => EventKind::NoShow,
        }
    }
}

/// A committed change to a reservation, fanned out to the payment coupler,
/// the notifier and live subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationEvent {
    pub kind: EventKind,
    pub reservation: Reservation,
    pub at: NaiveDateTime,
}
