use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::hhmm;

pub const MAX_LINE_QUANTITY: u32 = 10;
pub const MAX_SPECIAL_REQUESTS_LEN: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub shop_id: String,
    pub customer_id: String,
    pub lines: Vec<ServiceLine>,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub total_duration_minutes: u32,
    pub total_amount: i64,
    pub deposit_amount: i64,
    pub points_applied: i64,
    pub status: ReservationStatus,
    pub payment_state: PaymentState,
    pub special_requests: Option<String>,
    pub reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Reservation {
    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn end(&self) -> NaiveDateTime {
        self.start() + chrono::Duration::minutes(self.total_duration_minutes as i64)
    }

    /// What the customer still owes after the deposit and points.
    pub fn balance_due(&self) -> i64 {
        self.total_amount - self.deposit_amount - self.points_applied
    }

    /// Share of the total already collected, used to rank conflicting bookings.
    pub fn payment_fraction(&self) -> f64 {
        if self.total_amount <= 0 {
            return 1.0;
        }
        let collected = match self.payment_state {
            PaymentState::Paid => self.total_amount,
            PaymentState::DepositCaptured => self.deposit_amount + self.points_applied,
            PaymentState::NotRequired => self.points_applied,
            PaymentState::Pending | PaymentState::Failed | PaymentState::Refunded => 0,
        };
        (collected as f64 / self.total_amount as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLine {
    pub service_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Requested,
    Confirmed,
    Completed,
    CancelledByUser,
    CancelledByShop,
    NoShow,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Requested => "requested",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Completed => "completed",
            ReservationStatus::CancelledByUser => "cancelled_by_user",
            ReservationStatus::CancelledByShop => "cancelled_by_shop",
            ReservationStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(ReservationStatus::Requested),
            "confirmed" => Some(ReservationStatus::Confirmed),
            "completed" => Some(ReservationStatus::Completed),
            "cancelled_by_user" => Some(ReservationStatus::CancelledByUser),
            "cancelled_by_shop" => Some(ReservationStatus::CancelledByShop),
            "no_show" => Some(ReservationStatus::NoShow),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Active reservations hold their window and can conflict with others.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Requested | ReservationStatus::Confirmed)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Follow-up flag for the payment collaborator's view of a reservation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    NotRequired,
    DepositCaptured,
    Paid,
    Failed,
    Refunded,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::NotRequired => "not_required",
            PaymentState::DepositCaptured => "deposit_captured",
            PaymentState::Paid => "paid",
            PaymentState::Failed => "failed",
            PaymentState::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentState::Pending),
            "not_required" => Some(PaymentState::NotRequired),
            "deposit_captured" => Some(PaymentState::DepositCaptured),
            "paid" => Some(PaymentState::Paid),
            "failed" => Some(PaymentState::Failed),
            "refunded" => Some(PaymentState::Refunded),
            _ => None,
        }
    }

    /// The deposit precondition for shop confirmation is satisfied.
    pub fn deposit_settled(&self) -> bool {
        matches!(
            self,
            PaymentState::NotRequired | PaymentState::DepositCaptured | PaymentState::Paid
        )
    }
}
