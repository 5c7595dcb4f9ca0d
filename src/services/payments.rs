use chrono::NaiveDateTime;

use crate::models::{EventKind, PaymentState, RefundPolicy, Reservation};
use crate::services::collaborators::{GatewayDecision, PaymentStage};
use crate::state::AppState;

/// Amount already collected in currency, not counting points.
fn collected(reservation: &Reservation) -> i64 {
    match reservation.payment_state {
        PaymentState::DepositCaptured => reservation.deposit_amount,
        PaymentState::Paid => reservation.total_amount - reservation.points_applied,
        _ => 0,
    }
}

/// How much goes back to the customer when a reservation is cancelled at `now`.
///
/// Shop cancellations refund everything collected. Customer cancellations
/// follow the shop's tiered schedule by time left before the start.
pub fn refund_amount(
    reservation: &Reservation,
    kind: EventKind,
    policy: &RefundPolicy,
    now: NaiveDateTime,
) -> i64 {
    let percent = match kind {
        EventKind::CancelledByShop => 100,
        EventKind::CancelledByUser => {
            policy.percent_for((reservation.start() - now).num_minutes())
        }
        _ => 0,
    };
    collected(reservation) * i64::from(percent) / 100
}

/// What the final capture should ask for on completion.
pub fn final_charge(reservation: &Reservation) -> i64 {
    match reservation.payment_state {
        PaymentState::DepositCaptured => reservation.balance_due(),
        _ => reservation.total_amount - reservation.points_applied,
    }
}

async fn capture(
    state: &AppState,
    reservation: &Reservation,
    stage: PaymentStage,
    amount: i64,
    success: PaymentState,
) -> PaymentState {
    match state.payments.request_capture(&reservation.id, stage, amount).await {
        Ok(GatewayDecision::Accepted) => {
            tracing::info!(reservation_id = %reservation.id, stage = stage.as_str(), amount, "payment captured");
            success
        }
        Ok(GatewayDecision::Rejected(reason)) => {
            tracing::warn!(reservation_id = %reservation.id, stage = stage.as_str(), %reason, "payment rejected");
            PaymentState::Failed
        }
        Err(e) => {
            tracing::warn!(reservation_id = %reservation.id, stage = stage.as_str(), error = %e, "payment request failed");
            PaymentState::Failed
        }
    }
}

async fn settle_points(state: &AppState, reservation: &Reservation, consume: bool) {
    if reservation.points_applied <= 0 {
        return;
    }
    let result = if consume {
        state
            .points
            .consume_fifo(&reservation.customer_id, reservation.points_applied, &reservation.id)
            .await
    } else {
        state
            .points
            .restore(&reservation.customer_id, reservation.points_applied, &reservation.id)
            .await
    };
    if let Err(e) = result {
        tracing::warn!(
            reservation_id = %reservation.id,
            points = reservation.points_applied,
            consume,
            error = %e,
            "point ledger update failed"
        );
    }
}

/// Reacts to a committed reservation event. Returns the payment state the
/// reservation should now carry, or `None` when nothing changed.
///
/// A failed capture never undoes the reservation; it only flags it.
pub async fn on_event(state: &AppState, kind: EventKind, reservation: &Reservation) -> Option<PaymentState> {
    match kind {
        EventKind::Created => {
            if reservation.deposit_amount <= 0 {
                return None;
            }
            Some(
                capture(
                    state,
                    reservation,
                    PaymentStage::Deposit,
                    reservation.deposit_amount,
                    PaymentState::DepositCaptured,
                )
                .await,
            )
        }
        EventKind::CancelledByUser | EventKind::CancelledByShop => {
            settle_points(state, reservation, false).await;

            let policy = match state.catalog.get_shop(&reservation.shop_id).await {
                Ok(Some(shop)) => shop.refund_policy,
                Ok(None) => RefundPolicy::default(),
                Err(e) => {
                    tracing::warn!(shop_id = %reservation.shop_id, error = %e, "catalog lookup failed; using default refund policy");
                    RefundPolicy::default()
                }
            };
            let amount = refund_amount(reservation, kind, &policy, state.clock.now());
            if amount <= 0 {
                return None;
            }

            match state.payments.request_refund(&reservation.id, amount).await {
                Ok(GatewayDecision::Accepted) => {
                    tracing::info!(reservation_id = %reservation.id, amount, "refund issued");
                    Some(PaymentState::Refunded)
                }
                Ok(GatewayDecision::Rejected(reason)) => {
                    tracing::warn!(reservation_id = %reservation.id, %reason, "refund rejected");
                    Some(PaymentState::Failed)
                }
                Err(e) => {
                    tracing::warn!(reservation_id = %reservation.id, error = %e, "refund request failed");
                    Some(PaymentState::Failed)
                }
            }
        }
        EventKind::Completed => {
            settle_points(state, reservation, true).await;
            if reservation.payment_state == PaymentState::Paid {
                return None;
            }
            let amount = final_charge(reservation);
            if amount <= 0 {
                return Some(PaymentState::Paid);
            }
            Some(capture(state, reservation, PaymentStage::Final, amount, PaymentState::Paid).await)
        }
        EventKind::NoShow => {
            // deposit is kept
            settle_points(state, reservation, true).await;
            None
        }
        EventKind::Confirmed | EventKind::Rescheduled => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReservationStatus, ServiceLine};
    use chrono::{Duration, NaiveDate};

    fn reservation(payment_state: PaymentState) -> Reservation {
        let start = NaiveDate::from_ymd_opt(2025, 6, 16)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        Reservation {
            id: "r1".to_string(),
            shop_id: "shop-1".to_string(),
            customer_id: "cust-1".to_string(),
            lines: vec![ServiceLine {
                service_id: "cut".to_string(),
                quantity: 1,
            }],
            date: start.date(),
            time: start.time(),
            total_duration_minutes: 30,
            total_amount: 10_000,
            deposit_amount: 2_000,
            points_applied: 500,
            status: ReservationStatus::Confirmed,
            payment_state,
            special_requests: None,
            reason: None,
            created_at: start - Duration::days(3),
            updated_at: start - Duration::days(3),
        }
    }

    #[test]
    fn test_user_refund_follows_tiers() {
        let r = reservation(PaymentState::DepositCaptured);
        let policy = RefundPolicy::default();
        let start = r.start();

        assert_eq!(refund_amount(&r, EventKind::CancelledByUser, &policy, start - Duration::hours(48)), 2_000);
        assert_eq!(refund_amount(&r, EventKind::CancelledByUser, &policy, start - Duration::hours(24)), 2_000);
        assert_eq!(refund_amount(&r, EventKind::CancelledByUser, &policy, start - Duration::hours(5)), 1_000);
        assert_eq!(refund_amount(&r, EventKind::CancelledByUser, &policy, start - Duration::hours(1)), 0);
    }

    #[test]
    fn test_shop_cancel_refunds_everything_collected() {
        let policy = RefundPolicy::default();
        let r = reservation(PaymentState::DepositCaptured);
        assert_eq!(refund_amount(&r, EventKind::CancelledByShop, &policy, r.start()), 2_000);

        let paid = reservation(PaymentState::Paid);
        assert_eq!(refund_amount(&paid, EventKind::CancelledByShop, &policy, paid.start()), 9_500);

        let nothing = reservation(PaymentState::Failed);
        assert_eq!(refund_amount(&nothing, EventKind::CancelledByShop, &policy, nothing.start()), 0);
    }

    #[test]
    fn test_final_charge_accounts_for_deposit_and_points() {
        assert_eq!(final_charge(&reservation(PaymentState::DepositCaptured)), 7_500);
        // deposit never landed, so it is folded into the final capture
        assert_eq!(final_charge(&reservation(PaymentState::Failed)), 9_500);
    }
}
