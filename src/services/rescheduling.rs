use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use rusqlite::TransactionBehavior;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::{AppError, PolicyRule};
use crate::models::{hhmm, EventKind, RequesterRole, RescheduleHistoryEntry, Reservation, Shop};
use crate::state::AppState;

use super::booking::SlotLocks;
use super::{conflicts, events};

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    pub new_date: String,
    pub new_time: String,
    pub requester_role: RequesterRole,
    pub requester_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Policy checks that read only the reservation, the shop and the history count.
fn check_policy(
    reservation: &Reservation,
    shop: &Shop,
    new_date: NaiveDate,
    new_time: NaiveTime,
    role: RequesterRole,
    previous_reschedules: u32,
    now: chrono::NaiveDateTime,
) -> Result<i64, AppError> {
    if !reservation.status.is_active() {
        return Err(AppError::policy(
            PolicyRule::NotReschedulable,
            format!("reservation is {}", reservation.status),
        ));
    }
    if reservation.date == new_date && reservation.time == new_time {
        return Err(AppError::policy(PolicyRule::Unchanged, "new time equals the current time"));
    }
    if !shop
        .operating_hours
        .contains(new_date, new_time, reservation.total_duration_minutes)
    {
        return Err(AppError::slot_unavailable(format!(
            "new time is outside operating hours ({})",
            shop.operating_hours.to_human_readable()
        )));
    }

    let new_start = new_date.and_time(new_time);
    if new_start <= now {
        return Err(AppError::validation("cannot move a reservation into the past"));
    }

    let policy = &shop.reschedule_policy;
    let guards = policy.guards_for(role);

    if guards.advance_notice {
        let advance = &shop.advance_policy;
        let (earliest, latest) = advance.window(now);
        if new_start < earliest {
            return Err(AppError::policy(
                PolicyRule::AdvanceNotice,
                format!("new time must be at least {} hours away", advance.min_hours_ahead),
            ));
        }
        if new_start > latest {
            return Err(AppError::policy(
                PolicyRule::AdvanceNotice,
                format!("new time must be within {} days", advance.max_days_ahead),
            ));
        }
    }

    if guards.frequency_limit {
        if let Some(max) = policy.max_reschedules {
            if previous_reschedules >= max {
                return Err(AppError::policy(
                    PolicyRule::TooFrequent,
                    format!("already rescheduled {previous_reschedules} times (limit {max})"),
                ));
            }
        }
    }

    Ok(if guards.charge_fee {
        policy.fee.amount_for(reservation.total_amount)
    } else {
        0
    })
}

/// Moves an active reservation to a new window and appends the history entry
/// in the same transaction. The lifecycle status is left as it was.
pub async fn reschedule(
    state: &Arc<AppState>,
    reservation_id: &str,
    req: RescheduleRequest,
) -> Result<RescheduleHistoryEntry, AppError> {
    let new_date = NaiveDate::parse_from_str(req.new_date.trim(), queries::DATE_FORMAT)
        .map_err(|_| AppError::validation(format!("invalid date (expected YYYY-MM-DD): {}", req.new_date)))?;
    let new_time = hhmm::parse(&req.new_time).map_err(|e| AppError::validation(e.to_string()))?;
    if req.requester_id.trim().is_empty() {
        return Err(AppError::validation("requester_id is required"));
    }

    let (reservation, previous) = {
        let db = state.lock_db()?;
        let reservation = queries::get_reservation(&db, reservation_id)?
            .ok_or_else(|| AppError::NotFound(format!("reservation {reservation_id}")))?;
        let previous = queries::count_history(&db, reservation_id)?;
        (reservation, previous)
    };

    match req.requester_role {
        RequesterRole::User if req.requester_id != reservation.customer_id => {
            return Err(AppError::policy(
                PolicyRule::NotReschedulable,
                "customer does not own this reservation",
            ));
        }
        RequesterRole::Shop if req.requester_id != reservation.shop_id => {
            return Err(AppError::policy(
                PolicyRule::NotReschedulable,
                "shop does not own this reservation",
            ));
        }
        _ => {}
    }

    let shop = state
        .catalog
        .get_shop(&reservation.shop_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("shop {}", reservation.shop_id)))?;

    let now = state.clock.now();
    let fee = check_policy(&reservation, &shop, new_date, new_time, req.requester_role, previous, now)?;

    {
        let db = state.lock_db()?;
        if conflicts::has_conflict(
            &db,
            &reservation.shop_id,
            &new_date,
            &new_time,
            reservation.total_duration_minutes,
            Some(&reservation.id),
        )? {
            return Err(AppError::slot_unavailable("new time overlaps another reservation"));
        }
    }

    let key = SlotLocks::key(&reservation.shop_id, &new_date, &new_time);
    let guard = state
        .slot_locks
        .try_acquire(key)
        .ok_or_else(|| AppError::slot_unavailable("another booking for this slot is in progress"))?;

    let entry = RescheduleHistoryEntry {
        id: uuid::Uuid::new_v4().to_string(),
        reservation_id: reservation.id.clone(),
        shop_id: reservation.shop_id.clone(),
        previous_date: reservation.date,
        previous_time: reservation.time,
        new_date,
        new_time,
        reason: req.reason.filter(|r| !r.trim().is_empty()),
        requester_role: req.requester_role,
        requester_id: req.requester_id,
        fee_charged: fee,
        created_at: now,
    };

    let state = Arc::clone(state);
    let handle = tokio::spawn(async move {
        let written = write_reschedule(&state, &reservation, &entry);
        drop(guard);
        let updated = written?;

        tracing::info!(
            reservation_id = %entry.reservation_id,
            from = %reservation.start(),
            to = %updated.start(),
            role = entry.requester_role.as_str(),
            fee = entry.fee_charged,
            "reservation rescheduled"
        );
        events::publish(&state, EventKind::Rescheduled, updated).await;
        Ok::<_, AppError>(entry)
    });

    handle.await.map_err(|e| AppError::Internal(anyhow::Error::new(e)))?
}

fn write_reschedule(
    state: &AppState,
    reservation: &Reservation,
    entry: &RescheduleHistoryEntry,
) -> Result<Reservation, AppError> {
    let mut db = state.lock_db()?;
    let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if conflicts::has_conflict(
        &tx,
        &reservation.shop_id,
        &entry.new_date,
        &entry.new_time,
        reservation.total_duration_minutes,
        Some(&reservation.id),
    )? {
        return Err(AppError::slot_unavailable("new time overlaps another reservation"));
    }

    let moved = queries::update_schedule(
        &tx,
        &reservation.id,
        &reservation.date,
        &reservation.time,
        &entry.new_date,
        &entry.new_time,
        reservation.total_amount + entry.fee_charged,
        &entry.created_at,
    )?;
    if !moved {
        return Err(AppError::policy(
            PolicyRule::NotReschedulable,
            "reservation changed while rescheduling",
        ));
    }
    queries::insert_history(&tx, entry)?;

    let updated = queries::get_reservation(&tx, &reservation.id)?
        .ok_or_else(|| AppError::NotFound(format!("reservation {}", reservation.id)))?;
    tx.commit()?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::models::{
        AdvancePolicy, FeeRule, OperatingHours, PaymentState, RefundPolicy, ReschedulePolicy,
        ReservationStatus, ServiceLine,
    };

    fn t(s: &str) -> NaiveTime {
        hhmm::parse(s).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()
    }

    fn shop(policy: ReschedulePolicy) -> Shop {
        Shop {
            id: "shop-1".to_string(),
            name: String::new(),
            operating_hours: OperatingHours::every_day(t("09:00"), t("18:00")),
            advance_policy: AdvancePolicy {
                max_days_ahead: 30,
                min_hours_ahead: 2,
            },
            cancellation_policy: String::new(),
            reschedule_policy: policy,
            refund_policy: RefundPolicy::default(),
        }
    }

    fn reservation(status: ReservationStatus) -> Reservation {
        let created = monday().and_time(t("08:00")) - Duration::days(2);
        Reservation {
            id: "r1".to_string(),
            shop_id: "shop-1".to_string(),
            customer_id: "cust-1".to_string(),
            lines: vec![ServiceLine {
                service_id: "cut".to_string(),
                quantity: 1,
            }],
            date: monday(),
            time: t("10:00"),
            total_duration_minutes: 30,
            total_amount: 4000,
            deposit_amount: 1000,
            points_applied: 0,
            status,
            payment_state: PaymentState::DepositCaptured,
            special_requests: None,
            reason: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn now() -> chrono::NaiveDateTime {
        monday().and_time(t("10:00")) - Duration::days(1)
    }

    fn rule_of(err: AppError) -> PolicyRule {
        match err {
            AppError::ReschedulePolicyViolation { rule, .. } => rule,
            other => panic!("expected policy violation, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_terminal_and_unchanged() {
        let s = shop(ReschedulePolicy::default());
        let done = reservation(ReservationStatus::Completed);
        let err = check_policy(&done, &s, monday(), t("11:00"), RequesterRole::User, 0, now()).unwrap_err();
        assert_eq!(rule_of(err), PolicyRule::NotReschedulable);

        let r = reservation(ReservationStatus::Confirmed);
        let err = check_policy(&r, &s, monday(), t("10:00"), RequesterRole::User, 0, now()).unwrap_err();
        assert_eq!(rule_of(err), PolicyRule::Unchanged);
    }

    #[test]
    fn test_outside_hours_is_slot_unavailable() {
        let s = shop(ReschedulePolicy::default());
        let r = reservation(ReservationStatus::Requested);
        let err = check_policy(&r, &s, monday(), t("17:45"), RequesterRole::Admin, 0, now()).unwrap_err();
        assert!(matches!(err, AppError::SlotUnavailable(_)));
    }

    #[test]
    fn test_advance_notice_applies_by_role() {
        let s = shop(ReschedulePolicy::default());
        let r = reservation(ReservationStatus::Confirmed);
        let soon = now() + Duration::hours(1);

        let err = check_policy(&r, &s, soon.date(), soon.time(), RequesterRole::User, 0, now()).unwrap_err();
        assert_eq!(rule_of(err), PolicyRule::AdvanceNotice);
        let err = check_policy(&r, &s, soon.date(), soon.time(), RequesterRole::Shop, 0, now()).unwrap_err();
        assert_eq!(rule_of(err), PolicyRule::AdvanceNotice);
        // admins skip the guard
        assert!(check_policy(&r, &s, soon.date(), soon.time(), RequesterRole::Admin, 0, now()).is_ok());
    }

    #[test]
    fn test_frequency_limit_only_for_users_by_default() {
        let s = shop(ReschedulePolicy::default());
        let r = reservation(ReservationStatus::Confirmed);

        let err = check_policy(&r, &s, monday(), t("11:00"), RequesterRole::User, 3, now()).unwrap_err();
        assert_eq!(rule_of(err), PolicyRule::TooFrequent);
        assert!(check_policy(&r, &s, monday(), t("11:00"), RequesterRole::User, 2, now()).is_ok());
        assert!(check_policy(&r, &s, monday(), t("11:00"), RequesterRole::Shop, 3, now()).is_ok());

        let unlimited = shop(ReschedulePolicy {
            max_reschedules: None,
            ..ReschedulePolicy::default()
        });
        assert!(check_policy(&r, &unlimited, monday(), t("11:00"), RequesterRole::User, 50, now()).is_ok());
    }

    #[test]
    fn test_fee_charged_per_role() {
        let s = shop(ReschedulePolicy {
            fee: FeeRule::Percentage { pct: 10 },
            ..ReschedulePolicy::default()
        });
        let r = reservation(ReservationStatus::Confirmed);
        assert_eq!(check_policy(&r, &s, monday(), t("11:00"), RequesterRole::User, 0, now()).unwrap(), 400);
        assert_eq!(check_policy(&r, &s, monday(), t("11:00"), RequesterRole::Shop, 0, now()).unwrap(), 0);
    }
}
