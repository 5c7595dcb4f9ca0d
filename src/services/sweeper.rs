use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Reservation, ReservationStatus};
use crate::state::AppState;

use super::lifecycle::{self, Actor, LifecycleEvent, TransitionOutcome};

pub const NO_SHOW_REASON: &str = "no check-in recorded";
pub const UNCONFIRMED_REASON: &str = "shop did not confirm before start time";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub processed: u32,
    pub transitioned: u32,
    pub skipped: u32,
    pub errors: u32,
}

impl SweepStats {
    fn record(&mut self, result: Result<TransitionOutcome, AppError>, reservation: &Reservation) {
        match result {
            Ok(TransitionOutcome::Applied(_)) => self.transitioned += 1,
            Ok(TransitionOutcome::AlreadyMoved) => self.skipped += 1,
            Err(e) => {
                self.errors += 1;
                tracing::error!(reservation_id = %reservation.id, error = %e, "sweep transition failed");
            }
        }
    }
}

/// One pass over overdue reservations. Safe to run concurrently with itself
/// and with user actions; a row someone else already moved is skipped.
pub async fn run_sweep(state: &AppState) -> Result<SweepStats, AppError> {
    let now = state.clock.now();
    let no_show_grace = Duration::minutes(state.config.no_show_grace_minutes);
    let requested_grace = Duration::minutes(state.config.requested_grace_minutes);

    let (confirmed, requested) = {
        let db = state.lock_db()?;
        (
            queries::list_by_status_through(&db, ReservationStatus::Confirmed, &now.date())?,
            queries::list_by_status_through(&db, ReservationStatus::Requested, &now.date())?,
        )
    };

    let mut stats = SweepStats::default();

    for r in confirmed.iter().filter(|r| r.end() + no_show_grace < now) {
        stats.processed += 1;
        match state.overrides.has_override(&r.id).await {
            Ok(true) => {
                stats.skipped += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                stats.errors += 1;
                tracing::error!(reservation_id = %r.id, error = %e, "override lookup failed");
                continue;
            }
        }
        let result =
            lifecycle::apply_to(state, r, LifecycleEvent::MarkNoShow, &Actor::System, Some(NO_SHOW_REASON)).await;
        stats.record(result, r);
    }

    for r in requested.iter().filter(|r| r.start() + requested_grace < now) {
        stats.processed += 1;
        let result = lifecycle::apply_to(
            state,
            r,
            LifecycleEvent::ShopCancel,
            &Actor::System,
            Some(UNCONFIRMED_REASON),
        )
        .await;
        stats.record(result, r);
    }

    if stats.processed > 0 {
        tracing::info!(
            processed = stats.processed,
            transitioned = stats.transitioned,
            skipped = stats.skipped,
            errors = stats.errors,
            "sweep finished"
        );
    }
    Ok(stats)
}

/// Runs the sweep every `sweep_interval_secs`. A failed pass is logged and
/// retried on the next tick.
pub fn spawn(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let period = StdDuration::from_secs(state.config.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = run_sweep(&state).await {
                tracing::error!(error = %e, "sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentState, ServiceLine};
    use crate::services::collaborators::NoShowOverrides;
    use crate::services::test_support::{self, Harness};
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 16)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn seed(state: &AppState, id: &str, time: (u32, u32), status: ReservationStatus) {
        let start = at(time.0, time.1);
        let created = start - Duration::days(2);
        let r = Reservation {
            id: id.to_string(),
            shop_id: "shop-1".to_string(),
            customer_id: "cust-1".to_string(),
            lines: vec![ServiceLine {
                service_id: "cut".to_string(),
                quantity: 1,
            }],
            date: start.date(),
            time: start.time(),
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
        };
        let db = state.lock_db().unwrap();
        queries::insert_reservation(&db, &r).unwrap();
    }

    fn status_of(state: &AppState, id: &str) -> Reservation {
        let db = state.lock_db().unwrap();
        queries::get_reservation(&db, id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_marks_overdue_confirmed_as_no_show() {
        let Harness { state, clock, .. } = test_support::harness();
        seed(&state, "late", (10, 0), ReservationStatus::Confirmed);
        seed(&state, "grace", (10, 30), ReservationStatus::Confirmed);

        // 10:00-10:30 plus 30 minutes grace has passed; 10:30-11:00 has not
        clock.set(at(11, 1));
        let stats = run_sweep(&state).await.unwrap();
        assert_eq!(stats.transitioned, 1);

        let late = status_of(&state, "late");
        assert_eq!(late.status, ReservationStatus::NoShow);
        assert_eq!(late.reason.as_deref(), Some(NO_SHOW_REASON));
        assert_eq!(status_of(&state, "grace").status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let Harness { state, clock, .. } = test_support::harness();
        seed(&state, "a", (9, 0), ReservationStatus::Confirmed);
        seed(&state, "b", (9, 30), ReservationStatus::Requested);
        clock.set(at(12, 0));

        let first = run_sweep(&state).await.unwrap();
        assert_eq!(first.transitioned, 2);
        let second = run_sweep(&state).await.unwrap();
        assert_eq!(second, SweepStats::default());

        assert_eq!(status_of(&state, "b").status, ReservationStatus::CancelledByShop);
    }

    #[tokio::test]
    async fn test_override_exempts_reservation() {
        let Harness { state, clock, overrides, .. } = test_support::harness();
        seed(&state, "checked-in", (9, 0), ReservationStatus::Confirmed);
        overrides.record("checked-in");
        clock.set(at(12, 0));

        let stats = run_sweep(&state).await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(status_of(&state, "checked-in").status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_unconfirmed_request_cancelled_after_grace() {
        let Harness { state, clock, .. } = test_support::harness();
        seed(&state, "pending", (10, 0), ReservationStatus::Requested);

        clock.set(at(10, 10));
        assert_eq!(run_sweep(&state).await.unwrap().processed, 0);

        clock.set(at(10, 16));
        let stats = run_sweep(&state).await.unwrap();
        assert_eq!(stats.transitioned, 1);
        let r = status_of(&state, "pending");
        assert_eq!(r.status, ReservationStatus::CancelledByShop);
        assert_eq!(r.reason.as_deref(), Some(UNCONFIRMED_REASON));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sweeps_transition_once() {
        let Harness { state, clock, payments, .. } = test_support::harness();
        for i in 0..5 {
            seed(&state, &format!("r{i}"), (9, i * 10), ReservationStatus::Requested);
        }
        clock.set(at(12, 0));

        let a = tokio::spawn({
            let state = Arc::clone(&state);
            async move { run_sweep(&state).await.unwrap() }
        });
        let b = tokio::spawn({
            let state = Arc::clone(&state);
            async move { run_sweep(&state).await.unwrap() }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a.transitioned + b.transitioned, 5);
        assert_eq!(a.errors + b.errors, 0);
        // one refund per reservation, never two
        assert_eq!(payments.intents().len(), 5);
    }

    /// Reschedules the reservation to the next day while its override is looked up.
    struct RescheduledDuringLookup {
        db: Arc<Mutex<Connection>>,
    }

    #[async_trait]
    impl NoShowOverrides for RescheduledDuringLookup {
        async fn has_override(&self, reservation_id: &str) -> anyhow::Result<bool> {
            let db = self.db.lock().unwrap();
            let moved = queries::update_schedule(
                &db,
                reservation_id,
                &at(10, 0).date(),
                &at(10, 0).time(),
                &NaiveDate::from_ymd_opt(2025, 6, 17).unwrap(),
                &NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
                4000,
                &at(11, 40),
            )?;
            assert!(moved);
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_reschedule_during_sweep_is_not_marked_no_show() {
        let Harness { state, clock, .. } = test_support::harness_with(|state| {
            state.overrides = Arc::new(RescheduledDuringLookup {
                db: Arc::clone(&state.db),
            });
        });
        seed(&state, "r1", (10, 0), ReservationStatus::Confirmed);
        clock.set(at(11, 40));

        let stats = run_sweep(&state).await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.transitioned, 0);
        assert_eq!(stats.skipped, 1);

        let r = status_of(&state, "r1");
        assert_eq!(r.status, ReservationStatus::Confirmed);
        assert_eq!(r.start(), NaiveDate::from_ymd_opt(2025, 6, 17).unwrap().and_hms_opt(15, 0, 0).unwrap());
    }
}
