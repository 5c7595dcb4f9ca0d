pub mod availability;
pub mod booking;
pub mod collaborators;
pub mod conflicts;
pub mod events;
pub mod lifecycle;
pub mod payments;
pub mod rescheduling;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;
    use tokio::sync::broadcast;

    use super::booking::SlotLocks;
    use super::collaborators::{
        InMemoryCatalog, InMemoryOverrides, InMemoryPaymentGateway, InMemoryPointLedger, LogNotifier,
    };
    use crate::clock::ManualClock;
    use crate::config::AppConfig;
    use crate::db;
    use crate::state::AppState;

    pub const CATALOG: &str = r#"{
        "shops": [
            {
                "id": "shop-1",
                "name": "Corner Cuts",
                "operating_hours": {
                    "mon": {"kind": "open", "open": "09:00", "close": "18:00"},
                    "tue": {"kind": "open", "open": "09:00", "close": "18:00"},
                    "wed": {"kind": "open", "open": "09:00", "close": "18:00"},
                    "thu": {"kind": "open", "open": "09:00", "close": "18:00"},
                    "fri": {"kind": "open", "open": "09:00", "close": "18:00"},
                    "sat": {"kind": "open", "open": "10:00", "close": "16:00"}
                },
                "advance_policy": {"max_days_ahead": 60, "min_hours_ahead": 2}
            },
            {
                "id": "shop-2",
                "name": "Quiet Spa",
                "operating_hours": {
                    "mon": {"kind": "open", "open": "10:00", "close": "20:00"}
                }
            }
        ],
        "services": [
            {"id": "cut", "shop_id": "shop-1", "duration_minutes": 30,
             "price": {"min": 4000, "max": 6000}, "deposit": {"kind": "fixed", "amount": 1000}},
            {"id": "color", "shop_id": "shop-1", "duration_minutes": 60,
             "price": {"min": 8000, "max": 12000}, "deposit": {"kind": "percentage", "pct": 25}},
            {"id": "trim", "shop_id": "shop-1", "duration_minutes": 30,
             "price": {"min": 2000, "max": 2000}},
            {"id": "massage", "shop_id": "shop-2", "duration_minutes": 60,
             "price": {"min": 9000, "max": 9000}}
        ]
    }"#;

    pub struct Harness {
        pub state: Arc<AppState>,
        pub clock: Arc<ManualClock>,
        pub payments: InMemoryPaymentGateway,
        pub points: InMemoryPointLedger,
        pub overrides: Arc<InMemoryOverrides>,
    }

    /// Fresh in-memory state; the clock reads Sunday 2025-06-15 08:00.
    pub fn harness() -> Harness {
        harness_with(|_| {})
    }

    /// Like `harness`, with a chance to swap collaborators before the state is shared.
    pub fn harness_with(customize: impl FnOnce(&mut AppState)) -> Harness {
        let conn = db::init_db(":memory:").expect("db");
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2025, 6, 15)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        ));
        let payments = InMemoryPaymentGateway::new();
        let points = InMemoryPointLedger::new(clock.clone());
        let overrides = Arc::new(InMemoryOverrides::new());
        let (events_tx, _) = broadcast::channel(64);

        let mut state = AppState {
            db: Arc::new(Mutex::new(conn)),
            config: AppConfig::default(),
            clock: clock.clone(),
            catalog: Arc::new(InMemoryCatalog::from_json(CATALOG).expect("catalog")),
            payments: Arc::new(payments.clone()),
            points: Arc::new(points.clone()),
            notifier: Arc::new(LogNotifier),
            overrides: overrides.clone(),
            slot_locks: SlotLocks::new(),
            events_tx,
        };
        customize(&mut state);

        Harness {
            state: Arc::new(state),
            clock,
            payments,
            points,
            overrides,
        }
    }
}
