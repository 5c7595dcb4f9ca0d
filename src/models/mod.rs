pub mod event;
pub mod policy;
pub mod reservation;
pub mod reschedule;
pub mod service;
pub mod shop;
pub mod slot;

pub use event::{EventKind, ReservationEvent};
pub use policy::{AmountRule, DepositRule, FeeRule, RefundPolicy, RefundTier, ReschedulePolicy, RoleGuards};
pub use reservation::{PaymentState, Reservation, ReservationStatus, ServiceLine};
pub use reschedule::{RequesterRole, RescheduleHistoryEntry};
pub use service::{PriceRange, Service};
pub use shop::{AdvancePolicy, DayHours, OperatingHours, Shop};
pub use slot::Slot;

/// Serde adapter for `HH:MM` wall-clock times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn parse(s: &str) -> anyhow::Result<NaiveTime> {
        NaiveTime::parse_from_str(s.trim(), FORMAT)
            .map_err(|_| anyhow::anyhow!("invalid time format (expected HH:MM): {s}"))
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}
