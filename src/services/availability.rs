use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Reservation, Service, Shop, Slot};
use crate::state::AppState;

use super::conflicts::windows_overlap;

/// Total chair time for a set of services, one unit each.
pub fn total_duration(services: &[Service]) -> u32 {
    services.iter().map(|s| s.duration_minutes).sum()
}

/// Lazily walks a shop's open window in fixed steps. Cloning restarts the
/// walk from the same point, so a caller can iterate more than once.
#[derive(Debug, Clone)]
pub struct SlotIter {
    date: NaiveDate,
    cursor: Option<NaiveTime>,
    close: NaiveTime,
    step: Duration,
    duration: Duration,
    earliest: NaiveDateTime,
    latest: NaiveDateTime,
    booked: Vec<(NaiveDateTime, NaiveDateTime)>,
}

impl SlotIter {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            cursor: None,
            close: NaiveTime::MIN,
            step: Duration::zero(),
            duration: Duration::zero(),
            earliest: date.and_time(NaiveTime::MIN),
            latest: date.and_time(NaiveTime::MIN),
            booked: Vec::new(),
        }
    }
}

impl Iterator for SlotIter {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let time = self.cursor?;
        if time >= self.close {
            self.cursor = None;
            return None;
        }
        let (next, wrapped) = time.overflowing_add_signed(self.step);
        self.cursor = (wrapped == 0).then_some(next);

        let start = self.date.and_time(time);
        let end = start + self.duration;
        let booked_count = self
            .booked
            .iter()
            .filter(|(b_start, b_end)| windows_overlap(start, end, *b_start, *b_end))
            .count() as u32;

        let fits = end <= self.date.and_time(self.close);
        let in_window = start >= self.earliest && start <= self.latest;

        Some(Slot {
            time,
            available: fits && in_window && booked_count == 0,
            capacity: 1,
            booked_count,
        })
    }
}

/// Bookable starts for `services` at `shop` on `date`. Pure: everything it
/// needs is passed in and nothing is cached.
pub fn compute_slots(
    shop: &Shop,
    services: &[Service],
    reservations: &[Reservation],
    date: NaiveDate,
    interval_minutes: u32,
    now: NaiveDateTime,
) -> Result<SlotIter, AppError> {
    if date < now.date() {
        return Err(AppError::validation(format!("date {date} is in the past")));
    }
    if services.is_empty() {
        return Err(AppError::validation("at least one service is required"));
    }
    if let Some(foreign) = services.iter().find(|s| s.shop_id != shop.id) {
        return Err(AppError::validation(format!(
            "service {} does not belong to shop {}",
            foreign.id, shop.id
        )));
    }
    if interval_minutes == 0 {
        return Err(AppError::validation("interval must be positive"));
    }

    let Some((open, close)) = shop.operating_hours.for_date(date).window() else {
        return Ok(SlotIter::empty(date));
    };

    let window_minutes = (close - open).num_minutes();
    if window_minutes % interval_minutes as i64 != 0 {
        return Err(AppError::validation(format!(
            "interval of {interval_minutes} minutes does not divide the {} to {} window",
            open.format("%H:%M"),
            close.format("%H:%M")
        )));
    }

    let (earliest, latest) = shop.advance_policy.window(now);
    let booked = reservations
        .iter()
        .filter(|r| r.status.is_active() && r.shop_id == shop.id && r.date == date)
        .map(|r| (r.start(), r.end()))
        .collect();

    Ok(SlotIter {
        date,
        cursor: Some(open),
        close,
        step: Duration::minutes(interval_minutes as i64),
        duration: Duration::minutes(total_duration(services) as i64),
        earliest,
        latest,
        booked,
    })
}

/// Reads the catalog and committed reservations, then computes slots.
pub async fn available_slots(
    state: &AppState,
    shop_id: &str,
    date: NaiveDate,
    service_ids: &[String],
    interval_minutes: Option<u32>,
) -> Result<Vec<Slot>, AppError> {
    let shop = state
        .catalog
        .get_shop(shop_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("shop {shop_id}")))?;

    let services = state.catalog.get_services(service_ids).await?;
    if let Some(missing) = service_ids
        .iter()
        .find(|id| !services.iter().any(|s| &s.id == *id))
    {
        return Err(AppError::validation(format!("unknown service {missing}")));
    }

    let reservations = {
        let db = state.lock_db()?;
        queries::list_active_for_shop_date(&db, shop_id, &date)?
    };

    let interval = interval_minutes.unwrap_or(state.config.slot_interval_minutes);
    let slots = compute_slots(&shop, &services, &reservations, date, interval, state.clock.now())?;
    Ok(slots.collect())
}
