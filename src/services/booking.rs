use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::TransactionBehavior;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::reservation::{MAX_LINE_QUANTITY, MAX_SPECIAL_REQUESTS_LEN};
use crate::models::{
    hhmm, EventKind, PaymentState, Reservation, ReservationStatus, Service, ServiceLine, Shop,
};
use crate::state::AppState;

use super::{conflicts, events};

/// Process-local registry of slot windows currently being written.
///
/// A key is held by at most one booking or reschedule at a time. There is no
/// waiting: a second caller for the same key is turned away immediately.
#[derive(Debug, Clone, Default)]
pub struct SlotLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl SlotLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(shop_id: &str, date: &NaiveDate, time: &NaiveTime) -> String {
        format!(
            "{shop_id}|{}|{}",
            date.format(queries::DATE_FORMAT),
            time.format(queries::TIME_FORMAT)
        )
    }

    pub fn try_acquire(&self, key: String) -> Option<SlotGuard> {
        let mut held = self.held.lock().ok()?;
        if !held.insert(key.clone()) {
            return None;
        }
        Some(SlotGuard {
            held: Arc::clone(&self.held),
            key,
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.lock().map(|h| h.contains(key)).unwrap_or(false)
    }
}

/// Releases its key when dropped, including on early return or panic.
#[derive(Debug)]
pub struct SlotGuard {
    held: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        match self.held.lock() {
            Ok(mut held) => {
                held.remove(&self.key);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.key);
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReservation {
    pub shop_id: String,
    pub customer_id: String,
    pub lines: Vec<ServiceLine>,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub points_to_use: i64,
    #[serde(default)]
    pub special_requests: Option<String>,
}

/// Checks that need no lock. Nothing here touches the store.
fn check_shape(req: &NewReservation) -> Result<(NaiveDate, NaiveTime), AppError> {
    if req.customer_id.trim().is_empty() {
        return Err(AppError::validation("customer_id is required"));
    }
    if req.lines.is_empty() {
        return Err(AppError::validation("at least one service line is required"));
    }
    if req.points_to_use < 0 {
        return Err(AppError::validation("points_to_use must not be negative"));
    }
    if let Some(text) = &req.special_requests {
        if text.chars().count() > MAX_SPECIAL_REQUESTS_LEN {
            return Err(AppError::validation(format!(
                "special requests must be at most {MAX_SPECIAL_REQUESTS_LEN} characters"
            )));
        }
    }

    let date = NaiveDate::parse_from_str(req.date.trim(), queries::DATE_FORMAT)
        .map_err(|_| AppError::validation(format!("invalid date (expected YYYY-MM-DD): {}", req.date)))?;
    let time = hhmm::parse(&req.time).map_err(|e| AppError::validation(e.to_string()))?;
    Ok((date, time))
}

/// Minutes of chair time the lines need, counting only services that resolved.
fn line_duration(lines: &[ServiceLine], services: &[Service]) -> u32 {
    lines
        .iter()
        .filter_map(|line| {
            services
                .iter()
                .find(|s| s.id == line.service_id)
                .map(|s| s.duration_minutes.saturating_mul(line.quantity))
        })
        .fold(0u32, u32::saturating_add)
}

/// Rejects starts too close to now or too far ahead. Exactly `min_hours_ahead`
/// from now is accepted.
pub fn check_advance_policy(shop: &Shop, start: NaiveDateTime, now: NaiveDateTime) -> Result<(), AppError> {
    let policy = &shop.advance_policy;
    let (earliest, latest) = policy.window(now);

    if start < earliest {
        return Err(AppError::validation(format!(
            "reservations must be made at least {} hours in advance",
            policy.min_hours_ahead
        )));
    }
    if start > latest {
        return Err(AppError::validation(format!(
            "reservations can be made at most {} days in advance",
            policy.max_days_ahead
        )));
    }
    Ok(())
}

struct Quote {
    total_amount: i64,
    deposit_amount: i64,
    duration_minutes: u32,
}

/// Validates every line against the shop and prices the order at the quoted base price.
fn quote_lines(shop: &Shop, lines: &[ServiceLine], services: &[Service]) -> Result<Quote, AppError> {
    let mut quote = Quote {
        total_amount: 0,
        deposit_amount: 0,
        duration_minutes: 0,
    };

    for line in lines {
        let service = services
            .iter()
            .find(|s| s.id == line.service_id)
            .ok_or_else(|| AppError::validation(format!("unknown service {}", line.service_id)))?;

        if service.shop_id != shop.id {
            return Err(AppError::validation(format!(
                "service {} does not belong to shop {}",
                service.id, shop.id
            )));
        }
        if line.quantity == 0 || line.quantity > MAX_LINE_QUANTITY {
            return Err(AppError::validation(format!(
                "quantity for {} must be between 1 and {MAX_LINE_QUANTITY}",
                service.id
            )));
        }

        let qty = i64::from(line.quantity);
        quote.total_amount += service.price.min * qty;
        quote.deposit_amount += service.deposit_per_unit() * qty;
        quote.duration_minutes += service.duration_minutes * line.quantity;
    }

    Ok(quote)
}

/// Books a slot. The slot key is taken before any store read, and everything
/// after that point runs to completion even if the caller goes away.
pub async fn create_reservation(
    state: &Arc<AppState>,
    req: NewReservation,
) -> Result<Reservation, AppError> {
    let (date, time) = check_shape(&req)?;

    let shop = state
        .catalog
        .get_shop(&req.shop_id)
        .await?
        .ok_or_else(|| AppError::validation(format!("unknown shop {}", req.shop_id)))?;

    let service_ids: Vec<String> = req.lines.iter().map(|l| l.service_id.clone()).collect();
    let services = state.catalog.get_services(&service_ids).await?;
    let duration = line_duration(&req.lines, &services);

    if !shop.operating_hours.contains(date, time, duration) {
        return Err(AppError::validation(format!(
            "requested time is outside operating hours ({})",
            shop.operating_hours.to_human_readable()
        )));
    }
    check_advance_policy(&shop, date.and_time(time), state.clock.now())?;

    let key = SlotLocks::key(&shop.id, &date, &time);
    let guard = state
        .slot_locks
        .try_acquire(key)
        .ok_or_else(|| AppError::slot_unavailable("another booking for this slot is in progress"))?;

    let state = Arc::clone(state);
    let handle = tokio::spawn(async move {
        let result = book_locked(&state, &shop, &services, req, date, time, duration).await;
        drop(guard);
        match result {
            Ok(reservation) => Ok(events::publish(&state, EventKind::Created, reservation).await),
            Err(e) => Err(e),
        }
    });

    handle.await.map_err(|e| AppError::Internal(anyhow::Error::new(e)))?
}

async fn book_locked(
    state: &AppState,
    shop: &Shop,
    services: &[Service],
    req: NewReservation,
    date: NaiveDate,
    time: NaiveTime,
    duration: u32,
) -> Result<Reservation, AppError> {
    {
        let db = state.lock_db()?;
        if conflicts::has_conflict(&db, &shop.id, &date, &time, duration, None)? {
            return Err(AppError::slot_unavailable("slot is already booked"));
        }
    }

    let quote = quote_lines(shop, &req.lines, services)?;

    if req.points_to_use > 0 {
        let balance = state.points.available_balance(&req.customer_id).await?;
        if req.points_to_use > balance {
            return Err(AppError::validation(format!(
                "insufficient points: requested {}, available {balance}",
                req.points_to_use
            )));
        }
    }
    if quote.total_amount - quote.deposit_amount - req.points_to_use < 0 {
        return Err(AppError::validation("points exceed the amount due after the deposit"));
    }

    let now = state.clock.now();
    let reservation = Reservation {
        id: uuid::Uuid::new_v4().to_string(),
        shop_id: shop.id.clone(),
        customer_id: req.customer_id,
        lines: req.lines,
        date,
        time,
        total_duration_minutes: quote.duration_minutes,
        total_amount: quote.total_amount,
        deposit_amount: quote.deposit_amount,
        points_applied: req.points_to_use,
        status: ReservationStatus::Requested,
        payment_state: if quote.deposit_amount > 0 {
            PaymentState::Pending
        } else {
            PaymentState::NotRequired
        },
        special_requests: req.special_requests.filter(|s| !s.trim().is_empty()),
        reason: None,
        created_at: now,
        updated_at: now,
    };

    if reservation.points_applied > 0 {
        hold_points(state, &reservation).await?;
    }

    if let Err(e) = write_reservation(state, &reservation) {
        if reservation.points_applied > 0 {
            if let Err(restore_err) = state
                .points
                .restore(&reservation.customer_id, reservation.points_applied, &reservation.id)
                .await
            {
                tracing::error!(
                    reservation_id = %reservation.id,
                    error = %restore_err,
                    "failed to release point hold after aborted booking"
                );
            }
        }
        return Err(e);
    }

    tracing::info!(
        reservation_id = %reservation.id,
        shop_id = %reservation.shop_id,
        start = %reservation.start(),
        "reservation created"
    );
    Ok(reservation)
}

/// Holds the points a booking spends. The balance read before the hold is not
/// serialized with other bookings by the same customer, so a hold the ledger
/// refuses for lack of points is reported as invalid input.
async fn hold_points(state: &AppState, reservation: &Reservation) -> Result<(), AppError> {
    let customer = &reservation.customer_id;
    let wanted = reservation.points_applied;
    let Err(e) = state.points.hold_points(customer, wanted, &reservation.id).await else {
        return Ok(());
    };

    let available = state.points.available_balance(customer).await?;
    if available < wanted {
        tracing::warn!(
            reservation_id = %reservation.id,
            customer_id = %customer,
            wanted,
            available,
            "point hold refused"
        );
        return Err(AppError::validation(format!(
            "insufficient points: requested {wanted}, available {available}"
        )));
    }
    Err(e.into())
}

/// Re-checks for overlap and inserts under a write transaction, so a window
/// overlapping ours under a different key, or another process sharing the
/// database file, cannot slip in between.
fn write_reservation(state: &AppState, reservation: &Reservation) -> Result<(), AppError> {
    let mut db = state.lock_db()?;
    let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if conflicts::has_conflict(
        &tx,
        &reservation.shop_id,
        &reservation.date,
        &reservation.time,
        reservation.total_duration_minutes,
        None,
    )? {
        return Err(AppError::slot_unavailable("slot is already booked"));
    }
    queries::insert_reservation(&tx, reservation)?;
    tx.commit()?;
    Ok(())
}
