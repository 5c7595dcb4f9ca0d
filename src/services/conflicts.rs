use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::models::{Reservation, ReservationStatus};

/// Half-open interval overlap: `[a_start, a_end)` and `[b_start, b_end)` share time.
pub fn windows_overlap(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Active reservations from `reservations` whose window overlaps `[start, start + duration)`.
pub fn overlapping<'a>(
    reservations: &'a [Reservation],
    start: NaiveDateTime,
    duration_minutes: u32,
    exclude_id: Option<&'a str>,
) -> impl Iterator<Item = &'a Reservation> + 'a {
    let end = start + Duration::minutes(duration_minutes as i64);
    reservations.iter().filter(move |r| {
        r.status.is_active()
            && Some(r.id.as_str()) != exclude_id
            && windows_overlap(start, end, r.start(), r.end())
    })
}

pub fn has_conflict(
    conn: &Connection,
    shop_id: &str,
    date: &NaiveDate,
    start: &NaiveTime,
    duration_minutes: u32,
    exclude_id: Option<&str>,
) -> anyhow::Result<bool> {
    let existing = queries::list_active_for_shop_date(conn, shop_id, date)?;
    let found = overlapping(&existing, date.and_time(*start), duration_minutes, exclude_id)
        .next()
        .is_some();
    Ok(found)
}

/// Enough about an overlapping reservation for a person to decide what to do.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictingReservation {
    pub id: String,
    pub customer_id: String,
    pub status: ReservationStatus,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub payment_fraction: f64,
}

impl From<&Reservation> for ConflictingReservation {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id.clone(),
            customer_id: r.customer_id.clone(),
            status: r.status,
            start: r.start(),
            end: r.end(),
            created_at: r.created_at,
            payment_fraction: r.payment_fraction(),
        }
    }
}

pub fn list_conflicts(
    conn: &Connection,
    shop_id: &str,
    date: &NaiveDate,
    start: &NaiveTime,
    duration_minutes: u32,
    exclude_id: Option<&str>,
) -> anyhow::Result<Vec<ConflictingReservation>> {
    let existing = queries::list_active_for_shop_date(conn, shop_id, date)?;
    Ok(
        overlapping(&existing, date.and_time(*start), duration_minutes, exclude_id)
            .map(ConflictingReservation::from)
            .collect(),
    )
}

// ── Manual resolution ranking ──

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityWeights {
    pub payment: f64,
    pub urgency: f64,
    pub tenure: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            payment: 0.5,
            urgency: 0.3,
            tenure: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedConflict {
    #[serde(flatten)]
    pub reservation: ConflictingReservation,
    pub tenure_days: i64,
    pub score: f64,
}

/// Each factor is normalised to `[0, 1]`: fraction paid, `1 / (1 + hours until start)`,
/// and customer tenure capped at one year.
pub fn priority_score(
    conflict: &ConflictingReservation,
    weights: &PriorityWeights,
    now: NaiveDateTime,
    first_seen: Option<NaiveDateTime>,
) -> (f64, i64) {
    let hours_until = (conflict.start - now).num_minutes().max(0) as f64 / 60.0;
    let urgency = 1.0 / (1.0 + hours_until);
    let tenure_days = first_seen.map_or(0, |t| (now - t).num_days().max(0));
    let tenure = (tenure_days as f64 / 365.0).min(1.0);

    let score = weights.payment * conflict.payment_fraction
        + weights.urgency * urgency
        + weights.tenure * tenure;
    (score, tenure_days)
}

/// Highest score first; equal scores go to whoever booked first.
pub fn rank_conflicts(
    conflicts: Vec<ConflictingReservation>,
    weights: &PriorityWeights,
    now: NaiveDateTime,
    first_seen: &HashMap<String, NaiveDateTime>,
) -> Vec<RankedConflict> {
    let mut ranked: Vec<RankedConflict> = conflicts
        .into_iter()
        .map(|c| {
            let (score, tenure_days) =
                priority_score(&c, weights, now, first_seen.get(&c.customer_id).copied());
            RankedConflict {
                reservation: c,
                tenure_days,
                score,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.reservation.created_at.cmp(&b.reservation.created_at))
    });
    ranked
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictGroup {
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub entries: Vec<RankedConflict>,
}

/// Splits active reservations into chains of overlapping windows, keeping
/// only chains with two or more members.
pub fn overlap_groups(reservations: &[Reservation]) -> Vec<Vec<&Reservation>> {
    let mut active: Vec<&Reservation> = reservations.iter().filter(|r| r.status.is_active()).collect();
    active.sort_by_key(|r| (r.start(), r.created_at));

    let mut groups: Vec<Vec<&Reservation>> = Vec::new();
    let mut current: Vec<&Reservation> = Vec::new();
    let mut current_end: Option<NaiveDateTime> = None;

    for r in active {
        match current_end {
            Some(end) if r.start() < end => {
                current_end = Some(end.max(r.end()));
                current.push(r);
            }
            _ => {
                if current.len() > 1 {
                    groups.push(std::mem::take(&mut current));
                }
                current = vec![r];
                current_end = Some(r.end());
            }
        }
    }
    if current.len() > 1 {
        groups.push(current);
    }
    groups
}

/// The admin resolution queue for one shop and date.
pub fn shop_conflict_groups(
    conn: &Connection,
    shop_id: &str,
    date: &NaiveDate,
    weights: &PriorityWeights,
    now: NaiveDateTime,
) -> anyhow::Result<Vec<ConflictGroup>> {
    let reservations = queries::list_active_for_shop_date(conn, shop_id, date)?;
    let groups = overlap_groups(&reservations);

    let mut first_seen = HashMap::new();
    for r in groups.iter().flatten() {
        if !first_seen.contains_key(&r.customer_id) {
            if let Some(ts) = queries::customer_first_seen(conn, &r.customer_id)? {
                first_seen.insert(r.customer_id.clone(), ts);
            }
        }
    }

    Ok(groups
        .into_iter()
        .map(|group| {
            let window_start = group.iter().map(|r| r.start()).min().unwrap_or(now);
            let window_end = group.iter().map(|r| r.end()).max().unwrap_or(now);
            let conflicts = group.into_iter().map(ConflictingReservation::from).collect();
            ConflictGroup {
                window_start,
                window_end,
                entries: rank_conflicts(conflicts, weights, now, &first_seen),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{PaymentState, ServiceLine};

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn reservation(id: &str, customer: &str, time: &str, minutes: u32, status: ReservationStatus) -> Reservation {
        let start = dt(&format!("2025-06-16 {time}"));
        Reservation {
            id: id.to_string(),
            shop_id: "shop-1".to_string(),
            customer_id: customer.to_string(),
            lines: vec![ServiceLine {
                service_id: "cut".to_string(),
                quantity: 1,
            }],
            date: start.date(),
            time: start.time(),
            total_duration_minutes: minutes,
            total_amount: 10000,
            deposit_amount: 2000,
            points_applied: 0,
            status,
            payment_state: PaymentState::Pending,
            special_requests: None,
            reason: None,
            created_at: dt("2025-06-01 09:00"),
            updated_at: dt("2025-06-01 09:00"),
        }
    }

    #[test]
    fn test_half_open_overlap() {
        let ten = dt("2025-06-16 10:00");
        let eleven = dt("2025-06-16 11:00");
        let noon = dt("2025-06-16 12:00");
        assert!(windows_overlap(ten, noon, eleven, noon));
        // Adjacent windows do not overlap
        assert!(!windows_overlap(ten, eleven, eleven, noon));
        assert!(!windows_overlap(eleven, noon, ten, eleven));
    }

    #[test]
    fn test_terminal_reservations_never_conflict() {
        let rows = vec![
            reservation("a", "c1", "10:00", 60, ReservationStatus::CancelledByUser),
            reservation("b", "c2", "10:00", 60, ReservationStatus::Completed),
            reservation("c", "c3", "10:00", 60, ReservationStatus::NoShow),
        ];
        assert_eq!(overlapping(&rows, dt("2025-06-16 10:30"), 60, None).count(), 0);
    }

    #[test]
    fn test_exclude_own_id() {
        let rows = vec![reservation("a", "c1", "10:00", 60, ReservationStatus::Confirmed)];
        assert_eq!(overlapping(&rows, dt("2025-06-16 10:30"), 60, None).count(), 1);
        assert_eq!(overlapping(&rows, dt("2025-06-16 10:30"), 60, Some("a")).count(), 0);
    }

    #[test]
    fn test_has_conflict_against_store() {
        let conn = db::init_db(":memory:").unwrap();
        queries::insert_reservation(&conn, &reservation("a", "c1", "10:00", 60, ReservationStatus::Requested)).unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 6, 16).unwrap();
        let t = |s| NaiveTime::parse_from_str(s, "%H:%M").unwrap();
        assert!(has_conflict(&conn, "shop-1", &date, &t("10:30"), 60, None).unwrap());
        assert!(!has_conflict(&conn, "shop-1", &date, &t("11:00"), 60, None).unwrap());
        assert!(!has_conflict(&conn, "shop-2", &date, &t("10:30"), 60, None).unwrap());

        let listed = list_conflicts(&conn, "shop-1", &date, &t("09:30"), 60, None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].customer_id, "c1");
        assert_eq!(listed[0].end, dt("2025-06-16 11:00"));
    }

    #[test]
    fn test_rank_prefers_paid_then_earliest_created() {
        let now = dt("2025-06-15 10:00");
        let mut paid = reservation("paid", "c1", "10:00", 60, ReservationStatus::Confirmed);
        paid.payment_state = PaymentState::Paid;
        let mut early = reservation("early", "c2", "10:00", 60, ReservationStatus::Requested);
        early.created_at = dt("2025-06-01 08:00");
        let late = reservation("late", "c3", "10:00", 60, ReservationStatus::Requested);

        let conflicts = vec![
            ConflictingReservation::from(&late),
            ConflictingReservation::from(&early),
            ConflictingReservation::from(&paid),
        ];
        let ranked = rank_conflicts(conflicts, &PriorityWeights::default(), now, &HashMap::new());
        let ids: Vec<_> = ranked.iter().map(|r| r.reservation.id.as_str()).collect();
        assert_eq!(ids, vec!["paid", "early", "late"]);
    }

    #[test]
    fn test_tenure_raises_priority() {
        let now = dt("2025-06-15 10:00");
        let a = reservation("a", "veteran", "10:00", 60, ReservationStatus::Requested);
        let b = reservation("b", "newcomer", "10:00", 60, ReservationStatus::Requested);
        let mut first_seen = HashMap::new();
        first_seen.insert("veteran".to_string(), dt("2024-01-01 00:00"));

        let ranked = rank_conflicts(
            vec![ConflictingReservation::from(&b), ConflictingReservation::from(&a)],
            &PriorityWeights::default(),
            now,
            &first_seen,
        );
        assert_eq!(ranked[0].reservation.id, "a");
        assert!(ranked[0].tenure_days > 365);
    }

    #[test]
    fn test_overlap_groups_chain_transitively() {
        let rows = vec![
            reservation("a", "c1", "10:00", 60, ReservationStatus::Confirmed),
            reservation("b", "c2", "10:30", 60, ReservationStatus::Requested),
            reservation("c", "c3", "11:15", 30, ReservationStatus::Requested),
            reservation("d", "c4", "14:00", 60, ReservationStatus::Confirmed),
            reservation("e", "c5", "14:00", 60, ReservationStatus::CancelledByShop),
        ];
        let groups = overlap_groups(&rows);
        assert_eq!(groups.len(), 1);
        let ids: Vec<_> = groups[0].iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
