use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    PaymentState, RequesterRole, RescheduleHistoryEntry, Reservation, ReservationStatus,
    ServiceLine,
};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const RESERVATION_COLUMNS: &str = "id, shop_id, customer_id, lines, reservation_date, reservation_time, \
     total_duration_minutes, total_amount, deposit_amount, points_applied, status, payment_state, \
     special_requests, reason, created_at, updated_at";

fn fmt_date(d: &NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn fmt_time(t: &NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

// ── Reservations ──

pub fn insert_reservation(conn: &Connection, r: &Reservation) -> anyhow::Result<()> {
    let lines = serde_json::to_string(&r.lines)?;

    conn.execute(
        &format!(
            "INSERT INTO reservations ({RESERVATION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        ),
        params![
            r.id,
            r.shop_id,
            r.customer_id,
            lines,
            fmt_date(&r.date),
            fmt_time(&r.time),
            r.total_duration_minutes,
            r.total_amount,
            r.deposit_amount,
            r.points_applied,
            r.status.as_str(),
            r.payment_state.as_str(),
            r.special_requests,
            r.reason,
            fmt_ts(&r.created_at),
            fmt_ts(&r.updated_at),
        ],
    )
    .with_context(|| format!("failed to insert reservation {}", r.id))?;
    Ok(())
}

pub fn get_reservation(conn: &Connection, id: &str) -> anyhow::Result<Option<Reservation>> {
    let row = conn
        .query_row(
            &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?1"),
            params![id],
            |row| Ok(parse_reservation_row(row)),
        )
        .optional()?;

    row.transpose()
}

/// Requested and confirmed reservations for one shop on one date, earliest first.
pub fn list_active_for_shop_date(
    conn: &Connection,
    shop_id: &str,
    date: &NaiveDate,
) -> anyhow::Result<Vec<Reservation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations
         WHERE shop_id = ?1 AND reservation_date = ?2 AND status IN ('requested', 'confirmed')
         ORDER BY reservation_time ASC, created_at ASC"
    ))?;

    let rows = stmt.query_map(params![shop_id, fmt_date(date)], |row| {
        Ok(parse_reservation_row(row))
    })?;

    let mut reservations = vec![];
    for row in rows {
        reservations.push(row??);
    }
    Ok(reservations)
}

/// Reservations in `status` dated on or before `through`, candidates for the sweep.
pub fn list_by_status_through(
    conn: &Connection,
    status: ReservationStatus,
    through: &NaiveDate,
) -> anyhow::Result<Vec<Reservation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations
         WHERE status = ?1 AND reservation_date <= ?2
         ORDER BY reservation_date ASC, reservation_time ASC"
    ))?;

    let rows = stmt.query_map(params![status.as_str(), fmt_date(through)], |row| {
        Ok(parse_reservation_row(row))
    })?;

    let mut reservations = vec![];
    for row in rows {
        reservations.push(row??);
    }
    Ok(reservations)
}

#[derive(Debug, Default, Clone)]
pub struct ReservationFilter {
    pub shop_id: Option<String>,
    pub customer_id: Option<String>,
    pub status: Option<ReservationStatus>,
    pub date: Option<NaiveDate>,
}

pub fn list_reservations(
    conn: &Connection,
    filter: &ReservationFilter,
    limit: i64,
) -> anyhow::Result<Vec<Reservation>> {
    let mut clauses = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(shop_id) = &filter.shop_id {
        values.push(Box::new(shop_id.clone()));
        clauses.push(format!("shop_id = ?{}", values.len()));
    }
    if let Some(customer_id) = &filter.customer_id {
        values.push(Box::new(customer_id.clone()));
        clauses.push(format!("customer_id = ?{}", values.len()));
    }
    if let Some(status) = filter.status {
        values.push(Box::new(status.as_str()));
        clauses.push(format!("status = ?{}", values.len()));
    }
    if let Some(date) = filter.date {
        values.push(Box::new(fmt_date(&date)));
        clauses.push(format!("reservation_date = ?{}", values.len()));
    }
    values.push(Box::new(limit));
    let limit_param = values.len();

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations {where_sql}
         ORDER BY reservation_date DESC, reservation_time DESC LIMIT ?{limit_param}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_reservation_row(row)))?;

    let mut reservations = vec![];
    for row in rows {
        reservations.push(row??);
    }
    Ok(reservations)
}

/// Compare-and-set status change against the row as the caller last saw it.
/// Returns false when the status or the scheduled window has moved since, so a
/// racing writer that already changed it wins.
pub fn update_status(
    conn: &Connection,
    seen: &Reservation,
    next: ReservationStatus,
    reason: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE reservations SET status = ?1, reason = COALESCE(?2, reason), updated_at = ?3
         WHERE id = ?4 AND status = ?5 AND reservation_date = ?6 AND reservation_time = ?7",
        params![
            next.as_str(),
            reason,
            fmt_ts(now),
            seen.id,
            seen.status.as_str(),
            fmt_date(&seen.date),
            fmt_time(&seen.time),
        ],
    )?;
    Ok(count > 0)
}

/// Moves an active reservation to a new window, guarded on its current window.
#[allow(clippy::too_many_arguments)]
pub fn update_schedule(
    conn: &Connection,
    id: &str,
    expected_date: &NaiveDate,
    expected_time: &NaiveTime,
    new_date: &NaiveDate,
    new_time: &NaiveTime,
    total_amount: i64,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE reservations SET reservation_date = ?1, reservation_time = ?2, total_amount = ?3, updated_at = ?4
         WHERE id = ?5 AND reservation_date = ?6 AND reservation_time = ?7
           AND status IN ('requested', 'confirmed')",
        params![
            fmt_date(new_date),
            fmt_time(new_time),
            total_amount,
            fmt_ts(now),
            id,
            fmt_date(expected_date),
            fmt_time(expected_time),
        ],
    )?;
    Ok(count > 0)
}

pub fn set_payment_state(
    conn: &Connection,
    id: &str,
    state: PaymentState,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE reservations SET payment_state = ?1, updated_at = ?2 WHERE id = ?3",
        params![state.as_str(), fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

/// Earliest reservation timestamp for a customer; the start of their tenure.
pub fn customer_first_seen(
    conn: &Connection,
    customer_id: &str,
) -> anyhow::Result<Option<NaiveDateTime>> {
    let first: Option<String> = conn.query_row(
        "SELECT MIN(created_at) FROM reservations WHERE customer_id = ?1",
        params![customer_id],
        |row| row.get(0),
    )?;

    first
        .map(|s| NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).context("invalid created_at"))
        .transpose()
}

fn parse_reservation_row(row: &rusqlite::Row) -> anyhow::Result<Reservation> {
    let id: String = row.get(0)?;
    let lines_json: String = row.get(3)?;
    let date_str: String = row.get(4)?;
    let time_str: String = row.get(5)?;
    let status_str: String = row.get(10)?;
    let payment_str: String = row.get(11)?;
    let created_at_str: String = row.get(14)?;
    let updated_at_str: String = row.get(15)?;

    let lines: Vec<ServiceLine> = serde_json::from_str(&lines_json)
        .with_context(|| format!("reservation {id}: invalid service lines"))?;
    let status = ReservationStatus::parse(&status_str)
        .with_context(|| format!("reservation {id}: unknown status {status_str}"))?;
    let payment_state = PaymentState::parse(&payment_str)
        .with_context(|| format!("reservation {id}: unknown payment state {payment_str}"))?;

    Ok(Reservation {
        shop_id: row.get(1)?,
        customer_id: row.get(2)?,
        lines,
        date: NaiveDate::parse_from_str(&date_str, DATE_FORMAT)?,
        time: NaiveTime::parse_from_str(&time_str, TIME_FORMAT)?,
        total_duration_minutes: row.get(6)?,
        total_amount: row.get(7)?,
        deposit_amount: row.get(8)?,
        points_applied: row.get(9)?,
        status,
        payment_state,
        special_requests: row.get(12)?,
        reason: row.get(13)?,
        created_at: NaiveDateTime::parse_from_str(&created_at_str, TIMESTAMP_FORMAT)?,
        updated_at: NaiveDateTime::parse_from_str(&updated_at_str, TIMESTAMP_FORMAT)?,
        id,
    })
}

// ── Reschedule History ──

pub fn insert_history(conn: &Connection, entry: &RescheduleHistoryEntry) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO reschedule_history (id, reservation_id, shop_id, previous_date, previous_time,
            new_date, new_time, reason, requester_role, requester_id, fee_charged, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            entry.id,
            entry.reservation_id,
            entry.shop_id,
            fmt_date(&entry.previous_date),
            fmt_time(&entry.previous_time),
            fmt_date(&entry.new_date),
            fmt_time(&entry.new_time),
            entry.reason,
            entry.requester_role.as_str(),
            entry.requester_id,
            entry.fee_charged,
            fmt_ts(&entry.created_at),
        ],
    )
    .with_context(|| format!("failed to append reschedule history for {}", entry.reservation_id))?;
    Ok(())
}

pub fn list_history(
    conn: &Connection,
    reservation_id: &str,
) -> anyhow::Result<Vec<RescheduleHistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, reservation_id, shop_id, previous_date, previous_time, new_date, new_time,
                reason, requester_role, requester_id, fee_charged, created_at
         FROM reschedule_history WHERE reservation_id = ?1
         ORDER BY created_at ASC, rowid ASC",
    )?;

    let rows = stmt.query_map(params![reservation_id], |row| Ok(parse_history_row(row)))?;

    let mut entries = vec![];
    for row in rows {
        entries.push(row??);
    }
    Ok(entries)
}

pub fn count_history(conn: &Connection, reservation_id: &str) -> anyhow::Result<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM reschedule_history WHERE reservation_id = ?1",
        params![reservation_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn parse_history_row(row: &rusqlite::Row) -> anyhow::Result<RescheduleHistoryEntry> {
    let previous_date: String = row.get(3)?;
    let previous_time: String = row.get(4)?;
    let new_date: String = row.get(5)?;
    let new_time: String = row.get(6)?;
    let role_str: String = row.get(8)?;
    let created_at: String = row.get(11)?;

    Ok(RescheduleHistoryEntry {
        id: row.get(0)?,
        reservation_id: row.get(1)?,
        shop_id: row.get(2)?,
        previous_date: NaiveDate::parse_from_str(&previous_date, DATE_FORMAT)?,
        previous_time: NaiveTime::parse_from_str(&previous_time, TIME_FORMAT)?,
        new_date: NaiveDate::parse_from_str(&new_date, DATE_FORMAT)?,
        new_time: NaiveTime::parse_from_str(&new_time, TIME_FORMAT)?,
        reason: row.get(7)?,
        requester_role: RequesterRole::parse(&role_str)
            .with_context(|| format!("unknown requester role {role_str}"))?,
        requester_id: row.get(9)?,
        fee_charged: row.get(10)?,
        created_at: NaiveDateTime::parse_from_str(&created_at, TIMESTAMP_FORMAT)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn reservation(id: &str, time: &str, status: ReservationStatus) -> Reservation {
        let now = dt("2025-06-10 09:00");
        Reservation {
            id: id.to_string(),
            shop_id: "shop-1".to_string(),
            customer_id: "cust-1".to_string(),
            lines: vec![ServiceLine {
                service_id: "cut".to_string(),
                quantity: 1,
            }],
            date: NaiveDate::from_ymd_opt(2025, 6, 16).unwrap(),
            time: NaiveTime::parse_from_str(time, TIME_FORMAT).unwrap(),
            total_duration_minutes: 60,
            total_amount: 30000,
            deposit_amount: 5000,
            points_applied: 0,
            status,
            payment_state: PaymentState::Pending,
            special_requests: None,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_and_get_reservation() {
        let conn = db::init_db(":memory:").unwrap();
        let r = reservation("r1", "10:00", ReservationStatus::Requested);
        insert_reservation(&conn, &r).unwrap();

        let loaded = get_reservation(&conn, "r1").unwrap().unwrap();
        assert_eq!(loaded.time, r.time);
        assert_eq!(loaded.lines, r.lines);
        assert_eq!(loaded.status, ReservationStatus::Requested);
        assert!(get_reservation(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_deposit_above_total_rejected_by_schema() {
        let conn = db::init_db(":memory:").unwrap();
        let mut r = reservation("r1", "10:00", ReservationStatus::Requested);
        r.deposit_amount = r.total_amount + 1;
        assert!(insert_reservation(&conn, &r).is_err());
    }

    #[test]
    fn test_active_listing_skips_terminal_rows() {
        let conn = db::init_db(":memory:").unwrap();
        insert_reservation(&conn, &reservation("a", "10:00", ReservationStatus::Confirmed)).unwrap();
        insert_reservation(&conn, &reservation("b", "12:00", ReservationStatus::NoShow)).unwrap();
        insert_reservation(&conn, &reservation("c", "11:00", ReservationStatus::Requested)).unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 6, 16).unwrap();
        let active = list_active_for_shop_date(&conn, "shop-1", &date).unwrap();
        let ids: Vec<_> = active.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_update_status_is_compare_and_set() {
        let conn = db::init_db(":memory:").unwrap();
        let seen = reservation("r1", "10:00", ReservationStatus::Confirmed);
        insert_reservation(&conn, &seen).unwrap();
        let now = dt("2025-06-16 12:00");

        assert!(update_status(&conn, &seen, ReservationStatus::NoShow, Some("no check-in"), &now).unwrap());
        // Second writer expecting the old state loses
        assert!(!update_status(&conn, &seen, ReservationStatus::NoShow, Some("no check-in"), &now).unwrap());

        let loaded = get_reservation(&conn, "r1").unwrap().unwrap();
        assert_eq!(loaded.status, ReservationStatus::NoShow);
        assert_eq!(loaded.reason.as_deref(), Some("no check-in"));
        assert_eq!(loaded.updated_at, now);
    }

    #[test]
    fn test_update_status_loses_to_a_moved_window() {
        let conn = db::init_db(":memory:").unwrap();
        let seen = reservation("r1", "10:00", ReservationStatus::Confirmed);
        insert_reservation(&conn, &seen).unwrap();
        let now = dt("2025-06-16 12:00");

        let new_date = NaiveDate::from_ymd_opt(2025, 6, 17).unwrap();
        let new_time = NaiveTime::from_hms_opt(15, 0, 0).unwrap();
        assert!(update_schedule(&conn, "r1", &seen.date, &seen.time, &new_date, &new_time, 30000, &now)
            .unwrap());

        // still confirmed, but no longer at the window `seen` describes
        assert!(!update_status(&conn, &seen, ReservationStatus::NoShow, None, &now).unwrap());
        let loaded = get_reservation(&conn, "r1").unwrap().unwrap();
        assert_eq!(loaded.status, ReservationStatus::Confirmed);
    }

    #[test]
    fn test_history_is_append_only() {
        let conn = db::init_db(":memory:").unwrap();
        insert_reservation(&conn, &reservation("r1", "10:00", ReservationStatus::Confirmed)).unwrap();
        let entry = RescheduleHistoryEntry {
            id: "h1".to_string(),
            reservation_id: "r1".to_string(),
            shop_id: "shop-1".to_string(),
            previous_date: NaiveDate::from_ymd_opt(2025, 6, 16).unwrap(),
            previous_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            new_date: NaiveDate::from_ymd_opt(2025, 6, 17).unwrap(),
            new_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            reason: Some("conflict".to_string()),
            requester_role: RequesterRole::User,
            requester_id: "cust-1".to_string(),
            fee_charged: 0,
            created_at: dt("2025-06-12 08:00"),
        };
        insert_history(&conn, &entry).unwrap();
        assert_eq!(count_history(&conn, "r1").unwrap(), 1);
        assert_eq!(list_history(&conn, "r1").unwrap()[0].new_time, entry.new_time);

        assert!(conn
            .execute("UPDATE reschedule_history SET fee_charged = 1", [])
            .is_err());
        assert!(conn.execute("DELETE FROM reschedule_history", []).is_err());
    }

    #[test]
    fn test_list_reservations_filters() {
        let conn = db::init_db(":memory:").unwrap();
        insert_reservation(&conn, &reservation("a", "10:00", ReservationStatus::Confirmed)).unwrap();
        insert_reservation(&conn, &reservation("b", "12:00", ReservationStatus::Requested)).unwrap();

        let filter = ReservationFilter {
            status: Some(ReservationStatus::Requested),
            ..Default::default()
        };
        let found = list_reservations(&conn, &filter, 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b");

        let all = list_reservations(&conn, &ReservationFilter::default(), 10).unwrap();
        assert_eq!(all.len(), 2);
    }
}
