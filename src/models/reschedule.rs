use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::hhmm;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequesterRole {
    User,
    Shop,
    Admin,
}

impl RequesterRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequesterRole::User => "user",
            RequesterRole::Shop => "shop",
            RequesterRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(RequesterRole::User),
            "shop" => Some(RequesterRole::Shop),
            "admin" => Some(RequesterRole::Admin),
            _ => None,
        }
    }
}

/// One row of the append-only reschedule log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleHistoryEntry {
    pub id: String,
    pub reservation_id: String,
    pub shop_id: String,
    pub previous_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub previous_time: NaiveTime,
    pub new_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub new_time: NaiveTime,
    pub reason: Option<String>,
    pub requester_role: RequesterRole,
    pub requester_id: String,
    pub fee_charged: i64,
    pub created_at: NaiveDateTime,
}
