use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::hhmm;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub available: bool,
    pub capacity: u32,
    pub booked_count: u32,
}
