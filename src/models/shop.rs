use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use super::hhmm;
use super::policy::{RefundPolicy, ReschedulePolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub operating_hours: OperatingHours,
    #[serde(default)]
    pub advance_policy: AdvancePolicy,
    #[serde(default)]
    pub cancellation_policy: String,
    #[serde(default)]
    pub reschedule_policy: ReschedulePolicy,
    #[serde(default)]
    pub refund_policy: RefundPolicy,
}

impl Shop {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (day, hours) in self.operating_hours.iter() {
            if let DayHours::Open { open, close } = hours {
                if close <= open {
                    anyhow::bail!(
                        "shop {}: closing time must be after opening time on {}",
                        self.id,
                        day_name(day)
                    );
                }
            }
        }
        if self.advance_policy.max_days_ahead > MAX_DAYS_AHEAD {
            anyhow::bail!(
                "shop {}: max_days_ahead must be at most {MAX_DAYS_AHEAD}, got {}",
                self.id,
                self.advance_policy.max_days_ahead
            );
        }
        if self.advance_policy.min_hours_ahead > self.advance_policy.max_days_ahead * 24 {
            anyhow::bail!("shop {}: min_hours_ahead exceeds max_days_ahead", self.id);
        }
        self.reschedule_policy.fee.validate()?;
        Ok(())
    }
}

/// Ten years; anything larger is a catalog mistake.
pub const MAX_DAYS_AHEAD: u32 = 3650;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancePolicy {
    #[serde(default = "default_max_days_ahead")]
    pub max_days_ahead: u32,
    #[serde(default)]
    pub min_hours_ahead: u32,
}

fn default_max_days_ahead() -> u32 {
    60
}

impl AdvancePolicy {
    /// Earliest and latest start accepted at `now`. Saturates instead of
    /// overflowing for policies that were never validated.
    pub fn window(&self, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        let earliest = now
            .checked_add_signed(Duration::hours(self.min_hours_ahead as i64))
            .unwrap_or(NaiveDateTime::MAX);
        let latest = now
            .checked_add_signed(Duration::days(self.max_days_ahead as i64))
            .unwrap_or(NaiveDateTime::MAX);
        (earliest, latest)
    }
}

impl Default for AdvancePolicy {
    fn default() -> Self {
        Self {
            max_days_ahead: default_max_days_ahead(),
            min_hours_ahead: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DayHours {
    Open {
        #[serde(with = "hhmm")]
        open: NaiveTime,
        #[serde(with = "hhmm")]
        close: NaiveTime,
    },
    #[default]
    Closed,
}

impl DayHours {
    pub fn window(&self) -> Option<(NaiveTime, NaiveTime)> {
        match self {
            DayHours::Open { open, close } => Some((*open, *close)),
            DayHours::Closed => None,
        }
    }
}

/// Weekly schedule; a missing weekday means the shop is closed that day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatingHours {
    #[serde(default)]
    pub mon: DayHours,
    #[serde(default)]
    pub tue: DayHours,
    #[serde(default)]
    pub wed: DayHours,
    #[serde(default)]
    pub thu: DayHours,
    #[serde(default)]
    pub fri: DayHours,
    #[serde(default)]
    pub sat: DayHours,
    #[serde(default)]
    pub sun: DayHours,
}

impl OperatingHours {
    pub fn every_day(open: NaiveTime, close: NaiveTime) -> Self {
        let day = DayHours::Open { open, close };
        Self {
            mon: day.clone(),
            tue: day.clone(),
            wed: day.clone(),
            thu: day.clone(),
            fri: day.clone(),
            sat: day.clone(),
            sun: day,
        }
    }

    pub fn for_weekday(&self, weekday: Weekday) -> &DayHours {
        match weekday {
            Weekday::Mon => &self.mon,
            Weekday::Tue => &self.tue,
            Weekday::Wed => &self.wed,
            Weekday::Thu => &self.thu,
            Weekday::Fri => &self.fri,
            Weekday::Sat => &self.sat,
            Weekday::Sun => &self.sun,
        }
    }

    pub fn for_date(&self, date: chrono::NaiveDate) -> &DayHours {
        self.for_weekday(date.weekday())
    }

    /// True if `[start, start + duration)` fits inside the open window for that day.
    pub fn contains(&self, date: chrono::NaiveDate, start: NaiveTime, duration_minutes: u32) -> bool {
        let Some((open, close)) = self.for_date(date).window() else {
            return false;
        };
        let end = start.overflowing_add_signed(chrono::Duration::minutes(duration_minutes as i64));
        // A window that wraps past midnight never fits a same-day schedule.
        end.1 == 0 && start >= open && end.0 <= close
    }

    pub fn iter(&self) -> impl Iterator<Item = (Weekday, &DayHours)> {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .map(move |d| (d, self.for_weekday(d)))
    }

    pub fn to_human_readable(&self) -> String {
        self.iter()
            .filter_map(|(day, hours)| {
                hours.window().map(|(open, close)| {
                    format!(
                        "{}: {}-{}",
                        day_name(day),
                        open.format(hhmm::FORMAT),
                        close.format(hhmm::FORMAT)
                    )
                })
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}
