//! Calendar rules producing trigger instants.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

pub trait TriggerRule: Send + Sync + fmt::Debug {
    /// First instant strictly after `after`, or `None` once the rule is exhausted.
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;

    fn describe(&self) -> String;
}

/// The next `count` instants of `rule` after `from`, fewer if the rule runs out.
pub fn upcoming(rule: &dyn TriggerRule, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    let mut out = Vec::with_capacity(count);
    let mut cursor = from;
    while out.len() < count {
        match rule.next_after(cursor) {
            Some(next) => {
                out.push(next);
                cursor = next;
            }
            None => break,
        }
    }
    out
}

fn local_instant(tz: &FixedOffset, date: NaiveDate, at: NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(at))
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

/// The day after the last calendar day of each month, at `at` local time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonthRollover {
    pub tz: FixedOffset,
    pub at: NaiveTime,
}

impl MonthRollover {
    pub fn new(tz: FixedOffset, at: NaiveTime) -> Self {
        Self { tz, at }
    }

    pub fn midnight(tz: FixedOffset) -> Self {
        Self::new(tz, NaiveTime::MIN)
    }
}

impl TriggerRule for MonthRollover {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.tz).date_naive();
        let this_month = local.with_day(1)?;
        let candidate = local_instant(&self.tz, this_month, self.at)?;
        if candidate > after {
            return Some(candidate);
        }
        local_instant(&self.tz, first_of_next_month(local)?, self.at)
    }

    fn describe(&self) -> String {
        format!("first day of every month at {} ({})", self.at, self.tz)
    }
}

/// Every day at a fixed local time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DailyAt {
    pub tz: FixedOffset,
    pub at: NaiveTime,
}

impl DailyAt {
    pub fn new(tz: FixedOffset, at: NaiveTime) -> Self {
        Self { tz, at }
    }
}

impl TriggerRule for DailyAt {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = after.with_timezone(&self.tz).date_naive();
        let candidate = local_instant(&self.tz, today, self.at)?;
        if candidate > after {
            return Some(candidate);
        }
        local_instant(&self.tz, today + Duration::days(1), self.at)
    }

    fn describe(&self) -> String {
        format!("every day at {} ({})", self.at, self.tz)
    }
}

/// A single absolute instant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Once {
    pub at: DateTime<Utc>,
}

impl Once {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }
}

impl TriggerRule for Once {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.at > after).then_some(self.at)
    }

    fn describe(&self) -> String {
        format!("once at {}", self.at.to_rfc3339())
    }
}
