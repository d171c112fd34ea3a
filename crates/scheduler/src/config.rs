use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::model::TriggerParams;
use crate::rule::{DailyAt, MonthRollover, Once, TriggerRule};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    #[default]
    MonthRollover,
    DailyAt,
    Once,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub rule: RuleKind,
    pub utc_offset_minutes: i32,
    /// Local time of day, `HH:MM` or `HH:MM:SS`.
    pub at: String,
    /// Absolute instant for the `once` rule.
    pub once_at: Option<DateTime<Utc>>,
    pub recheck_interval_ms: u64,
    /// 0 disables the pre-fire refresh.
    pub refresh_lead_ms: u64,
    pub grace_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            rule: RuleKind::MonthRollover,
            utc_offset_minutes: 9 * 60,
            at: "00:00:00".to_string(),
            once_at: None,
            recheck_interval_ms: 1_000,
            refresh_lead_ms: 3_000,
            grace_ms: 5_000,
        }
    }
}

impl TriggerConfig {
    pub fn tz(&self) -> Result<FixedOffset, SchedulerError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .ok_or(SchedulerError::InvalidOffset(self.utc_offset_minutes))
    }

    pub fn time_of_day(&self) -> Result<NaiveTime, SchedulerError> {
        let raw = self.at.trim();
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .map_err(|_| SchedulerError::InvalidTime(self.at.clone()))
    }

    pub fn build_rule(&self) -> Result<Arc<dyn TriggerRule>, SchedulerError> {
        let tz = self.tz()?;
        let rule: Arc<dyn TriggerRule> = match self.rule {
            RuleKind::MonthRollover => Arc::new(MonthRollover::new(tz, self.time_of_day()?)),
            RuleKind::DailyAt => Arc::new(DailyAt::new(tz, self.time_of_day()?)),
            RuleKind::Once => Arc::new(Once::new(
                self.once_at.ok_or(SchedulerError::MissingInstant)?,
            )),
        };
        Ok(rule)
    }

    pub fn params(&self) -> Result<TriggerParams, SchedulerError> {
        Ok(TriggerParams {
            tz: self.tz()?,
            recheck_interval: Duration::from_millis(self.recheck_interval_ms.max(1)),
            refresh_lead: (self.refresh_lead_ms > 0)
                .then(|| Duration::from_millis(self.refresh_lead_ms)),
            grace: Duration::from_millis(self.grace_ms),
        })
    }
}
