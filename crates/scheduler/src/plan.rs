//! One decision of the trigger loop, computed without touching a clock or a timer.

use std::time::Duration;

use chrono::{DateTime, Days, TimeZone, Utc};

use crate::model::TriggerParams;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanStep {
    /// Not yet on the target's calendar day; check again after this long.
    CoarseWait(Duration),
    /// Publish the pre-fire refresh now.
    Refresh,
    /// On the target day; sleep this long and re-plan.
    SleepUntil(Duration),
    Fire { late_by: Duration },
    Missed { late_by: Duration },
}

fn to_std(delta: chrono::Duration) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}

fn next_local_midnight(now: DateTime<Utc>, params: &TriggerParams) -> Option<DateTime<Utc>> {
    let tomorrow = now
        .with_timezone(&params.tz)
        .date_naive()
        .checked_add_days(Days::new(1))?;
    params
        .tz
        .from_local_datetime(&tomorrow.and_hms_opt(0, 0, 0)?)
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Decides what the loop does next. `refreshed` records whether the pre-fire
/// refresh for this target has already been published.
pub fn plan(
    adjusted_now: DateTime<Utc>,
    target: DateTime<Utc>,
    params: &TriggerParams,
    refreshed: bool,
) -> PlanStep {
    if adjusted_now >= target {
        let late_by = to_std(adjusted_now - target);
        return if late_by <= params.grace {
            PlanStep::Fire { late_by }
        } else {
            PlanStep::Missed { late_by }
        };
    }

    let remaining = to_std(target - adjusted_now);
    let lead = if refreshed { None } else { params.refresh_lead };
    if let Some(lead) = lead {
        if remaining <= lead {
            return PlanStep::Refresh;
        }
    }
    let until_wake = match lead {
        Some(lead) => remaining - lead,
        None => remaining,
    };
    let chunk = until_wake.min(params.recheck_interval).max(Duration::from_millis(1));

    let same_day = adjusted_now.with_timezone(&params.tz).date_naive()
        == target.with_timezone(&params.tz).date_naive();
    if same_day {
        return PlanStep::SleepUntil(chunk);
    }
    let to_midnight = next_local_midnight(adjusted_now, params)
        .map(|midnight| to_std(midnight - adjusted_now))
        .unwrap_or(chunk);
    PlanStep::CoarseWait(chunk.min(to_midnight.max(Duration::from_millis(1))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn params() -> TriggerParams {
        TriggerParams {
            tz: FixedOffset::east_opt(9 * 3600).unwrap(),
            recheck_interval: Duration::from_secs(60),
            refresh_lead: Some(Duration::from_secs(3)),
            grace: Duration::from_secs(5),
        }
    }

    fn local(h: u32, m: u32, s: u32, day: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, day, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn earlier_day_waits_coarsely_up_to_recheck() {
        let step = plan(local(12, 0, 0, 30), local(0, 0, 0, 31), &params(), false);
        assert_eq!(step, PlanStep::CoarseWait(Duration::from_secs(60)));
    }

    #[test]
    fn coarse_wait_stops_at_local_midnight() {
        let step = plan(local(23, 59, 50, 29), local(10, 0, 0, 31), &params(), false);
        assert_eq!(step, PlanStep::CoarseWait(Duration::from_secs(10)));
    }

    #[test]
    fn same_day_sleeps_until_refresh_point() {
        let step = plan(local(9, 59, 30, 31), local(10, 0, 0, 31), &params(), false);
        assert_eq!(step, PlanStep::SleepUntil(Duration::from_secs(27)));
    }

    #[test]
    fn refresh_then_sleep_to_target() {
        let now = local(9, 59, 58, 31);
        let target = local(10, 0, 0, 31);
        assert_eq!(plan(now, target, &params(), false), PlanStep::Refresh);
        assert_eq!(
            plan(now, target, &params(), true),
            PlanStep::SleepUntil(Duration::from_secs(2))
        );
    }

    #[test]
    fn refresh_may_precede_the_target_day() {
        let step = plan(local(23, 59, 58, 30), local(0, 0, 0, 31), &params(), false);
        assert_eq!(step, PlanStep::Refresh);
    }

    #[test]
    fn on_time_and_late_within_grace_fire() {
        let target = local(0, 0, 0, 31);
        assert_eq!(
            plan(target, target, &params(), true),
            PlanStep::Fire {
                late_by: Duration::ZERO
            }
        );
        assert_eq!(
            plan(local(0, 0, 4, 31), target, &params(), true),
            PlanStep::Fire {
                late_by: Duration::from_secs(4)
            }
        );
    }

    #[test]
    fn beyond_grace_is_missed() {
        let step = plan(local(0, 1, 0, 31), local(0, 0, 0, 31), &params(), true);
        assert_eq!(
            step,
            PlanStep::Missed {
                late_by: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn no_refresh_configured_sleeps_to_target() {
        let mut params = params();
        params.refresh_lead = None;
        let step = plan(local(9, 59, 58, 31), local(10, 0, 0, 31), &params, false);
        assert_eq!(step, PlanStep::SleepUntil(Duration::from_secs(2)));
    }
}
