//! Next-fire computation for repeatable jobs.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use crate::error::JobQueueError;
use crate::types::Repeat;

/// Convert a 5-field Unix cron expression to the 7-field form the `cron` crate parses.
fn to_cron_crate_format(expression: &str) -> String {
    match expression.split_whitespace().count() {
        5 => format!("0 {} *", expression.trim()),
        _ => expression.to_string(),
    }
}

pub(crate) fn parse_cron(expression: &str) -> Result<Schedule, JobQueueError> {
    Schedule::from_str(&to_cron_crate_format(expression))
        .map_err(|e| JobQueueError::InvalidSchedule(format!("{expression}: {e}")))
}

/// Reject schedules that could never fire.
pub(crate) fn validate(repeat: &Repeat) -> Result<(), JobQueueError> {
    match repeat {
        Repeat::Every { every_ms: 0 } => Err(JobQueueError::InvalidSchedule(
            "interval must be greater than zero".into(),
        )),
        Repeat::Every { .. } => Ok(()),
        Repeat::Cron { pattern } => parse_cron(pattern).map(|_| ()),
    }
}

/// First fire time of a fresh registration. Intervals fire immediately.
pub(crate) fn first_run(repeat: &Repeat, now: DateTime<Utc>) -> Result<DateTime<Utc>, JobQueueError> {
    match repeat {
        Repeat::Every { .. } => Ok(now),
        Repeat::Cron { pattern } => cron_after(pattern, now),
    }
}

/// Fire time following `previous`, never at or before `now`.
pub(crate) fn next_run(
    repeat: &Repeat,
    previous: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, JobQueueError> {
    match repeat {
        Repeat::Every { every_ms } => {
            let every = *every_ms as i64;
            let elapsed = (now - previous).num_milliseconds().max(0);
            // skip intervals missed while nothing was claiming
            let steps = elapsed / every + 1;
            Ok(previous + Duration::milliseconds(every.saturating_mul(steps)))
        }
        Repeat::Cron { pattern } => cron_after(pattern, previous.max(now)),
    }
}

fn cron_after(pattern: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, JobQueueError> {
    parse_cron(pattern)?
        .after(&after)
        .next()
        .ok_or_else(|| JobQueueError::InvalidSchedule(format!("{pattern}: no upcoming run")))
}
