//! Trigger translation
//!
//! Turns an [`ActionTrigger`] into a [`FiringRule`] the engine can drive:
//! - `next_after`: next fire strictly after an instant (engine timers)
//! - `last_fire_before`: latest fire strictly before an instant (validator)
//!
//! All wall-clock arithmetic happens in one [`Location`]. Days that do not
//! exist in short months clamp to the month's last day, and wall times that
//! fall into a DST gap resolve to the first valid instant after it.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, Local, Months, NaiveDate, NaiveTime, TimeZone,
    Utc, Weekday,
};
use chrono_tz::Tz;
use cron::Schedule;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{Error, Result};
use crate::schedule::ActionTrigger;

/// Upper bound on forward steps when searching for a previous cron fire
const MAX_CRON_STEPS: usize = 10_000;

/// Timezone every schedule is evaluated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Location {
    /// System local time
    #[default]
    Local,
    /// IANA timezone
    Zone(Tz),
}

impl Location {
    /// Resolve an IANA name, empty meaning local time
    ///
    /// Unknown names fall back to local time so a typo never blocks
    /// schedule load.
    pub fn resolve(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() {
            return Self::Local;
        }
        match name.parse::<Tz>() {
            Ok(tz) => Self::Zone(tz),
            Err(e) => {
                warn!(timezone = name, error = %e, "Unknown timezone, falling back to local time");
                Self::Local
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("Local"),
            Self::Zone(tz) => f.write_str(tz.name()),
        }
    }
}

/// Engine-native rule derived from a trigger
#[derive(Debug, Clone)]
pub enum FiringRule {
    /// Parsed cron schedule
    Cron(Schedule),
    /// Every day at a wall time
    Daily(NaiveTime),
    /// Every week on a weekday at a wall time
    Weekly {
        /// Wall time
        time: NaiveTime,
        /// Day of week
        weekday: Weekday,
    },
    /// Every month on a (clamped) day at a wall time
    Monthly {
        /// Wall time
        time: NaiveTime,
        /// Day of month, 1-31
        day: u32,
    },
    /// Fixed period measured from the previous fire
    Interval(std::time::Duration),
    /// Single fire
    Once(DateTime<Utc>),
}

impl FiringRule {
    /// Translate a trigger, rejecting malformed ones
    pub fn from_trigger(trigger: &ActionTrigger) -> Result<Self> {
        match trigger {
            ActionTrigger::Cron { expression } => parse_cron(expression).map(Self::Cron),
            ActionTrigger::Daily { time } => Ok(Self::Daily(time.naive())),
            ActionTrigger::Weekly { time, weekday } => Ok(Self::Weekly {
                time: time.naive(),
                weekday: weekday_from_sunday(*weekday)?,
            }),
            ActionTrigger::Monthly { time, day } => {
                if !(1..=31).contains(day) {
                    return Err(Error::InvalidTrigger(format!(
                        "invalid day of month {day}, expected 1-31"
                    )));
                }
                Ok(Self::Monthly {
                    time: time.naive(),
                    day: u32::from(*day),
                })
            }
            ActionTrigger::Interval { every } => {
                if every.is_zero() {
                    return Err(Error::InvalidTrigger(
                        "interval must be greater than zero".to_string(),
                    ));
                }
                Ok(Self::Interval(*every))
            }
            ActionTrigger::Once { at } => Ok(Self::Once(*at)),
        }
    }

    /// Short kind name
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Cron(_) => "cron",
            Self::Daily(_) => "daily",
            Self::Weekly { .. } => "weekly",
            Self::Monthly { .. } => "monthly",
            Self::Interval(_) => "interval",
            Self::Once(_) => "once",
        }
    }

    /// Next fire strictly after `after`, `None` when the rule is exhausted
    pub fn next_after(&self, after: DateTime<Utc>, location: &Location) -> Option<DateTime<Utc>> {
        match location {
            Location::Local => self
                .next_in(&after.with_timezone(&Local))
                .map(|t| t.with_timezone(&Utc)),
            Location::Zone(tz) => self
                .next_in(&after.with_timezone(tz))
                .map(|t| t.with_timezone(&Utc)),
        }
    }

    /// Latest fire strictly before `now`
    ///
    /// Fails for interval and one-time rules, which have no deterministic
    /// previous fire, and for cron expressions with no fire in the lookback.
    pub fn last_fire_before(&self, now: DateTime<Utc>, location: &Location) -> Result<DateTime<Utc>> {
        let found = match location {
            Location::Local => self
                .last_in(&now.with_timezone(&Local))?
                .map(|t| t.with_timezone(&Utc)),
            Location::Zone(tz) => self
                .last_in(&now.with_timezone(tz))?
                .map(|t| t.with_timezone(&Utc)),
        };
        found.ok_or(Error::NoPriorFire(now))
    }

    fn next_in<Z: TimeZone>(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
        let tz = after.timezone();
        let today = after.date_naive();

        match self {
            Self::Cron(schedule) => schedule.after(after).next(),
            Self::Daily(time) => (0..3)
                .filter_map(|offset| at_local(&tz, today + ChronoDuration::days(offset), *time))
                .find(|candidate| candidate > after),
            Self::Weekly { time, weekday } => {
                let ahead = days_between(today.weekday(), *weekday);
                [ahead, ahead + 7]
                    .into_iter()
                    .filter_map(|days| at_local(&tz, today + ChronoDuration::days(days), *time))
                    .find(|candidate| candidate > after)
            }
            Self::Monthly { time, day } => (0..3)
                .filter_map(|offset| {
                    let date = month_occurrence(today, offset, *day)?;
                    at_local(&tz, date, *time)
                })
                .find(|candidate| candidate > after),
            Self::Interval(every) => {
                let step = ChronoDuration::from_std(*every).ok()?;
                after.clone().checked_add_signed(step)
            }
            Self::Once(at) => {
                let at = at.with_timezone(&tz);
                (at > *after).then_some(at)
            }
        }
    }

    fn last_in<Z: TimeZone>(&self, now: &DateTime<Z>) -> Result<Option<DateTime<Z>>> {
        let tz = now.timezone();
        let today = now.date_naive();

        let found = match self {
            Self::Cron(schedule) => last_cron_fire(schedule, now),
            Self::Daily(time) => (0..3)
                .filter_map(|back| at_local(&tz, today - ChronoDuration::days(back), *time))
                .find(|candidate| candidate < now),
            Self::Weekly { time, weekday } => {
                let back = days_between(*weekday, today.weekday());
                [back, back + 7]
                    .into_iter()
                    .filter_map(|days| at_local(&tz, today - ChronoDuration::days(days), *time))
                    .find(|candidate| candidate < now)
            }
            Self::Monthly { time, day } => (0..3)
                .filter_map(|back| {
                    let date = month_occurrence(today, -back, *day)?;
                    at_local(&tz, date, *time)
                })
                .find(|candidate| candidate < now),
            Self::Interval(_) | Self::Once(_) => {
                return Err(Error::NotReconcilable(self.kind_name()));
            }
        };
        Ok(found)
    }
}

/// Parse a cron expression with 5 fields or 6 fields (seconds first)
///
/// Numeric day-of-week values use 0 (or 7) for Sunday.
fn parse_cron(expression: &str) -> Result<Schedule> {
    let expr = expression.trim();
    let invalid = |reason: String| {
        Error::InvalidTrigger(format!("invalid cron expression {expr:?}: {reason}"))
    };

    if expr.starts_with('@') {
        return Schedule::from_str(expr).map_err(|e| invalid(e.to_string()));
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.as_slice() {
        [sec, min, hour, dom, month, dow] => {
            let dow = normalize_weekdays(dow).map_err(invalid)?;
            format!("{sec} {min} {hour} {dom} {month} {dow}")
        }
        [min, hour, dom, month, dow] => {
            let dow = normalize_weekdays(dow).map_err(invalid)?;
            format!("0 {min} {hour} {dom} {month} {dow}")
        }
        other => return Err(invalid(format!("{} fields, expected 5 or 6", other.len()))),
    };

    Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
}

/// Rewrite numeric weekdays (0-7, Sunday = 0 or 7) as names
fn normalize_weekdays(field: &str) -> std::result::Result<String, String> {
    const NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

    let name = |atom: &str| -> std::result::Result<String, String> {
        if !atom.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(atom.to_string());
        }
        match atom.parse::<usize>() {
            Ok(n) if n <= 7 => Ok(NAMES[n % 7].to_string()),
            _ => Err(format!("day of week {atom} out of range 0-7")),
        }
    };

    let mut items = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };

        let range = match range.split_once('-') {
            Some(("0", "7")) => "*".to_string(),
            // "N-7" ends on Sunday, which sorts first, so split off Sunday
            Some((from, "7")) if step.is_none() && from != "0" && from != "7" => {
                items.push("SUN".to_string());
                format!("{}-SAT", name(from)?)
            }
            Some((from, to)) => format!("{}-{}", name(from)?, name(to)?),
            None if range == "*" || range == "?" => range.to_string(),
            None => name(range)?,
        };

        items.push(match step {
            Some(step) => format!("{range}/{step}"),
            None => range,
        });
    }

    Ok(items.join(","))
}

fn last_cron_fire<Z: TimeZone>(schedule: &Schedule, now: &DateTime<Z>) -> Option<DateTime<Z>> {
    // The year-long walk exhausts its step budget on high-frequency
    // expressions, so narrower windows are tried before giving up.
    let windows = [
        now.clone().checked_sub_months(Months::new(12)),
        now.clone().checked_sub_signed(ChronoDuration::days(1)),
        now.clone().checked_sub_signed(ChronoDuration::hours(1)),
        now.clone().checked_sub_signed(ChronoDuration::minutes(1)),
    ];

    for start in windows.into_iter().flatten() {
        let mut previous = None;
        let mut crossed = false;
        for fire in schedule.after(&start).take(MAX_CRON_STEPS) {
            if fire >= *now {
                crossed = true;
                break;
            }
            previous = Some(fire);
        }
        if crossed {
            return previous;
        }
    }
    None
}

fn weekday_from_sunday(day: u8) -> Result<Weekday> {
    match day {
        0 => Ok(Weekday::Sun),
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        other => Err(Error::InvalidTrigger(format!(
            "invalid weekday {other}, expected 0-6 with 0 = Sunday"
        ))),
    }
}

/// Days to go forward from `from` to reach `to`, 0-6
fn days_between(from: Weekday, to: Weekday) -> i64 {
    let from = i64::from(from.num_days_from_sunday());
    let to = i64::from(to.num_days_from_sunday());
    (to - from).rem_euclid(7)
}

/// Date of the monthly occurrence `offset` months away from `anchor`'s month
fn month_occurrence(anchor: NaiveDate, offset: i64, day: u32) -> Option<NaiveDate> {
    let first = anchor.with_day(1)?;
    let first = if offset >= 0 {
        first.checked_add_months(Months::new(u32::try_from(offset).ok()?))?
    } else {
        first.checked_sub_months(Months::new(u32::try_from(-offset).ok()?))?
    };
    let last_day = last_day_of_month(first)?;
    first.with_day(day.min(last_day))
}

fn last_day_of_month(first: NaiveDate) -> Option<u32> {
    let next = first.checked_add_months(Months::new(1))?;
    Some(next.pred_opt()?.day())
}

/// Resolve a wall time on `date`, skipping forward over DST gaps
fn at_local<Z: TimeZone>(tz: &Z, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Z>> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive).earliest().or_else(|| {
        tz.from_local_datetime(&(naive + ChronoDuration::hours(1)))
            .earliest()
    })
}
