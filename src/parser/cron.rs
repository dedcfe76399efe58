// ABOUTME: Five-field cron expression parsing and next-fire-time calculation
// ABOUTME: Supports *, numbers, names, */N, a-b, a-b/N and comma lists, evaluated in UTC

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on how far ahead `next_after` searches before giving up.
/// Five years covers every satisfiable combination, including Feb 29.
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day month weekday), found {0}")]
    FieldCount(usize),

    #[error("{field}: empty value")]
    Empty { field: &'static str },

    #[error("{field}: '{value}' is not a number")]
    NotANumber { field: &'static str, value: String },

    #[error("{field}: {value} is out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("{field}: invalid range {start}-{end}")]
    InvalidRange {
        field: &'static str,
        start: u32,
        end: u32,
    },

    #[error("{field}: step must be greater than 0")]
    ZeroStep { field: &'static str },
}

#[derive(Debug, Clone, Copy)]
struct FieldBounds {
    name: &'static str,
    min: u32,
    max: u32,
    /// Three-letter aliases, the first standing for `min`
    aliases: &'static [&'static str],
}

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

const MINUTE: FieldBounds = FieldBounds {
    name: "minute",
    min: 0,
    max: 59,
    aliases: &[],
};
const HOUR: FieldBounds = FieldBounds {
    name: "hour",
    min: 0,
    max: 23,
    aliases: &[],
};
const DAY_OF_MONTH: FieldBounds = FieldBounds {
    name: "day",
    min: 1,
    max: 31,
    aliases: &[],
};
const MONTH: FieldBounds = FieldBounds {
    name: "month",
    min: 1,
    max: 12,
    aliases: MONTH_NAMES,
};
// 7 is accepted as an alias for Sunday and folded onto 0.
const DAY_OF_WEEK: FieldBounds = FieldBounds {
    name: "weekday",
    min: 0,
    max: 7,
    aliases: DAY_NAMES,
};

/// A set of allowed values for one cron field, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CronField {
    bits: u64,
    wildcard: bool,
}

impl CronField {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }

    fn parse(raw: &str, bounds: FieldBounds) -> Result<Self, CronError> {
        if raw.is_empty() {
            return Err(CronError::Empty { field: bounds.name });
        }

        let mut bits = 0u64;
        // Vixie cron: a field starting with '*' (including "*/N") leaves the
        // day-of-month/day-of-week OR rule out of play.
        let wildcard = raw.starts_with('*');

        for item in raw.split(',') {
            if item.is_empty() {
                return Err(CronError::Empty { field: bounds.name });
            }

            let (range, step) = match item.split_once('/') {
                Some((range, step)) => {
                    let step = parse_number(step, bounds)?;
                    if step == 0 {
                        return Err(CronError::ZeroStep { field: bounds.name });
                    }
                    (range, step)
                }
                None => (item, 1),
            };

            let (start, end) = if range == "*" {
                (bounds.min, bounds.max)
            } else if let Some((a, b)) = range.split_once('-') {
                let start = parse_bounded(a, bounds)?;
                let end = parse_bounded(b, bounds)?;
                if start > end {
                    return Err(CronError::InvalidRange {
                        field: bounds.name,
                        start,
                        end,
                    });
                }
                (start, end)
            } else {
                let value = parse_bounded(range, bounds)?;
                // "5/15" means "from 5 to the end of the range, every 15"
                if item.contains('/') {
                    (value, bounds.max)
                } else {
                    (value, value)
                }
            };

            let mut value = start;
            while value <= end {
                bits |= 1u64 << value;
                value += step;
            }
        }

        Ok(Self { bits, wildcard })
    }
}

fn parse_number(raw: &str, bounds: FieldBounds) -> Result<u32, CronError> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(CronError::NotANumber {
            field: bounds.name,
            value: raw.to_string(),
        });
    }
    raw.parse::<u32>().map_err(|_| CronError::NotANumber {
        field: bounds.name,
        value: raw.to_string(),
    })
}

fn parse_bounded(raw: &str, bounds: FieldBounds) -> Result<u32, CronError> {
    if let Some(index) = bounds
        .aliases
        .iter()
        .position(|alias| alias.eq_ignore_ascii_case(raw))
    {
        return Ok(bounds.min + index as u32);
    }

    let value = parse_number(raw, bounds)?;
    if value < bounds.min || value > bounds.max {
        return Err(CronError::OutOfRange {
            field: bounds.name,
            value,
            min: bounds.min,
            max: bounds.max,
        });
    }
    Ok(value)
}

/// A parsed `minute hour day month weekday` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: CronField,
    hours: CronField,
    days_of_month: CronField,
    months: CronField,
    days_of_week: CronField,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let mut days_of_week = CronField::parse(fields[4], DAY_OF_WEEK)?;
        if days_of_week.contains(7) {
            days_of_week.bits = (days_of_week.bits & !(1u64 << 7)) | 1;
        }

        Ok(Self {
            expression: fields.join(" "),
            minutes: CronField::parse(fields[0], MINUTE)?,
            hours: CronField::parse(fields[1], HOUR)?,
            days_of_month: CronField::parse(fields[2], DAY_OF_MONTH)?,
            months: CronField::parse(fields[3], MONTH)?,
            days_of_week,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the schedule fires at the given minute.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let at = at.naive_utc();
        self.months.contains(at.month())
            && self.day_matches(at.date())
            && self.hours.contains(at.hour())
            && self.minutes.contains(at.minute())
    }

    /// The first firing strictly after `after`, at minute resolution.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after
            .naive_utc()
            .with_second(0)?
            .with_nanosecond(0)?
            .checked_add_signed(Duration::minutes(1))?;
        let limit = start.checked_add_signed(Duration::days(SEARCH_HORIZON_DAYS))?;

        let mut t = start;
        while t <= limit {
            if !self.months.contains(t.month()) {
                t = first_of_next_month(t)?;
                continue;
            }

            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }

            if !self.hours.contains(t.hour()) {
                t = t
                    .date()
                    .and_hms_opt(t.hour(), 0, 0)?
                    .checked_add_signed(Duration::hours(1))?;
                continue;
            }

            if !self.minutes.contains(t.minute()) {
                t = t.checked_add_signed(Duration::minutes(1))?;
                continue;
            }

            return Some(Utc.from_utc_datetime(&t));
        }

        None
    }

    // Vixie cron semantics: when both day fields are restricted, either may match.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());

        match (self.days_of_month.wildcard, self.days_of_week.wildcard) {
            (false, false) => dom || dow,
            (false, true) => dom,
            (true, false) => dow,
            (true, true) => true,
        }
    }
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}
