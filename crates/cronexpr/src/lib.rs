//! Quartz-style cron expressions: six or seven whitespace-separated fields
//! (seconds, minutes, hours, day-of-month, month, day-of-week, optional
//! year) with support for ranges, steps, lists, month/weekday names, and
//! the `?`, `L`, `W`, and `#` day specials.
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use gnomon_cronexpr::CronExpression;
//!
//! let expr: CronExpression = "0 15 10 ? * MON-FRI".parse().unwrap();
//! let after = Utc.with_ymd_and_hms(2024, 1, 5, 10, 15, 1).unwrap();
//! let next = expr.next_after(after, chrono_tz::UTC).unwrap();
//! assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 8, 10, 15, 0).unwrap());
//! ```

use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Duration, LocalResult, TimeZone, Timelike, Utc},
    chrono_tz::Tz,
};

pub mod error;
mod field;
mod next;
mod parse;

pub use error::ParseError;
pub use field::Field;

use field::{DomSpec, DowSpec, ValueSet, YearSet};

/// A parsed cron expression. Construction validates the full grammar;
/// evaluation is pure and never fails after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    seconds: ValueSet,
    minutes: ValueSet,
    hours: ValueSet,
    dom: DomSpec,
    month: ValueSet,
    dow: DowSpec,
    years: YearSet,
}

impl CronExpression {
    /// Parse a six- or seven-field cron expression.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = source.split_whitespace().collect();
        if fields.len() != 6 && fields.len() != 7 {
            return Err(ParseError::FieldCount {
                count: fields.len(),
            });
        }

        let dom = parse::parse_dom(fields[3])?;
        let dow = parse::parse_dow(fields[5])?;
        if dom == DomSpec::Unspecified && dow == DowSpec::Unspecified {
            return Err(ParseError::BothDayFieldsUnspecified);
        }

        let years = match fields.get(6) {
            Some(text) => parse::parse_years(text)?,
            None => YearSet::all(),
        };

        Ok(Self {
            source: source.trim().to_string(),
            seconds: parse::parse_value_set(Field::Seconds, fields[0])?,
            minutes: parse::parse_value_set(Field::Minutes, fields[1])?,
            hours: parse::parse_value_set(Field::Hours, fields[2])?,
            dom,
            month: parse::parse_value_set(Field::Month, fields[4])?,
            dow,
            years,
        })
    }

    /// The expression text as given (trimmed).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Smallest instant strictly after `after` that matches every field,
    /// evaluated in `tz`. `None` once the year range (1970-2099) is
    /// exhausted.
    ///
    /// Occurrences that land in a daylight-saving gap do not exist and are
    /// skipped; an occurrence in a repeated (fall-back) hour resolves to
    /// its earliest absolute time still after `after`.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        // Truncate to whole seconds, then step past `after`: the search is
        // inclusive at its starting point.
        let mut local = after.with_timezone(&tz).naive_local().with_nanosecond(0)?
            + Duration::seconds(1);

        loop {
            let candidate = next::next_local(self, local)?;
            match tz.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => {
                    let utc = dt.with_timezone(&Utc);
                    if utc > after {
                        return Some(utc);
                    }
                },
                LocalResult::Ambiguous(earliest, latest) => {
                    let utc = earliest.with_timezone(&Utc);
                    if utc > after {
                        return Some(utc);
                    }
                    let utc = latest.with_timezone(&Utc);
                    if utc > after {
                        return Some(utc);
                    }
                },
                LocalResult::None => {},
            }
            local = candidate + Duration::seconds(1);
        }
    }

    /// [`next_after`](Self::next_after) in UTC.
    pub fn next_after_utc(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_after(after, chrono_tz::UTC)
    }
}

impl FromStr for CronExpression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl serde::Serialize for CronExpression {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> serde::Deserialize<'de> for CronExpression {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
