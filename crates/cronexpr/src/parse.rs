//! Tokenizer for the individual cron fields.

use crate::{
    error::ParseError,
    field::{DomSpec, DowSpec, Field, ValueSet, YEAR_MAX, YEAR_MIN, YearSet},
};

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

const DOW_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Parse a plain value field (seconds, minutes, hours, month, day-of-week
/// literals) into a bit set. Supports `*`, lists, ranges (wrap-around
/// allowed), steps, and case-insensitive names where the field has them.
pub(crate) fn parse_value_set(field: Field, text: &str) -> Result<ValueSet, ParseError> {
    let (min, max) = field.range();
    let mut set = ValueSet::empty();

    for item in text.split(',') {
        if item.is_empty() {
            return Err(ParseError::invalid_token(field, text));
        }
        let (core, step) = split_step(field, item)?;

        let (lo, hi) = match core {
            "*" => (min, max),
            _ => {
                if let Some((a, b)) = core.split_once('-') {
                    (resolve_value(field, a)?, resolve_value(field, b)?)
                } else {
                    let value = resolve_value(field, core)?;
                    match step {
                        // `a/b` means every b-th value from a to the max.
                        Some(_) => (value, max),
                        None => (value, value),
                    }
                }
            },
        };

        let step = step.unwrap_or(1);
        if lo <= hi {
            insert_stepped(&mut set, lo, hi, step);
        } else {
            // Wrap-around range, e.g. FRI-MON or 22-2.
            insert_stepped(&mut set, lo, max, step);
            insert_stepped(&mut set, min, hi, step);
        }
    }

    Ok(set)
}

fn insert_stepped(set: &mut ValueSet, lo: u8, hi: u8, step: u8) {
    let mut v = lo;
    while v <= hi {
        set.insert(v);
        v = match v.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
}

/// Split an optional `/step` suffix off an item.
fn split_step(field: Field, item: &str) -> Result<(&str, Option<u8>), ParseError> {
    match item.split_once('/') {
        None => Ok((item, None)),
        Some((core, step_str)) => {
            let step: u32 = step_str
                .parse()
                .map_err(|_| ParseError::invalid_token(field, item))?;
            if step == 0 {
                return Err(ParseError::ZeroStep { field });
            }
            let step =
                u8::try_from(step).map_err(|_| ParseError::invalid_token(field, item))?;
            Ok((core, Some(step)))
        },
    }
}

/// Resolve a single literal to its numeric value, accepting names for the
/// month and day-of-week fields.
fn resolve_value(field: Field, token: &str) -> Result<u8, ParseError> {
    let (min, max) = field.range();

    if let Ok(value) = token.parse::<u32>() {
        if value < u32::from(min) || value > u32::from(max) {
            return Err(ParseError::OutOfRange {
                field,
                value,
                min: u32::from(min),
                max: u32::from(max),
            });
        }
        return Ok(value as u8);
    }

    let names: &[&str] = match field {
        Field::Month => &MONTH_NAMES,
        Field::DayOfWeek => &DOW_NAMES,
        _ => return Err(ParseError::invalid_token(field, token)),
    };

    let upper = token.to_ascii_uppercase();
    names
        .iter()
        .position(|n| *n == upper)
        .map(|i| i as u8 + 1)
        .ok_or_else(|| ParseError::unknown_name(field, token))
}

pub(crate) fn parse_dom(text: &str) -> Result<DomSpec, ParseError> {
    let upper = text.to_ascii_uppercase();
    match upper.as_str() {
        "?" => Ok(DomSpec::Unspecified),
        "*" => Ok(DomSpec::All),
        "L" => Ok(DomSpec::LastDay),
        "LW" => Ok(DomSpec::LastWeekday),
        _ => {
            if let Some(day_str) = upper.strip_suffix('W') {
                let day = resolve_value(Field::DayOfMonth, day_str)?;
                Ok(DomSpec::NearestWeekday(day))
            } else {
                Ok(DomSpec::Days(parse_value_set(Field::DayOfMonth, text)?))
            }
        },
    }
}

pub(crate) fn parse_dow(text: &str) -> Result<DowSpec, ParseError> {
    let upper = text.to_ascii_uppercase();
    match upper.as_str() {
        "?" => Ok(DowSpec::Unspecified),
        "*" => Ok(DowSpec::All),
        // Bare `L` in day-of-week means Saturday.
        "L" => Ok(DowSpec::Last(7)),
        _ => {
            if let Some(day_str) = upper.strip_suffix('L') {
                let weekday = resolve_value(Field::DayOfWeek, day_str)?;
                return Ok(DowSpec::Last(weekday));
            }
            if let Some((day_str, nth_str)) = upper.split_once('#') {
                let weekday = resolve_value(Field::DayOfWeek, day_str)?;
                let nth: u32 = nth_str
                    .parse()
                    .map_err(|_| ParseError::invalid_token(Field::DayOfWeek, text))?;
                if !(1..=5).contains(&nth) {
                    return Err(ParseError::NthOutOfRange { nth });
                }
                return Ok(DowSpec::Nth {
                    weekday,
                    nth: nth as u8,
                });
            }
            Ok(DowSpec::Days(parse_value_set(Field::DayOfWeek, text)?))
        },
    }
}

pub(crate) fn parse_years(text: &str) -> Result<YearSet, ParseError> {
    if text == "*" {
        return Ok(YearSet::all());
    }

    let mut set = YearSet::empty();
    for item in text.split(',') {
        let (core, step) = split_year_step(item)?;
        let (lo, hi) = match core {
            "*" => (YEAR_MIN, YEAR_MAX),
            _ => {
                if let Some((a, b)) = core.split_once('-') {
                    (resolve_year(a)?, resolve_year(b)?)
                } else {
                    let year = resolve_year(core)?;
                    match step {
                        Some(_) => (year, YEAR_MAX),
                        None => (year, year),
                    }
                }
            },
        };
        if lo > hi {
            return Err(ParseError::invalid_token(Field::Year, item));
        }
        let step = i32::from(step.unwrap_or(1));
        let mut year = lo;
        while year <= hi {
            set.insert(year);
            year += step;
        }
    }
    Ok(set)
}

fn split_year_step(item: &str) -> Result<(&str, Option<u8>), ParseError> {
    match item.split_once('/') {
        None => Ok((item, None)),
        Some((core, step_str)) => {
            let step: u32 = step_str
                .parse()
                .map_err(|_| ParseError::invalid_token(Field::Year, item))?;
            if step == 0 {
                return Err(ParseError::ZeroStep { field: Field::Year });
            }
            let step = u8::try_from(step).map_err(|_| ParseError::invalid_token(Field::Year, item))?;
            Ok((core, Some(step)))
        },
    }
}

fn resolve_year(token: &str) -> Result<i32, ParseError> {
    let year: i32 = token
        .parse()
        .map_err(|_| ParseError::invalid_token(Field::Year, token))?;
    if !(YEAR_MIN..=YEAR_MAX).contains(&year) {
        return Err(ParseError::OutOfRange {
            field: Field::Year,
            value: year.max(0) as u32,
            min: YEAR_MIN as u32,
            max: YEAR_MAX as u32,
        });
    }
    Ok(year)
}
