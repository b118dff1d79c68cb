//! Field-by-field next-match search over the civil calendar.
//!
//! The search advances one field at a time: when a field overflows, the next
//! coarser field is incremented and every finer field resets to its minimum,
//! then all constraints are re-checked from the top. Bounded by the year
//! range, so an expression with no future match terminates with `None`.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};

use crate::{
    CronExpression,
    field::{DomSpec, DowSpec, YEAR_MAX},
};

pub(crate) fn next_local(expr: &CronExpression, from: NaiveDateTime) -> Option<NaiveDateTime> {
    let mut year = from.date().year();
    let mut month = from.date().month() as u8;
    let mut day = from.date().day() as u8;
    let (mut hour, mut minute, mut second) = {
        use chrono::Timelike;
        (
            from.time().hour() as u8,
            from.time().minute() as u8,
            from.time().second() as u8,
        )
    };

    macro_rules! reset_time {
        () => {
            hour = 0;
            minute = 0;
            second = 0;
        };
    }

    loop {
        if year > YEAR_MAX {
            return None;
        }
        match expr.years.next_from(year) {
            Some(y) if y == year => {},
            Some(y) => {
                year = y;
                month = 1;
                day = 1;
                reset_time!();
            },
            None => return None,
        }

        match expr.month.next_from(month) {
            Some(m) if m == month => {},
            Some(m) => {
                month = m;
                day = 1;
                reset_time!();
            },
            None => {
                year += 1;
                month = 1;
                day = 1;
                reset_time!();
                continue;
            },
        }

        // A day carry may have pushed past the end of the month.
        if day > days_in_month(year, month) {
            month += 1;
            day = 1;
            reset_time!();
            if month > 12 {
                month = 1;
                year += 1;
            }
            continue;
        }

        let date = NaiveDate::from_ymd_opt(year, u32::from(month), u32::from(day))?;
        if !day_matches(expr, date) {
            day += 1;
            reset_time!();
            continue;
        }

        match expr.hours.next_from(hour) {
            Some(h) if h == hour => {},
            Some(h) => {
                hour = h;
                minute = 0;
                second = 0;
            },
            None => {
                day += 1;
                reset_time!();
                continue;
            },
        }

        match expr.minutes.next_from(minute) {
            Some(m) if m == minute => {},
            Some(m) => {
                minute = m;
                second = 0;
            },
            None => {
                hour += 1;
                minute = 0;
                second = 0;
                continue;
            },
        }

        match expr.seconds.next_from(second) {
            Some(s) if s == second => {},
            Some(s) => second = s,
            None => {
                minute += 1;
                second = 0;
                continue;
            },
        }

        return date.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second));
    }
}

fn day_matches(expr: &CronExpression, date: NaiveDate) -> bool {
    let dom = dom_constraint(expr.dom, date);
    let dow = dow_constraint(expr.dow, date);
    match (dom, dow) {
        // Both day fields carry concrete values: the day fires when either
        // constraint holds.
        (Some(a), Some(b)) => a || b,
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => true,
    }
}

fn dom_constraint(spec: DomSpec, date: NaiveDate) -> Option<bool> {
    let day = date.day() as u8;
    let last = days_in_month(date.year(), date.month() as u8);
    match spec {
        DomSpec::Unspecified | DomSpec::All => None,
        DomSpec::Days(set) => Some(set.contains(day)),
        DomSpec::LastDay => Some(day == last),
        DomSpec::LastWeekday => Some(day == nearest_weekday(date.year(), date.month() as u8, last)),
        DomSpec::NearestWeekday(target) => {
            // A target past the end of the month clamps to the last day.
            let target = target.min(last);
            Some(day == nearest_weekday(date.year(), date.month() as u8, target))
        },
    }
}

fn dow_constraint(spec: DowSpec, date: NaiveDate) -> Option<bool> {
    // 1 = Sunday .. 7 = Saturday.
    let weekday = date.weekday().num_days_from_sunday() as u8 + 1;
    let day = date.day();
    match spec {
        DowSpec::Unspecified | DowSpec::All => None,
        DowSpec::Days(set) => Some(set.contains(weekday)),
        DowSpec::Last(w) => {
            let last = u32::from(days_in_month(date.year(), date.month() as u8));
            Some(weekday == w && day + 7 > last)
        },
        DowSpec::Nth { weekday: w, nth } => {
            Some(weekday == w && (day - 1) / 7 + 1 == u32::from(nth))
        },
    }
}

/// Day-of-month of the weekday nearest to `day`, never leaving the month.
fn nearest_weekday(year: i32, month: u8, day: u8) -> u8 {
    let last = days_in_month(year, month);
    let date = match NaiveDate::from_ymd_opt(year, u32::from(month), u32::from(day)) {
        Some(d) => d,
        None => return day,
    };
    match date.weekday() {
        Weekday::Sat => {
            if day == 1 {
                // Saturday the 1st: Monday the 3rd is the nearest weekday
                // that stays inside the month.
                3
            } else {
                day - 1
            }
        },
        Weekday::Sun => {
            if day == last {
                day - 2
            } else {
                day + 1
            }
        },
        _ => day,
    }
}

pub(crate) fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        },
    }
}

fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(2024, 2, 29)]
    #[case(2023, 2, 28)]
    #[case(2000, 2, 29)]
    #[case(2100, 2, 28)]
    #[case(2024, 4, 30)]
    #[case(2024, 12, 31)]
    fn month_lengths(#[case] year: i32, #[case] month: u8, #[case] expected: u8) {
        assert_eq!(days_in_month(year, month), expected);
    }

    #[rstest]
    // 2024-06-15 is a Saturday: nearest weekday is Friday the 14th.
    #[case(2024, 6, 15, 14)]
    // 2024-06-30 is a Sunday at month end: pull back to Friday the 28th.
    #[case(2024, 6, 30, 28)]
    // 2024-06-01 is a Saturday at month start: push to Monday the 3rd.
    #[case(2024, 6, 1, 3)]
    // 2024-07-15 is a Monday: already a weekday.
    #[case(2024, 7, 15, 15)]
    // 2024-09-15 is a Sunday mid-month: push to Monday the 16th.
    #[case(2024, 9, 15, 16)]
    fn nearest_weekday_cases(
        #[case] year: i32,
        #[case] month: u8,
        #[case] day: u8,
        #[case] expected: u8,
    ) {
        assert_eq!(nearest_weekday(year, month, day), expected);
    }
}
