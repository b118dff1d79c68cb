//! Trigger firing rules: schedule variants, next-fire-time advancement, and
//! misfire handling.

use {
    chrono::{DateTime, Datelike, Days, Duration, Months, Utc},
    chrono_tz::Tz,
    serde::{Deserialize, Serialize},
};

use gnomon_cronexpr::CronExpression;

use crate::types::{DataMap, JobKey, TriggerKey, TriggerState};

/// Priority assigned when none is given. Higher wins ties on fire time.
pub const DEFAULT_PRIORITY: i32 = 5;

/// How often a simple trigger repeats after its first fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    Indefinitely,
    /// Number of repeats after the initial fire, so `Times(3)` fires four
    /// times in total.
    Times(u32),
}

/// Unit of a calendar-interval schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// Variant-specific firing rule.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fixed interval with a bounded or indefinite repeat count.
    Simple {
        repeat_interval_ms: u64,
        repeat_count: RepeatCount,
    },
    /// Cron expression evaluated in a time zone.
    Cron {
        expression: CronExpression,
        time_zone: Tz,
    },
    /// Civil-calendar stepping from the start-time anchor, so "1 month"
    /// from Jan 31 lands on the last day of February.
    CalendarInterval { interval: u32, unit: IntervalUnit },
}

/// What to do when a trigger's fire time is already more than the misfire
/// threshold in the past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MisfireInstruction {
    SmartPolicy,
    FireNow,
    RescheduleNextWithExistingCount,
    RescheduleNextWithRemainingCount,
    RescheduleNowWithExistingRepeatCount,
    RescheduleNowWithRemainingRepeatCount,
    DoNothing,
    FireOnceNow,
}

/// A firing rule bound to a job. Owned exclusively by the store once
/// installed; everything outside refers to it by key.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub description: Option<String>,
    pub priority: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub data: DataMap,
    pub misfire_instruction: MisfireInstruction,
    /// Accepted and surfaced, but no calendar store exists to resolve it.
    pub calendar_name: Option<String>,
    pub schedule: Schedule,
    pub(crate) state: TriggerState,
    pub(crate) next_fire_time: Option<DateTime<Utc>>,
    pub(crate) previous_fire_time: Option<DateTime<Utc>>,
    pub(crate) times_triggered: u32,
}

impl Trigger {
    pub fn new(key: TriggerKey, job_key: JobKey, schedule: Schedule) -> Self {
        Self {
            key,
            job_key,
            description: None,
            priority: DEFAULT_PRIORITY,
            start_time: Utc::now(),
            end_time: None,
            data: DataMap::new(),
            misfire_instruction: MisfireInstruction::SmartPolicy,
            calendar_name: None,
            schedule,
            state: TriggerState::Normal,
            next_fire_time: None,
            previous_fire_time: None,
            times_triggered: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = start;
        self
    }

    pub fn with_end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    pub fn with_data(mut self, data: DataMap) -> Self {
        self.data = data;
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: MisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    pub fn with_calendar_name(mut self, name: impl Into<String>) -> Self {
        self.calendar_name = Some(name.into());
        self
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    pub fn times_triggered(&self) -> u32 {
        self.times_triggered
    }

    /// The cron expression text, for cron triggers.
    pub fn cron_expression(&self) -> Option<&str> {
        match &self.schedule {
            Schedule::Cron { expression, .. } => Some(expression.source()),
            _ => None,
        }
    }

    /// Compute the first fire time. Simple and calendar-interval triggers
    /// fire first at their start time; cron triggers at the first matching
    /// instant at or after it.
    pub(crate) fn compute_first_fire_time(&mut self) {
        let first = match &self.schedule {
            Schedule::Simple { .. } | Schedule::CalendarInterval { .. } => Some(self.start_time),
            Schedule::Cron {
                expression,
                time_zone,
            } => expression.next_after(self.start_time - Duration::milliseconds(1), *time_zone),
        };
        self.next_fire_time = self.clamp_to_end(first);
    }

    /// Advance state for one fire: shift previous/next, bump the counter.
    /// Afterwards `next_fire_time() == None` means the trigger is exhausted.
    pub(crate) fn triggered(&mut self) {
        let fired_at = self.next_fire_time;
        self.previous_fire_time = fired_at;
        self.times_triggered += 1;

        let next = fired_at.and_then(|at| self.next_fire_after(at));
        self.next_fire_time = self.clamp_to_end(next);
    }

    /// The fire time following `after`, per the schedule variant. Does not
    /// apply the end-time bound.
    fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.schedule {
            Schedule::Simple {
                repeat_interval_ms,
                repeat_count,
            } => {
                if let RepeatCount::Times(count) = repeat_count
                    && self.times_triggered > *count
                {
                    return None;
                }
                Some(after + Duration::milliseconds(*repeat_interval_ms as i64))
            },
            Schedule::Cron {
                expression,
                time_zone,
            } => {
                let floor = after.max(self.start_time);
                expression.next_after(floor, *time_zone)
            },
            Schedule::CalendarInterval { interval, unit } => {
                add_interval(self.start_time, *unit, self.times_triggered * interval)
            },
        }
    }

    fn clamp_to_end(&self, next: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match (next, self.end_time) {
            (Some(t), Some(end)) if t > end => None,
            (next, _) => next,
        }
    }

    /// True when `now` is past the fire time by more than `threshold`.
    pub(crate) fn has_misfired(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.next_fire_time.is_some_and(|nf| now > nf + threshold)
    }

    /// Apply the trigger's misfire instruction, updating the next fire time
    /// and counters. `next_fire_time() == None` afterwards means the trigger
    /// has nothing left to do.
    pub(crate) fn apply_misfire(&mut self, now: DateTime<Utc>) {
        let instruction = self.resolve_smart_policy();
        let next = match (&self.schedule, instruction) {
            (
                _,
                MisfireInstruction::FireNow
                | MisfireInstruction::FireOnceNow
                | MisfireInstruction::RescheduleNowWithExistingRepeatCount,
            ) => Some(now),
            (
                Schedule::Simple {
                    repeat_interval_ms, ..
                },
                MisfireInstruction::RescheduleNowWithRemainingRepeatCount,
            ) => {
                // Consume the occurrences that were missed, then fire now.
                self.times_triggered += self.missed_simple_fires(now, *repeat_interval_ms);
                Some(now)
            },
            (
                Schedule::Simple {
                    repeat_interval_ms, ..
                },
                MisfireInstruction::RescheduleNextWithExistingCount,
            ) => self.next_simple_aligned_after(now, *repeat_interval_ms),
            (
                Schedule::Simple {
                    repeat_interval_ms, ..
                },
                MisfireInstruction::RescheduleNextWithRemainingCount,
            ) => {
                self.times_triggered += self.missed_simple_fires(now, *repeat_interval_ms);
                self.next_simple_aligned_after(now, *repeat_interval_ms)
            },
            (Schedule::Cron { expression, time_zone }, MisfireInstruction::DoNothing) => {
                expression.next_after(now, *time_zone)
            },
            (Schedule::CalendarInterval { interval, unit }, MisfireInstruction::DoNothing) => {
                let (interval, unit) = (*interval, *unit);
                // Step the anchor multiple forward past `now` without firing.
                let mut next = add_interval(self.start_time, unit, self.times_triggered * interval);
                while let Some(t) = next
                    && t <= now
                {
                    self.times_triggered += 1;
                    next = add_interval(self.start_time, unit, self.times_triggered * interval);
                }
                next
            },
            // DoNothing for a simple schedule behaves like next-with-existing.
            (
                Schedule::Simple {
                    repeat_interval_ms, ..
                },
                MisfireInstruction::DoNothing,
            ) => self.next_simple_aligned_after(now, *repeat_interval_ms),
            // Next-with-* on non-simple schedules: recompute from now.
            (Schedule::Cron { expression, time_zone }, _) => {
                expression.next_after(now, *time_zone)
            },
            (Schedule::CalendarInterval { .. }, _) => Some(now),
            (Schedule::Simple { .. }, MisfireInstruction::SmartPolicy) => {
                // resolve_smart_policy never returns SmartPolicy.
                Some(now)
            },
        };
        self.next_fire_time = self.clamp_to_end(next);
    }

    /// Resolve `SMART_POLICY` to a concrete instruction for this schedule.
    fn resolve_smart_policy(&self) -> MisfireInstruction {
        match (self.misfire_instruction, &self.schedule) {
            (MisfireInstruction::SmartPolicy, Schedule::Simple { repeat_count, .. }) => {
                match repeat_count {
                    RepeatCount::Indefinitely => {
                        MisfireInstruction::RescheduleNextWithRemainingCount
                    },
                    RepeatCount::Times(_) => {
                        MisfireInstruction::RescheduleNowWithExistingRepeatCount
                    },
                }
            },
            (MisfireInstruction::SmartPolicy, _) => MisfireInstruction::FireOnceNow,
            (other, _) => other,
        }
    }

    /// Occurrences between the overdue fire time and `now` that will never
    /// fire.
    fn missed_simple_fires(&self, now: DateTime<Utc>, interval_ms: u64) -> u32 {
        let (Some(next), true) = (self.next_fire_time, interval_ms > 0) else {
            return 0;
        };
        let late_ms = (now - next).num_milliseconds().max(0) as u64;
        (late_ms / interval_ms) as u32
    }

    /// First interval-aligned instant strictly after `now`.
    fn next_simple_aligned_after(
        &self,
        now: DateTime<Utc>,
        interval_ms: u64,
    ) -> Option<DateTime<Utc>> {
        let next = self.next_fire_time?;
        if interval_ms == 0 {
            return Some(now);
        }
        let late_ms = (now - next).num_milliseconds().max(0) as u64;
        let steps = late_ms / interval_ms + 1;
        Some(next + Duration::milliseconds((steps * interval_ms) as i64))
    }
}

/// Civil-calendar addition: month and year steps clamp to the last day of
/// the target month.
fn add_interval(anchor: DateTime<Utc>, unit: IntervalUnit, amount: u32) -> Option<DateTime<Utc>> {
    match unit {
        IntervalUnit::Second => Some(anchor + Duration::seconds(i64::from(amount))),
        IntervalUnit::Minute => Some(anchor + Duration::minutes(i64::from(amount))),
        IntervalUnit::Hour => Some(anchor + Duration::hours(i64::from(amount))),
        IntervalUnit::Day => anchor.checked_add_days(Days::new(u64::from(amount))),
        IntervalUnit::Week => anchor.checked_add_days(Days::new(u64::from(amount) * 7)),
        IntervalUnit::Month => anchor.checked_add_months(Months::new(amount)),
        IntervalUnit::Year => anchor
            .with_year(anchor.year() + amount as i32)
            .or_else(|| anchor.checked_add_months(Months::new(amount * 12))),
    }
}
