//! Free-slot computation over a closer's weekly schedule.
//!
//! Everything here is pure: callers hand in the schedule plus the busy intervals already
//! held on a date, and the service derives free intervals and the earliest bookable slot.
//! Intervals are half-open, so a slot ending at 09:30 never collides with one starting at
//! 09:30.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use super::domain::{hhmm, TimeRange, WeeklySchedule};

pub const DEFAULT_LOOKAHEAD_DAYS: u32 = 30;

/// Bookable interval on a closer's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

impl Slot {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

/// Intervals already held on one date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusyDay {
    pub appointments: Vec<TimeRange>,
    pub blocks: Vec<TimeRange>,
}

/// One entry of the day grid shown to schedulers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    pub available: bool,
}

/// Computed availability for a closer on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub working_hours: Vec<TimeRange>,
    pub free: Vec<TimeRange>,
    pub slots: Vec<SlotView>,
    pub booked: usize,
    pub fully_booked: bool,
}

/// Stateless slot finder with a bounded forward scan.
#[derive(Debug, Clone, Copy)]
pub struct AvailabilityService {
    lookahead_days: u32,
}

impl Default for AvailabilityService {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKAHEAD_DAYS)
    }
}

impl AvailabilityService {
    pub fn new(lookahead_days: u32) -> Self {
        Self {
            lookahead_days: lookahead_days.max(1),
        }
    }

    pub fn lookahead_days(&self) -> u32 {
        self.lookahead_days
    }

    /// Working windows for `date`: a date override wins over the weekday windows.
    pub fn working_windows(schedule: &WeeklySchedule, date: NaiveDate) -> Vec<TimeRange> {
        let windows: Vec<TimeRange> = match schedule
            .date_overrides
            .iter()
            .find(|entry| entry.date == date)
        {
            Some(entry) => entry.windows.clone(),
            None => schedule
                .windows
                .iter()
                .filter(|window| window.weekday == date.weekday())
                .map(|window| TimeRange::new(window.start, window.end))
                .collect(),
        };

        merge(windows)
    }

    /// Working windows minus everything already held, clipped to `not_before`.
    pub fn free_intervals(
        schedule: &WeeklySchedule,
        date: NaiveDate,
        busy: &BusyDay,
        not_before: Option<NaiveTime>,
    ) -> Vec<TimeRange> {
        if day_is_full(schedule, busy) {
            return Vec::new();
        }

        let windows = Self::working_windows(schedule, date);
        let held = held_intervals(schedule, busy);

        let mut free = Vec::new();
        for window in windows {
            let mut cursor = window.start;
            for range in &held {
                if range.end <= cursor {
                    continue;
                }
                if range.start >= window.end {
                    break;
                }
                if range.start > cursor {
                    free.push(TimeRange::new(cursor, range.start));
                }
                cursor = cursor.max(range.end);
                if cursor >= window.end {
                    break;
                }
            }
            if cursor < window.end {
                free.push(TimeRange::new(cursor, window.end));
            }
        }

        match not_before {
            Some(limit) => free
                .into_iter()
                .filter_map(|range| {
                    let clipped = TimeRange::new(range.start.max(limit), range.end);
                    (!clipped.is_empty()).then_some(clipped)
                })
                .collect(),
            None => free,
        }
    }

    /// Earliest slot of the schedule's length inside the free intervals of `date`.
    pub fn first_slot_on(
        schedule: &WeeklySchedule,
        date: NaiveDate,
        busy: &BusyDay,
        not_before: Option<NaiveTime>,
    ) -> Option<Slot> {
        let minutes = schedule.slot_minutes.max(1);
        Self::free_intervals(schedule, date, busy, not_before)
            .into_iter()
            .find(|range| range.minutes() >= i64::from(minutes))
            .and_then(|range| TimeRange::starting_at(range.start, minutes))
            .map(|range| Slot {
                date,
                start_time: range.start,
                end_time: range.end,
            })
    }

    /// Scan forward from `from` one day at a time, up to the lookahead bound.
    ///
    /// `busy_for` is asked for the held intervals of each visited date; its error aborts
    /// the scan. `Ok(None)` means the lookahead window holds no free slot.
    pub fn next_available_slot<F, E>(
        &self,
        schedule: &WeeklySchedule,
        from: NaiveDateTime,
        mut busy_for: F,
    ) -> Result<Option<Slot>, E>
    where
        F: FnMut(NaiveDate) -> Result<BusyDay, E>,
    {
        let first_day = from.date();
        for offset in 0..self.lookahead_days {
            let Some(date) = first_day.checked_add_signed(Duration::days(i64::from(offset)))
            else {
                break;
            };

            if Self::working_windows(schedule, date).is_empty() {
                continue;
            }

            let not_before = (date == first_day)
                .then(|| align_up(from.time(), schedule.slot_minutes))
                .flatten();
            if date == first_day && not_before.is_none() {
                continue;
            }

            let busy = busy_for(date)?;
            if let Some(slot) = Self::first_slot_on(schedule, date, &busy, not_before) {
                return Ok(Some(slot));
            }
        }

        Ok(None)
    }

    /// Full day view: working hours, free intervals, and the slot grid.
    ///
    /// Slots already in the past relative to `now` are reported as unavailable.
    pub fn day_availability(
        schedule: &WeeklySchedule,
        date: NaiveDate,
        busy: &BusyDay,
        now: NaiveDateTime,
    ) -> DayAvailability {
        let working_hours = Self::working_windows(schedule, date);
        let free = if date < now.date() {
            Vec::new()
        } else {
            let not_before = (date == now.date()).then(|| now.time());
            Self::free_intervals(schedule, date, busy, not_before)
        };

        let minutes = schedule.slot_minutes.max(1);
        let mut slots = Vec::new();
        for window in &working_hours {
            let mut start = window.start;
            while let Some(range) = TimeRange::starting_at(start, minutes) {
                if range.end > window.end {
                    break;
                }
                let available = free
                    .iter()
                    .any(|free| free.start <= range.start && range.end <= free.end);
                slots.push(SlotView {
                    start: range.start,
                    end: range.end,
                    available,
                });
                start = range.end;
            }
        }

        DayAvailability {
            date,
            working_hours,
            free,
            slots,
            booked: busy.appointments.len(),
            fully_booked: day_is_full(schedule, busy),
        }
    }
}

fn day_is_full(schedule: &WeeklySchedule, busy: &BusyDay) -> bool {
    schedule.max_daily_appointments > 0
        && busy.appointments.len() >= schedule.max_daily_appointments as usize
}

/// Appointments padded by the buffer, plus blocks, sorted and merged.
fn held_intervals(schedule: &WeeklySchedule, busy: &BusyDay) -> Vec<TimeRange> {
    let buffer = Duration::minutes(i64::from(schedule.buffer_minutes));
    let padded = busy.appointments.iter().map(|range| {
        let (start, wrapped_start) = range.start.overflowing_sub_signed(buffer);
        let (end, wrapped_end) = range.end.overflowing_add_signed(buffer);
        TimeRange::new(
            if wrapped_start != 0 { NaiveTime::MIN } else { start },
            if wrapped_end != 0 { last_instant() } else { end },
        )
    });

    merge(padded.chain(busy.blocks.iter().copied()).collect())
}

fn last_instant() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

/// Sort and coalesce overlapping or touching intervals, dropping empty ones.
pub(crate) fn merge(mut ranges: Vec<TimeRange>) -> Vec<TimeRange> {
    ranges.retain(|range| !range.is_empty());
    ranges.sort();

    let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Round `time` up to the next multiple of `step` minutes since midnight.
/// `None` when rounding would cross into the next day.
fn align_up(time: NaiveTime, step: u32) -> Option<NaiveTime> {
    let step = step.max(1);
    let seconds = time.num_seconds_from_midnight();
    let step_seconds = step * 60;
    let aligned = seconds.div_ceil(step_seconds) * step_seconds;
    NaiveTime::from_num_seconds_from_midnight_opt(aligned, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::leads::domain::{DateOverride, WorkingWindow};
    use chrono::Weekday;

    fn t(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn range(start: (u32, u32), end: (u32, u32)) -> TimeRange {
        TimeRange::new(t(start.0, start.1), t(end.0, end.1))
    }

    #[test]
    fn merge_coalesces_touching_ranges() {
        let merged = merge(vec![
            range((10, 0), (10, 30)),
            range((9, 0), (9, 30)),
            range((9, 30), (10, 0)),
            range((12, 0), (12, 0)),
        ]);
        assert_eq!(merged, vec![range((9, 0), (10, 30))]);
    }

    #[test]
    fn date_override_replaces_weekday_windows() {
        let mut schedule = WeeklySchedule::weekdays(t(9, 0), t(17, 0));
        let tuesday = NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date");
        schedule.date_overrides.push(DateOverride {
            date: tuesday,
            windows: vec![range((13, 0), (15, 0))],
        });

        assert_eq!(
            AvailabilityService::working_windows(&schedule, tuesday),
            vec![range((13, 0), (15, 0))]
        );

        schedule.date_overrides[0].windows.clear();
        assert!(AvailabilityService::working_windows(&schedule, tuesday).is_empty());
    }

    #[test]
    fn free_intervals_subtract_appointments_blocks_and_buffer() {
        let mut schedule = WeeklySchedule::weekdays(t(9, 0), t(17, 0));
        schedule.buffer_minutes = 10;
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date");
        let busy = BusyDay {
            appointments: vec![range((10, 0), (10, 30))],
            blocks: vec![range((12, 0), (13, 0))],
        };

        let free = AvailabilityService::free_intervals(&schedule, date, &busy, None);
        assert_eq!(
            free,
            vec![
                range((9, 0), (9, 50)),
                range((10, 40), (12, 0)),
                range((13, 0), (17, 0)),
            ]
        );
    }

    #[test]
    fn max_daily_appointments_closes_the_day() {
        let mut schedule = WeeklySchedule::weekdays(t(9, 0), t(17, 0));
        schedule.max_daily_appointments = 1;
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date");
        let busy = BusyDay {
            appointments: vec![range((9, 0), (9, 30))],
            blocks: Vec::new(),
        };

        assert!(AvailabilityService::first_slot_on(&schedule, date, &busy, None).is_none());
    }

    #[test]
    fn next_slot_skips_days_without_windows() {
        let schedule = WeeklySchedule {
            windows: vec![WorkingWindow {
                weekday: Weekday::Thu,
                start: t(14, 0),
                end: t(15, 0),
            }],
            ..WeeklySchedule::default()
        };
        let monday = NaiveDate::from_ymd_opt(2025, 6, 9).expect("valid date");
        let service = AvailabilityService::new(7);

        let slot = service
            .next_available_slot(&schedule, monday.and_time(t(8, 0)), |_| {
                Ok::<_, ()>(BusyDay::default())
            })
            .expect("lookup succeeds")
            .expect("slot found");

        assert_eq!(slot.date, NaiveDate::from_ymd_opt(2025, 6, 12).expect("valid"));
        assert_eq!(slot.range(), range((14, 0), (14, 30)));
    }

    #[test]
    fn next_slot_respects_the_current_time() {
        let schedule = WeeklySchedule::weekdays(t(9, 0), t(17, 0));
        let tuesday = NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date");
        let service = AvailabilityService::default();

        let slot = service
            .next_available_slot(&schedule, tuesday.and_time(t(11, 7)), |_| {
                Ok::<_, ()>(BusyDay::default())
            })
            .expect("lookup succeeds")
            .expect("slot found");

        assert_eq!(slot.range(), range((11, 30), (12, 0)));
    }

    #[test]
    fn lookahead_bound_returns_none_instead_of_scanning_forever() {
        let schedule = WeeklySchedule::every_day(t(9, 0), t(10, 0));
        let start = NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date");
        let service = AvailabilityService::new(5);
        let mut visited = 0;

        let result = service
            .next_available_slot(&schedule, start.and_time(t(0, 0)), |_| {
                visited += 1;
                Ok::<_, ()>(BusyDay {
                    appointments: vec![range((9, 0), (10, 0))],
                    blocks: Vec::new(),
                })
            })
            .expect("lookup succeeds");

        assert!(result.is_none());
        assert_eq!(visited, 5);
    }

    #[test]
    fn day_grid_marks_booked_and_past_slots() {
        let schedule = WeeklySchedule::weekdays(t(9, 0), t(11, 0));
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date");
        let busy = BusyDay {
            appointments: vec![range((10, 0), (10, 30))],
            blocks: Vec::new(),
        };

        let view = AvailabilityService::day_availability(
            &schedule,
            date,
            &busy,
            date.and_time(t(9, 15)),
        );

        let flags: Vec<bool> = view.slots.iter().map(|slot| slot.available).collect();
        assert_eq!(flags, vec![false, true, false, true]);
        assert_eq!(view.booked, 1);
        assert!(!view.fully_booked);
    }
}
