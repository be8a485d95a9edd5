//! Evaluation of recurring maintenance windows.
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tracing::warn;

use crate::models::{MaintenanceFrequency, MaintenanceSchedule, Monitor};

fn minutes_since_midnight(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

fn last_day_of_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Returns true when `now` (local wall-clock time) falls inside the schedule's window.
pub fn is_in_maintenance_window(
    schedule: Option<&MaintenanceSchedule>,
    now: NaiveDateTime,
) -> bool {
    let Some(schedule) = schedule else {
        return false;
    };
    if !schedule.enabled {
        return false;
    }

    let (Some(start), Some(end)) = (
        parse_time_of_day(&schedule.start_time),
        parse_time_of_day(&schedule.end_time),
    ) else {
        warn!(
            start = %schedule.start_time,
            end = %schedule.end_time,
            "Maintenance schedule has an unparseable time of day; treating as inactive."
        );
        return false;
    };

    let start = minutes_since_midnight(start);
    let end = minutes_since_midnight(end);
    let current = minutes_since_midnight(now.time());

    let in_time_range = if start <= end {
        current >= start && current < end
    } else {
        // Wraps past midnight.
        current >= start || current < end
    };
    if !in_time_range {
        return false;
    }

    let today = now.date();
    match schedule.frequency {
        MaintenanceFrequency::Daily => true,
        MaintenanceFrequency::Weekly => {
            let weekday = today.weekday().num_days_from_sunday() as u8;
            schedule.days_of_week.contains(&weekday)
        }
        MaintenanceFrequency::Monthly => match schedule.day_of_month {
            Some(day) => {
                let effective_day = day.min(last_day_of_month(today));
                today.day() == effective_day
            }
            None => false,
        },
        MaintenanceFrequency::Unknown => false,
    }
}

/// Manual flag or an active recurring window.
pub fn is_under_maintenance(monitor: &Monitor, now: NaiveDateTime) -> bool {
    monitor.maintenance_mode
        || is_in_maintenance_window(monitor.maintenance_schedule.as_ref(), now)
}
