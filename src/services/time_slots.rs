use chrono::{Datelike, Duration, FixedOffset, NaiveDateTime, NaiveTime, Utc, Weekday};
use std::collections::HashSet;
use tracing::debug;

use crate::models::slot::{AvailableSlot, SlotStatus, TimeSlot};

/// Length of one bookable slot in minutes.
pub const SLOT_DURATION_MINUTES: i64 = 45;

/// Size of the rolling booking window, inclusive of today.
pub const DAYS_TO_SHOW: i64 = 7;

/// Weekdays on which no slots are offered.
pub const REST_DAYS: [Weekday; 2] = [Weekday::Thu, Weekday::Fri];

// Working-day boundaries in business-local time. Slots start at the opening
// anchor and must end at or before closing.
pub fn work_day_start() -> NaiveTime {
    NaiveTime::from_hms_opt(10, 0, 0).expect("valid opening time")
}

pub fn work_day_end() -> NaiveTime {
    NaiveTime::from_hms_opt(22, 0, 0).expect("valid closing time")
}

/// Current wall-clock time in the business timezone, as a naive local
/// datetime. All slot arithmetic happens in this frame.
pub fn business_now(offset: FixedOffset) -> NaiveDateTime {
    Utc::now().with_timezone(&offset).naive_local()
}

/// Compute the open slots for the rolling window.
///
/// Pure function over `now` and a snapshot of the booked set: walks each of
/// the next `DAYS_TO_SHOW` calendar days, skips rest days entirely, steps the
/// grid from the opening anchor while a full slot still fits before closing,
/// drops today's slots whose start is at or before `now`, and drops slots
/// already present in `booked`. Output is chronological (day-major,
/// time-minor); callers rely on this order and must not re-sort.
///
/// A slot booked by a concurrent request after the snapshot was taken may
/// still be offered; the ledger insert reconciles that at write time.
pub fn generate_time_slots(now: NaiveDateTime, booked: &HashSet<String>) -> Vec<AvailableSlot> {
    let mut slots = Vec::new();
    let today = now.date();
    let step = Duration::minutes(SLOT_DURATION_MINUTES);

    for day_offset in 0..DAYS_TO_SHOW {
        let day = today + Duration::days(day_offset);
        if REST_DAYS.contains(&day.weekday()) {
            continue;
        }

        let mut cursor = day.and_time(work_day_start());
        let closing = day.and_time(work_day_end());

        while cursor + step <= closing {
            if day == today && cursor <= now {
                cursor += step;
                continue;
            }

            let slot = TimeSlot::new(cursor);
            let value = slot.canonical();
            if !booked.contains(&value) {
                slots.push(AvailableSlot {
                    value,
                    display: slot.display(),
                });
            }
            cursor += step;
        }
    }

    debug!("Generated {} open slots from {}", slots.len(), now);
    slots
}

/// Where an appointment stands relative to `now`: passed once its end is
/// behind us, ongoing while `start <= now < end`, future otherwise.
pub fn slot_status(slot: &TimeSlot, now: NaiveDateTime) -> SlotStatus {
    if slot.end() < now {
        SlotStatus::Passed
    } else if slot.start() <= now {
        SlotStatus::Ongoing
    } else {
        SlotStatus::Future
    }
}

/// Parse and validate a submitted slot string against the booking grid.
///
/// Accepts only slots that the generator could have offered: aligned to the
/// grid anchor, fully inside working hours, not on a rest day, and not
/// already started.
pub fn validate_slot(value: &str, now: NaiveDateTime) -> Result<TimeSlot, String> {
    let slot = TimeSlot::parse(value)?;
    let day = slot.start().date();

    if REST_DAYS.contains(&day.weekday()) {
        return Err(format!("{} falls on a closed weekday", value));
    }

    let opening = day.and_time(work_day_start());
    let closing = day.and_time(work_day_end());
    if slot.start() < opening || slot.end() > closing {
        return Err(format!("{} is outside working hours", value));
    }

    let offset_minutes = (slot.start() - opening).num_minutes();
    if offset_minutes % SLOT_DURATION_MINUTES != 0 {
        return Err(format!("{} is not aligned to the booking grid", value));
    }

    if slot.start() <= now {
        return Err(format!("{} has already passed", value));
    }

    Ok(slot)
}
