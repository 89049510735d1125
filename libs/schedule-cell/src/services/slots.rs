use shared_utils::time::{overlaps, ClockTime};

use crate::models::{AvailabilitySummary, DayAvailability, TimeSlot, WorkingDay};

/// Walk a working day in `slot_duration` steps.
///
/// Slots that would overlap the break are dropped, and a cursor that lands
/// inside the break jumps to its end. The last slot must finish by `end_time`.
pub fn generate_time_slots(day: &WorkingDay, slot_duration: u16) -> Vec<TimeSlot> {
    let mut slots = Vec::new();
    if !day.is_available || slot_duration == 0 {
        return slots;
    }

    let break_window = day.break_window();
    let mut cursor = day.start_time;

    while let Some(slot_end) = cursor.checked_add_minutes(slot_duration) {
        if slot_end > day.end_time {
            break;
        }

        let hits_break = break_window
            .is_some_and(|(break_start, break_end)| overlaps(cursor, slot_end, break_start, break_end));
        if !hits_break {
            slots.push(TimeSlot {
                start_time: cursor,
                end_time: slot_end,
                is_booked: false,
            });
        }

        cursor = match break_window {
            Some((break_start, break_end)) if slot_end >= break_start && slot_end < break_end => break_end,
            _ => slot_end,
        };
    }

    slots
}

/// Flag every slot that overlaps one of the booked `[start, end)` ranges.
pub fn mark_booked(slots: &mut [TimeSlot], booked: &[(ClockTime, ClockTime)]) {
    for slot in slots.iter_mut() {
        slot.is_booked = booked
            .iter()
            .any(|(start, end)| overlaps(slot.start_time, slot.end_time, *start, *end));
    }
}

pub fn summarize(days: &[DayAvailability]) -> AvailabilitySummary {
    days.iter().fold(AvailabilitySummary::default(), |mut summary, day| {
        if day.is_working_day {
            summary.total_working_days += 1;
        }
        let available = day.available_slots().count();
        summary.total_slots += day.slots.len();
        summary.available_slots += available;
        summary.booked_slots += day.slots.len() - available;
        summary
    })
}
