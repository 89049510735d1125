// libs/appointment-cell/src/services/conflict.rs
use chrono::NaiveDate;
use uuid::Uuid;

use shared_utils::time::ClockTime;

use crate::models::{Appointment, AppointmentStatus};

/// Conflict check between a requested range and one existing appointment.
///
/// The three cases are: the new start falls inside the existing range, the
/// new end falls inside it, or the new range fully contains it. Combined they
/// are exactly the half-open overlap `new_start < end && new_end > start`.
pub fn ranges_conflict(
    new_start: ClockTime,
    new_end: ClockTime,
    existing_start: ClockTime,
    existing_end: ClockTime,
) -> bool {
    let start_inside = new_start >= existing_start && new_start < existing_end;
    let end_inside = new_end > existing_start && new_end <= existing_end;
    let contains = new_start <= existing_start && new_end >= existing_end;
    start_inside || end_inside || contains
}

/// Parameters of a `check_time_conflict` query.
#[derive(Debug, Clone, Copy)]
pub struct ConflictQuery {
    pub consultant_id: Uuid,
    pub date: NaiveDate,
    pub start: ClockTime,
    pub end: ClockTime,
    pub exclude_id: Option<Uuid>,
}

impl ConflictQuery {
    pub fn new(consultant_id: Uuid, date: NaiveDate, start: ClockTime, end: ClockTime) -> Self {
        Self {
            consultant_id,
            date,
            start,
            end,
            exclude_id: None,
        }
    }

    pub fn excluding(mut self, appointment_id: Uuid) -> Self {
        self.exclude_id = Some(appointment_id);
        self
    }

    /// Whether `existing` blocks this request.
    pub fn is_blocked_by(&self, existing: &Appointment) -> bool {
        existing.consultant_id == self.consultant_id
            && existing.appointment_date == self.date
            && existing.status != AppointmentStatus::Cancelled
            && Some(existing.id) != self.exclude_id
            && ranges_conflict(self.start, self.end, existing.start_time, existing.end_time)
    }

    /// PostgREST query string with the three cases as one `or=` predicate.
    /// `HH:mm` strings sort lexically in time order, so text comparison holds.
    pub fn to_postgrest_query(&self) -> String {
        let (s, e) = (self.start, self.end);
        let mut query = format!(
            "select=id&consultant_id=eq.{}&appointment_date=eq.{}&status=neq.cancelled\
             &or=(and(start_time.lte.{s},end_time.gt.{s}),\
             and(start_time.lt.{e},end_time.gte.{e}),\
             and(start_time.gte.{s},end_time.lte.{e}))",
            self.consultant_id, self.date,
        );
        if let Some(exclude_id) = self.exclude_id {
            query.push_str(&format!("&id=neq.{}", exclude_id));
        }
        query.push_str("&limit=1");
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_utils::time::overlaps;

    fn t(raw: &str) -> ClockTime {
        raw.parse().unwrap()
    }

    #[test]
    fn three_cases_agree_with_half_open_overlap() {
        // Every pair of ranges on a 15-minute grid across a morning.
        let grid: Vec<ClockTime> = (0..=16).map(|i| ClockTime::hm(8, 0).checked_add_minutes(i * 15).unwrap()).collect();
        for (i, &a) in grid.iter().enumerate() {
            for &b in &grid[i + 1..] {
                for (j, &c) in grid.iter().enumerate() {
                    for &d in &grid[j + 1..] {
                        assert_eq!(
                            ranges_conflict(a, b, c, d),
                            overlaps(a, b, c, d),
                            "{}-{} vs {}-{}",
                            a,
                            b,
                            c,
                            d
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn touching_ranges_do_not_conflict() {
        assert!(!ranges_conflict(t("10:00"), t("11:00"), t("09:00"), t("10:00")));
        assert!(!ranges_conflict(t("08:00"), t("09:00"), t("09:00"), t("10:00")));
    }

    #[test]
    fn named_cases() {
        let (s, e) = (t("10:00"), t("10:30"));
        assert!(ranges_conflict(t("10:15"), t("10:45"), s, e), "start inside");
        assert!(ranges_conflict(t("09:45"), t("10:15"), s, e), "end inside");
        assert!(ranges_conflict(t("09:00"), t("11:00"), s, e), "contains");
        assert!(ranges_conflict(t("10:05"), t("10:20"), s, e), "contained");
        assert!(!ranges_conflict(t("11:00"), t("11:30"), s, e), "disjoint");
    }

    #[test]
    fn postgrest_query_excludes_cancelled_and_self() {
        let id = Uuid::new_v4();
        let query = ConflictQuery::new(
            Uuid::nil(),
            NaiveDate::from_ymd_opt(2030, 6, 3).unwrap(),
            t("09:00"),
            t("09:30"),
        )
        .excluding(id)
        .to_postgrest_query();

        assert!(query.contains("appointment_date=eq.2030-06-03"));
        assert!(query.contains("status=neq.cancelled"));
        assert!(query.contains("and(start_time.lte.09:00,end_time.gt.09:00)"));
        assert!(query.contains(&format!("id=neq.{}", id)));
    }
}
