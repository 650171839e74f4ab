use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::shift::ShiftWindow;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct AttendanceRecord {
    pub id: u64,
    pub organization_id: u64,
    pub employee_id: u64,
    #[schema(example = "2026-01-05")]
    pub date: NaiveDate,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    #[schema(example = "present")]
    pub status: String,
    #[schema(example = 8.25)]
    pub work_hours: Option<f64>,
    #[schema(example = "web")]
    pub check_in_method: String,
    pub camera_id: Option<u64>,
    pub location_id: Option<u64>,
    pub notes: Option<String>,
    pub approved_by: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const ATTENDANCE_COLUMNS: &str = "id, organization_id, employee_id, date, check_in_time, \
     check_out_time, status, work_hours, check_in_method, camera_id, location_id, notes, \
     approved_by, created_at, updated_at";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    HalfDay,
    OnLeave,
}

impl AttendanceStatus {
    /// Statuses that count as having attended.
    pub fn is_attended(self) -> bool {
        matches!(
            self,
            AttendanceStatus::Present | AttendanceStatus::Late | AttendanceStatus::HalfDay
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckInMethod {
    #[default]
    Web,
    Mobile,
    Manual,
    Card,
    Face,
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Hours between check-in and check-out, two decimals.
pub fn work_hours(check_in: NaiveDateTime, check_out: NaiveDateTime) -> Result<f64, String> {
    if check_out <= check_in {
        return Err("check_out_time must be after check_in_time".into());
    }
    let minutes = (check_out - check_in).num_minutes();
    Ok(round2(minutes as f64 / 60.0))
}

/// Status at check-in: late when past the shift start plus grace on a
/// working day, present otherwise (including employees without a shift).
pub fn arrival_status(check_in: NaiveDateTime, shift: Option<&ShiftWindow>) -> AttendanceStatus {
    match shift {
        Some(s) if s.is_working_day(check_in.date()) && s.is_late(check_in.time()) => {
            AttendanceStatus::Late
        }
        _ => AttendanceStatus::Present,
    }
}

/// Status at check-out: an attended day shorter than half the shift becomes
/// a half day.
pub fn departure_status(
    current: AttendanceStatus,
    hours: f64,
    shift: Option<&ShiftWindow>,
) -> AttendanceStatus {
    match shift {
        Some(s)
            if matches!(current, AttendanceStatus::Present | AttendanceStatus::Late)
                && hours * 60.0 < s.duration_minutes() as f64 / 2.0 =>
        {
            AttendanceStatus::HalfDay
        }
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::shift::tests::window;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn work_hours_rounds_to_two_decimals() {
        assert_eq!(work_hours(dt("2026-01-05 09:00"), dt("2026-01-05 17:20")).unwrap(), 8.33);
    }

    #[test]
    fn work_hours_spans_midnight() {
        assert_eq!(work_hours(dt("2026-01-05 22:00"), dt("2026-01-06 06:30")).unwrap(), 8.5);
    }

    #[test]
    fn check_out_before_check_in_is_rejected() {
        assert!(work_hours(dt("2026-01-05 09:00"), dt("2026-01-05 09:00")).is_err());
        assert!(work_hours(dt("2026-01-05 09:00"), dt("2026-01-05 08:00")).is_err());
    }

    #[test]
    fn arrival_uses_shift_and_grace() {
        let w = window("09:00", "17:00", 5);
        assert_eq!(arrival_status(dt("2026-01-05 09:04"), Some(&w)), AttendanceStatus::Present);
        assert_eq!(arrival_status(dt("2026-01-05 09:30"), Some(&w)), AttendanceStatus::Late);
        assert_eq!(arrival_status(dt("2026-01-05 11:00"), None), AttendanceStatus::Present);
    }

    #[test]
    fn arrival_on_a_day_off_is_never_late() {
        let w = window("09:00", "17:00", 0);
        // Saturday
        assert_eq!(arrival_status(dt("2026-01-10 12:00"), Some(&w)), AttendanceStatus::Present);
    }

    #[test]
    fn short_days_become_half_days() {
        let w = window("09:00", "17:00", 0);
        assert_eq!(
            departure_status(AttendanceStatus::Late, 3.5, Some(&w)),
            AttendanceStatus::HalfDay
        );
        assert_eq!(
            departure_status(AttendanceStatus::Present, 4.0, Some(&w)),
            AttendanceStatus::Present
        );
        assert_eq!(
            departure_status(AttendanceStatus::Present, 1.0, None),
            AttendanceStatus::Present
        );
    }

    #[test]
    fn attended_statuses() {
        assert!(AttendanceStatus::HalfDay.is_attended());
        assert!(!AttendanceStatus::OnLeave.is_attended());
        assert_eq!(AttendanceStatus::HalfDay.as_ref(), "half_day");
    }
}
