use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::model::attendance::{AttendanceRecord, AttendanceStatus, work_hours};

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct ChangeRequest {
    pub id: u64,
    pub organization_id: u64,
    pub employee_id: u64,
    pub attendance_id: Option<u64>,
    #[schema(example = "2026-01-05")]
    pub date: NaiveDate,
    #[schema(value_type = ProposedChanges)]
    pub requested_changes: Json<ProposedChanges>,
    pub reason: String,
    #[schema(example = "pending")]
    pub status: String,
    pub reviewed_by: Option<u64>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const CHANGE_REQUEST_COLUMNS: &str = "id, organization_id, employee_id, attendance_id, date, \
     requested_changes, reason, status, reviewed_by, reviewed_at, review_notes, created_at, \
     updated_at";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeRequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// Attendance fields an employee may ask to have corrected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ProposedChanges {
    #[schema(example = "2026-01-05T09:00:00")]
    pub check_in_time: Option<NaiveDateTime>,
    #[schema(example = "2026-01-05T17:30:00")]
    pub check_out_time: Option<NaiveDateTime>,
    pub status: Option<AttendanceStatus>,
    pub notes: Option<String>,
}

impl ProposedChanges {
    pub fn is_empty(&self) -> bool {
        self.check_in_time.is_none()
            && self.check_out_time.is_none()
            && self.status.is_none()
            && self.notes.is_none()
    }

    /// Check-in must fall on `date`; check-out on `date` or the next day
    /// (overnight shifts) and after the check-in.
    pub fn validate(&self, date: NaiveDate) -> Result<(), ApiError> {
        if self.is_empty() {
            return Err(ApiError::validation("requested_changes must not be empty"));
        }

        if let Some(check_in) = self.check_in_time {
            if check_in.date() != date {
                return Err(ApiError::validation("check_in_time must be on the requested date"));
            }
        }

        if let Some(check_out) = self.check_out_time {
            let d = check_out.date();
            if d != date && d != date + Duration::days(1) {
                return Err(ApiError::validation(
                    "check_out_time must be on the requested date or the day after",
                ));
            }
        }

        if let (Some(check_in), Some(check_out)) = (self.check_in_time, self.check_out_time) {
            work_hours(check_in, check_out).map_err(ApiError::validation)?;
        }

        Ok(())
    }
}

/// The mutable part of an attendance record, before and after a correction.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceDraft {
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub status: AttendanceStatus,
    pub work_hours: Option<f64>,
    pub notes: Option<String>,
}

impl Default for AttendanceDraft {
    fn default() -> Self {
        Self {
            check_in_time: None,
            check_out_time: None,
            status: AttendanceStatus::Present,
            work_hours: None,
            notes: None,
        }
    }
}

impl From<&AttendanceRecord> for AttendanceDraft {
    fn from(r: &AttendanceRecord) -> Self {
        Self {
            check_in_time: r.check_in_time,
            check_out_time: r.check_out_time,
            status: r.status.parse().unwrap_or(AttendanceStatus::Present),
            work_hours: r.work_hours,
            notes: r.notes.clone(),
        }
    }
}

/// Overlays the proposed fields onto the current record (or a blank one)
/// and recomputes worked hours from the resulting times.
pub fn apply_changes(
    current: Option<AttendanceDraft>,
    changes: &ProposedChanges,
) -> Result<AttendanceDraft, ApiError> {
    let mut draft = current.unwrap_or_default();

    if let Some(t) = changes.check_in_time {
        draft.check_in_time = Some(t);
    }
    if let Some(t) = changes.check_out_time {
        draft.check_out_time = Some(t);
    }
    if let Some(s) = changes.status {
        draft.status = s;
    }
    if let Some(n) = &changes.notes {
        draft.notes = Some(n.clone());
    }

    draft.work_hours = match (draft.check_in_time, draft.check_out_time) {
        (Some(i), Some(o)) => Some(work_hours(i, o).map_err(ApiError::validation)?),
        _ => None,
    };

    Ok(draft)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let r = serde_json::from_str::<ProposedChanges>(r#"{"employee_id": 3}"#);
        assert!(r.is_err());
    }

    #[test]
    fn empty_changes_are_invalid() {
        let err = ProposedChanges::default().validate(date()).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn times_must_belong_to_the_requested_day() {
        let wrong_day = ProposedChanges {
            check_in_time: Some(dt("2026-01-06 09:00")),
            ..Default::default()
        };
        assert!(wrong_day.validate(date()).is_err());

        let overnight = ProposedChanges {
            check_in_time: Some(dt("2026-01-05 22:00")),
            check_out_time: Some(dt("2026-01-06 06:00")),
            ..Default::default()
        };
        assert!(overnight.validate(date()).is_ok());

        let reversed = ProposedChanges {
            check_in_time: Some(dt("2026-01-05 18:00")),
            check_out_time: Some(dt("2026-01-05 09:00")),
            ..Default::default()
        };
        assert!(reversed.validate(date()).is_err());
    }

    #[test]
    fn applying_to_existing_record_recomputes_hours() {
        let current = AttendanceDraft {
            check_in_time: Some(dt("2026-01-05 09:00")),
            check_out_time: Some(dt("2026-01-05 13:00")),
            status: AttendanceStatus::HalfDay,
            work_hours: Some(4.0),
            notes: None,
        };
        let changes = ProposedChanges {
            check_out_time: Some(dt("2026-01-05 17:30")),
            status: Some(AttendanceStatus::Present),
            ..Default::default()
        };

        let out = apply_changes(Some(current), &changes).unwrap();
        assert_eq!(out.work_hours, Some(8.5));
        assert_eq!(out.status, AttendanceStatus::Present);
        assert_eq!(out.check_in_time, Some(dt("2026-01-05 09:00")));
    }

    #[test]
    fn applying_without_a_record_starts_blank() {
        let changes = ProposedChanges {
            check_in_time: Some(dt("2026-01-05 09:15")),
            notes: Some("forgot badge".into()),
            ..Default::default()
        };
        let out = apply_changes(None, &changes).unwrap();
        assert_eq!(out.status, AttendanceStatus::Present);
        assert_eq!(out.work_hours, None);
        assert_eq!(out.notes.as_deref(), Some("forgot badge"));
    }

    #[test]
    fn applying_a_check_out_before_existing_check_in_fails() {
        let current = AttendanceDraft {
            check_in_time: Some(dt("2026-01-05 10:00")),
            ..Default::default()
        };
        let changes = ProposedChanges {
            check_out_time: Some(dt("2026-01-05 09:00")),
            ..Default::default()
        };
        assert!(matches!(
            apply_changes(Some(current), &changes),
            Err(ApiError::Validation(_))
        ));
    }
}
