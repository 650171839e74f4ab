use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct LeaveRequest {
    pub id: u64,
    pub organization_id: u64,
    pub employee_id: u64,
    #[schema(example = "sick")]
    pub leave_type: String,
    #[schema(example = "2026-01-01")]
    pub start_date: NaiveDate,
    #[schema(example = "2026-01-03")]
    pub end_date: NaiveDate,
    #[schema(example = 3)]
    pub total_days: i32,
    pub reason: Option<String>,
    #[schema(example = "pending")]
    pub status: String,
    pub reviewed_by: Option<u64>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const LEAVE_COLUMNS: &str = "id, organization_id, employee_id, leave_type, start_date, \
     end_date, total_days, reason, status, reviewed_by, reviewed_at, review_notes, created_at, \
     updated_at";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeaveType {
    Annual,
    Sick,
    Casual,
    Unpaid,
    Maternity,
    Paternity,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl LeaveStatus {
    /// Pending and approved requests hold their dates.
    pub fn blocks_dates(self) -> bool {
        matches!(self, LeaveStatus::Pending | LeaveStatus::Approved)
    }

    pub fn can_transition_to(self, next: LeaveStatus) -> bool {
        use LeaveStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled) | (Approved, Cancelled)
        )
    }

    pub fn transition(self, next: LeaveStatus) -> Result<LeaveStatus, ApiError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ApiError::conflict(format!(
                "Leave request is {self} and cannot become {next}"
            )))
        }
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ApiError> {
        if start > end {
            return Err(ApiError::validation("start_date cannot be after end_date"));
        }
        Ok(Self { start, end })
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Blocking requests of one employee intersecting `[?, ?]`. Binds:
/// employee_id, new end, new start, excluded id (0 when creating).
pub const OVERLAP_SQL: &str = r#"
    SELECT id FROM leave_requests
    WHERE employee_id = ?
      AND deleted_at IS NULL
      AND status IN ('pending', 'approved')
      AND start_date <= ?
      AND end_date >= ?
      AND id <> ?
    LIMIT 1
"#;

pub const MAX_LEAVE_DAYS: i64 = 365;

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn range(a: &str, b: &str) -> DateRange {
        DateRange::new(d(a), d(b)).unwrap()
    }

    #[test]
    fn start_after_end_is_a_validation_error() {
        let err = DateRange::new(d("2026-02-10"), d("2026-02-01")).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn single_day_range_counts_one_day() {
        assert_eq!(range("2026-02-10", "2026-02-10").days(), 1);
        assert_eq!(range("2026-02-27", "2026-03-02").days(), 4);
    }

    #[test]
    fn overlap_cases() {
        let base = range("2026-03-10", "2026-03-15");
        // contained, containing, touching either edge
        assert!(base.overlaps(&range("2026-03-11", "2026-03-12")));
        assert!(base.overlaps(&range("2026-03-01", "2026-03-31")));
        assert!(base.overlaps(&range("2026-03-15", "2026-03-20")));
        assert!(base.overlaps(&range("2026-03-05", "2026-03-10")));
        // disjoint on both sides
        assert!(!base.overlaps(&range("2026-03-16", "2026-03-20")));
        assert!(!base.overlaps(&range("2026-03-01", "2026-03-09")));
    }

    #[test]
    fn only_pending_and_approved_block_dates() {
        assert!(LeaveStatus::Pending.blocks_dates());
        assert!(LeaveStatus::Approved.blocks_dates());
        assert!(!LeaveStatus::Rejected.blocks_dates());
        assert!(!LeaveStatus::Cancelled.blocks_dates());
    }

    #[test]
    fn status_transitions() {
        use LeaveStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Cancelled));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(matches!(Cancelled.transition(Pending), Err(ApiError::Conflict(_))));
    }

    #[test]
    fn leave_type_parses_from_json_and_column() {
        let t: LeaveType = serde_json::from_str("\"maternity\"").unwrap();
        assert_eq!(t, LeaveType::Maternity);
        assert_eq!("sick".parse::<LeaveType>().unwrap(), LeaveType::Sick);
        assert!(serde_json::from_str::<LeaveType>("\"vacation\"").is_err());
    }
}
