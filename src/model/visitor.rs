use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Visitor {
    pub id: u64,
    pub organization_id: u64,
    #[schema(example = "Maria Lopez")]
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    #[schema(example = "passport")]
    pub id_document_type: Option<String>,
    pub id_document_number: Option<String>,
    pub is_blacklisted: bool,
    pub blacklist_reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const VISITOR_COLUMNS: &str = "id, organization_id, full_name, email, phone, company, \
     id_document_type, id_document_number, is_blacklisted, blacklist_reason, notes, created_at, \
     updated_at";

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct VisitorVisit {
    pub id: u64,
    pub organization_id: u64,
    pub visitor_id: u64,
    pub host_employee_id: Option<u64>,
    pub location_id: Option<u64>,
    #[schema(example = "Vendor meeting")]
    pub purpose: String,
    #[schema(example = "V-3FA85F64")]
    pub badge_number: Option<String>,
    #[schema(example = "checked_in")]
    pub status: String,
    pub expected_at: Option<NaiveDateTime>,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub check_in_camera_id: Option<u64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const VISIT_COLUMNS: &str = "id, organization_id, visitor_id, host_employee_id, location_id, \
     purpose, badge_number, status, expected_at, check_in_time, check_out_time, \
     check_in_camera_id, notes, created_at, updated_at";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VisitStatus {
    Expected,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl VisitStatus {
    pub fn can_transition_to(self, next: VisitStatus) -> bool {
        use VisitStatus::*;
        matches!(
            (self, next),
            (Expected, CheckedIn) | (CheckedIn, CheckedOut) | (Expected, Cancelled)
        )
    }

    pub fn transition(self, next: VisitStatus) -> Result<VisitStatus, ApiError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ApiError::conflict(format!("Visit is {self} and cannot become {next}")))
        }
    }
}

/// Short printable badge id, e.g. `V-3FA85F64`.
pub fn new_badge_number() -> String {
    let id = uuid::Uuid::new_v4().to_simple().to_string();
    format!("V-{}", id[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visit_lifecycle() {
        use VisitStatus::*;
        assert!(Expected.can_transition_to(CheckedIn));
        assert!(CheckedIn.can_transition_to(CheckedOut));
        assert!(Expected.can_transition_to(Cancelled));
        assert!(!CheckedIn.can_transition_to(Cancelled));
        assert!(!CheckedOut.can_transition_to(CheckedIn));
        assert!(matches!(Cancelled.transition(CheckedIn), Err(ApiError::Conflict(_))));
    }

    #[test]
    fn badge_numbers_are_prefixed_hex() {
        let badge = new_badge_number();
        assert_eq!(badge.len(), 10);
        assert!(badge.starts_with("V-"));
        assert!(badge[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(badge, new_badge_number());
    }

    #[test]
    fn status_column_values() {
        assert_eq!(VisitStatus::CheckedIn.as_ref(), "checked_in");
        assert_eq!("checked_out".parse::<VisitStatus>().unwrap(), VisitStatus::CheckedOut);
    }
}
