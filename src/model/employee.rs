use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "organization_id": 1,
        "department_id": 10,
        "shift_id": 2,
        "location_id": null,
        "employee_code": "EMP-001",
        "first_name": "John",
        "last_name": "Doe",
        "email": "john.doe@company.com",
        "phone": "+8801712345678",
        "designation": "Engineer",
        "hire_date": "2024-01-01",
        "status": "active",
        "working_hours": {"weekly": 40},
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    })
)]
pub struct Employee {
    pub id: u64,
    pub organization_id: u64,
    pub department_id: Option<u64>,
    pub shift_id: Option<u64>,
    pub location_id: Option<u64>,

    #[schema(example = "EMP-001")]
    pub employee_code: String,

    #[schema(example = "John")]
    pub first_name: String,

    #[schema(example = "Doe")]
    pub last_name: String,

    #[schema(example = "john.doe@company.com")]
    pub email: String,

    #[schema(example = "+8801712345678", nullable = true)]
    pub phone: Option<String>,

    pub designation: Option<String>,

    #[schema(example = "2024-01-01")]
    pub hire_date: NaiveDate,

    #[schema(example = "active")]
    pub status: String,

    #[schema(value_type = Option<Object>)]
    pub working_hours: Option<Json<Value>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const EMPLOYEE_COLUMNS: &str = "id, organization_id, department_id, shift_id, location_id, \
     employee_code, first_name, last_name, email, phone, designation, hire_date, status, \
     working_hours, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmployeeStatus {
    Active,
    Inactive,
    OnLeave,
    Terminated,
}

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(format!("'{email}' is not a valid email address")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("@b.co").is_err());
        assert!(validate_email("a b@c.io").is_err());
    }

    #[test]
    fn status_strings() {
        assert_eq!(EmployeeStatus::OnLeave.as_ref(), "on_leave");
        assert_eq!("terminated".parse::<EmployeeStatus>().unwrap(), EmployeeStatus::Terminated);
    }
}
