use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// User without credentials, joined with its role name.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct User {
    pub id: u64,
    pub organization_id: Option<u64>,
    pub role_id: u64,
    #[schema(example = "hr_manager")]
    pub role_name: String,
    pub employee_id: Option<u64>,
    #[schema(example = "jane.hr")]
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub last_login_at: Option<NaiveDateTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const USER_SELECT: &str = r#"
    SELECT u.id, u.organization_id, u.role_id, r.name AS role_name, u.employee_id,
           u.username, u.email, u.is_active, u.last_login_at, u.created_at, u.updated_at
    FROM users u
    JOIN roles r ON r.id = u.role_id
"#;

/// Letters, digits, dot, dash and underscore; 3 to 100 characters.
pub fn validate_username(username: &str) -> Result<(), String> {
    let ok = (3..=100).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if ok {
        Ok(())
    } else {
        Err("username must be 3-100 characters of letters, digits, '.', '-' or '_'".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert!(validate_username("jane.doe_1").is_ok());
        assert!(validate_username("jd").is_err());
        assert!(validate_username("jane doe").is_err());
    }
}
