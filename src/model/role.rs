use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use utoipa::ToSchema;

use crate::rbac::Permissions;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Role {
    pub id: u64,
    /// `None` for built-in roles shared by every organization
    pub organization_id: Option<u64>,
    #[schema(example = "shift_lead")]
    pub name: String,
    #[schema(example = "Shift Lead")]
    pub display_name: String,
    pub description: Option<String>,
    #[schema(example = 35)]
    pub level: i32,
    #[schema(value_type = Object, example = json!({"attendance": ["read", "update"]}))]
    pub permissions: Json<Permissions>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const ROLE_COLUMNS: &str = "id, organization_id, name, display_name, description, level, \
     permissions, is_system, created_at, updated_at";

/// Custom role levels live strictly between the employee and super admin
/// levels.
pub fn validate_level(level: i32) -> Result<(), String> {
    if (1..100).contains(&level) {
        Ok(())
    } else {
        Err("level must be between 1 and 99".into())
    }
}
