use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Department {
    pub id: u64,
    pub organization_id: u64,
    pub parent_id: Option<u64>,
    pub manager_id: Option<u64>,
    #[schema(example = "Engineering")]
    pub name: String,
    #[schema(example = "ENG")]
    pub code: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEPARTMENT_COLUMNS: &str = "id, organization_id, parent_id, manager_id, name, code, \
     description, is_active, created_at, updated_at";
