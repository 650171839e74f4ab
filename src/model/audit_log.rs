use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use utoipa::ToSchema;

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct AuditLog {
    pub id: u64,
    pub organization_id: Option<u64>,
    pub user_id: Option<u64>,
    #[schema(example = "approve")]
    pub action: String,
    #[schema(example = "leave")]
    pub resource: String,
    pub resource_id: Option<u64>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<Json<Value>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const AUDIT_LOG_COLUMNS: &str = "id, organization_id, user_id, action, resource, resource_id, \
     details, ip_address, user_agent, created_at";
