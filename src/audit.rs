use serde_json::Value;
use sqlx::MySqlPool;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::auth::auth::AuthUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Approve,
    Reject,
    Cancel,
    CheckIn,
    CheckOut,
    Login,
    PasswordChange,
}

/// Appends an audit row. Failures are logged and never fail the request.
pub async fn record(
    pool: &MySqlPool,
    actor: &AuthUser,
    organization_id: Option<u64>,
    action: AuditAction,
    resource: &str,
    resource_id: Option<u64>,
    details: Value,
) {
    let org = organization_id.or(actor.organization_id);

    if let Err(e) = sqlx::query(
        r#"
        INSERT INTO audit_logs
            (organization_id, user_id, action, resource, resource_id, details, ip_address, user_agent)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(actor.user_id)
    .bind(action.as_ref())
    .bind(resource)
    .bind(resource_id)
    .bind(sqlx::types::Json(details))
    .bind(actor.client.ip_address.as_deref())
    .bind(actor.client.user_agent.as_deref())
    .execute(pool)
    .await
    {
        tracing::error!(
            error = %e,
            user_id = actor.user_id,
            action = %action,
            resource,
            "Failed to write audit log"
        );
    }
}
