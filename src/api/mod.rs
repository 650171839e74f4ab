pub mod attendance;
pub mod audit_log;
pub mod camera;
pub mod change_request;
pub mod department;
pub mod employee;
pub mod leave_request;
pub mod location;
pub mod lpr;
pub mod organization;
pub mod report;
pub mod role;
pub mod shift;
pub mod user;
pub mod visitor;

use serde::Deserialize;
use sqlx::mysql::MySqlRow;
use sqlx::{FromRow, MySqlPool};
use utoipa::IntoParams;

use crate::auth::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::rbac::TenantScope;
use crate::subscription::{Feature, Limit, Tier};
use crate::utils::db_utils::{BindValues, Filter, exists_in_scope};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeleteQuery {
    /// Permanently remove the row (super admin only)
    pub hard: Option<bool>,
}

impl DeleteQuery {
    /// Soft delete unless `hard=true`, which only a super admin may ask for.
    pub fn resolve(&self, user: &AuthUser) -> ApiResult<bool> {
        match self.hard {
            Some(true) => user.require_super_admin().map(|_| true),
            _ => Ok(false),
        }
    }
}

/// One live row by id inside the caller's tenant, or 404.
pub async fn fetch_scoped<T>(
    pool: &MySqlPool,
    table: &str,
    columns: &str,
    id: u64,
    scope: TenantScope,
    entity: &str,
) -> ApiResult<T>
where
    T: for<'r> FromRow<'r, MySqlRow> + Send + Unpin,
{
    let filter = Filter::tenant(scope, "").eq("id", id);
    let sql = format!("SELECT {columns} FROM {table}{}", filter.where_sql());

    sqlx::query_as::<_, T>(&sql)
        .bind_values(filter.values())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found(entity))
}

/// `COUNT(*)` over a filtered table.
pub async fn count_rows(pool: &MySqlPool, from: &str, filter: &Filter) -> ApiResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {from}{}", filter.where_sql());
    let total = sqlx::query_scalar::<_, i64>(&sql)
        .bind_values(filter.values())
        .fetch_one(pool)
        .await?;
    Ok(total)
}

/// A referenced row must exist in the same organization as the row that
/// points at it.
pub async fn ensure_reference(
    pool: &MySqlPool,
    table: &str,
    id: Option<u64>,
    organization_id: u64,
    field: &str,
) -> ApiResult<()> {
    if let Some(id) = id {
        if !exists_in_scope(pool, table, id, TenantScope::Organization(organization_id)).await? {
            return Err(ApiError::validation(format!(
                "{field} {id} does not exist in this organization"
            )));
        }
    }
    Ok(())
}

pub async fn organization_tier(pool: &MySqlPool, organization_id: u64) -> ApiResult<Tier> {
    let tier = sqlx::query_scalar::<_, String>(
        "SELECT subscription_tier FROM organizations WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(organization_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Organization"))?;

    Ok(tier.parse().unwrap_or(Tier::Free))
}

/// Platform administrators are never gated by plan.
pub async fn require_feature(
    pool: &MySqlPool,
    user: &AuthUser,
    organization_id: Option<u64>,
    feature: Feature,
) -> ApiResult<()> {
    if user.is_super_admin() {
        return Ok(());
    }
    let org = organization_id
        .or(user.organization_id)
        .ok_or_else(|| ApiError::forbidden("User is not attached to an organization"))?;

    organization_tier(pool, org).await?.require(feature)
}

/// Rejects a create that would push the organization past its plan limit.
pub async fn require_capacity(
    pool: &MySqlPool,
    user: &AuthUser,
    organization_id: u64,
    limit: Limit,
) -> ApiResult<()> {
    if user.is_super_admin() {
        return Ok(());
    }
    let table = match limit {
        Limit::Employees => "employees",
        Limit::Cameras => "cameras",
    };
    let current = count_rows(
        pool,
        table,
        &Filter::tenant(TenantScope::Organization(organization_id), ""),
    )
    .await?;

    organization_tier(pool, organization_id)
        .await?
        .check_capacity(limit, current)
}

pub fn non_empty(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        Err(ApiError::validation(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::tests::user;
    use crate::rbac::SystemRole;

    #[test]
    fn hard_delete_is_reserved_for_super_admins() {
        let admin = user(SystemRole::OrgAdmin, Some(1), None);
        let root = user(SystemRole::SuperAdmin, None, None);
        let hard = DeleteQuery { hard: Some(true) };

        assert!(matches!(hard.resolve(&admin), Err(ApiError::Forbidden(_))));
        assert!(hard.resolve(&root).unwrap());
        assert!(!DeleteQuery::default().resolve(&admin).unwrap());
    }

    #[test]
    fn blank_strings_are_rejected() {
        assert!(non_empty("name", "  ").is_err());
        assert!(non_empty("name", "Ops").is_ok());
    }
}
