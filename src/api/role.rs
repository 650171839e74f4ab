use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{DeleteQuery, count_rows, non_empty},
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::role::{ROLE_COLUMNS, Role, validate_level},
    rbac::{Permissions, SystemRole, TenantScope, action, can_assign_level, resource},
    response::{self, PageParams, PageQuery},
    utils::db_utils::{BindValues, Filter, SqlValue, UpdateSet, build_update_sql, execute_update},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRole {
    pub organization_id: Option<u64>,
    #[schema(example = "shift_lead")]
    pub name: String,
    #[schema(example = "Shift Lead")]
    pub display_name: String,
    pub description: Option<String>,
    /// Must be below your own level
    #[schema(example = 35)]
    pub level: i32,
    #[schema(value_type = Object, example = json!({"attendance": ["read", "update"], "leave": ["read", "approve"]}))]
    pub permissions: Permissions,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateRole {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub level: Option<i32>,
    #[schema(value_type = Option<Object>)]
    pub permissions: Option<Permissions>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RoleQuery {
    /// Only built-in (`true`) or only custom (`false`) roles
    pub is_system: Option<bool>,
    pub search: Option<String>,
}

/// System roles plus the roles of the caller's organization.
fn visible_roles(scope: TenantScope) -> Filter {
    let filter = Filter::new().raw("deleted_at IS NULL");
    match scope.organization_id() {
        Some(org) => filter.clause(
            "(organization_id IS NULL OR organization_id = ?)",
            vec![SqlValue::U64(org)],
        ),
        None => filter,
    }
}

pub(crate) async fn fetch_role(pool: &MySqlPool, id: u64, scope: TenantScope) -> ApiResult<Role> {
    let filter = visible_roles(scope).eq("id", id);
    let sql = format!("SELECT {ROLE_COLUMNS} FROM roles{}", filter.where_sql());

    sqlx::query_as::<_, Role>(&sql)
        .bind_values(filter.values())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Role"))
}

fn check_assignable(auth: &AuthUser, level: i32) -> ApiResult<()> {
    if can_assign_level(auth.role_level, level, auth.is_super_admin()) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "Cannot manage a role at level {level}; your level is {}",
            auth.role_level
        )))
    }
}

fn check_permissions(permissions: &Permissions) -> ApiResult<()> {
    if permissions.is_empty() {
        return Err(ApiError::validation("permissions must not be empty"));
    }
    permissions.validate().map_err(ApiError::validation)
}

/// Custom role names may not shadow built-in ones or repeat inside one
/// organization.
async fn ensure_unique_name(pool: &MySqlPool, org: u64, name: &str) -> ApiResult<()> {
    if name.parse::<SystemRole>().is_ok() {
        return Err(ApiError::conflict(format!("'{name}' is a built-in role name")));
    }
    let taken = count_rows(
        pool,
        "roles",
        &Filter::tenant(TenantScope::Organization(org), "").eq("name", name),
    )
    .await?;
    if taken > 0 {
        return Err(ApiError::conflict(format!("Role '{name}' already exists")));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/api/v2/roles",
    params(PageQuery, RoleQuery),
    responses((status = 200, description = "Built-in and organization roles", body = [Role])),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn list_roles(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<RoleQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ROLES, action::READ)?;
    let page = PageParams::from(&*page);

    let filter = visible_roles(auth.scope())
        .eq_opt("is_system", query.is_system)
        .search(&["name", "display_name"], query.search.as_deref());

    let total = count_rows(pool.get_ref(), "roles", &filter).await?;

    let sql = format!(
        "SELECT {ROLE_COLUMNS} FROM roles{} ORDER BY level DESC, name LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, Role>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Roles retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/roles/{id}",
    params(("id" = u64, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role", body = Role),
        (status = 404, description = "Role not found")
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn get_role(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ROLES, action::READ)?;
    let role = fetch_role(pool.get_ref(), path.into_inner(), auth.scope()).await?;
    Ok(response::ok("Role retrieved", role))
}

#[utoipa::path(
    post,
    path = "/api/v2/roles",
    request_body = CreateRole,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 403, description = "Level not below your own"),
        (status = 409, description = "Name already used")
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn create_role(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateRole>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ROLES, action::CREATE)?;
    let org = auth.target_org(payload.organization_id)?;
    check_assignable(&auth, payload.level)?;

    let name = payload.name.trim().to_lowercase();
    non_empty("name", &name)?;
    non_empty("display_name", &payload.display_name)?;
    validate_level(payload.level).map_err(ApiError::validation)?;
    check_permissions(&payload.permissions)?;
    ensure_unique_name(pool.get_ref(), org, &name).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO roles (organization_id, name, display_name, description, level, permissions, is_system)
        VALUES (?, ?, ?, ?, ?, ?, FALSE)
        "#,
    )
    .bind(org)
    .bind(&name)
    .bind(payload.display_name.trim())
    .bind(payload.description.as_deref())
    .bind(payload.level)
    .bind(sqlx::types::Json(&payload.permissions))
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();
    info!(role_id = id, organization_id = org, level = payload.level, "Custom role created");

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::ROLES,
        Some(id),
        json!({ "name": name, "level": payload.level, "permissions": payload.permissions }),
    )
    .await;

    let role = fetch_role(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::created("Role created", role))
}

#[utoipa::path(
    put,
    path = "/api/v2/roles/{id}",
    params(("id" = u64, Path, description = "Role id")),
    request_body = UpdateRole,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 403, description = "System role or level not below your own"),
        (status = 404, description = "Role not found")
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn update_role(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateRole>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ROLES, action::UPDATE)?;
    let id = path.into_inner();

    let current = fetch_role(pool.get_ref(), id, auth.scope()).await?;
    if current.is_system {
        return Err(ApiError::forbidden("System roles are read-only"));
    }
    check_assignable(&auth, current.level)?;
    if let Some(level) = payload.level {
        check_assignable(&auth, level)?;
        validate_level(level).map_err(ApiError::validation)?;
    }
    if let Some(name) = &payload.display_name {
        non_empty("display_name", name)?;
    }
    if let Some(p) = &payload.permissions {
        check_permissions(p)?;
    }

    let permissions = payload
        .permissions
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| ApiError::Internal(format!("permission encoding failed: {e}")))?;

    let set = UpdateSet::new()
        .set_opt("display_name", payload.display_name.as_deref().map(str::trim))
        .set_opt("description", payload.description.clone())
        .set_opt("level", payload.level)
        .set_opt("permissions", permissions);

    // System roles have no organization; custom ones are matched on it.
    let update = build_update_sql("roles", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        current.organization_id,
        AuditAction::Update,
        resource::ROLES,
        Some(id),
        json!({ "level": payload.level, "permissions": payload.permissions }),
    )
    .await;

    let role = fetch_role(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Role updated", role))
}

#[utoipa::path(
    delete,
    path = "/api/v2/roles/{id}",
    params(("id" = u64, Path, description = "Role id"), DeleteQuery),
    responses(
        (status = 200, description = "Role deleted"),
        (status = 403, description = "System role"),
        (status = 409, description = "Role still assigned to users")
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn delete_role(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ROLES, action::DELETE)?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    let current = fetch_role(pool.get_ref(), id, auth.scope()).await?;
    if current.is_system {
        return Err(ApiError::forbidden("System roles are read-only"));
    }
    check_assignable(&auth, current.level)?;

    let in_use = count_rows(
        pool.get_ref(),
        "users",
        &Filter::new().raw("deleted_at IS NULL").eq("role_id", id),
    )
    .await?;
    if in_use > 0 {
        return Err(ApiError::conflict(format!(
            "Role is assigned to {in_use} user(s)"
        )));
    }

    let sql = if hard {
        "DELETE FROM roles WHERE id = ? AND is_system = FALSE"
    } else {
        "UPDATE roles SET deleted_at = NOW() WHERE id = ? AND is_system = FALSE AND deleted_at IS NULL"
    };
    sqlx::query(sql).bind(id).execute(pool.get_ref()).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        current.organization_id,
        AuditAction::Delete,
        resource::ROLES,
        Some(id),
        json!({ "hard": hard, "name": current.name }),
    )
    .await;

    Ok(response::message("Role deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::tests::user;

    #[test]
    fn tenant_sees_system_and_own_roles() {
        let f = visible_roles(TenantScope::Organization(3));
        assert_eq!(
            f.where_sql(),
            " WHERE deleted_at IS NULL AND (organization_id IS NULL OR organization_id = ?)"
        );
        assert_eq!(f.values(), vec![SqlValue::U64(3)]);
        assert_eq!(visible_roles(TenantScope::All).where_sql(), " WHERE deleted_at IS NULL");
    }

    #[test]
    fn hr_manager_cannot_create_peer_level_roles() {
        let hr = user(SystemRole::HrManager, Some(1), None);
        assert!(check_assignable(&hr, 59).is_ok());
        assert!(matches!(check_assignable(&hr, 60), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn empty_or_unknown_permissions_are_invalid() {
        assert!(check_permissions(&Permissions::new()).is_err());
        let unknown: Permissions = serde_json::from_value(json!({"payroll": ["read"]})).unwrap();
        assert!(check_permissions(&unknown).is_err());
        assert!(check_permissions(&Permissions::new().grant("leave", &["read"])).is_ok());
    }
}
