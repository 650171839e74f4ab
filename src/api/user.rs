use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{DeleteQuery, count_rows, ensure_reference, role::fetch_role},
    audit::{self, AuditAction},
    auth::{
        auth::AuthUser,
        password::{check_strength, hash_password},
        username_index,
    },
    error::{ApiError, ApiResult},
    model::{
        employee::validate_email,
        user::{USER_SELECT, User, validate_username},
    },
    rbac::{TenantScope, action, can_assign_level, resource},
    response::{self, PageParams, PageQuery},
    utils::db_utils::{BindValues, Filter, UpdateSet, build_update_sql, delete_row, execute_update},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUser {
    pub organization_id: Option<u64>,
    #[schema(example = "jane.hr")]
    pub username: String,
    #[schema(example = "jane@acme.test")]
    pub email: String,
    pub password: String,
    pub role_id: u64,
    pub employee_id: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub role_id: Option<u64>,
    pub employee_id: Option<u64>,
    pub is_active: Option<bool>,
    /// Administrative reset; no current password needed
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    pub role_id: Option<u64>,
    pub is_active: Option<bool>,
    /// Matches username or email
    pub search: Option<String>,
}

pub(crate) async fn fetch_user(pool: &MySqlPool, id: u64, scope: TenantScope) -> ApiResult<User> {
    let filter = Filter::tenant(scope, "u").eq("u.id", id);
    let sql = format!("{USER_SELECT}{}", filter.where_sql());

    sqlx::query_as::<_, User>(&sql)
        .bind_values(filter.values())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))
}

async fn role_level_of(pool: &MySqlPool, user_id: u64) -> ApiResult<i32> {
    let level = sqlx::query_scalar::<_, i32>(
        "SELECT r.level FROM users u JOIN roles r ON r.id = u.role_id WHERE u.id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(level)
}

/// The role must be visible to the organization and strictly below the
/// caller's own level.
async fn check_role_assignment(
    pool: &MySqlPool,
    auth: &AuthUser,
    role_id: u64,
    organization_id: u64,
) -> ApiResult<()> {
    let role = fetch_role(pool, role_id, TenantScope::Organization(organization_id))
        .await
        .map_err(|e| match e {
            ApiError::NotFound(_) => ApiError::validation(format!("role_id {role_id} does not exist")),
            other => other,
        })?;

    if !can_assign_level(auth.role_level, role.level, auth.is_super_admin()) {
        return Err(ApiError::forbidden(format!(
            "Cannot assign role '{}' (level {}) at your level {}",
            role.name, role.level, auth.role_level
        )));
    }
    Ok(())
}

/// An employee profile links to at most one login.
async fn ensure_employee_unlinked(
    pool: &MySqlPool,
    employee_id: Option<u64>,
    exclude_user: u64,
) -> ApiResult<()> {
    if let Some(employee_id) = employee_id {
        let linked = count_rows(
            pool,
            "users",
            &Filter::new()
                .raw("deleted_at IS NULL")
                .eq("employee_id", employee_id)
                .clause("id <> ?", vec![exclude_user.into()]),
        )
        .await?;
        if linked > 0 {
            return Err(ApiError::conflict(format!(
                "Employee {employee_id} already has a user account"
            )));
        }
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/api/v2/users",
    params(PageQuery, UserQuery),
    responses((status = 200, description = "Paginated user list", body = [User])),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<UserQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::USERS, action::READ)?;
    let page = PageParams::from(&*page);

    let filter = Filter::tenant(auth.scope(), "u")
        .eq_opt("u.role_id", query.role_id)
        .eq_opt("u.is_active", query.is_active)
        .search(&["u.username", "u.email"], query.search.as_deref());

    let total = count_rows(pool.get_ref(), "users u", &filter).await?;

    let sql = format!(
        "{USER_SELECT}{} ORDER BY u.id DESC LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, User>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Users retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "User not found")
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn get_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    if id != auth.user_id {
        auth.require(resource::USERS, action::READ)?;
    }
    let user = fetch_user(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("User retrieved", user))
}

#[utoipa::path(
    post,
    path = "/api/v2/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 403, description = "Role level not below your own"),
        (status = 409, description = "Username taken or employee already linked")
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUser>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::USERS, action::CREATE)?;
    let org = auth.target_org(payload.organization_id)?;

    let username = username_index::normalize(&payload.username);
    validate_username(&username).map_err(ApiError::validation)?;
    validate_email(&payload.email).map_err(ApiError::validation)?;
    check_strength(&payload.password).map_err(ApiError::validation)?;

    check_role_assignment(pool.get_ref(), &auth, payload.role_id, org).await?;
    ensure_reference(pool.get_ref(), "employees", payload.employee_id, org, "employee_id").await?;
    ensure_employee_unlinked(pool.get_ref(), payload.employee_id, 0).await?;

    if !username_index::is_available(pool.get_ref(), &username).await? {
        return Err(ApiError::conflict(format!("Username '{username}' is already taken")));
    }

    let hashed = hash_password(&payload.password)?;

    let result = sqlx::query(
        r#"
        INSERT INTO users (organization_id, role_id, employee_id, username, email, password)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(payload.role_id)
    .bind(payload.employee_id)
    .bind(&username)
    .bind(payload.email.trim())
    .bind(&hashed)
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();
    username_index::remember(&username).await;
    info!(user_id = id, organization_id = org, "User created");

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::USERS,
        Some(id),
        json!({ "username": username, "role_id": payload.role_id }),
    )
    .await;

    let user = fetch_user(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::created("User created", user))
}

#[utoipa::path(
    put,
    path = "/api/v2/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    request_body = UpdateUser,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 403, description = "Target or new role not below your level"),
        (status = 404, description = "User not found")
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn update_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateUser>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::USERS, action::UPDATE)?;
    let id = path.into_inner();

    let current = fetch_user(pool.get_ref(), id, auth.scope()).await?;
    let current_level = role_level_of(pool.get_ref(), id).await?;
    if !can_assign_level(auth.role_level, current_level, auth.is_super_admin()) {
        return Err(ApiError::forbidden("Cannot modify a user at or above your level"));
    }
    if id == auth.user_id && payload.is_active == Some(false) {
        return Err(ApiError::validation("You cannot deactivate your own account"));
    }

    let org = current.organization_id;
    if let Some(email) = &payload.email {
        validate_email(email).map_err(ApiError::validation)?;
    }
    if let Some(role_id) = payload.role_id {
        let org = org.ok_or_else(|| ApiError::validation("Platform users cannot change role"))?;
        check_role_assignment(pool.get_ref(), &auth, role_id, org).await?;
    }
    if let (Some(org), Some(_)) = (org, payload.employee_id) {
        ensure_reference(pool.get_ref(), "employees", payload.employee_id, org, "employee_id")
            .await?;
        ensure_employee_unlinked(pool.get_ref(), payload.employee_id, id).await?;
    }
    let hashed = match &payload.password {
        Some(p) => {
            check_strength(p).map_err(ApiError::validation)?;
            Some(hash_password(p)?)
        }
        None => None,
    };

    let set = UpdateSet::new()
        .set_opt("email", payload.email.as_deref().map(str::trim))
        .set_opt("role_id", payload.role_id)
        .set_opt("employee_id", payload.employee_id)
        .set_opt("is_active", payload.is_active)
        .set_opt("password", hashed);

    let update = build_update_sql("users", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    if payload.is_active == Some(false) || payload.password.is_some() {
        // Existing sessions end with the account change.
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
            .bind(id)
            .execute(pool.get_ref())
            .await?;
    }

    audit::record(
        pool.get_ref(),
        &auth,
        org,
        AuditAction::Update,
        resource::USERS,
        Some(id),
        json!({
            "role_id": payload.role_id,
            "is_active": payload.is_active,
            "password_reset": payload.password.is_some(),
        }),
    )
    .await;

    let user = fetch_user(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("User updated", user))
}

#[utoipa::path(
    delete,
    path = "/api/v2/users/{id}",
    params(("id" = u64, Path, description = "User id"), DeleteQuery),
    responses(
        (status = 200, description = "User deleted"),
        (status = 404, description = "User not found")
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn delete_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::USERS, action::DELETE)?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    if id == auth.user_id {
        return Err(ApiError::validation("You cannot delete your own account"));
    }

    let current = fetch_user(pool.get_ref(), id, auth.scope()).await?;
    let level = role_level_of(pool.get_ref(), id).await?;
    if !can_assign_level(auth.role_level, level, auth.is_super_admin()) {
        return Err(ApiError::forbidden("Cannot delete a user at or above your level"));
    }

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if hard {
        sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    delete_row(&mut *tx, "users", id, auth.scope(), hard).await?;
    tx.commit().await?;

    // Soft-deleted accounts keep their username reserved.
    if hard {
        username_index::forget(&current.username).await;
    }

    audit::record(
        pool.get_ref(),
        &auth,
        current.organization_id,
        AuditAction::Delete,
        resource::USERS,
        Some(id),
        json!({ "hard": hard, "username": current.username }),
    )
    .await;

    Ok(response::message("User deleted"))
}
