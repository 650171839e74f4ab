use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{DeleteQuery, count_rows, ensure_reference, fetch_scoped, non_empty},
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::department::{DEPARTMENT_COLUMNS, Department},
    rbac::{TenantScope, action, resource},
    response::{self, PageParams, PageQuery},
    utils::db_utils::{BindValues, Filter, UpdateSet, build_update_sql, delete_row, execute_update},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDepartment {
    /// Required for super admins, must match your own otherwise
    pub organization_id: Option<u64>,
    #[schema(example = "Engineering")]
    pub name: String,
    #[schema(example = "ENG")]
    pub code: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<u64>,
    pub manager_id: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateDepartment {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<u64>,
    pub manager_id: Option<u64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DepartmentQuery {
    pub search: Option<String>,
    pub parent_id: Option<u64>,
    pub is_active: Option<bool>,
}

async fn ensure_unique_name(
    pool: &MySqlPool,
    organization_id: u64,
    name: &str,
    exclude_id: u64,
) -> ApiResult<()> {
    let filter = Filter::tenant(TenantScope::Organization(organization_id), "")
        .eq("name", name)
        .raw("id <> ?");
    let sql = format!("SELECT COUNT(*) FROM departments{}", filter.where_sql());

    let taken = sqlx::query_scalar::<_, i64>(&sql)
        .bind_values(filter.values())
        .bind(exclude_id)
        .fetch_one(pool)
        .await?;

    if taken > 0 {
        return Err(ApiError::conflict(format!("Department '{name}' already exists")));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/api/v2/departments",
    params(PageQuery, DepartmentQuery),
    responses((status = 200, description = "Paginated department list", body = [Department])),
    tag = "Departments",
    security(("bearer_auth" = []))
)]
pub async fn list_departments(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<DepartmentQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::DEPARTMENTS, action::READ)?;
    let page = PageParams::from(&*page);

    let filter = Filter::tenant(auth.scope(), "")
        .eq_opt("parent_id", query.parent_id)
        .eq_opt("is_active", query.is_active)
        .search(&["name", "code"], query.search.as_deref());

    let total = count_rows(pool.get_ref(), "departments", &filter).await?;

    let sql = format!(
        "SELECT {DEPARTMENT_COLUMNS} FROM departments{} ORDER BY name LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, Department>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Departments retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/departments/{id}",
    params(("id" = u64, Path, description = "Department id")),
    responses(
        (status = 200, description = "Department", body = Department),
        (status = 404, description = "Department not found")
    ),
    tag = "Departments",
    security(("bearer_auth" = []))
)]
pub async fn get_department(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::DEPARTMENTS, action::READ)?;
    let dept: Department = fetch_scoped(
        pool.get_ref(),
        "departments",
        DEPARTMENT_COLUMNS,
        path.into_inner(),
        auth.scope(),
        "Department",
    )
    .await?;
    Ok(response::ok("Department retrieved", dept))
}

#[utoipa::path(
    post,
    path = "/api/v2/departments",
    request_body = CreateDepartment,
    responses(
        (status = 201, description = "Department created", body = Department),
        (status = 409, description = "Name already used in this organization")
    ),
    tag = "Departments",
    security(("bearer_auth" = []))
)]
pub async fn create_department(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateDepartment>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::DEPARTMENTS, action::CREATE)?;
    let org = auth.target_org(payload.organization_id)?;

    non_empty("name", &payload.name)?;
    let name = payload.name.trim();

    ensure_reference(pool.get_ref(), "departments", payload.parent_id, org, "parent_id").await?;
    ensure_reference(pool.get_ref(), "employees", payload.manager_id, org, "manager_id").await?;
    ensure_unique_name(pool.get_ref(), org, name, 0).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO departments (organization_id, parent_id, manager_id, name, code, description)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(payload.parent_id)
    .bind(payload.manager_id)
    .bind(name)
    .bind(payload.code.as_deref())
    .bind(payload.description.as_deref())
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::DEPARTMENTS,
        Some(id),
        json!({ "name": name }),
    )
    .await;

    let dept: Department = fetch_scoped(
        pool.get_ref(),
        "departments",
        DEPARTMENT_COLUMNS,
        id,
        TenantScope::All,
        "Department",
    )
    .await?;
    Ok(response::created("Department created", dept))
}

#[utoipa::path(
    put,
    path = "/api/v2/departments/{id}",
    params(("id" = u64, Path, description = "Department id")),
    request_body = UpdateDepartment,
    responses(
        (status = 200, description = "Department updated", body = Department),
        (status = 404, description = "Department not found")
    ),
    tag = "Departments",
    security(("bearer_auth" = []))
)]
pub async fn update_department(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateDepartment>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::DEPARTMENTS, action::UPDATE)?;
    let id = path.into_inner();

    let current: Department = fetch_scoped(
        pool.get_ref(),
        "departments",
        DEPARTMENT_COLUMNS,
        id,
        auth.scope(),
        "Department",
    )
    .await?;
    let org = current.organization_id;

    if let Some(name) = &payload.name {
        non_empty("name", name)?;
        ensure_unique_name(pool.get_ref(), org, name.trim(), id).await?;
    }
    if payload.parent_id == Some(id) {
        return Err(ApiError::validation("A department cannot be its own parent"));
    }
    ensure_reference(pool.get_ref(), "departments", payload.parent_id, org, "parent_id").await?;
    ensure_reference(pool.get_ref(), "employees", payload.manager_id, org, "manager_id").await?;

    let set = UpdateSet::new()
        .set_opt("name", payload.name.as_deref().map(str::trim))
        .set_opt("code", payload.code.clone())
        .set_opt("description", payload.description.clone())
        .set_opt("parent_id", payload.parent_id)
        .set_opt("manager_id", payload.manager_id)
        .set_opt("is_active", payload.is_active);

    let update = build_update_sql("departments", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Update,
        resource::DEPARTMENTS,
        Some(id),
        json!({ "name": payload.name, "is_active": payload.is_active }),
    )
    .await;

    let dept: Department = fetch_scoped(
        pool.get_ref(),
        "departments",
        DEPARTMENT_COLUMNS,
        id,
        auth.scope(),
        "Department",
    )
    .await?;
    Ok(response::ok("Department updated", dept))
}

#[utoipa::path(
    delete,
    path = "/api/v2/departments/{id}",
    params(("id" = u64, Path, description = "Department id"), DeleteQuery),
    responses(
        (status = 200, description = "Department deleted"),
        (status = 404, description = "Department not found"),
        (status = 409, description = "Hard delete of a record other rows still reference")
    ),
    tag = "Departments",
    security(("bearer_auth" = []))
)]
pub async fn delete_department(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::DEPARTMENTS, action::DELETE)?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    let affected = delete_row(pool.get_ref(), "departments", id, auth.scope(), hard).await?;
    if affected == 0 {
        return Err(ApiError::not_found("Department"));
    }

    audit::record(
        pool.get_ref(),
        &auth,
        None,
        AuditAction::Delete,
        resource::DEPARTMENTS,
        Some(id),
        json!({ "hard": hard }),
    )
    .await;

    Ok(response::message("Department deleted"))
}
