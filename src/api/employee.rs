use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::MySqlPool;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{DeleteQuery, count_rows, ensure_reference, fetch_scoped, non_empty, require_capacity},
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::{
        employee::{EMPLOYEE_COLUMNS, Employee, EmployeeStatus, validate_email},
        shift::{SHIFT_COLUMNS, Shift, ShiftWindow},
    },
    rbac::{TenantScope, action, resource},
    response::{self, PageParams, PageQuery},
    subscription::Limit,
    utils::db_utils::{BindValues, Filter, UpdateSet, build_update_sql, delete_row, execute_update},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateEmployee {
    /// Required for super admins, must match your own otherwise
    pub organization_id: Option<u64>,
    #[schema(example = "EMP-001")]
    pub employee_code: String,
    #[schema(example = "John")]
    pub first_name: String,
    #[schema(example = "Doe")]
    pub last_name: String,
    #[schema(example = "john.doe@company.com", format = "email")]
    pub email: String,
    pub phone: Option<String>,
    pub designation: Option<String>,
    pub department_id: Option<u64>,
    pub shift_id: Option<u64>,
    pub location_id: Option<u64>,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub hire_date: NaiveDate,
    pub status: Option<EmployeeStatus>,
    #[schema(value_type = Option<Object>)]
    pub working_hours: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateEmployee {
    pub employee_code: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub designation: Option<String>,
    pub department_id: Option<u64>,
    pub shift_id: Option<u64>,
    pub location_id: Option<u64>,
    #[schema(format = "date", value_type = Option<String>)]
    pub hire_date: Option<NaiveDate>,
    pub status: Option<EmployeeStatus>,
    #[schema(value_type = Option<Object>)]
    pub working_hours: Option<Value>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EmployeeQuery {
    pub department_id: Option<u64>,
    pub shift_id: Option<u64>,
    pub location_id: Option<u64>,
    pub status: Option<EmployeeStatus>,
    /// Matches name, email or employee code
    pub search: Option<String>,
}

/// 409 when another live employee of the organization already uses `value`
/// in `column`.
async fn ensure_unique(
    pool: &MySqlPool,
    organization_id: u64,
    column: &'static str,
    value: &str,
    exclude_id: u64,
) -> ApiResult<()> {
    let filter = Filter::tenant(TenantScope::Organization(organization_id), "")
        .eq(column, value)
        .raw("id <> ?");
    let sql = format!("SELECT COUNT(*) FROM employees{}", filter.where_sql());

    let taken = sqlx::query_scalar::<_, i64>(&sql)
        .bind_values(filter.values())
        .bind(exclude_id)
        .fetch_one(pool)
        .await?;

    if taken > 0 {
        debug!(organization_id, column, value, "Duplicate employee field");
        return Err(ApiError::conflict(format!(
            "An employee with {column} '{value}' already exists"
        )));
    }
    Ok(())
}

async fn ensure_references(
    pool: &MySqlPool,
    org: u64,
    department_id: Option<u64>,
    shift_id: Option<u64>,
    location_id: Option<u64>,
) -> ApiResult<()> {
    ensure_reference(pool, "departments", department_id, org, "department_id").await?;
    ensure_reference(pool, "shifts", shift_id, org, "shift_id").await?;
    ensure_reference(pool, "locations", location_id, org, "location_id").await
}

/// A live employee in the caller's tenant. Attendance, leave and change
/// requests reject unknown employees as bad input rather than 404.
pub(crate) async fn employee_in_scope(
    pool: &MySqlPool,
    id: u64,
    scope: TenantScope,
) -> ApiResult<Employee> {
    fetch_scoped(pool, "employees", EMPLOYEE_COLUMNS, id, scope, "Employee")
        .await
        .map_err(|e| match e {
            ApiError::NotFound(_) => ApiError::validation(format!("employee_id {id} does not exist")),
            other => other,
        })
}

/// Timing of the employee's active shift, if one is assigned.
pub(crate) async fn shift_window(pool: &MySqlPool, employee: &Employee) -> ApiResult<Option<ShiftWindow>> {
    let Some(shift_id) = employee.shift_id else {
        return Ok(None);
    };

    let filter = Filter::tenant(TenantScope::Organization(employee.organization_id), "")
        .eq("id", shift_id)
        .eq("is_active", true);
    let sql = format!("SELECT {SHIFT_COLUMNS} FROM shifts{}", filter.where_sql());

    let shift = sqlx::query_as::<_, Shift>(&sql)
        .bind_values(filter.values())
        .fetch_optional(pool)
        .await?;
    Ok(shift.map(|s| s.window()))
}

#[utoipa::path(
    post,
    path = "/api/v2/employees",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created", body = Employee),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Missing permission or plan employee limit reached"),
        (status = 409, description = "employee_code or email already used")
    ),
    tag = "Employees",
    security(("bearer_auth" = []))
)]
pub async fn create_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateEmployee>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::EMPLOYEES, action::CREATE)?;
    let org = auth.target_org(payload.organization_id)?;

    non_empty("employee_code", &payload.employee_code)?;
    non_empty("first_name", &payload.first_name)?;
    non_empty("last_name", &payload.last_name)?;
    validate_email(&payload.email).map_err(ApiError::validation)?;

    let code = payload.employee_code.trim();
    let email = payload.email.trim().to_lowercase();

    require_capacity(pool.get_ref(), &auth, org, Limit::Employees).await?;
    ensure_references(
        pool.get_ref(),
        org,
        payload.department_id,
        payload.shift_id,
        payload.location_id,
    )
    .await?;
    ensure_unique(pool.get_ref(), org, "employee_code", code, 0).await?;
    ensure_unique(pool.get_ref(), org, "email", &email, 0).await?;

    let status = payload.status.unwrap_or(EmployeeStatus::Active);

    let result = sqlx::query(
        r#"
        INSERT INTO employees
            (organization_id, department_id, shift_id, location_id, employee_code,
             first_name, last_name, email, phone, designation, hire_date, status, working_hours)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(payload.department_id)
    .bind(payload.shift_id)
    .bind(payload.location_id)
    .bind(code)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(&email)
    .bind(payload.phone.as_deref())
    .bind(payload.designation.as_deref())
    .bind(payload.hire_date)
    .bind(status.as_ref())
    .bind(payload.working_hours.clone().map(sqlx::types::Json))
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();
    info!(employee_id = id, organization_id = org, "Employee created");

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::EMPLOYEES,
        Some(id),
        json!({ "employee_code": code }),
    )
    .await;

    let employee: Employee = fetch_scoped(
        pool.get_ref(),
        "employees",
        EMPLOYEE_COLUMNS,
        id,
        TenantScope::All,
        "Employee",
    )
    .await?;
    Ok(response::created("Employee created", employee))
}

#[utoipa::path(
    get,
    path = "/api/v2/employees",
    params(PageQuery, EmployeeQuery),
    responses((status = 200, description = "Paginated employee list", body = [Employee])),
    tag = "Employees",
    security(("bearer_auth" = []))
)]
pub async fn list_employees(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<EmployeeQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::EMPLOYEES, action::READ)?;
    let page = PageParams::from(&*page);

    let filter = Filter::tenant(auth.scope(), "")
        .eq_opt("department_id", query.department_id)
        .eq_opt("shift_id", query.shift_id)
        .eq_opt("location_id", query.location_id)
        .eq_opt("status", query.status.map(|s| s.to_string()))
        .search(
            &["first_name", "last_name", "email", "employee_code"],
            query.search.as_deref(),
        );

    let total = count_rows(pool.get_ref(), "employees", &filter).await?;

    let sql = format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees{} ORDER BY id DESC LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    debug!(sql = %sql, page = page.page, per_page = page.per_page, "Fetching employees");

    let rows = sqlx::query_as::<_, Employee>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Employees retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/employees/{id}",
    params(("id" = u64, Path, description = "Employee id")),
    responses(
        (status = 200, description = "Employee", body = Employee),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employees",
    security(("bearer_auth" = []))
)]
pub async fn get_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    // Anyone may read their own profile.
    if auth.employee_id != Some(id) {
        auth.require(resource::EMPLOYEES, action::READ)?;
    }

    let employee: Employee = fetch_scoped(
        pool.get_ref(),
        "employees",
        EMPLOYEE_COLUMNS,
        id,
        auth.scope(),
        "Employee",
    )
    .await?;
    Ok(response::ok("Employee retrieved", employee))
}

#[utoipa::path(
    put,
    path = "/api/v2/employees/{id}",
    params(("id" = u64, Path, description = "Employee id")),
    request_body = UpdateEmployee,
    responses(
        (status = 200, description = "Employee updated", body = Employee),
        (status = 404, description = "Employee not found"),
        (status = 409, description = "employee_code or email already used")
    ),
    tag = "Employees",
    security(("bearer_auth" = []))
)]
pub async fn update_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateEmployee>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::EMPLOYEES, action::UPDATE)?;
    let id = path.into_inner();

    let current: Employee = fetch_scoped(
        pool.get_ref(),
        "employees",
        EMPLOYEE_COLUMNS,
        id,
        auth.scope(),
        "Employee",
    )
    .await?;
    let org = current.organization_id;

    let code = payload.employee_code.as_deref().map(str::trim);
    let email = payload.email.as_deref().map(|e| e.trim().to_lowercase());

    if let Some(code) = code {
        non_empty("employee_code", code)?;
        ensure_unique(pool.get_ref(), org, "employee_code", code, id).await?;
    }
    if let Some(email) = &email {
        validate_email(email).map_err(ApiError::validation)?;
        ensure_unique(pool.get_ref(), org, "email", email, id).await?;
    }
    for (field, value) in [("first_name", &payload.first_name), ("last_name", &payload.last_name)] {
        if let Some(v) = value {
            non_empty(field, v)?;
        }
    }
    ensure_references(
        pool.get_ref(),
        org,
        payload.department_id,
        payload.shift_id,
        payload.location_id,
    )
    .await?;

    let set = UpdateSet::new()
        .set_opt("employee_code", code)
        .set_opt("first_name", payload.first_name.as_deref().map(str::trim))
        .set_opt("last_name", payload.last_name.as_deref().map(str::trim))
        .set_opt("email", email)
        .set_opt("phone", payload.phone.clone())
        .set_opt("designation", payload.designation.clone())
        .set_opt("department_id", payload.department_id)
        .set_opt("shift_id", payload.shift_id)
        .set_opt("location_id", payload.location_id)
        .set_opt("hire_date", payload.hire_date)
        .set_opt("status", payload.status.map(|s| s.to_string()))
        .set_opt("working_hours", payload.working_hours.clone());

    let update = build_update_sql("employees", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Update,
        resource::EMPLOYEES,
        Some(id),
        json!({ "status": payload.status }),
    )
    .await;

    let employee: Employee = fetch_scoped(
        pool.get_ref(),
        "employees",
        EMPLOYEE_COLUMNS,
        id,
        auth.scope(),
        "Employee",
    )
    .await?;
    Ok(response::ok("Employee updated", employee))
}

#[utoipa::path(
    delete,
    path = "/api/v2/employees/{id}",
    params(("id" = u64, Path, description = "Employee id"), DeleteQuery),
    responses(
        (status = 200, description = "Employee deleted"),
        (status = 404, description = "Employee not found"),
        (status = 409, description = "Hard delete of a record other rows still reference")
    ),
    tag = "Employees",
    security(("bearer_auth" = []))
)]
pub async fn delete_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::EMPLOYEES, action::DELETE)?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    let affected = delete_row(pool.get_ref(), "employees", id, auth.scope(), hard).await?;
    if affected == 0 {
        return Err(ApiError::not_found("Employee"));
    }

    audit::record(
        pool.get_ref(),
        &auth,
        None,
        AuditAction::Delete,
        resource::EMPLOYEES,
        Some(id),
        json!({ "hard": hard }),
    )
    .await;

    Ok(response::message("Employee deleted"))
}
