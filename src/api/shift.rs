use actix_web::{HttpResponse, web};
use chrono::NaiveTime;
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{DeleteQuery, count_rows, fetch_scoped, non_empty},
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::shift::{SHIFT_COLUMNS, Shift, validate_grace, validate_working_days},
    rbac::{TenantScope, action, resource},
    response::{self, PageParams, PageQuery},
    utils::db_utils::{BindValues, Filter, UpdateSet, build_update_sql, delete_row, execute_update},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateShift {
    pub organization_id: Option<u64>,
    #[schema(example = "Night")]
    pub name: String,
    #[schema(value_type = String, example = "22:00:00")]
    pub start_time: NaiveTime,
    /// Earlier than `start_time` for shifts crossing midnight
    #[schema(value_type = String, example = "06:00:00")]
    pub end_time: NaiveTime,
    #[schema(example = 10)]
    pub grace_minutes: Option<i32>,
    /// ISO weekdays, Monday = 1; defaults to Monday-Friday
    #[schema(example = json!([1, 2, 3, 4, 5]))]
    pub working_days: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateShift {
    pub name: Option<String>,
    #[schema(value_type = Option<String>)]
    pub start_time: Option<NaiveTime>,
    #[schema(value_type = Option<String>)]
    pub end_time: Option<NaiveTime>,
    pub grace_minutes: Option<i32>,
    pub working_days: Option<Vec<u8>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ShiftQuery {
    pub is_active: Option<bool>,
    pub search: Option<String>,
}

fn check_times(start: NaiveTime, end: NaiveTime) -> ApiResult<()> {
    if start == end {
        return Err(ApiError::validation("start_time and end_time must differ"));
    }
    Ok(())
}

fn normalized_days(days: &[u8]) -> ApiResult<Vec<u8>> {
    validate_working_days(days).map_err(ApiError::validation)?;
    let mut days = days.to_vec();
    days.sort_unstable();
    days.dedup();
    Ok(days)
}

#[utoipa::path(
    get,
    path = "/api/v2/shifts",
    params(PageQuery, ShiftQuery),
    responses((status = 200, description = "Paginated shift list", body = [Shift])),
    tag = "Shifts",
    security(("bearer_auth" = []))
)]
pub async fn list_shifts(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<ShiftQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::SHIFTS, action::READ)?;
    let page = PageParams::from(&*page);

    let filter = Filter::tenant(auth.scope(), "")
        .eq_opt("is_active", query.is_active)
        .search(&["name"], query.search.as_deref());

    let total = count_rows(pool.get_ref(), "shifts", &filter).await?;

    let sql = format!(
        "SELECT {SHIFT_COLUMNS} FROM shifts{} ORDER BY start_time LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, Shift>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Shifts retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/shifts/{id}",
    params(("id" = u64, Path, description = "Shift id")),
    responses(
        (status = 200, description = "Shift", body = Shift),
        (status = 404, description = "Shift not found")
    ),
    tag = "Shifts",
    security(("bearer_auth" = []))
)]
pub async fn get_shift(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::SHIFTS, action::READ)?;
    let shift: Shift = fetch_scoped(
        pool.get_ref(),
        "shifts",
        SHIFT_COLUMNS,
        path.into_inner(),
        auth.scope(),
        "Shift",
    )
    .await?;
    Ok(response::ok("Shift retrieved", shift))
}

#[utoipa::path(
    post,
    path = "/api/v2/shifts",
    request_body = CreateShift,
    responses(
        (status = 201, description = "Shift created", body = Shift),
        (status = 400, description = "Invalid times, grace or working days")
    ),
    tag = "Shifts",
    security(("bearer_auth" = []))
)]
pub async fn create_shift(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateShift>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::SHIFTS, action::CREATE)?;
    let org = auth.target_org(payload.organization_id)?;

    non_empty("name", &payload.name)?;
    check_times(payload.start_time, payload.end_time)?;
    let grace = payload.grace_minutes.unwrap_or(0);
    validate_grace(grace).map_err(ApiError::validation)?;
    let days = normalized_days(payload.working_days.as_deref().unwrap_or(&[1, 2, 3, 4, 5]))?;

    let result = sqlx::query(
        r#"
        INSERT INTO shifts (organization_id, name, start_time, end_time, grace_minutes, working_days)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(payload.name.trim())
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(grace)
    .bind(sqlx::types::Json(days))
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::SHIFTS,
        Some(id),
        json!({ "name": payload.name.trim() }),
    )
    .await;

    let shift: Shift =
        fetch_scoped(pool.get_ref(), "shifts", SHIFT_COLUMNS, id, TenantScope::All, "Shift").await?;
    Ok(response::created("Shift created", shift))
}

#[utoipa::path(
    put,
    path = "/api/v2/shifts/{id}",
    params(("id" = u64, Path, description = "Shift id")),
    request_body = UpdateShift,
    responses(
        (status = 200, description = "Shift updated", body = Shift),
        (status = 404, description = "Shift not found")
    ),
    tag = "Shifts",
    security(("bearer_auth" = []))
)]
pub async fn update_shift(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateShift>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::SHIFTS, action::UPDATE)?;
    let id = path.into_inner();

    let current: Shift =
        fetch_scoped(pool.get_ref(), "shifts", SHIFT_COLUMNS, id, auth.scope(), "Shift").await?;

    if let Some(name) = &payload.name {
        non_empty("name", name)?;
    }
    check_times(
        payload.start_time.unwrap_or(current.start_time),
        payload.end_time.unwrap_or(current.end_time),
    )?;
    if let Some(grace) = payload.grace_minutes {
        validate_grace(grace).map_err(ApiError::validation)?;
    }
    let days = match &payload.working_days {
        Some(d) => Some(normalized_days(d)?),
        None => None,
    };

    let set = UpdateSet::new()
        .set_opt("name", payload.name.as_deref().map(str::trim))
        .set_opt("start_time", payload.start_time)
        .set_opt("end_time", payload.end_time)
        .set_opt("grace_minutes", payload.grace_minutes)
        .set_opt("working_days", days.map(|d| json!(d)))
        .set_opt("is_active", payload.is_active);

    let update = build_update_sql("shifts", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(current.organization_id),
        AuditAction::Update,
        resource::SHIFTS,
        Some(id),
        json!({ "name": payload.name, "is_active": payload.is_active }),
    )
    .await;

    let shift: Shift =
        fetch_scoped(pool.get_ref(), "shifts", SHIFT_COLUMNS, id, auth.scope(), "Shift").await?;
    Ok(response::ok("Shift updated", shift))
}

#[utoipa::path(
    delete,
    path = "/api/v2/shifts/{id}",
    params(("id" = u64, Path, description = "Shift id"), DeleteQuery),
    responses(
        (status = 200, description = "Shift deleted"),
        (status = 404, description = "Shift not found")
    ),
    tag = "Shifts",
    security(("bearer_auth" = []))
)]
pub async fn delete_shift(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::SHIFTS, action::DELETE)?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    if delete_row(pool.get_ref(), "shifts", id, auth.scope(), hard).await? == 0 {
        return Err(ApiError::not_found("Shift"));
    }

    audit::record(
        pool.get_ref(),
        &auth,
        None,
        AuditAction::Delete,
        resource::SHIFTS,
        Some(id),
        json!({ "hard": hard }),
    )
    .await;

    Ok(response::message("Shift deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_days_are_sorted_and_deduplicated() {
        assert_eq!(normalized_days(&[5, 1, 3, 1]).unwrap(), vec![1, 3, 5]);
        assert!(normalized_days(&[8]).is_err());
    }

    #[test]
    fn zero_length_shift_is_rejected() {
        let t = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert!(check_times(t, t).is_err());
    }
}
