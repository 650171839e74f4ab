use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{DeleteQuery, count_rows, employee::employee_in_scope, fetch_scoped},
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::leave_request::{
        DateRange, LEAVE_COLUMNS, LeaveRequest, LeaveStatus, LeaveType, MAX_LEAVE_DAYS, OVERLAP_SQL,
    },
    rbac::{TenantScope, action, resource},
    response::{self, PageParams, PageQuery},
    utils::db_utils::{BindValues, Filter, UpdateSet, build_update_sql, delete_row, execute_update},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateLeave {
    /// Another employee's id; HR and managers only
    pub employee_id: Option<u64>,
    #[schema(example = "sick")]
    pub leave_type: LeaveType,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-01-03", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateLeave {
    pub leave_type: Option<LeaveType>,
    #[schema(format = "date", value_type = Option<String>)]
    pub start_date: Option<NaiveDate>,
    #[schema(format = "date", value_type = Option<String>)]
    pub end_date: Option<NaiveDate>,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReviewLeave {
    pub review_notes: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LeaveQuery {
    pub employee_id: Option<u64>,
    pub status: Option<LeaveStatus>,
    pub leave_type: Option<LeaveType>,
    /// Requests ending on or after this date
    #[param(value_type = Option<String>, format = "date")]
    pub start_date: Option<NaiveDate>,
    /// Requests starting on or before this date
    #[param(value_type = Option<String>, format = "date")]
    pub end_date: Option<NaiveDate>,
}

fn checked_range(start: NaiveDate, end: NaiveDate) -> ApiResult<DateRange> {
    let range = DateRange::new(start, end)?;
    if range.days() > MAX_LEAVE_DAYS {
        return Err(ApiError::validation(format!(
            "A leave request may span at most {MAX_LEAVE_DAYS} days"
        )));
    }
    Ok(range)
}

/// 409 when a pending or approved request of the employee intersects
/// `range`. `exclude_id` is the request being edited, 0 on create.
async fn ensure_no_overlap(
    pool: &MySqlPool,
    employee_id: u64,
    range: DateRange,
    exclude_id: u64,
) -> ApiResult<()> {
    let clash = sqlx::query_scalar::<_, u64>(OVERLAP_SQL)
        .bind(employee_id)
        .bind(range.end)
        .bind(range.start)
        .bind(exclude_id)
        .fetch_optional(pool)
        .await?;

    if let Some(other) = clash {
        debug!(employee_id, other, "Overlapping leave request");
        return Err(ApiError::conflict(format!(
            "Leave overlaps existing request {other} for this employee"
        )));
    }
    Ok(())
}

async fn fetch_leave(pool: &MySqlPool, id: u64, scope: TenantScope) -> ApiResult<LeaveRequest> {
    fetch_scoped(pool, "leave_requests", LEAVE_COLUMNS, id, scope, "Leave request").await
}

fn current_status(leave: &LeaveRequest) -> ApiResult<LeaveStatus> {
    leave
        .status
        .parse()
        .map_err(|_| ApiError::Internal(format!("unknown leave status '{}'", leave.status)))
}

/// Moves a request to `next`, guarded on the status it was read with so
/// two reviewers cannot both win.
async fn change_status(
    pool: &MySqlPool,
    auth: &AuthUser,
    leave: &LeaveRequest,
    next: LeaveStatus,
    review_notes: Option<String>,
) -> ApiResult<()> {
    let from = current_status(leave)?;
    from.transition(next)?;

    let result = sqlx::query(
        r#"
        UPDATE leave_requests
        SET status = ?, reviewed_by = ?, reviewed_at = ?, review_notes = COALESCE(?, review_notes)
        WHERE id = ? AND status = ? AND deleted_at IS NULL
        "#,
    )
    .bind(next.as_ref())
    .bind(auth.user_id)
    .bind(Utc::now().naive_utc())
    .bind(review_notes)
    .bind(leave.id)
    .bind(from.as_ref())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Leave request was changed by someone else"));
    }
    info!(leave_id = leave.id, from = %from, to = %next, reviewer = auth.user_id, "Leave status changed");
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/v2/leave-requests",
    request_body = CreateLeave,
    responses(
        (status = 201, description = "Leave request created", body = LeaveRequest),
        (status = 400, description = "start_date after end_date"),
        (status = 409, description = "Overlaps a pending or approved request")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn create_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateLeave>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LEAVE, action::CREATE)?;
    let employee_id = auth.employee_target(payload.employee_id)?;

    let range = checked_range(payload.start_date, payload.end_date)?;
    let employee = employee_in_scope(pool.get_ref(), employee_id, auth.scope()).await?;
    ensure_no_overlap(pool.get_ref(), employee_id, range, 0).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO leave_requests
            (organization_id, employee_id, leave_type, start_date, end_date, total_days, reason, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(employee.organization_id)
    .bind(employee_id)
    .bind(payload.leave_type.as_ref())
    .bind(range.start)
    .bind(range.end)
    .bind(range.days())
    .bind(payload.reason.as_deref())
    .bind(LeaveStatus::Pending.as_ref())
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();

    audit::record(
        pool.get_ref(),
        &auth,
        Some(employee.organization_id),
        AuditAction::Create,
        resource::LEAVE,
        Some(id),
        json!({
            "employee_id": employee_id,
            "leave_type": payload.leave_type,
            "start_date": range.start,
            "end_date": range.end,
        }),
    )
    .await;

    let leave = fetch_leave(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::created("Leave request created", leave))
}

#[utoipa::path(
    get,
    path = "/api/v2/leave-requests",
    params(PageQuery, LeaveQuery),
    responses((status = 200, description = "Paginated leave requests", body = [LeaveRequest])),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn list_leaves(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<LeaveQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LEAVE, action::READ)?;
    let page = PageParams::from(&*page);
    let employee_id = auth.employee_filter(query.employee_id)?;

    let filter = Filter::tenant(auth.scope(), "")
        .eq_opt("employee_id", employee_id)
        .eq_opt("status", query.status.map(|s| s.to_string()))
        .eq_opt("leave_type", query.leave_type.map(|t| t.to_string()))
        .cmp_opt("end_date", ">=", query.start_date)
        .cmp_opt("start_date", "<=", query.end_date);

    let total = count_rows(pool.get_ref(), "leave_requests", &filter).await?;

    let sql = format!(
        "SELECT {LEAVE_COLUMNS} FROM leave_requests{} ORDER BY start_date DESC, id DESC LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, LeaveRequest>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Leave requests retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/leave-requests/{id}",
    params(("id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, description = "Leave request", body = LeaveRequest),
        (status = 404, description = "Leave request not found")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn get_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LEAVE, action::READ)?;
    let leave = fetch_leave(pool.get_ref(), path.into_inner(), auth.scope()).await?;
    if auth.is_self_service() {
        auth.employee_target(Some(leave.employee_id))?;
    }
    Ok(response::ok("Leave request retrieved", leave))
}

#[utoipa::path(
    put,
    path = "/api/v2/leave-requests/{id}",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body = UpdateLeave,
    responses(
        (status = 200, description = "Leave request updated", body = LeaveRequest),
        (status = 404, description = "Leave request not found"),
        (status = 409, description = "Not pending, or overlaps another request")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn update_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateLeave>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LEAVE, action::UPDATE)?;
    let id = path.into_inner();

    let current = fetch_leave(pool.get_ref(), id, auth.scope()).await?;
    if auth.is_self_service() {
        auth.employee_target(Some(current.employee_id))?;
    }
    if current_status(&current)? != LeaveStatus::Pending {
        return Err(ApiError::conflict(format!(
            "Only pending requests can be edited (this one is {})",
            current.status
        )));
    }

    let range = checked_range(
        payload.start_date.unwrap_or(current.start_date),
        payload.end_date.unwrap_or(current.end_date),
    )?;
    let dates_changed = range.start != current.start_date || range.end != current.end_date;
    if dates_changed {
        ensure_no_overlap(pool.get_ref(), current.employee_id, range, id).await?;
    }

    let mut set = UpdateSet::new()
        .set_opt("leave_type", payload.leave_type.map(|t| t.to_string()))
        .set_opt("reason", payload.reason.clone());
    if dates_changed {
        set = set
            .set("start_date", range.start)
            .set("end_date", range.end)
            .set("total_days", range.days());
    }

    let update = build_update_sql("leave_requests", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(current.organization_id),
        AuditAction::Update,
        resource::LEAVE,
        Some(id),
        json!({ "start_date": range.start, "end_date": range.end, "leave_type": payload.leave_type }),
    )
    .await;

    let leave = fetch_leave(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Leave request updated", leave))
}

async fn review(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    id: u64,
    next: LeaveStatus,
    payload: Option<web::Json<ReviewLeave>>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LEAVE, action::APPROVE)?;
    let notes = payload.and_then(|p| p.into_inner().review_notes);

    let leave = fetch_leave(pool.get_ref(), id, auth.scope()).await?;
    if !auth.is_super_admin() && auth.employee_id == Some(leave.employee_id) {
        return Err(ApiError::forbidden("You cannot review your own leave request"));
    }

    change_status(pool.get_ref(), &auth, &leave, next, notes.clone()).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(leave.organization_id),
        match next {
            LeaveStatus::Approved => AuditAction::Approve,
            _ => AuditAction::Reject,
        },
        resource::LEAVE,
        Some(id),
        json!({ "employee_id": leave.employee_id, "review_notes": notes }),
    )
    .await;

    let leave = fetch_leave(pool.get_ref(), id, auth.scope()).await?;
    let message = match next {
        LeaveStatus::Approved => "Leave request approved",
        _ => "Leave request rejected",
    };
    Ok(response::ok(message, leave))
}

#[utoipa::path(
    put,
    path = "/api/v2/leave-requests/{id}/approve",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body = ReviewLeave,
    responses(
        (status = 200, description = "Leave request approved", body = LeaveRequest),
        (status = 403, description = "Missing leave:approve"),
        (status = 409, description = "Request is not pending")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn approve_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: Option<web::Json<ReviewLeave>>,
) -> ApiResult<HttpResponse> {
    review(auth, pool, path.into_inner(), LeaveStatus::Approved, payload).await
}

#[utoipa::path(
    put,
    path = "/api/v2/leave-requests/{id}/reject",
    params(("id" = u64, Path, description = "Leave request id")),
    request_body = ReviewLeave,
    responses(
        (status = 200, description = "Leave request rejected", body = LeaveRequest),
        (status = 403, description = "Missing leave:approve"),
        (status = 409, description = "Request is not pending")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn reject_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: Option<web::Json<ReviewLeave>>,
) -> ApiResult<HttpResponse> {
    review(auth, pool, path.into_inner(), LeaveStatus::Rejected, payload).await
}

/// The requesting employee or anyone holding `leave:approve` may cancel a
/// pending or approved request.
#[utoipa::path(
    put,
    path = "/api/v2/leave-requests/{id}/cancel",
    params(("id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, description = "Leave request cancelled", body = LeaveRequest),
        (status = 409, description = "Request already rejected or cancelled")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn cancel_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LEAVE, action::UPDATE)?;
    let id = path.into_inner();

    let leave = fetch_leave(pool.get_ref(), id, auth.scope()).await?;
    let is_owner = auth.employee_id == Some(leave.employee_id);
    if !is_owner {
        auth.require(resource::LEAVE, action::APPROVE)?;
    }

    change_status(pool.get_ref(), &auth, &leave, LeaveStatus::Cancelled, None).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(leave.organization_id),
        AuditAction::Cancel,
        resource::LEAVE,
        Some(id),
        json!({ "employee_id": leave.employee_id, "previous_status": leave.status }),
    )
    .await;

    let leave = fetch_leave(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Leave request cancelled", leave))
}

#[utoipa::path(
    delete,
    path = "/api/v2/leave-requests/{id}",
    params(("id" = u64, Path, description = "Leave request id"), DeleteQuery),
    responses(
        (status = 200, description = "Leave request deleted"),
        (status = 404, description = "Leave request not found")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn delete_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LEAVE, action::DELETE)?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    if delete_row(pool.get_ref(), "leave_requests", id, auth.scope(), hard).await? == 0 {
        return Err(ApiError::not_found("Leave request"));
    }

    audit::record(
        pool.get_ref(),
        &auth,
        None,
        AuditAction::Delete,
        resource::LEAVE,
        Some(id),
        json!({ "hard": hard }),
    )
    .await;

    Ok(response::message("Leave request deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn range_longer_than_a_year_is_rejected() {
        assert!(checked_range(d("2026-01-01"), d("2026-12-31")).is_ok());
        assert!(matches!(
            checked_range(d("2026-01-01"), d("2027-01-01")),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn reversed_range_is_a_validation_error() {
        assert!(matches!(
            checked_range(d("2026-03-02"), d("2026-03-01")),
            Err(ApiError::Validation(_))
        ));
    }
}
