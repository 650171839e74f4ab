use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::{MySqlPool, types::Json};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{count_rows, employee::employee_in_scope, fetch_scoped, non_empty, require_feature},
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::{
        attendance::{ATTENDANCE_COLUMNS, AttendanceRecord, CheckInMethod},
        change_request::{
            AttendanceDraft, CHANGE_REQUEST_COLUMNS, ChangeRequest, ChangeRequestStatus,
            ProposedChanges, apply_changes,
        },
    },
    rbac::{TenantScope, action, resource},
    response::{self, PageParams, PageQuery},
    subscription::Feature,
    utils::db_utils::{BindValues, Filter},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateChangeRequest {
    /// Another employee's id; manager level and above only
    pub employee_id: Option<u64>,
    #[schema(value_type = String, format = "date", example = "2026-01-05")]
    pub date: NaiveDate,
    pub requested_changes: ProposedChanges,
    #[schema(example = "Badge reader was down at the main gate")]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReviewChangeRequest {
    pub review_notes: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChangeRequestQuery {
    pub employee_id: Option<u64>,
    pub status: Option<ChangeRequestStatus>,
    #[param(value_type = Option<String>, format = "date")]
    pub start_date: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub end_date: Option<NaiveDate>,
}

async fn fetch_change_request(
    pool: &MySqlPool,
    id: u64,
    scope: TenantScope,
) -> ApiResult<ChangeRequest> {
    fetch_scoped(
        pool,
        "attendance_change_requests",
        CHANGE_REQUEST_COLUMNS,
        id,
        scope,
        "Change request",
    )
    .await
}

fn ensure_pending(request: &ChangeRequest) -> ApiResult<()> {
    if request.status == ChangeRequestStatus::Pending.as_ref() {
        Ok(())
    } else {
        Err(ApiError::conflict(format!(
            "Change request is already {}",
            request.status
        )))
    }
}

fn ensure_not_own(auth: &AuthUser, request: &ChangeRequest) -> ApiResult<()> {
    if !auth.is_super_admin() && auth.employee_id == Some(request.employee_id) {
        return Err(ApiError::forbidden("You cannot review your own change request"));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/v2/attendance/change-requests",
    request_body = CreateChangeRequest,
    responses(
        (status = 201, description = "Change request submitted", body = ChangeRequest),
        (status = 400, description = "Empty or inconsistent changes, or date in the future"),
        (status = 409, description = "A pending request for that day already exists")
    ),
    tag = "Attendance change requests",
    security(("bearer_auth" = []))
)]
pub async fn create_change_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateChangeRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::CHANGE_REQUESTS, action::CREATE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::ChangeRequests).await?;
    let employee_id = auth.employee_target(payload.employee_id)?;

    non_empty("reason", &payload.reason)?;
    if payload.date > Utc::now().date_naive() {
        return Err(ApiError::validation("Cannot request changes for a future date"));
    }
    payload.requested_changes.validate(payload.date)?;

    let employee = employee_in_scope(pool.get_ref(), employee_id, auth.scope()).await?;
    let org = employee.organization_id;

    let pending = count_rows(
        pool.get_ref(),
        "attendance_change_requests",
        &Filter::tenant(TenantScope::Organization(org), "")
            .eq("employee_id", employee_id)
            .eq("date", payload.date)
            .eq("status", ChangeRequestStatus::Pending.as_ref()),
    )
    .await?;
    if pending > 0 {
        return Err(ApiError::conflict(format!(
            "A pending change request for {} already exists",
            payload.date
        )));
    }

    let attendance_id = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM attendance_records WHERE employee_id = ? AND date = ? AND deleted_at IS NULL",
    )
    .bind(employee_id)
    .bind(payload.date)
    .fetch_optional(pool.get_ref())
    .await?;

    let result = sqlx::query(
        r#"
        INSERT INTO attendance_change_requests
            (organization_id, employee_id, attendance_id, date, requested_changes, reason, status)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(employee_id)
    .bind(attendance_id)
    .bind(payload.date)
    .bind(Json(payload.requested_changes.clone()))
    .bind(payload.reason.trim())
    .bind(ChangeRequestStatus::Pending.as_ref())
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::CHANGE_REQUESTS,
        Some(id),
        json!({ "employee_id": employee_id, "date": payload.date }),
    )
    .await;

    let request = fetch_change_request(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::created("Change request submitted", request))
}

#[utoipa::path(
    get,
    path = "/api/v2/attendance/change-requests",
    params(PageQuery, ChangeRequestQuery),
    responses((status = 200, description = "Paginated change requests", body = [ChangeRequest])),
    tag = "Attendance change requests",
    security(("bearer_auth" = []))
)]
pub async fn list_change_requests(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<ChangeRequestQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::CHANGE_REQUESTS, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::ChangeRequests).await?;
    let page = PageParams::from(&*page);
    let employee_id = auth.employee_filter(query.employee_id)?;

    let filter = Filter::tenant(auth.scope(), "")
        .eq_opt("employee_id", employee_id)
        .eq_opt("status", query.status.map(|s| s.to_string()))
        .cmp_opt("date", ">=", query.start_date)
        .cmp_opt("date", "<=", query.end_date);

    let total = count_rows(pool.get_ref(), "attendance_change_requests", &filter).await?;

    let sql = format!(
        "SELECT {CHANGE_REQUEST_COLUMNS} FROM attendance_change_requests{} ORDER BY id DESC LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, ChangeRequest>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Change requests retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/attendance/change-requests/{id}",
    params(("id" = u64, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Change request", body = ChangeRequest),
        (status = 404, description = "Change request not found")
    ),
    tag = "Attendance change requests",
    security(("bearer_auth" = []))
)]
pub async fn get_change_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::CHANGE_REQUESTS, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::ChangeRequests).await?;

    let request = fetch_change_request(pool.get_ref(), path.into_inner(), auth.scope()).await?;
    if auth.is_self_service() {
        auth.employee_target(Some(request.employee_id))?;
    }
    Ok(response::ok("Change request retrieved", request))
}

/// Applies the proposed fields to the employee's record for that day,
/// creating the record when there is none, and closes the request. Both
/// writes commit together.
#[utoipa::path(
    put,
    path = "/api/v2/attendance/change-requests/{id}/approve",
    params(("id" = u64, Path, description = "Change request id")),
    request_body = ReviewChangeRequest,
    responses(
        (status = 200, description = "Change request approved and applied", body = ChangeRequest),
        (status = 403, description = "Missing change_requests:approve"),
        (status = 409, description = "Change request is not pending")
    ),
    tag = "Attendance change requests",
    security(("bearer_auth" = []))
)]
pub async fn approve_change_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: Option<web::Json<ReviewChangeRequest>>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::CHANGE_REQUESTS, action::APPROVE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::ChangeRequests).await?;
    let id = path.into_inner();
    let notes = payload.and_then(|p| p.into_inner().review_notes);

    let request = fetch_change_request(pool.get_ref(), id, auth.scope()).await?;
    ensure_not_own(&auth, &request)?;
    ensure_pending(&request)?;

    let mut tx = pool.begin().await?;

    // Re-read under lock; a concurrent reviewer may have closed it.
    let status = sqlx::query_scalar::<_, String>(
        "SELECT status FROM attendance_change_requests WHERE id = ? FOR UPDATE",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    if status != ChangeRequestStatus::Pending.as_ref() {
        return Err(ApiError::conflict(format!("Change request is already {status}")));
    }

    let existing = sqlx::query_as::<_, AttendanceRecord>(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance_records \
         WHERE employee_id = ? AND date = ? AND deleted_at IS NULL FOR UPDATE"
    ))
    .bind(request.employee_id)
    .bind(request.date)
    .fetch_optional(&mut *tx)
    .await?;

    let draft = apply_changes(
        existing.as_ref().map(AttendanceDraft::from),
        &request.requested_changes.0,
    )?;

    let attendance_id = match &existing {
        Some(record) => {
            sqlx::query(
                r#"
                UPDATE attendance_records
                SET check_in_time = ?, check_out_time = ?, status = ?, work_hours = ?, notes = ?, approved_by = ?
                WHERE id = ?
                "#,
            )
            .bind(draft.check_in_time)
            .bind(draft.check_out_time)
            .bind(draft.status.as_ref())
            .bind(draft.work_hours)
            .bind(draft.notes.as_deref())
            .bind(auth.user_id)
            .bind(record.id)
            .execute(&mut *tx)
            .await?;
            record.id
        }
        None => sqlx::query(
            r#"
            INSERT INTO attendance_records
                (organization_id, employee_id, date, check_in_time, check_out_time, status, work_hours,
                 check_in_method, notes, approved_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.organization_id)
        .bind(request.employee_id)
        .bind(request.date)
        .bind(draft.check_in_time)
        .bind(draft.check_out_time)
        .bind(draft.status.as_ref())
        .bind(draft.work_hours)
        .bind(CheckInMethod::Manual.as_ref())
        .bind(draft.notes.as_deref())
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await?
        .last_insert_id(),
    };

    sqlx::query(
        r#"
        UPDATE attendance_change_requests
        SET status = ?, attendance_id = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ?
        WHERE id = ?
        "#,
    )
    .bind(ChangeRequestStatus::Approved.as_ref())
    .bind(attendance_id)
    .bind(auth.user_id)
    .bind(Utc::now().naive_utc())
    .bind(notes.as_deref())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(
        change_request_id = id,
        attendance_id,
        created = existing.is_none(),
        "Change request applied"
    );

    audit::record(
        pool.get_ref(),
        &auth,
        Some(request.organization_id),
        AuditAction::Approve,
        resource::CHANGE_REQUESTS,
        Some(id),
        json!({
            "attendance_id": attendance_id,
            "status": draft.status,
            "work_hours": draft.work_hours,
        }),
    )
    .await;

    let request = fetch_change_request(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Change request approved", request))
}

#[utoipa::path(
    put,
    path = "/api/v2/attendance/change-requests/{id}/reject",
    params(("id" = u64, Path, description = "Change request id")),
    request_body = ReviewChangeRequest,
    responses(
        (status = 200, description = "Change request rejected", body = ChangeRequest),
        (status = 409, description = "Change request is not pending")
    ),
    tag = "Attendance change requests",
    security(("bearer_auth" = []))
)]
pub async fn reject_change_request(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: Option<web::Json<ReviewChangeRequest>>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::CHANGE_REQUESTS, action::APPROVE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::ChangeRequests).await?;
    let id = path.into_inner();
    let notes = payload.and_then(|p| p.into_inner().review_notes);

    let request = fetch_change_request(pool.get_ref(), id, auth.scope()).await?;
    ensure_not_own(&auth, &request)?;
    ensure_pending(&request)?;

    let result = sqlx::query(
        r#"
        UPDATE attendance_change_requests
        SET status = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(ChangeRequestStatus::Rejected.as_ref())
    .bind(auth.user_id)
    .bind(Utc::now().naive_utc())
    .bind(notes.as_deref())
    .bind(id)
    .bind(ChangeRequestStatus::Pending.as_ref())
    .execute(pool.get_ref())
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Change request was processed by someone else"));
    }

    audit::record(
        pool.get_ref(),
        &auth,
        Some(request.organization_id),
        AuditAction::Reject,
        resource::CHANGE_REQUESTS,
        Some(id),
        json!({ "review_notes": notes }),
    )
    .await;

    let request = fetch_change_request(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Change request rejected", request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::tests::user;
    use crate::rbac::SystemRole;

    fn request(status: &str, employee_id: u64) -> ChangeRequest {
        ChangeRequest {
            id: 1,
            organization_id: 1,
            employee_id,
            attendance_id: None,
            date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            requested_changes: Json(ProposedChanges::default()),
            reason: "forgot badge".into(),
            status: status.into(),
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn only_pending_requests_can_be_processed() {
        assert!(ensure_pending(&request("pending", 3)).is_ok());
        assert!(matches!(
            ensure_pending(&request("approved", 3)),
            Err(ApiError::Conflict(_))
        ));
        assert!(ensure_pending(&request("rejected", 3)).is_err());
    }

    #[test]
    fn reviewers_cannot_process_their_own_request() {
        let hr = user(SystemRole::HrManager, Some(1), Some(3));
        assert!(matches!(
            ensure_not_own(&hr, &request("pending", 3)),
            Err(ApiError::Forbidden(_))
        ));
        assert!(ensure_not_own(&hr, &request("pending", 4)).is_ok());
    }
}
