use actix_web::{HttpResponse, web};
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{
        DeleteQuery, count_rows, ensure_reference,
        employee::{employee_in_scope, shift_window},
        fetch_scoped, require_feature,
    },
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::{
        attendance::{
            ATTENDANCE_COLUMNS, AttendanceRecord, AttendanceStatus, CheckInMethod, arrival_status,
            departure_status, work_hours,
        },
        change_request::{AttendanceDraft, ProposedChanges, apply_changes},
        employee::{Employee, EmployeeStatus},
    },
    rbac::{SELF_SERVICE_BELOW, TenantScope, action, resource},
    response::{self, PageParams, PageQuery},
    subscription::Feature,
    utils::db_utils::{BindValues, Filter, UpdateSet, build_update_sql, delete_row, execute_update},
};

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CheckIn {
    /// Someone else's employee id; manager level and above only
    pub employee_id: Option<u64>,
    pub method: Option<CheckInMethod>,
    pub camera_id: Option<u64>,
    pub location_id: Option<u64>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CheckOut {
    pub employee_id: Option<u64>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAttendance {
    pub employee_id: u64,
    #[schema(value_type = String, format = "date", example = "2026-01-05")]
    pub date: NaiveDate,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub status: Option<AttendanceStatus>,
    pub location_id: Option<u64>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateAttendance {
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub status: Option<AttendanceStatus>,
    pub location_id: Option<u64>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AttendanceQuery {
    pub employee_id: Option<u64>,
    pub department_id: Option<u64>,
    pub status: Option<AttendanceStatus>,
    #[param(value_type = Option<String>, format = "date")]
    pub start_date: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub end_date: Option<NaiveDate>,
}

fn ensure_employable(employee: &Employee) -> ApiResult<()> {
    match employee.status.parse::<EmployeeStatus>() {
        Ok(EmployeeStatus::Inactive | EmployeeStatus::Terminated) => Err(ApiError::validation(
            format!("Employee {} is {}", employee.id, employee.status),
        )),
        _ => Ok(()),
    }
}

async fn record_for_day(
    pool: &MySqlPool,
    employee_id: u64,
    date: NaiveDate,
) -> ApiResult<Option<AttendanceRecord>> {
    let filter = Filter::new()
        .raw("deleted_at IS NULL")
        .eq("employee_id", employee_id)
        .eq("date", date);
    let sql = format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance_records{}", filter.where_sql());

    let record = sqlx::query_as::<_, AttendanceRecord>(&sql)
        .bind_values(filter.values())
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

/// One record per employee and day.
async fn ensure_no_record(pool: &MySqlPool, employee_id: u64, date: NaiveDate) -> ApiResult<()> {
    if record_for_day(pool, employee_id, date).await?.is_some() {
        return Err(ApiError::conflict(format!(
            "Attendance for employee {employee_id} on {date} already exists"
        )));
    }
    Ok(())
}

/// The record a check-out closes. Yesterday's record only counts while it is
/// still open.
fn record_to_close(
    today: Option<AttendanceRecord>,
    yesterday: Option<AttendanceRecord>,
) -> ApiResult<AttendanceRecord> {
    match (today, yesterday) {
        (Some(r), _) if r.check_out_time.is_none() => Ok(r),
        (Some(_), _) => Err(ApiError::conflict("Already checked out today")),
        (None, Some(r)) if r.check_out_time.is_none() => Ok(r),
        (None, _) => Err(ApiError::validation("No open check-in found for today")),
    }
}

async fn fetch_record(pool: &MySqlPool, id: u64, scope: TenantScope) -> ApiResult<AttendanceRecord> {
    fetch_scoped(pool, "attendance_records", ATTENDANCE_COLUMNS, id, scope, "Attendance record").await
}

#[utoipa::path(
    post,
    path = "/api/v2/attendance/check-in",
    request_body = CheckIn,
    responses(
        (status = 201, description = "Checked in", body = AttendanceRecord),
        (status = 403, description = "Missing permission, not your record, or face check-in not on plan"),
        (status = 409, description = "Already checked in today")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn check_in(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: Option<web::Json<CheckIn>>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ATTENDANCE, action::CREATE)?;
    let payload = payload.map(web::Json::into_inner).unwrap_or_default();

    if payload.employee_id.is_some() && payload.employee_id != auth.employee_id {
        auth.require_level(SELF_SERVICE_BELOW)?;
    }
    let employee_id = auth.employee_target(payload.employee_id)?;
    let method = payload.method.unwrap_or_default();

    let employee = employee_in_scope(pool.get_ref(), employee_id, auth.scope()).await?;
    ensure_employable(&employee)?;
    let org = employee.organization_id;

    if method == CheckInMethod::Face {
        require_feature(pool.get_ref(), &auth, Some(org), Feature::FaceCheckIn).await?;
    }
    ensure_reference(pool.get_ref(), "cameras", payload.camera_id, org, "camera_id").await?;
    ensure_reference(pool.get_ref(), "locations", payload.location_id, org, "location_id").await?;

    let now = Utc::now().naive_utc();
    let date = now.date();
    ensure_no_record(pool.get_ref(), employee_id, date).await?;

    let shift = shift_window(pool.get_ref(), &employee).await?;
    let status = arrival_status(now, shift.as_ref());

    let result = sqlx::query(
        r#"
        INSERT INTO attendance_records
            (organization_id, employee_id, date, check_in_time, status, check_in_method, camera_id, location_id, notes)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(employee_id)
    .bind(date)
    .bind(now)
    .bind(status.as_ref())
    .bind(method.as_ref())
    .bind(payload.camera_id)
    .bind(payload.location_id)
    .bind(payload.notes.as_deref())
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();
    info!(employee_id, attendance_id = id, status = %status, "Checked in");

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::CheckIn,
        resource::ATTENDANCE,
        Some(id),
        json!({ "employee_id": employee_id, "method": method, "status": status }),
    )
    .await;

    let record = fetch_record(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::created("Checked in successfully", record))
}

#[utoipa::path(
    post,
    path = "/api/v2/attendance/check-out",
    request_body = CheckOut,
    responses(
        (status = 200, description = "Checked out", body = AttendanceRecord),
        (status = 400, description = "No open check-in found for today")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn check_out(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: Option<web::Json<CheckOut>>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ATTENDANCE, action::CREATE)?;
    let payload = payload.map(web::Json::into_inner).unwrap_or_default();

    if payload.employee_id.is_some() && payload.employee_id != auth.employee_id {
        auth.require_level(SELF_SERVICE_BELOW)?;
    }
    let employee_id = auth.employee_target(payload.employee_id)?;
    let employee = employee_in_scope(pool.get_ref(), employee_id, auth.scope()).await?;
    let shift = shift_window(pool.get_ref(), &employee).await?;

    let now = Utc::now().naive_utc();
    let today = now.date();

    // Overnight shifts close yesterday's record after midnight.
    let todays = record_for_day(pool.get_ref(), employee_id, today).await?;
    let overnight = if todays.is_none() && shift.as_ref().is_some_and(|s| s.end < s.start) {
        record_for_day(pool.get_ref(), employee_id, today - Duration::days(1)).await?
    } else {
        None
    };
    let record = record_to_close(todays, overnight)?;
    let check_in = record
        .check_in_time
        .ok_or_else(|| ApiError::validation("Attendance record has no check-in time"))?;

    let hours = work_hours(check_in, now).map_err(ApiError::validation)?;
    let current = record.status.parse().unwrap_or(AttendanceStatus::Present);
    let status = departure_status(current, hours, shift.as_ref());

    let set = UpdateSet::new()
        .set("check_out_time", now)
        .set("work_hours", hours)
        .set("status", status.as_ref())
        .set_opt("notes", payload.notes);
    let update = build_update_sql("attendance_records", set, record.id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    info!(employee_id, attendance_id = record.id, hours, "Checked out");

    audit::record(
        pool.get_ref(),
        &auth,
        Some(record.organization_id),
        AuditAction::CheckOut,
        resource::ATTENDANCE,
        Some(record.id),
        json!({ "employee_id": employee_id, "work_hours": hours, "status": status }),
    )
    .await;

    let record = fetch_record(pool.get_ref(), record.id, auth.scope()).await?;
    Ok(response::ok("Checked out successfully", record))
}

#[utoipa::path(
    get,
    path = "/api/v2/attendance",
    params(PageQuery, AttendanceQuery),
    responses(
        (status = 200, description = "Paginated attendance records", body = [AttendanceRecord]),
        (status = 400, description = "start_date after end_date")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn list_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<AttendanceQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ATTENDANCE, action::READ)?;
    let page = PageParams::from(&*page);

    if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
        if start > end {
            return Err(ApiError::validation("start_date must not be after end_date"));
        }
    }
    let employee_id = auth.employee_filter(query.employee_id)?;

    let mut filter = Filter::tenant(auth.scope(), "")
        .eq_opt("employee_id", employee_id)
        .eq_opt("status", query.status.map(|s| s.to_string()))
        .cmp_opt("date", ">=", query.start_date)
        .cmp_opt("date", "<=", query.end_date);
    if let Some(department_id) = query.department_id {
        filter = filter.clause(
            "employee_id IN (SELECT id FROM employees WHERE department_id = ?)",
            vec![department_id.into()],
        );
    }

    let total = count_rows(pool.get_ref(), "attendance_records", &filter).await?;

    let sql = format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance_records{} ORDER BY date DESC, id DESC LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, AttendanceRecord>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Attendance records retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/attendance/{id}",
    params(("id" = u64, Path, description = "Attendance record id")),
    responses(
        (status = 200, description = "Attendance record", body = AttendanceRecord),
        (status = 404, description = "Attendance record not found")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn get_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ATTENDANCE, action::READ)?;
    let record = fetch_record(pool.get_ref(), path.into_inner(), auth.scope()).await?;
    if auth.is_self_service() {
        auth.employee_target(Some(record.employee_id))?;
    }
    Ok(response::ok("Attendance record retrieved", record))
}

/// Manual entry for a past or missed day.
#[utoipa::path(
    post,
    path = "/api/v2/attendance",
    request_body = CreateAttendance,
    responses(
        (status = 201, description = "Attendance record created", body = AttendanceRecord),
        (status = 403, description = "Manager level required"),
        (status = 409, description = "Record for that day already exists")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn create_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateAttendance>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ATTENDANCE, action::CREATE)?;
    auth.require_level(SELF_SERVICE_BELOW)?;

    let employee = employee_in_scope(pool.get_ref(), payload.employee_id, auth.scope()).await?;
    let org = employee.organization_id;
    ensure_reference(pool.get_ref(), "locations", payload.location_id, org, "location_id").await?;

    let changes = ProposedChanges {
        check_in_time: payload.check_in_time,
        check_out_time: payload.check_out_time,
        status: payload.status,
        notes: payload.notes.clone(),
    };
    if !changes.is_empty() {
        changes.validate(payload.date)?;
    }
    let mut draft = apply_changes(None, &changes)?;
    if payload.status.is_none() {
        let shift = shift_window(pool.get_ref(), &employee).await?;
        draft.status = match draft.check_in_time {
            Some(t) => arrival_status(t, shift.as_ref()),
            None => AttendanceStatus::Absent,
        };
    }

    ensure_no_record(pool.get_ref(), employee.id, payload.date).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO attendance_records
            (organization_id, employee_id, date, check_in_time, check_out_time, status, work_hours,
             check_in_method, location_id, notes, approved_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(employee.id)
    .bind(payload.date)
    .bind(draft.check_in_time)
    .bind(draft.check_out_time)
    .bind(draft.status.as_ref())
    .bind(draft.work_hours)
    .bind(CheckInMethod::Manual.as_ref())
    .bind(payload.location_id)
    .bind(draft.notes.as_deref())
    .bind(auth.user_id)
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::ATTENDANCE,
        Some(id),
        json!({ "employee_id": employee.id, "date": payload.date, "status": draft.status }),
    )
    .await;

    let record = fetch_record(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::created("Attendance record created", record))
}

#[utoipa::path(
    put,
    path = "/api/v2/attendance/{id}",
    params(("id" = u64, Path, description = "Attendance record id")),
    request_body = UpdateAttendance,
    responses(
        (status = 200, description = "Attendance record updated", body = AttendanceRecord),
        (status = 400, description = "check_out_time not after check_in_time"),
        (status = 404, description = "Attendance record not found")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn update_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateAttendance>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ATTENDANCE, action::UPDATE)?;
    let id = path.into_inner();

    let current = fetch_record(pool.get_ref(), id, auth.scope()).await?;
    if auth.is_self_service() {
        auth.employee_target(Some(current.employee_id))?;
    }
    ensure_reference(
        pool.get_ref(),
        "locations",
        payload.location_id,
        current.organization_id,
        "location_id",
    )
    .await?;

    let changes = ProposedChanges {
        check_in_time: payload.check_in_time,
        check_out_time: payload.check_out_time,
        status: payload.status,
        notes: payload.notes.clone(),
    };
    let mut set = UpdateSet::new().set_opt("location_id", payload.location_id);

    if !changes.is_empty() {
        changes.validate(current.date)?;
        let draft = apply_changes(Some(AttendanceDraft::from(&current)), &changes)?;
        set = set
            .set("check_in_time", draft.check_in_time)
            .set("check_out_time", draft.check_out_time)
            .set("status", draft.status.as_ref())
            .set("work_hours", draft.work_hours)
            .set("notes", draft.notes);
    }

    let update = build_update_sql("attendance_records", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(current.organization_id),
        AuditAction::Update,
        resource::ATTENDANCE,
        Some(id),
        json!({
            "check_in_time": payload.check_in_time,
            "check_out_time": payload.check_out_time,
            "status": payload.status,
        }),
    )
    .await;

    let record = fetch_record(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Attendance record updated", record))
}

#[utoipa::path(
    delete,
    path = "/api/v2/attendance/{id}",
    params(("id" = u64, Path, description = "Attendance record id"), DeleteQuery),
    responses(
        (status = 200, description = "Attendance record deleted"),
        (status = 404, description = "Attendance record not found")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn delete_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ATTENDANCE, action::DELETE)?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    if hard {
        // Approved change requests keep pointing at the record otherwise.
        sqlx::query("UPDATE attendance_change_requests SET attendance_id = NULL WHERE attendance_id = ?")
            .bind(id)
            .execute(pool.get_ref())
            .await?;
    }

    if delete_row(pool.get_ref(), "attendance_records", id, auth.scope(), hard).await? == 0 {
        return Err(ApiError::not_found("Attendance record"));
    }
    warn!(attendance_id = id, hard, user_id = auth.user_id, "Attendance record deleted");

    audit::record(
        pool.get_ref(),
        &auth,
        None,
        AuditAction::Delete,
        resource::ATTENDANCE,
        Some(id),
        json!({ "hard": hard }),
    )
    .await;

    Ok(response::message("Attendance record deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee(status: &str) -> Employee {
        Employee {
            id: 7,
            organization_id: 1,
            department_id: None,
            shift_id: None,
            location_id: None,
            employee_code: "EMP-7".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@acme.test".into(),
            phone: None,
            designation: None,
            hire_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            status: status.into(),
            working_hours: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn record(id: u64, checked_out: bool) -> AttendanceRecord {
        let check_in = NaiveDate::from_ymd_opt(2026, 1, 5)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap();
        AttendanceRecord {
            id,
            organization_id: 1,
            employee_id: 7,
            date: check_in.date(),
            check_in_time: Some(check_in),
            check_out_time: checked_out.then(|| check_in + Duration::hours(8)),
            status: "present".into(),
            work_hours: None,
            check_in_method: "web".into(),
            camera_id: None,
            location_id: None,
            notes: None,
            approved_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn check_out_closes_todays_record_first() {
        assert_eq!(record_to_close(Some(record(1, false)), None).unwrap().id, 1);
        assert!(matches!(
            record_to_close(Some(record(1, true)), None),
            Err(ApiError::Conflict(_))
        ));
    }

    #[test]
    fn closed_overnight_record_means_nothing_to_close() {
        assert_eq!(record_to_close(None, Some(record(2, false))).unwrap().id, 2);

        match record_to_close(None, Some(record(2, true))) {
            Err(ApiError::Validation(msg)) => assert_eq!(msg, "No open check-in found for today"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(record_to_close(None, None), Err(ApiError::Validation(_))));
    }

    #[test]
    fn terminated_and_inactive_employees_cannot_check_in() {
        assert!(ensure_employable(&employee("active")).is_ok());
        assert!(ensure_employable(&employee("on_leave")).is_ok());
        assert!(matches!(
            ensure_employable(&employee("terminated")),
            Err(ApiError::Validation(_))
        ));
        assert!(ensure_employable(&employee("inactive")).is_err());
    }
}
