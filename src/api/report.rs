use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::MySqlPool;
use tracing::debug;
use utoipa::IntoParams;

use crate::{
    api::require_feature,
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::{
        leave_request::DateRange,
        report::{
            AttendanceSummary, DepartmentCountRow, DepartmentSummary, EmployeeCountRow,
            EmployeeSummary, SummaryReport, group_by_department, group_by_employee,
        },
    },
    rbac::{TenantScope, action, resource},
    response,
    subscription::Feature,
    utils::db_utils::{BindValues, Filter},
};

/// Longest range a single report may cover.
const MAX_REPORT_DAYS: i64 = 366;

const REPORT_FROM: &str =
    "attendance_records a JOIN employees e ON e.id = a.employee_id \
     LEFT JOIN departments d ON d.id = e.department_id";

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    #[param(value_type = String, format = "date")]
    pub start_date: NaiveDate,
    #[param(value_type = String, format = "date")]
    pub end_date: NaiveDate,
    pub department_id: Option<u64>,
    /// Super admins only; other callers always report on their own organization
    pub organization_id: Option<u64>,
}

impl ReportQuery {
    fn range(&self) -> ApiResult<DateRange> {
        let range = DateRange::new(self.start_date, self.end_date)?;
        if range.days() > MAX_REPORT_DAYS {
            return Err(ApiError::validation(format!(
                "A report may span at most {MAX_REPORT_DAYS} days"
            )));
        }
        Ok(range)
    }

    fn scope(&self, auth: &AuthUser) -> ApiResult<TenantScope> {
        match self.organization_id {
            Some(org) => Ok(TenantScope::Organization(auth.target_org(Some(org))?)),
            None => Ok(auth.scope()),
        }
    }
}

/// Live attendance rows of live employees in range, optionally one
/// department.
fn report_filter(scope: TenantScope, range: DateRange, department_id: Option<u64>) -> Filter {
    Filter::tenant(scope, "a")
        .raw("e.deleted_at IS NULL")
        .cmp_opt("a.date", ">=", Some(range.start))
        .cmp_opt("a.date", "<=", Some(range.end))
        .eq_opt("e.department_id", department_id)
}

async fn prepare(
    auth: &AuthUser,
    pool: &MySqlPool,
    query: &ReportQuery,
) -> ApiResult<(DateRange, Filter)> {
    auth.require(resource::REPORTS, action::READ)?;
    let scope = query.scope(auth)?;
    require_feature(pool, auth, scope.organization_id(), Feature::Reports).await?;
    let range = query.range()?;
    Ok((range, report_filter(scope, range, query.department_id)))
}

#[utoipa::path(
    get,
    path = "/api/v2/reports/attendance/summary",
    params(ReportQuery),
    responses(
        (status = 200, description = "Status counts and attendance rate", body = SummaryReport),
        (status = 400, description = "Invalid date range"),
        (status = 403, description = "Missing reports:read or plan lacks reports")
    ),
    tag = "Reports",
    security(("bearer_auth" = []))
)]
pub async fn attendance_summary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<ReportQuery>,
) -> ApiResult<HttpResponse> {
    let (range, filter) = prepare(&auth, pool.get_ref(), &query).await?;

    let sql = format!(
        "SELECT a.status, COUNT(*) FROM {REPORT_FROM}{} GROUP BY a.status",
        filter.where_sql()
    );
    let counts = sqlx::query_as::<_, (String, i64)>(&sql)
        .bind_values(filter.values())
        .fetch_all(pool.get_ref())
        .await?;

    let summary = AttendanceSummary::from_counts(&counts);
    debug!(
        start = %range.start,
        end = %range.end,
        total = summary.total_records,
        "Attendance summary computed"
    );

    Ok(response::ok(
        "Attendance summary retrieved",
        SummaryReport {
            start_date: range.start,
            end_date: range.end,
            department_id: query.department_id,
            summary,
        },
    ))
}

#[utoipa::path(
    get,
    path = "/api/v2/reports/attendance/departments",
    params(ReportQuery),
    responses(
        (status = 200, description = "Attendance summary per department", body = [DepartmentSummary]),
        (status = 400, description = "Invalid date range")
    ),
    tag = "Reports",
    security(("bearer_auth" = []))
)]
pub async fn department_breakdown(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<ReportQuery>,
) -> ApiResult<HttpResponse> {
    let (_, filter) = prepare(&auth, pool.get_ref(), &query).await?;

    let sql = format!(
        "SELECT e.department_id, d.name, a.status, COUNT(*) FROM {REPORT_FROM}{} \
         GROUP BY e.department_id, d.name, a.status",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, DepartmentCountRow>(&sql)
        .bind_values(filter.values())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::ok("Department breakdown retrieved", group_by_department(rows)))
}

#[utoipa::path(
    get,
    path = "/api/v2/reports/attendance/employees",
    params(ReportQuery),
    responses(
        (status = 200, description = "Attendance summary and hours per employee", body = [EmployeeSummary]),
        (status = 400, description = "Invalid date range")
    ),
    tag = "Reports",
    security(("bearer_auth" = []))
)]
pub async fn employee_breakdown(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<ReportQuery>,
) -> ApiResult<HttpResponse> {
    let (_, filter) = prepare(&auth, pool.get_ref(), &query).await?;

    let sql = format!(
        "SELECT e.id, e.employee_code, e.first_name, e.last_name, a.status, COUNT(*), \
         COALESCE(SUM(a.work_hours), 0e0) FROM {REPORT_FROM}{} \
         GROUP BY e.id, e.employee_code, e.first_name, e.last_name, a.status",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, EmployeeCountRow>(&sql)
        .bind_values(filter.values())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::ok("Employee breakdown retrieved", group_by_employee(rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::tests::user;
    use crate::rbac::SystemRole;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn query(start: &str, end: &str, org: Option<u64>) -> ReportQuery {
        ReportQuery {
            start_date: d(start),
            end_date: d(end),
            department_id: None,
            organization_id: org,
        }
    }

    #[test]
    fn ranges_are_ordered_and_bounded() {
        assert!(query("2026-01-01", "2026-01-31", None).range().is_ok());
        assert!(query("2026-02-01", "2026-01-31", None).range().is_err());
        assert!(query("2025-01-01", "2026-06-30", None).range().is_err());
    }

    #[test]
    fn tenant_users_cannot_report_on_other_organizations() {
        let admin = user(SystemRole::OrgAdmin, Some(3), None);
        assert_eq!(
            query("2026-01-01", "2026-01-02", None).scope(&admin).unwrap(),
            TenantScope::Organization(3)
        );
        assert!(matches!(
            query("2026-01-01", "2026-01-02", Some(4)).scope(&admin),
            Err(ApiError::Forbidden(_))
        ));

        let root = user(SystemRole::SuperAdmin, None, None);
        assert_eq!(
            query("2026-01-01", "2026-01-02", Some(4)).scope(&root).unwrap(),
            TenantScope::Organization(4)
        );
    }

    #[test]
    fn filter_joins_live_employees() {
        let range = DateRange::new(d("2026-01-01"), d("2026-01-31")).unwrap();
        let f = report_filter(TenantScope::Organization(2), range, Some(9));
        assert_eq!(
            f.where_sql(),
            " WHERE a.deleted_at IS NULL AND a.organization_id = ? AND e.deleted_at IS NULL \
             AND a.date >= ? AND a.date <= ? AND e.department_id = ?"
        );
    }
}
