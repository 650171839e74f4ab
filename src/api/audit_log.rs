use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use sqlx::MySqlPool;
use utoipa::IntoParams;

use crate::{
    api::{count_rows, require_feature},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::audit_log::{AUDIT_LOG_COLUMNS, AuditLog},
    rbac::{action, resource},
    response::{self, PageParams, PageQuery},
    subscription::Feature,
    utils::db_utils::{BindValues, Filter},
};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditLogQuery {
    pub user_id: Option<u64>,
    /// e.g. `leave`, `employees`
    pub resource: Option<String>,
    pub resource_id: Option<u64>,
    /// e.g. `create`, `approve`, `check_in`
    pub action: Option<String>,
    #[param(value_type = Option<String>, format = "date")]
    pub start_date: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub end_date: Option<NaiveDate>,
}

/// Audit rows are append-only and have no `deleted_at`; tenancy is the
/// only filter applied implicitly.
fn audit_filter(auth: &AuthUser) -> Filter {
    match auth.scope().organization_id() {
        Some(org) => Filter::new().eq("organization_id", org),
        None => Filter::new(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v2/audit-logs",
    params(PageQuery, AuditLogQuery),
    responses(
        (status = 200, description = "Paginated audit trail, newest first", body = [AuditLog]),
        (status = 403, description = "Missing audit_logs:read or plan lacks audit logs")
    ),
    tag = "Audit logs",
    security(("bearer_auth" = []))
)]
pub async fn list_audit_logs(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<AuditLogQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::AUDIT_LOGS, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::AuditLogs).await?;
    let page = PageParams::from(&*page);

    if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
        if start > end {
            return Err(ApiError::validation("start_date must not be after end_date"));
        }
    }

    // created_at is a timestamp; the end date is inclusive.
    let from = query.start_date.map(|d| d.and_time(NaiveTime::MIN));
    let until = query
        .end_date
        .and_then(|d| d.succ_opt())
        .map(|d| d.and_time(NaiveTime::MIN));

    let filter = audit_filter(&auth)
        .eq_opt("user_id", query.user_id)
        .eq_opt("resource", query.resource.as_deref())
        .eq_opt("resource_id", query.resource_id)
        .eq_opt("action", query.action.as_deref())
        .cmp_opt("created_at", ">=", from)
        .cmp_opt("created_at", "<", until);

    let total = count_rows(pool.get_ref(), "audit_logs", &filter).await?;

    let sql = format!(
        "SELECT {AUDIT_LOG_COLUMNS} FROM audit_logs{} ORDER BY id DESC LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, AuditLog>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Audit logs retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/audit-logs/{id}",
    params(("id" = u64, Path, description = "Audit log id")),
    responses(
        (status = 200, description = "Audit log entry", body = AuditLog),
        (status = 404, description = "Audit log not found")
    ),
    tag = "Audit logs",
    security(("bearer_auth" = []))
)]
pub async fn get_audit_log(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::AUDIT_LOGS, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::AuditLogs).await?;

    let filter = audit_filter(&auth).eq("id", path.into_inner());
    let sql = format!("SELECT {AUDIT_LOG_COLUMNS} FROM audit_logs{}", filter.where_sql());

    let entry = sqlx::query_as::<_, AuditLog>(&sql)
        .bind_values(filter.values())
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| ApiError::not_found("Audit log"))?;

    Ok(response::ok("Audit log retrieved", entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::tests::user;
    use crate::rbac::SystemRole;

    #[test]
    fn tenant_users_only_see_their_organization() {
        let admin = user(SystemRole::OrgAdmin, Some(7), None);
        assert_eq!(audit_filter(&admin).where_sql(), " WHERE organization_id = ?");

        let root = user(SystemRole::SuperAdmin, None, None);
        assert_eq!(audit_filter(&root).where_sql(), "");
    }
}
