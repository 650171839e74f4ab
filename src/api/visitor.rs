use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{DeleteQuery, count_rows, ensure_reference, fetch_scoped, non_empty, require_feature},
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::{
        employee::validate_email,
        visitor::{VISIT_COLUMNS, VISITOR_COLUMNS, VisitStatus, Visitor, VisitorVisit, new_badge_number},
    },
    rbac::{TenantScope, action, resource},
    response::{self, PageParams, PageQuery},
    subscription::Feature,
    utils::db_utils::{BindValues, Filter, UpdateSet, build_update_sql, delete_row, execute_update},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateVisitor {
    pub organization_id: Option<u64>,
    #[schema(example = "Maria Lopez")]
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    #[schema(example = "passport")]
    pub id_document_type: Option<String>,
    pub id_document_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateVisitor {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub id_document_type: Option<String>,
    pub id_document_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct Blacklist {
    #[schema(example = "Tailgating incident on 2026-01-04")]
    pub reason: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VisitorQuery {
    pub is_blacklisted: Option<bool>,
    /// Matches name, email, phone or company
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateVisit {
    pub visitor_id: u64,
    pub host_employee_id: Option<u64>,
    pub location_id: Option<u64>,
    #[schema(example = "Vendor meeting")]
    pub purpose: String,
    pub expected_at: Option<NaiveDateTime>,
    /// Check the visitor in immediately (walk-in)
    #[serde(default)]
    pub walk_in: bool,
    pub check_in_camera_id: Option<u64>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct VisitCheckIn {
    pub check_in_camera_id: Option<u64>,
    pub location_id: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VisitQuery {
    pub visitor_id: Option<u64>,
    pub host_employee_id: Option<u64>,
    pub status: Option<VisitStatus>,
    /// Visits expected or checked in on this day
    #[param(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
}

async fn fetch_visitor(pool: &MySqlPool, id: u64, scope: TenantScope) -> ApiResult<Visitor> {
    fetch_scoped(pool, "visitors", VISITOR_COLUMNS, id, scope, "Visitor").await
}

async fn fetch_visit(pool: &MySqlPool, id: u64, scope: TenantScope) -> ApiResult<VisitorVisit> {
    fetch_scoped(pool, "visitor_visits", VISIT_COLUMNS, id, scope, "Visit").await
}

fn ensure_not_blacklisted(visitor: &Visitor) -> ApiResult<()> {
    if visitor.is_blacklisted {
        return Err(ApiError::forbidden(format!(
            "Visitor is blacklisted: {}",
            visitor.blacklist_reason.as_deref().unwrap_or("no reason recorded")
        )));
    }
    Ok(())
}

/// A visitor is on site at most once.
async fn ensure_no_open_visit(pool: &MySqlPool, visitor_id: u64) -> ApiResult<()> {
    let open = count_rows(
        pool,
        "visitor_visits",
        &Filter::new()
            .raw("deleted_at IS NULL")
            .eq("visitor_id", visitor_id)
            .eq("status", VisitStatus::CheckedIn.as_ref()),
    )
    .await?;
    if open > 0 {
        return Err(ApiError::conflict("Visitor is already checked in"));
    }
    Ok(())
}

fn visit_status(visit: &VisitorVisit) -> ApiResult<VisitStatus> {
    visit
        .status
        .parse()
        .map_err(|_| ApiError::Internal(format!("unknown visit status '{}'", visit.status)))
}

fn validate_contact(email: Option<&str>) -> ApiResult<()> {
    match email {
        Some(e) => validate_email(e).map_err(ApiError::validation),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Visitors
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v2/visitors",
    params(PageQuery, VisitorQuery),
    responses((status = 200, description = "Paginated visitors", body = [Visitor])),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn list_visitors(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<VisitorQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    let page = PageParams::from(&*page);

    let filter = Filter::tenant(auth.scope(), "")
        .eq_opt("is_blacklisted", query.is_blacklisted)
        .search(&["full_name", "email", "phone", "company"], query.search.as_deref());

    let total = count_rows(pool.get_ref(), "visitors", &filter).await?;

    let sql = format!(
        "SELECT {VISITOR_COLUMNS} FROM visitors{} ORDER BY id DESC LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, Visitor>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Visitors retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/visitors/{id}",
    params(("id" = u64, Path, description = "Visitor id")),
    responses(
        (status = 200, description = "Visitor", body = Visitor),
        (status = 404, description = "Visitor not found")
    ),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn get_visitor(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    let visitor = fetch_visitor(pool.get_ref(), path.into_inner(), auth.scope()).await?;
    Ok(response::ok("Visitor retrieved", visitor))
}

#[utoipa::path(
    post,
    path = "/api/v2/visitors",
    request_body = CreateVisitor,
    responses(
        (status = 201, description = "Visitor created", body = Visitor),
        (status = 403, description = "Missing permission or plan lacks visitor management")
    ),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn create_visitor(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateVisitor>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::CREATE)?;
    let org = auth.target_org(payload.organization_id)?;
    require_feature(pool.get_ref(), &auth, Some(org), Feature::VisitorManagement).await?;

    non_empty("full_name", &payload.full_name)?;
    validate_contact(payload.email.as_deref())?;

    let result = sqlx::query(
        r#"
        INSERT INTO visitors
            (organization_id, full_name, email, phone, company, id_document_type, id_document_number, notes)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(payload.full_name.trim())
    .bind(payload.email.as_deref().map(str::trim))
    .bind(payload.phone.as_deref())
    .bind(payload.company.as_deref())
    .bind(payload.id_document_type.as_deref())
    .bind(payload.id_document_number.as_deref())
    .bind(payload.notes.as_deref())
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::VISITORS,
        Some(id),
        json!({ "full_name": payload.full_name.trim(), "company": payload.company }),
    )
    .await;

    let visitor = fetch_visitor(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::created("Visitor created", visitor))
}

#[utoipa::path(
    put,
    path = "/api/v2/visitors/{id}",
    params(("id" = u64, Path, description = "Visitor id")),
    request_body = UpdateVisitor,
    responses(
        (status = 200, description = "Visitor updated", body = Visitor),
        (status = 404, description = "Visitor not found")
    ),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn update_visitor(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateVisitor>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::UPDATE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    let id = path.into_inner();

    if let Some(name) = &payload.full_name {
        non_empty("full_name", name)?;
    }
    validate_contact(payload.email.as_deref())?;

    let current = fetch_visitor(pool.get_ref(), id, auth.scope()).await?;

    let set = UpdateSet::new()
        .set_opt("full_name", payload.full_name.as_deref().map(str::trim))
        .set_opt("email", payload.email.as_deref().map(str::trim))
        .set_opt("phone", payload.phone.clone())
        .set_opt("company", payload.company.clone())
        .set_opt("id_document_type", payload.id_document_type.clone())
        .set_opt("id_document_number", payload.id_document_number.clone())
        .set_opt("notes", payload.notes.clone());

    let update = build_update_sql("visitors", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(current.organization_id),
        AuditAction::Update,
        resource::VISITORS,
        Some(id),
        json!({ "full_name": payload.full_name, "company": payload.company }),
    )
    .await;

    let visitor = fetch_visitor(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Visitor updated", visitor))
}

#[utoipa::path(
    put,
    path = "/api/v2/visitors/{id}/blacklist",
    params(("id" = u64, Path, description = "Visitor id")),
    request_body = Blacklist,
    responses(
        (status = 200, description = "Visitor blacklisted", body = Visitor),
        (status = 404, description = "Visitor not found")
    ),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn blacklist_visitor(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<Blacklist>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::UPDATE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    let id = path.into_inner();
    non_empty("reason", &payload.reason)?;

    let current = fetch_visitor(pool.get_ref(), id, auth.scope()).await?;

    let set = UpdateSet::new()
        .set("is_blacklisted", true)
        .set("blacklist_reason", payload.reason.trim());
    let update = build_update_sql("visitors", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    warn!(visitor_id = id, by = auth.user_id, "Visitor blacklisted");

    audit::record(
        pool.get_ref(),
        &auth,
        Some(current.organization_id),
        AuditAction::Update,
        resource::VISITORS,
        Some(id),
        json!({ "blacklisted": true, "reason": payload.reason.trim() }),
    )
    .await;

    let visitor = fetch_visitor(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Visitor blacklisted", visitor))
}

#[utoipa::path(
    put,
    path = "/api/v2/visitors/{id}/unblacklist",
    params(("id" = u64, Path, description = "Visitor id")),
    responses(
        (status = 200, description = "Visitor removed from blacklist", body = Visitor),
        (status = 404, description = "Visitor not found")
    ),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn unblacklist_visitor(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::UPDATE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    let id = path.into_inner();

    let current = fetch_visitor(pool.get_ref(), id, auth.scope()).await?;

    let set = UpdateSet::new()
        .set("is_blacklisted", false)
        .set("blacklist_reason", None::<String>);
    let update = build_update_sql("visitors", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(current.organization_id),
        AuditAction::Update,
        resource::VISITORS,
        Some(id),
        json!({ "blacklisted": false }),
    )
    .await;

    let visitor = fetch_visitor(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Visitor removed from blacklist", visitor))
}

#[utoipa::path(
    delete,
    path = "/api/v2/visitors/{id}",
    params(("id" = u64, Path, description = "Visitor id"), DeleteQuery),
    responses(
        (status = 200, description = "Visitor deleted"),
        (status = 404, description = "Visitor not found")
    ),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn delete_visitor(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::DELETE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    if delete_row(pool.get_ref(), "visitors", id, auth.scope(), hard).await? == 0 {
        return Err(ApiError::not_found("Visitor"));
    }

    audit::record(
        pool.get_ref(),
        &auth,
        None,
        AuditAction::Delete,
        resource::VISITORS,
        Some(id),
        json!({ "hard": hard }),
    )
    .await;

    Ok(response::message("Visitor deleted"))
}

// ---------------------------------------------------------------------------
// Visits
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v2/visitors/visits",
    params(PageQuery, VisitQuery),
    responses((status = 200, description = "Paginated visits", body = [VisitorVisit])),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn list_visits(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<VisitQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    let page = PageParams::from(&*page);

    let mut filter = Filter::tenant(auth.scope(), "")
        .eq_opt("visitor_id", query.visitor_id)
        .eq_opt("host_employee_id", query.host_employee_id)
        .eq_opt("status", query.status.map(|s| s.to_string()));
    if let Some(day) = query.date {
        let start = day.and_time(NaiveTime::MIN);
        let end = day
            .succ_opt()
            .map(|d| d.and_time(NaiveTime::MIN))
            .ok_or_else(|| ApiError::validation("date is out of range"))?;
        filter = filter.clause(
            "(COALESCE(check_in_time, expected_at) >= ? AND COALESCE(check_in_time, expected_at) < ?)",
            vec![start.into(), end.into()],
        );
    }

    let total = count_rows(pool.get_ref(), "visitor_visits", &filter).await?;

    let sql = format!(
        "SELECT {VISIT_COLUMNS} FROM visitor_visits{} ORDER BY id DESC LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, VisitorVisit>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Visits retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/visitors/visits/{id}",
    params(("id" = u64, Path, description = "Visit id")),
    responses(
        (status = 200, description = "Visit", body = VisitorVisit),
        (status = 404, description = "Visit not found")
    ),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn get_visit(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    let visit = fetch_visit(pool.get_ref(), path.into_inner(), auth.scope()).await?;
    Ok(response::ok("Visit retrieved", visit))
}

/// Registers an expected visit, or checks a walk-in visitor straight in.
#[utoipa::path(
    post,
    path = "/api/v2/visitors/visits",
    request_body = CreateVisit,
    responses(
        (status = 201, description = "Visit registered", body = VisitorVisit),
        (status = 403, description = "Visitor is blacklisted"),
        (status = 409, description = "Walk-in visitor is already checked in")
    ),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn create_visit(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateVisit>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::CREATE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    non_empty("purpose", &payload.purpose)?;

    let visitor = fetch_visitor(pool.get_ref(), payload.visitor_id, auth.scope())
        .await
        .map_err(|e| match e {
            ApiError::NotFound(_) => {
                ApiError::validation(format!("visitor_id {} does not exist", payload.visitor_id))
            }
            other => other,
        })?;
    let org = visitor.organization_id;
    ensure_not_blacklisted(&visitor)?;

    ensure_reference(pool.get_ref(), "employees", payload.host_employee_id, org, "host_employee_id")
        .await?;
    ensure_reference(pool.get_ref(), "locations", payload.location_id, org, "location_id").await?;
    ensure_reference(
        pool.get_ref(),
        "cameras",
        payload.check_in_camera_id,
        org,
        "check_in_camera_id",
    )
    .await?;

    let (status, check_in_time, badge) = if payload.walk_in {
        ensure_no_open_visit(pool.get_ref(), visitor.id).await?;
        (
            VisitStatus::CheckedIn,
            Some(Utc::now().naive_utc()),
            Some(new_badge_number()),
        )
    } else {
        (VisitStatus::Expected, None, None)
    };

    let result = sqlx::query(
        r#"
        INSERT INTO visitor_visits
            (organization_id, visitor_id, host_employee_id, location_id, purpose, badge_number,
             status, expected_at, check_in_time, check_in_camera_id, notes)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(visitor.id)
    .bind(payload.host_employee_id)
    .bind(payload.location_id)
    .bind(payload.purpose.trim())
    .bind(badge.as_deref())
    .bind(status.as_ref())
    .bind(payload.expected_at)
    .bind(check_in_time)
    .bind(payload.check_in_camera_id)
    .bind(payload.notes.as_deref())
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        if payload.walk_in { AuditAction::CheckIn } else { AuditAction::Create },
        resource::VISITORS,
        Some(id),
        json!({ "visitor_id": visitor.id, "status": status, "badge_number": badge }),
    )
    .await;

    let visit = fetch_visit(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::created("Visit registered", visit))
}

#[utoipa::path(
    put,
    path = "/api/v2/visitors/visits/{id}/check-in",
    params(("id" = u64, Path, description = "Visit id")),
    request_body = VisitCheckIn,
    responses(
        (status = 200, description = "Visitor checked in; badge issued", body = VisitorVisit),
        (status = 403, description = "Visitor is blacklisted"),
        (status = 409, description = "Visit is not expected, or visitor already on site")
    ),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn check_in_visit(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: Option<web::Json<VisitCheckIn>>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::UPDATE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    let id = path.into_inner();
    let payload = payload.map(web::Json::into_inner).unwrap_or_default();

    let visit = fetch_visit(pool.get_ref(), id, auth.scope()).await?;
    visit_status(&visit)?.transition(VisitStatus::CheckedIn)?;

    let visitor = fetch_visitor(pool.get_ref(), visit.visitor_id, TenantScope::All).await?;
    ensure_not_blacklisted(&visitor)?;
    ensure_no_open_visit(pool.get_ref(), visitor.id).await?;

    let org = visit.organization_id;
    ensure_reference(
        pool.get_ref(),
        "cameras",
        payload.check_in_camera_id,
        org,
        "check_in_camera_id",
    )
    .await?;
    ensure_reference(pool.get_ref(), "locations", payload.location_id, org, "location_id").await?;

    let badge = new_badge_number();
    let set = UpdateSet::new()
        .set("status", VisitStatus::CheckedIn.as_ref())
        .set("check_in_time", Utc::now().naive_utc())
        .set("badge_number", badge.as_str())
        .set_opt("check_in_camera_id", payload.check_in_camera_id)
        .set_opt("location_id", payload.location_id);
    let update = build_update_sql("visitor_visits", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    info!(visit_id = id, visitor_id = visitor.id, badge = %badge, "Visitor checked in");

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::CheckIn,
        resource::VISITORS,
        Some(id),
        json!({ "visitor_id": visitor.id, "badge_number": badge }),
    )
    .await;

    let visit = fetch_visit(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Visitor checked in", visit))
}

#[utoipa::path(
    put,
    path = "/api/v2/visitors/visits/{id}/check-out",
    params(("id" = u64, Path, description = "Visit id")),
    responses(
        (status = 200, description = "Visitor checked out", body = VisitorVisit),
        (status = 409, description = "Visit is not checked in")
    ),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn check_out_visit(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::UPDATE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    let id = path.into_inner();

    let visit = fetch_visit(pool.get_ref(), id, auth.scope()).await?;
    visit_status(&visit)?.transition(VisitStatus::CheckedOut)?;

    let set = UpdateSet::new()
        .set("status", VisitStatus::CheckedOut.as_ref())
        .set("check_out_time", Utc::now().naive_utc());
    let update = build_update_sql("visitor_visits", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(visit.organization_id),
        AuditAction::CheckOut,
        resource::VISITORS,
        Some(id),
        json!({ "visitor_id": visit.visitor_id, "badge_number": visit.badge_number }),
    )
    .await;

    let visit = fetch_visit(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Visitor checked out", visit))
}

#[utoipa::path(
    put,
    path = "/api/v2/visitors/visits/{id}/cancel",
    params(("id" = u64, Path, description = "Visit id")),
    responses(
        (status = 200, description = "Visit cancelled", body = VisitorVisit),
        (status = 409, description = "Visit is no longer expected")
    ),
    tag = "Visitors",
    security(("bearer_auth" = []))
)]
pub async fn cancel_visit(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::VISITORS, action::UPDATE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::VisitorManagement).await?;
    let id = path.into_inner();

    let visit = fetch_visit(pool.get_ref(), id, auth.scope()).await?;
    visit_status(&visit)?.transition(VisitStatus::Cancelled)?;

    let set = UpdateSet::new().set("status", VisitStatus::Cancelled.as_ref());
    let update = build_update_sql("visitor_visits", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(visit.organization_id),
        AuditAction::Cancel,
        resource::VISITORS,
        Some(id),
        json!({ "visitor_id": visit.visitor_id }),
    )
    .await;

    let visit = fetch_visit(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Visit cancelled", visit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visitor(blacklisted: bool) -> Visitor {
        Visitor {
            id: 1,
            organization_id: 1,
            full_name: "Maria Lopez".into(),
            email: None,
            phone: None,
            company: None,
            id_document_type: None,
            id_document_number: None,
            is_blacklisted: blacklisted,
            blacklist_reason: blacklisted.then(|| "tailgating".to_string()),
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn blacklisted_visitors_are_forbidden() {
        assert!(ensure_not_blacklisted(&visitor(false)).is_ok());
        let err = ensure_not_blacklisted(&visitor(true)).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert!(err.to_string().contains("tailgating"));
    }

    #[test]
    fn contact_email_is_optional_but_checked() {
        assert!(validate_contact(None).is_ok());
        assert!(validate_contact(Some("maria@vendor.test")).is_ok());
        assert!(validate_contact(Some("not-an-email")).is_err());
    }
}
