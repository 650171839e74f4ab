use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{DeleteQuery, count_rows, non_empty},
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::employee::validate_email,
    model::organization::{ORGANIZATION_COLUMNS, Organization, validate_slug},
    rbac::{TenantScope, action, resource},
    response::{self, PageParams, PageQuery},
    subscription::Tier,
    utils::db_utils::{BindValues, Filter, UpdateSet, build_update_sql, execute_update},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrganization {
    #[schema(example = "Acme Corp")]
    pub name: String,
    #[schema(example = "acme")]
    pub slug: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[schema(example = "Asia/Dhaka")]
    pub timezone: Option<String>,
    #[schema(example = "basic")]
    pub subscription_tier: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub settings: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrganization {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub timezone: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub settings: Option<Value>,
    /// Super admin only
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeSubscription {
    #[schema(example = "professional")]
    pub subscription_tier: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrganizationQuery {
    /// Matches name or slug
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

fn parse_tier(raw: &str) -> ApiResult<Tier> {
    raw.parse::<Tier>().map_err(|_| {
        ApiError::validation(format!(
            "Unknown subscription tier '{raw}' (expected free, basic, professional or enterprise)"
        ))
    })
}

/// Organizations are the tenants themselves, so the tenant filter is on `id`.
async fn fetch_organization(pool: &MySqlPool, id: u64, scope: TenantScope) -> ApiResult<Organization> {
    if !scope.allows(id) {
        return Err(ApiError::not_found("Organization"));
    }

    sqlx::query_as::<_, Organization>(&format!(
        "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Organization"))
}

#[utoipa::path(
    get,
    path = "/api/v2/organizations",
    params(PageQuery, OrganizationQuery),
    responses(
        (status = 200, description = "Paginated organization list", body = [Organization]),
        (status = 403, description = "Missing organizations:read")
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
pub async fn list_organizations(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<OrganizationQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ORGANIZATIONS, action::READ)?;
    let page = PageParams::from(&*page);

    let filter = Filter::new()
        .raw("deleted_at IS NULL")
        .eq_opt("id", auth.scope().organization_id())
        .eq_opt("is_active", query.is_active)
        .search(&["name", "slug"], query.search.as_deref());

    let total = count_rows(pool.get_ref(), "organizations", &filter).await?;

    let sql = format!(
        "SELECT {ORGANIZATION_COLUMNS} FROM organizations{} ORDER BY id DESC LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, Organization>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Organizations retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/organizations/{id}",
    params(("id" = u64, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Organization", body = Organization),
        (status = 404, description = "Not found or outside your tenant")
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
pub async fn get_organization(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ORGANIZATIONS, action::READ)?;
    let org = fetch_organization(pool.get_ref(), path.into_inner(), auth.scope()).await?;
    Ok(response::ok("Organization retrieved", org))
}

#[utoipa::path(
    post,
    path = "/api/v2/organizations",
    request_body = CreateOrganization,
    responses(
        (status = 201, description = "Organization created", body = Organization),
        (status = 403, description = "Super admin only"),
        (status = 409, description = "Slug already taken")
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
pub async fn create_organization(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateOrganization>,
) -> ApiResult<HttpResponse> {
    auth.require_super_admin()?;

    non_empty("name", &payload.name)?;
    let slug = payload.slug.trim().to_lowercase();
    validate_slug(&slug).map_err(ApiError::validation)?;
    if let Some(email) = &payload.email {
        validate_email(email).map_err(ApiError::validation)?;
    }
    let tier = match &payload.subscription_tier {
        Some(t) => parse_tier(t)?,
        None => Tier::Free,
    };

    let taken = count_rows(
        pool.get_ref(),
        "organizations",
        &Filter::new().eq("slug", slug.as_str()),
    )
    .await?;
    if taken > 0 {
        return Err(ApiError::conflict(format!("Organization slug '{slug}' already exists")));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO organizations (name, slug, email, phone, address, timezone, subscription_tier, settings)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(payload.name.trim())
    .bind(&slug)
    .bind(payload.email.as_deref())
    .bind(payload.phone.as_deref())
    .bind(payload.address.as_deref())
    .bind(payload.timezone.as_deref().unwrap_or("UTC"))
    .bind(tier.as_ref())
    .bind(payload.settings.clone().map(sqlx::types::Json))
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();
    info!(organization_id = id, slug = %slug, "Organization created");

    audit::record(
        pool.get_ref(),
        &auth,
        Some(id),
        AuditAction::Create,
        resource::ORGANIZATIONS,
        Some(id),
        json!({ "slug": slug, "subscription_tier": tier.as_ref() }),
    )
    .await;

    let org = fetch_organization(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::created("Organization created", org))
}

#[utoipa::path(
    put,
    path = "/api/v2/organizations/{id}",
    params(("id" = u64, Path, description = "Organization id")),
    request_body = UpdateOrganization,
    responses(
        (status = 200, description = "Organization updated", body = Organization),
        (status = 404, description = "Not found or outside your tenant")
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
pub async fn update_organization(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateOrganization>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::ORGANIZATIONS, action::UPDATE)?;
    let id = path.into_inner();

    if payload.is_active.is_some() {
        auth.require_super_admin()?;
    }
    if let Some(name) = &payload.name {
        non_empty("name", name)?;
    }
    if let Some(email) = &payload.email {
        validate_email(email).map_err(ApiError::validation)?;
    }

    // 404 for organizations outside the caller's tenant
    fetch_organization(pool.get_ref(), id, auth.scope()).await?;

    let set = UpdateSet::new()
        .set_opt("name", payload.name.as_deref().map(str::trim))
        .set_opt("email", payload.email.clone())
        .set_opt("phone", payload.phone.clone())
        .set_opt("address", payload.address.clone())
        .set_opt("timezone", payload.timezone.clone())
        .set_opt("settings", payload.settings.clone())
        .set_opt("is_active", payload.is_active);

    let update = build_update_sql("organizations", set, id, TenantScope::All)?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(id),
        AuditAction::Update,
        resource::ORGANIZATIONS,
        Some(id),
        json!({ "is_active": payload.is_active }),
    )
    .await;

    let org = fetch_organization(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::ok("Organization updated", org))
}

#[utoipa::path(
    put,
    path = "/api/v2/organizations/{id}/subscription",
    params(("id" = u64, Path, description = "Organization id")),
    request_body = ChangeSubscription,
    responses(
        (status = 200, description = "Subscription changed", body = Organization),
        (status = 403, description = "Super admin only")
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
pub async fn change_subscription(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<ChangeSubscription>,
) -> ApiResult<HttpResponse> {
    auth.require_super_admin()?;
    let id = path.into_inner();
    let tier = parse_tier(payload.subscription_tier.trim())?;

    let before = fetch_organization(pool.get_ref(), id, TenantScope::All).await?;

    let update = build_update_sql(
        "organizations",
        UpdateSet::new().set("subscription_tier", tier.as_ref()),
        id,
        TenantScope::All,
    )?;
    execute_update(pool.get_ref(), update).await?;

    info!(organization_id = id, from = %before.subscription_tier, to = %tier, "Subscription changed");

    audit::record(
        pool.get_ref(),
        &auth,
        Some(id),
        AuditAction::Update,
        resource::ORGANIZATIONS,
        Some(id),
        json!({ "subscription_tier": { "from": before.subscription_tier, "to": tier.as_ref() } }),
    )
    .await;

    let org = fetch_organization(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::ok("Subscription updated", org))
}

#[utoipa::path(
    delete,
    path = "/api/v2/organizations/{id}",
    params(("id" = u64, Path, description = "Organization id"), DeleteQuery),
    responses(
        (status = 200, description = "Organization deleted"),
        (status = 403, description = "Super admin only")
    ),
    tag = "Organizations",
    security(("bearer_auth" = []))
)]
pub async fn delete_organization(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require_super_admin()?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    let sql = if hard {
        "DELETE FROM organizations WHERE id = ?"
    } else {
        "UPDATE organizations SET deleted_at = NOW(), is_active = FALSE WHERE id = ? AND deleted_at IS NULL"
    };
    let affected = sqlx::query(sql)
        .bind(id)
        .execute(pool.get_ref())
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(ApiError::not_found("Organization"));
    }

    audit::record(
        pool.get_ref(),
        &auth,
        Some(id),
        AuditAction::Delete,
        resource::ORGANIZATIONS,
        Some(id),
        json!({ "hard": hard }),
    )
    .await;

    Ok(response::message("Organization deleted"))
}
