use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{DeleteQuery, count_rows, fetch_scoped, non_empty},
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::location::{LOCATION_COLUMNS, Location, validate_coordinates},
    rbac::{TenantScope, action, resource},
    response::{self, PageParams, PageQuery},
    utils::db_utils::{BindValues, Filter, UpdateSet, build_update_sql, delete_row, execute_update},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateLocation {
    pub organization_id: Option<u64>,
    #[schema(example = "HQ - Main Gate")]
    pub name: String,
    pub address: Option<String>,
    #[schema(example = 23.7808)]
    pub latitude: Option<f64>,
    #[schema(example = 90.2792)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateLocation {
    pub name: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LocationQuery {
    pub is_active: Option<bool>,
    pub search: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v2/locations",
    params(PageQuery, LocationQuery),
    responses((status = 200, description = "Paginated location list", body = [Location])),
    tag = "Locations",
    security(("bearer_auth" = []))
)]
pub async fn list_locations(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<LocationQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LOCATIONS, action::READ)?;
    let page = PageParams::from(&*page);

    let filter = Filter::tenant(auth.scope(), "")
        .eq_opt("is_active", query.is_active)
        .search(&["name", "address"], query.search.as_deref());

    let total = count_rows(pool.get_ref(), "locations", &filter).await?;

    let sql = format!(
        "SELECT {LOCATION_COLUMNS} FROM locations{} ORDER BY name LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, Location>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Locations retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/locations/{id}",
    params(("id" = u64, Path, description = "Location id")),
    responses(
        (status = 200, description = "Location", body = Location),
        (status = 404, description = "Location not found")
    ),
    tag = "Locations",
    security(("bearer_auth" = []))
)]
pub async fn get_location(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LOCATIONS, action::READ)?;
    let location: Location = fetch_scoped(
        pool.get_ref(),
        "locations",
        LOCATION_COLUMNS,
        path.into_inner(),
        auth.scope(),
        "Location",
    )
    .await?;
    Ok(response::ok("Location retrieved", location))
}

#[utoipa::path(
    post,
    path = "/api/v2/locations",
    request_body = CreateLocation,
    responses(
        (status = 201, description = "Location created", body = Location),
        (status = 400, description = "Invalid coordinates")
    ),
    tag = "Locations",
    security(("bearer_auth" = []))
)]
pub async fn create_location(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateLocation>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LOCATIONS, action::CREATE)?;
    let org = auth.target_org(payload.organization_id)?;

    non_empty("name", &payload.name)?;
    validate_coordinates(payload.latitude, payload.longitude).map_err(ApiError::validation)?;

    let result = sqlx::query(
        "INSERT INTO locations (organization_id, name, address, latitude, longitude) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(org)
    .bind(payload.name.trim())
    .bind(payload.address.as_deref())
    .bind(payload.latitude)
    .bind(payload.longitude)
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::LOCATIONS,
        Some(id),
        json!({ "name": payload.name.trim() }),
    )
    .await;

    let location: Location = fetch_scoped(
        pool.get_ref(),
        "locations",
        LOCATION_COLUMNS,
        id,
        TenantScope::All,
        "Location",
    )
    .await?;
    Ok(response::created("Location created", location))
}

#[utoipa::path(
    put,
    path = "/api/v2/locations/{id}",
    params(("id" = u64, Path, description = "Location id")),
    request_body = UpdateLocation,
    responses(
        (status = 200, description = "Location updated", body = Location),
        (status = 404, description = "Location not found")
    ),
    tag = "Locations",
    security(("bearer_auth" = []))
)]
pub async fn update_location(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateLocation>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LOCATIONS, action::UPDATE)?;
    let id = path.into_inner();

    if let Some(name) = &payload.name {
        non_empty("name", name)?;
    }
    validate_coordinates(payload.latitude, payload.longitude).map_err(ApiError::validation)?;

    let set = UpdateSet::new()
        .set_opt("name", payload.name.as_deref().map(str::trim))
        .set_opt("address", payload.address.clone())
        .set_opt("latitude", payload.latitude)
        .set_opt("longitude", payload.longitude)
        .set_opt("is_active", payload.is_active);

    let update = build_update_sql("locations", set, id, auth.scope())?;
    if execute_update(pool.get_ref(), update).await? == 0 {
        // MySQL reports 0 for unchanged rows too, so confirm the row exists.
        let _: Location = fetch_scoped(
            pool.get_ref(),
            "locations",
            LOCATION_COLUMNS,
            id,
            auth.scope(),
            "Location",
        )
        .await?;
    }

    audit::record(
        pool.get_ref(),
        &auth,
        None,
        AuditAction::Update,
        resource::LOCATIONS,
        Some(id),
        json!({ "name": payload.name, "is_active": payload.is_active }),
    )
    .await;

    let location: Location = fetch_scoped(
        pool.get_ref(),
        "locations",
        LOCATION_COLUMNS,
        id,
        auth.scope(),
        "Location",
    )
    .await?;
    Ok(response::ok("Location updated", location))
}

#[utoipa::path(
    delete,
    path = "/api/v2/locations/{id}",
    params(("id" = u64, Path, description = "Location id"), DeleteQuery),
    responses(
        (status = 200, description = "Location deleted"),
        (status = 404, description = "Location not found")
    ),
    tag = "Locations",
    security(("bearer_auth" = []))
)]
pub async fn delete_location(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LOCATIONS, action::DELETE)?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    if delete_row(pool.get_ref(), "locations", id, auth.scope(), hard).await? == 0 {
        return Err(ApiError::not_found("Location"));
    }

    audit::record(
        pool.get_ref(),
        &auth,
        None,
        AuditAction::Delete,
        resource::LOCATIONS,
        Some(id),
        json!({ "hard": hard }),
    )
    .await;

    Ok(response::message("Location deleted"))
}
