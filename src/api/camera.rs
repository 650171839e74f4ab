use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::MySqlPool;
use tracing::debug;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{DeleteQuery, count_rows, ensure_reference, fetch_scoped, non_empty, require_capacity},
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::camera::{CAMERA_COLUMNS, Camera, CameraStatus, CameraType},
    rbac::{TenantScope, action, resource},
    response::{self, PageParams, PageQuery},
    subscription::Limit,
    utils::db_utils::{BindValues, Filter, UpdateSet, build_update_sql, delete_row, execute_update},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCamera {
    pub organization_id: Option<u64>,
    pub location_id: Option<u64>,
    #[schema(example = "Lobby entrance")]
    pub name: String,
    #[schema(example = "rtsp://10.0.0.12/stream1")]
    pub stream_url: Option<String>,
    pub camera_type: Option<CameraType>,
    #[schema(value_type = Option<Object>)]
    pub device_info: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCamera {
    pub location_id: Option<u64>,
    pub name: Option<String>,
    pub stream_url: Option<String>,
    pub camera_type: Option<CameraType>,
    pub status: Option<CameraStatus>,
    #[schema(value_type = Option<Object>)]
    pub device_info: Option<Value>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct Heartbeat {
    /// Replaces the stored device info when present
    #[schema(value_type = Option<Object>)]
    pub device_info: Option<Value>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CameraQuery {
    pub location_id: Option<u64>,
    pub camera_type: Option<CameraType>,
    pub status: Option<CameraStatus>,
    pub search: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v2/cameras",
    params(PageQuery, CameraQuery),
    responses((status = 200, description = "Paginated camera list", body = [Camera])),
    tag = "Cameras",
    security(("bearer_auth" = []))
)]
pub async fn list_cameras(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<CameraQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::CAMERAS, action::READ)?;
    let page = PageParams::from(&*page);

    let filter = Filter::tenant(auth.scope(), "")
        .eq_opt("location_id", query.location_id)
        .eq_opt("camera_type", query.camera_type.map(|t| t.to_string()))
        .eq_opt("status", query.status.map(|s| s.to_string()))
        .search(&["name"], query.search.as_deref());

    let total = count_rows(pool.get_ref(), "cameras", &filter).await?;

    let sql = format!(
        "SELECT {CAMERA_COLUMNS} FROM cameras{} ORDER BY id DESC LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, Camera>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Cameras retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/cameras/{id}",
    params(("id" = u64, Path, description = "Camera id")),
    responses(
        (status = 200, description = "Camera", body = Camera),
        (status = 404, description = "Camera not found")
    ),
    tag = "Cameras",
    security(("bearer_auth" = []))
)]
pub async fn get_camera(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::CAMERAS, action::READ)?;
    let camera: Camera = fetch_scoped(
        pool.get_ref(),
        "cameras",
        CAMERA_COLUMNS,
        path.into_inner(),
        auth.scope(),
        "Camera",
    )
    .await?;
    Ok(response::ok("Camera retrieved", camera))
}

#[utoipa::path(
    post,
    path = "/api/v2/cameras",
    request_body = CreateCamera,
    responses(
        (status = 201, description = "Camera created", body = Camera),
        (status = 403, description = "Missing permission or plan camera limit reached")
    ),
    tag = "Cameras",
    security(("bearer_auth" = []))
)]
pub async fn create_camera(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateCamera>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::CAMERAS, action::CREATE)?;
    let org = auth.target_org(payload.organization_id)?;

    non_empty("name", &payload.name)?;
    require_capacity(pool.get_ref(), &auth, org, Limit::Cameras).await?;
    ensure_reference(pool.get_ref(), "locations", payload.location_id, org, "location_id").await?;

    let camera_type = payload.camera_type.unwrap_or_default();

    let result = sqlx::query(
        r#"
        INSERT INTO cameras (organization_id, location_id, name, stream_url, camera_type, status, device_info)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(payload.location_id)
    .bind(payload.name.trim())
    .bind(payload.stream_url.as_deref())
    .bind(camera_type.as_ref())
    .bind(CameraStatus::Offline.as_ref())
    .bind(payload.device_info.clone().map(sqlx::types::Json))
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::CAMERAS,
        Some(id),
        json!({ "name": payload.name.trim(), "camera_type": camera_type }),
    )
    .await;

    let camera: Camera =
        fetch_scoped(pool.get_ref(), "cameras", CAMERA_COLUMNS, id, TenantScope::All, "Camera")
            .await?;
    Ok(response::created("Camera created", camera))
}

#[utoipa::path(
    put,
    path = "/api/v2/cameras/{id}",
    params(("id" = u64, Path, description = "Camera id")),
    request_body = UpdateCamera,
    responses(
        (status = 200, description = "Camera updated", body = Camera),
        (status = 404, description = "Camera not found")
    ),
    tag = "Cameras",
    security(("bearer_auth" = []))
)]
pub async fn update_camera(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateCamera>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::CAMERAS, action::UPDATE)?;
    let id = path.into_inner();

    let current: Camera =
        fetch_scoped(pool.get_ref(), "cameras", CAMERA_COLUMNS, id, auth.scope(), "Camera").await?;

    if let Some(name) = &payload.name {
        non_empty("name", name)?;
    }
    ensure_reference(
        pool.get_ref(),
        "locations",
        payload.location_id,
        current.organization_id,
        "location_id",
    )
    .await?;

    let set = UpdateSet::new()
        .set_opt("location_id", payload.location_id)
        .set_opt("name", payload.name.as_deref().map(str::trim))
        .set_opt("stream_url", payload.stream_url.clone())
        .set_opt("camera_type", payload.camera_type.map(|t| t.to_string()))
        .set_opt("status", payload.status.map(|s| s.to_string()))
        .set_opt("device_info", payload.device_info.clone());

    let update = build_update_sql("cameras", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(current.organization_id),
        AuditAction::Update,
        resource::CAMERAS,
        Some(id),
        json!({ "status": payload.status, "camera_type": payload.camera_type }),
    )
    .await;

    let camera: Camera =
        fetch_scoped(pool.get_ref(), "cameras", CAMERA_COLUMNS, id, auth.scope(), "Camera").await?;
    Ok(response::ok("Camera updated", camera))
}

/// Marks the camera online and stamps `last_seen_at`. Not audited: devices
/// call this every few seconds.
#[utoipa::path(
    post,
    path = "/api/v2/cameras/{id}/heartbeat",
    params(("id" = u64, Path, description = "Camera id")),
    request_body = Heartbeat,
    responses(
        (status = 200, description = "Heartbeat recorded", body = Camera),
        (status = 404, description = "Camera not found")
    ),
    tag = "Cameras",
    security(("bearer_auth" = []))
)]
pub async fn heartbeat(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: Option<web::Json<Heartbeat>>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::CAMERAS, action::UPDATE)?;
    let id = path.into_inner();
    let device_info = payload.and_then(|p| p.into_inner().device_info);

    let set = UpdateSet::new()
        .set("status", CameraStatus::Online.as_ref())
        .set("last_seen_at", Utc::now().naive_utc())
        .set_opt("device_info", device_info);

    let update = build_update_sql("cameras", set, id, auth.scope())?;
    let affected = execute_update(pool.get_ref(), update).await?;
    debug!(camera_id = id, affected, "Camera heartbeat");

    let camera: Camera =
        fetch_scoped(pool.get_ref(), "cameras", CAMERA_COLUMNS, id, auth.scope(), "Camera").await?;
    Ok(response::ok("Heartbeat recorded", camera))
}

#[utoipa::path(
    delete,
    path = "/api/v2/cameras/{id}",
    params(("id" = u64, Path, description = "Camera id"), DeleteQuery),
    responses(
        (status = 200, description = "Camera deleted"),
        (status = 404, description = "Camera not found")
    ),
    tag = "Cameras",
    security(("bearer_auth" = []))
)]
pub async fn delete_camera(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::CAMERAS, action::DELETE)?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    if delete_row(pool.get_ref(), "cameras", id, auth.scope(), hard).await? == 0 {
        return Err(ApiError::not_found("Camera"));
    }

    audit::record(
        pool.get_ref(),
        &auth,
        None,
        AuditAction::Delete,
        resource::CAMERAS,
        Some(id),
        json!({ "hard": hard }),
    )
    .await;

    Ok(response::message("Camera deleted"))
}
