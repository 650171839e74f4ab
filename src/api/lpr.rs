use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{DeleteQuery, count_rows, ensure_reference, fetch_scoped, require_feature},
    audit::{self, AuditAction},
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::lpr::{
        AccessDecision, Direction, LPR_LOG_COLUMNS, LprLog, LprVehicle, OwnerType, VEHICLE_COLUMNS,
        normalize_plate, validate_confidence,
    },
    rbac::{TenantScope, action, resource},
    response::{self, PageParams, PageQuery},
    subscription::Feature,
    utils::db_utils::{BindValues, Filter, UpdateSet, build_update_sql, delete_row, execute_update},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateVehicle {
    pub organization_id: Option<u64>,
    #[schema(example = "Dhaka-GA 12-34")]
    pub plate_number: String,
    pub owner_type: Option<OwnerType>,
    pub employee_id: Option<u64>,
    pub visitor_id: Option<u64>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
    /// Defaults to true
    pub is_authorized: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateVehicle {
    pub plate_number: Option<String>,
    pub owner_type: Option<OwnerType>,
    pub employee_id: Option<u64>,
    pub visitor_id: Option<u64>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
    pub is_authorized: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VehicleQuery {
    pub owner_type: Option<OwnerType>,
    pub is_authorized: Option<bool>,
    /// Matches plate, make, model or color
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestPlate {
    pub organization_id: Option<u64>,
    pub camera_id: Option<u64>,
    /// Plate as recognized; normalized before matching
    #[schema(example = "dhaka-ga 12-34")]
    pub plate_number: String,
    pub direction: Direction,
    #[schema(example = 0.93)]
    pub confidence: f64,
    /// Defaults to now (UTC)
    pub captured_at: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LprLogQuery {
    pub camera_id: Option<u64>,
    pub vehicle_id: Option<u64>,
    pub direction: Option<Direction>,
    pub access_decision: Option<AccessDecision>,
    /// Normalized before comparison
    pub plate_number: Option<String>,
    #[param(value_type = Option<String>, format = "date")]
    pub start_date: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub end_date: Option<NaiveDate>,
}

async fn fetch_vehicle(pool: &MySqlPool, id: u64, scope: TenantScope) -> ApiResult<LprVehicle> {
    fetch_scoped(pool, "lpr_vehicles", VEHICLE_COLUMNS, id, scope, "Vehicle").await
}

fn plate(raw: &str) -> ApiResult<String> {
    normalize_plate(raw).map_err(ApiError::validation)
}

/// Plates are unique among live vehicles of one organization.
async fn ensure_plate_free(
    pool: &MySqlPool,
    org: u64,
    plate: &str,
    exclude: Option<u64>,
) -> ApiResult<()> {
    let mut filter = Filter::tenant(TenantScope::Organization(org), "").eq("plate_number", plate);
    if let Some(id) = exclude {
        filter = filter.clause("id <> ?", vec![id.into()]);
    }
    if count_rows(pool, "lpr_vehicles", &filter).await? > 0 {
        return Err(ApiError::conflict(format!(
            "Vehicle with plate '{plate}' is already registered"
        )));
    }
    Ok(())
}

/// Owner links must agree with the owner type.
fn check_owner(
    owner: OwnerType,
    employee_id: Option<u64>,
    visitor_id: Option<u64>,
) -> ApiResult<()> {
    match owner {
        OwnerType::Employee if employee_id.is_none() => {
            Err(ApiError::validation("employee_id is required for employee vehicles"))
        }
        OwnerType::Visitor if visitor_id.is_none() => {
            Err(ApiError::validation("visitor_id is required for visitor vehicles"))
        }
        _ if employee_id.is_some() && visitor_id.is_some() => Err(ApiError::validation(
            "A vehicle belongs to an employee or a visitor, not both",
        )),
        _ => Ok(()),
    }
}

/// Log rows are append-only; only tenancy applies.
fn log_filter(auth: &AuthUser) -> Filter {
    match auth.scope().organization_id() {
        Some(org) => Filter::new().eq("organization_id", org),
        None => Filter::new(),
    }
}

// ---------------------------------------------------------------------------
// Vehicles
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v2/lpr/vehicles",
    params(PageQuery, VehicleQuery),
    responses((status = 200, description = "Paginated vehicles", body = [LprVehicle])),
    tag = "LPR",
    security(("bearer_auth" = []))
)]
pub async fn list_vehicles(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<VehicleQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LPR, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::Lpr).await?;
    let page = PageParams::from(&*page);

    let filter = Filter::tenant(auth.scope(), "")
        .eq_opt("owner_type", query.owner_type.map(|o| o.to_string()))
        .eq_opt("is_authorized", query.is_authorized)
        .search(&["plate_number", "make", "model", "color"], query.search.as_deref());

    let total = count_rows(pool.get_ref(), "lpr_vehicles", &filter).await?;

    let sql = format!(
        "SELECT {VEHICLE_COLUMNS} FROM lpr_vehicles{} ORDER BY plate_number LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, LprVehicle>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Vehicles retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/lpr/vehicles/{id}",
    params(("id" = u64, Path, description = "Vehicle id")),
    responses(
        (status = 200, description = "Vehicle", body = LprVehicle),
        (status = 404, description = "Vehicle not found")
    ),
    tag = "LPR",
    security(("bearer_auth" = []))
)]
pub async fn get_vehicle(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LPR, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::Lpr).await?;
    let vehicle = fetch_vehicle(pool.get_ref(), path.into_inner(), auth.scope()).await?;
    Ok(response::ok("Vehicle retrieved", vehicle))
}

#[utoipa::path(
    post,
    path = "/api/v2/lpr/vehicles",
    request_body = CreateVehicle,
    responses(
        (status = 201, description = "Vehicle registered", body = LprVehicle),
        (status = 400, description = "Invalid plate or owner"),
        (status = 409, description = "Plate already registered")
    ),
    tag = "LPR",
    security(("bearer_auth" = []))
)]
pub async fn create_vehicle(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateVehicle>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LPR, action::CREATE)?;
    let org = auth.target_org(payload.organization_id)?;
    require_feature(pool.get_ref(), &auth, Some(org), Feature::Lpr).await?;

    let plate = plate(&payload.plate_number)?;
    let owner = payload.owner_type.unwrap_or_default();
    check_owner(owner, payload.employee_id, payload.visitor_id)?;

    ensure_reference(pool.get_ref(), "employees", payload.employee_id, org, "employee_id").await?;
    ensure_reference(pool.get_ref(), "visitors", payload.visitor_id, org, "visitor_id").await?;
    ensure_plate_free(pool.get_ref(), org, &plate, None).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO lpr_vehicles
            (organization_id, plate_number, owner_type, employee_id, visitor_id, make, model, color,
             is_authorized, notes)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(&plate)
    .bind(owner.as_ref())
    .bind(payload.employee_id)
    .bind(payload.visitor_id)
    .bind(payload.make.as_deref())
    .bind(payload.model.as_deref())
    .bind(payload.color.as_deref())
    .bind(payload.is_authorized.unwrap_or(true))
    .bind(payload.notes.as_deref())
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::LPR,
        Some(id),
        json!({ "plate_number": plate, "owner_type": owner }),
    )
    .await;

    let vehicle = fetch_vehicle(pool.get_ref(), id, TenantScope::All).await?;
    Ok(response::created("Vehicle registered", vehicle))
}

#[utoipa::path(
    put,
    path = "/api/v2/lpr/vehicles/{id}",
    params(("id" = u64, Path, description = "Vehicle id")),
    request_body = UpdateVehicle,
    responses(
        (status = 200, description = "Vehicle updated", body = LprVehicle),
        (status = 404, description = "Vehicle not found"),
        (status = 409, description = "Plate already registered")
    ),
    tag = "LPR",
    security(("bearer_auth" = []))
)]
pub async fn update_vehicle(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<UpdateVehicle>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LPR, action::UPDATE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::Lpr).await?;
    let id = path.into_inner();

    let plate = payload.plate_number.as_deref().map(plate).transpose()?;
    let current = fetch_vehicle(pool.get_ref(), id, auth.scope()).await?;
    let org = current.organization_id;

    // The owner check runs over the merged row.
    let owner = match payload.owner_type {
        Some(o) => o,
        None => current.owner_type.parse().unwrap_or_default(),
    };
    check_owner(
        owner,
        payload.employee_id.or(current.employee_id),
        payload.visitor_id.or(current.visitor_id),
    )?;

    ensure_reference(pool.get_ref(), "employees", payload.employee_id, org, "employee_id").await?;
    ensure_reference(pool.get_ref(), "visitors", payload.visitor_id, org, "visitor_id").await?;
    if let Some(p) = plate.as_deref() {
        if p != current.plate_number {
            ensure_plate_free(pool.get_ref(), org, p, Some(id)).await?;
        }
    }

    let set = UpdateSet::new()
        .set_opt("plate_number", plate.clone())
        .set_opt("owner_type", payload.owner_type.map(|o| o.to_string()))
        .set_opt("employee_id", payload.employee_id)
        .set_opt("visitor_id", payload.visitor_id)
        .set_opt("make", payload.make.clone())
        .set_opt("model", payload.model.clone())
        .set_opt("color", payload.color.clone())
        .set_opt("is_authorized", payload.is_authorized)
        .set_opt("notes", payload.notes.clone());

    let update = build_update_sql("lpr_vehicles", set, id, auth.scope())?;
    execute_update(pool.get_ref(), update).await?;

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Update,
        resource::LPR,
        Some(id),
        json!({ "plate_number": plate, "is_authorized": payload.is_authorized }),
    )
    .await;

    let vehicle = fetch_vehicle(pool.get_ref(), id, auth.scope()).await?;
    Ok(response::ok("Vehicle updated", vehicle))
}

#[utoipa::path(
    delete,
    path = "/api/v2/lpr/vehicles/{id}",
    params(("id" = u64, Path, description = "Vehicle id"), DeleteQuery),
    responses(
        (status = 200, description = "Vehicle deleted"),
        (status = 404, description = "Vehicle not found")
    ),
    tag = "LPR",
    security(("bearer_auth" = []))
)]
pub async fn delete_vehicle(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<DeleteQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LPR, action::DELETE)?;
    require_feature(pool.get_ref(), &auth, None, Feature::Lpr).await?;
    let hard = query.resolve(&auth)?;
    let id = path.into_inner();

    let mut tx = pool.begin().await?;
    if hard {
        // Keep the log history, drop the link.
        sqlx::query("UPDATE lpr_logs SET vehicle_id = NULL WHERE vehicle_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    if delete_row(&mut *tx, "lpr_vehicles", id, auth.scope(), hard).await? == 0 {
        return Err(ApiError::not_found("Vehicle"));
    }
    tx.commit().await?;

    audit::record(
        pool.get_ref(),
        &auth,
        None,
        AuditAction::Delete,
        resource::LPR,
        Some(id),
        json!({ "hard": hard }),
    )
    .await;

    Ok(response::message("Vehicle deleted"))
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// Records one recognized plate and decides access from the matching
/// vehicle.
#[utoipa::path(
    post,
    path = "/api/v2/lpr/logs",
    request_body = IngestPlate,
    responses(
        (status = 201, description = "Plate logged with an access decision", body = LprLog),
        (status = 400, description = "Invalid plate, confidence or camera")
    ),
    tag = "LPR",
    security(("bearer_auth" = []))
)]
pub async fn ingest_plate(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<IngestPlate>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LPR, action::CREATE)?;
    let org = auth.target_org(payload.organization_id)?;
    require_feature(pool.get_ref(), &auth, Some(org), Feature::Lpr).await?;

    let normalized = plate(&payload.plate_number)?;
    validate_confidence(payload.confidence).map_err(ApiError::validation)?;
    ensure_reference(pool.get_ref(), "cameras", payload.camera_id, org, "camera_id").await?;

    let vehicle = sqlx::query_as::<_, (u64, bool)>(
        r#"
        SELECT id, is_authorized FROM lpr_vehicles
        WHERE organization_id = ? AND plate_number = ? AND deleted_at IS NULL
        LIMIT 1
        "#,
    )
    .bind(org)
    .bind(&normalized)
    .fetch_optional(pool.get_ref())
    .await?;

    let decision = AccessDecision::decide(vehicle.map(|(_, authorized)| authorized));
    let captured_at = payload.captured_at.unwrap_or_else(|| Utc::now().naive_utc());

    let result = sqlx::query(
        r#"
        INSERT INTO lpr_logs
            (organization_id, camera_id, vehicle_id, plate_number, normalized_plate, direction,
             confidence, access_decision, captured_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org)
    .bind(payload.camera_id)
    .bind(vehicle.map(|(id, _)| id))
    .bind(payload.plate_number.trim())
    .bind(&normalized)
    .bind(payload.direction.as_ref())
    .bind(payload.confidence)
    .bind(decision.as_ref())
    .bind(captured_at)
    .execute(pool.get_ref())
    .await?;

    let id = result.last_insert_id();

    match decision {
        AccessDecision::Granted => info!(plate = %normalized, direction = %payload.direction, "Vehicle access granted"),
        _ => warn!(plate = %normalized, direction = %payload.direction, decision = %decision, "Vehicle access not granted"),
    }

    audit::record(
        pool.get_ref(),
        &auth,
        Some(org),
        AuditAction::Create,
        resource::LPR,
        Some(id),
        json!({ "plate": normalized, "decision": decision, "camera_id": payload.camera_id }),
    )
    .await;

    let log = sqlx::query_as::<_, LprLog>(&format!(
        "SELECT {LPR_LOG_COLUMNS} FROM lpr_logs WHERE id = ?"
    ))
    .bind(id)
    .fetch_one(pool.get_ref())
    .await?;

    Ok(response::created("Plate logged", log))
}

#[utoipa::path(
    get,
    path = "/api/v2/lpr/logs",
    params(PageQuery, LprLogQuery),
    responses((status = 200, description = "Paginated plate log, newest first", body = [LprLog])),
    tag = "LPR",
    security(("bearer_auth" = []))
)]
pub async fn list_logs(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    page: web::Query<PageQuery>,
    query: web::Query<LprLogQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LPR, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::Lpr).await?;
    let page = PageParams::from(&*page);

    if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
        if start > end {
            return Err(ApiError::validation("start_date must not be after end_date"));
        }
    }
    let normalized = query.plate_number.as_deref().map(plate).transpose()?;
    let from = query.start_date.map(|d| d.and_time(NaiveTime::MIN));
    let until = query
        .end_date
        .and_then(|d| d.succ_opt())
        .map(|d| d.and_time(NaiveTime::MIN));

    let filter = log_filter(&auth)
        .eq_opt("camera_id", query.camera_id)
        .eq_opt("vehicle_id", query.vehicle_id)
        .eq_opt("direction", query.direction.map(|d| d.to_string()))
        .eq_opt("access_decision", query.access_decision.map(|d| d.to_string()))
        .eq_opt("normalized_plate", normalized)
        .cmp_opt("captured_at", ">=", from)
        .cmp_opt("captured_at", "<", until);

    let total = count_rows(pool.get_ref(), "lpr_logs", &filter).await?;

    let sql = format!(
        "SELECT {LPR_LOG_COLUMNS} FROM lpr_logs{} ORDER BY captured_at DESC, id DESC LIMIT ? OFFSET ?",
        filter.where_sql()
    );
    let rows = sqlx::query_as::<_, LprLog>(&sql)
        .bind_values(filter.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::paginated("Plate logs retrieved", rows, page, total))
}

#[utoipa::path(
    get,
    path = "/api/v2/lpr/logs/{id}",
    params(("id" = u64, Path, description = "Log id")),
    responses(
        (status = 200, description = "Plate log entry", body = LprLog),
        (status = 404, description = "Log not found")
    ),
    tag = "LPR",
    security(("bearer_auth" = []))
)]
pub async fn get_log(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require(resource::LPR, action::READ)?;
    require_feature(pool.get_ref(), &auth, None, Feature::Lpr).await?;

    let filter = log_filter(&auth).eq("id", path.into_inner());
    let sql = format!("SELECT {LPR_LOG_COLUMNS} FROM lpr_logs{}", filter.where_sql());

    let log = sqlx::query_as::<_, LprLog>(&sql)
        .bind_values(filter.values())
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| ApiError::not_found("Plate log"))?;

    Ok(response::ok("Plate log retrieved", log))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_links_follow_owner_type() {
        assert!(check_owner(OwnerType::Employee, Some(1), None).is_ok());
        assert!(check_owner(OwnerType::Employee, None, None).is_err());
        assert!(check_owner(OwnerType::Visitor, None, Some(2)).is_ok());
        assert!(check_owner(OwnerType::Visitor, Some(1), None).is_err());
        assert!(check_owner(OwnerType::Other, None, None).is_ok());
        assert!(check_owner(OwnerType::Other, Some(1), Some(2)).is_err());
    }

    #[test]
    fn bad_plates_are_validation_errors() {
        assert_eq!(plate("ab-12").unwrap(), "AB12");
        assert!(matches!(plate("?"), Err(ApiError::Validation(_))));
    }
}
