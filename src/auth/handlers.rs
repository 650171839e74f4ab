use crate::{
    api::user::fetch_user,
    audit::{self, AuditAction},
    auth::{
        auth::{AuthUser, ClientInfo},
        jwt::{TokenSubject, generate_access_token, generate_refresh_token, verify_token},
        password::{check_strength, hash_password, verify_password},
        username_index,
    },
    config::Config,
    error::{ApiError, ApiResult},
    model::{employee::validate_email, organization::validate_slug, user::validate_username},
    models::{
        ChangePasswordReq, LoginReqDto, RegisterReq, TokenPair, TokenType, USER_WITH_ROLE_SQL,
        UserSql,
    },
    rbac::{SystemRole, TenantScope, resource},
    response,
    subscription::Tier,
};
use actix_web::{HttpRequest, HttpResponse, web};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument, warn};

fn bearer(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// The principal a token would carry, for audit rows written before a
/// token exists.
fn principal(user: &UserSql, req: &HttpRequest) -> AuthUser {
    AuthUser {
        user_id: user.id,
        username: user.username.clone(),
        organization_id: user.organization_id,
        role: user.role_name.clone(),
        role_level: user.role_level,
        permissions: user.role_permissions.0.clone(),
        employee_id: user.employee_id,
        client: ClientInfo::from_request(req),
    }
}

async fn find_by_username(pool: &MySqlPool, username: &str) -> ApiResult<Option<UserSql>> {
    let sql = format!("{USER_WITH_ROLE_SQL} AND LOWER(u.username) = ?");
    let user = sqlx::query_as::<_, UserSql>(&sql)
        .bind(username_index::normalize(username))
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

async fn find_by_id(pool: &MySqlPool, id: u64) -> ApiResult<Option<UserSql>> {
    let sql = format!("{USER_WITH_ROLE_SQL} AND u.id = ?");
    let user = sqlx::query_as::<_, UserSql>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Signs an access/refresh pair and persists the refresh token's `jti`.
async fn issue_tokens(pool: &MySqlPool, config: &Config, user: &UserSql) -> ApiResult<TokenPair> {
    let subject = TokenSubject::from(user);

    let access_token =
        generate_access_token(&subject, &config.jwt_secret, config.access_token_ttl)?;
    let (refresh_token, refresh_claims) =
        generate_refresh_token(&subject, &config.jwt_secret, config.refresh_token_ttl)?;

    debug!(user_id = user.id, jti = %refresh_claims.jti, "Storing refresh token");

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(user.id)
    .bind(&refresh_claims.jti)
    .bind(refresh_claims.exp as i64)
    .execute(pool)
    .await?;

    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: config.access_token_ttl,
    })
}

/// Self-service signup: a new organization on the free tier plus its
/// first administrator.
#[utoipa::path(
    post,
    path = "/api/v2/auth/register",
    request_body = RegisterReq,
    responses(
        (status = 201, description = "Organization and admin created; tokens issued", body = TokenPair),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Slug or username already taken"),
        (status = 429, description = "Too many requests")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_register",
    skip(pool, config, payload, req),
    fields(username = %payload.username, slug = %payload.organization_slug)
)]
pub async fn register(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<RegisterReq>,
) -> ApiResult<HttpResponse> {
    info!("Registration request received");

    let name = payload.organization_name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("organization_name must not be empty"));
    }
    let slug = payload.organization_slug.trim().to_lowercase();
    validate_slug(&slug).map_err(ApiError::validation)?;
    let username = username_index::normalize(&payload.username);
    validate_username(&username).map_err(ApiError::validation)?;
    validate_email(payload.email.trim()).map_err(ApiError::validation)?;
    check_strength(&payload.password).map_err(ApiError::validation)?;

    let slug_taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM organizations WHERE slug = ?")
        .bind(&slug)
        .fetch_one(pool.get_ref())
        .await?;
    if slug_taken > 0 {
        return Err(ApiError::conflict(format!("Organization slug '{slug}' is already taken")));
    }
    if !username_index::is_available(pool.get_ref(), &username).await? {
        return Err(ApiError::conflict("Username already taken"));
    }

    let admin_role = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM roles WHERE organization_id IS NULL AND name = ? AND deleted_at IS NULL",
    )
    .bind(SystemRole::OrgAdmin.as_ref())
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::Internal("system role org_admin is not seeded".into()))?;

    let hashed = hash_password(&payload.password)?;

    let mut tx = pool.begin().await?;

    let org_id = sqlx::query(
        r#"
        INSERT INTO organizations (name, slug, email, subscription_tier)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(name)
    .bind(&slug)
    .bind(payload.email.trim())
    .bind(Tier::Free.as_ref())
    .execute(&mut *tx)
    .await?
    .last_insert_id();

    let user_id = sqlx::query(
        r#"
        INSERT INTO users (organization_id, role_id, username, email, password)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(org_id)
    .bind(admin_role)
    .bind(&username)
    .bind(payload.email.trim())
    .bind(&hashed)
    .execute(&mut *tx)
    .await?
    .last_insert_id();

    tx.commit().await?;
    username_index::remember(&username).await;

    info!(organization_id = org_id, user_id, "Organization registered");

    let user = find_by_id(pool.get_ref(), user_id)
        .await?
        .ok_or_else(|| ApiError::Internal("registered user vanished".into()))?;

    audit::record(
        pool.get_ref(),
        &principal(&user, &req),
        Some(org_id),
        AuditAction::Create,
        resource::ORGANIZATIONS,
        Some(org_id),
        json!({ "slug": slug, "admin_username": username, "self_service": true }),
    )
    .await;

    let tokens = issue_tokens(pool.get_ref(), &config, &user).await?;
    Ok(response::created("Organization registered", tokens))
}

#[utoipa::path(
    post,
    path = "/api/v2/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Tokens issued", body = TokenPair),
        (status = 401, description = "Invalid credentials or disabled account"),
        (status = 429, description = "Too many requests")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, payload, req),
    fields(username = %payload.username)
)]
pub async fn login(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<LoginReqDto>,
) -> ApiResult<HttpResponse> {
    info!("Login request received");

    if payload.username.trim().is_empty() || payload.password.is_empty() {
        info!("Validation failed: empty username or password");
        return Err(ApiError::validation("Username and password are required"));
    }

    debug!("Fetching user from database");

    let user = match find_by_username(pool.get_ref(), &payload.username).await? {
        Some(user) => {
            debug!(user_id = user.id, "User found");
            user
        }
        None => {
            info!("Invalid credentials: user not found");
            return Err(ApiError::Unauthorized("Invalid credentials".into()));
        }
    };

    if let Err(e) = verify_password(&payload.password, &user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    if !user.can_authenticate() {
        warn!(user_id = user.id, "Login refused: account or organization inactive");
        return Err(ApiError::Unauthorized("Account is disabled".into()));
    }

    let tokens = issue_tokens(pool.get_ref(), &config, &user).await?;

    // Non-fatal.
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = UTC_TIMESTAMP() WHERE id = ?")
        .bind(user.id)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    audit::record(
        pool.get_ref(),
        &principal(&user, &req),
        user.organization_id,
        AuditAction::Login,
        resource::USERS,
        Some(user.id),
        json!({}),
    )
    .await;

    info!(user_id = user.id, "Login successful");

    Ok(response::ok("Login successful", tokens))
}

/// Rotates a refresh token sent as `Authorization: Bearer <refresh_token>`.
#[utoipa::path(
    post,
    path = "/api/v2/auth/refresh",
    responses(
        (status = 200, description = "New token pair; the old refresh token is revoked", body = TokenPair),
        (status = 401, description = "Missing, invalid, revoked or reused refresh token")
    ),
    tag = "Auth",
    security(("bearer_auth" = []))
)]
#[instrument(name = "auth_refresh", skip_all)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let token = bearer(&req).ok_or_else(|| ApiError::Unauthorized("Refresh token required".into()))?;

    let claims = verify_token(token, &config.jwt_secret).map_err(|e| {
        debug!(error = %e, "Rejected refresh token");
        ApiError::Unauthorized("Invalid or expired token".into())
    })?;

    if claims.token_type != TokenType::Refresh {
        return Err(ApiError::Unauthorized("Refresh token required".into()));
    }

    let mut tx = pool.begin().await?;

    let record = sqlx::query_as::<_, (u64, u64, bool)>(
        "SELECT id, user_id, revoked FROM refresh_tokens WHERE jti = ? FOR UPDATE",
    )
    .bind(&claims.jti)
    .fetch_optional(&mut *tx)
    .await?;

    let (token_id, user_id) = match record {
        Some((id, user_id, false)) => (id, user_id),
        Some((_, user_id, true)) => {
            // A rotated token came back: treat the whole family as stolen.
            warn!(user_id, jti = %claims.jti, "Revoked refresh token reused");
            sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Err(ApiError::Unauthorized("Refresh token has been revoked".into()));
        }
        None => return Err(ApiError::Unauthorized("Unknown refresh token".into())),
    };

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
        .bind(token_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    // Role and permissions are re-read so changes apply on the next refresh.
    let user = match find_by_id(pool.get_ref(), user_id).await? {
        Some(u) if u.can_authenticate() => u,
        _ => return Err(ApiError::Unauthorized("Account is disabled".into())),
    };

    let tokens = issue_tokens(pool.get_ref(), &config, &user).await?;
    debug!(user_id, "Refresh token rotated");

    Ok(response::ok("Token refreshed", tokens))
}

/// Revokes the refresh token in the Authorization header. Always 204.
#[utoipa::path(
    post,
    path = "/api/v2/auth/logout",
    responses((status = 204, description = "Logged out")),
    tag = "Auth",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> HttpResponse {
    let claims = match bearer(&req).map(|t| verify_token(t, &config.jwt_secret)) {
        Some(Ok(c)) if c.token_type == TokenType::Refresh => c,
        _ => return HttpResponse::NoContent().finish(),
    };

    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}

#[utoipa::path(
    get,
    path = "/api/v2/auth/me",
    responses(
        (status = 200, description = "The authenticated user, role level and permissions"),
        (status = 401, description = "Missing or invalid token")
    ),
    tag = "Auth",
    security(("bearer_auth" = []))
)]
pub async fn me(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<HttpResponse> {
    let user = fetch_user(pool.get_ref(), auth.user_id, TenantScope::All).await?;

    Ok(response::ok(
        "Current user",
        json!({
            "user": user,
            "role_level": auth.role_level,
            "permissions": auth.permissions,
        }),
    ))
}

#[utoipa::path(
    put,
    path = "/api/v2/auth/password",
    request_body = ChangePasswordReq,
    responses(
        (status = 200, description = "Password changed; refresh tokens revoked"),
        (status = 400, description = "Wrong current password or weak new password")
    ),
    tag = "Auth",
    security(("bearer_auth" = []))
)]
#[instrument(name = "auth_change_password", skip_all, fields(user_id = auth.user_id))]
pub async fn change_password(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<ChangePasswordReq>,
) -> ApiResult<HttpResponse> {
    let stored = sqlx::query_scalar::<_, String>(
        "SELECT password FROM users WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(auth.user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::not_found("User"))?;

    if verify_password(&payload.current_password, &stored).is_err() {
        info!("Password change refused: current password mismatch");
        return Err(ApiError::validation("Current password is incorrect"));
    }
    check_strength(&payload.new_password).map_err(ApiError::validation)?;
    if payload.new_password == payload.current_password {
        return Err(ApiError::validation("New password must differ from the current one"));
    }

    let hashed = hash_password(&payload.new_password)?;

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(&hashed)
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit::record(
        pool.get_ref(),
        &auth,
        None,
        AuditAction::PasswordChange,
        resource::USERS,
        Some(auth.user_id),
        json!({}),
    )
    .await;

    info!("Password changed");

    Ok(response::message("Password changed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn bearer_is_extracted_from_the_header() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer abc.def"))
            .to_http_request();
        assert_eq!(bearer(&req), Some("abc.def"));

        let req = TestRequest::default()
            .insert_header(("Authorization", "Basic xyz"))
            .to_http_request();
        assert_eq!(bearer(&req), None);

        assert_eq!(bearer(&TestRequest::default().to_http_request()), None);
    }
}
