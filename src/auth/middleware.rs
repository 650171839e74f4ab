use crate::auth::auth::{AuthUser, ClientInfo};
use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::ApiError;
use crate::models::TokenType;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};

fn reject(req: ServiceRequest, message: &str) -> Result<ServiceResponse<BoxBody>, Error> {
    let resp = ApiError::Unauthorized(message.to_string()).error_response();
    Ok(req.into_response(resp))
}

pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let config = req
        .app_data::<Data<Config>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("App config missing".into()))?;

    let header_value = match req.headers().get("Authorization") {
        Some(h) => match h.to_str() {
            Ok(v) => v.to_string(),
            Err(_) => return reject(req, "Invalid Authorization header encoding"),
        },
        None => return reject(req, "Missing Authorization header"),
    };

    let token = match header_value.strip_prefix("Bearer ") {
        Some(t) => t,
        None => return reject(req, "Authorization header must start with Bearer"),
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected bearer token");
            return reject(req, "Invalid or expired token");
        }
    };

    if claims.token_type != TokenType::Access {
        return reject(req, "Access token required");
    }

    let auth_user = AuthUser {
        user_id: claims.user_id,
        username: claims.sub,
        organization_id: claims.organization_id,
        role: claims.role,
        role_level: claims.role_level,
        permissions: claims.permissions,
        employee_id: claims.employee_id,
        client: ClientInfo::from_request(req.request()),
    };

    req.extensions_mut().insert(auth_user);

    next.call(req).await
}
