use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::rbac::Permissions;

#[derive(Deserialize, ToSchema)]
pub struct RegisterReq {
    #[schema(example = "Acme Corp")]
    pub organization_name: String,
    #[schema(example = "acme")]
    pub organization_slug: String,
    #[schema(example = "acme.admin")]
    pub username: String,
    #[schema(example = "admin@acme.test")]
    pub email: String,
    #[schema(example = "changeme123")]
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginReqDto {
    #[schema(example = "acme.admin")]
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ChangePasswordReq {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: usize,
}

/// User joined with its role, as needed to issue tokens.
#[derive(FromRow)]
pub struct UserSql {
    pub id: u64,
    pub username: String,
    pub password: String,
    pub organization_id: Option<u64>,
    pub employee_id: Option<u64>,
    pub is_active: bool,
    pub role_name: String,
    pub role_level: i32,
    pub role_permissions: sqlx::types::Json<Permissions>,
    pub organization_active: Option<bool>,
}

pub const USER_WITH_ROLE_SQL: &str = r#"
    SELECT u.id, u.username, u.password, u.organization_id, u.employee_id, u.is_active,
           r.name AS role_name, r.level AS role_level, r.permissions AS role_permissions,
           o.is_active AS organization_active
    FROM users u
    JOIN roles r ON r.id = u.role_id
    LEFT JOIN organizations o ON o.id = u.organization_id AND o.deleted_at IS NULL
    WHERE u.deleted_at IS NULL
"#;

impl UserSql {
    /// Inactive users and users of inactive or deleted organizations cannot
    /// authenticate. Platform users (no organization) only need to be active.
    pub fn can_authenticate(&self) -> bool {
        self.is_active
            && match self.organization_id {
                Some(_) => self.organization_active.unwrap_or(false),
                None => true,
            }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    pub organization_id: Option<u64>,
    pub role: String,
    pub role_level: i32,
    pub permissions: Permissions,
    pub exp: usize,
    pub jti: String,

    pub token_type: TokenType,
    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum TokenType {
    Access,
    Refresh,
}
