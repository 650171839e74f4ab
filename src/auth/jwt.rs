use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};
use uuid::Uuid;

use crate::models::{Claims, TokenType, UserSql};
use crate::rbac::Permissions;

/// Identity embedded in both token kinds.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: u64,
    pub username: String,
    pub organization_id: Option<u64>,
    pub role: String,
    pub role_level: i32,
    pub permissions: Permissions,
    pub employee_id: Option<u64>,
}

impl From<&UserSql> for TokenSubject {
    fn from(u: &UserSql) -> Self {
        Self {
            user_id: u.id,
            username: u.username.clone(),
            organization_id: u.organization_id,
            role: u.role_name.clone(),
            role_level: u.role_level,
            permissions: u.role_permissions.0.clone(),
            employee_id: u.employee_id,
        }
    }
}

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

fn claims_for(subject: &TokenSubject, token_type: TokenType, ttl: usize) -> Claims {
    Claims {
        user_id: subject.user_id,
        sub: subject.username.clone(),
        organization_id: subject.organization_id,
        role: subject.role.clone(),
        role_level: subject.role_level,
        // Refresh tokens are re-resolved against the database on use.
        permissions: match token_type {
            TokenType::Access => subject.permissions.clone(),
            TokenType::Refresh => Permissions::new(),
        },
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
        employee_id: subject.employee_id,
    }
}

pub fn generate_access_token(
    subject: &TokenSubject,
    secret: &str,
    ttl: usize,
) -> Result<String, Error> {
    let claims = claims_for(subject, TokenType::Access, ttl);

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn generate_refresh_token(
    subject: &TokenSubject,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), Error> {
    let claims = claims_for(subject, TokenType::Refresh, ttl);

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, claims))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: 7,
            username: "hr.jane".into(),
            organization_id: Some(3),
            role: "hr_manager".into(),
            role_level: 60,
            permissions: Permissions::new().grant("leave", &["approve"]),
            employee_id: Some(11),
        }
    }

    #[test]
    fn access_token_round_trips_identity() {
        let token = generate_access_token(&subject(), "secret", 60).unwrap();
        let claims = verify_token(&token, "secret").unwrap();

        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.organization_id, Some(3));
        assert_eq!(claims.token_type, TokenType::Access);
        assert!(claims.permissions.allows("leave", "approve"));
    }

    #[test]
    fn refresh_token_carries_no_permissions() {
        let (token, issued) = generate_refresh_token(&subject(), "secret", 60).unwrap();
        let claims = verify_token(&token, "secret").unwrap();

        assert_eq!(claims.token_type, TokenType::Refresh);
        assert_eq!(claims.jti, issued.jti);
        assert!(claims.permissions.is_empty());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_access_token(&subject(), "secret", 60).unwrap();
        assert!(verify_token(&token, "other").is_err());
    }

    #[test]
    fn each_token_has_a_fresh_jti() {
        let a = claims_for(&subject(), TokenType::Access, 60);
        let b = claims_for(&subject(), TokenType::Access, 60);
        assert_ne!(a.jti, b.jti);
    }
}
