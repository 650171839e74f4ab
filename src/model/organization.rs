use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use utoipa::ToSchema;

use crate::subscription::Tier;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 1,
    "name": "Acme Corp",
    "slug": "acme",
    "email": "ops@acme.test",
    "phone": null,
    "address": null,
    "timezone": "UTC",
    "subscription_tier": "basic",
    "settings": {"work_week": [1, 2, 3, 4, 5]},
    "is_active": true,
    "created_at": "2026-01-01T00:00:00Z",
    "updated_at": "2026-01-01T00:00:00Z"
}))]
pub struct Organization {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub timezone: String,
    pub subscription_tier: String,
    #[schema(value_type = Option<Object>)]
    pub settings: Option<Json<Value>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const ORGANIZATION_COLUMNS: &str = "id, name, slug, email, phone, address, timezone, \
     subscription_tier, settings, is_active, created_at, updated_at";

impl Organization {
    /// Unknown tier strings fall back to the most restrictive plan.
    pub fn tier(&self) -> Tier {
        self.subscription_tier.parse().unwrap_or(Tier::Free)
    }
}

/// Slugs are lowercase ASCII letters, digits and single dashes.
pub fn validate_slug(slug: &str) -> Result<(), String> {
    let ok = (2..=100).contains(&slug.len())
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--");

    if ok {
        Ok(())
    } else {
        Err("slug must be 2-100 characters of lowercase letters, digits and single dashes".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_rules() {
        assert!(validate_slug("acme-corp").is_ok());
        assert!(validate_slug("a").is_err());
        assert!(validate_slug("Acme").is_err());
        assert!(validate_slug("-acme").is_err());
        assert!(validate_slug("ac--me").is_err());
    }
}
