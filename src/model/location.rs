use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Location {
    pub id: u64,
    pub organization_id: u64,
    #[schema(example = "HQ - Main Gate")]
    pub name: String,
    pub address: Option<String>,
    #[schema(example = 23.7808)]
    pub latitude: Option<f64>,
    #[schema(example = 90.2792)]
    pub longitude: Option<f64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const LOCATION_COLUMNS: &str =
    "id, organization_id, name, address, latitude, longitude, is_active, created_at, updated_at";

pub fn validate_coordinates(latitude: Option<f64>, longitude: Option<f64>) -> Result<(), String> {
    if let Some(lat) = latitude {
        if !(-90.0..=90.0).contains(&lat) {
            return Err("latitude must be between -90 and 90".into());
        }
    }
    if let Some(lng) = longitude {
        if !(-180.0..=180.0).contains(&lng) {
            return Err("longitude must be between -180 and 180".into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_ranges() {
        assert!(validate_coordinates(Some(45.0), Some(-120.0)).is_ok());
        assert!(validate_coordinates(None, None).is_ok());
        assert!(validate_coordinates(Some(91.0), None).is_err());
        assert!(validate_coordinates(None, Some(-180.5)).is_err());
    }
}
