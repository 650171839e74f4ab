use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct LprVehicle {
    pub id: u64,
    pub organization_id: u64,
    /// Stored normalized
    #[schema(example = "DHAKAGA1234")]
    pub plate_number: String,
    #[schema(example = "employee")]
    pub owner_type: String,
    pub employee_id: Option<u64>,
    pub visitor_id: Option<u64>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
    pub is_authorized: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const VEHICLE_COLUMNS: &str = "id, organization_id, plate_number, owner_type, employee_id, \
     visitor_id, make, model, color, is_authorized, notes, created_at, updated_at";

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct LprLog {
    pub id: u64,
    pub organization_id: u64,
    pub camera_id: Option<u64>,
    pub vehicle_id: Option<u64>,
    /// As recognized
    #[schema(example = "dhaka-ga 12-34")]
    pub plate_number: String,
    #[schema(example = "DHAKAGA1234")]
    pub normalized_plate: String,
    #[schema(example = "entry")]
    pub direction: String,
    #[schema(example = 0.93)]
    pub confidence: f64,
    #[schema(example = "granted")]
    pub access_decision: String,
    pub captured_at: NaiveDateTime,
    pub created_at: DateTime<Utc>,
}

pub const LPR_LOG_COLUMNS: &str = "id, organization_id, camera_id, vehicle_id, plate_number, \
     normalized_plate, direction, confidence, access_decision, captured_at, created_at";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OwnerType {
    Employee,
    Visitor,
    #[default]
    Other,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    Entry,
    Exit,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccessDecision {
    Granted,
    Denied,
    Unknown,
}

impl AccessDecision {
    /// `None` when the plate matched no registered vehicle.
    pub fn decide(is_authorized: Option<bool>) -> Self {
        match is_authorized {
            Some(true) => AccessDecision::Granted,
            Some(false) => AccessDecision::Denied,
            None => AccessDecision::Unknown,
        }
    }
}

/// Uppercase alphanumerics only, 2 to 15 characters after stripping.
pub fn normalize_plate(raw: &str) -> Result<String, String> {
    let plate: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if (2..=15).contains(&plate.len()) {
        Ok(plate)
    } else {
        Err(format!("'{raw}' is not a valid plate number"))
    }
}

pub fn validate_confidence(confidence: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err("confidence must be between 0 and 1".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plates_are_normalized() {
        assert_eq!(normalize_plate("dhaka-ga 12-34").unwrap(), "DHAKAGA1234");
        assert_eq!(normalize_plate(" ab 1 ").unwrap(), "AB1");
        assert!(normalize_plate("-").is_err());
        assert!(normalize_plate("A").is_err());
        assert!(normalize_plate("ABCDEFGHIJ1234567").is_err());
    }

    #[test]
    fn decision_follows_vehicle_authorization() {
        assert_eq!(AccessDecision::decide(Some(true)), AccessDecision::Granted);
        assert_eq!(AccessDecision::decide(Some(false)), AccessDecision::Denied);
        assert_eq!(AccessDecision::decide(None), AccessDecision::Unknown);
    }

    #[test]
    fn confidence_range() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(1.01).is_err());
        assert!(validate_confidence(f64::NAN).is_err());
    }
}
