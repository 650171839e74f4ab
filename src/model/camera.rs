use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Camera {
    pub id: u64,
    pub organization_id: u64,
    pub location_id: Option<u64>,
    #[schema(example = "Lobby entrance")]
    pub name: String,
    #[schema(example = "rtsp://10.0.0.12/stream1")]
    pub stream_url: Option<String>,
    #[schema(example = "attendance")]
    pub camera_type: String,
    #[schema(example = "online")]
    pub status: String,
    #[schema(value_type = Option<Object>)]
    pub device_info: Option<Json<Value>>,
    pub last_seen_at: Option<NaiveDateTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const CAMERA_COLUMNS: &str = "id, organization_id, location_id, name, stream_url, camera_type, \
     status, device_info, last_seen_at, created_at, updated_at";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CameraType {
    Attendance,
    Visitor,
    Lpr,
    #[default]
    General,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CameraStatus {
    Online,
    #[default]
    Offline,
    Maintenance,
}
