use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::sensors::SensorRecord;

/// All readings taken at one instant. Fields the store had no value for are
/// omitted.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SensorRecordDto {
    pub ts: DateTime<Utc>,
    #[serde(rename = "pH", skip_serializing_if = "Option::is_none")]
    pub ph: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_moisture: Option<f64>,
    /// `true` while the tank is above its minimum level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_water_level: Option<bool>,
}

impl From<SensorRecord> for SensorRecordDto {
    fn from(r: SensorRecord) -> Self {
        Self {
            ts: r.timestamp,
            ph: r.ph,
            light: r.light,
            soil_moisture: r.soil_moisture,
            min_water_level: r.min_water_level,
        }
    }
}

/// Query string of `GET /api/data`. Both bounds are inclusive.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DataQuery {
    /// Range start (RFC3339).
    pub s: DateTime<Utc>,
    /// Range end (RFC3339).
    pub e: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LightStateDto {
    #[serde(rename = "isUp")]
    pub is_up: bool,
}

/// Request body for `POST /api/ph`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PhCommandDto {
    /// `true` raises the pH, `false` lowers it.
    pub up: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartupTimeDto {
    #[serde(rename = "lastTime")]
    pub last_time: DateTime<Utc>,
}

/// Body of every accepted command.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageDto {
    pub message: u16,
}

impl MessageDto {
    pub fn ok() -> Self {
        Self { message: 200 }
    }
}
