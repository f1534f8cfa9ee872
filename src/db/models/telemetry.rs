use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::DetectionPoint;

/// A pending telemetry row as the rover uploaded it.
#[derive(Debug, Clone, Serialize)]
pub struct StagingRecord {
    pub id: i64,
    pub rover_id: i64,
    pub random_id: i64,
    pub battery_status: f64,
    pub temp: f64,
    pub humidity: f64,
    /// Base64 image, optionally data-URI prefixed. Never echoed back to clients.
    #[serde(skip_serializing)]
    pub result_image: String,
    /// JSON-encoded point list.
    pub image_data: String,
    pub created_at: DateTime<Utc>,
}

impl StagingRecord {
    pub fn points(&self) -> Result<Vec<DetectionPoint>> {
        serde_json::from_str(&self.image_data)
            .with_context(|| format!("operation {} has malformed image_data", self.id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStagingRecord {
    pub rover_id: i64,
    pub random_id: i64,
    pub battery_status: f64,
    pub temp: f64,
    pub humidity: f64,
    pub result_image: String,
    #[serde(default)]
    pub image_data: Vec<DetectionPoint>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// The durable form of a drained [`StagingRecord`]. The inline image is
/// replaced by a reference into blob storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Staging id this document was drained from.
    pub id: i64,
    pub rover_id: i64,
    pub random_id: i64,
    pub battery_status: f64,
    pub temp: f64,
    pub humidity: f64,
    pub blob_url: String,
    pub image_data: Vec<DetectionPoint>,
    pub created_at: DateTime<Utc>,
}

impl ArchiveRecord {
    pub fn from_staging(
        record: &StagingRecord,
        blob_url: String,
        image_data: Vec<DetectionPoint>,
    ) -> Self {
        Self {
            id: record.id,
            rover_id: record.rover_id,
            random_id: record.random_id,
            battery_status: record.battery_status,
            temp: record.temp,
            humidity: record.humidity,
            blob_url,
            image_data,
            created_at: record.created_at,
        }
    }

    pub fn flower_count(&self) -> u64 {
        self.image_data.len() as u64
    }
}
