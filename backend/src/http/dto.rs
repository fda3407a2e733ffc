//! Data Transfer Objects for the HTTP API.
//!
//! Field names on the legacy endpoints follow what existing devices and
//! dashboards already send and read (`maxbpm`, `av6`, `heartifyID`, `maxBPM`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::models::WireChange;
pub use crate::services::{DailyReading, MonthlySummary, WeeklySummary};

use crate::models::{HeartRate, NewSample, Sample, SampleId, Scope};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    /// Currently registered realtime connections
    pub connections: usize,
}

/// Body of the legacy `POST /insertData` call.
///
/// Every field is optional on the wire so that a missing value is reported as
/// "Invalid data" rather than a deserialization error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsertData {
    #[serde(default)]
    pub maxbpm: Option<u32>,
    #[serde(default)]
    pub av6: Option<u32>,
    #[serde(default)]
    pub minbpm: Option<u32>,
    #[serde(rename = "heartifyID", default)]
    pub heartify_id: Option<String>,
}

impl InsertData {
    /// `None` when any BPM value is missing or zero.
    pub fn into_new_sample(self) -> Option<NewSample> {
        let nonzero = |v: Option<u32>| v.filter(|v| *v != 0);
        let heart_rate = HeartRate::new(
            nonzero(self.maxbpm)?,
            nonzero(self.av6)?,
            nonzero(self.minbpm)?,
        );
        let owner = self.heartify_id.as_deref().and_then(Scope::parse);
        Some(NewSample::new(owner, heart_rate))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertDataResponse {
    pub message: String,
    pub data: SampleDto,
}

/// Stored sample as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleDto {
    #[serde(rename = "_id")]
    pub id: SampleId,
    #[serde(rename = "heartifyID", skip_serializing_if = "Option::is_none")]
    pub owner: Option<Scope>,
    #[serde(rename = "maxBPM")]
    pub max_bpm: u32,
    #[serde(rename = "avgBPM")]
    pub avg_bpm: u32,
    #[serde(rename = "minBPM")]
    pub min_bpm: u32,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<Sample> for SampleDto {
    fn from(sample: Sample) -> Self {
        Self {
            id: sample.id,
            max_bpm: sample.max_bpm(),
            avg_bpm: sample.avg_bpm(),
            min_bpm: sample.min_bpm(),
            owner: sample.owner,
            created_at: sample.created_at,
        }
    }
}

/// Body of `POST /v1/samples` and `PUT /v1/samples/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRequest {
    #[serde(rename = "maxBPM")]
    pub max_bpm: u32,
    #[serde(rename = "avgBPM")]
    pub avg_bpm: u32,
    #[serde(rename = "minBPM")]
    pub min_bpm: u32,
    #[serde(default)]
    pub scope: Option<String>,
}

impl SampleRequest {
    pub fn heart_rate(&self) -> HeartRate {
        HeartRate::new(self.max_bpm, self.avg_bpm, self.min_bpm)
    }
}

/// `?scope=` filter for read endpoints. Absent or blank means every owner.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopeQuery {
    #[serde(default)]
    pub scope: Option<String>,
}

impl ScopeQuery {
    pub fn scope(&self) -> Option<Scope> {
        self.scope.as_deref().and_then(Scope::parse)
    }
}
