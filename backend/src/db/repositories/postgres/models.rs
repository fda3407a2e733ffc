use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::schema::{heart_rate_changes, heart_rate_samples};
use crate::db::repository::{ErrorContext, RepositoryError, RepositoryResult};
use crate::models::{HeartRate, NewSample, RawChange, Sample, SampleId, Scope};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = heart_rate_samples)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[allow(dead_code)] // updated_at is maintained by the database
pub struct SampleRow {
    pub sample_id: i64,
    pub heartify_id: Option<String>,
    pub max_bpm: i32,
    pub avg_bpm: i32,
    pub min_bpm: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = heart_rate_samples)]
pub struct NewSampleRow {
    pub heartify_id: Option<String>,
    pub max_bpm: i32,
    pub avg_bpm: i32,
    pub min_bpm: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = heart_rate_changes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[allow(dead_code)]
pub struct ChangeRow {
    pub change_seq: i64,
    pub operation_type: String,
    pub sample_id: i64,
    pub heartify_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub txid: i64,
}

/// Oldest transaction still running when the snapshot was taken.
#[derive(Debug, QueryableByName)]
pub struct SnapshotHorizon {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub xmin: i64,
}

fn bpm_to_db(value: u32, field: &str) -> RepositoryResult<i32> {
    i32::try_from(value).map_err(|_| {
        RepositoryError::ValidationError {
            message: format!("{} out of range: {}", field, value),
            context: ErrorContext::new("encode_sample").with_entity("sample"),
        }
    })
}

fn bpm_from_db(value: i32, field: &str, id: i64) -> RepositoryResult<u32> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::internal_with_context(
            format!("negative {} in stored sample: {}", field, value),
            ErrorContext::new("decode_sample")
                .with_entity("sample")
                .with_entity_id(id),
        )
    })
}

pub fn heart_rate_to_row(heart_rate: &HeartRate) -> RepositoryResult<(i32, i32, i32)> {
    Ok((
        bpm_to_db(heart_rate.max_bpm, "maxBPM")?,
        bpm_to_db(heart_rate.avg_bpm, "avgBPM")?,
        bpm_to_db(heart_rate.min_bpm, "minBPM")?,
    ))
}

impl NewSampleRow {
    pub fn from_sample(sample: &NewSample) -> RepositoryResult<Self> {
        let (max_bpm, avg_bpm, min_bpm) = heart_rate_to_row(&sample.heart_rate)?;
        Ok(Self {
            heartify_id: sample.owner.as_ref().map(|o| o.as_str().to_string()),
            max_bpm,
            avg_bpm,
            min_bpm,
        })
    }
}

impl SampleRow {
    pub fn into_sample(self) -> RepositoryResult<Sample> {
        Ok(Sample {
            id: SampleId::new(self.sample_id),
            owner: self.heartify_id.map(Scope::from),
            heart_rate: HeartRate::new(
                bpm_from_db(self.max_bpm, "max_bpm", self.sample_id)?,
                bpm_from_db(self.avg_bpm, "avg_bpm", self.sample_id)?,
                bpm_from_db(self.min_bpm, "min_bpm", self.sample_id)?,
            ),
            created_at: self.created_at,
        })
    }
}

impl ChangeRow {
    pub fn outbox_key(&self) -> (i64, i64) {
        (self.txid, self.change_seq)
    }

    /// Build the feed record. `full_document` is looked up separately for
    /// inserts and updates; `None` when the row is already gone.
    pub fn into_raw_change(self, full_document: Option<Sample>) -> RawChange {
        RawChange {
            operation_type: self.operation_type,
            full_document,
            document_key: Some(SampleId::new(self.sample_id)),
            owner_hint: self.heartify_id.map(Scope::from),
        }
    }
}
