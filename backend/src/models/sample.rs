//! Heart-rate sample types.
//!
//! A [`Sample`] is one stored reading: a max/avg/min BPM triple recorded for an
//! optional owner. The owner is a weak reference (the user's `heartifyID`) used
//! only to scope queries and real-time delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::define_id_type;

define_id_type!(i64, SampleId);

/// Owning user identity used to target delivery and aggregation queries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    pub fn new(value: impl Into<String>) -> Self {
        Scope(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a scope from user input, rejecting blank identities.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Scope(trimmed.to_string()))
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Scope(value.to_string())
    }
}

impl From<String> for Scope {
    fn from(value: String) -> Self {
        Scope(value)
    }
}

/// A max/avg/min BPM triple.
///
/// `min ≤ avg ≤ max` is expected from well-behaved sensors but is not enforced
/// anywhere; aggregation treats each field independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeartRate {
    #[serde(rename = "maxBPM")]
    pub max_bpm: u32,
    #[serde(rename = "avgBPM")]
    pub avg_bpm: u32,
    #[serde(rename = "minBPM")]
    pub min_bpm: u32,
}

impl HeartRate {
    pub fn new(max_bpm: u32, avg_bpm: u32, min_bpm: u32) -> Self {
        Self {
            max_bpm,
            avg_bpm,
            min_bpm,
        }
    }

    /// Whether the triple satisfies `min ≤ avg ≤ max`.
    pub fn is_ordered(&self) -> bool {
        self.min_bpm <= self.avg_bpm && self.avg_bpm <= self.max_bpm
    }
}

/// A stored heart-rate reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "_id")]
    pub id: SampleId,
    #[serde(rename = "heartifyID", default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Scope>,
    #[serde(flatten)]
    pub heart_rate: HeartRate,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Sample {
    pub fn max_bpm(&self) -> u32 {
        self.heart_rate.max_bpm
    }

    pub fn avg_bpm(&self) -> u32 {
        self.heart_rate.avg_bpm
    }

    pub fn min_bpm(&self) -> u32 {
        self.heart_rate.min_bpm
    }

    pub fn belongs_to(&self, scope: Option<&Scope>) -> bool {
        match scope {
            Some(scope) => self.owner.as_ref() == Some(scope),
            None => true,
        }
    }
}

/// A sample about to be inserted. The store assigns `id` and `createdAt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSample {
    #[serde(rename = "heartifyID", default)]
    pub owner: Option<Scope>,
    #[serde(flatten)]
    pub heart_rate: HeartRate,
}

impl NewSample {
    pub fn new(owner: Option<Scope>, heart_rate: HeartRate) -> Self {
        Self { owner, heart_rate }
    }

    pub fn owned_by(owner: impl Into<Scope>, max_bpm: u32, avg_bpm: u32, min_bpm: u32) -> Self {
        Self {
            owner: Some(owner.into()),
            heart_rate: HeartRate::new(max_bpm, avg_bpm, min_bpm),
        }
    }
}
