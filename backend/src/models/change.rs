//! Change records: raw store notifications and the normalized events delivered
//! to live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sample::{HeartRate, Sample, SampleId, Scope};

/// Channel name every connection listens on, regardless of scope.
pub const LEGACY_CHANNEL: &str = "changeUpdate";

/// Channel name for deliveries targeted at one scope.
pub fn scoped_channel(scope: &Scope) -> String {
    format!("{}:{}", LEGACY_CHANNEL, scope)
}

/// One entry of the store's change feed, as the store reports it.
///
/// Mirrors the `{operationType, fullDocument, documentKey}` shape of document
/// store change streams. `owner_hint` carries the pre-image owner for deletes
/// when the store can provide it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChange {
    pub operation_type: String,
    #[serde(default)]
    pub full_document: Option<Sample>,
    #[serde(default)]
    pub document_key: Option<SampleId>,
    #[serde(default)]
    pub owner_hint: Option<Scope>,
}

impl RawChange {
    pub const INSERT: &'static str = "insert";
    pub const UPDATE: &'static str = "update";
    pub const DELETE: &'static str = "delete";

    pub fn insert(sample: Sample) -> Self {
        Self {
            operation_type: Self::INSERT.to_string(),
            document_key: Some(sample.id),
            owner_hint: sample.owner.clone(),
            full_document: Some(sample),
        }
    }

    pub fn update(id: SampleId, full_document: Option<Sample>) -> Self {
        Self {
            operation_type: Self::UPDATE.to_string(),
            owner_hint: full_document.as_ref().and_then(|s| s.owner.clone()),
            document_key: Some(id),
            full_document,
        }
    }

    pub fn delete(id: SampleId, owner_hint: Option<Scope>) -> Self {
        Self {
            operation_type: Self::DELETE.to_string(),
            full_document: None,
            document_key: Some(id),
            owner_hint,
        }
    }
}

/// Operation carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
    Latest,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "insert",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
            ChangeOperation::Latest => "latest",
        }
    }
}

/// A reading as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub id: SampleId,
    pub heart_rate: HeartRate,
    pub timestamp: DateTime<Utc>,
}

impl From<&Sample> for Reading {
    fn from(sample: &Sample) -> Self {
        Self {
            id: sample.id,
            heart_rate: sample.heart_rate,
            timestamp: sample.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePayload {
    /// Full reading for insert, update and latest.
    Reading(Reading),
    /// Id of a deleted sample.
    Deleted(SampleId),
    /// `latest` after the owner's last sample was deleted.
    Empty,
}

/// The normalized unit delivered to subscribers.
///
/// `scope == None` means the owner could not be resolved and the event goes
/// to every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    pub payload: ChangePayload,
    pub scope: Option<Scope>,
}

impl ChangeEvent {
    pub fn inserted(sample: &Sample) -> Self {
        Self {
            operation: ChangeOperation::Insert,
            payload: ChangePayload::Reading(sample.into()),
            scope: sample.owner.clone(),
        }
    }

    pub fn updated(sample: &Sample) -> Self {
        Self {
            operation: ChangeOperation::Update,
            payload: ChangePayload::Reading(sample.into()),
            scope: sample.owner.clone(),
        }
    }

    pub fn deleted(id: SampleId, scope: Option<Scope>) -> Self {
        Self {
            operation: ChangeOperation::Delete,
            payload: ChangePayload::Deleted(id),
            scope,
        }
    }

    pub fn latest(scope: Option<Scope>, sample: Option<&Sample>) -> Self {
        Self {
            operation: ChangeOperation::Latest,
            payload: sample
                .map(|s| ChangePayload::Reading(s.into()))
                .unwrap_or(ChangePayload::Empty),
            scope,
        }
    }

    pub fn reading(&self) -> Option<&Reading> {
        match &self.payload {
            ChangePayload::Reading(reading) => Some(reading),
            _ => None,
        }
    }

    pub fn document_id(&self) -> Option<SampleId> {
        match &self.payload {
            ChangePayload::Reading(reading) => Some(reading.id),
            ChangePayload::Deleted(id) => Some(*id),
            ChangePayload::Empty => None,
        }
    }
}

/// JSON shape of a change on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireChange {
    pub operation: ChangeOperation,
    #[serde(rename = "maxBPM", default, skip_serializing_if = "Option::is_none")]
    pub max_bpm: Option<u32>,
    #[serde(rename = "avgBPM", default, skip_serializing_if = "Option::is_none")]
    pub avg_bpm: Option<u32>,
    #[serde(rename = "minBPM", default, skip_serializing_if = "Option::is_none")]
    pub min_bpm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "documentId", default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl From<&ChangeEvent> for WireChange {
    fn from(event: &ChangeEvent) -> Self {
        let mut wire = WireChange {
            operation: event.operation,
            max_bpm: None,
            avg_bpm: None,
            min_bpm: None,
            timestamp: None,
            document_id: None,
        };
        match &event.payload {
            ChangePayload::Reading(reading) => {
                wire.max_bpm = Some(reading.heart_rate.max_bpm);
                wire.avg_bpm = Some(reading.heart_rate.avg_bpm);
                wire.min_bpm = Some(reading.heart_rate.min_bpm);
                wire.timestamp = Some(reading.timestamp);
                wire.document_id = Some(reading.id.to_string());
            }
            ChangePayload::Deleted(id) => {
                wire.document_id = Some(id.to_string());
            }
            ChangePayload::Empty => {}
        }
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(id: i64, owner: Option<&str>) -> Sample {
        Sample {
            id: SampleId::new(id),
            owner: owner.map(Scope::from),
            heart_rate: HeartRate::new(80, 70, 60),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_scoped_channel_name() {
        assert_eq!(scoped_channel(&Scope::new("hf-9")), "changeUpdate:hf-9");
    }

    #[test]
    fn test_insert_event_takes_scope_from_owner() {
        let event = ChangeEvent::inserted(&sample(1, Some("hf-1")));
        assert_eq!(event.operation, ChangeOperation::Insert);
        assert_eq!(event.scope, Some(Scope::new("hf-1")));
        assert_eq!(event.document_id(), Some(SampleId::new(1)));
    }

    #[test]
    fn test_wire_shape_for_reading() {
        let event = ChangeEvent::updated(&sample(3, Some("hf-1")));
        let json = serde_json::to_value(WireChange::from(&event)).unwrap();
        assert_eq!(json["operation"], "update");
        assert_eq!(json["maxBPM"], 80);
        assert_eq!(json["avgBPM"], 70);
        assert_eq!(json["minBPM"], 60);
        assert_eq!(json["documentId"], "3");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_wire_shape_for_delete_has_only_id() {
        let event = ChangeEvent::deleted(SampleId::new(5), None);
        let json = serde_json::to_value(WireChange::from(&event)).unwrap();
        assert_eq!(json["operation"], "delete");
        assert_eq!(json["documentId"], "5");
        assert!(json.get("maxBPM").is_none());
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn test_empty_latest_serializes_operation_only() {
        let event = ChangeEvent::latest(Some(Scope::new("hf-1")), None);
        assert_eq!(event.payload, ChangePayload::Empty);
        let json = serde_json::to_value(WireChange::from(&event)).unwrap();
        assert_eq!(json, serde_json::json!({"operation": "latest"}));
    }

    #[test]
    fn test_raw_change_parses_feed_record() {
        let raw: RawChange = serde_json::from_str(
            r#"{"operationType":"delete","documentKey":12}"#,
        )
        .unwrap();
        assert_eq!(raw.operation_type, RawChange::DELETE);
        assert_eq!(raw.document_key, Some(SampleId::new(12)));
        assert!(raw.full_document.is_none());
    }
}
