//! # Measurement Records
//!
//! A record is the `(topic, key, value)` tuple handed to the upload
//! pipeline. The topic carries the schema names of its key and value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Destination topic with its key/value schema identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub key_schema: String,
    pub value_schema: String,
}

impl Topic {
    /// Creates a topic keyed by [`ObservationKey`].
    pub fn new(name: impl Into<String>, value_schema: impl Into<String>) -> Self {
        Topic {
            name: name.into(),
            key_schema: ObservationKey::SCHEMA.to_string(),
            value_schema: value_schema.into(),
        }
    }
}

/// Key identifying who produced a measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationKey {
    pub project_id: Option<String>,
    pub user_id: String,
    pub source_id: String,
}

impl ObservationKey {
    /// Schema name for observation keys.
    pub const SCHEMA: &'static str = "org.radarcns.kafka.ObservationKey";
}

/// A single measurement queued for upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub topic: Topic,
    pub key: ObservationKey,
    pub value: Value,
    /// When the measurement was handed to the pipeline.
    pub received_at: DateTime<Utc>,
}

impl Record {
    pub fn new(topic: Topic, key: ObservationKey, value: Value) -> Self {
        Record {
            topic,
            key,
            value,
            received_at: Utc::now(),
        }
    }
}
