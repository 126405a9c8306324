//! Object-creation notifications.
//!
//! Parses S3-style event notification batches and selects the object to
//! load.
//!
//! # Contract
//!
//! - **Single record**: only the first record of a batch is processed. Any
//!   further records are ignored and a warning reports how many.
//! - **Empty batches are errors**: a batch with no records is rejected.
//! - **Keys are URL-decoded**: notification keys encode spaces as `+` and other
//!   reserved characters as `%XX`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pqload_core::{Error, Result};

/// A batch of storage notifications as delivered by the trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationBatch {
    /// Notification records, oldest first.
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

/// One object event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Event type (e.g., `ObjectCreated:Put`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,

    /// When the event occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,

    /// Region of the bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,

    /// Bucket and object of the event.
    pub s3: S3Entity,
}

/// Storage entity of an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    /// Bucket holding the object.
    pub bucket: S3Bucket,
    /// The object itself.
    pub object: S3Object,
}

/// Bucket reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Bucket {
    /// Bucket name.
    pub name: String,
}

/// Object reference as it appears in the notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Object {
    /// URL-encoded object key.
    pub key: String,
    /// Object size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Entity tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
}

/// The object selected for one invocation, with its key decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Bucket name.
    pub bucket: String,
    /// Decoded object key.
    pub key: String,
    /// Size announced by the notification, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ObjectRef {
    /// Creates a reference from an already-decoded key.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size: None,
        }
    }
}

impl NotificationBatch {
    /// Parses a notification batch from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] if the payload is not a notification
    /// batch.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| Error::invalid_event(format!("malformed notification: {e}")))
    }

    /// Selects the object to process: the first record of the batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] if the batch is empty or the first
    /// record has an empty bucket or key.
    pub fn first_object(&self) -> Result<ObjectRef> {
        let record = self
            .records
            .first()
            .ok_or_else(|| Error::invalid_event("notification batch has no records"))?;

        let ignored = self.records.len() - 1;
        if ignored > 0 {
            tracing::warn!(
                ignored_records = ignored,
                "notification batch has more than one record; only the first is processed"
            );
        }

        let bucket = record.s3.bucket.name.trim();
        if bucket.is_empty() {
            return Err(Error::invalid_event("notification record has an empty bucket name"));
        }
        let key = decode_object_key(&record.s3.object.key)?;
        if key.is_empty() {
            return Err(Error::invalid_event("notification record has an empty object key"));
        }

        Ok(ObjectRef {
            bucket: bucket.to_string(),
            key,
            size: record.s3.object.size,
        })
    }
}

/// Decodes an object key as encoded in storage notifications.
///
/// # Errors
///
/// Returns [`Error::InvalidEvent`] if the escapes do not decode to UTF-8.
pub fn decode_object_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| Error::invalid_event(format!("object key '{raw}' is not valid UTF-8: {e}")))
}
