//! Job record model and its wire encoding
//!
//! Every stream entry carries a single field, [`PAYLOAD_FIELD`], holding a JSON
//! object of the form `{"header": {"message_id", "timestamp", "type"}, "data": {...}}`.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{QueueError, QueueResult};

/// Name of the stream entry field holding the encoded record
pub const PAYLOAD_FIELD: &str = "payload";

/// Kind of work a record represents; drives routing and priority
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobKind {
    User,
    Admin,
    Background,
    Logging,
    /// Any type this crate has no special knowledge of
    Other(String),
}

impl JobKind {
    pub fn as_str(&self) -> &str {
        match self {
            JobKind::User => "user",
            JobKind::Admin => "admin",
            JobKind::Background => "background",
            JobKind::Logging => "logging",
            JobKind::Other(name) => name,
        }
    }
}

impl From<String> for JobKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "user" => JobKind::User,
            "admin" => JobKind::Admin,
            "background" => JobKind::Background,
            "logging" => JobKind::Logging,
            _ => JobKind::Other(value),
        }
    }
}

impl From<&str> for JobKind {
    fn from(value: &str) -> Self {
        JobKind::from(value.to_string())
    }
}

impl From<JobKind> for String {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Content-derived identity, stable across republishing
    pub message_id: String,

    /// Creation time as RFC 3339
    pub timestamp: String,

    #[serde(rename = "type", default)]
    pub job_type: Option<JobKind>,
}

/// Payload of a scraped-link job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UrlPayload {
    pub url: String,
    pub source_rss: String,
}

/// Record body
///
/// Known shapes are matched first; any other JSON object is kept verbatim so
/// that republishing never loses fields. Non-object bodies do not decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobPayload {
    Url(UrlPayload),
    Fields(Map<String, Value>),
}

/// A unit of work as carried on the streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub header: MessageHeader,
    pub data: JobPayload,
}

impl JobRecord {
    pub fn new(message_id: impl Into<String>, job_type: Option<JobKind>, data: JobPayload) -> Self {
        Self {
            header: MessageHeader {
                message_id: message_id.into(),
                timestamp: now_rfc3339(),
                job_type,
            },
            data,
        }
    }

    /// Build the record published for a newly discovered link
    ///
    /// The message id is derived from the link so the same article always
    /// maps to the same identity.
    pub fn url_job(link: &str, source: &str, kind: JobKind) -> Self {
        Self::new(
            message_id_for(link),
            Some(kind),
            JobPayload::Url(UrlPayload {
                url: link.to_string(),
                source_rss: source.to_string(),
            }),
        )
    }

    pub fn job_type(&self) -> Option<&JobKind> {
        self.header.job_type.as_ref()
    }

    pub fn message_id(&self) -> &str {
        &self.header.message_id
    }

    /// Encode into the value stored under [`PAYLOAD_FIELD`]
    pub fn to_payload(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the value stored under [`PAYLOAD_FIELD`]
    pub fn from_payload(record_id: &str, payload: &str) -> QueueResult<Self> {
        serde_json::from_str(payload).map_err(|e| QueueError::Decode {
            record_id: record_id.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Lowercase hex SHA-256 of `key`
pub fn message_id_for(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A decoded record together with where it was read from
///
/// `stream` and `id` are needed to acknowledge the record afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub stream: String,
    pub id: String,
    pub record: JobRecord,
}

impl StreamRecord {
    pub fn new(stream: impl Into<String>, id: impl Into<String>, record: JobRecord) -> Self {
        Self {
            stream: stream.into(),
            id: id.into(),
            record,
        }
    }
}
