//! Requirement snapshots and content fingerprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Raw fields as returned by the requirement tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementFields {
    pub title: String,
    pub description: String,
    pub state: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl RequirementFields {
    /// Convenience constructor for the three monitored text fields.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            state: state.into(),
            last_modified: None,
        }
    }

    /// Lenient extraction from an arbitrary JSON payload.
    ///
    /// Missing, null or non-string text fields become empty strings; an
    /// unparseable `last_modified` is dropped.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let last_modified = value
            .get("last_modified")
            .or_else(|| value.get("lastModified"))
            .and_then(serde_json::Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Self {
            title: text("title"),
            description: text("description"),
            state: text("state"),
            last_modified,
        }
    }
}

/// Point-in-time capture of an item's monitored fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSnapshot {
    pub id: String,
    pub title: String,
    pub description: String,
    pub state: String,
    pub last_modified: Option<DateTime<Utc>>,
    /// Lower-case hex SHA-256 of `title + description`.
    pub content_hash: String,
}

impl RequirementSnapshot {
    /// Build a snapshot for `id` from fetched fields.
    pub fn capture(id: &str, fields: RequirementFields) -> Self {
        let content_hash = content_hash(&fields.title, &fields.description);
        Self {
            id: id.to_owned(),
            title: fields.title,
            description: fields.description,
            state: fields.state,
            last_modified: fields.last_modified,
            content_hash,
        }
    }

    /// Two snapshots are content-identical iff their hashes match.
    pub fn is_content_identical(&self, other: &Self) -> bool {
        self.content_hash == other.content_hash
    }

    /// Content hash plus workflow state; identifies a repeat observation.
    pub fn fingerprint(&self) -> String {
        format!("{}\u{1f}{}", self.content_hash, self.state)
    }
}

/// SHA-256 fingerprint of the concatenated title and description.
pub fn content_hash(title: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(description.as_bytes());
    format!("{:x}", hasher.finalize())
}
