//! Monitor document persistence.
//!
//! The document holds the configuration, the monitored id list and the ids
//! whose stories were already extracted. Runtime state (snapshots, history,
//! error counters) is rebuilt from scratch after a restart.
//!
//! Writes are atomic (temp file → fsync → rename).

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Current document schema version.
pub const DOCUMENT_VERSION: u8 = 1;

/// On-disk monitor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorDocument {
    /// Schema version.
    #[serde(default = "default_document_version")]
    pub version: u8,
    /// Validated monitor configuration.
    #[serde(default)]
    pub config: MonitorConfig,
    /// Monitored item ids in insertion-independent (sorted) order.
    #[serde(default, alias = "epic_ids")]
    pub item_ids: Vec<String>,
    /// Ids whose stories were extracted at least once.
    #[serde(default)]
    pub processed_ids: Vec<String>,
}

impl Default for MonitorDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            config: MonitorConfig::default(),
            item_ids: Vec::new(),
            processed_ids: Vec::new(),
        }
    }
}

fn default_document_version() -> u8 {
    DOCUMENT_VERSION
}

/// Default document location: `<config dir>/reqwatch/monitor.json`.
pub fn default_document_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("reqwatch").join("monitor.json"))
}

/// Load a document, returning the default when the file does not exist.
///
/// # Errors
/// Returns [`MonitorError::Persist`] on read or parse failure and
/// [`MonitorError::ConfigValidation`] when the stored config is out of range.
pub fn load_document(path: &Path) -> Result<MonitorDocument> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(MonitorDocument::default());
        }
        Err(e) => {
            return Err(MonitorError::Persist(format!(
                "cannot read monitor document '{}': {e}",
                path.display()
            )));
        }
    };

    let document: MonitorDocument = serde_json::from_slice(&bytes).map_err(|e| {
        MonitorError::Persist(format!(
            "cannot parse monitor document '{}': {e}",
            path.display()
        ))
    })?;

    if document.version > DOCUMENT_VERSION {
        return Err(MonitorError::Persist(format!(
            "monitor document version {} is newer than supported version {DOCUMENT_VERSION}",
            document.version
        )));
    }

    document.config.validate()?;
    Ok(document)
}

/// Write a document atomically.
///
/// # Errors
/// Returns [`MonitorError::Persist`] on serialization, write, or rename failure.
pub fn save_document(path: &Path, document: &MonitorDocument) -> Result<()> {
    let json = serde_json::to_string_pretty(document)
        .map_err(|e| MonitorError::Persist(format!("cannot serialize monitor document: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            MonitorError::Persist(format!(
                "cannot create document directory '{}': {e}",
                parent.display()
            ))
        })?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let mut file = std::fs::File::create(&tmp_path).map_err(|e| {
        MonitorError::Persist(format!(
            "cannot create temp file '{}': {e}",
            tmp_path.display()
        ))
    })?;
    file.write_all(json.as_bytes())
        .map_err(|e| MonitorError::Persist(format!("cannot write temp file: {e}")))?;
    file.sync_all()
        .map_err(|e| MonitorError::Persist(format!("cannot sync temp file: {e}")))?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        MonitorError::Persist(format!(
            "cannot rename '{}' to '{}': {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}
