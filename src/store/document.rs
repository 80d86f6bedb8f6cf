//! JSON document load/save
//!
//! Every persisted document is a whole-file JSON value. Saves go through a
//! temporary sibling file and a rename so readers never see a torn write.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::presets::PresetList;

use super::types::{DeviceAssignment, GainState, RuntimeState};

/// A document stored as one JSON file in the data directory
pub trait Document: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;

    /// Repair a freshly deserialized value
    fn normalize(&mut self) {}
}

impl Document for AppConfig {
    const FILE_NAME: &'static str = "config.json";
}

impl Document for DeviceAssignment {
    const FILE_NAME: &'static str = "vm_devices.json";
}

impl Document for GainState {
    const FILE_NAME: &'static str = "vm_state.json";
}

impl Document for PresetList {
    const FILE_NAME: &'static str = "presets.json";

    fn normalize(&mut self) {
        PresetList::normalize(self);
    }
}

/// The runtime document has no meaningful default; it is only ever written
/// from live engine state.
pub const RUNTIME_FILE_NAME: &str = "state.json";

/// How a document load went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Missing,
    /// The file exists but could not be parsed; defaults are in effect
    Malformed(String),
}

pub fn document_path<D: Document>(dir: &Path) -> PathBuf {
    dir.join(D::FILE_NAME)
}

/// Load a document, falling back to its default when missing or malformed
pub async fn load<D: Document>(dir: &Path) -> (D, LoadOutcome) {
    let path = document_path::<D>(dir);
    let contents = match fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} not found, using defaults", D::FILE_NAME);
            return (D::default(), LoadOutcome::Missing);
        }
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return (D::default(), LoadOutcome::Malformed(e.to_string()));
        }
    };

    match serde_json::from_str::<D>(contents.trim_start_matches('\u{feff}')) {
        Ok(mut doc) => {
            doc.normalize();
            (doc, LoadOutcome::Loaded)
        }
        Err(e) => {
            warn!(
                "{} is malformed ({}), falling back to defaults",
                path.display(),
                e
            );
            (D::default(), LoadOutcome::Malformed(e.to_string()))
        }
    }
}

/// Atomically replace the document on disk
pub async fn save<D: Document>(dir: &Path, doc: &D) -> Result<()> {
    write_json(&document_path::<D>(dir), doc).await
}

/// Serialize `value` and move it into place via a temporary file
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Keep a copy of a malformed file before defaults overwrite it
pub async fn preserve_malformed<D: Document>(dir: &Path) {
    let path = document_path::<D>(dir);
    let mut backup = path.as_os_str().to_owned();
    backup.push(".bad");
    if let Err(e) = fs::copy(&path, PathBuf::from(&backup)).await {
        debug!("Could not back up {}: {}", path.display(), e);
    }
}

pub async fn read_runtime(dir: &Path) -> Option<RuntimeState> {
    let contents = fs::read_to_string(dir.join(RUNTIME_FILE_NAME)).await.ok()?;
    serde_json::from_str(&contents).ok()
}
