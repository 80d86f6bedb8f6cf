//! Persistence store
//!
//! Owns the in-memory copy of every persisted document. Each mutation is
//! written through immediately; a failed write leaves the in-memory value
//! authoritative and the document is rewritten in full on the next retry.

pub mod document;
mod types;

pub use document::{Document, LoadOutcome, RUNTIME_FILE_NAME};
pub use types::{
    CommandFailure, DeviceAssignment, DeviceError, EngineStatus, GainChannel, GainState,
    RuntimeState,
};

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::presets::{PresetError, PresetList};

/// Identifies one of the persisted documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DocumentKind {
    Config,
    Devices,
    Gains,
    Presets,
    Runtime,
}

impl DocumentKind {
    pub fn file_name(self) -> &'static str {
        match self {
            DocumentKind::Config => AppConfig::FILE_NAME,
            DocumentKind::Devices => DeviceAssignment::FILE_NAME,
            DocumentKind::Gains => GainState::FILE_NAME,
            DocumentKind::Presets => PresetList::FILE_NAME,
            DocumentKind::Runtime => RUNTIME_FILE_NAME,
        }
    }
}

pub struct Store {
    dir: PathBuf,
    config: AppConfig,
    devices: DeviceAssignment,
    gains: GainState,
    presets: PresetList,
    runtime: Option<RuntimeState>,
    /// Documents whose last write failed
    pending: BTreeSet<DocumentKind>,
}

impl Store {
    /// Load every document from `dir`. Each document loads independently: a
    /// missing one is seeded with defaults, a malformed one falls back to
    /// defaults (a `.bad` copy of the original is kept).
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;

        let (mut config, config_outcome) = document::load::<AppConfig>(&dir).await;
        if let Err(e) = config.validate() {
            warn!("Invalid configuration ({:#}), using defaults", e);
            config = AppConfig::default();
        }
        let (devices, devices_outcome) = document::load::<DeviceAssignment>(&dir).await;
        let (gains, gains_outcome) = document::load::<GainState>(&dir).await;
        let (presets, presets_outcome) = document::load::<PresetList>(&dir).await;

        let mut store = Self {
            dir,
            config,
            devices,
            gains,
            presets,
            runtime: None,
            pending: BTreeSet::new(),
        };

        let outcomes = [
            (DocumentKind::Config, config_outcome),
            (DocumentKind::Devices, devices_outcome),
            (DocumentKind::Gains, gains_outcome),
            (DocumentKind::Presets, presets_outcome),
        ];
        for (kind, outcome) in outcomes {
            match outcome {
                LoadOutcome::Loaded => debug!("Loaded {}", kind.file_name()),
                LoadOutcome::Missing => {
                    info!("📄 Seeding {} with defaults", kind.file_name());
                    store.persist(kind).await;
                }
                LoadOutcome::Malformed(_) => store.preserve(kind).await,
            }
        }

        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn devices(&self) -> &DeviceAssignment {
        &self.devices
    }

    pub fn gains(&self) -> &GainState {
        &self.gains
    }

    pub fn presets(&self) -> &PresetList {
        &self.presets
    }

    pub fn runtime(&self) -> Option<&RuntimeState> {
        self.runtime.as_ref()
    }

    pub fn pending(&self) -> impl Iterator<Item = DocumentKind> + '_ {
        self.pending.iter().copied()
    }

    /// Adopt a configuration that was just read from disk. Nothing is written.
    pub fn replace_config(&mut self, config: AppConfig) {
        self.config = config;
    }

    /// Mutate and persist the configuration
    pub async fn update_config(&mut self, f: impl FnOnce(&mut AppConfig)) {
        f(&mut self.config);
        self.persist(DocumentKind::Config).await;
    }

    pub async fn set_gains(&mut self, gains: GainState) {
        self.gains = gains;
        self.persist(DocumentKind::Gains).await;
    }

    /// Merge captured device names; only writes when something changed
    pub async fn merge_devices(&mut self, captured: &DeviceAssignment) -> bool {
        let changed = self.devices.merge(captured);
        if changed {
            self.persist(DocumentKind::Devices).await;
        }
        changed
    }

    /// Run a preset operation; the list is persisted only when it succeeds
    pub async fn update_presets<T>(
        &mut self,
        f: impl FnOnce(&mut PresetList) -> Result<T, PresetError>,
    ) -> Result<T, PresetError> {
        let mut next = self.presets.clone();
        let value = f(&mut next)?;
        self.presets = next;
        self.persist(DocumentKind::Presets).await;
        Ok(value)
    }

    pub async fn write_runtime(&mut self, state: RuntimeState) {
        self.runtime = Some(state);
        self.persist(DocumentKind::Runtime).await;
    }

    /// Remove the runtime document (clean shutdown)
    pub async fn remove_runtime(&mut self) {
        self.runtime = None;
        self.pending.remove(&DocumentKind::Runtime);
        let path = self.dir.join(RUNTIME_FILE_NAME);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    /// Rewrite every document whose previous write failed
    pub async fn retry_pending(&mut self) {
        let pending: Vec<DocumentKind> = self.pending.iter().copied().collect();
        for kind in pending {
            self.persist(kind).await;
        }
    }

    /// Write one document in full. Failures are logged and queued for retry.
    pub async fn persist(&mut self, kind: DocumentKind) {
        match self.write(kind).await {
            Ok(()) => {
                if self.pending.remove(&kind) {
                    info!("✅ {} written after earlier failure", kind.file_name());
                }
            }
            Err(e) => {
                warn!("Failed to persist {} (will retry): {:#}", kind.file_name(), e);
                self.pending.insert(kind);
            }
        }
    }

    async fn write(&self, kind: DocumentKind) -> Result<()> {
        match kind {
            DocumentKind::Config => document::save(&self.dir, &self.config).await,
            DocumentKind::Devices => document::save(&self.dir, &self.devices).await,
            DocumentKind::Gains => document::save(&self.dir, &self.gains).await,
            DocumentKind::Presets => document::save(&self.dir, &self.presets).await,
            DocumentKind::Runtime => match &self.runtime {
                Some(state) => {
                    document::write_json(&self.dir.join(RUNTIME_FILE_NAME), state).await
                }
                None => Ok(()),
            },
        }
    }

    async fn preserve(&self, kind: DocumentKind) {
        match kind {
            DocumentKind::Config => document::preserve_malformed::<AppConfig>(&self.dir).await,
            DocumentKind::Devices => {
                document::preserve_malformed::<DeviceAssignment>(&self.dir).await
            }
            DocumentKind::Gains => document::preserve_malformed::<GainState>(&self.dir).await,
            DocumentKind::Presets => document::preserve_malformed::<PresetList>(&self.dir).await,
            DocumentKind::Runtime => {}
        }
    }
}

/// Read another engine's runtime document, if any
pub async fn read_runtime(dir: &Path) -> Option<RuntimeState> {
    document::read_runtime(dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{Mode, Policy};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_seeds_missing_documents() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).await.unwrap();

        for name in ["config.json", "vm_devices.json", "vm_state.json", "presets.json"] {
            assert!(dir.path().join(name).exists(), "{} not seeded", name);
        }
        assert_eq!(store.presets().len(), 3);
        assert_eq!(store.pending().count(), 0);
    }

    #[tokio::test]
    async fn test_documents_load_independently() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("presets.json"), "{ broken").unwrap();
        std::fs::write(dir.path().join("vm_state.json"), r#"{"others": -20}"#).unwrap();

        let store = Store::open(dir.path()).await.unwrap();
        assert_eq!(store.gains().get(GainChannel::Others), -20.0);
        assert_eq!(store.presets().len(), 3);
        assert!(dir.path().join("presets.json.bad").exists());
    }

    #[tokio::test]
    async fn test_invalid_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"music_strip": 0, "mic_strip": 0}"#,
        )
        .unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        assert_eq!(store.config(), &AppConfig::default());
    }

    #[tokio::test]
    async fn test_mutations_written_immediately() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).await.unwrap();

        store
            .set_gains(GainState::default().with(GainChannel::Me, 33.0))
            .await;
        let (gains, _) = document::load::<GainState>(dir.path()).await;
        assert_eq!(gains.get(GainChannel::Me), 33.0);

        store
            .update_presets(|p| p.create("Loud", GainState::default()))
            .await
            .unwrap();
        let (presets, _) = document::load::<PresetList>(dir.path()).await;
        assert!(presets.find_by_name("loud").is_some());
    }

    #[tokio::test]
    async fn test_failed_preset_operation_is_not_persisted() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).await.unwrap();
        let before = store.presets().clone();

        let result = store
            .update_presets(|p| p.create("default", GainState::default()))
            .await;
        assert!(result.is_err());
        assert_eq!(store.presets(), &before);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).await.unwrap();

        // A directory where the temp file should go makes the write fail
        let blocker = dir.path().join("vm_state.json.tmp");
        std::fs::create_dir(&blocker).unwrap();
        store
            .set_gains(GainState::default().with(GainChannel::Voice, 10.0))
            .await;
        assert_eq!(store.pending().collect::<Vec<_>>(), vec![DocumentKind::Gains]);
        // In-memory value stays authoritative
        assert_eq!(store.gains().get(GainChannel::Voice), 10.0);

        std::fs::remove_dir(&blocker).unwrap();
        store.retry_pending().await;
        assert_eq!(store.pending().count(), 0);
        let (gains, _) = document::load::<GainState>(dir.path()).await;
        assert_eq!(gains.get(GainChannel::Voice), 10.0);
    }

    #[tokio::test]
    async fn test_runtime_written_and_removed() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::open(dir.path()).await.unwrap();

        store
            .write_runtime(RuntimeState::new(Mode::Private, Policy::Auto, true))
            .await;
        let state = read_runtime(dir.path()).await.unwrap();
        assert_eq!(state.mode, Mode::Private);
        assert_eq!(state.pid, std::process::id());

        store.remove_runtime().await;
        assert!(read_runtime(dir.path()).await.is_none());
    }
}
