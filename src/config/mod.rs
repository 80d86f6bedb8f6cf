//! Configuration management for VR Audio Router
//!
//! Handles loading, parsing, and hot-reloading of the JSON configuration file.
//! Unknown keys are ignored and missing keys take their defaults, so config
//! files written by older or newer versions keep loading.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::mode::AutoRules;

pub use watcher::ConfigWatcher;

/// Processes whose audio is never re-routed, whatever the user configured
pub const SYSTEM_EXCLUDE: &[&str] = &[
    "vrchat.exe",
    "vrserver.exe",
    "vrmonitor.exe",
    "vrwebhelper.exe",
    "steamwebhelper.exe",
    "voicemeeterpro.exe",
    "voicemeeter.exe",
    "voicemeeter8.exe",
    "voicemeeter8x64.exe",
    "svchost.exe",
    "rundll32.exe",
    "audiodg.exe",
    "dwm.exe",
];

/// Command-line friendly id of the VoiceMeeter VAIO input
pub const DEFAULT_VR_DEVICE: &str = r"VB-Audio Voicemeeter VAIO\Device\Voicemeeter Input\Render";

/// Upper bound for every interval and timeout setting (one day)
const MAX_DURATION_SECONDS: u64 = 86_400;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Seconds between VR presence samples
    pub poll_interval_seconds: u64,
    /// Seconds between enforcement (reconciliation) passes
    pub enforce_interval_seconds: u64,
    /// Process whose presence signals a VR session
    #[serde(alias = "steamvr_process")]
    pub vr_process: String,
    /// The VR application itself; always excluded from re-routing
    pub vr_app_process: String,
    /// User-configured exclusions
    pub exclude_processes: Vec<String>,
    /// Per-app routing tool (relative paths resolve against the data dir)
    pub svcl_path: PathBuf,
    /// Device that app audio is sent to while in a VR mode
    pub vr_device: String,
    /// Physical output for Desktop mode; `None` follows the system default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desktop_device: Option<String>,
    pub debounce_seconds: u64,
    /// VoiceMeeter virtual input strip carrying music
    pub music_strip: u8,
    /// VoiceMeeter hardware input strip carrying the microphone
    pub mic_strip: u8,
    /// Set once the user confirmed the in-app mic setup step
    pub vrchat_mic_confirmed: bool,
    /// Upper bound on waiting for VoiceMeeter's remote API after a launch
    pub readiness_timeout_seconds: u64,
    /// VoiceMeeter install directory override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voicemeeter_dir: Option<PathBuf>,
    pub auto: AutoRules,
    /// Localhost port of the command API
    pub api_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 3,
            enforce_interval_seconds: 15,
            vr_process: "vrserver.exe".to_string(),
            vr_app_process: "vrchat.exe".to_string(),
            exclude_processes: vec!["vrchat.exe".to_string()],
            svcl_path: PathBuf::from("svcl.exe"),
            vr_device: DEFAULT_VR_DEVICE.to_string(),
            desktop_device: None,
            debounce_seconds: 5,
            music_strip: 3,
            mic_strip: 0,
            vrchat_mic_confirmed: false,
            readiness_timeout_seconds: 10,
            voicemeeter_dir: None,
            auto: AutoRules::default(),
            api_port: crate::api::DEFAULT_API_PORT,
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_seconds == 0 {
            anyhow::bail!("poll_interval_seconds must be at least 1");
        }
        if self.enforce_interval_seconds == 0 {
            anyhow::bail!("enforce_interval_seconds must be at least 1");
        }
        for (name, value) in [
            ("poll_interval_seconds", self.poll_interval_seconds),
            ("enforce_interval_seconds", self.enforce_interval_seconds),
            ("debounce_seconds", self.debounce_seconds),
            ("readiness_timeout_seconds", self.readiness_timeout_seconds),
        ] {
            if value > MAX_DURATION_SECONDS {
                anyhow::bail!("{} must be at most {} (got {})", name, MAX_DURATION_SECONDS, value);
            }
        }
        if self.vr_process.trim().is_empty() {
            anyhow::bail!("vr_process cannot be empty");
        }
        if self.vr_device.trim().is_empty() {
            anyhow::bail!("vr_device cannot be empty (run the setup wizard)");
        }
        if self.music_strip == self.mic_strip {
            anyhow::bail!(
                "music_strip and mic_strip must differ (both are {})",
                self.music_strip
            );
        }
        Ok(())
    }

    /// Effective exclusion set, lowercased. Always contains the VR app, the VR
    /// indicator process and the system processes.
    pub fn exclusions(&self) -> BTreeSet<String> {
        SYSTEM_EXCLUDE
            .iter()
            .map(|p| p.to_string())
            .chain(self.exclude_processes.iter().map(|p| normalize_process(p)))
            .chain([
                normalize_process(&self.vr_app_process),
                normalize_process(&self.vr_process),
            ])
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Resolve the routing tool path against the data directory
    pub fn svcl_path_in(&self, data_dir: &Path) -> PathBuf {
        if self.svcl_path.is_absolute() {
            self.svcl_path.clone()
        } else {
            data_dir.join(&self.svcl_path)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn enforce_interval(&self) -> Duration {
        Duration::from_secs(self.enforce_interval_seconds.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_seconds)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_seconds.max(1))
    }
}

/// Lowercase a process name and append `.exe` when it has no extension
pub fn normalize_process(name: &str) -> String {
    let name = name.trim().to_lowercase();
    if name.is_empty() || name.contains('.') {
        name
    } else {
        format!("{}.exe", name)
    }
}
