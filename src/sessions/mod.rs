//! Per-application audio sessions
//!
//! [`AudioSessions`] enumerates render sessions and moves applications
//! between output devices. The production backend drives `svcl.exe`.

pub mod svcl;

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub use svcl::Svcl;

/// Device target understood by the routing tool for "follow the system default"
pub const SYSTEM_DEFAULT_DEVICE: &str = "DefaultRenderDevice";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("routing tool not found at {}", .0.display())]
    ToolMissing(PathBuf),
    #[error("failed to run routing tool: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("routing tool timed out after {0}s")]
    Timeout(u64),
    #[error("could not parse session listing: {0}")]
    Parse(String),
    #[error("routing tool rejected {process} → {device}: {output}")]
    Rejected {
        process: String,
        device: String,
        output: String,
    },
}

/// Lifecycle state of an audio session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Inactive,
    Expired,
}

/// All render sessions of one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioSession {
    /// Lowercased executable name
    pub process: String,
    pub state: SessionState,
    /// Command-line friendly ids of every device the process plays on.
    /// Empty when none could be determined.
    pub devices: Vec<String>,
}

impl AudioSession {
    /// Whether every stream of the process plays on `device`
    pub fn only_on(&self, device: &str) -> bool {
        !self.devices.is_empty() && self.devices.iter().all(|d| d.eq_ignore_ascii_case(device))
    }

    /// Whether any stream of the process plays on `device`
    pub fn plays_on(&self, device: &str) -> bool {
        self.devices.iter().any(|d| d.eq_ignore_ascii_case(device))
    }
}

/// Result of one enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub sessions: Vec<AudioSession>,
    /// Command-line friendly id of the system default render device
    pub default_render: Option<String>,
}

/// Where an application's audio should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTarget {
    /// A specific device, by command-line friendly id
    Named(String),
    /// Whatever the system default output is
    SystemDefault,
}

impl DeviceTarget {
    /// Argument passed to the routing tool
    pub fn as_arg(&self) -> &str {
        match self {
            DeviceTarget::Named(id) => id,
            DeviceTarget::SystemDefault => SYSTEM_DEFAULT_DEVICE,
        }
    }

    /// Concrete device id, resolving the system default through the snapshot
    pub fn resolve<'a>(&'a self, snapshot: &'a SessionSnapshot) -> Option<&'a str> {
        match self {
            DeviceTarget::Named(id) => Some(id),
            DeviceTarget::SystemDefault => snapshot.default_render.as_deref(),
        }
    }
}

impl std::fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Per-application routing backend
#[async_trait]
pub trait AudioSessions: Send + Sync {
    /// Verify the backend is usable at all
    async fn probe(&self) -> Result<(), SessionError>;

    async fn snapshot(&self) -> Result<SessionSnapshot, SessionError>;

    /// Route every session of `process` to `target`
    async fn assign(&self, process: &str, target: &DeviceTarget) -> Result<(), SessionError>;
}
