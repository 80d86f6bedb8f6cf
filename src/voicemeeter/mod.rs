//! VoiceMeeter integration
//!
//! The vendor engine is reached through two seams: [`RemoteApi`] for its
//! parameter interface and [`EngineProcess`] for the process itself. The
//! [`lifecycle::Lifecycle`] manager drives both.

pub mod levels;
pub mod lifecycle;
pub mod params;
pub mod process;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use lifecycle::Lifecycle;
pub use params::{FlagTarget, Layout, DEVICE_SLOTS};
pub use process::SystemEngineProcess;
pub use remote::DllRemote;

/// Remote API library file name
pub const DLL_NAME: &str = "VoicemeeterRemote64.dll";

/// VoiceMeeter executables in launch priority order (Banana, Potato x64,
/// Potato x86, Basic)
pub const EXECUTABLES: [&str; 4] = [
    "voicemeeterpro.exe",
    "voicemeeter8x64.exe",
    "voicemeeter8.exe",
    "voicemeeter.exe",
];

pub const DEFAULT_INSTALL_DIRS: [&str; 2] = [
    r"C:\Program Files (x86)\VB\Voicemeeter",
    r"C:\Program Files\VB\Voicemeeter",
];

/// Whether a process name belongs to any VoiceMeeter variant
pub fn is_engine_process(name: &str) -> bool {
    EXECUTABLES.iter().any(|exe| exe.eq_ignore_ascii_case(name))
}

/// Install directories to search, the configured override first
pub fn install_dirs(override_dir: Option<&Path>) -> Vec<PathBuf> {
    override_dir
        .map(Path::to_path_buf)
        .into_iter()
        .chain(DEFAULT_INSTALL_DIRS.iter().map(PathBuf::from))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote API library not found (searched {0})")]
    LibraryNotFound(String),
    #[error("failed to load remote API library: {0}")]
    LibraryLoad(String),
    #[error("login refused (code {0})")]
    LoginRefused(i32),
    #[error("not logged in")]
    NotConnected,
    #[error("{call}({param}) returned {code}")]
    Call {
        call: &'static str,
        param: String,
        code: i32,
    },
    #[error("invalid parameter name or value: {0}")]
    InvalidArgument(String),
}

/// VoiceMeeter's parameter interface
///
/// Methods take `&self`; implementations keep connection state behind
/// interior mutability.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn login(&self) -> Result<(), RemoteError>;

    async fn logout(&self);

    fn is_connected(&self) -> bool;

    async fn get_float(&self, param: &str) -> Result<f32, RemoteError>;

    async fn set_float(&self, param: &str, value: f32) -> Result<(), RemoteError>;

    async fn get_string(&self, param: &str) -> Result<String, RemoteError>;

    async fn set_string(&self, param: &str, value: &str) -> Result<(), RemoteError>;
}

/// The VoiceMeeter process
#[async_trait]
pub trait EngineProcess: Send + Sync {
    /// Whether any VoiceMeeter variant is running
    fn is_running(&self) -> Result<bool>;

    /// Start the preferred installed variant
    async fn launch(&self) -> Result<()>;

    /// Kill every running variant; true if one was signalled
    fn kill(&self) -> bool;
}
