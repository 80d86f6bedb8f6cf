//! Application path management for portable and installed modes.
//!
//! ## Mode Detection
//!
//! - **Explicit**: `--data-dir` wins over everything else.
//! - **Portable mode**: If a `.portable` marker file exists next to the
//!   executable, all documents and logs live in the same directory. This
//!   requires the directory to be writable (not `C:\Program Files`).
//! - **Installed mode** (default): Data is stored in `%APPDATA%\VR Audio Router`
//!   (or equivalent on other platforms).

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application name used for directories in installed mode
const APP_NAME: &str = "VR Audio Router";

/// Application paths for documents and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Directory holding config.json and the other persisted documents
    pub data_dir: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether running in portable mode (data next to exe)
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// Note: This is called before logging is initialized, so we use eprintln
    /// for early diagnostic output.
    pub fn detect(data_dir_override: Option<&Path>) -> Self {
        if let Some(dir) = data_dir_override {
            return Self::in_dir(dir.to_path_buf(), true);
        }

        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        #[cfg(debug_assertions)]
        eprintln!("[paths] Executable directory: {}", exe_dir.display());

        Self::resolve(&exe_dir, dirs::data_dir())
    }

    fn resolve(exe_dir: &Path, data_dir: Option<PathBuf>) -> Self {
        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode (.portable marker found)");
            return Self::in_dir(exe_dir.to_path_buf(), true);
        }

        let app_data = data_dir
            .unwrap_or_else(|| {
                eprintln!(
                    "[paths] WARNING: dirs::data_dir() returned None, falling back to exe dir"
                );
                exe_dir.to_path_buf()
            })
            .join(APP_NAME);

        #[cfg(debug_assertions)]
        eprintln!(
            "[paths] Running in INSTALLED mode (data dir: {})",
            app_data.display()
        );

        Self::in_dir(app_data, false)
    }

    fn in_dir(dir: PathBuf, is_portable: bool) -> Self {
        Self {
            logs_dir: dir.join("logs"),
            data_dir: dir,
            is_portable,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [&self.data_dir, &self.logs_dir] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_is_used_verbatim() {
        let paths = AppPaths::detect(Some(Path::new("custom/data")));
        assert_eq!(paths.data_dir, PathBuf::from("custom/data"));
        assert_eq!(paths.logs_dir, PathBuf::from("custom/data/logs"));
        assert_eq!(paths.config_file(), PathBuf::from("custom/data/config.json"));
    }

    #[test]
    fn test_portable_marker() {
        let exe_dir = tempfile::tempdir().unwrap();
        let installed = AppPaths::resolve(exe_dir.path(), Some(PathBuf::from("appdata")));
        assert!(!installed.is_portable);
        assert_eq!(installed.data_dir, PathBuf::from("appdata").join(APP_NAME));

        std::fs::write(exe_dir.path().join(".portable"), b"").unwrap();
        let portable = AppPaths::resolve(exe_dir.path(), Some(PathBuf::from("appdata")));
        assert!(portable.is_portable);
        assert_eq!(portable.data_dir, exe_dir.path());
    }

    #[test]
    fn test_ensure_directories() {
        let root = tempfile::tempdir().unwrap();
        let paths = AppPaths::detect(Some(&root.path().join("nested")));
        paths.ensure_directories().unwrap();
        assert!(paths.logs_dir.is_dir());
    }
}
