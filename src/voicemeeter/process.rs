//! [`EngineProcess`] backed by the OS process table

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

use super::{install_dirs, is_engine_process, EngineProcess, EXECUTABLES};
use crate::presence::ProcessTable;

pub struct SystemEngineProcess {
    search_dirs: Vec<PathBuf>,
    table: Mutex<Box<dyn ProcessTable>>,
}

impl SystemEngineProcess {
    pub fn new(override_dir: Option<&Path>, table: Box<dyn ProcessTable>) -> Self {
        Self {
            search_dirs: install_dirs(override_dir),
            table: Mutex::new(table),
        }
    }

    /// The preferred installed executable (Banana > Potato > Basic)
    pub fn find_executable(&self) -> Option<PathBuf> {
        find_executable_in(&self.search_dirs)
    }
}

fn find_executable_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| EXECUTABLES.iter().map(move |exe| dir.join(exe)))
        .find(|path| path.exists())
}

#[async_trait]
impl EngineProcess for SystemEngineProcess {
    fn is_running(&self) -> Result<bool> {
        let names = self.table.lock().process_names()?;
        Ok(names.iter().any(|name| is_engine_process(name)))
    }

    async fn launch(&self) -> Result<()> {
        let exe = self
            .find_executable()
            .context("VoiceMeeter is not installed (no executable in the install directories)")?;
        info!("🚀 Launching {}", exe.display());

        let mut command = Command::new(&exe);
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }
        command
            .spawn()
            .with_context(|| format!("Failed to start {}", exe.display()))?;
        Ok(())
    }

    fn kill(&self) -> bool {
        let mut table = self.table.lock();
        let mut killed = false;
        for exe in EXECUTABLES {
            if table.kill_by_name(exe) {
                warn!("Killed lingering {}", exe);
                killed = true;
            }
        }
        killed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProcessTable;

    #[test]
    fn test_running_detects_any_variant() {
        let table = FakeProcessTable::new(&["explorer.exe"]);
        let process = SystemEngineProcess::new(None, Box::new(table.clone()));
        assert!(!process.is_running().unwrap());

        table.add("VoiceMeeter8x64.exe");
        assert!(process.is_running().unwrap());
    }

    #[test]
    fn test_kill_removes_variants() {
        let table = FakeProcessTable::new(&["voicemeeterpro.exe", "chrome.exe"]);
        let process = SystemEngineProcess::new(None, Box::new(table.clone()));
        assert!(process.kill());
        assert!(!process.is_running().unwrap());
        assert!(!process.kill());
    }

    #[test]
    fn test_executable_priority() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("voicemeeter.exe"), b"").unwrap();
        std::fs::write(dir.path().join("voicemeeterpro.exe"), b"").unwrap();

        let found = find_executable_in(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found, dir.path().join("voicemeeterpro.exe"));
    }

    #[tokio::test]
    async fn test_launch_without_install_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = SystemEngineProcess::new(
            Some(dir.path()),
            Box::new(FakeProcessTable::new(&[])),
        );
        process.search_dirs.truncate(1);
        assert!(process.launch().await.is_err());
    }
}
