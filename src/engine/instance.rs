//! Single-instance guard based on the runtime document

use std::path::Path;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::store::{self, RuntimeState};

/// The runtime document of another live engine in `dir`, if there is one.
///
/// A document left behind by a crashed engine names a dead pid and is
/// ignored; the new engine overwrites it.
pub async fn running_instance(dir: &Path) -> Option<RuntimeState> {
    let state = store::read_runtime(dir).await?;
    check(state, std::process::id(), pid_alive)
}

fn check(state: RuntimeState, own_pid: u32, alive: impl Fn(u32) -> bool) -> Option<RuntimeState> {
    (state.pid != own_pid && alive(state.pid)).then_some(state)
}

fn pid_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new(),
    );
    system.process(pid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{Mode, Policy};
    use crate::store::document::write_json;
    use crate::store::RUNTIME_FILE_NAME;

    fn state(pid: u32) -> RuntimeState {
        RuntimeState {
            pid,
            ..RuntimeState::new(Mode::Desktop, Policy::Auto, false)
        }
    }

    #[test]
    fn test_live_foreign_pid_blocks() {
        assert!(check(state(4242), 1, |_| true).is_some());
        assert!(check(state(4242), 1, |_| false).is_none());
        assert!(check(state(1), 1, |_| true).is_none());
    }

    #[tokio::test]
    async fn test_own_document_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        assert!(running_instance(dir.path()).await.is_none());

        write_json(&dir.path().join(RUNTIME_FILE_NAME), &state(std::process::id()))
            .await
            .unwrap();
        assert!(running_instance(dir.path()).await.is_none());
    }
}
