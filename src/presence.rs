//! VR presence detection
//!
//! Polls the OS process table for the VR indicator process and debounces the
//! raw samples into stable transitions.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Stable presence transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceEvent {
    BecamePresent,
    BecameAbsent,
}

/// Read access to the OS process table
pub trait ProcessTable: Send {
    /// Names of all running processes
    fn process_names(&mut self) -> Result<Vec<String>>;

    /// Kill every process whose name matches (case-insensitive).
    /// Returns true if at least one process was signalled.
    fn kill_by_name(&mut self, name: &str) -> bool;

    /// Whether any running process has this name (case-insensitive)
    fn is_running(&mut self, name: &str) -> Result<bool> {
        Ok(self
            .process_names()?
            .iter()
            .any(|p| p.eq_ignore_ascii_case(name)))
    }
}

/// [`ProcessTable`] backed by `sysinfo`
pub struct SysinfoProcessTable {
    system: System,
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::new().with_processes(ProcessRefreshKind::new()),
            ),
        }
    }

    fn refresh(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new(),
        );
    }
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn process_names(&mut self) -> Result<Vec<String>> {
        self.refresh();
        let names: Vec<String> = self
            .system
            .processes()
            .values()
            .map(|p| p.name().to_string_lossy().into_owned())
            .collect();
        if names.is_empty() {
            anyhow::bail!("process table enumeration returned no processes");
        }
        Ok(names)
    }

    fn kill_by_name(&mut self, name: &str) -> bool {
        self.refresh();
        let mut killed = false;
        for process in self.system.processes().values() {
            if process.name().to_string_lossy().eq_ignore_ascii_case(name) {
                killed |= process.kill();
            }
        }
        killed
    }
}

/// Debounces raw presence samples into stable transitions
///
/// A transition fires only once the new raw value has been observed
/// continuously for the whole window. An unknown sample never fires and
/// breaks the continuity of a pending candidate.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    stable: Option<bool>,
    candidate: Option<(bool, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            stable: None,
            candidate: None,
        }
    }

    /// Current stable value (`None` until the first known sample)
    pub fn stable(&self) -> Option<bool> {
        self.stable
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Feed one sample taken at `now`; `None` means the sample was unknown
    pub fn observe(&mut self, sample: Option<bool>, now: Instant) -> Option<PresenceEvent> {
        let Some(raw) = sample else {
            self.candidate = None;
            return None;
        };

        let Some(stable) = self.stable else {
            // First known sample is the baseline
            self.stable = Some(raw);
            return None;
        };

        if raw == stable {
            self.candidate = None;
            return None;
        }

        let since = match self.candidate {
            Some((value, since)) if value == raw => since,
            _ => {
                self.candidate = Some((raw, now));
                now
            }
        };

        if now.duration_since(since) >= self.window {
            self.stable = Some(raw);
            self.candidate = None;
            Some(if raw {
                PresenceEvent::BecamePresent
            } else {
                PresenceEvent::BecameAbsent
            })
        } else {
            None
        }
    }
}

/// Watches for the VR indicator process
pub struct PresenceMonitor {
    process_name: String,
    table: Box<dyn ProcessTable>,
    debouncer: Debouncer,
}

impl PresenceMonitor {
    pub fn new(process_name: &str, debounce: Duration, table: Box<dyn ProcessTable>) -> Self {
        Self {
            process_name: process_name.to_string(),
            table,
            debouncer: Debouncer::new(debounce),
        }
    }

    /// Stable presence; false until the first successful sample
    pub fn is_present(&self) -> bool {
        self.debouncer.stable().unwrap_or(false)
    }

    pub fn reconfigure(&mut self, process_name: &str, debounce: Duration) {
        if !self.process_name.eq_ignore_ascii_case(process_name) {
            info!(
                "VR indicator process changed: {} → {}",
                self.process_name, process_name
            );
            self.process_name = process_name.to_string();
            self.debouncer = Debouncer::new(debounce);
        } else {
            self.debouncer.set_window(debounce);
        }
    }

    /// Take one sample now
    pub fn poll(&mut self) -> Option<PresenceEvent> {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> Option<PresenceEvent> {
        let sample = match self.table.is_running(&self.process_name) {
            Ok(running) => Some(running),
            Err(e) => {
                warn!("Process enumeration failed, keeping presence as-is: {}", e);
                None
            }
        };
        let event = self.debouncer.observe(sample, now);
        match event {
            Some(PresenceEvent::BecamePresent) => info!("🥽 {} started", self.process_name),
            Some(PresenceEvent::BecameAbsent) => info!("🥽 {} stopped", self.process_name),
            None => debug!(process = %self.process_name, ?sample, "Presence sample"),
        }
        event
    }
}
