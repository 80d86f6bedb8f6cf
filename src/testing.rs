//! In-memory doubles for the OS-facing seams

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::presence::ProcessTable;
use crate::sessions::{
    AudioSession, AudioSessions, DeviceTarget, SessionError, SessionSnapshot, SessionState,
};
use crate::voicemeeter::{EngineProcess, RemoteApi, RemoteError};

// ===== Process table =====

#[derive(Default)]
struct TableState {
    names: Vec<String>,
    failing: bool,
}

/// Shared, scriptable process list
#[derive(Clone, Default)]
pub struct FakeProcessTable {
    state: Arc<Mutex<TableState>>,
}

impl FakeProcessTable {
    pub fn new(names: &[&str]) -> Self {
        let table = Self::default();
        for name in names {
            table.add(name);
        }
        table
    }

    pub fn add(&self, name: &str) {
        self.state.lock().names.push(name.to_string());
    }

    pub fn remove(&self, name: &str) {
        self.state
            .lock()
            .names
            .retain(|n| !n.eq_ignore_ascii_case(name));
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }
}

impl ProcessTable for FakeProcessTable {
    fn process_names(&mut self) -> Result<Vec<String>> {
        let state = self.state.lock();
        if state.failing {
            bail!("process enumeration failed");
        }
        Ok(state.names.clone())
    }

    fn kill_by_name(&mut self, name: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.names.len();
        state.names.retain(|n| !n.eq_ignore_ascii_case(name));
        state.names.len() != before
    }
}

// ===== VoiceMeeter =====

#[derive(Default)]
struct VmState {
    running: bool,
    api_online: bool,
    connected: bool,
    ignores_shutdown: bool,
    launch_fails: bool,
    launches: usize,
    launch_attempts: usize,
    killed: bool,
    writes: usize,
    floats: BTreeMap<String, f32>,
    strings: BTreeMap<String, String>,
}

impl VmState {
    fn check(&mut self, call: &'static str, param: &str) -> Result<(), RemoteError> {
        if !self.connected {
            return Err(RemoteError::NotConnected);
        }
        if !self.running || !self.api_online {
            self.connected = false;
            return Err(RemoteError::Call {
                call,
                param: param.to_string(),
                code: -2,
            });
        }
        Ok(())
    }
}

/// A simulated engine: the remote API and the process share one state
#[derive(Clone)]
pub struct FakeVoicemeeter {
    state: Arc<Mutex<VmState>>,
}

impl FakeVoicemeeter {
    fn with_running(running: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(VmState {
                running,
                api_online: true,
                ..VmState::default()
            })),
        }
    }

    pub fn stopped() -> Self {
        Self::with_running(false)
    }

    pub fn running() -> Self {
        Self::with_running(true)
    }

    pub fn remote(&self) -> FakeRemote {
        FakeRemote {
            state: self.state.clone(),
        }
    }

    pub fn process(&self) -> FakeEngineProcess {
        FakeEngineProcess {
            state: self.state.clone(),
        }
    }

    /// Successful launches
    pub fn launches(&self) -> usize {
        self.state.lock().launches
    }

    pub fn launch_attempts(&self) -> usize {
        self.state.lock().launch_attempts
    }

    pub fn set_launch_fails(&self, fails: bool) {
        self.state.lock().launch_fails = fails;
    }

    pub fn set_api_online(&self, online: bool) {
        self.state.lock().api_online = online;
    }

    pub fn set_ignores_shutdown(&self, ignores: bool) {
        self.state.lock().ignores_shutdown = ignores;
    }

    /// The process dies and takes its settings with it
    pub fn crash(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.floats.clear();
        state.strings.clear();
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn was_killed(&self) -> bool {
        self.state.lock().killed
    }

    pub fn float(&self, param: &str) -> Option<f32> {
        self.state.lock().floats.get(param).copied()
    }

    pub fn string(&self, param: &str) -> Option<String> {
        self.state.lock().strings.get(param).cloned()
    }

    /// A change made in the VoiceMeeter UI; not counted as a write
    pub fn set_float_external(&self, param: &str, value: f32) {
        self.state.lock().floats.insert(param.to_string(), value);
    }

    pub fn set_string_external(&self, param: &str, value: &str) {
        self.state
            .lock()
            .strings
            .insert(param.to_string(), value.to_string());
    }

    pub fn reset_write_count(&self) {
        self.state.lock().writes = 0;
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }
}

pub struct FakeRemote {
    state: Arc<Mutex<VmState>>,
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn login(&self) -> Result<(), RemoteError> {
        self.state.lock().connected = true;
        Ok(())
    }

    async fn logout(&self) {
        self.state.lock().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn get_float(&self, param: &str) -> Result<f32, RemoteError> {
        let mut state = self.state.lock();
        state.check("GetParameterFloat", param)?;
        Ok(state.floats.get(param).copied().unwrap_or(0.0))
    }

    async fn set_float(&self, param: &str, value: f32) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.check("SetParameterFloat", param)?;
        state.writes += 1;
        state.floats.insert(param.to_string(), value);
        if param == "Command.Shutdown" && value == 1.0 && !state.ignores_shutdown {
            state.running = false;
        }
        Ok(())
    }

    async fn get_string(&self, param: &str) -> Result<String, RemoteError> {
        let mut state = self.state.lock();
        state.check("GetParameterStringA", param)?;
        Ok(state.strings.get(param).cloned().unwrap_or_default())
    }

    async fn set_string(&self, param: &str, value: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.check("SetParameterStringA", param)?;
        state.writes += 1;
        state.strings.insert(param.to_string(), value.to_string());
        if let Some(slot) = param.strip_suffix(".device.wdm") {
            state
                .strings
                .insert(format!("{}.device.name", slot), value.to_string());
        }
        Ok(())
    }
}

pub struct FakeEngineProcess {
    state: Arc<Mutex<VmState>>,
}

#[async_trait]
impl EngineProcess for FakeEngineProcess {
    fn is_running(&self) -> Result<bool> {
        Ok(self.state.lock().running)
    }

    async fn launch(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.launch_attempts += 1;
        if state.launch_fails {
            bail!("executable not found");
        }
        state.launches += 1;
        state.running = true;
        Ok(())
    }

    fn kill(&self) -> bool {
        let mut state = self.state.lock();
        let was_running = state.running;
        state.running = false;
        state.killed |= was_running;
        was_running
    }
}

// ===== Audio sessions =====

#[derive(Default)]
struct SessionsState {
    snapshot: SessionSnapshot,
    assigns: usize,
    failing: bool,
}

/// Scriptable session list; assignments move sessions immediately
#[derive(Clone, Default)]
pub struct FakeSessions {
    state: Arc<Mutex<SessionsState>>,
}

impl FakeSessions {
    pub fn new(default_render: &str) -> Self {
        let sessions = Self::default();
        sessions.state.lock().snapshot.default_render = Some(default_render.to_string());
        sessions
    }

    /// Add a stream; a process added twice plays on both devices
    pub fn add(&self, process: &str, state: SessionState, device: &str) {
        let process = process.to_lowercase();
        let mut guard = self.state.lock();
        let sessions = &mut guard.snapshot.sessions;
        match sessions.iter().position(|s| s.process == process) {
            Some(index) => sessions[index].devices.push(device.to_string()),
            None => sessions.push(AudioSession {
                process,
                state,
                devices: vec![device.to_string()],
            }),
        }
    }

    pub fn devices_of(&self, process: &str) -> Vec<String> {
        self.state
            .lock()
            .snapshot
            .sessions
            .iter()
            .find(|s| s.process == process)
            .map(|s| s.devices.clone())
            .unwrap_or_default()
    }

    /// First device of `process`
    pub fn device_of(&self, process: &str) -> Option<String> {
        self.devices_of(process).into_iter().next()
    }

    pub fn assign_count(&self) -> usize {
        self.state.lock().assigns
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }
}

#[async_trait]
impl AudioSessions for FakeSessions {
    async fn probe(&self) -> Result<(), SessionError> {
        self.snapshot().await.map(|_| ())
    }

    async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let state = self.state.lock();
        if state.failing {
            return Err(SessionError::Timeout(10));
        }
        Ok(state.snapshot.clone())
    }

    async fn assign(&self, process: &str, target: &DeviceTarget) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(SessionError::Timeout(10));
        }
        let device = target
            .resolve(&state.snapshot)
            .unwrap_or(target.as_arg())
            .to_string();
        let mut moved = 0;
        for session in state.snapshot.sessions.iter_mut() {
            if session.process == process {
                session.devices = vec![device.clone()];
                moved += 1;
            }
        }
        if moved == 0 {
            return Err(SessionError::Rejected {
                process: process.to_string(),
                device: target.to_string(),
                output: "0 items found".to_string(),
            });
        }
        state.assigns += 1;
        Ok(())
    }
}
