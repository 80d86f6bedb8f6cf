//! VoiceMeeter lifecycle manager
//!
//! Keeps the engine running and reachable, restores persisted devices,
//! flags and gains on every new connection, and performs the ordered
//! shutdown sequence.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::params::{FlagTarget, Layout, DEVICE_SLOTS};
use super::{EngineProcess, RemoteApi, RemoteError};
use crate::store::{DeviceAssignment, EngineStatus, GainState};

/// Differences below this are engine rounding, not drift
const FLOAT_TOLERANCE: f32 = 0.05;

/// Longest pause between reachability probes while waiting for the engine
const MAX_PROBE_DELAY: Duration = Duration::from_secs(2);

/// How long a shutdown command gets before the process is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Engine state read back before shutdown
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capture {
    /// `None` when unreadable or when the engine still matches the stored sliders
    pub gains: Option<GainState>,
    pub devices: DeviceAssignment,
}

pub struct Lifecycle {
    remote: Box<dyn RemoteApi>,
    process: Box<dyn EngineProcess>,
    layout: Layout,
    readiness_timeout: Duration,
    status: EngineStatus,
    issues: Vec<String>,
    failures: u32,
    retry_at: Option<Instant>,
}

impl Lifecycle {
    pub fn new(
        remote: Box<dyn RemoteApi>,
        process: Box<dyn EngineProcess>,
        layout: Layout,
        readiness_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            process,
            layout,
            readiness_timeout,
            status: EngineStatus::Starting,
            issues: Vec::new(),
            failures: 0,
            retry_at: None,
        }
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    /// Configuration problems found during the last restore
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn reconfigure(&mut self, layout: Layout, readiness_timeout: Duration) {
        self.layout = layout;
        self.readiness_timeout = readiness_timeout;
    }

    /// Make sure the engine is running and reachable. A fresh connection is
    /// followed by a full restore of `devices` and `gains`.
    ///
    /// Returns whether the engine is ready. Failed attempts are retried no
    /// sooner than a linear backoff (1 s per failure, capped at 30 s).
    pub async fn ensure_ready(&mut self, devices: &DeviceAssignment, gains: &GainState) -> bool {
        if self.status.is_ready() {
            match self.ping().await {
                Ok(()) => return true,
                Err(e) => {
                    warn!("⚠️  VoiceMeeter stopped responding: {}", e);
                    self.remote.logout().await;
                    self.status = EngineStatus::Degraded {
                        reason: format!("VoiceMeeter stopped responding: {}", e),
                    };
                    self.retry_at = None;
                }
            }
        }

        if let Some(at) = self.retry_at {
            if Instant::now() < at {
                debug!("VoiceMeeter retry not due yet");
                return false;
            }
        }

        match self.connect().await {
            Ok(()) => {
                self.failures = 0;
                self.retry_at = None;
                self.restore(devices, gains).await;
                self.status = EngineStatus::Ready;
                info!("✅ VoiceMeeter ready");
                true
            }
            Err(reason) => {
                self.failures += 1;
                let delay = Duration::from_secs(u64::from(self.failures).min(30));
                self.retry_at = Some(Instant::now() + delay);
                warn!(
                    "⏳ VoiceMeeter unavailable ({}), retry #{} in {}s",
                    reason,
                    self.failures,
                    delay.as_secs()
                );
                self.status = EngineStatus::Degraded { reason };
                false
            }
        }
    }

    async fn connect(&mut self) -> Result<(), String> {
        let running = match self.process.is_running() {
            Ok(running) => running,
            Err(e) => {
                debug!("Process check failed, trying the remote API anyway: {}", e);
                true
            }
        };
        if !running {
            self.status = EngineStatus::Starting;
            self.process
                .launch()
                .await
                .map_err(|e| format!("launch failed: {:#}", e))?;
        }
        self.wait_until_reachable().await
    }

    async fn wait_until_reachable(&self) -> Result<(), String> {
        let deadline = Instant::now() + self.readiness_timeout;
        let mut delay = Duration::from_millis(250);
        loop {
            let attempt = match self.remote.login().await {
                Ok(()) => self.ping().await,
                Err(e) => Err(e),
            };
            let error = match attempt {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if matches!(
                error,
                RemoteError::LibraryNotFound(_) | RemoteError::LibraryLoad(_)
            ) {
                return Err(error.to_string());
            }
            if Instant::now() + delay > deadline {
                return Err(format!(
                    "remote API not reachable within {}s: {}",
                    self.readiness_timeout.as_secs(),
                    error
                ));
            }
            sleep(delay).await;
            delay = (delay * 2).min(MAX_PROBE_DELAY);
        }
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let probe = &self.layout.gain_param_names()[0];
        self.remote.get_float(probe).await.map(|_| ())
    }

    /// Push persisted state into a freshly connected engine
    async fn restore(&mut self, devices: &DeviceAssignment, gains: &GainState) {
        self.issues.clear();
        if let Err(e) = devices.mic_device(self.layout.mic_strip) {
            warn!("⚠️  {}", e);
            self.issues.push(e.to_string());
        }

        match self.restore_devices(devices).await {
            Ok(n) => debug!("Restored {} device assignment(s)", n),
            Err(e) => warn!("Device restore failed: {}", e),
        }
        match self.sync_flags(&self.layout.base_flags()).await {
            Ok(n) => debug!("Restored {} base routing flag(s)", n),
            Err(e) => warn!("Routing flag restore failed: {}", e),
        }
        match self.sync_gains(gains).await {
            Ok(n) => debug!("Restored {} gain parameter(s)", n),
            Err(e) => warn!("Gain restore failed: {}", e),
        }
        info!("🎚️  VoiceMeeter state restored ({} devices)", devices.len());
    }

    /// Apply hardware devices that differ from `devices`; returns the number
    /// of writes. Only runs on a fresh connection, so a device picked in the
    /// VoiceMeeter UI afterwards stays until the next restart.
    async fn restore_devices(&self, devices: &DeviceAssignment) -> Result<usize, RemoteError> {
        let mut writes = 0;
        for (slot, device) in devices.iter() {
            let current = self.remote.get_string(&format!("{}.device.name", slot)).await?;
            if current.trim().eq_ignore_ascii_case(device.trim()) {
                continue;
            }
            info!("🔌 {} device: '{}' → '{}'", slot, current, device);
            self.remote
                .set_string(&format!("{}.device.wdm", slot), device)
                .await?;
            writes += 1;
        }
        Ok(writes)
    }

    /// Re-apply routing flags that differ from `flags`
    pub async fn sync_flags(&self, flags: &[FlagTarget]) -> Result<usize, RemoteError> {
        let mut writes = 0;
        for flag in flags {
            let current = self.remote.get_float(&flag.param).await?;
            if (current - flag.value()).abs() < FLOAT_TOLERANCE {
                continue;
            }
            debug!("{} = {} (was {})", flag.param, flag.value(), current);
            self.remote.set_float(&flag.param, flag.value()).await?;
            writes += 1;
        }
        Ok(writes)
    }

    /// Re-apply gain parameters that differ from the slider state
    pub async fn sync_gains(&self, gains: &GainState) -> Result<usize, RemoteError> {
        let mut writes = 0;
        for (param, db) in self.layout.gain_params(gains) {
            let desired = db as f32;
            let current = self.remote.get_float(&param).await?;
            if (current - desired).abs() < FLOAT_TOLERANCE {
                continue;
            }
            debug!("{} = {:.1} dB (was {:.1})", param, desired, current);
            self.remote.set_float(&param, desired).await?;
            writes += 1;
        }
        Ok(writes)
    }

    /// Read sliders and hardware devices back from the engine
    pub async fn capture(&self, stored: &GainState) -> Capture {
        let mut capture = Capture::default();
        if !self.remote.is_connected() {
            return capture;
        }

        let mut values = BTreeMap::new();
        for param in self.layout.gain_param_names() {
            match self.remote.get_float(&param).await {
                Ok(value) => {
                    values.insert(param, f64::from(value));
                }
                Err(e) => debug!("Could not read {}: {}", param, e),
            }
        }
        let unchanged = self
            .layout
            .gain_params(stored)
            .iter()
            .all(|(param, db)| {
                values
                    .get(param)
                    .is_some_and(|v| (v - db).abs() < f64::from(FLOAT_TOLERANCE))
            });
        if !unchanged {
            capture.gains = self.layout.gains_from_params(&values);
        }

        for slot in DEVICE_SLOTS {
            match self.remote.get_string(&format!("{}.device.name", slot)).await {
                Ok(name) if !name.is_empty() => capture.devices.set(slot, name),
                Ok(_) => {}
                Err(e) => debug!("Could not read {} device: {}", slot, e),
            }
        }
        capture
    }

    /// Ask the engine to shut down, kill it if it lingers, then log out
    pub async fn stop(&mut self) {
        if self.remote.is_connected() {
            match self.remote.set_float("Command.Shutdown", 1.0).await {
                Ok(()) => info!("VoiceMeeter shutdown requested"),
                Err(e) => warn!("Shutdown command failed: {}", e),
            }
        }

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while matches!(self.process.is_running(), Ok(true)) && Instant::now() < deadline {
            sleep(Duration::from_millis(250)).await;
        }
        if matches!(self.process.is_running(), Ok(true)) {
            self.process.kill();
        }

        self.remote.logout().await;
        self.status = EngineStatus::Stopped;
    }
}
