//! Routing engine actor
//!
//! A single task owns every document, the mode machine and the external
//! backends. Presence polling and enforcement run on interval timers inside
//! one `select!` loop; commands from [`EngineHandle`] are applied in issue
//! order between passes, never in the middle of one.
//!
//! ```text
//!  EngineHandle ──commands──▶ ┌──────────────────────────────┐
//!                             │ Engine                       │
//!  ConfigWatcher ──configs──▶ │  PresenceMonitor → ModeMachine│──▶ svcl
//!                             │  reconciler::run_pass        │──▶ VoiceMeeter
//!  watch<EngineView> ◀────────│  Store (single writer)       │──▶ *.json
//!                             └──────────────────────────────┘
//! ```

mod commands;
mod handle;
pub mod instance;

pub use commands::{EngineCommand, Envelope, GainUpdate};
pub use handle::{EngineHandle, EngineStopped};

use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::mode::{ModeChange, ModeMachine, Selection};
use crate::presence::{PresenceMonitor, ProcessTable};
use crate::presets::{PresetError, PresetList};
use crate::reconciler::{self, PassContext, PassReport};
use crate::sessions::AudioSessions;
use crate::store::{CommandFailure, EngineStatus, GainState, RuntimeState, Store};
use crate::voicemeeter::{Layout, Lifecycle};

/// Snapshot published to observers after every pass and command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineView {
    pub runtime: RuntimeState,
    pub selection: Selection,
    pub gains: GainState,
    pub presets: PresetList,
}

/// External collaborators of the engine
pub struct EngineDeps {
    pub store: Store,
    pub lifecycle: Lifecycle,
    pub sessions: Box<dyn AudioSessions>,
    pub process_table: Box<dyn ProcessTable>,
}

pub struct Engine {
    store: Store,
    machine: ModeMachine,
    presence: PresenceMonitor,
    lifecycle: Lifecycle,
    sessions: Box<dyn AudioSessions>,
    runtime: RuntimeState,
    cmd_rx: mpsc::UnboundedReceiver<Envelope>,
    config_rx: Option<mpsc::Receiver<AppConfig>>,
    view_tx: watch::Sender<EngineView>,
}

impl Engine {
    /// Build the engine. The first presence sample is taken here so that
    /// Auto starts in the right mode without waiting for a debounce window.
    pub fn new(deps: EngineDeps, initial: Selection) -> (Self, EngineHandle) {
        let EngineDeps {
            store,
            lifecycle,
            sessions,
            process_table,
        } = deps;
        let config = store.config();

        let mut presence =
            PresenceMonitor::new(&config.vr_process, config.debounce(), process_table);
        presence.poll();
        let machine = ModeMachine::new(config.auto, initial, presence.is_present());
        let runtime = RuntimeState::new(machine.mode(), machine.policy(), machine.vr_present());

        let view = EngineView {
            runtime: runtime.clone(),
            selection: machine.selection(),
            gains: *store.gains(),
            presets: store.presets().clone(),
        };
        let (view_tx, view_rx) = watch::channel(view);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let engine = Self {
            store,
            machine,
            presence,
            lifecycle,
            sessions,
            runtime,
            cmd_rx,
            config_rx: None,
            view_tx,
        };
        (engine, EngineHandle::new(cmd_tx, view_rx))
    }

    /// Feed configuration reloads (from the config watcher) into the loop
    pub fn with_config_updates(mut self, rx: mpsc::Receiver<AppConfig>) -> Self {
        self.config_rx = Some(rx);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until a shutdown command arrives or every handle is dropped
    pub async fn run(mut self) {
        info!(
            "🎬 Routing engine started: {} ({}, VR {})",
            self.machine.mode(),
            self.machine.selection(),
            if self.machine.vr_present() { "present" } else { "absent" }
        );
        self.enforce().await;

        let mut presence_tick = ticker(self.store.config().poll_interval());
        let mut enforce_tick = ticker(self.store.config().enforce_interval());

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(envelope) => {
                        if !self.handle_command(envelope).await {
                            break;
                        }
                    }
                    None => {
                        debug!("All engine handles dropped");
                        break;
                    }
                },
                _ = presence_tick.tick() => self.poll_presence().await,
                _ = enforce_tick.tick() => {
                    self.enforce().await;
                }
                Some(config) = next_config(&mut self.config_rx) => {
                    let previous = self.store.config().clone();
                    self.reload(config).await;
                    let current = self.store.config();
                    if current.poll_interval() != previous.poll_interval() {
                        presence_tick = ticker(current.poll_interval());
                    }
                    if current.enforce_interval() != previous.enforce_interval() {
                        enforce_tick = ticker(current.enforce_interval());
                    }
                }
            }
        }

        self.shutdown().await;
    }

    // =========================================================================
    // Passes
    // =========================================================================

    async fn poll_presence(&mut self) {
        let Some(event) = self.presence.poll() else {
            return;
        };
        match self.machine.on_presence(event) {
            Some(change) => self.on_mode_change(change).await,
            None => self.publish().await,
        }
    }

    async fn on_mode_change(&mut self, change: ModeChange) {
        info!("🔄 Mode {} → {} ({:?})", change.from, change.to, change.cause);
        self.enforce().await;
    }

    /// Make sure the engine is up, then reconcile everything once
    async fn enforce(&mut self) -> PassReport {
        self.store.retry_pending().await;

        let devices = self.store.devices().clone();
        let gains = *self.store.gains();
        self.lifecycle.ensure_ready(&devices, &gains).await;

        let report = reconciler::run_pass(
            PassContext {
                mode: self.machine.mode(),
                config: self.store.config(),
                gains: &gains,
            },
            self.sessions.as_ref(),
            &self.lifecycle,
        )
        .await;

        self.runtime.last_reconcile = Some(Utc::now());
        self.publish().await;
        report
    }

    async fn reload(&mut self, config: AppConfig) {
        if &config == self.store.config() {
            debug!("Config reload: no changes");
            return;
        }
        if let Err(e) = config.validate() {
            warn!("Ignoring invalid configuration: {:#}", e);
            return;
        }
        info!("📝 Configuration reloaded");

        self.presence.reconfigure(&config.vr_process, config.debounce());
        self.lifecycle
            .reconfigure(Layout::from_config(&config), config.readiness_timeout());
        let change = self.machine.set_rules(config.auto);
        self.store.replace_config(config);

        match change {
            Some(change) => self.on_mode_change(change).await,
            None => {
                self.enforce().await;
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Apply one command; returns false when the engine should stop
    async fn handle_command(&mut self, envelope: Envelope) -> bool {
        let Envelope { seq, command } = envelope;
        debug!("Command #{}: {:?}", seq, command);

        let result = match command {
            EngineCommand::Shutdown => {
                self.runtime.last_ack = seq;
                self.publish().await;
                return false;
            }
            EngineCommand::SelectMode(selection) => {
                if let Some(change) = self.machine.select(selection) {
                    self.on_mode_change(change).await;
                }
                Ok(())
            }
            EngineCommand::SetGains(update) => {
                let gains = update.apply_to(*self.store.gains());
                self.push_gains(gains).await;
                Ok(())
            }
            EngineCommand::CreatePreset { name, snapshot } => {
                let snapshot = snapshot.unwrap_or(*self.store.gains());
                self.store
                    .update_presets(|presets| presets.create(&name, snapshot))
                    .await
                    .map(|id| info!("💾 Preset '{}' saved ({})", name.trim(), id))
            }
            EngineCommand::ApplyPreset(id) => match self.store.presets().apply(id) {
                Ok(gains) => {
                    self.push_gains(gains).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            EngineCommand::RenamePreset { id, name } => {
                self.store
                    .update_presets(|presets| presets.rename(id, &name))
                    .await
            }
            EngineCommand::ReorderPreset { id, position } => {
                self.store
                    .update_presets(|presets| presets.reorder(id, position))
                    .await
            }
            EngineCommand::OverwritePreset { id, snapshot } => {
                let snapshot = snapshot.unwrap_or(*self.store.gains());
                self.store
                    .update_presets(|presets| presets.overwrite(id, snapshot))
                    .await
            }
            EngineCommand::DeletePreset(id) => self
                .store
                .update_presets(|presets| presets.delete(id))
                .await
                .map(|preset| info!("🗑️  Preset '{}' deleted", preset.name)),
            EngineCommand::AcknowledgeMicSetup => {
                self.store
                    .update_config(|config| config.vrchat_mic_confirmed = true)
                    .await;
                Ok(())
            }
        };

        self.runtime.last_ack = seq;
        if let Err(e) = result {
            self.command_failed(seq, e);
        }
        self.publish().await;
        true
    }

    fn command_failed(&mut self, seq: u64, error: PresetError) {
        warn!("Command #{} rejected: {}", seq, error);
        self.runtime.last_error = Some(CommandFailure {
            seq,
            message: error.to_string(),
        });
    }

    /// Persist new sliders and write them to the engine right away
    async fn push_gains(&mut self, gains: GainState) {
        self.store.set_gains(gains).await;
        if !self.lifecycle.is_ready() {
            debug!("VoiceMeeter not ready; gains will be applied on reconnect");
            return;
        }
        match self.lifecycle.sync_gains(&gains).await {
            Ok(writes) => debug!("Applied gains ({} writes)", writes),
            Err(e) => warn!("Failed to apply gains (will retry next pass): {}", e),
        }
    }

    // =========================================================================
    // Publication and shutdown
    // =========================================================================

    fn refresh_runtime(&mut self) {
        let runtime = &mut self.runtime;
        runtime.mode = self.machine.mode();
        runtime.policy = self.machine.policy();
        runtime.override_mode = self.machine.override_mode();
        runtime.vr_present = self.machine.vr_present();
        runtime.engine = self.lifecycle.status().clone();
        runtime.issues = self.lifecycle.issues().to_vec();
        runtime.mic_setup_pending = !self.store.config().vrchat_mic_confirmed;
    }

    fn view(&self) -> EngineView {
        EngineView {
            runtime: self.runtime.clone(),
            selection: self.machine.selection(),
            gains: *self.store.gains(),
            presets: self.store.presets().clone(),
        }
    }

    /// Write the runtime document and notify observers
    async fn publish(&mut self) {
        self.refresh_runtime();
        self.store.write_runtime(self.runtime.clone()).await;
        self.view_tx.send_replace(self.view());
    }

    /// Put app audio back on the desktop output, save the engine's state,
    /// stop the engine and remove the runtime document
    async fn shutdown(&mut self) {
        info!("🛑 Shutting down routing engine");

        let mut report = PassReport::default();
        reconciler::route_sessions(
            self.sessions.as_ref(),
            &reconciler::desktop_target(self.store.config()),
            self.store.config(),
            &mut report,
        )
        .await;
        if report.session_writes > 0 {
            info!("Restored {} app(s) to the desktop output", report.session_writes);
        }

        let capture = self.lifecycle.capture(self.store.gains()).await;
        if let Some(gains) = capture.gains {
            info!("🎚️  Keeping slider changes made in VoiceMeeter");
            self.store.set_gains(gains).await;
        }
        if self.store.merge_devices(&capture.devices).await {
            info!("🔌 Saved hardware device assignments");
        }

        self.lifecycle.stop().await;
        self.store.retry_pending().await;
        self.store.remove_runtime().await;

        self.runtime.engine = EngineStatus::Stopped;
        self.view_tx.send_replace(self.view());
        info!("✅ Routing engine stopped");
    }
}

/// Interval whose first tick is one period away
fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_config(rx: &mut Option<mpsc::Receiver<AppConfig>>) -> Option<AppConfig> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
