//! Routing reconciler
//!
//! Computes the desired per-app devices, routing flags and gains for a mode
//! and re-applies whatever drifted. Hardware devices are not part of a pass:
//! they are restored on each new engine connection and otherwise left to
//! the user. Every write is preceded by a read, so a
//! pass over a system that already matches performs no external writes.
//!
//! | Mode    | App devices     | Music → B2 | Music → B1 |
//! |---------|-----------------|------------|------------|
//! | Desktop | physical output | off        | off        |
//! | Private | virtual input   | on         | off        |
//! | Public  | virtual input   | on         | on         |

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::mode::Mode;
use crate::sessions::{AudioSession, AudioSessions, DeviceTarget, SessionSnapshot, SessionState};
use crate::store::GainState;
use crate::voicemeeter::{FlagTarget, Lifecycle};

/// Desired external state for one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub devices: DeviceTarget,
    /// Empty while the engine is unavailable
    pub flags: Vec<FlagTarget>,
}

/// Output used for app audio outside VR modes
pub fn desktop_target(config: &AppConfig) -> DeviceTarget {
    match &config.desktop_device {
        Some(device) if !device.trim().is_empty() => DeviceTarget::Named(device.clone()),
        _ => DeviceTarget::SystemDefault,
    }
}

/// Desired state for `mode`. Without a ready engine the virtual device
/// carries no audio anywhere, so apps go to the desktop output and no
/// engine flags are targeted.
pub fn target_for(mode: Mode, engine_ready: bool, config: &AppConfig, lifecycle: &Lifecycle) -> Target {
    if !engine_ready {
        return Target {
            devices: desktop_target(config),
            flags: Vec::new(),
        };
    }
    let devices = if mode.uses_virtual_device() {
        DeviceTarget::Named(config.vr_device.clone())
    } else {
        desktop_target(config)
    };
    Target {
        devices,
        flags: lifecycle.layout().flags_for(mode),
    }
}

/// What a pass does with one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// In the exclusion set; never touched
    Excluded,
    /// Not active; left alone
    Idle,
    /// Already on the target device
    InPlace,
    Reassign,
}

pub fn decide(
    session: &AudioSession,
    target: &DeviceTarget,
    snapshot: &SessionSnapshot,
    exclusions: &BTreeSet<String>,
    vr_device: &str,
) -> SessionAction {
    if exclusions.contains(&session.process) {
        return SessionAction::Excluded;
    }
    if session.state != SessionState::Active {
        return SessionAction::Idle;
    }
    match target.resolve(snapshot) {
        // A process with any stream elsewhere is moved as a whole
        Some(device) if session.only_on(device) => SessionAction::InPlace,
        Some(_) => SessionAction::Reassign,
        // Unknown system default: only pull sessions off the virtual device
        None if session.plays_on(vr_device) => SessionAction::Reassign,
        None => SessionAction::InPlace,
    }
}

/// Move every active, non-excluded session that is off `target`
pub async fn route_sessions(
    sessions: &dyn AudioSessions,
    target: &DeviceTarget,
    config: &AppConfig,
    report: &mut PassReport,
) {
    let snapshot = match sessions.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Session enumeration failed: {}", e);
            report.failures.push(e.to_string());
            return;
        }
    };
    let exclusions = config.exclusions();
    for session in &snapshot.sessions {
        match decide(session, target, &snapshot, &exclusions, &config.vr_device) {
            SessionAction::Excluded => report.excluded += 1,
            SessionAction::Idle | SessionAction::InPlace => {}
            SessionAction::Reassign => match sessions.assign(&session.process, target).await {
                Ok(()) => {
                    info!("🔀 {} → {}", session.process, target);
                    report.session_writes += 1;
                }
                Err(e) => {
                    warn!("Failed to move {}: {}", session.process, e);
                    report.failures.push(e.to_string());
                }
            },
        }
    }
}

/// Inputs to one pass
pub struct PassContext<'a> {
    pub mode: Mode,
    pub config: &'a AppConfig,
    pub gains: &'a GainState,
}

/// What one pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub session_writes: usize,
    pub engine_writes: usize,
    pub excluded: usize,
    pub failures: Vec<String>,
}

impl PassReport {
    pub fn external_writes(&self) -> usize {
        self.session_writes + self.engine_writes
    }
}

/// Run one reconciliation pass. Failures are collected, never propagated:
/// whatever failed is retried by the next pass.
pub async fn run_pass(
    ctx: PassContext<'_>,
    sessions: &dyn AudioSessions,
    lifecycle: &Lifecycle,
) -> PassReport {
    let engine_ready = lifecycle.is_ready();
    let target = target_for(ctx.mode, engine_ready, ctx.config, lifecycle);
    let mut report = PassReport::default();

    route_sessions(sessions, &target.devices, ctx.config, &mut report).await;

    if engine_ready {
        let flags = lifecycle.sync_flags(&target.flags).await;
        let gains = lifecycle.sync_gains(ctx.gains).await;
        for result in [flags, gains] {
            match result {
                Ok(writes) => report.engine_writes += writes,
                Err(e) => {
                    warn!("VoiceMeeter sync failed: {}", e);
                    report.failures.push(e.to_string());
                }
            }
        }
    }

    if report.external_writes() > 0 {
        info!(
            "Reconciled {} ({} session, {} engine writes)",
            ctx.mode, report.session_writes, report.engine_writes
        );
    } else {
        debug!("Reconcile pass: no drift ({})", ctx.mode);
    }
    report
}
