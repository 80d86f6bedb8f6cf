//! Commands accepted by the routing engine
//!
//! Every command is stamped with a sequence number by the handle. The engine
//! applies commands strictly in that order and reports the highest processed
//! number as `last_ack` in the runtime document.

use serde::{Deserialize, Serialize};

use crate::mode::Selection;
use crate::presets::PresetId;
use crate::store::{GainChannel, GainState};

/// Partial slider update; absent fields keep their current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainUpdate {
    pub others: Option<f64>,
    pub me: Option<f64>,
    pub voice: Option<f64>,
    pub bass: Option<f64>,
    pub mid: Option<f64>,
    pub treble: Option<f64>,
}

impl GainUpdate {
    pub fn set(channel: GainChannel, value: f64) -> Self {
        let mut update = Self::default();
        *update.slot(channel) = Some(value);
        update
    }

    fn slot(&mut self, channel: GainChannel) -> &mut Option<f64> {
        match channel {
            GainChannel::Others => &mut self.others,
            GainChannel::Me => &mut self.me,
            GainChannel::Voice => &mut self.voice,
            GainChannel::Bass => &mut self.bass,
            GainChannel::Mid => &mut self.mid,
            GainChannel::Treble => &mut self.treble,
        }
    }

    /// `current` with every present field replaced (and clamped)
    pub fn apply_to(mut self, current: GainState) -> GainState {
        let mut next = current;
        for channel in GainChannel::ALL {
            if let Some(value) = *self.slot(channel) {
                next.set(channel, value);
            }
        }
        next
    }
}

/// A request to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Select a fixed mode or the Auto policy
    SelectMode(Selection),
    SetGains(GainUpdate),
    /// Save a preset; `None` snapshots the live sliders
    CreatePreset {
        name: String,
        snapshot: Option<GainState>,
    },
    ApplyPreset(PresetId),
    RenamePreset {
        id: PresetId,
        name: String,
    },
    ReorderPreset {
        id: PresetId,
        position: usize,
    },
    /// Replace a preset's snapshot; `None` uses the live sliders
    OverwritePreset {
        id: PresetId,
        snapshot: Option<GainState>,
    },
    DeletePreset(PresetId),
    /// The user confirmed the one-time in-app mic setup
    AcknowledgeMicSetup,
    Shutdown,
}

/// A command with its issue-order sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub seq: u64,
    pub command: EngineCommand,
}
