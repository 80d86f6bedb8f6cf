//! Persisted document types
//!
//! Defines the gain/EQ snapshot, the hardware device map and the runtime
//! signaling document shared with companion UIs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::mode::{Mode, Policy};

/// One slider of the mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GainChannel {
    /// Music level heard by others (through the mic bus)
    Others,
    /// Music level heard by the user (headset bus)
    Me,
    /// Own voice level
    Voice,
    Bass,
    Mid,
    Treble,
}

impl GainChannel {
    pub const ALL: [GainChannel; 6] = [
        GainChannel::Others,
        GainChannel::Me,
        GainChannel::Voice,
        GainChannel::Bass,
        GainChannel::Mid,
        GainChannel::Treble,
    ];

    pub fn is_eq(self) -> bool {
        matches!(self, GainChannel::Bass | GainChannel::Mid | GainChannel::Treble)
    }

    /// Valid percentage range
    pub fn range(self) -> (f64, f64) {
        if self.is_eq() {
            (0.0, 100.0)
        } else {
            (-100.0, 100.0)
        }
    }

    /// Neutral value: 0% for levels, 100% for EQ bands
    pub fn neutral(self) -> f64 {
        if self.is_eq() {
            100.0
        } else {
            0.0
        }
    }

    /// Clamp a value into range; non-finite values fall back to neutral
    pub fn clamp(self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.neutral();
        }
        let (lo, hi) = self.range();
        value.clamp(lo, hi)
    }
}

impl fmt::Display for GainChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GainChannel::Others => "others",
            GainChannel::Me => "me",
            GainChannel::Voice => "voice",
            GainChannel::Bass => "bass",
            GainChannel::Mid => "mid",
            GainChannel::Treble => "treble",
        };
        f.write_str(name)
    }
}

/// Slider positions in percent
///
/// Values are clamped whenever they are written, including when a persisted
/// document is deserialized. Reads return the stored value untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawGainState")]
pub struct GainState {
    others: f64,
    me: f64,
    voice: f64,
    bass: f64,
    mid: f64,
    treble: f64,
}

impl Default for GainState {
    fn default() -> Self {
        Self {
            others: 0.0,
            me: 0.0,
            voice: 0.0,
            bass: 100.0,
            mid: 100.0,
            treble: 100.0,
        }
    }
}

impl GainState {
    /// Build from raw values, clamping each into its range
    pub fn new(others: f64, me: f64, voice: f64, bass: f64, mid: f64, treble: f64) -> Self {
        let mut state = Self::default();
        state.set(GainChannel::Others, others);
        state.set(GainChannel::Me, me);
        state.set(GainChannel::Voice, voice);
        state.set(GainChannel::Bass, bass);
        state.set(GainChannel::Mid, mid);
        state.set(GainChannel::Treble, treble);
        state
    }

    pub fn get(&self, channel: GainChannel) -> f64 {
        match channel {
            GainChannel::Others => self.others,
            GainChannel::Me => self.me,
            GainChannel::Voice => self.voice,
            GainChannel::Bass => self.bass,
            GainChannel::Mid => self.mid,
            GainChannel::Treble => self.treble,
        }
    }

    pub fn set(&mut self, channel: GainChannel, value: f64) {
        let value = channel.clamp(value);
        match channel {
            GainChannel::Others => self.others = value,
            GainChannel::Me => self.me = value,
            GainChannel::Voice => self.voice = value,
            GainChannel::Bass => self.bass = value,
            GainChannel::Mid => self.mid = value,
            GainChannel::Treble => self.treble = value,
        }
    }

    pub fn with(mut self, channel: GainChannel, value: f64) -> Self {
        self.set(channel, value);
        self
    }
}

/// Deserialization shape; missing channels take their neutral value
#[derive(Deserialize)]
#[serde(default)]
struct RawGainState {
    others: f64,
    me: f64,
    voice: f64,
    bass: f64,
    mid: f64,
    treble: f64,
}

impl Default for RawGainState {
    fn default() -> Self {
        let d = GainState::default();
        Self {
            others: d.others,
            me: d.me,
            voice: d.voice,
            bass: d.bass,
            mid: d.mid,
            treble: d.treble,
        }
    }
}

impl From<RawGainState> for GainState {
    fn from(raw: RawGainState) -> Self {
        GainState::new(raw.others, raw.me, raw.voice, raw.bass, raw.mid, raw.treble)
    }
}

/// Device configuration problems
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("no capture device assigned to microphone strip {0}")]
    MissingMicDevice(String),
}

/// Hardware device per VoiceMeeter strip/bus (`"Strip[0]"` → device name)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAssignment(BTreeMap<String, String>);

impl DeviceAssignment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, device: impl Into<String>) {
        self.0.insert(key.into(), device.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge newer assignments over these ones; returns whether anything changed
    pub fn merge(&mut self, other: &DeviceAssignment) -> bool {
        let mut changed = false;
        for (key, device) in other.iter() {
            if self.get(key) != Some(device) {
                self.set(key, device);
                changed = true;
            }
        }
        changed
    }

    /// The device behind the microphone strip. Its absence is a configuration
    /// error, never a silent no-op.
    pub fn mic_device(&self, mic_strip: u8) -> Result<&str, DeviceError> {
        let key = format!("Strip[{}]", mic_strip);
        match self.get(&key) {
            Some(device) if !device.trim().is_empty() => Ok(device),
            _ => Err(DeviceError::MissingMicDevice(key)),
        }
    }
}

/// VoiceMeeter availability as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EngineStatus {
    Starting,
    Ready,
    /// Routing is limited to desktop-only until resolved
    Degraded { reason: String },
    Stopped,
}

impl EngineStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineStatus::Ready)
    }
}

/// A command that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFailure {
    pub seq: u64,
    pub message: String,
}

/// Live signaling document, written only by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub mode: Mode,
    pub policy: Policy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_mode: Option<Mode>,
    pub vr_present: bool,
    pub engine: EngineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconcile: Option<DateTime<Utc>>,
    /// Highest command sequence number processed
    pub last_ack: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<CommandFailure>,
    /// Configuration problems needing user attention
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    /// The one-time in-app mic setup step has not been confirmed yet
    pub mic_setup_pending: bool,
}

impl RuntimeState {
    pub fn new(mode: Mode, policy: Policy, vr_present: bool) -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
            mode,
            policy,
            override_mode: None,
            vr_present,
            engine: EngineStatus::Starting,
            last_reconcile: None,
            last_ack: 0,
            last_error: None,
            issues: Vec::new(),
            mic_setup_pending: false,
        }
    }
}
