//! Strip/bus layout and the engine parameters derived from it

use std::collections::BTreeMap;

use crate::config::AppConfig;
use crate::mode::Mode;
use crate::store::{GainChannel, GainState};

use super::levels::{db_to_pct, pct_to_db, round_db, ENGINE_MAX_DB, ENGINE_MIN_DB};

/// Hardware strips and buses whose device assignment is saved and restored
pub const DEVICE_SLOTS: [&str; 6] = ["Strip[0]", "Strip[1]", "Strip[2]", "Bus[0]", "Bus[1]", "Bus[2]"];

/// Desired value of one boolean routing flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagTarget {
    pub param: String,
    pub enabled: bool,
}

impl FlagTarget {
    fn new(param: String, enabled: bool) -> Self {
        Self { param, enabled }
    }

    pub fn value(&self) -> f32 {
        if self.enabled {
            1.0
        } else {
            0.0
        }
    }
}

/// Where music and microphone live inside VoiceMeeter
///
/// Virtual output B1 is the bus the VR application records as its microphone,
/// B2 is the bus monitored on the headset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub music_strip: u8,
    pub mic_strip: u8,
    /// Bus index of virtual output B1
    pub mic_bus: u8,
    /// Bus index of virtual output B2
    pub headset_bus: u8,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            music_strip: 3,
            mic_strip: 0,
            mic_bus: 3,
            headset_bus: 4,
        }
    }
}

impl Layout {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            music_strip: config.music_strip,
            mic_strip: config.mic_strip,
            ..Self::default()
        }
    }

    fn music(&self, field: &str) -> String {
        format!("Strip[{}].{}", self.music_strip, field)
    }

    fn mic(&self, field: &str) -> String {
        format!("Strip[{}].{}", self.mic_strip, field)
    }

    /// Flags that hold in every mode: mic on the mic bus, neither strip on A1
    pub fn base_flags(&self) -> Vec<FlagTarget> {
        vec![
            FlagTarget::new(self.mic("B1"), true),
            FlagTarget::new(self.mic("A1"), false),
            FlagTarget::new(self.music("A1"), false),
        ]
    }

    /// Full flag set for a routing mode
    pub fn flags_for(&self, mode: Mode) -> Vec<FlagTarget> {
        let mut flags = self.base_flags();
        flags.push(FlagTarget::new(self.music("B2"), mode != Mode::Desktop));
        flags.push(FlagTarget::new(self.music("B1"), mode == Mode::Public));
        flags
    }

    /// Names of the parameters carrying the slider state
    pub fn gain_param_names(&self) -> [String; 7] {
        [
            self.music("Gain"),
            format!("Bus[{}].Gain", self.mic_bus),
            format!("Bus[{}].Gain", self.headset_bus),
            self.mic("Gain"),
            self.music("eqgain1"),
            self.music("eqgain2"),
            self.music("eqgain3"),
        ]
    }

    /// Engine parameter values for a slider state
    ///
    /// Music runs through the music strip into both B1 and B2, so the two
    /// music levels are split between the strip gain and the two bus gains.
    /// The mic strip compensates for the B1 bus gain it shares with music.
    pub fn gain_params(&self, gains: &GainState) -> Vec<(String, f64)> {
        let others = pct_to_db(gains.get(GainChannel::Others), GainChannel::Others);
        let me = pct_to_db(gains.get(GainChannel::Me), GainChannel::Me);
        let voice = pct_to_db(gains.get(GainChannel::Voice), GainChannel::Voice);

        let strip = ((others + me) / 2.0)
            .min(ENGINE_MAX_DB)
            .max(others.max(me) - ENGINE_MAX_DB);
        let mic_bus = others - strip;
        let headset_bus = me - strip;
        let mic_strip = (voice - mic_bus).clamp(ENGINE_MIN_DB, ENGINE_MAX_DB);

        let values = [
            strip,
            mic_bus,
            headset_bus,
            mic_strip,
            pct_to_db(gains.get(GainChannel::Bass), GainChannel::Bass),
            pct_to_db(gains.get(GainChannel::Mid), GainChannel::Mid),
            pct_to_db(gains.get(GainChannel::Treble), GainChannel::Treble),
        ];
        self.gain_param_names()
            .into_iter()
            .zip(values)
            .map(|(name, db)| (name, round_db(db)))
            .collect()
    }

    /// Slider state reproduced from engine parameter values.
    /// Returns `None` if any parameter is missing.
    pub fn gains_from_params(&self, values: &BTreeMap<String, f64>) -> Option<GainState> {
        let [strip, mic_bus, headset_bus, mic_strip, bass, mid, treble] =
            self.gain_param_names().map(|name| values.get(&name).copied());
        let (strip, mic_bus, headset_bus, mic_strip) = (strip?, mic_bus?, headset_bus?, mic_strip?);

        Some(GainState::new(
            db_to_pct(strip + mic_bus, GainChannel::Others),
            db_to_pct(strip + headset_bus, GainChannel::Me),
            db_to_pct(mic_strip + mic_bus, GainChannel::Voice),
            db_to_pct(bass?, GainChannel::Bass),
            db_to_pct(mid?, GainChannel::Mid),
            db_to_pct(treble?, GainChannel::Treble),
        ))
    }
}
