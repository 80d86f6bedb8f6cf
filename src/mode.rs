//! Routing mode state machine
//!
//! Tracks the effective routing [`Mode`] and the user's policy. Under the
//! Auto policy the mode is derived from VR presence; explicit selections made
//! while Auto is active are governed by an [`OverridePolicy`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::presence::PresenceEvent;

/// Effective routing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Apps play on the physical output, music stays off both virtual buses
    Desktop,
    /// Apps play into the virtual input, music reaches the headset only
    Private,
    /// Apps play into the virtual input, music reaches the headset and the mic
    Public,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Desktop, Mode::Private, Mode::Public];

    /// Whether app audio is routed through the virtual device
    pub fn uses_virtual_device(self) -> bool {
        !matches!(self, Mode::Desktop)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Desktop => write!(f, "desktop"),
            Mode::Private => write!(f, "private"),
            Mode::Public => write!(f, "public"),
        }
    }
}

/// What the user asked for: a fixed mode or the Auto policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    Auto,
    Desktop,
    Private,
    Public,
}

impl Selection {
    /// The fixed mode, or `None` for Auto
    pub fn fixed(self) -> Option<Mode> {
        match self {
            Selection::Auto => None,
            Selection::Desktop => Some(Mode::Desktop),
            Selection::Private => Some(Mode::Private),
            Selection::Public => Some(Mode::Public),
        }
    }
}

impl From<Mode> for Selection {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Desktop => Selection::Desktop,
            Mode::Private => Selection::Private,
            Mode::Public => Selection::Public,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fixed() {
            Some(mode) => mode.fmt(f),
            None => write!(f, "auto"),
        }
    }
}

impl FromStr for Selection {
    type Err = String;

    /// Accepts the current names plus the tray app's legacy ones
    /// (`VR` for Public, `SILENT_VR` for Private).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Selection::Auto),
            "desktop" => Ok(Selection::Desktop),
            "private" | "silent_vr" => Ok(Selection::Private),
            "public" | "vr" => Ok(Selection::Public),
            other => Err(format!(
                "unknown mode '{}' (expected auto, desktop, private or public)",
                other
            )),
        }
    }
}

/// Whether the engine follows VR presence or a fixed user choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Auto,
    Manual,
}

/// Lifetime of an explicit selection made while Auto is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverridePolicy {
    /// The selection holds until VR presence next toggles, then Auto reasserts
    #[default]
    UntilPresenceChange,
    /// The selection leaves Auto until the user selects Auto again
    Sticky,
}

/// Rules used by the Auto policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoRules {
    /// Mode while the VR indicator process is present
    pub present_mode: Mode,
    /// Mode while it is absent
    pub absent_mode: Mode,
    pub override_policy: OverridePolicy,
}

impl Default for AutoRules {
    fn default() -> Self {
        Self {
            present_mode: Mode::Private,
            absent_mode: Mode::Desktop,
            override_policy: OverridePolicy::UntilPresenceChange,
        }
    }
}

/// Why the effective mode changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    UserSelection,
    Presence,
    ConfigReload,
}

/// Notification emitted whenever the effective mode changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub from: Mode,
    pub to: Mode,
    pub cause: ChangeCause,
}

/// The routing mode state machine
///
/// Every (state, event) pair has a defined next state; nothing is rejected.
#[derive(Debug, Clone)]
pub struct ModeMachine {
    rules: AutoRules,
    policy: Policy,
    mode: Mode,
    override_mode: Option<Mode>,
    vr_present: bool,
}

impl ModeMachine {
    pub fn new(rules: AutoRules, initial: Selection, vr_present: bool) -> Self {
        let mut machine = Self {
            rules,
            policy: Policy::Auto,
            mode: rules.absent_mode,
            override_mode: None,
            vr_present,
        };
        match initial.fixed() {
            Some(mode) => {
                machine.policy = Policy::Manual;
                machine.mode = mode;
            }
            None => machine.mode = machine.derived(),
        }
        machine
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Explicit selection currently overriding Auto, if any
    pub fn override_mode(&self) -> Option<Mode> {
        self.override_mode
    }

    pub fn vr_present(&self) -> bool {
        self.vr_present
    }

    /// The selection that reproduces the current policy
    pub fn selection(&self) -> Selection {
        match self.policy {
            Policy::Auto => Selection::Auto,
            Policy::Manual => self.mode.into(),
        }
    }

    /// Apply an explicit user selection. Takes effect immediately regardless of
    /// VR presence.
    pub fn select(&mut self, selection: Selection) -> Option<ModeChange> {
        let next = match selection.fixed() {
            None => {
                self.policy = Policy::Auto;
                self.override_mode = None;
                self.derived()
            }
            Some(mode) => {
                if self.policy == Policy::Auto
                    && self.rules.override_policy == OverridePolicy::UntilPresenceChange
                {
                    self.override_mode = Some(mode);
                } else {
                    self.policy = Policy::Manual;
                    self.override_mode = None;
                }
                mode
            }
        };
        self.transition(next, ChangeCause::UserSelection)
    }

    /// Apply a debounced presence transition
    pub fn on_presence(&mut self, event: PresenceEvent) -> Option<ModeChange> {
        self.vr_present = matches!(event, PresenceEvent::BecamePresent);
        match self.policy {
            Policy::Manual => None,
            Policy::Auto => {
                self.override_mode = None;
                let next = self.derived();
                self.transition(next, ChangeCause::Presence)
            }
        }
    }

    /// Swap in new Auto rules (config reload)
    pub fn set_rules(&mut self, rules: AutoRules) -> Option<ModeChange> {
        self.rules = rules;
        if self.policy == Policy::Auto && self.override_mode.is_none() {
            let next = self.derived();
            return self.transition(next, ChangeCause::ConfigReload);
        }
        None
    }

    fn derived(&self) -> Mode {
        if self.vr_present {
            self.rules.present_mode
        } else {
            self.rules.absent_mode
        }
    }

    fn transition(&mut self, next: Mode, cause: ChangeCause) -> Option<ModeChange> {
        let from = self.mode;
        self.mode = next;
        (from != next).then_some(ModeChange {
            from,
            to: next,
            cause,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto_machine(present: bool) -> ModeMachine {
        ModeMachine::new(AutoRules::default(), Selection::Auto, present)
    }

    #[test]
    fn test_auto_follows_presence() {
        let mut machine = auto_machine(false);
        assert_eq!(machine.mode(), Mode::Desktop);

        let change = machine.on_presence(PresenceEvent::BecamePresent).unwrap();
        assert_eq!(change.from, Mode::Desktop);
        assert_eq!(change.to, Mode::Private);
        assert_eq!(change.cause, ChangeCause::Presence);

        let change = machine.on_presence(PresenceEvent::BecameAbsent).unwrap();
        assert_eq!(change.to, Mode::Desktop);
    }

    #[test]
    fn test_auto_starts_in_present_mode_when_vr_running() {
        let machine = auto_machine(true);
        assert_eq!(machine.mode(), Mode::Private);
        assert_eq!(machine.policy(), Policy::Auto);
    }

    #[test]
    fn test_explicit_selection_is_immediate_regardless_of_presence() {
        let mut machine = ModeMachine::new(AutoRules::default(), Selection::Desktop, false);
        let change = machine.select(Selection::Public).unwrap();
        assert_eq!(change.to, Mode::Public);
        assert_eq!(machine.policy(), Policy::Manual);

        // Presence changes do not move a manual selection
        assert!(machine.on_presence(PresenceEvent::BecamePresent).is_none());
        assert!(machine.on_presence(PresenceEvent::BecameAbsent).is_none());
        assert_eq!(machine.mode(), Mode::Public);
    }

    #[test]
    fn test_override_lasts_until_next_presence_toggle() {
        let mut machine = auto_machine(false);
        machine.select(Selection::Public);
        assert_eq!(machine.policy(), Policy::Auto);
        assert_eq!(machine.override_mode(), Some(Mode::Public));
        assert_eq!(machine.mode(), Mode::Public);

        // Auto reasserts at the next transition
        let change = machine.on_presence(PresenceEvent::BecamePresent).unwrap();
        assert_eq!(change.from, Mode::Public);
        assert_eq!(change.to, Mode::Private);
        assert_eq!(machine.override_mode(), None);
    }

    #[test]
    fn test_sticky_override_leaves_auto() {
        let rules = AutoRules {
            override_policy: OverridePolicy::Sticky,
            ..AutoRules::default()
        };
        let mut machine = ModeMachine::new(rules, Selection::Auto, false);
        machine.select(Selection::Public);
        assert_eq!(machine.policy(), Policy::Manual);

        assert!(machine.on_presence(PresenceEvent::BecamePresent).is_none());
        assert_eq!(machine.mode(), Mode::Public);

        // Selecting Auto again re-derives from the tracked presence
        let change = machine.select(Selection::Auto).unwrap();
        assert_eq!(change.to, Mode::Private);
    }

    #[test]
    fn test_reselecting_same_mode_reports_no_change() {
        let mut machine = ModeMachine::new(AutoRules::default(), Selection::Private, true);
        assert!(machine.select(Selection::Private).is_none());
    }

    #[test]
    fn test_presence_tracked_while_manual() {
        let mut machine = ModeMachine::new(AutoRules::default(), Selection::Desktop, false);
        machine.on_presence(PresenceEvent::BecamePresent);
        assert!(machine.vr_present());

        let change = machine.select(Selection::Auto).unwrap();
        assert_eq!(change.to, Mode::Private);
    }

    #[test]
    fn test_every_state_event_pair_is_defined() {
        let events = [PresenceEvent::BecamePresent, PresenceEvent::BecameAbsent];
        let selections = [
            Selection::Auto,
            Selection::Desktop,
            Selection::Private,
            Selection::Public,
        ];
        for start in selections {
            for present in [false, true] {
                for event in events {
                    let mut machine = ModeMachine::new(AutoRules::default(), start, present);
                    machine.on_presence(event);
                    assert!(Mode::ALL.contains(&machine.mode()));
                }
                for next in selections {
                    let mut machine = ModeMachine::new(AutoRules::default(), start, present);
                    machine.select(next);
                    if let Some(mode) = next.fixed() {
                        assert_eq!(machine.mode(), mode);
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_reload_rederives_auto_mode() {
        let mut machine = auto_machine(true);
        let rules = AutoRules {
            present_mode: Mode::Public,
            ..AutoRules::default()
        };
        let change = machine.set_rules(rules).unwrap();
        assert_eq!(change.to, Mode::Public);
        assert_eq!(change.cause, ChangeCause::ConfigReload);
    }

    #[test]
    fn test_selection_parses_legacy_names() {
        assert_eq!("SILENT_VR".parse::<Selection>(), Ok(Selection::Private));
        assert_eq!("VR".parse::<Selection>(), Ok(Selection::Public));
        assert_eq!("Auto".parse::<Selection>(), Ok(Selection::Auto));
        assert!("loud".parse::<Selection>().is_err());
    }
}
