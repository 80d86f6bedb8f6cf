//! Preset engine
//!
//! An ordered list of named slider snapshots. Presets are identified by a
//! stable UUID; their position in the list is display order only.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::store::GainState;

pub type PresetId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresetError {
    #[error("preset name cannot be empty")]
    EmptyName,
    #[error("a preset named '{0}' already exists")]
    DuplicateName(String),
    #[error("no preset with id {0}")]
    NotFound(PresetId),
}

/// A saved slider snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: PresetId,
    pub name: String,
    /// Zero-based display position
    pub position: usize,
    pub gains: GainState,
}

/// Ordered preset list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetList(Vec<Preset>);

impl Default for PresetList {
    /// Seed presets for a first run
    fn default() -> Self {
        let mut list = Self(Vec::new());
        let seeds = [
            ("Default", GainState::default()),
            ("Quiet for Others", GainState::new(-50.0, 0.0, 0.0, 100.0, 100.0, 100.0)),
            ("Solo Listen", GainState::new(-100.0, 0.0, 25.0, 100.0, 100.0, 100.0)),
        ];
        for (name, gains) in seeds {
            list.0.push(Preset {
                id: Uuid::new_v4(),
                name: name.to_string(),
                position: list.0.len(),
                gains,
            });
        }
        list
    }
}

impl PresetList {
    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: PresetId) -> Option<&Preset> {
        self.0.iter().find(|p| p.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Preset> {
        let name = name.trim();
        self.0.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Add a preset at the end of the list
    pub fn create(&mut self, name: &str, snapshot: GainState) -> Result<PresetId, PresetError> {
        let name = self.check_name(name, None)?;
        let id = Uuid::new_v4();
        self.0.push(Preset {
            id,
            name,
            position: self.0.len(),
            gains: snapshot,
        });
        Ok(id)
    }

    pub fn rename(&mut self, id: PresetId, name: &str) -> Result<(), PresetError> {
        let name = self.check_name(name, Some(id))?;
        self.get_mut(id)?.name = name;
        Ok(())
    }

    /// Replace the stored snapshot, keeping name and position
    pub fn overwrite(&mut self, id: PresetId, snapshot: GainState) -> Result<(), PresetError> {
        self.get_mut(id)?.gains = snapshot;
        Ok(())
    }

    /// Move a preset to `position`; positions past the end mean "last"
    pub fn reorder(&mut self, id: PresetId, position: usize) -> Result<(), PresetError> {
        let from = self.index_of(id)?;
        let preset = self.0.remove(from);
        let to = position.min(self.0.len());
        self.0.insert(to, preset);
        self.renumber();
        Ok(())
    }

    pub fn delete(&mut self, id: PresetId) -> Result<Preset, PresetError> {
        let index = self.index_of(id)?;
        let removed = self.0.remove(index);
        self.renumber();
        Ok(removed)
    }

    /// The snapshot to write into the live gain state
    pub fn apply(&self, id: PresetId) -> Result<GainState, PresetError> {
        self.get(id)
            .map(|p| p.gains)
            .ok_or(PresetError::NotFound(id))
    }

    /// Repair a list loaded from disk: order by stored position (stable for
    /// ties), renumber, and rename clashing or empty names.
    pub fn normalize(&mut self) {
        self.0.sort_by_key(|p| p.position);
        let mut seen: Vec<String> = Vec::new();
        for preset in &mut self.0 {
            let mut name = preset.name.trim().to_string();
            if name.is_empty() {
                name = "Preset".to_string();
            }
            let base = name.clone();
            let mut n = 2;
            while seen.iter().any(|s| s.eq_ignore_ascii_case(&name)) {
                name = format!("{} ({})", base, n);
                n += 1;
            }
            if name != preset.name {
                warn!("Renamed preset '{}' to '{}' while loading", preset.name, name);
                preset.name = name.clone();
            }
            seen.push(name);
        }
        self.renumber();
    }

    fn renumber(&mut self) {
        for (i, preset) in self.0.iter_mut().enumerate() {
            preset.position = i;
        }
    }

    fn index_of(&self, id: PresetId) -> Result<usize, PresetError> {
        self.0
            .iter()
            .position(|p| p.id == id)
            .ok_or(PresetError::NotFound(id))
    }

    fn get_mut(&mut self, id: PresetId) -> Result<&mut Preset, PresetError> {
        self.0
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(PresetError::NotFound(id))
    }

    fn check_name(&self, name: &str, except: Option<PresetId>) -> Result<String, PresetError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PresetError::EmptyName);
        }
        let clash = self
            .0
            .iter()
            .any(|p| Some(p.id) != except && p.name.eq_ignore_ascii_case(name));
        if clash {
            return Err(PresetError::DuplicateName(name.to_string()));
        }
        Ok(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::GainChannel;
    use proptest::prelude::*;

    fn names(list: &PresetList) -> Vec<&str> {
        list.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_default_presets_seeded_in_order() {
        let list = PresetList::default();
        assert_eq!(names(&list), vec!["Default", "Quiet for Others", "Solo Listen"]);
        let positions: Vec<usize> = list.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_create_rejects_empty_and_duplicate_names() {
        let mut list = PresetList::default();
        assert_eq!(
            list.create("   ", GainState::default()),
            Err(PresetError::EmptyName)
        );
        assert_eq!(
            list.create("default", GainState::default()),
            Err(PresetError::DuplicateName("default".to_string()))
        );
        let id = list.create("  Party ", GainState::default()).unwrap();
        assert_eq!(list.get(id).unwrap().name, "Party");
        assert_eq!(list.get(id).unwrap().position, 3);
    }

    #[test]
    fn test_rename_keeps_identity() {
        let mut list = PresetList::default();
        let id = list.find_by_name("Solo Listen").unwrap().id;
        list.rename(id, "Alone").unwrap();
        assert_eq!(list.get(id).unwrap().name, "Alone");
        assert_eq!(list.get(id).unwrap().position, 2);

        // Changing only the case of its own name is allowed
        list.rename(id, "ALONE").unwrap();
        assert_eq!(
            list.rename(id, "default"),
            Err(PresetError::DuplicateName("default".to_string()))
        );
    }

    #[test]
    fn test_reorder_renumbers() {
        let mut list = PresetList::default();
        let solo = list.find_by_name("Solo Listen").unwrap().id;
        list.reorder(solo, 0).unwrap();
        assert_eq!(names(&list), vec!["Solo Listen", "Default", "Quiet for Others"]);
        assert_eq!(list.get(solo).unwrap().position, 0);

        // Past the end means last
        list.reorder(solo, 99).unwrap();
        assert_eq!(names(&list), vec!["Default", "Quiet for Others", "Solo Listen"]);
    }

    #[test]
    fn test_delete_and_missing_ids() {
        let mut list = PresetList::default();
        let quiet = list.find_by_name("Quiet for Others").unwrap().id;
        list.delete(quiet).unwrap();
        assert_eq!(names(&list), vec!["Default", "Solo Listen"]);
        assert_eq!(list.get(list.find_by_name("Solo Listen").unwrap().id).unwrap().position, 1);

        assert_eq!(list.delete(quiet), Err(PresetError::NotFound(quiet)));
        assert_eq!(list.apply(quiet), Err(PresetError::NotFound(quiet)));
    }

    #[test]
    fn test_overwrite_replaces_snapshot() {
        let mut list = PresetList::default();
        let id = list.find_by_name("Default").unwrap().id;
        let louder = GainState::default().with(GainChannel::Me, 40.0);
        list.overwrite(id, louder).unwrap();
        assert_eq!(list.apply(id).unwrap(), louder);
    }

    #[test]
    fn test_load_clamps_and_normalizes() {
        let json = r#"[
            {"id": "6f1c1f5e-0f0a-4d8e-9a54-1c3f4e8b2a01", "name": "B", "position": 5,
             "gains": {"others": 900, "bass": -20}},
            {"id": "6f1c1f5e-0f0a-4d8e-9a54-1c3f4e8b2a02", "name": "A", "position": 1,
             "gains": {}},
            {"id": "6f1c1f5e-0f0a-4d8e-9a54-1c3f4e8b2a03", "name": "a", "position": 2,
             "gains": {}}
        ]"#;
        let mut list: PresetList = serde_json::from_str(json).unwrap();
        list.normalize();
        assert_eq!(names(&list), vec!["A", "a (2)", "B"]);
        let b = list.find_by_name("B").unwrap();
        assert_eq!(b.position, 2);
        assert_eq!(b.gains.get(GainChannel::Others), 100.0);
        assert_eq!(b.gains.get(GainChannel::Bass), 0.0);
    }

    fn gain_strategy() -> impl Strategy<Value = GainState> {
        proptest::array::uniform6(-300.0f64..300.0)
            .prop_map(|v| GainState::new(v[0], v[1], v[2], v[3], v[4], v[5]))
    }

    proptest! {
        #[test]
        fn prop_apply_of_create_restores_snapshot(
            raw in proptest::array::uniform6(-300.0f64..300.0),
        ) {
            let snapshot = GainState::new(raw[0], raw[1], raw[2], raw[3], raw[4], raw[5]);
            let mut list = PresetList::default();
            let id = list.create("Snapshot", snapshot).unwrap();
            let applied = list.apply(id).unwrap();
            for channel in GainChannel::ALL {
                prop_assert_eq!(
                    applied.get(channel).to_bits(),
                    channel.clamp(raw[channel_index(channel)]).to_bits()
                );
            }
        }

        #[test]
        fn prop_reorder_and_back_is_identity(
            extra in proptest::collection::vec(gain_strategy(), 0..6),
            pick in 0usize..9,
            target in 0usize..12,
        ) {
            let mut list = PresetList::default();
            for (i, gains) in extra.into_iter().enumerate() {
                list.create(&format!("P{}", i), gains).unwrap();
            }
            let before = list.clone();
            let preset = &before.0[pick % before.len()];
            let original = preset.position;

            list.reorder(preset.id, target).unwrap();
            list.reorder(preset.id, original).unwrap();
            prop_assert_eq!(list, before);
        }
    }

    fn channel_index(channel: GainChannel) -> usize {
        GainChannel::ALL.iter().position(|c| *c == channel).unwrap()
    }
}
