use anyhow::{Context, Result, bail};
use hashbrown::HashMap;
use log::{debug, info};

use crate::dungeon::DungeonGraph;
use crate::settings::{
    EntrySetting, ItemCountSetting, KeyDoorSetting, NodeSetting, TrackerState,
};
use dungeontracker_game::{
    AccessibilityLevel, DungeonId, EntryIdx, GameData, IndexedVec, Item, ItemCount,
    SequenceBreak,
};
use dungeontracker_logic::{GlobalState, ModeConfig};

/// A tracker session: the shared leaf state plus one graph per loaded dungeon.
///
/// Every setter re-propagates the affected dungeons before returning, so levels read
/// afterwards are always at a fixed point.
#[derive(Clone, Debug)]
pub struct Tracker {
    global: GlobalState,
    entry_isv: IndexedVec<String>,
    dungeons: Vec<DungeonGraph>,
    dungeon_idx_by_id: HashMap<DungeonId, usize>,
}

impl Tracker {
    pub fn new(game_data: &GameData) -> Self {
        let dungeons: Vec<DungeonGraph> = game_data.dungeons.iter().map(DungeonGraph::new).collect();
        let dungeon_idx_by_id = dungeons
            .iter()
            .enumerate()
            .map(|(i, d)| (d.dungeon_id, i))
            .collect();
        let mut tracker = Tracker {
            global: GlobalState::new(game_data.entry_isv.len()),
            entry_isv: game_data.entry_isv.clone(),
            dungeons,
            dungeon_idx_by_id,
        };
        tracker.propagate_all();
        info!(
            "Tracker started with {} dungeons and {} entries",
            tracker.dungeons.len(),
            tracker.entry_isv.len()
        );
        tracker
    }

    /// Read-only view of the leaf state; change it through the setters so that levels follow.
    pub fn global(&self) -> &GlobalState {
        &self.global
    }

    fn propagate_all(&mut self) {
        let mut passes = 0;
        for dungeon in &mut self.dungeons {
            passes += dungeon.propagate(&self.global).passes;
        }
        debug!("Propagated {} dungeons in {} passes", self.dungeons.len(), passes);
    }

    fn dungeon_idx(&self, dungeon_id: DungeonId) -> Result<usize> {
        self.dungeon_idx_by_id
            .get(&dungeon_id)
            .copied()
            .with_context(|| format!("Dungeon {dungeon_id} is not loaded"))
    }

    pub fn entry_idx(&self, name: &str) -> Result<EntryIdx> {
        self.entry_isv
            .index_by_key
            .get(name)
            .copied()
            .with_context(|| format!("Unknown entry {name}"))
    }

    pub fn dungeon(&self, dungeon_id: DungeonId) -> Result<&DungeonGraph> {
        Ok(&self.dungeons[self.dungeon_idx(dungeon_id)?])
    }

    pub fn dungeons(&self) -> impl Iterator<Item = &DungeonGraph> {
        self.dungeons.iter()
    }

    pub fn accessibility(&self, dungeon_id: DungeonId, node: &str) -> Result<AccessibilityLevel> {
        self.dungeon(dungeon_id)?.accessibility(node)
    }

    pub fn set_item(&mut self, item: Item, count: ItemCount) -> ItemCount {
        let stored = self.global.inventory.set(item, count);
        self.propagate_all();
        stored
    }

    pub fn collect(&mut self, item: Item) -> ItemCount {
        let stored = self.global.inventory.collect(item);
        self.propagate_all();
        stored
    }

    pub fn remove(&mut self, item: Item) -> ItemCount {
        let stored = self.global.inventory.remove(item);
        self.propagate_all();
        stored
    }

    pub fn set_sequence_break(&mut self, sequence_break: SequenceBreak, enabled: bool) {
        self.global
            .sequence_breaks
            .set_enabled(sequence_break, enabled);
        self.propagate_all();
    }

    /// Replaces the whole mode configuration at once.
    pub fn load_mode(&mut self, mode: ModeConfig) {
        self.global.mode = mode;
        self.propagate_all();
    }

    pub fn set_entry_level(&mut self, entry: &str, level: AccessibilityLevel) -> Result<()> {
        let entry_idx = self.entry_idx(entry)?;
        self.global.entries.set_level(entry_idx, level);
        self.propagate_all();
        Ok(())
    }

    pub fn set_entry_always_accessible(&mut self, entry: &str, value: bool) -> Result<()> {
        let entry_idx = self.entry_idx(entry)?;
        self.global.entries.set_always_accessible(entry_idx, value);
        self.propagate_all();
        Ok(())
    }

    pub fn set_key_door(&mut self, dungeon_id: DungeonId, door: &str, unlocked: bool) -> Result<()> {
        let idx = self.dungeon_idx(dungeon_id)?;
        self.dungeons[idx].set_key_door(door, unlocked, &self.global)?;
        Ok(())
    }

    pub fn set_node_always_accessible(
        &mut self,
        dungeon_id: DungeonId,
        node: &str,
        value: bool,
    ) -> Result<()> {
        let idx = self.dungeon_idx(dungeon_id)?;
        self.dungeons[idx].set_node_always_accessible(node, value, &self.global)?;
        Ok(())
    }

    /// Restores the state of a fresh session.
    pub fn reset(&mut self) {
        self.global = GlobalState::new(self.entry_isv.len());
        for dungeon in &mut self.dungeons {
            dungeon.reset_local_state();
        }
        self.propagate_all();
    }

    /// Replaces all leaf state with `state`, then propagates once. On error the tracker is
    /// left unchanged.
    pub fn apply_state(&mut self, state: &TrackerState) -> Result<()> {
        let mut next = self.clone();
        next.global = GlobalState::new(self.entry_isv.len());
        for dungeon in &mut next.dungeons {
            dungeon.reset_local_state();
        }
        for setting in &state.items {
            let stored = next.global.inventory.set(setting.item, setting.count);
            if stored != setting.count {
                bail!(
                    "{} x{} exceeds the maximum of {}",
                    setting.item,
                    setting.count,
                    stored
                );
            }
        }
        for &sequence_break in &state.sequence_breaks {
            next.global.sequence_breaks.set_enabled(sequence_break, true);
        }
        next.global.mode = state.mode.clone();
        for entry in &state.entries {
            let entry_idx = next.entry_idx(&entry.name)?;
            next.global.entries.set_level(entry_idx, entry.level);
            next.global
                .entries
                .set_always_accessible(entry_idx, entry.always_accessible);
        }
        for doors in &state.key_doors {
            let idx = next.dungeon_idx(doors.dungeon)?;
            for door in &doors.unlocked {
                next.dungeons[idx].update_key_door(door, true)?;
            }
        }
        for node in &state.always_accessible_nodes {
            let idx = next.dungeon_idx(node.dungeon)?;
            next.dungeons[idx].update_node_override(&node.node, true)?;
        }
        next.propagate_all();
        *self = next;
        Ok(())
    }

    pub fn snapshot(&self) -> TrackerState {
        let items = self
            .global
            .inventory
            .held()
            .map(|(item, count)| ItemCountSetting { item, count })
            .collect();
        let entries = self
            .entry_isv
            .keys
            .iter()
            .enumerate()
            .filter(|&(i, _)| {
                self.global.entries.raw_level(i) != AccessibilityLevel::None
                    || self.global.entries.is_always_accessible(i)
            })
            .map(|(i, name)| EntrySetting {
                name: name.clone(),
                level: self.global.entries.raw_level(i),
                always_accessible: self.global.entries.is_always_accessible(i),
            })
            .collect();
        let mut key_doors = vec![];
        let mut always_accessible_nodes = vec![];
        for dungeon in &self.dungeons {
            let unlocked: Vec<String> = dungeon
                .key_doors()
                .filter(|d| d.unlocked)
                .map(|d| d.name.to_string())
                .collect();
            if !unlocked.is_empty() {
                key_doors.push(KeyDoorSetting {
                    dungeon: dungeon.dungeon_id,
                    unlocked,
                });
            }
            for node in dungeon.nodes().filter(|n| n.always_accessible) {
                always_accessible_nodes.push(NodeSetting {
                    dungeon: dungeon.dungeon_id,
                    node: node.name.clone(),
                });
            }
        }
        TrackerState {
            items,
            sequence_breaks: self.global.sequence_breaks.enabled().collect(),
            mode: self.global.mode.clone(),
            entries,
            key_doors,
            always_accessible_nodes,
        }
    }
}
