use anyhow::{Context, Result};
use dungeontracker_game::{
    AccessibilityLevel, DoorIdx, DungeonItemShuffle, EntryIdx, Item, ItemCount, ItemPlacement,
    ModeCondition, SequenceBreak, WorldState,
};
use serde::{Deserialize, Serialize};

/// Quantity held of every item kind, each clamped to `Item::max_count`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inventory {
    counts: Vec<ItemCount>,
}

impl Default for Inventory {
    fn default() -> Self {
        Inventory {
            counts: vec![0; Item::COUNT],
        }
    }
}

impl Inventory {
    pub fn count(&self, item: Item) -> ItemCount {
        self.counts[item as usize]
    }

    pub fn has(&self, item: Item, count: ItemCount) -> bool {
        self.count(item) >= count
    }

    /// Stores `count` clamped to the item's maximum, returning the stored value.
    pub fn set(&mut self, item: Item, count: ItemCount) -> ItemCount {
        let count = ItemCount::min(count, item.max_count());
        self.counts[item as usize] = count;
        count
    }

    pub fn collect(&mut self, item: Item) -> ItemCount {
        self.set(item, self.count(item).saturating_add(1))
    }

    pub fn remove(&mut self, item: Item) -> ItemCount {
        self.set(item, self.count(item).saturating_sub(1))
    }

    /// Items with a non-zero count, in `Item` order.
    pub fn held(&self) -> impl Iterator<Item = (Item, ItemCount)> + '_ {
        use strum::IntoEnumIterator;
        Item::iter()
            .map(|item| (item, self.count(item)))
            .filter(|&(_, count)| count > 0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceBreakSettings {
    enabled: Vec<bool>,
}

impl Default for SequenceBreakSettings {
    fn default() -> Self {
        SequenceBreakSettings {
            enabled: vec![false; SequenceBreak::COUNT],
        }
    }
}

impl SequenceBreakSettings {
    pub fn is_enabled(&self, sequence_break: SequenceBreak) -> bool {
        self.enabled[sequence_break as usize]
    }

    pub fn set_enabled(&mut self, sequence_break: SequenceBreak, enabled: bool) {
        self.enabled[sequence_break as usize] = enabled;
    }

    pub fn enabled(&self) -> impl Iterator<Item = SequenceBreak> + '_ {
        use strum::IntoEnumIterator;
        SequenceBreak::iter().filter(|&sb| self.is_enabled(sb))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ModeConfig {
    pub world_state: WorldState,
    pub item_placement: ItemPlacement,
    pub dungeon_item_shuffle: DungeonItemShuffle,
    pub generic_keys: bool,
    pub enemy_shuffle: bool,
    pub boss_shuffle: bool,
    pub key_drop_shuffle: bool,
}

impl ModeConfig {
    pub fn load(mode_json: &str) -> Result<ModeConfig> {
        serde_json::from_str(mode_json).context("Unable to parse mode configuration")
    }

    pub fn holds(&self, condition: &ModeCondition) -> bool {
        match *condition {
            ModeCondition::WorldState(x) => self.world_state == x,
            ModeCondition::ItemPlacement(x) => self.item_placement == x,
            ModeCondition::DungeonItemShuffle(x) => self.dungeon_item_shuffle >= x,
            ModeCondition::GenericKeys(x) => self.generic_keys == x,
            ModeCondition::EnemyShuffle(x) => self.enemy_shuffle == x,
            ModeCondition::BossShuffle(x) => self.boss_shuffle == x,
            ModeCondition::KeyDropShuffle(x) => self.key_drop_shuffle == x,
        }
    }
}

/// Overworld entrances feeding the dungeons. The overworld graph writes `level`;
/// `always_accessible` forces `Normal` for isolated testing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryNodes {
    levels: Vec<AccessibilityLevel>,
    always_accessible: Vec<bool>,
}

impl EntryNodes {
    pub fn new(num_entries: usize) -> Self {
        EntryNodes {
            levels: vec![AccessibilityLevel::None; num_entries],
            always_accessible: vec![false; num_entries],
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, entry_idx: EntryIdx) -> AccessibilityLevel {
        if self.always_accessible.get(entry_idx).copied().unwrap_or(false) {
            AccessibilityLevel::Normal
        } else {
            self.levels
                .get(entry_idx)
                .copied()
                .unwrap_or(AccessibilityLevel::None)
        }
    }

    pub fn raw_level(&self, entry_idx: EntryIdx) -> AccessibilityLevel {
        self.levels[entry_idx]
    }

    pub fn set_level(&mut self, entry_idx: EntryIdx, level: AccessibilityLevel) {
        self.levels[entry_idx] = level;
    }

    pub fn is_always_accessible(&self, entry_idx: EntryIdx) -> bool {
        self.always_accessible[entry_idx]
    }

    pub fn set_always_accessible(&mut self, entry_idx: EntryIdx, value: bool) {
        self.always_accessible[entry_idx] = value;
    }
}

/// Lockable doors of one dungeon, indexed by `DoorIdx`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyDoors {
    unlocked: Vec<bool>,
}

impl KeyDoors {
    pub fn new(num_doors: usize) -> Self {
        KeyDoors {
            unlocked: vec![false; num_doors],
        }
    }

    pub fn len(&self) -> usize {
        self.unlocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unlocked.is_empty()
    }

    pub fn is_unlocked(&self, door_idx: DoorIdx) -> bool {
        self.unlocked.get(door_idx).copied().unwrap_or(false)
    }

    pub fn set_unlocked(&mut self, door_idx: DoorIdx, unlocked: bool) {
        self.unlocked[door_idx] = unlocked;
    }

    pub fn lock_all(&mut self) {
        self.unlocked.fill(false);
    }
}

/// Leaf state shared by every dungeon of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalState {
    pub inventory: Inventory,
    pub sequence_breaks: SequenceBreakSettings,
    pub mode: ModeConfig,
    pub entries: EntryNodes,
}

impl GlobalState {
    pub fn new(num_entries: usize) -> Self {
        GlobalState {
            entries: EntryNodes::new(num_entries),
            ..GlobalState::default()
        }
    }

    pub fn print_debug(&self) {
        for (item, count) in self.inventory.held() {
            println!("{item:?} x{count}");
        }
        for sb in self.sequence_breaks.enabled() {
            println!("{sb:?} enabled");
        }
        println!("{:?}", self.mode);
    }
}
