use anyhow::{Context, Result};
use dungeontracker_game::{AccessibilityLevel, DungeonId, Item, ItemCount, SequenceBreak};
use dungeontracker_logic::ModeConfig;
use serde::{Deserialize, Serialize};

/// Snapshot of all leaf state of a tracker session, as exchanged with the outside world.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct TrackerState {
    pub items: Vec<ItemCountSetting>,
    pub sequence_breaks: Vec<SequenceBreak>,
    pub mode: ModeConfig,
    pub entries: Vec<EntrySetting>,
    pub key_doors: Vec<KeyDoorSetting>,
    pub always_accessible_nodes: Vec<NodeSetting>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ItemCountSetting {
    pub item: Item,
    pub count: ItemCount,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntrySetting {
    pub name: String,
    #[serde(default)]
    pub level: AccessibilityLevel,
    #[serde(default)]
    pub always_accessible: bool,
}

/// Unlocked doors of one dungeon; doors not listed are locked.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KeyDoorSetting {
    pub dungeon: DungeonId,
    pub unlocked: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NodeSetting {
    pub dungeon: DungeonId,
    pub node: String,
}

pub fn parse_tracker_state(state_json: &str) -> Result<TrackerState> {
    serde_json::from_str(state_json).context("Unable to parse tracker state")
}
