use anyhow::{Context, Result};
use log::debug;
use strum::IntoEnumIterator;

use crate::traverse::{PropagationStats, propagate};
use dungeontracker_game::{
    AccessibilityLevel, ConnectionData, DoorIdx, DungeonData, DungeonId, IndexedVec, NodeIdx,
};
use dungeontracker_logic::{GlobalState, KeyDoors};

/// A vertex of a dungeon graph. Connections are fixed at construction; `accessibility` is
/// derived by propagation.
#[derive(Clone, Debug)]
pub struct DungeonNode {
    pub name: String,
    pub connections: Vec<ConnectionData>,
    pub accessibility: AccessibilityLevel,
    pub always_accessible: bool,
}

impl DungeonNode {
    pub fn accessibility(&self) -> AccessibilityLevel {
        self.accessibility
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KeyDoor<'a> {
    pub name: &'a str,
    pub unlocked: bool,
}

/// Runtime instance of one dungeon: its nodes, its key doors and the last propagation result.
#[derive(Clone, Debug)]
pub struct DungeonGraph {
    pub dungeon_id: DungeonId,
    node_isv: IndexedVec<String>,
    door_isv: IndexedVec<String>,
    nodes: Vec<DungeonNode>,
    key_doors: KeyDoors,
    last_stats: PropagationStats,
}

impl DungeonGraph {
    /// Builds the graph with every node unreachable. Call `propagate` before reading levels.
    pub fn new(data: &DungeonData) -> Self {
        let nodes = data
            .node_isv
            .keys
            .iter()
            .zip(&data.connections_by_dst)
            .map(|(name, connections)| DungeonNode {
                name: name.clone(),
                connections: connections.clone(),
                accessibility: AccessibilityLevel::None,
                always_accessible: false,
            })
            .collect();
        DungeonGraph {
            dungeon_id: data.dungeon_id,
            node_isv: data.node_isv.clone(),
            door_isv: data.door_isv.clone(),
            nodes,
            key_doors: KeyDoors::new(data.door_isv.len()),
            last_stats: PropagationStats::default(),
        }
    }

    pub fn propagate(&mut self, global: &GlobalState) -> PropagationStats {
        let stats = propagate(&mut self.nodes, global, &self.key_doors);
        debug!(
            "{}: {} passes, {} nodes changed",
            self.dungeon_id, stats.passes, stats.changed
        );
        self.last_stats = stats;
        stats
    }

    pub fn last_stats(&self) -> PropagationStats {
        self.last_stats
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_idx(&self, name: &str) -> Result<NodeIdx> {
        self.node_isv
            .index_by_key
            .get(name)
            .copied()
            .with_context(|| format!("Unknown node {} in {}", name, self.dungeon_id))
    }

    pub fn node(&self, name: &str) -> Result<&DungeonNode> {
        Ok(&self.nodes[self.node_idx(name)?])
    }

    pub fn node_by_idx(&self, node_idx: NodeIdx) -> &DungeonNode {
        &self.nodes[node_idx]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DungeonNode> {
        self.nodes.iter()
    }

    pub fn accessibility(&self, name: &str) -> Result<AccessibilityLevel> {
        Ok(self.node(name)?.accessibility)
    }

    pub fn door_idx(&self, name: &str) -> Result<DoorIdx> {
        self.door_isv
            .index_by_key
            .get(name)
            .copied()
            .with_context(|| format!("Unknown key door {} in {}", name, self.dungeon_id))
    }

    pub fn key_door(&self, name: &str) -> Result<KeyDoor<'_>> {
        let door_idx = self.door_idx(name)?;
        Ok(KeyDoor {
            name: self.door_isv.keys[door_idx].as_str(),
            unlocked: self.key_doors.is_unlocked(door_idx),
        })
    }

    pub fn key_doors(&self) -> impl Iterator<Item = KeyDoor<'_>> {
        self.door_isv
            .keys
            .iter()
            .enumerate()
            .map(|(i, name)| KeyDoor {
                name: name.as_str(),
                unlocked: self.key_doors.is_unlocked(i),
            })
    }

    /// Changes a door without propagating; used when several changes are batched.
    pub fn update_key_door(&mut self, name: &str, unlocked: bool) -> Result<()> {
        let door_idx = self.door_idx(name)?;
        self.key_doors.set_unlocked(door_idx, unlocked);
        Ok(())
    }

    /// Changes a node override without propagating; used when several changes are batched.
    pub fn update_node_override(&mut self, name: &str, always_accessible: bool) -> Result<()> {
        let node_idx = self.node_idx(name)?;
        self.nodes[node_idx].always_accessible = always_accessible;
        Ok(())
    }

    pub fn set_key_door(
        &mut self,
        name: &str,
        unlocked: bool,
        global: &GlobalState,
    ) -> Result<PropagationStats> {
        self.update_key_door(name, unlocked)?;
        Ok(self.propagate(global))
    }

    pub fn set_node_always_accessible(
        &mut self,
        name: &str,
        value: bool,
        global: &GlobalState,
    ) -> Result<PropagationStats> {
        self.update_node_override(name, value)?;
        Ok(self.propagate(global))
    }

    /// Locks every door and clears node overrides, without propagating.
    pub fn reset_local_state(&mut self) {
        self.key_doors.lock_all();
        for node in &mut self.nodes {
            node.always_accessible = false;
        }
    }

    /// Number of nodes at each level, from `None` up to `Normal`.
    pub fn accessibility_summary(&self) -> Vec<(AccessibilityLevel, usize)> {
        AccessibilityLevel::iter()
            .map(|level| {
                (
                    level,
                    self.nodes.iter().filter(|n| n.accessibility == level).count(),
                )
            })
            .collect()
    }
}
