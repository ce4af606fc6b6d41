use log::error;

use crate::dungeon::DungeonNode;
use dungeontracker_game::{AccessibilityLevel, ConnectionData, ConnectionSource, Requirement};
use dungeontracker_logic::{GlobalState, KeyDoors};

pub struct EvalContext<'a> {
    pub global: &'a GlobalState,
    pub key_doors: &'a KeyDoors,
    pub upstream: AccessibilityLevel,
}

/// Evaluates a requirement against the current leaf state. Total and side-effect free.
pub fn evaluate_requirement(req: &Requirement, cx: &EvalContext) -> AccessibilityLevel {
    match req {
        Requirement::Free => AccessibilityLevel::Normal,
        Requirement::Never => AccessibilityLevel::None,
        Requirement::Upstream => cx.upstream,
        &Requirement::Item { item, count } => {
            AccessibilityLevel::from_bool(cx.global.inventory.has(item, count))
        }
        &Requirement::KeyDoor(door_idx) => {
            AccessibilityLevel::from_bool(cx.key_doors.is_unlocked(door_idx))
        }
        &Requirement::SequenceBreak(sequence_break) => {
            if cx.global.sequence_breaks.is_enabled(sequence_break) {
                AccessibilityLevel::SequenceBreak
            } else {
                AccessibilityLevel::None
            }
        }
        Requirement::Mode(condition) => AccessibilityLevel::from_bool(cx.global.mode.holds(condition)),
        Requirement::If {
            condition,
            then,
            otherwise,
        } => {
            if cx.global.mode.holds(condition) {
                evaluate_requirement(then, cx)
            } else {
                evaluate_requirement(otherwise, cx)
            }
        }
        Requirement::Cap { level, requirement } => {
            level.meet(evaluate_requirement(requirement, cx))
        }
        Requirement::Inspect(req) => {
            AccessibilityLevel::Inspect.join(evaluate_requirement(req, cx))
        }
        Requirement::And(reqs) => {
            let mut level = AccessibilityLevel::Normal;
            for r in reqs {
                level = level.meet(evaluate_requirement(r, cx));
                if level == AccessibilityLevel::None {
                    break;
                }
            }
            level
        }
        Requirement::Or(reqs) => {
            let mut level = AccessibilityLevel::None;
            for r in reqs {
                level = level.join(evaluate_requirement(r, cx));
                if level == AccessibilityLevel::Normal {
                    break;
                }
            }
            level
        }
    }
}

/// Level contributed by one connection, given the current level of its source.
pub fn evaluate_connection(
    conn: &ConnectionData,
    source_level: AccessibilityLevel,
    global: &GlobalState,
    key_doors: &KeyDoors,
) -> AccessibilityLevel {
    if !source_level.is_reachable() {
        return AccessibilityLevel::None;
    }
    let cx = EvalContext {
        global,
        key_doors,
        upstream: source_level,
    };
    source_level.meet(evaluate_requirement(&conn.requirement, &cx))
}

fn source_level(
    source: ConnectionSource,
    nodes: &[DungeonNode],
    global: &GlobalState,
) -> AccessibilityLevel {
    match source {
        ConnectionSource::Entry(entry_idx) => global.entries.level(entry_idx),
        ConnectionSource::Node(node_idx) => nodes[node_idx].accessibility,
    }
}

/// Join over all incoming connections, reading the current level of every other node.
pub fn compute_node_level(
    node_idx: usize,
    nodes: &[DungeonNode],
    global: &GlobalState,
    key_doors: &KeyDoors,
) -> AccessibilityLevel {
    let node = &nodes[node_idx];
    if node.always_accessible {
        return AccessibilityLevel::Normal;
    }
    let mut level = AccessibilityLevel::None;
    for conn in &node.connections {
        let src = source_level(conn.source, nodes, global);
        level = level.join(evaluate_connection(conn, src, global, key_doors));
        if level == AccessibilityLevel::Normal {
            break;
        }
    }
    level
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PropagationStats {
    /// Full passes over the node list, including the final pass that changed nothing.
    pub passes: usize,
    /// Nodes whose level differs from the previous fixed point.
    pub changed: usize,
}

/// Each node can rise at most three times through the four levels, plus one quiet pass.
pub fn max_passes(num_nodes: usize) -> usize {
    4 * num_nodes + 1
}

/// Computes the least fixed point of the node levels, Gauss-Seidel style: every node is
/// recomputed in index order using values already updated earlier in the same pass.
///
/// All levels restart from `None`, so that removing an item or locking a door cannot leave a
/// cycle of nodes supporting each other with stale values.
pub fn propagate(
    nodes: &mut [DungeonNode],
    global: &GlobalState,
    key_doors: &KeyDoors,
) -> PropagationStats {
    let previous: Vec<AccessibilityLevel> = nodes.iter().map(|n| n.accessibility).collect();
    for node in nodes.iter_mut() {
        node.accessibility = AccessibilityLevel::None;
    }

    let limit = max_passes(nodes.len());
    let mut passes = 0;
    loop {
        passes += 1;
        let mut any_change = false;
        for v in 0..nodes.len() {
            let level = compute_node_level(v, nodes, global, key_doors);
            if level != nodes[v].accessibility {
                debug_assert!(
                    level > nodes[v].accessibility,
                    "node {} decreased from {} to {}",
                    nodes[v].name,
                    nodes[v].accessibility,
                    level
                );
                nodes[v].accessibility = level;
                any_change = true;
            }
        }
        if !any_change {
            break;
        }
        if passes >= limit {
            error!(
                "Propagation did not converge after {} passes over {} nodes",
                passes,
                nodes.len()
            );
            debug_assert!(false, "propagation exceeded its pass bound");
            break;
        }
    }

    let changed = nodes
        .iter()
        .zip(previous)
        .filter(|(n, prev)| n.accessibility != *prev)
        .count();
    PropagationStats { passes, changed }
}
