use std::path::Path;

use anyhow::Result;
use dungeontracker::dungeon::DungeonGraph;
use dungeontracker::tracker::Tracker;
use dungeontracker::traverse::max_passes;
use dungeontracker_game::{
    AccessibilityLevel, ConnectionSource, DungeonData, DungeonId, GameData, Item,
    ModeCondition, Requirement, SequenceBreak,
};
use dungeontracker_logic::GlobalState;
use strum::IntoEnumIterator;

#[derive(Clone, Debug)]
enum Mutation {
    Collect(Item),
    EnableBreak(SequenceBreak),
    UnlockDoor(DungeonId, &'static str),
    RaiseEntry(&'static str, AccessibilityLevel),
}

fn apply(tracker: &mut Tracker, mutation: &Mutation) -> Result<()> {
    match *mutation {
        Mutation::Collect(item) => {
            tracker.collect(item);
        }
        Mutation::EnableBreak(sequence_break) => tracker.set_sequence_break(sequence_break, true),
        Mutation::UnlockDoor(dungeon_id, door) => tracker.set_key_door(dungeon_id, door, true)?,
        Mutation::RaiseEntry(entry, level) => tracker.set_entry_level(entry, level)?,
    }
    Ok(())
}

fn all_levels(tracker: &Tracker) -> Vec<(String, AccessibilityLevel)> {
    tracker
        .dungeons()
        .flat_map(|d| {
            d.nodes()
                .map(move |n| (format!("{} {}", d.dungeon_id, n.name), n.accessibility()))
        })
        .collect()
}

fn check_pass_bound(tracker: &Tracker) {
    for dungeon in tracker.dungeons() {
        assert!(dungeon.last_stats().passes <= max_passes(dungeon.num_nodes()));
    }
}

fn bundled_game_data() -> Result<GameData> {
    GameData::load(&Path::new(env!("CARGO_MANIFEST_DIR")).join("../data"))
}

/// Leaf changes that can only raise levels: entries first, so that later steps have
/// something to act on, then breaks, doors and items interleaved.
fn raising_mutations() -> Vec<Mutation> {
    let mut mutations = vec![
        Mutation::RaiseEntry("HCMainEntry", AccessibilityLevel::Normal),
        Mutation::RaiseEntry("HCSanctuaryEntry", AccessibilityLevel::Inspect),
        Mutation::RaiseEntry("EPEntry", AccessibilityLevel::SequenceBreak),
        Mutation::RaiseEntry("IPEntry", AccessibilityLevel::Normal),
        Mutation::EnableBreak(SequenceBreak::DarkRoomHC),
        Mutation::UnlockDoor(DungeonId::HyruleCastle, "SewerDoor"),
        Mutation::EnableBreak(SequenceBreak::Hover),
        Mutation::UnlockDoor(DungeonId::IcePalace, "LobbyDoor"),
        Mutation::UnlockDoor(DungeonId::IcePalace, "SpikeDoor"),
        Mutation::EnableBreak(SequenceBreak::MimicClip),
        Mutation::UnlockDoor(DungeonId::EasternPalace, "BigKeyDoor"),
        Mutation::UnlockDoor(DungeonId::HyruleCastle, "BasementDoor"),
        Mutation::EnableBreak(SequenceBreak::IPIceBreaker),
    ];
    mutations.extend(Item::iter().map(Mutation::Collect));
    mutations.push(Mutation::UnlockDoor(DungeonId::IcePalace, "BossDoor"));
    mutations.push(Mutation::UnlockDoor(DungeonId::HyruleCastle, "CellDoor"));
    mutations.push(Mutation::UnlockDoor(DungeonId::EasternPalace, "DarkSquareDoor"));
    mutations.push(Mutation::RaiseEntry("EPEntry", AccessibilityLevel::Normal));
    mutations
}

#[test]
fn levels_never_decrease_as_leaves_are_added() -> Result<()> {
    let game_data = bundled_game_data()?;
    let mut tracker = Tracker::new(&game_data);
    let mut previous = all_levels(&tracker);
    for mutation in raising_mutations() {
        apply(&mut tracker, &mutation)?;
        check_pass_bound(&tracker);
        let current = all_levels(&tracker);
        for ((name, before), (_, after)) in previous.iter().zip(&current) {
            assert!(
                after >= before,
                "{name} dropped from {before} to {after} after {mutation:?}"
            );
        }
        previous = current;
    }
    // Everything but the key rat (gated off by mode) ends up fully reachable.
    for (name, level) in &previous {
        if name != "HyruleCastle KeyRat" {
            assert_eq!(*level, AccessibilityLevel::Normal, "{name}");
        }
    }
    Ok(())
}

#[test]
fn repropagation_is_a_fixed_point() -> Result<()> {
    let game_data = bundled_game_data()?;
    let mut tracker = Tracker::new(&game_data);
    for mutation in raising_mutations().iter().take(12) {
        apply(&mut tracker, mutation)?;
    }
    let before = all_levels(&tracker);
    let lamps = tracker.global().inventory.count(Item::Lamp);
    tracker.set_item(Item::Lamp, lamps);
    assert_eq!(all_levels(&tracker), before);
    for dungeon in tracker.dungeons() {
        assert_eq!(dungeon.last_stats().changed, 0);
    }

    let mut global = GlobalState::new(game_data.entry_isv.len());
    global.entries.set_always_accessible(0, true);
    let mut graph = DungeonGraph::new(game_data.dungeon(DungeonId::HyruleCastle)?);
    let first = graph.propagate(&global);
    assert!(first.changed > 0);
    let second = graph.propagate(&global);
    assert_eq!(second.changed, 0);
    Ok(())
}

#[test]
fn mutation_order_does_not_matter() -> Result<()> {
    let game_data = bundled_game_data()?;
    let mutations: Vec<Mutation> = raising_mutations().into_iter().take(20).collect();

    let mut forward = Tracker::new(&game_data);
    for mutation in &mutations {
        apply(&mut forward, mutation)?;
    }
    let mut backward = Tracker::new(&game_data);
    for mutation in mutations.iter().rev() {
        apply(&mut backward, mutation)?;
    }
    let mut batched = Tracker::new(&game_data);
    batched.apply_state(&forward.snapshot())?;

    let expected = all_levels(&forward);
    assert_eq!(all_levels(&backward), expected);
    assert_eq!(all_levels(&batched), expected);
    Ok(())
}

#[test]
fn override_only_propagates_forward() -> Result<()> {
    let game_data = bundled_game_data()?;
    let mut tracker = Tracker::new(&game_data);
    tracker.set_entry_always_accessible("HCMainEntry", true)?;
    let hc = DungeonId::HyruleCastle;

    tracker.set_node_always_accessible(hc, "ZeldaCell", true)?;
    assert_eq!(tracker.accessibility(hc, "ZeldaCell")?, AccessibilityLevel::Normal);
    assert_eq!(tracker.accessibility(hc, "BoomerangRoom")?, AccessibilityLevel::None);

    tracker.set_node_always_accessible(hc, "SewerRatRoom", true)?;
    assert_eq!(tracker.accessibility(hc, "SewerRatRoom")?, AccessibilityLevel::Normal);
    assert_eq!(tracker.accessibility(hc, "SewerKeyRoom")?, AccessibilityLevel::Normal);
    assert_eq!(tracker.accessibility(hc, "SecretRoom")?, AccessibilityLevel::None);
    assert_eq!(tracker.accessibility(hc, "DarkCross")?, AccessibilityLevel::None);

    tracker.set_node_always_accessible(hc, "SewerRatRoom", false)?;
    assert_eq!(tracker.accessibility(hc, "SewerKeyRoom")?, AccessibilityLevel::None);
    Ok(())
}

/// Two entries, "Door" and "Drop", feeding a single dungeon built by `build`.
fn single_dungeon(build: impl FnOnce(&mut DungeonData) -> Result<()>) -> Result<GameData> {
    let mut game_data = GameData::default();
    game_data.add_entry("Door")?;
    game_data.add_entry("Drop")?;
    let mut dungeon = DungeonData::new(DungeonId::SkullWoods);
    build(&mut dungeon)?;
    game_data.add_dungeon(dungeon)?;
    Ok(game_data)
}

const SW: DungeonId = DungeonId::SkullWoods;

#[test]
fn entry_enables_dungeon() -> Result<()> {
    let game_data = single_dungeon(|d| {
        let room = d.add_node("Room")?;
        d.add_connection(ConnectionSource::Entry(0), room, Requirement::Free)
    })?;
    let mut tracker = Tracker::new(&game_data);
    assert_eq!(tracker.accessibility(SW, "Room")?, AccessibilityLevel::None);
    tracker.set_entry_always_accessible("Door", true)?;
    assert_eq!(tracker.accessibility(SW, "Room")?, AccessibilityLevel::Normal);
    Ok(())
}

#[test]
fn dark_room_needs_lamp_or_break() -> Result<()> {
    let game_data = single_dungeon(|d| {
        let hall = d.add_node("Hall")?;
        let dark = d.add_node("DarkRoom")?;
        d.add_connection(ConnectionSource::Entry(0), hall, Requirement::Free)?;
        d.add_connection(
            ConnectionSource::Node(hall),
            dark,
            Requirement::make_or(vec![
                Requirement::item(Item::Lamp),
                Requirement::SequenceBreak(SequenceBreak::DarkRoomSW),
            ]),
        )
    })?;
    let mut tracker = Tracker::new(&game_data);
    tracker.set_entry_always_accessible("Door", true)?;
    assert_eq!(tracker.accessibility(SW, "DarkRoom")?, AccessibilityLevel::None);
    tracker.set_sequence_break(SequenceBreak::DarkRoomSW, true);
    assert_eq!(tracker.accessibility(SW, "DarkRoom")?, AccessibilityLevel::SequenceBreak);
    tracker.set_item(Item::Lamp, 1);
    assert_eq!(tracker.accessibility(SW, "DarkRoom")?, AccessibilityLevel::Normal);
    Ok(())
}

#[test]
fn key_door_blocks_until_unlocked() -> Result<()> {
    let game_data = single_dungeon(|d| {
        let hall = d.add_node("Hall")?;
        let vault = d.add_node("Vault")?;
        let door = d.add_key_door("VaultDoor")?;
        d.add_connection(ConnectionSource::Entry(0), hall, Requirement::Free)?;
        d.add_connection(ConnectionSource::Node(hall), vault, Requirement::KeyDoor(door))
    })?;
    let mut tracker = Tracker::new(&game_data);
    tracker.set_entry_always_accessible("Door", true)?;
    assert_eq!(tracker.accessibility(SW, "Hall")?, AccessibilityLevel::Normal);
    assert_eq!(tracker.accessibility(SW, "Vault")?, AccessibilityLevel::None);
    tracker.set_key_door(SW, "VaultDoor", true)?;
    assert_eq!(tracker.accessibility(SW, "Vault")?, AccessibilityLevel::Normal);
    assert!(tracker.set_key_door(SW, "NoSuchDoor", true).is_err());
    Ok(())
}

#[test]
fn independent_sequence_breaks() -> Result<()> {
    let game_data = single_dungeon(|d| {
        let floor = d.add_node("Floor")?;
        let ledge = d.add_node("Ledge")?;
        d.add_connection(ConnectionSource::Entry(0), floor, Requirement::Free)?;
        d.add_connection(
            ConnectionSource::Node(floor),
            ledge,
            Requirement::make_or(vec![
                Requirement::item(Item::Hookshot),
                Requirement::SequenceBreak(SequenceBreak::Hover),
                Requirement::SequenceBreak(SequenceBreak::BonkOverLedge),
            ]),
        )
    })?;
    let mut tracker = Tracker::new(&game_data);
    tracker.set_entry_always_accessible("Door", true)?;
    assert_eq!(tracker.accessibility(SW, "Ledge")?, AccessibilityLevel::None);
    for sequence_break in [SequenceBreak::Hover, SequenceBreak::BonkOverLedge] {
        tracker.set_sequence_break(sequence_break, true);
        assert_eq!(tracker.accessibility(SW, "Ledge")?, AccessibilityLevel::SequenceBreak);
        tracker.set_sequence_break(sequence_break, false);
        assert_eq!(tracker.accessibility(SW, "Ledge")?, AccessibilityLevel::None);
    }
    tracker.set_item(Item::Hookshot, 1);
    assert_eq!(tracker.accessibility(SW, "Ledge")?, AccessibilityLevel::Normal);
    Ok(())
}

#[test]
fn mode_gate_bypasses_items() -> Result<()> {
    let game_data = single_dungeon(|d| {
        let hall = d.add_node("Hall")?;
        let arena = d.add_node("Arena")?;
        d.add_connection(ConnectionSource::Entry(0), hall, Requirement::Free)?;
        d.add_connection(
            ConnectionSource::Node(hall),
            arena,
            Requirement::make_if(
                ModeCondition::EnemyShuffle(true),
                Requirement::Free,
                Requirement::item(Item::FireRod),
            ),
        )
    })?;
    let mut tracker = Tracker::new(&game_data);
    tracker.set_entry_always_accessible("Door", true)?;
    assert_eq!(tracker.accessibility(SW, "Arena")?, AccessibilityLevel::None);

    let mut mode = tracker.global().mode.clone();
    mode.enemy_shuffle = true;
    tracker.load_mode(mode.clone());
    assert_eq!(tracker.accessibility(SW, "Arena")?, AccessibilityLevel::Normal);
    tracker.set_item(Item::FireRod, 1);
    assert_eq!(tracker.accessibility(SW, "Arena")?, AccessibilityLevel::Normal);
    tracker.set_item(Item::FireRod, 0);
    assert_eq!(tracker.accessibility(SW, "Arena")?, AccessibilityLevel::Normal);

    mode.enemy_shuffle = false;
    tracker.load_mode(mode);
    assert_eq!(tracker.accessibility(SW, "Arena")?, AccessibilityLevel::None);
    Ok(())
}

#[test]
fn cycle_converges_from_either_side() -> Result<()> {
    let game_data = single_dungeon(|d| {
        let east = d.add_node("East")?;
        let west = d.add_node("West")?;
        let vault = d.add_node("Vault")?;
        d.add_connection(ConnectionSource::Node(west), east, Requirement::Free)?;
        d.add_connection(ConnectionSource::Entry(0), east, Requirement::Free)?;
        d.add_connection(ConnectionSource::Node(east), west, Requirement::Free)?;
        d.add_connection(ConnectionSource::Entry(1), west, Requirement::Free)?;
        d.add_connection(ConnectionSource::Node(west), vault, Requirement::Free)
    })?;
    let mut tracker = Tracker::new(&game_data);
    assert_eq!(tracker.accessibility(SW, "Vault")?, AccessibilityLevel::None);

    tracker.set_entry_level("Door", AccessibilityLevel::SequenceBreak)?;
    assert_eq!(tracker.accessibility(SW, "East")?, AccessibilityLevel::SequenceBreak);
    assert_eq!(tracker.accessibility(SW, "Vault")?, AccessibilityLevel::SequenceBreak);

    tracker.set_entry_always_accessible("Drop", true)?;
    assert_eq!(tracker.accessibility(SW, "East")?, AccessibilityLevel::Normal);
    assert_eq!(tracker.accessibility(SW, "Vault")?, AccessibilityLevel::Normal);

    // Dropping both entries must not leave the cycle holding itself up.
    tracker.set_entry_always_accessible("Drop", false)?;
    tracker.set_entry_level("Door", AccessibilityLevel::None)?;
    assert_eq!(tracker.accessibility(SW, "East")?, AccessibilityLevel::None);
    assert_eq!(tracker.accessibility(SW, "Vault")?, AccessibilityLevel::None);
    check_pass_bound(&tracker);
    Ok(())
}

#[test]
fn node_order_does_not_change_levels() -> Result<()> {
    let names = ["A", "B", "C", "D"];
    let build = |order: &[usize]| -> Result<GameData> {
        single_dungeon(|d| {
            for &i in order {
                d.add_node(names[i])?;
            }
            let idx = |name: &str| d.node_idx(name);
            let (a, b, c, dd) = (idx("A")?, idx("B")?, idx("C")?, idx("D")?);
            d.add_connection(ConnectionSource::Entry(0), a, Requirement::Free)?;
            d.add_connection(
                ConnectionSource::Node(a),
                b,
                Requirement::SequenceBreak(SequenceBreak::WaterWalk),
            )?;
            d.add_connection(ConnectionSource::Node(b), c, Requirement::Free)?;
            d.add_connection(ConnectionSource::Node(c), b, Requirement::Free)?;
            d.add_connection(
                ConnectionSource::Node(c),
                dd,
                Requirement::make_inspect(Requirement::item(Item::Flippers)),
            )
        })
    };
    let mut results = vec![];
    for order in [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]] {
        let mut tracker = Tracker::new(&build(&order)?);
        tracker.set_entry_always_accessible("Door", true)?;
        tracker.set_sequence_break(SequenceBreak::WaterWalk, true);
        let levels: Vec<AccessibilityLevel> = names
            .iter()
            .map(|n| tracker.accessibility(SW, n))
            .collect::<Result<_>>()?;
        results.push(levels);
    }
    assert_eq!(
        results[0],
        vec![
            AccessibilityLevel::Normal,
            AccessibilityLevel::SequenceBreak,
            AccessibilityLevel::SequenceBreak,
            AccessibilityLevel::Inspect,
        ]
    );
    assert_eq!(results[1], results[0]);
    assert_eq!(results[2], results[0]);
    Ok(())
}
