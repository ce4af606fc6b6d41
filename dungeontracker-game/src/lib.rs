// The changes suggested by this lint usually make the code more cluttered and less clear:
#![allow(clippy::needless_range_loop)]

use anyhow::{Context, Result, bail, ensure};
use hashbrown::HashMap;
use json::{self, JsonValue};
use log::info;
use serde::{Deserialize, Serialize};
use std::borrow::ToOwned;
use std::fs::File;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString, VariantNames};

pub type NodeIdx = usize; // Index into DungeonData.node_isv.keys (only unique within a dungeon)
pub type DoorIdx = usize; // Index into DungeonData.door_isv.keys (only unique within a dungeon)
pub type EntryIdx = usize; // Index into GameData.entry_isv.keys: overworld entrances feeding dungeons
pub type DungeonIdx = usize; // Index into GameData.dungeons
pub type ItemCount = u8; // Quantity of a single item kind held by the player

#[derive(Default, Clone, Debug)]
pub struct IndexedVec<T: Hash + Eq> {
    pub keys: Vec<T>,
    pub index_by_key: HashMap<T, usize>,
}

impl<T: Hash + Eq> IndexedVec<T> {
    pub fn add<U: ToOwned<Owned = T> + ?Sized>(&mut self, name: &U) -> usize {
        if !self.index_by_key.contains_key(&name.to_owned()) {
            let idx = self.keys.len();
            self.index_by_key.insert(name.to_owned(), self.keys.len());
            self.keys.push(name.to_owned());
            idx
        } else {
            self.index_by_key[&name.to_owned()]
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Result of the propagation engine for a single node, ordered from worst to best.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
    Serialize,
    Deserialize,
)]
pub enum AccessibilityLevel {
    #[default]
    None,
    Inspect,
    SequenceBreak,
    Normal,
}

impl AccessibilityLevel {
    pub fn from_bool(value: bool) -> Self {
        if value {
            AccessibilityLevel::Normal
        } else {
            AccessibilityLevel::None
        }
    }

    /// Lattice join, used to combine alternative connections.
    pub fn join(self, other: Self) -> Self {
        std::cmp::max(self, other)
    }

    /// Lattice meet, used to combine conditions that must all hold.
    pub fn meet(self, other: Self) -> Self {
        std::cmp::min(self, other)
    }

    pub fn is_reachable(self) -> bool {
        self > AccessibilityLevel::None
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
    Serialize,
    Deserialize,
    PartialOrd,
    Ord,
)]
#[repr(usize)]
// Note: the ordering of these items is significant; it is the index into Inventory counts.
pub enum Item {
    Sword,
    Shield,
    Mail,
    Bow,
    SilverArrows,
    Boomerang,
    RedBoomerang,
    Hookshot,
    Bombs,
    Powder,
    Mushroom,
    FireRod,
    IceRod,
    Bombos,
    Ether,
    Quake,
    Lamp,
    Hammer,
    Shovel,
    Flute,
    Net,
    Book,
    Bottle,
    CaneOfSomaria,
    CaneOfByrna,
    Cape,
    Mirror,
    Boots,
    Gloves,
    Flippers,
    MoonPearl,
    HalfMagic,
    Aga1,
    HCSmallKey,
    HCBigKey,
    ATSmallKey,
    EPSmallKey,
    EPBigKey,
    DPSmallKey,
    DPBigKey,
    ToHSmallKey,
    ToHBigKey,
    PoDSmallKey,
    PoDBigKey,
    SPSmallKey,
    SPBigKey,
    SWSmallKey,
    SWBigKey,
    TTSmallKey,
    TTBigKey,
    IPSmallKey,
    IPBigKey,
    MMSmallKey,
    MMBigKey,
    TRSmallKey,
    TRBigKey,
    GTSmallKey,
    GTBigKey,
}

impl Item {
    pub const COUNT: usize = Item::GTBigKey as usize + 1;

    /// Largest quantity of this item the player can hold.
    pub fn max_count(self) -> ItemCount {
        match self {
            Item::Sword => 4,
            Item::Shield => 3,
            Item::Mail => 2,
            Item::Bottle => 4,
            Item::Gloves => 2,
            Item::HCSmallKey => DungeonId::HyruleCastle.max_small_keys(),
            Item::ATSmallKey => DungeonId::AgahnimsTower.max_small_keys(),
            Item::EPSmallKey => DungeonId::EasternPalace.max_small_keys(),
            Item::DPSmallKey => DungeonId::DesertPalace.max_small_keys(),
            Item::ToHSmallKey => DungeonId::TowerOfHera.max_small_keys(),
            Item::PoDSmallKey => DungeonId::PalaceOfDarkness.max_small_keys(),
            Item::SPSmallKey => DungeonId::SwampPalace.max_small_keys(),
            Item::SWSmallKey => DungeonId::SkullWoods.max_small_keys(),
            Item::TTSmallKey => DungeonId::ThievesTown.max_small_keys(),
            Item::IPSmallKey => DungeonId::IcePalace.max_small_keys(),
            Item::MMSmallKey => DungeonId::MiseryMire.max_small_keys(),
            Item::TRSmallKey => DungeonId::TurtleRock.max_small_keys(),
            Item::GTSmallKey => DungeonId::GanonsTower.max_small_keys(),
            _ => 1,
        }
    }

    pub fn is_dungeon_item(self) -> bool {
        self >= Item::HCSmallKey
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
    Serialize,
    Deserialize,
    PartialOrd,
    Ord,
)]
pub enum DungeonId {
    HyruleCastle,
    AgahnimsTower,
    EasternPalace,
    DesertPalace,
    TowerOfHera,
    PalaceOfDarkness,
    SwampPalace,
    SkullWoods,
    ThievesTown,
    IcePalace,
    MiseryMire,
    TurtleRock,
    GanonsTower,
}

impl DungeonId {
    // Counts include the keys dropped by enemies and pots, which only matter with key drop shuffle.
    pub fn max_small_keys(self) -> ItemCount {
        match self {
            DungeonId::HyruleCastle => 4,
            DungeonId::AgahnimsTower => 4,
            DungeonId::EasternPalace => 2,
            DungeonId::DesertPalace => 4,
            DungeonId::TowerOfHera => 1,
            DungeonId::PalaceOfDarkness => 6,
            DungeonId::SwampPalace => 6,
            DungeonId::SkullWoods => 5,
            DungeonId::ThievesTown => 3,
            DungeonId::IcePalace => 6,
            DungeonId::MiseryMire => 6,
            DungeonId::TurtleRock => 6,
            DungeonId::GanonsTower => 8,
        }
    }

    pub fn small_key(self) -> Item {
        match self {
            DungeonId::HyruleCastle => Item::HCSmallKey,
            DungeonId::AgahnimsTower => Item::ATSmallKey,
            DungeonId::EasternPalace => Item::EPSmallKey,
            DungeonId::DesertPalace => Item::DPSmallKey,
            DungeonId::TowerOfHera => Item::ToHSmallKey,
            DungeonId::PalaceOfDarkness => Item::PoDSmallKey,
            DungeonId::SwampPalace => Item::SPSmallKey,
            DungeonId::SkullWoods => Item::SWSmallKey,
            DungeonId::ThievesTown => Item::TTSmallKey,
            DungeonId::IcePalace => Item::IPSmallKey,
            DungeonId::MiseryMire => Item::MMSmallKey,
            DungeonId::TurtleRock => Item::TRSmallKey,
            DungeonId::GanonsTower => Item::GTSmallKey,
        }
    }

    /// Agahnim's Tower is the only dungeon without a big key.
    pub fn big_key(self) -> Option<Item> {
        match self {
            DungeonId::HyruleCastle => Some(Item::HCBigKey),
            DungeonId::AgahnimsTower => None,
            DungeonId::EasternPalace => Some(Item::EPBigKey),
            DungeonId::DesertPalace => Some(Item::DPBigKey),
            DungeonId::TowerOfHera => Some(Item::ToHBigKey),
            DungeonId::PalaceOfDarkness => Some(Item::PoDBigKey),
            DungeonId::SwampPalace => Some(Item::SPBigKey),
            DungeonId::SkullWoods => Some(Item::SWBigKey),
            DungeonId::ThievesTown => Some(Item::TTBigKey),
            DungeonId::IcePalace => Some(Item::IPBigKey),
            DungeonId::MiseryMire => Some(Item::MMBigKey),
            DungeonId::TurtleRock => Some(Item::TRBigKey),
            DungeonId::GanonsTower => Some(Item::GTBigKey),
        }
    }
}

/// Non-standard traversal tricks, each globally enabled or disabled by the player.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
    Serialize,
    Deserialize,
    PartialOrd,
    Ord,
)]
#[repr(usize)]
pub enum SequenceBreak {
    BombDuplicationAncillaOverload,
    BombDuplicationMirror,
    BombJumpPoDHammerJump,
    BombJumpSWBigChest,
    BombJumpIPBJ,
    BombJumpIPHookshotGap,
    BombJumpIPFreezorRoomGap,
    BonkOverLedge,
    DarkRoomAT,
    DarkRoomDeathMountainEntry,
    DarkRoomDeathMountainExit,
    DarkRoomEPBack,
    DarkRoomEPRight,
    DarkRoomHC,
    DarkRoomMM,
    DarkRoomOldMan,
    DarkRoomPoDBossArea,
    DarkRoomPoDDarkBasement,
    DarkRoomPoDDarkMaze,
    DarkRoomSW,
    DarkRoomTR,
    FakeFlipperFairyRevival,
    FakeFlipperQuirks,
    FakeFlipperScreenTransition,
    Hover,
    IPIceBreaker,
    MimicClip,
    SpikeCave,
    SuperBunnyFallInHole,
    SuperBunnyMirror,
    WaterWalk,
}

impl SequenceBreak {
    pub const COUNT: usize = SequenceBreak::WaterWalk as usize + 1;
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
    Serialize,
    Deserialize,
)]
pub enum WorldState {
    Standard,
    #[default]
    Open,
    Inverted,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
    Serialize,
    Deserialize,
)]
pub enum ItemPlacement {
    #[default]
    Advanced,
    Basic,
}

// Ordered: each level shuffles everything the previous level does.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
    Serialize,
    Deserialize,
    PartialOrd,
    Ord,
)]
pub enum DungeonItemShuffle {
    #[default]
    Standard,
    MapsCompasses,
    MapsCompassesSmallKeys,
    Keysanity,
}

/// A test against the current mode configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModeCondition {
    WorldState(WorldState),
    ItemPlacement(ItemPlacement),
    // Holds when the configured shuffle is at least this level.
    DungeonItemShuffle(DungeonItemShuffle),
    GenericKeys(bool),
    EnemyShuffle(bool),
    BossShuffle(bool),
    KeyDropShuffle(bool),
}

/// Condition attached to a connection. Every variant is monotone in items, key doors,
/// sequence breaks and the upstream level; `If` branches only on the mode.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Requirement {
    Free,
    Never,
    Upstream,
    Item {
        item: Item,
        count: ItemCount,
    },
    KeyDoor(DoorIdx),
    SequenceBreak(SequenceBreak),
    Mode(ModeCondition),
    If {
        condition: ModeCondition,
        then: Box<Requirement>,
        otherwise: Box<Requirement>,
    },
    Cap {
        level: AccessibilityLevel,
        requirement: Box<Requirement>,
    },
    Inspect(Box<Requirement>),
    And(Vec<Requirement>),
    Or(Vec<Requirement>),
}

impl Requirement {
    pub fn make_and(reqs: Vec<Requirement>) -> Requirement {
        let mut out_reqs: Vec<Requirement> = vec![];
        for req in reqs {
            if let Requirement::Never = req {
                return Requirement::Never;
            } else if let Requirement::Free = req {
                continue;
            } else if let Requirement::And(and_reqs) = req {
                out_reqs.extend(and_reqs);
            } else {
                out_reqs.push(req);
            }
        }
        if out_reqs.len() == 1 {
            out_reqs.pop().unwrap_or(Requirement::Free)
        } else if out_reqs.is_empty() {
            Requirement::Free
        } else {
            Requirement::And(out_reqs)
        }
    }

    pub fn make_or(reqs: Vec<Requirement>) -> Requirement {
        let mut out_reqs: Vec<Requirement> = vec![];
        for req in reqs {
            if let Requirement::Never = req {
                continue;
            } else if let Requirement::Free = req {
                return Requirement::Free;
            } else if let Requirement::Or(or_reqs) = req {
                out_reqs.extend(or_reqs);
            } else {
                out_reqs.push(req);
            }
        }
        if out_reqs.len() == 1 {
            out_reqs.pop().unwrap_or(Requirement::Never)
        } else if out_reqs.is_empty() {
            Requirement::Never
        } else {
            Requirement::Or(out_reqs)
        }
    }

    pub fn item(item: Item) -> Requirement {
        Requirement::Item { item, count: 1 }
    }

    /// All of the given item thresholds must hold.
    pub fn items(items: &[(Item, ItemCount)]) -> Requirement {
        Requirement::make_and(
            items
                .iter()
                .map(|&(item, count)| {
                    if count == 0 {
                        Requirement::Free
                    } else {
                        Requirement::Item { item, count }
                    }
                })
                .collect(),
        )
    }

    pub fn make_if(
        condition: ModeCondition,
        then: Requirement,
        otherwise: Requirement,
    ) -> Requirement {
        Requirement::If {
            condition,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn make_inspect(req: Requirement) -> Requirement {
        Requirement::Inspect(Box::new(req))
    }

    pub fn make_cap(level: AccessibilityLevel, req: Requirement) -> Requirement {
        Requirement::Cap {
            level,
            requirement: Box::new(req),
        }
    }

    /// Visits this requirement and all of its sub-requirements.
    pub fn visit<F: FnMut(&Requirement)>(&self, f: &mut F) {
        f(self);
        match self {
            Requirement::If {
                then, otherwise, ..
            } => {
                then.visit(f);
                otherwise.visit(f);
            }
            Requirement::Cap { requirement, .. } => requirement.visit(f),
            Requirement::Inspect(req) => req.visit(f),
            Requirement::And(reqs) | Requirement::Or(reqs) => {
                for r in reqs {
                    r.visit(f);
                }
            }
            _ => {}
        }
    }

    pub fn print_pretty(&self, indent: usize, dungeon: &DungeonData) {
        let spaces = " ".repeat(indent);
        print!("{spaces}");
        match self {
            &Requirement::Item { item, count } => {
                if count == 1 {
                    print!("{item}");
                } else {
                    print!("{item} x{count}");
                }
            }
            &Requirement::KeyDoor(door_idx) => {
                print!("KeyDoor({})", dungeon.door_isv.keys[door_idx]);
            }
            Requirement::If {
                condition,
                then,
                otherwise,
            } => {
                println!("If({condition:?},");
                then.print_pretty(indent + 2, dungeon);
                println!(",");
                otherwise.print_pretty(indent + 2, dungeon);
                println!(",");
                print!("{spaces})")
            }
            Requirement::Cap { level, requirement } => {
                println!("Cap({level},");
                requirement.print_pretty(indent + 2, dungeon);
                println!(",");
                print!("{spaces})")
            }
            Requirement::Inspect(req) => {
                println!("Inspect(");
                req.print_pretty(indent + 2, dungeon);
                println!(",");
                print!("{spaces})")
            }
            Requirement::And(reqs) => {
                println!("And(");
                for r in reqs {
                    r.print_pretty(indent + 2, dungeon);
                    println!(",");
                }
                print!("{spaces})")
            }
            Requirement::Or(reqs) => {
                println!("Or(");
                for r in reqs {
                    r.print_pretty(indent + 2, dungeon);
                    println!(",");
                }
                print!("{spaces})")
            }
            other => {
                print!("{other:?}");
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionSource {
    Entry(EntryIdx),
    Node(NodeIdx),
}

/// Directed edge into a dungeon node.
#[derive(Clone, Debug)]
pub struct ConnectionData {
    pub source: ConnectionSource,
    pub to_node_idx: NodeIdx,
    pub requirement: Requirement,
}

/// Static description of one dungeon's graph. Connections are grouped by destination
/// node, in declaration order.
#[derive(Clone, Debug)]
pub struct DungeonData {
    pub dungeon_id: DungeonId,
    pub node_isv: IndexedVec<String>,
    pub door_isv: IndexedVec<String>,
    pub connections_by_dst: Vec<Vec<ConnectionData>>,
}

impl DungeonData {
    pub fn new(dungeon_id: DungeonId) -> Self {
        DungeonData {
            dungeon_id,
            node_isv: IndexedVec::default(),
            door_isv: IndexedVec::default(),
            connections_by_dst: vec![],
        }
    }

    pub fn add_node(&mut self, name: &str) -> Result<NodeIdx> {
        if self.node_isv.index_by_key.contains_key(name) {
            bail!("Duplicate node {} in {}", name, self.dungeon_id);
        }
        let idx = self.node_isv.add(name);
        self.connections_by_dst.push(vec![]);
        Ok(idx)
    }

    pub fn add_key_door(&mut self, name: &str) -> Result<DoorIdx> {
        if self.door_isv.index_by_key.contains_key(name) {
            bail!("Duplicate key door {} in {}", name, self.dungeon_id);
        }
        Ok(self.door_isv.add(name))
    }

    pub fn node_idx(&self, name: &str) -> Result<NodeIdx> {
        self.node_isv
            .index_by_key
            .get(name)
            .copied()
            .with_context(|| format!("Unknown node {} in {}", name, self.dungeon_id))
    }

    pub fn door_idx(&self, name: &str) -> Result<DoorIdx> {
        self.door_isv
            .index_by_key
            .get(name)
            .copied()
            .with_context(|| format!("Unknown key door {} in {}", name, self.dungeon_id))
    }

    pub fn num_nodes(&self) -> usize {
        self.node_isv.len()
    }

    pub fn num_connections(&self) -> usize {
        self.connections_by_dst.iter().map(|c| c.len()).sum()
    }

    pub fn add_connection(
        &mut self,
        source: ConnectionSource,
        to_node_idx: NodeIdx,
        requirement: Requirement,
    ) -> Result<()> {
        ensure!(
            to_node_idx < self.num_nodes(),
            "Connection into undeclared node index {} in {}",
            to_node_idx,
            self.dungeon_id
        );
        if let ConnectionSource::Node(from_idx) = source {
            ensure!(
                from_idx < self.num_nodes(),
                "Connection from undeclared node index {} in {}",
                from_idx,
                self.dungeon_id
            );
        }
        self.validate_requirement(&requirement)?;
        self.connections_by_dst[to_node_idx].push(ConnectionData {
            source,
            to_node_idx,
            requirement,
        });
        Ok(())
    }

    fn validate_requirement(&self, req: &Requirement) -> Result<()> {
        let mut bad_door: Option<DoorIdx> = None;
        let mut bad_item: Option<(Item, ItemCount)> = None;
        req.visit(&mut |r| match *r {
            Requirement::KeyDoor(door_idx) if door_idx >= self.door_isv.len() => {
                bad_door = Some(door_idx);
            }
            Requirement::Item { item, count } if count > item.max_count() => {
                bad_item = Some((item, count));
            }
            _ => {}
        });
        if let Some(door_idx) = bad_door {
            bail!(
                "Requirement references undeclared key door index {} in {}",
                door_idx,
                self.dungeon_id
            );
        }
        if let Some((item, count)) = bad_item {
            bail!(
                "Requirement needs {} x{} in {}, but at most {} can be held",
                item,
                count,
                self.dungeon_id,
                item.max_count()
            );
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
struct RequirementContext<'a> {
    dungeon: Option<&'a DungeonData>,
    node_name: &'a str,
}

#[derive(Default, Clone)]
pub struct GameData {
    pub data_path: PathBuf,
    pub entry_isv: IndexedVec<String>,
    helper_json_map: HashMap<String, JsonValue>,
    pub helpers: HashMap<String, Option<Requirement>>,
    pub dungeons: Vec<DungeonData>,
    pub dungeon_idx_by_id: HashMap<DungeonId, DungeonIdx>,
}

fn read_json(path: &Path) -> Result<JsonValue> {
    let file = File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    let json_str = std::io::read_to_string(file)
        .with_context(|| format!("unable to read {}", path.display()))?;
    let json_data =
        json::parse(&json_str).with_context(|| format!("unable to parse {}", path.display()))?;
    Ok(json_data)
}

fn parse_enum<T: FromStr>(value: &JsonValue, what: &str) -> Result<T> {
    let Some(s) = value.as_str() else {
        bail!("Expected {what} name, got {value}");
    };
    T::from_str(s)
        .ok()
        .with_context(|| format!("Unrecognized {what}: {s}"))
}

/// Rejects any key of a JSON object outside `allowed`, so that misspelled fields are fatal
/// instead of silently falling back to a default.
fn ensure_keys(value: &JsonValue, allowed: &[&str], what: &str) -> Result<()> {
    for (key, _) in value.entries() {
        ensure!(
            allowed.contains(&key),
            "Unrecognized key \"{}\" in {} {}",
            key,
            what,
            value
        );
    }
    Ok(())
}

fn parse_bool(value: &JsonValue, what: &str) -> Result<bool> {
    value
        .as_bool()
        .with_context(|| format!("Expected boolean for {what}, got {value}"))
}

impl GameData {
    pub fn add_entry(&mut self, name: &str) -> Result<EntryIdx> {
        if self.entry_isv.index_by_key.contains_key(name) {
            bail!("Duplicate entry {}", name);
        }
        Ok(self.entry_isv.add(name))
    }

    pub fn entry_idx(&self, name: &str) -> Result<EntryIdx> {
        self.entry_isv
            .index_by_key
            .get(name)
            .copied()
            .with_context(|| format!("Unknown entry {name}"))
    }

    /// Registers a dungeon graph, checking that every entry it reads from is declared.
    pub fn add_dungeon(&mut self, dungeon: DungeonData) -> Result<DungeonIdx> {
        if self.dungeon_idx_by_id.contains_key(&dungeon.dungeon_id) {
            bail!("Duplicate dungeon definition: {}", dungeon.dungeon_id);
        }
        for conns in &dungeon.connections_by_dst {
            for conn in conns {
                if let ConnectionSource::Entry(entry_idx) = conn.source {
                    ensure!(
                        entry_idx < self.entry_isv.len(),
                        "Connection into {} in {} reads undeclared entry index {}",
                        dungeon.node_isv.keys[conn.to_node_idx],
                        dungeon.dungeon_id,
                        entry_idx
                    );
                }
            }
        }
        let idx = self.dungeons.len();
        self.dungeon_idx_by_id.insert(dungeon.dungeon_id, idx);
        self.dungeons.push(dungeon);
        Ok(idx)
    }

    pub fn dungeon(&self, dungeon_id: DungeonId) -> Result<&DungeonData> {
        let idx = self
            .dungeon_idx_by_id
            .get(&dungeon_id)
            .with_context(|| format!("Dungeon {dungeon_id} is not loaded"))?;
        Ok(&self.dungeons[*idx])
    }

    fn load_entries(&mut self, path: &Path) -> Result<()> {
        let entries_json = read_json(path)?;
        ensure!(
            entries_json["entries"].is_array(),
            "{} must contain an \"entries\" array",
            path.display()
        );
        for entry in entries_json["entries"].members() {
            let name = entry
                .as_str()
                .with_context(|| format!("Entry names must be strings, got {entry}"))?;
            self.add_entry(name)?;
        }
        Ok(())
    }

    fn load_helpers(&mut self, path: &Path) -> Result<()> {
        let helpers_json = read_json(path)?;
        self.process_helpers(&helpers_json)
            .with_context(|| format!("Unable to load {}", path.display()))
    }

    fn process_helpers(&mut self, helpers_json: &JsonValue) -> Result<()> {
        ensure!(helpers_json["helpers"].is_array());
        for helper in helpers_json["helpers"].members() {
            ensure_keys(helper, &["name", "requires"], "helper")?;
            let name = helper["name"]
                .as_str()
                .context("Helper without a name")?
                .to_owned();
            // These names are matched before helpers when parsing requirements.
            ensure!(
                !["free", "never", "upstream"].contains(&name.as_str())
                    && Item::from_str(&name).is_err(),
                "Helper name {} is reserved",
                name
            );
            if self.helper_json_map.contains_key(&name) {
                bail!("Duplicate helper definition: {}", name);
            }
            self.helper_json_map.insert(name, helper.clone());
        }
        // Resolve eagerly so that cycles and bad references surface at load time.
        let mut names: Vec<String> = self.helper_json_map.keys().cloned().collect();
        names.sort();
        for name in names {
            self.get_helper(&name)?;
        }
        Ok(())
    }

    fn get_helper(&mut self, name: &str) -> Result<Requirement> {
        if let Some(helper) = self.helpers.get(name) {
            let Some(req) = helper else {
                bail!("Circular dependence in helper {}", name);
            };
            return Ok(req.clone());
        }
        self.helpers.insert(name.to_owned(), None);
        let json_value = self
            .helper_json_map
            .get(name)
            .with_context(|| format!("Unknown helper {name}"))?
            .clone();
        ensure!(
            json_value["requires"].is_array(),
            "Helper {} must have a \"requires\" array",
            name
        );
        let ctx = RequirementContext {
            dungeon: None,
            node_name: name,
        };
        let req = Requirement::make_and(
            self.parse_requires_list(json_value["requires"].members().as_slice(), &ctx)?,
        );
        self.helpers.insert(name.to_owned(), Some(req.clone()));
        Ok(req)
    }

    fn parse_requires_list(
        &mut self,
        req_jsons: &[JsonValue],
        ctx: &RequirementContext,
    ) -> Result<Vec<Requirement>> {
        let mut reqs: Vec<Requirement> = Vec::new();
        for req_json in req_jsons {
            reqs.push(self.parse_requirement(req_json, ctx)?);
        }
        Ok(reqs)
    }

    fn parse_mode_condition(&self, cond_json: &JsonValue) -> Result<ModeCondition> {
        ensure!(
            cond_json.is_object() && cond_json.len() == 1,
            "Mode condition must be an object with a single key, got {cond_json}"
        );
        let Some((key, value)) = cond_json.entries().next() else {
            bail!("Empty mode condition");
        };
        Ok(match key {
            "worldState" => ModeCondition::WorldState(parse_enum(value, "world state")?),
            "itemPlacement" => ModeCondition::ItemPlacement(parse_enum(value, "item placement")?),
            "dungeonItemShuffle" => {
                ModeCondition::DungeonItemShuffle(parse_enum(value, "dungeon item shuffle")?)
            }
            "genericKeys" => ModeCondition::GenericKeys(parse_bool(value, key)?),
            "enemyShuffle" => ModeCondition::EnemyShuffle(parse_bool(value, key)?),
            "bossShuffle" => ModeCondition::BossShuffle(parse_bool(value, key)?),
            "keyDropShuffle" => ModeCondition::KeyDropShuffle(parse_bool(value, key)?),
            _ => bail!("Unrecognized mode option: {}", key),
        })
    }

    fn parse_requirement(
        &mut self,
        req_json: &JsonValue,
        ctx: &RequirementContext,
    ) -> Result<Requirement> {
        if let Some(value) = req_json.as_str() {
            if value == "free" {
                return Ok(Requirement::Free);
            } else if value == "never" {
                return Ok(Requirement::Never);
            } else if value == "upstream" {
                return Ok(Requirement::Upstream);
            } else if let Ok(item) = Item::from_str(value) {
                return Ok(Requirement::item(item));
            } else if self.helper_json_map.contains_key(value) {
                return self.get_helper(value);
            }
        } else if req_json.is_array() {
            return Ok(Requirement::make_and(
                self.parse_requires_list(req_json.members().as_slice(), ctx)?,
            ));
        } else if req_json.is_object() && req_json.has_key("item") {
            ensure_keys(req_json, &["item", "count"], "item requirement")?;
            let item: Item = parse_enum(&req_json["item"], "item")?;
            let count = if req_json["count"].is_null() {
                1
            } else {
                req_json["count"]
                    .as_u8()
                    .with_context(|| format!("Invalid item count in {req_json}"))?
            };
            return Ok(Requirement::items(&[(item, count)]));
        } else if req_json.is_object() && req_json.has_key("if") {
            ensure_keys(req_json, &["if", "then", "else"], "conditional requirement")?;
            let condition = self.parse_mode_condition(&req_json["if"])?;
            let then = self.parse_requirement(&req_json["then"], ctx)?;
            let otherwise = if req_json["else"].is_null() {
                Requirement::Never
            } else {
                self.parse_requirement(&req_json["else"], ctx)?
            };
            return Ok(Requirement::make_if(condition, then, otherwise));
        } else if req_json.is_object() && req_json.has_key("cap") {
            ensure_keys(req_json, &["cap", "requirement"], "capped requirement")?;
            let level: AccessibilityLevel = parse_enum(&req_json["cap"], "accessibility level")?;
            let req = self.parse_requirement(&req_json["requirement"], ctx)?;
            return Ok(Requirement::make_cap(level, req));
        } else if req_json.is_object() && req_json.len() == 1 {
            if let Some((key, value)) = req_json.entries().next() {
                match key {
                    "and" => {
                        ensure!(value.is_array());
                        return Ok(Requirement::make_and(
                            self.parse_requires_list(value.members().as_slice(), ctx)?,
                        ));
                    }
                    "or" => {
                        ensure!(value.is_array());
                        return Ok(Requirement::make_or(
                            self.parse_requires_list(value.members().as_slice(), ctx)?,
                        ));
                    }
                    "keyDoor" => {
                        let door_name = value.as_str().context("keyDoor must be a string")?;
                        let Some(dungeon) = ctx.dungeon else {
                            bail!(
                                "Key door {} referenced outside of a dungeon (in {})",
                                door_name,
                                ctx.node_name
                            );
                        };
                        return Ok(Requirement::KeyDoor(dungeon.door_idx(door_name)?));
                    }
                    "sequenceBreak" => {
                        return Ok(Requirement::SequenceBreak(parse_enum(
                            value,
                            "sequence break",
                        )?));
                    }
                    "mode" => {
                        return Ok(Requirement::Mode(self.parse_mode_condition(value)?));
                    }
                    "inspect" => {
                        return Ok(Requirement::make_inspect(
                            self.parse_requirement(value, ctx)?,
                        ));
                    }
                    _ => {}
                }
            }
        }
        bail!(
            "Unable to parse requirement {} (in {})",
            req_json,
            ctx.node_name
        );
    }

    fn parse_source(&self, source_json: &JsonValue, dungeon: &DungeonData) -> Result<ConnectionSource> {
        if let Some(node_name) = source_json.as_str() {
            Ok(ConnectionSource::Node(dungeon.node_idx(node_name)?))
        } else if let Some(entry_name) = source_json["entry"].as_str() {
            ensure_keys(source_json, &["entry"], "connection source")?;
            Ok(ConnectionSource::Entry(self.entry_idx(entry_name)?))
        } else {
            bail!("Invalid connection source {} in {}", source_json, dungeon.dungeon_id);
        }
    }

    fn process_dungeon(&mut self, dungeon_json: &JsonValue) -> Result<DungeonIdx> {
        ensure_keys(dungeon_json, &["dungeon", "keyDoors", "nodes"], "dungeon")?;
        let dungeon_id: DungeonId = parse_enum(&dungeon_json["dungeon"], "dungeon")?;
        let mut dungeon = DungeonData::new(dungeon_id);
        for door_json in dungeon_json["keyDoors"].members() {
            let door_name = door_json.as_str().context("Key door names must be strings")?;
            dungeon.add_key_door(door_name)?;
        }
        ensure!(
            dungeon_json["nodes"].is_array(),
            "{} has no \"nodes\" array",
            dungeon_id
        );
        // Declare every node first, so that connections may refer to nodes defined later.
        for node_json in dungeon_json["nodes"].members() {
            ensure_keys(node_json, &["name", "connections"], "node")?;
            let node_name = node_json["name"]
                .as_str()
                .with_context(|| format!("Node without a name in {dungeon_id}"))?;
            dungeon.add_node(node_name)?;
        }
        for (to_idx, node_json) in dungeon_json["nodes"].members().enumerate() {
            for conn_json in node_json["connections"].members() {
                ensure_keys(conn_json, &["from", "requires"], "connection")?;
                let source = self.parse_source(&conn_json["from"], &dungeon)?;
                let requirement = if conn_json["requires"].is_null() {
                    Requirement::Free
                } else {
                    let ctx = RequirementContext {
                        dungeon: Some(&dungeon),
                        node_name: &dungeon.node_isv.keys[to_idx],
                    };
                    self.parse_requirement(&conn_json["requires"], &ctx)?
                };
                dungeon.add_connection(source, to_idx, requirement)?;
            }
        }
        info!(
            "Loaded {}: {} nodes, {} connections, {} key doors",
            dungeon_id,
            dungeon.num_nodes(),
            dungeon.num_connections(),
            dungeon.door_isv.len()
        );
        self.add_dungeon(dungeon)
    }

    fn load_dungeons(&mut self) -> Result<()> {
        let dungeon_pattern =
            self.data_path.to_string_lossy().to_string() + "/dungeons/*.json";
        for entry in glob::glob(&dungeon_pattern)? {
            match entry {
                Ok(path) => {
                    let dungeon_json = read_json(&path)?;
                    self.process_dungeon(&dungeon_json)
                        .with_context(|| format!("Unable to load {}", path.display()))?;
                }
                Err(e) => bail!("Error processing dungeon path: {}", e),
            }
        }
        Ok(())
    }

    pub fn load_minimal(data_path: &Path) -> Result<GameData> {
        let mut game_data = GameData {
            data_path: data_path.to_owned(),
            ..GameData::default()
        };
        game_data.load_entries(&data_path.join("entries.json"))?;
        game_data.load_helpers(&data_path.join("helpers.json"))?;
        Ok(game_data)
    }

    pub fn load(data_path: &Path) -> Result<GameData> {
        let mut game_data = Self::load_minimal(data_path)?;
        game_data.load_dungeons()?;
        ensure!(
            !game_data.dungeons.is_empty(),
            "No dungeons found under {}",
            data_path.display()
        );
        Ok(game_data)
    }

    /// Parses a single dungeon definition, for callers that build `GameData` piecewise.
    pub fn load_dungeon_str(&mut self, dungeon_json_str: &str) -> Result<DungeonIdx> {
        let dungeon_json = json::parse(dungeon_json_str).context("unable to parse dungeon")?;
        self.process_dungeon(&dungeon_json)
    }

    pub fn load_helpers_str(&mut self, helpers_json_str: &str) -> Result<()> {
        let helpers_json = json::parse(helpers_json_str).context("unable to parse helpers")?;
        self.process_helpers(&helpers_json)
    }
}
