//! The versioned world document.
//!
//! A `WorldState` is the complete, immutable snapshot of one game at one
//! tick. Resolution never edits a committed state: it derives a successor
//! (`WorldState::successor`), mutates that draft, and seals it with a
//! content hash. The tile map is shared copy-on-write between a state and
//! its successor until a tile is actually touched.

use crate::{
    attributes::{AttrValue, AttributeMap},
    event::GlobalEvent,
    hex::HexCoord,
    types::{GameId, InteractableId, ItemId, PlayerId, ResourceBag, Tick, UnitId},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    Plains,
    Forest,
    Mountain,
    Water,
    Desert,
    Swamp,
    Snow,
    Urban,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexTile {
    pub coord: HexCoord,
    pub terrain: Terrain,
    pub elevation: i32,
    /// Maximum number of units that may stand on this tile.
    pub capacity: u32,
    pub structure: Option<Structure>,
    pub loot: Vec<MapItem>,
    pub interactables: Vec<Interactable>,
    pub effects: Vec<TimedEffect>,
}

impl HexTile {
    pub fn new(coord: HexCoord, terrain: Terrain) -> Self {
        Self {
            coord,
            terrain,
            elevation: 0,
            capacity: 1,
            structure: None,
            loot: Vec::new(),
            interactables: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn item(&self, item_id: &str) -> Option<&MapItem> {
        self.loot.iter().find(|i| i.item_id == item_id)
    }

    pub fn interactable(&self, id: &str) -> Option<&Interactable> {
        self.interactables.iter().find(|i| i.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    pub kind: String,
    pub owner: PlayerId,
    pub hp: i32,
    pub progress: u32,
    pub required: u32,
}

impl Structure {
    pub fn is_complete(&self) -> bool {
        self.progress >= self.required
    }
}

/// Ticks loot stays on the map before despawning.
pub const LOOT_LIFETIME: Tick = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapItem {
    pub item_id: ItemId,
    pub item_kind: String,
    pub quantity: u32,
    pub rarity: Rarity,
    pub spawned_at: Tick,
    pub despawn_at: Option<Tick>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractableKind {
    Chest,
    Door,
    Npc,
    Portal,
    Shrine,
    Trap,
    ResourceNode,
    Puzzle,
}

/// What a unit receives from using an interactable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reward", rename_all = "snake_case")]
pub enum Reward {
    Resources { bag: ResourceBag },
    Heal { amount: i32 },
    Attribute { key: String, value: AttrValue },
    Item { item_kind: String, quantity: u32 },
    /// Timed unit effect; `effect` names the stat it modifies.
    Blessing { effect: String, magnitude: i32, duration: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interactable {
    pub id: InteractableId,
    pub kind: InteractableKind,
    /// 0 means unlimited.
    pub max_uses: u32,
    pub uses: u32,
    pub cooldown_ticks: u32,
    pub last_used: Option<Tick>,
    pub reward: Reward,
    /// Every successful use, oldest first.
    #[serde(default)]
    pub interactions: Vec<InteractionRecord>,
}

/// Who used an interactable, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub unit_id: UnitId,
    pub player_id: PlayerId,
    pub tick: Tick,
}

impl Interactable {
    /// Fresh, never used.
    pub fn new(
        id: InteractableId,
        kind: InteractableKind,
        max_uses: u32,
        cooldown_ticks: u32,
        reward: Reward,
    ) -> Self {
        Self {
            id,
            kind,
            max_uses,
            uses: 0,
            cooldown_ticks,
            last_used: None,
            reward,
            interactions: Vec::new(),
        }
    }

    /// Count a use by `unit_id` at `tick`.
    pub fn record_use(&mut self, unit_id: UnitId, player_id: PlayerId, tick: Tick) {
        self.uses += 1;
        self.last_used = Some(tick);
        self.interactions.push(InteractionRecord { unit_id, player_id, tick });
    }

    /// Uses left, `None` when unlimited.
    pub fn remaining_uses(&self) -> Option<u32> {
        (self.max_uses > 0).then(|| self.max_uses.saturating_sub(self.uses))
    }

    pub fn usable_at(&self, tick: Tick) -> bool {
        if self.remaining_uses() == Some(0) {
            return false;
        }
        match self.last_used {
            Some(last) => tick >= last + Tick::from(self.cooldown_ticks),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEffect {
    pub kind: String,
    pub magnitude: i32,
    pub expires_at: Tick,
}

/// Sum of active effects of `kind`.
pub fn effect_bonus(effects: &[TimedEffect], kind: &str) -> i32 {
    effects.iter().filter(|e| e.kind == kind).map(|e| e.magnitude).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Idle,
    Moving,
    Fighting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub item_id: ItemId,
    pub item_kind: String,
    pub quantity: u32,
    pub rarity: Rarity,
    pub acquired_at: Tick,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub owner: PlayerId,
    pub kind: String,
    /// Weak reference to the tile the unit stands on.
    pub position: HexCoord,
    pub hp: i32,
    pub max_hp: i32,
    pub stamina: i32,
    pub max_stamina: i32,
    pub experience: u32,
    pub status: UnitStatus,
    pub inventory: Vec<InventoryItem>,
    pub effects: Vec<TimedEffect>,
    pub attributes: AttributeMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Neutral,
    War,
    Peace,
    Alliance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub stance: Stance,
    pub since_tick: Tick,
    /// A treaty this side has offered and the other side has not yet matched.
    pub proposed: Option<Stance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchProgress {
    pub tech: String,
    pub progress: u32,
    pub required: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub resources: ResourceBag,
    pub researched: BTreeSet<String>,
    pub research: Option<ResearchProgress>,
    pub diplomacy: BTreeMap<PlayerId, Relation>,
    /// Weak references; a listed unit may already be gone.
    pub units: BTreeSet<UnitId>,
    pub active: bool,
    pub score: i64,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, resources: ResourceBag) -> Self {
        Self {
            id,
            name: name.into(),
            resources,
            researched: BTreeSet::new(),
            research: None,
            diplomacy: BTreeMap::new(),
            units: BTreeSet::new(),
            active: true,
            score: 0,
        }
    }

    pub fn balance(&self, resource: &str) -> i64 {
        self.resources.get(resource).copied().unwrap_or(0)
    }

    pub fn stance_toward(&self, other: PlayerId) -> Stance {
        self.diplomacy
            .get(&other)
            .map_or(Stance::Neutral, |r| r.stance)
    }

    /// First resource in `cost` the player cannot cover, as
    /// (resource, needed, available).
    pub fn shortfall(&self, cost: &ResourceBag) -> Option<(String, i64, i64)> {
        cost.iter()
            .find(|(res, amount)| self.balance(res) < **amount)
            .map(|(res, amount)| (res.clone(), *amount, self.balance(res)))
    }
}

/// Fires once when the world reaches `at_tick`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub at_tick: Tick,
    pub kind: ScheduledKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduledKind {
    /// Every active player receives `amount` of `resource`.
    Windfall { resource: String, amount: i64 },
    SpawnItem { coord: HexCoord, item: MapItem },
    TerrainShift { coord: HexCoord, terrain: Terrain },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickStats {
    pub active_players: u32,
    pub live_units: u32,
    pub commands_applied: u32,
    pub commands_rejected: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState {
    pub game_id: GameId,
    pub tick: Tick,
    pub seed: u64,
    pub ruleset: String,
    pub tiles: Arc<BTreeMap<HexCoord, HexTile>>,
    pub units: BTreeMap<UnitId, Unit>,
    pub players: BTreeMap<PlayerId, Player>,
    /// Events produced by the transition into this tick.
    pub events: Vec<GlobalEvent>,
    pub scheduled: Vec<ScheduledEvent>,
    pub next_unit_id: UnitId,
    pub stats: TickStats,
    /// SHA-256 of the canonical JSON form with this field excluded.
    #[serde(default)]
    pub content_hash: String,
}

impl WorldState {
    pub fn tile(&self, coord: HexCoord) -> Option<&HexTile> {
        self.tiles.get(&coord)
    }

    /// Copy-on-write access to one tile.
    pub fn tile_mut(&mut self, coord: HexCoord) -> Option<&mut HexTile> {
        Arc::make_mut(&mut self.tiles).get_mut(&coord)
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn units_at(&self, coord: HexCoord) -> impl Iterator<Item = &Unit> {
        self.units.values().filter(move |u| u.position == coord)
    }

    pub fn occupancy(&self) -> BTreeMap<HexCoord, u32> {
        let mut counts = BTreeMap::new();
        for unit in self.units.values() {
            *counts.entry(unit.position).or_insert(0) += 1;
        }
        counts
    }

    /// Effective stance between two players. Relations are kept symmetric
    /// by the resolver, so reading one side is enough.
    pub fn stance(&self, a: PlayerId, b: PlayerId) -> Stance {
        self.player(a).map_or(Stance::Neutral, |p| p.stance_toward(b))
    }

    /// Unsealed draft of the next tick: same entities, tick + 1, empty event
    /// list and statistics.
    pub fn successor(&self) -> WorldState {
        let mut next = self.clone();
        next.tick = self.tick + 1;
        next.events = Vec::new();
        next.stats = TickStats::default();
        next.content_hash = String::new();
        next
    }

    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("content_hash");
        }
        let bytes = serde_json::to_vec(&value)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Finalise a draft by computing and storing its content hash.
    pub fn seal(mut self) -> Result<WorldState, serde_json::Error> {
        self.content_hash = self.compute_hash()?;
        Ok(self)
    }

    pub fn verify_hash(&self) -> Result<bool, serde_json::Error> {
        Ok(!self.content_hash.is_empty() && self.compute_hash()? == self.content_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_world() -> WorldState {
        let mut tiles = BTreeMap::new();
        for q in 0..3 {
            let c = HexCoord::new(q, 0);
            tiles.insert(c, HexTile::new(c, Terrain::Plains));
        }
        WorldState {
            game_id: "g".into(),
            tick: 0,
            seed: 7,
            ruleset: "v1".into(),
            tiles: Arc::new(tiles),
            units: BTreeMap::new(),
            players: BTreeMap::new(),
            events: Vec::new(),
            scheduled: Vec::new(),
            next_unit_id: 1,
            stats: TickStats::default(),
            content_hash: String::new(),
        }
    }

    #[test]
    fn interaction_history_is_hashed() {
        let at = HexCoord::new(0, 0);
        let mut world = tiny_world();
        world.tile_mut(at).unwrap().interactables.push(Interactable::new(
            "shrine".into(),
            InteractableKind::Shrine,
            0,
            2,
            Reward::Heal { amount: 10 },
        ));
        let untouched = world.clone().seal().unwrap();

        let node = &mut world.tile_mut(at).unwrap().interactables[0];
        node.record_use(4, 1, 3);
        assert_eq!((node.uses, node.last_used), (1, Some(3)));
        assert!(!node.usable_at(4));
        assert!(node.usable_at(5));
        assert_ne!(world.seal().unwrap().content_hash, untouched.content_hash);
    }

    #[test]
    fn hash_is_stable_and_detects_tampering() {
        let sealed = tiny_world().seal().unwrap();
        assert!(sealed.verify_hash().unwrap());
        assert_eq!(sealed.compute_hash().unwrap(), sealed.content_hash);

        let mut tampered = sealed.clone();
        tampered.seed = 8;
        assert!(!tampered.verify_hash().unwrap(), "edited snapshot must fail verification");
    }

    #[test]
    fn successor_shares_tiles_until_written() {
        let base = tiny_world().seal().unwrap();
        let mut next = base.successor();
        assert_eq!(next.tick, 1);
        assert!(Arc::ptr_eq(&base.tiles, &next.tiles));

        next.tile_mut(HexCoord::new(1, 0)).unwrap().terrain = Terrain::Forest;
        assert!(!Arc::ptr_eq(&base.tiles, &next.tiles));
        assert_eq!(base.tile(HexCoord::new(1, 0)).unwrap().terrain, Terrain::Plains);
    }
}
