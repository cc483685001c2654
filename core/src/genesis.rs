//! Tick-0 world generation.
//!
//! Everything here is derived from the game seed through the Genesis RNG
//! slot, so two servers creating the same game produce byte-identical
//! genesis snapshots.

use crate::{
    attributes::{AttrValue, AttributeMap},
    content::Ruleset,
    error::{SimError, SimResult},
    game::Game,
    hex::HexCoord,
    rng::{RngBank, RngSlot, StreamRng},
    types::{PlayerId, Tick, UnitId},
    world::{
        HexTile, Interactable, InteractableKind, MapItem, Player, Rarity, Reward, ScheduledEvent,
        ScheduledKind, Terrain, TickStats, Unit, UnitStatus, WorldState, LOOT_LIFETIME,
    },
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Terrain roll table, weights out of 100.
const TERRAIN_WEIGHTS: [(Terrain, u64); 8] = [
    (Terrain::Plains, 40),
    (Terrain::Forest, 20),
    (Terrain::Mountain, 10),
    (Terrain::Water, 10),
    (Terrain::Desert, 6),
    (Terrain::Swamp, 6),
    (Terrain::Snow, 4),
    (Terrain::Urban, 4),
];

const LOOT_KINDS: [(&str, Rarity); 4] = [
    ("iron_ore", Rarity::Common),
    ("healing_herb", Rarity::Common),
    ("silver_ring", Rarity::Uncommon),
    ("ancient_relic", Rarity::Rare),
];

/// Ticks between scheduled windfalls.
const WINDFALL_INTERVAL: Tick = 10;

/// Build the genesis snapshot for `game` with the given seated players.
pub fn generate(game: &Game, players: &[(PlayerId, String)], ruleset: &Ruleset) -> SimResult<WorldState> {
    let cfg = &game.config;
    if players.is_empty() || players.len() > cfg.max_players as usize {
        return Err(SimError::Other(anyhow::anyhow!(
            "game {} needs 1..={} players, got {}",
            game.game_id,
            cfg.max_players,
            players.len()
        )));
    }

    let mut rng = RngBank::new(game.seed).for_slot_at_tick(RngSlot::Genesis, 0);
    let mut tiles = BTreeMap::new();
    let mut item_seq = 0u32;
    let mut node_seq = 0u32;

    for row in 0..cfg.map_height as i32 {
        for col in 0..cfg.map_width as i32 {
            let coord = HexCoord::from_offset(col, row);
            let terrain = roll_terrain(&mut rng);
            let mut tile = HexTile::new(coord, terrain);
            tile.elevation = match terrain {
                Terrain::Mountain => 3,
                Terrain::Water => -1,
                _ => rng.range_inclusive(0, 2) as i32,
            };
            tile.capacity = if terrain == Terrain::Urban { 2 } else { 1 };

            if ruleset.terrain_cost(terrain).is_some() {
                if rng.percent(cfg.loot_density_percent) {
                    let (kind, rarity) = LOOT_KINDS[rng.next_u64_below(LOOT_KINDS.len() as u64) as usize];
                    item_seq += 1;
                    tile.loot.push(MapItem {
                        item_id: format!("item-{item_seq}"),
                        item_kind: kind.to_string(),
                        quantity: 1 + rng.next_u64_below(3) as u32,
                        rarity,
                        spawned_at: 0,
                        despawn_at: Some(LOOT_LIFETIME),
                    });
                }
                if rng.percent(cfg.interactable_density_percent) {
                    node_seq += 1;
                    tile.interactables.push(roll_interactable(&mut rng, node_seq));
                }
            }
            tiles.insert(coord, tile);
        }
    }

    let mut world = WorldState {
        game_id: game.game_id.clone(),
        tick: 0,
        seed: game.seed,
        ruleset: ruleset.version.clone(),
        tiles: Arc::new(tiles),
        units: BTreeMap::new(),
        players: BTreeMap::new(),
        events: Vec::new(),
        scheduled: Vec::new(),
        next_unit_id: 1,
        stats: TickStats::default(),
        content_hash: String::new(),
    };

    let player_count = players.len() as i32;
    for (index, (player_id, name)) in players.iter().enumerate() {
        let mut player = Player::new(*player_id, name.clone(), cfg.starting_resources.clone());
        // Spread starting anchors along the middle row.
        let col = ((2 * index as i32 + 1) * cfg.map_width as i32) / (2 * player_count);
        let anchor = HexCoord::from_offset(col, cfg.map_height as i32 / 2);

        for kind in &cfg.starting_units {
            let def = ruleset.unit(kind).ok_or_else(|| {
                SimError::Other(anyhow::anyhow!("starting unit '{kind}' missing from ruleset"))
            })?;
            let spot = free_tile_near(&world, ruleset, anchor).ok_or_else(|| {
                SimError::Other(anyhow::anyhow!("no room to place starting units"))
            })?;
            let id: UnitId = world.next_unit_id;
            world.next_unit_id += 1;
            let mut attributes = AttributeMap::new();
            if let Some(spec) = ruleset.attribute("morale") {
                attributes
                    .set_checked("morale", AttrValue::Int(50), Some(spec))
                    .map_err(|e| SimError::Other(anyhow::anyhow!("genesis attribute: {e}")))?;
            }
            world.units.insert(
                id,
                Unit {
                    id,
                    owner: *player_id,
                    kind: kind.clone(),
                    position: spot,
                    hp: def.max_hp,
                    max_hp: def.max_hp,
                    stamina: def.max_stamina,
                    max_stamina: def.max_stamina,
                    experience: 0,
                    status: UnitStatus::Idle,
                    inventory: Vec::new(),
                    effects: Vec::new(),
                    attributes,
                },
            );
            player.units.insert(id);
        }
        world.players.insert(*player_id, player);
    }

    world.scheduled = schedule_events(&world, &mut rng);
    world.stats = TickStats {
        active_players: world.players.len() as u32,
        live_units: world.units.len() as u32,
        commands_applied: 0,
        commands_rejected: 0,
    };

    log::debug!(
        "genesis for {}: {} tiles, {} players, {} units",
        game.game_id,
        world.tiles.len(),
        world.players.len(),
        world.units.len()
    );
    Ok(world.seal()?)
}

fn roll_terrain(rng: &mut StreamRng) -> Terrain {
    let mut roll = rng.next_u64_below(100);
    for (terrain, weight) in TERRAIN_WEIGHTS {
        if roll < weight {
            return terrain;
        }
        roll -= weight;
    }
    Terrain::Plains
}

fn roll_interactable(rng: &mut StreamRng, seq: u32) -> Interactable {
    let id = format!("node-{seq}");
    match rng.next_u64_below(4) {
        0 => Interactable::new(
            id,
            InteractableKind::Chest,
            1,
            0,
            Reward::Resources {
                bag: [("gold".to_string(), 25 + rng.range_inclusive(0, 25))].into_iter().collect(),
            },
        ),
        1 => Interactable::new(id, InteractableKind::Shrine, 0, 5, Reward::Heal { amount: 30 }),
        2 => Interactable::new(
            id,
            InteractableKind::Npc,
            0,
            3,
            Reward::Blessing {
                effect: "defense".into(),
                magnitude: 5,
                duration: 3,
            },
        ),
        _ => Interactable::new(
            id,
            InteractableKind::ResourceNode,
            5,
            2,
            Reward::Resources {
                bag: [("food".to_string(), 10)].into_iter().collect(),
            },
        ),
    }
}

/// Closest enterable tile to `anchor` with spare capacity. Ties go to the
/// lower coordinate.
fn free_tile_near(world: &WorldState, ruleset: &Ruleset, anchor: HexCoord) -> Option<HexCoord> {
    let occupancy = world.occupancy();
    world
        .tiles
        .values()
        .filter(|t| ruleset.terrain_cost(t.terrain).is_some())
        .filter(|t| occupancy.get(&t.coord).copied().unwrap_or(0) < t.capacity)
        .min_by_key(|t| (t.coord.distance(anchor), t.coord))
        .map(|t| t.coord)
}

fn schedule_events(world: &WorldState, rng: &mut StreamRng) -> Vec<ScheduledEvent> {
    let mut scheduled: Vec<ScheduledEvent> = (1..=3)
        .map(|n| ScheduledEvent {
            at_tick: n * WINDFALL_INTERVAL,
            kind: ScheduledKind::Windfall {
                resource: "gold".into(),
                amount: 20,
            },
        })
        .collect();

    let land: Vec<HexCoord> = world
        .tiles
        .values()
        .filter(|t| t.terrain != Terrain::Water)
        .map(|t| t.coord)
        .collect();
    if !land.is_empty() {
        let coord = land[rng.next_u64_below(land.len() as u64) as usize];
        scheduled.push(ScheduledEvent {
            at_tick: 5,
            kind: ScheduledKind::SpawnItem {
                coord,
                item: MapItem {
                    item_id: "relic-cache".into(),
                    item_kind: "ancient_relic".into(),
                    quantity: 1,
                    rarity: Rarity::Epic,
                    spawned_at: 5,
                    despawn_at: Some(5 + LOOT_LIFETIME),
                },
            },
        });
    }
    scheduled.sort_by_key(|s| s.at_tick);
    scheduled
}
