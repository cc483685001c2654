//! Passive world rules and their registry.
//!
//! RULE: Every passive rule implements PassiveRule.
//! The resolver runs the registered rules after all player commands,
//! in registration order, every tick.
//!
//! STANDARD ORDER (fixed, documented, never reordered):
//!   1. resource_income
//!   2. production_progress
//!   3. research_progress
//!   4. unit_recovery
//!   5. effect_expiry
//!   6. item_despawn
//!   7. scheduled_events
//!   8. invariant_audit
//!
//! A rule returning an error aborts the tick: nothing is committed.

use crate::{
    config::GameConfig,
    content::Ruleset,
    error::{SimError, SimResult},
    event::GameEvent,
    rng::{RngBank, RngSlot},
    types::{PlayerId, ResourceBag, Tick},
    world::{ScheduledKind, UnitStatus, WorldState},
};
use std::collections::{BTreeMap, BTreeSet};

/// Read-only inputs shared by every rule during one tick.
pub struct RuleContext<'a> {
    /// The tick being produced.
    pub tick: Tick,
    pub ruleset: &'a Ruleset,
    pub config: &'a GameConfig,
    pub rng: RngBank,
}

/// The contract every passive rule must fulfill.
pub trait PassiveRule: Send + Sync {
    /// Unique stable name, recorded as the source of the rule's events.
    fn name(&self) -> &'static str;

    /// Mutate the draft state and report what happened.
    fn apply(&self, ctx: &RuleContext<'_>, world: &mut WorldState) -> SimResult<Vec<GameEvent>>;
}

/// Ordered set of passive rules.
pub struct PassiveRules {
    rules: Vec<Box<dyn PassiveRule>>,
}

impl PassiveRules {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The standard rule set in its documented order.
    pub fn standard() -> Self {
        let mut rules = Self::empty();
        rules.register(Box::new(ResourceIncome));
        rules.register(Box::new(ProductionProgress));
        rules.register(Box::new(ResearchProgress));
        rules.register(Box::new(UnitRecovery));
        rules.register(Box::new(EffectExpiry));
        rules.register(Box::new(ItemDespawn));
        rules.register(Box::new(ScheduledEvents));
        rules.register(Box::new(InvariantAudit));
        rules
    }

    /// Append a rule. Call in the documented execution order.
    pub fn register(&mut self, rule: Box<dyn PassiveRule>) {
        self.rules.push(rule);
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn PassiveRule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }
}

impl Default for PassiveRules {
    fn default() -> Self {
        Self::standard()
    }
}

fn credit(resources: &mut ResourceBag, gained: &ResourceBag) {
    for (res, amount) in gained {
        *resources.entry(res.clone()).or_insert(0) += amount;
    }
}

// ── 1. Resource income ─────────────────────────────

/// Base income plus the yields of completed structures.
pub struct ResourceIncome;

impl PassiveRule for ResourceIncome {
    fn name(&self) -> &'static str {
        "resource_income"
    }

    fn apply(&self, ctx: &RuleContext<'_>, world: &mut WorldState) -> SimResult<Vec<GameEvent>> {
        let mut produced: BTreeMap<PlayerId, ResourceBag> = BTreeMap::new();
        for (player_id, player) in &world.players {
            if player.active && !ctx.config.base_income.is_empty() {
                credit(produced.entry(*player_id).or_default(), &ctx.config.base_income);
            }
        }
        for tile in world.tiles.values() {
            let Some(structure) = tile.structure.as_ref().filter(|s| s.is_complete()) else {
                continue;
            };
            let Some(def) = ctx.ruleset.structure(&structure.kind) else {
                continue;
            };
            if def.yields.is_empty() || !world.players.get(&structure.owner).is_some_and(|p| p.active) {
                continue;
            }
            credit(produced.entry(structure.owner).or_default(), &def.yields);
        }

        let mut events = Vec::new();
        for (player_id, gained) in produced {
            if let Some(player) = world.players.get_mut(&player_id) {
                credit(&mut player.resources, &gained);
                events.push(GameEvent::ResourcesProduced {
                    player_id,
                    produced: gained,
                });
            }
        }
        Ok(events)
    }
}

// ── 2. Production progress ─────────────────────────

pub struct ProductionProgress;

impl PassiveRule for ProductionProgress {
    fn name(&self) -> &'static str {
        "production_progress"
    }

    fn apply(&self, _ctx: &RuleContext<'_>, world: &mut WorldState) -> SimResult<Vec<GameEvent>> {
        let building: Vec<_> = world
            .tiles
            .values()
            .filter(|t| t.structure.as_ref().is_some_and(|s| !s.is_complete()))
            .map(|t| t.coord)
            .collect();

        let mut events = Vec::new();
        let mut completed_by: Vec<PlayerId> = Vec::new();
        for coord in building {
            let Some(structure) = world.tile_mut(coord).and_then(|t| t.structure.as_mut()) else {
                continue;
            };
            structure.progress += 1;
            if structure.is_complete() {
                completed_by.push(structure.owner);
                events.push(GameEvent::StructureCompleted {
                    player_id: structure.owner,
                    structure: structure.kind.clone(),
                    at: coord,
                });
            }
        }
        for owner in completed_by {
            if let Some(player) = world.players.get_mut(&owner) {
                player.score += 10;
            }
        }
        Ok(events)
    }
}

// ── 3. Research progress ───────────────────────────

/// One point per tick plus the research bonus of completed structures.
pub struct ResearchProgress;

impl PassiveRule for ResearchProgress {
    fn name(&self) -> &'static str {
        "research_progress"
    }

    fn apply(&self, ctx: &RuleContext<'_>, world: &mut WorldState) -> SimResult<Vec<GameEvent>> {
        let mut bonus: BTreeMap<PlayerId, u32> = BTreeMap::new();
        for structure in world.tiles.values().filter_map(|t| t.structure.as_ref()) {
            if !structure.is_complete() {
                continue;
            }
            if let Some(def) = ctx.ruleset.structure(&structure.kind) {
                *bonus.entry(structure.owner).or_insert(0) += def.research_bonus;
            }
        }

        let mut events = Vec::new();
        for (player_id, player) in world.players.iter_mut() {
            let Some(research) = player.research.as_mut() else {
                continue;
            };
            research.progress += 1 + bonus.get(player_id).copied().unwrap_or(0);
            if research.progress >= research.required {
                let tech = research.tech.clone();
                player.research = None;
                player.researched.insert(tech.clone());
                player.score += 5;
                events.push(GameEvent::ResearchCompleted {
                    player_id: *player_id,
                    tech,
                });
            }
        }
        Ok(events)
    }
}

// ── 4. Unit recovery ───────────────────────────────

/// Stamina regenerates every tick; hit points only for units that neither
/// moved nor fought.
pub struct UnitRecovery;

impl PassiveRule for UnitRecovery {
    fn name(&self) -> &'static str {
        "unit_recovery"
    }

    fn apply(&self, ctx: &RuleContext<'_>, world: &mut WorldState) -> SimResult<Vec<GameEvent>> {
        for unit in world.units.values_mut() {
            unit.stamina = (unit.stamina + ctx.config.stamina_regen).min(unit.max_stamina);
            if unit.status == UnitStatus::Idle {
                unit.hp = (unit.hp + ctx.config.hp_regen).min(unit.max_hp);
            }
        }
        Ok(Vec::new())
    }
}

// ── 5. Effect expiry ───────────────────────────────

pub struct EffectExpiry;

impl PassiveRule for EffectExpiry {
    fn name(&self) -> &'static str {
        "effect_expiry"
    }

    fn apply(&self, ctx: &RuleContext<'_>, world: &mut WorldState) -> SimResult<Vec<GameEvent>> {
        let mut events = Vec::new();
        for unit in world.units.values_mut() {
            let unit_id = unit.id;
            unit.effects.retain(|effect| {
                let keep = effect.expires_at > ctx.tick;
                if !keep {
                    events.push(GameEvent::EffectExpired {
                        unit_id: Some(unit_id),
                        at: None,
                        effect: effect.kind.clone(),
                    });
                }
                keep
            });
        }

        let expiring: Vec<_> = world
            .tiles
            .values()
            .filter(|t| t.effects.iter().any(|e| e.expires_at <= ctx.tick))
            .map(|t| t.coord)
            .collect();
        for coord in expiring {
            if let Some(tile) = world.tile_mut(coord) {
                tile.effects.retain(|effect| {
                    let keep = effect.expires_at > ctx.tick;
                    if !keep {
                        events.push(GameEvent::EffectExpired {
                            unit_id: None,
                            at: Some(coord),
                            effect: effect.kind.clone(),
                        });
                    }
                    keep
                });
            }
        }
        Ok(events)
    }
}

// ── 6. Item despawn ────────────────────────────────

pub struct ItemDespawn;

impl PassiveRule for ItemDespawn {
    fn name(&self) -> &'static str {
        "item_despawn"
    }

    fn apply(&self, ctx: &RuleContext<'_>, world: &mut WorldState) -> SimResult<Vec<GameEvent>> {
        let expired = |despawn_at: Option<Tick>| despawn_at.is_some_and(|at| at <= ctx.tick);
        let stale: Vec<_> = world
            .tiles
            .values()
            .filter(|t| t.loot.iter().any(|i| expired(i.despawn_at)))
            .map(|t| t.coord)
            .collect();

        let mut events = Vec::new();
        for coord in stale {
            if let Some(tile) = world.tile_mut(coord) {
                tile.loot.retain(|item| {
                    if expired(item.despawn_at) {
                        events.push(GameEvent::ItemDespawned {
                            item_id: item.item_id.clone(),
                            at: coord,
                        });
                        false
                    } else {
                        true
                    }
                });
            }
        }
        Ok(events)
    }
}

// ── 7. Scheduled events ────────────────────────────

/// Fires every scheduled event due at or before this tick, in schedule order.
pub struct ScheduledEvents;

impl PassiveRule for ScheduledEvents {
    fn name(&self) -> &'static str {
        "scheduled_events"
    }

    fn apply(&self, ctx: &RuleContext<'_>, world: &mut WorldState) -> SimResult<Vec<GameEvent>> {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut world.scheduled)
            .into_iter()
            .partition(|s| s.at_tick <= ctx.tick);
        world.scheduled = pending;

        let mut rng = ctx.rng.for_slot_at_tick(RngSlot::Scheduled, ctx.tick);
        let mut events = Vec::new();
        for scheduled in due {
            match scheduled.kind {
                ScheduledKind::Windfall { resource, amount } => {
                    // Up to +50% on top of the announced amount.
                    let amount = amount + rng.range_inclusive(0, amount.max(0) / 2);
                    for player in world.players.values_mut().filter(|p| p.active) {
                        *player.resources.entry(resource.clone()).or_insert(0) += amount;
                    }
                    events.push(GameEvent::Windfall { resource, amount });
                }
                ScheduledKind::SpawnItem { coord, item } => match world.tile_mut(coord) {
                    Some(tile) => {
                        let item_id = item.item_id.clone();
                        tile.loot.push(item);
                        events.push(GameEvent::ItemSpawned { item_id, at: coord });
                    }
                    None => log::warn!("scheduled item spawn on missing tile {coord}; skipped"),
                },
                ScheduledKind::TerrainShift { coord, terrain } => {
                    let enterable = ctx.ruleset.terrain_cost(terrain).is_some();
                    if !enterable && world.units_at(coord).next().is_some() {
                        log::debug!("terrain shift at {coord} skipped: tile is occupied");
                        continue;
                    }
                    if let Some(tile) = world.tile_mut(coord) {
                        tile.terrain = terrain;
                        events.push(GameEvent::TerrainShifted { at: coord, terrain });
                    }
                }
            }
        }
        Ok(events)
    }
}

// ── 8. Invariant audit ─────────────────────────────

/// Checks the structural invariants of the draft. Any violation is a
/// resolution fault and aborts the tick.
pub struct InvariantAudit;

impl InvariantAudit {
    fn fault(ctx: &RuleContext<'_>, detail: String) -> SimError {
        SimError::ResolutionFault {
            tick: ctx.tick,
            rule: "invariant_audit",
            detail,
        }
    }
}

impl PassiveRule for InvariantAudit {
    fn name(&self) -> &'static str {
        "invariant_audit"
    }

    fn apply(&self, ctx: &RuleContext<'_>, world: &mut WorldState) -> SimResult<Vec<GameEvent>> {
        if world.tick != ctx.tick {
            return Err(Self::fault(ctx, format!("draft is tagged tick {}", world.tick)));
        }
        for (coord, tile) in world.tiles.iter() {
            if tile.coord != *coord {
                return Err(Self::fault(ctx, format!("tile keyed {coord} claims {}", tile.coord)));
            }
        }

        for (coord, count) in world.occupancy() {
            let tile = world
                .tile(coord)
                .ok_or_else(|| Self::fault(ctx, format!("units stand on missing tile {coord}")))?;
            if ctx.ruleset.terrain_cost(tile.terrain).is_none() {
                return Err(Self::fault(ctx, format!("units stand on impassable tile {coord}")));
            }
            if count > tile.capacity {
                return Err(Self::fault(
                    ctx,
                    format!("tile {coord} holds {count} units, capacity {}", tile.capacity),
                ));
            }
        }

        let mut owned: BTreeSet<u64> = BTreeSet::new();
        for (player_id, player) in &world.players {
            if let Some((res, amount)) = player.resources.iter().find(|(_, v)| **v < 0) {
                return Err(Self::fault(ctx, format!("player {player_id} holds {amount} {res}")));
            }
            for unit_id in &player.units {
                match world.units.get(unit_id) {
                    Some(unit) if unit.owner == *player_id => {
                        owned.insert(*unit_id);
                    }
                    Some(unit) => {
                        return Err(Self::fault(
                            ctx,
                            format!("player {player_id} lists unit {unit_id} owned by {}", unit.owner),
                        ))
                    }
                    None => {
                        return Err(Self::fault(ctx, format!("player {player_id} lists dead unit {unit_id}")))
                    }
                }
            }
        }

        for unit in world.units.values() {
            if !owned.contains(&unit.id) {
                return Err(Self::fault(ctx, format!("unit {} is not listed by its owner", unit.id)));
            }
            if unit.hp <= 0 || unit.hp > unit.max_hp {
                return Err(Self::fault(ctx, format!("unit {} has {} hp", unit.id, unit.hp)));
            }
            if unit.stamina < 0 || unit.stamina > unit.max_stamina {
                return Err(Self::fault(ctx, format!("unit {} has {} stamina", unit.id, unit.stamina)));
            }
            if unit.id >= world.next_unit_id {
                return Err(Self::fault(ctx, format!("unit {} is beyond the id counter", unit.id)));
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EngineConfig,
        content::{ContentService, StaticContent},
        hex::HexCoord,
        world::{HexTile, Player, Structure, Terrain, TickStats},
    };
    use std::sync::Arc;

    fn world_with_farm(progress: u32) -> WorldState {
        let coord = HexCoord::new(0, 0);
        let mut tile = HexTile::new(coord, Terrain::Plains);
        tile.structure = Some(Structure {
            kind: "farm".into(),
            owner: 1,
            hp: 50,
            progress,
            required: 2,
        });
        let mut players = BTreeMap::new();
        players.insert(1, Player::new(1, "red", ResourceBag::new()));
        WorldState {
            game_id: "p".into(),
            tick: 1,
            seed: 3,
            ruleset: "v1".into(),
            tiles: Arc::new([(coord, tile)].into_iter().collect()),
            units: BTreeMap::new(),
            players,
            events: Vec::new(),
            scheduled: Vec::new(),
            next_unit_id: 1,
            stats: TickStats::default(),
            content_hash: String::new(),
        }
    }

    #[test]
    fn standard_order_is_fixed() {
        assert_eq!(
            PassiveRules::standard().names(),
            vec![
                "resource_income",
                "production_progress",
                "research_progress",
                "unit_recovery",
                "effect_expiry",
                "item_despawn",
                "scheduled_events",
                "invariant_audit",
            ]
        );
    }

    #[test]
    fn completed_farm_yields_but_unfinished_one_does_not() {
        let content = StaticContent::default_test();
        let ruleset = content.ruleset("v1").unwrap();
        let config = EngineConfig::default_test().game_defaults;
        let ctx = RuleContext { tick: 1, ruleset: &ruleset, config: &config, rng: RngBank::new(3) };

        let mut building = world_with_farm(1);
        ResourceIncome.apply(&ctx, &mut building).unwrap();
        assert_eq!(building.players[&1].balance("food"), 0);
        let events = ProductionProgress.apply(&ctx, &mut building).unwrap();
        assert_eq!(events.len(), 1, "farm completes on its second tick");

        ResourceIncome.apply(&ctx, &mut building).unwrap();
        assert_eq!(building.players[&1].balance("food"), 5);
        assert_eq!(building.players[&1].balance("gold"), 10, "base income paid twice");
    }

    #[test]
    fn audit_faults_on_negative_balance() {
        let content = StaticContent::default_test();
        let ruleset = content.ruleset("v1").unwrap();
        let config = EngineConfig::default_test().game_defaults;
        let ctx = RuleContext { tick: 1, ruleset: &ruleset, config: &config, rng: RngBank::new(3) };

        let mut world = world_with_farm(0);
        world.players.get_mut(&1).unwrap().resources.insert("gold".into(), -1);
        let err = InvariantAudit.apply(&ctx, &mut world).unwrap_err();
        assert!(matches!(err, SimError::ResolutionFault { rule: "invariant_audit", .. }));
    }
}
