//! The state-transition function.
//!
//! `resolve` takes a committed base state and an arbitrated command batch
//! and produces the sealed successor plus the audit record of every frozen
//! command. It reads nothing but its arguments: same base, same batch, same
//! rules give a byte-identical state.
//!
//! RULES:
//!   - Commands apply in arbiter order, then passive rules in registry order.
//!   - A command that fails at application is rejected on its own; earlier
//!     and later commands are unaffected.
//!   - A passive rule error aborts the whole tick.

use crate::{
    arbiter::{self, Arbitration},
    command::{CommandRecord, DiplomacyAction, PlayerCommand, QueuedCommand},
    config::GameConfig,
    content::Ruleset,
    error::{Rejection, SimResult, ValidationFailure},
    event::{GameEvent, GlobalEvent},
    hex::HexCoord,
    passive::{PassiveRules, RuleContext},
    rng::{RngBank, RngSlot, StreamRng},
    types::{PlayerId, ResourceBag, Tick, UnitId},
    validator,
    world::{
        effect_bonus, InventoryItem, MapItem, Rarity, Relation, ResearchProgress, Reward, Stance,
        Structure, TickStats, TimedEffect, Unit, UnitStatus, WorldState, LOOT_LIFETIME,
    },
};

/// Experience granted for a kill.
const KILL_EXPERIENCE: u32 = 10;

/// Source label for events produced by player commands.
pub const COMMAND_SOURCE: &str = "commands";

/// Sealed successor state plus the terminal record of every frozen command.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub state: WorldState,
    /// Ordered by command id.
    pub records: Vec<CommandRecord>,
}

/// Validate, arbitrate and resolve one frozen batch in a single call.
pub fn resolve_tick(
    base: &WorldState,
    ruleset: &Ruleset,
    config: &GameConfig,
    rules: &PassiveRules,
    frozen: Vec<QueuedCommand>,
) -> SimResult<Resolution> {
    let validation = validator::validate_all(base, ruleset, frozen);
    let mut arbitration = arbiter::arbitrate(base, ruleset, validation.valid);
    arbitration.rejected.extend(validation.rejected);
    resolve(base, ruleset, config, rules, arbitration)
}

pub fn resolve(
    base: &WorldState,
    ruleset: &Ruleset,
    config: &GameConfig,
    rules: &PassiveRules,
    arbitration: Arbitration,
) -> SimResult<Resolution> {
    let tick = base.tick + 1;
    let bank = RngBank::new(base.seed);
    let mut draft = base.successor();
    for unit in draft.units.values_mut() {
        unit.status = UnitStatus::Idle;
    }

    let mut events: Vec<(&'static str, GameEvent)> = Vec::new();
    let mut records: Vec<CommandRecord> = Vec::new();

    let mut early = arbitration.rejected;
    early.sort_by_key(|(c, _)| c.command_id);
    for (command, reason) in early {
        log::debug!(
            "tick {tick}: command {} ({}) rejected before application: {reason}",
            command.command_id,
            command.command.kind_name()
        );
        events.push((COMMAND_SOURCE, rejected_event(&command, &reason)));
        records.push(CommandRecord::rejected(tick, command, reason));
    }

    let mut applier = Applier {
        tick,
        ruleset,
        bank,
        world: &mut draft,
    };
    let mut applied = 0u32;
    for command in arbitration.ordered {
        match applier.apply(&command) {
            Ok(produced) => {
                applied += 1;
                events.extend(produced.into_iter().map(|e| (COMMAND_SOURCE, e)));
                records.push(CommandRecord::applied(tick, command));
            }
            Err(reason) => {
                log::warn!(
                    "tick {tick}: command {} ({}) from player {} failed: {reason}",
                    command.command_id,
                    command.command.kind_name(),
                    command.player_id
                );
                events.push((COMMAND_SOURCE, rejected_event(&command, &reason)));
                records.push(CommandRecord::rejected(tick, command, reason));
            }
        }
    }

    let ctx = RuleContext {
        tick,
        ruleset,
        config,
        rng: bank,
    };
    for rule in rules.iter() {
        let produced = rule.apply(&ctx, &mut draft)?;
        log::debug!("tick {tick}: rule {} emitted {} events", rule.name(), produced.len());
        events.extend(produced.into_iter().map(|e| (rule.name(), e)));
    }

    records.sort_by_key(|r| r.command.command_id);
    draft.events = events
        .into_iter()
        .enumerate()
        .map(|(seq, (source, event))| GlobalEvent {
            tick,
            seq: seq as u32,
            source: source.to_string(),
            event,
        })
        .collect();
    draft.stats = TickStats {
        active_players: draft.players.values().filter(|p| p.active).count() as u32,
        live_units: draft.units.len() as u32,
        commands_applied: applied,
        commands_rejected: records.len() as u32 - applied,
    };

    Ok(Resolution {
        state: draft.seal()?,
        records,
    })
}

fn rejected_event(command: &QueuedCommand, reason: &Rejection) -> GameEvent {
    GameEvent::CommandRejected {
        command_id: command.command_id,
        player_id: command.player_id,
        reason: reason.clone(),
    }
}

/// Minimum one point of damage; the roll scales it by 85..=115 percent.
fn strike(attack: i32, defense: i32, roll: i64) -> i32 {
    let raw = i64::from((attack - defense / 2).max(1));
    i32::try_from((raw * roll / 100).max(1)).unwrap_or(i32::MAX)
}

struct Applier<'a> {
    tick: Tick,
    ruleset: &'a Ruleset,
    bank: RngBank,
    world: &'a mut WorldState,
}

impl Applier<'_> {
    fn apply(&mut self, queued: &QueuedCommand) -> Result<Vec<GameEvent>, Rejection> {
        let player_id = queued.player_id;
        match &queued.command {
            PlayerCommand::Move { unit_id, to } => self.apply_move(player_id, *unit_id, *to),
            PlayerCommand::Attack { unit_id, target } => {
                self.apply_attack(player_id, queued.command_id, *unit_id, *target)
            }
            PlayerCommand::Build { unit_id, structure } => self.apply_build(player_id, *unit_id, structure),
            PlayerCommand::Research { tech } => self.apply_research(player_id, tech),
            PlayerCommand::Diplomacy { with, action } => self.apply_diplomacy(player_id, *with, *action),
            PlayerCommand::Loot { unit_id, item_id } => self.apply_loot(player_id, *unit_id, item_id),
            PlayerCommand::Interact { unit_id, interactable_id } => {
                self.apply_interact(player_id, *unit_id, interactable_id)
            }
        }
    }

    fn live_unit(&self, unit_id: UnitId, player_id: PlayerId) -> Result<&Unit, ValidationFailure> {
        let unit = self
            .world
            .unit(unit_id)
            .ok_or(ValidationFailure::UnitMissing { unit_id })?;
        if unit.owner != player_id {
            return Err(ValidationFailure::NotOwner { unit_id, player_id });
        }
        Ok(unit)
    }

    // ── Movement ───────────────────────────────────

    fn apply_move(&mut self, player_id: PlayerId, unit_id: UnitId, to: HexCoord) -> Result<Vec<GameEvent>, Rejection> {
        let unit = self.live_unit(unit_id, player_id)?;
        let from = unit.position;
        let cost = validator::check_move(&*self.world, self.ruleset, unit, to)?;

        if let Some(unit) = self.world.units.get_mut(&unit_id) {
            unit.position = to;
            unit.stamina -= i32::try_from(cost).unwrap_or(i32::MAX);
            unit.status = UnitStatus::Moving;
        }
        Ok(vec![GameEvent::UnitMoved { unit_id, from, to, cost }])
    }

    // ── Combat ─────────────────────────────────────

    fn apply_attack(
        &mut self,
        player_id: PlayerId,
        command_id: u64,
        unit_id: UnitId,
        target: UnitId,
    ) -> Result<Vec<GameEvent>, Rejection> {
        let attacker = self.live_unit(unit_id, player_id)?.clone();
        let defender = self
            .world
            .unit(target)
            .ok_or(ValidationFailure::UnitMissing { unit_id: target })?
            .clone();
        if matches!(self.world.stance(player_id, defender.owner), Stance::Peace | Stance::Alliance) {
            return Err(ValidationFailure::TreatyBlocks { other: defender.owner }.into());
        }
        let unknown = |kind: &str| ValidationFailure::UnknownDefinition {
            kind: "unit".into(),
            id: kind.to_string(),
        };
        let a_def = self.ruleset.unit(&attacker.kind).ok_or_else(|| unknown(&attacker.kind))?;
        let d_def = self.ruleset.unit(&defender.kind).ok_or_else(|| unknown(&defender.kind))?;

        let distance = attacker.position.distance(defender.position);
        if distance > a_def.range {
            return Err(ValidationFailure::OutOfRange { target, range: a_def.range }.into());
        }

        let seed = self.bank.seed_for(RngSlot::Combat, self.tick, command_id);
        let roll = StreamRng::from_seed(seed).with_name("combat").range_inclusive(85, 115);

        let damage = strike(
            a_def.attack + effect_bonus(&attacker.effects, "attack"),
            d_def.defense + effect_bonus(&defender.effects, "defense"),
            roll,
        );
        let defender_hp = defender.hp - damage;
        let counter_damage = if defender_hp > 0 && distance <= d_def.range {
            let counter = strike(
                d_def.attack + effect_bonus(&defender.effects, "attack"),
                a_def.defense + effect_bonus(&attacker.effects, "defense"),
                roll,
            );
            (counter / 2).max(1)
        } else {
            0
        };
        let attacker_hp = attacker.hp - counter_damage;

        for (id, hp) in [(target, defender_hp), (unit_id, attacker_hp)] {
            if let Some(unit) = self.world.units.get_mut(&id) {
                unit.hp = hp;
                unit.status = UnitStatus::Fighting;
            }
        }

        let mut events = vec![GameEvent::CombatResolved {
            attacker: unit_id,
            defender: target,
            damage,
            counter_damage,
            seed,
        }];
        if defender_hp <= 0 {
            events.extend(self.kill(target, Some(unit_id)));
            if let Some(unit) = self.world.units.get_mut(&unit_id) {
                unit.experience += KILL_EXPERIENCE;
            }
        }
        if attacker_hp <= 0 {
            events.extend(self.kill(unit_id, Some(target)));
            if let Some(unit) = self.world.units.get_mut(&target) {
                unit.experience += KILL_EXPERIENCE;
            }
        }
        Ok(events)
    }

    /// Remove a dead unit, prune it from its owner and drop its inventory.
    fn kill(&mut self, unit_id: UnitId, killed_by: Option<UnitId>) -> Option<GameEvent> {
        let unit = self.world.units.remove(&unit_id)?;
        if let Some(owner) = self.world.players.get_mut(&unit.owner) {
            owner.units.remove(&unit_id);
        }
        if !unit.inventory.is_empty() {
            let tick = self.tick;
            if let Some(tile) = self.world.tile_mut(unit.position) {
                tile.loot.extend(unit.inventory.into_iter().map(|item| MapItem {
                    item_id: item.item_id,
                    item_kind: item.item_kind,
                    quantity: item.quantity,
                    rarity: item.rarity,
                    spawned_at: tick,
                    despawn_at: Some(tick + LOOT_LIFETIME),
                }));
            }
        }
        Some(GameEvent::UnitDied {
            unit_id,
            owner: unit.owner,
            at: unit.position,
            killed_by,
        })
    }

    // ── Economy ────────────────────────────────────

    fn debit(&mut self, player_id: PlayerId, cost: &ResourceBag) -> Result<(), Rejection> {
        let player = self
            .world
            .players
            .get_mut(&player_id)
            .ok_or(Rejection::UnknownPlayer { player_id })?;
        if let Some((resource, needed, available)) = player.shortfall(cost) {
            return Err(Rejection::InsufficientResources {
                resource,
                needed,
                available,
            });
        }
        for (res, amount) in cost {
            *player.resources.entry(res.clone()).or_insert(0) -= amount;
        }
        Ok(())
    }

    fn apply_build(&mut self, player_id: PlayerId, unit_id: UnitId, structure: &str) -> Result<Vec<GameEvent>, Rejection> {
        let at = self.live_unit(unit_id, player_id)?.position;
        let def = self
            .ruleset
            .structure(structure)
            .ok_or_else(|| ValidationFailure::UnknownDefinition {
                kind: "structure".into(),
                id: structure.to_string(),
            })?;
        match self.world.tile(at) {
            None => return Err(ValidationFailure::TileMissing { coord: at }.into()),
            Some(tile) if tile.structure.is_some() => {
                return Err(ValidationFailure::TileOccupied { coord: at }.into())
            }
            Some(_) => {}
        }
        self.debit(player_id, &def.cost)?;
        if let Some(tile) = self.world.tile_mut(at) {
            tile.structure = Some(Structure {
                kind: def.id.clone(),
                owner: player_id,
                hp: def.max_hp,
                progress: 0,
                required: def.build_ticks,
            });
        }
        Ok(vec![GameEvent::StructureStarted {
            player_id,
            structure: def.id.clone(),
            at,
        }])
    }

    fn apply_research(&mut self, player_id: PlayerId, tech: &str) -> Result<Vec<GameEvent>, Rejection> {
        let def = self.ruleset.tech(tech).ok_or_else(|| ValidationFailure::UnknownDefinition {
            kind: "tech".into(),
            id: tech.to_string(),
        })?;
        let player = self
            .world
            .player(player_id)
            .ok_or(Rejection::UnknownPlayer { player_id })?;
        if player.researched.contains(tech) {
            return Err(ValidationFailure::AlreadyResearched { tech: tech.to_string() }.into());
        }
        if let Some(current) = &player.research {
            return Err(ValidationFailure::ResearchBusy { current: current.tech.clone() }.into());
        }
        self.debit(player_id, &def.cost)?;
        if let Some(player) = self.world.players.get_mut(&player_id) {
            player.research = Some(ResearchProgress {
                tech: def.id.clone(),
                progress: 0,
                required: def.research_ticks,
            });
        }
        Ok(vec![GameEvent::ResearchStarted {
            player_id,
            tech: def.id.clone(),
        }])
    }

    // ── Diplomacy ──────────────────────────────────

    fn relation_mut(&mut self, from: PlayerId, to: PlayerId) -> Option<&mut Relation> {
        self.world.players.get_mut(&from).map(|p| {
            p.diplomacy.entry(to).or_insert(Relation {
                stance: Stance::Neutral,
                since_tick: 0,
                proposed: None,
            })
        })
    }

    fn set_stance(&mut self, a: PlayerId, b: PlayerId, stance: Stance) {
        let tick = self.tick;
        for (from, to) in [(a, b), (b, a)] {
            if let Some(relation) = self.relation_mut(from, to) {
                relation.stance = stance;
                relation.since_tick = tick;
                relation.proposed = None;
            }
        }
    }

    fn apply_diplomacy(&mut self, player_id: PlayerId, with: PlayerId, action: DiplomacyAction) -> Result<Vec<GameEvent>, Rejection> {
        if with == player_id || self.world.player(with).is_none() {
            return Err(ValidationFailure::InvalidCounterparty { other: with }.into());
        }
        let current = self.world.stance(player_id, with);
        let stance = match action {
            DiplomacyAction::DeclareWar => {
                self.set_stance(player_id, with, Stance::War);
                Stance::War
            }
            DiplomacyAction::ProposePeace | DiplomacyAction::ProposeAlliance => {
                let wanted = if action == DiplomacyAction::ProposePeace {
                    Stance::Peace
                } else {
                    Stance::Alliance
                };
                let matched = self
                    .world
                    .player(with)
                    .and_then(|p| p.diplomacy.get(&player_id))
                    .is_some_and(|r| r.proposed == Some(wanted));
                if matched {
                    self.set_stance(player_id, with, wanted);
                    wanted
                } else {
                    if let Some(relation) = self.relation_mut(player_id, with) {
                        relation.proposed = Some(wanted);
                    }
                    current
                }
            }
            DiplomacyAction::BreakTreaty => {
                if !matches!(current, Stance::Peace | Stance::Alliance) {
                    return Err(ValidationFailure::NoTreaty { other: with }.into());
                }
                self.set_stance(player_id, with, Stance::Neutral);
                Stance::Neutral
            }
        };
        Ok(vec![GameEvent::DiplomacyChanged {
            player_id,
            with,
            action,
            stance,
        }])
    }

    // ── Items and interactables ────────────────────

    fn inventory_room(&self, unit: &Unit) -> bool {
        let capacity = self.ruleset.unit(&unit.kind).map_or(0, |d| d.inventory_capacity);
        unit.inventory.len() < capacity
    }

    fn apply_loot(&mut self, player_id: PlayerId, unit_id: UnitId, item_id: &str) -> Result<Vec<GameEvent>, Rejection> {
        let unit = self.live_unit(unit_id, player_id)?;
        let at = unit.position;
        if !self.inventory_room(unit) {
            return Err(ValidationFailure::InventoryFull.into());
        }
        let unavailable = || ValidationFailure::ItemUnavailable { item_id: item_id.to_string() };
        let index = self
            .world
            .tile(at)
            .and_then(|t| t.loot.iter().position(|i| i.item_id == item_id))
            .ok_or_else(unavailable)?;
        let item = self
            .world
            .tile_mut(at)
            .map(|t| t.loot.remove(index))
            .ok_or_else(unavailable)?;

        let tick = self.tick;
        if let Some(unit) = self.world.units.get_mut(&unit_id) {
            unit.inventory.push(InventoryItem {
                item_id: item.item_id,
                item_kind: item.item_kind,
                quantity: item.quantity,
                rarity: item.rarity,
                acquired_at: tick,
            });
        }
        Ok(vec![GameEvent::ItemLooted {
            unit_id,
            item_id: item_id.to_string(),
            at,
        }])
    }

    fn apply_interact(&mut self, player_id: PlayerId, unit_id: UnitId, interactable_id: &str) -> Result<Vec<GameEvent>, Rejection> {
        let tick = self.tick;
        let unit = self.live_unit(unit_id, player_id)?;
        let at = unit.position;
        let node = self
            .world
            .tile(at)
            .and_then(|t| t.interactable(interactable_id))
            .filter(|n| n.usable_at(tick))
            .ok_or_else(|| ValidationFailure::InteractableUnavailable {
                interactable_id: interactable_id.to_string(),
            })?;
        let reward = node.reward.clone();
        let uses = node.uses + 1;

        // Check the reward before touching anything.
        let mut attributes = unit.attributes.clone();
        match &reward {
            Reward::Attribute { key, value } => {
                attributes.set_checked(key, value.clone(), self.ruleset.attribute(key))?;
            }
            Reward::Item { .. } if !self.inventory_room(unit) => {
                return Err(ValidationFailure::InventoryFull.into());
            }
            _ => {}
        }

        if let Some(node) = self
            .world
            .tile_mut(at)
            .and_then(|t| t.interactables.iter_mut().find(|n| n.id == interactable_id))
        {
            node.record_use(unit_id, player_id, tick);
        }

        match reward {
            Reward::Resources { bag } => {
                if let Some(player) = self.world.players.get_mut(&player_id) {
                    for (res, amount) in bag {
                        *player.resources.entry(res).or_insert(0) += amount;
                    }
                }
            }
            Reward::Heal { amount } => {
                if let Some(unit) = self.world.units.get_mut(&unit_id) {
                    unit.hp = (unit.hp + amount).min(unit.max_hp);
                }
            }
            Reward::Attribute { .. } => {
                if let Some(unit) = self.world.units.get_mut(&unit_id) {
                    unit.attributes = attributes;
                }
            }
            Reward::Item { item_kind, quantity } => {
                if let Some(unit) = self.world.units.get_mut(&unit_id) {
                    unit.inventory.push(InventoryItem {
                        item_id: format!("{interactable_id}-{tick}-{uses}"),
                        item_kind,
                        quantity,
                        rarity: Rarity::Common,
                        acquired_at: tick,
                    });
                }
            }
            Reward::Blessing { effect, magnitude, duration } => {
                if let Some(unit) = self.world.units.get_mut(&unit_id) {
                    unit.effects.push(TimedEffect {
                        kind: effect,
                        magnitude,
                        expires_at: tick + Tick::from(duration),
                    });
                }
            }
        }

        Ok(vec![GameEvent::Interacted {
            unit_id,
            interactable_id: interactable_id.to_string(),
            at,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strike_never_drops_below_one() {
        assert_eq!(strike(5, 100, 85), 1);
        assert_eq!(strike(30, 20, 100), 20);
        assert_eq!(strike(30, 20, 115), 23);
    }
}
