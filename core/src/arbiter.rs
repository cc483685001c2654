//! Contention within one tick.
//!
//! Every contest is settled by [`PriorityKey`]: higher unit initiative,
//! then earlier submission, then lower unit id, then lower command id.
//! Iteration order of any collection never decides a winner.
//!
//! Output order is all moves, then economy and diplomacy orders, then
//! attacks, each group in priority order. The result is a pure function of
//! (validated set, base state).

use crate::{
    command::{ApplyPhase, PlayerCommand, QueuedCommand},
    content::Ruleset,
    error::{Rejection, ValidationFailure},
    hex::HexCoord,
    types::{CommandId, PlayerId, ResourceBag, UnitId},
    world::WorldState,
};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Sort key for contention. Smaller wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PriorityKey {
    pub initiative: Reverse<u32>,
    pub submitted_at: DateTime<Utc>,
    pub unit_id: UnitId,
    pub command_id: CommandId,
}

impl PriorityKey {
    pub fn of(base: &WorldState, ruleset: &Ruleset, queued: &QueuedCommand) -> Self {
        let unit = queued.command.unit_id().and_then(|id| base.unit(id));
        let initiative = unit
            .and_then(|u| ruleset.unit(&u.kind))
            .map_or(0, |def| def.initiative);
        Self {
            initiative: Reverse(initiative),
            submitted_at: queued.submitted_at,
            unit_id: queued.command.unit_id().unwrap_or(UnitId::MAX),
            command_id: queued.command_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct Arbitration {
    /// Survivors in application order.
    pub ordered: Vec<QueuedCommand>,
    pub rejected: Vec<(QueuedCommand, Rejection)>,
}

pub fn arbitrate(base: &WorldState, ruleset: &Ruleset, validated: Vec<QueuedCommand>) -> Arbitration {
    let mut ranked: Vec<(PriorityKey, QueuedCommand)> = validated
        .into_iter()
        .map(|c| (PriorityKey::of(base, ruleset, &c), c))
        .collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0));

    let mut losers: BTreeMap<CommandId, Rejection> = BTreeMap::new();
    settle_destinations(base, &ranked, &mut losers);
    settle_exclusive_targets(base, &ranked, &mut losers);
    settle_budgets(base, ruleset, &ranked, &mut losers);

    let mut out = Arbitration::default();
    let mut survivors: Vec<(ApplyPhase, PriorityKey, QueuedCommand)> = Vec::new();
    for (key, command) in ranked {
        match losers.remove(&command.command_id) {
            Some(reason) => out.rejected.push((command, reason)),
            None => survivors.push((command.command.phase(), key, command)),
        }
    }
    survivors.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    out.ordered = survivors.into_iter().map(|(_, _, c)| c).collect();
    out.rejected.sort_by_key(|(c, _)| c.command_id);
    out
}

/// Moves into a tile beyond its capacity. A unit that wants to leave only
/// frees its slot if its own move wins, so losers are recomputed until the
/// set stops changing.
fn settle_destinations(
    base: &WorldState,
    ranked: &[(PriorityKey, QueuedCommand)],
    losers: &mut BTreeMap<CommandId, Rejection>,
) {
    let moves: Vec<(CommandId, UnitId, HexCoord)> = ranked
        .iter()
        .filter_map(|(_, c)| match c.command {
            PlayerCommand::Move { unit_id, to } => Some((c.command_id, unit_id, to)),
            _ => None,
        })
        .collect();
    if moves.is_empty() {
        return;
    }

    // Losing move -> first mover admitted ahead of it, if any.
    let mut blocked: BTreeMap<CommandId, Option<CommandId>> = BTreeMap::new();
    loop {
        let leaving: BTreeSet<UnitId> = moves
            .iter()
            .filter(|(id, _, _)| !blocked.contains_key(id))
            .map(|(_, unit, _)| *unit)
            .collect();

        let mut stayers: BTreeMap<HexCoord, u32> = BTreeMap::new();
        for unit in base.units.values().filter(|u| !leaving.contains(&u.id)) {
            *stayers.entry(unit.position).or_insert(0) += 1;
        }

        let mut next: BTreeMap<CommandId, Option<CommandId>> = BTreeMap::new();
        let mut admitted: BTreeMap<HexCoord, (u32, Option<CommandId>)> = BTreeMap::new();
        for (command_id, _, to) in &moves {
            let capacity = base.tile(*to).map_or(0, |t| t.capacity);
            let taken = stayers.get(to).copied().unwrap_or(0);
            let entry = admitted.entry(*to).or_insert((0, None));
            if taken + entry.0 < capacity {
                entry.0 += 1;
                entry.1.get_or_insert(*command_id);
            } else {
                next.insert(*command_id, entry.1);
            }
        }
        // Stayers only grow between rounds, so this converges.
        if next == blocked {
            break;
        }
        blocked = next;
    }

    for (command_id, _, to) in &moves {
        let Some(winner) = blocked.get(command_id) else {
            continue;
        };
        let reason = match winner {
            Some(winner) => Rejection::Outprioritized {
                contested: format!("tile {to}"),
                winner: *winner,
            },
            None => ValidationFailure::TileFull { coord: *to }.into(),
        };
        losers.insert(*command_id, reason);
    }
}

/// One structure per tile, each map item to one looter, and no more
/// interactions than an interactable can take this tick.
fn settle_exclusive_targets(
    base: &WorldState,
    ranked: &[(PriorityKey, QueuedCommand)],
    losers: &mut BTreeMap<CommandId, Rejection>,
) {
    let mut claims: BTreeMap<String, (u32, CommandId)> = BTreeMap::new();
    for (_, queued) in ranked {
        if losers.contains_key(&queued.command_id) {
            continue;
        }
        let Some(unit) = queued.command.unit_id().and_then(|id| base.unit(id)) else {
            continue;
        };
        let (contested, limit) = match &queued.command {
            PlayerCommand::Build { .. } => (format!("site {}", unit.position), 1),
            PlayerCommand::Loot { item_id, .. } => (format!("item {item_id}"), 1),
            PlayerCommand::Interact { interactable_id, .. } => {
                let Some(node) = base.tile(unit.position).and_then(|t| t.interactable(interactable_id)) else {
                    continue;
                };
                // A cooldown closes the node for the rest of the tick after one use.
                let per_tick = if node.cooldown_ticks > 0 { 1 } else { u32::MAX };
                let limit = node.remaining_uses().map_or(per_tick, |left| left.min(per_tick));
                (format!("interactable {interactable_id}"), limit)
            }
            _ => continue,
        };
        let claim = claims.entry(contested.clone()).or_insert((0, queued.command_id));
        if claim.0 < limit {
            claim.0 += 1;
        } else {
            losers.insert(
                queued.command_id,
                Rejection::Outprioritized {
                    contested,
                    winner: claim.1,
                },
            );
        }
    }
}

/// Spend each player's balance in priority order; whatever no longer fits
/// is rejected.
fn settle_budgets(
    base: &WorldState,
    ruleset: &Ruleset,
    ranked: &[(PriorityKey, QueuedCommand)],
    losers: &mut BTreeMap<CommandId, Rejection>,
) {
    let mut balances: BTreeMap<PlayerId, ResourceBag> = BTreeMap::new();
    for (_, queued) in ranked {
        if losers.contains_key(&queued.command_id) {
            continue;
        }
        let Some(cost) = queued.command.cost(ruleset) else {
            continue;
        };
        let Some(player) = base.player(queued.player_id) else {
            continue;
        };
        let balance = balances
            .entry(queued.player_id)
            .or_insert_with(|| player.resources.clone());
        let shortfall = cost.iter().find_map(|(res, needed)| {
            let available = balance.get(res).copied().unwrap_or(0);
            (available < *needed).then(|| (res.clone(), *needed, available))
        });
        match shortfall {
            Some((resource, needed, available)) => {
                losers.insert(
                    queued.command_id,
                    Rejection::InsufficientResources {
                        resource,
                        needed,
                        available,
                    },
                );
            }
            None => {
                for (res, amount) in &cost {
                    *balance.entry(res.clone()).or_insert(0) -= amount;
                }
            }
        }
    }
}
