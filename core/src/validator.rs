//! Re-checks frozen commands against the resolution base state.
//!
//! A command accepted at intake may have gone stale by the time its tick
//! resolves (its unit died, resources were spent, a treaty was signed).
//! Validation is a pure function of (base, ruleset, command); the frozen
//! set is checked in parallel and collected back in command order.

use crate::{
    command::{CommandStatus, DiplomacyAction, PlayerCommand, QueuedCommand},
    content::Ruleset,
    error::{Rejection, ValidationFailure},
    hex::{self, HexCoord},
    world::{Stance, Unit, WorldState},
};
use rayon::prelude::*;

/// Result of validating one frozen batch.
#[derive(Debug, Default)]
pub struct Validation {
    /// Commands still legal against the base, status `validated`.
    pub valid: Vec<QueuedCommand>,
    pub rejected: Vec<(QueuedCommand, Rejection)>,
}

pub fn validate_all(base: &WorldState, ruleset: &Ruleset, commands: Vec<QueuedCommand>) -> Validation {
    let verdicts: Vec<(QueuedCommand, Result<(), Rejection>)> = commands
        .into_par_iter()
        .map(|command| {
            let verdict = validate(base, ruleset, &command);
            (command, verdict)
        })
        .collect();

    let mut out = Validation::default();
    for (mut command, verdict) in verdicts {
        match verdict {
            Ok(()) => {
                command.status = CommandStatus::Validated;
                out.valid.push(command);
            }
            Err(reason) => out.rejected.push((command, reason)),
        }
    }
    out
}

/// Legality of one command against `base`.
pub fn validate(base: &WorldState, ruleset: &Ruleset, queued: &QueuedCommand) -> Result<(), Rejection> {
    let player_id = queued.player_id;
    let player = base
        .player(player_id)
        .filter(|p| p.active)
        .ok_or(Rejection::UnknownPlayer { player_id })?;
    if !ruleset.allows(queued.command.kind_name()) {
        return Err(Rejection::KindNotAllowed {
            kind: queued.command.kind_name().to_string(),
            ruleset: ruleset.version.clone(),
        });
    }

    match &queued.command {
        PlayerCommand::Move { unit_id, to } => {
            let unit = owned_unit(base, *unit_id, player_id)?;
            check_move(base, ruleset, unit, *to)?;
        }
        PlayerCommand::Attack { unit_id, target } => {
            owned_unit(base, *unit_id, player_id)?;
            let defender = base
                .unit(*target)
                .ok_or(ValidationFailure::UnitMissing { unit_id: *target })?;
            if defender.owner == player_id {
                return Err(ValidationFailure::FriendlyTarget { target: *target }.into());
            }
            if matches!(base.stance(player_id, defender.owner), Stance::Peace | Stance::Alliance) {
                return Err(ValidationFailure::TreatyBlocks { other: defender.owner }.into());
            }
            // Range is judged at application, after this tick's moves.
        }
        PlayerCommand::Build { unit_id, structure } => {
            let unit = owned_unit(base, *unit_id, player_id)?;
            let def = ruleset.structure(structure).ok_or_else(|| ValidationFailure::UnknownDefinition {
                kind: "structure".into(),
                id: structure.clone(),
            })?;
            let tile = base
                .tile(unit.position)
                .ok_or(ValidationFailure::TileMissing { coord: unit.position })?;
            if tile.structure.is_some() {
                return Err(ValidationFailure::TileOccupied { coord: unit.position }.into());
            }
            affordable(player.shortfall(&def.cost))?;
        }
        PlayerCommand::Research { tech } => {
            let def = ruleset.tech(tech).ok_or_else(|| ValidationFailure::UnknownDefinition {
                kind: "tech".into(),
                id: tech.clone(),
            })?;
            if player.researched.contains(tech) {
                return Err(ValidationFailure::AlreadyResearched { tech: tech.clone() }.into());
            }
            if let Some(current) = &player.research {
                if &current.tech == tech {
                    return Err(ValidationFailure::AlreadyResearched { tech: tech.clone() }.into());
                }
                return Err(ValidationFailure::ResearchBusy { current: current.tech.clone() }.into());
            }
            if let Some(missing) = def.prerequisites.iter().find(|p| !player.researched.contains(*p)) {
                return Err(ValidationFailure::MissingPrerequisite {
                    tech: tech.clone(),
                    missing: missing.clone(),
                }
                .into());
            }
            affordable(player.shortfall(&def.cost))?;
        }
        PlayerCommand::Diplomacy { with, action } => {
            if *with == player_id || base.player(*with).is_none() {
                return Err(ValidationFailure::InvalidCounterparty { other: *with }.into());
            }
            if *action == DiplomacyAction::BreakTreaty
                && !matches!(player.stance_toward(*with), Stance::Peace | Stance::Alliance)
            {
                return Err(ValidationFailure::NoTreaty { other: *with }.into());
            }
        }
        PlayerCommand::Loot { unit_id, item_id } => {
            let unit = owned_unit(base, *unit_id, player_id)?;
            let present = base
                .tile(unit.position)
                .is_some_and(|t| t.item(item_id).is_some());
            if !present {
                return Err(ValidationFailure::ItemUnavailable { item_id: item_id.clone() }.into());
            }
            let capacity = ruleset.unit(&unit.kind).map_or(0, |d| d.inventory_capacity);
            if unit.inventory.len() >= capacity {
                return Err(ValidationFailure::InventoryFull.into());
            }
        }
        PlayerCommand::Interact { unit_id, interactable_id } => {
            let unit = owned_unit(base, *unit_id, player_id)?;
            let usable = base
                .tile(unit.position)
                .and_then(|t| t.interactable(interactable_id))
                .is_some_and(|i| i.usable_at(base.tick + 1));
            if !usable {
                return Err(ValidationFailure::InteractableUnavailable {
                    interactable_id: interactable_id.clone(),
                }
                .into());
            }
        }
    }
    Ok(())
}

fn owned_unit(base: &WorldState, unit_id: u64, player_id: u32) -> Result<&Unit, ValidationFailure> {
    let unit = base.unit(unit_id).ok_or(ValidationFailure::UnitMissing { unit_id })?;
    if unit.owner != player_id {
        return Err(ValidationFailure::NotOwner { unit_id, player_id });
    }
    Ok(unit)
}

fn affordable(shortfall: Option<(String, i64, i64)>) -> Result<(), Rejection> {
    match shortfall {
        Some((resource, needed, available)) => Err(Rejection::InsufficientResources {
            resource,
            needed,
            available,
        }),
        None => Ok(()),
    }
}

/// Path and stamina check for a move. Returns the path cost.
pub fn check_move(base: &WorldState, ruleset: &Ruleset, unit: &Unit, to: HexCoord) -> Result<u32, ValidationFailure> {
    let tile = base.tile(to).ok_or(ValidationFailure::TileMissing { coord: to })?;
    if ruleset.terrain_cost(tile.terrain).is_none() {
        return Err(ValidationFailure::Impassable { coord: to });
    }
    if to == unit.position {
        return Err(ValidationFailure::Malformed {
            detail: format!("unit {} is already at {to}", unit.id),
        });
    }
    let budget = ruleset.unit(&unit.kind).map_or(0, |d| d.movement);
    let path = hex::find_path(unit.position, to, budget, |c| {
        base.tile(c).and_then(|t| ruleset.terrain_cost(t.terrain))
    })
    .ok_or(ValidationFailure::Unreachable { to, budget })?;

    let needed = i32::try_from(path.cost).unwrap_or(i32::MAX);
    if needed > unit.stamina {
        return Err(ValidationFailure::Exhausted {
            needed,
            available: unit.stamina,
        });
    }
    Ok(path.cost)
}
