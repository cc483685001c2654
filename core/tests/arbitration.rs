//! Contention inside one tick: tie-breaks and resource exhaustion.

mod common;

use chrono::Duration;
use common::{config, custom_world, Harness};
use hexworld_core::{
    command::{CommandStatus, PlayerCommand},
    error::{Rejection, ValidationFailure},
    hex::HexCoord,
    passive::PassiveRules,
    snapshot::MemorySnapshotStore,
    world::{Interactable, InteractableKind, Reward},
};
use proptest::prelude::*;
use std::sync::Arc;

const CONTESTED: HexCoord = HexCoord::new(2, 0);

fn contest() -> Harness {
    // Same kind, same initiative; unit 1 is A, unit 2 is B.
    Harness::custom(&[
        (1, 1, "infantry", HexCoord::new(1, 0)),
        (2, 2, "infantry", HexCoord::new(3, 0)),
    ])
}

fn into_contested(unit_id: u64) -> PlayerCommand {
    PlayerCommand::Move { unit_id, to: CONTESTED }
}

/// A (unit 1) and B (unit 2) target the same single-capacity tile with
/// equal initiative and equal submission time. A wins on unit id, even
/// when B's command was admitted first.
#[test]
fn equal_priority_goes_to_lower_unit_id() {
    let h = contest();
    let b = h.accept(2, into_contested(2));
    let a = h.accept(1, into_contested(1));

    let report = h.engine.run_tick(&h.game_id).unwrap();
    assert_eq!(report.state.unit(1).unwrap().position, CONTESTED);
    assert_eq!(report.state.unit(2).unwrap().position, HexCoord::new(3, 0));

    let audit = h.engine.store().audit_for_tick(&h.game_id, 1).unwrap();
    let record_of = |id| audit.iter().find(|r| r.command.command_id == id).unwrap();
    assert_eq!(record_of(a).command.status, CommandStatus::Applied);
    assert_eq!(
        record_of(b).rejection,
        Some(Rejection::Outprioritized {
            contested: format!("tile {CONTESTED}"),
            winner: a
        })
    );
}

/// Earlier submission beats a lower unit id.
#[test]
fn earlier_submission_wins_before_unit_id() {
    let h = contest();
    let b = h.accept(2, into_contested(2));
    h.clock.advance(Duration::seconds(10));
    h.accept(1, into_contested(1));

    let report = h.engine.run_tick(&h.game_id).unwrap();
    assert_eq!(report.state.unit(2).unwrap().position, CONTESTED);
    let audit = h.engine.store().audit_for_tick(&h.game_id, 1).unwrap();
    assert!(audit
        .iter()
        .any(|r| r.command.command_id == b && r.command.status == CommandStatus::Applied));
}

/// Initiative outranks everything else.
#[test]
fn higher_initiative_wins() {
    let h = Harness::custom(&[
        (1, 1, "infantry", HexCoord::new(1, 0)),
        (2, 2, "scout", HexCoord::new(3, 0)),
    ]);
    h.accept(1, into_contested(1));
    h.clock.advance(Duration::seconds(30));
    h.accept(2, into_contested(2));

    let report = h.engine.run_tick(&h.game_id).unwrap();
    assert_eq!(
        report.state.unit(2).unwrap().position,
        CONTESTED,
        "scout has the higher initiative"
    );
}

/// A tile held by a unit that is not leaving has no room for a mover.
#[test]
fn occupied_tile_rejects_mover() {
    let h = Harness::custom(&[
        (1, 1, "infantry", HexCoord::new(1, 0)),
        (2, 2, "infantry", CONTESTED),
    ]);
    let id = h.accept(1, into_contested(1));
    h.engine.run_tick(&h.game_id).unwrap();
    let audit = h.engine.store().audit_for_tick(&h.game_id, 1).unwrap();
    assert_eq!(
        audit[0].rejection,
        Some(Rejection::ValidationFailure(ValidationFailure::TileFull { coord: CONTESTED }))
    );
    assert_eq!(audit[0].command.command_id, id);
}

/// A unit leaving frees its tile for a mover in the same tick.
#[test]
fn vacated_tile_can_be_entered() {
    let h = Harness::custom(&[
        (1, 1, "infantry", HexCoord::new(1, 0)),
        (2, 2, "infantry", CONTESTED),
    ]);
    h.accept(2, PlayerCommand::Move { unit_id: 2, to: HexCoord::new(3, 0) });
    h.accept(1, into_contested(1));
    let report = h.engine.run_tick(&h.game_id).unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(report.state.unit(1).unwrap().position, CONTESTED);
}

/// Player holds 100 gold; X and Y each build a farm for 80. X has
/// priority, so X applies and Y fails with InsufficientResources.
#[test]
fn resource_exhaustion_applies_in_priority_order() {
    let h = Harness::custom(&[
        (1, 1, "infantry", HexCoord::new(1, 0)),
        (2, 1, "infantry", HexCoord::new(3, 0)),
    ]);
    assert_eq!(h.state().player(1).unwrap().balance("gold"), 100);

    let x = h.accept(1, PlayerCommand::Build { unit_id: 1, structure: "farm".into() });
    h.clock.advance(Duration::seconds(1));
    let y = h.accept(1, PlayerCommand::Build { unit_id: 2, structure: "farm".into() });

    let report = h.engine.run_tick(&h.game_id).unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.rejected, 1);

    let audit = h.engine.store().audit_for_tick(&h.game_id, 1).unwrap();
    let x_rec = audit.iter().find(|r| r.command.command_id == x).unwrap();
    let y_rec = audit.iter().find(|r| r.command.command_id == y).unwrap();
    assert_eq!(x_rec.command.status, CommandStatus::Applied);
    assert_eq!(
        y_rec.rejection,
        Some(Rejection::InsufficientResources {
            resource: "gold".into(),
            needed: 80,
            available: 20
        })
    );

    let state = report.state;
    assert!(state.tile(HexCoord::new(1, 0)).unwrap().structure.is_some());
    assert!(state.tile(HexCoord::new(3, 0)).unwrap().structure.is_none());
    let income = h.engine.game(&h.game_id).unwrap().config.base_income["gold"];
    assert_eq!(state.player(1).unwrap().balance("gold"), 20 + income);
}

/// Two units share a tile with a single-use chest. The scout outranks the
/// infantry on initiative and takes the only use.
#[test]
fn last_use_of_an_interactable_goes_by_priority() {
    let at = HexCoord::new(1, 0);
    let (game, mut world) = custom_world(
        "chest",
        9,
        config(),
        &[(1, "red"), (2, "blue")],
        &[(1, 1, "infantry", at), (2, 2, "scout", at)],
    );
    let tile = world.tile_mut(at).unwrap();
    tile.capacity = 2;
    tile.interactables.push(Interactable::new(
        "chest".into(),
        InteractableKind::Chest,
        1,
        0,
        Reward::Item {
            item_kind: "coin".into(),
            quantity: 3,
        },
    ));
    let h = Harness::load(
        game,
        world.seal().unwrap(),
        Arc::new(MemorySnapshotStore::new()),
        PassiveRules::standard(),
    );
    let open = |unit_id| PlayerCommand::Interact {
        unit_id,
        interactable_id: "chest".into(),
    };

    let slow = h.accept(1, open(1));
    h.clock.advance(Duration::seconds(5));
    let fast = h.accept(2, open(2));
    let report = h.engine.run_tick(&h.game_id).unwrap();

    assert_eq!(report.state.unit(2).unwrap().inventory[0].item_kind, "coin");
    assert!(report.state.unit(1).unwrap().inventory.is_empty());
    let chest = report.state.tile(at).unwrap().interactable("chest").unwrap();
    assert_eq!(chest.remaining_uses(), Some(0));
    assert_eq!(chest.interactions.len(), 1);

    let audit = h.engine.store().audit_for_tick(&h.game_id, 1).unwrap();
    let loser = audit.iter().find(|r| r.command.command_id == slow).unwrap();
    assert_eq!(
        loser.rejection,
        Some(Rejection::Outprioritized {
            contested: "interactable chest".into(),
            winner: fast
        })
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Admission order and thread interleaving never decide a contest:
    /// with equal priority A always wins, whatever order they arrive in.
    #[test]
    fn tie_break_ignores_arrival_order(b_first in any::<bool>()) {
        let h = contest();
        if b_first {
            h.accept(2, into_contested(2));
            h.accept(1, into_contested(1));
        } else {
            h.accept(1, into_contested(1));
            h.accept(2, into_contested(2));
        }
        let report = h.engine.run_tick(&h.game_id).unwrap();
        prop_assert_eq!(report.state.unit(1).unwrap().position, CONTESTED);
        prop_assert_eq!(report.state.unit(2).unwrap().position, HexCoord::new(3, 0));
    }
}
