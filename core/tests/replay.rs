//! Replaying committed ticks from the audit log, and resuming after restart.

mod common;

use chrono::Duration;
use common::{generated, start, wander};
use hexworld_core::{
    clock::ManualClock,
    command::{PlayerCommand, Submission},
    config::EngineConfig,
    content::StaticContent,
    engine::Engine,
    error::SimResult,
    event::GameEvent,
    passive::{PassiveRule, PassiveRules, RuleContext},
    replay,
    snapshot::SnapshotStore,
    store::GameStore,
    world::WorldState,
};
use std::sync::Arc;

fn research() -> PlayerCommand {
    PlayerCommand::Research {
        tech: "agriculture".into(),
    }
}

/// Ten ticks with wandering units, contested builds, supersedes,
/// withdrawals and a late submission.
fn busy_game(engine: &Engine, clock: &ManualClock, game_id: &str) {
    let ruleset = engine.ruleset(game_id).unwrap();
    for round in 0..10u64 {
        let state = engine.latest_state(game_id).unwrap();
        for unit in state.units.values() {
            let order = if (unit.id + round) % 4 == 0 {
                PlayerCommand::Build { unit_id: unit.id, structure: "mine".into() }
            } else if let Some(to) = wander(&state, &ruleset, unit, round) {
                PlayerCommand::Move { unit_id: unit.id, to }
            } else {
                continue;
            };
            let outcome = engine
                .submit(game_id, unit.owner, Submission::new(order.clone()))
                .unwrap();
            if round % 3 == 1 && outcome.is_accepted() {
                engine.withdraw(game_id, unit.owner, outcome.command_id()).unwrap();
            } else if round % 3 == 2 {
                engine
                    .submit(game_id, unit.owner, Submission::new(order).superseding())
                    .unwrap();
            }
        }
        // Late for the tick about to resolve.
        let next = state.tick + 1;
        let deadline = engine.game(game_id).unwrap().clock.freeze_deadline(next).unwrap();
        clock.set(deadline + Duration::seconds(1));
        if let Some(unit) = state.units.values().next() {
            engine
                .submit(
                    game_id,
                    unit.owner,
                    Submission::new(research()).for_tick(next),
                )
                .unwrap();
        }
        engine.run_tick(game_id).unwrap();
    }
}

#[test]
fn busy_chain_replays_identically() {
    let (engine, clock, game_id) = generated(31337, 3);
    busy_game(&engine, &clock, &game_id);

    let game = engine.game(&game_id).unwrap();
    let ruleset = engine.ruleset(&game_id).unwrap();
    let report = replay::replay_chain(
        engine.store(),
        &game_id,
        &ruleset,
        &game.config,
        engine.rules(),
        None,
    )
    .unwrap();
    assert_eq!(report.ticks_checked, 10);
    assert!(report.is_clean(), "{:?}", report.mismatches);

    let log = engine.store().command_log(&game_id).unwrap();
    assert!(log.iter().any(|r| !r.was_resolution_input()), "expected intake-only records");
    assert!(log.iter().any(|r| r.was_resolution_input()));
}

#[test]
fn replay_stops_at_requested_tick() {
    let (engine, _clock, game_id) = generated(5, 2);
    for _ in 0..4 {
        engine.run_tick(&game_id).unwrap();
    }
    let game = engine.game(&game_id).unwrap();
    let ruleset = engine.ruleset(&game_id).unwrap();
    let report = replay::replay_chain(
        engine.store(),
        &game_id,
        &ruleset,
        &game.config,
        engine.rules(),
        Some(2),
    )
    .unwrap();
    assert_eq!(report.ticks_checked, 2);
}

/// Extra point for player 1 every tick.
struct Bonus;

impl PassiveRule for Bonus {
    fn name(&self) -> &'static str {
        "bonus"
    }

    fn apply(&self, _ctx: &RuleContext<'_>, world: &mut WorldState) -> SimResult<Vec<GameEvent>> {
        if let Some(player) = world.players.get_mut(&1) {
            player.score += 1;
        }
        Ok(Vec::new())
    }
}

#[test]
fn changed_rules_are_reported_as_divergence() {
    let (engine, _clock, game_id) = generated(8, 2);
    for _ in 0..3 {
        engine.run_tick(&game_id).unwrap();
    }
    let game = engine.game(&game_id).unwrap();
    let ruleset = engine.ruleset(&game_id).unwrap();
    let mut altered = PassiveRules::standard();
    altered.register(Box::new(Bonus));
    let report = replay::replay_chain(
        engine.store(),
        &game_id,
        &ruleset,
        &game.config,
        &altered,
        None,
    )
    .unwrap();
    assert_eq!(report.mismatches.iter().map(|m| m.tick).collect::<Vec<_>>(), vec![1, 2, 3]);
}

fn sqlite_engine(store: GameStore, clock: Arc<ManualClock>) -> Engine {
    Engine::new(
        EngineConfig::default_test(),
        Arc::new(store),
        Arc::new(StaticContent::default_test()),
        clock,
        Arc::new(hexworld_core::notify::EventFeed::new()),
    )
}

#[test]
fn restart_resumes_the_chain() {
    let first = GameStore::open("file:restart?mode=memory&cache=shared").unwrap();
    first.migrate().unwrap();
    let second = first.reopen().unwrap();
    let clock = Arc::new(ManualClock::new(start()));

    let before = sqlite_engine(first, clock.clone());
    let game_id = before.create_game("restart", 99, &["a".into(), "b".into()], None).unwrap();
    before.start_game(&game_id).unwrap();
    busy_game(&before, &clock, &game_id);
    let head = before.latest_state(&game_id).unwrap();
    let last_id = before
        .store()
        .command_log(&game_id)
        .unwrap()
        .iter()
        .map(|r| r.command.command_id)
        .max()
        .unwrap();

    let after = sqlite_engine(second, clock.clone());
    assert_eq!(after.restore().unwrap(), 1);
    assert_eq!(after.latest_state(&game_id).unwrap().content_hash, head.content_hash);
    assert_eq!(after.game(&game_id).unwrap(), before.game(&game_id).unwrap());

    let unit = head.units.values().next().unwrap();
    let outcome = after
        .submit(&game_id, unit.owner, Submission::new(research()))
        .unwrap();
    assert!(outcome.command_id() > last_id, "command ids must keep increasing across restarts");

    let report = after.run_tick(&game_id).unwrap();
    assert_eq!(report.tick, head.tick + 1);
    assert_eq!(after.store().chain(&game_id).unwrap().len() as u64, head.tick + 2);
}
