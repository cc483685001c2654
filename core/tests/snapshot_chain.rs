//! Both snapshot stores: linear chain, conflicts, immutable history.

mod common;

use common::{config, custom_world, Harness};
use hexworld_core::{
    command::PlayerCommand,
    error::SimError,
    hex::HexCoord,
    passive::PassiveRules,
    snapshot::{MemorySnapshotStore, SnapshotStore},
    store::GameStore,
    world::WorldState,
};
use std::sync::Arc;

fn sqlite(name: &str) -> GameStore {
    let store = GameStore::open(&format!("file:{name}?mode=memory&cache=shared")).unwrap();
    store.migrate().unwrap();
    store
}

fn genesis(game_id: &str) -> (hexworld_core::game::Game, WorldState) {
    custom_world(
        game_id,
        5,
        config(),
        &[(1, "red"), (2, "blue")],
        &[(1, 1, "infantry", HexCoord::new(1, 0))],
    )
}

fn next(state: &WorldState) -> WorldState {
    state.successor().seal().unwrap()
}

fn linear_chain(store: &dyn SnapshotStore) {
    let (game, g0) = genesis("linear");
    store.register_game(&game, &g0).unwrap();
    assert!(matches!(store.register_game(&game, &g0), Err(SimError::GameExists(_))));

    let s1 = next(&g0);
    store.commit(&s1, &[]).unwrap();

    // Same tick twice, and a gap.
    assert!(matches!(
        store.commit(&s1, &[]),
        Err(SimError::SequenceConflict { expected: 2, actual: 1, .. })
    ));
    let s3 = next(&next(&s1));
    assert!(matches!(
        store.commit(&s3, &[]),
        Err(SimError::SequenceConflict { expected: 2, actual: 3, .. })
    ));

    assert_eq!(store.latest_tick("linear").unwrap(), Some(1));
    assert_eq!(store.read("linear", 0).unwrap().unwrap(), g0);
    assert_eq!(store.read_latest("linear").unwrap().unwrap(), s1);
    assert!(store.read("linear", 2).unwrap().is_none());
    assert_eq!(
        store.chain("linear").unwrap(),
        vec![(0, g0.content_hash.clone()), (1, s1.content_hash.clone())]
    );
    assert_ne!(g0.content_hash, s1.content_hash);
}

#[test]
fn memory_store_keeps_a_linear_chain() {
    linear_chain(&MemorySnapshotStore::new());
}

#[test]
fn sqlite_store_keeps_a_linear_chain() {
    linear_chain(&sqlite("linear_chain"));
}

#[test]
fn unknown_game_reads_empty() {
    let store = MemorySnapshotStore::new();
    assert!(store.read_latest("nope").unwrap().is_none());
    assert!(store.latest_tick("nope").unwrap().is_none());
    let orphan = next(&genesis("nope").1);
    assert!(matches!(store.commit(&orphan, &[]), Err(SimError::UnknownGame(_))));
}

/// Two writers racing for the same tick: exactly one wins.
#[test]
fn racing_commits_produce_one_successor() {
    let store = MemorySnapshotStore::new();
    let (game, g0) = genesis("race");
    store.register_game(&game, &g0).unwrap();

    let mut a = g0.successor();
    a.players.get_mut(&1).unwrap().score = 1;
    let a = a.seal().unwrap();
    let mut b = g0.successor();
    b.players.get_mut(&1).unwrap().score = 2;
    let b = b.seal().unwrap();

    let (ra, rb) = std::thread::scope(|scope| {
        let ta = scope.spawn(|| store.commit(&a, &[]));
        let tb = scope.spawn(|| store.commit(&b, &[]));
        (ta.join().unwrap(), tb.join().unwrap())
    });
    assert!(ra.is_ok() != rb.is_ok(), "exactly one commit may succeed: {ra:?} / {rb:?}");
    let loser = if ra.is_ok() { rb } else { ra };
    assert!(matches!(loser, Err(SimError::SequenceConflict { expected: 2, actual: 1, .. })));
    assert_eq!(store.chain("race").unwrap().len(), 2);
}

/// History read mid-game is identical after the game moves on.
#[test]
fn committed_ticks_never_change() {
    let (game, g0) = genesis("history");
    let h = Harness::load(
        game,
        g0,
        Arc::new(sqlite("history")),
        PassiveRules::standard(),
    );
    h.accept(1, PlayerCommand::Move { unit_id: 1, to: HexCoord::new(2, 0) });
    h.engine.run_tick(&h.game_id).unwrap();
    let tick1 = h.engine.state_at(&h.game_id, 1).unwrap().unwrap();

    for _ in 0..3 {
        h.engine.run_tick(&h.game_id).unwrap();
    }
    assert_eq!(h.engine.state_at(&h.game_id, 1).unwrap(), Some(tick1.clone()));
    assert_eq!(tick1.unit(1).unwrap().position, HexCoord::new(2, 0));
    assert_eq!(h.engine.store().chain(&h.game_id).unwrap().len(), 5);
}

#[test]
fn tampered_row_is_an_integrity_violation() {
    let uri = "file:tamper?mode=memory&cache=shared";
    let store = GameStore::open(uri).unwrap();
    store.migrate().unwrap();
    let (game, g0) = genesis("tamper");
    store.register_game(&game, &g0).unwrap();
    store.commit(&next(&g0), &[]).unwrap();

    let raw = rusqlite::Connection::open_with_flags(
        uri,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE | rusqlite::OpenFlags::SQLITE_OPEN_URI,
    )
    .unwrap();
    let changed = raw
        .execute(
            "UPDATE world_state SET state_json = replace(state_json, '\"score\":0', '\"score\":999')
             WHERE game_id = 'tamper' AND tick = 1",
            [],
        )
        .unwrap();
    assert_eq!(changed, 1);

    assert!(store.read("tamper", 0).unwrap().is_some(), "untouched rows still read");
    assert!(matches!(
        store.read("tamper", 1),
        Err(SimError::IntegrityViolation { tick: 1, .. })
    ));
    assert!(matches!(store.read_latest("tamper"), Err(SimError::IntegrityViolation { .. })));
}
