//! Shared fixtures: hand-built worlds and engines on a manual clock.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use hexworld_core::{
    clock::ManualClock,
    command::{PlayerCommand, Submission},
    config::{EngineConfig, GameConfig},
    content::{ContentService, Ruleset, StaticContent},
    engine::Engine,
    game::{Game, GameStatus},
    genesis,
    hex::HexCoord,
    intake::SubmitOutcome,
    notify::{EventFeed, Notifier},
    passive::PassiveRules,
    snapshot::{MemorySnapshotStore, SnapshotStore},
    types::{PlayerId, UnitId},
    world::{Terrain, Unit, UnitStatus, WorldState},
};
use std::sync::Arc;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn config() -> GameConfig {
    let mut cfg = EngineConfig::default_test().game_defaults;
    cfg.loot_density_percent = 0;
    cfg.interactable_density_percent = 0;
    cfg
}

pub fn ruleset() -> Arc<Ruleset> {
    StaticContent::default_test().ruleset("v1").unwrap()
}

/// One unit to place: (id, owner, kind, position).
pub type Placement = (UnitId, PlayerId, &'static str, HexCoord);

/// An all-plains map with exactly the given units, nothing on the tiles
/// and no scheduled events.
pub fn custom_world(
    game_id: &str,
    seed: u64,
    cfg: GameConfig,
    players: &[(PlayerId, &str)],
    units: &[Placement],
) -> (Game, WorldState) {
    let mut game = Game::new(game_id.to_string(), "custom", seed, cfg, start());
    game.status = GameStatus::Active;
    let ruleset = ruleset();
    let seats: Vec<(PlayerId, String)> = players
        .iter()
        .map(|(id, n)| (*id, n.to_string()))
        .collect();
    let mut world = genesis::generate(&game, &seats, &ruleset).unwrap();

    for tile in Arc::make_mut(&mut world.tiles).values_mut() {
        tile.terrain = Terrain::Plains;
        tile.capacity = 1;
        tile.structure = None;
        tile.loot.clear();
        tile.interactables.clear();
    }
    world.units.clear();
    world.scheduled.clear();
    for player in world.players.values_mut() {
        player.units.clear();
    }
    for (id, owner, kind, at) in units {
        world.units.insert(*id, unit(&ruleset, *id, *owner, kind, *at));
        world.players.get_mut(owner).unwrap().units.insert(*id);
    }
    world.next_unit_id = units.iter().map(|u| u.0).max().unwrap_or(0) + 1;
    world.stats.live_units = world.units.len() as u32;
    (game, world.seal().unwrap())
}

pub fn unit(ruleset: &Ruleset, id: UnitId, owner: PlayerId, kind: &str, at: HexCoord) -> Unit {
    let def = ruleset.unit(kind).unwrap();
    Unit {
        id,
        owner,
        kind: kind.to_string(),
        position: at,
        hp: def.max_hp,
        max_hp: def.max_hp,
        stamina: def.max_stamina,
        max_stamina: def.max_stamina,
        experience: 0,
        status: UnitStatus::Idle,
        inventory: Vec::new(),
        effects: Vec::new(),
        attributes: Default::default(),
    }
}

pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub feed: Arc<EventFeed>,
    pub game_id: String,
}

impl Harness {
    /// Register a prepared game in `store` and load it into a fresh engine.
    pub fn load(
        game: Game,
        world: WorldState,
        store: Arc<dyn SnapshotStore>,
        rules: PassiveRules,
    ) -> Self {
        let feed = Arc::new(EventFeed::new());
        Self::load_with_notifier(game, world, store, rules, feed.clone(), feed)
    }

    pub fn load_with_notifier(
        game: Game,
        world: WorldState,
        store: Arc<dyn SnapshotStore>,
        rules: PassiveRules,
        notifier: Arc<dyn Notifier>,
        feed: Arc<EventFeed>,
    ) -> Self {
        init_logging();
        store.register_game(&game, &world).unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let engine = Engine::new(
            EngineConfig::default_test(),
            store,
            Arc::new(StaticContent::default_test()),
            clock.clone(),
            notifier,
        )
        .with_rules(rules);
        assert_eq!(engine.restore().unwrap(), 1);
        Self {
            engine,
            clock,
            feed,
            game_id: game.game_id,
        }
    }

    pub fn custom(units: &[Placement]) -> Self {
        let (game, world) = custom_world("custom", 7, config(), &[(1, "red"), (2, "blue")], units);
        Self::load(game, world, Arc::new(MemorySnapshotStore::new()), PassiveRules::standard())
    }

    pub fn submit(&self, player_id: PlayerId, command: PlayerCommand) -> SubmitOutcome {
        self.engine
            .submit(&self.game_id, player_id, Submission::new(command))
            .unwrap()
    }

    pub fn accept(&self, player_id: PlayerId, command: PlayerCommand) -> u64 {
        let outcome = self.submit(player_id, command);
        assert!(outcome.is_accepted(), "expected acceptance, got {outcome:?}");
        outcome.command_id()
    }

    pub fn state(&self) -> Arc<WorldState> {
        self.engine.latest_state(&self.game_id).unwrap()
    }
}

/// Engine over a generated map with `players` seated, created and started
/// through the public lifecycle.
pub fn generated(seed: u64, players: usize) -> (Engine, Arc<ManualClock>, String) {
    init_logging();
    let clock = Arc::new(ManualClock::new(start()));
    let engine = Engine::new(
        EngineConfig::default_test(),
        Arc::new(MemorySnapshotStore::new()),
        Arc::new(StaticContent::default_test()),
        clock.clone(),
        Arc::new(EventFeed::new()),
    );
    let names: Vec<String> = (1..=players).map(|i| format!("p{i}")).collect();
    let game_id = engine.create_game("generated", seed, &names, None).unwrap();
    engine.start_game(&game_id).unwrap();
    (engine, clock, game_id)
}

/// A passable neighbour of the unit's tile, rotating with `salt`.
pub fn wander(state: &WorldState, ruleset: &Ruleset, unit: &Unit, salt: u64) -> Option<HexCoord> {
    let neighbors = unit.position.neighbors();
    (0..6)
        .map(|i| neighbors[((salt as usize) + i) % 6])
        .find(|c| state.tile(*c).is_some_and(|t| ruleset.terrain_cost(t.terrain).is_some()))
}
