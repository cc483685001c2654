//! The multi-game engine.
//!
//! Owns one runtime per game (queue, cached latest snapshot, scheduler)
//! and wires them to the shared collaborators: snapshot store, content,
//! wall clock and notifier.
//!
//! RULES:
//!   - Games are independent. Nothing is shared between runtimes except
//!     the collaborators, which are all thread-safe.
//!   - Every state change goes through the scheduler's commit. The engine
//!     only caches what the store already holds.
//!   - Pending commands live in memory. After a restart the queue resumes
//!     empty, frozen through the latest committed tick.

use crate::{
    clock::{TickClock, WallClock},
    command::{CommandRecord, Submission},
    config::{EngineConfig, GameConfig},
    content::{ContentService, Ruleset},
    error::{SimError, SimResult},
    game::{Game, GameStatus},
    genesis,
    intake::{Intake, SubmitOutcome},
    notify::Notifier,
    passive::PassiveRules,
    queue::CommandQueue,
    scheduler::{Cycle, SchedulerPhase, TickReport, TickScheduler},
    snapshot::SnapshotStore,
    types::{CommandId, GameId, PlayerId, Tick},
    world::WorldState,
};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::{collections::BTreeMap, sync::Arc};
use uuid::Uuid;

/// Everything the engine keeps in memory for one game.
pub struct GameRuntime {
    game: RwLock<Game>,
    ruleset: Arc<Ruleset>,
    queue: CommandQueue,
    latest: RwLock<Arc<WorldState>>,
    scheduler: TickScheduler,
}

impl GameRuntime {
    fn new(game: Game, ruleset: Arc<Ruleset>, queue: CommandQueue, latest: WorldState) -> Self {
        let scheduler = TickScheduler::new(game.game_id.clone(), game.config.tick_budget_ms);
        if game.accepts_commands() {
            scheduler.open();
        }
        Self {
            game: RwLock::new(game),
            ruleset,
            queue,
            latest: RwLock::new(Arc::new(latest)),
            scheduler,
        }
    }
}

pub struct Engine {
    defaults: GameConfig,
    store: Arc<dyn SnapshotStore>,
    content: Arc<dyn ContentService>,
    clock: Arc<dyn WallClock>,
    notifier: Arc<dyn Notifier>,
    rules: Arc<PassiveRules>,
    games: RwLock<BTreeMap<GameId, Arc<GameRuntime>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn SnapshotStore>,
        content: Arc<dyn ContentService>,
        clock: Arc<dyn WallClock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            defaults: config.game_defaults,
            store,
            content,
            clock,
            notifier,
            rules: Arc::new(PassiveRules::standard()),
            games: RwLock::new(BTreeMap::new()),
        }
    }

    /// Replace the passive rule set. Only meaningful before any game runs.
    pub fn with_rules(mut self, rules: PassiveRules) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn rules(&self) -> &PassiveRules {
        &self.rules
    }

    pub fn store(&self) -> &dyn SnapshotStore {
        self.store.as_ref()
    }

    /// Rebuild runtimes for every game in the store. Returns how many
    /// games were loaded.
    pub fn restore(&self) -> SimResult<usize> {
        let mut loaded = 0;
        for game in self.store.games()? {
            if self.games.read().contains_key(&game.game_id) {
                continue;
            }
            let latest = self
                .store
                .read_latest(&game.game_id)?
                .ok_or_else(|| SimError::UnknownGame(game.game_id.clone()))?;
            let ruleset = self.ruleset_for(&game.config)?;
            let next_id = self.store.max_command_id(&game.game_id)? + 1;
            let queue = CommandQueue::resume(game.game_id.clone(), latest.tick, next_id);
            log::info!(
                "restored game {} at tick {} ({}), next command id {next_id}",
                game.game_id,
                latest.tick,
                game.status.as_str()
            );
            let runtime = GameRuntime::new(game.clone(), ruleset, queue, latest);
            self.games.write().insert(game.game_id, Arc::new(runtime));
            loaded += 1;
        }
        Ok(loaded)
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Create a game with the given players seated (ids 1..=n) and commit
    /// its genesis snapshot. The game waits until `start_game`.
    pub fn create_game(
        &self,
        name: &str,
        seed: u64,
        players: &[String],
        config: Option<GameConfig>,
    ) -> SimResult<GameId> {
        let config = config.unwrap_or_else(|| self.defaults.clone());
        config.validate()?;
        let ruleset = self.ruleset_for(&config)?;

        let game = Game::new(Uuid::new_v4().to_string(), name, seed, config, self.clock.now());
        let seats: Vec<(PlayerId, String)> = players
            .iter()
            .enumerate()
            .map(|(i, name)| (i as PlayerId + 1, name.clone()))
            .collect();
        let genesis = genesis::generate(&game, &seats, &ruleset)?;
        self.store.register_game(&game, &genesis)?;

        log::info!(
            "created game {} '{}' seed={seed} players={} genesis={}",
            game.game_id,
            game.name,
            seats.len(),
            genesis.content_hash
        );
        let game_id = game.game_id.clone();
        let queue = CommandQueue::new(game_id.clone());
        let runtime = GameRuntime::new(game, ruleset, queue, genesis);
        self.games.write().insert(game_id.clone(), Arc::new(runtime));
        Ok(game_id)
    }

    /// Activate a waiting game, or resume a paused one. The tick clock is
    /// anchored so the next tick's deadline is one tick length from now.
    pub fn start_game(&self, game_id: &str) -> SimResult<()> {
        let rt = self.runtime(game_id)?;
        let latest_tick = rt.latest.read().tick;
        let now = self.clock.now();
        let mut game = rt.game.write();
        match game.status {
            GameStatus::Waiting | GameStatus::Paused => {}
            GameStatus::Active => return Ok(()),
            GameStatus::Finished => return Err(SimError::GameNotActive(game_id.to_string())),
        }
        let length = game.config.tick_length_secs;
        game.clock = TickClock::anchored(now, latest_tick, length)
            .ok_or_else(|| anyhow::anyhow!("game {game_id}: cannot anchor tick {latest_tick} at {now}"))?;
        game.status = GameStatus::Active;
        self.store.save_game(&game)?;
        rt.scheduler.open();
        if let Some(deadline) = game.clock.freeze_deadline(latest_tick + 1) {
            log::info!("game {game_id} active, tick {} due at {deadline}", latest_tick + 1);
        }
        Ok(())
    }

    pub fn pause_game(&self, game_id: &str) -> SimResult<()> {
        self.set_status(game_id, GameStatus::Paused)
    }

    pub fn finish_game(&self, game_id: &str) -> SimResult<()> {
        self.set_status(game_id, GameStatus::Finished)
    }

    fn set_status(&self, game_id: &str, status: GameStatus) -> SimResult<()> {
        let rt = self.runtime(game_id)?;
        let mut game = rt.game.write();
        game.status = status;
        self.store.save_game(&game)?;
        rt.scheduler.idle();
        log::info!("game {game_id} is now {}", status.as_str());
        Ok(())
    }

    // ── Commands ────────────────────────────────────────────────

    pub fn submit(&self, game_id: &str, player_id: PlayerId, submission: Submission) -> SimResult<SubmitOutcome> {
        let rt = self.runtime(game_id)?;
        let game = rt.game.read().clone();
        let latest = rt.latest.read().clone();
        let admission = Intake {
            game: &game,
            latest: &latest,
            ruleset: &rt.ruleset,
            queue: &rt.queue,
            now: self.clock.now(),
        }
        .submit(player_id, submission);
        if !admission.audit.is_empty() {
            self.store.append_audit(&admission.audit)?;
        }
        Ok(admission.outcome)
    }

    /// Withdraw a pending command before its tick freezes.
    pub fn withdraw(&self, game_id: &str, player_id: PlayerId, command_id: CommandId) -> SimResult<()> {
        let rt = self.runtime(game_id)?;
        let command = rt.queue.withdraw(player_id, command_id)?;
        log::debug!("game {game_id}: player {player_id} withdrew command {command_id}");
        self.store
            .append_audit(&[CommandRecord::withdrawn(command.target_tick, command)])
    }

    pub fn pending(&self, game_id: &str, tick: Tick) -> SimResult<Vec<crate::command::QueuedCommand>> {
        Ok(self.runtime(game_id)?.queue.pending(tick))
    }

    // ── Ticks ───────────────────────────────────────────────────

    /// Resolve the next tick now, regardless of its deadline.
    pub fn run_tick(&self, game_id: &str) -> SimResult<TickReport> {
        let rt = self.runtime(game_id)?;
        self.cycle(&rt, None)?
            .ok_or_else(|| SimError::GameNotActive(game_id.to_string()))
    }

    /// Resolve every active game whose next deadline has passed. Games run
    /// in parallel; each result is reported against its game.
    pub fn run_due(&self) -> Vec<(GameId, SimResult<TickReport>)> {
        let now = self.clock.now();
        let runtimes: Vec<(GameId, Arc<GameRuntime>)> = self
            .games
            .read()
            .iter()
            .map(|(id, rt)| (id.clone(), Arc::clone(rt)))
            .collect();
        runtimes
            .into_par_iter()
            .filter_map(|(game_id, rt)| match self.cycle(&rt, Some(now)) {
                Ok(Some(report)) => Some((game_id, Ok(report))),
                Ok(None) => None,
                Err(SimError::SchedulerHalted(_)) => None,
                Err(e) => Some((game_id, Err(e))),
            })
            .collect()
    }

    fn cycle(&self, rt: &GameRuntime, due_at: Option<chrono::DateTime<chrono::Utc>>) -> SimResult<Option<TickReport>> {
        let game = rt.game.read().clone();
        if !game.accepts_commands() {
            return match due_at {
                Some(_) => Ok(None),
                None => Err(SimError::GameNotActive(game.game_id.clone())),
            };
        }
        let report = rt.scheduler.run(
            Cycle {
                game: &game,
                ruleset: &rt.ruleset,
                rules: &self.rules,
                queue: &rt.queue,
                store: self.store.as_ref(),
                notifier: self.notifier.as_ref(),
            },
            due_at,
        )?;
        if let Some(report) = &report {
            *rt.latest.write() = Arc::clone(&report.state);
        }
        Ok(report)
    }

    /// Operator action: clear a halted scheduler.
    pub fn resume_scheduler(&self, game_id: &str) -> SimResult<()> {
        let rt = self.runtime(game_id)?;
        rt.scheduler.resume();
        if !rt.game.read().accepts_commands() {
            rt.scheduler.idle();
        }
        Ok(())
    }

    pub fn scheduler_phase(&self, game_id: &str) -> SimResult<SchedulerPhase> {
        Ok(self.runtime(game_id)?.scheduler.phase())
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn game_ids(&self) -> Vec<GameId> {
        self.games.read().keys().cloned().collect()
    }

    pub fn game(&self, game_id: &str) -> SimResult<Game> {
        Ok(self.runtime(game_id)?.game.read().clone())
    }

    pub fn latest_state(&self, game_id: &str) -> SimResult<Arc<WorldState>> {
        Ok(Arc::clone(&self.runtime(game_id)?.latest.read()))
    }

    /// Historical snapshot, read back (and hash-checked) from the store.
    pub fn state_at(&self, game_id: &str, tick: Tick) -> SimResult<Option<WorldState>> {
        self.runtime(game_id)?;
        self.store.read(game_id, tick)
    }

    pub fn ruleset(&self, game_id: &str) -> SimResult<Arc<Ruleset>> {
        Ok(Arc::clone(&self.runtime(game_id)?.ruleset))
    }

    fn runtime(&self, game_id: &str) -> SimResult<Arc<GameRuntime>> {
        self.games
            .read()
            .get(game_id)
            .cloned()
            .ok_or_else(|| SimError::UnknownGame(game_id.to_string()))
    }

    fn ruleset_for(&self, config: &GameConfig) -> SimResult<Arc<Ruleset>> {
        self.content.ruleset(&config.ruleset_version).ok_or_else(|| {
            SimError::Other(anyhow::anyhow!("unknown ruleset version '{}'", config.ruleset_version))
        })
    }
}
