//! Per-game tick scheduler.
//!
//! CYCLE (one per tick, never overlapping within a game):
//!   IntakeOpen -> IntakeFrozen -> Validating -> Resolving -> Committing
//!   -> Notifying -> IntakeOpen
//!
//! RULES:
//!   - One cycle in flight per game; the gate mutex is the single writer.
//!   - Validate, arbitrate and resolve must finish inside the tick budget,
//!     or the tick aborts with nothing committed.
//!   - A sequence conflict on commit reloads the latest snapshot and reruns
//!     the cycle, up to `max_commit_retries` times.
//!   - An aborted tick returns its frozen commands to the queue. Tick-fatal
//!     errors also halt the scheduler until an operator calls `resume`.
//!   - Notification runs after the commit. Its failure never undoes it.

use crate::{
    arbiter,
    command::QueuedCommand,
    content::Ruleset,
    error::{SimError, SimResult},
    game::Game,
    notify::{Notifier, TickNotice},
    passive::PassiveRules,
    queue::CommandQueue,
    resolver::{self, Resolution},
    snapshot::SnapshotStore,
    types::{GameId, Tick},
    validator,
    world::WorldState,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    /// Game not started, paused or finished.
    Idle,
    IntakeOpen,
    IntakeFrozen,
    Validating,
    Resolving,
    Committing,
    Notifying,
    Halted,
}

/// Summary of one committed tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: Tick,
    pub content_hash: String,
    pub applied: usize,
    pub rejected: usize,
    pub events: usize,
    /// Commit attempts used, 1 when there was no conflict.
    pub attempts: u32,
    pub state: Arc<WorldState>,
}

/// Borrowed collaborators for one cycle.
pub struct Cycle<'a> {
    pub game: &'a Game,
    pub ruleset: &'a Ruleset,
    pub rules: &'a PassiveRules,
    pub queue: &'a CommandQueue,
    pub store: &'a dyn SnapshotStore,
    pub notifier: &'a dyn Notifier,
}

#[derive(Debug)]
struct Status {
    phase: SchedulerPhase,
    halt_reason: Option<String>,
}

#[derive(Debug)]
pub struct TickScheduler {
    game_id: GameId,
    budget: Duration,
    gate: Mutex<()>,
    status: Mutex<Status>,
}

impl TickScheduler {
    pub fn new(game_id: GameId, tick_budget_ms: u64) -> Self {
        Self {
            game_id,
            budget: Duration::from_millis(tick_budget_ms),
            gate: Mutex::new(()),
            status: Mutex::new(Status {
                phase: SchedulerPhase::Idle,
                halt_reason: None,
            }),
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.status.lock().phase
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.status.lock().halt_reason.clone()
    }

    pub fn is_halted(&self) -> bool {
        self.phase() == SchedulerPhase::Halted
    }

    /// Open intake. No-op while halted.
    pub fn open(&self) {
        let mut status = self.status.lock();
        if status.phase != SchedulerPhase::Halted {
            status.phase = SchedulerPhase::IntakeOpen;
        }
    }

    /// Stop scheduling without halting (game paused or finished).
    pub fn idle(&self) {
        let mut status = self.status.lock();
        if status.phase != SchedulerPhase::Halted {
            status.phase = SchedulerPhase::Idle;
        }
    }

    /// Operator action: clear a halt and reopen intake.
    pub fn resume(&self) {
        let _gate = self.gate.lock();
        let mut status = self.status.lock();
        if status.phase == SchedulerPhase::Halted {
            log::info!(
                "scheduler {}: resumed after halt ({})",
                self.game_id,
                status.halt_reason.as_deref().unwrap_or("no reason")
            );
        }
        status.phase = SchedulerPhase::IntakeOpen;
        status.halt_reason = None;
    }

    fn enter(&self, phase: SchedulerPhase) {
        self.status.lock().phase = phase;
    }

    fn halt(&self, reason: &SimError) {
        let mut status = self.status.lock();
        status.phase = SchedulerPhase::Halted;
        status.halt_reason = Some(reason.to_string());
    }

    /// Run one resolution cycle.
    ///
    /// With `due_at = Some(now)` the cycle only runs if the next tick's
    /// freeze deadline has passed, and returns `Ok(None)` otherwise. With
    /// `None` the next tick is forced.
    pub fn run(&self, cycle: Cycle<'_>, due_at: Option<DateTime<Utc>>) -> SimResult<Option<TickReport>> {
        let _gate = self.gate.lock();
        if self.is_halted() {
            return Err(SimError::SchedulerHalted(self.game_id.clone()));
        }

        let mut base = cycle
            .store
            .read_latest(&self.game_id)?
            .ok_or_else(|| SimError::UnknownGame(self.game_id.clone()))?;
        let mut tick = base.tick + 1;
        if let Some(now) = due_at {
            if !cycle.game.clock.is_due(tick, now) {
                return Ok(None);
            }
        }

        self.enter(SchedulerPhase::IntakeFrozen);
        let mut frozen = cycle.queue.freeze(tick);
        log::debug!("scheduler {}: froze {} commands for tick {tick}", self.game_id, frozen.len());

        let max_attempts = cycle.game.config.max_commit_retries.max(1);
        let mut attempts = 0;
        let resolution = loop {
            attempts += 1;
            let outcome = self
                .resolve_within_budget(&cycle, &base, frozen.clone())
                .and_then(|resolution| {
                    self.enter(SchedulerPhase::Committing);
                    cycle.store.commit(&resolution.state, &resolution.records)?;
                    Ok(resolution)
                });
            match outcome {
                Ok(resolution) => break resolution,
                Err(SimError::SequenceConflict { expected, actual, .. }) if attempts < max_attempts => {
                    log::warn!(
                        "scheduler {}: sequence conflict committing tick {actual} (store expects {expected}), attempt {attempts}/{max_attempts}",
                        self.game_id
                    );
                    base = match cycle.store.read_latest(&self.game_id) {
                        Ok(Some(latest)) => latest,
                        Ok(None) => return Err(self.abort(&cycle, tick, frozen, SimError::UnknownGame(self.game_id.clone()))),
                        Err(e) => return Err(self.abort(&cycle, tick, frozen, e)),
                    };
                    if base.tick + 1 != tick {
                        tick = base.tick + 1;
                        frozen.extend(cycle.queue.freeze(tick));
                        frozen.sort_by_key(|c| c.command_id);
                    }
                }
                Err(SimError::SequenceConflict { .. }) => {
                    log::error!(
                        "scheduler {}: commit of tick {tick} failed after {attempts} attempts",
                        self.game_id
                    );
                    let exhausted = SimError::RetriesExhausted {
                        game_id: self.game_id.clone(),
                        attempts,
                    };
                    return Err(self.abort(&cycle, tick, frozen, exhausted));
                }
                Err(e) => return Err(self.abort(&cycle, tick, frozen, e)),
            }
        };

        let state = Arc::new(resolution.state);
        let rejected = resolution
            .records
            .iter()
            .filter(|r| r.rejection.is_some())
            .count();
        log::info!(
            "game {}: committed tick {} ({} applied, {rejected} rejected, {} events)",
            self.game_id,
            state.tick,
            resolution.records.len() - rejected,
            state.events.len()
        );

        self.enter(SchedulerPhase::Notifying);
        if let Err(e) = cycle.notifier.publish(&TickNotice::from_state(&state)) {
            log::warn!("game {}: notification for tick {} failed: {e:#}", self.game_id, state.tick);
        }
        self.enter(SchedulerPhase::IntakeOpen);

        Ok(Some(TickReport {
            tick: state.tick,
            content_hash: state.content_hash.clone(),
            applied: resolution.records.len() - rejected,
            rejected,
            events: state.events.len(),
            attempts,
            state,
        }))
    }

    /// Validate, arbitrate and resolve against the tick budget. The budget
    /// is checked at phase boundaries only: a phase that stalls is not
    /// interrupted, its overrun is reported once it returns and the result
    /// is discarded.
    fn resolve_within_budget(
        &self,
        cycle: &Cycle<'_>,
        base: &WorldState,
        frozen: Vec<QueuedCommand>,
    ) -> SimResult<Resolution> {
        let tick = base.tick + 1;
        let started = Instant::now();

        self.enter(SchedulerPhase::Validating);
        let validation = validator::validate_all(base, cycle.ruleset, frozen);
        let mut arbitration = arbiter::arbitrate(base, cycle.ruleset, validation.valid);
        arbitration.rejected.extend(validation.rejected);
        self.check_budget(tick, started)?;

        self.enter(SchedulerPhase::Resolving);
        let resolution = resolver::resolve(base, cycle.ruleset, &cycle.game.config, cycle.rules, arbitration)?;
        self.check_budget(tick, started)?;
        Ok(resolution)
    }

    fn check_budget(&self, tick: Tick, started: Instant) -> SimResult<()> {
        let elapsed = started.elapsed();
        if elapsed > self.budget {
            return Err(SimError::TickBudgetExceeded {
                tick,
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                budget_ms: u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX),
            });
        }
        Ok(())
    }

    /// Put the frozen batch back. Tick-fatal errors also halt the
    /// scheduler; anything else reopens intake so the next cycle retries.
    fn abort(&self, cycle: &Cycle<'_>, tick: Tick, frozen: Vec<QueuedCommand>, error: SimError) -> SimError {
        log::error!(
            "scheduler {}: tick {tick} aborted, {} commands returned to the queue: {error}",
            self.game_id,
            frozen.len()
        );
        cycle.queue.restore(tick, frozen);
        if error.is_tick_fatal() {
            self.halt(&error);
        } else {
            self.enter(SchedulerPhase::IntakeOpen);
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EngineConfig,
        content::{ContentService, StaticContent},
        genesis,
        notify::EventFeed,
        snapshot::MemorySnapshotStore,
    };
    use chrono::TimeZone;

    fn fixture() -> (Game, Arc<Ruleset>, MemorySnapshotStore) {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let mut game = Game::new("sched".into(), "Sched", 9, EngineConfig::default_test().game_defaults, start);
        game.status = crate::game::GameStatus::Active;
        let ruleset = StaticContent::default_test().ruleset("v1").unwrap();
        let genesis = genesis::generate(&game, &[(1, "red".into())], &ruleset).unwrap();
        let store = MemorySnapshotStore::new();
        store.register_game(&game, &genesis).unwrap();
        (game, ruleset, store)
    }

    #[test]
    fn waits_for_deadline_when_not_forced() {
        let (game, ruleset, store) = fixture();
        let queue = CommandQueue::new(game.game_id.clone());
        let feed = EventFeed::new();
        let rules = PassiveRules::standard();
        let scheduler = TickScheduler::new(game.game_id.clone(), game.config.tick_budget_ms);
        let cycle = || Cycle {
            game: &game,
            ruleset: &ruleset,
            rules: &rules,
            queue: &queue,
            store: &store,
            notifier: &feed,
        };

        let early = game.clock.freeze_deadline(1).unwrap() - chrono::Duration::seconds(1);
        assert!(scheduler.run(cycle(), Some(early)).unwrap().is_none());
        let report = scheduler
            .run(cycle(), game.clock.freeze_deadline(1))
            .unwrap()
            .expect("tick 1 is due");
        assert_eq!(report.tick, 1);
        assert_eq!(feed.latest_tick("sched"), Some(1));
        assert_eq!(scheduler.phase(), SchedulerPhase::IntakeOpen);
    }
}
