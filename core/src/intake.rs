//! The submission boundary: the only way player intent enters the core.
//!
//! Intake checks what can be known at submission time (game state, seat,
//! ruleset, control of the referenced unit, deadlines, duplicates) and hands
//! the command to the queue. Affordability and reachability are left to the
//! validator, which sees the resolution base state.

use crate::{
    command::{CommandRecord, CommandStatus, PlayerCommand, QueuedCommand, Submission},
    content::Ruleset,
    error::{Rejection, ValidationFailure},
    game::Game,
    queue::{CommandQueue, Refused},
    types::{CommandId, PlayerId, Tick},
    world::WorldState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Answer returned to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted {
        command_id: CommandId,
        target_tick: Tick,
        superseded: Option<CommandId>,
    },
    Rejected {
        command_id: CommandId,
        reason: Rejection,
    },
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn command_id(&self) -> CommandId {
        match self {
            Self::Accepted { command_id, .. } | Self::Rejected { command_id, .. } => *command_id,
        }
    }
}

/// Outcome plus the audit records the caller must persist.
#[derive(Debug)]
pub struct Admission {
    pub outcome: SubmitOutcome,
    pub audit: Vec<CommandRecord>,
}

/// Everything intake needs to judge one submission.
pub struct Intake<'a> {
    pub game: &'a Game,
    /// Latest committed snapshot.
    pub latest: &'a WorldState,
    pub ruleset: &'a Ruleset,
    pub queue: &'a CommandQueue,
    pub now: DateTime<Utc>,
}

impl Intake<'_> {
    /// Earliest tick whose intake has not frozen yet.
    pub fn default_target(&self) -> Tick {
        (self.latest.tick + 1).max(self.queue.frozen_through() + 1)
    }

    pub fn submit(&self, player_id: PlayerId, submission: Submission) -> Admission {
        let target_tick = submission.target_tick.unwrap_or_else(|| self.default_target());

        if let Err(reason) = self.precheck(player_id, &submission.command, target_tick) {
            let command_id = self.queue.allocate_id();
            return self.refuse(player_id, submission.command, target_tick, command_id, reason);
        }

        let supersede = submission.supersede && self.game.config.allow_supersede;
        match self.queue.admit(
            player_id,
            submission.command.clone(),
            target_tick,
            self.now,
            supersede,
        ) {
            Ok(admitted) => {
                log::debug!(
                    "game {}: accepted command {} ({}) from player {player_id} for tick {target_tick}",
                    self.game.game_id,
                    admitted.command_id,
                    submission.command.kind_name()
                );
                let mut audit = Vec::new();
                let superseded = admitted.superseded.map(|old| {
                    let old_id = old.command_id;
                    audit.push(CommandRecord::refused(
                        target_tick,
                        old,
                        Rejection::Superseded { by: admitted.command_id },
                    ));
                    old_id
                });
                Admission {
                    outcome: SubmitOutcome::Accepted {
                        command_id: admitted.command_id,
                        target_tick,
                        superseded,
                    },
                    audit,
                }
            }
            Err(Refused { command_id, reason }) => {
                self.refuse(player_id, submission.command, target_tick, command_id, reason)
            }
        }
    }

    fn precheck(
        &self,
        player_id: PlayerId,
        command: &PlayerCommand,
        target_tick: Tick,
    ) -> Result<(), Rejection> {
        if !self.game.accepts_commands() {
            return Err(Rejection::GameNotActive);
        }
        if !self
            .latest
            .player(player_id)
            .is_some_and(|p| p.active)
        {
            return Err(Rejection::UnknownPlayer { player_id });
        }
        if !self.ruleset.allows(command.kind_name()) {
            return Err(Rejection::KindNotAllowed {
                kind: command.kind_name().to_string(),
                ruleset: self.ruleset.version.clone(),
            });
        }

        // Horizon first: a far target may have no representable deadline.
        let horizon = (self.latest.tick + 1).saturating_add(self.game.config.max_lead_ticks);
        if target_tick > horizon {
            return Err(Rejection::TargetTooFar { target_tick, horizon });
        }
        if target_tick <= self.latest.tick || self.game.clock.is_due(target_tick, self.now) {
            return Err(Rejection::LateSubmission { target_tick });
        }

        if let Some(unit_id) = command.unit_id() {
            let unit = self
                .latest
                .unit(unit_id)
                .ok_or(ValidationFailure::UnitMissing { unit_id })?;
            if unit.owner != player_id {
                return Err(ValidationFailure::NotOwner { unit_id, player_id }.into());
            }
        }
        if let PlayerCommand::Diplomacy { with, .. } = command {
            if *with == player_id || self.latest.player(*with).is_none() {
                return Err(ValidationFailure::InvalidCounterparty { other: *with }.into());
            }
        }
        Ok(())
    }

    fn refuse(
        &self,
        player_id: PlayerId,
        command: PlayerCommand,
        target_tick: Tick,
        command_id: CommandId,
        reason: Rejection,
    ) -> Admission {
        log::warn!(
            "game {}: rejected {} from player {player_id} for tick {target_tick}: {reason}",
            self.game.game_id,
            command.kind_name()
        );
        let queued = QueuedCommand {
            game_id: self.game.game_id.clone(),
            command_id,
            player_id,
            submitted_at: self.now,
            target_tick,
            status: CommandStatus::Pending,
            command,
        };
        Admission {
            outcome: SubmitOutcome::Rejected {
                command_id,
                reason: reason.clone(),
            },
            audit: vec![CommandRecord::refused(target_tick, queued, reason)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EngineConfig,
        content::{ContentService, StaticContent},
        game::GameStatus,
        genesis,
        hex::HexCoord,
    };
    use chrono::{Duration, TimeZone};

    struct Fixture {
        game: Game,
        world: WorldState,
        ruleset: std::sync::Arc<Ruleset>,
        queue: CommandQueue,
    }

    fn fixture() -> Fixture {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut game = Game::new(
            "intake".into(),
            "Intake",
            11,
            EngineConfig::default_test().game_defaults,
            start,
        );
        game.status = GameStatus::Active;
        let ruleset = StaticContent::default_test().ruleset("v1").unwrap();
        let seats: [(PlayerId, String); 2] = [(1, "red".into()), (2, "blue".into())];
        let world = genesis::generate(&game, &seats, &ruleset).unwrap();
        Fixture {
            queue: CommandQueue::new(game.game_id.clone()),
            game,
            world,
            ruleset,
        }
    }

    fn research(tech: &str) -> Submission {
        Submission::new(PlayerCommand::Research { tech: tech.into() })
    }

    fn unit_of(world: &WorldState, player: PlayerId) -> u64 {
        world.units.values().find(|u| u.owner == player).unwrap().id
    }

    #[test]
    fn accepts_owned_unit_order_for_next_tick() {
        let f = fixture();
        let intake = Intake {
            game: &f.game,
            latest: &f.world,
            ruleset: &f.ruleset,
            queue: &f.queue,
            now: f.game.clock.started_at + Duration::minutes(1),
        };
        let unit_id = unit_of(&f.world, 1);
        let admission = intake.submit(
            1,
            Submission::new(PlayerCommand::Move {
                unit_id,
                to: HexCoord::new(0, 0),
            }),
        );
        match admission.outcome {
            SubmitOutcome::Accepted { target_tick, .. } => assert_eq!(target_tick, 1),
            other => panic!("expected acceptance, got {other:?}"),
        }
        assert!(admission.audit.is_empty());
        assert_eq!(f.queue.pending(1).len(), 1);
    }

    #[test]
    fn rejects_foreign_unit_and_audits_it() {
        let f = fixture();
        let intake = Intake {
            game: &f.game,
            latest: &f.world,
            ruleset: &f.ruleset,
            queue: &f.queue,
            now: f.game.clock.started_at,
        };
        let foreign = unit_of(&f.world, 2);
        let admission = intake.submit(
            1,
            Submission::new(PlayerCommand::Build {
                unit_id: foreign,
                structure: "farm".into(),
            }),
        );
        assert!(!admission.outcome.is_accepted());
        assert_eq!(admission.audit.len(), 1);
        assert_eq!(admission.audit[0].command.status, CommandStatus::Rejected);
        assert!(f.queue.is_empty());
    }

    #[test]
    fn submission_past_deadline_is_late() {
        let f = fixture();
        let intake = Intake {
            game: &f.game,
            latest: &f.world,
            ruleset: &f.ruleset,
            queue: &f.queue,
            now: f.game.clock.freeze_deadline(1).unwrap(),
        };
        let admission = intake.submit(1, research("agriculture"));
        assert_eq!(
            admission.outcome,
            SubmitOutcome::Rejected {
                command_id: admission.outcome.command_id(),
                reason: Rejection::LateSubmission { target_tick: 1 },
            }
        );
    }

    #[test]
    fn horizon_and_inactive_game_are_enforced() {
        let mut f = fixture();
        let now = f.game.clock.started_at;
        let far = f.world.tick + 2 + f.game.config.max_lead_ticks;
        {
            let intake = Intake {
            game: &f.game,
            latest: &f.world,
            ruleset: &f.ruleset,
            queue: &f.queue,
            now,
        };
            let admission = intake.submit(1, research("agriculture").for_tick(far));
            assert!(matches!(
                admission.outcome,
                SubmitOutcome::Rejected { reason: Rejection::TargetTooFar { .. }, .. }
            ));
        }
        f.game.status = GameStatus::Paused;
        let intake = Intake {
            game: &f.game,
            latest: &f.world,
            ruleset: &f.ruleset,
            queue: &f.queue,
            now,
        };
        let admission = intake.submit(1, research("agriculture"));
        assert!(matches!(
            admission.outcome,
            SubmitOutcome::Rejected { reason: Rejection::GameNotActive, .. }
        ));
    }

    #[test]
    fn supersede_records_the_replaced_order() {
        let f = fixture();
        let intake = Intake {
            game: &f.game,
            latest: &f.world,
            ruleset: &f.ruleset,
            queue: &f.queue,
            now: f.game.clock.started_at,
        };
        let first = intake.submit(1, research("agriculture"));
        let second = intake.submit(1, research("bronze_working").superseding());
        match second.outcome {
            SubmitOutcome::Accepted { superseded, .. } => {
                assert_eq!(superseded, Some(first.outcome.command_id()))
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
        assert_eq!(second.audit.len(), 1);
        assert_eq!(
            second.audit[0].rejection,
            Some(Rejection::Superseded {
                by: second.outcome.command_id()
            })
        );
    }
}
