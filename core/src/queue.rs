//! Per-game pending command queue, bucketed by target tick.
//!
//! All mutation happens under one mutex per game, so concurrent submitters
//! can never lose or interleave each other's appends. Freezing tick T only
//! drains T's bucket; buckets for later ticks keep accepting commands while
//! T resolves.

use crate::{
    command::{CommandStatus, PlayerCommand, QueuedCommand},
    error::Rejection,
    types::{CommandId, GameId, PlayerId, Tick},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug)]
struct QueueInner {
    next_id: CommandId,
    /// Highest tick whose intake is frozen. Submissions at or below it are late.
    frozen_through: Tick,
    buckets: BTreeMap<Tick, Vec<QueuedCommand>>,
}

/// Successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub command_id: CommandId,
    /// Earlier order replaced by this one.
    pub superseded: Option<QueuedCommand>,
}

/// Rejected admission. Rejected submissions still consume a command id so
/// the audit log can key them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refused {
    pub command_id: CommandId,
    pub reason: Rejection,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WithdrawError {
    #[error("command {0} is not pending")]
    NotPending(CommandId),
    #[error("command {0} belongs to another player")]
    NotSubmitter(CommandId),
    #[error("intake for tick {0} is frozen")]
    Frozen(Tick),
}

#[derive(Debug)]
pub struct CommandQueue {
    game_id: GameId,
    inner: Mutex<QueueInner>,
}

impl CommandQueue {
    pub fn new(game_id: GameId) -> Self {
        Self::resume(game_id, 0, 1)
    }

    /// Rebuild queue bookkeeping after a restart: intake is frozen through
    /// `frozen_through` and ids continue from `next_id`.
    pub fn resume(game_id: GameId, frozen_through: Tick, next_id: CommandId) -> Self {
        Self {
            game_id,
            inner: Mutex::new(QueueInner {
                next_id,
                frozen_through,
                buckets: BTreeMap::new(),
            }),
        }
    }

    pub fn frozen_through(&self) -> Tick {
        self.inner.lock().frozen_through
    }

    /// Allocate an id for a submission rejected before reaching the queue.
    pub fn allocate_id(&self) -> CommandId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        id
    }

    /// Append a command to `target_tick`'s bucket with status `pending`.
    ///
    /// Lateness and duplicate checks happen under the same lock as the
    /// append, so two racing submissions for one unit cannot both win.
    pub fn admit(
        &self,
        player_id: PlayerId,
        command: PlayerCommand,
        target_tick: Tick,
        submitted_at: DateTime<Utc>,
        supersede: bool,
    ) -> Result<Admitted, Refused> {
        let mut inner = self.inner.lock();
        let command_id = inner.next_id;
        inner.next_id += 1;

        if target_tick <= inner.frozen_through {
            return Err(Refused {
                command_id,
                reason: Rejection::LateSubmission { target_tick },
            });
        }

        let bucket = inner.buckets.entry(target_tick).or_default();
        let conflict = bucket.iter().position(|queued| {
            queued.player_id == player_id && conflicts(&queued.command, &command)
        });

        let superseded = match conflict {
            Some(index) if supersede => Some(bucket.remove(index)),
            Some(index) => {
                let existing = &bucket[index];
                let reason = match command.unit_id() {
                    Some(unit_id) => Rejection::DuplicateOrder {
                        unit_id,
                        existing: existing.command_id,
                    },
                    None => Rejection::DuplicateResearch {
                        player_id,
                        existing: existing.command_id,
                    },
                };
                return Err(Refused { command_id, reason });
            }
            None => None,
        };

        bucket.push(QueuedCommand {
            game_id: self.game_id.clone(),
            command_id,
            player_id,
            submitted_at,
            target_tick,
            status: CommandStatus::Pending,
            command,
        });
        Ok(Admitted {
            command_id,
            superseded,
        })
    }

    /// Remove a pending command at its submitter's request. Only allowed
    /// before the target tick freezes.
    pub fn withdraw(
        &self,
        player_id: PlayerId,
        command_id: CommandId,
    ) -> Result<QueuedCommand, WithdrawError> {
        let mut inner = self.inner.lock();
        let frozen_through = inner.frozen_through;
        for (tick, bucket) in inner.buckets.iter_mut() {
            if let Some(index) = bucket.iter().position(|c| c.command_id == command_id) {
                if *tick <= frozen_through {
                    return Err(WithdrawError::Frozen(*tick));
                }
                if bucket[index].player_id != player_id {
                    return Err(WithdrawError::NotSubmitter(command_id));
                }
                return Ok(bucket.remove(index));
            }
        }
        Err(WithdrawError::NotPending(command_id))
    }

    /// Close intake for every tick up to and including `tick` and hand over
    /// the commands queued for them, in command-id order.
    pub fn freeze(&self, tick: Tick) -> Vec<QueuedCommand> {
        let mut inner = self.inner.lock();
        inner.frozen_through = inner.frozen_through.max(tick);
        let later = inner.buckets.split_off(&(tick + 1));
        let drained = std::mem::replace(&mut inner.buckets, later);
        let mut commands: Vec<QueuedCommand> = drained.into_values().flatten().collect();
        commands.sort_by_key(|c| c.command_id);
        commands
    }

    /// Put frozen commands back after an aborted cycle. Intake stays frozen
    /// for their tick; the next cycle picks them up again.
    pub fn restore(&self, tick: Tick, commands: Vec<QueuedCommand>) {
        if commands.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        let bucket = inner.buckets.entry(tick).or_default();
        bucket.extend(commands.into_iter().map(|mut c| {
            c.status = CommandStatus::Pending;
            c
        }));
        bucket.sort_by_key(|c| c.command_id);
    }

    /// Snapshot of what is queued for `tick`.
    pub fn pending(&self, tick: Tick) -> Vec<QueuedCommand> {
        self.inner
            .lock()
            .buckets
            .get(&tick)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Two orders from the same player clash when they address the same unit
/// with incompatible kinds, or are both research orders.
fn conflicts(existing: &PlayerCommand, incoming: &PlayerCommand) -> bool {
    match (existing.unit_id(), incoming.unit_id()) {
        (Some(a), Some(b)) => a == b && !existing.compatible_with(incoming),
        (None, None) => matches!(
            (existing, incoming),
            (PlayerCommand::Research { .. }, PlayerCommand::Research { .. })
        ),
        _ => false,
    }
}
