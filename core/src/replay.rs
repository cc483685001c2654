//! Chain replay.
//!
//! Re-resolves committed ticks from their stored base snapshot and the
//! audited resolution input, and compares content hashes. A healthy chain
//! replays to the same hash at every tick.

use crate::{
    command::{CommandStatus, QueuedCommand},
    config::GameConfig,
    content::Ruleset,
    error::{SimError, SimResult},
    passive::PassiveRules,
    resolver,
    snapshot::SnapshotStore,
    types::Tick,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayMismatch {
    pub tick: Tick,
    pub stored_hash: String,
    pub replayed_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub ticks_checked: u64,
    pub mismatches: Vec<ReplayMismatch>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// The frozen batch that produced `tick`, reconstructed from the audit log.
pub fn resolution_input(store: &dyn SnapshotStore, game_id: &str, tick: Tick) -> SimResult<Vec<QueuedCommand>> {
    Ok(store
        .audit_for_tick(game_id, tick)?
        .into_iter()
        .filter(|r| r.was_resolution_input())
        .map(|r| QueuedCommand {
            status: CommandStatus::Pending,
            ..r.command
        })
        .collect())
}

/// Replay one tick. Returns the replayed hash.
pub fn replay_tick(
    store: &dyn SnapshotStore,
    game_id: &str,
    tick: Tick,
    ruleset: &Ruleset,
    config: &GameConfig,
    rules: &PassiveRules,
) -> SimResult<String> {
    let missing = || SimError::Other(anyhow::anyhow!("game {game_id} has no snapshot for tick {tick}"));
    if tick == 0 {
        return Err(missing());
    }
    let base = store.read(game_id, tick - 1)?.ok_or_else(missing)?;
    let frozen = resolution_input(store, game_id, tick)?;
    let resolution = resolver::resolve_tick(&base, ruleset, config, rules, frozen)?;
    Ok(resolution.state.content_hash)
}

/// Replay every committed tick in `1..=through` (default: latest).
pub fn replay_chain(
    store: &dyn SnapshotStore,
    game_id: &str,
    ruleset: &Ruleset,
    config: &GameConfig,
    rules: &PassiveRules,
    through: Option<Tick>,
) -> SimResult<ReplayReport> {
    let latest = store
        .latest_tick(game_id)?
        .ok_or_else(|| SimError::UnknownGame(game_id.to_string()))?;
    let through = through.map_or(latest, |t| t.min(latest));

    let mut report = ReplayReport::default();
    for tick in 1..=through {
        let stored = store
            .read(game_id, tick)?
            .ok_or_else(|| SimError::Other(anyhow::anyhow!("game {game_id} is missing tick {tick}")))?;
        let replayed = replay_tick(store, game_id, tick, ruleset, config, rules)?;
        report.ticks_checked += 1;
        if replayed != stored.content_hash {
            log::error!(
                "replay of {game_id}@{tick} diverged: stored {} replayed {replayed}",
                stored.content_hash
            );
            report.mismatches.push(ReplayMismatch {
                tick,
                stored_hash: stored.content_hash,
                replayed_hash: replayed,
            });
        }
    }
    log::info!(
        "replayed {} ticks of {game_id}: {} mismatches",
        report.ticks_checked,
        report.mismatches.len()
    );
    Ok(report)
}
