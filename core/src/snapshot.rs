//! Snapshot persistence contract.
//!
//! A game's snapshots form one linear chain: tick 0 (genesis), 1, 2, ...
//! `commit` only succeeds for `latest + 1`, and writes the state, its
//! events and its command audit together or not at all.
//!
//! Two implementations: [`crate::store::GameStore`] (SQLite) and
//! [`MemorySnapshotStore`] for tests and tooling.

use crate::{
    command::CommandRecord,
    error::{SimError, SimResult},
    event::EventLogEntry,
    game::Game,
    types::{CommandId, GameId, Tick},
    world::WorldState,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;

pub trait SnapshotStore: Send + Sync {
    /// Record a new game together with its sealed genesis snapshot.
    fn register_game(&self, game: &Game, genesis: &WorldState) -> SimResult<()>;

    /// Overwrite the stored game record (status changes).
    fn save_game(&self, game: &Game) -> SimResult<()>;

    fn games(&self) -> SimResult<Vec<Game>>;

    /// Atomically append `state` to its game's chain, with the audit
    /// records of the commands resolved into it.
    ///
    /// Fails with `SequenceConflict` unless `state.tick == latest + 1`.
    fn commit(&self, state: &WorldState, records: &[CommandRecord]) -> SimResult<()>;

    fn read(&self, game_id: &str, tick: Tick) -> SimResult<Option<WorldState>>;

    fn read_latest(&self, game_id: &str) -> SimResult<Option<WorldState>>;

    fn latest_tick(&self, game_id: &str) -> SimResult<Option<Tick>>;

    /// Audit records written outside a commit (intake rejections,
    /// withdrawals).
    fn append_audit(&self, records: &[CommandRecord]) -> SimResult<()>;

    /// Every audit record filed under `tick`, ordered by command id.
    fn audit_for_tick(&self, game_id: &str, tick: Tick) -> SimResult<Vec<CommandRecord>>;

    /// Every audit record of the game, by tick then command id.
    fn command_log(&self, game_id: &str) -> SimResult<Vec<CommandRecord>>;

    fn events_for_tick(&self, game_id: &str, tick: Tick) -> SimResult<Vec<EventLogEntry>>;

    /// (tick, content_hash) of every stored snapshot, genesis first.
    fn chain(&self, game_id: &str) -> SimResult<Vec<(Tick, String)>>;

    /// Highest command id ever audited for the game, 0 if none.
    fn max_command_id(&self, game_id: &str) -> SimResult<CommandId>;
}

/// Reject states whose content no longer matches their hash.
pub fn verified(state: WorldState) -> SimResult<WorldState> {
    if state.verify_hash()? {
        Ok(state)
    } else {
        Err(SimError::IntegrityViolation {
            game_id: state.game_id.clone(),
            tick: state.tick,
        })
    }
}

/// Event log rows for a sealed state.
pub fn event_entries(state: &WorldState) -> SimResult<Vec<EventLogEntry>> {
    state
        .events
        .iter()
        .map(|e| {
            Ok(EventLogEntry {
                id: None,
                game_id: state.game_id.clone(),
                tick: e.tick,
                seq: e.seq,
                source: e.source.clone(),
                event_type: e.event.type_name().to_string(),
                payload: serde_json::to_string(&e.event)?,
            })
        })
        .collect()
}

#[derive(Debug, Default)]
struct Chain {
    game: Option<Game>,
    states: Vec<WorldState>,
    audit: BTreeMap<(Tick, CommandId), CommandRecord>,
}

/// In-process store. States are kept whole; nothing is serialized.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    chains: RwLock<BTreeMap<GameId, Chain>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn register_game(&self, game: &Game, genesis: &WorldState) -> SimResult<()> {
        let mut chains = self.chains.write();
        if chains.contains_key(&game.game_id) {
            return Err(SimError::GameExists(game.game_id.clone()));
        }
        if genesis.tick != 0 {
            return Err(SimError::SequenceConflict {
                game_id: game.game_id.clone(),
                expected: 0,
                actual: genesis.tick,
            });
        }
        chains.insert(
            game.game_id.clone(),
            Chain {
                game: Some(game.clone()),
                states: vec![genesis.clone()],
                audit: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn save_game(&self, game: &Game) -> SimResult<()> {
        let mut chains = self.chains.write();
        let chain = chains
            .get_mut(&game.game_id)
            .ok_or_else(|| SimError::UnknownGame(game.game_id.clone()))?;
        chain.game = Some(game.clone());
        Ok(())
    }

    fn games(&self) -> SimResult<Vec<Game>> {
        Ok(self.chains.read().values().filter_map(|c| c.game.clone()).collect())
    }

    fn commit(&self, state: &WorldState, records: &[CommandRecord]) -> SimResult<()> {
        let mut chains = self.chains.write();
        let chain = chains
            .get_mut(&state.game_id)
            .ok_or_else(|| SimError::UnknownGame(state.game_id.clone()))?;
        let latest = chain.states.last().map_or(0, |s| s.tick);
        if state.tick != latest + 1 {
            return Err(SimError::SequenceConflict {
                game_id: state.game_id.clone(),
                expected: latest + 1,
                actual: state.tick,
            });
        }
        chain.states.push(state.clone());
        for record in records {
            chain
                .audit
                .insert((record.tick, record.command.command_id), record.clone());
        }
        Ok(())
    }

    fn read(&self, game_id: &str, tick: Tick) -> SimResult<Option<WorldState>> {
        let state = self
            .chains
            .read()
            .get(game_id)
            .and_then(|c| c.states.get(usize::try_from(tick).ok()?).cloned());
        state.map(verified).transpose()
    }

    fn read_latest(&self, game_id: &str) -> SimResult<Option<WorldState>> {
        let state = self
            .chains
            .read()
            .get(game_id)
            .and_then(|c| c.states.last().cloned());
        state.map(verified).transpose()
    }

    fn latest_tick(&self, game_id: &str) -> SimResult<Option<Tick>> {
        Ok(self
            .chains
            .read()
            .get(game_id)
            .and_then(|c| c.states.last().map(|s| s.tick)))
    }

    fn append_audit(&self, records: &[CommandRecord]) -> SimResult<()> {
        let mut chains = self.chains.write();
        for record in records {
            let chain = chains
                .get_mut(&record.command.game_id)
                .ok_or_else(|| SimError::UnknownGame(record.command.game_id.clone()))?;
            chain
                .audit
                .insert((record.tick, record.command.command_id), record.clone());
        }
        Ok(())
    }

    fn audit_for_tick(&self, game_id: &str, tick: Tick) -> SimResult<Vec<CommandRecord>> {
        Ok(self
            .chains
            .read()
            .get(game_id)
            .map(|c| {
                c.audit
                    .range((tick, 0)..=(tick, CommandId::MAX))
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn command_log(&self, game_id: &str) -> SimResult<Vec<CommandRecord>> {
        Ok(self
            .chains
            .read()
            .get(game_id)
            .map(|c| c.audit.values().cloned().collect())
            .unwrap_or_default())
    }

    fn chain(&self, game_id: &str) -> SimResult<Vec<(Tick, String)>> {
        Ok(self
            .chains
            .read()
            .get(game_id)
            .map(|c| c.states.iter().map(|s| (s.tick, s.content_hash.clone())).collect())
            .unwrap_or_default())
    }

    fn events_for_tick(&self, game_id: &str, tick: Tick) -> SimResult<Vec<EventLogEntry>> {
        match self.read(game_id, tick)? {
            Some(state) => event_entries(&state),
            None => Ok(Vec::new()),
        }
    }

    fn max_command_id(&self, game_id: &str) -> SimResult<CommandId> {
        Ok(self
            .chains
            .read()
            .get(game_id)
            .and_then(|c| c.audit.keys().map(|(_, id)| *id).max())
            .unwrap_or(0))
    }
}
