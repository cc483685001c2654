//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The scheduler and engine call store methods; they never execute SQL
//! directly.

use crate::{
    command::CommandRecord,
    error::{SimError, SimResult},
    event::EventLogEntry,
    game::Game,
    snapshot::SnapshotStore,
    types::{CommandId, Tick},
    world::WorldState,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

mod audit;
mod chain;

pub struct GameStore {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl GameStore {
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> SimResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn
            .lock()
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Game ───────────────────────────────────────────────────

    fn insert_game(conn: &Connection, game: &Game) -> SimResult<()> {
        conn.execute(
            "INSERT INTO game (game_id, name, seed, status, game_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                game.game_id,
                game.name,
                game.seed as i64,
                game.status.as_str(),
                serde_json::to_string(game)?,
                game.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl SnapshotStore for GameStore {
    fn register_game(&self, game: &Game, genesis: &WorldState) -> SimResult<()> {
        if genesis.tick != 0 {
            return Err(SimError::SequenceConflict {
                game_id: game.game_id.clone(),
                expected: 0,
                actual: genesis.tick,
            });
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM game WHERE game_id = ?1)",
            params![game.game_id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(SimError::GameExists(game.game_id.clone()));
        }
        Self::insert_game(&tx, game)?;
        chain::insert_state(&tx, genesis)?;
        tx.commit()?;
        log::info!("registered game {} ({})", game.game_id, game.name);
        Ok(())
    }

    fn save_game(&self, game: &Game) -> SimResult<()> {
        let updated = self.conn.lock().execute(
            "UPDATE game SET status = ?2, game_json = ?3 WHERE game_id = ?1",
            params![game.game_id, game.status.as_str(), serde_json::to_string(game)?],
        )?;
        if updated == 0 {
            return Err(SimError::UnknownGame(game.game_id.clone()));
        }
        Ok(())
    }

    fn games(&self) -> SimResult<Vec<Game>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT game_json FROM game ORDER BY game_id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| Ok(serde_json::from_str(json)?))
            .collect()
    }

    fn commit(&self, state: &WorldState, records: &[CommandRecord]) -> SimResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let latest = chain::latest_tick(&tx, &state.game_id)?
            .ok_or_else(|| SimError::UnknownGame(state.game_id.clone()))?;
        if state.tick != latest + 1 {
            return Err(SimError::SequenceConflict {
                game_id: state.game_id.clone(),
                expected: latest + 1,
                actual: state.tick,
            });
        }
        chain::insert_state(&tx, state)?;
        audit::insert_records(&tx, records)?;
        tx.commit()?;
        Ok(())
    }

    fn read(&self, game_id: &str, tick: Tick) -> SimResult<Option<WorldState>> {
        chain::read_state(&self.conn.lock(), game_id, Some(tick))
    }

    fn read_latest(&self, game_id: &str) -> SimResult<Option<WorldState>> {
        chain::read_state(&self.conn.lock(), game_id, None)
    }

    fn latest_tick(&self, game_id: &str) -> SimResult<Option<Tick>> {
        chain::latest_tick(&self.conn.lock(), game_id)
    }

    fn append_audit(&self, records: &[CommandRecord]) -> SimResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        audit::insert_records(&tx, records)?;
        tx.commit()?;
        Ok(())
    }

    fn audit_for_tick(&self, game_id: &str, tick: Tick) -> SimResult<Vec<CommandRecord>> {
        audit::records_for_tick(&self.conn.lock(), game_id, tick)
    }

    fn command_log(&self, game_id: &str) -> SimResult<Vec<CommandRecord>> {
        audit::command_log(&self.conn.lock(), game_id)
    }

    fn events_for_tick(&self, game_id: &str, tick: Tick) -> SimResult<Vec<EventLogEntry>> {
        chain::events_for_tick(&self.conn.lock(), game_id, tick)
    }

    fn chain(&self, game_id: &str) -> SimResult<Vec<(Tick, String)>> {
        chain::chain_heads(&self.conn.lock(), game_id)
    }

    fn max_command_id(&self, game_id: &str) -> SimResult<CommandId> {
        audit::max_command_id(&self.conn.lock(), game_id)
    }
}
