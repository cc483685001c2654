use crate::{
    error::{SimError, SimResult},
    event::EventLogEntry,
    snapshot::{event_entries, verified},
    types::Tick,
    world::WorldState,
};
use rusqlite::{params, Connection, OptionalExtension};

// ── Snapshot chain ─────────────────────────────────────────

pub(super) fn latest_tick(conn: &Connection, game_id: &str) -> SimResult<Option<Tick>> {
    let tick: Option<i64> = conn.query_row(
        "SELECT MAX(tick) FROM world_state WHERE game_id = ?1",
        params![game_id],
        |row| row.get(0),
    )?;
    Ok(tick.map(|t| t as Tick))
}

/// (tick, content_hash) of every stored snapshot, genesis first.
pub(super) fn chain_heads(conn: &Connection, game_id: &str) -> SimResult<Vec<(Tick, String)>> {
    let mut stmt = conn.prepare(
        "SELECT tick, content_hash FROM world_state WHERE game_id = ?1 ORDER BY tick ASC",
    )?;
    let heads = stmt
        .query_map(params![game_id], |row| {
            Ok((row.get::<_, i64>(0)? as Tick, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(heads)
}

/// Insert a sealed state and its events. Caller owns the transaction.
pub(super) fn insert_state(conn: &Connection, state: &WorldState) -> SimResult<()> {
    conn.execute(
        "INSERT INTO world_state (game_id, tick, content_hash, state_json)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            state.game_id,
            state.tick as i64,
            state.content_hash,
            serde_json::to_string(state)?,
        ],
    )?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO event_log (game_id, tick, seq, source, event_type, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for entry in event_entries(state)? {
        stmt.execute(params![
            entry.game_id,
            entry.tick as i64,
            entry.seq,
            entry.source,
            entry.event_type,
            entry.payload,
        ])?;
    }
    Ok(())
}

/// Read the state at `tick`, or the latest one when `tick` is `None`.
/// The stored hash column, the embedded hash and the recomputed hash must
/// all agree.
pub(super) fn read_state(
    conn: &Connection,
    game_id: &str,
    tick: Option<Tick>,
) -> SimResult<Option<WorldState>> {
    let row: Option<(i64, String, String)> = match tick {
        Some(tick) => conn
            .query_row(
                "SELECT tick, content_hash, state_json FROM world_state
                 WHERE game_id = ?1 AND tick = ?2",
                params![game_id, tick as i64],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT tick, content_hash, state_json FROM world_state
                 WHERE game_id = ?1 ORDER BY tick DESC LIMIT 1",
                params![game_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?,
    };
    let Some((tick, hash, json)) = row else {
        return Ok(None);
    };
    let state: WorldState = serde_json::from_str(&json)?;
    if state.content_hash != hash || state.tick != tick as Tick {
        log::error!("snapshot {game_id}@{tick} does not match its row");
        return Err(SimError::IntegrityViolation {
            game_id: game_id.to_string(),
            tick: tick as Tick,
        });
    }
    verified(state).map(Some)
}

// ── Event log ──────────────────────────────────────────────

pub(super) fn events_for_tick(
    conn: &Connection,
    game_id: &str,
    tick: Tick,
) -> SimResult<Vec<EventLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, game_id, tick, seq, source, event_type, payload
         FROM event_log WHERE game_id = ?1 AND tick = ?2
         ORDER BY seq ASC",
    )?;
    let entries = stmt
        .query_map(params![game_id, tick as i64], |row| {
            Ok(EventLogEntry {
                id: Some(row.get(0)?),
                game_id: row.get(1)?,
                tick: row.get::<_, i64>(2)? as u64,
                seq: row.get(3)?,
                source: row.get(4)?,
                event_type: row.get(5)?,
                payload: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}
