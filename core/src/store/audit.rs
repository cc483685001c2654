use crate::{command::CommandRecord, error::SimResult, types::{CommandId, Tick}};
use rusqlite::{params, Connection};

// ── Command audit ──────────────────────────────────────────

/// Upsert audit records. A command id filed twice under one tick keeps its
/// latest status.
pub(super) fn insert_records(conn: &Connection, records: &[CommandRecord]) -> SimResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO command_audit (
            game_id, tick, command_id, player_id, kind, status,
            reason_code, resolution_input, record_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(game_id, tick, command_id) DO UPDATE SET
            status = excluded.status,
            reason_code = excluded.reason_code,
            resolution_input = excluded.resolution_input,
            record_json = excluded.record_json",
    )?;
    for record in records {
        let command = &record.command;
        stmt.execute(params![
            command.game_id,
            record.tick as i64,
            command.command_id as i64,
            command.player_id,
            command.command.kind_name(),
            command.status.as_str(),
            record.rejection.as_ref().map(|r| r.code()),
            record.resolution_input,
            serde_json::to_string(record)?,
        ])?;
    }
    Ok(())
}

pub(super) fn records_for_tick(
    conn: &Connection,
    game_id: &str,
    tick: Tick,
) -> SimResult<Vec<CommandRecord>> {
    let mut stmt = conn.prepare(
        "SELECT record_json FROM command_audit
         WHERE game_id = ?1 AND tick = ?2
         ORDER BY command_id ASC",
    )?;
    let rows = stmt
        .query_map(params![game_id, tick as i64], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    decode(&rows)
}

/// Every audit record of the game, by tick then command id.
pub(super) fn command_log(conn: &Connection, game_id: &str) -> SimResult<Vec<CommandRecord>> {
    let mut stmt = conn.prepare(
        "SELECT record_json FROM command_audit
         WHERE game_id = ?1
         ORDER BY tick ASC, command_id ASC",
    )?;
    let rows = stmt
        .query_map(params![game_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    decode(&rows)
}

fn decode(rows: &[String]) -> SimResult<Vec<CommandRecord>> {
    rows.iter()
        .map(|json| Ok(serde_json::from_str(json)?))
        .collect()
}

pub(super) fn max_command_id(conn: &Connection, game_id: &str) -> SimResult<CommandId> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(command_id) FROM command_audit WHERE game_id = ?1",
        params![game_id],
        |row| row.get(0),
    )?;
    Ok(max.map_or(0, |id| id as CommandId))
}
