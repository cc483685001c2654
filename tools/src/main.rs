//! tick-runner: headless driver for the hexworld tick core.
//!
//! Usage:
//!   tick-runner --seed 12345 --ticks 50 --players 2 --db world.db
//!   tick-runner --seed 12345 --ipc-mode

use anyhow::Result;
use hexworld_core::{
    clock::SystemClock,
    command::{PlayerCommand, Submission},
    config::EngineConfig,
    content::StaticContent,
    engine::Engine,
    hex::HexCoord,
    intake::SubmitOutcome,
    notify::EventFeed,
    replay,
    scheduler::TickReport,
    store::GameStore,
    types::{PlayerId, Tick},
    world::WorldState,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Submit {
        player_id: PlayerId,
        submission: Submission,
    },
    Tick {
        #[serde(default = "one")]
        count: u64,
    },
    Quit,
}

fn one() -> u64 {
    1
}

#[derive(serde::Serialize)]
struct PlayerView {
    id: PlayerId,
    name: String,
    score: i64,
    units: usize,
    resources: std::collections::BTreeMap<String, i64>,
}

#[derive(serde::Serialize)]
struct UiState {
    game_id: String,
    tick: Tick,
    content_hash: String,
    phase: String,
    players: Vec<PlayerView>,
    events: Vec<hexworld_core::event::GlobalEvent>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let ticks = parse_arg(&args, "--ticks", 20u64);
    let player_count = parse_arg(&args, "--players", 2usize);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str())
        .unwrap_or("./data");

    if !ipc_mode {
        println!("hexworld tick-runner");
        println!("  seed:      {seed}");
        println!("  ticks:     {ticks}");
        println!("  players:   {player_count}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let db_effective: String = if db == ":memory:" {
        format!("file:hexrun_{}?mode=memory&cache=shared", unix_secs())
    } else {
        db.to_string()
    };
    let store = GameStore::open(&db_effective)?;
    store.migrate()?;

    let config = EngineConfig::load(data_dir)?;
    let content = StaticContent::load(data_dir)?;
    let feed = Arc::new(EventFeed::new());
    let engine = Engine::new(
        config,
        Arc::new(store),
        Arc::new(content),
        Arc::new(SystemClock),
        feed,
    );

    let players: Vec<String> = (1..=player_count).map(|i| format!("player-{i}")).collect();
    let game_id = engine.create_game(&format!("run-{seed}"), seed, &players, None)?;
    engine.start_game(&game_id)?;

    if ipc_mode {
        run_ipc_loop(&engine, &game_id)?;
    } else {
        let mut reports = Vec::new();
        for _ in 0..ticks {
            script_orders(&engine, &game_id)?;
            reports.push(engine.run_tick(&game_id)?);
        }
        print_summary(&engine, &game_id, &reports)?;
    }

    Ok(())
}

fn run_ipc_loop(engine: &Engine, game_id: &str) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        match cmd {
            IpcCommand::Quit => break,
            IpcCommand::GetState => {
                let state = build_ui_state(engine, game_id)?;
                writeln!(stdout, "{}", serde_json::to_string(&state)?)?;
            }
            IpcCommand::Submit { player_id, submission } => {
                let outcome: SubmitOutcome = engine.submit(game_id, player_id, submission)?;
                writeln!(stdout, "{}", serde_json::to_string(&outcome)?)?;
            }
            IpcCommand::Tick { count } => {
                for _ in 0..count {
                    if let Err(e) = engine.run_tick(game_id) {
                        log::error!("tick failed: {e}");
                        writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                        break;
                    }
                }
                let state = build_ui_state(engine, game_id)?;
                writeln!(stdout, "{}", serde_json::to_string(&state)?)?;
            }
        }
        stdout.flush()?;
    }
    Ok(())
}

/// One order per unit: step to a passable neighbour, picked by tick so the
/// armies wander instead of oscillating.
fn script_orders(engine: &Engine, game_id: &str) -> Result<()> {
    let state = engine.latest_state(game_id)?;
    let ruleset = engine.ruleset(game_id)?;
    for unit in state.units.values() {
        let neighbors = unit.position.neighbors();
        let offset = (state.tick + unit.id) as usize;
        let step = (0..neighbors.len())
            .map(|i| neighbors[(offset + i) % neighbors.len()])
            .find(|c| passable(&state, &ruleset, *c));
        let Some(to) = step else { continue };
        let outcome = engine.submit(
            game_id,
            unit.owner,
            Submission::new(PlayerCommand::Move { unit_id: unit.id, to }),
        )?;
        if let SubmitOutcome::Rejected { reason, .. } = outcome {
            log::debug!("scripted move for unit {} refused: {reason}", unit.id);
        }
    }
    Ok(())
}

fn passable(state: &WorldState, ruleset: &hexworld_core::content::Ruleset, coord: HexCoord) -> bool {
    state
        .tile(coord)
        .is_some_and(|t| ruleset.terrain_cost(t.terrain).is_some())
}

fn build_ui_state(engine: &Engine, game_id: &str) -> Result<UiState> {
    let state = engine.latest_state(game_id)?;
    let phase = engine.scheduler_phase(game_id)?;
    Ok(UiState {
        game_id: game_id.to_string(),
        tick: state.tick,
        content_hash: state.content_hash.clone(),
        phase: format!("{phase:?}"),
        players: state
            .players
            .values()
            .map(|p| PlayerView {
                id: p.id,
                name: p.name.clone(),
                score: p.score,
                units: p.units.len(),
                resources: p.resources.clone(),
            })
            .collect(),
        events: state.events.clone(),
    })
}

fn print_summary(engine: &Engine, game_id: &str, reports: &[TickReport]) -> Result<()> {
    let state = engine.latest_state(game_id)?;
    let applied: usize = reports.iter().map(|r| r.applied).sum();
    let rejected: usize = reports.iter().map(|r| r.rejected).sum();
    let events: usize = reports.iter().map(|r| r.events).sum();

    println!("=== RUN SUMMARY ===");
    println!("  game_id:        {game_id}");
    println!("  ticks run:      {}", reports.len());
    println!("  final tick:     {}", state.tick);
    println!("  final hash:     {}", state.content_hash);
    println!("  applied:        {applied}");
    println!("  rejected:       {rejected}");
    println!("  events:         {events}");
    println!("  live units:     {}", state.units.len());

    println!();
    println!("=== PLAYERS ===");
    for p in state.players.values() {
        let gold = p.balance("gold");
        let food = p.balance("food");
        println!(
            "  {:<10} | score {:>4} | units {:>2} | gold {gold:>5} | food {food:>5}",
            p.name,
            p.score,
            p.units.len()
        );
    }

    let game = engine.game(game_id)?;
    let ruleset = engine.ruleset(game_id)?;
    let report = replay::replay_chain(engine.store(), game_id, &ruleset, &game.config, engine.rules(), None)?;
    println!();
    println!(
        "=== REPLAY === {} ticks, {}",
        report.ticks_checked,
        if report.is_clean() { "identical" } else { "DIVERGED" }
    );
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn unix_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
