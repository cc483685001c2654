use crate::{
    hex::HexCoord,
    queue::WithdrawError,
    types::{CommandId, GameId, PlayerId, Tick, UnitId},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tick-level and infrastructure failures.
///
/// `SequenceConflict`, `ResolutionFault` and `TickBudgetExceeded` abort the
/// whole tick; nothing is committed when one of them is raised.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sequence conflict in game {game_id}: expected tick {expected}, got {actual}")]
    SequenceConflict {
        game_id: GameId,
        expected: Tick,
        actual: Tick,
    },

    #[error("Resolution fault at tick {tick} in rule '{rule}': {detail}")]
    ResolutionFault {
        tick: Tick,
        rule: &'static str,
        detail: String,
    },

    #[error("Tick {tick} exceeded its budget: {elapsed_ms}ms > {budget_ms}ms")]
    TickBudgetExceeded {
        tick: Tick,
        elapsed_ms: u64,
        budget_ms: u64,
    },

    #[error("Commit for game {game_id} failed after {attempts} attempts")]
    RetriesExhausted { game_id: GameId, attempts: u32 },

    #[error("Integrity violation: snapshot {game_id}@{tick} hash mismatch")]
    IntegrityViolation { game_id: GameId, tick: Tick },

    #[error("Game '{0}' not found")]
    UnknownGame(GameId),

    #[error("Game '{0}' already exists")]
    GameExists(GameId),

    #[error("Game '{0}' is not active")]
    GameNotActive(GameId),

    #[error("Scheduler for game '{0}' is halted and needs operator intervention")]
    SchedulerHalted(GameId),

    #[error("Withdrawal refused: {0}")]
    Withdraw(#[from] WithdrawError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimError {
    /// Tick-level errors abort the whole tick.
    pub fn is_tick_fatal(&self) -> bool {
        matches!(
            self,
            Self::ResolutionFault { .. }
                | Self::TickBudgetExceeded { .. }
                | Self::RetriesExhausted { .. }
        )
    }
}

pub type SimResult<T> = Result<T, SimError>;

/// Why a single command was not applied.
///
/// These never abort a tick: the command is marked rejected, recorded in
/// the audit log, and resolution continues.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Rejection {
    #[error("submitted for tick {target_tick} after its intake froze")]
    LateSubmission { target_tick: Tick },

    #[error("unit {unit_id} already has command {existing} queued for this tick")]
    DuplicateOrder { unit_id: UnitId, existing: CommandId },

    #[error("player {player_id} already has a research order ({existing}) queued")]
    DuplicateResearch { player_id: PlayerId, existing: CommandId },

    #[error("replaced by command {by}")]
    Superseded { by: CommandId },

    #[error("target tick {target_tick} is beyond the intake horizon ({horizon})")]
    TargetTooFar { target_tick: Tick, horizon: Tick },

    #[error("game is not accepting commands")]
    GameNotActive,

    #[error("player {player_id} is not seated in this game")]
    UnknownPlayer { player_id: PlayerId },

    #[error("command kind '{kind}' is not allowed by ruleset {ruleset}")]
    KindNotAllowed { kind: String, ruleset: String },

    #[error("validation failed: {0}")]
    ValidationFailure(ValidationFailure),

    #[error("insufficient {resource}: need {needed}, have {available}")]
    InsufficientResources {
        resource: String,
        needed: i64,
        available: i64,
    },

    #[error("lost contention for {contested} to command {winner}")]
    Outprioritized { contested: String, winner: CommandId },
}

impl Rejection {
    /// Stable reason code stored in the audit log.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LateSubmission { .. } => "late_submission",
            Self::DuplicateOrder { .. } => "duplicate_order",
            Self::DuplicateResearch { .. } => "duplicate_research",
            Self::Superseded { .. } => "superseded",
            Self::TargetTooFar { .. } => "target_too_far",
            Self::GameNotActive => "game_not_active",
            Self::UnknownPlayer { .. } => "unknown_player",
            Self::KindNotAllowed { .. } => "kind_not_allowed",
            Self::ValidationFailure(_) => "validation_failure",
            Self::InsufficientResources { .. } => "insufficient_resources",
            Self::Outprioritized { .. } => "outprioritized",
        }
    }
}

impl From<ValidationFailure> for Rejection {
    fn from(v: ValidationFailure) -> Self {
        Rejection::ValidationFailure(v)
    }
}

/// Stale or illegal command detected against the resolution base state.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationFailure {
    #[error("unit {unit_id} does not exist")]
    UnitMissing { unit_id: UnitId },
    #[error("unit {unit_id} is not controlled by player {player_id}")]
    NotOwner { unit_id: UnitId, player_id: PlayerId },
    #[error("tile {coord} does not exist")]
    TileMissing { coord: HexCoord },
    #[error("tile {coord} cannot be entered")]
    Impassable { coord: HexCoord },
    #[error("no path to {to} within {budget} movement")]
    Unreachable { to: HexCoord, budget: u32 },
    #[error("not enough stamina: need {needed}, have {available}")]
    Exhausted { needed: i32, available: i32 },
    #[error("target {target} out of range {range}")]
    OutOfRange { target: UnitId, range: u32 },
    #[error("unit {target} belongs to the attacker's own player")]
    FriendlyTarget { target: UnitId },
    #[error("player {other} is at peace or allied with the attacker")]
    TreatyBlocks { other: PlayerId },
    #[error("unknown {kind} definition '{id}'")]
    UnknownDefinition { kind: String, id: String },
    #[error("tile {coord} has no room for another unit")]
    TileFull { coord: HexCoord },
    #[error("tile {coord} already has a structure")]
    TileOccupied { coord: HexCoord },
    #[error("technology '{tech}' already researched or in progress")]
    AlreadyResearched { tech: String },
    #[error("research of '{current}' is still in progress")]
    ResearchBusy { current: String },
    #[error("technology '{tech}' requires '{missing}'")]
    MissingPrerequisite { tech: String, missing: String },
    #[error("player {other} cannot hold diplomacy with itself or an unknown player")]
    InvalidCounterparty { other: PlayerId },
    #[error("no treaty with player {other} to break")]
    NoTreaty { other: PlayerId },
    #[error("item '{item_id}' is not available here")]
    ItemUnavailable { item_id: String },
    #[error("inventory full")]
    InventoryFull,
    #[error("interactable '{interactable_id}' is not usable now")]
    InteractableUnavailable { interactable_id: String },
    #[error("attribute '{key}' rejected by schema: {reason}")]
    AttributeSchema { key: String, reason: String },
    #[error("malformed command: {detail}")]
    Malformed { detail: String },
}
