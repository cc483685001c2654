//! World events: the append-only record of what each tick did.
//!
//! RULE: events are produced only by the resolver and passive rules,
//! attached to the tick that produced them, and never edited afterwards.

use crate::{
    command::DiplomacyAction,
    error::Rejection,
    hex::HexCoord,
    types::{CommandId, GameId, PlayerId, ResourceBag, Tick, UnitId},
    world::{Stance, Terrain},
};
use serde::{Deserialize, Serialize};

/// Every event emitted during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    // ── Command outcomes ───────────────────────────
    CommandRejected {
        command_id: CommandId,
        player_id: PlayerId,
        reason: Rejection,
    },
    UnitMoved {
        unit_id: UnitId,
        from: HexCoord,
        to: HexCoord,
        cost: u32,
    },
    CombatResolved {
        attacker: UnitId,
        defender: UnitId,
        damage: i32,
        counter_damage: i32,
        /// Seed of the combat roll, kept so the fight can be re-derived.
        seed: u64,
    },
    UnitDied {
        unit_id: UnitId,
        owner: PlayerId,
        at: HexCoord,
        killed_by: Option<UnitId>,
    },
    StructureStarted {
        player_id: PlayerId,
        structure: String,
        at: HexCoord,
    },
    ResearchStarted {
        player_id: PlayerId,
        tech: String,
    },
    DiplomacyChanged {
        player_id: PlayerId,
        with: PlayerId,
        action: DiplomacyAction,
        stance: Stance,
    },
    ItemLooted {
        unit_id: UnitId,
        item_id: String,
        at: HexCoord,
    },
    Interacted {
        unit_id: UnitId,
        interactable_id: String,
        at: HexCoord,
    },

    // ── Passive rules ──────────────────────────────
    ResourcesProduced {
        player_id: PlayerId,
        produced: ResourceBag,
    },
    StructureCompleted {
        player_id: PlayerId,
        structure: String,
        at: HexCoord,
    },
    ResearchCompleted {
        player_id: PlayerId,
        tech: String,
    },
    EffectExpired {
        unit_id: Option<UnitId>,
        at: Option<HexCoord>,
        effect: String,
    },
    ItemDespawned {
        item_id: String,
        at: HexCoord,
    },
    Windfall {
        resource: String,
        amount: i64,
    },
    ItemSpawned {
        item_id: String,
        at: HexCoord,
    },
    TerrainShifted {
        at: HexCoord,
        terrain: Terrain,
    },
}

impl GameEvent {
    /// Stable name used for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CommandRejected { .. } => "command_rejected",
            Self::UnitMoved { .. } => "unit_moved",
            Self::CombatResolved { .. } => "combat_resolved",
            Self::UnitDied { .. } => "unit_died",
            Self::StructureStarted { .. } => "structure_started",
            Self::ResearchStarted { .. } => "research_started",
            Self::DiplomacyChanged { .. } => "diplomacy_changed",
            Self::ItemLooted { .. } => "item_looted",
            Self::Interacted { .. } => "interacted",
            Self::ResourcesProduced { .. } => "resources_produced",
            Self::StructureCompleted { .. } => "structure_completed",
            Self::ResearchCompleted { .. } => "research_completed",
            Self::EffectExpired { .. } => "effect_expired",
            Self::ItemDespawned { .. } => "item_despawned",
            Self::Windfall { .. } => "windfall",
            Self::ItemSpawned { .. } => "item_spawned",
            Self::TerrainShifted { .. } => "terrain_shifted",
        }
    }
}

/// A world event attached to the tick that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalEvent {
    pub tick: Tick,
    /// Position within the tick, starting at 0.
    pub seq: u32,
    /// Which stage emitted it: "commands" or a passive rule name.
    pub source: String,
    pub event: GameEvent,
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub game_id: GameId,
    pub tick: Tick,
    pub seq: u32,
    pub source: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized GameEvent
}
