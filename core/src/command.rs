use crate::{
    content::Ruleset,
    error::Rejection,
    hex::HexCoord,
    types::{CommandId, GameId, InteractableId, ItemId, PlayerId, ResourceBag, Tick, UnitId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All player-issued orders.
/// Variants are dispatched explicitly by kind in the validator, arbiter and
/// resolver, never through dynamic dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum PlayerCommand {
    Move {
        unit_id: UnitId,
        to: HexCoord,
    },
    Attack {
        unit_id: UnitId,
        target: UnitId,
    },
    Build {
        unit_id: UnitId,
        structure: String,
    },
    Research {
        tech: String,
    },
    Diplomacy {
        with: PlayerId,
        action: DiplomacyAction,
    },
    Loot {
        unit_id: UnitId,
        item_id: ItemId,
    },
    Interact {
        unit_id: UnitId,
        interactable_id: InteractableId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiplomacyAction {
    DeclareWar,
    ProposePeace,
    ProposeAlliance,
    BreakTreaty,
}

/// Order of application inside one tick. Every move lands before any
/// attack, so an attack is judged against post-move positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApplyPhase {
    Movement,
    Economy,
    Combat,
}

impl PlayerCommand {
    /// Stable kind name, matched against `Ruleset::allowed_commands`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Attack { .. } => "attack",
            Self::Build { .. } => "build",
            Self::Research { .. } => "research",
            Self::Diplomacy { .. } => "diplomacy",
            Self::Loot { .. } => "loot",
            Self::Interact { .. } => "interact",
        }
    }

    /// The unit this order is issued to, if any.
    pub fn unit_id(&self) -> Option<UnitId> {
        match self {
            Self::Move { unit_id, .. }
            | Self::Attack { unit_id, .. }
            | Self::Build { unit_id, .. }
            | Self::Loot { unit_id, .. }
            | Self::Interact { unit_id, .. } => Some(*unit_id),
            Self::Research { .. } | Self::Diplomacy { .. } => None,
        }
    }

    pub fn phase(&self) -> ApplyPhase {
        match self {
            Self::Move { .. } => ApplyPhase::Movement,
            Self::Attack { .. } => ApplyPhase::Combat,
            _ => ApplyPhase::Economy,
        }
    }

    /// Whether two orders for the same unit may both stand in one tick.
    /// Only move + attack combine: the unit moves, then attacks if the
    /// target is still in range.
    pub fn compatible_with(&self, other: &PlayerCommand) -> bool {
        matches!(
            (self, other),
            (Self::Move { .. }, Self::Attack { .. }) | (Self::Attack { .. }, Self::Move { .. })
        )
    }

    /// Resources this order spends, if it spends any.
    pub fn cost(&self, ruleset: &Ruleset) -> Option<ResourceBag> {
        match self {
            Self::Build { structure, .. } => ruleset.structure(structure).map(|s| s.cost.clone()),
            Self::Research { tech } => ruleset.tech(tech).map(|t| t.cost.clone()),
            _ => None,
        }
    }
}

/// What a player hands to the submission boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub command: PlayerCommand,
    /// Defaults to the next unresolved tick.
    #[serde(default)]
    pub target_tick: Option<Tick>,
    /// Replace an earlier conflicting order for the same unit.
    #[serde(default)]
    pub supersede: bool,
}

impl Submission {
    pub fn new(command: PlayerCommand) -> Self {
        Self {
            command,
            target_tick: None,
            supersede: false,
        }
    }

    pub fn for_tick(mut self, tick: Tick) -> Self {
        self.target_tick = Some(tick);
        self
    }

    pub fn superseding(mut self) -> Self {
        self.supersede = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Validated,
    Applied,
    Rejected,
    Withdrawn,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Rejected | Self::Withdrawn)
    }
}

/// An admitted command with its submission metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub game_id: GameId,
    pub command_id: CommandId,
    pub player_id: PlayerId,
    pub submitted_at: DateTime<Utc>,
    pub target_tick: Tick,
    pub status: CommandStatus,
    pub command: PlayerCommand,
}

/// Audit log entry: a command in its terminal (or last known) status.
/// Keyed by (game_id, tick, command_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// The tick whose audit this record belongs to: the resolved tick for
    /// frozen commands, the target tick for intake rejections.
    pub tick: Tick,
    pub command: QueuedCommand,
    pub rejection: Option<Rejection>,
    /// Part of a frozen resolution input (as opposed to refused at intake
    /// or withdrawn).
    pub resolution_input: bool,
}

impl CommandRecord {
    pub fn applied(tick: Tick, mut command: QueuedCommand) -> Self {
        command.status = CommandStatus::Applied;
        Self {
            tick,
            command,
            rejection: None,
            resolution_input: true,
        }
    }

    /// Rejected during resolution of `tick`.
    pub fn rejected(tick: Tick, mut command: QueuedCommand, reason: Rejection) -> Self {
        command.status = CommandStatus::Rejected;
        Self {
            tick,
            command,
            rejection: Some(reason),
            resolution_input: true,
        }
    }

    /// Refused at the submission boundary; never reached a frozen queue.
    pub fn refused(tick: Tick, mut command: QueuedCommand, reason: Rejection) -> Self {
        command.status = CommandStatus::Rejected;
        Self {
            tick,
            command,
            rejection: Some(reason),
            resolution_input: false,
        }
    }

    pub fn withdrawn(tick: Tick, mut command: QueuedCommand) -> Self {
        command.status = CommandStatus::Withdrawn;
        Self {
            tick,
            command,
            rejection: None,
            resolution_input: false,
        }
    }

    /// Replaying the tick must feed this command back in.
    pub fn was_resolution_input(&self) -> bool {
        self.resolution_input
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_move_and_attack_combine() {
        let mv = PlayerCommand::Move { unit_id: 1, to: HexCoord::new(1, 0) };
        let atk = PlayerCommand::Attack { unit_id: 1, target: 2 };
        let build = PlayerCommand::Build { unit_id: 1, structure: "farm".into() };
        assert!(mv.compatible_with(&atk));
        assert!(atk.compatible_with(&mv));
        assert!(!mv.compatible_with(&build));
        assert!(!mv.compatible_with(&mv), "two moves for one unit conflict");
    }

    #[test]
    fn commands_serialize_with_kind_tag() {
        let cmd = PlayerCommand::Diplomacy { with: 2, action: DiplomacyAction::ProposePeace };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["cmd"], "diplomacy");
        assert_eq!(json["action"], "propose_peace");
    }
}
