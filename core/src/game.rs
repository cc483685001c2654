use crate::{clock::TickClock, config::GameConfig, types::GameId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Waiting,
    Active,
    Paused,
    Finished,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Finished => "finished",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

/// Identity and immutable configuration of one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: GameId,
    pub name: String,
    pub seed: u64,
    pub status: GameStatus,
    pub config: GameConfig,
    pub clock: TickClock,
    pub created_at: DateTime<Utc>,
}

impl Game {
    pub fn new(
        game_id: GameId,
        name: impl Into<String>,
        seed: u64,
        config: GameConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let clock = TickClock::new(now, config.tick_length_secs);
        Self {
            game_id,
            name: name.into(),
            seed,
            status: GameStatus::Waiting,
            config,
            clock,
            created_at: now,
        }
    }

    pub fn accepts_commands(&self) -> bool {
        self.status == GameStatus::Active
    }
}
