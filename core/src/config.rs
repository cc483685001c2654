use crate::types::ResourceBag;
use serde::{Deserialize, Serialize};

/// Per-game configuration. Fixed at game creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Real-time seconds per tick.
    pub tick_length_secs: i64,
    pub map_width: u32,
    pub map_height: u32,
    pub ruleset_version: String,
    pub max_players: u32,
    /// How many ticks past the next unresolved one a command may target.
    pub max_lead_ticks: u64,
    /// Whether a submission flagged `supersede` may replace a queued order.
    pub allow_supersede: bool,
    /// Commit attempts after a sequence conflict before escalating.
    pub max_commit_retries: u32,
    /// Wall-clock budget for validate + arbitrate + resolve.
    pub tick_budget_ms: u64,
    pub starting_resources: ResourceBag,
    /// Income every active player receives each tick.
    pub base_income: ResourceBag,
    /// Unit kinds each player starts with.
    pub starting_units: Vec<String>,
    pub stamina_regen: i32,
    pub hp_regen: i32,
    /// Chance, in percent, that a generated land tile holds loot.
    pub loot_density_percent: u64,
    /// Chance, in percent, that a generated land tile holds an interactable.
    pub interactable_density_percent: u64,
}

/// Thirty days. Longer ticks are refused at load.
pub const MAX_TICK_LENGTH_SECS: i64 = 30 * 24 * 60 * 60;

impl GameConfig {
    /// Reject configurations the scheduler cannot honour.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_length_secs <= 0 || self.tick_length_secs > MAX_TICK_LENGTH_SECS {
            anyhow::bail!(
                "tick_length_secs ({}) must be between 1 and {MAX_TICK_LENGTH_SECS}",
                self.tick_length_secs
            );
        }
        let tick_ms = u64::try_from(self.tick_length_secs)? * 1000;
        if self.tick_budget_ms == 0 || self.tick_budget_ms >= tick_ms {
            anyhow::bail!(
                "tick_budget_ms ({}) must be positive and below the tick length ({tick_ms}ms)",
                self.tick_budget_ms
            );
        }
        if self.map_width == 0 || self.map_height == 0 {
            anyhow::bail!("map dimensions must be non-zero");
        }
        if self.max_players == 0 {
            anyhow::bail!("max_players must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct EngineFile {
    game_defaults: GameConfig,
}

/// Process-wide configuration: defaults applied to newly created games.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub game_defaults: GameConfig,
}

impl EngineConfig {
    /// Load from `{data_dir}/engine.json`.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/engine.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: EngineFile = serde_json::from_str(&content)?;
        file.game_defaults.validate()?;
        Ok(Self {
            game_defaults: file.game_defaults,
        })
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let bag = |entries: &[(&str, i64)]| -> ResourceBag {
            entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
        };
        Self {
            game_defaults: GameConfig {
                tick_length_secs: 15 * 60,
                map_width: 8,
                map_height: 8,
                ruleset_version: "v1".into(),
                max_players: 4,
                max_lead_ticks: 3,
                allow_supersede: true,
                max_commit_retries: 3,
                tick_budget_ms: 60_000,
                starting_resources: bag(&[("gold", 100), ("food", 20)]),
                base_income: bag(&[("gold", 5)]),
                starting_units: vec!["infantry".into(), "scout".into()],
                stamina_regen: 2,
                hp_regen: 5,
                loot_density_percent: 10,
                interactable_density_percent: 5,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default_test()
            .game_defaults
            .validate()
            .expect("test defaults must pass validation");
    }

    #[test]
    fn budget_must_fit_inside_tick() {
        let mut cfg = EngineConfig::default_test().game_defaults;
        cfg.tick_budget_ms = (cfg.tick_length_secs as u64) * 1000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tick_length_is_bounded() {
        let mut cfg = EngineConfig::default_test().game_defaults;
        cfg.tick_length_secs = 86_400;
        assert!(cfg.validate().is_ok());
        cfg.tick_length_secs = MAX_TICK_LENGTH_SECS + 1;
        assert!(cfg.validate().is_err());
        cfg.tick_length_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
