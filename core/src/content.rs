//! Static content lookup: unit stats, structures and the research tree.
//!
//! The content service is an external collaborator. The core reads it and
//! never mutates it. Definitions are versioned by ruleset; a game pins its
//! ruleset version at creation, so a cached or remotely served ruleset is
//! interchangeable with this file-backed one.

use crate::{
    attributes::{AttrType, AttributeSpec},
    types::ResourceBag,
    world::Terrain,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDef {
    pub id: String,
    pub max_hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub range: u32,
    /// Conflict priority: higher initiative moves first.
    pub initiative: u32,
    /// Movement allowance per tick, in terrain cost units.
    pub movement: u32,
    pub max_stamina: i32,
    pub inventory_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDef {
    pub id: String,
    pub cost: ResourceBag,
    pub build_ticks: u32,
    pub max_hp: i32,
    /// Resources produced every tick once complete.
    #[serde(default)]
    pub yields: ResourceBag,
    /// Extra research progress per tick once complete.
    #[serde(default)]
    pub research_bonus: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechDef {
    pub id: String,
    pub cost: ResourceBag,
    pub research_ticks: u32,
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

/// One version of the game rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub version: String,
    pub units: BTreeMap<String, UnitDef>,
    pub structures: BTreeMap<String, StructureDef>,
    pub techs: BTreeMap<String, TechDef>,
    /// Cost to enter a tile of the given terrain. Missing terrain is impassable.
    pub terrain_costs: BTreeMap<Terrain, u32>,
    /// Command kinds players may submit under this ruleset.
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
}

impl Ruleset {
    pub fn unit(&self, id: &str) -> Option<&UnitDef> {
        self.units.get(id)
    }

    pub fn structure(&self, id: &str) -> Option<&StructureDef> {
        self.structures.get(id)
    }

    pub fn tech(&self, id: &str) -> Option<&TechDef> {
        self.techs.get(id)
    }

    pub fn terrain_cost(&self, terrain: Terrain) -> Option<u32> {
        self.terrain_costs.get(&terrain).copied()
    }

    pub fn allows(&self, kind: &str) -> bool {
        self.allowed_commands.iter().any(|k| k == kind)
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.key == key)
    }
}

/// Read-only lookup of rulesets by version.
pub trait ContentService: Send + Sync {
    fn ruleset(&self, version: &str) -> Option<Arc<Ruleset>>;
}

/// Rulesets held in memory, loaded once from `data/content/`.
#[derive(Debug, Clone, Default)]
pub struct StaticContent {
    rulesets: BTreeMap<String, Arc<Ruleset>>,
}

impl StaticContent {
    pub fn new(rulesets: impl IntoIterator<Item = Ruleset>) -> Self {
        Self {
            rulesets: rulesets
                .into_iter()
                .map(|r| (r.version.clone(), Arc::new(r)))
                .collect(),
        }
    }

    /// Load every `*.json` ruleset file in `{data_dir}/content`.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let dir = format!("{data_dir}/content");
        let mut rulesets = Vec::new();
        let mut paths: Vec<_> = std::fs::read_dir(&dir)
            .map_err(|e| anyhow::anyhow!("Cannot read {dir}: {e}"))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        for path in paths {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
            let ruleset: Ruleset = serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Invalid ruleset {}: {e}", path.display()))?;
            log::debug!("Loaded ruleset {} from {}", ruleset.version, path.display());
            rulesets.push(ruleset);
        }
        if rulesets.is_empty() {
            anyhow::bail!("No rulesets found in {dir}");
        }
        Ok(Self::new(rulesets))
    }

    /// Ruleset "v1" with hardcoded values for use in tests.
    pub fn default_test() -> Self {
        Self::new([test_ruleset()])
    }
}

impl ContentService for StaticContent {
    fn ruleset(&self, version: &str) -> Option<Arc<Ruleset>> {
        self.rulesets.get(version).cloned()
    }
}

fn bag(entries: &[(&str, i64)]) -> ResourceBag {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn test_ruleset() -> Ruleset {
    let units = [
        UnitDef {
            id: "infantry".into(),
            max_hp: 100,
            attack: 30,
            defense: 20,
            range: 1,
            initiative: 5,
            movement: 3,
            max_stamina: 10,
            inventory_capacity: 5,
        },
        UnitDef {
            id: "scout".into(),
            max_hp: 60,
            attack: 15,
            defense: 10,
            range: 1,
            initiative: 9,
            movement: 5,
            max_stamina: 12,
            inventory_capacity: 3,
        },
        UnitDef {
            id: "archer".into(),
            max_hp: 70,
            attack: 25,
            defense: 10,
            range: 2,
            initiative: 6,
            movement: 2,
            max_stamina: 8,
            inventory_capacity: 4,
        },
    ];

    let structures = [
        StructureDef {
            id: "farm".into(),
            cost: bag(&[("gold", 80)]),
            build_ticks: 2,
            max_hp: 50,
            yields: bag(&[("food", 5)]),
            research_bonus: 0,
        },
        StructureDef {
            id: "mine".into(),
            cost: bag(&[("gold", 120)]),
            build_ticks: 3,
            max_hp: 80,
            yields: bag(&[("gold", 4)]),
            research_bonus: 0,
        },
        StructureDef {
            id: "library".into(),
            cost: bag(&[("gold", 60)]),
            build_ticks: 3,
            max_hp: 40,
            yields: ResourceBag::new(),
            research_bonus: 1,
        },
    ];

    let techs = [
        TechDef {
            id: "agriculture".into(),
            cost: bag(&[("gold", 50)]),
            research_ticks: 2,
            prerequisites: vec![],
        },
        TechDef {
            id: "bronze_working".into(),
            cost: bag(&[("gold", 60)]),
            research_ticks: 3,
            prerequisites: vec![],
        },
        TechDef {
            id: "iron_working".into(),
            cost: bag(&[("gold", 100)]),
            research_ticks: 4,
            prerequisites: vec!["bronze_working".into()],
        },
    ];

    let terrain_costs = [
        (Terrain::Plains, 1),
        (Terrain::Desert, 1),
        (Terrain::Urban, 1),
        (Terrain::Forest, 2),
        (Terrain::Swamp, 2),
        (Terrain::Snow, 2),
        (Terrain::Mountain, 3),
    ]
    .into_iter()
    .collect();

    Ruleset {
        version: "v1".into(),
        units: units.into_iter().map(|u| (u.id.clone(), u)).collect(),
        structures: structures.into_iter().map(|s| (s.id.clone(), s)).collect(),
        techs: techs.into_iter().map(|t| (t.id.clone(), t)).collect(),
        terrain_costs,
        allowed_commands: ["move", "attack", "build", "research", "diplomacy", "loot", "interact"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        attributes: vec![
            AttributeSpec {
                key: "morale".into(),
                attr_type: AttrType::Int,
                min: Some(0),
                max: Some(100),
            },
            AttributeSpec {
                key: "blessed".into(),
                attr_type: AttrType::Bool,
                min: None,
                max: None,
            },
            AttributeSpec {
                key: "title".into(),
                attr_type: AttrType::Text,
                min: None,
                max: None,
            },
        ],
    }
}
