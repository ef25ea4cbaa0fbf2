//! Tunable game rules.
//!
//! [`GameConfig`] carries every number the engine would otherwise hard-code,
//! plus the catalog each new player is seeded with. Load it from YAML with
//! [`GameConfig::load`]; missing keys fall back to [`GameConfig::default`], so a
//! file may override just the values it cares about.

use crate::error::ConfigError;
use crate::leveling::LevelTable;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tapheart_protocol::{Character, LevelRequirement, Rarity, RewardKind, Upgrade, WheelReward};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Points per tap before upgrade bonuses.
    pub base_tap_value: i64,
    /// Energy consumed by one tap.
    pub tap_energy_cost: i64,
    /// Energy regenerated per `energy_regen_interval_secs`.
    pub energy_regen_amount: i64,
    pub energy_regen_interval_secs: i64,
    pub wheel_cooldown_secs: i64,
    /// Level every other upgrade must reach before a capstone is purchasable.
    pub capstone_threshold: u32,
    pub cost_growth: f64,
    pub bonus_growth: f64,

    pub starting_points: i64,
    pub starting_gems: i64,
    pub base_max_energy: i64,

    pub levels: Vec<LevelRequirement>,
    pub upgrades: Vec<UpgradeTemplate>,
    pub characters: Vec<Character>,
    pub wheel_rewards: Vec<WheelReward>,
}

/// Catalog entry copied into a player's upgrade rows at level 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub base_cost: i64,
    pub max_level: u32,
    #[serde(default)]
    pub hourly_bonus: i64,
    #[serde(default)]
    pub tap_bonus: i64,
    #[serde(default)]
    pub energy_bonus: i64,
    #[serde(default = "one")]
    pub required_level: u32,
    #[serde(default)]
    pub required_upgrades: BTreeMap<String, u32>,
    #[serde(default)]
    pub is_capstone: bool,
}

fn one() -> u32 {
    1
}

impl UpgradeTemplate {
    pub fn instantiate(&self, user_id: &str) -> Upgrade {
        Upgrade {
            id: self.id.clone(),
            user_id: user_id.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            base_cost: self.base_cost,
            level: 0,
            max_level: self.max_level,
            hourly_bonus: self.hourly_bonus,
            tap_bonus: self.tap_bonus,
            energy_bonus: self.energy_bonus,
            required_level: self.required_level,
            required_upgrades: self.required_upgrades.clone(),
            is_capstone: self.is_capstone,
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            base_tap_value: 125,
            tap_energy_cost: 1,
            energy_regen_amount: 3,
            energy_regen_interval_secs: 5,
            wheel_cooldown_secs: 24 * 60 * 60,
            capstone_threshold: 4,
            cost_growth: 1.15,
            bonus_growth: 0.1,
            starting_points: 1000,
            starting_gems: 50,
            base_max_energy: 4500,
            levels: default_levels(),
            upgrades: default_upgrades(),
            characters: default_characters(),
            wheel_rewards: default_wheel_rewards(),
        }
    }
}

impl GameConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let cfg: GameConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse config: {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("validate config: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn level_table(&self) -> Result<LevelTable, ConfigError> {
        LevelTable::new(self.levels.clone())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.level_table()?;

        min("tap_energy_cost", self.tap_energy_cost, 1)?;
        min("energy_regen_amount", self.energy_regen_amount, 0)?;
        min("energy_regen_interval_secs", self.energy_regen_interval_secs, 1)?;
        min("wheel_cooldown_secs", self.wheel_cooldown_secs, 0)?;
        min("base_max_energy", self.base_max_energy, 1)?;
        min("starting_points", self.starting_points, 0)?;
        min("base_tap_value", self.base_tap_value, 0)?;

        let mut ids = HashSet::new();
        for u in &self.upgrades {
            if !ids.insert(u.id.as_str()) {
                return Err(ConfigError::DuplicateId(u.id.clone()));
            }
            min("upgrade.base_cost", u.base_cost, 1)?;
        }
        for u in &self.upgrades {
            for prereq in u.required_upgrades.keys() {
                if !ids.contains(prereq.as_str()) {
                    return Err(ConfigError::UnknownPrereq {
                        upgrade: u.id.clone(),
                        prereq: prereq.clone(),
                    });
                }
            }
        }

        let mut ids = HashSet::new();
        for c in &self.characters {
            if !ids.insert(c.id.as_str()) {
                return Err(ConfigError::DuplicateId(c.id.clone()));
            }
        }
        let mut ids = HashSet::new();
        for r in &self.wheel_rewards {
            if !ids.insert(r.id.as_str()) {
                return Err(ConfigError::DuplicateId(r.id.clone()));
            }
            if r.kind == RewardKind::Character && r.character_id.is_none() {
                return Err(ConfigError::RewardWithoutCharacter(r.id.clone()));
            }
            if r.max_amount.is_some_and(|max| max < r.amount) {
                return Err(ConfigError::RewardRange(r.id.clone()));
            }
        }
        Ok(())
    }

    pub fn regen_interval_ms(&self) -> i64 {
        self.energy_regen_interval_secs.saturating_mul(1000)
    }

    pub fn wheel_cooldown_ms(&self) -> i64 {
        self.wheel_cooldown_secs.saturating_mul(1000)
    }
}

fn min(field: &'static str, value: i64, min: i64) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::MinViolation { field, min, value });
    }
    Ok(())
}

fn default_levels() -> Vec<LevelRequirement> {
    [
        (1, 0),
        (2, 1_000),
        (3, 2_500),
        (4, 5_000),
        (5, 10_000),
        (6, 20_000),
        (7, 40_000),
        (8, 75_000),
        (9, 125_000),
        (10, 200_000),
    ]
    .into_iter()
    .map(|(level, points_required)| LevelRequirement {
        level,
        points_required,
    })
    .collect()
}

fn default_upgrades() -> Vec<UpgradeTemplate> {
    let t = |id: &str, name: &str, description: &str, base_cost, max_level| UpgradeTemplate {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        base_cost,
        max_level,
        hourly_bonus: 0,
        tap_bonus: 0,
        energy_bonus: 0,
        required_level: 1,
        required_upgrades: BTreeMap::new(),
        is_capstone: false,
    };
    vec![
        UpgradeTemplate {
            tap_bonus: 25,
            ..t("tap_power", "Tap Power", "Increase points per tap", 100, 10)
        },
        UpgradeTemplate {
            energy_bonus: 250,
            ..t("energy_boost", "Energy Boost", "Increase maximum energy", 150, 10)
        },
        UpgradeTemplate {
            hourly_bonus: 50,
            required_level: 2,
            required_upgrades: BTreeMap::from([("tap_power".to_string(), 2)]),
            ..t("auto_collector", "Auto Collector", "Earn points automatically", 250, 15)
        },
        UpgradeTemplate {
            tap_bonus: 50,
            hourly_bonus: 200,
            required_level: 3,
            is_capstone: true,
            ..t(
                "level_upgrade",
                "Level Upgrade",
                "Unlocks once every upgrade reaches level 4",
                5_000,
                5,
            )
        },
    ]
}

fn default_characters() -> Vec<Character> {
    vec![
        Character {
            id: "luna".to_string(),
            name: "Luna".to_string(),
            bio: "A mysterious and charming companion".to_string(),
            required_level: 1,
            is_wheel_reward: false,
        },
        Character {
            id: "mira".to_string(),
            name: "Mira".to_string(),
            bio: "Shows up once you have proven your dedication".to_string(),
            required_level: 3,
            is_wheel_reward: false,
        },
        Character {
            id: "aria".to_string(),
            name: "Aria".to_string(),
            bio: "Only the wheel knows where she is".to_string(),
            required_level: 1,
            is_wheel_reward: true,
        },
    ]
}

fn default_wheel_rewards() -> Vec<WheelReward> {
    let r = |id: &str, kind, amount, rarity, label: &str, weight| WheelReward {
        id: id.to_string(),
        kind,
        amount,
        max_amount: None,
        rarity,
        label: label.to_string(),
        weight,
        character_id: None,
        is_active: true,
    };
    vec![
        WheelReward {
            max_amount: Some(1_000),
            ..r("coins_small", RewardKind::Coins, 500, Rarity::Common, "500-1000 coins", 100)
        },
        WheelReward {
            max_amount: Some(5_000),
            ..r("coins_large", RewardKind::Coins, 2_500, Rarity::Rare, "2500-5000 coins", 30)
        },
        WheelReward {
            max_amount: Some(10),
            ..r("gems_small", RewardKind::Gems, 5, Rarity::Rare, "5-10 gems", 40)
        },
        r("energy_refill", RewardKind::Energy, 1_000, Rarity::Common, "1000 energy", 80),
        WheelReward {
            character_id: Some("aria".to_string()),
            ..r("character_aria", RewardKind::Character, 0, Rarity::Legendary, "Aria", 5)
        },
    ]
}
