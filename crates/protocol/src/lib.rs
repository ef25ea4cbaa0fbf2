use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub level: u32,
    pub points: i64,
    pub gems: i64,
    pub energy: i64,
    pub max_energy: i64,
    pub hourly_rate: i64,
    pub last_active_ms: i64,
    pub created_at_ms: i64,
    pub rev: i64,
    // Sub-unit remainders of passive income and energy regen.
    #[serde(default, skip_serializing)]
    pub accrual_carry: i64,
    #[serde(default, skip_serializing)]
    pub regen_carry: i64,
}

/// A per-player upgrade instance. `id` is the catalog key shared by every
/// player, so `required_upgrades` can name prerequisites by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upgrade {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub base_cost: i64,
    pub level: u32,
    pub max_level: u32,
    #[serde(default)]
    pub hourly_bonus: i64,
    #[serde(default)]
    pub tap_bonus: i64,
    #[serde(default)]
    pub energy_bonus: i64,
    #[serde(default = "default_level")]
    pub required_level: u32,
    #[serde(default)]
    pub required_upgrades: BTreeMap<String, u32>,
    #[serde(default)]
    pub is_capstone: bool,
}

fn default_level() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStats {
    pub user_id: String,
    pub total_taps: i64,
    pub total_earned: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_wheel_spin_ms: Option<i64>,
    pub wheel_spins_remaining: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_character_id: Option<String>,
}

impl GameStats {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            total_taps: 0,
            total_earned: 0,
            last_wheel_spin_ms: None,
            wheel_spins_remaining: 1,
            selected_character_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default = "default_level")]
    pub required_level: u32,
    #[serde(default)]
    pub is_wheel_reward: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardKind {
    Coins,
    Gems,
    Character,
    Energy,
}

impl RewardKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coins => "coins",
            Self::Gems => "gems",
            Self::Character => "character",
            Self::Energy => "energy",
        }
    }
}

impl FromStr for RewardKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coins" => Ok(Self::Coins),
            "gems" => Ok(Self::Gems),
            "character" => Ok(Self::Character),
            "energy" => Ok(Self::Energy),
            other => Err(format!("unknown reward kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    #[default]
    Common,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Rare => "rare",
            Self::Epic => "epic",
            Self::Legendary => "legendary",
        }
    }
}

impl FromStr for Rarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "common" => Ok(Self::Common),
            "rare" => Ok(Self::Rare),
            "epic" => Ok(Self::Epic),
            "legendary" => Ok(Self::Legendary),
            other => Err(format!("unknown rarity: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelReward {
    pub id: String,
    pub kind: RewardKind,
    /// Credited amount, or the lower bound when `max_amount` is set.
    #[serde(default)]
    pub amount: i64,
    /// Upper bound (inclusive) of a rolled amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<i64>,
    #[serde(default)]
    pub rarity: Rarity,
    pub label: String,
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRequirement {
    pub level: u32,
    pub points_required: i64,
}

/// One crossed level threshold. Emitted in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUp {
    pub level: u32,
    pub points_required: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPrereq {
    pub upgrade_id: String,
    pub name: String,
    pub min_level: u32,
    pub current_level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub upgrade_id: String,
    pub name: String,
    pub level: u32,
}

/// A recoverable, user-facing refusal. The `reason` tag is the stable code
/// clients switch on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleViolation {
    MaxLevel {
        max_level: u32,
    },
    LevelLocked {
        required_level: u32,
        current_level: u32,
    },
    PrereqLocked {
        missing: Vec<MissingPrereq>,
    },
    CapstoneLocked {
        threshold: u32,
        below: Vec<Shortfall>,
    },
    InsufficientFunds {
        required: i64,
        available: i64,
    },
    OutOfEnergy {
        required: i64,
        available: i64,
    },
    SpinCooldown {
        remaining_ms: i64,
        next_spin_at_ms: i64,
    },
    NoActiveRewards,
    CharacterLocked {
        character_id: String,
    },
}

impl RuleViolation {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MaxLevel { .. } => "MAX_LEVEL",
            Self::LevelLocked { .. } => "LEVEL_LOCKED",
            Self::PrereqLocked { .. } => "PREREQ_LOCKED",
            Self::CapstoneLocked { .. } => "CAPSTONE_LOCKED",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::OutOfEnergy { .. } => "OUT_OF_ENERGY",
            Self::SpinCooldown { .. } => "SPIN_COOLDOWN",
            Self::NoActiveRewards => "NO_ACTIVE_REWARDS",
            Self::CharacterLocked { .. } => "CHARACTER_LOCKED",
        }
    }
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxLevel { max_level } => {
                write!(f, "upgrade is already at maximum level {max_level}")
            }
            Self::LevelLocked { required_level, .. } => {
                write!(f, "requires player level {required_level}")
            }
            Self::PrereqLocked { missing } => {
                let parts: Vec<String> = missing
                    .iter()
                    .map(|m| format!("{} level {}", m.name, m.min_level))
                    .collect();
                write!(f, "requires {}", parts.join(", "))
            }
            Self::CapstoneLocked { threshold, below } => write!(
                f,
                "all upgrades must reach level {threshold} ({} below)",
                below.len()
            ),
            Self::InsufficientFunds {
                required,
                available,
            } => write!(f, "not enough points: need {required}, have {available}"),
            Self::OutOfEnergy {
                required,
                available,
            } => write!(f, "not enough energy: need {required}, have {available}"),
            Self::SpinCooldown { remaining_ms, .. } => {
                write!(f, "daily spin already used, next in {}s", remaining_ms / 1000)
            }
            Self::NoActiveRewards => write!(f, "no wheel rewards are available"),
            Self::CharacterLocked { character_id } => {
                write!(f, "character {character_id} is not unlocked")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    RuleViolation,
    PersistenceFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<RuleViolation>,
}

/// Advisory purchasability shown next to each upgrade. The server re-checks
/// on purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<RuleViolation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeView {
    #[serde(flatten)]
    pub upgrade: Upgrade,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cost: Option<i64>,
    pub hourly_bonus_now: i64,
    pub eligibility: Eligibility,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub user: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<Character>,
    pub stats: GameStats,
    pub upgrades: Vec<UpgradeView>,
    pub tap_value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_level: Option<LevelRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_spin_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapOutcome {
    pub points_earned: i64,
    pub energy_spent: i64,
    pub points: i64,
    pub energy: i64,
    pub total_taps: i64,
    pub level_ups: Vec<LevelUp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOutcome {
    pub upgrade: Upgrade,
    pub cost: i64,
    pub points: i64,
    pub hourly_rate: i64,
    pub max_energy: i64,
    pub tap_value: i64,
    pub level_ups: Vec<LevelUp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpinOutcome {
    pub reward: WheelReward,
    /// Amount actually credited; 0 for character rewards.
    pub amount: i64,
    pub points: i64,
    pub gems: i64,
    pub energy: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocked_character: Option<String>,
    pub next_spin_at_ms: i64,
    pub level_ups: Vec<LevelUp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub accrued_points: i64,
    pub regenerated_energy: i64,
    pub user: User,
    pub level_ups: Vec<LevelUp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOutcome {
    pub character: Character,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WheelStatus {
    pub can_spin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_spin_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_spin_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEvent {
    pub seq: i64,
    pub ts_ms: i64,
    pub kind: String,
    pub user_id: String,
    pub payload: serde_json::Value,
}

pub mod events {
    pub const LEVEL_UP: &str = "player.level_up";
    pub const CHARACTER_UNLOCKED: &str = "character.unlocked";
    pub const CHARACTER_SELECTED: &str = "character.selected";
    pub const UPGRADE_PURCHASED: &str = "upgrade.purchased";
    pub const WHEEL_SPUN: &str = "wheel.spun";
}
