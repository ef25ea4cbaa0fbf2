use tapheart_protocol::{ErrorKind, RuleViolation};

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Rule(RuleViolation),

    #[error("persistence failure: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl GameError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Rule(_) => ErrorKind::RuleViolation,
            Self::Persistence(_) => ErrorKind::PersistenceFailure,
        }
    }

    pub fn violation(&self) -> Option<&RuleViolation> {
        match self {
            Self::Rule(v) => Some(v),
            _ => None,
        }
    }
}

impl From<RuleViolation> for GameError {
    fn from(v: RuleViolation) -> Self {
        Self::Rule(v)
    }
}

/// Failure of an atomic player commit.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// The user row moved past the revision the commit was computed against.
    #[error("stale revision for user {user_id}: expected {expected}")]
    Conflict { user_id: String, expected: i64 },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("level table is empty")]
    EmptyLevelTable,
    #[error("level table must start at level 1 with 0 points (got level {level}, {points} points)")]
    LevelTableStart { level: u32, points: i64 },
    #[error("level table not strictly increasing at level {level}")]
    LevelTableOrder { level: u32 },
    #[error("{field} must be at least {min} (got {value})")]
    MinViolation {
        field: &'static str,
        min: i64,
        value: i64,
    },
    #[error("duplicate catalog id: {0}")]
    DuplicateId(String),
    #[error("upgrade {upgrade} requires unknown upgrade {prereq}")]
    UnknownPrereq { upgrade: String, prereq: String },
    #[error("wheel reward {0} is a character reward without character_id")]
    RewardWithoutCharacter(String),
    #[error("wheel reward {0} has max_amount below amount")]
    RewardRange(String),
}
