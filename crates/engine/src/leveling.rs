//! Level thresholds and level-up detection.
//!
//! Levels are compared against the lifetime `total_earned` counter, never the
//! spendable balance, so buying upgrades cannot undo progress.

use crate::error::ConfigError;
use tapheart_protocol::{LevelRequirement, LevelUp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    rows: Vec<LevelRequirement>,
}

impl LevelTable {
    /// Rows must start at level 1 / 0 points and increase strictly in both
    /// fields.
    pub fn new(rows: Vec<LevelRequirement>) -> Result<Self, ConfigError> {
        let first = rows.first().ok_or(ConfigError::EmptyLevelTable)?;
        if first.level != 1 || first.points_required != 0 {
            return Err(ConfigError::LevelTableStart {
                level: first.level,
                points: first.points_required,
            });
        }
        for pair in rows.windows(2) {
            if pair[1].level <= pair[0].level
                || pair[1].points_required <= pair[0].points_required
            {
                return Err(ConfigError::LevelTableOrder {
                    level: pair[1].level,
                });
            }
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[LevelRequirement] {
        &self.rows
    }

    /// Highest level whose threshold is at or below `points`.
    pub fn level_for(&self, points: i64) -> u32 {
        self.rows
            .iter()
            .take_while(|r| r.points_required <= points)
            .last()
            .map(|r| r.level)
            .unwrap_or(1)
    }

    /// Every level above `current` that `points` reaches, ascending.
    pub fn advance(&self, current: u32, points: i64) -> Vec<LevelUp> {
        self.rows
            .iter()
            .filter(|r| r.level > current && r.points_required <= points)
            .map(|r| LevelUp {
                level: r.level,
                points_required: r.points_required,
            })
            .collect()
    }

    pub fn next_after(&self, level: u32) -> Option<LevelRequirement> {
        self.rows.iter().find(|r| r.level > level).copied()
    }
}
