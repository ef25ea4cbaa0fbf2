//! Cost and bonus progression.

use tapheart_protocol::Upgrade;

pub const COST_GROWTH: f64 = 1.15;
pub const BONUS_GROWTH: f64 = 0.1;

/// Price of buying level `level + 1`, i.e. `floor(base × 1.15^level)`.
///
/// Clamped below by `base + level` so the curve stays strictly increasing for
/// tiny base costs; any base of 7 or more never hits the clamp. Does not know
/// about `max_level`; callers check that first.
pub fn next_cost(base_cost: i64, level: u32) -> i64 {
    next_cost_with(base_cost, level, COST_GROWTH)
}

pub fn next_cost_with(base_cost: i64, level: u32, growth: f64) -> i64 {
    let exact = (base_cost as f64 * growth.powi(level as i32)).floor() as i64;
    exact.max(base_cost.saturating_add(i64::from(level)))
}

/// `floor(base + base × 0.1 × level)`.
pub fn current_hourly_bonus(base_bonus: i64, level: u32) -> i64 {
    current_hourly_bonus_with(base_bonus, level, BONUS_GROWTH)
}

pub fn current_hourly_bonus_with(base_bonus: i64, level: u32, growth: f64) -> i64 {
    let b = base_bonus as f64;
    (b + b * growth * f64::from(level)).floor() as i64
}

/// Points per tap: the base value plus every owned upgrade's tap bonus scaled
/// by its level.
pub fn tap_value(base_tap: i64, upgrades: &[Upgrade]) -> i64 {
    upgrades.iter().fold(base_tap, |acc, u| {
        acc.saturating_add(u.tap_bonus.saturating_mul(i64::from(u.level)))
    })
}

/// Passive income per hour. Unowned (level 0) upgrades contribute nothing.
pub fn hourly_rate(upgrades: &[Upgrade], growth: f64) -> i64 {
    upgrades
        .iter()
        .filter(|u| u.level > 0 && u.hourly_bonus > 0)
        .map(|u| current_hourly_bonus_with(u.hourly_bonus, u.level, growth))
        .sum()
}

pub fn max_energy(base_max: i64, upgrades: &[Upgrade]) -> i64 {
    upgrades.iter().fold(base_max, |acc, u| {
        acc.saturating_add(u.energy_bonus.saturating_mul(i64::from(u.level)))
    })
}

#[cfg(test)]
pub(crate) fn upgrade(id: &str, level: u32, max_level: u32) -> Upgrade {
    Upgrade {
        id: id.to_string(),
        user_id: "u1".to_string(),
        name: id.to_string(),
        description: String::new(),
        base_cost: 100,
        level,
        max_level,
        hourly_bonus: 0,
        tap_bonus: 0,
        energy_bonus: 0,
        required_level: 1,
        required_upgrades: Default::default(),
        is_capstone: false,
    }
}
