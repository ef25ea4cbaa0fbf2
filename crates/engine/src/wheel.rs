//! Daily reward wheel.

use rand::Rng;
use tapheart_protocol::{GameStats, RewardKind, RuleViolation, User, WheelReward};

/// Earliest instant the next spin is allowed, or `None` if the player never
/// spun.
pub fn next_spin_at(stats: &GameStats, cooldown_ms: i64) -> Option<i64> {
    stats
        .last_wheel_spin_ms
        .map(|last| last.saturating_add(cooldown_ms))
}

pub fn check_cooldown(
    stats: &GameStats,
    now_ms: i64,
    cooldown_ms: i64,
) -> Result<(), RuleViolation> {
    match next_spin_at(stats, cooldown_ms) {
        Some(next) if now_ms < next => Err(RuleViolation::SpinCooldown {
            remaining_ms: next - now_ms,
            next_spin_at_ms: next,
        }),
        _ => Ok(()),
    }
}

/// Gives the spin back once the window since the last spin has passed.
pub fn refresh_spins(stats: &mut GameStats, now_ms: i64, cooldown_ms: i64) {
    if check_cooldown(stats, now_ms, cooldown_ms).is_ok() {
        stats.wheel_spins_remaining = 1;
    }
}

/// Rewards this player can win: active, positive weight, and not a character
/// they already own.
pub fn eligible_pool<'a>(rewards: &'a [WheelReward], owned: &[String]) -> Vec<&'a WheelReward> {
    rewards
        .iter()
        .filter(|r| r.is_active && r.weight > 0)
        .filter(|r| match (&r.kind, &r.character_id) {
            (RewardKind::Character, Some(id)) => !owned.contains(id),
            _ => true,
        })
        .collect()
}

/// One uniform draw over the summed weights; reward `i` wins with
/// probability `weight_i / Σ weight`.
pub fn select<'a, R: Rng>(pool: &[&'a WheelReward], rng: &mut R) -> Option<&'a WheelReward> {
    let total: u64 = pool.iter().map(|r| u64::from(r.weight)).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rng.gen_range(0..total);
    for r in pool {
        let w = u64::from(r.weight);
        if roll < w {
            return Some(*r);
        }
        roll -= w;
    }
    None
}

/// Amount to credit: uniform in `amount..=max_amount` when a range is set,
/// otherwise the fixed `amount`.
pub fn roll_amount<R: Rng>(reward: &WheelReward, rng: &mut R) -> i64 {
    let min = reward.amount.max(0);
    match reward.max_amount {
        Some(max) if max > min => rng.gen_range(min..=max),
        _ => min,
    }
}

/// Credits a non-character reward. Character rewards are unlocked by the
/// caller, which owns the character catalog.
pub fn apply_currency(user: &mut User, stats: &mut GameStats, kind: RewardKind, amount: i64) {
    let amount = amount.max(0);
    match kind {
        RewardKind::Coins => {
            user.points = user.points.saturating_add(amount);
            stats.total_earned = stats.total_earned.saturating_add(amount);
        }
        RewardKind::Gems => user.gems = user.gems.saturating_add(amount),
        RewardKind::Energy => {
            user.energy = user.energy.saturating_add(amount).min(user.max_energy);
        }
        RewardKind::Character => {}
    }
}

pub fn record_spin(stats: &mut GameStats, now_ms: i64) {
    stats.last_wheel_spin_ms = Some(now_ms);
    stats.wheel_spins_remaining = 0;
}
