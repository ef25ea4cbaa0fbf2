//! Time-based energy regeneration, passive income, and taps.

use crate::config::GameConfig;
use crate::curve;
use tapheart_protocol::{GameStats, RuleViolation, Upgrade, User};

const MS_PER_HOUR: i128 = 3_600_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accrual {
    pub elapsed_ms: i64,
    pub regenerated: i64,
    pub accrued: i64,
}

/// Applies everything that happened between `user.last_active_ms` and
/// `now_ms`, then moves `last_active_ms` to `now_ms`.
///
/// Sub-unit remainders are kept in the carry fields, so reconciling every
/// second earns exactly what one reconcile after an hour would. Calling it
/// again at the same instant changes nothing.
pub fn reconcile(
    user: &mut User,
    stats: &mut GameStats,
    now_ms: i64,
    cfg: &GameConfig,
) -> Accrual {
    let elapsed_ms = now_ms.saturating_sub(user.last_active_ms).max(0);

    let regenerated = regenerate(user, elapsed_ms, cfg);

    let units = i128::from(elapsed_ms) * i128::from(user.hourly_rate.max(0))
        + i128::from(user.accrual_carry);
    let accrued = clamp_i64(units / MS_PER_HOUR);
    user.accrual_carry = clamp_i64(units % MS_PER_HOUR);
    user.points = user.points.saturating_add(accrued);
    stats.total_earned = stats.total_earned.saturating_add(accrued);

    user.last_active_ms = user.last_active_ms.max(now_ms);

    Accrual {
        elapsed_ms,
        regenerated,
        accrued,
    }
}

fn regenerate(user: &mut User, elapsed_ms: i64, cfg: &GameConfig) -> i64 {
    if user.energy >= user.max_energy {
        // Full tanks do not bank regen.
        user.regen_carry = 0;
        return 0;
    }
    let interval = i128::from(cfg.regen_interval_ms().max(1));
    let units = i128::from(elapsed_ms) * i128::from(cfg.energy_regen_amount.max(0))
        + i128::from(user.regen_carry);
    let gained = clamp_i64(units / interval);
    let before = user.energy;
    user.energy = user.energy.saturating_add(gained).min(user.max_energy);
    user.regen_carry = if user.energy >= user.max_energy {
        0
    } else {
        clamp_i64(units % interval)
    };
    user.energy - before
}

fn clamp_i64(v: i128) -> i64 {
    v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

/// Spends `tap_energy_cost` energy for `tap_value` points. On rejection
/// nothing is touched.
pub fn tap(
    user: &mut User,
    stats: &mut GameStats,
    upgrades: &[Upgrade],
    cfg: &GameConfig,
) -> Result<i64, RuleViolation> {
    let cost = cfg.tap_energy_cost.max(1);
    if user.energy < cost {
        return Err(RuleViolation::OutOfEnergy {
            required: cost,
            available: user.energy,
        });
    }
    let earned = curve::tap_value(cfg.base_tap_value, upgrades);
    user.energy -= cost;
    user.points = user.points.saturating_add(earned);
    stats.total_taps += 1;
    stats.total_earned = stats.total_earned.saturating_add(earned);
    Ok(earned)
}
